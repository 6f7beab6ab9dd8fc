#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Keeps the sessions served over HTTP, one per browser tab.
//!
//! Browsers rarely say goodbye, so every lookup refreshes a last-seen time
//! and [`SessionRegistry::spawn_sweeper`] drops sessions left idle for too
//! long.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::{Duration, Instant},
};

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{gateway::CompletionGateway, prompt::PromptBuilder, session::GradingSession};

/// A live session and the last time anyone asked for it.
struct Entry<G> {
    /// The session itself.
    session:   Arc<GradingSession<Arc<G>>>,
    /// Last time the session was created or looked up.
    last_seen: Instant,
}

/// Sessions keyed by identifier, all sharing one gateway.
pub struct SessionRegistry<G> {
    /// Completion service handed to every new session.
    gateway:  Arc<G>,
    /// Request composer handed to every new session.
    prompts:  PromptBuilder,
    /// Live sessions.
    sessions: Mutex<HashMap<Uuid, Entry<G>>>,
}

impl<G: CompletionGateway> SessionRegistry<G> {
    /// Creates an empty registry.
    pub fn new(gateway: G, prompts: PromptBuilder) -> Self {
        Self {
            gateway: Arc::new(gateway),
            prompts,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Locks the session map, recovering from a poisoned lock.
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Entry<G>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new empty session and returns it.
    pub fn create(&self) -> Arc<GradingSession<Arc<G>>> {
        let session = Arc::new(GradingSession::new(
            Arc::clone(&self.gateway),
            self.prompts.clone(),
        ));
        self.lock().insert(
            session.id(),
            Entry {
                session:   Arc::clone(&session),
                last_seen: Instant::now(),
            },
        );
        tracing::info!(session = %session.id(), "Session created");
        session
    }

    /// Looks a session up and marks it as recently used.
    pub fn get(&self, id: Uuid) -> Option<Arc<GradingSession<Arc<G>>>> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(&id)?;
        entry.last_seen = Instant::now();
        Some(Arc::clone(&entry.session))
    }

    /// Forgets a session; true if it existed. A request still in flight on
    /// it finishes against its own handle.
    pub fn remove(&self, id: Uuid) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            tracing::info!(session = %id, "Session removed");
        }
        removed
    }

    /// Drops every session unused for longer than `max_idle` and returns how
    /// many went. Sessions with a request in flight are kept.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let keep = entry.session.is_busy() || now.duration_since(entry.last_seen) <= max_idle;
            if !keep {
                tracing::info!(session = %id, "Idle session evicted");
            }
            keep
        });
        before - sessions.len()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no session is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<G: CompletionGateway + 'static> SessionRegistry<G> {
    /// Evicts idle sessions in the background every quarter of `max_idle`
    /// (between a millisecond and a minute). The task ends once the registry
    /// is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, max_idle: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = (max_idle / 4).clamp(Duration::from_millis(1), Duration::from_secs(60));

        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.evict_idle(max_idle);
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = registry.len(), "Swept idle sessions");
                }
            }
        })
    }
}
