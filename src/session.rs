#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The grading session orchestrator.
//!
//! A session moves `Empty → Grading → Graded`, and from `Graded` through
//! `Chatting` and back for every follow-up question. Only one request may be
//! in flight at a time; the completion call is awaited without holding the
//! store lock, and its result is committed in one locked step.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::SessionError,
    extract::{Extraction, ScoreRecord, extract},
    gateway::CompletionGateway,
    grammar::ScoreGrammar,
    prompt::PromptBuilder,
    store::SessionStore,
    submission::{ChatTurn, Subject, Submission, TargetLevel, TaskType},
};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing graded yet.
    Empty,
    /// A grading request is in flight.
    Grading,
    /// A report is active and no request is in flight.
    Graded,
    /// A follow-up question is in flight.
    Chatting,
}

/// Kind of request currently in flight.
#[derive(Debug, Clone, Copy)]
enum Pending {
    /// `submit` is waiting on the completion service.
    Grading,
    /// `ask` is waiting on the completion service.
    Chatting,
}

/// Store plus the kind of request holding it busy.
#[derive(Debug, Default)]
struct Inner {
    /// The session's committed state.
    store:   SessionStore,
    /// Set alongside the store's busy flag.
    pending: Option<Pending>,
}

/// Summary of the active submission for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionSummary {
    /// Subject graded against.
    pub subject:      Subject,
    /// Task type.
    pub task_type:    TaskType,
    /// Target level.
    pub target_level: TargetLevel,
    /// Submitted text.
    pub text:         String,
    /// File name of the attachment, if any.
    pub attachment:   Option<String>,
}

/// Read-only view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Session identifier.
    pub id:         Uuid,
    /// Lifecycle state.
    pub state:      SessionState,
    /// Whether a request is in flight.
    pub busy:       bool,
    /// The active submission.
    pub submission: Option<SubmissionSummary>,
    /// The active report.
    pub report:     Option<String>,
    /// The active scores.
    pub scores:     ScoreRecord,
    /// Whether `scores` came from a well-formed score line.
    pub scored:     bool,
    /// Follow-up conversation.
    pub transcript: Vec<ChatTurn>,
}

/// Claim on the store's busy flag for one request. Dropping it without
/// [`InFlight::finish`] (error return, cancelled future) releases the flag.
struct InFlight<'a> {
    /// The session state the claim is on.
    inner:      &'a Mutex<Inner>,
    /// Store generation when the request started.
    generation: u64,
    /// Set once released explicitly.
    finished:   bool,
}

impl InFlight<'_> {
    /// Whether the store still belongs to this request (no reset since).
    fn is_current(&self, inner: &Inner) -> bool {
        inner.store.generation() == self.generation
    }

    /// Releases the busy flag while the caller holds the lock.
    fn finish(mut self, inner: &mut Inner) {
        self.finished = true;
        release(inner, self.generation);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            release(&mut inner, self.generation);
        }
    }
}

/// Clears busy if the store is still on `generation`.
fn release(inner: &mut Inner, generation: u64) {
    if inner.store.generation() == generation && inner.store.is_busy() {
        inner.store.set_busy(false);
        inner.pending = None;
    }
}

/// One user's grading session: a submission, its report and scores, and the
/// tutoring conversation about them.
pub struct GradingSession<G> {
    /// Identifier used to look the session up between requests.
    id:      Uuid,
    /// The completion service.
    gateway: G,
    /// Request composer.
    prompts: PromptBuilder,
    /// Committed state.
    inner:   Mutex<Inner>,
}

impl<G: CompletionGateway> GradingSession<G> {
    /// Creates an empty session with a fresh identifier.
    pub fn new(gateway: G, prompts: PromptBuilder) -> Self {
        Self::with_id(Uuid::new_v4(), gateway, prompts)
    }

    /// Creates an empty session with a given identifier.
    pub fn with_id(id: Uuid, gateway: G, prompts: PromptBuilder) -> Self {
        Self {
            id,
            gateway,
            prompts,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Returns the session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Locks the session state. A panic while holding the lock cannot leave
    /// the store half-written, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the store busy for a new request. Caller holds the lock.
    fn begin(&self, inner: &mut Inner, pending: Pending) -> Result<InFlight<'_>, SessionError> {
        if inner.store.is_busy() {
            return Err(SessionError::Busy);
        }
        inner.store.set_busy(true);
        inner.pending = Some(pending);

        Ok(InFlight {
            inner:      &self.inner,
            generation: inner.store.generation(),
            finished:   false,
        })
    }

    /// Whether a grading or chat request is in flight.
    pub fn is_busy(&self) -> bool {
        self.lock().store.is_busy()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        state_of(&self.lock())
    }

    /// Grades `submission`, replacing any previous report, scores and
    /// transcript.
    ///
    /// On any error the session is left exactly as it was before the call.
    pub async fn submit(&self, submission: Submission) -> Result<Extraction, SessionError> {
        if submission.is_empty() {
            return Err(SessionError::Validation(
                "the submission has neither text nor an attachment".into(),
            ));
        }
        if let Some(attachment) = submission.attachment()
            && !attachment.is_supported()
        {
            return Err(SessionError::Validation(format!(
                "`{}` is {}; attach an image or a PDF",
                attachment.file_name(),
                attachment.mime_type()
            )));
        }

        let in_flight = self.begin(&mut self.lock(), Pending::Grading)?;

        let submission = Arc::new(submission);
        let grammar = ScoreGrammar::for_subject(submission.subject());
        let request = self.prompts.grading(&submission, grammar.as_ref());
        tracing::info!(
            session = %self.id,
            subject = %submission.subject(),
            task = %submission.task_type(),
            level = %submission.target_level(),
            "Grading submission"
        );

        let raw = self.gateway.complete(request).await.map_err(|err| {
            tracing::warn!(session = %self.id, "Grading failed: {err}");
            SessionError::from(err)
        })?;
        let extraction = extract(&raw, grammar.as_ref());

        let mut inner = self.lock();
        if !in_flight.is_current(&inner) {
            in_flight.finish(&mut inner);
            return Err(SessionError::Superseded);
        }
        inner
            .store
            .commit_grading(Arc::clone(&submission), extraction.clone())?;
        in_flight.finish(&mut inner);

        tracing::info!(
            session = %self.id,
            scored = extraction.ok,
            total = extraction.scores.total(),
            "Grading committed"
        );
        Ok(extraction)
    }

    /// Answers a follow-up question grounded in the active submission and
    /// report. Never changes the scores.
    pub async fn ask(&self, question: &str) -> Result<String, SessionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::Validation("the question is empty".into()));
        }

        let (in_flight, request) = {
            let mut inner = self.lock();
            if inner.store.is_busy() {
                return Err(SessionError::Busy);
            }
            let (Some(submission), Some(report)) = (inner.store.submission(), inner.store.report())
            else {
                return Err(SessionError::NoActiveReport);
            };
            let request =
                self.prompts
                    .chat(submission, report, inner.store.transcript(), question);
            (self.begin(&mut inner, Pending::Chatting)?, request)
        };
        tracing::info!(session = %self.id, "Answering follow-up question");

        let answer = self.gateway.complete(request).await.map_err(|err| {
            tracing::warn!(session = %self.id, "Follow-up failed: {err}");
            SessionError::from(err)
        })?;

        let mut inner = self.lock();
        if !in_flight.is_current(&inner) {
            in_flight.finish(&mut inner);
            return Err(SessionError::Superseded);
        }
        inner.store.append_chat(question, answer.clone())?;
        in_flight.finish(&mut inner);

        Ok(answer)
    }

    /// Discards the submission, report, scores and transcript. A request
    /// still in flight will find its result unwanted and drop it.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.store.reset();
        inner.pending = None;
        tracing::info!(session = %self.id, "Session reset");
    }

    /// Returns a read-only view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        let store = &inner.store;

        SessionSnapshot {
            id:         self.id,
            state:      state_of(&inner),
            busy:       store.is_busy(),
            submission: store.submission().map(|s| SubmissionSummary {
                subject:      s.subject(),
                task_type:    s.task_type(),
                target_level: s.target_level(),
                text:         s.text().to_string(),
                attachment:   s.attachment().map(|a| a.file_name().to_string()),
            }),
            report:     store.report().map(str::to_string),
            scores:     store.scores().clone(),
            scored:     store.scored(),
            transcript: store.transcript().to_vec(),
        }
    }
}

/// Derives the lifecycle state from the store and the pending request.
fn state_of(inner: &Inner) -> SessionState {
    match (inner.store.is_busy(), inner.pending, inner.store.report()) {
        (true, Some(Pending::Grading), _) => SessionState::Grading,
        (true, Some(Pending::Chatting), _) => SessionState::Chatting,
        (_, _, Some(_)) => SessionState::Graded,
        _ => SessionState::Empty,
    }
}
