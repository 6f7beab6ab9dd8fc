#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! State container for one user's grading session.

use std::sync::Arc;

use crate::{
    constants::CHAT_GREETING,
    error::SessionError,
    extract::{Extraction, ScoreRecord},
    submission::{ChatTurn, Submission},
};

/// Holds the active submission, its report and scores, and the follow-up
/// transcript grounded in that report.
///
/// The submission, report and scores are only ever replaced together by
/// [`SessionStore::commit_grading`], and doing so restarts the transcript, so
/// the transcript never refers to a stale report.
#[derive(Debug, Default)]
pub struct SessionStore {
    /// Submission the active report was produced for.
    submission: Option<Arc<Submission>>,
    /// Narrative report, score line removed.
    report:     Option<String>,
    /// Scores parsed from the report's score line.
    scores:     ScoreRecord,
    /// Whether the score line parsed; false means `scores` is the zero default.
    scored:     bool,
    /// Follow-up conversation about the active report.
    transcript: Vec<ChatTurn>,
    /// Set while a grading or chat request is in flight.
    busy:       bool,
    /// Bumped whenever a request starts or the store is reset, so a request
    /// that outlives a reset can tell its result is no longer wanted.
    generation: u64,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a request as started (`true`) or finished (`false`).
    pub fn set_busy(&mut self, busy: bool) {
        if busy {
            self.generation = self.generation.wrapping_add(1);
        }
        self.busy = busy;
    }

    /// Whether a request is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Identifies the current request epoch.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the active submission, report and scores in one step and
    /// restarts the transcript with the tutor's greeting.
    pub fn commit_grading(
        &mut self,
        submission: Arc<Submission>,
        extraction: Extraction,
    ) -> Result<(), SessionError> {
        if !self.busy {
            return Err(SessionError::NotBusy);
        }

        self.submission = Some(submission);
        self.report = Some(extraction.report);
        self.scores = extraction.scores;
        self.scored = extraction.ok;
        self.transcript = vec![ChatTurn::assistant(CHAT_GREETING)];
        Ok(())
    }

    /// Appends a question and its answer to the transcript.
    pub fn append_chat(
        &mut self,
        user_text: impl Into<String>,
        assistant_text: impl Into<String>,
    ) -> Result<(), SessionError> {
        if self.report.is_none() {
            return Err(SessionError::NoActiveReport);
        }
        if !self.busy {
            return Err(SessionError::NotBusy);
        }

        self.transcript.push(ChatTurn::user(user_text));
        self.transcript.push(ChatTurn::assistant(assistant_text));
        Ok(())
    }

    /// Discards everything, including any in-flight request's claim on the
    /// store.
    pub fn reset(&mut self) {
        let generation = self.generation.wrapping_add(1);
        *self = Self {
            generation,
            ..Self::default()
        };
    }

    /// Returns the active submission.
    pub fn submission(&self) -> Option<&Arc<Submission>> {
        self.submission.as_ref()
    }

    /// Returns the active report.
    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    /// Returns the active scores (all zero when nothing parsed).
    pub fn scores(&self) -> &ScoreRecord {
        &self.scores
    }

    /// Whether the active scores came from a well-formed score line.
    pub fn scored(&self) -> bool {
        self.scored
    }

    /// Returns the transcript.
    pub fn transcript(&self) -> &[ChatTurn] {
        &self.transcript
    }
}
