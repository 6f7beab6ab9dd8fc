use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::Notify;
use tutor::{
    constants::CHAT_GREETING,
    error::{GatewayError, GatewayErrorKind, SessionError},
    gateway::{CompletionGateway, GatewayRequest, RetryPolicy, RetryingGateway},
    prompt::PromptBuilder,
    session::{GradingSession, SessionState},
    submission::{Attachment, Speaker, Subject, Submission},
};

/// Replays canned answers in order and records every request it receives.
#[derive(Default)]
struct Scripted {
    replies:  Mutex<VecDeque<Result<String, GatewayError>>>,
    requests: Mutex<Vec<GatewayRequest>>,
}

impl Scripted {
    fn new(replies: impl IntoIterator<Item = Result<String, GatewayError>>) -> Arc<Self> {
        Arc::new(Self {
            replies:  Mutex::new(replies.into_iter().collect()),
            requests: Mutex::default(),
        })
    }

    fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl CompletionGateway for Scripted {
    async fn complete(&self, request: GatewayRequest) -> Result<String, GatewayError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::new(GatewayErrorKind::Response, "script exhausted")))
    }
}

/// Holds every request until released.
struct Gate {
    started: Arc<Notify>,
    release: Arc<Notify>,
    reply:   String,
}

impl Gate {
    fn new(reply: &str) -> (Self, Arc<Notify>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gate = Self {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
            reply:   reply.to_string(),
        };
        (gate, started, release)
    }
}

impl CompletionGateway for Gate {
    async fn complete(&self, _request: GatewayRequest) -> Result<String, GatewayError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(self.reply.clone())
    }
}

fn essay(text: &str) -> Submission {
    Submission::builder().text(text).build()
}

fn ok(text: &str) -> Result<String, GatewayError> {
    Ok(text.to_string())
}

#[tokio::test]
async fn regrading_replaces_report_scores_and_transcript() {
    let gateway = Scripted::new([
        ok("First report.\nSCORES: C:1, O:1, L:1"),
        ok("Because of the tense."),
        ok("Second report.\nSCORES: C:2, O:3, L:4"),
    ]);
    let session = GradingSession::new(Arc::clone(&gateway), PromptBuilder::default());

    session.submit(essay("Essay A")).await.expect("first grading");
    session.ask("Why did I lose marks?").await.expect("chat");
    assert_eq!(session.snapshot().transcript.len(), 3);

    session.submit(essay("Essay B")).await.expect("second grading");
    let snapshot = session.snapshot();

    assert_eq!(snapshot.state, SessionState::Graded);
    assert_eq!(snapshot.report.as_deref(), Some("Second report."));
    assert_eq!(snapshot.scores.get("C"), Some(2));
    assert_eq!(snapshot.scores.get("L"), Some(4));
    assert_eq!(snapshot.submission.map(|s| s.text), Some("Essay B".to_string()));
    assert_eq!(snapshot.transcript.len(), 1);
    assert_eq!(snapshot.transcript[0].speaker, Speaker::Assistant);
    assert_eq!(snapshot.transcript[0].text, CHAT_GREETING);
}

#[tokio::test]
async fn chat_never_rescores() {
    let gateway = Scripted::new([
        ok("Report.\nSCORES: C:3, O:3, L:3"),
        ok("If you fixed it you might get SCORES: C:7, O:7, L:7"),
    ]);
    let session = GradingSession::new(Arc::clone(&gateway), PromptBuilder::default());

    session.submit(essay("Essay")).await.expect("grading");
    let answer = session.ask("What would a 7 look like?").await.expect("chat");

    let snapshot = session.snapshot();
    assert_eq!(answer, "If you fixed it you might get SCORES: C:7, O:7, L:7");
    assert_eq!(snapshot.scores.total(), 9);
    assert_eq!(snapshot.report.as_deref(), Some("Report."));
    assert_eq!(snapshot.transcript.len(), 3);
    assert_eq!(snapshot.transcript[1].text, "What would a 7 look like?");
    assert_eq!(snapshot.transcript[2].text, answer);
}

#[tokio::test]
async fn requests_carry_the_directive_and_the_grounding() {
    let gateway = Scripted::new([ok("Report body.\nSCORES: C:4, O:4, L:4"), ok("Sure.")]);
    let session = GradingSession::new(Arc::clone(&gateway), PromptBuilder::default());

    session.submit(essay("My holiday essay")).await.expect("grading");
    session.ask("Explain the language score").await.expect("chat");

    let requests = gateway.requests();
    assert_eq!(requests.len(), 2);

    let grading = &requests[0];
    assert!(grading.content.starts_with("My holiday essay"));
    assert!(grading.content.trim_end().ends_with("SCORES: C:<int>, O:<int>, L:<int>"));
    assert!(grading.history.is_empty());

    let chat = &requests[1];
    assert!(chat.content.contains("My holiday essay"));
    assert!(chat.content.contains("Report body."));
    assert!(chat.content.contains("Explain the language score"));
    assert!(!chat.content.contains("SCORES: C:<int>"));
    assert_eq!(chat.history.len(), 1);
    assert_eq!(chat.history[0].text, CHAT_GREETING);
}

#[tokio::test]
async fn attachments_are_forwarded_with_text() {
    let gateway = Scripted::new([ok("Report.\nSCORES: C:1, O:2, L:3")]);
    let session = GradingSession::new(Arc::clone(&gateway), PromptBuilder::default());
    let attachment = Attachment::builder()
        .file_name("page1.jpg")
        .mime_type("image/jpeg")
        .data(vec![0xFF, 0xD8, 0xFF])
        .build();

    let submission = Submission::builder()
        .text("Typed draft")
        .attachment(attachment.clone())
        .build();
    session.submit(submission).await.expect("grading");

    let requests = gateway.requests();
    assert_eq!(requests[0].attachments, vec![attachment]);
    assert!(requests[0].content.contains("Typed draft"));
    assert!(requests[0].content.contains("page1.jpg"));
}

#[tokio::test]
async fn unsupported_attachment_type_is_rejected_before_any_call() {
    let gateway = Scripted::new([ok("unused")]);
    let session = GradingSession::new(Arc::clone(&gateway), PromptBuilder::default());
    let attachment = Attachment::builder()
        .file_name("essay.docx")
        .mime_type("application/octet-stream")
        .data(vec![0x50, 0x4B])
        .build();

    let err = session
        .submit(Submission::builder().attachment(attachment).build())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Validation(ref m) if m.contains("essay.docx")));
    assert_eq!(gateway.calls(), 0);
    assert_eq!(session.state(), SessionState::Empty);
}

#[tokio::test]
async fn gateway_failure_keeps_previous_grading() {
    let gateway = Scripted::new([
        ok("Kept report.\nSCORES: C:5, O:5, L:5"),
        Err(GatewayError::new(GatewayErrorKind::Quota, "429 rate limited")),
        Err(GatewayError::new(GatewayErrorKind::Network, "connection reset")),
    ]);
    let session = GradingSession::new(Arc::clone(&gateway), PromptBuilder::default());
    session.submit(essay("Essay")).await.expect("grading");

    let err = session.submit(essay("Another")).await.unwrap_err();
    assert!(matches!(&err, SessionError::Gateway(e) if e.kind == GatewayErrorKind::Quota));
    assert!(err.is_retryable());

    let err = session.ask("Question").await.unwrap_err();
    assert!(matches!(err, SessionError::Gateway(_)));

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Graded);
    assert!(!snapshot.busy);
    assert_eq!(snapshot.report.as_deref(), Some("Kept report."));
    assert_eq!(snapshot.scores.total(), 15);
    assert_eq!(snapshot.transcript.len(), 1);
}

#[tokio::test]
async fn failed_first_grading_returns_to_empty() {
    let gateway = Scripted::new([Err(GatewayError::new(GatewayErrorKind::Auth, "bad key"))]);
    let session = GradingSession::new(Arc::clone(&gateway), PromptBuilder::default());

    let err = session.submit(essay("Essay")).await.unwrap_err();
    assert_eq!(err.kind(), "gateway");
    assert_eq!(session.state(), SessionState::Empty);
    assert!(!session.snapshot().busy);
}

#[tokio::test]
async fn unparseable_answer_still_grades_with_zero_scores() {
    let gateway = Scripted::new([ok("A thoughtful report with no score line.")]);
    let session = GradingSession::new(Arc::clone(&gateway), PromptBuilder::default());

    let extraction = session.submit(essay("Essay")).await.expect("grading");
    assert!(!extraction.ok);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Graded);
    assert!(!snapshot.scored);
    assert_eq!(snapshot.report.as_deref(), Some("A thoughtful report with no score line."));
    assert_eq!(snapshot.scores.total(), 0);
    assert_eq!(snapshot.scores.iter().count(), 3);
}

#[tokio::test]
async fn general_subject_has_no_score_directive() {
    let gateway = Scripted::new([ok("Osmosis is the movement of water across a membrane.")]);
    let session = GradingSession::new(Arc::clone(&gateway), PromptBuilder::default());

    let submission = Submission::builder()
        .text("Explain osmosis")
        .subject(Subject::General)
        .build();
    let extraction = session.submit(submission).await.expect("answer");

    assert!(!extraction.ok);
    assert!(extraction.scores.is_empty());
    assert_eq!(extraction.report, "Osmosis is the movement of water across a membrane.");
    assert!(!gateway.requests()[0].content.contains("SCORES:"));
    assert_eq!(session.state(), SessionState::Graded);
}

#[tokio::test]
async fn empty_input_is_rejected_before_any_call() {
    let gateway = Scripted::new([]);
    let session = GradingSession::new(Arc::clone(&gateway), PromptBuilder::default());

    let err = session.submit(essay("   \n\t")).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));

    let err = session.ask("anything").await.unwrap_err();
    assert_eq!(err, SessionError::NoActiveReport);

    let err = session.ask("  ").await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));

    assert_eq!(gateway.calls(), 0);
    assert_eq!(session.state(), SessionState::Empty);
}

#[tokio::test]
async fn second_request_while_busy_is_rejected() {
    let (gate, started, release) = Gate::new("Report.\nSCORES: C:2, O:2, L:2");
    let session = Arc::new(GradingSession::new(gate, PromptBuilder::default()));

    let pending = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.submit(essay("Essay")).await }
    });
    started.notified().await;

    assert_eq!(session.state(), SessionState::Grading);
    assert!(session.snapshot().busy);
    assert_eq!(
        session.submit(essay("Other")).await.unwrap_err(),
        SessionError::Busy
    );
    assert_eq!(session.ask("Question").await.unwrap_err(), SessionError::Busy);

    release.notify_one();
    let extraction = pending.await.expect("task joins").expect("grading");
    assert!(extraction.ok);
    assert_eq!(session.state(), SessionState::Graded);
    assert!(!session.snapshot().busy);
}

#[tokio::test]
async fn cancelled_request_clears_busy() {
    let (gate, started, _release) = Gate::new("never delivered");
    let session = Arc::new(GradingSession::new(gate, PromptBuilder::default()));

    let pending = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.submit(essay("Essay")).await }
    });
    started.notified().await;
    assert!(session.snapshot().busy);

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    let snapshot = session.snapshot();
    assert!(!snapshot.busy);
    assert_eq!(snapshot.state, SessionState::Empty);
    assert!(snapshot.report.is_none());
}

#[tokio::test]
async fn reset_during_flight_discards_the_answer() {
    let (gate, started, release) = Gate::new("Late report.\nSCORES: C:6, O:6, L:6");
    let session = Arc::new(GradingSession::new(gate, PromptBuilder::default()));

    let pending = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.submit(essay("Essay")).await }
    });
    started.notified().await;

    session.reset();
    assert_eq!(session.state(), SessionState::Empty);

    release.notify_one();
    let err = pending.await.expect("task joins").unwrap_err();
    assert_eq!(err, SessionError::Superseded);

    let snapshot = session.snapshot();
    assert!(!snapshot.busy);
    assert!(snapshot.report.is_none());
    assert!(snapshot.transcript.is_empty());
}

#[tokio::test]
async fn reset_returns_to_empty() {
    let gateway = Scripted::new([ok("Report.\nSCORES: C:1, O:1, L:1")]);
    let session = GradingSession::new(Arc::clone(&gateway), PromptBuilder::default());
    session.submit(essay("Essay")).await.expect("grading");

    session.reset();
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Empty);
    assert!(snapshot.submission.is_none());
    assert!(snapshot.report.is_none());
    assert!(snapshot.scores.is_empty());
    assert!(snapshot.transcript.is_empty());
    assert_eq!(session.ask("Still there?").await.unwrap_err(), SessionError::NoActiveReport);
}

fn instant_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        multiplier: 1.0,
    }
}

fn request() -> GatewayRequest {
    GatewayRequest::builder()
        .instructions("system")
        .content("user")
        .build()
}

#[tokio::test]
async fn retry_recovers_from_transient_failures() {
    let inner = Scripted::new([
        Err(GatewayError::new(GatewayErrorKind::Network, "reset")),
        Err(GatewayError::new(GatewayErrorKind::Timeout, "slow")),
        ok("done"),
    ]);
    let gateway = RetryingGateway::new(Arc::clone(&inner), instant_retries(2));

    assert_eq!(gateway.complete(request()).await.expect("third try"), "done");
    assert_eq!(inner.calls(), 3);
}

#[tokio::test]
async fn retry_gives_up_after_budget() {
    let inner = Scripted::new([
        Err(GatewayError::new(GatewayErrorKind::Quota, "429")),
        Err(GatewayError::new(GatewayErrorKind::Quota, "429")),
        ok("too late"),
    ]);
    let gateway = RetryingGateway::new(Arc::clone(&inner), instant_retries(1));

    let err = gateway.complete(request()).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::Quota);
    assert_eq!(inner.calls(), 2);
}

#[tokio::test]
async fn retry_never_resends_a_rejected_request() {
    let inner = Scripted::new([
        Err(GatewayError::from_status(400, "invalid_request_error: Invalid MIME type")),
        ok("unreachable"),
    ]);
    let gateway = RetryingGateway::new(Arc::clone(&inner), instant_retries(2));

    let err = gateway.complete(request()).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::Response);
    assert_eq!(inner.calls(), 1);
}

#[tokio::test]
async fn retry_skips_permanent_failures() {
    let inner = Scripted::new([
        Err(GatewayError::new(GatewayErrorKind::Auth, "invalid api key")),
        ok("unreachable"),
    ]);
    let gateway = RetryingGateway::new(Arc::clone(&inner), instant_retries(3));

    let err = gateway.complete(request()).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::Auth);
    assert_eq!(inner.calls(), 1);
}
