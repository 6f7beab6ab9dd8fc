#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use itertools::Itertools;
use serde::Serialize;

/// Broad category of a completion-service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    /// Connection, DNS or transport failure.
    Network,
    /// Rate limit or exhausted quota.
    Quota,
    /// Missing, invalid or unauthorised credentials.
    Auth,
    /// The service did not answer in time.
    Timeout,
    /// The service answered, but without usable content.
    Response,
}

impl GatewayErrorKind {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Quota | Self::Timeout)
    }
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Quota => "quota",
            Self::Auth => "auth",
            Self::Timeout => "timeout",
            Self::Response => "response",
        };
        write!(f, "{name}")
    }
}

/// Failure reported by a completion gateway.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("completion service {kind} error: {message}")]
pub struct GatewayError {
    /// Category of the failure.
    pub kind:    GatewayErrorKind,
    /// Human readable detail from the service or transport.
    pub message: String,
}

impl GatewayError {
    /// Creates a gateway error.
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classifies a free-form error message (transport error text, API
    /// error body) into a kind. Anything unrecognised is a `Response` error,
    /// which is not retried.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = kind_from_text(&message.to_lowercase());
        Self { kind, message }
    }

    /// Classifies an error body returned by the service from its `type` and
    /// `code` fields, falling back to the message text.
    pub fn from_api(kind: Option<&str>, code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        let tags = [kind, code].into_iter().flatten().join(" ").to_lowercase();
        let kind = match kind_from_text(&tags) {
            GatewayErrorKind::Response if tags.contains("invalid_request") => {
                GatewayErrorKind::Response
            }
            GatewayErrorKind::Response => kind_from_text(&message.to_lowercase()),
            known => known,
        };
        Self { kind, message }
    }

    /// Classifies a failed HTTP exchange by status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => GatewayErrorKind::Auth,
            408 | 504 => GatewayErrorKind::Timeout,
            429 => GatewayErrorKind::Quota,
            500..=599 => GatewayErrorKind::Network,
            _ => GatewayErrorKind::Response,
        };
        Self::new(kind, message)
    }
}

/// Maps lowercased error text to a kind by keyword.
fn kind_from_text(lower: &str) -> GatewayErrorKind {
    if contains_any(lower, &["timed out", "timeout", "deadline"]) {
        GatewayErrorKind::Timeout
    } else if contains_any(lower, &[
        "429",
        "rate limit",
        "rate_limit",
        "insufficient_quota",
        "quota",
        "resource_exhausted",
    ]) {
        GatewayErrorKind::Quota
    } else if contains_any(lower, &[
        "401",
        "403",
        "unauthorized",
        "unauthenticated",
        "authentication",
        "permission",
        "invalid_api_key",
        "api key",
    ]) {
        GatewayErrorKind::Auth
    } else if contains_any(lower, &[
        "error sending request",
        "connection",
        "dns error",
        "server_error",
        "overloaded",
        "service unavailable",
        "bad gateway",
    ]) {
        GatewayErrorKind::Network
    } else {
        GatewayErrorKind::Response
    }
}

/// True when `haystack` contains any of `needles`.
fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Errors a grading session surfaces to its caller. Every variant leaves the
/// session's committed state exactly as it was.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The submission or question was empty.
    #[error("Nothing to send: {0}")]
    Validation(String),
    /// The completion service failed; the action can be retried.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Another grading or chat request is still in flight.
    #[error("A request for this session is already in progress.")]
    Busy,
    /// A follow-up question was asked before anything was graded.
    #[error("Nothing has been graded yet; submit an essay first.")]
    NoActiveReport,
    /// A store mutation was attempted without first marking the store busy.
    #[error("Session store mutated outside an in-flight request.")]
    NotBusy,
    /// The session was reset while the request was in flight; its result
    /// was discarded.
    #[error("The session was reset before the answer arrived.")]
    Superseded,
}

impl SessionError {
    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Gateway(_) => "gateway",
            Self::Busy => "busy",
            Self::NoActiveReport => "no_active_report",
            Self::NotBusy => "not_busy",
            Self::Superseded => "superseded",
        }
    }

    /// Whether the caller can simply try the same action again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway(_) | Self::Busy)
    }
}
