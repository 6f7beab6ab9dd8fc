#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! HTTP front end: one [`GradingSession`] per client, addressed by id.
//!
//! | route                              | action                    |
//! |------------------------------------|---------------------------|
//! | `POST /api/sessions`               | create, returns `{ id }`  |
//! | `GET /api/sessions/{id}`           | snapshot                  |
//! | `POST /api/sessions/{id}/grade`    | grade a submission        |
//! | `POST /api/sessions/{id}/chat`     | ask a follow-up question  |
//! | `POST /api/sessions/{id}/reset`    | clear the session         |
//! | `DELETE /api/sessions/{id}`        | forget the session        |
//!
//! When an access code is configured every route requires it in the
//! `x-access-code` header.
//!
//! [`GradingSession`]: crate::session::GradingSession

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    constants::ACCESS_CODE_HEADER,
    error::{GatewayErrorKind, SessionError},
    gateway::CompletionGateway,
    registry::SessionRegistry,
    session::SessionSnapshot,
    submission::Submission,
};

/// Shared state handed to every handler.
pub struct AppState<G> {
    /// Live sessions.
    registry:    Arc<SessionRegistry<G>>,
    /// Code clients must present, if any.
    access_code: Option<Arc<str>>,
}

impl<G> Clone for AppState<G> {
    fn clone(&self) -> Self {
        Self {
            registry:    Arc::clone(&self.registry),
            access_code: self.access_code.clone(),
        }
    }
}

impl<G> AppState<G> {
    /// Creates handler state over `registry`.
    pub fn new(registry: SessionRegistry<G>, access_code: Option<String>) -> Self {
        Self {
            registry:    Arc::new(registry),
            access_code: access_code.map(Arc::from),
        }
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &SessionRegistry<G> {
        &self.registry
    }
}

impl<G: CompletionGateway + 'static> AppState<G> {
    /// Starts dropping sessions left unused for longer than `max_idle`.
    pub fn spawn_sweeper(&self, max_idle: Duration) -> JoinHandle<()> {
        self.registry.spawn_sweeper(max_idle)
    }
}

/// Everything a handler can fail with.
#[derive(Debug)]
pub enum ApiFailure {
    /// Missing or wrong access code.
    Unauthorized,
    /// No session with the requested id.
    UnknownSession(Uuid),
    /// The request body is not the JSON the route expects.
    InvalidBody {
        /// Status chosen by the JSON extractor.
        status:  StatusCode,
        /// What was wrong with the body.
        message: String,
    },
    /// The session rejected the action.
    Session(SessionError),
}

impl From<SessionError> for ApiFailure {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<JsonRejection> for ApiFailure {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody {
            status:  rejection.status(),
            message: rejection.body_text(),
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Human readable message.
    error: String,
    /// Stable machine-readable category.
    kind:  &'static str,
}

impl ApiFailure {
    /// HTTP status the failure is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UnknownSession(_) => StatusCode::NOT_FOUND,
            Self::InvalidBody { status, .. } => *status,
            Self::Session(err) => match err {
                SessionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                SessionError::Busy | SessionError::NoActiveReport | SessionError::Superseded => {
                    StatusCode::CONFLICT
                }
                SessionError::NotBusy => StatusCode::INTERNAL_SERVER_ERROR,
                SessionError::Gateway(gateway) => match gateway.kind {
                    GatewayErrorKind::Quota => StatusCode::TOO_MANY_REQUESTS,
                    GatewayErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    GatewayErrorKind::Auth
                    | GatewayErrorKind::Network
                    | GatewayErrorKind::Response => StatusCode::BAD_GATEWAY,
                },
            },
        }
    }

    /// Body of the error response.
    fn body(&self) -> ErrorBody {
        match self {
            Self::Unauthorized => ErrorBody {
                error: "Invalid access code.".into(),
                kind:  "unauthorized",
            },
            Self::UnknownSession(id) => ErrorBody {
                error: format!("No session with id {id}."),
                kind:  "unknown_session",
            },
            Self::InvalidBody { message, .. } => ErrorBody {
                error: message.clone(),
                kind:  "invalid_body",
            },
            Self::Session(err) => ErrorBody {
                error: err.to_string(),
                kind:  err.kind(),
            },
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("Request failed with {status}: {self:?}");
        }
        (status, Json(self.body())).into_response()
    }
}

/// Rejects the request unless it carries the configured access code.
fn authorize<G>(app: &AppState<G>, headers: &HeaderMap) -> Result<(), ApiFailure> {
    let Some(expected) = app.access_code.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(ACCESS_CODE_HEADER)
        .and_then(|value| value.to_str().ok());
    match presented {
        Some(presented) if codes_match(presented.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => Err(ApiFailure::Unauthorized),
    }
}

/// Byte equality that always walks the whole code.
fn codes_match(presented: &[u8], expected: &[u8]) -> bool {
    presented.len() == expected.len()
        && presented
            .iter()
            .zip(expected)
            .fold(0_u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

/// Body of `POST /api/sessions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Created {
    /// The new session's id.
    pub id: Uuid,
}

/// Body of `POST /api/sessions/{id}/chat`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The student's follow-up question.
    pub question: String,
}

/// POST /api/sessions
async fn create_session<G: CompletionGateway + 'static>(
    State(app): State<AppState<G>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Created>), ApiFailure> {
    authorize(&app, &headers)?;
    let session = app.registry.create();
    Ok((StatusCode::CREATED, Json(Created { id: session.id() })))
}

/// GET /api/sessions/{id}
async fn get_session<G: CompletionGateway + 'static>(
    State(app): State<AppState<G>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<SessionSnapshot>, ApiFailure> {
    authorize(&app, &headers)?;
    let session = app.registry.get(id).ok_or(ApiFailure::UnknownSession(id))?;
    Ok(Json(session.snapshot()))
}

/// POST /api/sessions/{id}/grade
///
/// Answers once grading is committed; a failure leaves any earlier report in
/// place.
async fn grade<G: CompletionGateway + 'static>(
    State(app): State<AppState<G>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    submission: Result<Json<Submission>, JsonRejection>,
) -> Result<Json<SessionSnapshot>, ApiFailure> {
    authorize(&app, &headers)?;
    let Json(submission) = submission?;
    let session = app.registry.get(id).ok_or(ApiFailure::UnknownSession(id))?;
    session.submit(submission).await?;
    Ok(Json(session.snapshot()))
}

/// POST /api/sessions/{id}/chat
async fn chat<G: CompletionGateway + 'static>(
    State(app): State<AppState<G>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<SessionSnapshot>, ApiFailure> {
    authorize(&app, &headers)?;
    let Json(body) = body?;
    let session = app.registry.get(id).ok_or(ApiFailure::UnknownSession(id))?;
    session.ask(&body.question).await?;
    Ok(Json(session.snapshot()))
}

/// POST /api/sessions/{id}/reset
async fn reset<G: CompletionGateway + 'static>(
    State(app): State<AppState<G>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<SessionSnapshot>, ApiFailure> {
    authorize(&app, &headers)?;
    let session = app.registry.get(id).ok_or(ApiFailure::UnknownSession(id))?;
    session.reset();
    Ok(Json(session.snapshot()))
}

/// DELETE /api/sessions/{id}
async fn delete_session<G: CompletionGateway + 'static>(
    State(app): State<AppState<G>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiFailure> {
    authorize(&app, &headers)?;
    if app.registry.remove(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiFailure::UnknownSession(id))
    }
}

/// Builds the API router.
pub fn build_router<G: CompletionGateway + 'static>(state: AppState<G>) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session::<G>))
        .route(
            "/api/sessions/{id}",
            get(get_session::<G>).delete(delete_session::<G>),
        )
        .route("/api/sessions/{id}/grade", post(grade::<G>))
        .route("/api/sessions/{id}/chat", post(chat::<G>))
        .route("/api/sessions/{id}/reset", post(reset::<G>))
        .with_state(state)
}

/// Binds `bind_addr`, serves `router` in the background, and returns the
/// address actually bound (useful with port 0).
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Could not bind {bind_addr}"))?;
    let addr = listener
        .local_addr()
        .context("Could not read bound address")?;

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            tracing::error!("Server stopped: {err}");
        }
    });

    Ok(addr)
}

/// Serves `router` on `bind_addr` until the process is stopped.
pub async fn serve(router: Router, bind_addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Could not bind {bind_addr}"))?;
    tracing::info!(
        "Listening on http://{}",
        listener.local_addr().context("Could not read bound address")?
    );
    axum::serve(listener, router)
        .await
        .context("HTTP server failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_codes_compare_whole_values() {
        assert!(codes_match(b"letmein", b"letmein"));
        assert!(!codes_match(b"letmeout", b"letmein"));
        assert!(!codes_match(b"letmei", b"letmein"));
        assert!(!codes_match(b"", b"letmein"));
        assert!(!codes_match(b"Letmein", b"letmein"));
    }
}
