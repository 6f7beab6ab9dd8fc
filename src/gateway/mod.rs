#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The boundary to the hosted completion service.

/// OpenAI-compatible chat-completions gateway.
pub mod openai;
/// Bounded exponential backoff around any gateway.
pub mod retry;

use std::{future::Future, sync::Arc};

use bon::Builder;

pub use openai::OpenAiGateway;
pub use retry::{RetryPolicy, RetryingGateway};

use crate::{
    error::GatewayError,
    submission::{Attachment, ChatTurn},
};

/// Everything the completion service is sent for one grading or chat turn.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct GatewayRequest {
    /// System-level instructions (persona, rubric, output contract).
    pub instructions: String,
    /// User payload: the submission, or the grounded chat context.
    pub content:      String,
    /// Binary parts forwarded opaquely, eg. a photographed essay.
    #[builder(default)]
    pub attachments:  Vec<Attachment>,
    /// Prior conversation replayed before `content`.
    #[builder(default)]
    pub history:      Vec<ChatTurn>,
}

/// An opaque request/response completion endpoint.
pub trait CompletionGateway: Send + Sync {
    /// Sends `request` and returns the model's full text answer.
    fn complete(
        &self,
        request: GatewayRequest,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send;
}

impl<G: CompletionGateway> CompletionGateway for Arc<G> {
    fn complete(
        &self,
        request: GatewayRequest,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send {
        (**self).complete(request)
    }
}
