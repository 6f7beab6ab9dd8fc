#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::time::Duration;

use anyhow::Result;
use async_openai::{
    Client as OpenAIClient,
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestMessageContentPartFile, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequest, FileObject, ImageUrlArgs, ReasoningEffort,
    },
};

use super::{CompletionGateway, GatewayRequest};
use crate::{
    config::{self, OpenAiEnv},
    error::{GatewayError, GatewayErrorKind},
    submission::Speaker,
};

/// Sends requests to an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct OpenAiGateway {
    /// API client bound to the configured endpoint and key.
    client:           OpenAIClient<OpenAIConfig>,
    /// Model identifier.
    model:            String,
    /// Optional temperature override.
    temperature:      Option<f32>,
    /// Optional top-p override.
    top_p:            Option<f32>,
    /// Optional reasoning effort hint.
    reasoning_effort: Option<ReasoningEffort>,
    /// Upper bound on a single call.
    timeout:          Duration,
}

impl OpenAiGateway {
    /// Creates a gateway for `env` with a per-call `timeout`.
    pub fn new(env: &OpenAiEnv, timeout: Duration) -> Self {
        let client = OpenAIClient::with_config(
            OpenAIConfig::new()
                .with_api_base(env.api_base())
                .with_api_key(env.api_key()),
        );

        Self {
            client,
            model: env.model().to_owned(),
            temperature: env.temperature(),
            top_p: env.top_p(),
            reasoning_effort: env.reasoning_effort(),
            timeout,
        }
    }

    /// Creates a gateway from the global configuration.
    pub fn from_config() -> Result<Self> {
        let openai = config::openai_config()?;
        let settings = config::settings()?;
        Ok(Self::new(&openai, settings.request_timeout()))
    }

    /// Returns the model identifier requests are sent to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Translates a gateway request into chat messages: instructions as the
    /// system message, history as alternating turns, then the payload with
    /// one part per attachment: images as `image_url`, PDFs as `file`.
    fn messages(
        &self,
        request: &GatewayRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.instructions.clone())
                .build()?
                .into(),
        ];

        for turn in &request.history {
            let message: ChatCompletionRequestMessage = match turn.speaker {
                Speaker::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.text.clone())
                    .build()?
                    .into(),
                Speaker::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.text.clone())
                    .build()?
                    .into(),
            };
            messages.push(message);
        }

        let user = if request.attachments.is_empty() {
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.content.clone())
                .build()?
        } else {
            let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(request.content.clone())
                    .build()?
                    .into(),
            ];
            for attachment in &request.attachments {
                let part: ChatCompletionRequestUserMessageContentPart = if attachment.is_image() {
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(ImageUrlArgs::default().url(attachment.data_url()).build()?)
                        .build()?
                        .into()
                } else {
                    ChatCompletionRequestUserMessageContentPart::File(
                        ChatCompletionRequestMessageContentPartFile {
                            // `FileObject` fields are private in the released crate;
                            // build the same value through its serde impl.
                            file: serde_json::from_value::<FileObject>(serde_json::json!({
                                "file_data": attachment.data_url(),
                                "filename": attachment.file_name(),
                            }))
                            .map_err(|e| OpenAIError::InvalidArgument(e.to_string()))?,
                        },
                    )
                };
                parts.push(part);
            }
            ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()?
        };
        messages.push(user.into());

        Ok(messages)
    }
}

/// Sorts a client error into a gateway error kind. Only transport failures,
/// rate limits and server-side errors come out transient.
fn classify(err: &OpenAIError) -> GatewayError {
    match err {
        OpenAIError::Reqwest(http) if http.is_timeout() => {
            GatewayError::new(GatewayErrorKind::Timeout, http.to_string())
        }
        OpenAIError::Reqwest(http) => match http.status() {
            Some(status) => GatewayError::from_status(status.as_u16(), http.to_string()),
            None if http.is_connect() || http.is_request() => {
                GatewayError::new(GatewayErrorKind::Network, http.to_string())
            }
            None => GatewayError::new(GatewayErrorKind::Response, http.to_string()),
        },
        OpenAIError::ApiError(api) => {
            GatewayError::from_api(api.r#type.as_deref(), api.code.as_deref(), api.message.clone())
        }
        other => GatewayError::new(GatewayErrorKind::Response, other.to_string()),
    }
}

impl CompletionGateway for OpenAiGateway {
    async fn complete(&self, request: GatewayRequest) -> Result<String, GatewayError> {
        let messages = self.messages(&request).map_err(|e| {
            GatewayError::new(GatewayErrorKind::Response, format!("could not build request: {e}"))
        })?;

        let chat = self.client.chat();
        let call = chat.create(CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            top_p: self.top_p,
            n: Some(1),
            stream: Some(false),
            reasoning_effort: self.reasoning_effort.clone(),
            ..Default::default()
        });

        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(classify(&err)),
            Err(_) => {
                return Err(GatewayError::new(
                    GatewayErrorKind::Timeout,
                    format!("no answer within {}s", self.timeout.as_secs()),
                ));
            }
        };

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                GatewayError::new(GatewayErrorKind::Response, "no content in completion response")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::Attachment;

    fn gateway() -> OpenAiGateway {
        OpenAiGateway::new(
            &OpenAiEnv::new("http://127.0.0.1:9/v1", "test-key", "test-model"),
            Duration::from_secs(1),
        )
    }

    fn user_parts(attachment: Attachment) -> Vec<serde_json::Value> {
        let request = GatewayRequest::builder()
            .instructions("Grade this.")
            .content("Essay text")
            .attachments(vec![attachment])
            .build();
        let messages = gateway().messages(&request).expect("messages build");
        let last = serde_json::to_value(messages.last().expect("user message")).unwrap();
        last["content"].as_array().expect("content parts").clone()
    }

    #[test]
    fn pdf_attachment_is_sent_as_a_file_part() {
        let parts = user_parts(
            Attachment::builder()
                .file_name("essay.pdf")
                .mime_type("application/pdf")
                .data(b"%PDF-1.4".to_vec())
                .build(),
        );

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "file");
        assert_eq!(parts[1]["file"]["filename"], "essay.pdf");
        assert!(
            parts[1]["file"]["file_data"]
                .as_str()
                .unwrap()
                .starts_with("data:application/pdf;base64,")
        );
    }

    #[test]
    fn image_attachment_is_sent_as_an_image_part() {
        let parts = user_parts(
            Attachment::builder()
                .file_name("page1.png")
                .mime_type("image/png")
                .data(vec![0x89, b'P', b'N', b'G'])
                .build(),
        );

        assert_eq!(parts[1]["type"], "image_url");
        assert!(
            parts[1]["image_url"]["url"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,")
        );
    }

    #[test]
    fn client_side_errors_are_not_transient() {
        let err = classify(&OpenAIError::InvalidArgument("bad request".into()));
        assert_eq!(err.kind, GatewayErrorKind::Response);
        assert!(!err.kind.is_transient());
    }
}
