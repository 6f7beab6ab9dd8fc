#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Composes the requests sent to the completion service.

use std::borrow::Cow;

use bon::Builder;

use crate::{
    config::TutorSettings,
    constants::{CHAT_HISTORY_TURNS, PROMPT_TRUNCATE},
    gateway::GatewayRequest,
    grammar::ScoreGrammar,
    submission::{ChatTurn, Subject, Submission},
};

/// Builds grading and grounded-chat requests.
///
/// A submission with both text and an attachment sends both: the text in the
/// payload and the attachment as a binary part, with the payload naming the
/// attachment so the model reads them together.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct PromptBuilder {
    /// Language reports and answers are written in.
    #[builder(default = "Traditional Chinese".to_string())]
    report_language:    String,
    /// Characters of submission text kept before truncating.
    #[builder(default = PROMPT_TRUNCATE)]
    prompt_truncate:    usize,
    /// Most recent transcript turns replayed in chat requests.
    #[builder(default = CHAT_HISTORY_TURNS)]
    chat_history_turns: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PromptBuilder {
    /// Creates a builder from configured settings.
    pub fn from_settings(settings: &TutorSettings) -> Self {
        Self::builder()
            .report_language(settings.report_language())
            .prompt_truncate(settings.prompt_truncate())
            .chat_history_turns(settings.chat_history_turns())
            .build()
    }

    /// Request for a first grading of `submission`.
    ///
    /// The instructions carry the persona, rubric and required report
    /// sections; the content carries the submission followed by the score
    /// directive, which the model must echo as its final line. Without a
    /// grammar there is no directive.
    pub fn grading(
        &self,
        submission: &Submission,
        grammar: Option<&ScoreGrammar>,
    ) -> GatewayRequest {
        let instructions = match submission.subject() {
            Subject::General => format!(
                include_str!("prompts/general_system.md"),
                target_level = submission.target_level(),
                language = self.report_language,
            ),
            subject => format!(
                include_str!("prompts/grading_system.md"),
                subject = subject,
                task_type = submission.task_type(),
                target_level = submission.target_level(),
                rubric = rubric(subject).trim_end(),
                language = self.report_language,
            ),
        };

        let mut content = self.submission_payload(submission);
        if let Some(grammar) = grammar {
            content.push_str("\n\n---\n\n");
            content.push_str(&grammar.directive());
        }

        GatewayRequest::builder()
            .instructions(instructions)
            .content(content)
            .attachments(submission.attachment().into_iter().cloned().collect())
            .build()
    }

    /// Request for a follow-up question grounded in the submission and the
    /// current report. Never carries a score directive.
    pub fn chat(
        &self,
        submission: &Submission,
        report: &str,
        transcript: &[ChatTurn],
        question: &str,
    ) -> GatewayRequest {
        let instructions = format!(
            include_str!("prompts/chat_system.md"),
            subject = submission.subject(),
            language = self.report_language,
        );
        let content = format!(
            include_str!("prompts/chat_context.md"),
            submission = self.submission_payload(submission),
            report = report.trim(),
            question = question.trim(),
        );

        let skip = transcript.len().saturating_sub(self.chat_history_turns);
        GatewayRequest::builder()
            .instructions(instructions)
            .content(content)
            .attachments(submission.attachment().into_iter().cloned().collect())
            .history(transcript[skip..].to_vec())
            .build()
    }

    /// The submission text (truncated if needed) plus a note naming the
    /// attachment, if any.
    fn submission_payload(&self, submission: &Submission) -> String {
        let text = truncate_chars(submission.text().trim(), self.prompt_truncate);
        match (text.is_empty(), submission.attachment()) {
            (false, None) => text.into_owned(),
            (true, Some(attachment)) => format!(
                "The student's work is in the attached file `{}`.",
                attachment.file_name()
            ),
            (false, Some(attachment)) => format!(
                "{text}\n\n(The student also attached `{}`; treat it as part of the same \
                 submission.)",
                attachment.file_name()
            ),
            (true, None) => String::new(),
        }
    }
}

/// Marking-scheme description for a subject with a numeric rubric.
fn rubric(subject: Subject) -> &'static str {
    match subject {
        Subject::Chinese => include_str!("prompts/rubrics/chinese.md"),
        Subject::English | Subject::General => include_str!("prompts/rubrics/english.md"),
    }
}

/// Keeps the first `max` characters of `text`, noting how much was cut.
fn truncate_chars(text: &str, max: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max) {
        None => Cow::Borrowed(text),
        Some((cut, _)) => {
            let dropped = text[cut..].chars().count();
            Cow::Owned(format!("{}\n\n[... {dropped} more characters truncated]", &text[..cut]))
        }
    }
}
