#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{fmt::Display, str::FromStr};

use bon::Builder;
use serde::{Deserialize, Serialize};

/// Exam subject a submission is graded against. The subject fixes the rubric
/// axes at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    /// English writing, scored on Content, Organisation and Language.
    #[default]
    English,
    /// Chinese writing, scored on Content, Expression and Structure.
    Chinese,
    /// Free-form exam-subject query with no numeric rubric.
    General,
}

impl Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Subject::English => "English writing",
            Subject::Chinese => "Chinese writing",
            Subject::General => "general exam subject",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Subject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "english" | "en" => Ok(Subject::English),
            "chinese" | "zh" => Ok(Subject::Chinese),
            "general" | "other" => Ok(Subject::General),
            other => Err(format!("unknown subject `{other}` (expected english, chinese or general)")),
        }
    }
}

/// Writing task the student attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    /// Short guided writing task.
    #[default]
    PartA,
    /// Extended writing task.
    PartB,
    /// Argumentative essay.
    Argumentative,
    /// Letter to the editor.
    LetterToEditor,
}

impl Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskType::PartA => "Part A",
            TaskType::PartB => "Part B",
            TaskType::Argumentative => "Argumentative",
            TaskType::LetterToEditor => "Letter to Editor",
        };
        write!(f, "{name}")
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_ascii_lowercase()
            .replace([' ', '_'], "-");
        match normalized.as_str() {
            "part-a" | "a" => Ok(TaskType::PartA),
            "part-b" | "b" => Ok(TaskType::PartB),
            "argumentative" => Ok(TaskType::Argumentative),
            "letter-to-editor" | "letter" => Ok(TaskType::LetterToEditor),
            other => Err(format!("unknown task type `{other}`")),
        }
    }
}

/// Exam level the student is aiming for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetLevel {
    /// Level 3.
    #[serde(rename = "3")]
    Three,
    /// Level 4.
    #[serde(rename = "4")]
    Four,
    /// Level 5.
    #[default]
    #[serde(rename = "5")]
    Five,
    /// Level 5*.
    #[serde(rename = "5*")]
    FiveStar,
    /// Level 5**, the top band.
    #[serde(rename = "5**")]
    FiveDoubleStar,
}

impl Display for TargetLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TargetLevel::Three => "3",
            TargetLevel::Four => "4",
            TargetLevel::Five => "5",
            TargetLevel::FiveStar => "5*",
            TargetLevel::FiveDoubleStar => "5**",
        };
        write!(f, "{name}")
    }
}

impl FromStr for TargetLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "3" => Ok(TargetLevel::Three),
            "4" => Ok(TargetLevel::Four),
            "5" => Ok(TargetLevel::Five),
            "5*" => Ok(TargetLevel::FiveStar),
            "5**" => Ok(TargetLevel::FiveDoubleStar),
            other => Err(format!("unknown target level `{other}` (expected 3, 4, 5, 5* or 5**)")),
        }
    }
}

/// Binary payload (image or document) supplied alongside a submission.
#[derive(Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct Attachment {
    /// Original file name, used only to refer to the attachment in prompts.
    file_name: String,
    /// MIME type forwarded to the completion service.
    mime_type: String,
    /// Raw bytes; base64 encoded when serialized.
    #[serde(with = "base64_bytes")]
    data:      Vec<u8>,
}

impl Attachment {
    /// Returns the original file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns the MIME type.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Returns the raw bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the attachment is an image.
    pub fn is_image(&self) -> bool {
        self.mime_type.to_ascii_lowercase().starts_with("image/")
    }

    /// Whether the completion service accepts this type: images and PDFs.
    pub fn is_supported(&self) -> bool {
        self.is_image() || self.mime_type.eq_ignore_ascii_case("application/pdf")
    }

    /// Renders the attachment as a `data:` URL.
    pub fn data_url(&self) -> String {
        use base64::Engine;
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// (De)serializes byte buffers as standard base64 strings.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// Encodes `bytes` as base64.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Decodes a base64 string into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.trim()).map_err(D::Error::custom)
    }
}

/// A student's work as handed in on a grading action. Never mutated after
/// construction; the next grading action supersedes it.
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct Submission {
    /// Pasted or extracted essay text.
    #[serde(default)]
    #[builder(default)]
    text:         String,
    /// Optional binary attachment.
    #[serde(default)]
    attachment:   Option<Attachment>,
    /// Task the essay answers.
    #[serde(default)]
    #[builder(default)]
    task_type:    TaskType,
    /// Level the student is aiming for.
    #[serde(default)]
    #[builder(default)]
    target_level: TargetLevel,
    /// Subject whose rubric applies.
    #[serde(default)]
    #[builder(default)]
    subject:      Subject,
}

impl Submission {
    /// Returns the submission text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the attachment, if one was supplied.
    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// Returns the task type.
    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Returns the target level.
    pub fn target_level(&self) -> TargetLevel {
        self.target_level
    }

    /// Returns the subject.
    pub fn subject(&self) -> Subject {
        self.subject
    }

    /// True when there is neither usable text nor a non-empty attachment.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachment.as_ref().is_none_or(|a| a.data.is_empty())
    }
}

/// Who said a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The student.
    User,
    /// The tutor model.
    Assistant,
}

/// One message of the follow-up conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Author of the turn.
    pub speaker: Speaker,
    /// Message text.
    pub text:    String,
}

impl ChatTurn {
    /// A turn written by the student.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text:    text.into(),
        }
    }

    /// A turn written by the tutor.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text:    text.into(),
        }
    }
}
