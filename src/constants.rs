#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Literal marker that opens the machine-parseable score line.
pub const SCORE_MARKER: &str = "SCORES:";

/// Highest score any rubric axis can carry.
pub const MAX_AXIS_SCORE: u8 = 7;

/// Default number of characters of submission text sent to the model.
pub const PROMPT_TRUNCATE: usize = 60_000;

/// Default number of transcript turns replayed as prior conversation in a
/// grounded chat request.
pub const CHAT_HISTORY_TURNS: usize = 10;

/// Assistant turn that opens every freshly graded transcript.
pub const CHAT_GREETING: &str = "Here is your grading report. If anything is unclear, such as a \
                                 grammar point or how a word is used, ask me about it below!";

/// Header carrying the access code checked by the HTTP server.
pub const ACCESS_CODE_HEADER: &str = "x-access-code";
