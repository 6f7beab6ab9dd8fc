#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Splits a raw completion into its narrative report and the score record
//! carried on the trailing score line.
//!
//! Nothing in here returns an error: the model's output format is not
//! guaranteed, so anything that does not parse degrades to a zero record and
//! the untouched raw text.

use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::{
    constants::{MAX_AXIS_SCORE, SCORE_MARKER},
    grammar::{ScoreGrammar, score_line},
};

#[derive(Tabled, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// The score for one rubric axis.
pub struct AxisScore {
    #[tabled(rename = "Axis")]
    /// * `axis`: code used on the score line
    pub(crate) axis:  String,
    #[tabled(rename = "Dimension")]
    /// * `name`: human readable axis name
    pub(crate) name:  String,
    #[tabled(rename = "Score")]
    /// * `score`: value in `0..=7`
    pub(crate) score: u8,
}

impl AxisScore {
    /// Returns the score-line code of the axis.
    pub fn axis(&self) -> &str {
        &self.axis
    }

    /// Returns the axis display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the clamped score.
    pub fn score(&self) -> u8 {
        self.score
    }
}

/// Fixed-shape mapping from rubric axis to score, in score-line order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreRecord {
    /// Per-axis scores.
    scores: Vec<AxisScore>,
}

impl ScoreRecord {
    /// An all-zero record shaped by `grammar`; empty when there is no rubric.
    pub fn zeroed(grammar: Option<&ScoreGrammar>) -> Self {
        Self::from_values(grammar, std::iter::repeat(0))
    }

    /// Builds a record from raw values, clamping each into `0..=7`.
    fn from_values(grammar: Option<&ScoreGrammar>, values: impl IntoIterator<Item = i64>) -> Self {
        let Some(grammar) = grammar else {
            return Self::default();
        };

        let scores = grammar
            .axes()
            .iter()
            .zip(values)
            .map(|(axis, value)| AxisScore {
                axis:  axis.code().to_string(),
                name:  axis.name().to_string(),
                score: clamp_score(value),
            })
            .collect();

        Self { scores }
    }

    /// Looks up the score of an axis by its code, ignoring case.
    pub fn get(&self, axis: &str) -> Option<u8> {
        self.scores
            .iter()
            .find(|s| s.axis.eq_ignore_ascii_case(axis))
            .map(|s| s.score)
    }

    /// Iterates over the axis scores in order.
    pub fn iter(&self) -> impl Iterator<Item = &AxisScore> {
        self.scores.iter()
    }

    /// Returns the scores as a slice, eg. for rendering with `tabled`.
    pub fn as_slice(&self) -> &[AxisScore] {
        &self.scores
    }

    /// True when the record has no axes (subject without a rubric).
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Sum over all axes.
    pub fn total(&self) -> u32 {
        self.scores.iter().map(|s| u32::from(s.score)).sum()
    }
}

/// Result of splitting a completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    /// Narrative text without the score line.
    pub report: String,
    /// Parsed (or zeroed) scores.
    pub scores: ScoreRecord,
    /// Whether a well-formed score line was found.
    pub ok:     bool,
}

/// Clamps a raw value into the valid score range.
fn clamp_score(value: i64) -> u8 {
    // lossless: clamped into 0..=MAX_AXIS_SCORE first
    value.clamp(0, i64::from(MAX_AXIS_SCORE)) as u8
}

/// Finds the first case-insensitive `SCORES:` marker, allowing whitespace
/// (or a full-width colon) between keyword and colon. The keyword must not
/// be the tail of a longer word such as `Subscores`.
///
/// Returns the byte offset where the marker starts and the offset just past
/// its colon.
fn find_marker(raw: &str) -> Option<(usize, usize)> {
    let keyword = SCORE_MARKER.trim_end_matches(':').to_ascii_lowercase();
    // ASCII lowercasing keeps every byte offset valid for `raw`.
    let lowered = raw.to_ascii_lowercase();

    lowered.match_indices(&keyword).find_map(|(start, _)| {
        let joined = lowered[..start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        if joined {
            return None;
        }
        let after = raw[start + keyword.len()..].trim_start_matches([' ', '\t']);
        after
            .strip_prefix(':')
            .or_else(|| after.strip_prefix('\u{FF1A}'))
            .map(|rest| (start, raw.len() - rest.len()))
    })
}

/// Splits `raw` into report and score record.
///
/// With a grammar and a well-formed score line, the report is the text before
/// the marker, trimmed of whitespace and any markdown opening the marker and every value is clamped into `0..=7`. In every
/// other case the report is the whole of `raw`, the record is zeroed and `ok`
/// is false.
pub fn extract(raw: &str, grammar: Option<&ScoreGrammar>) -> Extraction {
    let degraded = |reason: &str| {
        if grammar.is_some() {
            tracing::warn!("Score line {reason}; keeping the full completion as the report.");
        }
        Extraction {
            report: raw.to_string(),
            scores: ScoreRecord::zeroed(grammar),
            ok:     false,
        }
    };

    let Some(grammar) = grammar else {
        return degraded("not expected for this subject");
    };

    let Some((start, body)) = find_marker(raw) else {
        return degraded("missing");
    };

    let line = raw[body..].lines().next().unwrap_or_default();
    let Ok(pairs) = score_line::pairs(line) else {
        return degraded("malformed");
    };
    let Some(values) = grammar.validate(&pairs) else {
        return degraded("does not match the rubric axes");
    };

    Extraction {
        report: raw[..start]
            .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '`' | '#'))
            .trim_start()
            .to_string(),
        scores: ScoreRecord::from_values(Some(grammar), values),
        ok:     true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_is_case_and_space_tolerant() {
        assert_eq!(find_marker("abc scores : C:1"), Some((4, 12)));
        assert_eq!(find_marker("SCORES:"), Some((0, 7)));
        assert_eq!(find_marker("scores are great"), None);
    }

    #[test]
    fn marker_must_start_a_word() {
        assert_eq!(find_marker("Subscores: fine"), None);
        assert_eq!(find_marker("Subscores: fine\nSCORES: C:1"), Some((16, 23)));
        assert_eq!(find_marker("**SCORES:** C:1"), Some((2, 9)));
    }

    #[test]
    fn marker_skips_keyword_without_colon() {
        let raw = "Your scores are below.\nScores: C:1, O:2, L:3";
        let (start, _) = find_marker(raw).unwrap();
        assert_eq!(&raw[start..start + 6], "Scores");
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp_score(-1), 0);
        assert_eq!(clamp_score(9), 7);
        assert_eq!(clamp_score(i64::MAX), 7);
        assert_eq!(clamp_score(4), 4);
    }
}
