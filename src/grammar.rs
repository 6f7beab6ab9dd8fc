#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The score-line contract shared by the grading prompt and the extractor.
//!
//! The model is told to finish its answer with one line of the form
//! `SCORES: C:<int>, O:<int>, L:<int>`. The same literal text is embedded in
//! the prompt and recognised here, so the two sides cannot drift apart.

use itertools::Itertools;
use serde::Serialize;

use crate::{
    constants::{MAX_AXIS_SCORE, SCORE_MARKER},
    submission::Subject,
};

peg::parser! {
    /// Grammar for the part of a score line that follows the `SCORES:` marker.
    pub grammar score_line() for str {
        /// horizontal whitespace only; the score line never spans lines
        rule ws() = quiet!{[' ' | '\t']*}

        /// axis code, eg. `C` or `Content`
        rule axis() -> &'input str
            = $(['a'..='z' | 'A'..='Z'] ['a'..='z' | 'A'..='Z' | '_']*)

        /// signed decimal integer; overflowing values saturate
        rule value() -> i64
            = neg:"-"? ws() n:$(['0'..='9']+) {
                let magnitude = n.parse::<i64>().unwrap_or(i64::MAX);
                if neg.is_some() { -magnitude } else { magnitude }
            }

        /// ASCII or full-width colon
        rule colon() = ":" / "\u{FF1A}"

        /// ASCII or full-width comma
        rule comma() = "," / "\u{FF0C}"

        /// one `Axis:int` pair
        rule pair() -> (&'input str, i64)
            = ws() a:axis() ws() colon() ws() v:value() ws() { (a, v) }

        /// markdown emphasis or a full stop models like to leave behind
        rule trailer() = ['*' | '`' | '.']*

        /// parses every `Axis:int` pair on the line; emphasis closing a bold
        /// `**SCORES:**` marker may come first
        pub rule pairs() -> Vec<(&'input str, i64)>
            = ws() trailer() p:(pair() ++ comma()) comma()? ws() trailer() ws() "\r"? { p }
    }
}

/// One scored dimension of a rubric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Axis {
    /// Short code used on the score line.
    code: &'static str,
    /// Human readable name used in prompts and tables.
    name: &'static str,
}

impl Axis {
    /// Creates an axis.
    pub const fn new(code: &'static str, name: &'static str) -> Self {
        Self { code, name }
    }

    /// Returns the score-line code.
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the display name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Axes for English writing.
const ENGLISH_AXES: [Axis; 3] = [
    Axis::new("C", "Content"),
    Axis::new("O", "Organisation"),
    Axis::new("L", "Language"),
];

/// Axes for Chinese writing.
const CHINESE_AXES: [Axis; 3] = [
    Axis::new("C", "Content"),
    Axis::new("E", "Expression"),
    Axis::new("S", "Structure"),
];

/// The ordered axis set for one subject, together with the directive that
/// tells the model how to print it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreGrammar {
    /// Rubric axes in the order they appear on the score line.
    axes: Vec<Axis>,
}

impl ScoreGrammar {
    /// Creates a grammar over the given axes.
    pub fn new(axes: impl IntoIterator<Item = Axis>) -> Self {
        Self {
            axes: axes.into_iter().collect(),
        }
    }

    /// Returns the grammar for `subject`, or `None` when the subject has no
    /// numeric rubric.
    pub fn for_subject(subject: Subject) -> Option<Self> {
        match subject {
            Subject::English => Some(Self::new(ENGLISH_AXES)),
            Subject::Chinese => Some(Self::new(CHINESE_AXES)),
            Subject::General => None,
        }
    }

    /// Returns the axes in score-line order.
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// The score-line template, eg. `SCORES: C:<int>, O:<int>, L:<int>`.
    pub fn template(&self) -> String {
        format!(
            "{SCORE_MARKER} {}",
            self.axes
                .iter()
                .map(|axis| format!("{}:<int>", axis.code))
                .join(", ")
        )
    }

    /// The instruction appended to every grading prompt.
    pub fn directive(&self) -> String {
        let legend = self
            .axes
            .iter()
            .map(|axis| format!("{} = {}", axis.code, axis.name))
            .join(", ");
        format!(
            "End your answer with exactly one final line in the following format, replacing \
             each <int> with a whole number from 0 to {MAX_AXIS_SCORE} ({legend}). Do not add \
             anything after it.\n{}",
            self.template()
        )
    }

    /// Matches parsed `(axis, value)` pairs against the rubric.
    ///
    /// Returns the values in axis order, or `None` if an axis is missing,
    /// repeated, or unknown. Axis codes compare case-insensitively.
    pub fn validate(&self, pairs: &[(&str, i64)]) -> Option<Vec<i64>> {
        if pairs.len() != self.axes.len() {
            return None;
        }

        let mut values = vec![None; self.axes.len()];
        for (code, value) in pairs {
            let index = self
                .axes
                .iter()
                .position(|axis| axis.code.eq_ignore_ascii_case(code))?;
            if values[index].replace(*value).is_some() {
                return None;
            }
        }

        values.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_template_matches_wire_format() {
        let grammar = ScoreGrammar::for_subject(Subject::English).unwrap();
        assert_eq!(grammar.template(), "SCORES: C:<int>, O:<int>, L:<int>");
        assert!(grammar.directive().ends_with("SCORES: C:<int>, O:<int>, L:<int>"));
    }

    #[test]
    fn general_subject_has_no_grammar() {
        assert!(ScoreGrammar::for_subject(Subject::General).is_none());
    }

    #[test]
    fn pairs_tolerate_spacing_and_trailers() {
        let pairs = score_line::pairs(" c : 5 ,O:4,  L:6 **").expect("parse pairs");
        assert_eq!(pairs, vec![("c", 5), ("O", 4), ("L", 6)]);
    }

    #[test]
    fn pairs_may_follow_closing_emphasis() {
        let pairs = score_line::pairs("** C:5, O:4, L:6").expect("parse pairs");
        assert_eq!(pairs, vec![("C", 5), ("O", 4), ("L", 6)]);
        assert!(score_line::pairs("** and C:5, O:4, L:6").is_err());
    }

    #[test]
    fn pairs_accept_full_width_punctuation() {
        let pairs = score_line::pairs("C\u{FF1A}3\u{FF0C} O:4, L\u{FF1A}2").expect("parse pairs");
        assert_eq!(pairs, vec![("C", 3), ("O", 4), ("L", 2)]);
    }

    #[test]
    fn pairs_reject_prose_after_the_line() {
        assert!(score_line::pairs(" C:5, O:4, L:6 and well done").is_err());
        assert!(score_line::pairs(" C:five, O:4, L:6").is_err());
    }

    #[test]
    fn validate_reorders_and_rejects_bad_sets() {
        let grammar = ScoreGrammar::for_subject(Subject::English).unwrap();
        assert_eq!(grammar.validate(&[("L", 1), ("C", 2), ("o", 3)]), Some(vec![2, 3, 1]));
        assert_eq!(grammar.validate(&[("C", 1), ("C", 2), ("O", 3)]), None);
        assert_eq!(grammar.validate(&[("C", 1), ("O", 2)]), None);
        assert_eq!(grammar.validate(&[("C", 1), ("O", 2), ("X", 3)]), None);
    }

    #[test]
    fn overflowing_values_saturate() {
        let pairs = score_line::pairs("C:99999999999999999999999, O:-3, L:0").unwrap();
        assert_eq!(pairs[0].1, i64::MAX);
        assert_eq!(pairs[1].1, -3);
    }
}
