//! Utterance to intent interpretation
//!
//! Recognized speech is matched against a fixed phrase table. Matching is
//! graded rather than binary:
//!
//! | match                                             | confidence |
//! |---------------------------------------------------|------------|
//! | utterance equals a phrase                         | 1.0        |
//! | phrase appears on word boundaries                 | 0.9        |
//! | every phrase word within one edit (words ≥ 6 ch)  | 0.7        |
//! | nothing                                           | `Unknown`, 0.0 |
//!
//! When several keywords match equally well, the earlier keyword in the
//! table wins. The default table lists `Cancel` first so that "cancel
//! attendance" never starts a motion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::perception::normalize_label;

const EXACT: f64 = 1.0;
const CONTAINED: f64 = 0.9;
const FUZZY: f64 = 0.7;

/// Words shorter than this must match exactly in fuzzy mode
const FUZZY_MIN_WORD_LEN: usize = 6;

/// Commands the arm understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKeyword {
    MarkAttendance,
    Cancel,
    Home,
    Unknown,
}

impl std::fmt::Display for CommandKeyword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MarkAttendance => "MARK_ATTENDANCE",
            Self::Cancel => "CANCEL",
            Self::Home => "HOME",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// A recognized command, consumed once by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub keyword: CommandKeyword,
    /// In `[0, 1]`
    pub confidence: f64,
    /// Raw recognized text
    pub utterance: String,
    pub timestamp: DateTime<Utc>,
}

impl Intent {
    #[must_use]
    pub fn new(keyword: CommandKeyword, confidence: f64) -> Self {
        Self {
            keyword,
            confidence: confidence.clamp(0.0, 1.0),
            utterance: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// Time since the utterance was recognized
    #[must_use]
    pub fn age(&self) -> chrono::TimeDelta {
        Utc::now() - self.timestamp
    }
}

/// One line from the speech recognizer
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Utterance {
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Utterance {
    /// Parse a recognizer output line
    ///
    /// Accepts `[COMMAND] <text>` lines and JSON objects; anything else is
    /// recognizer chatter and yields `None`.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("[COMMAND]") {
            let text = rest.trim();
            return (!text.is_empty()).then(|| Self {
                text: text.to_string(),
                confidence: None,
                timestamp: None,
            });
        }
        if line.starts_with('{') {
            return serde_json::from_str::<Self>(line)
                .ok()
                .filter(|u| !u.text.trim().is_empty());
        }
        None
    }
}

/// Maps utterances to intents via a phrase table
#[derive(Debug, Clone)]
pub struct CommandInterpreter {
    table: Vec<(CommandKeyword, Vec<Vec<String>>)>,
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self::new(default_phrases())
    }
}

/// Built-in phrase table, highest priority first
#[must_use]
pub fn default_phrases() -> Vec<(CommandKeyword, Vec<String>)> {
    let table: [(CommandKeyword, &[&str]); 3] = [
        (CommandKeyword::Cancel, &["cancel", "stop", "abort", "never mind"]),
        (CommandKeyword::Home, &["home", "go home", "return home", "reset"]),
        (
            CommandKeyword::MarkAttendance,
            &["mark attendance", "mark my attendance", "attendance", "mark present"],
        ),
    ];
    table
        .into_iter()
        .map(|(keyword, phrases)| (keyword, phrases.iter().map(ToString::to_string).collect()))
        .collect()
}

impl CommandInterpreter {
    /// Build an interpreter from `(keyword, phrases)` rows, highest priority first
    #[must_use]
    pub fn new<S: AsRef<str>>(table: Vec<(CommandKeyword, Vec<S>)>) -> Self {
        let table = table
            .into_iter()
            .map(|(keyword, phrases)| {
                let phrases = phrases
                    .iter()
                    .map(|p| tokenize(p.as_ref()))
                    .filter(|words| !words.is_empty())
                    .collect();
                (keyword, phrases)
            })
            .collect();
        Self { table }
    }

    /// Interpret an utterance; never fails
    #[must_use]
    pub fn interpret(&self, text: &str) -> Intent {
        self.interpret_utterance(&Utterance {
            text: text.to_string(),
            confidence: None,
            timestamp: None,
        })
    }

    /// Interpret a recognizer line, scaling by its own confidence if present
    #[must_use]
    pub fn interpret_utterance(&self, utterance: &Utterance) -> Intent {
        let words = tokenize(&utterance.text);

        let mut best = (CommandKeyword::Unknown, 0.0);
        for (keyword, phrases) in &self.table {
            let score = phrases
                .iter()
                .map(|phrase| score_phrase(&words, phrase))
                .fold(0.0, f64::max);
            if score > best.1 {
                best = (*keyword, score);
            }
        }

        let recognizer = utterance.confidence.map_or(1.0, |c| c.clamp(0.0, 1.0));
        let (keyword, confidence) = best;

        tracing::debug!(
            utterance = %utterance.text,
            %keyword,
            confidence = confidence * recognizer,
            "interpreted utterance"
        );

        Intent {
            keyword,
            confidence: confidence * recognizer,
            utterance: utterance.text.clone(),
            timestamp: utterance.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    normalize_label(text, false)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn score_phrase(words: &[String], phrase: &[String]) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    if words == phrase {
        return EXACT;
    }
    if words.windows(phrase.len()).any(|w| w == phrase) {
        return CONTAINED;
    }
    let fuzzy = phrase.iter().all(|p| {
        words.iter().any(|w| {
            if p.chars().count() < FUZZY_MIN_WORD_LEN {
                w == p
            } else {
                edit_distance(w, p) <= 1
            }
        })
    });
    if fuzzy { FUZZY } else { 0.0 }
}

/// Levenshtein distance over chars
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("attendance", "attendance"), 0);
        assert_eq!(edit_distance("atendance", "attendance"), 1);
        assert_eq!(edit_distance("home", "hose"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
    }

    #[test]
    fn test_exact_match() {
        let intent = CommandInterpreter::default().interpret("  Mark Attendance ");
        assert_eq!(intent.keyword, CommandKeyword::MarkAttendance);
        assert!((intent.confidence - EXACT).abs() < f64::EPSILON);
    }

    #[test]
    fn test_contained_match() {
        let intent = CommandInterpreter::default().interpret("please go home now");
        assert_eq!(intent.keyword, CommandKeyword::Home);
        assert!((intent.confidence - CONTAINED).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fuzzy_match() {
        let intent = CommandInterpreter::default().interpret("mark atendance");
        assert_eq!(intent.keyword, CommandKeyword::MarkAttendance);
        assert!((intent.confidence - FUZZY).abs() < f64::EPSILON);
    }

    #[test]
    fn test_short_words_never_fuzzy() {
        let interpreter = CommandInterpreter::default();
        for word in ["some", "come", "hope", "shop", "hose", "reser"] {
            let intent = interpreter.interpret(word);
            assert_eq!(intent.keyword, CommandKeyword::Unknown, "{word:?}");
        }
    }

    #[test]
    fn test_cancel_has_priority() {
        let intent = CommandInterpreter::default().interpret("cancel attendance");
        assert_eq!(intent.keyword, CommandKeyword::Cancel);
    }

    #[test]
    fn test_unknown_on_noise() {
        let intent = CommandInterpreter::default().interpret("what a lovely day");
        assert_eq!(intent.keyword, CommandKeyword::Unknown);
        assert!(intent.confidence.abs() < f64::EPSILON);

        let intent = CommandInterpreter::default().interpret("");
        assert_eq!(intent.keyword, CommandKeyword::Unknown);
    }

    #[test]
    fn test_recognizer_confidence_scales() {
        let utterance = Utterance::parse_line(r#"{"text": "attendance", "confidence": 0.5}"#).unwrap();
        let intent = CommandInterpreter::default().interpret_utterance(&utterance);
        assert_eq!(intent.keyword, CommandKeyword::MarkAttendance);
        assert!((intent.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_parse_command_line() {
        let utterance = Utterance::parse_line("[COMMAND] go home").unwrap();
        assert_eq!(utterance.text, "go home");
        assert!(Utterance::parse_line("[VOICE] Listening: 'go'").is_none());
        assert!(Utterance::parse_line("[COMMAND]   ").is_none());
    }
}
