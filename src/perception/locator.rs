//! Target selection from OCR detections

use std::cmp::Ordering;
use std::collections::HashMap;

use super::{OcrFrame, Target};
use crate::calibration::PixelPoint;
use crate::{Error, Result};

/// Shortest detection text accepted as a substring match
const MIN_SUBSTRING_LEN: usize = 3;

/// Target locator configuration
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Detections below this normalized confidence are ignored
    pub min_confidence: f64,
    /// Accept detections that contain, or are contained in, the expected label
    pub allow_substring: bool,
    /// Fold digits that OCR commonly confuses with letters (`0`→`o`, `1`→`l`, `5`→`s`)
    pub fold_digits: bool,
    /// Whole-word replacements applied after normalization
    pub aliases: HashMap<String, String>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            allow_substring: true,
            fold_digits: true,
            aliases: HashMap::new(),
        }
    }
}

/// How a detection matched the expected label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    Exact,
    Substring,
}

/// Selects the on-screen target for an expected label
///
/// Remembers the last successful target so that equally good candidates
/// resolve to the one nearest the previous selection, which keeps the
/// choice stable from frame to frame.
#[derive(Debug, Clone)]
pub struct TargetLocator {
    config: LocatorConfig,
    previous: Option<PixelPoint>,
}

struct Candidate<'a> {
    kind: MatchKind,
    confidence: f64,
    distance: f64,
    text: &'a str,
    index: usize,
}

impl TargetLocator {
    #[must_use]
    pub const fn new(config: LocatorConfig) -> Self {
        Self {
            config,
            previous: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Centre of the last successfully located target
    #[must_use]
    pub const fn previous(&self) -> Option<PixelPoint> {
        self.previous
    }

    /// Forget the previous target
    pub const fn reset_history(&mut self) {
        self.previous = None;
    }

    /// Pick the detection that best matches `expected`
    ///
    /// Exact matches win over substring matches; among equals the higher
    /// confidence wins, then proximity to the previous target.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no detection both matches and clears the
    /// confidence threshold
    pub fn locate(&mut self, frame: &OcrFrame, expected: &str) -> Result<Target> {
        let wanted = self.normalize(expected);
        if wanted.is_empty() {
            return Err(Error::NotFound("expected label is empty".into()));
        }

        let mut candidates: Vec<Candidate<'_>> = frame
            .detections
            .iter()
            .enumerate()
            .filter_map(|(index, detection)| {
                let confidence = detection.normalized_confidence();
                if confidence < self.config.min_confidence {
                    return None;
                }
                let text = self.normalize(&detection.text);
                let kind = self.match_kind(&text, &wanted)?;
                let distance = self
                    .previous
                    .map_or(0.0, |p| p.distance(&detection.bbox.center()));
                Some(Candidate {
                    kind,
                    confidence,
                    distance,
                    text: &detection.text,
                    index,
                })
            })
            .collect();

        candidates.sort_by(compare_candidates);

        let Some(best) = candidates.first() else {
            tracing::debug!(
                expected,
                detections = frame.detections.len(),
                "no matching detection"
            );
            return Err(Error::NotFound(format!(
                "no detection matching {expected:?} at confidence >= {:.2} ({} detections)",
                self.config.min_confidence,
                frame.detections.len()
            )));
        };

        let detection = &frame.detections[best.index];
        let target = Target {
            label: detection.text.clone(),
            bbox: detection.bbox,
            confidence: best.confidence,
            frame_timestamp: frame.timestamp,
        };

        tracing::debug!(
            label = best.text,
            kind = ?best.kind,
            confidence = best.confidence,
            candidates = candidates.len(),
            "target located"
        );

        self.previous = Some(target.center());
        Ok(target)
    }

    fn match_kind(&self, text: &str, wanted: &str) -> Option<MatchKind> {
        if text.is_empty() {
            return None;
        }
        if text == wanted {
            return Some(MatchKind::Exact);
        }
        if self.config.allow_substring
            && text.len() >= MIN_SUBSTRING_LEN
            && (text.contains(wanted) || wanted.contains(text))
        {
            return Some(MatchKind::Substring);
        }
        None
    }

    fn normalize(&self, text: &str) -> String {
        let normalized = normalize_label(text, self.config.fold_digits);
        self.config
            .aliases
            .get(&normalized)
            .cloned()
            .unwrap_or(normalized)
    }
}

fn compare_candidates(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    // Total order: only identical confidences fall through to distance
    a.kind
        .cmp(&b.kind)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.distance.total_cmp(&b.distance))
}

/// Lowercase, trim punctuation, collapse whitespace
///
/// With `fold_digits`, digits inside words that also contain letters are
/// mapped to the letters OCR most often mistakes them for.
#[must_use]
pub fn normalize_label(text: &str, fold_digits: bool) -> String {
    text.split_whitespace()
        .map(|word| {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if fold_digits && word.chars().any(char::is_alphabetic) {
                word.chars()
                    .map(|c| match c {
                        '0' => 'o',
                        '1' => 'l',
                        '5' => 's',
                        other => other,
                    })
                    .collect()
            } else {
                word
            }
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
