//! Nearest-neighbour matching of query embeddings against the gallery.

use crate::gallery::Gallery;
use crate::types::{Embedding, MatchLabel};

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub label: MatchLabel,
    /// Distance of the best candidate, matched or not. Infinite for an empty gallery.
    pub distance: f32,
}

/// Strategy for comparing a query embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn best_match(&self, query: &Embedding, gallery: &Gallery) -> MatchResult;
}

/// Euclidean-distance matcher with an inclusive threshold.
///
/// Per label the distance is the mean over that label's embeddings. The
/// smallest distance wins; on ties the earlier label in roster order is kept.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn best_match(&self, query: &Embedding, gallery: &Gallery) -> MatchResult {
        let mut best: Option<(&str, f32)> = None;

        for entry in gallery.entries() {
            if entry.embeddings.is_empty() {
                continue;
            }
            let distance = entry
                .embeddings
                .iter()
                .map(|e| query.euclidean_distance(e))
                .sum::<f32>()
                / entry.embeddings.len() as f32;

            // Strict comparison keeps the first candidate on ties.
            let improves = match best {
                None => true,
                Some((_, d)) => distance < d,
            };
            if improves {
                best = Some((entry.label.as_str(), distance));
            }
        }

        match best {
            Some((label, distance)) if distance <= self.threshold => MatchResult {
                label: MatchLabel::Known(label.to_string()),
                distance,
            },
            Some((_, distance)) => MatchResult {
                label: MatchLabel::Unknown,
                distance,
            },
            None => MatchResult {
                label: MatchLabel::Unknown,
                distance: f32::INFINITY,
            },
        }
    }
}
