//! Field-name matching strategies for drift suggestions.

use serde::Serialize;

/// How a suggestion's destination was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Equal after normalization.
    Exact,
    /// Within the edit-distance threshold.
    EditDistance,
    /// No candidate matched; destination derived from the source name.
    Derived,
}

/// A candidate chosen for a source field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMatch {
    pub candidate: String,
    pub kind: MatchKind,
    /// 1.0 for exact matches, `1 - relative distance` otherwise.
    pub confidence: f64,
}

/// Pure strategy mapping a new source field onto known destination fields.
pub trait FieldMatcher: Send + Sync {
    fn best_match(&self, field: &str, candidates: &[String]) -> Option<FieldMatch>;
}

/// Exact match after normalization, then Levenshtein within a relative bound.
#[derive(Debug, Clone, Copy)]
pub struct NormalizedEditDistanceMatcher {
    /// Largest accepted `distance / longer length`.
    pub max_relative_distance: f64,
}

impl Default for NormalizedEditDistanceMatcher {
    fn default() -> Self {
        Self {
            max_relative_distance: 0.34,
        }
    }
}

/// Lowercase alphanumerics only: `Start_Date`, `startDate` and `start-date` agree.
pub fn normalize_field_name(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl FieldMatcher for NormalizedEditDistanceMatcher {
    fn best_match(&self, field: &str, candidates: &[String]) -> Option<FieldMatch> {
        let needle = normalize_field_name(field);
        if needle.is_empty() {
            return None;
        }

        if let Some(exact) = candidates
            .iter()
            .find(|candidate| normalize_field_name(candidate) == needle)
        {
            return Some(FieldMatch {
                candidate: exact.clone(),
                kind: MatchKind::Exact,
                confidence: 1.0,
            });
        }

        let mut best: Option<(f64, &String)> = None;
        for candidate in candidates {
            let normalized = normalize_field_name(candidate);
            let longer = needle.chars().count().max(normalized.chars().count());
            if longer == 0 {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let relative = strsim::levenshtein(&needle, &normalized) as f64 / longer as f64;
            if relative <= self.max_relative_distance
                && best.map_or(true, |(current, _)| relative < current)
            {
                best = Some((relative, candidate));
            }
        }

        best.map(|(relative, candidate)| FieldMatch {
            candidate: candidate.clone(),
            kind: MatchKind::EditDistance,
            confidence: 1.0 - relative,
        })
    }
}
