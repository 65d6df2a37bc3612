//! Payee name matching for VoP responders.
//!
//! Compares a submitted payee name against the on-file account holder name
//! and produces a similarity score 0-100. Uses a combination of Levenshtein
//! and Jaro-Winkler similarity plus dedicated handling for abbreviated names
//! ("шевченко т.г." against "шевченко тарас григорович").

use serde::Serialize;
use strsim::{jaro_winkler, normalized_levenshtein};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchOutcome {
    Match,
    CloseMatch,
    NoMatch,
}

/// Result of comparing two names.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub outcome: MatchOutcome,
    /// Combined similarity score, 0-100.
    pub score: f64,
    /// Which algorithm produced the winning score.
    pub algorithm: &'static str,
    pub levenshtein_score: f64,
    pub jaro_winkler_score: f64,
}

pub struct NameMatcher {
    pub match_threshold: f64,
    pub close_match_threshold: f64,
}

impl Default for NameMatcher {
    fn default() -> Self {
        NameMatcher {
            match_threshold: 95.0,
            close_match_threshold: 75.0,
        }
    }
}

impl NameMatcher {
    pub fn new(match_threshold: f64, close_match_threshold: f64) -> Self {
        NameMatcher {
            match_threshold,
            close_match_threshold,
        }
    }

    /// Compare a submitted name against the on-file name.
    pub fn compare(&self, submitted: &str, on_file: &str) -> MatchResult {
        let norm1 = normalize_name(submitted);
        let norm2 = normalize_name(on_file);

        if has_initials(&norm1) || has_initials(&norm2) {
            if let Some(score) = match_with_initials(&norm1, &norm2) {
                return self.build_result(score, score, score, "initials");
            }
        }

        let lev_score = normalized_levenshtein(&norm1, &norm2) * 100.0;
        let jw_score = jaro_winkler(&norm1, &norm2) * 100.0;

        let (final_score, algorithm) = if lev_score >= jw_score {
            (lev_score, "levenshtein")
        } else {
            (jw_score, "jaro_winkler")
        };

        self.build_result(final_score, lev_score, jw_score, algorithm)
    }

    pub fn classify(&self, score: f64) -> MatchOutcome {
        if score >= self.match_threshold {
            MatchOutcome::Match
        } else if score >= self.close_match_threshold {
            MatchOutcome::CloseMatch
        } else {
            MatchOutcome::NoMatch
        }
    }

    fn build_result(
        &self,
        final_score: f64,
        lev_score: f64,
        jw_score: f64,
        algorithm: &'static str,
    ) -> MatchResult {
        MatchResult {
            outcome: self.classify(final_score),
            score: (final_score * 100.0).round() / 100.0,
            algorithm,
            levenshtein_score: (lev_score * 100.0).round() / 100.0,
            jaro_winkler_score: (jw_score * 100.0).round() / 100.0,
        }
    }
}

/// Normalize a name: lowercase, strip punctuation except dots (kept for
/// initials), collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let lowered: String = name
        .chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when a name contains at least one initial like "т." or "т.г.".
fn has_initials(name: &str) -> bool {
    let mut prev: Option<char> = None;
    let mut chars = name.chars().peekable();

    while let Some(c) = chars.next() {
        let at_boundary = prev.map_or(true, |p| !p.is_alphanumeric());
        if at_boundary && c.is_alphabetic() && chars.peek() == Some(&'.') {
            return true;
        }
        prev = Some(c);
    }

    false
}

/// Split a token like "т.г." into its individual initials.
fn split_initials(token: &str) -> Vec<String> {
    token
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}

/// Match a full name against an abbreviated form. Returns `None` when
/// neither side carries initials or the surnames clearly diverge, in which
/// case the caller falls back to plain similarity scoring.
fn match_with_initials(name1: &str, name2: &str) -> Option<f64> {
    let parts1: Vec<&str> = name1.split_whitespace().collect();
    let parts2: Vec<&str> = name2.split_whitespace().collect();

    if parts1.is_empty() || parts2.is_empty() {
        return None;
    }

    let (full, abbreviated) = if has_initials(name1) {
        (parts2, parts1)
    } else if has_initials(name2) {
        (parts1, parts2)
    } else {
        return None;
    };

    // The surname must agree, allowing for minor spelling variation.
    if full[0] != abbreviated[0] {
        let surname_score = normalized_levenshtein(full[0], abbreviated[0]) * 100.0;
        if surname_score < 90.0 {
            return None;
        }
    }

    let given_parts = &full[1..];
    let initial_tokens: Vec<String> = abbreviated[1..]
        .iter()
        .flat_map(|token| split_initials(token))
        .collect();

    if initial_tokens.is_empty() {
        // Only the surname was given on the abbreviated side.
        return Some(100.0);
    }

    let mut matches = 0usize;
    for (i, initial) in initial_tokens.iter().enumerate() {
        let Some(full_part) = given_parts.get(i) else {
            break;
        };

        if initial.chars().count() == 1 {
            if full_part.chars().next() == initial.chars().next() {
                matches += 1;
            }
        } else if full_part.starts_with(initial.as_str()) {
            // Partial given name, e.g. "тар" against "тарас".
            matches += 1;
        }
    }

    if matches == initial_tokens.len() {
        return Some(100.0);
    }

    Some((matches as f64 / initial_tokens.len() as f64) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_names_are_a_full_match() {
        let matcher = NameMatcher::default();
        let result = matcher.compare("ШЕВЧЕНКО ТАРАС ГРИГОРОВИЧ", "Шевченко Тарас Григорович");

        assert_eq!(result.outcome, MatchOutcome::Match);
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn initials_match_full_name() {
        let matcher = NameMatcher::default();
        let result = matcher.compare("Шевченко Т.Г.", "Шевченко Тарас Григорович");

        assert_eq!(result.outcome, MatchOutcome::Match);
        assert_eq!(result.score, 100.0);
        assert_eq!(result.algorithm, "initials");
    }

    #[test]
    fn surname_only_abbreviation_matches() {
        let matcher = NameMatcher::default();
        let result = matcher.compare("шевченко т.", "шевченко тарас");

        assert_eq!(result.outcome, MatchOutcome::Match);
    }

    #[test]
    fn wrong_initials_do_not_match() {
        let matcher = NameMatcher::default();
        let result = matcher.compare("Шевченко П.О.", "Шевченко Тарас Григорович");

        assert!(result.score < matcher.close_match_threshold);
    }

    #[test]
    fn same_surname_different_given_name_is_a_close_match() {
        let matcher = NameMatcher::default();
        // Jaro-Winkler rewards the shared surname prefix but the given
        // names diverge entirely, landing between the two thresholds.
        let result = matcher.compare("Шевченко Олена", "Шевченко Тарас");

        assert_eq!(result.outcome, MatchOutcome::CloseMatch);
        assert!(result.score >= matcher.close_match_threshold);
        assert!(result.score < matcher.match_threshold);
        assert_eq!(result.algorithm, "jaro_winkler");
    }

    #[test]
    fn unrelated_names_do_not_match() {
        let matcher = NameMatcher::default();
        let result = matcher.compare("Бондаренко Ольга", "Шевченко Тарас");

        assert_eq!(result.outcome, MatchOutcome::NoMatch);
    }

    #[test]
    fn classification_thresholds() {
        let matcher = NameMatcher::default();

        assert_eq!(matcher.classify(100.0), MatchOutcome::Match);
        assert_eq!(matcher.classify(95.0), MatchOutcome::Match);
        assert_eq!(matcher.classify(94.9), MatchOutcome::CloseMatch);
        assert_eq!(matcher.classify(75.0), MatchOutcome::CloseMatch);
        assert_eq!(matcher.classify(74.9), MatchOutcome::NoMatch);
    }

    #[test]
    fn normalization_strips_punctuation_and_collapses_spaces() {
        assert_eq!(
            normalize_name("  ТОВ \"Приклад,  Компанія\" "),
            "тов приклад компанія"
        );
    }

    #[test]
    fn scoring_is_deterministic() {
        let matcher = NameMatcher::default();
        let a = matcher.compare("Коваленко Олена", "Коваленко Олена Петрівна");
        let b = matcher.compare("Коваленко Олена", "Коваленко Олена Петрівна");
        assert_eq!(a.score, b.score);
    }
}
