//! Language codes and the adaptive recognition-language preference

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque language tag (e.g. `th-TH` for recognition, `en` for synthesis)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageCode(String);

impl LanguageCode {
    /// Create a language code from any tag
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Tag as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary subtag, lowercased (`th-TH` → `th`)
    #[must_use]
    pub fn primary(&self) -> String {
        self.0
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    /// Whether two tags share the same primary subtag
    #[must_use]
    pub fn same_language(&self, other: &Self) -> bool {
        self.primary() == other.primary()
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LanguageCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Per-language recognition success history for one recognizer session
///
/// Initialized empty; only [`LanguagePreference::record_success`] mutates it.
#[derive(Debug, Clone)]
pub struct LanguagePreference {
    candidates: Vec<LanguageCode>,
    success_counts: HashMap<LanguageCode, u64>,
    last_success: Option<LanguageCode>,
}

impl LanguagePreference {
    /// Create a tracker over a fixed candidate list
    #[must_use]
    pub fn new(candidates: Vec<LanguageCode>) -> Self {
        Self {
            candidates,
            success_counts: HashMap::new(),
            last_success: None,
        }
    }

    /// Candidate languages in their configured order
    #[must_use]
    pub fn candidates(&self) -> &[LanguageCode] {
        &self.candidates
    }

    /// Successful recognitions recorded for `code`
    #[must_use]
    pub fn success_count(&self, code: &LanguageCode) -> u64 {
        self.success_counts.get(code).copied().unwrap_or(0)
    }

    /// Most recently successful language
    #[must_use]
    pub const fn last_success(&self) -> Option<&LanguageCode> {
        self.last_success.as_ref()
    }

    /// Record a successful recognition in `code`
    pub fn record_success(&mut self, code: &LanguageCode) {
        *self.success_counts.entry(code.clone()).or_insert(0) += 1;
        self.last_success = Some(code.clone());
        tracing::debug!(
            language = %code,
            count = self.success_count(code),
            "recognition language preference updated"
        );
    }

    /// Languages in the order they should be tried for the next utterance
    #[must_use]
    pub fn ordered(&self) -> Vec<LanguageCode> {
        order(
            &self.candidates,
            self.last_success.as_ref(),
            &self.success_counts,
        )
    }
}

/// Order candidate languages for a recognition attempt
///
/// The last successful language always comes first, whatever its count.
/// The rest follow by descending success count; ties keep candidate order.
/// A `last_success` that is not a candidate is still tried first.
#[must_use]
pub fn order(
    candidates: &[LanguageCode],
    last_success: Option<&LanguageCode>,
    success_counts: &HashMap<LanguageCode, u64>,
) -> Vec<LanguageCode> {
    let mut rest: Vec<LanguageCode> = candidates
        .iter()
        .filter(|code| Some(*code) != last_success)
        .cloned()
        .collect();

    // sort_by_key is stable
    rest.sort_by_key(|code| std::cmp::Reverse(success_counts.get(code).copied().unwrap_or(0)));

    let mut ordered = Vec::with_capacity(rest.len() + 1);
    if let Some(last) = last_success {
        ordered.push(last.clone());
    }
    ordered.extend(rest);
    ordered
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn codes(tags: &[&str]) -> Vec<LanguageCode> {
        tags.iter().map(|t| LanguageCode::from(*t)).collect()
    }

    #[test]
    fn test_initial_order_is_candidate_order() {
        let pref = LanguagePreference::new(codes(&["th-TH", "en-US"]));
        assert_eq!(pref.ordered(), codes(&["th-TH", "en-US"]));
    }

    #[test]
    fn test_last_success_moves_to_front() {
        let mut pref = LanguagePreference::new(codes(&["th-TH", "en-US"]));
        pref.record_success(&LanguageCode::from("en-US"));
        assert_eq!(pref.ordered(), codes(&["en-US", "th-TH"]));
    }

    #[test]
    fn test_last_success_beats_higher_count() {
        let mut pref = LanguagePreference::new(codes(&["th-TH", "en-US", "ja-JP"]));
        for _ in 0..5 {
            pref.record_success(&LanguageCode::from("th-TH"));
        }
        pref.record_success(&LanguageCode::from("ja-JP"));

        assert_eq!(pref.ordered(), codes(&["ja-JP", "th-TH", "en-US"]));
        assert_eq!(pref.success_count(&LanguageCode::from("th-TH")), 5);
        assert_eq!(pref.success_count(&LanguageCode::from("ja-JP")), 1);
    }

    #[test]
    fn test_remainder_sorted_by_count_with_stable_ties() {
        let candidates = codes(&["a", "b", "c", "d"]);
        let counts: HashMap<LanguageCode, u64> =
            [(LanguageCode::from("c"), 3), (LanguageCode::from("d"), 3)]
                .into_iter()
                .collect();

        let ordered = order(&candidates, Some(&LanguageCode::from("b")), &counts);
        assert_eq!(ordered, codes(&["b", "c", "d", "a"]));
    }

    #[test]
    fn test_every_candidate_appears_once() {
        let candidates = codes(&["a", "b", "c"]);
        let ordered = order(&candidates, Some(&LanguageCode::from("c")), &HashMap::new());
        assert_eq!(ordered.len(), 3);
        for code in &candidates {
            assert_eq!(ordered.iter().filter(|c| *c == code).count(), 1);
        }
    }

    #[test]
    fn test_last_success_always_first_for_random_counts() {
        let mut rng = StdRng::seed_from_u64(0x6c6f_6f6b);
        let candidates = codes(&["th-TH", "en-US", "ja-JP", "fr-FR", "de-DE"]);

        for _ in 0..500 {
            let counts: HashMap<LanguageCode, u64> = candidates
                .iter()
                .map(|c| (c.clone(), rng.gen_range(0..50)))
                .collect();
            let last = &candidates[rng.gen_range(0..candidates.len())];

            let ordered = order(&candidates, Some(last), &counts);

            assert_eq!(&ordered[0], last);
            assert_eq!(ordered.len(), candidates.len());
            for pair in ordered[1..].windows(2) {
                assert!(counts[&pair[0]] >= counts[&pair[1]]);
            }
        }
    }

    #[test]
    fn test_primary_subtag() {
        assert_eq!(LanguageCode::from("th-TH").primary(), "th");
        assert_eq!(LanguageCode::from("EN_us").primary(), "en");
        assert!(LanguageCode::from("en-US").same_language(&LanguageCode::from("en")));
        assert!(!LanguageCode::from("en-US").same_language(&LanguageCode::from("th")));
    }
}
