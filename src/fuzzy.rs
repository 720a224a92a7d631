//! Lexical similarity scoring in the fuzzywuzzy family.
//!
//! All ratios are integers in `0..=100`. `ratio` is the normalized indel
//! similarity `2 * LCS / (len_a + len_b)` over characters; the partial and
//! token-set variants build on it.

use std::collections::{BTreeSet, HashSet};

/// Minimum score for a chunk to count as a fuzzy match.
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 70;

/// Minimum ratio for a filename term to be offered as a correction.
pub const SUGGESTION_THRESHOLD: u8 = 70;

/// Characters that separate terms in filenames.
const FILENAME_SEPARATORS: [char; 4] = [' ', '_', '-', '.'];

/// Scores query/content pairs and extracts spelling suggestions.
#[derive(Debug, Clone, Copy)]
pub struct FuzzyMatcher {
    threshold: u8,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FUZZY_THRESHOLD)
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold: threshold.min(100),
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Best of the whole-query partial ratio, the token-set ratio and the
    /// best single-word partial ratio, computed case-insensitively.
    ///
    /// # Examples
    ///
    /// ```
    /// use docsift::fuzzy::FuzzyMatcher;
    ///
    /// let matcher = FuzzyMatcher::default();
    /// assert_eq!(matcher.score("Tokio", "async runtimes like tokio"), 100);
    /// assert!(matcher.score("xyzzy", "async runtimes") < 70);
    /// ```
    pub fn score(&self, query: &str, content: &str) -> u8 {
        let query = query.to_lowercase();
        let content = content.to_lowercase();

        let mut best = partial_ratio(&query, &content);
        if best == 100 {
            return best;
        }
        best = best.max(token_set_ratio(&query, &content));

        for word in query.split_whitespace() {
            if best == 100 {
                break;
            }
            best = best.max(partial_ratio(word, &content));
        }

        best
    }

    /// Whether `content` scores at or above the threshold.
    pub fn matches(&self, query: &str, content: &str) -> Option<u8> {
        let score = self.score(query, content);
        (score >= self.threshold).then_some(score)
    }

    /// Terms from `filenames` that look like what `query` meant.
    ///
    /// Filenames are split on spaces, underscores, hyphens and dots. Terms
    /// scoring at least [`SUGGESTION_THRESHOLD`] against the whole query are
    /// returned once each, in first-seen order, up to `max`. Matching and
    /// deduplication ignore case; a term is returned as the filename spells
    /// it.
    pub fn suggest_corrections<'a>(
        &self,
        query: &str,
        filenames: impl IntoIterator<Item = &'a str>,
        max: usize,
    ) -> Vec<String> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || max == 0 {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut suggestions = Vec::new();

        for filename in filenames {
            for term in filename
                .split(FILENAME_SEPARATORS)
                .filter(|t| !t.is_empty())
            {
                let key = term.to_lowercase();
                if ratio(&query, &key) < SUGGESTION_THRESHOLD {
                    continue;
                }
                if seen.insert(key) {
                    suggestions.push(term.to_string());
                    if suggestions.len() == max {
                        return suggestions;
                    }
                }
            }
        }

        suggestions
    }
}

/// Normalized indel similarity of two strings.
///
/// Two empty strings are identical (100); one empty string matches nothing.
pub fn ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

fn ratio_chars(a: &[char], b: &[char]) -> u8 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }
    let lcs = lcs_len(a, b);
    ((200 * lcs) as f64 / total as f64).round() as u8
}

/// Length of the longest common subsequence, one DP row at a time.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut row = vec![0usize; short.len() + 1];

    for &lc in long {
        let mut diagonal = 0;
        for (j, &sc) in short.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if lc == sc {
                diagonal + 1
            } else {
                above.max(row[j])
            };
            diagonal = above;
        }
    }

    row[short.len()]
}

/// Best [`ratio`] of the shorter string against every same-length window of
/// the longer one.
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    if short.is_empty() {
        return if long.is_empty() { 100 } else { 0 };
    }

    let mut best = 0;
    for window in long.windows(short.len()) {
        // Windows sharing no character with the needle cannot beat zero
        if !window.iter().any(|c| short.contains(c)) {
            continue;
        }
        best = best.max(ratio_chars(&short, window));
        if best == 100 {
            break;
        }
    }
    best
}

/// Ratio over the token sets of both strings.
///
/// Both strings are reduced to their sets of alphanumeric words. The sorted
/// intersection is compared against the intersection extended with each
/// side's remaining words, so a query whose words all appear in the content
/// scores 100 regardless of order or extra content.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let tokens_a = token_set(a);
    let tokens_b = token_set(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0;
    }

    let common: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let base = common.join(" ");
    let with = |rest: &[&str]| -> String {
        match (base.is_empty(), rest.is_empty()) {
            (_, true) => base.clone(),
            (true, false) => rest.join(" "),
            (false, false) => format!("{base} {}", rest.join(" ")),
        }
    };
    let combined_a = with(&only_a);
    let combined_b = with(&only_b);

    let mut best = ratio(&combined_a, &combined_b);
    if !base.is_empty() {
        best = best
            .max(ratio(&base, &combined_a))
            .max(ratio(&base, &combined_b));
    }
    best
}

fn token_set(text: &str) -> BTreeSet<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_basics() {
        assert_eq!(ratio("", ""), 100);
        assert_eq!(ratio("abc", ""), 0);
        assert_eq!(ratio("kitten", "kitten"), 100);
        // LCS("kitten", "sitting") = 4 -> 2*4/13
        assert_eq!(ratio("kitten", "sitting"), 62);
    }

    #[test]
    fn partial_ratio_finds_substring() {
        assert_eq!(partial_ratio("rust", "the rust book"), 100);
        assert_eq!(partial_ratio("the rust book", "rust"), 100);
        assert_eq!(partial_ratio("", "anything"), 0);
        assert!(partial_ratio("rsut", "the rust book") >= 75);
    }

    #[test]
    fn token_set_ignores_order_and_extra_words() {
        assert_eq!(
            token_set_ratio("borrow checker", "the checker enforces borrow rules"),
            100
        );
        assert_eq!(token_set_ratio("", "anything"), 0);
        assert!(token_set_ratio("apples", "oranges") < 70);
    }

    #[test]
    fn score_is_case_insensitive() {
        let matcher = FuzzyMatcher::default();
        assert_eq!(matcher.score("DATABASE", "a database engine"), 100);
    }

    #[test]
    fn single_word_partial_counts() {
        let matcher = FuzzyMatcher::default();
        // "zebra" is absent but "transaction" matches a word in the content
        let score = matcher.score("zebra transaction", "commit the transaction");
        assert_eq!(score, 100);
    }

    #[test]
    fn threshold_is_respected() {
        let strict = FuzzyMatcher::new(90);
        let lenient = FuzzyMatcher::new(50);
        let content = "configuration management";
        let score = strict.score("konfigurasion", content);
        assert!(score < 90 && score >= 50, "score was {score}");
        assert_eq!(strict.matches("konfigurasion", content), None);
        assert_eq!(lenient.matches("konfigurasion", content), Some(score));
    }

    #[test]
    fn suggestions_come_from_filename_terms() {
        let matcher = FuzzyMatcher::default();
        let filenames = [
            "machine_learning-notes.pdf",
            "Learning Rust.md",
            "cooking.txt",
        ];
        let suggestions =
            matcher.suggest_corrections("lerning", filenames.iter().copied(), 5);
        assert_eq!(suggestions, vec!["learning".to_string()]);
    }

    #[test]
    fn suggestions_are_capped() {
        let matcher = FuzzyMatcher::default();
        let filenames = ["data-date-dare-dart.txt"];
        let all =
            matcher.suggest_corrections("data", filenames.iter().copied(), 10);
        assert_eq!(all, vec!["data", "date", "dart"]);
        let capped =
            matcher.suggest_corrections("data", filenames.iter().copied(), 2);
        assert_eq!(capped, vec!["data", "date"]);
    }

    #[test]
    fn suggestions_keep_the_filename_spelling() {
        let matcher = FuzzyMatcher::default();
        let filenames = ["Kubernetes_Guide.md", "kubernetes.txt", "KUBERNETES.md"];
        let suggestions =
            matcher.suggest_corrections("kubernets", filenames.iter().copied(), 5);
        assert_eq!(suggestions, vec!["Kubernetes"]);
    }
}
