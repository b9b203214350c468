//! Username similarity scoring for the fuzzy search.
//!
//! The composite score blends four signals:
//!
//! ```text
//! score = 0.30 · substring
//!       + 0.20 · (1 − levenshtein/max_len)
//!       + 0.20 · lcs_len/max_len
//!       + 0.30 · pattern
//! ```
//!
//! `substring` rewards containment proportionally to length ratio;
//! `pattern` rewards two strings sharing a locality token (hamlet names the
//! operators bake into usernames), scored 0.8 plus up to 0.2 for similar
//! residues once the token is removed.

/// Locality tokens recognized by default. Operators extend this through
/// configuration.
pub const DEFAULT_LOCALITY_TOKENS: &[&str] = &[
    "kukun", "cipanas", "lane", "jaya", "sukatani", "cibodas", "benda", "puncak", "warung",
    "kampung",
];

/// Minimum composite score for a candidate to be kept.
pub const SCORE_THRESHOLD: f64 = 0.30;

/// Composite similarity in `[0, 1]`. Both inputs are lower-cased before any
/// comparison.
pub fn composite_score(term: &str, candidate: &str, tokens: &[String]) -> f64 {
    let a = term.to_lowercase();
    let b = candidate.to_lowercase();

    0.30 * substring_score(&a, &b)
        + 0.20 * levenshtein_similarity(&a, &b)
        + 0.20 * lcs_similarity(&a, &b)
        + 0.30 * pattern_score(&a, &b, tokens)
}

/// `shorter/longer` when either string contains the other, else 0.
fn substring_score(a: &str, b: &str) -> f64 {
    let (al, bl) = (a.chars().count(), b.chars().count());
    if al == 0 || bl == 0 {
        return 0.0;
    }
    if a.contains(b) || b.contains(a) {
        let (shorter, longer) = if al < bl { (al, bl) } else { (bl, al) };
        shorter as f64 / longer as f64
    } else {
        0.0
    }
}

/// Unit-cost edit distance, two-row dynamic programming.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(ca != cb);
            let insert = curr[j] + 1;
            let delete = prev[j + 1] + 1;
            curr[j + 1] = substitute.min(insert).min(delete);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Length of the longest common subsequence, classical DP.
pub fn lcs_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn lcs_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    lcs_len(a, b) as f64 / max_len as f64
}

/// 0.8 + up to 0.2 when both strings carry the same locality token, scored
/// on how similar the residues are once the token is removed; clamped to 1.
fn pattern_score(a: &str, b: &str, tokens: &[String]) -> f64 {
    for token in tokens {
        let token = token.to_lowercase();
        if token.is_empty() {
            continue;
        }
        if a.contains(&token) && b.contains(&token) {
            let ra = a.replacen(&token, "", 1);
            let rb = b.replacen(&token, "", 1);
            let residue_sim = levenshtein_similarity(&ra, &rb);
            return (0.8 + 0.2 * residue_sim).min(1.0);
        }
    }
    0.0
}

/// The default token set as owned strings, for engines built without an
/// operator-supplied list.
pub fn default_tokens() -> Vec<String> {
    DEFAULT_LOCALITY_TOKENS
        .iter()
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(term: &str, candidate: &str) -> f64 {
        composite_score(term, candidate, &default_tokens())
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("budi", "budi"), 0);
    }

    #[test]
    fn lcs_basics() {
        assert_eq!(lcs_len("", "abc"), 0);
        assert_eq!(lcs_len("abcbdab", "bdcaba"), 4);
        assert_eq!(lcs_len("budi", "budi"), 4);
    }

    #[test]
    fn substring_rewards_containment_by_length_ratio() {
        assert_eq!(substring_score("kukun", "ahmadkukun"), 0.5);
        assert_eq!(substring_score("abc", "abc"), 1.0);
        assert_eq!(substring_score("xyz", "abc"), 0.0);
    }

    #[test]
    fn exact_match_scores_one() {
        let s = score("budikukun", "budikukun");
        assert!((s - 1.0).abs() < 1e-9, "{s}");
    }

    #[test]
    fn shared_locality_token_dominates() {
        // Both contain "kukun": pattern fires even though the usernames
        // differ, keeping the candidate comfortably above threshold.
        let s = score("kukun", "ahmadkukun");
        assert!(s >= 0.5, "{s}");
        let s = score("kukun", "budikukun");
        assert!(s >= 0.5, "{s}");
    }

    #[test]
    fn unrelated_name_falls_below_threshold() {
        let s = score("kukun", "sitisukatani");
        assert!(s < SCORE_THRESHOLD, "{s}");
    }

    #[test]
    fn case_is_ignored() {
        let s = score("BudiKukun", "budikukun");
        assert!((s - 1.0).abs() < 1e-9, "{s}");
    }

    #[test]
    fn pattern_score_clamps_at_one() {
        // Identical residues: 0.8 + 0.2 · 1.0 == 1.0, never above.
        let tokens = default_tokens();
        assert_eq!(pattern_score("acipanas", "acipanas", &tokens), 1.0);
    }

    #[test]
    fn single_character_term_still_scores() {
        let s = score("b", "budikukun");
        assert!(s > 0.0);
    }
}
