//! Normalized text similarity for stagnation and consensus checks.

/// Case- and whitespace-fold a string for comparison.
pub fn normalize(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity ratio in `[0.0, 1.0]` between two normalized strings.
///
/// Dice coefficient over character bigrams of the folded text. Identical
/// strings (after folding) always score 1.0; strings too short to form a
/// bigram only match exactly.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a == b {
        return 1.0;
    }
    let a_bigrams = bigrams(&a);
    let b_bigrams = bigrams(&b);
    if a_bigrams.is_empty() || b_bigrams.is_empty() {
        return 0.0;
    }

    let mut b_pool = b_bigrams.clone();
    let mut matches = 0usize;
    for gram in &a_bigrams {
        if let Some(pos) = b_pool.iter().position(|g| g == gram) {
            b_pool.swap_remove(pos);
            matches += 1;
        }
    }
    (2.0 * matches as f64) / (a_bigrams.len() + b_bigrams.len()) as f64
}

fn bigrams(s: &str) -> Vec<[char; 2]> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| [w[0], w[1]]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_scores_one() {
        assert_eq!(text_similarity("same message", "same message"), 1.0);
    }

    #[test]
    fn folding_ignores_case_and_whitespace() {
        assert_eq!(text_similarity("Same   Message", "same message"), 1.0);
    }

    #[test]
    fn unrelated_text_scores_low() {
        let sim = text_similarity(
            "the quarterly report is complete",
            "zebras gallop across volcanic dunes",
        );
        assert!(sim < 0.5, "got {sim}");
    }

    #[test]
    fn near_duplicates_score_high() {
        let sim = text_similarity(
            "the quarterly report is complete and reviewed",
            "the quarterly report is complete and review",
        );
        assert!(sim > 0.9, "got {sim}");
    }

    #[test]
    fn empty_versus_nonempty_scores_zero() {
        assert_eq!(text_similarity("", "something"), 0.0);
        assert_eq!(text_similarity("", ""), 1.0);
    }
}
