//! Keyword scoring for captures.
//!
//! Used when no query vector is available. Title hits weigh more than URL
//! hits, which weigh more than page-text hits.
//!
//! Length normalization: page text matches are weighted inversely to text
//! length so long pages do not win on surface area alone.

/// Weight of a term found in the title
const TITLE_WEIGHT: f32 = 30.0;
/// Weight of a term found in the URL
const URL_WEIGHT: f32 = 20.0;
/// Weight of a term found in the page text, before length normalization
const TEXT_WEIGHT: f32 = 10.0;

/// Baseline page text length for normalization (characters).
/// Texts at or below this length get full weight.
const TEXT_LENGTH_BASELINE: f32 = 1000.0;

/// Result of keyword scoring a single capture.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LexicalScore {
    /// Number of distinct terms matched
    pub matched_terms: usize,
    /// Weighted score across all fields
    pub score: f32,
}

/// Tokenize text into lowercase terms.
/// Filters out very short terms (1 char) and common stop words.
pub fn tokenize(query: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being",
        "in", "on", "at", "to", "for", "of", "with", "by", "from", "as",
        "and", "or", "but", "not", "no", "so", "if", "then",
    ];

    query
        .split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.chars().count() > 1 && !STOP_WORDS.contains(&s.as_str()))
        .collect()
}

/// Tokenizes the query and every expansion into one de-duplicated term list,
/// query terms first.
pub fn search_terms(query: &str, expansions: &[String]) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in tokenize(query)
        .into_iter()
        .chain(expansions.iter().flat_map(|e| tokenize(e)))
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Compute page text match weight based on length.
///
/// - 1000 chars or less: 1.0 (full weight)
/// - 2700 chars: ~0.5
/// - 7300 chars: ~0.33
fn text_length_weight(len: usize) -> f32 {
    if len <= TEXT_LENGTH_BASELINE as usize {
        return 1.0;
    }
    1.0 / (1.0 + (len as f32 / TEXT_LENGTH_BASELINE).ln())
}

/// Score one capture's fields against pre-tokenized terms.
pub fn score_fields(terms: &[String], title: &str, url: &str, text: &str) -> LexicalScore {
    if terms.is_empty() {
        return LexicalScore::default();
    }

    let title_lower = title.to_lowercase();
    let url_lower = url.to_lowercase();
    let text_lower = text.to_lowercase();
    let text_weight = TEXT_WEIGHT * text_length_weight(text.chars().count());

    let mut result = LexicalScore::default();

    for term in terms {
        let mut term_score = 0.0;

        if title_lower.contains(term.as_str()) {
            term_score += TITLE_WEIGHT;
        }
        if url_lower.contains(term.as_str()) {
            term_score += URL_WEIGHT;
        }
        if text_lower.contains(term.as_str()) {
            term_score += text_weight;
        }

        if term_score > 0.0 {
            result.matched_terms += 1;
            result.score += term_score;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        let tokens = tokenize("machine learning guide");
        assert_eq!(tokens, vec!["machine", "learning", "guide"]);
    }

    #[test]
    fn test_tokenize_filters_stop_words() {
        let tokens = tokenize("the quick brown fox");
        assert_eq!(tokens, vec!["quick", "brown", "fox"]);
    }

    #[test]
    fn test_tokenize_handles_punctuation() {
        let tokens = tokenize("rust-lang, python/django");
        assert_eq!(tokens, vec!["rust", "lang", "python", "django"]);
    }

    #[test]
    fn test_search_terms_merges_expansions() {
        let expansions = vec!["bmw".to_string(), "Car dealer".to_string()];
        let terms = search_terms("car", &expansions);
        assert_eq!(terms, vec!["car", "bmw", "dealer"]);
    }

    #[test]
    fn test_no_terms_no_score() {
        let score = score_fields(&[], "Rust", "https://rust-lang.org", "rust");
        assert_eq!(score, LexicalScore::default());
    }

    #[test]
    fn test_title_outweighs_url_and_text() {
        let terms = tokenize("rust");
        let title = score_fields(&terms, "Rust book", "https://a.example", "nothing");
        let url = score_fields(&terms, "Book", "https://rust.example", "nothing");
        let text = score_fields(&terms, "Book", "https://a.example", "about rust");

        assert!(title.score > url.score);
        assert!(url.score > text.score);
        assert!(text.score > 0.0);
    }

    #[test]
    fn test_multi_term_counts_distinct_matches() {
        let terms = tokenize("rust machine learning");
        let score = score_fields(&terms, "Machine Learning with Rust", "", "");
        assert_eq!(score.matched_terms, 3);
    }

    #[test]
    fn test_long_text_penalized() {
        let terms = tokenize("rust");
        let short = score_fields(&terms, "", "", "learn rust basics");
        let long_text = format!("{} rust", "filler words ".repeat(500));
        let long = score_fields(&terms, "", "", &long_text);

        assert!(short.score > long.score);
        assert!(long.score > 0.0);
    }

    #[test]
    fn test_text_length_weight_decay() {
        assert_eq!(text_length_weight(500), 1.0);
        let w2000 = text_length_weight(2000);
        let w4000 = text_length_weight(4000);
        assert!(w2000 < 1.0);
        assert!(w4000 < w2000);
    }
}
