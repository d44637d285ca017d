//! Stage 3 lexical scoring for composite routing: how closely the raw
//! query text matches a candidate template's declared comparison fields,
//! independent of embedding or reranker signal.

/// Algorithms available for [`calculate_best_text_similarity`]. Jaro-
/// Winkler rewards shared prefixes (good for short, entity-like
/// queries); normalized Levenshtein rewards overall edit distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimilarityAlgorithm {
    #[default]
    JaroWinkler,
    NormalizedLevenshtein,
}

/// The highest similarity between `query` and any of `compare_fields`,
/// using `algorithm`. Comparison is case-insensitive. Returns `0.0` when
/// `compare_fields` is empty.
#[must_use]
pub fn calculate_best_text_similarity(
    query: &str,
    compare_fields: &[String],
    algorithm: SimilarityAlgorithm,
) -> f64 {
    let query_lower = query.to_lowercase();
    compare_fields
        .iter()
        .map(|field| similarity(&query_lower, &field.to_lowercase(), algorithm))
        .fold(0.0_f64, f64::max)
}

fn similarity(a: &str, b: &str, algorithm: SimilarityAlgorithm) -> f64 {
    match algorithm {
        SimilarityAlgorithm::JaroWinkler => strsim::jaro_winkler(a, b),
        SimilarityAlgorithm::NormalizedLevenshtein => strsim::normalized_levenshtein(a, b),
    }
}
