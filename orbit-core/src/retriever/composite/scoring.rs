//! Multi-stage candidate scoring for the composite retriever: combining
//! embedding, rerank, and string-similarity signals into one ranking,
//! tolerating either of the optional stages being unavailable.

use crate::template::TemplateMatch;

/// Per-stage combination weights. Renormalized at combine time when a
/// stage did not run, so the remaining stages still sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub embedding: f64,
    pub rerank: f64,
    pub string: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            embedding: crate::constants::defaults::COMPOSITE_WEIGHT_EMBEDDING,
            rerank: crate::constants::defaults::COMPOSITE_WEIGHT_RERANK,
            string: crate::constants::defaults::COMPOSITE_WEIGHT_STRING,
        }
    }
}

/// How ties in `combined_score` (or raw embedding score, pre-multistage)
/// are broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreaker {
    /// Higher embedding score wins; ties after that keep the first
    /// candidate encountered (configuration order).
    #[default]
    HigherEmbeddingScore,
    /// Keep whichever candidate was assembled first (adapter
    /// registration order).
    ConfigurationOrder,
}

/// Multi-stage scoring configuration for one composite retriever.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub normalize_scores: bool,
    pub tie_breaker: TieBreaker,
    pub top_candidates: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            normalize_scores: false,
            tie_breaker: TieBreaker::default(),
            top_candidates: 10,
        }
    }
}

/// Min-max normalize `scores` (in place semantics via return) to `[0, 1]`
/// across the candidate set. A constant set (max == min) normalizes to
/// `1.0` for every present value, since every candidate is equally the
/// best available evidence for that stage.
fn min_max_normalize(scores: &[Option<f64>]) -> Vec<Option<f64>> {
    let present: Vec<f64> = scores.iter().filter_map(|s| *s).collect();
    if present.is_empty() {
        return scores.to_vec();
    }
    let min = present.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = present.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    scores
        .iter()
        .map(|s| {
            s.map(|v| if (max - min).abs() < f64::EPSILON { 1.0 } else { (v - min) / (max - min) })
        })
        .collect()
}

/// Combine each candidate's per-stage scores into `combined_score`,
/// renormalizing weights across whichever stages are present in this
/// candidate set (rerank/string are optional; embedding is always
/// present). When `normalize_scores` is set, each stage is min-max
/// normalized across the candidate set before combining.
pub fn combine_scores(matches: &mut [TemplateMatch], config: &ScoringConfig) {
    if matches.is_empty() {
        return;
    }

    let rerank_present = matches.iter().any(|m| m.rerank_score.is_some());
    let string_present = matches.iter().any(|m| m.string_similarity_score.is_some());

    let (embedding_scores, rerank_scores, string_scores) = if config.normalize_scores {
        (
            min_max_normalize(&matches.iter().map(|m| Some(m.embedding_score)).collect::<Vec<_>>()),
            min_max_normalize(&matches.iter().map(|m| m.rerank_score).collect::<Vec<_>>()),
            min_max_normalize(&matches.iter().map(|m| m.string_similarity_score).collect::<Vec<_>>()),
        )
    } else {
        (
            matches.iter().map(|m| Some(m.embedding_score)).collect(),
            matches.iter().map(|m| m.rerank_score).collect(),
            matches.iter().map(|m| m.string_similarity_score).collect(),
        )
    };

    let mut weight_sum = config.weights.embedding;
    if rerank_present {
        weight_sum += config.weights.rerank;
    }
    if string_present {
        weight_sum += config.weights.string;
    }
    if weight_sum <= 0.0 {
        weight_sum = 1.0;
    }

    for (i, m) in matches.iter_mut().enumerate() {
        let mut combined = config.weights.embedding * embedding_scores[i].unwrap_or(0.0);
        if rerank_present {
            combined += config.weights.rerank * rerank_scores[i].unwrap_or(0.0);
        }
        if string_present {
            combined += config.weights.string * string_scores[i].unwrap_or(0.0);
        }
        combined /= weight_sum;
        m.combined_score = Some(combined);
        m.scoring_details.insert(
            "weight_sum".to_string(),
            serde_json::Value::from(weight_sum),
        );
    }
}

/// Select the single best candidate clearing `confidence_threshold` (on
/// embedding score), breaking ties per `tie_breaker`. Candidates are
/// assumed already scored via [`combine_scores`] (or not multi-staged,
/// in which case `ranking_score()` falls back to the raw embedding
/// score).
#[must_use]
pub fn select_winner<'a>(
    matches: &'a [TemplateMatch],
    confidence_threshold: f64,
    tie_breaker: TieBreaker,
) -> Option<&'a TemplateMatch> {
    let mut candidates: Vec<&TemplateMatch> = matches
        .iter()
        .filter(|m| m.embedding_score >= confidence_threshold)
        .collect();

    if candidates.is_empty() {
        return None;
    }

    match tie_breaker {
        TieBreaker::HigherEmbeddingScore => {
            candidates.sort_by(|a, b| {
                b.ranking_score()
                    .partial_cmp(&a.ranking_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        b.embedding_score
                            .partial_cmp(&a.embedding_score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            });
        }
        TieBreaker::ConfigurationOrder => {
            candidates.sort_by(|a, b| {
                b.ranking_score()
                    .partial_cmp(&a.ranking_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    candidates.into_iter().next()
}
