pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Min-max normalization within a result set. Lexical scores are unbounded
/// (BM25), so they are squeezed into [0, 1] before weighted fusion; a
/// degenerate set where every score is equal maps to all ones.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

/// Weighted hybrid merge: `w · vector + (1 − w) · lexical`. A hit present
/// on only one side contributes just its weighted half.
pub fn merge_weighted(vector: Option<f32>, lexical: Option<f32>, vector_weight: f32) -> f32 {
    let vector_part = vector.unwrap_or(0.0) * vector_weight;
    let lexical_part = lexical.unwrap_or(0.0) * (1.0 - vector_weight);
    vector_part + lexical_part
}
