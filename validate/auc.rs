use super::ValidationError;

/// Area under the ROC curve via the Mann-Whitney rank statistic.
///
/// Tied scores share the average of their ranks, which counts each tied
/// positive/negative pair as one half.
pub fn roc_auc(labels: &[bool], scores: &[f64]) -> Result<f64, ValidationError> {
    if labels.len() != scores.len() {
        return Err(ValidationError::ShapeMismatch {
            rows: scores.len(),
            labels: labels.len(),
        });
    }
    let positives = labels.iter().filter(|&&label| label).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(ValidationError::SingleClass);
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; the tie block spans ranks start+1 ..= end.
        let average = (start + 1 + end) as f64 / 2.0;
        for &index in &order[start..end] {
            ranks[index] = average;
        }
        start = end;
    }

    let positive_rank_sum: f64 = ranks
        .iter()
        .zip(labels)
        .filter(|&(_, &label)| label)
        .map(|(&rank, _)| rank)
        .sum();
    let positives = positives as f64;
    let negatives = negatives as f64;
    Ok((positive_rank_sum - positives * (positives + 1.0) / 2.0) / (positives * negatives))
}
