//! Numeric operations over a single logit vector.
//!
//! All functions are pure apart from the in-place variants mutating their
//! argument.

use ndarray::{Array1, ArrayBase, DataMut, Ix1};

/// Softmax with the row maximum subtracted first.
///
/// A row with no finite entry becomes uniform.
pub fn softmax_1d_inplace(logits: &mut Array1<f32>) {
    let max = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    if !max.is_finite() {
        let n = logits.len().max(1) as f32;
        logits.fill(1.0 / n);
        return;
    }
    logits.mapv_inplace(|x| (x - max).exp());
    let sum = logits.sum();
    if sum > 0.0 {
        *logits /= sum;
    }
}

pub fn softmax_1d(logits: &Array1<f32>) -> Array1<f32> {
    let mut probs = logits.clone();
    softmax_1d_inplace(&mut probs);
    probs
}

pub fn log_softmax_1d(logits: &Array1<f32>) -> Array1<f32> {
    let max_val = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let scaled_logits = logits - max_val;
    let exp_sum = scaled_logits.mapv(f32::exp).sum();
    scaled_logits - exp_sum.ln()
}

/// Divides every logit by `temperature`. Non-positive temperatures are ignored.
pub fn apply_temperature(logits: &mut Array1<f32>, temperature: f32) {
    if temperature > 0.0 && temperature != 1.0 {
        *logits /= temperature;
    }
}

/// Index of the largest logit; the lowest index wins ties and NaN never wins.
pub fn argmax(logits: &Array1<f32>) -> Option<u32> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in logits.iter().enumerate() {
        let value = if value.is_nan() { f32::NEG_INFINITY } else { value };
        match best {
            Some((_, b)) if value <= b => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx as u32)
}

/// Keeps exactly the `k` highest logits and sets the rest to negative infinity.
/// Equal logits are ranked by index. `k == 0` disables the filter.
pub fn top_k_filtering(mut logits: Array1<f32>, k: usize) -> Array1<f32> {
    if k == 0 || k >= logits.len() {
        return logits;
    }
    let mut indices: Vec<usize> = (0..logits.len()).collect();
    // Stable sort keeps index order among equal logits.
    indices.sort_by(|&a, &b| logits[b].total_cmp(&logits[a]));
    for &idx in &indices[k..] {
        logits[idx] = f32::NEG_INFINITY;
    }
    logits
}

/// Nucleus filtering over probabilities: keeps the smallest most-probable
/// prefix whose cumulative mass reaches `p`, zeroes the rest and renormalizes.
/// `p <= 0` or `p >= 1` leaves the distribution unchanged.
pub fn top_p_filtering(mut probs: Array1<f32>, p: f32) -> Array1<f32> {
    if p <= 0.0 || p >= 1.0 {
        return probs;
    }
    let mut indices: Vec<usize> = (0..probs.len()).collect();
    indices.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut cumulative = 0.0;
    let mut keep = indices.len();
    for (rank, &idx) in indices.iter().enumerate() {
        cumulative += probs[idx];
        if cumulative >= p {
            keep = rank + 1;
            break;
        }
    }
    for &idx in &indices[keep..] {
        probs[idx] = 0.0;
    }
    renormalize(&mut probs);
    probs
}

/// Zeroes probabilities below `min_p` times the largest one and renormalizes.
pub fn min_p_filtering(mut probs: Array1<f32>, min_p: f32) -> Array1<f32> {
    if min_p <= 0.0 {
        return probs;
    }
    let max_prob = probs.fold(0.0f32, |a, &b| a.max(b));
    let cutoff = max_prob * min_p;
    probs.mapv_inplace(|prob| if prob < cutoff { 0.0 } else { prob });
    renormalize(&mut probs);
    probs
}

fn renormalize(probs: &mut Array1<f32>) {
    let sum = probs.sum();
    if sum > 0.0 {
        *probs /= sum;
    }
}

/// Repetition penalty in-place: positive logits of seen tokens are divided by
/// `penalty`, negative ones multiplied. Works on arrays and mutable views.
pub fn apply_repetition_penalty_inplace<S>(
    logits: &mut ArrayBase<S, Ix1>,
    tokens: &[u32],
    penalty: f32,
) where
    S: DataMut<Elem = f32>,
{
    if penalty == 1.0 {
        return;
    }
    for &token in tokens {
        let idx = token as usize;
        if idx < logits.len() {
            let score = logits[idx];
            if score < 0.0 {
                logits[idx] = score * penalty;
            } else {
                logits[idx] = score / penalty;
            }
        }
    }
}
