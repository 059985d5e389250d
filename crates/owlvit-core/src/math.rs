//! Shared math utilities.

use ndarray::{ArrayBase, DataMut, Dimension, Axis};

/// Offset added inside the logs of [`inverse_sigmoid`] so that 0 and 1 map to finite values.
pub const LOGIT_EPS: f32 = 1e-4;

/// Offset added to vector norms before dividing, matching the class head.
pub const NORM_EPS: f32 = 1e-6;

/// Logistic sigmoid.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Epsilon-stabilised logit: `ln(p + eps) - ln(1 - p + eps)`.
///
/// `p` is clamped to [0, 1] first, so the result is always finite.
pub fn inverse_sigmoid(p: f32) -> f32 {
    let p = p.clamp(0.0, 1.0);
    (p + LOGIT_EPS).ln() - (-p + LOGIT_EPS).ln_1p()
}

/// GELU, tanh approximation.
pub fn gelu(x: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + 0.044_715 * x * x * x)).tanh())
}

/// ELU with alpha = 1.
pub fn elu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        x.exp_m1()
    }
}

/// L2-normalize a vector in place as `v / (|v| + NORM_EPS)`.
pub fn l2_normalize_in_place(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in v.iter_mut() {
        *x /= norm + NORM_EPS;
    }
}

/// L2-normalize every vector along the last axis of an array.
pub fn l2_normalize_last_axis<S, D>(a: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = f32>,
    D: Dimension,
{
    let last = Axis(a.ndim() - 1);
    for mut lane in a.lanes_mut(last) {
        let norm = lane.iter().map(|x| x * x).sum::<f32>().sqrt();
        lane.mapv_inplace(|x| x / (norm + NORM_EPS));
    }
}
