//! Vector post-processing

/// Lower bound on the norm used as divisor
pub const NORM_EPSILON: f64 = 1e-12;

/// Euclidean norm, accumulated in f64 so tiny components do not underflow
fn norm_f64(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Euclidean norm of a vector
pub fn l2_norm(vector: &[f32]) -> f32 {
    norm_f64(vector) as f32
}

/// L2-normalize in place: `v / max(||v||, eps)`. A zero vector stays zero.
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm = norm_f64(vector).max(NORM_EPSILON);
    for x in vector.iter_mut() {
        *x = (f64::from(*x) / norm) as f32;
    }
}
