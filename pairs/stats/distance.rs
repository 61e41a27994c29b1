//! Distance correlation: `DCOR` is the normalised dependence, `DCOV` the distance
//! covariance it is built from.

use super::PairScorer;
use ndarray::Array2;

#[derive(Default)]
pub(super) struct DistanceCorrelation {
    a: Array2<f64>,
    b: Array2<f64>,
}

/// Fills `out` with the double-centred pairwise distance matrix of `v`.
fn double_centered_into(v: &[f64], out: &mut Array2<f64>) {
    let n = v.len();
    if out.dim() != (n, n) {
        *out = Array2::zeros((n, n));
    }
    for i in 0..n {
        for j in 0..n {
            out[[i, j]] = (v[i] - v[j]).abs();
        }
    }
    // The matrix is symmetric, so row and column means coincide.
    let row_means: Vec<f64> = out.rows().into_iter().map(|r| r.sum() / n as f64).collect();
    let grand_mean = row_means.iter().sum::<f64>() / n as f64;
    for i in 0..n {
        for j in 0..n {
            out[[i, j]] += grand_mean - row_means[i] - row_means[j];
        }
    }
}

impl PairScorer for DistanceCorrelation {
    fn score(&mut self, x: &[f64], y: &[f64], out: &mut [f64]) {
        if x.len() < 2 {
            out.fill(f64::NAN);
            return;
        }
        double_centered_into(x, &mut self.a);
        double_centered_into(y, &mut self.b);

        let cells = (x.len() * x.len()) as f64;
        let dcov2 = (&self.a * &self.b).sum() / cells;
        let dvar_x = (&self.a * &self.a).sum() / cells;
        let dvar_y = (&self.b * &self.b).sum() / cells;

        let dcov2 = dcov2.max(0.0);
        out[1] = dcov2.sqrt();
        let denominator = (dvar_x * dvar_y).sqrt();
        out[0] = if denominator > 0.0 {
            (dcov2 / denominator).sqrt()
        } else {
            f64::NAN
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn score(x: &[f64], y: &[f64]) -> [f64; 2] {
        let mut out = [0.0; 2];
        DistanceCorrelation::default().score(x, y, &mut out);
        out
    }

    #[test]
    fn identical_vectors_have_unit_distance_correlation() {
        let out = score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert_abs_diff_eq!(out[0], 1.0, epsilon = 1e-12);
        assert!(out[1] > 0.0);
    }

    #[test]
    fn detects_non_monotone_dependence() {
        let x: Vec<f64> = (-10..=10).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| v * v).collect();
        let out = score(&x, &y);
        assert!(out[0] > 0.4, "dcor {}", out[0]);
    }

    #[test]
    fn constant_vector_is_nan() {
        let out = score(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn buffers_resize_between_pairs() {
        let mut scorer = DistanceCorrelation::default();
        let mut out = [0.0; 2];
        scorer.score(&[1.0, 2.0, 3.0, 4.0], &[4.0, 3.0, 2.0, 1.0], &mut out);
        assert_abs_diff_eq!(out[0], 1.0, epsilon = 1e-12);
        scorer.score(&[1.0, 2.0], &[2.0, 1.0], &mut out);
        assert_abs_diff_eq!(out[0], 1.0, epsilon = 1e-12);
    }
}
