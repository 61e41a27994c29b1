//! Heller-Heller-Gorfine distance-ball statistics.
//!
//! For each ordered pair of points `(i, j)` the remaining points are split by whether
//! they fall inside the ball around `i` of radius `d(i, j)`, in `x` and in `y`
//! separately. Each resulting 2x2 table contributes a Pearson chi-square and a
//! likelihood-ratio term; the channels are their normalised sums and maxima.

use super::PairScorer;
use std::f64::consts::LN_2;

const MINIMUM_POINTS: usize = 4;

pub(super) struct Hhg;

/// Chi-square and likelihood-ratio scores of one 2x2 table over `m` points.
fn table_scores(cells: [[f64; 2]; 2], m: f64) -> (f64, f64) {
    let rows = [cells[0][0] + cells[0][1], cells[1][0] + cells[1][1]];
    let cols = [cells[0][0] + cells[1][0], cells[0][1] + cells[1][1]];
    if rows.iter().chain(&cols).any(|&margin| margin == 0.0) {
        return (0.0, 0.0);
    }

    let det = cells[0][0] * cells[1][1] - cells[0][1] * cells[1][0];
    let chi = m * det * det / (rows[0] * rows[1] * cols[0] * cols[1]);

    let mut lr = 0.0;
    for (r, row) in cells.iter().enumerate() {
        for (c, &count) in row.iter().enumerate() {
            if count > 0.0 {
                lr += count * (count * m / (rows[r] * cols[c])).ln();
            }
        }
    }
    (chi, lr)
}

impl PairScorer for Hhg {
    fn score(&mut self, x: &[f64], y: &[f64], out: &mut [f64]) {
        let n = x.len();
        if n < MINIMUM_POINTS {
            out.fill(f64::NAN);
            return;
        }
        let m = (n - 2) as f64;

        let (mut sum_chi, mut sum_lr) = (0.0, 0.0);
        let (mut max_chi, mut max_lr) = (0.0f64, 0.0f64);
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let radius_x = (x[i] - x[j]).abs();
                let radius_y = (y[i] - y[j]).abs();

                let mut cells = [[0.0; 2]; 2];
                for k in (0..n).filter(|&k| k != i && k != j) {
                    let outside_x = usize::from((x[i] - x[k]).abs() > radius_x);
                    let outside_y = usize::from((y[i] - y[k]).abs() > radius_y);
                    cells[outside_x][outside_y] += 1.0;
                }

                let (chi, lr) = table_scores(cells, m);
                sum_chi += chi;
                sum_lr += lr;
                max_chi = max_chi.max(chi);
                max_lr = max_lr.max(lr);
            }
        }

        let scale = (n * (n - 2) * (n - 3)) as f64;
        out[0] = sum_chi / scale;
        out[1] = sum_lr / scale / LN_2;
        out[2] = max_chi / m;
        out[3] = max_lr / m / LN_2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn score(x: &[f64], y: &[f64]) -> [f64; 4] {
        let mut out = [0.0; 4];
        Hhg.score(x, y, &mut out);
        out
    }

    #[test]
    fn independent_table_scores_zero() {
        let (chi, lr) = table_scores([[2.0, 2.0], [2.0, 2.0]], 8.0);
        assert_abs_diff_eq!(chi, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lr, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn perfectly_associated_table() {
        let (chi, lr) = table_scores([[3.0, 0.0], [0.0, 5.0]], 8.0);
        assert_abs_diff_eq!(chi, 8.0, epsilon = 1e-12);
        let expected = 3.0 * (8.0f64 / 3.0).ln() + 5.0 * (8.0f64 / 5.0).ln();
        assert_abs_diff_eq!(lr, expected, epsilon = 1e-12);
    }

    #[test]
    fn empty_margin_contributes_nothing() {
        assert_eq!(table_scores([[4.0, 0.0], [0.0, 0.0]], 4.0), (0.0, 0.0));
    }

    #[test]
    fn dependent_data_outscores_shuffled_data() {
        let x: Vec<f64> = (0..20).map(f64::from).collect();
        let dependent = score(&x, &x);
        let shuffled: Vec<f64> = [7, 14, 2, 19, 11, 0, 16, 5, 9, 13, 3, 18, 8, 1, 15, 10, 4, 17, 12, 6]
            .iter()
            .map(|&v: &i32| f64::from(v))
            .collect();
        let independent = score(&x, &shuffled);
        assert!(dependent[0] > independent[0]);
        assert!(dependent[2] > independent[2]);
        assert!(dependent.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn too_few_points_is_nan() {
        assert!(score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).iter().all(|v| v.is_nan()));
    }
}
