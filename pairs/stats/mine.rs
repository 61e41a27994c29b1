//! Maximal-information statistics estimated on equipartition grids.
//!
//! For every grid of `a x b` cells with `a * b <= n^alpha`, both variables are cut into
//! equal-frequency bins and the mutual information of the resulting contingency table
//! is normalised by `ln(min(a, b))`. This characteristic matrix `M(a, b)` yields four
//! channels:
//!
//! - `MIC`: the maximum of `M`.
//! - `MAS`: the maximum asymmetry `|M(a, b) - M(b, a)|`.
//! - `MEV`: the maximum of `M` over grids with a side of two.
//! - `MCN`: the smallest `log2(a * b)` reaching the maximum.

use super::{PairScorer, StatError};

const MINIMUM_POINTS: usize = 4;
const MAX_TOLERANCE: f64 = 1e-12;

pub(super) struct Mine {
    alpha: f64,
    order: Vec<usize>,
    partitions_x: Vec<Vec<usize>>,
    partitions_y: Vec<Vec<usize>>,
    table: Vec<u32>,
}

impl Mine {
    pub(super) fn new(alpha: f64) -> Result<Self, StatError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(StatError::InvalidParameter(format!(
                "mine alpha must lie in (0, 1], got {alpha}"
            )));
        }
        Ok(Self {
            alpha,
            order: Vec::new(),
            partitions_x: Vec::new(),
            partitions_y: Vec::new(),
            table: Vec::new(),
        })
    }

    fn cell_budget(&self, n: usize) -> usize {
        ((n as f64).powf(self.alpha).floor() as usize).max(MINIMUM_POINTS)
    }
}

/// Assigns each value to one of `bins` equal-frequency bins; tied values share a bin.
fn equipartition_into(values: &[f64], bins: usize, order: &mut Vec<usize>, out: &mut Vec<usize>) {
    let n = values.len();
    order.clear();
    order.extend(0..n);
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    out.clear();
    out.resize(n, 0);
    let mut group_bin = 0;
    for (pos, &idx) in order.iter().enumerate() {
        if pos == 0 || values[idx] != values[order[pos - 1]] {
            group_bin = (pos * bins / n).min(bins - 1);
        }
        out[idx] = group_bin;
    }
}

/// Mutual information (nats) between two binnings.
fn mutual_information(bx: &[usize], kx: usize, by: &[usize], ky: usize, table: &mut Vec<u32>) -> f64 {
    table.clear();
    table.resize(kx * ky, 0);
    for (&i, &j) in bx.iter().zip(by) {
        table[i * ky + j] += 1;
    }

    let n = bx.len() as f64;
    let mut row = vec![0u32; kx];
    let mut col = vec![0u32; ky];
    for i in 0..kx {
        for j in 0..ky {
            let c = table[i * ky + j];
            row[i] += c;
            col[j] += c;
        }
    }

    let mut mi = 0.0;
    for i in 0..kx {
        for j in 0..ky {
            let c = table[i * ky + j];
            if c > 0 {
                let c = f64::from(c);
                mi += c / n * (c * n / (f64::from(row[i]) * f64::from(col[j]))).ln();
            }
        }
    }
    mi.max(0.0)
}

impl PairScorer for Mine {
    fn score(&mut self, x: &[f64], y: &[f64], out: &mut [f64]) {
        let n = x.len();
        if n < MINIMUM_POINTS {
            out.fill(f64::NAN);
            return;
        }
        let budget = self.cell_budget(n);
        let max_side = budget / 2;

        // partitions[k] holds the k-bin equipartition; slots 0 and 1 stay empty.
        for (values, partitions) in [(x, &mut self.partitions_x), (y, &mut self.partitions_y)] {
            partitions.resize_with(max_side + 1, Vec::new);
            for (k, bins) in partitions.iter_mut().enumerate().skip(2) {
                equipartition_into(values, k, &mut self.order, bins);
            }
        }

        let mut characteristic = |a: usize, b: usize| {
            let mi = mutual_information(
                &self.partitions_x[a],
                a,
                &self.partitions_y[b],
                b,
                &mut self.table,
            );
            mi / (a.min(b) as f64).ln()
        };

        let mut grid = Vec::new();
        for a in 2..=max_side {
            for b in 2..=(budget / a) {
                grid.push((a, b, characteristic(a, b)));
            }
        }

        let mic = grid.iter().map(|g| g.2).fold(0.0, f64::max);
        let lookup = |a: usize, b: usize| {
            grid.iter()
                .find(|g| g.0 == a && g.1 == b)
                .map(|g| g.2)
        };
        let mas = grid
            .iter()
            .filter_map(|&(a, b, m)| lookup(b, a).map(|mirrored| (m - mirrored).abs()))
            .fold(0.0, f64::max);
        let mev = grid
            .iter()
            .filter(|g| g.0 == 2 || g.1 == 2)
            .map(|g| g.2)
            .fold(0.0, f64::max);
        let mcn = grid
            .iter()
            .filter(|g| g.2 >= mic - MAX_TOLERANCE)
            .map(|g| ((g.0 * g.1) as f64).log2())
            .fold(f64::INFINITY, f64::min);

        out[0] = mic;
        out[1] = mas;
        out[2] = mev;
        out[3] = if mcn.is_finite() { mcn } else { f64::NAN };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn score(x: &[f64], y: &[f64]) -> [f64; 4] {
        let mut out = [0.0; 4];
        Mine::new(0.6).unwrap().score(x, y, &mut out);
        out
    }

    #[test]
    fn equipartition_balances_bins_and_keeps_ties_together() {
        let mut order = Vec::new();
        let mut bins = Vec::new();
        equipartition_into(&[4.0, 1.0, 3.0, 2.0], 2, &mut order, &mut bins);
        assert_eq!(bins, vec![1, 0, 1, 0]);

        equipartition_into(&[1.0, 1.0, 1.0, 2.0], 2, &mut order, &mut bins);
        assert_eq!(bins, vec![0, 0, 0, 1]);
    }

    #[test]
    fn identical_variables_reach_maximal_information() {
        let x: Vec<f64> = (0..100).map(f64::from).collect();
        let out = score(&x, &x);
        assert_abs_diff_eq!(out[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[2], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[3], 2.0, epsilon = 1e-9);
        assert!(out[1] >= 0.0);
    }

    #[test]
    fn too_few_points_is_nan() {
        let out = score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn rejects_invalid_alpha() {
        assert!(Mine::new(0.0).is_err());
        assert!(Mine::new(1.5).is_err());
    }
}
