//! Moment- and rank-based scorers: linear and rank correlation with significance,
//! rank concordance, covariance and Euclidean distance.

use super::PairScorer;
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use std::cmp::Ordering;

fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

/// Centered cross and auto products: `(sxy, sxx, syy)`.
fn centered_products(x: &[f64], y: &[f64]) -> (f64, f64, f64) {
    let mx = mean(x);
    let my = mean(y);
    x.iter().zip(y).fold((0.0, 0.0, 0.0), |(sxy, sxx, syy), (&a, &b)| {
        let dx = a - mx;
        let dy = b - my;
        (sxy + dx * dy, sxx + dx * dx, syy + dy * dy)
    })
}

/// Pearson's r. NaN for fewer than two points or a constant vector.
pub fn pearson_r(x: &[f64], y: &[f64]) -> f64 {
    if x.len() < 2 {
        return f64::NAN;
    }
    let (sxy, sxx, syy) = centered_products(x, y);
    if sxx <= 0.0 || syy <= 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// Two-sided p-value of a correlation coefficient under Student's t with `n - 2`
/// degrees of freedom.
fn correlation_p_value(r: f64, n: usize) -> f64 {
    if r.is_nan() || n < 3 {
        return f64::NAN;
    }
    let df = (n - 2) as f64;
    let residual = 1.0 - r * r;
    if residual <= 0.0 {
        return 0.0;
    }
    let t = r * (df / residual).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.sf(t.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}

/// 1-based ranks with ties given the average of the positions they span.
fn average_ranks_into(values: &[f64], order: &mut Vec<usize>, ranks: &mut [f64]) {
    order.clear();
    order.extend(0..values.len());
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end hold ranks start+1..=end.
        let rank = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
}

pub(super) struct Pearson;

impl PairScorer for Pearson {
    fn score(&mut self, x: &[f64], y: &[f64], out: &mut [f64]) {
        let r = pearson_r(x, y);
        out[0] = r;
        out[1] = correlation_p_value(r, x.len());
    }
}

#[derive(Default)]
pub(super) struct Spearman {
    order: Vec<usize>,
    rank_x: Vec<f64>,
    rank_y: Vec<f64>,
}

impl PairScorer for Spearman {
    fn score(&mut self, x: &[f64], y: &[f64], out: &mut [f64]) {
        self.rank_x.resize(x.len(), 0.0);
        self.rank_y.resize(y.len(), 0.0);
        average_ranks_into(x, &mut self.order, &mut self.rank_x);
        average_ranks_into(y, &mut self.order, &mut self.rank_y);

        let rho = pearson_r(&self.rank_x, &self.rank_y);
        out[0] = rho;
        out[1] = correlation_p_value(rho, x.len());
    }
}

/// Kendall's tau-b, with a normal-approximation p-value.
pub(super) struct Kendall;

impl PairScorer for Kendall {
    fn score(&mut self, x: &[f64], y: &[f64], out: &mut [f64]) {
        let n = x.len();
        if n < 2 {
            out.fill(f64::NAN);
            return;
        }

        let (mut concordant, mut discordant) = (0u64, 0u64);
        let (mut tied_x_only, mut tied_y_only) = (0u64, 0u64);
        for i in 0..n {
            for j in (i + 1)..n {
                let dx = x[i].total_cmp(&x[j]);
                let dy = y[i].total_cmp(&y[j]);
                match (dx, dy) {
                    (Ordering::Equal, Ordering::Equal) => {}
                    (Ordering::Equal, _) => tied_x_only += 1,
                    (_, Ordering::Equal) => tied_y_only += 1,
                    _ if dx == dy => concordant += 1,
                    _ => discordant += 1,
                }
            }
        }

        let untied = (concordant + discordant) as f64;
        let denominator = ((untied + tied_y_only as f64) * (untied + tied_x_only as f64)).sqrt();
        if denominator <= 0.0 {
            out.fill(f64::NAN);
            return;
        }
        let tau = ((concordant as f64 - discordant as f64) / denominator).clamp(-1.0, 1.0);

        let nf = n as f64;
        let variance = 2.0 * (2.0 * nf + 5.0) / (9.0 * nf * (nf - 1.0));
        let z = tau / variance.sqrt();
        out[0] = tau;
        out[1] = match Normal::new(0.0, 1.0) {
            Ok(dist) => (2.0 * dist.sf(z.abs())).min(1.0),
            Err(_) => f64::NAN,
        };
    }
}

/// Sample covariance and the two sample standard deviations (n - 1 denominator).
pub(super) struct Covariance;

impl PairScorer for Covariance {
    fn score(&mut self, x: &[f64], y: &[f64], out: &mut [f64]) {
        if x.len() < 2 {
            out.fill(f64::NAN);
            return;
        }
        let (sxy, sxx, syy) = centered_products(x, y);
        let dof = (x.len() - 1) as f64;
        out[0] = sxy / dof;
        out[1] = (sxx / dof).sqrt();
        out[2] = (syy / dof).sqrt();
    }
}

pub(super) struct Euclidean;

impl PairScorer for Euclidean {
    fn score(&mut self, x: &[f64], y: &[f64], out: &mut [f64]) {
        out[0] = x
            .iter()
            .zip(y)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
    }
}
