// 🧪 Feature Significance - hypothesis tests against the default target
// Chi-square for binary/categorical columns, Mann-Whitney U or a bootstrap
// interval on the mean difference for numeric columns.

use crate::agg;
use crate::config::SignificanceConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::table::{Column, Key, Table};
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use statrs::function::factorial::binomial;
use statrs::statistics::{Data, OrderStatistics, RankTieBreaker};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Column name of the default flag in the Home Credit tables
pub const TARGET: &str = "TARGET";

// ============================================================================
// FEATURE GROUPS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureGroups {
    /// Exactly two distinct values
    pub binary: Vec<String>,
    /// Text columns with more than two values
    pub categorical: Vec<String>,
    pub numeric: Vec<String>,
}

impl FeatureGroups {
    pub fn len(&self) -> usize {
        self.binary.len() + self.categorical.len() + self.numeric.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split the table's columns into binary, categorical and numeric features.
///
/// The target never appears in any group. `exclude` (id columns) is only
/// removed from the numeric group, so a two-valued id would still count as
/// binary.
pub fn classify_features(table: &Table, target: &str, exclude: &[&str]) -> FeatureGroups {
    let mut groups = FeatureGroups::default();

    for (name, column) in table.columns() {
        if name == target {
            continue;
        }
        if column.distinct_count() == 2 {
            groups.binary.push(name.to_string());
        } else if !column.is_numeric() {
            groups.categorical.push(name.to_string());
        } else if !exclude.contains(&name) {
            groups.numeric.push(name.to_string());
        }
    }

    groups
}

// ============================================================================
// ORDINAL ENCODING
// ============================================================================

/// Replace each category with its rank by ascending mean target.
///
/// Ties keep the category sort order. Missing cells stay missing.
pub fn ordinal_encode(table: &Table, column: &str, target: &str) -> PipelineResult<Column> {
    let feature = table.column(column)?;
    let target_values = table.numeric(target)?;

    let mut ranked: Vec<(Key, f64)> = table
        .group_by(column)?
        .into_iter()
        .map(|(key, rows)| {
            let values: Vec<f64> = rows.iter().map(|&i| target_values[i]).collect();
            (key, agg::mean(&values))
        })
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

    let codes: HashMap<Key, f64> = ranked
        .into_iter()
        .enumerate()
        .map(|(rank, (key, _))| (key, rank as f64))
        .collect();

    Ok(Column::Numeric(
        (0..feature.len())
            .map(|row| {
                feature
                    .key_at(row)
                    .and_then(|k| codes.get(&k).copied())
                    .unwrap_or(f64::NAN)
            })
            .collect(),
    ))
}

// ============================================================================
// CHI-SQUARE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Chi2Outcome {
    pub statistic: f64,
    pub dof: usize,
    /// Chi-square quantile at the configured confidence
    pub critical: f64,
    pub p_value: f64,
    pub significant: bool,
}

/// Pearson chi-square test of independence between `column` and `target`.
///
/// Rows missing either value are ignored. Yates' continuity correction is
/// applied for 2x2 tables.
pub fn chi2_test(
    table: &Table,
    column: &str,
    target: &str,
    confidence: f64,
) -> PipelineResult<Chi2Outcome> {
    let feature = table.column(column)?;
    let outcome = table.column(target)?;

    let mut counts: BTreeMap<Key, BTreeMap<Key, f64>> = BTreeMap::new();
    let mut target_levels: BTreeMap<Key, f64> = BTreeMap::new();
    for row in 0..table.n_rows() {
        if let (Some(f), Some(t)) = (feature.key_at(row), outcome.key_at(row)) {
            *counts.entry(f).or_default().entry(t.clone()).or_default() += 1.0;
            *target_levels.entry(t).or_default() += 1.0;
        }
    }

    let degenerate = |reason: String| PipelineError::DegenerateTable {
        column: column.to_string(),
        reason,
    };
    if counts.len() < 2 || target_levels.len() < 2 {
        return Err(degenerate(format!(
            "{} feature levels x {} target levels",
            counts.len(),
            target_levels.len()
        )));
    }

    let total: f64 = target_levels.values().sum();
    let dof = (counts.len() - 1) * (target_levels.len() - 1);

    let mut statistic = 0.0;
    for row in counts.values() {
        let row_total: f64 = row.values().sum();
        for (level, col_total) in &target_levels {
            let observed = row.get(level).copied().unwrap_or(0.0);
            let expected = row_total * col_total / total;
            if expected <= 0.0 {
                return Err(degenerate(format!("zero expected frequency for {}", level)));
            }
            let mut diff = (observed - expected).abs();
            if dof == 1 {
                diff -= diff.min(0.5);
            }
            statistic += diff * diff / expected;
        }
    }

    let distribution = ChiSquared::new(dof as f64)
        .map_err(|e| PipelineError::InvalidParameter(e.to_string()))?;
    let critical = distribution.inverse_cdf(confidence);
    let p_value = 1.0 - distribution.cdf(statistic);

    Ok(Chi2Outcome {
        statistic,
        dof,
        critical,
        p_value,
        significant: statistic >= critical,
    })
}

// ============================================================================
// MANN-WHITNEY U
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MannWhitneyOutcome {
    /// U statistic of the first sample
    pub u: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Exact null distribution used instead of the normal approximation
    pub exact: bool,
}

/// Two-sided Mann-Whitney U test.
///
/// Uses the exact null distribution when the smaller sample has at most
/// `EXACT_MAX_SMALL_SAMPLE` values and there are no ties, otherwise the
/// tie-corrected normal approximation with continuity correction.
pub fn mann_whitney_u(x: &[f64], y: &[f64]) -> PipelineResult<MannWhitneyOutcome> {
    if x.is_empty() || y.is_empty() {
        return Err(PipelineError::EmptySample("mann-whitney".to_string()));
    }

    let n1 = x.len();
    let n2 = y.len();
    let combined: Vec<f64> = x.iter().chain(y.iter()).copied().collect();
    let (ranks, tie_sizes) = average_ranks(&combined);

    let rank_sum_x: f64 = ranks[..n1].iter().sum();
    let u1 = rank_sum_x - (n1 * (n1 + 1)) as f64 / 2.0;
    let u2 = (n1 * n2) as f64 - u1;
    let u = u1.max(u2);
    let has_ties = tie_sizes.iter().any(|&t| t > 1);

    if n1.min(n2) <= EXACT_MAX_SMALL_SAMPLE && !has_ties {
        let p_value = (2.0 * exact_u_sf(n1, n2, u.round() as usize)).clamp(0.0, 1.0);
        return Ok(MannWhitneyOutcome {
            u: u1,
            p_value,
            exact: true,
        });
    }

    let n = (n1 + n2) as f64;
    let tie_term: f64 = tie_sizes
        .iter()
        .map(|&t| {
            let t = t as f64;
            t * t * t - t
        })
        .sum();
    let mu = (n1 * n2) as f64 / 2.0;
    let sigma = ((n1 * n2) as f64 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)))).sqrt();

    let p_value = if sigma > 0.0 {
        let z = (u - mu - 0.5) / sigma;
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| PipelineError::InvalidParameter(e.to_string()))?;
        (2.0 * (1.0 - normal.cdf(z))).clamp(0.0, 1.0)
    } else {
        1.0
    };

    Ok(MannWhitneyOutcome {
        u: u1,
        p_value,
        exact: false,
    })
}

/// Largest smaller-sample size still tested with the exact distribution
pub const EXACT_MAX_SMALL_SAMPLE: usize = 8;

/// 1-based average ranks plus the size of every tie block
pub(crate) fn average_ranks(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let ranks = Data::new(values.to_vec()).ranks(RankTieBreaker::Average);

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut tie_sizes = Vec::new();
    let mut start = 0;
    while start < sorted.len() {
        let end = start + sorted[start..].iter().take_while(|&&v| v == sorted[start]).count();
        tie_sizes.push(end - start);
        start = end;
    }
    (ranks, tie_sizes)
}

/// P(U >= u) under the null for sample sizes m and n, no ties.
///
/// The counts of U are the coefficients of the Gaussian binomial
/// prod_{i=1..s} (1 - q^(l+i)) / (1 - q^i), s = min(m, n), l = max(m, n).
/// U is symmetric around mn/2, so only the lower tail up to mn - u is expanded.
fn exact_u_sf(m: usize, n: usize, u: usize) -> f64 {
    let (small, large) = (m.min(n), m.max(n));
    let max_u = small * large;
    if u == 0 {
        return 1.0;
    }
    if u > max_u {
        return 0.0;
    }

    let upper = max_u - u;
    let mut counts = vec![0.0; upper + 1];
    counts[0] = 1.0;
    for i in 1..=small {
        // divide by (1 - q^i)
        for k in i..=upper {
            counts[k] += counts[k - i];
        }
        // multiply by (1 - q^(large + i))
        let shift = large + i;
        for k in (shift..=upper).rev() {
            counts[k] -= counts[k - shift];
        }
    }

    let total = binomial((m + n) as u64, small as u64);
    (counts.iter().sum::<f64>() / total).clamp(0.0, 1.0)
}

// ============================================================================
// BOOTSTRAP
// ============================================================================

/// Bootstrap interval for the difference of means (`b` minus `a`).
///
/// Each group's resampled means are sorted independently before the
/// element-wise difference is taken; the interval bounds are rounded to
/// three decimals.
pub fn bootstrap_mean_diff<R: Rng + ?Sized>(
    a: &[f64],
    b: &[f64],
    iterations: usize,
    alpha: f64,
    rng: &mut R,
) -> PipelineResult<(f64, f64)> {
    if a.is_empty() || b.is_empty() {
        return Err(PipelineError::EmptySample("bootstrap".to_string()));
    }
    if iterations == 0 || !(0.0..1.0).contains(&alpha) {
        return Err(PipelineError::InvalidParameter(format!(
            "bootstrap needs iterations > 0 and alpha in [0, 1), got {} and {}",
            iterations, alpha
        )));
    }

    let mut means_a = Vec::with_capacity(iterations);
    let mut means_b = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        means_a.push(resampled_mean(a, rng));
        means_b.push(resampled_mean(b, rng));
    }
    means_a.sort_by(f64::total_cmp);
    means_b.sort_by(f64::total_cmp);

    let mut diffs: Vec<f64> = means_b
        .iter()
        .zip(means_a.iter())
        .map(|(mb, ma)| mb - ma)
        .collect();
    diffs.sort_by(f64::total_cmp);

    let n = iterations as f64;
    let lower = ((n * alpha / 2.0).round_ties_even() as usize).min(iterations - 1);
    let upper = ((n * (1.0 - alpha / 2.0)).round_ties_even() as usize).min(iterations - 1);

    Ok((round3(diffs[lower]), round3(diffs[upper])))
}

fn resampled_mean<R: Rng + ?Sized>(values: &[f64], rng: &mut R) -> f64 {
    let sum: f64 = (0..values.len())
        .map(|_| values[rng.gen_range(0..values.len())])
        .sum();
    sum / values.len() as f64
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Whether a confidence interval of the mean difference shows a real effect.
///
/// The difference is treated as zero when the interval contains `margin`
/// or when either bound lies within `margin` of zero.
pub fn verdict(ci: (f64, f64), margin: f64) -> bool {
    let lower = ci.0.min(ci.1);
    let upper = ci.0.max(ci.1);
    if lower <= margin && margin <= upper {
        return false;
    }
    let abs_low = ci.0.abs().min(ci.1.abs());
    abs_low > margin
}

// ============================================================================
// SELECTION
// ============================================================================

/// Present values of `column` split by target value (0, 1)
pub fn split_by_target(
    table: &Table,
    column: &str,
    target: &str,
) -> PipelineResult<(Vec<f64>, Vec<f64>)> {
    let values = table.numeric(column)?;
    let targets = table.numeric(target)?;

    let mut negative = Vec::new();
    let mut positive = Vec::new();
    for (&v, &t) in values.iter().zip(targets.iter()) {
        if v.is_nan() {
            continue;
        }
        if t == 0.0 {
            negative.push(v);
        } else if t == 1.0 {
            positive.push(v);
        }
    }
    Ok((negative, positive))
}

/// How numeric columns are tested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericTest {
    Bootstrap,
    MannWhitney,
}

/// Run the per-group tests and return the significant columns in group order.
///
/// Binary columns go through chi-square, categorical columns are ordinal
/// encoded first, numeric columns use `numeric_test`. Each test only sees the
/// rows where its feature is present. A feature whose test cannot be
/// computed is dropped with a warning.
pub fn select_significant_features<R: Rng + ?Sized>(
    table: &Table,
    target: &str,
    groups: &FeatureGroups,
    numeric_test: NumericTest,
    config: &SignificanceConfig,
    rng: &mut R,
) -> PipelineResult<Vec<String>> {
    let mut selected = Vec::new();

    for column in &groups.binary {
        let present = table.drop_missing_in(column)?;
        if keep_or_skip(column, chi2_significant(&present, column, target, config))? {
            selected.push(column.clone());
        }
    }

    for column in &groups.categorical {
        let mut present = table.drop_missing_in(column)?;
        let encoded = ordinal_encode(&present, column, target)?;
        present.add_column(column.as_str(), encoded)?;
        if keep_or_skip(column, chi2_significant(&present, column, target, config))? {
            selected.push(column.clone());
        }
    }

    for column in &groups.numeric {
        let present = table.drop_missing_in(column)?;
        let (negative, positive) = split_by_target(&present, column, target)?;

        let outcome = match numeric_test {
            NumericTest::Bootstrap => bootstrap_mean_diff(
                &negative,
                &positive,
                config.bootstrap_iterations,
                config.bootstrap_alpha,
                rng,
            )
            .map(|ci| {
                debug!(column = %column, lower = ci.0, upper = ci.1, "bootstrap interval");
                verdict(ci, config.ci_zero_margin)
            }),
            NumericTest::MannWhitney => mann_whitney_u(&negative, &positive).map(|mw| {
                debug!(column = %column, u = mw.u, p = mw.p_value, "mann-whitney");
                mw.p_value < config.mann_whitney_alpha
            }),
        };

        if keep_or_skip(column, outcome)? {
            selected.push(column.clone());
        }
    }

    info!(
        tested = groups.len(),
        selected = selected.len(),
        "feature significance done"
    );
    Ok(selected)
}

fn chi2_significant(
    table: &Table,
    column: &str,
    target: &str,
    config: &SignificanceConfig,
) -> PipelineResult<bool> {
    let outcome = chi2_test(table, column, target, config.chi2_confidence)?;
    debug!(
        column = %column,
        statistic = outcome.statistic,
        critical = outcome.critical,
        dof = outcome.dof,
        "chi-square"
    );
    Ok(outcome.significant)
}

fn keep_or_skip(column: &str, outcome: PipelineResult<bool>) -> PipelineResult<bool> {
    match outcome {
        Ok(keep) => Ok(keep),
        Err(e @ (PipelineError::DegenerateTable { .. } | PipelineError::EmptySample(_))) => {
            warn!(column = %column, error = %e, "feature skipped");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// 40 borrowers, first 20 defaulted
    fn scoring_table() -> Table {
        let target: Vec<f64> = (0..40).map(|i| if i < 20 { 1.0 } else { 0.0 }).collect();
        let flag_strong: Vec<Option<&str>> = (0..40)
            .map(|i| Some(if i < 18 || i >= 38 { "Y" } else { "N" }))
            .collect();
        let flag_noise: Vec<Option<&str>> = (0..40)
            .map(|i| Some(if i % 2 == 0 { "Y" } else { "N" }))
            .collect();
        let name_strong: Vec<Option<&str>> = (0..40)
            .map(|i| {
                Some(match i {
                    0..=14 => "A",
                    15..=19 => "C",
                    20..=34 => "B",
                    _ => "C",
                })
            })
            .collect();
        let amt_strong: Vec<f64> = (0..40)
            .map(|i| if i < 20 { 100.0 + i as f64 } else { i as f64 - 20.0 })
            .collect();
        let amt_noise: Vec<f64> = (0..40).map(|i| (i % 4) as f64).collect();

        Table::from_columns(vec![
            ("SK_ID_CURR", Column::Numeric((0..40).map(|i| 100000.0 + i as f64).collect())),
            ("TARGET", Column::Numeric(target)),
            ("FLAG_STRONG", Column::text_from(&flag_strong)),
            ("FLAG_NOISE", Column::text_from(&flag_noise)),
            ("NAME_STRONG", Column::text_from(&name_strong)),
            ("AMT_STRONG", Column::Numeric(amt_strong)),
            ("AMT_NOISE", Column::Numeric(amt_noise)),
        ])
        .unwrap()
    }

    #[test]
    fn test_classify_features() {
        let groups = classify_features(&scoring_table(), TARGET, &["SK_ID_CURR", TARGET]);

        assert_eq!(groups.binary, vec!["FLAG_STRONG", "FLAG_NOISE"]);
        assert_eq!(groups.categorical, vec!["NAME_STRONG"]);
        assert_eq!(groups.numeric, vec!["AMT_STRONG", "AMT_NOISE"]);
    }

    #[test]
    fn test_ordinal_encode_orders_by_target_mean() {
        let table = scoring_table();
        let encoded = ordinal_encode(&table, "NAME_STRONG", TARGET).unwrap();

        // B has mean 0, C has 0.5, A has 1
        if let Column::Numeric(codes) = encoded {
            assert_eq!(codes[0], 2.0);
            assert_eq!(codes[16], 1.0);
            assert_eq!(codes[25], 0.0);
        } else {
            panic!("Expected numeric codes");
        }
    }

    #[test]
    fn test_chi2_with_yates_correction() {
        // Y: 10 good / 30 bad, N: 35 good / 5 bad
        let flag: Vec<Option<&str>> = (0..80).map(|i| Some(if i < 40 { "Y" } else { "N" })).collect();
        let target: Vec<f64> = (0..80)
            .map(|i| match i {
                0..=9 => 0.0,
                10..=39 => 1.0,
                40..=74 => 0.0,
                _ => 1.0,
            })
            .collect();
        let table = Table::from_columns(vec![
            ("FLAG", Column::text_from(&flag)),
            ("TARGET", Column::Numeric(target)),
        ])
        .unwrap();

        let outcome = chi2_test(&table, "FLAG", TARGET, 0.95).unwrap();

        assert_eq!(outcome.dof, 1);
        assert!((outcome.statistic - 29.257).abs() < 0.01);
        assert!((outcome.critical - 3.841).abs() < 0.01);
        assert!(outcome.significant);
        assert!(outcome.p_value < 0.001);
    }

    #[test]
    fn test_chi2_independent_is_not_significant() {
        let table = scoring_table();
        let outcome = chi2_test(&table, "FLAG_NOISE", TARGET, 0.95).unwrap();

        assert_eq!(outcome.statistic, 0.0);
        assert!(!outcome.significant);
    }

    #[test]
    fn test_chi2_single_level_is_degenerate() {
        let table = Table::from_columns(vec![
            ("FLAG", Column::text_from(&[Some("Y"), Some("Y"), Some("Y")])),
            ("TARGET", Column::Numeric(vec![0.0, 1.0, 0.0])),
        ])
        .unwrap();

        let err = chi2_test(&table, "FLAG", TARGET, 0.95).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateTable { .. }));
    }

    #[test]
    fn test_mann_whitney_exact_small_samples() {
        let outcome = mann_whitney_u(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]).unwrap();

        assert!(outcome.exact);
        assert_eq!(outcome.u, 0.0);
        assert!((outcome.p_value - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_mann_whitney_exact_with_unbalanced_samples() {
        let x = [8.0, 9.0];
        let y: Vec<f64> = (0..8).map(|v| v as f64).collect();

        let outcome = mann_whitney_u(&x, &y).unwrap();

        // U = 16 is the single most extreme of C(10, 2) = 45 orderings
        assert!(outcome.exact);
        assert_eq!(outcome.u, 16.0);
        assert!((outcome.p_value - 2.0 / 45.0).abs() < 1e-12);
        assert!(outcome.p_value < 0.05);
    }

    #[test]
    fn test_mann_whitney_exact_when_only_one_side_is_small() {
        let x = [0.5, 30.5, 40.5];
        let y: Vec<f64> = (0..40).map(|v| v as f64).collect();

        let outcome = mann_whitney_u(&x, &y).unwrap();
        assert!(outcome.exact);
        assert!(outcome.p_value > 0.05 && outcome.p_value <= 1.0);

        let large: Vec<f64> = (0..9).map(|v| v as f64 + 0.5).collect();
        assert!(!mann_whitney_u(&large, &y).unwrap().exact);
    }

    #[test]
    fn test_exact_u_tail_matches_enumeration() {
        // every placement of 3 x-values among 7 positions
        let (m, n) = (3usize, 4usize);
        let mut freq = vec![0usize; m * n + 1];
        for mask in 0u32..(1 << (m + n)) {
            if mask.count_ones() as usize != m {
                continue;
            }
            let mut ys_below = 0;
            let mut u = 0;
            for position in 0..(m + n) {
                if mask & (1 << position) != 0 {
                    u += ys_below;
                } else {
                    ys_below += 1;
                }
            }
            freq[u] += 1;
        }
        let total: usize = freq.iter().sum();

        for u in 0..=(m * n + 1) {
            let expected = freq.iter().skip(u).sum::<usize>() as f64 / total as f64;
            assert!((exact_u_sf(m, n, u) - expected).abs() < 1e-12, "u = {}", u);
            assert!((exact_u_sf(n, m, u) - expected).abs() < 1e-12, "u = {}", u);
        }
    }

    #[test]
    fn test_average_ranks_share_tied_positions() {
        let (ranks, ties) = average_ranks(&[10.0, 20.0, 10.0, 30.0]);
        assert_eq!(ranks, vec![1.5, 3.0, 1.5, 4.0]);
        assert_eq!(ties, vec![2, 1, 1]);
    }

    #[test]
    fn test_mann_whitney_normal_approximation_with_ties() {
        let x = [1.0, 2.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let y: Vec<f64> = (10..20).map(|v| v as f64).collect();

        let outcome = mann_whitney_u(&x, &y).unwrap();

        assert!(!outcome.exact);
        assert_eq!(outcome.u, 0.0);
        assert!((outcome.p_value - 0.000182).abs() < 0.00002);
    }

    #[test]
    fn test_mann_whitney_identical_samples() {
        let outcome = mann_whitney_u(&[3.0; 10], &[3.0; 12]).unwrap();
        assert_eq!(outcome.p_value, 1.0);
    }

    #[test]
    fn test_mann_whitney_empty_sample() {
        assert!(matches!(
            mann_whitney_u(&[], &[1.0]),
            Err(PipelineError::EmptySample(_))
        ));
    }

    #[test]
    fn test_bootstrap_separated_groups() {
        let mut rng = StdRng::seed_from_u64(42);
        let ci = bootstrap_mean_diff(&[0.0; 30], &[10.0; 30], 1000, 0.05, &mut rng).unwrap();

        assert_eq!(ci, (10.0, 10.0));
        assert!(verdict(ci, 0.001));
    }

    #[test]
    fn test_bootstrap_same_distribution_is_narrow() {
        let mut rng = StdRng::seed_from_u64(7);
        let data: Vec<f64> = (1..=50).map(|v| v as f64).collect();
        let ci = bootstrap_mean_diff(&data, &data, 1000, 0.05, &mut rng).unwrap();

        assert!(ci.0 <= ci.1);
        assert!(ci.0.abs() < 1.5 && ci.1.abs() < 1.5);
    }

    #[test]
    fn test_bootstrap_rejects_bad_parameters() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(bootstrap_mean_diff(&[1.0], &[2.0], 0, 0.05, &mut rng).is_err());
        assert!(bootstrap_mean_diff(&[], &[2.0], 10, 0.05, &mut rng).is_err());
    }

    #[test]
    fn test_verdict_rules() {
        assert!(verdict((0.5, 1.2), 0.001));
        assert!(verdict((-2.0, -1.0), 0.001));
        assert!(!verdict((-0.3, 0.4), 0.001));
        assert!(!verdict((0.0005, 0.8), 0.001));
        assert!(!verdict((-0.8, -0.0002), 0.001));
    }

    #[test]
    fn test_select_with_mann_whitney() {
        let table = scoring_table();
        let groups = classify_features(&table, TARGET, &["SK_ID_CURR"]);
        let mut rng = StdRng::seed_from_u64(42);

        let selected = select_significant_features(
            &table,
            TARGET,
            &groups,
            NumericTest::MannWhitney,
            &SignificanceConfig::default(),
            &mut rng,
        )
        .unwrap();

        assert_eq!(selected, vec!["FLAG_STRONG", "NAME_STRONG", "AMT_STRONG"]);
    }

    #[test]
    fn test_select_with_bootstrap_keeps_shifted_numeric() {
        let table = scoring_table();
        let groups = classify_features(&table, TARGET, &["SK_ID_CURR"]);
        let mut rng = StdRng::seed_from_u64(42);

        let selected = select_significant_features(
            &table,
            TARGET,
            &groups,
            NumericTest::Bootstrap,
            &SignificanceConfig::default(),
            &mut rng,
        )
        .unwrap();

        assert!(selected.contains(&"AMT_STRONG".to_string()));
        assert!(!selected.contains(&"FLAG_NOISE".to_string()));
    }

    #[test]
    fn test_degenerate_feature_is_skipped_not_fatal() {
        let table = Table::from_columns(vec![
            ("TARGET", Column::Numeric(vec![0.0, 1.0, 0.0, 1.0])),
            ("ONLY_ONE", Column::text_from(&[Some("x"), None, None, None])),
        ])
        .unwrap();
        let groups = FeatureGroups {
            binary: Vec::new(),
            categorical: vec!["ONLY_ONE".to_string()],
            numeric: Vec::new(),
        };
        let mut rng = StdRng::seed_from_u64(0);

        let selected = select_significant_features(
            &table,
            TARGET,
            &groups,
            NumericTest::MannWhitney,
            &SignificanceConfig::default(),
            &mut rng,
        )
        .unwrap();

        assert!(selected.is_empty());
    }
}
