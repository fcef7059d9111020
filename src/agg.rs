// 📊 Aggregations - NaN-skipping column reductions
// Used by the group-by feature builders.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};
use std::collections::HashSet;

/// Aggregation applied to one group of numeric values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Agg {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    /// Sample standard deviation (ddof = 1)
    Std,
    /// Sample variance (ddof = 1)
    Var,
    Prod,
    Count,
    Nunique,
}

impl Agg {
    /// Suffix used in generated column names, e.g. `AMT_BALANCE_sum`
    pub fn name(&self) -> &'static str {
        match self {
            Agg::Sum => "sum",
            Agg::Mean => "mean",
            Agg::Median => "median",
            Agg::Min => "min",
            Agg::Max => "max",
            Agg::Std => "std",
            Agg::Var => "var",
            Agg::Prod => "prod",
            Agg::Count => "count",
            Agg::Nunique => "nunique",
        }
    }

    /// Apply to `values`, ignoring NaN.
    ///
    /// With no present values Sum is 0, Prod is 1, Count and Nunique are 0
    /// and everything else is NaN.
    pub fn apply(&self, values: &[f64]) -> f64 {
        let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        let n = present.len();

        match self {
            Agg::Sum => present.iter().sum(),
            Agg::Prod => present.iter().product(),
            Agg::Count => n as f64,
            Agg::Nunique => present
                .iter()
                .map(|v| v.to_bits())
                .collect::<HashSet<_>>()
                .len() as f64,
            _ if n == 0 => f64::NAN,
            Agg::Mean => present.iter().mean(),
            Agg::Min => Statistics::min(present.iter()),
            Agg::Max => Statistics::max(present.iter()),
            Agg::Median => Data::new(present).median(),
            // statrs gives NaN below two values
            Agg::Var => present.iter().variance(),
            Agg::Std => present.iter().std_dev(),
        }
    }
}

/// Arithmetic mean of present values (NaN when none)
pub fn mean(values: &[f64]) -> f64 {
    Agg::Mean.apply(values)
}
