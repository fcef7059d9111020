// 🏦 Bureau Features
// Debt extremes, overdue share and per-credit-type counters per borrower.

use super::{cell_label, group_key_column, pick, SK_ID_CURR};
use crate::agg::Agg;
use crate::error::PipelineResult;
use crate::table::Table;
use std::collections::BTreeSet;

const ACTIVE: &str = "Active";

pub fn build_bureau_features(bureau: &Table) -> PipelineResult<Table> {
    let borrowers = bureau.group_by(SK_ID_CURR)?;
    let debt = bureau.numeric("AMT_CREDIT_SUM_DEBT")?;
    let credit_sum = bureau.numeric("AMT_CREDIT_SUM")?;
    let status = bureau.column("CREDIT_ACTIVE")?;
    let credit_type = bureau.column("CREDIT_TYPE")?;
    let day_overdue = bureau.numeric("CREDIT_DAY_OVERDUE")?;
    let enddate_fact = bureau.numeric("DAYS_ENDDATE_FACT")?;

    let mut out = Table::new();
    out.add_column(SK_ID_CURR, group_key_column(bureau, SK_ID_CURR, &borrowers)?)?;

    let max_debt = borrowers.values().map(|rows| Agg::Max.apply(&pick(debt, rows)));
    let min_debt = borrowers.values().map(|rows| Agg::Min.apply(&pick(debt, rows)));
    out.add_numeric("MAX_DEBT_AMT", max_debt.collect())?;
    out.add_numeric("MIN_DEBT_AMT", min_debt.collect())?;

    let overdue_ratio = borrowers
        .values()
        .map(|rows| {
            let ratios: Vec<f64> = rows
                .iter()
                .filter(|&&r| cell_label(status, r).as_deref() == Some(ACTIVE))
                .map(|&r| debt[r] / credit_sum[r])
                .collect();
            Agg::Max.apply(&ratios)
        })
        .collect();
    out.add_numeric("OVERDUE_RATIO", overdue_ratio)?;

    let types: Vec<Option<String>> = (0..bureau.n_rows())
        .map(|r| cell_label(credit_type, r))
        .collect();
    let distinct: BTreeSet<&str> = types.iter().flatten().map(String::as_str).collect();

    let overdue = |r: usize| day_overdue[r] > 0.0;
    let closed = |r: usize| !enddate_fact[r].is_nan();
    let counters: [(&str, &dyn Fn(usize) -> bool); 3] = [
        ("count_", &|_: usize| true),
        ("count_overdue_", &overdue),
        ("count_closed_", &closed),
    ];
    for (prefix, flagged) in counters {
        for kind in &distinct {
            let counts = borrowers
                .values()
                .map(|rows| {
                    rows.iter()
                        .filter(|&&r| types[r].as_deref() == Some(*kind) && flagged(r))
                        .count() as f64
                })
                .collect();
            out.add_numeric(format!("{}{}", prefix, kind), counts)?;
        }
    }

    Ok(out)
}
