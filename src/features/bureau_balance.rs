// 📅 Bureau Balance Features
// Monthly status history of bureau credits, rolled up to the borrower.
//
// STATUS codes: 0 = no DPD, 1..5 = DPD buckets (5 also means sold or written
// off), C = closed, X = unknown.

use super::{cell_label, SK_ID_BUREAU, SK_ID_CURR};
use crate::agg::Agg;
use crate::error::PipelineResult;
use crate::table::Table;

const OPEN_STATUSES: [&str; 6] = ["0", "1", "2", "3", "4", "5"];
const CLOSED_STATUS: &str = "C";
const UNKNOWN_STATUS: &str = "X";

/// Per-status counters, in STATUS order 0..5
const STATUS_COLUMNS: [&str; 6] = [
    "NO_DPD",
    "DPD_30",
    "DPD_60",
    "DPD_90",
    "DPD_120",
    "DPD_120+_OR_SOLD",
];

pub fn build_bureau_balance_features(
    bureau_balance: &Table,
    bureau: &Table,
) -> PipelineResult<Table> {
    let per_bureau = per_bureau_features(bureau_balance)?;
    let feature_names: Vec<String> = per_bureau.column_names()[1..].to_vec();

    let owners = bureau.select(&[SK_ID_BUREAU, SK_ID_CURR])?;
    let attached = per_bureau.inner_join(&owners, SK_ID_BUREAU)?;

    attached.aggregate_by(SK_ID_CURR, &feature_names, Agg::Sum)
}

/// One row per SK_ID_BUREAU
pub fn per_bureau_features(bureau_balance: &Table) -> PipelineResult<Table> {
    let credits = bureau_balance.group_by(SK_ID_BUREAU)?;
    let status_column = bureau_balance.column("STATUS")?;
    let months = bureau_balance.numeric("MONTHS_BALANCE")?;
    let status: Vec<Option<String>> = (0..bureau_balance.n_rows())
        .map(|r| cell_label(status_column, r))
        .collect();

    let count_status = |rows: &[usize], code: &str| {
        rows.iter()
            .filter(|&&r| status[r].as_deref() == Some(code))
            .count() as f64
    };

    let mut out = Table::new();
    let firsts: Vec<usize> = credits.values().map(|rows| rows[0]).collect();
    out.add_column(SK_ID_BUREAU, bureau_balance.column(SK_ID_BUREAU)?.take(&firsts))?;

    let per_status: Vec<Vec<f64>> = OPEN_STATUSES
        .iter()
        .map(|code| credits.values().map(|rows| count_status(rows, code)).collect())
        .collect();
    let open: Vec<f64> = (0..credits.len())
        .map(|i| per_status.iter().map(|counts| counts[i]).sum())
        .collect();
    let closed: Vec<f64> = credits
        .values()
        .map(|rows| count_status(rows, CLOSED_STATUS))
        .collect();
    let all: Vec<f64> = credits.values().map(|rows| rows.len() as f64).collect();

    out.add_numeric("COUNT_OPEN_CREDITS", open.clone())?;
    out.add_numeric("COUNT_CLOSED_CREDITS", closed.clone())?;
    for (name, counts) in STATUS_COLUMNS.iter().zip(&per_status) {
        out.add_numeric(*name, counts.clone())?;
    }
    out.add_numeric("COUNT_ALL_CREDIT", all.clone())?;
    out.add_numeric(
        "CLOSED_CREDIT_RATIO",
        closed.iter().zip(&all).map(|(c, a)| c / a).collect(),
    )?;
    out.add_numeric(
        "OPEN_CREDIT_RATIO",
        open.iter().zip(&all).map(|(o, a)| o / a).collect(),
    )?;

    // DPD shares exclude the no-DPD bucket
    let dpd = &per_status[1..];
    let dpd_total: Vec<f64> = (0..credits.len())
        .map(|i| dpd.iter().map(|counts| counts[i]).sum())
        .collect();
    for (name, counts) in STATUS_COLUMNS[1..].iter().zip(dpd) {
        let ratio = counts
            .iter()
            .zip(&dpd_total)
            .map(|(c, t)| {
                let r = c / t;
                if r.is_nan() {
                    0.0
                } else {
                    r
                }
            })
            .collect();
        out.add_numeric(format!("{}_RATIO", name), ratio)?;
    }

    let last_closed = credits
        .values()
        .map(|rows| {
            let closed_months: Vec<f64> = rows
                .iter()
                .filter(|&&r| status[r].as_deref() == Some(CLOSED_STATUS))
                .map(|&r| months[r])
                .collect();
            Agg::Max.apply(&closed_months)
        })
        .collect();
    out.add_numeric("INTERVAL_LAST_CLOSED_CREDIT", last_closed)?;

    let last_open = credits
        .values()
        .map(|rows| {
            let active_last_month = rows.iter().any(|&r| {
                months[r] == -1.0
                    && !matches!(
                        status[r].as_deref(),
                        Some(CLOSED_STATUS) | Some(UNKNOWN_STATUS)
                    )
            });
            if active_last_month {
                Agg::Min.apply(&rows.iter().map(|&r| months[r]).collect::<Vec<_>>())
            } else {
                f64::NAN
            }
        })
        .collect();
    out.add_numeric("INTERVAL_LAST_OPEN_CREDIT", last_open)?;

    Ok(out)
}
