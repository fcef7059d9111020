// 🧾 Installments Payments Features
// Lateness and underpayment signals per installment, averaged per borrower.

use super::{broadcast, pick, zip_with, SK_ID_CURR, SK_ID_PREV};
use crate::agg::Agg;
use crate::error::PipelineResult;
use crate::table::Table;

pub fn build_installments_payments_features(payments: &Table) -> PipelineResult<Table> {
    let rows = payments_row_features(payments)?;
    let feature_names: Vec<String> = rows.column_names()[2..].to_vec();

    rows.aggregate_by(SK_ID_CURR, &feature_names, Agg::Mean)
}

/// Row-level features, prefixed by SK_ID_PREV and SK_ID_CURR
fn payments_row_features(payments: &Table) -> PipelineResult<Table> {
    let n = payments.n_rows();
    let due_day = payments.numeric("DAYS_INSTALMENT")?;
    let paid_day = payments.numeric("DAYS_ENTRY_PAYMENT")?;
    let due_amount = payments.numeric("AMT_INSTALMENT")?;
    let paid_amount = payments.numeric("AMT_PAYMENT")?;

    let mut out = payments.select(&[SK_ID_PREV, SK_ID_CURR])?;

    let payment_ratio = zip_with(paid_amount, due_amount, |p, d| p / d);
    let flag_dpd: Vec<f64> = zip_with(paid_day, due_day, |p, d| if p > d { 1.0 } else { 0.0 });
    let flag_debt: Vec<f64> = payment_ratio.iter().map(|&r| underpaid(r)).collect();

    let borrowers = payments.group_by(SK_ID_CURR)?;
    let versions = payments.numeric("NUM_INSTALMENT_VERSION")?;
    let instalment_change = broadcast(&borrowers, n, |rows| {
        if Agg::Nunique.apply(&pick(versions, rows)) > 1.0 {
            1.0
        } else {
            0.0
        }
    });

    let loans = payments.group_by(SK_ID_PREV)?;
    let share = |flags: &[f64]| broadcast(&loans, n, |rows| Agg::Mean.apply(&pick(flags, rows)));
    let ratio_dpd = share(&flag_dpd[..]);
    let ratio_debt = share(&flag_debt[..]);

    out.add_numeric("DIFF_DAYS", zip_with(due_day, paid_day, |d, p| d - p))?;
    out.add_numeric("PAYMENT_RATIO", payment_ratio)?;
    out.add_numeric("FLAG_DPD", flag_dpd)?;
    out.add_numeric("FLAG_DEBT", flag_debt)?;
    out.add_numeric("INSTALMENT_CHANGE", instalment_change)?;
    out.add_numeric("RATIO_DPD", ratio_dpd)?;
    out.add_numeric("RATIO_DEBT", ratio_debt)?;
    Ok(out)
}

/// 1 when less than the installment was paid, 0 otherwise, NaN when unknown
fn underpaid(payment_ratio: f64) -> f64 {
    if payment_ratio.is_nan() {
        f64::NAN
    } else if payment_ratio < 1.0 {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn payments() -> Table {
        Table::from_columns(vec![
            ("SK_ID_PREV", Column::Numeric(vec![5.0, 5.0, 6.0, 7.0])),
            ("SK_ID_CURR", Column::Numeric(vec![1.0, 1.0, 1.0, 2.0])),
            ("NUM_INSTALMENT_VERSION", Column::Numeric(vec![1.0, 2.0, 1.0, 1.0])),
            ("DAYS_INSTALMENT", Column::Numeric(vec![-100.0, -70.0, -40.0, -10.0])),
            ("DAYS_ENTRY_PAYMENT", Column::Numeric(vec![-105.0, -60.0, -40.0, f64::NAN])),
            ("AMT_INSTALMENT", Column::Numeric(vec![100.0, 100.0, 200.0, 50.0])),
            ("AMT_PAYMENT", Column::Numeric(vec![100.0, 50.0, 250.0, f64::NAN])),
        ])
        .unwrap()
    }

    #[test]
    fn test_row_level_flags() {
        let out = payments_row_features(&payments()).unwrap();

        assert_eq!(out.numeric("DIFF_DAYS").unwrap()[..3], [5.0, -10.0, 0.0]);
        assert_eq!(out.numeric("FLAG_DPD").unwrap(), &[0.0, 1.0, 0.0, 0.0]);

        let debt = out.numeric("FLAG_DEBT").unwrap();
        assert_eq!(debt[..3], [0.0, 1.0, 0.0]);
        assert!(debt[3].is_nan());
    }

    #[test]
    fn test_loan_and_borrower_level_shares() {
        let out = payments_row_features(&payments()).unwrap();

        assert_eq!(out.numeric("INSTALMENT_CHANGE").unwrap(), &[1.0, 1.0, 1.0, 0.0]);
        assert_eq!(out.numeric("RATIO_DPD").unwrap(), &[0.5, 0.5, 0.0, 0.0]);
        let ratio_debt = out.numeric("RATIO_DEBT").unwrap();
        assert_eq!(ratio_debt[..3], [0.5, 0.5, 0.0]);
        assert!(ratio_debt[3].is_nan());
    }

    #[test]
    fn test_mean_per_borrower() {
        let out = build_installments_payments_features(&payments()).unwrap();

        assert_eq!(
            out.column_names(),
            &[
                "SK_ID_CURR",
                "DIFF_DAYS",
                "PAYMENT_RATIO",
                "FLAG_DPD",
                "FLAG_DEBT",
                "INSTALMENT_CHANGE",
                "RATIO_DPD",
                "RATIO_DEBT",
            ]
        );
        assert_eq!(out.numeric("FLAG_DPD").unwrap(), &[1.0 / 3.0, 0.0]);
        assert!((out.numeric("PAYMENT_RATIO").unwrap()[0] - 2.75 / 3.0).abs() < 1e-12);
        assert!(out.numeric("PAYMENT_RATIO").unwrap()[1].is_nan());
    }
}
