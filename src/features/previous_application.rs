// 📂 Previous Application Features
// Ratios of earlier Home Credit applications plus per-application amount aggregates.

use super::{broadcast, cell_label, pick, zip_with, SK_ID_CURR, SK_ID_PREV};
use crate::agg::Agg;
use crate::error::PipelineResult;
use crate::table::Table;

const AGGREGATIONS: [Agg; 6] = [Agg::Sum, Agg::Mean, Agg::Median, Agg::Min, Agg::Max, Agg::Prod];
const AMOUNTS: [&str; 2] = ["AMT_CREDIT", "AMT_GOODS_PRICE"];
const APPROVED: &str = "Approved";

pub fn build_previous_application_features(previous: &Table) -> PipelineResult<Table> {
    let n = previous.n_rows();
    let application = previous.numeric("AMT_APPLICATION")?;
    let credit = previous.numeric("AMT_CREDIT")?;
    let goods = previous.numeric("AMT_GOODS_PRICE")?;
    let down_payment = previous.numeric("AMT_DOWN_PAYMENT")?;
    let contract_status = previous.column("NAME_CONTRACT_STATUS")?;

    let mut rows = previous.select(&[SK_ID_CURR, SK_ID_PREV])?;
    rows.add_numeric(
        "AMT_APPLICATION_PER_AMT_CREDIT",
        zip_with(application, credit, |a, c| a / c),
    )?;
    rows.add_numeric("AMT_CREDIT_PER_AMT_GOODS", zip_with(credit, goods, |c, g| c / g))?;

    let approved: Vec<f64> = (0..n)
        .map(|r| match cell_label(contract_status, r).as_deref() {
            Some(APPROVED) => 1.0,
            _ => 0.0,
        })
        .collect();
    let borrowers = previous.group_by(SK_ID_CURR)?;
    rows.add_numeric(
        "APPROVAL_RATIO",
        broadcast(&borrowers, n, |group| Agg::Mean.apply(&pick(&approved, group))),
    )?;
    rows.add_numeric(
        "AMT_DOWNPAYMENT_TO_CREDIT_RATIO",
        zip_with(down_payment, credit, |d, c| d / c),
    )?;

    let applications = previous.group_by(SK_ID_PREV)?;
    for amount in AMOUNTS {
        let values = previous.numeric(amount)?;
        for agg in AGGREGATIONS {
            let per_application =
                broadcast(&applications, n, |group| agg.apply(&pick(values, group)));
            rows.add_numeric(format!("{}_{}", amount, agg.name()), per_application)?;
        }
    }

    // applications without an id have no aggregates
    let rows = rows.drop_missing_in(SK_ID_PREV)?;
    let feature_names: Vec<String> = rows.column_names()[2..].to_vec();
    rows.aggregate_by(SK_ID_CURR, &feature_names, Agg::Sum)
}
