// 💳 Credit Card Balance Features
// Per-card aggregates over the full history and the last three months.

use super::{group_key_column, pick, SK_ID_CURR, SK_ID_PREV};
use crate::agg::Agg;
use crate::error::PipelineResult;
use crate::table::Table;

const AGGREGATIONS: [Agg; 8] = [
    Agg::Sum,
    Agg::Mean,
    Agg::Median,
    Agg::Min,
    Agg::Max,
    Agg::Std,
    Agg::Var,
    Agg::Prod,
];

const AMOUNTS: [&str; 2] = ["AMT_BALANCE", "AMT_CREDIT_LIMIT_ACTUAL"];

/// First month (relative to the application) of the recent window
const RECENT_MONTHS_FROM: f64 = -3.0;

pub fn build_credit_card_balance_features(cards: &Table) -> PipelineResult<Table> {
    let per_card = per_card_features(cards)?;
    let feature_names: Vec<String> = per_card
        .column_names()
        .iter()
        .filter(|name| name.as_str() != SK_ID_CURR && name.as_str() != SK_ID_PREV)
        .cloned()
        .collect();

    per_card.aggregate_by(SK_ID_CURR, &feature_names, Agg::Sum)
}

/// One row per SK_ID_PREV: all-time aggregates, then all-time / recent ratios
fn per_card_features(cards: &Table) -> PipelineResult<Table> {
    let groups = cards.group_by(SK_ID_PREV)?;
    let months = cards.numeric("MONTHS_BALANCE")?;

    let mut out = Table::new();
    out.add_column(SK_ID_PREV, group_key_column(cards, SK_ID_PREV, &groups)?)?;
    out.add_column(SK_ID_CURR, group_key_column(cards, SK_ID_CURR, &groups)?)?;

    let recent: Vec<Vec<usize>> = groups
        .values()
        .map(|rows| {
            rows.iter()
                .copied()
                .filter(|&r| months[r] >= RECENT_MONTHS_FROM)
                .collect()
        })
        .collect();

    let mut ratios = Vec::new();
    for amount in AMOUNTS {
        let values = cards.numeric(amount)?;
        for agg in AGGREGATIONS {
            let name = format!("{}_{}", amount, agg.name());
            let all_time: Vec<f64> = groups
                .values()
                .map(|rows| agg.apply(&pick(values, rows)))
                .collect();
            // cards without recent months have no ratio
            let ratio = all_time
                .iter()
                .zip(&recent)
                .map(|(total, rows)| {
                    if rows.is_empty() {
                        f64::NAN
                    } else {
                        total / agg.apply(&pick(values, rows))
                    }
                })
                .collect();

            ratios.push((format!("{}_diff", name), ratio));
            out.add_numeric(name, all_time)?;
        }
    }
    for (name, ratio) in ratios {
        out.add_numeric(name, ratio)?;
    }

    Ok(out)
}
