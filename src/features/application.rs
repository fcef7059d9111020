// 🏠 Application Features
// Demographic, document and affordability features from application rows.

use super::{floor_div, pick, zip_with, SK_ID_CURR};
use crate::agg;
use crate::error::PipelineResult;
use crate::significance::TARGET;
use crate::table::Table;

/// Housing descriptors; a row with fewer than 30 of these missing has house info
pub const HOUSE_COLUMNS: [&str; 47] = [
    "APARTMENTS_AVG", "BASEMENTAREA_AVG", "YEARS_BEGINEXPLUATATION_AVG",
    "YEARS_BUILD_AVG", "COMMONAREA_AVG", "ELEVATORS_AVG", "ENTRANCES_AVG",
    "FLOORSMAX_AVG", "FLOORSMIN_AVG", "LANDAREA_AVG", "LIVINGAPARTMENTS_AVG",
    "LIVINGAREA_AVG", "NONLIVINGAPARTMENTS_AVG", "NONLIVINGAREA_AVG",
    "APARTMENTS_MODE", "BASEMENTAREA_MODE", "YEARS_BEGINEXPLUATATION_MODE",
    "YEARS_BUILD_MODE", "COMMONAREA_MODE", "ELEVATORS_MODE", "ENTRANCES_MODE",
    "FLOORSMAX_MODE", "FLOORSMIN_MODE", "LANDAREA_MODE", "LIVINGAPARTMENTS_MODE",
    "LIVINGAREA_MODE", "NONLIVINGAPARTMENTS_MODE", "NONLIVINGAREA_MODE",
    "APARTMENTS_MEDI", "BASEMENTAREA_MEDI", "YEARS_BEGINEXPLUATATION_MEDI",
    "YEARS_BUILD_MEDI", "COMMONAREA_MEDI", "ELEVATORS_MEDI", "ENTRANCES_MEDI",
    "FLOORSMAX_MEDI", "FLOORSMIN_MEDI", "LANDAREA_MEDI", "LIVINGAPARTMENTS_MEDI",
    "LIVINGAREA_MEDI", "NONLIVINGAPARTMENTS_MEDI", "NONLIVINGAREA_MEDI",
    "FONDKAPREMONT_MODE", "HOUSETYPE_MODE", "TOTALAREA_MODE", "WALLSMATERIAL_MODE",
    "EMERGENCYSTATE_MODE",
];

const HOUSE_INFO_MAX_MISSING: usize = 30;

/// Ages (in years) at which the identity document is normally reissued
const DOC_CHANGE_AGES: [f64; 3] = [14.0, 20.0, 45.0];

const EXT_SOURCE_WEIGHTS: [(&str, f64); 3] = [
    ("EXT_SOURCE_1", 1.0 / 3.0),
    ("EXT_SOURCE_2", 1.0 / 3.0),
    ("EXT_SOURCE_3", 1.0 / 3.0),
];

pub fn build_application_features(app: &Table) -> PipelineResult<Table> {
    let n = app.n_rows();
    let mut out = Table::new();
    out.add_column(SK_ID_CURR, app.column(SK_ID_CURR)?.clone())?;

    out.add_numeric("DOCS_COUNT", docs_count(app)?)?;
    out.add_numeric("HOUSE_INFO", house_info(app))?;

    let days_birth = app.numeric("DAYS_BIRTH")?;
    let days_id_publish = app.numeric("DAYS_ID_PUBLISH")?;
    let age_y: Vec<f64> = days_birth.iter().map(|&d| floor_div(d, -365.0)).collect();
    let doc_change_y = zip_with(days_birth, days_id_publish, |b, p| floor_div(b - p, -365.0));
    let age_at_publish = zip_with(&age_y, &doc_change_y, |a, c| a - c);
    let delay_flag: Vec<f64> = doc_change_y
        .iter()
        .map(|y| if DOC_CHANGE_AGES.contains(y) { 0.0 } else { 1.0 })
        .collect();
    out.add_numeric("AGE_Y", age_y)?;
    out.add_numeric("DOC_CHANGE_Y", doc_change_y)?;
    out.add_numeric("AGE_AT_PUBLISH", age_at_publish)?;
    out.add_numeric("FLAG_DELAY_DOC_CHANGE", delay_flag)?;

    let annuity = app.numeric("AMT_ANNUITY")?;
    let income = app.numeric("AMT_INCOME_TOTAL")?;
    let children = app.numeric("CNT_CHILDREN")?;
    let family = app.numeric("CNT_FAM_MEMBERS")?;
    let adults = zip_with(family, children, |f, c| f - c);

    out.add_numeric("ANNUITY_INCOME_RATIO", zip_with(annuity, income, |a, i| a / i))?;
    out.add_numeric("CHILDREN_PER_ADULT", zip_with(children, &adults, |c, a| c / a))?;
    out.add_numeric(
        "INCOME_PER_CHILD",
        zip_with(income, children, |i, c| if c == 0.0 { f64::NAN } else { i / c }),
    )?;
    out.add_numeric("INCOME_PER_ADULT", zip_with(income, &adults, |i, a| i / a))?;

    let goods_price = app.numeric("AMT_GOODS_PRICE")?;
    let credit = app.numeric("AMT_CREDIT")?;
    out.add_numeric(
        "INTEREST_RATE",
        zip_with(goods_price, credit, |g, c| (1.0 - g / c) * 100.0),
    )?;

    out.add_numeric("WEIGHTED_AVERAGE_SCORE", weighted_score(app, n)?)?;
    out.add_numeric(
        "DIFF_BTW_INCOME_AND_MEAN_GROUP_INCOME",
        income_gap_to_group_mean(app)?,
    )?;

    Ok(out)
}

/// Number of supplied documents (sum of every FLAG_DOCUMENT_* column)
fn docs_count(app: &Table) -> PipelineResult<Vec<f64>> {
    let flags = app
        .column_names()
        .iter()
        .filter(|name| name.contains("FLAG_DOCUMENT_"))
        .map(|name| app.numeric(name))
        .collect::<PipelineResult<Vec<_>>>()?;

    Ok((0..app.n_rows())
        .map(|row| flags.iter().map(|f| f[row]).filter(|v| !v.is_nan()).sum())
        .collect())
}

fn house_info(app: &Table) -> Vec<f64> {
    let present: Vec<_> = HOUSE_COLUMNS
        .iter()
        .filter_map(|name| app.column(name).ok())
        .collect();
    let absent = HOUSE_COLUMNS.len() - present.len();

    (0..app.n_rows())
        .map(|row| {
            let missing = absent + present.iter().filter(|c| c.is_missing(row)).count();
            if missing < HOUSE_INFO_MAX_MISSING {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

fn weighted_score(app: &Table, n: usize) -> PipelineResult<Vec<f64>> {
    let total_weight: f64 = EXT_SOURCE_WEIGHTS.iter().map(|(_, w)| w).sum();
    let mut score = vec![0.0; n];
    for (name, weight) in EXT_SOURCE_WEIGHTS {
        for (acc, v) in score.iter_mut().zip(app.numeric(name)?) {
            *acc += v * weight;
        }
    }
    Ok(score.into_iter().map(|s| s / total_weight).collect())
}

/// Mean income of the gender x education group minus own income.
///
/// Group means come from rows with a known TARGET only; other rows get NaN.
fn income_gap_to_group_mean(app: &Table) -> PipelineResult<Vec<f64>> {
    let income = app.numeric("AMT_INCOME_TOTAL")?;
    let target = app.numeric(TARGET)?;
    let groups = app.group_indices(&["CODE_GENDER", "NAME_EDUCATION_TYPE"])?;

    let mut gap = vec![f64::NAN; app.n_rows()];
    for rows in groups.values() {
        let labelled: Vec<usize> = rows.iter().copied().filter(|&r| !target[r].is_nan()).collect();
        let group_mean = agg::mean(&pick(income, &labelled));
        for r in labelled {
            gap[r] = group_mean - income[r];
        }
    }
    Ok(gap)
}
