use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::warn;

use crate::error::{Anomaly, ReportError, Result};
use crate::types::{
    Goals, KpiResult, Metric, MetricKind, RankingEntry, StoreDataset, StoreId,
};

/// Compute one store's KPIs and judge them against `goals`.
///
/// Daily figures are taken on the store's own reference date (its latest
/// sale date). Ratio metrics with a zero denominator are undefined rather
/// than infinite: they carry no value, never meet their goal, and add a
/// `MetricUndefined` anomaly.
pub fn compute_kpis(dataset: &StoreDataset, goals: &Goals) -> Result<KpiResult> {
    let store_id = dataset.store_id;
    let reference_date = dataset
        .rows
        .iter()
        .map(|r| r.sale.date)
        .max()
        .ok_or(ReportError::EmptyStore(store_id))?;

    let mut annual_sales = 0.0;
    let mut daily_sales = 0.0;
    let mut annual_quantity: i64 = 0;
    let mut daily_quantity: i64 = 0;
    let mut products: HashSet<&str> = HashSet::new();
    let mut tickets: HashSet<&str> = HashSet::new();
    for row in &dataset.rows {
        let sale = &row.sale;
        annual_sales += sale.final_value;
        annual_quantity += sale.quantity;
        if sale.date == reference_date {
            daily_sales += sale.final_value;
            daily_quantity += sale.quantity;
        }
        products.insert(sale.product.as_str());
        tickets.insert(sale.sale_code.as_str());
    }
    let ticket_count = tickets.len();

    let mut anomalies = Vec::new();
    if daily_quantity == 0 {
        anomalies.push(Anomaly::ZeroDailyQuantity {
            store_id,
            date: reference_date,
        });
    }
    let mut ratio = |metric: &'static str, numerator: f64, denominator: f64| {
        if denominator == 0.0 {
            anomalies.push(Anomaly::MetricUndefined { store_id, metric });
            None
        } else {
            Some(numerator / denominator)
        }
    };
    let annual_avg_ticket = ratio("annual average ticket", annual_sales, ticket_count as f64);
    let daily_avg_ticket = ratio("daily average ticket", daily_sales, daily_quantity as f64);

    let (store_name, name_anomaly) =
        representative(store_id, "store name", dataset.rows.iter().map(|r| r.store.as_deref()));
    let (manager_name, manager_anomaly) =
        representative(store_id, "manager name", dataset.rows.iter().map(|r| r.manager.as_deref()));
    let (email, email_anomaly) =
        representative(store_id, "e-mail", dataset.rows.iter().map(|r| r.email.as_deref()));
    anomalies.extend([name_anomaly, manager_anomaly, email_anomaly].into_iter().flatten());

    for anomaly in &anomalies {
        warn!(store_id, %anomaly, "data anomaly");
    }

    Ok(KpiResult {
        store_id,
        store_name,
        manager_name,
        email,
        reference_date,
        daily_sales: Metric::judge(MetricKind::Currency, Some(daily_sales), Some(goals.daily_sales)),
        annual_sales: Metric::judge(MetricKind::Currency, Some(annual_sales), Some(goals.annual_sales)),
        daily_quantity: Metric::judge(
            MetricKind::Count,
            Some(daily_quantity as f64),
            Some(goals.daily_quantity),
        ),
        annual_quantity: Metric::judge(
            MetricKind::Count,
            Some(annual_quantity as f64),
            Some(goals.annual_quantity),
        ),
        daily_avg_ticket: Metric::judge(MetricKind::Currency, daily_avg_ticket, Some(goals.daily_avg_ticket)),
        annual_avg_ticket: Metric::judge(
            MetricKind::Currency,
            annual_avg_ticket,
            Some(goals.annual_avg_ticket),
        ),
        product_diversity: Metric::judge(
            MetricKind::Count,
            Some(products.len() as f64),
            goals.product_diversity,
        ),
        ticket_count,
        anomalies,
    })
}

/// Pick the display value for a field that should be constant across a
/// store's rows: the first present value wins. More than one distinct value
/// is reported instead of silently picking one.
fn representative<'a>(
    store_id: StoreId,
    field: &'static str,
    values: impl Iterator<Item = Option<&'a str>>,
) -> (Option<String>, Option<Anomaly>) {
    let mut distinct: Vec<&str> = Vec::new();
    for value in values.flatten() {
        if !distinct.contains(&value) {
            distinct.push(value);
        }
    }
    let chosen = distinct.first().map(|v| v.to_string());
    let anomaly = (distinct.len() > 1).then(|| Anomaly::InconsistentName {
        store_id,
        field,
        values: distinct.iter().map(|v| v.to_string()).collect(),
    });
    (chosen, anomaly)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankKey {
    AnnualSales,
    DailySales,
}

/// Ranking entries in the order of `results` (ascending store id when they
/// come from the partitioner).
pub fn ranking_entries(results: &[KpiResult]) -> Vec<RankingEntry> {
    results
        .iter()
        .map(|kpi| RankingEntry {
            store_id: kpi.store_id,
            store_name: kpi.display_name(),
            annual_sales: kpi.annual_sales.value.unwrap_or(0.0),
            daily_sales: kpi.daily_sales.value.unwrap_or(0.0),
        })
        .collect()
}

/// Descending by `key`. The sort is stable, so equal values keep their input
/// order, then ascending store id settles anything left.
pub fn rank_by(entries: &[RankingEntry], key: RankKey) -> Vec<RankingEntry> {
    let value = |e: &RankingEntry| match key {
        RankKey::AnnualSales => e.annual_sales,
        RankKey::DailySales => e.daily_sales,
    };
    let mut ranked = entries.to_vec();
    ranked.sort_by(|a, b| {
        value(b)
            .partial_cmp(&value(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.store_id.cmp(&b.store_id))
    });
    ranked
}
