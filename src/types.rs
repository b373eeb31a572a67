use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::error::Anomaly;

pub type StoreId = u32;

// Raw rows as they come out of the source files. Every required column is a
// plain `String` so a file missing one of them fails to deserialize; the
// values themselves are validated by the cleaning step in `loader`.

#[derive(Debug, Clone, Deserialize)]
pub struct RawSalesRow {
    #[serde(rename = "Store ID")]
    pub store_id: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Sale Code")]
    pub sale_code: String,
    #[serde(rename = "Product")]
    pub product: String,
    #[serde(rename = "Quantity")]
    pub quantity: String,
    #[serde(rename = "Final Value")]
    pub final_value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStoreRow {
    #[serde(rename = "Store ID")]
    pub store_id: String,
    #[serde(rename = "Store")]
    pub store: String,
    #[serde(rename = "Manager")]
    pub manager: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawContactRow {
    #[serde(rename = "Store")]
    pub store: String,
    #[serde(rename = "E-mail")]
    pub email: String,
}

/// One transaction line.
#[derive(Debug, Clone, PartialEq)]
pub struct SalesRecord {
    pub store_id: StoreId,
    pub date: NaiveDate,
    pub sale_code: String,
    pub product: String,
    pub quantity: i64,
    pub final_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreProfile {
    pub store_id: StoreId,
    pub store: String,
    pub manager: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerContact {
    pub store: String,
    pub email: String,
}

/// A sales row after the left joins. Absent fields mean the reference data
/// had no match for this row.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedSale {
    pub sale: SalesRecord,
    pub store: Option<String>,
    pub manager: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreDataset {
    pub store_id: StoreId,
    pub rows: Vec<EnrichedSale>,
}

/// Thresholds each store is judged against. Constant for a run.
///
/// Product diversity carries its own optional goal; it is never judged
/// against the annual quantity goal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Goals {
    pub daily_sales: f64,
    pub annual_sales: f64,
    pub daily_quantity: f64,
    pub annual_quantity: f64,
    pub daily_avg_ticket: f64,
    pub annual_avg_ticket: f64,
    pub product_diversity: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Currency,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Met,
    NotMet,
    NotEvaluated,
}

/// A measured value next to its goal. `value` is `None` when the metric is
/// undefined (a ratio with a zero denominator).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metric {
    pub kind: MetricKind,
    pub value: Option<f64>,
    pub goal: Option<f64>,
    pub status: Status,
}

impl Metric {
    /// Met iff the value reaches the goal. An undefined value never meets a
    /// goal; a metric without a goal is not evaluated.
    pub fn judge(kind: MetricKind, value: Option<f64>, goal: Option<f64>) -> Self {
        let status = match (value, goal) {
            (_, None) => Status::NotEvaluated,
            (Some(v), Some(g)) if v >= g => Status::Met,
            _ => Status::NotMet,
        };
        Metric {
            kind,
            value,
            goal,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiResult {
    pub store_id: StoreId,
    pub store_name: Option<String>,
    pub manager_name: Option<String>,
    pub email: Option<String>,
    pub reference_date: NaiveDate,
    pub daily_sales: Metric,
    pub annual_sales: Metric,
    pub daily_quantity: Metric,
    pub annual_quantity: Metric,
    pub daily_avg_ticket: Metric,
    pub annual_avg_ticket: Metric,
    pub product_diversity: Metric,
    pub ticket_count: usize,
    pub anomalies: Vec<Anomaly>,
}

impl KpiResult {
    pub fn display_name(&self) -> String {
        self.store_name
            .clone()
            .unwrap_or_else(|| format!("Store ID {}", self.store_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub store_id: StoreId,
    pub store_name: String,
    pub annual_sales: f64,
    pub daily_sales: f64,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct RankingRow {
    #[serde(rename = "Rank")]
    #[tabled(rename = "Rank")]
    pub rank: usize,
    #[serde(rename = "Store Name")]
    #[tabled(rename = "Store Name")]
    pub store_name: String,
    #[serde(rename = "Annual Sales")]
    #[tabled(rename = "Annual Sales")]
    pub annual_sales: String,
    #[serde(rename = "Daily Sales")]
    #[tabled(rename = "Daily Sales")]
    pub daily_sales: String,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct StoreSummaryRow {
    #[serde(rename = "Store ID")]
    #[tabled(rename = "Store ID")]
    pub store_id: StoreId,
    #[serde(rename = "Store")]
    #[tabled(rename = "Store")]
    pub store: String,
    #[serde(rename = "Date")]
    #[tabled(rename = "Date")]
    pub date: String,
    #[serde(rename = "Anomalies")]
    #[tabled(rename = "Anomalies")]
    pub anomalies: usize,
    #[serde(rename = "Outcome")]
    #[tabled(rename = "Outcome")]
    pub outcome: String,
}

/// Counts reported to the operator at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Tabled)]
pub struct RunSummary {
    #[tabled(rename = "Stores")]
    pub stores: usize,
    #[tabled(rename = "Reports Sent")]
    pub reports_sent: usize,
    #[tabled(rename = "Skipped")]
    pub stores_skipped: usize,
    #[tabled(rename = "Delivery Failures")]
    pub delivery_failures: usize,
    #[tabled(rename = "Anomalies")]
    pub anomalies: usize,
    #[tabled(rename = "Management Sent")]
    pub management_sent: usize,
    // listed per store in the store table
    #[tabled(skip)]
    pub failed_stores: Vec<StoreId>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.delivery_failures == 0 && self.stores_skipped == 0
    }
}
