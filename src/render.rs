// HTML rendering for store reports and the ranking report.
//
// The greeting is rendered as its own fragment so the management digest can
// be composed from bodies without touching rendered markup again.
use num_format::Locale;

use crate::types::{KpiResult, Metric, MetricKind, RankingEntry, Status, StoreId};
use crate::util::{escape_html, format_date, format_int, format_number};

pub trait CurrencyFormatter {
    fn format(&self, amount: f64) -> String;

    /// Quantities and goals for them. Whole numbers are grouped without
    /// decimals; anything else keeps two.
    fn format_count(&self, count: f64) -> String;
}

/// `<prefix><grouped amount>` with the locale's separators, e.g. `R$ 1.234,50`.
#[derive(Debug, Clone)]
pub struct LocaleCurrency {
    locale: Locale,
    prefix: String,
}

impl LocaleCurrency {
    pub fn new(locale: Locale, prefix: impl Into<String>) -> Self {
        Self {
            locale,
            prefix: prefix.into(),
        }
    }
}

impl CurrencyFormatter for LocaleCurrency {
    fn format(&self, amount: f64) -> String {
        let digits = format_number(amount.abs(), 2, &self.locale);
        if amount < 0.0 && digits.chars().any(|c| c.is_ascii_digit() && c != '0') {
            format!("{}{}{}", self.locale.minus_sign(), self.prefix, digits)
        } else {
            format!("{}{}", self.prefix, digits)
        }
    }

    fn format_count(&self, count: f64) -> String {
        if count.fract() == 0.0 && count.abs() < 1e15 {
            format_int(count as i64, &self.locale)
        } else {
            format_number(count, 2, &self.locale)
        }
    }
}

pub const STORE_STYLE: &str = "\
table { width: 100%; border-collapse: collapse; }
th, td { padding: 8px; text-align: left; border: 1px solid #ddd; }
th { background-color: #f2f2f2; }
.goal-met { color: green; }
.goal-not-met { color: red; }
.data-quality { color: #8a6d3b; }
.store-report { margin-bottom: 32px; }";

pub const RANKING_STYLE: &str = "\
table { width: 100%; border-collapse: collapse; }
th, td { border: 1px solid black; padding: 8px; text-align: left; }
th { background-color: #f2f2f2; }
.annual_sales { border: 2px solid #4CAF50; }
.daily_sales { border: 2px solid #f44336; }";

/// One store's report, kept as separate fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreDocument {
    pub store_id: StoreId,
    pub greeting: Option<String>,
    pub body: String,
}

impl StoreDocument {
    /// The full standalone document sent to the store manager.
    pub fn to_html(&self) -> String {
        let mut content = String::new();
        if let Some(greeting) = &self.greeting {
            content.push_str(greeting);
        }
        content.push_str(&self.body);
        wrap_document(STORE_STYLE, &content)
    }
}

pub fn wrap_document(style: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n{style}\n</style>\n</head>\n<body>\n{body}</body>\n</html>\n"
    )
}

fn status_cell(status: Status) -> &'static str {
    match status {
        Status::Met => "<td class=\"goal-met\" style=\"text-align: center;\">✅</td>",
        Status::NotMet => "<td class=\"goal-not-met\" style=\"text-align: center;\">❌</td>",
        Status::NotEvaluated => "<td style=\"text-align: center;\">—</td>",
    }
}

fn amount(kind: MetricKind, value: Option<f64>, currency: &dyn CurrencyFormatter) -> String {
    match (kind, value) {
        (_, None) => "n/a".to_string(),
        (MetricKind::Currency, Some(v)) => currency.format(v),
        (MetricKind::Count, Some(v)) => currency.format_count(v),
    }
}

fn metric_row(label: &str, metric: &Metric, currency: &dyn CurrencyFormatter) -> String {
    let goal = match metric.goal {
        Some(_) => amount(metric.kind, metric.goal, currency),
        None => "—".to_string(),
    };
    format!(
        "<tr><td>{}</td><td>{}</td><td>{}</td>{}</tr>\n",
        escape_html(label),
        escape_html(&amount(metric.kind, metric.value, currency)),
        escape_html(&goal),
        status_cell(metric.status)
    )
}

/// Render a store's KPI result. The greeting is omitted when there is no
/// manager name to address it to.
pub fn render_store_report(kpi: &KpiResult, currency: &dyn CurrencyFormatter) -> StoreDocument {
    let date = format_date(kpi.reference_date);

    let greeting = kpi.manager_name.as_deref().map(|manager| {
        format!(
            "<p class=\"greeting\">Hello {}, we present the sales summary for {} in the table below, as well as the performance of the indicators.</p>\n",
            escape_html(manager),
            date
        )
    });

    let mut body = format!(
        "<section class=\"store-report\" data-store-id=\"{}\">\n<p><strong>Store:</strong> {}</p>\n<p><strong>Date:</strong> {}</p>\n",
        kpi.store_id,
        escape_html(kpi.store_name.as_deref().unwrap_or("")),
        date
    );
    if !kpi.anomalies.is_empty() {
        body.push_str("<p class=\"data-quality\"><strong>Data quality:</strong></p>\n<ul class=\"data-quality\">\n");
        for anomaly in &kpi.anomalies {
            body.push_str(&format!("<li>{}</li>\n", escape_html(&anomaly.to_string())));
        }
        body.push_str("</ul>\n");
    }

    body.push_str("<table>\n<tr><th>Metric</th><th>Value</th><th>Goal</th><th>Status</th></tr>\n");
    let rows: [(String, &Metric); 7] = [
        (format!("Sales on {date}"), &kpi.daily_sales),
        ("Product quantity sold on the day".to_string(), &kpi.daily_quantity),
        ("Average ticket of the day".to_string(), &kpi.daily_avg_ticket),
        ("Annual sales".to_string(), &kpi.annual_sales),
        ("Product diversity".to_string(), &kpi.product_diversity),
        ("Product quantity sold in the year".to_string(), &kpi.annual_quantity),
        ("Average ticket in the year".to_string(), &kpi.annual_avg_ticket),
    ];
    for (label, metric) in &rows {
        body.push_str(&metric_row(label, metric, currency));
    }
    body.push_str("</table>\n</section>\n");

    StoreDocument {
        store_id: kpi.store_id,
        greeting,
        body,
    }
}

fn ranking_table(class: &str, entries: &[RankingEntry], currency: &dyn CurrencyFormatter) -> String {
    let mut table = format!(
        "<table class=\"{class}\">\n<thead>\n<tr><th>Store Name</th><th>Annual Sales</th><th>Daily Sales</th></tr>\n</thead>\n<tbody>\n"
    );
    for entry in entries {
        table.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&entry.store_name),
            escape_html(&currency.format(entry.annual_sales)),
            escape_html(&currency.format(entry.daily_sales))
        ));
    }
    table.push_str("</tbody>\n</table>\n");
    table
}

/// Render the two ranking tables. Both slices are expected already sorted.
pub fn render_ranking_report(
    by_annual: &[RankingEntry],
    by_daily: &[RankingEntry],
    currency: &dyn CurrencyFormatter,
) -> String {
    let body = format!(
        "<h3>RANKING ANNUAL SALES</h3>\n{}<h3>RANKING DAILY SALES</h3>\n{}",
        ranking_table("annual_sales", by_annual, currency),
        ranking_table("daily_sales", by_daily, currency)
    );
    wrap_document(RANKING_STYLE, &body)
}
