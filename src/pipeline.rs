// One batch pass: partition, join, compute, render and deliver per store,
// then the management digest and the ranking.
//
// Each store is processed by `process_store`, which returns everything that
// happened to it; the run folds those results instead of accumulating into
// shared state. A store's failure never stops the next one.
use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::aggregate::combine_reports;
use crate::config::ReportSettings;
use crate::delivery::{DeliveryDriver, EmailMessage, MailKind};
use crate::enrich::{enrich, partition_by_store, ReferenceData};
use crate::error::{Anomaly, DeliveryError};
use crate::loader::Datasets;
use crate::render::{render_ranking_report, render_store_report, CurrencyFormatter, StoreDocument};
use crate::reports::{compute_kpis, rank_by, ranking_entries, RankKey};
use crate::types::{
    KpiResult, RankingEntry, RankingRow, RunSummary, SalesRecord, StoreId, StoreSummaryRow,
};
use crate::util::format_date;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    Sent,
    DeliveryFailed(String),
    /// KPI computation failed; nothing was rendered or sent.
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct StoreRun {
    pub store_id: StoreId,
    pub kpi: Option<KpiResult>,
    pub document: Option<StoreDocument>,
    pub anomalies: Vec<Anomaly>,
    pub outcome: StoreOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub summary: RunSummary,
    pub stores: Vec<StoreRun>,
    pub combined_html: Option<String>,
    pub ranking_html: Option<String>,
    pub annual_ranking: Vec<RankingEntry>,
    pub daily_ranking: Vec<RankingEntry>,
}

pub fn store_subject(kind: &str, store: &str, date: NaiveDate) -> String {
    format!("{} store {} on {}", kind, store, format_date(date))
}

pub fn management_subject(kind: &str, date: NaiveDate) -> String {
    format!("{} of Stores on {}", kind, format_date(date))
}

/// Join, compute, render and send one store's report.
pub fn process_store(
    store_id: StoreId,
    records: Vec<SalesRecord>,
    reference: &ReferenceData<'_>,
    settings: &ReportSettings,
    currency: &dyn CurrencyFormatter,
    driver: &mut dyn DeliveryDriver,
) -> StoreRun {
    let (dataset, join_anomalies) = enrich(store_id, records, reference);

    let mut kpi = match compute_kpis(&dataset, &settings.goals) {
        Ok(kpi) => kpi,
        Err(e) => {
            warn!(store_id, error = %e, "store skipped");
            return StoreRun {
                store_id,
                kpi: None,
                document: None,
                anomalies: join_anomalies,
                outcome: StoreOutcome::Skipped(e.to_string()),
            };
        }
    };
    let mut anomalies = join_anomalies;
    anomalies.append(&mut kpi.anomalies);
    kpi.anomalies = anomalies;

    let document = render_store_report(&kpi, currency);
    let store_name = kpi.display_name();

    let sent = match kpi.email.as_deref() {
        None => Err(DeliveryError::NoRecipient(store_id)),
        Some(to) => {
            let message = EmailMessage {
                kind: MailKind::Store,
                to: to.to_string(),
                subject: store_subject(&settings.report_kind, &store_name, kpi.reference_date),
                body_html: document.to_html(),
            };
            driver.send(&message)
        }
    };
    let outcome = match sent {
        Ok(()) => {
            info!(
                store_id,
                store = %store_name,
                manager = kpi.manager_name.as_deref().unwrap_or(""),
                to = kpi.email.as_deref().unwrap_or(""),
                "store report sent"
            );
            StoreOutcome::Sent
        }
        Err(e) => {
            error!(
                store_id,
                store = %store_name,
                to = kpi.email.as_deref().unwrap_or(""),
                error = %e,
                "store report not delivered"
            );
            StoreOutcome::DeliveryFailed(e.to_string())
        }
    };

    StoreRun {
        store_id,
        anomalies: kpi.anomalies.clone(),
        kpi: Some(kpi),
        document: Some(document),
        outcome,
    }
}

fn send_management(
    driver: &mut dyn DeliveryDriver,
    to: &str,
    subject: String,
    body_html: String,
    what: &str,
) -> bool {
    let message = EmailMessage {
        kind: MailKind::Management,
        to: to.to_string(),
        subject,
        body_html,
    };
    match driver.send(&message) {
        Ok(()) => {
            info!(to, report = what, "management report sent");
            true
        }
        Err(e) => {
            error!(to, report = what, error = %e, "management report not delivered");
            false
        }
    }
}

/// Run the whole pipeline over already loaded datasets.
pub fn run(
    datasets: Datasets,
    settings: &ReportSettings,
    currency: &dyn CurrencyFormatter,
    driver: &mut dyn DeliveryDriver,
) -> RunOutput {
    let Datasets {
        sales,
        profiles,
        contacts,
    } = datasets;
    let reference = ReferenceData::index(&profiles, &contacts);
    let partitions = partition_by_store(sales);
    info!(stores = partitions.len(), "processing stores");

    let stores: Vec<StoreRun> = partitions
        .into_iter()
        .map(|(store_id, records)| process_store(store_id, records, &reference, settings, currency, &mut *driver))
        .collect();

    let mut summary = RunSummary {
        stores: stores.len(),
        ..RunSummary::default()
    };
    for store in &stores {
        summary.anomalies += store.anomalies.len();
        match store.outcome {
            StoreOutcome::Sent => summary.reports_sent += 1,
            StoreOutcome::DeliveryFailed(_) => {
                summary.delivery_failures += 1;
                summary.failed_stores.push(store.store_id);
            }
            StoreOutcome::Skipped(_) => {
                summary.stores_skipped += 1;
                summary.failed_stores.push(store.store_id);
            }
        }
    }

    let results: Vec<KpiResult> = stores.iter().filter_map(|s| s.kpi.clone()).collect();
    let documents: Vec<StoreDocument> = stores.iter().filter_map(|s| s.document.clone()).collect();
    let Some(latest) = results.iter().map(|k| k.reference_date).max() else {
        warn!("no store produced a report; management reports not sent");
        return RunOutput {
            summary,
            stores,
            ..RunOutput::default()
        };
    };
    let subject = management_subject(&settings.report_kind, latest);

    let combined = combine_reports(&documents);
    summary.anomalies += combined.anomalies.len();
    if send_management(driver, &settings.management_email, subject.clone(), combined.html.clone(), "combined") {
        summary.management_sent += 1;
    } else {
        summary.delivery_failures += 1;
    }

    let entries = ranking_entries(&results);
    let annual_ranking = rank_by(&entries, RankKey::AnnualSales);
    let daily_ranking = rank_by(&entries, RankKey::DailySales);
    let ranking_html = render_ranking_report(&annual_ranking, &daily_ranking, currency);
    if send_management(driver, &settings.management_email, subject, ranking_html.clone(), "ranking") {
        summary.management_sent += 1;
    } else {
        summary.delivery_failures += 1;
    }

    info!(
        stores = summary.stores,
        sent = summary.reports_sent,
        skipped = summary.stores_skipped,
        delivery_failures = summary.delivery_failures,
        anomalies = summary.anomalies,
        management_sent = summary.management_sent,
        "run finished"
    );

    RunOutput {
        summary,
        stores,
        combined_html: Some(combined.html),
        ranking_html: Some(ranking_html),
        annual_ranking,
        daily_ranking,
    }
}

pub fn ranking_rows(entries: &[RankingEntry], currency: &dyn CurrencyFormatter) -> Vec<RankingRow> {
    entries
        .iter()
        .enumerate()
        .map(|(idx, e)| RankingRow {
            rank: idx + 1,
            store_name: e.store_name.clone(),
            annual_sales: currency.format(e.annual_sales),
            daily_sales: currency.format(e.daily_sales),
        })
        .collect()
}

impl RunOutput {
    pub fn store_rows(&self) -> Vec<StoreSummaryRow> {
        self.stores
            .iter()
            .map(|s| StoreSummaryRow {
                store_id: s.store_id,
                store: s.kpi.as_ref().map(|k| k.display_name()).unwrap_or_default(),
                date: s
                    .kpi
                    .as_ref()
                    .map(|k| format_date(k.reference_date))
                    .unwrap_or_default(),
                anomalies: s.anomalies.len(),
                outcome: match &s.outcome {
                    StoreOutcome::Sent => "sent".to_string(),
                    StoreOutcome::DeliveryFailed(e) => format!("delivery failed: {e}"),
                    StoreOutcome::Skipped(e) => format!("skipped: {e}"),
                },
            })
            .collect()
    }
}
