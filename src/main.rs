// Entry point for the batch run.
//
// One pass over a snapshot of the sales, store and contact exports:
// - load and clean the three datasets (any failure here stops the run),
// - compute, render and e-mail each store's report,
// - e-mail the combined digest and the ranking to management,
// - archive everything under the backup directory and print a summary.
//
// The exit code is non-zero when any report could not be delivered or any
// store had to be skipped.
mod aggregate;
mod backup;
mod config;
mod delivery;
mod encoding;
mod enrich;
mod error;
mod loader;
mod output;
mod pipeline;
mod render;
mod reports;
mod types;
mod util;

use std::process::ExitCode;

use anyhow::Context;
use num_format::Locale;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backup::BackupStore;
use config::{Config, DeliveryConfig};
use delivery::{DeliveryDriver, OutboxDriver, PacedDriver, PacingPolicy, SmtpDriver};
use pipeline::{ranking_rows, RunOutput};
use render::LocaleCurrency;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Write the rendered reports, the ranking and the summary to the backup
/// tree. Failures here are logged; the mails have already gone out.
fn archive(backup: &BackupStore, output: &RunOutput, currency: &LocaleCurrency) {
    for store in &output.stores {
        let (Some(kpi), Some(document)) = (&store.kpi, &store.document) else {
            continue;
        };
        let Some(name) = kpi.store_name.as_deref() else {
            continue;
        };
        if let Err(e) = backup.archive_store_report(name, kpi.reference_date, &document.to_html()) {
            warn!(store_id = store.store_id, error = %e, "could not archive store report");
        }
    }
    let files = [
        ("combined.html", output.combined_html.as_deref()),
        ("ranking.html", output.ranking_html.as_deref()),
    ];
    for (file, contents) in files {
        if let Some(contents) = contents {
            if let Err(e) = backup.archive(file, contents) {
                warn!(file, error = %e, "could not archive report");
            }
        }
    }
    let rankings = [
        ("ranking.csv", &output.annual_ranking),
        ("ranking_daily.csv", &output.daily_ranking),
    ];
    for (file, entries) in rankings {
        let rows = ranking_rows(entries, currency);
        if let Err(e) = output::write_csv(&backup.root().join(file), &rows) {
            warn!(file, error = %e, "could not write ranking");
        }
    }
    if let Err(e) = output::write_json(&backup.root().join("summary.json"), &output.summary) {
        warn!(error = %e, "could not write summary.json");
    }
}

fn run() -> anyhow::Result<RunOutput> {
    let config = Config::from_env().context("invalid configuration")?;

    let locale = Locale::from_name(&config.currency_locale)
        .with_context(|| format!("unknown CURRENCY_LOCALE {:?}", config.currency_locale))?;
    let currency = LocaleCurrency::new(locale, config.currency_prefix.clone());

    let datasets = loader::load_datasets(&config.sources)?;
    info!(
        sales = datasets.sales.len(),
        stores = datasets.profiles.len(),
        contacts = datasets.contacts.len(),
        "datasets loaded"
    );

    let backup = BackupStore::new(&config.backup_dir);
    backup.ensure_store_dirs(datasets.profiles.iter().map(|p| p.store.as_str()))?;

    // The driver owns the transport session; it is dropped (and the session
    // closed) at the end of this block whatever happened inside.
    let output = {
        let mut driver: Box<dyn DeliveryDriver> = match &config.delivery {
            DeliveryConfig::Smtp(settings) => Box::new(PacedDriver::new(
                SmtpDriver::connect(settings).context("could not open SMTP session")?,
                config.pacing,
            )),
            DeliveryConfig::Outbox(dir) => Box::new(PacedDriver::new(
                OutboxDriver::new(dir)?,
                PacingPolicy::immediate(),
            )),
        };
        pipeline::run(datasets, &config.report, &currency, &mut *driver)
    };

    archive(&backup, &output, &currency);

    output::preview_table_rows("Stores", &output.store_rows(), 50);
    output::preview_table_rows(
        "Ranking (annual sales)",
        &ranking_rows(&output.annual_ranking, &currency),
        10,
    );
    output::preview_table_rows(
        "Ranking (daily sales)",
        &ranking_rows(&output.daily_ranking, &currency),
        10,
    );
    output::preview_table_rows("Run summary", std::slice::from_ref(&output.summary), 1);
    Ok(output)
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(output) if output.summary.is_clean() => ExitCode::SUCCESS,
        Ok(output) => {
            error!(
                delivery_failures = output.summary.delivery_failures,
                skipped = output.summary.stores_skipped,
                failed_stores = ?output.summary.failed_stores,
                "run finished with failures"
            );
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
