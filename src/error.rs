use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::encoding::{DecodeError, TextEncoding};
use crate::types::StoreId;

/// Errors that stop a load, a store, or the whole run.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error(
        "could not read {} with any of the encodings [{}]",
        .path.display(),
        TextEncoding::join_labels(.encodings)
    )]
    LoadFailure {
        path: PathBuf,
        encodings: Vec<TextEncoding>,
    },

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<&'static str>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("{} has no worksheets", .0.display())]
    EmptyWorkbook(PathBuf),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store {0} has no sales records")]
    EmptyStore(StoreId),

}

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("invalid address {address:?}: {reason}")]
    Address { address: String, reason: String },

    #[error("could not build message: {0}")]
    Build(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no recipient e-mail for store {0}")]
    NoRecipient(StoreId),

    #[error("outbox write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A value in a source row that could not be turned into a typed field.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("missing value for {0}")]
    Missing(&'static str),

    #[error("invalid {column}: {value:?}")]
    Invalid { column: &'static str, value: String },
}

/// Non-fatal data-quality findings. They are logged, attached to the store
/// they concern, and counted in the run summary.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    #[error("store {store_id}: no {field} found for this store")]
    Join { store_id: StoreId, field: &'static str },

    #[error("store {store_id}: {metric} is undefined (zero denominator)")]
    MetricUndefined { store_id: StoreId, metric: &'static str },

    #[error("store {store_id}: zero quantity sold on its own reference date {date}")]
    ZeroDailyQuantity { store_id: StoreId, date: NaiveDate },

    #[error("store {store_id}: {field} differs across rows ({})", .values.join(", "))]
    InconsistentName {
        store_id: StoreId,
        field: &'static str,
        values: Vec<String>,
    },

    #[error("store {store_id}: report has no greeting fragment, body used unchanged")]
    Render { store_id: StoreId },
}
