use tracing::warn;

use crate::error::Anomaly;
use crate::render::{wrap_document, StoreDocument, STORE_STYLE};

/// The management digest and whatever went wrong while composing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub html: String,
    pub anomalies: Vec<Anomaly>,
}

/// Compose every store body, in order, inside a single document wrapper.
/// Greetings are left out. A document without a greeting fragment is used
/// as it is and reported.
pub fn combine_reports(documents: &[StoreDocument]) -> Aggregate {
    let mut anomalies = Vec::new();
    let mut bodies = String::new();
    for document in documents {
        if document.greeting.is_none() {
            let anomaly = Anomaly::Render {
                store_id: document.store_id,
            };
            warn!(store_id = document.store_id, %anomaly, "render anomaly");
            anomalies.push(anomaly);
        }
        bodies.push_str(&document.body);
    }
    Aggregate {
        html: wrap_document(STORE_STYLE, &bodies),
        anomalies,
    }
}
