// Store partitioning and the two left joins that attach store metadata and
// the manager's e-mail to each sales row.
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::error::Anomaly;
use crate::types::{EnrichedSale, ManagerContact, SalesRecord, StoreDataset, StoreId, StoreProfile};

/// Split sales into one subset per store id, iterated in ascending id order.
/// Records keep their input order inside each subset.
pub fn partition_by_store(records: Vec<SalesRecord>) -> BTreeMap<StoreId, Vec<SalesRecord>> {
    let mut partitions: BTreeMap<StoreId, Vec<SalesRecord>> = BTreeMap::new();
    for record in records {
        partitions.entry(record.store_id).or_default().push(record);
    }
    partitions
}

/// Lookup tables for the joins. When a key appears more than once the first
/// row wins; a many-match join would duplicate sales rows.
pub struct ReferenceData<'a> {
    profiles: HashMap<StoreId, &'a StoreProfile>,
    contacts: HashMap<&'a str, &'a str>,
}

impl<'a> ReferenceData<'a> {
    pub fn index(profiles: &'a [StoreProfile], contacts: &'a [ManagerContact]) -> Self {
        let mut by_id = HashMap::with_capacity(profiles.len());
        for profile in profiles {
            match by_id.entry(profile.store_id) {
                Entry::Vacant(slot) => {
                    slot.insert(profile);
                }
                Entry::Occupied(_) => warn!(
                    store_id = profile.store_id,
                    store = %profile.store,
                    "duplicate store profile ignored"
                ),
            }
        }

        let mut by_store = HashMap::with_capacity(contacts.len());
        for contact in contacts {
            match by_store.entry(contact.store.as_str()) {
                Entry::Vacant(slot) => {
                    slot.insert(contact.email.as_str());
                }
                Entry::Occupied(_) => warn!(
                    store = %contact.store,
                    email = %contact.email,
                    "duplicate manager contact ignored"
                ),
            }
        }

        ReferenceData {
            profiles: by_id,
            contacts: by_store,
        }
    }
}

/// Left join one store's sales with its profile (on store id) and then with
/// the contacts (on store name). Every sales row is kept.
pub fn enrich(
    store_id: StoreId,
    records: Vec<SalesRecord>,
    reference: &ReferenceData<'_>,
) -> (StoreDataset, Vec<Anomaly>) {
    let mut anomalies = Vec::new();
    let mut missing_profile = false;
    let mut missing_contact = false;

    let rows: Vec<EnrichedSale> = records
        .into_iter()
        .map(|sale| {
            let profile = reference.profiles.get(&sale.store_id).copied();
            let email = profile.and_then(|p| reference.contacts.get(p.store.as_str()).copied());
            missing_profile |= profile.is_none();
            missing_contact |= email.is_none();
            EnrichedSale {
                store: profile.map(|p| p.store.clone()),
                manager: profile.map(|p| p.manager.clone()),
                email: email.map(str::to_string),
                sale,
            }
        })
        .collect();

    if missing_profile {
        anomalies.push(Anomaly::Join {
            store_id,
            field: "store profile",
        });
    }
    if missing_contact {
        anomalies.push(Anomaly::Join {
            store_id,
            field: "manager e-mail",
        });
    }
    for anomaly in &anomalies {
        warn!(store_id, %anomaly, "join anomaly");
    }

    (StoreDataset { store_id, rows }, anomalies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sale(store_id: StoreId, day: u32, code: &str, value: f64) -> SalesRecord {
        SalesRecord {
            store_id,
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            sale_code: code.to_string(),
            product: "Shirt".to_string(),
            quantity: 1,
            final_value: value,
        }
    }

    fn profile(store_id: StoreId, store: &str, manager: &str) -> StoreProfile {
        StoreProfile {
            store_id,
            store: store.to_string(),
            manager: manager.to_string(),
        }
    }

    fn contact(store: &str, email: &str) -> ManagerContact {
        ManagerContact {
            store: store.to_string(),
            email: email.to_string(),
        }
    }

    #[test]
    fn partitions_are_disjoint_ordered_and_complete() {
        let records = vec![
            sale(10, 1, "a", 1.0),
            sale(2, 1, "b", 2.0),
            sale(10, 2, "c", 3.0),
            sale(7, 3, "d", 4.0),
        ];
        let partitions = partition_by_store(records.clone());

        let ids: Vec<StoreId> = partitions.keys().copied().collect();
        assert_eq!(ids, vec![2, 7, 10]);
        for (id, subset) in &partitions {
            assert!(subset.iter().all(|r| r.store_id == *id));
        }

        let mut rebuilt: Vec<SalesRecord> = partitions.into_values().flatten().collect();
        let mut original = records;
        let key = |r: &SalesRecord| r.sale_code.clone();
        rebuilt.sort_by_key(key);
        original.sort_by_key(key);
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn join_preserves_rows_and_fills_fields() {
        let profiles = vec![profile(1, "Centro", "Ana")];
        let contacts = vec![contact("Centro", "ana@example.com")];
        let reference = ReferenceData::index(&profiles, &contacts);

        let (dataset, anomalies) = enrich(1, vec![sale(1, 1, "a", 1.0), sale(1, 2, "b", 2.0)], &reference);
        assert_eq!(dataset.rows.len(), 2);
        assert!(anomalies.is_empty());
        assert!(dataset.rows.iter().all(|r| r.store.as_deref() == Some("Centro")
            && r.manager.as_deref() == Some("Ana")
            && r.email.as_deref() == Some("ana@example.com")));
    }

    #[test]
    fn unmatched_store_keeps_rows_with_absent_fields() {
        let profiles = vec![profile(1, "Centro", "Ana")];
        let contacts: Vec<ManagerContact> = vec![];
        let reference = ReferenceData::index(&profiles, &contacts);

        let (dataset, anomalies) = enrich(9, vec![sale(9, 1, "a", 1.0), sale(9, 1, "b", 1.0)], &reference);
        assert_eq!(dataset.rows.len(), 2);
        assert!(dataset.rows.iter().all(|r| r.store.is_none() && r.manager.is_none() && r.email.is_none()));
        assert_eq!(anomalies.len(), 2);
        assert!(anomalies.iter().all(|a| matches!(a, Anomaly::Join { store_id: 9, .. })));
    }

    #[test]
    fn duplicate_reference_rows_do_not_multiply_sales() {
        let profiles = vec![profile(1, "Centro", "Ana"), profile(1, "Centro", "Bia")];
        let contacts = vec![contact("Centro", "first@example.com"), contact("Centro", "second@example.com")];
        let reference = ReferenceData::index(&profiles, &contacts);

        let (dataset, _) = enrich(1, vec![sale(1, 1, "a", 1.0)], &reference);
        assert_eq!(dataset.rows.len(), 1);
        assert_eq!(dataset.rows[0].manager.as_deref(), Some("Ana"));
        assert_eq!(dataset.rows[0].email.as_deref(), Some("first@example.com"));
    }
}
