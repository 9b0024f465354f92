use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::driver::{Driver, DriverPatch, TrackingSession};
use crate::models::parcel::{Parcel, TrackingNumber};
use crate::models::records::{newest_first, ApprovalLog, LocationHistory, TrackingEvent};
use crate::models::service::Service;
use crate::store::{
    CommitOutcome, ParcelCommit, ParcelFilter, RecordStore, StoreError, TrackingSnapshot,
    Versioned,
};

/// DashMap-backed store. Lock order is index → parcels → logs, and no guard
/// is ever held across an `.await`.
#[derive(Default)]
pub struct InMemoryStore {
    parcels: DashMap<Uuid, Versioned<Parcel>>,
    tracking_index: DashMap<TrackingNumber, Uuid>,
    events: DashMap<Uuid, Vec<TrackingEvent>>,
    approval_logs: DashMap<Uuid, Vec<ApprovalLog>>,
    locations: DashMap<Uuid, Vec<LocationHistory>>,
    drivers: DashMap<Uuid, Driver>,
    driver_users: DashMap<String, Uuid>,
    services: DashMap<Uuid, Service>,
    sessions: DashMap<Uuid, TrackingSession>,
    open_sessions: DashMap<Uuid, Uuid>,
    sequence: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parcel_count(&self) -> usize {
        self.parcels.len()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn append_event(&self, parcel_id: Uuid, mut event: TrackingEvent) -> TrackingEvent {
        event.sequence = self.next_sequence();
        self.events
            .entry(parcel_id)
            .or_default()
            .push(event.clone());
        event
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_parcel(
        &self,
        parcel: Parcel,
        event: TrackingEvent,
    ) -> Result<CommitOutcome, StoreError> {
        match self.tracking_index.entry(parcel.tracking_number.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!(
                "tracking number {}",
                parcel.tracking_number
            ))),
            Entry::Vacant(slot) => {
                let _index = slot.insert(parcel.id);
                let stored = Versioned {
                    version: 1,
                    record: parcel,
                };
                self.parcels.insert(stored.record.id, stored.clone());
                let event = self.append_event(stored.record.id, event);

                Ok(CommitOutcome {
                    parcel: stored,
                    event: Some(event),
                })
            }
        }
    }

    async fn parcel(&self, id: Uuid) -> Result<Option<Versioned<Parcel>>, StoreError> {
        Ok(self.parcels.get(&id).map(|entry| entry.value().clone()))
    }

    async fn parcel_by_tracking_number(
        &self,
        tracking_number: &TrackingNumber,
    ) -> Result<Option<Versioned<Parcel>>, StoreError> {
        let id = match self.tracking_index.get(tracking_number) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        Ok(self.parcels.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_parcels(&self, filter: &ParcelFilter) -> Result<Vec<Parcel>, StoreError> {
        let mut parcels: Vec<Parcel> = self
            .parcels
            .iter()
            .filter(|entry| filter.matches(&entry.value().record))
            .map(|entry| entry.value().record.clone())
            .collect();

        parcels.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(parcels)
    }

    async fn commit_parcel(&self, commit: ParcelCommit) -> Result<CommitOutcome, StoreError> {
        let ParcelCommit {
            mut parcel,
            expected_version,
            event,
            approval_log,
            location,
        } = commit;

        let mut entry = self
            .parcels
            .get_mut(&parcel.id)
            .ok_or_else(|| StoreError::NotFound(format!("parcel {}", parcel.id)))?;

        if entry.version != expected_version {
            return Err(StoreError::VersionConflict {
                record: format!("parcel {}", parcel.id),
                expected: expected_version,
                actual: entry.version,
            });
        }

        // identity fields are write-once
        parcel.tracking_number = entry.record.tracking_number.clone();
        parcel.created_at = entry.record.created_at;
        parcel.updated_at = Utc::now();

        entry.version += 1;
        entry.record = parcel;
        let stored = entry.value().clone();

        let event = event.map(|event| self.append_event(stored.record.id, event));

        if let Some(mut log) = approval_log {
            log.sequence = self.next_sequence();
            self.approval_logs
                .entry(stored.record.id)
                .or_default()
                .push(log);
        }

        if let Some(mut row) = location {
            row.sequence = self.next_sequence();
            self.locations
                .entry(stored.record.id)
                .or_default()
                .push(row);
        }

        drop(entry);

        Ok(CommitOutcome {
            parcel: stored,
            event,
        })
    }

    async fn tracking_snapshot(
        &self,
        parcel_id: Uuid,
        location_limit: usize,
    ) -> Result<Option<TrackingSnapshot>, StoreError> {
        // holding the parcel guard keeps writers of this parcel out until
        // every part of the snapshot has been copied
        let Some(entry) = self.parcels.get(&parcel_id) else {
            return Ok(None);
        };

        let mut events = self
            .events
            .get(&parcel_id)
            .map(|rows| rows.value().clone())
            .unwrap_or_default();
        events.sort_by(|a, b| newest_first(&a.timestamp, a.sequence, &b.timestamp, b.sequence));

        let mut recent_locations = self
            .locations
            .get(&parcel_id)
            .map(|rows| rows.value().clone())
            .unwrap_or_default();
        recent_locations
            .sort_by(|a, b| newest_first(&a.timestamp, a.sequence, &b.timestamp, b.sequence));
        recent_locations.truncate(location_limit);

        let parcel = entry.value().record.clone();
        drop(entry);

        Ok(Some(TrackingSnapshot {
            parcel,
            events,
            recent_locations,
        }))
    }

    async fn approval_logs(&self, parcel_id: Uuid) -> Result<Vec<ApprovalLog>, StoreError> {
        let mut logs = self
            .approval_logs
            .get(&parcel_id)
            .map(|rows| rows.value().clone())
            .unwrap_or_default();
        logs.sort_by(|a, b| newest_first(&a.timestamp, a.sequence, &b.timestamp, b.sequence));
        Ok(logs)
    }

    async fn driver_location_history(
        &self,
        driver_id: Uuid,
        limit: usize,
    ) -> Result<Vec<LocationHistory>, StoreError> {
        let mut rows: Vec<LocationHistory> = self
            .locations
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|row| row.driver_id == driver_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        rows.sort_by(|a, b| newest_first(&a.timestamp, a.sequence, &b.timestamp, b.sequence));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert_driver(&self, driver: Driver) -> Result<Driver, StoreError> {
        match self.driver_users.entry(driver.user_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!(
                "driver for user {}",
                driver.user_id
            ))),
            Entry::Vacant(slot) => {
                let _index = slot.insert(driver.id);
                self.drivers.insert(driver.id, driver.clone());
                Ok(driver)
            }
        }
    }

    async fn driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError> {
        Ok(self.drivers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn driver_by_user(&self, user_id: &str) -> Result<Option<Driver>, StoreError> {
        let id = match self.driver_users.get(user_id) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        Ok(self.drivers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_driver(&self, id: Uuid, patch: DriverPatch) -> Result<Driver, StoreError> {
        let mut driver = self
            .drivers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("driver {id}")))?;

        patch.apply(&mut driver);
        Ok(driver.clone())
    }

    async fn list_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        let mut drivers: Vec<Driver> = self
            .drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        drivers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(drivers)
    }

    async fn insert_service(&self, service: Service) -> Result<Service, StoreError> {
        self.services.insert(service.id, service.clone());
        Ok(service)
    }

    async fn service(&self, id: Uuid) -> Result<Option<Service>, StoreError> {
        Ok(self.services.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        let mut services: Vec<Service> = self
            .services
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    async fn open_session(&self, session: TrackingSession) -> Result<TrackingSession, StoreError> {
        match self.open_sessions.entry(session.driver_id) {
            Entry::Occupied(open) => self
                .sessions
                .get(open.get())
                .map(|entry| entry.value().clone())
                .ok_or_else(|| StoreError::NotFound(format!("session {}", open.get()))),
            Entry::Vacant(slot) => {
                let _index = slot.insert(session.id);
                self.sessions.insert(session.id, session.clone());
                Ok(session)
            }
        }
    }

    async fn active_session(&self, driver_id: Uuid) -> Result<Option<TrackingSession>, StoreError> {
        let id = match self.open_sessions.get(&driver_id) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        Ok(self.sessions.get(&id).map(|entry| entry.value().clone()))
    }

    async fn close_session(
        &self,
        driver_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<TrackingSession>, StoreError> {
        let Some((_, session_id)) = self.open_sessions.remove(&driver_id) else {
            return Ok(None);
        };

        Ok(self.sessions.get_mut(&session_id).map(|mut session| {
            session.end_time = Some(at);
            session.clone()
        }))
    }

    async fn record_session_fix(
        &self,
        session_id: Uuid,
        distance_km: f64,
    ) -> Result<TrackingSession, StoreError> {
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;

        session.locations_count += 1;
        session.distance_traveled_km += distance_km.max(0.0);
        Ok(session.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::InMemoryStore;
    use crate::models::driver::GeoPoint;
    use crate::models::parcel::{ApprovalStatus, Contact, Parcel, ParcelStatus, TrackingNumber};
    use crate::models::records::{LocationHistory, TrackingEvent};
    use crate::store::{ParcelCommit, RecordStore, StoreError};

    fn parcel(tracking_number: &str) -> Parcel {
        let contact = Contact {
            name: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            phone: "+255712345678".to_string(),
        };
        Parcel {
            id: Uuid::new_v4(),
            tracking_number: TrackingNumber::parse(tracking_number).unwrap(),
            sender: contact.clone(),
            receiver: contact,
            pickup_location: "Kariakoo".to_string(),
            delivery_location: "Mwenge".to_string(),
            weight: 1.0,
            dimensions: None,
            declared_value: None,
            special_instructions: None,
            service_id: None,
            assigned_driver: None,
            status: ParcelStatus::Pending,
            approval_status: ApprovalStatus::Pending,
            current_location: None,
            estimated_delivery: None,
            pickup_time: None,
            delivery_time: None,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn event(parcel: &Parcel, label: &str) -> TrackingEvent {
        TrackingEvent::new(parcel.id, parcel.tracking_number.clone(), label, label, None)
    }

    #[tokio::test]
    async fn duplicate_tracking_number_is_rejected() {
        let store = InMemoryStore::new();
        let first = parcel("ABCD1234");
        let second = parcel("ABCD1234");

        store
            .insert_parcel(first.clone(), event(&first, "Awaiting_Approval"))
            .await
            .unwrap();
        let err = store
            .insert_parcel(second.clone(), event(&second, "Awaiting_Approval"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.parcel_count(), 1);
    }

    #[tokio::test]
    async fn stale_commit_is_refused_and_leaves_logs_untouched() {
        let store = InMemoryStore::new();
        let p = parcel("ZXCV0987");
        let created = store
            .insert_parcel(p.clone(), event(&p, "Awaiting_Approval"))
            .await
            .unwrap();

        let mut updated = created.parcel.record.clone();
        updated.status = ParcelStatus::Approved;
        store
            .commit_parcel(ParcelCommit::new(updated.clone(), 1).with_event(event(&p, "Approved")))
            .await
            .unwrap();

        let err = store
            .commit_parcel(ParcelCommit::new(updated, 1).with_event(event(&p, "Approved")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));

        let snapshot = store.tracking_snapshot(p.id, 10).await.unwrap().unwrap();
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.events[0].status, "Approved");
    }

    #[tokio::test]
    async fn location_ties_are_broken_by_insertion_order() {
        let store = InMemoryStore::new();
        let p = parcel("QWER5678");
        let created = store
            .insert_parcel(p.clone(), event(&p, "Awaiting_Approval"))
            .await
            .unwrap();

        let driver_id = Uuid::new_v4();
        let same_instant = Utc::now();
        let row = |address: &str| LocationHistory {
            id: Uuid::new_v4(),
            parcel_id: p.id,
            driver_id,
            latitude: 1.0,
            longitude: 2.0,
            timestamp: same_instant,
            address: address.to_string(),
            status: ParcelStatus::InTransit,
            tracking_session: None,
            sequence: 0,
        };

        let mut version = created.parcel.version;
        for (address, at) in [
            ("first", same_instant),
            ("second", same_instant),
            ("older", same_instant - Duration::minutes(5)),
        ] {
            let mut location = row(address);
            location.timestamp = at;
            let mut record = created.parcel.record.clone();
            record.current_location = Some(GeoPoint { lat: 1.0, lng: 2.0 });
            let outcome = store
                .commit_parcel(ParcelCommit::new(record, version).with_location(location))
                .await
                .unwrap();
            version = outcome.parcel.version;
        }

        let snapshot = store.tracking_snapshot(p.id, 10).await.unwrap().unwrap();
        let order: Vec<&str> = snapshot
            .recent_locations
            .iter()
            .map(|row| row.address.as_str())
            .collect();
        assert_eq!(order, vec!["second", "first", "older"]);

        let by_driver = store.driver_location_history(driver_id, 2).await.unwrap();
        assert_eq!(by_driver.len(), 2);
    }
}
