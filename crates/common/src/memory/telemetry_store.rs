use crate::domain::{
    pick_canonical_link, CorrelationLink, CorrelationRepository, DomainError, DomainResult,
    HistoryRepository, MeterHistoryRecord, MeterStatus, MeterStatusUpsert, StatusRepository,
    TelemetryStore, TelemetryTransaction, VehicleHistoryRecord, VehicleStatus,
    VehicleStatusUpsert,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

type HistoryKey = (String, DateTime<Utc>, String);
/// Uniqueness key of a history row, matching the partitioned table's primary key
type HistoryId = (String, DateTime<Utc>);

#[derive(Default)]
struct TelemetryState {
    meter_history: BTreeMap<HistoryKey, MeterHistoryRecord>,
    vehicle_history: BTreeMap<HistoryKey, VehicleHistoryRecord>,
    meter_history_ids: HashSet<HistoryId>,
    vehicle_history_ids: HashSet<HistoryId>,
    meter_status: HashMap<String, MeterStatus>,
    vehicle_status: HashMap<String, VehicleStatus>,
    links: Vec<CorrelationLink>,
}

impl TelemetryState {
    fn active_vehicle_for(&self, meter_id: &str) -> Option<String> {
        let candidates = self
            .links
            .iter()
            .filter(|l| l.is_active && l.meter_id == meter_id)
            .cloned()
            .collect();
        pick_canonical_link(meter_id, candidates).map(|l| l.vehicle_id)
    }

    fn active_meter_for(&self, vehicle_id: &str) -> Option<String> {
        let candidates = self
            .links
            .iter()
            .filter(|l| l.is_active && l.vehicle_id == vehicle_id)
            .cloned()
            .collect();
        pick_canonical_link(vehicle_id, candidates).map(|l| l.meter_id)
    }
}

fn scan_device<T: Clone>(
    history: &BTreeMap<HistoryKey, T>,
    device_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<T> {
    history
        .range((device_id.to_string(), from, String::new())..)
        .take_while(|((device, at, _), _)| device == device_id && *at <= to)
        .map(|(_, record)| record.clone())
        .collect()
}

/// Process-local store backing all four storage traits.
///
/// A transaction holds the state lock from `begin` until it finishes, so
/// transactions are serialised and readers only ever see committed data.
/// Changes made inside a transaction are recorded in an undo log that is
/// replayed on rollback or drop.
#[derive(Clone, Default)]
pub struct InMemoryTelemetryStore {
    state: Arc<Mutex<TelemetryState>>,
}

impl InMemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetryStore for InMemoryTelemetryStore {
    async fn begin(&self) -> DomainResult<Box<dyn TelemetryTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryTelemetryTransaction {
            state: Some(guard),
            undo: Vec::new(),
        }))
    }
}

enum Undo {
    MeterHistory(HistoryKey),
    VehicleHistory(HistoryKey),
    MeterStatus(String, Option<MeterStatus>),
    VehicleStatus(String, Option<VehicleStatus>),
}

pub struct InMemoryTelemetryTransaction {
    state: Option<OwnedMutexGuard<TelemetryState>>,
    undo: Vec<Undo>,
}

impl InMemoryTelemetryTransaction {
    fn state(&mut self) -> DomainResult<&mut TelemetryState> {
        self.state.as_deref_mut().ok_or_else(|| {
            DomainError::RepositoryError(anyhow::anyhow!("transaction already finished"))
        })
    }

    fn revert(&mut self) {
        let Some(state) = self.state.as_deref_mut() else {
            return;
        };
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::MeterHistory(key) => {
                    if let Some(record) = state.meter_history.remove(&key) {
                        state
                            .meter_history_ids
                            .remove(&(record.id, record.device_timestamp));
                    }
                }
                Undo::VehicleHistory(key) => {
                    if let Some(record) = state.vehicle_history.remove(&key) {
                        state
                            .vehicle_history_ids
                            .remove(&(record.id, record.device_timestamp));
                    }
                }
                Undo::MeterStatus(meter_id, previous) => match previous {
                    Some(row) => {
                        state.meter_status.insert(meter_id, row);
                    }
                    None => {
                        state.meter_status.remove(&meter_id);
                    }
                },
                Undo::VehicleStatus(vehicle_id, previous) => match previous {
                    Some(row) => {
                        state.vehicle_status.insert(vehicle_id, row);
                    }
                    None => {
                        state.vehicle_status.remove(&vehicle_id);
                    }
                },
            }
        }
    }
}

impl Drop for InMemoryTelemetryTransaction {
    fn drop(&mut self) {
        if self.state.is_some() {
            if !self.undo.is_empty() {
                warn!(pending_changes = self.undo.len(), "telemetry transaction dropped while open, rolling back");
            }
            self.revert();
        }
    }
}

#[async_trait]
impl TelemetryTransaction for InMemoryTelemetryTransaction {
    async fn find_active_vehicle_for(&mut self, meter_id: &str) -> DomainResult<Option<String>> {
        Ok(self.state()?.active_vehicle_for(meter_id))
    }

    async fn find_active_meter_for(&mut self, vehicle_id: &str) -> DomainResult<Option<String>> {
        Ok(self.state()?.active_meter_for(vehicle_id))
    }

    async fn append_meter_history(&mut self, record: &MeterHistoryRecord) -> DomainResult<()> {
        let state = self.state()?;
        if !state
            .meter_history_ids
            .insert((record.id.clone(), record.device_timestamp))
        {
            return Err(DomainError::DuplicateHistoryRecord(record.id.clone()));
        }
        let key = (
            record.meter_id.clone(),
            record.device_timestamp,
            record.id.clone(),
        );
        state.meter_history.insert(key.clone(), record.clone());
        self.undo.push(Undo::MeterHistory(key));
        Ok(())
    }

    async fn append_vehicle_history(&mut self, record: &VehicleHistoryRecord) -> DomainResult<()> {
        let state = self.state()?;
        if !state
            .vehicle_history_ids
            .insert((record.id.clone(), record.device_timestamp))
        {
            return Err(DomainError::DuplicateHistoryRecord(record.id.clone()));
        }
        let key = (
            record.vehicle_id.clone(),
            record.device_timestamp,
            record.id.clone(),
        );
        state.vehicle_history.insert(key.clone(), record.clone());
        self.undo.push(Undo::VehicleHistory(key));
        Ok(())
    }

    async fn upsert_meter_status(&mut self, upsert: &MeterStatusUpsert) -> DomainResult<MeterStatus> {
        let state = self.state()?;
        let previous = state.meter_status.get(&upsert.meter_id).cloned();
        let row = MeterStatus::apply(previous.as_ref(), upsert);
        state.meter_status.insert(upsert.meter_id.clone(), row.clone());
        self.undo.push(Undo::MeterStatus(upsert.meter_id.clone(), previous));
        Ok(row)
    }

    async fn upsert_vehicle_status(
        &mut self,
        upsert: &VehicleStatusUpsert,
    ) -> DomainResult<VehicleStatus> {
        let state = self.state()?;
        let previous = state.vehicle_status.get(&upsert.vehicle_id).cloned();
        let row = VehicleStatus::apply(previous.as_ref(), upsert);
        state
            .vehicle_status
            .insert(upsert.vehicle_id.clone(), row.clone());
        self.undo
            .push(Undo::VehicleStatus(upsert.vehicle_id.clone(), previous));
        Ok(row)
    }

    async fn commit(&mut self) -> DomainResult<()> {
        self.state()?;
        debug!(changes = self.undo.len(), "committed in-memory transaction");
        self.undo.clear();
        self.state = None;
        Ok(())
    }

    async fn rollback(&mut self) -> DomainResult<()> {
        self.state()?;
        self.revert();
        self.state = None;
        Ok(())
    }
}

#[async_trait]
impl HistoryRepository for InMemoryTelemetryStore {
    async fn scan_meter_range(
        &self,
        meter_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterHistoryRecord>> {
        let state = self.state.lock().await;
        Ok(scan_device(&state.meter_history, meter_id, from, to))
    }

    async fn scan_meter_range_by_vehicle(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterHistoryRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<MeterHistoryRecord> = state
            .meter_history
            .values()
            .filter(|r| {
                r.vehicle_id.as_deref() == Some(vehicle_id)
                    && r.device_timestamp >= from
                    && r.device_timestamp <= to
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.device_timestamp
                .cmp(&b.device_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    async fn scan_vehicle_range(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<VehicleHistoryRecord>> {
        let state = self.state.lock().await;
        Ok(scan_device(&state.vehicle_history, vehicle_id, from, to))
    }

    async fn scan_meter_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterHistoryRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<MeterHistoryRecord> = state
            .meter_history
            .values()
            .filter(|r| r.device_timestamp >= from && r.device_timestamp <= to)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.device_timestamp
                .cmp(&b.device_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    async fn scan_vehicle_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<VehicleHistoryRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<VehicleHistoryRecord> = state
            .vehicle_history
            .values()
            .filter(|r| r.device_timestamp >= from && r.device_timestamp <= to)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.device_timestamp
                .cmp(&b.device_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }
}

#[async_trait]
impl StatusRepository for InMemoryTelemetryStore {
    async fn get_meter_status(&self, meter_id: &str) -> DomainResult<Option<MeterStatus>> {
        Ok(self.state.lock().await.meter_status.get(meter_id).cloned())
    }

    async fn get_vehicle_status(&self, vehicle_id: &str) -> DomainResult<Option<VehicleStatus>> {
        Ok(self.state.lock().await.vehicle_status.get(vehicle_id).cloned())
    }

    async fn list_meter_statuses_since(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<MeterStatus>> {
        let state = self.state.lock().await;
        let mut rows: Vec<MeterStatus> = state
            .meter_status
            .values()
            .filter(|s| s.last_reading_at >= cutoff)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.meter_id.cmp(&b.meter_id));
        Ok(rows)
    }

    async fn list_vehicle_statuses_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> DomainResult<Vec<VehicleStatus>> {
        let state = self.state.lock().await;
        let mut rows: Vec<VehicleStatus> = state
            .vehicle_status
            .values()
            .filter(|s| s.last_reading_at >= cutoff)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        Ok(rows)
    }

    async fn list_vehicles_with_temperature_at_least(
        &self,
        min_temp_c: f64,
    ) -> DomainResult<Vec<VehicleStatus>> {
        let state = self.state.lock().await;
        let mut rows: Vec<VehicleStatus> = state
            .vehicle_status
            .values()
            .filter(|s| s.battery_temp_c >= min_temp_c)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.battery_temp_c
                .total_cmp(&a.battery_temp_c)
                .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
        });
        Ok(rows)
    }

    async fn set_meter_peer(&self, meter_id: &str, vehicle_id: Option<String>) -> DomainResult<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state.meter_status.get_mut(meter_id) else {
            return Ok(false);
        };
        row.vehicle_id = vehicle_id;
        row.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_vehicle_peer(&self, vehicle_id: &str, meter_id: Option<String>) -> DomainResult<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state.vehicle_status.get_mut(vehicle_id) else {
            return Ok(false);
        };
        row.meter_id = meter_id;
        row.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl CorrelationRepository for InMemoryTelemetryStore {
    async fn set_link(&self, meter_id: &str, vehicle_id: &str) -> DomainResult<CorrelationLink> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut retired = 0;
        for link in state.links.iter_mut().filter(|l| {
            l.is_active
                && ((l.meter_id == meter_id) != (l.vehicle_id == vehicle_id))
        }) {
            link.is_active = false;
            link.updated_at = now;
            retired += 1;
        }

        let link = match state
            .links
            .iter_mut()
            .find(|l| l.meter_id == meter_id && l.vehicle_id == vehicle_id)
        {
            Some(existing) => {
                existing.is_active = true;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let link = CorrelationLink {
                    meter_id: meter_id.to_string(),
                    vehicle_id: vehicle_id.to_string(),
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                };
                state.links.push(link.clone());
                link
            }
        };

        info!(meter_id = %meter_id, vehicle_id = %vehicle_id, retired_links = retired, "correlation link activated");
        Ok(link)
    }

    async fn deactivate_link(
        &self,
        meter_id: &str,
        vehicle_id: &str,
    ) -> DomainResult<Option<CorrelationLink>> {
        let mut state = self.state.lock().await;
        Ok(state
            .links
            .iter_mut()
            .find(|l| l.meter_id == meter_id && l.vehicle_id == vehicle_id)
            .map(|link| {
                link.is_active = false;
                link.updated_at = Utc::now();
                link.clone()
            }))
    }

    async fn find_active_vehicle_for(&self, meter_id: &str) -> DomainResult<Option<String>> {
        Ok(self.state.lock().await.active_vehicle_for(meter_id))
    }

    async fn find_active_meter_for(&self, vehicle_id: &str) -> DomainResult<Option<String>> {
        Ok(self.state.lock().await.active_meter_for(vehicle_id))
    }

    async fn list_links_for_meter(&self, meter_id: &str) -> DomainResult<Vec<CorrelationLink>> {
        let state = self.state.lock().await;
        let mut links: Vec<CorrelationLink> = state
            .links
            .iter()
            .filter(|l| l.meter_id == meter_id)
            .cloned()
            .collect();
        links.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
        });
        Ok(links)
    }

    async fn list_links_for_vehicle(&self, vehicle_id: &str) -> DomainResult<Vec<CorrelationLink>> {
        let state = self.state.lock().await;
        let mut links: Vec<CorrelationLink> = state
            .links
            .iter()
            .filter(|l| l.vehicle_id == vehicle_id)
            .cloned()
            .collect();
        links.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.meter_id.cmp(&b.meter_id))
        });
        Ok(links)
    }

    async fn list_active_links(&self) -> DomainResult<Vec<CorrelationLink>> {
        let state = self.state.lock().await;
        let mut links: Vec<CorrelationLink> =
            state.links.iter().filter(|l| l.is_active).cloned().collect();
        links.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.meter_id.cmp(&b.meter_id))
                .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
        });
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::active_meters_by_vehicle;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
    }

    fn meter_record(id: &str, meter_id: &str, ts: DateTime<Utc>, kwh: f64) -> MeterHistoryRecord {
        MeterHistoryRecord {
            id: id.to_string(),
            meter_id: meter_id.to_string(),
            kwh_consumed_ac: kwh,
            voltage: 230.0,
            current_a: None,
            device_timestamp: ts,
            ingested_at: ts,
            vehicle_id: None,
        }
    }

    fn meter_upsert(meter_id: &str, ts: DateTime<Utc>, kwh: f64) -> MeterStatusUpsert {
        MeterStatusUpsert {
            meter_id: meter_id.to_string(),
            kwh_consumed_ac: kwh,
            voltage: 230.0,
            current_a: None,
            reading_at: ts,
            vehicle_id: None,
            state: crate::domain::DeviceState::Online,
            updated_at: ts,
        }
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = InMemoryTelemetryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.append_meter_history(&meter_record("h1", "M1", at(10, 0), 10.0))
            .await
            .unwrap();
        tx.upsert_meter_status(&meter_upsert("M1", at(10, 0), 10.0))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        let status = store.get_meter_status("M1").await.unwrap().unwrap();
        assert_eq!(status.daily_kwh_consumed, 10.0);
        let history = store.scan_meter_range("M1", at(0, 0), at(23, 0)).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_restores_previous_rows() {
        let store = InMemoryTelemetryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_meter_status(&meter_upsert("M1", at(10, 0), 10.0))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        tx.append_meter_history(&meter_record("h2", "M1", at(11, 0), 16.0))
            .await
            .unwrap();
        tx.upsert_meter_status(&meter_upsert("M1", at(11, 0), 16.0))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        drop(tx);

        let status = store.get_meter_status("M1").await.unwrap().unwrap();
        assert_eq!(status.kwh_consumed_ac, 10.0);
        assert!(store
            .scan_meter_range("M1", at(0, 0), at(23, 0))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_drop_without_commit_rolls_back() {
        let store = InMemoryTelemetryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.append_meter_history(&meter_record("h1", "M1", at(10, 0), 10.0))
                .await
                .unwrap();
            tx.upsert_meter_status(&meter_upsert("M1", at(10, 0), 10.0))
                .await
                .unwrap();
        }
        assert!(store.get_meter_status("M1").await.unwrap().is_none());

        // the id is free again after rollback
        let mut tx = store.begin().await.unwrap();
        tx.append_meter_history(&meter_record("h1", "M1", at(10, 0), 10.0))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_history_id_rejected() {
        let store = InMemoryTelemetryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.append_meter_history(&meter_record("h1", "M1", at(10, 0), 10.0))
            .await
            .unwrap();
        let result = tx
            .append_meter_history(&meter_record("h1", "M1", at(10, 0), 12.0))
            .await;
        assert!(matches!(result, Err(DomainError::DuplicateHistoryRecord(id)) if id == "h1"));
    }

    #[tokio::test]
    async fn test_history_id_is_unique_per_timestamp() {
        let store = InMemoryTelemetryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.append_meter_history(&meter_record("h1", "M1", at(10, 0), 10.0))
            .await
            .unwrap();
        tx.append_meter_history(&meter_record("h1", "M1", at(10, 5), 12.0))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        drop(tx);

        // rolled back keys are free again
        let mut tx = store.begin().await.unwrap();
        tx.append_meter_history(&meter_record("h1", "M1", at(10, 0), 10.0))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        let rows = store.scan_meter_range("M1", at(9, 0), at(11, 0)).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_is_inclusive_and_ordered_regardless_of_insertion() {
        let store = InMemoryTelemetryStore::new();
        let mut tx = store.begin().await.unwrap();
        for (id, minute) in [("c", 30), ("a", 0), ("d", 45), ("b", 15)] {
            tx.append_meter_history(&meter_record(id, "M1", at(10, minute), 1.0))
                .await
                .unwrap();
        }
        tx.append_meter_history(&meter_record("other", "M2", at(10, 15), 1.0))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        let rows = store.scan_meter_range("M1", at(10, 0), at(10, 30)).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let window = store.scan_meter_window(at(10, 15), at(10, 15)).await.unwrap();
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn test_set_link_keeps_single_active_link() {
        let store = InMemoryTelemetryStore::new();
        store.set_link("M1", "V1").await.unwrap();
        store.set_link("M1", "V2").await.unwrap();
        store.set_link("M3", "V2").await.unwrap();

        assert_eq!(store.find_active_vehicle_for("M1").await.unwrap(), None);
        assert_eq!(
            store.find_active_meter_for("V2").await.unwrap(),
            Some("M3".to_string())
        );
        let links = store.list_links_for_vehicle("V2").await.unwrap();
        assert_eq!(links.iter().filter(|l| l.is_active).count(), 1);

        // reactivating an existing pair reuses the row
        store.set_link("M1", "V1").await.unwrap();
        assert_eq!(store.list_links_for_meter("M1").await.unwrap().len(), 2);
        assert_eq!(
            store.find_active_vehicle_for("M1").await.unwrap(),
            Some("V1".to_string())
        );
    }

    #[tokio::test]
    async fn test_list_active_links_maps_every_linked_vehicle() {
        let store = InMemoryTelemetryStore::new();
        store.set_link("M1", "V1").await.unwrap();
        store.set_link("M2", "V2").await.unwrap();
        store.set_link("M3", "V3").await.unwrap();
        store.deactivate_link("M3", "V3").await.unwrap();

        let links = store.list_active_links().await.unwrap();
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.is_active));

        let by_vehicle = active_meters_by_vehicle(links);
        assert_eq!(by_vehicle.get("V1").map(String::as_str), Some("M1"));
        assert_eq!(by_vehicle.get("V2").map(String::as_str), Some("M2"));
        assert!(!by_vehicle.contains_key("V3"));
    }

    #[tokio::test]
    async fn test_temperature_listing_orders_hottest_first() {
        let store = InMemoryTelemetryStore::new();
        let mut tx = store.begin().await.unwrap();
        for (id, temp) in [("V1", 40.0), ("V2", 58.0), ("V3", 47.0)] {
            tx.upsert_vehicle_status(&VehicleStatusUpsert {
                vehicle_id: id.to_string(),
                soc_percent: 50.0,
                kwh_delivered_dc: 0.0,
                battery_temp_c: temp,
                charge_power_kw: None,
                reading_at: at(9, 0),
                meter_id: None,
                state: crate::domain::DeviceState::Idle,
                updated_at: at(9, 0) + Duration::seconds(1),
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();
        drop(tx);

        let hot = store.list_vehicles_with_temperature_at_least(45.0).await.unwrap();
        let ids: Vec<&str> = hot.iter().map(|v| v.vehicle_id.as_str()).collect();
        assert_eq!(ids, vec!["V2", "V3"]);
    }

    #[tokio::test]
    async fn test_set_peer_on_missing_row_returns_false() {
        let store = InMemoryTelemetryStore::new();
        assert!(!store.set_meter_peer("M9", Some("V1".into())).await.unwrap());
    }
}
