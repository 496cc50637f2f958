use crate::domain::reading::{register_increment, MeterReading, VehicleReading};
use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only meter history row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterHistoryRecord {
    pub id: String,
    pub meter_id: String,
    pub kwh_consumed_ac: f64,
    pub voltage: f64,
    pub current_a: Option<f64>,
    pub device_timestamp: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    /// Vehicle correlated with the meter when the reading was ingested
    pub vehicle_id: Option<String>,
}

impl MeterHistoryRecord {
    pub fn from_reading(
        id: String,
        reading: &MeterReading,
        ingested_at: DateTime<Utc>,
        vehicle_id: Option<String>,
    ) -> Self {
        Self {
            id,
            meter_id: reading.meter_id.clone(),
            kwh_consumed_ac: reading.kwh_consumed_ac,
            voltage: reading.voltage,
            current_a: reading.current_a,
            device_timestamp: reading.timestamp,
            ingested_at,
            vehicle_id,
        }
    }
}

/// Append-only vehicle history row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleHistoryRecord {
    pub id: String,
    pub vehicle_id: String,
    pub soc_percent: f64,
    pub kwh_delivered_dc: f64,
    pub battery_temp_c: f64,
    pub charge_power_kw: Option<f64>,
    pub device_timestamp: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    /// Meter correlated with the vehicle when the reading was ingested
    pub meter_id: Option<String>,
}

impl VehicleHistoryRecord {
    pub fn from_reading(
        id: String,
        reading: &VehicleReading,
        ingested_at: DateTime<Utc>,
        meter_id: Option<String>,
    ) -> Self {
        Self {
            id,
            vehicle_id: reading.vehicle_id.clone(),
            soc_percent: reading.soc_percent,
            kwh_delivered_dc: reading.kwh_delivered_dc,
            battery_temp_c: reading.battery_temp_c,
            charge_power_kw: reading.charge_power_kw,
            device_timestamp: reading.timestamp,
            ingested_at,
            meter_id,
        }
    }
}

/// Consumption attributed to a single meter history row
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionSample {
    pub meter_id: String,
    pub device_timestamp: DateTime<Utc>,
    /// Peer tag carried by the underlying history row
    pub vehicle_id: Option<String>,
    pub kwh: f64,
}

/// Derive per-row consumption from meter register samples.
///
/// Rows may arrive in any order; they are ordered per meter by device
/// timestamp before applying the same-day register rule.
pub fn consumption_samples(records: &[MeterHistoryRecord]) -> Vec<ConsumptionSample> {
    let mut ordered: Vec<&MeterHistoryRecord> = records.iter().collect();
    ordered.sort_by(|a, b| {
        a.meter_id
            .cmp(&b.meter_id)
            .then(a.device_timestamp.cmp(&b.device_timestamp))
            .then(a.id.cmp(&b.id))
    });

    let mut samples = Vec::with_capacity(ordered.len());
    let mut previous: Option<&MeterHistoryRecord> = None;
    for record in ordered {
        let prev = previous
            .filter(|p| p.meter_id == record.meter_id)
            .map(|p| (p.device_timestamp, p.kwh_consumed_ac));
        samples.push(ConsumptionSample {
            meter_id: record.meter_id.clone(),
            device_timestamp: record.device_timestamp,
            vehicle_id: record.vehicle_id.clone(),
            kwh: register_increment(prev, record.device_timestamp, record.kwh_consumed_ac),
        });
        previous = Some(record);
    }
    samples
}

/// Read side of the Cold Store. Every scan is inclusive on both window ends
/// and ordered by device timestamp.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Meter rows for one meter
    async fn scan_meter_range(
        &self,
        meter_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterHistoryRecord>>;

    /// Meter rows tagged with the given vehicle at ingestion time
    async fn scan_meter_range_by_vehicle(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterHistoryRecord>>;

    /// Vehicle rows for one vehicle
    async fn scan_vehicle_range(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<VehicleHistoryRecord>>;

    /// Meter rows of every meter
    async fn scan_meter_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterHistoryRecord>>;

    /// Vehicle rows of every vehicle
    async fn scan_vehicle_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<VehicleHistoryRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(id: &str, meter_id: &str, hour: u32, day: u32, kwh: f64) -> MeterHistoryRecord {
        MeterHistoryRecord {
            id: id.to_string(),
            meter_id: meter_id.to_string(),
            kwh_consumed_ac: kwh,
            voltage: 240.0,
            current_a: None,
            device_timestamp: Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap(),
            ingested_at: Utc::now(),
            vehicle_id: None,
        }
    }

    #[test]
    fn test_consumption_samples_order_independent() {
        // delivered out of order
        let records = vec![
            row("c", "M1", 12, 1, 16.0),
            row("a", "M1", 8, 1, 10.0),
            row("d", "M1", 1, 2, 2.0),
        ];
        let samples = consumption_samples(&records);
        let kwh: Vec<f64> = samples.iter().map(|s| s.kwh).collect();
        assert_eq!(kwh, vec![10.0, 6.0, 2.0]);
    }

    #[test]
    fn test_consumption_samples_per_meter() {
        let records = vec![
            row("a", "M1", 8, 1, 10.0),
            row("b", "M2", 9, 1, 4.0),
            row("c", "M1", 10, 1, 11.5),
            row("d", "M2", 11, 1, 5.0),
        ];
        let samples = consumption_samples(&records);
        let m1: f64 = samples.iter().filter(|s| s.meter_id == "M1").map(|s| s.kwh).sum();
        let m2: f64 = samples.iter().filter(|s| s.meter_id == "M2").map(|s| s.kwh).sum();
        assert_eq!(m1, 11.5);
        assert_eq!(m2, 5.0);
    }
}
