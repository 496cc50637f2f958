use crate::domain::{
    summary_warning, with_storage_timeout, EfficiencyBand, EfficiencyRatio, EfficiencyThresholds,
    TimeWindow,
};
use chrono::{DateTime, DurationRound, Utc};
use common::domain::{
    active_meters_by_vehicle, consumption_samples, ConsumptionSample, CorrelationRepository, DomainError, DomainResult,
    HistoryRepository, VehicleHistoryRecord,
};
use garde::Validate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Validate)]
pub struct DeviceSummaryInput {
    #[garde(length(min = 1, max = 64))]
    pub vehicle_id: String,
    #[garde(skip)]
    pub window_start: DateTime<Utc>,
    #[garde(skip)]
    pub window_end: DateTime<Utc>,
    /// Meter to pair with; resolved through the active link when absent
    #[garde(length(min = 1, max = 64))]
    pub meter_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureStats {
    pub min_c: f64,
    pub avg_c: f64,
    pub max_c: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub vehicle_id: String,
    pub meter_id: Option<String>,
    pub window: TimeWindow,
    pub vehicle_reading_count: usize,
    pub meter_reading_count: usize,
    pub delivered_kwh: f64,
    /// Metered consumption; zero when the ratio had to be estimated
    pub consumed_kwh: f64,
    pub temperature: TemperatureStats,
    pub efficiency: EfficiencyRatio,
    pub band: Option<EfficiencyBand>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetSummary {
    pub window: TimeWindow,
    pub vehicle_count: usize,
    pub meter_count: usize,
    pub total_delivered_kwh: f64,
    pub total_consumed_kwh: f64,
    /// Ratio of the aggregate sums, not an average of per-vehicle ratios
    pub fleet_efficiency: EfficiencyRatio,
    pub vehicles_excellent: usize,
    pub vehicles_good: usize,
    pub vehicles_with_warnings: usize,
    pub vehicles_critical: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendBucket {
    pub bucket_start: DateTime<Utc>,
    pub vehicle_reading_count: usize,
    pub meter_reading_count: usize,
    pub delivered_kwh: f64,
    pub consumed_kwh: f64,
    pub avg_battery_temp_c: f64,
    /// Zero when the hour has no metered consumption
    pub efficiency_ratio: f64,
}

#[derive(Default)]
struct VehicleBucket {
    count: usize,
    delivered: f64,
    temp_sum: f64,
}

#[derive(Default)]
struct MeterBucket {
    count: usize,
    consumed: f64,
}

/// Analytics Engine over the Cold Store.
///
/// Consumed energy always comes from meter history through the register
/// increment rule; meter scans start at midnight of the window's first day
/// so the first in-window sample is differenced against its predecessor.
pub struct AnalyticsService {
    history_repository: Arc<dyn HistoryRepository>,
    correlation_repository: Arc<dyn CorrelationRepository>,
    thresholds: EfficiencyThresholds,
    storage_timeout: Duration,
}

impl AnalyticsService {
    pub fn new(
        history_repository: Arc<dyn HistoryRepository>,
        correlation_repository: Arc<dyn CorrelationRepository>,
        thresholds: EfficiencyThresholds,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            history_repository,
            correlation_repository,
            thresholds,
            storage_timeout,
        }
    }

    #[instrument(skip(self), fields(vehicle_id = %input.vehicle_id))]
    pub async fn compute_device_summary(&self, input: DeviceSummaryInput) -> DomainResult<DeviceSummary> {
        common::garde::validate_struct(&input)?;
        let window = TimeWindow::new(input.window_start, input.window_end)?;

        let vehicle_records = self.vehicle_records(&input.vehicle_id, &window).await?;
        let (meter_id, samples) = self
            .vehicle_consumption(&input.vehicle_id, input.meter_id, &window)
            .await?;

        let delivered_kwh: f64 = vehicle_records.iter().map(|r| r.kwh_delivered_dc).sum();
        let consumed_kwh: f64 = samples.iter().map(|s| s.kwh).sum();
        let temperature = temperature_stats(&vehicle_records);

        let efficiency = EfficiencyRatio::compute(delivered_kwh, consumed_kwh);
        let band = self.thresholds.classify(&efficiency);
        let warning = summary_warning(band, &efficiency, &self.thresholds, temperature.max_c);

        debug!(
            meter_id = ?meter_id,
            delivered_kwh = delivered_kwh,
            consumed_kwh = consumed_kwh,
            ratio = efficiency.value,
            "device summary computed"
        );

        Ok(DeviceSummary {
            vehicle_id: input.vehicle_id,
            meter_id,
            window,
            vehicle_reading_count: vehicle_records.len(),
            meter_reading_count: samples.len(),
            delivered_kwh,
            consumed_kwh,
            temperature,
            efficiency,
            band,
            warning,
        })
    }

    #[instrument(skip(self))]
    pub async fn compute_fleet_summary(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> DomainResult<FleetSummary> {
        let window = TimeWindow::new(window_start, window_end)?;

        let vehicle_records = with_storage_timeout(
            self.storage_timeout,
            "scan_vehicle_window",
            self.history_repository
                .scan_vehicle_window(window.start, window.end),
        )
        .await?;
        if vehicle_records.is_empty() {
            return Err(DomainError::NoReadingsInWindow {
                device_id: "fleet".to_string(),
            });
        }

        let meter_records = with_storage_timeout(
            self.storage_timeout,
            "scan_meter_window",
            self.history_repository
                .scan_meter_window(window.register_lookback_start(), window.end),
        )
        .await?;
        let samples: Vec<ConsumptionSample> = consumption_samples(&meter_records)
            .into_iter()
            .filter(|s| window.contains(s.device_timestamp))
            .collect();

        let mut delivered_by_vehicle: BTreeMap<&str, f64> = BTreeMap::new();
        for record in &vehicle_records {
            *delivered_by_vehicle.entry(&record.vehicle_id).or_default() += record.kwh_delivered_dc;
        }

        let mut consumed_by_meter: HashMap<&str, f64> = HashMap::new();
        let mut consumed_by_tag: HashMap<&str, f64> = HashMap::new();
        for sample in &samples {
            *consumed_by_meter.entry(&sample.meter_id).or_default() += sample.kwh;
            if let Some(vehicle_id) = sample.vehicle_id.as_deref() {
                *consumed_by_tag.entry(vehicle_id).or_default() += sample.kwh;
            }
        }

        let total_delivered_kwh: f64 = delivered_by_vehicle.values().sum();
        let total_consumed_kwh: f64 = samples.iter().map(|s| s.kwh).sum();
        let mut summary = FleetSummary {
            window,
            vehicle_count: delivered_by_vehicle.len(),
            meter_count: consumed_by_meter.len(),
            total_delivered_kwh,
            total_consumed_kwh,
            fleet_efficiency: EfficiencyRatio::compute(total_delivered_kwh, total_consumed_kwh),
            vehicles_excellent: 0,
            vehicles_good: 0,
            vehicles_with_warnings: 0,
            vehicles_critical: 0,
        };

        let active_links = with_storage_timeout(
            self.storage_timeout,
            "list_active_links",
            self.correlation_repository.list_active_links(),
        )
        .await?;
        let meter_by_vehicle = active_meters_by_vehicle(active_links);

        for (vehicle_id, delivered) in &delivered_by_vehicle {
            let consumed = match meter_by_vehicle.get(*vehicle_id) {
                Some(meter_id) => consumed_by_meter.get(meter_id.as_str()).copied().unwrap_or(0.0),
                None => consumed_by_tag.get(vehicle_id).copied().unwrap_or(0.0),
            };

            let ratio = EfficiencyRatio::compute(*delivered, consumed);
            match self.thresholds.classify(&ratio) {
                Some(EfficiencyBand::Excellent) => summary.vehicles_excellent += 1,
                Some(EfficiencyBand::Good) => summary.vehicles_good += 1,
                Some(EfficiencyBand::Warning) => summary.vehicles_with_warnings += 1,
                Some(EfficiencyBand::Critical) => summary.vehicles_critical += 1,
                None => {}
            }
        }

        debug!(
            vehicles = summary.vehicle_count,
            meters = summary.meter_count,
            fleet_ratio = summary.fleet_efficiency.value,
            "fleet summary computed"
        );
        Ok(summary)
    }

    /// Hourly buckets of vehicle activity with meter consumption left-joined
    #[instrument(skip(self), fields(vehicle_id = %vehicle_id))]
    pub async fn compute_trend(
        &self,
        vehicle_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> DomainResult<Vec<TrendBucket>> {
        let window = TimeWindow::new(window_start, window_end)?;

        let vehicle_records = self.vehicle_records(vehicle_id, &window).await?;
        let (_, samples) = self.vehicle_consumption(vehicle_id, None, &window).await?;

        let mut vehicle_buckets: BTreeMap<DateTime<Utc>, VehicleBucket> = BTreeMap::new();
        for record in &vehicle_records {
            let bucket = vehicle_buckets
                .entry(hour_bucket(record.device_timestamp))
                .or_default();
            bucket.count += 1;
            bucket.delivered += record.kwh_delivered_dc;
            bucket.temp_sum += record.battery_temp_c;
        }

        let mut meter_buckets: HashMap<DateTime<Utc>, MeterBucket> = HashMap::new();
        for sample in &samples {
            let bucket = meter_buckets
                .entry(hour_bucket(sample.device_timestamp))
                .or_default();
            bucket.count += 1;
            bucket.consumed += sample.kwh;
        }

        Ok(vehicle_buckets
            .into_iter()
            .map(|(bucket_start, vehicle)| {
                let (meter_reading_count, consumed_kwh) = meter_buckets
                    .get(&bucket_start)
                    .map(|m| (m.count, m.consumed))
                    .unwrap_or((0, 0.0));
                TrendBucket {
                    bucket_start,
                    vehicle_reading_count: vehicle.count,
                    meter_reading_count,
                    delivered_kwh: vehicle.delivered,
                    consumed_kwh,
                    avg_battery_temp_c: vehicle.temp_sum / vehicle.count as f64,
                    efficiency_ratio: if consumed_kwh > 0.0 {
                        vehicle.delivered / consumed_kwh
                    } else {
                        0.0
                    },
                }
            })
            .collect())
    }

    async fn vehicle_records(
        &self,
        vehicle_id: &str,
        window: &TimeWindow,
    ) -> DomainResult<Vec<VehicleHistoryRecord>> {
        let records = with_storage_timeout(
            self.storage_timeout,
            "scan_vehicle_range",
            self.history_repository
                .scan_vehicle_range(vehicle_id, window.start, window.end),
        )
        .await?;

        if records.is_empty() {
            return Err(DomainError::NoReadingsInWindow {
                device_id: vehicle_id.to_string(),
            });
        }
        Ok(records)
    }

    async fn active_meter_for(&self, vehicle_id: &str) -> DomainResult<Option<String>> {
        with_storage_timeout(
            self.storage_timeout,
            "find_active_meter_for",
            self.correlation_repository.find_active_meter_for(vehicle_id),
        )
        .await
    }

    /// In-window consumption attributed to a vehicle.
    ///
    /// With a paired meter that meter's samples count. Without one, the
    /// meters whose rows carry the vehicle's peer tag are scanned and only
    /// their tagged samples count.
    async fn vehicle_consumption(
        &self,
        vehicle_id: &str,
        meter_id: Option<String>,
        window: &TimeWindow,
    ) -> DomainResult<(Option<String>, Vec<ConsumptionSample>)> {
        let meter_id = match meter_id {
            Some(meter_id) => Some(meter_id),
            None => self.active_meter_for(vehicle_id).await?,
        };

        if let Some(meter_id) = meter_id {
            let samples = self
                .meter_samples(&meter_id, window)
                .await?
                .into_iter()
                .filter(|s| window.contains(s.device_timestamp))
                .collect();
            return Ok((Some(meter_id), samples));
        }

        let tagged = with_storage_timeout(
            self.storage_timeout,
            "scan_meter_range_by_vehicle",
            self.history_repository
                .scan_meter_range_by_vehicle(vehicle_id, window.start, window.end),
        )
        .await?;
        let meters: BTreeSet<String> = tagged.into_iter().map(|r| r.meter_id).collect();

        let mut samples = Vec::new();
        for meter_id in &meters {
            samples.extend(
                self.meter_samples(meter_id, window)
                    .await?
                    .into_iter()
                    .filter(|s| {
                        window.contains(s.device_timestamp)
                            && s.vehicle_id.as_deref() == Some(vehicle_id)
                    }),
            );
        }
        debug!(tagged_meters = meters.len(), "consumption resolved by peer tag");
        Ok((None, samples))
    }

    async fn meter_samples(
        &self,
        meter_id: &str,
        window: &TimeWindow,
    ) -> DomainResult<Vec<ConsumptionSample>> {
        let records = with_storage_timeout(
            self.storage_timeout,
            "scan_meter_range",
            self.history_repository.scan_meter_range(
                meter_id,
                window.register_lookback_start(),
                window.end,
            ),
        )
        .await?;
        Ok(consumption_samples(&records))
    }
}

fn temperature_stats(records: &[VehicleHistoryRecord]) -> TemperatureStats {
    let mut min_c = f64::INFINITY;
    let mut max_c = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for record in records {
        min_c = min_c.min(record.battery_temp_c);
        max_c = max_c.max(record.battery_temp_c);
        sum += record.battery_temp_c;
    }
    TemperatureStats {
        min_c,
        avg_c: sum / records.len() as f64,
        max_c,
    }
}

fn hour_bucket(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(chrono::Duration::hours(1)).unwrap_or(at)
}
