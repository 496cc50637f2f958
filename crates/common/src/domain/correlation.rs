use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Association between a grid-side meter and a vehicle-side charger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationLink {
    pub meter_id: String,
    pub vehicle_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pick the canonical link among active candidates for one device.
///
/// Lowest creation order wins, pair ids break ties. More than one candidate
/// means the store violated the single-active-link invariant; that is logged
/// and tolerated.
pub fn pick_canonical_link(device_id: &str, mut candidates: Vec<CorrelationLink>) -> Option<CorrelationLink> {
    candidates.retain(|link| link.is_active);
    if candidates.len() > 1 {
        warn!(
            device_id = %device_id,
            active_links = candidates.len(),
            "correlation ambiguity: multiple active links, using the oldest"
        );
    }
    candidates.into_iter().min_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.meter_id.cmp(&b.meter_id))
            .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
    })
}

/// Canonical active meter of every linked vehicle, built from one bulk read
pub fn active_meters_by_vehicle(links: Vec<CorrelationLink>) -> HashMap<String, String> {
    let mut by_vehicle: BTreeMap<String, Vec<CorrelationLink>> = BTreeMap::new();
    for link in links.into_iter().filter(|link| link.is_active) {
        by_vehicle.entry(link.vehicle_id.clone()).or_default().push(link);
    }

    by_vehicle
        .into_iter()
        .filter_map(|(vehicle_id, candidates)| {
            pick_canonical_link(&vehicle_id, candidates).map(|link| (vehicle_id, link.meter_id))
        })
        .collect()
}

/// Correlation Store operations outside the ingestion transaction
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CorrelationRepository: Send + Sync {
    /// Create or reactivate the (meter, vehicle) link and deactivate any other
    /// active link of either device
    async fn set_link(&self, meter_id: &str, vehicle_id: &str) -> DomainResult<CorrelationLink>;

    /// Mark the link inactive. Returns None when the pair was never linked.
    async fn deactivate_link(
        &self,
        meter_id: &str,
        vehicle_id: &str,
    ) -> DomainResult<Option<CorrelationLink>>;

    async fn find_active_vehicle_for(&self, meter_id: &str) -> DomainResult<Option<String>>;

    async fn find_active_meter_for(&self, vehicle_id: &str) -> DomainResult<Option<String>>;

    /// Every link ever recorded for a meter, oldest first
    async fn list_links_for_meter(&self, meter_id: &str) -> DomainResult<Vec<CorrelationLink>>;

    /// Every link ever recorded for a vehicle, oldest first
    async fn list_links_for_vehicle(&self, vehicle_id: &str) -> DomainResult<Vec<CorrelationLink>>;

    /// Every currently active link, oldest first
    async fn list_active_links(&self) -> DomainResult<Vec<CorrelationLink>>;
}
