use crate::domain::{
    CorrelationLink, DeviceState, DomainResult, MeterHistoryRecord, MeterStatus,
    VehicleHistoryRecord, VehicleStatus,
};
use tokio_postgres::Row;

pub(crate) const METER_HISTORY_COLUMNS: &str =
    "id, meter_id, kwh_consumed_ac, voltage, current_a, device_timestamp, ingested_at, vehicle_id";

pub(crate) const VEHICLE_HISTORY_COLUMNS: &str = "id, vehicle_id, soc_percent, kwh_delivered_dc, battery_temp_c, charge_power_kw, device_timestamp, ingested_at, meter_id";

pub(crate) const METER_STATUS_COLUMNS: &str = "meter_id, kwh_consumed_ac, voltage, current_a, last_reading_at, daily_kwh_consumed, vehicle_id, state, updated_at";

pub(crate) const VEHICLE_STATUS_COLUMNS: &str = "vehicle_id, soc_percent, kwh_delivered_dc, battery_temp_c, charge_power_kw, last_reading_at, daily_kwh_delivered, meter_id, state, updated_at";

pub(crate) const LINK_COLUMNS: &str = "meter_id, vehicle_id, is_active, created_at, updated_at";

pub(crate) fn meter_history_from_row(row: &Row) -> MeterHistoryRecord {
    MeterHistoryRecord {
        id: row.get(0),
        meter_id: row.get(1),
        kwh_consumed_ac: row.get(2),
        voltage: row.get(3),
        current_a: row.get(4),
        device_timestamp: row.get(5),
        ingested_at: row.get(6),
        vehicle_id: row.get(7),
    }
}

pub(crate) fn vehicle_history_from_row(row: &Row) -> VehicleHistoryRecord {
    VehicleHistoryRecord {
        id: row.get(0),
        vehicle_id: row.get(1),
        soc_percent: row.get(2),
        kwh_delivered_dc: row.get(3),
        battery_temp_c: row.get(4),
        charge_power_kw: row.get(5),
        device_timestamp: row.get(6),
        ingested_at: row.get(7),
        meter_id: row.get(8),
    }
}

pub(crate) fn meter_status_from_row(row: &Row) -> DomainResult<MeterStatus> {
    let state: String = row.get(7);
    Ok(MeterStatus {
        meter_id: row.get(0),
        kwh_consumed_ac: row.get(1),
        voltage: row.get(2),
        current_a: row.get(3),
        last_reading_at: row.get(4),
        daily_kwh_consumed: row.get(5),
        vehicle_id: row.get(6),
        state: state.parse::<DeviceState>()?,
        updated_at: row.get(8),
    })
}

pub(crate) fn vehicle_status_from_row(row: &Row) -> DomainResult<VehicleStatus> {
    let state: String = row.get(8);
    Ok(VehicleStatus {
        vehicle_id: row.get(0),
        soc_percent: row.get(1),
        kwh_delivered_dc: row.get(2),
        battery_temp_c: row.get(3),
        charge_power_kw: row.get(4),
        last_reading_at: row.get(5),
        daily_kwh_delivered: row.get(6),
        meter_id: row.get(7),
        state: state.parse::<DeviceState>()?,
        updated_at: row.get(9),
    })
}

pub(crate) fn link_from_row(row: &Row) -> CorrelationLink {
    CorrelationLink {
        meter_id: row.get(0),
        vehicle_id: row.get(1),
        is_active: row.get(2),
        created_at: row.get(3),
        updated_at: row.get(4),
    }
}

/// PostgreSQL error code 23505 is unique_violation
pub(crate) fn is_unique_violation(e: &tokio_postgres::Error) -> bool {
    e.as_db_error()
        .map(|db_err| db_err.code().code() == "23505")
        .unwrap_or(false)
}
