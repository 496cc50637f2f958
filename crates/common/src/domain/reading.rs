use chrono::{DateTime, NaiveDate, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Telemetry stream a reading belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Meter,
    Vehicle,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Meter => "meter",
            StreamType::Vehicle => "vehicle",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grid-side meter sample.
///
/// `kwh_consumed_ac` is a same-day cumulative register: it grows through the
/// UTC day and restarts from zero when the day rolls over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MeterReading {
    #[garde(length(min = 1, max = 64))]
    pub meter_id: String,
    #[garde(range(min = 0.0), custom(finite))]
    pub kwh_consumed_ac: f64,
    #[garde(range(min = 0.0, max = 1000.0), custom(finite))]
    pub voltage: f64,
    #[serde(default)]
    #[garde(custom(non_negative_opt))]
    pub current_a: Option<f64>,
    #[garde(skip)]
    pub timestamp: DateTime<Utc>,
}

/// Vehicle-side charger sample.
///
/// `kwh_delivered_dc` is the energy delivered since the previous report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct VehicleReading {
    #[garde(length(min = 1, max = 64))]
    pub vehicle_id: String,
    #[garde(range(min = 0.0, max = 100.0), custom(finite))]
    pub soc_percent: f64,
    #[garde(range(min = 0.0), custom(finite))]
    pub kwh_delivered_dc: f64,
    #[garde(range(min = -50.0, max = 150.0), custom(finite))]
    pub battery_temp_c: f64,
    #[serde(default)]
    #[garde(custom(non_negative_opt))]
    pub charge_power_kw: Option<f64>,
    #[garde(skip)]
    pub timestamp: DateTime<Utc>,
}

impl VehicleReading {
    pub fn is_charging(&self) -> bool {
        self.charge_power_kw.is_some_and(|kw| kw > 0.0) || self.kwh_delivered_dc > 0.0
    }
}

/// One normalized reading from either stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stream_type", rename_all = "snake_case")]
pub enum Reading {
    Meter(MeterReading),
    Vehicle(VehicleReading),
}

impl Reading {
    pub fn stream_type(&self) -> StreamType {
        match self {
            Reading::Meter(_) => StreamType::Meter,
            Reading::Vehicle(_) => StreamType::Vehicle,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            Reading::Meter(m) => &m.meter_id,
            Reading::Vehicle(v) => &v.vehicle_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Reading::Meter(m) => m.timestamp,
            Reading::Vehicle(v) => v.timestamp,
        }
    }
}

fn finite(value: &f64, _ctx: &()) -> garde::Result {
    if value.is_finite() {
        Ok(())
    } else {
        Err(garde::Error::new("must be a finite number"))
    }
}

fn non_negative_opt(value: &Option<f64>, _ctx: &()) -> garde::Result {
    match value {
        Some(v) if !v.is_finite() => Err(garde::Error::new("must be a finite number")),
        Some(v) if *v < 0.0 => Err(garde::Error::new("must not be negative")),
        _ => Ok(()),
    }
}

/// Calendar day used for daily rollups
pub fn utc_day(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

/// Energy attributed to one sample of a same-day cumulative register.
///
/// `previous` is the preceding sample of the same device. The full value counts
/// when there is no same-day predecessor or when the register went backwards.
pub fn register_increment(previous: Option<(DateTime<Utc>, f64)>, at: DateTime<Utc>, value: f64) -> f64 {
    match previous {
        Some((prev_at, prev_value)) if utc_day(prev_at) == utc_day(at) && value >= prev_value => {
            value - prev_value
        }
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::garde::validate_struct;
    use crate::domain::DomainError;
    use chrono::TimeZone;

    fn meter(kwh: f64, voltage: f64) -> MeterReading {
        MeterReading {
            meter_id: "M1".to_string(),
            kwh_consumed_ac: kwh,
            voltage,
            current_a: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_meter_reading_valid() {
        assert!(validate_struct(&meter(10.0, 240.0)).is_ok());
    }

    #[test]
    fn test_meter_reading_rejects_negative_energy() {
        let result = validate_struct(&meter(-1.0, 240.0));
        assert!(matches!(result, Err(DomainError::ValidationError(msg)) if msg.contains("kwh_consumed_ac")));
    }

    #[test]
    fn test_meter_reading_rejects_nan() {
        assert!(validate_struct(&meter(f64::NAN, 240.0)).is_err());
    }

    #[test]
    fn test_vehicle_reading_rejects_soc_out_of_range() {
        let reading = VehicleReading {
            vehicle_id: "V1".to_string(),
            soc_percent: 130.0,
            kwh_delivered_dc: 1.0,
            battery_temp_c: 30.0,
            charge_power_kw: Some(-2.0),
            timestamp: Utc::now(),
        };
        let msg = match validate_struct(&reading) {
            Err(DomainError::ValidationError(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        };
        assert!(msg.contains("soc_percent"));
        assert!(msg.contains("charge_power_kw"));
    }

    #[test]
    fn test_reading_deserializes_from_tagged_json() {
        let json = r#"{"stream_type":"meter","meter_id":"M1","kwh_consumed_ac":10.0,"voltage":240.0,"timestamp":"2024-03-01T10:00:00Z"}"#;
        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.stream_type(), StreamType::Meter);
        assert_eq!(reading.device_id(), "M1");
    }

    #[test]
    fn test_reading_missing_field_is_rejected() {
        let json = r#"{"stream_type":"vehicle","vehicle_id":"V1","timestamp":"2024-03-01T10:00:00Z"}"#;
        assert!(serde_json::from_str::<Reading>(json).is_err());
    }

    #[test]
    fn test_register_increment() {
        let morning = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2024, 3, 2, 0, 5, 0).unwrap();

        assert_eq!(register_increment(None, morning, 10.0), 10.0);
        assert_eq!(register_increment(Some((morning, 10.0)), noon, 16.0), 6.0);
        // register restarted mid-day
        assert_eq!(register_increment(Some((noon, 16.0)), noon, 3.0), 3.0);
        assert_eq!(register_increment(Some((noon, 16.0)), next_day, 0.4), 0.4);
    }
}
