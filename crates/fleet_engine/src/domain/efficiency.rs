use common::domain::{TEMP_CRITICAL_C, TEMP_ELEVATED_C};
use serde::{Deserialize, Serialize};

/// Charger efficiency assumed when a window has delivered energy but no
/// metered consumption
pub const ASSUMED_CHARGER_EFFICIENCY: f64 = 0.90;

/// Ratio at or above which a vehicle is rated excellent
pub const EXCELLENT_RATIO: f64 = 0.92;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioBasis {
    /// Both sides were metered
    Measured,
    /// Consumption was estimated from delivered energy
    Estimated,
    /// Neither side recorded any energy
    NoActivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EfficiencyBand {
    Excellent,
    Good,
    Warning,
    Critical,
}

/// Delivered DC energy over consumed AC energy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyRatio {
    pub value: f64,
    pub basis: RatioBasis,
    /// Consumption the ratio was computed against (estimated when the basis says so)
    pub effective_consumed_kwh: f64,
}

impl EfficiencyRatio {
    pub fn compute(delivered_kwh: f64, consumed_kwh: f64) -> Self {
        if consumed_kwh > 0.0 {
            Self {
                value: delivered_kwh / consumed_kwh,
                basis: RatioBasis::Measured,
                effective_consumed_kwh: consumed_kwh,
            }
        } else if delivered_kwh > 0.0 {
            let estimated = delivered_kwh / ASSUMED_CHARGER_EFFICIENCY;
            Self {
                value: delivered_kwh / estimated,
                basis: RatioBasis::Estimated,
                effective_consumed_kwh: estimated,
            }
        } else {
            Self {
                value: 0.0,
                basis: RatioBasis::NoActivity,
                effective_consumed_kwh: 0.0,
            }
        }
    }

    pub fn is_estimated(&self) -> bool {
        self.basis == RatioBasis::Estimated
    }
}

/// Band boundaries below the excellent cut-off
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EfficiencyThresholds {
    pub warning: f64,
    pub critical: f64,
}

impl EfficiencyThresholds {
    pub fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    /// Band of a ratio; `None` when there was no energy to rate
    pub fn classify(&self, ratio: &EfficiencyRatio) -> Option<EfficiencyBand> {
        if ratio.basis == RatioBasis::NoActivity {
            return None;
        }
        let band = if ratio.value >= EXCELLENT_RATIO {
            EfficiencyBand::Excellent
        } else if ratio.value >= self.warning {
            EfficiencyBand::Good
        } else if ratio.value >= self.critical {
            EfficiencyBand::Warning
        } else {
            EfficiencyBand::Critical
        };
        Some(band)
    }
}

/// Human readable warnings for a device report, joined with "; "
pub fn summary_warning(
    band: Option<EfficiencyBand>,
    ratio: &EfficiencyRatio,
    thresholds: &EfficiencyThresholds,
    max_battery_temp_c: f64,
) -> Option<String> {
    let mut causes = Vec::new();

    match band {
        Some(EfficiencyBand::Critical) => causes.push(format!(
            "critical efficiency {:.2} below {:.2}",
            ratio.value, thresholds.critical
        )),
        Some(EfficiencyBand::Warning) => causes.push(format!(
            "low efficiency {:.2} below {:.2}",
            ratio.value, thresholds.warning
        )),
        _ => {}
    }

    if max_battery_temp_c >= TEMP_CRITICAL_C {
        causes.push(format!(
            "critical battery temperature {:.1}°C",
            max_battery_temp_c
        ));
    } else if max_battery_temp_c >= TEMP_ELEVATED_C {
        causes.push(format!(
            "elevated battery temperature {:.1}°C",
            max_battery_temp_c
        ));
    }

    if causes.is_empty() {
        None
    } else {
        Some(causes.join("; "))
    }
}
