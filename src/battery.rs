//! # Battery supervision
//!
//! Over-discharging a LiPo battery damages it. The [BatteryMonitor] watches
//! the battery voltage reported by the autopilot and disarms the vehicle as
//! soon as it goes under a minimum, typically 3.5V per cell.
//!
//! ``` no_run
//! # async fn supervised(vehicle: &bluerov_lib::Vehicle) -> bluerov_lib::Result<()> {
//! use bluerov_lib::battery::BatteryMonitor;
//!
//! // 4 cells battery
//! let monitor = BatteryMonitor::per_cell(3.5, 4);
//! tokio::select! {
//!     result = monitor.watch(vehicle) => result?,
//!     _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => (),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The voltage measured under load is lower than the resting voltage, the
//! minimum needs to be tuned for each vehicle.

use futures::StreamExt;
use log::{error, warn};

use crate::subsystems::telemetry::{Attribute, Battery};
use crate::{Error, Result, Vehicle};

/// Disarms the vehicle when the battery voltage gets too low
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryMonitor {
    minimum_voltage: f32,
}

impl BatteryMonitor {
    /// Monitor with a minimum voltage in volts
    ///
    /// A minimum of `0.0` never trips.
    pub fn new(minimum_voltage: f32) -> Self {
        Self { minimum_voltage }
    }

    /// Monitor with a minimum voltage per cell
    pub fn per_cell(cell_voltage: f32, cells: u8) -> Self {
        Self::new(cell_voltage * cells as f32)
    }

    /// Voltage under which the battery is low
    pub fn minimum_voltage(&self) -> f32 {
        self.minimum_voltage
    }

    /// The battery is under the minimum voltage
    pub fn is_low(&self, battery: &Battery) -> bool {
        battery.voltage < self.minimum_voltage
    }

    /// Watch the battery until it gets low
    ///
    /// When the voltage goes under the minimum, the vehicle is disarmed and
    /// [Error::LowBattery] is returned. Returns [Error::Disconnected] if the
    /// link closes first. This future never completes with `Ok`.
    pub async fn watch(&self, vehicle: &Vehicle) -> Result<()> {
        let mut updates = Box::pin(vehicle.telemetry.on_attribute(Attribute::Battery));

        while let Some(state) = updates.next().await {
            let battery = match state.battery {
                Some(battery) => battery,
                None => continue,
            };

            if self.is_low(&battery) {
                error!("Battery voltage too low.");

                if let Err(e) = vehicle.disarm().await {
                    warn!("Cannot disarm: {}", e);
                }

                return Err(Error::LowBattery {
                    voltage: battery.voltage,
                    minimum: self.minimum_voltage,
                });
            }
        }

        Err(Error::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battery(voltage: f32) -> Battery {
        Battery {
            voltage,
            ..Default::default()
        }
    }

    #[test]
    fn zero_minimum_never_trips() {
        let monitor = BatteryMonitor::new(0.0);
        assert!(!monitor.is_low(&battery(0.0)));
        assert!(!monitor.is_low(&battery(12.0)));
    }

    #[test]
    fn per_cell_minimum() {
        let monitor = BatteryMonitor::per_cell(3.5, 4);
        assert_eq!(monitor.minimum_voltage(), 14.0);
        assert!(monitor.is_low(&battery(13.9)));
        assert!(!monitor.is_low(&battery(14.0)));
    }
}
