use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// # ArduSub vehicle modes
///
/// Modes are exchanged with the autopilot as a custom mode number in the
/// heartbeat. This enum maps the numbers to the names used by ground control
/// stations.
///
/// ```
/// # use bluerov_lib::VehicleMode;
/// let mode: VehicleMode = "alt_hold".parse().unwrap();
/// assert_eq!(mode, VehicleMode::AltHold);
/// assert_eq!(mode.to_string(), "ALT_HOLD");
/// assert_eq!(u32::from(mode), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum VehicleMode {
    /// Self-levelling, pilot controls depth
    Stabilize = 0,
    /// Rate control
    Acro = 1,
    /// Depth hold
    AltHold = 2,
    /// Mission
    Auto = 3,
    /// Position/velocity targets from the ground
    Guided = 4,
    /// Circle around a point
    Circle = 7,
    /// Return to surface
    Surface = 9,
    /// Position hold
    PosHold = 16,
    /// No stabilization
    Manual = 19,
    /// Automatic motor direction detection
    MotorDetect = 20,
    /// Hold distance to the seafloor
    SurfTrak = 21,
}

const MODE_NAMES: [(VehicleMode, &str); 11] = [
    (VehicleMode::Stabilize, "STABILIZE"),
    (VehicleMode::Acro, "ACRO"),
    (VehicleMode::AltHold, "ALT_HOLD"),
    (VehicleMode::Auto, "AUTO"),
    (VehicleMode::Guided, "GUIDED"),
    (VehicleMode::Circle, "CIRCLE"),
    (VehicleMode::Surface, "SURFACE"),
    (VehicleMode::PosHold, "POSHOLD"),
    (VehicleMode::Manual, "MANUAL"),
    (VehicleMode::MotorDetect, "MOTOR_DETECT"),
    (VehicleMode::SurfTrak, "SURFTRAK"),
];

impl VehicleMode {
    /// Name of the mode as displayed by ground control stations
    pub fn name(&self) -> &'static str {
        MODE_NAMES
            .iter()
            .find(|(mode, _)| mode == self)
            .map(|(_, name)| *name)
            .unwrap_or("UNKNOWN")
    }

    /// Mode from the heartbeat custom mode number
    pub fn from_custom_mode(custom_mode: u32) -> Result<Self> {
        Self::try_from(custom_mode).map_err(|_| Error::UnsupportedMode(custom_mode))
    }

    /// Custom mode number sent to the autopilot
    pub fn custom_mode(&self) -> u32 {
        (*self).into()
    }
}

impl FromStr for VehicleMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_uppercase();
        MODE_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(mode, _)| *mode)
            .ok_or_else(|| Error::UnknownMode(s.to_owned()))
    }
}

impl fmt::Display for VehicleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
