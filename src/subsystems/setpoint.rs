//! # Guided setpoint subsystem
//!
//! In guided modes the autopilot follows position/velocity targets sent from
//! the ground. This subsystem only implements velocity targets in the local
//! NED frame (north, east, down): `vz > 0` descends.
//!
//! A velocity target is only followed for a short time by the autopilot, it
//! needs to be re-sent, [Setpoint::hold_ned_velocity()] does it at 1Hz.

use std::time::Duration;

use flume::Sender;
use mavlink::ardupilotmega::{
    MavFrame, MavMessage, PositionTargetTypemask, SET_POSITION_TARGET_LOCAL_NED_DATA,
};

use crate::vehicle::Target;
use crate::Result;

// Ignore position, acceleration, yaw and yaw rate: only velocities are used
const VELOCITY_ONLY_MASK: u16 = 0b0000_1111_1100_0111;

const HOLD_PERIOD: Duration = Duration::from_secs(1);

/// # Access to the guided setpoints
///
/// See the [setpoint module documentation](crate::subsystems::setpoint) for more context and information.
pub struct Setpoint {
    uplink: Sender<MavMessage>,
    target: Target,
}

impl Setpoint {
    pub(crate) fn new(uplink: Sender<MavMessage>, target: Target) -> Self {
        Self { uplink, target }
    }

    /// Send one velocity target, in meters/second, in the local NED frame
    pub async fn send_ned_velocity(&self, vx: f32, vy: f32, vz: f32) -> Result<()> {
        let message = MavMessage::SET_POSITION_TARGET_LOCAL_NED(SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms: 0,
            vx,
            vy,
            vz,
            type_mask: PositionTargetTypemask::from_bits_truncate(VELOCITY_ONLY_MASK),
            target_system: self.target.system_id,
            target_component: self.target.component_id,
            coordinate_frame: MavFrame::MAV_FRAME_LOCAL_NED,
            ..Default::default()
        });

        self.uplink.send_async(message).await?;
        Ok(())
    }

    /// Send the same velocity target once a second for `seconds` seconds
    pub async fn hold_ned_velocity(&self, vx: f32, vy: f32, vz: f32, seconds: u32) -> Result<()> {
        for _ in 0..seconds {
            self.send_ned_velocity(vx, vy, vz).await?;
            tokio::time::sleep(HOLD_PERIOD).await;
        }
        Ok(())
    }
}
