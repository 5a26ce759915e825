//! # Telemetry subsystem
//!
//! The autopilot streams its state as a set of periodic messages (heartbeat,
//! attitude, system status, HUD ...). This subsystem folds them into a
//! [VehicleState] snapshot and lets the lib user listen to attribute changes,
//! the same way a ground control station updates its displays.
//!
//! Listening to the battery while printing the attitude:
//! ``` no_run
//! # use futures::StreamExt;
//! # use bluerov_lib::subsystems::telemetry::Attribute;
//! # async fn listen(vehicle: &bluerov_lib::Vehicle) {
//! println!("{}", vehicle.telemetry.state());
//!
//! let mut battery = Box::pin(vehicle.telemetry.on_attribute(Attribute::Battery));
//! while let Some(state) = battery.next().await {
//!     if let Some(battery) = state.battery {
//!         println!("{}", battery);
//!     }
//! }
//! # }
//! ```
//!
//! Listeners are broadcast receivers with a bounded history: a listener that
//! does not keep up silently misses the oldest events.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_broadcast::{broadcast, InactiveReceiver};
use flume::Receiver;
use futures::{Stream, StreamExt};
use mavlink::ardupilotmega::{MavAutopilot, MavMessage, MavModeFlag, MavState, MavType};
use mavlink::{MavHeader, Message};
use tokio::task::JoinHandle;

use crate::link::Frame;
use crate::{Error, Result, VehicleMode};

const EVENT_HISTORY: usize = 64;

/// Vehicle state attributes that can be listened to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// A heartbeat was received from the autopilot
    Heartbeat,
    /// Roll, pitch, yaw and their rates
    Attitude,
    /// Velocity in the NED frame
    Velocity,
    /// Voltage, current and remaining level
    Battery,
    /// Compass heading
    Heading,
    /// Speed over ground
    Groundspeed,
    /// Speed through the medium
    Airspeed,
    /// Altitude, negative underwater
    Location,
    /// Flight mode changed
    Mode,
    /// Armed state changed
    Armed,
    /// Autopilot system status changed
    SystemStatus,
}

/// Vehicle attitude, angles in radians and rates in radians/second
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attitude {
    /// Roll angle, positive is right side down
    pub roll: f32,
    /// Pitch angle, positive is nose up
    pub pitch: f32,
    /// Yaw angle, 0 is north
    pub yaw: f32,
    /// Roll rate
    pub rollspeed: f32,
    /// Pitch rate
    pub pitchspeed: f32,
    /// Yaw rate
    pub yawspeed: f32,
}

impl fmt::Display for Attitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attitude:pitch={},yaw={},roll={}", self.pitch, self.yaw, self.roll)
    }
}

/// Battery state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Battery {
    /// Voltage in volts
    pub voltage: f32,
    /// Current in amperes, `None` if not measured by the autopilot
    pub current: Option<f32>,
    /// Remaining capacity in percent, `None` if not estimated by the autopilot
    pub level: Option<i8>,
}

impl fmt::Display for Battery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Battery:voltage={},current={},level={}",
            self.voltage,
            display_option(&self.current),
            display_option(&self.level)
        )
    }
}

fn display_option<T: fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "None".to_owned(),
    }
}

/// Snapshot of the vehicle state
///
/// Fields are `None` until the matching message has been received once.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleState {
    /// MAVLink system id of the autopilot, 0 until the first heartbeat
    pub system_id: u8,
    /// MAVLink component id of the autopilot, 0 until the first heartbeat
    pub component_id: u8,
    /// Last attitude received
    pub attitude: Option<Attitude>,
    /// North, east, down velocity in meters/second
    pub velocity: Option<[f32; 3]>,
    /// Last battery state received
    pub battery: Option<Battery>,
    /// Reception time of the last autopilot heartbeat
    pub last_heartbeat: Option<Instant>,
    /// Heading in degrees, 0 is north
    pub heading: Option<i16>,
    /// Meters/second
    pub groundspeed: Option<f32>,
    /// Meters/second
    pub airspeed: Option<f32>,
    /// Altitude in meters, depth is negative
    pub altitude: Option<f32>,
    /// Raw custom mode number from the heartbeat
    pub custom_mode: Option<u32>,
    /// Motors armed, from the heartbeat base mode
    pub armed: bool,
    /// Autopilot state from the heartbeat
    pub system_status: Option<MavState>,
}

impl VehicleState {
    /// Current mode, `None` before the first heartbeat or for unknown mode numbers
    pub fn mode(&self) -> Option<VehicleMode> {
        self.custom_mode
            .and_then(|m| VehicleMode::from_custom_mode(m).ok())
    }

    /// Time elapsed since the last heartbeat
    pub fn last_heartbeat_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }

    /// The autopilot is booted and reports a state in which it accepts arming
    pub fn is_armable(&self) -> bool {
        matches!(
            self.system_status,
            Some(MavState::MAV_STATE_STANDBY) | Some(MavState::MAV_STATE_ACTIVE)
        )
    }

    /// Attitude and battery have been reported at least once
    pub fn is_ready(&self) -> bool {
        self.last_heartbeat.is_some() && self.attitude.is_some() && self.battery.is_some()
    }

    /// Fold a received message into the state
    ///
    /// Returns the attributes the message updated. Heartbeats from ground
    /// stations and messages from other systems than the first autopilot seen
    /// are ignored.
    pub fn update(&mut self, header: &MavHeader, message: &MavMessage) -> Vec<Attribute> {
        if let MavMessage::HEARTBEAT(heartbeat) = message {
            if heartbeat.mavtype == MavType::MAV_TYPE_GCS
                || heartbeat.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID
            {
                return vec![];
            }
            if self.system_id == 0 {
                self.system_id = header.system_id;
                self.component_id = header.component_id;
            }
        }

        if self.system_id == 0 || header.system_id != self.system_id {
            return vec![];
        }

        let mut changed = Vec::new();

        match message {
            MavMessage::HEARTBEAT(heartbeat) => {
                self.last_heartbeat = Some(Instant::now());
                changed.push(Attribute::Heartbeat);

                if self.custom_mode != Some(heartbeat.custom_mode) {
                    self.custom_mode = Some(heartbeat.custom_mode);
                    changed.push(Attribute::Mode);
                }

                let armed = heartbeat
                    .base_mode
                    .contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                if self.armed != armed {
                    self.armed = armed;
                    changed.push(Attribute::Armed);
                }

                if self.system_status != Some(heartbeat.system_status) {
                    self.system_status = Some(heartbeat.system_status);
                    changed.push(Attribute::SystemStatus);
                }
            }
            MavMessage::ATTITUDE(attitude) => {
                self.attitude = Some(Attitude {
                    roll: attitude.roll,
                    pitch: attitude.pitch,
                    yaw: attitude.yaw,
                    rollspeed: attitude.rollspeed,
                    pitchspeed: attitude.pitchspeed,
                    yawspeed: attitude.yawspeed,
                });
                changed.push(Attribute::Attitude);
            }
            MavMessage::SYS_STATUS(status) => {
                // UINT16_MAX, -1 and -1 are the "not measured" markers
                if status.voltage_battery != u16::MAX {
                    self.battery = Some(Battery {
                        voltage: status.voltage_battery as f32 / 1000.0,
                        current: (status.current_battery >= 0)
                            .then(|| status.current_battery as f32 / 100.0),
                        level: (status.battery_remaining >= 0).then(|| status.battery_remaining),
                    });
                    changed.push(Attribute::Battery);
                }
            }
            MavMessage::GLOBAL_POSITION_INT(position) => {
                self.velocity = Some([
                    position.vx as f32 / 100.0,
                    position.vy as f32 / 100.0,
                    position.vz as f32 / 100.0,
                ]);
                changed.push(Attribute::Velocity);
            }
            MavMessage::VFR_HUD(hud) => {
                self.heading = Some(hud.heading);
                self.groundspeed = Some(hud.groundspeed);
                self.airspeed = Some(hud.airspeed);
                self.altitude = Some(hud.alt);
                changed.extend_from_slice(&[
                    Attribute::Heading,
                    Attribute::Groundspeed,
                    Attribute::Airspeed,
                    Attribute::Location,
                ]);
            }
            _ => (),
        }

        changed
    }
}

impl fmt::Display for VehicleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Vehicle state:")?;
        writeln!(f, " {}", display_option(&self.attitude))?;
        match self.velocity {
            Some(v) => writeln!(f, " Velocity: {:?}", v)?,
            None => writeln!(f, " Velocity: None")?,
        }
        writeln!(f, " {}", display_option(&self.battery))?;
        match self.last_heartbeat_age() {
            Some(age) => writeln!(f, " Last Heartbeat: {:.3}", age.as_secs_f32())?,
            None => writeln!(f, " Last Heartbeat: None")?,
        }
        writeln!(f, " Heading: {}", display_option(&self.heading))?;
        writeln!(f, " Groundspeed: {}", display_option(&self.groundspeed))?;
        writeln!(f, " Airspeed: {}", display_option(&self.airspeed))?;
        writeln!(f, " Mode: {}", display_option(&self.mode()))?;
        write!(f, " Is Armable?: {}", self.is_armable())
    }
}

/// # Access to the vehicle telemetry
///
/// See the [telemetry module documentation](crate::subsystems::telemetry) for more context and information.
pub struct Telemetry {
    state: Arc<Mutex<VehicleState>>,
    events: InactiveReceiver<(Attribute, VehicleState)>,
    messages: InactiveReceiver<Frame>,
    _telemetry_task: JoinHandle<()>,
}

impl Telemetry {
    pub(crate) fn new(downlink: Receiver<Frame>, messages: InactiveReceiver<Frame>) -> Self {
        let (mut event_broadcast, events) = broadcast(EVENT_HISTORY);
        event_broadcast.set_overflow(true);
        event_broadcast.set_await_active(false);

        let state: Arc<Mutex<VehicleState>> = Default::default();
        let task_state = state.clone();

        let _telemetry_task = tokio::spawn(async move {
            while let Ok((header, message)) = downlink.recv_async().await {
                let (changed, snapshot) = match task_state.lock() {
                    Ok(mut state) => (state.update(&header, &message), state.clone()),
                    Err(_) => return,
                };

                // No listener is not an error
                for attribute in changed {
                    let _ = event_broadcast.try_broadcast((attribute, snapshot.clone()));
                }
            }
        });

        Self {
            state,
            events: events.deactivate(),
            messages,
            _telemetry_task,
        }
    }

    /// Current vehicle state
    pub fn state(&self) -> VehicleState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stream of the vehicle state, yielding each time `attribute` is updated
    pub fn on_attribute(&self, attribute: Attribute) -> impl Stream<Item = VehicleState> {
        let mut events = self.events.activate_cloned();

        async_stream::stream! {
            while let Some((updated, state)) = events.next().await {
                if updated == attribute {
                    yield state;
                }
            }
        }
    }

    /// Stream of the received messages called `name`
    ///
    /// The name is the MAVLink message name, for example `"RC_CHANNELS_RAW"`.
    /// `"*"` listens to every message.
    pub fn on_message(&self, name: &str) -> impl Stream<Item = Frame> {
        let mut messages = self.messages.activate_cloned();
        let name = name.to_owned();

        async_stream::stream! {
            while let Some(frame) = messages.next().await {
                if name == "*" || frame.1.message_name() == name {
                    yield frame;
                }
            }
        }
    }

    /// Wait until the vehicle state satisfies `predicate`
    ///
    /// Returns [Error::Timeout] if it does not happen within `timeout`.
    pub async fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Result<VehicleState>
    where
        F: Fn(&VehicleState) -> bool,
    {
        // Subscribe before looking at the current state so no update is missed
        let mut events = self.events.activate_cloned();

        let current = self.state();
        if predicate(&current) {
            return Ok(current);
        }

        tokio::time::timeout(timeout, async {
            while let Some((_, state)) = events.next().await {
                if predicate(&state) {
                    return Ok(state);
                }
            }
            Err(Error::Disconnected)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::ardupilotmega::{
        ATTITUDE_DATA, HEARTBEAT_DATA, SYS_STATUS_DATA, VFR_HUD_DATA,
    };

    fn header(system_id: u8) -> MavHeader {
        MavHeader {
            system_id,
            component_id: 1,
            sequence: 0,
        }
    }

    fn autopilot_heartbeat(custom_mode: u32, armed: bool) -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode,
            mavtype: MavType::MAV_TYPE_SUBMARINE,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode: if armed {
                MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED
                    | MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
            } else {
                MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
            },
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        })
    }

    #[test]
    fn gcs_heartbeats_are_ignored() {
        let mut state = VehicleState::default();
        let gcs = MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            ..Default::default()
        });

        assert!(state.update(&header(255), &gcs).is_empty());
        assert_eq!(state.system_id, 0);
        assert!(state.last_heartbeat.is_none());
    }

    #[test]
    fn heartbeat_reports_mode_and_armed_changes_once() {
        let mut state = VehicleState::default();

        let changed = state.update(&header(1), &autopilot_heartbeat(2, false));
        assert!(changed.contains(&Attribute::Mode));
        assert!(!changed.contains(&Attribute::Armed));
        assert_eq!(state.mode(), Some(VehicleMode::AltHold));
        assert_eq!(state.system_id, 1);
        assert!(state.is_armable());

        let changed = state.update(&header(1), &autopilot_heartbeat(2, true));
        assert_eq!(changed, vec![Attribute::Heartbeat, Attribute::Armed]);
        assert!(state.armed);
    }

    #[test]
    fn other_systems_are_ignored() {
        let mut state = VehicleState::default();
        state.update(&header(1), &autopilot_heartbeat(0, false));

        let attitude = MavMessage::ATTITUDE(ATTITUDE_DATA {
            roll: 0.5,
            ..Default::default()
        });
        assert!(state.update(&header(2), &attitude).is_empty());
        assert!(state.attitude.is_none());

        assert_eq!(state.update(&header(1), &attitude), vec![Attribute::Attitude]);
        assert_eq!(state.attitude.unwrap().roll, 0.5);
    }

    #[test]
    fn battery_units_and_unknown_markers() {
        let mut state = VehicleState::default();
        state.update(&header(1), &autopilot_heartbeat(0, false));

        let status = MavMessage::SYS_STATUS(SYS_STATUS_DATA {
            voltage_battery: 15_800,
            current_battery: -1,
            battery_remaining: 76,
            ..Default::default()
        });
        state.update(&header(1), &status);

        let battery = state.battery.unwrap();
        assert!((battery.voltage - 15.8).abs() < 1e-4);
        assert_eq!(battery.current, None);
        assert_eq!(battery.level, Some(76));
        assert_eq!(battery.to_string(), "Battery:voltage=15.8,current=None,level=76");
    }

    #[test]
    fn display_lists_every_field() {
        let mut state = VehicleState::default();
        state.update(&header(1), &autopilot_heartbeat(19, false));
        state.update(
            &header(1),
            &MavMessage::VFR_HUD(VFR_HUD_DATA {
                heading: 270,
                alt: -1.5,
                ..Default::default()
            }),
        );

        let text = state.to_string();
        assert!(text.starts_with("Vehicle state:\n"));
        assert!(text.contains(" Heading: 270\n"));
        assert!(text.contains(" Mode: MANUAL\n"));
        assert!(text.contains(" Velocity: None\n"));
        assert!(text.ends_with(" Is Armable?: true"));
        assert_eq!(state.altitude, Some(-1.5));
    }
}
