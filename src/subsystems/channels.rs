//! # RC channel override subsystem
//!
//! ArduSub is piloted by RC channels: each axis of motion reads one channel,
//! a PWM value in microseconds where 1500 is neutral. The ground can override
//! the channel values with `RC_CHANNELS_OVERRIDE` messages, which is how the
//! [motion](crate::motion) commands drive the vehicle.
//!
//! Override values have two special values: `0` releases the channel back to
//! the RC input and `1500` is neutral (no motion).
//!
//! The autopilot drops overrides that have not been refreshed for a few
//! seconds (`RC_OVERRIDE_TIME` parameter), so overrides that must hold need to
//! be sent periodically.
//!
//! ``` no_run
//! # use bluerov_lib::subsystems::channels::{speed_to_pwm, Channel, Overrides};
//! # async fn forward(vehicle: &bluerov_lib::Vehicle) -> bluerov_lib::Result<()> {
//! let overrides = Overrides::neutral().with(Channel::Forward, speed_to_pwm(20.0));
//! vehicle.channels.set_overrides(overrides).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Mutex;

use flume::Sender;
use mavlink::ardupilotmega::{MavMessage, RC_CHANNELS_OVERRIDE_DATA};

use crate::vehicle::Target;
use crate::Result;

/// Neutral PWM value
pub const NEUTRAL_PWM: u16 = 1500;
/// PWM value releasing a channel to the RC input
pub const RELEASE_PWM: u16 = 0;
/// Lowest PWM sent for a speed of -100%
pub const MIN_PWM: u16 = 1100;
/// Highest PWM sent for a speed of 100%
pub const MAX_PWM: u16 = 1900;

const PWM_PER_PERCENT: f32 = (MAX_PWM - NEUTRAL_PWM) as f32 / 100.0;
const CHANNEL_COUNT: usize = 8;

/// ArduSub pilot input channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Channel 1
    Pitch = 1,
    /// Channel 2
    Roll = 2,
    /// Vertical motion
    Throttle = 3,
    /// Channel 4
    Yaw = 4,
    /// Channel 5
    Forward = 5,
    /// Channel 6
    Lateral = 6,
    /// Camera mount pan, channel 7
    CameraPan = 7,
    /// Camera mount tilt, channel 8
    CameraTilt = 8,
}

impl Channel {
    fn index(&self) -> usize {
        *self as usize - 1
    }
}

/// Convert a speed percentage to a PWM value
///
/// The speed is clamped to `[-100, 100]`; NaN is treated as 0.
///
/// ```
/// # use bluerov_lib::subsystems::channels::speed_to_pwm;
/// assert_eq!(speed_to_pwm(0.0), 1500);
/// assert_eq!(speed_to_pwm(50.0), 1700);
/// assert_eq!(speed_to_pwm(-250.0), 1100);
/// ```
pub fn speed_to_pwm(speed: f32) -> u16 {
    let speed = if speed.is_nan() { 0.0 } else { speed.clamp(-100.0, 100.0) };
    (NEUTRAL_PWM as f32 + speed * PWM_PER_PERCENT).round() as u16
}

/// Value of the 8 overridable channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overrides([u16; CHANNEL_COUNT]);

impl Default for Overrides {
    fn default() -> Self {
        Self::released()
    }
}

impl Overrides {
    /// All channels released to the RC input
    pub fn released() -> Self {
        Self([RELEASE_PWM; CHANNEL_COUNT])
    }

    /// All channels neutral
    pub fn neutral() -> Self {
        Self([NEUTRAL_PWM; CHANNEL_COUNT])
    }

    /// Copy with `channel` set to `pwm`
    pub fn with(mut self, channel: Channel, pwm: u16) -> Self {
        self.set(channel, pwm);
        self
    }

    /// Set `channel` to `pwm`
    pub fn set(&mut self, channel: Channel, pwm: u16) {
        self.0[channel.index()] = pwm;
    }

    /// PWM value of `channel`
    pub fn get(&self, channel: Channel) -> u16 {
        self.0[channel.index()]
    }

    fn to_message(self, target: Target) -> MavMessage {
        let [chan1_raw, chan2_raw, chan3_raw, chan4_raw, chan5_raw, chan6_raw, chan7_raw, chan8_raw] =
            self.0;

        MavMessage::RC_CHANNELS_OVERRIDE(RC_CHANNELS_OVERRIDE_DATA {
            chan1_raw,
            chan2_raw,
            chan3_raw,
            chan4_raw,
            chan5_raw,
            chan6_raw,
            chan7_raw,
            chan8_raw,
            target_system: target.system_id,
            target_component: target.component_id,
            ..Default::default()
        })
    }
}

/// # Access to the RC channel overrides
///
/// See the [channels module documentation](crate::subsystems::channels) for more context and information.
pub struct Channels {
    uplink: Sender<MavMessage>,
    target: Target,
    last: Mutex<Overrides>,
}

impl Channels {
    pub(crate) fn new(uplink: Sender<MavMessage>, target: Target) -> Self {
        Self {
            uplink,
            target,
            last: Mutex::new(Overrides::released()),
        }
    }

    /// Send channel overrides
    pub async fn set_overrides(&self, overrides: Overrides) -> Result<()> {
        self.uplink
            .send_async(overrides.to_message(self.target))
            .await?;

        if let Ok(mut last) = self.last.lock() {
            *last = overrides;
        }

        Ok(())
    }

    /// Set every channel to neutral
    pub async fn neutral(&self) -> Result<()> {
        self.set_overrides(Overrides::neutral()).await
    }

    /// Give every channel back to the RC input
    pub async fn release(&self) -> Result<()> {
        self.set_overrides(Overrides::released()).await
    }

    /// Last overrides sent
    pub fn overrides(&self) -> Overrides {
        match self.last.lock() {
            Ok(last) => *last,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
