//! # Motion control
//!
//! Timed motions built on top of the [RC channel overrides](crate::subsystems::channels):
//! each motion drives one pilot input channel at a speed percentage
//! (`[-100, 100]`) for a duration in seconds, then puts the channel back to
//! neutral. Durations are cut to one hour; negative or NaN durations send
//! the overrides once.
//!
//! Every motion executed is remembered in a motion stack. [MotionControl::recall()]
//! plays the stack backward with every speed negated, which brings the
//! vehicle back approximately to where the stack started.
//!
//! ``` no_run
//! # async fn dive(vehicle: &bluerov_lib::Vehicle) -> bluerov_lib::Result<()> {
//! use bluerov_lib::{motion::MotionControl, VehicleMode};
//!
//! let mut motion = MotionControl::new(vehicle);
//! motion.arm(VehicleMode::AltHold).await?;
//!
//! motion.throttle(-10.0, 2.0).await?;
//! motion.yaw(35.0, 1.0).await?;
//! motion.stop().await?;
//!
//! // Go back
//! motion.recall().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use log::{debug, info};
use tokio::time::{sleep, Instant};

use crate::subsystems::channels::{speed_to_pwm, Channel, Overrides};
use crate::{Result, Vehicle, VehicleMode};

/// Period at which overrides are re-sent while a motion lasts
pub const OVERRIDE_PERIOD: Duration = Duration::from_millis(100);

/// Kind of motion, each one drives one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionKind {
    /// Nose up or down
    Pitch,
    /// Tilt right or left
    Roll,
    /// Vertical
    Throttle,
    /// Turn around the vertical axis
    Yaw,
    /// Forward or backward
    Forward,
    /// Lateral
    Strafe,
    /// All channels to neutral
    Stop,
}

impl MotionKind {
    /// Channel driven by the motion, `None` for [MotionKind::Stop]
    pub fn channel(&self) -> Option<Channel> {
        match self {
            MotionKind::Pitch => Some(Channel::Pitch),
            MotionKind::Roll => Some(Channel::Roll),
            MotionKind::Throttle => Some(Channel::Throttle),
            MotionKind::Yaw => Some(Channel::Yaw),
            MotionKind::Forward => Some(Channel::Forward),
            MotionKind::Strafe => Some(Channel::Lateral),
            MotionKind::Stop => None,
        }
    }
}

/// One recorded motion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    /// Channel driven
    pub kind: MotionKind,
    /// Speed in percent
    pub speed: f32,
    /// Time the channel is held
    pub duration: Duration,
}

impl Motion {
    /// The same motion in the opposite direction
    pub fn reversed(&self) -> Self {
        match self.kind {
            MotionKind::Stop => *self,
            _ => Self {
                speed: -self.speed,
                ..*self
            },
        }
    }

    /// Overrides applied while the motion lasts
    pub fn overrides(&self) -> Overrides {
        match self.kind.channel() {
            Some(channel) => Overrides::neutral().with(channel, speed_to_pwm(self.speed)),
            None => Overrides::neutral(),
        }
    }
}

// Longest single motion, longer requests are cut to it
const MAX_DURATION: Duration = Duration::from_secs(3600);

fn seconds(duration: f32) -> Duration {
    if duration.is_nan() || duration <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f32(duration)
        .map(|d| d.min(MAX_DURATION))
        .unwrap_or(MAX_DURATION)
}

/// # Timed motion commands
///
/// See the [motion module documentation](crate::motion) for more context and information.
pub struct MotionControl<'a> {
    vehicle: &'a Vehicle,
    motion_stack: Vec<Motion>,
}

impl<'a> MotionControl<'a> {
    /// Motion control of `vehicle`, with an empty motion stack
    pub fn new(vehicle: &'a Vehicle) -> Self {
        Self {
            vehicle,
            motion_stack: Vec::new(),
        }
    }

    /// Set `mode`, center every channel and arm the motors
    ///
    /// Channels are centered before arming so that the vehicle does not move
    /// on the last overrides sent.
    pub async fn arm(&self, mode: VehicleMode) -> Result<()> {
        self.vehicle.set_mode(mode).await?;
        self.vehicle.channels.neutral().await?;
        self.vehicle.arm().await
    }

    /// Nose up (positive speed) or down
    pub async fn pitch(&mut self, speed: f32, duration: f32) -> Result<()> {
        self.run(MotionKind::Pitch, speed, duration).await
    }

    /// Roll right (positive speed) or left
    pub async fn roll(&mut self, speed: f32, duration: f32) -> Result<()> {
        self.run(MotionKind::Roll, speed, duration).await
    }

    /// Go up (positive speed) or down
    pub async fn throttle(&mut self, speed: f32, duration: f32) -> Result<()> {
        self.run(MotionKind::Throttle, speed, duration).await
    }

    /// Turn clockwise (positive speed) or counter-clockwise
    pub async fn yaw(&mut self, speed: f32, duration: f32) -> Result<()> {
        self.run(MotionKind::Yaw, speed, duration).await
    }

    /// Go forward (positive speed) or backward
    pub async fn forward(&mut self, speed: f32, duration: f32) -> Result<()> {
        self.run(MotionKind::Forward, speed, duration).await
    }

    /// Go right (positive speed) or left
    pub async fn strafe(&mut self, speed: f32, duration: f32) -> Result<()> {
        self.run(MotionKind::Strafe, speed, duration).await
    }

    /// Put every channel to neutral
    pub async fn stop(&mut self) -> Result<()> {
        self.run(MotionKind::Stop, 0.0, 0.0).await
    }

    /// Motions executed since creation or since the last recall
    pub fn motion_stack(&self) -> &[Motion] {
        &self.motion_stack
    }

    /// Play the motion stack backward, reversed, and clear it
    pub async fn recall(&mut self) -> Result<()> {
        let stack = std::mem::take(&mut self.motion_stack);
        info!("Recalling {} motions", stack.len());

        for motion in stack.iter().rev() {
            self.execute(&motion.reversed()).await?;
        }

        self.vehicle.channels.neutral().await
    }

    async fn run(&mut self, kind: MotionKind, speed: f32, duration: f32) -> Result<()> {
        let motion = Motion {
            kind,
            speed,
            duration: seconds(duration),
        };

        self.execute(&motion).await?;
        self.motion_stack.push(motion);
        Ok(())
    }

    async fn execute(&self, motion: &Motion) -> Result<()> {
        debug!("{:?}", motion);

        let overrides = motion.overrides();
        let deadline = Instant::now() + motion.duration;

        loop {
            self.vehicle.channels.set_overrides(overrides).await?;

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(OVERRIDE_PERIOD.min(deadline - now)).await;
        }

        if motion.kind != MotionKind::Stop {
            self.vehicle.channels.neutral().await?;
        }

        Ok(())
    }
}
