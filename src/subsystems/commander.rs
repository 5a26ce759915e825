//! # MAVLink command subsystem
//!
//! Commands are sent to the autopilot as `COMMAND_LONG` messages. Most of them
//! are acknowledged by a `COMMAND_ACK` carrying the result; [Commander::command_long()]
//! waits for it and turns anything but an accepted result into an
//! [Error::CommandRejected].
//!
//! Only one acknowledged command is in flight at a time: concurrent callers
//! are queued.
//!
//! Arming and mode changes are better done with [Vehicle::arm()](crate::Vehicle::arm)
//! and [Vehicle::set_mode()](crate::Vehicle::set_mode) that also wait for the
//! heartbeat to confirm the new state.

use std::time::Duration;

use flume::{Receiver, Sender};
use futures::lock::Mutex;
use log::debug;
use mavlink::ardupilotmega::{
    MavCmd, MavDataStream, MavMessage, MavModeFlag, MavResult, COMMAND_LONG_DATA,
    REQUEST_DATA_STREAM_DATA,
};

use crate::link::{drain, Frame, WaitForMessage};
use crate::vehicle::Target;
use crate::{Error, Result, VehicleMode};

/// # Access to the command subsystem
///
/// See the [commander module documentation](crate::subsystems::commander) for more context and information.
pub struct Commander {
    uplink: Sender<MavMessage>,
    ack_downlink: Mutex<Receiver<Frame>>,
    target: Target,
    timeout: Duration,
}

impl Commander {
    pub(crate) fn new(
        uplink: Sender<MavMessage>,
        ack_downlink: Receiver<Frame>,
        target: Target,
        timeout: Duration,
    ) -> Self {
        Self {
            uplink,
            ack_downlink: Mutex::new(ack_downlink),
            target,
            timeout,
        }
    }

    fn command_long_message(&self, command: MavCmd, params: [f32; 7]) -> MavMessage {
        MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
            command,
            target_system: self.target.system_id,
            target_component: self.target.component_id,
            confirmation: 0,
        })
    }

    /// Send a command and wait for it to be accepted
    ///
    /// Returns [Error::Timeout] if no acknowledgement arrives within the
    /// command timeout of the [ConnectOptions](crate::ConnectOptions) and
    /// [Error::CommandRejected] if the autopilot refuses the command.
    pub async fn command_long(&self, command: MavCmd, params: [f32; 7]) -> Result<()> {
        let downlink = self.ack_downlink.lock().await;

        // Acks from fire-and-forget commands are not ours
        drain(&downlink);

        self.uplink
            .send_async(self.command_long_message(command, params))
            .await?;

        let (_, ack) = tokio::time::timeout(
            self.timeout,
            downlink.wait_message(|message| match message {
                MavMessage::COMMAND_ACK(ack) => {
                    ack.command == command && ack.result != MavResult::MAV_RESULT_IN_PROGRESS
                }
                _ => false,
            }),
        )
        .await??;

        match ack {
            MavMessage::COMMAND_ACK(ack) if ack.result == MavResult::MAV_RESULT_ACCEPTED => {
                debug!("{:?} accepted", command);
                Ok(())
            }
            MavMessage::COMMAND_ACK(ack) => Err(Error::CommandRejected {
                command: format!("{:?}", command),
                result: format!("{:?}", ack.result),
            }),
            _ => Err(Error::Link("Unexpected answer to command".to_owned())),
        }
    }

    /// Send a command without waiting for its acknowledgement
    pub async fn send_command_long(&self, command: MavCmd, params: [f32; 7]) -> Result<()> {
        self.uplink
            .send_async(self.command_long_message(command, params))
            .await?;
        Ok(())
    }

    /// Request the motors to be armed or disarmed
    pub async fn arm_disarm(&self, arm: bool) -> Result<()> {
        let param1 = if arm { 1.0 } else { 0.0 };
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [param1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    /// Request a mode change
    pub async fn set_mode(&self, mode: VehicleMode) -> Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [
                MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32,
                mode.custom_mode() as f32,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
            ],
        )
        .await
    }

    /// Turn the vehicle to a heading
    ///
    /// * `heading` - Target heading in degrees, or offset in degrees if `relative`
    /// * `relative` - If true, `heading` is an offset to the current heading
    ///
    /// The turn is clockwise, at the default yaw speed of the autopilot. The
    /// command is not acknowledged by every mode, so this function does not wait
    /// for the answer.
    pub async fn condition_yaw(&self, heading: f32, relative: bool) -> Result<()> {
        let is_relative = if relative { 1.0 } else { 0.0 };
        self.send_command_long(
            MavCmd::MAV_CMD_CONDITION_YAW,
            [heading, 0.0, 1.0, is_relative, 0.0, 0.0, 0.0],
        )
        .await
    }

    /// Ask the autopilot to stream all its telemetry at `rate_hz`
    pub async fn request_data_streams(&self, rate_hz: u16) -> Result<()> {
        let message = MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
            req_message_rate: rate_hz,
            target_system: self.target.system_id,
            target_component: self.target.component_id,
            req_stream_id: MavDataStream::MAV_DATA_STREAM_ALL as u8,
            start_stop: 1,
        });
        self.uplink.send_async(message).await?;
        Ok(())
    }
}
