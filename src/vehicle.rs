use crate::connection::{ConnectionString, DeviceScan};
use crate::link::{
    open_transport, MavDispatch, Transport, ATTITUDE_ID, COMMAND_ACK_ID, GLOBAL_POSITION_INT_ID,
    HEARTBEAT_ID, PARAM_VALUE_ID, SYS_STATUS_ID, VFR_HUD_ID,
};
use crate::subsystems::channels::Channels;
use crate::subsystems::commander::Commander;
use crate::subsystems::param::Param;
use crate::subsystems::setpoint::Setpoint;
use crate::subsystems::telemetry::{Telemetry, VehicleState};
use crate::{Error, Result, VehicleMode};

use flume as channel;
use futures::lock::Mutex;
use log::{info, warn};
use mavlink::ardupilotmega::{
    MavAutopilot, MavMessage, MavModeFlag, MavState, MavType, HEARTBEAT_DATA,
};
use mavlink::{MavHeader, MavlinkVersion};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const UPLINK_POLL: Duration = Duration::from_millis(100);
const GCS_HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// MAVLink system and component the commands are addressed to
///
/// Learned from the first autopilot heartbeat received after connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Autopilot system id
    pub system_id: u8,
    /// Autopilot component id
    pub component_id: u8,
}

/// Connection configuration
///
/// The default values match what a ground control station uses with ArduSub.
///
/// ```
/// # use std::time::Duration;
/// let options = bluerov_lib::ConnectOptions::default()
///     .wait_ready(false)
///     .heartbeat_timeout(Duration::from_secs(5));
/// assert_eq!(options.stream_rate_hz, 4);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Wait for attitude and battery to be reported before returning from connect
    pub wait_ready: bool,
    /// Time to wait for the first autopilot heartbeat
    pub heartbeat_timeout: Duration,
    /// Time to wait for the vehicle to be ready, see [ConnectOptions::wait_ready]
    pub ready_timeout: Duration,
    /// Time to wait for a command acknowledgement or a state change
    pub command_timeout: Duration,
    /// Telemetry rate requested from the autopilot
    pub stream_rate_hz: u16,
    /// System id the lib sends with
    pub gcs_system_id: u8,
    /// Component id the lib sends with
    pub gcs_component_id: u8,
    /// MAVLink protocol version used to send
    pub mavlink_version: MavlinkVersion,
    /// Download every parameter at connection
    pub fetch_parameters: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            wait_ready: true,
            heartbeat_timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(3),
            stream_rate_hz: 4,
            gcs_system_id: 255,
            gcs_component_id: 190,
            mavlink_version: MavlinkVersion::V2,
            fetch_parameters: false,
        }
    }
}

impl ConnectOptions {
    /// Set [ConnectOptions::wait_ready]
    pub fn wait_ready(mut self, wait_ready: bool) -> Self {
        self.wait_ready = wait_ready;
        self
    }

    /// Set [ConnectOptions::heartbeat_timeout]
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set [ConnectOptions::ready_timeout]
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set [ConnectOptions::command_timeout]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set [ConnectOptions::stream_rate_hz]
    pub fn stream_rate_hz(mut self, rate: u16) -> Self {
        self.stream_rate_hz = rate;
        self
    }

    /// Set [ConnectOptions::mavlink_version]
    pub fn mavlink_version(mut self, version: MavlinkVersion) -> Self {
        self.mavlink_version = version;
        self
    }

    /// Set [ConnectOptions::fetch_parameters]
    pub fn fetch_parameters(mut self, fetch: bool) -> Self {
        self.fetch_parameters = fetch;
        self
    }
}

fn gcs_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

// Background tasks of a connection, stopped when dropped
struct LinkTasks {
    uplink_task: Mutex<Option<JoinHandle<()>>>,
    // Disconnected when the reader thread exits
    dispatch_finished: Mutex<Option<channel::Receiver<()>>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    disconnect: Arc<AtomicBool>,
    closed: channel::Receiver<String>,
}

impl Drop for LinkTasks {
    fn drop(&mut self) {
        self.disconnect.store(true, Relaxed);
        if let Some(heartbeat_task) = self.heartbeat_task.get_mut().take() {
            heartbeat_task.abort();
        }
    }
}

/// # The Vehicle
///
/// This struct is one-time use: Creating it will connect to the autopilot and once closed, either as requested
/// by the lib user or as a result of a connection loss, the object cannot be reconnected. A new one need to be created
/// to connect again.
///
/// All methods take `&self`, the intention is for the vehicle to be shared between tasks using `Arc<>`.
///
/// See the [bluerov-lib crate root documentation](crate) for more context and information.
pub struct Vehicle {
    /// Vehicle state and attribute listeners
    pub telemetry: Telemetry,
    /// MAVLink commands
    pub commander: Commander,
    /// RC channel overrides
    pub channels: Channels,
    /// Guided velocity setpoints
    pub setpoint: Setpoint,
    /// Autopilot parameters
    pub param: Param,
    target: Target,
    options: ConnectOptions,
    tasks: LinkTasks,
}

impl Vehicle {
    /// Connect to a vehicle
    ///
    /// `connection` is parsed with [ConnectionString::parse()], for example
    /// `udp:0.0.0.0:14550`, `/dev/ttyACM0` or `tcp:127.0.0.1:5760`.
    ///
    /// An error is returned either if the link cannot be opened or if the vehicle does not answer.
    pub async fn connect(connection: &str, options: ConnectOptions) -> Result<Self> {
        let connection = ConnectionString::parse(connection)?;
        let transport = open_transport(connection.as_str(), options.mavlink_version).await?;

        Self::connect_from_transport(transport, options).await
    }

    /// Connect to the first serial device of a scan that answers
    ///
    /// Tries `prefix0`, `prefix1` ... in order. Returns [Error::NoDeviceFound]
    /// if none of the devices answers.
    pub async fn connect_with_scan(scan: &DeviceScan, options: ConnectOptions) -> Result<Self> {
        for (path, connection) in scan.candidates() {
            match Self::connect(connection.as_str(), options.clone()).await {
                Ok(vehicle) => {
                    info!("Connect to {}", path);
                    return Ok(vehicle);
                }
                Err(e) => warn!("Cannot connect to {}: {}", path, e),
            }
        }

        Err(Error::NoDeviceFound {
            prefix: scan.prefix.clone(),
            attempts: scan.attempts(),
        })
    }

    /// Connect to a vehicle using an existing transport
    ///
    /// This function will return an error if anything goes wrong in the connection process.
    pub async fn connect_from_transport(
        transport: impl Transport,
        options: ConnectOptions,
    ) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let disconnect = Arc::new(AtomicBool::new(false));

        // Downlink dispatcher
        let (closed_tx, closed) = channel::bounded(1);
        let mut dispatcher = MavDispatch::new(transport.clone(), disconnect.clone(), closed_tx);

        // Uplink queue
        let (uplink, rx) = channel::unbounded::<MavMessage>();
        let disconnect_uplink = disconnect.clone();
        let (system_id, component_id) = (options.gcs_system_id, options.gcs_component_id);
        let uplink_task = tokio::task::spawn_blocking(move || {
            let mut sequence: u8 = 0;
            while !disconnect_uplink.load(Relaxed) {
                match rx.recv_timeout(UPLINK_POLL) {
                    Ok(message) => {
                        let header = MavHeader {
                            system_id,
                            component_id,
                            sequence,
                        };
                        sequence = sequence.wrapping_add(1);

                        if let Err(e) = transport.send(&header, &message) {
                            warn!("Cannot send to the vehicle: {}", e);
                            return;
                        }
                    }
                    Err(flume::RecvTimeoutError::Timeout) => (),
                    Err(flume::RecvTimeoutError::Disconnected) => return,
                }
            }
        });

        // The same id is never claimed twice
        let claim_error = || Error::SystemError("Message id claimed twice".to_owned());
        let telemetry_downlink = dispatcher
            .get_messages_receiver(&[
                HEARTBEAT_ID,
                SYS_STATUS_ID,
                ATTITUDE_ID,
                GLOBAL_POSITION_INT_ID,
                VFR_HUD_ID,
            ])
            .ok_or_else(claim_error)?;
        let ack_downlink = dispatcher
            .get_message_receiver(COMMAND_ACK_ID)
            .ok_or_else(claim_error)?;
        let param_downlink = dispatcher
            .get_message_receiver(PARAM_VALUE_ID)
            .ok_or_else(claim_error)?;

        let telemetry = Telemetry::new(telemetry_downlink, dispatcher.all_messages());

        // Start the downlink message dispatcher
        let dispatch_finished = dispatcher.run()?;

        let heartbeat_uplink = uplink.clone();
        let heartbeat_task = tokio::spawn(async move {
            while heartbeat_uplink.send_async(gcs_heartbeat()).await.is_ok() {
                tokio::time::sleep(GCS_HEARTBEAT_PERIOD).await;
            }
        });

        let tasks = LinkTasks {
            uplink_task: Mutex::new(Some(uplink_task)),
            dispatch_finished: Mutex::new(Some(dispatch_finished)),
            heartbeat_task: Mutex::new(Some(heartbeat_task)),
            disconnect,
            closed,
        };

        // From here on, returning an error drops the tasks and closes the link
        let state = telemetry
            .wait_for(|s| s.last_heartbeat.is_some(), options.heartbeat_timeout)
            .await?;
        let target = Target {
            system_id: state.system_id,
            component_id: state.component_id,
        };
        info!(
            "Vehicle found: system {} component {}",
            target.system_id, target.component_id
        );

        let commander = Commander::new(uplink.clone(), ack_downlink, target, options.command_timeout);
        let channels = Channels::new(uplink.clone(), target);
        let setpoint = Setpoint::new(uplink.clone(), target);
        let param = Param::new(uplink, param_downlink, target, options.command_timeout);

        commander.request_data_streams(options.stream_rate_hz).await?;

        if options.fetch_parameters {
            param.fetch_all().await?;
        }

        if options.wait_ready {
            telemetry
                .wait_for(VehicleState::is_ready, options.ready_timeout)
                .await?;
        }

        Ok(Vehicle {
            telemetry,
            commander,
            channels,
            setpoint,
            param,
            target,
            options,
            tasks,
        })
    }

    /// System and component the commands are sent to
    pub fn target(&self) -> Target {
        self.target
    }

    /// Current mode, `None` if the autopilot reports a mode unknown to the lib
    pub fn mode(&self) -> Option<VehicleMode> {
        self.telemetry.state().mode()
    }

    /// Change the vehicle mode
    ///
    /// Returns once the autopilot heartbeat reports the new mode.
    pub async fn set_mode(&self, mode: VehicleMode) -> Result<()> {
        self.commander.set_mode(mode).await?;

        let custom_mode = mode.custom_mode();
        self.telemetry
            .wait_for(|s| s.custom_mode == Some(custom_mode), self.options.command_timeout)
            .await?;

        info!("Mode set to {}", mode);
        Ok(())
    }

    /// Arm the motors
    ///
    /// Returns once the autopilot heartbeat reports the motors armed.
    pub async fn arm(&self) -> Result<()> {
        self.set_armed(true).await
    }

    /// Disarm the motors
    ///
    /// Returns once the autopilot heartbeat reports the motors disarmed.
    pub async fn disarm(&self) -> Result<()> {
        self.set_armed(false).await
    }

    async fn set_armed(&self, armed: bool) -> Result<()> {
        self.commander.arm_disarm(armed).await?;

        self.telemetry
            .wait_for(|s| s.armed == armed, self.options.command_timeout)
            .await?;

        info!("{}", if armed { "Armed" } else { "Disarmed" });
        Ok(())
    }

    /// Close the connection
    ///
    /// The Connection can be ended in two ways: either by dropping the [Vehicle] object or by calling this
    /// close() function. Once this function returns, the link is closed.
    ///
    /// Once closed, any methods that uses the communication to the vehicle will return the error
    /// [Error::Disconnected]
    pub async fn close(&self) {
        // Set disconnect to true, will make both uplink and dispatcher task quit
        self.tasks.disconnect.store(true, Relaxed);

        if let Some(heartbeat_task) = self.tasks.heartbeat_task.lock().await.take() {
            heartbeat_task.abort();
        }
        if let Some(uplink_task) = self.tasks.uplink_task.lock().await.take() {
            let _ = uplink_task.await;
        }
        if let Some(finished) = self.tasks.dispatch_finished.lock().await.take() {
            // The reader only sees the flag once its current read returns
            if tokio::time::timeout(CLOSE_TIMEOUT, finished.recv_async())
                .await
                .is_err()
            {
                warn!("Link reader still blocked, leaving it behind");
            }
        }
    }

    /// Wait for the vehicle to be disconnected
    ///
    /// This function waits for the link to close and for the connection to be fully closed. It returns
    /// a string describing the reason for the disconnection.
    pub async fn wait_disconnect(&self) -> String {
        let reason = self
            .tasks
            .closed
            .recv_async()
            .await
            .unwrap_or_else(|_| "Disconnected".to_owned());

        self.close().await;

        reason
    }
}
