// In-memory ArduSub autopilot used by the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bluerov_lib::link::{Frame, Transport};
use bluerov_lib::mavlink::ardupilotmega::*;
use bluerov_lib::mavlink::MavHeader;
use bluerov_lib::{ConnectOptions, Error, Result};
use flume::{Receiver, RecvTimeoutError, Sender};

pub const SIM_SYSTEM_ID: u8 = 1;
pub const SIM_COMPONENT_ID: u8 = 1;

const TELEMETRY_PERIOD: Duration = Duration::from_millis(50);

/// Transport end given to the vehicle
pub struct SimTransport {
    to_gcs: Receiver<Frame>,
    from_gcs: Sender<Frame>,
}

impl Transport for SimTransport {
    fn recv(&self) -> Result<Option<Frame>> {
        match self.to_gcs.recv_timeout(Duration::from_millis(20)) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Link("simulator stopped".to_owned())),
        }
    }

    fn send(&self, header: &MavHeader, message: &MavMessage) -> Result<()> {
        self.from_gcs
            .send((*header, message.clone()))
            .map_err(|_| Error::Link("simulator stopped".to_owned()))
    }
}

#[derive(Debug, Clone)]
pub struct SimState {
    pub custom_mode: u32,
    pub armed: bool,
    pub voltage_mv: u16,
    pub reject_arming: bool,
    pub silent: bool,
    /// Index left out of the answer to PARAM_REQUEST_LIST
    pub skip_in_list: Option<usize>,
    pub params: BTreeMap<String, f32>,
    pub received: Vec<Frame>,
}

impl Default for SimState {
    fn default() -> Self {
        let mut params = BTreeMap::new();
        params.insert("RC_OVERRIDE_TIME".to_owned(), 3.0);
        params.insert("FS_PILOT_TIMEOUT".to_owned(), 3.0);
        params.insert("BATT_CAPACITY".to_owned(), 18000.0);

        Self {
            custom_mode: 0,
            armed: false,
            voltage_mv: 16_000,
            reject_arming: false,
            silent: false,
            skip_in_list: None,
            params,
            received: Vec::new(),
        }
    }
}

/// Simulated autopilot, stopped when dropped
pub struct SimVehicle {
    pub state: Arc<Mutex<SimState>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

fn param_id(name: &str) -> [u8; 16] {
    let mut id = [0u8; 16];
    id[..name.len()].copy_from_slice(name.as_bytes());
    id
}

fn param_name(id: &[u8]) -> String {
    let end = id.iter().position(|b| *b == 0).unwrap_or(id.len());
    String::from_utf8_lossy(&id[..end]).into_owned()
}

fn param_value(params: &BTreeMap<String, f32>, index: usize) -> MavMessage {
    let (name, value) = params.iter().nth(index).unwrap();
    MavMessage::PARAM_VALUE(PARAM_VALUE_DATA {
        param_value: *value,
        param_count: params.len() as u16,
        param_index: index as u16,
        param_id: param_id(name),
        param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
    })
}

fn ack(command: MavCmd, result: MavResult) -> MavMessage {
    MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
        command,
        result,
        ..Default::default()
    })
}

fn handle(state: &mut SimState, message: &MavMessage) -> Vec<MavMessage> {
    match message {
        MavMessage::COMMAND_LONG(cmd) => match cmd.command {
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM => {
                if state.reject_arming {
                    vec![ack(cmd.command, MavResult::MAV_RESULT_FAILED)]
                } else {
                    state.armed = cmd.param1 == 1.0;
                    vec![ack(cmd.command, MavResult::MAV_RESULT_ACCEPTED)]
                }
            }
            MavCmd::MAV_CMD_DO_SET_MODE => {
                state.custom_mode = cmd.param2 as u32;
                vec![ack(cmd.command, MavResult::MAV_RESULT_ACCEPTED)]
            }
            _ => vec![ack(cmd.command, MavResult::MAV_RESULT_ACCEPTED)],
        },
        MavMessage::PARAM_REQUEST_LIST(_) => (0..state.params.len())
            .filter(|i| Some(*i) != state.skip_in_list)
            .map(|i| param_value(&state.params, i))
            .collect(),
        MavMessage::PARAM_REQUEST_READ(read) => {
            let index = if read.param_index >= 0 {
                Some(read.param_index as usize)
            } else {
                let name = param_name(&read.param_id);
                state.params.keys().position(|k| *k == name)
            };
            index
                .filter(|i| *i < state.params.len())
                .map(|i| vec![param_value(&state.params, i)])
                .unwrap_or_default()
        }
        MavMessage::PARAM_SET(set) => {
            let name = param_name(&set.param_id);
            state.params.insert(name.clone(), set.param_value);
            let index = state.params.keys().position(|k| *k == name).unwrap();
            vec![param_value(&state.params, index)]
        }
        _ => vec![],
    }
}

fn telemetry(state: &SimState) -> Vec<MavMessage> {
    let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
    if state.armed {
        base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
    }

    vec![
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: state.custom_mode,
            mavtype: MavType::MAV_TYPE_SUBMARINE,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode,
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        }),
        MavMessage::ATTITUDE(ATTITUDE_DATA {
            roll: 0.01,
            pitch: -0.02,
            yaw: 1.5,
            ..Default::default()
        }),
        MavMessage::SYS_STATUS(SYS_STATUS_DATA {
            voltage_battery: state.voltage_mv,
            current_battery: 120,
            battery_remaining: 80,
            ..Default::default()
        }),
        MavMessage::VFR_HUD(VFR_HUD_DATA {
            heading: 86,
            alt: -0.4,
            ..Default::default()
        }),
    ]
}

impl SimVehicle {
    pub fn start() -> (SimTransport, SimVehicle) {
        Self::start_with(SimState::default())
    }

    pub fn start_with(initial: SimState) -> (SimTransport, SimVehicle) {
        let (to_gcs_tx, to_gcs) = flume::unbounded();
        let (from_gcs, from_gcs_rx) = flume::unbounded::<Frame>();

        let state = Arc::new(Mutex::new(initial));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_state = state.clone();
        let thread_stop = stop.clone();
        let thread = thread::spawn(move || {
            let header = MavHeader {
                system_id: SIM_SYSTEM_ID,
                component_id: SIM_COMPONENT_ID,
                sequence: 0,
            };
            let mut last_telemetry = Instant::now() - TELEMETRY_PERIOD;

            while !thread_stop.load(Ordering::Relaxed) {
                let mut outgoing = Vec::new();
                {
                    let mut state = thread_state.lock().unwrap();

                    while let Ok(frame) = from_gcs_rx.try_recv() {
                        outgoing.extend(handle(&mut state, &frame.1));
                        state.received.push(frame);
                    }

                    if !state.silent && last_telemetry.elapsed() >= TELEMETRY_PERIOD {
                        outgoing.extend(telemetry(&state));
                        last_telemetry = Instant::now();
                    }
                }

                for message in outgoing {
                    if to_gcs_tx.send((header, message)).is_err() {
                        return;
                    }
                }

                thread::sleep(Duration::from_millis(5));
            }
        });

        (
            SimTransport { to_gcs, from_gcs },
            SimVehicle {
                state,
                stop,
                thread: Some(thread),
            },
        )
    }

    pub fn set_voltage(&self, voltage: f32) {
        self.state.lock().unwrap().voltage_mv = (voltage * 1000.0) as u16;
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().unwrap().armed
    }

    /// Messages received from the vehicle object so far
    pub fn received(&self) -> Vec<MavMessage> {
        self.state
            .lock()
            .unwrap()
            .received
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn received_headers(&self) -> Vec<MavHeader> {
        self.state
            .lock()
            .unwrap()
            .received
            .iter()
            .map(|(h, _)| *h)
            .collect()
    }
}

impl Drop for SimVehicle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Options with timeouts short enough for tests
pub fn test_options() -> ConnectOptions {
    ConnectOptions::default()
        .heartbeat_timeout(Duration::from_secs(2))
        .ready_timeout(Duration::from_secs(2))
        .command_timeout(Duration::from_secs(1))
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
