//! # Parameter subsystem
//!
//! The autopilot configuration is stored as a flat list of named parameters
//! (`RC_OVERRIDE_TIME`, `FS_PILOT_TIMEOUT`, `BATT_CAPACITY` ...). Names are at
//! most 16 characters and every value is transported as a `f32`, whatever its
//! declared type.
//!
//! The full list can be downloaded with [Param::fetch_all()], which
//! [Vehicle::connect()](crate::Vehicle::connect) does when
//! [ConnectOptions::fetch_parameters](crate::ConnectOptions::fetch_parameters) is set.
//! Values are cached: [Param::get()] only goes to the vehicle for parameters
//! that have not been fetched yet, and [Param::set()] updates the cache with
//! the value echoed back by the autopilot.

use std::collections::BTreeMap;
use std::time::Duration;

use flume::{Receiver, Sender};
use futures::lock::Mutex;
use log::{debug, info, warn};
use mavlink::ardupilotmega::{
    MavMessage, MavParamType, PARAM_REQUEST_LIST_DATA, PARAM_REQUEST_READ_DATA, PARAM_SET_DATA,
    PARAM_VALUE_DATA,
};

use crate::link::{drain, Frame, WaitForMessage};
use crate::vehicle::Target;
use crate::{Error, Result};

const PARAM_ID_LEN: usize = 16;
const FETCH_RETRIES: usize = 3;

fn not_found(name: &str) -> Error {
    Error::ParamError(format!("Parameter {} not found", name))
}

fn encode_param_id(name: &str) -> Result<[u8; PARAM_ID_LEN]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > PARAM_ID_LEN {
        return Err(Error::ParamError(format!(
            "Parameter name {:?} must be 1 to {} characters",
            name, PARAM_ID_LEN
        )));
    }

    let mut id = [0u8; PARAM_ID_LEN];
    id[..bytes.len()].copy_from_slice(bytes);
    Ok(id)
}

fn decode_param_id(id: &[u8]) -> String {
    let end = id.iter().position(|b| *b == 0).unwrap_or(id.len());
    String::from_utf8_lossy(&id[..end]).into_owned()
}

fn mark_received(received: &mut [bool], value: &PARAM_VALUE_DATA) {
    if let Some(r) = received.get_mut(value.param_index as usize) {
        *r = true;
    }
}

#[derive(Debug, Clone, Copy)]
struct ParamEntry {
    value: f32,
    param_type: MavParamType,
}

/// # Access to the parameter subsystem
///
/// See the [param module documentation](crate::subsystems::param) for more context and information.
pub struct Param {
    uplink: Sender<MavMessage>,
    downlink: Mutex<Receiver<Frame>>,
    target: Target,
    timeout: Duration,
    values: std::sync::Mutex<BTreeMap<String, ParamEntry>>,
}

impl Param {
    pub(crate) fn new(
        uplink: Sender<MavMessage>,
        downlink: Receiver<Frame>,
        target: Target,
        timeout: Duration,
    ) -> Self {
        Self {
            uplink,
            downlink: Mutex::new(downlink),
            target,
            timeout,
            values: std::sync::Mutex::new(BTreeMap::new()),
        }
    }

    fn store(&self, value: &PARAM_VALUE_DATA) -> String {
        let name = decode_param_id(&value.param_id);
        if let Ok(mut values) = self.values.lock() {
            values.insert(
                name.clone(),
                ParamEntry {
                    value: value.param_value,
                    param_type: value.param_type,
                },
            );
        }
        name
    }

    fn cached(&self, name: &str) -> Option<ParamEntry> {
        self.values.lock().ok()?.get(name).copied()
    }

    async fn next_value(&self, downlink: &Receiver<Frame>) -> Result<PARAM_VALUE_DATA> {
        let (_, message) = tokio::time::timeout(
            self.timeout,
            downlink.wait_message(|m| matches!(m, MavMessage::PARAM_VALUE(_))),
        )
        .await??;

        match message {
            MavMessage::PARAM_VALUE(value) => Ok(value),
            _ => Err(Error::ParamError("Unexpected parameter answer".to_owned())),
        }
    }

    /// Download every parameter of the autopilot
    ///
    /// Parameters lost on the way are requested again one by one. Returns the
    /// number of parameters downloaded.
    pub async fn fetch_all(&self) -> Result<usize> {
        let downlink = self.downlink.lock().await;
        drain(&downlink);

        let request = MavMessage::PARAM_REQUEST_LIST(PARAM_REQUEST_LIST_DATA {
            target_system: self.target.system_id,
            target_component: self.target.component_id,
        });
        self.uplink.send_async(request).await?;

        let first = self.next_value(&downlink).await?;
        let count = first.param_count as usize;
        let mut received = vec![false; count];

        self.store(&first);
        mark_received(&mut received, &first);

        // The list streams in until complete or until a quiet period
        while !received.iter().all(|r| *r) {
            match self.next_value(&downlink).await {
                Ok(value) => {
                    self.store(&value);
                    mark_received(&mut received, &value);
                }
                Err(Error::Timeout) => break,
                Err(e) => return Err(e),
            }
        }

        for _ in 0..FETCH_RETRIES {
            let missing: Vec<u16> = received
                .iter()
                .enumerate()
                .filter(|(_, r)| !**r)
                .map(|(i, _)| i as u16)
                .collect();
            if missing.is_empty() {
                break;
            }

            debug!("Requesting {} missing parameters", missing.len());
            for index in missing {
                let request = MavMessage::PARAM_REQUEST_READ(PARAM_REQUEST_READ_DATA {
                    param_index: index as i16,
                    target_system: self.target.system_id,
                    target_component: self.target.component_id,
                    param_id: [0; PARAM_ID_LEN],
                });
                self.uplink.send_async(request).await?;

                match self.next_value(&downlink).await {
                    Ok(value) => {
                        self.store(&value);
                        mark_received(&mut received, &value);
                    }
                    Err(Error::Timeout) => continue,
                    Err(e) => return Err(e),
                }
            }
        }

        let fetched = received.iter().filter(|r| **r).count();
        if fetched < count {
            warn!("Only {} of {} parameters fetched", fetched, count);
        } else {
            info!("{} parameters fetched", count);
        }

        Ok(fetched)
    }

    /// Names of the parameters currently cached
    pub fn names(&self) -> Vec<String> {
        match self.values.lock() {
            Ok(values) => values.keys().cloned().collect(),
            Err(_) => vec![],
        }
    }

    /// Read a parameter value
    ///
    /// Returns the cached value if the parameter has already been fetched,
    /// otherwise reads it from the autopilot.
    pub async fn get(&self, name: &str) -> Result<f32> {
        if let Some(entry) = self.cached(name) {
            return Ok(entry.value);
        }

        let param_id = encode_param_id(name)?;
        let downlink = self.downlink.lock().await;
        drain(&downlink);

        let request = MavMessage::PARAM_REQUEST_READ(PARAM_REQUEST_READ_DATA {
            param_index: -1,
            target_system: self.target.system_id,
            target_component: self.target.component_id,
            param_id,
        });
        self.uplink.send_async(request).await?;

        let value = self.wait_value_of(&downlink, name).await?;
        Ok(value.param_value)
    }

    /// Write a parameter value
    ///
    /// Returns the value echoed back by the autopilot, which can differ from
    /// `value` if the autopilot rounded or bounded it.
    pub async fn set(&self, name: &str, value: f32) -> Result<f32> {
        let param_id = encode_param_id(name)?;
        let param_type = self
            .cached(name)
            .map(|e| e.param_type)
            .unwrap_or(MavParamType::MAV_PARAM_TYPE_REAL32);

        let downlink = self.downlink.lock().await;
        drain(&downlink);

        let request = MavMessage::PARAM_SET(PARAM_SET_DATA {
            param_value: value,
            target_system: self.target.system_id,
            target_component: self.target.component_id,
            param_id,
            param_type,
        });
        self.uplink.send_async(request).await?;

        let echo = self.wait_value_of(&downlink, name).await?;
        Ok(echo.param_value)
    }

    async fn wait_value_of(&self, downlink: &Receiver<Frame>, name: &str) -> Result<PARAM_VALUE_DATA> {
        let (_, message) = tokio::time::timeout(
            self.timeout,
            downlink.wait_message(|m| match m {
                MavMessage::PARAM_VALUE(value) => decode_param_id(&value.param_id) == name,
                _ => false,
            }),
        )
        .await
        .map_err(|_| not_found(name))??;

        match message {
            MavMessage::PARAM_VALUE(value) => {
                self.store(&value);
                Ok(value)
            }
            _ => Err(not_found(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_id_is_nul_padded() {
        let id = encode_param_id("RC_OVERRIDE_TIME").unwrap();
        assert_eq!(decode_param_id(&id), "RC_OVERRIDE_TIME");

        let id = encode_param_id("BATT_CAPACITY").unwrap();
        assert_eq!(&id[13..], &[0, 0, 0]);
        assert_eq!(decode_param_id(&id), "BATT_CAPACITY");
    }

    #[test]
    fn param_id_length_is_checked() {
        assert!(encode_param_id("").is_err());
        assert!(encode_param_id("A_NAME_LONGER_THAN_16").is_err());
    }
}
