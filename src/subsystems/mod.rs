//! # Vehicle subsystems
//!
//! The MAVLink protocol is organized in logical microservices: heartbeat and
//! telemetry streams, commands, parameters, RC overrides, guided setpoints ...
//! Each subsystem here implements the ground side of one of them.
//!
//! Subsystems are created by [Vehicle::connect()](crate::Vehicle::connect) and
//! are available as public fields of the [Vehicle](crate::Vehicle) struct.

pub mod channels;
pub mod commander;
pub mod param;
pub mod setpoint;
pub mod telemetry;
