//! # BlueROV library
//!
//! This crate allows to connect, communicate with and control an ArduSub
//! vehicle, like the BlueROV, over MAVLink. The wire protocol itself is
//! implemented by the [mavlink] crate, this crate implements the ground
//! control side: connection, telemetry, commands, RC overrides and timed
//! motions.
//!
//! ## Status
//!
//! The vehicle functionalities are implemented in subsystems. The current status is:
//!
//! | Subsystem | Support |
//! |-----------|---------|
//! | Telemetry | Attitude, velocity, battery, HUD, heartbeat |
//! | Commander | COMMAND_LONG with acknowledgement |
//! | Channels | RC override of channels 1-8 |
//! | Setpoint | Local NED velocity only |
//! | Param | Full |
//! | Mission | None |
//!
//! ## Usage
//!
//! The basic procedure to use the lib is:
//!  - Find the connection string, either as a config or user input, or scan the serial devices
//!  - Create a [Vehicle] object from the connection string, this will connect to the autopilot and initializes
//!    the subsystems
//!  - Subsystems are available as public fields of the [Vehicle] struct.
//!  - Use the subsystems, or the [motion] commands, to control the vehicle
//!  - Drop the Vehicle object or call [Vehicle::close()]
//!
//! All functions are only taking an un-mutable reference to the vehicle (`&self`), the intention is for the
//! Vehicle object to be shared between tasks using `Arc<>`.
//!
//! For example:
//! ``` no_run
//! # async fn test() -> Result<(), Box<dyn std::error::Error>> {
//! use bluerov_lib::{ConnectOptions, Vehicle, VehicleMode};
//!
//! let vehicle = Vehicle::connect("udp:0.0.0.0:14550", ConnectOptions::default()).await?;
//!
//! println!("{}", vehicle.telemetry.state());
//!
//! vehicle.set_mode(VehicleMode::AltHold).await?;
//! vehicle.arm().await?;
//!
//! let mut motion = bluerov_lib::motion::MotionControl::new(&vehicle);
//! motion.forward(20.0, 2.0).await?;
//!
//! vehicle.disarm().await?;
//! vehicle.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod error;
mod mode;
mod vehicle;

pub mod battery;
pub mod connection;
pub mod link;
pub mod motion;
pub mod sitl;
pub mod subsystems;

pub use crate::error::{Error, Result};
pub use crate::mode::VehicleMode;
pub use crate::vehicle::{ConnectOptions, Target, Vehicle};

pub use mavlink;
