//! # Connection strings and serial device scanning
//!
//! Ground-control tools accept a fairly loose connection string: a serial
//! device path, `host:port`, `udp:host:port`, `tcp:host:port` ... The
//! [mavlink] crate on the other hand wants an explicit transport prefix. The
//! [ConnectionString] type converts the former into the latter.
//!
//! The USB serial device of the autopilot changes name depending on the order
//! devices have been plugged in (`/dev/ttyACM0`, `/dev/ttyACM1` ...). A
//! [DeviceScan] lists the candidate paths for a prefix, and
//! [Vehicle::connect_with_scan()](crate::Vehicle::connect_with_scan) tries them
//! in order.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Default serial baudrate of the autopilot USB port
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default device prefix of a Pixhawk plugged on a Linux host (Raspberry Pi)
pub const DEFAULT_DEVICE_PREFIX: &str = "/dev/ttyACM";

// Index suffixes are tried until they would need two digits
const MAX_DEVICE_INDEX: usize = 10;

const MAVLINK_PREFIXES: [&str; 7] = [
    "udpin:", "udpout:", "udpbcast:", "tcpin:", "tcpout:", "serial:", "file:",
];

/// Connection address in the format expected by [mavlink::connect]
///
/// ```
/// # use bluerov_lib::connection::ConnectionString;
/// let c: ConnectionString = "/dev/ttyACM0".parse().unwrap();
/// assert_eq!(c.as_str(), "serial:/dev/ttyACM0:115200");
///
/// let c: ConnectionString = "192.168.2.2:14555".parse().unwrap();
/// assert_eq!(c.as_str(), "udpin:192.168.2.2:14555");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString(String);

impl ConnectionString {
    /// Parse a connection string, see the [module documentation](crate::connection)
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_with_baud(input, DEFAULT_BAUD)
    }

    /// Parse a connection string, using `baud` for bare serial device paths
    pub fn parse_with_baud(input: &str, baud: u32) -> Result<Self> {
        let input = input.trim();

        if MAVLINK_PREFIXES.iter().any(|p| input.starts_with(p)) {
            return Ok(Self(input.to_owned()));
        }

        if let Some(address) = input.strip_prefix("udp:") {
            return Ok(Self(format!("udpin:{}", address)));
        }

        if let Some(address) = input.strip_prefix("tcp:") {
            return Ok(Self(format!("tcpout:{}", address)));
        }

        if input.starts_with('/') || input.to_ascii_uppercase().starts_with("COM") {
            return Ok(Self::serial(input, baud));
        }

        match input.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self(format!("udpin:{}", input)))
            }
            _ => Err(Error::Connection(format!(
                "Cannot understand connection string {:?}",
                input
            ))),
        }
    }

    /// Serial connection to `path` at `baud`
    pub fn serial(path: &str, baud: u32) -> Self {
        Self(format!("serial:{}:{}", path, baud))
    }

    /// Address to pass to [mavlink::connect]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serial device candidates for a device prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceScan {
    /// Device path prefix, the index is appended to it
    pub prefix: String,
    /// Serial baudrate
    pub baud: u32,
}

impl Default for DeviceScan {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_DEVICE_PREFIX.to_owned(),
            baud: DEFAULT_BAUD,
        }
    }
}

impl DeviceScan {
    /// Scan `prefix0` to `prefix9` at the default baudrate
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            baud: DEFAULT_BAUD,
        }
    }

    /// Set the serial baudrate
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Device paths to try, in order
    pub fn device_paths(&self) -> impl Iterator<Item = String> + '_ {
        (0..MAX_DEVICE_INDEX).map(move |index| format!("{}{}", self.prefix, index))
    }

    /// Number of device paths [DeviceScan::device_paths()] yields
    pub fn attempts(&self) -> usize {
        MAX_DEVICE_INDEX
    }

    /// Connection strings to try, in order
    pub fn candidates(&self) -> impl Iterator<Item = (String, ConnectionString)> + '_ {
        self.device_paths().map(move |path| {
            let connection = ConnectionString::serial(&path, self.baud);
            (path, connection)
        })
    }
}
