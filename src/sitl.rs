//! # Software in the loop simulator
//!
//! Runs an ArduPilot SITL binary (`ardusub`, `arducopter` ...) as a child
//! process so the lib can be exercised without hardware. The simulator serves
//! MAVLink on TCP port 5760 by default.
//!
//! The child process is killed when the [Sitl] object is dropped.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::info;
use tokio::process::{Child, Command};

use crate::{Error, Result};

/// Connection string of a SITL started with the default options
pub const DEFAULT_SITL_CONNECTION: &str = "tcp:127.0.0.1:5760";

/// SITL configuration
#[derive(Debug, Clone)]
pub struct SitlConfig {
    /// Path of the simulator binary
    pub binary: PathBuf,
    /// Command line arguments
    pub args: Vec<String>,
    /// Connection string the simulator listens on
    pub connection: String,
    /// Time given to the simulator to open its MAVLink port
    pub startup_delay: Duration,
}

impl SitlConfig {
    /// ArduSub vectored frame, instance 0
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: ["--model", "vectored", "-I0"]
                .iter()
                .map(|a| a.to_string())
                .collect(),
            connection: DEFAULT_SITL_CONNECTION.to_owned(),
            startup_delay: Duration::from_secs(2),
        }
    }

    /// Replace the command line arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the time given to the simulator to start
    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }
}

/// A running simulator
pub struct Sitl {
    child: Child,
    connection: String,
}

impl Sitl {
    /// Start the simulator
    ///
    /// Returns an error if the binary cannot be started or exits during the
    /// startup delay.
    pub async fn start(config: SitlConfig) -> Result<Self> {
        let mut child = Command::new(&config.binary)
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::SystemError(format!("Cannot start {}: {}", config.binary.display(), e))
            })?;

        tokio::time::sleep(config.startup_delay).await;

        if let Some(status) = child
            .try_wait()
            .map_err(|e| Error::SystemError(format!("{}", e)))?
        {
            return Err(Error::SystemError(format!(
                "{} exited during startup ({})",
                config.binary.display(),
                status
            )));
        }

        info!("SITL started, listening on {}", config.connection);

        Ok(Self {
            child,
            connection: config.connection,
        })
    }

    /// Connection string to pass to [Vehicle::connect()](crate::Vehicle::connect)
    pub fn connection_string(&self) -> &str {
        &self.connection
    }

    /// Stop the simulator and wait for it to exit
    pub async fn stop(mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .map_err(|e| Error::SystemError(format!("{}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_runs_vectored_sub() {
        let config = SitlConfig::new("ardusub");
        assert_eq!(config.args, vec!["--model", "vectored", "-I0"]);
        assert_eq!(config.connection, DEFAULT_SITL_CONNECTION);

        let config = config.args(["-I1"]).startup_delay(Duration::ZERO);
        assert_eq!(config.args, vec!["-I1"]);
        assert_eq!(config.startup_delay, Duration::ZERO);
    }

    #[tokio::test]
    async fn missing_binary_fails_to_start() {
        let config = SitlConfig::new("/nonexistent/ardusub").startup_delay(Duration::ZERO);
        assert!(matches!(
            Sitl::start(config).await,
            Err(Error::SystemError(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_is_an_error() {
        let config = SitlConfig::new("true")
            .args(Vec::<String>::new())
            .startup_delay(Duration::from_millis(500));
        assert!(Sitl::start(config).await.is_err());
    }
}
