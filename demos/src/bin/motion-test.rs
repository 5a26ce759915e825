// Timed motion test
//
// Arms the vehicle, pitches forward, then draws a square with four
// "go up, turn right" legs while printing the telemetry. The vehicle is
// disarmed and the test stops if the battery gets under --min-voltage.

use std::path::PathBuf;
use std::time::Duration;

use bluerov_lib::battery::BatteryMonitor;
use bluerov_lib::connection::{DeviceScan, DEFAULT_BAUD, DEFAULT_DEVICE_PREFIX};
use bluerov_lib::motion::MotionControl;
use bluerov_lib::sitl::{Sitl, SitlConfig};
use bluerov_lib::subsystems::telemetry::Attribute;
use bluerov_lib::{ConnectOptions, Vehicle, VehicleMode};
use clap::Parser;
use futures::StreamExt;
use log::{error, info};
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about = "Timed motion test for an ArduSub vehicle")]
struct Args {
    /// Connection string, for example udp:0.0.0.0:14550 or /dev/ttyACM0
    #[arg(short, long)]
    connect: Option<String>,

    /// Serial device prefix scanned when no connection string is given
    #[arg(long, default_value = DEFAULT_DEVICE_PREFIX)]
    device_prefix: String,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Start this SITL binary and connect to it
    #[arg(long)]
    sitl: Option<PathBuf>,

    /// Mode in which the vehicle is armed
    #[arg(long, default_value = "ALT_HOLD")]
    mode: VehicleMode,

    /// Disarm and stop under this battery voltage, 0 disables the check
    #[arg(long, default_value_t = 0.0)]
    min_voltage: f32,

    /// Time to stay at the end of the test before disconnecting, in seconds
    #[arg(long, default_value_t = 120)]
    hold_secs: u64,
}

async fn choreography(
    vehicle: &Vehicle,
    mode: VehicleMode,
    hold: Duration,
) -> bluerov_lib::Result<()> {
    let mut motion = MotionControl::new(vehicle);

    motion.arm(mode).await?;
    println!("Armed in {}", mode);

    motion.pitch(30.0, 3.0).await?;
    sleep(Duration::from_secs(10)).await;

    for _ in 0..4 {
        motion.stop().await?;
        motion.throttle(50.0, 3.5).await?;
        motion.yaw(65.0, 1.5).await?;
    }

    sleep(hold).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let sitl = match &args.sitl {
        Some(binary) => Some(Sitl::start(SitlConfig::new(binary)).await?),
        None => None,
    };

    let options = ConnectOptions::default();
    let vehicle = match (&sitl, &args.connect) {
        (Some(sitl), _) => Vehicle::connect(sitl.connection_string(), options).await?,
        (None, Some(connect)) => Vehicle::connect(connect, options).await?,
        (None, None) => {
            let scan = DeviceScan::new(&args.device_prefix).with_baud(args.baud);
            Vehicle::connect_with_scan(&scan, options).await?
        }
    };

    info!("Connected to {:?}", vehicle.target());
    println!("{}", vehicle.telemetry.state());

    let mut attitude = Box::pin(vehicle.telemetry.on_attribute(Attribute::Attitude));
    let printer = async {
        while let Some(state) = attitude.next().await {
            if let Some(attitude) = state.attitude {
                println!("{}", attitude);
            }
        }
    };

    let monitor = BatteryMonitor::new(args.min_voltage);
    let hold = Duration::from_secs(args.hold_secs);

    let result = tokio::select! {
        result = monitor.watch(&vehicle), if args.min_voltage > 0.0 => result,
        result = choreography(&vehicle, args.mode, hold) => result,
        _ = printer => Ok(()),
    };

    vehicle.close().await;
    if let Some(sitl) = sitl {
        sitl.stop().await?;
    }

    if let Err(e) = &result {
        error!("Motion test stopped: {}", e);
    }
    result?;
    println!("Finished all the tasks");
    Ok(())
}
