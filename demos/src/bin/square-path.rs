// Square path in GUIDED mode
//
// Goes around a square with local NED velocity setpoints, turning to face
// the direction of travel before each leg. The first two legs also change
// depth.

use bluerov_lib::{ConnectOptions, Vehicle, VehicleMode};
use clap::Parser;
use log::info;

// vx > 0 goes north, vy > 0 goes east, vz > 0 descends
const NORTH: f32 = 0.5;
const SOUTH: f32 = -0.5;
const EAST: f32 = 0.5;
const WEST: f32 = -0.5;
const UP: f32 = -0.2;
const DOWN: f32 = 0.2;

struct Leg {
    name: &'static str,
    heading: f32,
    velocity: (f32, f32, f32),
}

const SQUARE: [Leg; 4] = [
    Leg { name: "South & up", heading: 180.0, velocity: (SOUTH, 0.0, UP) },
    Leg { name: "West & down", heading: 270.0, velocity: (0.0, WEST, DOWN) },
    Leg { name: "North", heading: 0.0, velocity: (NORTH, 0.0, 0.0) },
    Leg { name: "East", heading: 90.0, velocity: (0.0, EAST, 0.0) },
];

#[derive(Parser, Debug)]
#[command(author, version, about = "Square path with NED velocity setpoints")]
struct Args {
    /// Connection string
    #[arg(short, long, default_value = "udp:0.0.0.0:14550")]
    connect: String,

    /// Duration of each leg, in seconds
    #[arg(short, long, default_value_t = 5)]
    duration: u32,

    /// Arm in GUIDED mode before starting
    #[arg(long)]
    arm: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let vehicle = Vehicle::connect(&args.connect, ConnectOptions::default()).await?;
    info!("Connected to {:?}", vehicle.target());
    println!("{}", vehicle.telemetry.state());

    if args.arm {
        vehicle.set_mode(VehicleMode::Guided).await?;
        vehicle.arm().await?;
    }

    println!("SQUARE path using SET_POSITION_TARGET_LOCAL_NED and velocity parameters");
    for leg in SQUARE.iter() {
        println!("Yaw {} absolute, velocity {}", leg.heading, leg.name);
        vehicle.commander.condition_yaw(leg.heading, false).await?;

        let (vx, vy, vz) = leg.velocity;
        vehicle.setpoint.hold_ned_velocity(vx, vy, vz, args.duration).await?;
        vehicle.setpoint.hold_ned_velocity(0.0, 0.0, 0.0, 1).await?;
        info!("{} leg done", leg.name);
    }

    if args.arm {
        vehicle.disarm().await?;
    }
    vehicle.close().await;

    println!("Finished all the tasks");
    Ok(())
}
