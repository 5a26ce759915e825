mod common;

use std::time::Duration;

use bluerov_lib::battery::BatteryMonitor;
use bluerov_lib::mavlink::ardupilotmega::MavMessage;
use bluerov_lib::motion::{MotionControl, MotionKind};
use bluerov_lib::subsystems::channels::{Channel, Overrides, NEUTRAL_PWM};
use bluerov_lib::{Error, Vehicle, VehicleMode};
use common::{init_logger, test_options, SimVehicle};

fn overrides_sent(sim: &SimVehicle) -> Vec<[u16; 8]> {
    sim.received()
        .into_iter()
        .filter_map(|m| match m {
            MavMessage::RC_CHANNELS_OVERRIDE(o) => Some([
                o.chan1_raw, o.chan2_raw, o.chan3_raw, o.chan4_raw, o.chan5_raw, o.chan6_raw,
                o.chan7_raw, o.chan8_raw,
            ]),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn arm_sets_mode_and_centers_channels() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (transport, sim) = SimVehicle::start();
    let vehicle = Vehicle::connect_from_transport(transport, test_options()).await?;

    let motion = MotionControl::new(&vehicle);
    motion.arm(VehicleMode::AltHold).await?;

    assert!(sim.is_armed());
    assert_eq!(vehicle.mode(), Some(VehicleMode::AltHold));
    assert_eq!(vehicle.channels.overrides(), Overrides::neutral());
    assert!(overrides_sent(&sim).contains(&[NEUTRAL_PWM; 8]));

    vehicle.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn motions_are_held_then_neutralized() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (transport, sim) = SimVehicle::start();
    let vehicle = Vehicle::connect_from_transport(transport, test_options()).await?;
    let mut motion = MotionControl::new(&vehicle);

    motion.throttle(50.0, 0.35).await?;
    assert_eq!(vehicle.channels.overrides(), Overrides::neutral());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent = overrides_sent(&sim);

    // Re-sent while the motion lasts, then back to neutral
    let throttle = Overrides::neutral().with(Channel::Throttle, 1700);
    let holding = sent
        .iter()
        .filter(|o| o[2] == throttle.get(Channel::Throttle))
        .count();
    assert!(holding >= 3, "throttle override sent {} times", holding);
    assert_eq!(sent.last(), Some(&[NEUTRAL_PWM; 8]));

    vehicle.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn recall_replays_backward_with_opposite_speeds() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (transport, sim) = SimVehicle::start();
    let vehicle = Vehicle::connect_from_transport(transport, test_options()).await?;
    let mut motion = MotionControl::new(&vehicle);

    motion.stop().await?;
    motion.throttle(50.0, 0.1).await?;
    motion.yaw(65.0, 0.1).await?;

    let kinds: Vec<MotionKind> = motion.motion_stack().iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MotionKind::Stop, MotionKind::Throttle, MotionKind::Yaw]);

    motion.recall().await?;
    assert!(motion.motion_stack().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent = overrides_sent(&sim);

    let reverse_yaw = sent.iter().position(|o| o[3] == 1240).expect("no reverse yaw");
    let reverse_throttle = sent.iter().position(|o| o[2] == 1300).expect("no reverse throttle");
    let forward_yaw = sent.iter().position(|o| o[3] == 1760).expect("no yaw");
    assert!(forward_yaw < reverse_yaw);
    assert!(reverse_yaw < reverse_throttle);

    vehicle.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn low_battery_disarms() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (transport, sim) = SimVehicle::start();
    let vehicle = Vehicle::connect_from_transport(transport, test_options()).await?;
    vehicle.arm().await?;

    let monitor = BatteryMonitor::per_cell(3.5, 4);
    let watch = monitor.watch(&vehicle);
    tokio::pin!(watch);

    // 16V is fine
    assert!(tokio::time::timeout(Duration::from_millis(300), &mut watch)
        .await
        .is_err());

    sim.set_voltage(13.2);
    let result = tokio::time::timeout(Duration::from_secs(2), watch).await?;

    match result {
        Err(Error::LowBattery { voltage, minimum }) => {
            assert!((voltage - 13.2).abs() < 0.01);
            assert_eq!(minimum, 14.0);
        }
        other => panic!("expected low battery, got {:?}", other),
    }
    assert!(!sim.is_armed());
    assert!(!vehicle.telemetry.state().armed);

    vehicle.close().await;
    Ok(())
}
