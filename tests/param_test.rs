mod common;

use std::time::{Duration, Instant};

use bluerov_lib::mavlink::ardupilotmega::MavMessage;
use bluerov_lib::{Error, Vehicle};
use common::{init_logger, test_options, SimState, SimVehicle};

#[tokio::test(flavor = "multi_thread")]
async fn parameters_fetch_read_and_write() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (transport, sim) = SimVehicle::start();
    let options = test_options()
        .fetch_parameters(true)
        .command_timeout(Duration::from_millis(300));
    let vehicle = Vehicle::connect_from_transport(transport, options).await?;

    assert_eq!(
        vehicle.param.names(),
        vec!["BATT_CAPACITY", "FS_PILOT_TIMEOUT", "RC_OVERRIDE_TIME"]
    );
    assert_eq!(vehicle.param.get("BATT_CAPACITY").await?, 18000.0);

    let echoed = vehicle.param.set("RC_OVERRIDE_TIME", 1.0).await?;
    assert_eq!(echoed, 1.0);
    assert_eq!(vehicle.param.get("RC_OVERRIDE_TIME").await?, 1.0);
    assert_eq!(sim.state.lock().unwrap().params["RC_OVERRIDE_TIME"], 1.0);

    assert!(matches!(
        vehicle.param.get("NOT_A_PARAM").await,
        Err(Error::ParamError(_))
    ));

    vehicle.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn complete_list_does_not_wait_for_timeout() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (transport, _sim) = SimVehicle::start();
    let options = test_options().command_timeout(Duration::from_secs(2));
    let vehicle = Vehicle::connect_from_transport(transport, options).await?;

    let start = Instant::now();
    assert_eq!(vehicle.param.fetch_all().await?, 3);
    assert!(start.elapsed() < Duration::from_secs(1));

    vehicle.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_parameters_are_requested_by_index() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (transport, sim) = SimVehicle::start_with(SimState {
        skip_in_list: Some(1),
        ..Default::default()
    });
    let options = test_options().command_timeout(Duration::from_millis(300));
    let vehicle = Vehicle::connect_from_transport(transport, options).await?;

    assert_eq!(vehicle.param.fetch_all().await?, 3);
    assert_eq!(vehicle.param.names().len(), 3);
    assert_eq!(vehicle.param.get("FS_PILOT_TIMEOUT").await?, 3.0);

    let reads: Vec<i16> = sim
        .received()
        .into_iter()
        .filter_map(|m| match m {
            MavMessage::PARAM_REQUEST_READ(read) => Some(read.param_index),
            _ => None,
        })
        .collect();
    assert_eq!(reads, vec![1]);

    vehicle.close().await;
    Ok(())
}
