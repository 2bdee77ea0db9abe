//! End-to-end runs of the registry against the simulated ISP.

use isp3a_core::color::estimate_cct;
use isp3a_core::{AlgoError, AlgoId, AlgoState, AlgorithmRegistry, IqParams, RegistryOptions};
use isp3a_hw::sensors::lookup_sensor;
use isp3a_hw::{SensorInfo, SimulatedIsp, StatLocation};

fn small_sensor() -> SimulatedIsp {
    SimulatedIsp::new(
        SensorInfo {
            name: "small".into(),
            exposure_min: 100,
            exposure_max: 10_000,
            gain_min: 0,
            gain_max: 24_000,
            vsync_latency: 3,
        },
    )
}

fn imx335() -> SimulatedIsp {
    SimulatedIsp::from_entry(lookup_sensor("imx335").unwrap())
}

fn run(reg: &mut AlgorithmRegistry, isp: &mut SimulatedIsp, iq: &mut IqParams, ticks: usize) {
    for _ in 0..ticks {
        isp.advance_frame();
        reg.process(isp, iq).unwrap();
    }
}

#[test]
fn test_aec_init_commits_sensor_minimum() {
    let mut isp = small_sensor();
    isp.sensor_exposure = 4000;
    isp.sensor_gain = 9000;
    let mut iq = IqParams::builtin("imx335").unwrap();
    iq.aec.exposure_target = 100;

    let mut reg = AlgorithmRegistry::default();
    reg.init(&mut isp, &mut iq).unwrap();

    assert_eq!(isp.sensor_exposure, 100);
    assert_eq!(isp.sensor_gain, 0);
}

#[test]
fn test_black_level_follows_gain() {
    let mut isp = small_sensor();
    let mut iq = IqParams::builtin("imx335").unwrap();
    iq.aec.enable = false;
    iq.black_level.reference_gain = vec![100, 200, 300];
    iq.black_level.level = vec![[1, 2, 3], [4, 5, 6], [7, 8, 9]];
    isp.sensor_gain = 210;

    let mut reg = AlgorithmRegistry::default();
    reg.init(&mut isp, &mut iq).unwrap();
    run(&mut reg, &mut isp, &mut iq, 1);

    assert!(isp.black_level.enable);
    assert_eq!((isp.black_level.r, isp.black_level.g, isp.black_level.b), (4, 5, 6));
}

#[test]
fn test_cct_variant_picks_d65_for_neutral_gray() {
    let cct = estimate_cct([128.0, 128.0, 128.0], [1.9e-5, 0.76, 763.0]).unwrap();
    assert!((6400.0..6600.0).contains(&cct), "cct {cct}");

    let mut isp = imx335();
    isp.scene.cct = 6500.0;
    isp.sensor_exposure = 14_000;
    let mut iq = IqParams::builtin("imx335").unwrap();
    iq.aec.enable = false;
    iq.awb.enable = false;
    iq.simple_awb.enable = false;
    iq.simple_aec.enable = false;

    let mut reg = AlgorithmRegistry::new(RegistryOptions { bypass_simple: false });
    reg.init(&mut isp, &mut iq).unwrap();
    run(&mut reg, &mut isp, &mut iq, 5);

    assert_eq!(reg.diagnostics().awb_temperature, 6500);
    assert_eq!(reg.awb_profile_index(), 3);
    assert_eq!(isp.isp_gain.r, 1.0);
}

#[test]
fn test_full_pipeline_settles() {
    let mut isp = imx335();
    isp.scene.cct = 4000.0;
    isp.scene.brightness = 4.0;
    let mut iq = IqParams::builtin("imx335").unwrap();

    let mut reg = AlgorithmRegistry::default();
    reg.init(&mut isp, &mut iq).unwrap();
    run(&mut reg, &mut isp, &mut iq, 400);

    let lum = i32::from(isp.sample(StatLocation::Up).l);
    let target = iq.aec.exposure_target as i32;
    assert!((lum - target).abs() <= 3, "lum {lum} target {target}");

    assert_eq!(reg.diagnostics().awb_temperature, 4000);
    assert_eq!(reg.awb_profile_index(), 1);
    assert!(isp.bad_pixel_enabled);
    assert!(isp.writes.bad_pixel > 0);
}

#[test]
fn test_live_target_change_is_followed() {
    let mut isp = imx335();
    isp.scene.brightness = 4.0;
    let mut iq = IqParams::builtin("imx335").unwrap();

    let mut reg = AlgorithmRegistry::default();
    reg.init(&mut isp, &mut iq).unwrap();
    run(&mut reg, &mut isp, &mut iq, 300);

    reg.set_exposure_target(&mut iq, 100).unwrap();
    run(&mut reg, &mut isp, &mut iq, 300);
    let lum = i32::from(isp.sample(StatLocation::Up).l);
    assert!((lum - 100).abs() <= 3, "lum {lum}");
}

#[test]
fn test_external_override_is_reasserted() {
    let mut isp = imx335();
    isp.scene.brightness = 4.0;
    let mut iq = IqParams::builtin("imx335").unwrap();

    let mut reg = AlgorithmRegistry::default();
    reg.init(&mut isp, &mut iq).unwrap();
    run(&mut reg, &mut isp, &mut iq, 300);
    let settled = isp.sensor_exposure;

    // The next step starts from the committed exposure, not the override.
    isp.sensor_exposure = 30_000;
    run(&mut reg, &mut isp, &mut iq, 4);
    assert!(
        isp.sensor_exposure <= settled + settled / 20,
        "{} vs {settled}",
        isp.sensor_exposure
    );
}

#[test]
fn test_dropped_statistics_are_requested_again() {
    let mut isp = small_sensor();
    let mut iq = IqParams::builtin("imx335").unwrap();
    let mut reg = AlgorithmRegistry::default();
    reg.init(&mut isp, &mut iq).unwrap();
    run(&mut reg, &mut isp, &mut iq, 1);
    assert_eq!(reg.state(AlgoId::Aec), Some(AlgoState::WaitingStat));

    isp.flush_statistics();
    assert_eq!(isp.outstanding_requests(), 0);
    run(&mut reg, &mut isp, &mut iq, 1);

    assert_eq!(reg.state(AlgoId::Aec), Some(AlgoState::WaitingStat));
    assert_eq!(reg.state(AlgoId::Awb), Some(AlgoState::WaitingStat));
    assert_eq!(isp.outstanding_requests(), 2);
}

#[test]
fn test_write_failure_is_retried_next_tick() {
    let mut isp = small_sensor();
    let mut iq = IqParams::builtin("imx335").unwrap();
    iq.black_level.enable = false;
    iq.bad_pixel.enable = false;
    let mut reg = AlgorithmRegistry::default();
    reg.init(&mut isp, &mut iq).unwrap();

    isp.faults.fail_writes = true;
    isp.advance_frame();
    let err = reg.process(&mut isp, &mut iq).unwrap_err();
    assert!(matches!(err, AlgoError::HardwareAccess(_)));
    assert_eq!(isp.sensor_exposure, 100);

    isp.faults.fail_writes = false;
    run(&mut reg, &mut isp, &mut iq, 1);
    assert!(isp.sensor_exposure > 100);
}

#[test]
fn test_missing_sensor_driver_blocks_init() {
    let mut isp = small_sensor();
    isp.faults.sensor_helpers = false;
    let mut iq = IqParams::builtin("imx335").unwrap();
    let mut reg = AlgorithmRegistry::default();
    assert_eq!(
        reg.init(&mut isp, &mut iq),
        Err(AlgoError::HelperNotImplemented("sensor_info"))
    );
}
