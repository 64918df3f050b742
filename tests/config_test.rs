//! Configuration loading and application.

use orcacam::config::{CameraConfig, OrcaConfig};
use orcacam::driver::MockDcam;
use orcacam::logging::LogFormat;
use orcacam::{ErrorKind, PixelFormat, Roi, Runtime, SensorMode};
use serial_test::serial;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_full_file() {
    let file = write_config(
        r#"
        [camera]
        index = 1
        frame_count = 16
        exposure_s = 0.005
        frame_rate = 50.0
        pixel_format = "mono8"
        sensor_mode = "area"
        temperature_target = -20.0
        roi = { x = 64, y = 32, width = 128, height = 96 }

        [logging]
        level = "debug"
        format = "json"
        "#,
    );

    let config = OrcaConfig::load_from(file.path()).unwrap();
    assert_eq!(config.camera.index, 1);
    assert_eq!(config.camera.frame_count, 16);
    assert_eq!(config.camera.exposure_s, Some(0.005));
    assert_eq!(config.camera.pixel_format().unwrap(), Some(PixelFormat::Mono8));
    assert_eq!(config.camera.sensor_mode().unwrap(), Some(SensorMode::Area));
    assert_eq!(
        config.camera.roi,
        Some(Roi {
            x: 64,
            y: 32,
            width: 128,
            height: 96
        })
    );
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = OrcaConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, OrcaConfig::default());
}

#[test]
#[serial]
fn test_partial_file_keeps_other_defaults() {
    let file = write_config("[camera]\nexposure_s = 0.1\n");
    let config = OrcaConfig::load_from(file.path()).unwrap();
    assert_eq!(config.camera.exposure_s, Some(0.1));
    assert_eq!(config.camera.frame_count, CameraConfig::default().frame_count);
    assert_eq!(config.logging.level, "info");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config("[camera]\nframe_count = 16\n\n[logging]\nlevel = \"warn\"\n");
    std::env::set_var("ORCACAM_CAMERA__FRAME_COUNT", "32");
    std::env::set_var("ORCACAM_LOGGING__LEVEL", "trace");

    let loaded = OrcaConfig::load_from(file.path());

    std::env::remove_var("ORCACAM_CAMERA__FRAME_COUNT");
    std::env::remove_var("ORCACAM_LOGGING__LEVEL");

    let config = loaded.unwrap();
    assert_eq!(config.camera.frame_count, 32);
    assert_eq!(config.logging.level, "trace");
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    let file = write_config("[camera]\nframe_count = \"many\"\n");
    assert!(OrcaConfig::load_from(file.path()).is_err());
}

#[test]
fn test_validate_reports_bad_roi_and_level() {
    let mut config = OrcaConfig::default();
    config.camera.roi = Some(Roi {
        x: 0,
        y: 0,
        width: 16,
        height: 0,
    });
    assert!(config.validate().is_err());

    let mut config = OrcaConfig::default();
    config.logging.level = "everything".into();
    assert!(config.validate().is_err());

    let mut config = OrcaConfig::default();
    config.camera.exposure_s = Some(-1.0);
    assert!(config.validate().is_err());
}

#[test]
fn test_apply_config_to_session() {
    let mock = MockDcam::with_sensor(256, 256);
    let mut session = Runtime::new(Arc::new(mock.clone())).open(0, 4).unwrap();

    let camera = CameraConfig {
        exposure_s: Some(0.02),
        frame_rate: Some(25.0),
        pixel_format: Some("mono8".into()),
        sensor_mode: Some("photon_number_resolving".into()),
        temperature_target: Some(-5.0),
        roi: Some(Roi {
            x: 32,
            y: 32,
            width: 64,
            height: 64,
        }),
        ..CameraConfig::default()
    };
    session.apply_config(&camera).unwrap();

    assert!((session.exposure().unwrap() - 0.02).abs() < 1e-6);
    assert!((session.frame_rate().unwrap() - 25.0).abs() < 1e-9);
    assert_eq!(session.pixel_format().unwrap(), PixelFormat::Mono8);
    assert_eq!(
        session.sensor_mode().unwrap(),
        SensorMode::PhotonNumberResolving
    );
    assert_eq!(session.temperature_target().unwrap(), -5.0);
    assert_eq!(session.frame_size().unwrap(), (64, 64));
    assert_eq!(session.arena().unwrap().frame_bytes(), 64 * 64);
}

#[test]
fn test_apply_config_stops_at_first_failure() {
    let mock = MockDcam::with_sensor(64, 64);
    mock.set_supported_sensor_modes([SensorMode::Area.as_raw()]);
    let mut session = Runtime::new(Arc::new(mock.clone())).open(0, 4).unwrap();
    let exposure = session.exposure().unwrap();

    let camera = CameraConfig {
        sensor_mode: Some("line".into()),
        exposure_s: Some(0.5),
        ..CameraConfig::default()
    };
    let err = session.apply_config(&camera).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(session.exposure().unwrap(), exposure);
}
