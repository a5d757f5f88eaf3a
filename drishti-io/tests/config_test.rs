use drishti_io::config::{AppConfig, KinectBackend};

#[test]
fn test_sample_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../drishti.toml");
    let config = AppConfig::from_file(path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.network.http_port, 5600);
    assert_eq!(config.kinect.backend, KinectBackend::None);
    assert_eq!(config.picam.preset_names(), vec!["full", "high", "low", "medium"]);
    assert_eq!(config.picam.resolve("full").unwrap().1.resolution(), "1920x1080");
}
