use tempfile::tempdir;
use ui_handoff::Settings;

#[test]
fn missing_file_gives_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let settings = Settings::load(path.to_str().unwrap()).unwrap();
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.dispatch_thread_name, "host-dispatch");
    assert!(settings.log_path().is_none());
}

#[test]
fn partial_file_fills_in_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{ "drain_batch_limit": 16 }"#).unwrap();

    let settings = Settings::load(path.to_str().unwrap()).unwrap();
    assert_eq!(settings.drain_batch_limit, Some(16));
    assert!(!settings.debug_logging);
    assert_eq!(settings.timer_thread_name, Settings::default().timer_thread_name);
}

#[test]
fn save_and_load_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let settings = Settings {
        debug_logging: true,
        log_file: Some("pump.log".into()),
        drain_batch_limit: Some(4),
        dispatch_thread_name: "dispatch".into(),
        timer_thread_name: "timers".into(),
    };
    settings.save(path.to_str().unwrap()).unwrap();

    let loaded = Settings::load(path.to_str().unwrap()).unwrap();
    assert_eq!(loaded, settings);
    assert_eq!(loaded.log_path(), Some(std::path::PathBuf::from("pump.log")));
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(Settings::load(path.to_str().unwrap()).is_err());
}
