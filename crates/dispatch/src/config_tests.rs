use super::*;

fn base() -> Config {
    Config {
        port: Some(7777),
        socket: None,
        host: "0.0.0.0".to_owned(),
        data_dir: PathBuf::from("/tmp/dispatch-data"),
        workdir_root: PathBuf::from("."),
        auth_token: None,
        backpressure_capacity: 1024,
        close_grace_secs: 5,
        idle_threshold_secs: 300,
        store_failure_limit: 3,
        log_format: "json".to_owned(),
        log_level: "info".to_owned(),
        ai_command: vec!["ai-assistant".to_owned()],
    }
}

#[test]
fn rejects_empty_ai_command() {
    let mut cfg = base();
    cfg.ai_command = Vec::new();
    assert!(cfg.validate().is_err());
}

#[test]
fn requires_a_transport() {
    let mut cfg = base();
    cfg.port = None;
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_both_port_and_socket() {
    let mut cfg = base();
    cfg.socket = Some(PathBuf::from("/tmp/dispatch.sock"));
    assert!(cfg.validate().is_err());
}

#[test]
fn accepts_socket_only() {
    let mut cfg = base();
    cfg.port = None;
    cfg.socket = Some(PathBuf::from("/tmp/dispatch.sock"));
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_unknown_log_format() {
    let mut cfg = base();
    cfg.log_format = "xml".to_owned();
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_zero_backpressure_capacity() {
    let mut cfg = base();
    cfg.backpressure_capacity = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn valid_config_passes() {
    assert!(base().validate().is_ok());
}
