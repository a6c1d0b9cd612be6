use std::sync::Mutex;
use std::time::Duration;

use eventhttp::config::{CONFIG_ENV, Config, LISTEN_ENV, ListenConfig, ServerConfig, parse_listen};
use eventhttp::http::request::Method;

// Tests touching the process environment must not interleave.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    unsafe {
        std::env::remove_var(LISTEN_ENV);
        std::env::remove_var(CONFIG_ENV);
    }
}

#[test]
fn test_config_default_addresses() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = Config::load().unwrap();
    assert_eq!(
        cfg.listen,
        vec![
            ListenConfig::new("127.0.0.1", 8088),
            ListenConfig::new("127.0.0.1", 8089),
        ]
    );
    assert_eq!(cfg.server, ServerConfig::default());
}

#[test]
fn test_config_custom_address_from_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    unsafe {
        std::env::set_var(LISTEN_ENV, "0.0.0.0:3000, 127.0.0.1:3001");
    }

    let cfg = Config::load();
    clear_env();

    assert_eq!(
        cfg.unwrap().listen,
        vec![
            ListenConfig::new("0.0.0.0", 3000),
            ListenConfig::new("127.0.0.1", 3001),
        ]
    );
}

#[test]
fn test_config_invalid_listen_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    unsafe {
        std::env::set_var(LISTEN_ENV, "localhost");
    }

    let cfg = Config::load();
    clear_env();

    assert!(cfg.is_err());
}

#[test]
fn test_config_file_from_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let path = std::env::temp_dir().join(format!("eventhttp-config-{}.yaml", std::process::id()));
    std::fs::write(
        &path,
        "listen:\n  - host: 0.0.0.0\n    port: 9000\nserver:\n  workers: 2\n",
    )
    .unwrap();
    unsafe {
        std::env::set_var(CONFIG_ENV, &path);
    }

    let cfg = Config::load();
    clear_env();
    let _ = std::fs::remove_file(&path);

    let cfg = cfg.unwrap();
    assert_eq!(cfg.listen, vec![ListenConfig::new("0.0.0.0", 9000)]);
    assert_eq!(cfg.server.workers, 2);
    assert_eq!(cfg.server.backlog, ServerConfig::default().backlog);
}

#[test]
fn test_config_missing_file_is_an_error() {
    assert!(Config::from_file("/nonexistent/eventhttp.yaml").is_err());
}

#[test]
fn test_config_from_yaml_full() {
    let yaml = r#"
listen:
  - host: 127.0.0.1
    port: 8080
  - host: "::1"
    port: 8081
server:
  backlog: 64
  max_headers_size: 4096
  max_body_size: 1024
  idle_timeout_secs: 5
  keep_alive: false
  workers: 4
  allowed_methods: [GET, HEAD]
"#;
    let cfg = Config::from_yaml(yaml).unwrap();

    assert_eq!(cfg.listen.len(), 2);
    assert_eq!(cfg.listen[1], ListenConfig::new("::1", 8081));
    assert_eq!(cfg.server.backlog, 64);

    let settings = cfg.server.connection_settings();
    assert_eq!(settings.limits.max_headers_size, 4096);
    assert_eq!(settings.limits.max_body_size, 1024);
    assert_eq!(settings.idle_timeout, Some(Duration::from_secs(5)));
    assert!(!settings.keep_alive);
    assert!(settings.allows(Method::HEAD));
    assert!(!settings.allows(Method::POST));
}

#[test]
fn test_config_from_yaml_partial_uses_defaults() {
    let cfg = Config::from_yaml("server:\n  keep_alive: false\n").unwrap();

    assert_eq!(cfg.listen, Config::default().listen);
    assert!(!cfg.server.keep_alive);
    assert_eq!(cfg.server.idle_timeout_secs, 60);
    assert!(cfg.server.connection_settings().allows(Method::DELETE));
}

#[test]
fn test_config_from_yaml_rejects_empty_listen() {
    assert!(Config::from_yaml("listen: []\n").is_err());
}

#[test]
fn test_config_from_yaml_rejects_unknown_method() {
    assert!(Config::from_yaml("server:\n  allowed_methods: [FETCH]\n").is_err());
}

#[test]
fn test_parse_listen_pairs() {
    let listen = parse_listen("127.0.0.1:8088,[::1]:8089").unwrap();

    assert_eq!(
        listen,
        vec![
            ListenConfig::new("127.0.0.1", 8088),
            ListenConfig::new("::1", 8089),
        ]
    );
}

#[test]
fn test_parse_listen_rejects_bad_input() {
    assert!(parse_listen("").is_err());
    assert!(parse_listen("127.0.0.1").is_err());
    assert!(parse_listen("127.0.0.1:http").is_err());
    assert!(parse_listen("127.0.0.1:70000").is_err());
    assert!(parse_listen(":8088").is_err());
    assert!(parse_listen("::1:8088").is_err());
}
