use pageindex_domain::config::Config;

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn default_port_is_8000() {
    let config = Config::default();
    assert_eq!(config.server.port, 8000);
}

#[test]
fn explicit_host_and_port_parse() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 3210
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 3210);
}

#[test]
fn partial_indexer_section_keeps_other_defaults() {
    let toml_str = r#"
[indexer]
command = ["pageindex-native"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.indexer.command, vec!["pageindex-native".to_string()]);
    assert_eq!(config.indexer.cancel_grace_ms, 6_000);
}

#[test]
fn missing_config_file_yields_defaults() {
    let config = Config::load(std::path::Path::new("/nonexistent/config.toml")).unwrap();
    assert_eq!(config.server.port, 8000);
    assert_eq!(config.chat.max_selected_nodes, 6);
}
