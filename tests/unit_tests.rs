use bridge_migrate::ConfigOpts;
use clap::Parser;
use std::path::PathBuf;

#[test]
fn test_config_opts_from_flag() {
    let opts = ConfigOpts::try_parse_from(["bridge-migrate", "--config", "runs/nightly.yaml"]).unwrap();
    assert_eq!(opts.path, PathBuf::from("runs/nightly.yaml"));

    let opts = ConfigOpts::try_parse_from(["bridge-migrate", "-c", "other.yaml"]).unwrap();
    assert_eq!(opts.path, PathBuf::from("other.yaml"));
}

#[test]
fn test_config_opts_default_path() {
    // Only meaningful when the fallback variable is not set in the test environment.
    if std::env::var_os("BRIDGE_MIGRATE_CONFIG").is_some() {
        return;
    }
    let opts = ConfigOpts::try_parse_from(["bridge-migrate"]).unwrap();
    assert_eq!(opts.path, PathBuf::from("migration.yaml"));
}

#[test]
fn test_load_reports_missing_file() {
    let opts = ConfigOpts {
        path: PathBuf::from("/nonexistent/bridge-migrate.yaml"),
    };
    let err = opts.load().unwrap_err();
    assert!(format!("{err:#}").contains("Failed to read config file"));
}
