//! Integration tests for Settings config loading with layered merge semantics.
//!
//! Precedence, lowest to highest: defaults, global file, local `.htsr.toml`, HTSR_* env vars.
//! Each layer replaces only the values it specifies.
//!
//! Note: These tests pass an explicit (or no) global config, so the user's
//! real ~/.config/htsr/htsr.toml never leaks in.

use std::fs;

use tempfile::TempDir;

use hts_reconcile::config::{local_config_path, Settings};
use hts_reconcile::{ApplicationError, Backend};

// ============================================================
// File layers
// ============================================================

#[test]
fn given_no_config_files_when_load_then_uses_defaults() {
    // Arrange
    let dir = TempDir::new().unwrap();

    // Act
    let settings = Settings::load_from(None, Some(dir.path())).expect("load settings");

    // Assert
    assert_eq!(settings.backend, Backend::Lsqr);
    assert!(!settings.parallel);
    assert_eq!(settings.solver.atol, 1e-6);
    assert_eq!(settings.bounded.max_iter, 100);
}

#[test]
fn given_local_config_when_load_then_overrides_only_given_values() {
    let dir = TempDir::new().unwrap();
    let local = r#"
backend = "lsmr"

[solver]
atol = 1e-9
max_iter = 40
"#;
    fs::write(local_config_path(dir.path()), local).unwrap();

    let settings = Settings::load_from(None, Some(dir.path())).expect("load settings");

    assert_eq!(settings.backend, Backend::Lsmr);
    assert_eq!(settings.solver.atol, 1e-9);
    assert_eq!(settings.solver.max_iter, Some(40));
    assert_eq!(settings.solver.btol, 1e-6, "unspecified value keeps default");
    assert!(!settings.parallel);
}

#[test]
fn given_global_and_local_config_when_load_then_local_wins() {
    let global_dir = TempDir::new().unwrap();
    let global_path = global_dir.path().join("htsr.toml");
    fs::write(
        &global_path,
        r#"
backend = "lsmr"
parallel = true

[bounded]
tol = 1e-8
"#,
    )
    .unwrap();
    let local_dir = TempDir::new().unwrap();
    fs::write(
        local_config_path(local_dir.path()),
        r#"
backend = "lsqr"
"#,
    )
    .unwrap();

    let settings =
        Settings::load_from(Some(&global_path), Some(local_dir.path())).expect("load settings");

    assert_eq!(settings.backend, Backend::Lsqr, "local overrides global");
    assert!(settings.parallel, "global value survives when local is silent");
    assert_eq!(settings.bounded.tol, 1e-8);
}

#[test]
fn given_missing_global_file_when_load_then_ignores_it() {
    let dir = TempDir::new().unwrap();
    let absent = dir.path().join("nope.toml");

    let settings = Settings::load_from(Some(&absent), None).expect("load settings");

    assert_eq!(settings.backend, Backend::Lsqr);
}

// ============================================================
// Errors
// ============================================================

#[test]
fn given_malformed_local_config_when_load_then_reports_config_error() {
    let dir = TempDir::new().unwrap();
    fs::write(local_config_path(dir.path()), "backend = [unclosed").unwrap();

    let err = Settings::load_from(None, Some(dir.path())).unwrap_err();

    assert!(matches!(err, ApplicationError::Config { .. }));
}

#[test]
fn given_unknown_backend_in_config_when_load_then_reports_domain_error() {
    let dir = TempDir::new().unwrap();
    fs::write(local_config_path(dir.path()), r#"backend = "qr""#).unwrap();

    let err = Settings::load_from(None, Some(dir.path())).unwrap_err();

    assert!(err.as_domain().is_some(), "got {err:?}");
}

// ============================================================
// Env overrides and derived views
// ============================================================

#[test]
fn given_env_var_when_load_then_overrides_nested_value() {
    let dir = TempDir::new().unwrap();
    fs::write(
        local_config_path(dir.path()),
        r#"
[bounded]
lsmr_max_iter = 3
"#,
    )
    .unwrap();
    std::env::set_var("HTSR_BOUNDED__LSMR_MAX_ITER", "7");

    let result = Settings::load_from(None, Some(dir.path()));
    std::env::remove_var("HTSR_BOUNDED__LSMR_MAX_ITER");

    let settings = result.expect("load settings");
    assert_eq!(settings.bounded.lsmr_max_iter, Some(7));
}

#[test]
fn given_settings_when_building_combination_options_then_carries_solver_config() {
    let dir = TempDir::new().unwrap();
    fs::write(
        local_config_path(dir.path()),
        r#"
backend = "lsmr"
parallel = true

[solver]
damp = 0.25
"#,
    )
    .unwrap();
    let settings = Settings::load_from(None, Some(dir.path())).expect("load settings");

    let options = settings.combination_options();

    assert_eq!(options.backend, Backend::Lsmr);
    assert!(options.parallel);
    assert_eq!(options.solver.damp, 0.25);
    assert!(options.weights.is_none());
    assert!(options.bounds.is_none());
}

#[test]
fn given_settings_when_rendering_toml_then_round_trips() {
    let settings = Settings::default();

    let rendered = settings.to_toml().expect("render");
    let parsed: Settings = toml::from_str(&rendered).expect("parse");

    assert_eq!(parsed.backend, settings.backend);
    assert_eq!(parsed.solver, settings.solver);
}

#[test]
fn given_template_when_parsing_then_is_valid_toml() {
    let template = Settings::template();

    let parsed: Settings = toml::from_str(&template).expect("template parses");

    assert_eq!(parsed.backend, Backend::Lsqr);
}
