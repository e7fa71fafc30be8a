//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/htsr/htsr.toml`
//! 3. Local config: `<dir>/.htsr.toml`
//! 4. Environment variables: `HTSR_*` prefix (nested keys with `__`, e.g. `HTSR_SOLVER__ATOL`)

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::{ApplicationError, CombinationOptions};
use crate::solver::{Backend, BoundedOptions, SolverOptions};

/// Tolerances of the unconstrained least-squares backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    pub damp: f64,
    pub atol: f64,
    pub btol: f64,
    pub conlim: f64,
    /// Backend default when unset
    pub max_iter: Option<usize>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let defaults = SolverOptions::default();
        Self {
            damp: defaults.damp,
            atol: defaults.atol,
            btol: defaults.btol,
            conlim: defaults.conlim,
            max_iter: defaults.max_iter,
        }
    }
}

/// Settings of the bounded refinement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoundedConfig {
    pub tol: f64,
    pub max_iter: usize,
    pub lsmr_tol: Option<f64>,
    pub lsmr_max_iter: Option<usize>,
}

impl Default for BoundedConfig {
    fn default() -> Self {
        let defaults = BoundedOptions::default();
        Self {
            tol: defaults.tol,
            max_iter: defaults.max_iter,
            lsmr_tol: defaults.lsmr_tol,
            lsmr_max_iter: defaults.lsmr_max_iter,
        }
    }
}

/// Raw solver section for intermediate parsing (`None` = not specified, inherit).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSolverConfig {
    pub damp: Option<f64>,
    pub atol: Option<f64>,
    pub btol: Option<f64>,
    pub conlim: Option<f64>,
    pub max_iter: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawBoundedConfig {
    pub tol: Option<f64>,
    pub max_iter: Option<usize>,
    pub lsmr_tol: Option<f64>,
    pub lsmr_max_iter: Option<usize>,
}

/// Raw settings for intermediate parsing.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub backend: Option<String>,
    pub parallel: Option<bool>,
    pub solver: RawSolverConfig,
    pub bounded: RawBoundedConfig,
}

impl SolverConfig {
    fn merge(&self, overlay: &RawSolverConfig) -> Self {
        Self {
            damp: overlay.damp.unwrap_or(self.damp),
            atol: overlay.atol.unwrap_or(self.atol),
            btol: overlay.btol.unwrap_or(self.btol),
            conlim: overlay.conlim.unwrap_or(self.conlim),
            max_iter: overlay.max_iter.or(self.max_iter),
        }
    }

    pub fn to_options(&self) -> SolverOptions {
        SolverOptions {
            damp: self.damp,
            atol: self.atol,
            btol: self.btol,
            conlim: self.conlim,
            max_iter: self.max_iter,
        }
    }
}

impl BoundedConfig {
    fn merge(&self, overlay: &RawBoundedConfig) -> Self {
        Self {
            tol: overlay.tol.unwrap_or(self.tol),
            max_iter: overlay.max_iter.unwrap_or(self.max_iter),
            lsmr_tol: overlay.lsmr_tol.or(self.lsmr_tol),
            lsmr_max_iter: overlay.lsmr_max_iter.or(self.lsmr_max_iter),
        }
    }

    pub fn to_options(&self) -> BoundedOptions {
        BoundedOptions {
            tol: self.tol,
            max_iter: self.max_iter,
            lsmr_tol: self.lsmr_tol,
            lsmr_max_iter: self.lsmr_max_iter,
        }
    }
}

/// Unified configuration for htsr.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Least-squares backend for optimal combination
    pub backend: Backend,
    /// Solve time steps in parallel
    pub parallel: bool,
    pub solver: SolverConfig,
    pub bounded: BoundedConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: Backend::Lsqr,
            parallel: false,
            solver: SolverConfig::default(),
            bounded: BoundedConfig::default(),
        }
    }
}

/// Get the XDG config directory for htsr.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "htsr").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("htsr.toml"))
}

/// Get the path to the local config file in a project directory.
pub fn local_config_path(dir: &Path) -> PathBuf {
    dir.join(".htsr.toml")
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    /// Overlay wins where it specifies a value.
    fn merge_with(&self, overlay: &RawSettings) -> Result<Self, ApplicationError> {
        let backend = match &overlay.backend {
            Some(name) => name.parse::<Backend>()?,
            None => self.backend,
        };
        Ok(Self {
            backend,
            parallel: overlay.parallel.unwrap_or(self.parallel),
            solver: self.solver.merge(&overlay.solver),
            bounded: self.bounded.merge(&overlay.bounded),
        })
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `local_dir` - Optional directory holding a `.htsr.toml`
    pub fn load(local_dir: Option<&Path>) -> Result<Self, ApplicationError> {
        Self::load_from(global_config_path().as_deref(), local_dir)
    }

    /// Like [`Settings::load`] with an explicit global config file.
    pub fn load_from(global: Option<&Path>, local_dir: Option<&Path>) -> Result<Self, ApplicationError> {
        let mut current = Self::default();

        if let Some(global_path) = global {
            if global_path.exists() {
                let raw = load_raw_settings(global_path)?;
                current = current.merge_with(&raw)?;
            }
        }

        if let Some(dir) = local_dir {
            let local_path = local_config_path(dir);
            if local_path.exists() {
                let raw = load_raw_settings(&local_path)?;
                current = current.merge_with(&raw)?;
            }
        }

        Self::apply_env_overrides(current)
    }

    /// Apply HTSR_* environment variables as explicit overrides.
    fn apply_env_overrides(settings: Self) -> Result<Self, ApplicationError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("HTSR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_err)?;

        let raw = RawSettings {
            backend: config.get_string("backend").ok(),
            parallel: config.get_bool("parallel").ok(),
            solver: RawSolverConfig {
                damp: config.get_float("solver.damp").ok(),
                atol: config.get_float("solver.atol").ok(),
                btol: config.get_float("solver.btol").ok(),
                conlim: config.get_float("solver.conlim").ok(),
                max_iter: get_usize(&config, "solver.max_iter"),
            },
            bounded: RawBoundedConfig {
                tol: config.get_float("bounded.tol").ok(),
                max_iter: get_usize(&config, "bounded.max_iter"),
                lsmr_tol: config.get_float("bounded.lsmr_tol").ok(),
                lsmr_max_iter: get_usize(&config, "bounded.lsmr_max_iter"),
            },
        };
        settings.merge_with(&raw)
    }

    /// Base combination options; weights and bounds are per call.
    pub fn combination_options(&self) -> CombinationOptions {
        CombinationOptions::default()
            .with_backend(self.backend)
            .with_parallel(self.parallel)
            .with_solver(self.solver.to_options())
            .with_bounded(self.bounded.to_options())
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# htsr configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/htsr/htsr.toml
#   Local:  <dir>/.htsr.toml
#   Env:    HTSR_* environment variables, e.g. HTSR_BACKEND=lsmr, HTSR_SOLVER__ATOL=1e-8

# Least-squares backend for optimal combination: "lsqr" or "lsmr"
# backend = "lsqr"

# Solve time steps on a thread pool
# parallel = false

[solver]
# damp = 0.0
# atol = 1e-6
# btol = 1e-6
# conlim = 1e8
# max_iter = 100

[bounded]
# tol = 1e-10
# max_iter = 100
# lsmr_tol = 1e-4
# lsmr_max_iter = 50
"#
        .to_string()
    }
}

fn get_usize(config: &Config, key: &str) -> Option<usize> {
    config
        .get_int(key)
        .ok()
        .and_then(|v| usize::try_from(v).ok())
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_defaults_when_converting_then_matches_solver_defaults() {
        let settings = Settings::default();

        assert_eq!(settings.solver.to_options(), SolverOptions::default());
        assert_eq!(settings.bounded.to_options(), BoundedOptions::default());
        assert_eq!(settings.backend, Backend::Lsqr);
    }

    #[test]
    fn given_partial_overlay_when_merging_then_keeps_unspecified_values() {
        let raw: RawSettings = toml::from_str(
            r#"
            backend = "lsmr"
            [solver]
            atol = 1e-9
            "#,
        )
        .unwrap();

        let merged = Settings::default().merge_with(&raw).unwrap();

        assert_eq!(merged.backend, Backend::Lsmr);
        assert_eq!(merged.solver.atol, 1e-9);
        assert_eq!(merged.solver.btol, 1e-6);
        assert!(!merged.parallel);
    }

    #[test]
    fn given_unknown_backend_in_overlay_when_merging_then_errors() {
        let raw: RawSettings = toml::from_str(r#"backend = "qr""#).unwrap();

        let result = Settings::default().merge_with(&raw);

        assert!(matches!(result, Err(ApplicationError::Domain(_))));
    }

    #[test]
    fn given_settings_when_rendering_toml_then_round_trips() {
        let settings = Settings::default();

        let text = settings.to_toml().unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();

        assert_eq!(parsed, settings);
    }
}
