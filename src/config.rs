//! Chiplet configuration: counts, PE/SA dimensions, buffer sizes, bandwidth.
//!
//! Loaded as JSON from a path given on the command line, or `Config::default()`
//! when no path is given. Validation happens once, at load time — nothing
//! downstream re-checks these fields.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// NoC latency oracle settings. Has no bearing on command-descriptor
/// semantics; only affects whether/how `TransferSchedule.latency` gets
/// stamped by the external BookSim client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub executable: Option<PathBuf>,
    pub deadline_ms: u64,
    pub enabled: bool,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            executable: None,
            deadline_ms: 30_000,
            enabled: true,
        }
    }
}

/// Immutable chiplet topology configuration.
///
/// All counts and dimensions are positive integers; buffer sizes are in
/// bytes. `Config::load` enforces this — by the time a `Config` reaches the
/// rest of the pipeline, these fields can be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub num_digital_chiplets: u32,
    pub num_rram_chiplets: u32,
    pub digital_pes_per_chiplet: u32,
    pub digital_pe_rows: u32,
    pub digital_pe_cols: u32,
    pub digital_spus_per_chiplet: u32,
    pub transfer_bandwidth_dr: u32,
    pub transfer_bandwidth_rd: u32,
    pub rram_tiles_per_dim: u32,
    pub rram_sas_per_tile_dim: u32,
    pub rram_sa_rows: u32,
    pub rram_sa_cols: u32,
    pub rram_cell_bits: u32,
    pub rram_dac_bits: u32,
    pub rram_adc_bits: u32,
    pub digital_activation_buffer: u32,
    pub digital_scratch_buffer: u32,
    pub rram_input_buffer: u32,
    pub rram_output_buffer: u32,

    pub oracle: OracleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_digital_chiplets: 4,
            num_rram_chiplets: 4,
            digital_pes_per_chiplet: 16,
            digital_pe_rows: 256,
            digital_pe_cols: 256,
            digital_spus_per_chiplet: 4,
            transfer_bandwidth_dr: 64,
            transfer_bandwidth_rd: 64,
            rram_tiles_per_dim: 4,
            rram_sas_per_tile_dim: 4,
            rram_sa_rows: 128,
            rram_sa_cols: 128,
            rram_cell_bits: 2,
            rram_dac_bits: 4,
            rram_adc_bits: 8,
            digital_activation_buffer: 65536,
            digital_scratch_buffer: 65536,
            rram_input_buffer: 4096,
            rram_output_buffer: 4096,
            oracle: OracleConfig::default(),
        }
    }
}

/// A single `(field, value)` check; non-positive fails validation.
macro_rules! require_positive {
    ($cfg:expr, $errs:expr, $($field:ident),+ $(,)?) => {
        $(
            if $cfg.$field == 0 {
                $errs.push(stringify!($field));
            }
        )+
    };
}

impl Config {
    /// Load config from a JSON file, or fall back to defaults when `path`
    /// is `None`. A given-but-missing path is a hard `ConfigError::Io` — the
    /// "fall back silently" behaviour only applies to the no-path case.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p,
            None => {
                log::info!("no config path given, using built-in defaults");
                let cfg = Self::default();
                cfg.validate()?;
                return Ok(cfg);
            }
        };

        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let cfg: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        cfg.validate()?;
        log::info!("loaded config from {}", path.display());
        Ok(cfg)
    }

    /// Every numeric topology field must be positive, and the oracle
    /// executable (if configured and enabled) must exist.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut bad_fields: Vec<&'static str> = Vec::new();
        require_positive!(
            self,
            bad_fields,
            num_digital_chiplets,
            digital_pes_per_chiplet,
            digital_pe_rows,
            digital_pe_cols,
            digital_spus_per_chiplet,
            transfer_bandwidth_dr,
            transfer_bandwidth_rd,
            rram_tiles_per_dim,
            rram_sas_per_tile_dim,
            rram_sa_rows,
            rram_sa_cols,
            rram_cell_bits,
            rram_dac_bits,
            rram_adc_bits,
            digital_activation_buffer,
            digital_scratch_buffer,
            rram_input_buffer,
            rram_output_buffer,
        );
        // num_rram_chiplets == 0 is a supported configuration (Scenario F);
        // it is intentionally excluded from this check.

        if let Some(field) = bad_fields.first() {
            return Err(ConfigError::Invalid {
                field,
                reason: "must be a positive integer".to_string(),
            });
        }

        if self.oracle.enabled {
            if let Some(exe) = &self.oracle.executable {
                if !exe.exists() {
                    return Err(ConfigError::Invalid {
                        field: "oracle.executable",
                        reason: format!("{} does not exist", exe.display()),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_rram_chiplets_is_valid() {
        let mut cfg = Config::default();
        cfg.num_rram_chiplets = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_digital_chiplets_is_invalid() {
        let mut cfg = Config::default();
        cfg.num_digital_chiplets = 0;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "num_digital_chiplets", .. }
        ));
    }

    #[test]
    fn missing_path_is_io_error() {
        let err = Config::load(Some(Path::new("/nonexistent/chiplet-config.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn no_path_falls_back_to_defaults() {
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
