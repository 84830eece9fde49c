//! vmgrid.toml configuration parser.
//!
//! All sections are optional; accessors resolve defaults so the daemon
//! runs with no config file at all.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_LOW_WATERMARK: f64 = 0.75;
const DEFAULT_HIGH_WATERMARK: f64 = 0.80;
const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_INPUT: &str = "input.json";
const DEFAULT_OUTPUT: &str = "output.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridConfig {
    pub band: Option<BandConfig>,
    pub driver: Option<DriverConfig>,
    pub synth: Option<SynthConfig>,
}

/// Target utilization band the engine keeps hosts inside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandConfig {
    /// Hosts below this fraction are reported as underutilized.
    pub low: Option<f64>,
    /// Placements and migrations never push a host above this fraction.
    pub high: Option<f64>,
}

/// Snapshot polling settings for the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub interval_secs: Option<u64>,
}

/// Ranges for the synthetic VM generator (inclusive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthConfig {
    pub cpu_min: Option<u32>,
    pub cpu_max: Option<u32>,
    pub ram_min: Option<u64>,
    pub ram_max: Option<u64>,
}

impl GridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn low_watermark(&self) -> f64 {
        self.band
            .as_ref()
            .and_then(|b| b.low)
            .unwrap_or(DEFAULT_LOW_WATERMARK)
    }

    pub fn high_watermark(&self) -> f64 {
        self.band
            .as_ref()
            .and_then(|b| b.high)
            .unwrap_or(DEFAULT_HIGH_WATERMARK)
    }

    pub fn input_path(&self) -> PathBuf {
        self.driver
            .as_ref()
            .and_then(|d| d.input.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT))
    }

    pub fn output_path(&self) -> PathBuf {
        self.driver
            .as_ref()
            .and_then(|d| d.output.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
    }

    pub fn interval_secs(&self) -> u64 {
        self.driver
            .as_ref()
            .and_then(|d| d.interval_secs)
            .unwrap_or(DEFAULT_INTERVAL_SECS)
    }

    pub fn synth_cpu_range(&self) -> (u32, u32) {
        let s = self.synth.as_ref();
        (
            s.and_then(|s| s.cpu_min).unwrap_or(1),
            s.and_then(|s| s.cpu_max).unwrap_or(3),
        )
    }

    pub fn synth_ram_range(&self) -> (u64, u64) {
        let s = self.synth.as_ref();
        (
            s.and_then(|s| s.ram_min).unwrap_or(2),
            s.and_then(|s| s.ram_max).unwrap_or(5),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = GridConfig::default();
        assert_eq!(config.low_watermark(), 0.75);
        assert_eq!(config.high_watermark(), 0.80);
        assert_eq!(config.interval_secs(), 5);
        assert_eq!(config.input_path(), PathBuf::from("input.json"));
        assert_eq!(config.output_path(), PathBuf::from("output.json"));
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[band]
low = 0.70
high = 0.85

[driver]
input = "snapshots/in.json"
output = "snapshots/out.json"
interval_secs = 30

[synth]
cpu_min = 2
cpu_max = 8
"#;
        let config: GridConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.low_watermark(), 0.70);
        assert_eq!(config.high_watermark(), 0.85);
        assert_eq!(config.interval_secs(), 30);
        assert_eq!(config.synth_cpu_range(), (2, 8));
        // Unset synth fields keep their defaults.
        assert_eq!(config.synth_ram_range(), (2, 5));
    }

    #[test]
    fn parse_partial_section() {
        let toml_str = r#"
[band]
high = 0.82
"#;
        let config: GridConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.low_watermark(), 0.75);
        assert_eq!(config.high_watermark(), 0.82);
    }
}
