use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use crate::telegram::utils::address_from_id;
use crate::units::Unit;

const CONFIG_PATHS: [&str; 2] = ["config/m2j.yaml", "m2j.yaml"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read the config on {0:?}")]
    NotFound(Vec<PathBuf>),
    #[error("Unable to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse config file: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Meter type {0} is not supported")]
    UnknownMeterType(String),
    #[error("Meter id {0} needs exactly 8 hex digits")]
    InvalidId(String),
    #[error("Key of meter {0} needs 32 hex digits")]
    InvalidKey(String),
}

fn meter_type_default() -> String { return "multical302".to_string() }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MeterConfig {
    pub name: String,
    #[serde(rename = "type", default = "meter_type_default")]
    pub meter_type: String,
    /// As printed on the meter
    pub id: String,
    /// Empty when the meter sends plain telegrams
    #[serde(default)]
    pub key: String,
}

impl MeterConfig {
    pub fn address(&self) -> Result<[u8; 4], ConfigError> {
        address_from_id(&self.id).ok_or_else(|| ConfigError::InvalidId(self.id.clone()))
    }

    pub fn key_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        if self.key.is_empty() {
            return Ok(None);
        }
        match hex::decode(&self.key) {
            Ok(k) if k.len() == 16 => Ok(Some(k)),
            _ => Err(ConfigError::InvalidKey(self.name.clone())),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Human,
    Fields,
    Json,
    Envs,
}

fn output_format_default() -> OutputFormat { return OutputFormat::Human }
fn output_separator_default() -> char { return ';' }
fn output_explain_default() -> bool { return false }
fn output_conversions_default() -> Vec<Unit> { return Vec::new(); }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct OutputConfig {
    #[serde(default="output_format_default")]
    pub format: OutputFormat,
    #[serde(default="output_separator_default")]
    pub separator: char,
    #[serde(default="output_explain_default")]
    pub explain: bool,
    /// Units to print in instead of kwh, m3 and kw, e.g. `[gj, l]`
    #[serde(default="output_conversions_default")]
    pub conversions: Vec<Unit>,
}

fn output_default() -> OutputConfig {
    return OutputConfig {
        format: output_format_default(),
        separator: output_separator_default(),
        explain: output_explain_default(),
        conversions: output_conversions_default(),
    }
}
fn meters_default() -> Vec<MeterConfig> { return Vec::new(); }
fn shells_default() -> Vec<String> { return Vec::new(); }
fn oneshot_default() -> bool { return false }
fn exitafter_default() -> u64 { return 0 }
fn logtelegrams_default() -> bool { return false }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default="meters_default")]
    pub meters: Vec<MeterConfig>,
    #[serde(default="output_default")]
    pub output: OutputConfig,
    /// Commands run through `sh -c` with the METER_* variables set, once per reading
    #[serde(default="shells_default")]
    pub shells: Vec<String>,
    /// Stop once every meter delivered a reading
    #[serde(default="oneshot_default")]
    pub oneshot: bool,
    /// Seconds until exit, 0 runs until the input ends
    #[serde(default="exitafter_default")]
    pub exitafter: u64,
    #[serde(default="logtelegrams_default")]
    pub logtelegrams: bool,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let c: Config = serde_yml::from_str(contents)?;
        for meter in &c.meters {
            meter.address()?;
            meter.key_bytes()?;
        }
        debug!("Parsed config with {} meters", c.meters.len());
        return Ok(c);
    }

    /// Read the given file, or the first of the default locations that exists
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let candidates: Vec<PathBuf> = match path {
            Some(p) => vec![p.to_path_buf()],
            None => CONFIG_PATHS.iter().map(PathBuf::from).collect(),
        };

        let found = candidates.iter().find(|p| p.exists());
        let file = match found {
            Some(f) => f,
            None => return Err(ConfigError::NotFound(candidates)),
        };

        info!("Loading config from {file:?}");
        let contents = fs::read_to_string(file)?;
        return Config::from_yaml(&contents);
    }
}
