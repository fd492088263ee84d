use std::collections::{BTreeMap, HashSet};
use std::process::ExitStatus;
use chrono::{DateTime, Local, Utc};
use log::{debug, error, warn};
use serde::Serialize;
use serde_json::value::RawValue;
use thiserror::Error;
use tokio::process::Command;
use crate::config::{OutputConfig, OutputFormat};
use crate::metering_wmbus::MeterUpdate;
use crate::units::{can_convert, Unit};

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Value can not be written as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Unit(#[from] crate::units::UnitError),
    #[error("Unable to run shell \"{0}\": {1}")]
    Shell(String, std::io::Error),
}

/// Units readings are printed in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayUnits {
    pub energy: Unit,
    pub volume: Unit,
    pub power: Unit,
}

impl Default for DisplayUnits {
    fn default() -> Self {
        DisplayUnits { energy: Unit::KWH, volume: Unit::M3, power: Unit::KW }
    }
}

impl DisplayUnits {
    /// The first conversion of each quantity wins, the rest keep their base unit
    pub fn from_conversions(conversions: &[Unit]) -> Self {
        let base = DisplayUnits::default();
        let pick = |b: Unit| conversions.iter().copied().find(|u| can_convert(b, *u)).unwrap_or(b);
        return DisplayUnits {
            energy: pick(base.energy),
            volume: pick(base.volume),
            power: pick(base.power),
        };
    }
}

/* Values rendered the same way printf("%f") does */
fn fixed(v: f64) -> String {
    return format!("{v:.6}");
}

/* printf("% 3.3f"): a blank where the minus sign would go */
fn blank_signed(v: f64) -> String {
    if v.is_sign_negative() {
        return format!("{v:3.3}");
    }
    return format!(" {v:.3}");
}

/* Power has always been labelled kwh in the human line */
fn power_suffix(u: Unit) -> &'static str {
    if u == Unit::KW {
        return "kwh";
    }
    return u.lower_case_name();
}

fn update_time(update: &MeterUpdate) -> DateTime<Utc> {
    return update.snapshot.last_update.unwrap_or_default();
}

fn timestamp_human(update: &MeterUpdate) -> String {
    return update_time(update).with_timezone(&Local).format("%Y-%m-%d %H:%M.%S").to_string();
}

fn timestamp_robot(update: &MeterUpdate) -> String {
    return update_time(update).format("%Y-%m-%dT%H:%M:%SZ").to_string();
}

struct Values {
    energy: f64,
    volume: f64,
    power: f64,
}

fn values(update: &MeterUpdate, units: &DisplayUnits) -> Result<Values, OutputError> {
    let s = &update.snapshot;
    return Ok(Values {
        energy: s.total_energy_consumption(units.energy)?,
        volume: s.total_volume(units.volume)?,
        power: s.current_power_consumption(units.power)?,
    });
}

/* Extra keys like total_gj for every quantity printed in a non base unit */
fn converted(update: &MeterUpdate, units: &DisplayUnits) -> Result<Vec<(String, f64)>, OutputError> {
    let base = DisplayUnits::default();
    let v = values(update, units)?;
    let mut extra = Vec::new();
    if units.energy != base.energy {
        extra.push((format!("total_{}", units.energy.lower_case_name()), v.energy));
    }
    if units.volume != base.volume {
        extra.push((format!("total_volume_{}", units.volume.lower_case_name()), v.volume));
    }
    if units.power != base.power {
        extra.push((format!("current_{}", units.power.lower_case_name()), v.power));
    }
    return Ok(extra);
}

pub fn render_human(update: &MeterUpdate, units: &DisplayUnits) -> Result<String, OutputError> {
    let v = values(update, units)?;
    return Ok(format!("{}\t{}\t{} {}\t{} {}\t{} {}\t{}",
        update.meter_name,
        update.id,
        blank_signed(v.energy), units.energy.lower_case_name(),
        blank_signed(v.volume), units.volume.lower_case_name(),
        blank_signed(v.power), power_suffix(units.power),
        timestamp_human(update)));
}

pub fn render_fields(update: &MeterUpdate, separator: char, units: &DisplayUnits) -> Result<String, OutputError> {
    let v = values(update, units)?;
    let parts = [
        update.meter_name.clone(),
        update.id.clone(),
        fixed(v.energy),
        fixed(v.volume),
        fixed(v.power),
        timestamp_robot(update),
    ];
    return Ok(parts.join(&separator.to_string()));
}

#[derive(Serialize)]
struct JsonReading<'a> {
    media: &'a str,
    meter: &'a str,
    name: &'a str,
    id: &'a str,
    total_kwh: Box<RawValue>,
    total_volume_m3: Box<RawValue>,
    /* Historically emitted as a string */
    current_kw: String,
    timestamp: String,
    #[serde(flatten)]
    converted: BTreeMap<String, Box<RawValue>>,
}

/// The fixed keys always carry kwh, m3 and kw, conversions add their own keys
pub fn render_json(update: &MeterUpdate, units: &DisplayUnits) -> Result<String, OutputError> {
    let v = values(update, &DisplayUnits::default())?;

    let mut extra = BTreeMap::new();
    for (key, value) in converted(update, units)? {
        extra.insert(key, RawValue::from_string(fixed(value))?);
    }

    let reading = JsonReading {
        media: &update.media,
        meter: &update.meter_type,
        name: &update.meter_name,
        id: &update.id,
        total_kwh: RawValue::from_string(fixed(v.energy))?,
        total_volume_m3: RawValue::from_string(fixed(v.volume))?,
        current_kw: fixed(v.power),
        timestamp: timestamp_robot(update),
        converted: extra,
    };
    return Ok(serde_json::to_string(&reading)?);
}

pub fn render_envs(update: &MeterUpdate, units: &DisplayUnits) -> Result<Vec<String>, OutputError> {
    let v = values(update, &DisplayUnits::default())?;
    let json = render_json(update, units)?;
    let mut envs = vec![
        format!("METER_JSON={json}"),
        format!("METER_TYPE={}", update.meter_type),
        format!("METER_ID={}", update.id),
        format!("METER_TOTAL_KWH={}", fixed(v.energy)),
        format!("METER_TOTAL_VOLUME_M3={}", fixed(v.volume)),
        format!("METER_CURRENT_KW={}", fixed(v.power)),
        format!("METER_TIMESTAMP={}", timestamp_robot(update)),
    ];
    for (key, value) in converted(update, units)? {
        envs.push(format!("METER_{}={}", key.to_uppercase(), fixed(value)));
    }
    return Ok(envs);
}

/// Lines to print for one update in the configured format
pub fn render(update: &MeterUpdate, config: &OutputConfig) -> Result<Vec<String>, OutputError> {
    let units = DisplayUnits::from_conversions(&config.conversions);
    match config.format {
        OutputFormat::Human => Ok(vec![render_human(update, &units)?]),
        OutputFormat::Fields => Ok(vec![render_fields(update, config.separator, &units)?]),
        OutputFormat::Json => Ok(vec![render_json(update, &units)?]),
        OutputFormat::Envs => render_envs(update, &units),
    }
}

/// Run every shell command once with the METER_* variables of the update set
pub async fn run_shells(update: &MeterUpdate, shells: &[String], units: &DisplayUnits) -> Result<Vec<ExitStatus>, OutputError> {
    let envs = render_envs(update, units)?;
    let mut statuses = Vec::new();

    for shell in shells {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(shell);
        for env in &envs {
            if let Some((key, value)) = env.split_once('=') {
                cmd.env(key, value);
            }
        }

        debug!("Running \"{shell}\" for {}", update.meter_name);
        let status = cmd.status().await.map_err(|e| OutputError::Shell(shell.clone(), e))?;
        if !status.success() {
            warn!("Shell \"{shell}\" for {} ended with {status}", update.meter_name);
        }
        statuses.push(status);
    }
    return Ok(statuses);
}

/// Prints every update in the configured format and runs the shells for it
pub struct Printer {
    output: OutputConfig,
    units: DisplayUnits,
    shells: Vec<String>,
    /* Meters a oneshot run still waits for */
    waiting_for: Option<HashSet<String>>,
}

impl Printer {
    pub fn new(output: OutputConfig, shells: Vec<String>) -> Self {
        let units = DisplayUnits::from_conversions(&output.conversions);
        return Printer { output, units, shells, waiting_for: None };
    }

    pub fn oneshot(mut self, meters: Vec<String>) -> Self {
        self.waiting_for = Some(meters.into_iter().collect());
        return self;
    }

    /// Returns true once every meter of a oneshot run was printed
    pub async fn print(&mut self, update: &MeterUpdate) -> bool {
        match render(update, &self.output) {
            Ok(lines) => {
                for line in lines {
                    println!("{line}");
                }
            }
            Err(e) => error!("Unable to print {}: {e}", update.meter_name),
        }

        if !self.shells.is_empty() {
            if let Err(e) = run_shells(update, &self.shells, &self.units).await {
                error!("{e}");
            }
        }

        return match &mut self.waiting_for {
            Some(waiting) => {
                waiting.remove(&update.meter_name);
                waiting.is_empty()
            }
            None => false,
        };
    }
}
