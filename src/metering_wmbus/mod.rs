use std::sync::Arc;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc::Receiver;
use crate::telegram::{utils, FrameError, Telegram};

pub mod structs;
pub mod field_extractor;
pub mod frame_decoder;
pub mod meter_definitions;
pub mod decryption;
pub mod store;
pub mod device;

use decryption::CipherError;
use field_extractor::FieldError;
use frame_decoder::DecodeError;

pub use device::{channel_subscriber, Commit, MeterDevice, MeterUpdate, SubscriptionId};

/// Everything that can happen to a single telegram, none of it fatal
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelegramError {
    #[error("Telegram is not addressed to this meter")]
    NotAddressedToMe,
    #[error("Telegram is encrypted but no key supplied")]
    MissingKey,
    #[error("Decryption failed: {0}")]
    DecryptionFailed(CipherError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    OutOfBounds(FieldError),
    #[error("Telegram is from manufacturer {0}")]
    UnexpectedManufacturer(String),
    #[error("Telegram is from a device of media {0:02x}")]
    UnexpectedMedia(u8),
}

/// Simulation files carry telegrams as `telegram=|<hex>|`
const SIMULATION_PREFIX: &str = "telegram=";

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Non hex string received")]
    NotHex(#[from] hex::FromHexError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Turn one line of input into a telegram
pub fn parse_input_line(line: &str) -> Result<Telegram, InputError> {
    let line = line.trim();
    let (hex_part, simulated) = match line.strip_prefix(SIMULATION_PREFIX) {
        Some(rest) => (rest.replace('|', ""), true),
        None => (line.to_string(), false),
    };

    let raw = hex::decode(hex_part)?;
    let mut t = Telegram::from_frame(&raw)?;
    t.simulated = simulated;
    return Ok(t);
}

/// Simulation form of an input line, hex kept as received
pub fn telegram_log_line(line: &str) -> String {
    let line = line.trim();
    if line.starts_with(SIMULATION_PREFIX) {
        return line.to_string();
    }
    return format!("{SIMULATION_PREFIX}|{line}|");
}

/// Hands every received telegram to all configured meters
pub struct MeterManager {
    devices: Vec<Arc<MeterDevice>>,
    explain: bool,
    log_telegrams: bool,
}

impl MeterManager {
    pub fn new(devices: Vec<Arc<MeterDevice>>, explain: bool) -> Self {
        return MeterManager { devices, explain, log_telegrams: false };
    }

    /// Log every received telegram in the form `parse_input_line` reads back
    pub fn with_telegram_log(mut self, log_telegrams: bool) -> Self {
        self.log_telegrams = log_telegrams;
        return self;
    }

    pub fn devices(&self) -> &[Arc<MeterDevice>] {
        &self.devices
    }

    pub async fn start_thread(&self, mut receiver: Receiver<String>) {
        info!("Starting wM-Bus thread for {} meters", self.devices.len());

        while let Some(line) = receiver.recv().await {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            self.handle_line(&line);
        }

        info!("Telegram input closed");
    }

    /// Returns the number of meters that committed the telegram
    pub fn handle_line(&self, line: &str) -> usize {
        let telegram = match parse_input_line(line) {
            Ok(t) => t,
            Err(e) => {
                error!("Telegram can not be parsed: {e}");
                return 0;
            }
        };

        if self.log_telegrams {
            info!("{}", telegram_log_line(line));
        }

        let mut committed = 0;
        for device in &self.devices {
            let mut t = telegram.clone();
            let result = device.handle_telegram(&mut t);

            if self.explain && !matches!(result, Err(TelegramError::NotAddressedToMe)) {
                let family = device.family();
                let prefix = format!("({})", family.meter_type);
                info!("{prefix} {} {} {} {} v{:02x} link mode {}\n{}",
                      device.name(), t.id, utils::manufacturer_flag(t.manufacturer),
                      utils::get_device_medium(t.device_type), t.version,
                      family.link_mode, t.explain_parse(&prefix, 0));
            }

            match result {
                Ok(commit) => {
                    for w in &commit.warnings {
                        warn!("{} {}: {w}", device.name(), device.id());
                    }
                    committed += 1;
                }
                Err(TelegramError::NotAddressedToMe) => {
                    debug!("{} ignores telegram from {}", device.name(), t.id);
                }
                Err(e) => {
                    warn!("{} {} dropped telegram: {e}", device.name(), device.id());
                }
            }
        }

        if committed == 0 {
            debug!("No configured meter took telegram from {}", telegram.id);
        }
        return committed;
    }
}
