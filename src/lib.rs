//! Decoder for Kamstrup Multical 302 wM-Bus telegrams
//!
//! Raw C1 frames are framed into telegrams, decrypted when needed and decoded
//! against the frame layouts of the configured meter family. Every committed
//! reading is handed to the subscribers of the meter.

pub mod config;
pub mod units;
pub mod telegram;
pub mod metering_wmbus;
pub mod output;

// Re-export common types for easier access
pub use config::{Config, ConfigError, MeterConfig, OutputConfig, OutputFormat};
pub use telegram::Telegram;
pub use units::Unit;
pub use metering_wmbus::{channel_subscriber, MeterDevice, MeterManager, MeterUpdate};
