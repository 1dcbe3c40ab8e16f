//! Serial link characteristics used to derive automatic timeouts

use crate::error::{Result, SensorVisError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parity mode of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
    /// Parity bit always set
    Mark,
    /// Parity bit always cleared
    Space,
}

impl Parity {
    /// Number of parity bits per character
    pub fn bits(&self) -> u32 {
        match self {
            Parity::None => 0,
            _ => 1,
        }
    }
}

/// Character framing of a byte-oriented link
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Line rate in bits per second
    pub baud_rate: u32,
    /// Data bits per character (5-8)
    pub data_bits: u8,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits per character (1, 1.5 or 2)
    pub stop_bits: f32,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1.0,
        }
    }
}

impl LinkSettings {
    /// Check the settings describe a usable link
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(SensorVisError::Config("baud rate must be positive".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(SensorVisError::Config(format!(
                "data bits must be between 5 and 8, got {}",
                self.data_bits
            )));
        }
        if ![1.0, 1.5, 2.0].contains(&self.stop_bits) {
            return Err(SensorVisError::Config(format!(
                "stop bits must be 1, 1.5 or 2, got {}",
                self.stop_bits
            )));
        }
        Ok(())
    }

    /// Time needed to transmit one character on this link
    ///
    /// Counts data, parity and stop bits; the start bit is not included.
    /// Settings that fail [`LinkSettings::validate`] are a configuration error.
    pub fn byte_time(&self) -> Result<Duration> {
        self.validate()?;
        let bits = self.data_bits as f64 + self.parity.bits() as f64 + self.stop_bits as f64;
        Ok(Duration::from_secs_f64(bits / self.baud_rate as f64))
    }
}
