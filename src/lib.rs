// SPDX-License-Identifier: MIT

use crate::training::TrainingStep;

pub mod config;
pub mod device;
pub mod events;
pub mod firmware;
pub mod hal;
pub mod io;
pub mod link;
pub mod minion;
pub mod regs;
pub mod sim;
pub mod timeout;
pub mod training;
pub mod vbios;

pub use config::DeviceConfig;
pub use device::Device;
pub use hal::Chip;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO Error: `{0}`")]
    IOError(#[from] std::io::Error),
    #[error("Firmware file has invalid format: `{0}`")]
    InvalidFormat(String),
    #[error("Binary format parsing Error: `{0}`")]
    BinReadError(#[from] binread::Error),
    #[error("Configuration parsing Error: `{0}`")]
    Json(#[from] serde_json::Error),
    #[error("MINION {minion} is not initialized")]
    NotInitialized { minion: u32 },
    #[error("Timeout waiting for {what}, last read 0x{last:08x}")]
    Timeout { what: String, last: u32 },
    #[error("Hardware fault on link {link}: {what} (code 0x{code:x}, subcode 0x{subcode:x})")]
    HardwareFault {
        link: u32,
        what: String,
        code: u32,
        subcode: u32,
    },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Not supported: {0}")]
    NotSupported(&'static str),
    #[error("Link {0} is not valid on this device")]
    InvalidLink(u32),
    #[error("Link {link} training failed at {step}: {source}")]
    Training {
        link: u32,
        step: TrainingStep,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// The error that caused a training phase to fail, or the error itself.
    pub fn root(&self) -> &Error {
        match self {
            Error::Training { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout { .. })
    }

    pub fn is_not_initialized(&self) -> bool {
        matches!(self.root(), Error::NotInitialized { .. })
    }
}
