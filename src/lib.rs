//! OpenTherm Gateway host.
//!
//! Talks to the PIC of an OpenTherm gateway over a serial port: decodes the
//! OpenTherm trace it relays into a per-direction state store, queues
//! commands for it, and reprograms it through its serial bootloader.

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod banner;
pub mod classifier;
pub mod dictionary;
pub mod dispatcher;
pub mod event;
pub mod frame;
pub mod gateway;
pub mod hex;
pub mod programmer;
pub mod settings;
pub mod state;
pub mod transfer;
pub mod value;

pub use dispatcher::{CommandError, Handle};
pub use event::{Event, Record, Subscriber};
pub use gateway::Gateway;
pub use programmer::{Report, UpgradeError};

/// Serial connection to the PIC
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {
    /// Drive the line wired to the PIC reset pin
    fn set_reset(&mut self, asserted: bool) -> Result<(), E>;
}

/// Failure of the serial port itself. Command and upgrade failures are
/// reported through their own error types.
#[derive(Clone, PartialEq, Debug)]
pub enum Error<SerialError> {
    Serial(SerialError),
}

impl<SerialError> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Time to wait for the PIC to echo a command
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1000"))]
    pub command_timeout_ms: u32,

    /// Attempts per command before it fails
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "3"))]
    pub command_retries: u8,

    /// Silence after which the boiler or thermostat is considered gone
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "30"))]
    pub presence_timeout_s: u32,

    /// Quiet period before changed settings are flushed
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "2000"))]
    pub settings_quiet_ms: u32,

    /// Directory holding per-processor firmware images
    #[cfg_attr(
        feature = "structopt",
        structopt(long, default_value = "/", parse(from_os_str))
    )]
    pub firmware_dir: std::path::PathBuf,

    /// Settings transfer table, relative to the firmware directory
    #[cfg_attr(
        feature = "structopt",
        structopt(long, default_value = "transfer.dat", parse(from_os_str))
    )]
    pub transfer_file: std::path::PathBuf,

    /// Length of the PIC reset pulse
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub reset_pulse_ms: u32,

    /// Prefix for published topics
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "otgw"))]
    pub topic_prefix: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            command_timeout_ms: 1000,
            command_retries: dispatcher::DEFAULT_RETRIES,
            presence_timeout_s: 30,
            settings_quiet_ms: 2000,
            firmware_dir: "/".into(),
            transfer_file: "transfer.dat".into(),
            reset_pulse_ms: 100,
            topic_prefix: "otgw".to_string(),
        }
    }
}
