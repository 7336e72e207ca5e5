use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, ErrorKind, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};

use crate::{Gateway, Options, SerialPort};

/// Read timeout, keeps `Gateway::poll` from stalling on an idle line
const READ_TIMEOUT: Duration = Duration::from_millis(10);

fn io_kind(e: SerialError) -> IoErrorKind {
    match e.kind() {
        ErrorKind::Io(k) => k,
        _ => IoErrorKind::Other,
    }
}

/// The PIC reset pin is wired to DTR
impl SerialPort<IoErrorKind> for Serial {
    fn set_reset(&mut self, asserted: bool) -> Result<(), IoErrorKind> {
        self.0.set_dtr(asserted).map_err(io_kind)
    }
}

impl Gateway<Serial, Delay, IoErrorKind> {
    /// Open the gateway on a linux serial port
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, SerialError> {
        // Open port
        let mut port = Serial::open(port.as_ref())?;

        // The PIC talks 8N1 without flow control
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityNone);

        port.0.write_settings(&settings)?;
        port.0.set_timeout(READ_TIMEOUT)?;

        Ok(Self::new(port, Delay {}, options))
    }
}
