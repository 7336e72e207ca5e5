//! Framing used by the PIC self-programming bootloader.
//!
//! Every message is wrapped in `STX ... ETX`. Any payload byte equal to one
//! of the three control characters is preceded by `DLE`. The last payload
//! byte is a checksum chosen so that all payload bytes sum to zero.

/// Start of packet
pub const STX: u8 = 0x0F;
/// End of packet
pub const ETX: u8 = 0x04;
/// Escapes the next byte
pub const DLE: u8 = 0x05;

/// Longest packet the bootloader emits (READPROG of a full row)
pub const MAX_PACKET: usize = 80;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Fetch the bootloader version and protected code range
    Version = 0x00,

    /// Read up to 32 words of program memory
    ReadProg = 0x01,

    /// Write a block of program memory
    WriteProg = 0x02,

    /// Erase one row of program memory
    EraseProg = 0x03,

    /// Read up to 64 bytes of data EEPROM
    ReadData = 0x04,

    /// Write up to 64 bytes of data EEPROM
    WriteData = 0x05,

    ReadConfig = 0x06,

    WriteConfig = 0x07,

    /// Leave the bootloader and start the application
    Reset = 0x08,
}

impl Command {
    pub fn from_code(code: u8) -> Option<Self> {
        use Command::*;
        let c = match code {
            0x00 => Version,
            0x01 => ReadProg,
            0x02 => WriteProg,
            0x03 => EraseProg,
            0x04 => ReadData,
            0x05 => WriteData,
            0x06 => ReadConfig,
            0x07 => WriteConfig,
            0x08 => Reset,
            _ => return None,
        };
        Some(c)
    }

    /// Command expected to follow a successful reply to this one
    pub fn next(self) -> Self {
        match self {
            Command::ReadProg => Command::EraseProg,
            Command::EraseProg => Command::WriteProg,
            Command::WriteProg => Command::ReadProg,
            Command::ReadData => Command::WriteData,
            Command::WriteData => Command::ReadData,
            other => other,
        }
    }
}

/// Two's complement of the byte sum
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)).wrapping_neg()
}

/// Wrap a command message in a bootloader frame
pub fn encode(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() * 2 + 4);
    out.push(STX);

    let sum = checksum(message);
    for b in message.iter().chain(core::iter::once(&sum)) {
        if *b == STX || *b == ETX || *b == DLE {
            out.push(DLE);
        }
        out.push(*b);
    }

    out.push(ETX);
    out
}

/// A complete frame received from the bootloader
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    /// Unescaped payload, checksum included
    pub data: Vec<u8>,
    pub valid: bool,
}

impl Packet {
    /// Payload without the trailing checksum
    pub fn body(&self) -> &[u8] {
        match self.data.split_last() {
            Some((_, body)) => body,
            None => &[],
        }
    }
}

/// Incremental receive side of the framing
#[derive(Default, Debug)]
pub struct Decoder {
    buff: Vec<u8>,
    sum: u8,
    escaped: bool,
    started: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.buff.clear();
        self.sum = 0;
        self.escaped = false;
        self.started = false;
    }

    /// Feed one byte, returning a packet when `ETX` closes one.
    ///
    /// While waiting for the bootloader to come up after a reset its
    /// replies are not reliably framed, so `lenient` also accepts an
    /// escaped `ETX` as the end of a packet.
    pub fn push(&mut self, b: u8, lenient: bool) -> Option<Packet> {
        if b == STX && !self.escaped {
            self.clear();
            self.started = true;
            return None;
        }

        if b == ETX && (!self.escaped || lenient) {
            if !self.started {
                return None;
            }
            let p = Packet {
                data: core::mem::take(&mut self.buff),
                valid: self.sum == 0,
            };
            self.clear();
            return Some(p);
        }

        if b == DLE && !self.escaped {
            self.escaped = true;
            return None;
        }

        self.escaped = false;
        if self.started && self.buff.len() < MAX_PACKET {
            self.buff.push(b);
            self.sum = self.sum.wrapping_sub(b);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(d: &mut Decoder, bytes: &[u8]) -> Option<Packet> {
        bytes.iter().filter_map(|b| d.push(*b, false)).last()
    }

    #[test]
    fn version_request() {
        assert_eq!(encode(&[0x00, 0x03]), vec![STX, 0x00, 0x03, 0xfd, ETX]);
    }

    #[test]
    fn control_bytes_escaped() {
        // 0x0f and 0x05 in the payload, checksum 0xeb
        let out = encode(&[0x05, 0x01, 0x0f, 0x00]);
        assert_eq!(
            out,
            vec![STX, DLE, 0x05, 0x01, DLE, 0x0f, 0x00, 0xeb, ETX]
        );

        let mut d = Decoder::new();
        let p = decode(&mut d, &out).unwrap();
        assert!(p.valid);
        assert_eq!(p.body(), &[0x05, 0x01, 0x0f, 0x00]);
    }

    #[test]
    fn bad_checksum_flagged() {
        let mut out = encode(&[0x01, 0x04, 0x00, 0x00]);
        let n = out.len();
        out[n - 2] ^= 0x10;

        let mut d = Decoder::new();
        let p = decode(&mut d, &out).unwrap();
        assert!(!p.valid);
    }

    #[test]
    fn stx_restarts_packet() {
        let mut d = Decoder::new();
        assert!(d.push(0x42, false).is_none());
        let mut bytes = vec![STX, 0x01, 0x02];
        bytes.extend(encode(&[0x08, 0x00]));
        let p = decode(&mut d, &bytes).unwrap();
        assert_eq!(p.body(), &[0x08, 0x00]);
    }

    #[test]
    fn next_command() {
        assert_eq!(Command::EraseProg.next(), Command::WriteProg);
        assert_eq!(Command::WriteProg.next(), Command::ReadProg);
        assert_eq!(Command::ReadProg.next(), Command::EraseProg);
        assert_eq!(Command::WriteData.next(), Command::ReadData);
        assert_eq!(Command::from_code(0x08), Some(Command::Reset));
        assert_eq!(Command::from_code(0x09), None);
    }
}
