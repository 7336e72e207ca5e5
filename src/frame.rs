//! PIC trace line and gateway command codec.
//!
//! The PIC reports each OpenTherm frame it sees as a classification letter
//! followed by 8 hex digits, e.g. `B40000200`. Commands go the other way as
//! `KEY=VALUE\r` and are answered with `KEY: value` or a two letter error
//! token.

use core::fmt;
use std::time::Instant;

use thiserror::Error;

/// Maximum length of a command, excluding the terminating CR
pub const COMMAND_MAX: usize = 15;

/// Line prefix assigned by the PIC
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Source {
    /// `T`: thermostat to boiler
    Thermostat,
    /// `B`: boiler to thermostat
    Boiler,
    /// `A`: answer sent to the thermostat by the gateway
    Answer,
    /// `R`: request sent to the boiler by the gateway
    Request,
    /// `E`: frame received with a parity error
    Error,
}

impl Source {
    pub fn from_prefix(c: u8) -> Option<Self> {
        match c {
            b'T' => Some(Source::Thermostat),
            b'B' => Some(Source::Boiler),
            b'A' => Some(Source::Answer),
            b'R' => Some(Source::Request),
            b'E' => Some(Source::Error),
            _ => None,
        }
    }

    pub fn prefix(self) -> char {
        match self {
            Source::Thermostat => 'T',
            Source::Boiler => 'B',
            Source::Answer => 'A',
            Source::Request => 'R',
            Source::Error => 'E',
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Direction {
    MasterToSlave,
    SlaveToMaster,
    GatewayAnswer,
    GatewayRequest,
    ParityError,
}

/// OpenTherm message type, bits 30..28 of a frame
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MessageType {
    ReadData = 0b000,
    WriteData = 0b001,
    InvalidData = 0b010,
    Reserved = 0b011,
    ReadAck = 0b100,
    WriteAck = 0b101,
    DataInvalid = 0b110,
    UnknownDataId = 0b111,
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0b000 => MessageType::ReadData,
            0b001 => MessageType::WriteData,
            0b010 => MessageType::InvalidData,
            0b011 => MessageType::Reserved,
            0b100 => MessageType::ReadAck,
            0b101 => MessageType::WriteAck,
            0b110 => MessageType::DataInvalid,
            _ => MessageType::UnknownDataId,
        }
    }

    /// Types sent by the slave (boiler) side have the top bit set
    pub fn is_response(self) -> bool {
        (self as u8) & 0b100 != 0
    }
}

/// True when the 32 bit frame has even parity
pub fn parity_ok(raw: u32) -> bool {
    raw.count_ones() % 2 == 0
}

/// Build a raw frame, setting bit 31 so the result has even parity
pub fn encode_raw(msg_type: MessageType, id: u8, hb: u8, lb: u8) -> u32 {
    let raw = ((msg_type as u32) << 28) | ((id as u32) << 16) | ((hb as u32) << 8) | lb as u32;
    if parity_ok(raw) {
        raw
    } else {
        raw | 0x8000_0000
    }
}

/// One decoded trace frame
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Frame {
    pub source: Source,
    pub direction: Direction,
    pub msg_type: MessageType,
    pub id: u8,
    pub hb: u8,
    pub lb: u8,
    pub raw: u32,
    pub received: Instant,
}

impl Frame {
    /// Split a raw 32 bit value reported under `source`
    pub fn from_raw(source: Source, raw: u32, received: Instant) -> Self {
        let direction = match source {
            _ if !parity_ok(raw) => Direction::ParityError,
            Source::Thermostat => Direction::MasterToSlave,
            Source::Boiler => Direction::SlaveToMaster,
            Source::Answer => Direction::GatewayAnswer,
            Source::Request => Direction::GatewayRequest,
            Source::Error => Direction::ParityError,
        };

        Frame {
            source,
            direction,
            msg_type: MessageType::from_bits((raw >> 28) as u8),
            id: (raw >> 16) as u8,
            hb: (raw >> 8) as u8,
            lb: raw as u8,
            raw,
            received,
        }
    }

    pub fn to_raw(&self) -> u32 {
        self.raw
    }

    pub fn parity_bit(&self) -> bool {
        self.raw & 0x8000_0000 != 0
    }

    pub fn payload(&self) -> u16 {
        u16::from_be_bytes([self.hb, self.lb])
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:08X}", self.source.prefix(), self.raw)
    }
}

/// Negative acknowledgements returned by the PIC
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ErrorToken {
    /// `NG`: unknown command
    NoGood,
    /// `SE`: syntax error
    SyntaxError,
    /// `BV`: bad value
    BadValue,
    /// `OR`: out of range
    OutOfRange,
    /// `NS`: not set
    NotSet,
    /// `NF`: not found
    NotFound,
    /// `OE`: receive buffer overrun
    Overrun,
    /// `RE`: rejected
    Rejected,
}

impl ErrorToken {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NG" => Some(ErrorToken::NoGood),
            "SE" => Some(ErrorToken::SyntaxError),
            "BV" => Some(ErrorToken::BadValue),
            "OR" => Some(ErrorToken::OutOfRange),
            "NS" => Some(ErrorToken::NotSet),
            "NF" => Some(ErrorToken::NotFound),
            "OE" => Some(ErrorToken::Overrun),
            "RE" => Some(ErrorToken::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorToken::NoGood => "NG",
            ErrorToken::SyntaxError => "SE",
            ErrorToken::BadValue => "BV",
            ErrorToken::OutOfRange => "OR",
            ErrorToken::NotSet => "NS",
            ErrorToken::NotFound => "NF",
            ErrorToken::Overrun => "OE",
            ErrorToken::Rejected => "RE",
        }
    }
}

impl fmt::Display for ErrorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of the PIC to a command
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Reply {
    /// `KEY: value` echo of a command that was accepted
    Ack { key: [u8; 2], value: String },
    Error(ErrorToken),
}

impl Reply {
    pub fn parse(line: &str) -> Option<Self> {
        if let Some(token) = ErrorToken::parse(line) {
            return Some(Reply::Error(token));
        }

        let b = line.as_bytes();
        if b.len() >= 3 && is_key(&b[..2]) && b[2] == b':' {
            let value = line[3..].trim_start().to_string();
            return Some(Reply::Ack { key: [b[0], b[1]], value });
        }

        None
    }
}

#[derive(Clone, PartialEq, Debug, Error)]
pub enum FrameError {
    #[error("trace line too short")]
    Length,
    #[error("invalid hex digits in trace line")]
    Hex,
}

/// Classification of one line received from the PIC
#[derive(Clone, PartialEq, Debug)]
pub enum Line<'a> {
    Frame(Frame),
    /// `E` line; the frame carries the reported bits, `text` the diagnostic
    ParityError { frame: Frame, text: &'a str },
    Reply(Reply),
    /// Anything else is log output from the PIC
    Text(&'a str),
}

fn parse_hex32(digits: &[u8]) -> Result<u32, FrameError> {
    if digits.len() != 8 {
        return Err(FrameError::Length);
    }
    // Only uppercase hex is produced by the PIC
    if !digits.iter().all(|c| c.is_ascii_digit() || (b'A'..=b'F').contains(c)) {
        return Err(FrameError::Hex);
    }
    let s = core::str::from_utf8(digits).map_err(|_| FrameError::Hex)?;
    u32::from_str_radix(s, 16).map_err(|_| FrameError::Hex)
}

/// Parse a trace frame line such as `T90011900`. Trailing CR/LF is ignored.
pub fn parse_frame(line: &str, now: Instant) -> Result<Frame, FrameError> {
    let b = line.trim_end_matches(|c| c == '\r' || c == '\n').as_bytes();
    let source = b
        .first()
        .and_then(|c| Source::from_prefix(*c))
        .ok_or(FrameError::Length)?;

    let digits = match source {
        // Parity error lines carry a diagnostic after the digits
        Source::Error => b.get(1..9).ok_or(FrameError::Length)?,
        _ => &b[1..],
    };
    let raw = parse_hex32(digits)?;

    Ok(Frame::from_raw(source, raw, now))
}

/// Classify a line received from the PIC
pub fn parse_line(line: &str, now: Instant) -> Line<'_> {
    let line = line.trim_end_matches(|c| c == '\r' || c == '\n');

    if let Ok(frame) = parse_frame(line, now) {
        if frame.source == Source::Error {
            let text = line.get(9..).unwrap_or("").trim();
            return Line::ParityError { frame, text };
        }
        return Line::Frame(frame);
    }

    match Reply::parse(line) {
        Some(r) => Line::Reply(r),
        None => Line::Text(line),
    }
}

fn is_key(b: &[u8]) -> bool {
    b.len() == 2 && b.iter().all(|c| c.is_ascii_uppercase())
}

#[derive(Clone, PartialEq, Debug, Error)]
pub enum CommandFormatError {
    #[error("command longer than {} bytes", COMMAND_MAX)]
    TooLong,
    #[error("command must look like XX=value")]
    Syntax,
}

/// An outbound gateway command, `KEY=VALUE`
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Command {
    key: [u8; 2],
    value: String,
}

impl Command {
    pub fn parse(text: &str) -> Result<Self, CommandFormatError> {
        let text = text.trim();
        if text.len() > COMMAND_MAX {
            return Err(CommandFormatError::TooLong);
        }
        let b = text.as_bytes();
        if b.len() < 3 || !is_key(&b[..2]) || b[2] != b'=' {
            return Err(CommandFormatError::Syntax);
        }
        let value = &text[3..];
        if !value.bytes().all(|c| c.is_ascii_graphic() || c == b' ') {
            return Err(CommandFormatError::Syntax);
        }

        Ok(Command { key: [b[0], b[1]], value: value.to_string() })
    }

    pub fn key(&self) -> [u8; 2] {
        self.key
    }

    pub fn key_str(&self) -> &str {
        core::str::from_utf8(&self.key).unwrap_or("??")
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Wire form, terminated by CR
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.value.len() + 4);
        out.extend_from_slice(&self.key);
        out.push(b'=');
        out.extend_from_slice(self.value.as_bytes());
        out.push(b'\r');
        out
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key_str(), self.value)
    }
}
