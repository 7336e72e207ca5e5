//! Typed OpenTherm data values.
//!
//! Every data-id carries 16 bits of payload whose meaning is fixed by its
//! entry in the [data dictionary](crate::dictionary). [`Value::decode`]
//! turns the raw high/low bytes into the matching variant.

use core::fmt;

use thiserror::Error;

/// Payload interpretation of a data-id
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Encoding {
    /// Signed fixed point, 8 integer and 8 fractional bits
    F88,
    S16,
    /// Two signed bytes, usually an upper/lower bound pair
    S8S8,
    U16,
    U8U8,
    /// Low byte is a set of 8 flags
    Flag8,
    Flag8Flag8,
    Flag8U8,
    /// Low byte unsigned, high byte ignored
    U8,
    /// Day of week and time of day (data-id 20)
    DayTime,
    Undefined,
}

/// Signed 8.8 fixed point number
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct F88(pub i16);

impl F88 {
    /// Convert from a float, rounding to the nearest 1/256.
    /// Values outside the representable range saturate.
    pub fn from_f32(v: f32) -> Self {
        let scaled = (v * 256.0).round();
        let clamped = scaled.max(i16::MIN as f32).min(i16::MAX as f32);
        F88(clamped as i16)
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / 256.0
    }

    pub fn from_bytes(hb: u8, lb: u8) -> Self {
        F88(i16::from_be_bytes([hb, lb]))
    }

    pub fn to_bytes(self) -> (u8, u8) {
        let [hb, lb] = self.0.to_be_bytes();
        (hb, lb)
    }
}

impl fmt::Display for F88 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.to_f32())
    }
}

#[derive(Clone, PartialEq, Debug, Error)]
pub enum ValueError {
    #[error("day/time out of range: day {day} {hour:02}:{minute:02}")]
    DayTime { day: u8, hour: u8, minute: u8 },
}

/// A decoded data value
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Value {
    F88(F88),
    S16(i16),
    S8S8(i8, i8),
    U16(u16),
    U8U8(u8, u8),
    Flag8(u8),
    Flag8Flag8(u8, u8),
    Flag8U8(u8, u8),
    U8(u8),
    /// `day` is 1 (Monday) ..= 7, 0 when not specified
    DayTime { day: u8, hour: u8, minute: u8 },
    /// Payload of an id without a known encoding
    Raw(u16),
}

impl Value {
    /// Decode the payload bytes according to `encoding`
    pub fn decode(encoding: Encoding, hb: u8, lb: u8) -> Result<Self, ValueError> {
        let v = match encoding {
            Encoding::F88 => Value::F88(F88::from_bytes(hb, lb)),
            Encoding::S16 => Value::S16(i16::from_be_bytes([hb, lb])),
            Encoding::S8S8 => Value::S8S8(hb as i8, lb as i8),
            Encoding::U16 => Value::U16(u16::from_be_bytes([hb, lb])),
            Encoding::U8U8 => Value::U8U8(hb, lb),
            Encoding::Flag8 => Value::Flag8(lb),
            Encoding::Flag8Flag8 => Value::Flag8Flag8(hb, lb),
            Encoding::Flag8U8 => Value::Flag8U8(hb, lb),
            Encoding::U8 => Value::U8(lb),
            Encoding::DayTime => {
                let day = hb >> 5;
                let hour = hb & 0x1f;
                let minute = lb;
                if hour > 23 || minute > 59 {
                    return Err(ValueError::DayTime { day, hour, minute });
                }
                Value::DayTime { day, hour, minute }
            }
            Encoding::Undefined => Value::Raw(u16::from_be_bytes([hb, lb])),
        };
        Ok(v)
    }

    /// Re-encode into the (high, low) payload bytes
    pub fn to_bytes(&self) -> (u8, u8) {
        match *self {
            Value::F88(v) => v.to_bytes(),
            Value::S16(v) => {
                let [hb, lb] = v.to_be_bytes();
                (hb, lb)
            }
            Value::S8S8(h, l) => (h as u8, l as u8),
            Value::U16(v) | Value::Raw(v) => {
                let [hb, lb] = v.to_be_bytes();
                (hb, lb)
            }
            Value::U8U8(h, l) | Value::Flag8Flag8(h, l) | Value::Flag8U8(h, l) => (h, l),
            Value::Flag8(l) | Value::U8(l) => (0, l),
            Value::DayTime { day, hour, minute } => ((day << 5) | (hour & 0x1f), minute),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::F88(v) => write!(f, "{}", v),
            Value::S16(v) => write!(f, "{}", v),
            Value::S8S8(h, l) => write!(f, "{}/{}", h, l),
            Value::U16(v) => write!(f, "{}", v),
            Value::U8U8(h, l) => write!(f, "{}/{}", h, l),
            Value::Flag8(l) => write!(f, "{:08b}", l),
            Value::Flag8Flag8(h, l) => write!(f, "{:08b}/{:08b}", h, l),
            Value::Flag8U8(h, l) => write!(f, "{:08b}/{}", h, l),
            Value::U8(l) => write!(f, "{}", l),
            Value::DayTime { day, hour, minute } => {
                const DAYS: [&str; 8] = ["-", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
                write!(f, "{} {:02}:{:02}", DAYS[*day as usize], hour, minute)
            }
            Value::Raw(v) => write!(f, "0x{:04X}", v),
        }
    }
}
