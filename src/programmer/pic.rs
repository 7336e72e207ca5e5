//! Memory layout of the supported PIC variants.

/// Geometry and firmware fingerprint of one PIC variant.
///
/// Addresses and sizes are in program words, except `datasize` which
/// counts EEPROM bytes.
#[derive(Debug, PartialEq, Eq)]
pub struct PicInfo {
    pub datasize: u16,
    pub codesize: u16,
    pub confsize: u16,
    pub cfgbase: u32,
    pub eebase: u32,
    /// Row of the failsafe jump, also the first row the bootloader does not own
    pub erasesize: u16,
    /// Words per write burst; writes are padded to a whole number of groups
    pub groupsize: u16,
    pub blockwrite: bool,
    /// Masks and values matched against the first two words of an image
    pub magic: [u16; 4],
}

pub const ROW_WORDS: u16 = 32;
pub const PAGE_BYTES: u16 = 64;

const PIC16F88: PicInfo = PicInfo {
    datasize: 256,
    codesize: 4096,
    confsize: 9,
    cfgbase: 0x2000,
    eebase: 0x2100,
    erasesize: 32,
    groupsize: 4,
    blockwrite: true,
    magic: [0x3fff, 0x158a, 0x3e00, 0x2600],
};

const PIC16F1847: PicInfo = PicInfo {
    datasize: 256,
    codesize: 8192,
    confsize: 9,
    cfgbase: 0x8000,
    eebase: 0xf000,
    erasesize: 32,
    groupsize: 32,
    blockwrite: false,
    magic: [0x3fff, 0x319f, 0x3e00, 0x2600],
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Processor {
    Pic16f88,
    Pic16f1847,
}

impl Processor {
    pub const ALL: [Processor; 2] = [Processor::Pic16f88, Processor::Pic16f1847];

    pub fn info(self) -> &'static PicInfo {
        match self {
            Processor::Pic16f88 => &PIC16F88,
            Processor::Pic16f1847 => &PIC16F1847,
        }
    }

    /// Sub-directory holding firmware images for this variant
    pub fn dir(self) -> &'static str {
        match self {
            Processor::Pic16f88 => "pic16f88",
            Processor::Pic16f1847 => "pic16f1847",
        }
    }

    /// Variant from the major version the bootloader reports
    pub fn from_bootloader(major: u8) -> Option<Self> {
        match major {
            1 => Some(Processor::Pic16f88),
            2 => Some(Processor::Pic16f1847),
            _ => None,
        }
    }

    /// Identify the variant an image was built for from its first two words
    pub fn detect(w0: u16, w1: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| {
            let m = &p.info().magic;
            (w0 & m[0]) == m[1] && (w1 & m[2]) == m[3]
        })
    }

    /// Jump to the bootloader placed in the first erasable row, so that an
    /// interrupted upgrade still leaves a device that can be reprogrammed.
    pub fn failsafe(self, start: u16) -> [u16; 4] {
        match self {
            Processor::Pic16f88 => [
                if start & 0x800 != 0 { 0x158a } else { 0x118a },
                0x2000 | (start & 0x7ff),
                0x118a,
                0x2820,
            ],
            Processor::Pic16f1847 => [
                0x3180 | (start >> 8),
                0x2000 | (start & 0x7ff),
                0x3180,
                0x2820,
            ],
        }
    }
}

impl core::fmt::Display for Processor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Processor::Pic16f88 => write!(f, "PIC16F88"),
            Processor::Pic16f1847 => write!(f, "PIC16F1847"),
        }
    }
}
