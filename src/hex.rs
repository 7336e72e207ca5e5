//! Intel HEX reader for PIC firmware images.
//!
//! PIC program memory is 14 bits wide and addressed in words, while the
//! HEX format counts bytes. Record addresses are therefore halved and the
//! little-endian byte pairs combined into words before use.

use std::path::Path;

use crate::programmer::pic::{Processor, PAGE_BYTES, ROW_WORDS};

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    #[error("firmware file could not be read")]
    Access,
    #[error("firmware file is not a valid HEX image")]
    Format,
    #[error("HEX record carries an odd number of bytes")]
    DataSize,
    #[error("HEX record checksum mismatch")]
    Checksum,
    #[error("image is not built for a supported PIC")]
    Magic,
}

/// One decoded HEX record
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    /// Program words starting at a word address
    Data { addr: u32, words: Vec<u16> },
    Eof,
}

/// Sequential reader over the records of a HEX file
#[derive(Clone, Debug)]
pub struct HexReader {
    records: Vec<Result<ihex::Record, HexError>>,
    pos: usize,
    /// Word offset set by the last extended address record
    base: u32,
}

impl HexReader {
    pub fn new<S: AsRef<str>>(text: S) -> Self {
        let records = ihex::Reader::new(text.as_ref())
            .map(|r| {
                r.map_err(|e| {
                    debug!("bad HEX record: {}", e);
                    match e {
                        ihex::ReaderError::ChecksumMismatch(..) => HexError::Checksum,
                        _ => HexError::Format,
                    }
                })
            })
            .collect();

        Self { records, pos: 0, base: 0 }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HexError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(text) => Ok(Self::new(text)),
            Err(e) => {
                warn!("unable to read {}: {}", path.as_ref().display(), e);
                Err(HexError::Access)
            }
        }
    }

    /// Restart from the first record
    pub fn rewind(&mut self) {
        self.pos = 0;
        self.base = 0;
    }

    /// Read the next record. Running out of records before the end of file
    /// record is a format error.
    pub fn next_record(&mut self) -> Result<Record, HexError> {
        loop {
            let record = match self.records.get(self.pos) {
                Some(Ok(r)) => r,
                Some(Err(e)) => return Err(*e),
                None => return Err(HexError::Format),
            };
            self.pos += 1;

            match record {
                ihex::Record::Data { offset, value } => {
                    if value.len() % 2 != 0 {
                        return Err(HexError::DataSize);
                    }
                    let words = value
                        .chunks(2)
                        .map(|w| u16::from_le_bytes([w[0], w[1]]))
                        .collect();
                    return Ok(Record::Data { addr: (*offset as u32 >> 1) + self.base, words });
                }
                ihex::Record::EndOfFile => return Ok(Record::Eof),
                // Segment base is seg * 16 bytes, linear base seg << 16 bytes
                ihex::Record::ExtendedSegmentAddress(seg) => self.base = (*seg as u32) << 3,
                ihex::Record::ExtendedLinearAddress(seg) => self.base = (*seg as u32) << 15,
                r => trace!("skipping {:?}", r),
            }
        }
    }
}

/// Firmware image prepared for programming
#[derive(Clone, Debug)]
pub struct HexImage {
    pub processor: Processor,
    /// EEPROM contents the image wants
    pub data: [u8; 256],
    /// Assumed current EEPROM contents. Starts as the complement of
    /// `data` wherever the image defines a byte, so those get written.
    pub shadow: [u8; 256],
    pub config: Vec<u16>,
    /// Firmware version embedded in the EEPROM image
    pub version: Option<String>,
    /// Progress weight of programming this image
    pub weight: u32,
}

const BANNER: &[u8] = b"OpenTherm Gateway ";

impl HexImage {
    /// Read a whole image, detecting the target from its first two words
    pub fn load(reader: &mut HexReader) -> Result<Self, HexError> {
        use crate::programmer::{
            WEIGHT_CODEPROG, WEIGHT_DATAPROG, WEIGHT_RESET, WEIGHT_VERSION,
        };

        reader.rewind();

        let mut processor = None;
        let mut data = [0xffu8; 256];
        let mut shadow = [0xffu8; 256];
        let mut config = Vec::new();
        let mut rows = Vec::new();
        let mut pages = [false; 4];
        let mut last = 0u32;

        loop {
            let (addr, words) = match reader.next_record()? {
                Record::Eof => break,
                Record::Data { addr, words } => (addr, words),
            };
            if words.is_empty() {
                continue;
            }
            if addr < last {
                debug!("records out of order at 0x{:04x}", addr);
                return Err(HexError::Format);
            }
            last = addr + words.len() as u32;

            if addr == 0 {
                if words.len() < 2 {
                    return Err(HexError::Magic);
                }
                processor = Processor::detect(words[0], words[1]);
                if processor.is_none() {
                    return Err(HexError::Magic);
                }
            }

            let info = match processor {
                Some(p) => p.info(),
                None => return Err(HexError::Format),
            };

            if addr < info.codesize as u32 {
                if last > info.codesize as u32 {
                    return Err(HexError::Format);
                }
                for row in addr / ROW_WORDS as u32..=(last - 1) / ROW_WORDS as u32 {
                    if !rows.contains(&row) {
                        rows.push(row);
                    }
                }
            } else if addr < info.cfgbase {
                debug!("data outside program memory at 0x{:04x}", addr);
                return Err(HexError::Format);
            } else if addr < info.eebase {
                let off = (addr - info.cfgbase) as usize;
                if off >= info.confsize as usize {
                    continue;
                }
                if config.len() < off {
                    config.resize(off, 0x3fff);
                }
                for (i, w) in words.iter().enumerate() {
                    if off + i >= info.confsize as usize {
                        break;
                    }
                    if off + i < config.len() {
                        config[off + i] = *w;
                    } else {
                        config.push(*w);
                    }
                }
            } else {
                let off = (addr - info.eebase) as usize;
                for (i, w) in words.iter().enumerate() {
                    let a = off + i;
                    if a >= info.datasize as usize {
                        break;
                    }
                    data[a] = *w as u8;
                    shadow[a] = !(*w as u8);
                    pages[a / PAGE_BYTES as usize] = true;
                }
            }
        }

        let processor = processor.ok_or(HexError::Format)?;

        // The bootloader's own rows are never reprogrammed
        let skipped = 8 * WEIGHT_CODEPROG;
        let weight = (WEIGHT_RESET
            + WEIGHT_VERSION
            + rows.len() as u32 * WEIGHT_CODEPROG
            + pages.iter().filter(|p| **p).count() as u32 * WEIGHT_DATAPROG)
            .saturating_sub(skipped)
            .max(WEIGHT_RESET + WEIGHT_VERSION);

        let version = find_version(&data);
        info!(
            "loaded {} image, version {}",
            processor,
            version.as_deref().unwrap_or("unknown")
        );

        Ok(Self { processor, data, shadow, config, version, weight })
    }
}

/// Look for the NUL terminated banner string in the EEPROM image
fn find_version(data: &[u8]) -> Option<String> {
    data.split(|b| *b == 0)
        .find_map(|s| s.strip_prefix(BANNER))
        .map(|v| String::from_utf8_lossy(v).into_owned())
}

/// Groups the program words of an image into 32 word rows
#[derive(Clone, Debug)]
pub struct RowCursor {
    reader: HexReader,
    record: Vec<u16>,
    addr: u32,
    pos: usize,
    done: bool,
}

impl RowCursor {
    pub fn new(reader: HexReader) -> Self {
        let mut c = Self { reader, record: Vec::new(), addr: 0, pos: 0, done: false };
        c.rewind();
        c
    }

    pub fn rewind(&mut self) {
        self.reader.rewind();
        self.record.clear();
        self.addr = 0;
        self.pos = 0;
        self.done = false;
    }

    /// Fill `row` with the next row of program words that has any content,
    /// padding with erased words. Returns the word address of the row, or
    /// `None` once the image is exhausted.
    pub fn next_row(&mut self, row: &mut [u16; ROW_WORDS as usize]) -> Result<Option<u32>, HexError> {
        *row = [0x3fff; ROW_WORDS as usize];

        let mut start = None;
        loop {
            if self.pos >= self.record.len() {
                if self.done {
                    break;
                }
                match self.reader.next_record()? {
                    Record::Eof => {
                        self.done = true;
                        break;
                    }
                    Record::Data { addr, words } => {
                        self.addr = addr;
                        self.record = words;
                        self.pos = 0;
                    }
                }
                continue;
            }

            let addr = self.addr + self.pos as u32;
            let base = *start.get_or_insert(addr - addr % ROW_WORDS as u32);
            let n = addr - base;
            if n >= ROW_WORDS as u32 {
                break;
            }
            row[n as usize] = self.record[self.pos];
            self.pos += 1;
        }

        Ok(start)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build one HEX line for `data` at byte address `addr`
    pub(crate) fn line(kind: u8, addr: u16, data: &[u8]) -> String {
        let mut bytes = vec![data.len() as u8, (addr >> 8) as u8, addr as u8, kind];
        bytes.extend_from_slice(data);
        let sum = bytes.iter().fold(0u8, |s, b| s.wrapping_add(*b)).wrapping_neg();
        bytes.push(sum);
        format!(":{}\n", hex::encode_upper(bytes))
    }

    /// Line for program words at a word address
    pub(crate) fn words(addr: u32, words: &[u16]) -> String {
        let data: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes().to_vec()).collect();
        line(0, (addr * 2) as u16, &data)
    }

    pub(crate) fn eof() -> String {
        ":00000001FF\n".to_string()
    }

    #[test]
    fn data_record() {
        let mut r = HexReader::new(":0400000000308A0042\n:00000001FF\n".to_string());
        assert_eq!(
            r.next_record().unwrap(),
            Record::Data { addr: 0, words: vec![0x3000, 0x008a] }
        );
        assert_eq!(r.next_record().unwrap(), Record::Eof);
    }

    #[test]
    fn extended_linear_address() {
        // Byte address 0x1e000 is word 0xf000, the 16F1847 EEPROM
        let text = line(4, 0, &[0x00, 0x01]) + &line(0, 0xe000, &[0x41, 0x00]) + &eof();
        let mut r = HexReader::new(text);
        assert_eq!(
            r.next_record().unwrap(),
            Record::Data { addr: 0xf000, words: vec![0x0041] }
        );
    }

    #[test]
    fn errors() {
        let mut r = HexReader::new(":0300000000308A43\n".to_string());
        assert_eq!(r.next_record(), Err(HexError::DataSize));

        let mut r = HexReader::new(":0400000000308A0043\n".to_string());
        assert_eq!(r.next_record(), Err(HexError::Checksum));

        let mut r = HexReader::new(words(0, &[0x3fff]));
        assert!(r.next_record().is_ok());
        assert_eq!(r.next_record(), Err(HexError::Format));

        assert_eq!(HexReader::open("/nonexistent/gateway.hex").err(), Some(HexError::Access));
    }

    #[test]
    fn image_magic_and_version() {
        let mut eeprom = b"OpenTherm Gateway 6.5\0".to_vec();
        eeprom.resize(24, 0xff);
        let ee: Vec<u16> = eeprom.iter().map(|b| *b as u16).collect();
        let text = line(4, 0, &[0x00, 0x00])
            + &words(0, &[0x319f, 0x2600])
            + &line(4, 0, &[0x00, 0x01])
            + &words(0x7000, &ee)
            + &eof();

        let img = HexImage::load(&mut HexReader::new(text)).unwrap();
        assert_eq!(img.processor, Processor::Pic16f1847);
        assert_eq!(img.version.as_deref(), Some("6.5"));
        assert_eq!(img.data[0], b'O');
        assert_eq!(img.shadow[0], !b'O');
        assert_eq!(img.data[30], 0xff);
        assert_eq!(img.shadow[30], 0xff);
    }

    #[test]
    fn image_without_magic() {
        let text = words(0, &[0x3fff, 0x3fff]) + &eof();
        assert_eq!(HexImage::load(&mut HexReader::new(text)).err(), Some(HexError::Magic));

        let text = words(0x20, &[0x1234]) + &eof();
        assert_eq!(HexImage::load(&mut HexReader::new(text)).err(), Some(HexError::Format));
    }

    #[test]
    fn rows_are_grouped() {
        let text = words(0, &[0x158a, 0x2630, 0x0001])
            + &words(0x1e, &[0x0002, 0x0003, 0x0004])
            + &words(0x100, &[0x0005])
            + &eof();
        let mut c = RowCursor::new(HexReader::new(text));
        let mut row = [0u16; 32];

        assert_eq!(c.next_row(&mut row).unwrap(), Some(0));
        assert_eq!(&row[..3], &[0x158a, 0x2630, 0x0001]);
        assert_eq!(row[3], 0x3fff);
        assert_eq!(&row[30..], &[0x0002, 0x0003]);

        assert_eq!(c.next_row(&mut row).unwrap(), Some(0x20));
        assert_eq!(row[0], 0x0004);
        assert_eq!(row[1], 0x3fff);

        assert_eq!(c.next_row(&mut row).unwrap(), Some(0x100));
        assert_eq!(c.next_row(&mut row).unwrap(), None);

        c.rewind();
        assert_eq!(c.next_row(&mut row).unwrap(), Some(0));
    }

    fn all_rows(c: &mut RowCursor) -> Vec<(u32, [u16; 32])> {
        let mut rows = Vec::new();
        let mut row = [0u16; 32];
        while let Some(addr) = c.next_row(&mut row).unwrap() {
            rows.push((addr, row));
        }
        rows
    }

    fn le(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes().to_vec()).collect()
    }

    fn byte_sum(w: u16) -> u32 {
        (w & 0xff) as u32 + (w >> 8) as u32
    }

    #[test]
    fn rewind_repeats_rows() {
        let text = words(0, &[0x319f, 0x2600, 0x0001])
            + &words(0x1e, &[0x0002, 0x0003, 0x0004])
            + &words(0x100, &[0x0005])
            + &line(4, 0, &[0x00, 0x01])
            + &words(0x7000, &[0x0041, 0x0042])
            + &eof();
        let mut c = RowCursor::new(HexReader::new(text));

        let first = all_rows(&mut c);
        assert_eq!(first.len(), 4);

        c.rewind();
        assert_eq!(all_rows(&mut c), first);

        // Rewinding part way through starts over as well
        c.rewind();
        let mut row = [0u16; 32];
        c.next_row(&mut row).unwrap();
        c.rewind();
        assert_eq!(all_rows(&mut c), first);
    }

    #[test]
    fn partitions_keep_every_byte() {
        let code = [0x319f, 0x2600, 0x0123, 0x0456];
        let more = [0x0789, 0x0abc];
        let config = [0x3fe4, 0x1eff];
        let eeprom = [0x0012, 0x0034, 0x0056];
        let records = [
            (0u8, 0u16, le(&code)),
            (0, 0x40 * 2, le(&more)),
            (4, 0, vec![0x00, 0x01]),
            (0, 0, le(&config)),
            (0, 0xe000, le(&eeprom)),
        ];
        let text = records
            .iter()
            .map(|(kind, addr, data)| line(*kind, *addr, data))
            .collect::<String>()
            + &eof();
        let record_sum: u32 = records
            .iter()
            .filter(|(kind, _, _)| *kind == 0)
            .flat_map(|(_, _, data)| data.iter())
            .map(|b| *b as u32)
            .sum();

        let mut reader = HexReader::new(text);
        let img = HexImage::load(&mut reader).unwrap();
        let codesize = img.processor.info().codesize as u32;

        let mut code_sum = 0;
        for (addr, row) in all_rows(&mut RowCursor::new(reader)) {
            if addr < codesize {
                code_sum += row.iter().filter(|w| **w != 0x3fff).map(|w| byte_sum(*w)).sum::<u32>();
            }
        }
        let data_sum: u32 = (0..256)
            .filter(|a| img.data[*a] != img.shadow[*a])
            .map(|a| img.data[a] as u32)
            .sum();
        let config_sum: u32 = img.config.iter().map(|w| byte_sum(*w)).sum();

        assert_eq!(img.config, config.to_vec());
        assert_eq!(code_sum + data_sum + config_sum, record_sum);
    }
}
