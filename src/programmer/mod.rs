//! In-field reprogramming of the gateway PIC through its serial bootloader.
//!
//! The session is driven entirely by the caller: bytes read from the serial
//! port are handed to [`Upgrade::receive`] and [`Upgrade::tick`] is called
//! regularly to run the response watchdog. Everything the session transmits
//! goes out through a [`Link`].
//!
//! Sequence: reset the PIC into its bootloader, query the bootloader
//! version, optionally dump the EEPROM so settings survive, install a
//! failsafe jump, then rewrite program memory row by row and finally the
//! data EEPROM page by page, verifying every write by reading it back.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::event::{Event, Subscriber};
use crate::hex::{HexError, HexImage, HexReader, RowCursor};
use crate::transfer::{transfer_settings, TransferTable};

pub mod pic;
pub mod protocol;

pub use pic::{PicInfo, Processor};
use pic::{PAGE_BYTES, ROW_WORDS};
use protocol::{Command, Decoder};

pub const WEIGHT_RESET: u32 = 8;
pub const WEIGHT_VERSION: u32 = 1;
pub const WEIGHT_DATAREAD: u32 = 4;
pub const WEIGHT_CODEPROG: u32 = 10;
pub const WEIGHT_DATAPROG: u32 = 20;
/// Placeholder total until the image size is known
pub const WEIGHT_MAXIMUM: u32 = 2000;

/// Silence after which the bootloader is nudged and the request repeated
pub const WATCHDOG: Duration = Duration::from_millis(1000);

const RETRY_LIMIT: u16 = 10;
const RETRY_LIMIT_PROGRAM: u16 = 100;

/// Transmit side of the serial channel, owned by the session while it runs
pub trait Link {
    fn send(&mut self, bytes: &[u8]);

    /// Ask the running firmware to reset and pulse the PIC reset line
    fn reset_pic(&mut self);
}

/// Hook invoked regularly while a long-running operation is busy
pub trait Heartbeat {
    fn beat(&mut self);
}

impl Heartbeat for () {
    fn beat(&mut self) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Reset,
    Version,
    Dump,
    Prep,
    Code,
    Data,
}

/// What the session knows about the image before talking to the bootloader
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Relative file name; the image is picked once the processor is known
    Probe,
    Pic(Processor),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UpgradeError {
    #[error("an upgrade is already in progress")]
    InProgress,
    #[error(transparent)]
    Hex(#[from] HexError),
    #[error("firmware image does not match the processor")]
    Device,
    #[error("too many communication errors")]
    Retries,
    #[error("read back kept differing from the image")]
    Mismatches,
}

/// Final status of a session
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub result: Result<(), UpgradeError>,
    pub mismatches: u16,
    pub retries: u16,
}

impl core::fmt::Display for Report {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.result {
            Ok(()) => write!(f, "success")?,
            Err(e) => write!(f, "failed: {}", e)?,
        }
        write!(f, " ({} mismatches, {} retries)", self.mismatches, self.retries)
    }
}

/// Where firmware images and the settings transfer table live
#[derive(Clone, Debug, PartialEq)]
pub struct Locations {
    pub firmware_dir: PathBuf,
    /// Relative to `firmware_dir` unless absolute
    pub transfer_file: PathBuf,
}

impl Default for Locations {
    fn default() -> Self {
        Self {
            firmware_dir: PathBuf::from("/"),
            transfer_file: PathBuf::from("transfer.dat"),
        }
    }
}

pub struct Upgrade {
    stage: Stage,
    target: Target,
    hexfile: PathBuf,
    opened: Option<PathBuf>,
    locations: Locations,
    /// Version of the gateway firmware being replaced
    installed: Option<String>,
    /// Version of the firmware in the image
    version: Option<String>,

    device: Processor,
    protect: (u16, u16),
    failsafe: [u16; 4],

    rows: RowCursor,
    row: [u16; ROW_WORDS as usize],
    data: [u8; 256],
    shadow: [u8; 256],
    pc: u16,

    last: Option<Command>,
    frame: Vec<u8>,
    decoder: Decoder,
    last_rx: Instant,

    attempts: u16,
    failures: u16,
    mismatches: u16,
    retries: u16,

    done: u32,
    total: u32,
    percent: u8,
    report: Option<Report>,
}

impl Upgrade {
    /// Begin a session. An absolute `hexfile` is loaded straight away; a
    /// relative one is looked up under the firmware directory for the
    /// processor the bootloader reports.
    pub fn start<L: Link>(
        hexfile: &Path,
        installed: Option<String>,
        locations: Locations,
        now: Instant,
        link: &mut L,
    ) -> Result<Self, UpgradeError> {
        let mut s = Self {
            stage: Stage::Idle,
            target: Target::Probe,
            hexfile: hexfile.to_path_buf(),
            opened: None,
            locations,
            installed,
            version: None,
            device: Processor::Pic16f88,
            protect: (0, 0),
            failsafe: [0x3fff; 4],
            rows: RowCursor::new(HexReader::new(String::new())),
            row: [0x3fff; ROW_WORDS as usize],
            data: [0xff; 256],
            shadow: [0xff; 256],
            pc: 0,
            last: None,
            frame: Vec::new(),
            decoder: Decoder::new(),
            last_rx: now,
            attempts: 0,
            failures: 0,
            mismatches: 0,
            retries: 0,
            done: 0,
            total: WEIGHT_MAXIMUM,
            percent: 0,
            report: None,
        };

        if hexfile.is_absolute() {
            let p = s.load(hexfile)?;
            s.target = Target::Pic(p);
        }

        info!("starting upgrade with {}", hexfile.display());
        s.reset(now, link);
        Ok(s)
    }

    fn load(&mut self, path: &Path) -> Result<Processor, HexError> {
        self.opened = Some(path.to_path_buf());

        let mut reader = HexReader::open(path)?;
        let image = HexImage::load(&mut reader)?;

        self.data = image.data;
        self.shadow = image.shadow;
        self.version = image.version;
        self.rows = RowCursor::new(reader);
        self.total = image.weight;
        if self.dumps() {
            self.total += 4 * WEIGHT_DATAREAD;
        }
        Ok(image.processor)
    }

    /// Whether the current EEPROM is read so settings can be carried over
    fn dumps(&self) -> bool {
        self.installed.is_some() && self.version.is_some()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn is_finished(&self) -> bool {
        self.report.is_some()
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    /// Completed share of the work in percent
    pub fn progress(&self) -> u8 {
        self.percent
    }

    /// Image file actually opened, once known
    pub fn image_path(&self) -> Option<&Path> {
        self.opened.as_deref()
    }

    /// Failsafe words derived from the bootloader's protected range
    pub fn failsafe(&self) -> [u16; 4] {
        self.failsafe
    }

    /// Feed one byte received from the PIC
    pub fn receive<L: Link, S: Subscriber>(&mut self, b: u8, now: Instant, link: &mut L, sub: &mut S) {
        if self.stage == Stage::Idle {
            return;
        }

        let lenient = self.stage == Stage::Reset;
        let packet = match self.decoder.push(b, lenient) {
            Some(p) => p,
            None => return,
        };
        self.last_rx = now;
        trace!("< {}", hex::encode(&packet.data));

        if packet.valid || lenient {
            self.handle(Some(packet.body()), link, sub);
        } else {
            debug!("bootloader checksum error");
            self.handle(None, link, sub);
        }
    }

    /// Run the response watchdog
    pub fn tick<L: Link, S: Subscriber>(&mut self, now: Instant, link: &mut L, sub: &mut S) {
        if self.stage == Stage::Idle {
            return;
        }
        if now.saturating_duration_since(self.last_rx) <= WATCHDOG {
            return;
        }

        warn!("bootloader timeout in {:?}", self.stage);
        self.last_rx = now;
        self.decoder.clear();
        // A bare newline gets the bootloader out of a half received escape
        link.send(b"\n");
        self.handle(None, link, sub);
    }

    fn reset<L: Link>(&mut self, now: Instant, link: &mut L) {
        self.stage = Stage::Reset;
        self.attempts = 0;
        self.last = None;
        self.frame.clear();
        self.decoder.clear();
        self.last_rx = now;
        link.reset_pic();
    }

    fn limit(&self) -> u16 {
        match self.stage {
            Stage::Code | Stage::Data => RETRY_LIMIT_PROGRAM,
            _ => RETRY_LIMIT,
        }
    }

    fn handle<L: Link, S: Subscriber>(&mut self, reply: Option<&[u8]>, link: &mut L, sub: &mut S) {
        let expected = self.last.map(|c| c as u8);
        let reply = match reply {
            Some(r) if self.stage == Stage::Reset && !r.is_empty() => r,
            Some(r) if r.len() >= 2 && Some(r[0]) == expected => r,
            Some(r) => {
                debug!("unexpected reply {:02x?} to {:?}", r, self.last);
                return self.retry(link, sub);
            }
            None => return self.retry(link, sub),
        };
        self.attempts = 0;

        match self.stage {
            Stage::Idle => (),
            Stage::Reset => {
                self.advance(WEIGHT_RESET, sub);
                self.send(&[Command::Version as u8, 3], link);
                self.stage = Stage::Version;
            }
            Stage::Version => self.on_version(reply, link, sub),
            Stage::Dump => self.on_dump(reply, link, sub),
            Stage::Prep => self.on_prep(reply, link, sub),
            Stage::Code => self.on_code(reply, link, sub),
            Stage::Data => self.on_data(reply, link, sub),
        }
    }

    fn retry<L: Link, S: Subscriber>(&mut self, link: &mut L, sub: &mut S) {
        self.retries += 1;
        self.attempts += 1;

        if self.attempts >= self.limit() {
            error!("no valid response after {} attempts", self.attempts);
            link.reset_pic();
            return self.finish(Err(UpgradeError::Retries), link, sub);
        }

        match self.stage {
            Stage::Idle => (),
            Stage::Reset => link.reset_pic(),
            _ => {
                debug!("repeating {:?}", self.last);
                link.send(&self.frame);
            }
        }
    }

    fn on_version<L: Link, S: Subscriber>(&mut self, reply: &[u8], link: &mut L, sub: &mut S) {
        if reply.len() < 8 {
            return self.retry(link, sub);
        }

        let device = match Processor::from_bootloader(reply[3]) {
            Some(p) => p,
            None => {
                error!("unknown bootloader version {}.{}", reply[3], reply[2]);
                return self.finish(Err(UpgradeError::Device), link, sub);
            }
        };
        info!("bootloader {}.{} on {}", reply[3], reply[2], device);

        let image = match self.target {
            Target::Pic(p) => p,
            Target::Probe => {
                let path = self
                    .locations
                    .firmware_dir
                    .join(device.dir())
                    .join(&self.hexfile);
                info!("loading {}", path.display());
                match self.load(&path) {
                    Ok(p) => {
                        self.advance(0, sub);
                        p
                    }
                    Err(e) => return self.finish(Err(e.into()), link, sub),
                }
            }
        };
        if image != device {
            error!("image is for {}, bootloader runs on {}", image, device);
            return self.finish(Err(UpgradeError::Device), link, sub);
        }

        self.device = device;
        self.protect = (
            u16::from_le_bytes([reply[4], reply[5]]),
            u16::from_le_bytes([reply[6], reply[7]]),
        );
        self.failsafe = device.failsafe(self.protect.0);
        debug!(
            "protected 0x{:04x}..0x{:04x}, failsafe {:04x?}",
            self.protect.0, self.protect.1, self.failsafe
        );
        self.advance(WEIGHT_VERSION, sub);

        if self.dumps() {
            self.pc = 0;
            self.read_data(0, link);
            self.stage = Stage::Dump;
        } else {
            self.erase(device.info().erasesize, link);
            self.stage = Stage::Prep;
        }
    }

    fn on_dump<L: Link, S: Subscriber>(&mut self, reply: &[u8], link: &mut L, sub: &mut S) {
        let n = PAGE_BYTES as usize;
        if reply.len() < 4 + n {
            return self.retry(link, sub);
        }

        let base = self.pc as usize;
        for (i, old) in reply[4..4 + n].iter().enumerate() {
            let a = base + i;
            // Bytes the image leaves undefined keep their current value
            if self.data[a] == self.shadow[a] {
                self.data[a] = *old;
            }
            self.shadow[a] = *old;
        }
        self.advance(WEIGHT_DATAREAD, sub);

        self.pc += PAGE_BYTES;
        if self.pc < self.device.info().datasize {
            self.read_data(self.pc, link);
            return;
        }

        if let (Some(old), Some(new)) = (&self.installed, &self.version) {
            let path = self.locations.firmware_dir.join(&self.locations.transfer_file);
            info!("transferring settings from {} to {}", old, new);
            let old = TransferTable::load(&path, old);
            let new = TransferTable::load(&path, new);
            transfer_settings(&old, &new, &self.shadow, &mut self.data);
        }

        self.erase(self.device.info().erasesize, link);
        self.stage = Stage::Prep;
    }

    fn on_prep<L: Link, S: Subscriber>(&mut self, reply: &[u8], link: &mut L, sub: &mut S) {
        let addr = self.device.info().erasesize;
        match self.last {
            Some(Command::EraseProg) => {
                let words = self.failsafe;
                self.write_code(addr, &words, link);
            }
            Some(Command::WriteProg) => self.read_code(addr, 4, link),
            Some(Command::ReadProg) => {
                let words = self.failsafe;
                if verify_code(reply, addr, &words) {
                    self.failures = 0;
                    self.advance(WEIGHT_CODEPROG, sub);
                    // The old firmware is gone from here on
                    self.installed = None;
                    self.rows.rewind();
                    self.next_row(link, sub);
                } else if self.mismatch(link, sub) {
                    self.erase(addr, link);
                }
            }
            _ => self.retry(link, sub),
        }
    }

    fn on_code<L: Link, S: Subscriber>(&mut self, reply: &[u8], link: &mut L, sub: &mut S) {
        match self.last {
            Some(Command::EraseProg) => {
                let words = self.row;
                self.write_code(self.pc, &words, link);
            }
            Some(Command::WriteProg) => self.read_code(self.pc, ROW_WORDS as u8, link),
            Some(Command::ReadProg) => {
                let words = self.row;
                if verify_code(reply, self.pc, &words) {
                    self.failures = 0;
                    self.advance(WEIGHT_CODEPROG, sub);
                    self.next_row(link, sub);
                } else if self.mismatch(link, sub) {
                    self.erase(self.pc, link);
                }
            }
            _ => self.retry(link, sub),
        }
    }

    /// Erase the next row of the image that is not owned by the bootloader
    fn next_row<L: Link, S: Subscriber>(&mut self, link: &mut L, sub: &mut S) {
        let info = self.device.info();
        let (start, end) = (self.protect.0 as u32, self.protect.1 as u32);

        loop {
            match self.rows.next_row(&mut self.row) {
                Err(e) => return self.finish(Err(e.into()), link, sub),
                Ok(Some(addr)) if addr < info.codesize as u32 => {
                    if addr + ROW_WORDS as u32 - 1 >= start && addr <= end {
                        debug!("skipping protected row 0x{:04x}", addr);
                        continue;
                    }
                    self.pc = addr as u16;
                    self.erase(self.pc, link);
                    self.stage = Stage::Code;
                    return;
                }
                Ok(_) => break,
            }
        }

        self.pc = 0;
        self.stage = Stage::Data;
        self.next_page(link, sub);
    }

    fn on_data<L: Link, S: Subscriber>(&mut self, reply: &[u8], link: &mut L, sub: &mut S) {
        match self.last {
            Some(Command::WriteData) => self.read_data(self.pc, link),
            Some(Command::ReadData) => {
                if self.verify_data(reply) {
                    self.failures = 0;
                    self.advance(WEIGHT_DATAPROG, sub);
                    self.pc += PAGE_BYTES;
                    self.next_page(link, sub);
                } else if self.mismatch(link, sub) && !self.write_data(self.pc, link) {
                    self.next_page(link, sub);
                }
            }
            _ => self.retry(link, sub),
        }
    }

    /// Write the next EEPROM page with differences, or finish
    fn next_page<L: Link, S: Subscriber>(&mut self, link: &mut L, sub: &mut S) {
        while self.pc < self.device.info().datasize {
            if self.write_data(self.pc, link) {
                return;
            }
            self.pc += PAGE_BYTES;
        }
        self.finish(Ok(()), link, sub);
    }

    /// Count a failed verification, returns false if the session gave up
    fn mismatch<L: Link, S: Subscriber>(&mut self, link: &mut L, sub: &mut S) -> bool {
        self.mismatches += 1;
        self.failures += 1;
        warn!("verification failed at 0x{:04x} in {:?}", self.pc, self.stage);

        if self.failures >= self.limit() {
            self.finish(Err(UpgradeError::Mismatches), link, sub);
            return false;
        }
        true
    }

    fn verify_data(&mut self, reply: &[u8]) -> bool {
        let n = PAGE_BYTES as usize;
        if reply.len() < 4 + n || reply[2] != self.pc as u8 {
            return false;
        }

        let base = self.pc as usize;
        let mut ok = true;
        for (i, b) in reply[4..4 + n].iter().enumerate() {
            let a = base + i;
            if self.data[a] != self.shadow[a] {
                if *b != self.data[a] {
                    ok = false;
                }
                self.shadow[a] = *b;
            }
        }
        ok
    }

    fn finish<L: Link, S: Subscriber>(&mut self, result: Result<(), UpgradeError>, link: &mut L, sub: &mut S) {
        // A hardware reset already happened when the retries ran out
        if self.stage != Stage::Idle && result != Err(UpgradeError::Retries) {
            self.send(&[Command::Reset as u8, 0], link);
        }
        self.stage = Stage::Idle;

        if result.is_ok() {
            self.done = self.total;
            self.advance(0, sub);
        }

        let report = Report { result, mismatches: self.mismatches, retries: self.retries };
        match &report.result {
            Ok(()) => info!("upgrade {}", report),
            Err(_) => error!("upgrade {}", report),
        }
        sub.notify(&Event::UpgradeFinished(report.clone()));
        self.report = Some(report);
    }

    fn advance<S: Subscriber>(&mut self, weight: u32, sub: &mut S) {
        self.done = (self.done + weight).min(self.total);
        let pct = (self.done * 100 / self.total.max(1)) as u8;
        if pct != self.percent {
            self.percent = pct;
            sub.notify(&Event::Progress(pct));
        }
    }

    fn send<L: Link>(&mut self, message: &[u8], link: &mut L) {
        self.last = Command::from_code(message[0]);
        self.frame = protocol::encode(message);
        trace!("> {}", hex::encode(&self.frame));
        link.send(&self.frame);
    }

    fn erase<L: Link>(&mut self, addr: u16, link: &mut L) {
        let [lo, hi] = addr.to_le_bytes();
        self.send(&[Command::EraseProg as u8, 1, lo, hi], link);
    }

    fn read_code<L: Link>(&mut self, addr: u16, words: u8, link: &mut L) {
        let [lo, hi] = addr.to_le_bytes();
        self.send(&[Command::ReadProg as u8, words, lo, hi], link);
    }

    /// Trailing erased words are not sent. Block write processors take a
    /// whole number of groups and count groups rather than words.
    fn write_code<L: Link>(&mut self, addr: u16, words: &[u16], link: &mut L) {
        let info = self.device.info();
        let mut size = words
            .iter()
            .rposition(|w| w & 0x3fff != 0x3fff)
            .map(|n| n + 1)
            .unwrap_or(0);

        let count = if info.blockwrite {
            let group = info.groupsize as usize;
            let groups = (size + group - 1) / group;
            size = (groups * group).min(words.len());
            groups
        } else {
            size
        };

        let [lo, hi] = addr.to_le_bytes();
        let mut message = vec![Command::WriteProg as u8, count as u8, lo, hi];
        for w in &words[..size] {
            message.extend_from_slice(&(w & 0x3fff).to_le_bytes());
        }
        self.send(&message, link);
    }

    fn read_data<L: Link>(&mut self, addr: u16, link: &mut L) {
        let [lo, hi] = addr.to_le_bytes();
        self.send(&[Command::ReadData as u8, PAGE_BYTES as u8, lo, hi], link);
    }

    /// Write the span of the page at `addr` that differs from the EEPROM.
    /// Returns false when the page already matches.
    fn write_data<L: Link>(&mut self, addr: u16, link: &mut L) -> bool {
        let start = addr as usize;
        let end = (start + PAGE_BYTES as usize).min(self.device.info().datasize as usize);
        let differs = |a: &usize| self.data[*a] != self.shadow[*a];

        let first = match (start..end).find(differs) {
            Some(a) => a,
            None => return false,
        };
        let last = (start..end).rev().find(differs).unwrap_or(first);

        let [lo, hi] = (first as u16).to_le_bytes();
        let mut message = vec![Command::WriteData as u8, (last - first + 1) as u8, lo, hi];
        message.extend_from_slice(&self.data[first..=last]);
        self.send(&message, link);
        true
    }
}

/// Check a READPROG reply against the words that were written
fn verify_code(reply: &[u8], addr: u16, words: &[u16]) -> bool {
    let count = reply[1] as usize;
    if count != words.len()
        || reply.len() < 4 + 2 * count
        || u16::from_le_bytes([reply[2], reply[3]]) != addr
    {
        return false;
    }

    reply[4..4 + 2 * count]
        .chunks(2)
        .zip(words)
        .all(|(r, w)| u16::from_le_bytes([r[0], r[1]]) == w & 0x3fff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<Vec<u8>>,
        resets: usize,
    }

    impl Link for Recorder {
        fn send(&mut self, bytes: &[u8]) {
            self.sent.push(bytes.to_vec());
        }
        fn reset_pic(&mut self) {
            self.resets += 1;
        }
    }

    fn reply(up: &mut Upgrade, link: &mut Recorder, body: &[u8], now: Instant) {
        let mut events = Vec::new();
        let mut sub = |e: &Event| events.push(e.clone());
        for b in protocol::encode(body) {
            up.receive(b, now, link, &mut sub);
        }
    }

    #[test]
    fn unknown_bootloader_fails() {
        let now = Instant::now();
        let mut link = Recorder::default();
        let mut up =
            Upgrade::start(Path::new("gateway.hex"), None, Locations::default(), now, &mut link).unwrap();
        assert_eq!(up.stage(), Stage::Reset);
        assert_eq!(up.target(), Target::Probe);
        assert_eq!(link.resets, 1);

        reply(&mut up, &mut link, &[0x00, 0x00], now);
        assert_eq!(up.stage(), Stage::Version);
        assert_eq!(link.sent.last().unwrap(), &protocol::encode(&[0x00, 0x03]));

        reply(&mut up, &mut link, &[0x00, 0x03, 0x00, 0x07, 0x00, 0x0f, 0xff, 0x0f], now);
        assert_eq!(up.stage(), Stage::Idle);
        assert_eq!(up.report().unwrap().result, Err(UpgradeError::Device));
        assert_eq!(link.sent.last().unwrap(), &protocol::encode(&[0x08, 0x00]));
    }

    #[test]
    fn missing_image_reported() {
        let now = Instant::now();
        let mut link = Recorder::default();
        let r = Upgrade::start(
            Path::new("/nonexistent/gateway.hex"),
            None,
            Locations::default(),
            now,
            &mut link,
        );
        assert_eq!(r.err(), Some(UpgradeError::Hex(HexError::Access)));
        assert_eq!(link.resets, 0);
    }

    #[test]
    fn watchdog_retries_then_gives_up() {
        let t0 = Instant::now();
        let mut link = Recorder::default();
        let mut sub = crate::event::Discard;
        let mut up =
            Upgrade::start(Path::new("gateway.hex"), None, Locations::default(), t0, &mut link).unwrap();

        up.tick(t0 + Duration::from_millis(900), &mut link, &mut sub);
        assert_eq!(link.resets, 1);

        let mut t = t0;
        for _ in 0..9 {
            t += Duration::from_millis(1001);
            up.tick(t, &mut link, &mut sub);
        }
        assert_eq!(up.stage(), Stage::Reset);
        assert_eq!(link.resets, 10);

        t += Duration::from_millis(1001);
        up.tick(t, &mut link, &mut sub);
        let report = up.report().unwrap();
        assert_eq!(report.result, Err(UpgradeError::Retries));
        assert_eq!(report.retries, 10);
        // One final hardware reset and no reset command
        assert_eq!(link.resets, 11);
        assert!(link.sent.iter().all(|f| f.as_slice() == b"\n"));
    }

    #[test]
    fn code_verification() {
        let words = [0x3fff, 0x1234];
        assert!(verify_code(&[0x01, 2, 0x20, 0x00, 0xff, 0x3f, 0x34, 0x12], 0x20, &words));
        assert!(!verify_code(&[0x01, 2, 0x20, 0x00, 0xff, 0x3f, 0x35, 0x12], 0x20, &words));
        assert!(!verify_code(&[0x01, 2, 0x40, 0x00, 0xff, 0x3f, 0x34, 0x12], 0x20, &words));
        assert!(!verify_code(&[0x01, 2, 0x20, 0x00, 0xff], 0x20, &words));
    }

    #[test]
    fn report_text() {
        let r = Report { result: Err(UpgradeError::Device), mismatches: 1, retries: 2 };
        assert_eq!(
            r.to_string(),
            "failed: firmware image does not match the processor (1 mismatches, 2 retries)"
        );
    }
}
