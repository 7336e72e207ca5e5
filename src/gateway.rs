//! The gateway event loop: owns the serial port and routes its traffic.
//!
//! In normal operation every complete line from the PIC is classified as a
//! trace frame, a command reply or free text, and queued commands are
//! written out one at a time. While an upgrade runs the programmer owns the
//! port; raw bytes go to it and no commands are sent.

use core::marker::PhantomData;
use std::path::Path;
use std::time::{Duration, Instant};

use embedded_hal::blocking::delay::DelayMs;

use crate::banner::{BannerMatcher, Firmware};
use crate::classifier::Classifier;
use crate::dispatcher::{Callback, CommandError, CommandQueue, Handle, Outcome, Submit};
use crate::event::{Event, Subscriber};
use crate::frame::{parse_line, Line};
use crate::programmer::{Heartbeat, Link, Locations, Upgrade, UpgradeError};
use crate::settings::SettingsFlush;
use crate::state::StateStore;
use crate::value::Value;
use crate::{Error, Options, SerialPort};

/// Longest line kept from the PIC, anything beyond is dropped
pub const LINE_MAX: usize = 128;

pub struct Gateway<P, D, E> {
    port: P,
    delay: D,
    options: Options,
    line: Vec<u8>,
    classifier: Classifier,
    queue: CommandQueue,
    upgrade: Option<Upgrade>,
    banner: BannerMatcher,
    settings: SettingsFlush,
    heartbeat: Box<dyn Heartbeat>,
    _err: PhantomData<E>,
}

/// Transmit path handed to the programmer
struct PortLink<'a, P, D, E> {
    port: &'a mut P,
    delay: &'a mut D,
    pulse_ms: u32,
    _err: PhantomData<E>,
}

impl<'a, P, D, E> Link for PortLink<'a, P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    fn send(&mut self, bytes: &[u8]) {
        if let Err(e) = write_all(self.port, bytes) {
            error!("serial write failed: {:?}", e);
        }
    }

    fn reset_pic(&mut self) {
        debug!("resetting PIC");

        // Firmware that still runs restarts itself on request
        self.send(b"GW=R\r");

        if let Err(e) = self.port.set_reset(true) {
            error!("unable to assert reset: {:?}", e);
            return;
        }
        self.delay.delay_ms(self.pulse_ms);
        if let Err(e) = self.port.set_reset(false) {
            error!("unable to release reset: {:?}", e);
        }
    }
}

fn write_all<P: SerialPort<E>, E>(port: &mut P, bytes: &[u8]) -> Result<(), E> {
    for b in bytes {
        block!(port.write(*b))?;
    }
    block!(port.flush())?;
    Ok(())
}

impl<P, D, E> Gateway<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new gateway instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        let deadline = Duration::from_millis(options.command_timeout_ms as u64);
        let presence = Duration::from_secs(options.presence_timeout_s as u64);
        let quiet = Duration::from_millis(options.settings_quiet_ms as u64);

        Self {
            port,
            delay,
            line: Vec::with_capacity(LINE_MAX),
            classifier: Classifier::new(presence),
            queue: CommandQueue::new(deadline, options.command_retries),
            upgrade: None,
            banner: BannerMatcher::new(),
            settings: SettingsFlush::new(quiet),
            heartbeat: Box::new(()),
            options,
            _err: PhantomData,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Hook to call while an upgrade keeps the loop busy
    pub fn set_heartbeat(&mut self, heartbeat: Box<dyn Heartbeat>) {
        self.heartbeat = heartbeat;
    }

    pub fn state(&self) -> &StateStore {
        self.classifier.store()
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Firmware the PIC announced most recently
    pub fn firmware(&self) -> Option<(Firmware, &str)> {
        self.banner.current()
    }

    /// The running upgrade session, if any
    pub fn upgrade(&self) -> Option<&Upgrade> {
        self.upgrade.as_ref()
    }

    /// Commands waiting or in flight
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Run one iteration of the loop: at most one line from the PIC, then
    /// timers, then the next due command.
    pub fn poll<S: Subscriber>(&mut self, now: Instant, sub: &mut S) -> Result<(), Error<E>> {
        self.read_serial(now, sub)?;

        if self.upgrade.is_some() {
            self.run_upgrade(now, sub);
            return Ok(());
        }

        self.classifier.tick(now, sub);

        let (bytes, outcome) = self.queue.poll(now);
        if let Some(o) = outcome {
            self.deliver(o, sub);
        }
        if let Some(b) = bytes {
            trace!("> {}", String::from_utf8_lossy(&b).trim_end());
            write_all(&mut self.port, &b)?;
        }

        if self.settings.tick(now) {
            debug!("flushing settings");
            sub.notify(&Event::FlushSettings);
        }

        Ok(())
    }

    fn read_serial<S: Subscriber>(&mut self, now: Instant, sub: &mut S) -> Result<(), Error<E>> {
        loop {
            let b = match self.port.read() {
                Ok(b) => b,
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(Error::Serial(e)),
            };

            if let Some(up) = self.upgrade.as_mut() {
                let mut link = PortLink {
                    port: &mut self.port,
                    delay: &mut self.delay,
                    pulse_ms: self.options.reset_pulse_ms,
                    _err: PhantomData,
                };
                up.receive(b, now, &mut link, sub);
                if up.is_finished() {
                    return Ok(());
                }
                continue;
            }

            match b {
                b'\r' | b'\n' if self.line.is_empty() => (),
                b'\r' | b'\n' => {
                    let line = String::from_utf8_lossy(&self.line).into_owned();
                    self.line.clear();
                    self.handle_line(&line, now, sub);
                    return Ok(());
                }
                _ if self.line.len() < LINE_MAX => self.line.push(b),
                _ => (),
            }
        }
    }

    fn handle_line<S: Subscriber>(&mut self, text: &str, now: Instant, sub: &mut S) {
        self.classifier.saw_line(now);

        match parse_line(text, now) {
            Line::Frame(frame) => {
                self.classifier.process(&frame, sub);
            }
            Line::ParityError { frame, text } => {
                debug!("PIC reported {}", text);
                self.classifier.process(&frame, sub);
            }
            Line::Reply(reply) => match self.queue.on_reply(&reply) {
                Some(o) => self.deliver(o, sub),
                None => debug!("unsolicited reply {:?}", reply),
            },
            Line::Text(text) => {
                info!("PIC: {}", text);
                if let Some((firmware, version)) = self.banner.feed_line(text) {
                    sub.notify(&Event::FirmwareDetected { firmware, version });
                }
                sub.notify(&Event::Log(text.to_string()));
            }
        }
    }

    fn deliver<S: Subscriber>(&mut self, o: Outcome, sub: &mut S) {
        match &o.result {
            Ok(value) => {
                debug!("{} -> {}", o.command, value);
                if !o.silent {
                    sub.notify(&Event::Response {
                        command: o.command.to_string(),
                        reply: value.clone(),
                    });
                }
            }
            Err(e) => warn!("{} failed: {}", o.command, e),
        }
    }

    fn run_upgrade<S: Subscriber>(&mut self, now: Instant, sub: &mut S) {
        self.heartbeat.beat();

        let up = match self.upgrade.as_mut() {
            Some(up) => up,
            None => return,
        };
        let mut link = PortLink {
            port: &mut self.port,
            delay: &mut self.delay,
            pulse_ms: self.options.reset_pulse_ms,
            _err: PhantomData,
        };
        up.tick(now, &mut link, sub);

        if up.is_finished() {
            // The PIC restarts and announces its firmware again
            self.upgrade = None;
            self.banner.clear();
            self.line.clear();
        }
    }

    /// Queue a command such as `TT=19.5`
    pub fn send_command(
        &mut self,
        text: &str,
        now: Instant,
        callback: Option<Callback>,
    ) -> Result<Handle, CommandError> {
        self.queue.enqueue(text, now, callback)
    }

    pub fn send_command_with(
        &mut self,
        text: &str,
        submit: Submit,
        now: Instant,
        callback: Option<Callback>,
    ) -> Result<Handle, CommandError> {
        self.queue.enqueue_with(text, submit, now, callback)
    }

    /// Cancel a command that has not been transmitted yet
    pub fn cancel_command(&mut self, handle: Handle) -> Result<(), CommandError> {
        self.queue.cancel(handle)
    }

    /// Start reprogramming the PIC with `hexfile`
    pub fn start_upgrade(&mut self, hexfile: &Path, now: Instant) -> Result<(), UpgradeError> {
        if self.upgrade.is_some() {
            return Err(UpgradeError::InProgress);
        }

        let installed = self.banner.gateway_version().map(String::from);
        let locations = Locations {
            firmware_dir: self.options.firmware_dir.clone(),
            transfer_file: self.options.transfer_file.clone(),
        };
        let mut link = PortLink {
            port: &mut self.port,
            delay: &mut self.delay,
            pulse_ms: self.options.reset_pulse_ms,
            _err: PhantomData,
        };

        let up = Upgrade::start(hexfile, installed, locations, now, &mut link)?;
        self.line.clear();
        self.upgrade = Some(up);
        Ok(())
    }

    /// Store telemetry the gateway hardware measured itself
    pub fn observe_local<S: Subscriber>(&mut self, id: u8, value: Value, now: Instant, sub: &mut S) -> bool {
        self.classifier.observe_local(id, value, now, sub)
    }

    /// Note that a setting changed and should be persisted
    pub fn mark_settings_dirty(&mut self, now: Instant) {
        self.settings.mark_dirty(now);
    }

    /// Fail every pending command with `Aborted`
    pub fn shutdown<S: Subscriber>(&mut self, sub: &mut S) {
        let aborted = self.queue.abort_all();
        if !aborted.is_empty() {
            info!("aborting {} pending commands", aborted.len());
        }
        for o in aborted {
            self.deliver(o, sub);
        }
    }
}
