//! Bounded, retrying queue of commands for the PIC.
//!
//! The PIC answers commands strictly in order, so at most one command is
//! in flight and every reply belongs to it. A negative reply or a missed
//! deadline costs one retry; the next attempt is scheduled with an
//! exponentially growing backoff counted from the previous transmission,
//! capped so a command always settles within `retries + 1` deadlines of
//! its first transmission.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::frame::{Command, CommandFormatError, ErrorToken, Reply};

/// Maximum number of queued commands, including the one in flight
pub const CMDQUEUE_MAX: usize = 20;

pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(1000);
pub const DEFAULT_RETRIES: u8 = 3;

#[derive(Clone, PartialEq, Debug, Error)]
pub enum CommandError {
    #[error("command queue full")]
    QueueFull,
    #[error("invalid command: {0}")]
    Invalid(#[from] CommandFormatError),
    #[error("rejected by PIC: {0}")]
    Rejected(ErrorToken),
    #[error("no response from PIC")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
    #[error("aborted")]
    Aborted,
    #[error("command already sent")]
    InFlight,
    #[error("no such command")]
    NotFound,
}

pub type Callback = Box<dyn FnOnce(Result<String, CommandError>)>;

/// Identifies a queued command
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Handle(u32);

/// Per command settings
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Submit {
    pub retries: u8,
    /// Do not echo the reply as telemetry
    pub silent: bool,
}

/// Final state of a command
#[derive(Clone, PartialEq, Debug)]
pub struct Outcome {
    pub handle: Handle,
    pub command: Command,
    pub silent: bool,
    pub result: Result<String, CommandError>,
}

struct Entry {
    handle: Handle,
    order: u64,
    command: Command,
    budget: u8,
    remaining: u8,
    /// First transmission, the retries all fit in `budget + 1` deadlines from here
    first: Option<Instant>,
    due: Instant,
    backoff: Duration,
    silent: bool,
    callback: Option<Callback>,
}

#[derive(Copy, Clone)]
struct InFlight {
    handle: Handle,
    sent: Instant,
}

pub struct CommandQueue {
    entries: Vec<Entry>,
    in_flight: Option<InFlight>,
    deadline: Duration,
    retries: u8,
    next_handle: u32,
    next_order: u64,
}

impl CommandQueue {
    pub fn new(deadline: Duration, retries: u8) -> Self {
        Self {
            entries: Vec::with_capacity(CMDQUEUE_MAX),
            in_flight: None,
            deadline,
            retries: retries.max(1),
            next_handle: 0,
            next_order: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A command has been transmitted and awaits its reply
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Queue a command with the default retry budget
    pub fn enqueue(
        &mut self,
        text: &str,
        now: Instant,
        callback: Option<Callback>,
    ) -> Result<Handle, CommandError> {
        let submit = Submit { retries: self.retries, silent: false };
        self.enqueue_with(text, submit, now, callback)
    }

    pub fn enqueue_with(
        &mut self,
        text: &str,
        submit: Submit,
        now: Instant,
        callback: Option<Callback>,
    ) -> Result<Handle, CommandError> {
        let command = Command::parse(text)?;

        if self.entries.len() >= CMDQUEUE_MAX {
            warn!("command queue full, dropping {}", command);
            return Err(CommandError::QueueFull);
        }

        let handle = Handle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);

        debug!("queue {} ({} pending)", command, self.entries.len());

        self.entries.push(Entry {
            handle,
            order: self.next_order,
            command,
            budget: submit.retries.max(1),
            remaining: submit.retries.max(1),
            first: None,
            due: now,
            backoff: self.deadline,
            silent: submit.silent,
            callback,
        });
        self.next_order += 1;

        Ok(handle)
    }

    /// Drop a command that is not currently awaiting its reply
    pub fn cancel(&mut self, handle: Handle) -> Result<(), CommandError> {
        if self.in_flight.map(|f| f.handle) == Some(handle) {
            return Err(CommandError::InFlight);
        }
        let i = self.position(handle).ok_or(CommandError::NotFound)?;
        let entry = self.entries.remove(i);
        debug!("cancelled {}", entry.command);
        Self::finish(entry, Err(CommandError::Cancelled));
        Ok(())
    }

    /// Check the deadline of the command in flight, then hand out the next
    /// due command for transmission.
    pub fn poll(&mut self, now: Instant) -> (Option<Vec<u8>>, Option<Outcome>) {
        let mut outcome = None;

        if let Some(f) = self.in_flight {
            if now.saturating_duration_since(f.sent) < self.deadline {
                return (None, None);
            }
            debug!("command timed out");
            outcome = self.attempt_failed(CommandError::Timeout);
        }

        let next = self
            .entries
            .iter()
            .filter(|e| e.due <= now)
            .min_by_key(|e| (e.due, e.order))
            .map(|e| e.handle);

        let i = match next.and_then(|h| self.position(h)) {
            Some(i) => i,
            None => return (None, outcome),
        };

        let entry = &mut self.entries[i];
        trace!("send {}", entry.command);
        entry.first.get_or_insert(now);
        self.in_flight = Some(InFlight { handle: entry.handle, sent: now });

        (Some(entry.command.encode()), outcome)
    }

    /// Attribute a reply line to the command in flight
    pub fn on_reply(&mut self, reply: &Reply) -> Option<Outcome> {
        let f = self.in_flight?;
        let i = self.position(f.handle)?;

        match reply {
            Reply::Ack { key, value } => {
                if *key != self.entries[i].command.key() {
                    debug!("ignoring reply for {}", String::from_utf8_lossy(key));
                    return None;
                }
                self.in_flight = None;
                let entry = self.entries.remove(i);
                Some(Self::finish(entry, Ok(value.clone())))
            }
            Reply::Error(token) => {
                debug!("{} rejected: {}", self.entries[i].command, token);
                self.attempt_failed(CommandError::Rejected(*token))
            }
        }
    }

    /// Fail every queued command, used on shutdown
    pub fn abort_all(&mut self) -> Vec<Outcome> {
        self.in_flight = None;
        self.entries
            .drain(..)
            .map(|e| Self::finish(e, Err(CommandError::Aborted)))
            .collect()
    }

    fn position(&self, handle: Handle) -> Option<usize> {
        self.entries.iter().position(|e| e.handle == handle)
    }

    fn attempt_failed(&mut self, reason: CommandError) -> Option<Outcome> {
        let f = self.in_flight.take()?;
        let i = self.position(f.handle)?;

        let entry = &mut self.entries[i];
        entry.remaining -= 1;
        if entry.remaining > 0 {
            // Leave one deadline for each remaining attempt
            let first = entry.first.unwrap_or(f.sent);
            let latest = first + self.deadline * (entry.budget - entry.remaining + 1) as u32;
            entry.due = (f.sent + entry.backoff).min(latest);
            entry.backoff = entry.backoff.saturating_mul(2);
            debug!("retry {} ({} left)", entry.command, entry.remaining);
            return None;
        }

        let entry = self.entries.remove(i);
        warn!("{} failed: {}", entry.command, reason);
        Some(Self::finish(entry, Err(reason)))
    }

    fn finish(mut entry: Entry, result: Result<String, CommandError>) -> Outcome {
        if let Some(cb) = entry.callback.take() {
            cb(result.clone());
        }
        Outcome { handle: entry.handle, command: entry.command, silent: entry.silent, result }
    }
}
