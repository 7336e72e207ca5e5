//! Notifications fanned out to subscribers, and their publish form.

use std::time::Instant;

use crate::banner::Firmware;
use crate::programmer::Report;
use crate::state::View;
use crate::value::Value;

/// Coarse liveness indicators derived from the trace
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Liveness {
    BoilerPresent,
    ThermostatPresent,
    /// The gateway is injecting requests or answers
    GatewayActive,
    /// The PIC is talking but not reporting frames
    PowerSave,
}

impl Liveness {
    pub fn name(self) -> &'static str {
        match self {
            Liveness::BoilerPresent => "boiler_connected",
            Liveness::ThermostatPresent => "thermostat_connected",
            Liveness::GatewayActive => "gateway_mode",
            Liveness::PowerSave => "power_save",
        }
    }
}

/// A value changed in the state store
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Change {
    pub view: View,
    pub id: u8,
    pub value: Value,
    pub seq: u32,
    pub at: Instant,
}

#[derive(Clone, PartialEq, Debug)]
pub enum Event {
    Changed(Change),
    Liveness { flag: Liveness, active: bool },
    /// Response to a non-silent command
    Response { command: String, reply: String },
    /// Text the PIC printed outside of the trace
    Log(String),
    FirmwareDetected { firmware: Firmware, version: String },
    /// Programmer progress in percent
    Progress(u8),
    UpgradeFinished(Report),
    /// Settings changed and have been quiet long enough to be persisted
    FlushSettings,
}

/// Message for the publish/subscribe transport
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Record {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl Event {
    /// Render as a publish record under `prefix`, if the event is published
    pub fn record(&self, prefix: &str) -> Option<Record> {
        let r = match self {
            Event::Changed(c) => {
                let desc = crate::dictionary::lookup(c.id);
                let label = if desc.is_defined() {
                    desc.label.to_string()
                } else {
                    format!("id{}", c.id)
                };
                let payload = if desc.unit.is_empty() {
                    c.value.to_string()
                } else {
                    format!("{} {}", c.value, desc.unit)
                };
                Record {
                    topic: format!("{}/value/{}/{}", prefix, c.view.name(), label),
                    payload,
                    retain: true,
                }
            }
            Event::Liveness { flag, active } => Record {
                topic: format!("{}/status/{}", prefix, flag.name()),
                payload: if *active { "ON" } else { "OFF" }.to_string(),
                retain: true,
            },
            Event::Response { command, reply } => Record {
                topic: format!("{}/response", prefix),
                payload: format!("{} -> {}", command, reply),
                retain: false,
            },
            Event::FirmwareDetected { firmware, version } => Record {
                topic: format!("{}/status/firmware", prefix),
                payload: format!("{} {}", firmware.name(), version),
                retain: true,
            },
            Event::Progress(pct) => Record {
                topic: format!("{}/upgrade/progress", prefix),
                payload: pct.to_string(),
                retain: false,
            },
            Event::UpgradeFinished(report) => Record {
                topic: format!("{}/upgrade/result", prefix),
                payload: report.to_string(),
                retain: false,
            },
            Event::Log(_) | Event::FlushSettings => return None,
        };
        Some(r)
    }
}

/// Receiver of gateway events
pub trait Subscriber {
    fn notify(&mut self, event: &Event);
}

impl<F: FnMut(&Event)> Subscriber for F {
    fn notify(&mut self, event: &Event) {
        self(event)
    }
}

/// Subscriber that drops everything
pub struct Discard;

impl Subscriber for Discard {
    fn notify(&mut self, _event: &Event) {}
}
