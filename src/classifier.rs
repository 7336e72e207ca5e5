//! Routes decoded frames into the state store and derives liveness.

use std::time::{Duration, Instant};

use crate::dictionary::{self, ID_PULSE_COUNTER, ID_TEMPERATURE_PROBE};
use crate::event::{Change, Event, Liveness, Subscriber};
use crate::frame::{Direction, Frame, MessageType, Source};
use crate::state::{StateStore, Update, View};
use crate::value::Value;

/// Parity error statistics, one counter per side of the link
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct ErrorCounters {
    /// Boiler side (`B` lines and slave responses reported on `E` lines)
    pub error01: u32,
    /// Thermostat side (`T` lines and master requests reported on `E` lines)
    pub error02: u32,
    /// Requests injected by the gateway
    pub error03: u32,
    /// Answers injected by the gateway
    pub error04: u32,
}

impl ErrorCounters {
    fn count(&mut self, frame: &Frame) {
        let counter = match frame.source {
            Source::Boiler => &mut self.error01,
            Source::Thermostat => &mut self.error02,
            Source::Request => &mut self.error03,
            Source::Answer => &mut self.error04,
            Source::Error if frame.msg_type.is_response() => &mut self.error01,
            Source::Error => &mut self.error02,
        };
        *counter += 1;
    }

    pub fn total(&self) -> u32 {
        self.error01 + self.error02 + self.error03 + self.error04
    }
}

const FLAGS: [Liveness; 4] = [
    Liveness::BoilerPresent,
    Liveness::ThermostatPresent,
    Liveness::GatewayActive,
    Liveness::PowerSave,
];

#[derive(Default)]
struct Presence {
    boiler: Option<Instant>,
    thermostat: Option<Instant>,
    gateway: Option<Instant>,
    /// Last frame of any kind, or the first line if no frame was seen yet
    frame: Option<Instant>,
    line: Option<Instant>,
}

pub struct Classifier {
    store: StateStore,
    errors: ErrorCounters,
    malformed: u32,
    timeout: Duration,
    presence: Presence,
    flags: [bool; 4],
}

impl Classifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            store: StateStore::new(),
            errors: ErrorCounters::default(),
            malformed: 0,
            timeout,
            presence: Presence::default(),
            flags: [false; 4],
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn errors(&self) -> ErrorCounters {
        self.errors
    }

    /// Number of frames dropped because their payload did not decode
    pub fn malformed(&self) -> u32 {
        self.malformed
    }

    pub fn liveness(&self, flag: Liveness) -> bool {
        let i = FLAGS.iter().position(|f| *f == flag).unwrap_or(0);
        self.flags[i]
    }

    /// Note that a line of any kind arrived from the PIC
    pub fn saw_line(&mut self, now: Instant) {
        self.presence.line = Some(now);
        if self.presence.frame.is_none() {
            self.presence.frame = Some(now);
        }
    }

    /// Classify one frame, updating the store and notifying on change
    pub fn process<S: Subscriber>(&mut self, frame: &Frame, sub: &mut S) -> Option<Change> {
        let now = frame.received;
        self.presence.frame = Some(now);

        let view = match View::from_direction(frame.direction) {
            Some(v) => v,
            None => {
                self.errors.count(frame);
                debug!("parity error on {} (total {})", frame, self.errors.total());
                return None;
            }
        };

        match frame.direction {
            Direction::SlaveToMaster => self.presence.boiler = Some(now),
            Direction::MasterToSlave => self.presence.thermostat = Some(now),
            _ => self.presence.gateway = Some(now),
        }
        self.refresh(now, sub);

        let desc = dictionary::lookup(frame.id);
        let anomalous = !desc.kind.permits(frame.msg_type);
        if anomalous {
            debug!("{:?} for data-id {} ({:?})", frame.msg_type, frame.id, desc.kind);
        }

        let value = match Value::decode(desc.encoding, frame.hb, frame.lb) {
            Ok(v) => v,
            Err(e) => {
                self.malformed += 1;
                warn!("malformed {}: {}", frame, e);
                return None;
            }
        };

        self.store_value(view, frame.id, value, frame.msg_type, anomalous, now, sub)
    }

    /// Store telemetry measured by the gateway itself (pulse counter,
    /// temperature probe). Other ids are refused.
    pub fn observe_local<S: Subscriber>(
        &mut self,
        id: u8,
        value: Value,
        now: Instant,
        sub: &mut S,
    ) -> bool {
        if id != ID_PULSE_COUNTER && id != ID_TEMPERATURE_PROBE {
            return false;
        }
        self.store_value(View::GatewayAnswer, id, value, MessageType::ReadAck, false, now, sub);
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn store_value<S: Subscriber>(
        &mut self,
        view: View,
        id: u8,
        value: Value,
        msg_type: MessageType,
        anomalous: bool,
        now: Instant,
        sub: &mut S,
    ) -> Option<Change> {
        match self.store.update(view, id, value, msg_type, anomalous, now) {
            Update::Changed { seq } => {
                let change = Change { view, id, value, seq, at: now };
                sub.notify(&Event::Changed(change));
                Some(change)
            }
            Update::Unchanged => None,
        }
    }

    /// Expire liveness flags
    pub fn tick<S: Subscriber>(&mut self, now: Instant, sub: &mut S) {
        self.refresh(now, sub);
    }

    fn refresh<S: Subscriber>(&mut self, now: Instant, sub: &mut S) {
        let timeout = self.timeout;
        let recent = |t: Option<Instant>| match t {
            Some(t) => now.saturating_duration_since(t) <= timeout,
            None => false,
        };

        let p = &self.presence;
        let quiet = match p.frame {
            Some(t) => now.saturating_duration_since(t) > timeout,
            None => false,
        };
        let state = [
            recent(p.boiler),
            recent(p.thermostat),
            recent(p.gateway),
            recent(p.line) && quiet,
        ];

        for (i, active) in state.iter().enumerate() {
            if self.flags[i] != *active {
                self.flags[i] = *active;
                info!("{}: {}", FLAGS[i].name(), active);
                sub.notify(&Event::Liveness { flag: FLAGS[i], active: *active });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Discard;
    use crate::frame::parse_frame;
    use crate::value::F88;

    #[test]
    fn status_frame_updates_boiler_view() {
        let now = Instant::now();
        let mut c = Classifier::new(Duration::from_secs(30));
        let mut events = Vec::new();
        let mut sub = |e: &Event| events.push(e.clone());

        let f = parse_frame("B40000200", now).unwrap();
        let change = c.process(&f, &mut sub).unwrap();
        assert_eq!(change.view, View::Boiler);
        assert_eq!(change.value, Value::Flag8Flag8(0x02, 0x00));
        assert_eq!(change.seq, 1);

        // Same value again is not a change
        let f = parse_frame("B40000200", now + Duration::from_millis(500)).unwrap();
        assert!(c.process(&f, &mut sub).is_none());

        let entry = c.store().get(View::Boiler, 0).unwrap();
        assert_eq!(entry.seq, 1);
        assert!(!entry.anomalous);

        drop(sub);
        assert!(events.contains(&Event::Liveness { flag: Liveness::BoilerPresent, active: true }));
        assert_eq!(events.iter().filter(|e| matches!(e, Event::Changed(_))).count(), 1);
    }

    #[test]
    fn parity_error_counts_thermostat_side() {
        let now = Instant::now();
        let mut c = Classifier::new(Duration::from_secs(30));
        let mut sub = Discard;

        // T90011900 with bit 31 inverted
        let f = parse_frame("T10011900", now).unwrap();
        assert!(c.process(&f, &mut sub).is_none());
        assert_eq!(c.errors().error02, 1);
        assert_eq!(c.errors().total(), 1);
        assert!(c.store().get(View::Thermostat, 1).is_none());
    }

    #[test]
    fn error_line_side_from_message_type() {
        let now = Instant::now();
        let mut c = Classifier::new(Duration::from_secs(30));
        let mut sub = Discard;

        c.process(&parse_frame("E40190000", now).unwrap(), &mut sub);
        c.process(&parse_frame("E00190000", now).unwrap(), &mut sub);
        assert_eq!(c.errors().error01, 1);
        assert_eq!(c.errors().error02, 1);
    }

    #[test]
    fn anomalous_kind_is_stored() {
        let now = Instant::now();
        let mut c = Classifier::new(Duration::from_secs(30));
        let mut sub = Discard;

        // WRITE-ACK for Tboiler (25), which is read only
        let raw = crate::frame::encode_raw(MessageType::WriteAck, 25, 0x37, 0x80);
        let f = Frame::from_raw(Source::Boiler, raw, now);
        c.process(&f, &mut sub).unwrap();
        let e = c.store().get(View::Boiler, 25).unwrap();
        assert!(e.anomalous);
        assert_eq!(e.value, Value::F88(F88::from_f32(55.5)));
    }

    #[test]
    fn malformed_day_time_rejected() {
        let now = Instant::now();
        let mut c = Classifier::new(Duration::from_secs(30));
        let mut sub = Discard;

        let raw = crate::frame::encode_raw(MessageType::WriteData, 20, 0x1f, 0x00);
        let f = Frame::from_raw(Source::Thermostat, raw, now);
        assert!(c.process(&f, &mut sub).is_none());
        assert_eq!(c.malformed(), 1);
        assert!(c.store().get(View::Thermostat, 20).is_none());
    }

    #[test]
    fn thermostat_expires_after_window() {
        let t0 = Instant::now();
        let mut c = Classifier::new(Duration::from_secs(30));
        let mut events = Vec::new();
        let mut sub = |e: &Event| events.push(e.clone());

        let f = parse_frame("T90011900", t0).unwrap();
        c.process(&f, &mut sub);
        assert!(c.liveness(Liveness::ThermostatPresent));

        c.tick(t0 + Duration::from_secs(30), &mut sub);
        assert!(c.liveness(Liveness::ThermostatPresent));

        c.tick(t0 + Duration::from_secs(31), &mut sub);
        assert!(!c.liveness(Liveness::ThermostatPresent));

        drop(sub);
        assert_eq!(
            events.last(),
            Some(&Event::Liveness { flag: Liveness::ThermostatPresent, active: false })
        );
    }

    #[test]
    fn power_save_when_only_text_arrives() {
        let t0 = Instant::now();
        let mut c = Classifier::new(Duration::from_secs(30));
        let mut sub = Discard;

        c.saw_line(t0);
        c.tick(t0 + Duration::from_secs(10), &mut sub);
        assert!(!c.liveness(Liveness::PowerSave));

        c.saw_line(t0 + Duration::from_secs(40));
        c.tick(t0 + Duration::from_secs(40), &mut sub);
        assert!(c.liveness(Liveness::PowerSave));

        let f = parse_frame("B40000200", t0 + Duration::from_secs(41)).unwrap();
        c.process(&f, &mut sub);
        assert!(!c.liveness(Liveness::PowerSave));
    }

    #[test]
    fn local_telemetry() {
        let now = Instant::now();
        let mut c = Classifier::new(Duration::from_secs(30));
        let mut sub = Discard;

        assert!(c.observe_local(ID_PULSE_COUNTER, Value::U16(12), now, &mut sub));
        assert!(!c.observe_local(25, Value::U16(12), now, &mut sub));
        assert_eq!(c.store().get(View::GatewayAnswer, ID_PULSE_COUNTER).unwrap().value, Value::U16(12));
    }
}
