//! Last known value of every data-id, per traffic direction.

use std::time::Instant;

use crate::frame::{Direction, MessageType};
use crate::value::Value;

/// Logical view a value belongs to
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum View {
    /// Values sent by the boiler (slave to master)
    Boiler,
    /// Values sent by the thermostat (master to slave)
    Thermostat,
    /// Requests the gateway injected towards the boiler
    GatewayRequest,
    /// Answers the gateway injected towards the thermostat
    GatewayAnswer,
}

impl View {
    pub const ALL: [View; 4] = [
        View::Boiler,
        View::Thermostat,
        View::GatewayRequest,
        View::GatewayAnswer,
    ];

    pub fn from_direction(dir: Direction) -> Option<Self> {
        match dir {
            Direction::SlaveToMaster => Some(View::Boiler),
            Direction::MasterToSlave => Some(View::Thermostat),
            Direction::GatewayRequest => Some(View::GatewayRequest),
            Direction::GatewayAnswer => Some(View::GatewayAnswer),
            Direction::ParityError => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            View::Boiler => "boiler",
            View::Thermostat => "thermostat",
            View::GatewayRequest => "request",
            View::GatewayAnswer => "answer",
        }
    }

    fn index(self) -> usize {
        match self {
            View::Boiler => 0,
            View::Thermostat => 1,
            View::GatewayRequest => 2,
            View::GatewayAnswer => 3,
        }
    }
}

/// Stored state of one data-id in one view
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Entry {
    pub value: Value,
    pub msg_type: MessageType,
    pub updated: Instant,
    /// Incremented on every change of `value`, starts at 1
    pub seq: u32,
    /// The message type contradicted the data-id's allowed command kind
    pub anomalous: bool,
}

/// Result of a store update
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Update {
    /// The value is new or differs from the stored one
    Changed { seq: u32 },
    Unchanged,
}

pub struct StateStore {
    views: [Vec<Option<Entry>>; 4],
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            views: [vec![None; 256], vec![None; 256], vec![None; 256], vec![None; 256]],
        }
    }

    /// Record an observation. The timestamp is always refreshed; the
    /// sequence number only advances when the value differs.
    pub fn update(
        &mut self,
        view: View,
        id: u8,
        value: Value,
        msg_type: MessageType,
        anomalous: bool,
        now: Instant,
    ) -> Update {
        let slot = &mut self.views[view.index()][id as usize];

        if let Some(e) = slot.as_mut() {
            if e.value == value {
                e.updated = now;
                e.msg_type = msg_type;
                e.anomalous = anomalous;
                return Update::Unchanged;
            }
        }

        let seq = slot.map(|e| e.seq + 1).unwrap_or(1);
        *slot = Some(Entry { value, msg_type, updated: now, seq, anomalous });
        Update::Changed { seq }
    }

    pub fn get(&self, view: View, id: u8) -> Option<&Entry> {
        self.views[view.index()][id as usize].as_ref()
    }

    /// Iterate the populated entries of a view in id order
    pub fn iter(&self, view: View) -> impl Iterator<Item = (u8, &Entry)> + '_ {
        self.views[view.index()]
            .iter()
            .enumerate()
            .filter_map(|(id, e)| e.as_ref().map(|e| (id as u8, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sequence_counts_changes_only() {
        let mut store = StateStore::new();
        let t0 = Instant::now();
        let v = Value::U16(5);

        assert!(store.get(View::Boiler, 35).is_none());
        assert_eq!(
            store.update(View::Boiler, 35, v, MessageType::ReadAck, false, t0),
            Update::Changed { seq: 1 }
        );

        let t1 = t0 + Duration::from_secs(1);
        assert_eq!(
            store.update(View::Boiler, 35, v, MessageType::ReadAck, false, t1),
            Update::Unchanged
        );
        let e = store.get(View::Boiler, 35).unwrap();
        assert_eq!(e.seq, 1);
        assert_eq!(e.updated, t1);

        assert_eq!(
            store.update(View::Boiler, 35, Value::U16(6), MessageType::ReadAck, false, t1),
            Update::Changed { seq: 2 }
        );
    }

    #[test]
    fn views_are_independent() {
        let mut store = StateStore::new();
        let now = Instant::now();
        store.update(View::Thermostat, 1, Value::U16(1), MessageType::WriteData, false, now);
        store.update(View::Boiler, 3, Value::U16(2), MessageType::ReadAck, false, now);
        store.update(View::Boiler, 0, Value::U16(3), MessageType::ReadAck, false, now);

        assert!(store.get(View::Boiler, 1).is_none());
        let ids: Vec<u8> = store.iter(View::Boiler).map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0, 3]);
        assert_eq!(store.iter(View::GatewayAnswer).count(), 0);
    }
}
