use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use otgw_gateway::classifier::ErrorCounters;
use otgw_gateway::dispatcher::Callback;
use otgw_gateway::event::Liveness;
use otgw_gateway::frame::ErrorToken;
use otgw_gateway::state::View;
use otgw_gateway::value::Value;
use otgw_gateway::{CommandError, Error, Event, Gateway, Options, SerialPort, UpgradeError};

#[derive(Default)]
struct Wire {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    resets: usize,
    broken: bool,
}

/// Serial port backed by a shared buffer the test scripts
#[derive(Clone, Default)]
struct MockPort(Rc<RefCell<Wire>>);

impl MockPort {
    fn feed(&self, text: &str) {
        self.0.borrow_mut().rx.extend(text.bytes());
    }

    fn take_tx(&self) -> String {
        let tx = std::mem::take(&mut self.0.borrow_mut().tx);
        String::from_utf8_lossy(&tx).into_owned()
    }
}

impl Read<u8> for MockPort {
    type Error = ();

    fn read(&mut self) -> nb::Result<u8, ()> {
        let mut wire = self.0.borrow_mut();
        if wire.broken {
            return Err(nb::Error::Other(()));
        }
        wire.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl Write<u8> for MockPort {
    type Error = ();

    fn write(&mut self, b: u8) -> nb::Result<(), ()> {
        self.0.borrow_mut().tx.push(b);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), ()> {
        Ok(())
    }
}

impl SerialPort<()> for MockPort {
    fn set_reset(&mut self, asserted: bool) -> Result<(), ()> {
        if asserted {
            self.0.borrow_mut().resets += 1;
        }
        Ok(())
    }
}

struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}

type Results = Rc<RefCell<Vec<(String, Result<String, CommandError>)>>>;

fn recorder(results: &Results, name: &str) -> Option<Callback> {
    let results = results.clone();
    let name = name.to_string();
    Some(Box::new(move |r: Result<String, CommandError>| {
        results.borrow_mut().push((name, r))
    }))
}

fn setup() -> (MockPort, Gateway<MockPort, NoDelay, ()>) {
    let port = MockPort::default();
    let gw = Gateway::new(port.clone(), NoDelay, Options::default());
    (port, gw)
}

/// Poll until the receive buffer is drained
fn drain(gw: &mut Gateway<MockPort, NoDelay, ()>, port: &MockPort, now: Instant, events: &mut Vec<Event>) {
    let mut sub = |e: &Event| events.push(e.clone());
    loop {
        gw.poll(now, &mut sub).unwrap();
        if port.0.borrow().rx.is_empty() {
            break;
        }
    }
    gw.poll(now, &mut sub).unwrap();
}

#[test]
fn boiler_status_frame() {
    let (port, mut gw) = setup();
    let now = Instant::now();
    let mut events = Vec::new();

    port.feed("B40000200\r\n");
    drain(&mut gw, &port, now, &mut events);

    let e = gw.state().get(View::Boiler, 0).unwrap();
    assert_eq!(e.value, Value::Flag8Flag8(0x02, 0x00));
    assert_eq!(e.seq, 1);

    let changes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Changed(c) => Some(c),
            _ => None,
        })
        .collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].seq, 1);

    let record = Event::Changed(*changes[0]).record("otgw").unwrap();
    assert_eq!(record.topic, "otgw/value/boiler/Status");
    assert!(gw.classifier().liveness(Liveness::BoilerPresent));
}

#[test]
fn parity_error_counted() {
    let (port, mut gw) = setup();
    let now = Instant::now();
    let mut events = Vec::new();

    port.feed("T10011900\r\n");
    drain(&mut gw, &port, now, &mut events);

    assert_eq!(
        gw.classifier().errors(),
        ErrorCounters { error02: 1, ..Default::default() }
    );
    assert!(gw.state().get(View::Thermostat, 1).is_none());
    assert!(!events.iter().any(|e| matches!(e, Event::Changed(_))));
}

#[test]
fn commands_complete_in_order() {
    let (port, mut gw) = setup();
    let t0 = Instant::now();
    let mut events = Vec::new();
    let results: Results = Default::default();

    for c in &["TT=19.5", "CH=1", "GW=R"] {
        gw.send_command(c, t0, recorder(&results, c)).unwrap();
    }

    drain(&mut gw, &port, t0, &mut events);
    assert_eq!(port.take_tx(), "TT=19.5\r");

    let replies = ["TT: 19.50\r\n", "CH: 1\r\n", "GW: R\r\n"];
    let sent = ["CH=1\r", "GW=R\r", ""];
    let mut now = t0;
    for (reply, next) in replies.iter().zip(sent.iter()) {
        now += Duration::from_millis(200);
        port.feed(reply);
        drain(&mut gw, &port, now, &mut events);
        assert_eq!(port.take_tx(), *next);
    }

    assert_eq!(gw.pending(), 0);
    assert_eq!(
        *results.borrow(),
        vec![
            ("TT=19.5".to_string(), Ok("19.50".to_string())),
            ("CH=1".to_string(), Ok("1".to_string())),
            ("GW=R".to_string(), Ok("R".to_string())),
        ]
    );
    assert!(events.contains(&Event::Response {
        command: "CH=1".to_string(),
        reply: "1".to_string()
    }));
}

#[test]
fn rejected_command_exhausts_retries() {
    let (port, mut gw) = setup();
    let t0 = Instant::now();
    let mut events = Vec::new();
    let results: Results = Default::default();

    gw.send_command("TT=99.9", t0, recorder(&results, "TT=99.9")).unwrap();

    let mut now = t0;
    let mut sends = 0;
    for _ in 0..20 {
        drain(&mut gw, &port, now, &mut events);
        if port.take_tx() == "TT=99.9\r" {
            sends += 1;
            port.feed("BV\r\n");
            drain(&mut gw, &port, now, &mut events);
        }
        if gw.pending() == 0 {
            break;
        }
        now += Duration::from_millis(500);
    }

    assert_eq!(sends, 3);
    assert_eq!(
        *results.borrow(),
        vec![("TT=99.9".to_string(), Err(CommandError::Rejected(ErrorToken::BadValue)))]
    );
}

#[test]
fn banner_and_log_lines() {
    let (port, mut gw) = setup();
    let now = Instant::now();
    let mut events = Vec::new();

    port.feed("OpenTherm Gateway 6.5\r\nThermostat disconnected\r\n");
    drain(&mut gw, &port, now, &mut events);

    let (fw, version) = gw.firmware().unwrap();
    assert_eq!(fw.name(), "gateway");
    assert_eq!(version, "6.5");
    assert!(events.contains(&Event::Log("Thermostat disconnected".to_string())));
}

#[test]
fn shutdown_aborts_pending() {
    let (port, mut gw) = setup();
    let now = Instant::now();
    let mut events = Vec::new();
    let results: Results = Default::default();

    gw.send_command("SB=15", now, recorder(&results, "a")).unwrap();
    gw.send_command("SH=60", now, recorder(&results, "b")).unwrap();
    drain(&mut gw, &port, now, &mut events);

    let mut sub = |e: &Event| events.push(e.clone());
    gw.shutdown(&mut sub);
    assert_eq!(gw.pending(), 0);
    let results = results.borrow();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| *r == Err(CommandError::Aborted)));
}

#[test]
fn settings_flush_after_quiet_period() {
    let (port, mut gw) = setup();
    let t0 = Instant::now();
    let mut events = Vec::new();

    gw.mark_settings_dirty(t0);
    gw.mark_settings_dirty(t0 + Duration::from_millis(1000));
    drain(&mut gw, &port, t0 + Duration::from_millis(2500), &mut events);
    assert!(!events.contains(&Event::FlushSettings));

    drain(&mut gw, &port, t0 + Duration::from_millis(3100), &mut events);
    assert_eq!(events.iter().filter(|e| **e == Event::FlushSettings).count(), 1);
}

#[test]
fn second_upgrade_rejected() {
    let (port, mut gw) = setup();
    let now = Instant::now();

    gw.start_upgrade(std::path::Path::new("gateway.hex"), now).unwrap();
    assert_eq!(port.0.borrow().resets, 1);
    assert_eq!(port.take_tx(), "GW=R\r");

    assert_eq!(
        gw.start_upgrade(std::path::Path::new("gateway.hex"), now),
        Err(UpgradeError::InProgress)
    );

    // Commands stay queued while the programmer owns the port
    gw.send_command("PR=A", now, None).unwrap();
    let mut events = Vec::new();
    drain(&mut gw, &port, now, &mut events);
    assert_eq!(port.take_tx(), "");
    assert_eq!(gw.pending(), 1);
}

#[test]
fn serial_failure_reported() {
    let (port, mut gw) = setup();
    let now = Instant::now();
    let mut events = Vec::new();
    let mut sub = |e: &Event| events.push(e.clone());

    port.0.borrow_mut().broken = true;
    assert_eq!(gw.poll(now, &mut sub), Err(Error::Serial(())));
}
