//! Station connectivity supervisor.
//!
//! The network stack pushes [`NetEvent`]s onto a channel and the supervisor
//! consumes them on the caller's thread until the station has an address or
//! the retry ceiling is reached. Backoff sleeps happen here, never on the
//! event-loop task that produced the event.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::chatty;
use crate::debug_flags::DEBUG_WIFI;
use crate::error::{ClockError, Result};
use crate::retry::RetryCounter;

/// Delay between a disconnect and the next connect request.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
/// Pending events held for the supervisor; later events are dropped.
pub const NET_EVENT_QUEUE: usize = 8;

/// Notifications from the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    StationStarted,
    GotAddress(Ipv4Addr),
    Disconnected,
}

/// Bounded queue between the network stack callbacks and the supervisor.
///
/// Posting never blocks, so a callback that outlives the supervisor cannot
/// stall the event loop or grow memory without bound.
pub fn event_queue() -> (EventSender, Receiver<NetEvent>) {
    let (tx, rx) = mpsc::sync_channel(NET_EVENT_QUEUE);
    (EventSender(tx), rx)
}

#[derive(Debug, Clone)]
pub struct EventSender(SyncSender<NetEvent>);

impl EventSender {
    /// Queue `event`. Returns false if it was dropped.
    pub fn post(&self, event: NetEvent) -> bool {
        match self.0.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                chatty!(DEBUG_WIFI, "event queue full, dropped {:?}", event);
                false
            }
            Err(TrySendError::Disconnected(event)) => {
                chatty!(DEBUG_WIFI, "no supervisor listening, dropped {:?}", event);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Open,
    Wpa2Personal,
    Wpa2Enterprise,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    /// Empty means no password.
    pub password: String,
    /// Enterprise only.
    pub identity: String,
    /// Enterprise only.
    pub username: String,
    pub enterprise: bool,
}

impl Credentials {
    pub fn auth(&self) -> Auth {
        if self.enterprise {
            Auth::Wpa2Enterprise
        } else if self.password.is_empty() {
            Auth::Open
        } else {
            Auth::Wpa2Personal
        }
    }
}

/// The EAP credential API of the station driver.
///
/// Implementations may assume they are never called with an empty string;
/// zero-length credentials are undefined behaviour in ESP-IDF.
pub trait CredentialSink {
    fn set_password(&mut self, password: &str) -> Result<()>;
    fn set_identity(&mut self, identity: &str) -> Result<()>;
    fn set_username(&mut self, username: &str) -> Result<()>;
    fn enable_enterprise(&mut self) -> Result<()>;
}

/// Push WPA2-Enterprise credentials into `sink`, skipping empty fields.
///
/// Does nothing for personal or open networks.
pub fn apply_enterprise_credentials<S: CredentialSink>(
    creds: &Credentials,
    sink: &mut S,
) -> Result<()> {
    if !creds.enterprise {
        return Ok(());
    }
    if !creds.password.is_empty() {
        sink.set_password(&creds.password)?;
    }
    if !creds.identity.is_empty() {
        sink.set_identity(&creds.identity)?;
    }
    if !creds.username.is_empty() {
        sink.set_username(&creds.username)?;
    }
    sink.enable_enterprise()
}

/// The parts of the network stack the supervisor drives.
pub trait NetworkStack {
    /// Start the station. Completion is reported as [`NetEvent::StationStarted`].
    fn start(&mut self) -> Result<()>;
    /// Ask the stack to associate. The outcome arrives as an event.
    fn connect(&mut self) -> Result<()>;
}

impl<S: NetworkStack + ?Sized> NetworkStack for &mut S {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }
}

/// Heap consistency check run around every event.
pub trait HeapIntegrity {
    fn is_intact(&self) -> bool;
}

/// For targets without a heap checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHeapCheck;

impl HeapIntegrity for NoHeapCheck {
    fn is_intact(&self) -> bool {
        true
    }
}

/// "Station has an address", written once by the supervisor.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSignal(Arc<AtomicBool>);

impl ConnectionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connected {
    pub ip: Ipv4Addr,
    /// Connect requests issued, including the successful one.
    pub attempts: u8,
}

pub struct ConnectivitySupervisor<S, H = NoHeapCheck> {
    stack: S,
    events: Receiver<NetEvent>,
    heap: H,
    retries: RetryCounter,
    state: ConnectionState,
    signal: ConnectionSignal,
    backoff: Duration,
    connect_requests: u8,
}

impl<S: NetworkStack, H: HeapIntegrity> ConnectivitySupervisor<S, H> {
    pub fn new(stack: S, events: Receiver<NetEvent>, heap: H, max_retries: u8) -> Self {
        Self {
            stack,
            events,
            heap,
            retries: RetryCounter::new(max_retries),
            state: ConnectionState::Idle,
            signal: ConnectionSignal::new(),
            backoff: RECONNECT_BACKOFF,
            connect_requests: 0,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn signal(&self) -> ConnectionSignal {
        self.signal.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retries(&self) -> RetryCounter {
        self.retries
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Start the station and block until it has an address or the retry
    /// ceiling is reached.
    pub fn connect(&mut self) -> Result<Connected> {
        self.retries.reset();
        self.connect_requests = 0;
        self.state = ConnectionState::Idle;

        self.stack.start()?;
        info!("WiFi started");

        loop {
            let event = self
                .events
                .recv()
                .map_err(|_| ClockError::EventChannelClosed)?;

            self.check_heap("before")?;
            let outcome = self.handle(event);
            self.check_heap("after")?;

            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }

    fn check_heap(&self, stage: &'static str) -> Result<()> {
        if self.heap.is_intact() {
            Ok(())
        } else {
            Err(ClockError::MemoryIntegrityFault { stage })
        }
    }

    fn handle(&mut self, event: NetEvent) -> Option<Result<Connected>> {
        chatty!(DEBUG_WIFI, "WiFi event {:?} in state {:?}", event, self.state);
        match event {
            NetEvent::StationStarted => {
                if self.state != ConnectionState::Idle {
                    return None;
                }
                match self.request_connect() {
                    Ok(()) => None,
                    Err(e) => {
                        warn!("WiFi connect request failed: {}", e);
                        self.retry_or_give_up()
                    }
                }
            }
            NetEvent::GotAddress(ip) => {
                self.state = ConnectionState::Connected;
                self.signal.set();
                info!("Connected to wifi, IP {}", ip);
                Some(Ok(Connected {
                    ip,
                    attempts: self.connect_requests,
                }))
            }
            NetEvent::Disconnected => {
                self.state = ConnectionState::Disconnected;
                self.retry_or_give_up()
            }
        }
    }

    fn request_connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        self.connect_requests = self.connect_requests.saturating_add(1);
        self.stack.connect()
    }

    fn retry_or_give_up(&mut self) -> Option<Result<Connected>> {
        loop {
            self.retries.record_failure();
            if self.retries.is_exhausted() {
                self.state = ConnectionState::Disconnected;
                warn!(
                    "Failed to connect to wifi after {} attempts",
                    self.connect_requests
                );
                return Some(Err(ClockError::ConnectivityExhausted {
                    attempts: self.connect_requests,
                }));
            }

            info!(
                "Disconnected from wifi. Retrying in {} seconds... ({}/{})",
                self.backoff.as_secs(),
                self.retries.attempt(),
                self.retries.max()
            );
            thread::sleep(self.backoff);

            match self.request_connect() {
                Ok(()) => return None,
                Err(e) => warn!("WiFi connect request failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::mpsc;

    #[derive(Default)]
    struct FakeStack {
        starts: usize,
        connects: usize,
        fail_connects: usize,
    }

    impl NetworkStack for FakeStack {
        fn start(&mut self) -> Result<()> {
            self.starts += 1;
            Ok(())
        }

        fn connect(&mut self) -> Result<()> {
            self.connects += 1;
            if self.fail_connects > 0 {
                self.fail_connects -= 1;
                return Err(ClockError::Network("not started".into()));
            }
            Ok(())
        }
    }

    struct HeapAfter {
        checks: Cell<usize>,
        corrupt_from: usize,
    }

    impl HeapIntegrity for HeapAfter {
        fn is_intact(&self) -> bool {
            let n = self.checks.get() + 1;
            self.checks.set(n);
            n < self.corrupt_from
        }
    }

    fn supervisor(events: &[NetEvent], max: u8) -> ConnectivitySupervisor<FakeStack, NoHeapCheck> {
        let (tx, rx) = mpsc::channel();
        for e in events {
            tx.send(*e).unwrap();
        }
        ConnectivitySupervisor::new(FakeStack::default(), rx, NoHeapCheck, max)
            .with_backoff(Duration::ZERO)
    }

    const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 42);

    #[test]
    fn connects_on_first_address() {
        let mut sup = supervisor(&[NetEvent::StationStarted, NetEvent::GotAddress(IP)], 3);
        let signal = sup.signal();
        assert!(!signal.is_set());

        let connected = sup.connect().unwrap();
        assert_eq!(connected, Connected { ip: IP, attempts: 1 });
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert!(signal.is_set());
        assert_eq!(sup.stack().starts, 1);
        assert_eq!(sup.stack().connects, 1);
    }

    #[test]
    fn waits_for_station_start_before_connecting() {
        let (tx, rx) = mpsc::channel();
        let mut sup = ConnectivitySupervisor::new(FakeStack::default(), rx, NoHeapCheck, 3);
        drop(tx);
        assert_eq!(sup.connect(), Err(ClockError::EventChannelClosed));
        assert_eq!(sup.stack().connects, 0);
    }

    #[test]
    fn three_disconnects_exhaust_a_ceiling_of_three() {
        let mut sup = supervisor(
            &[
                NetEvent::StationStarted,
                NetEvent::Disconnected,
                NetEvent::Disconnected,
                NetEvent::Disconnected,
                NetEvent::GotAddress(IP),
            ],
            3,
        );
        let err = sup.connect().unwrap_err();
        assert_eq!(err, ClockError::ConnectivityExhausted { attempts: 3 });
        assert_eq!(sup.stack().connects, 3);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert!(!sup.signal().is_set());
    }

    #[test]
    fn reconnects_never_exceed_the_ceiling() {
        for max in 0..=8u8 {
            let mut events = vec![NetEvent::StationStarted];
            events.extend(std::iter::repeat(NetEvent::Disconnected).take(20));
            let mut sup = supervisor(&events, max);
            assert!(matches!(
                sup.connect(),
                Err(ClockError::ConnectivityExhausted { .. })
            ));
            let reconnects = sup.stack().connects - 1;
            assert!(reconnects <= max as usize, "max={} reconnects={}", max, reconnects);
        }
    }

    #[test]
    fn recovers_after_a_disconnect() {
        let mut sup = supervisor(
            &[
                NetEvent::StationStarted,
                NetEvent::Disconnected,
                NetEvent::GotAddress(IP),
            ],
            3,
        );
        let connected = sup.connect().unwrap();
        assert_eq!(connected.attempts, 2);
        assert_eq!(sup.retries().attempt(), 1);
    }

    #[test]
    fn duplicate_station_start_is_ignored() {
        let mut sup = supervisor(
            &[
                NetEvent::StationStarted,
                NetEvent::StationStarted,
                NetEvent::GotAddress(IP),
            ],
            3,
        );
        sup.connect().unwrap();
        assert_eq!(sup.stack().connects, 1);
    }

    #[test]
    fn failed_connect_request_counts_as_an_attempt() {
        let (tx, rx) = mpsc::channel();
        tx.send(NetEvent::StationStarted).unwrap();
        tx.send(NetEvent::GotAddress(IP)).unwrap();
        let stack = FakeStack {
            fail_connects: 1,
            ..FakeStack::default()
        };
        let mut sup =
            ConnectivitySupervisor::new(stack, rx, NoHeapCheck, 3).with_backoff(Duration::ZERO);
        let connected = sup.connect().unwrap();
        assert_eq!(connected.attempts, 2);
        assert_eq!(sup.retries().attempt(), 1);
    }

    #[test]
    fn heap_corruption_is_surfaced_before_handling() {
        let (tx, rx) = mpsc::channel();
        tx.send(NetEvent::StationStarted).unwrap();
        let heap = HeapAfter {
            checks: Cell::new(0),
            corrupt_from: 1,
        };
        let mut sup = ConnectivitySupervisor::new(FakeStack::default(), rx, heap, 3);
        let err = sup.connect().unwrap_err();
        assert_eq!(err, ClockError::MemoryIntegrityFault { stage: "before" });
        assert!(err.is_fatal());
        assert_eq!(sup.stack().connects, 0);
    }

    #[test]
    fn heap_corruption_is_surfaced_after_handling() {
        let (tx, rx) = mpsc::channel();
        tx.send(NetEvent::StationStarted).unwrap();
        let heap = HeapAfter {
            checks: Cell::new(0),
            corrupt_from: 2,
        };
        let mut sup = ConnectivitySupervisor::new(FakeStack::default(), rx, heap, 3);
        assert_eq!(
            sup.connect(),
            Err(ClockError::MemoryIntegrityFault { stage: "after" })
        );
        assert_eq!(sup.stack().connects, 1);
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<(&'static str, String)>,
    }

    impl CredentialSink for RecordingSink {
        fn set_password(&mut self, password: &str) -> Result<()> {
            self.calls.push(("password", password.to_string()));
            Ok(())
        }

        fn set_identity(&mut self, identity: &str) -> Result<()> {
            self.calls.push(("identity", identity.to_string()));
            Ok(())
        }

        fn set_username(&mut self, username: &str) -> Result<()> {
            self.calls.push(("username", username.to_string()));
            Ok(())
        }

        fn enable_enterprise(&mut self) -> Result<()> {
            self.calls.push(("enterprise", String::new()));
            Ok(())
        }
    }

    #[test]
    fn empty_enterprise_fields_are_never_sent() {
        let creds = Credentials {
            ssid: "Campus".into(),
            password: String::new(),
            identity: "anon@example.edu".into(),
            username: String::new(),
            enterprise: true,
        };
        let mut sink = RecordingSink::default();
        apply_enterprise_credentials(&creds, &mut sink).unwrap();
        assert_eq!(
            sink.calls,
            vec![
                ("identity", "anon@example.edu".to_string()),
                ("enterprise", String::new())
            ]
        );
    }

    #[test]
    fn personal_networks_skip_the_eap_api() {
        let creds = Credentials {
            ssid: "HomeNet".into(),
            password: "secret".into(),
            ..Credentials::default()
        };
        let mut sink = RecordingSink::default();
        apply_enterprise_credentials(&creds, &mut sink).unwrap();
        assert!(sink.calls.is_empty());
        assert_eq!(creds.auth(), Auth::Wpa2Personal);
    }

    #[test]
    fn empty_password_means_open_network() {
        let creds = Credentials {
            ssid: "HomeNet".into(),
            ..Credentials::default()
        };
        assert_eq!(creds.auth(), Auth::Open);
    }

    #[test]
    fn open_network_exhausts_without_touching_the_password_api() {
        let creds = Credentials {
            ssid: "HomeNet".into(),
            ..Credentials::default()
        };
        let mut sink = RecordingSink::default();
        apply_enterprise_credentials(&creds, &mut sink).unwrap();

        let mut sup = supervisor(
            &[
                NetEvent::StationStarted,
                NetEvent::Disconnected,
                NetEvent::Disconnected,
                NetEvent::Disconnected,
            ],
            3,
        );
        assert_eq!(
            sup.connect(),
            Err(ClockError::ConnectivityExhausted { attempts: 3 })
        );
        assert_eq!(sup.stack().connects, 3);
        assert!(sink.calls.iter().all(|(call, _)| *call != "password"));
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn event_queue_drops_overflow_without_blocking() {
        let (tx, rx) = event_queue();
        let accepted = (0..NET_EVENT_QUEUE + 3)
            .filter(|_| tx.post(NetEvent::Disconnected))
            .count();
        assert_eq!(accepted, NET_EVENT_QUEUE);
        assert_eq!(rx.try_iter().count(), NET_EVENT_QUEUE);

        assert!(tx.post(NetEvent::StationStarted));
        drop(rx);
        assert!(!tx.post(NetEvent::Disconnected));
    }

    #[test]
    fn supervisor_reads_from_the_bounded_queue() {
        let (tx, rx) = event_queue();
        assert!(tx.post(NetEvent::StationStarted));
        assert!(tx.post(NetEvent::GotAddress(IP)));
        let mut sup = ConnectivitySupervisor::new(FakeStack::default(), rx, NoHeapCheck, 3)
            .with_backoff(Duration::ZERO);
        assert_eq!(sup.connect().unwrap().ip, IP);
    }
}
