//! Passive traffic listener.
//!
//! Captures frames sent by tracked devices without stimulating the network and
//! reports each (MAC, IPv4) pair it sees. The capture runs on its own thread;
//! reads are bounded by a timeout so the pause flag is checked even on a quiet
//! network. A failed capture session is reopened after a delay until the
//! listener is shut down.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use pnet::datalink::DataLinkReceiver;
use pnet::packet::arp::ArpPacket;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use pnet::util::MacAddr;
use thiserror::Error;

use crate::config::ListenerConfig;
use crate::error::{GeofenceError, Result};
use crate::probe::interface::{find_interface, open_channel};
use crate::roster::Roster;

/// Errors raised by a capture session. All of them lead to a restart.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No usable interface to capture on.
    #[error("network interface not found: {name}")]
    InterfaceNotFound {
        /// Requested interface name, or `<auto>`.
        name: String,
    },

    /// The interface does not provide an ethernet channel.
    #[error("interface {interface} does not provide an ethernet channel")]
    UnsupportedChannel {
        /// Interface name.
        interface: String,
    },

    /// The capture channel could not be opened (usually missing privileges).
    #[error("failed to open capture on {interface}: {source}")]
    Open {
        /// Interface name.
        interface: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A read from an open channel failed.
    #[error("capture read failed: {0}")]
    Read(#[source] std::io::Error),
}

/// A tracked device seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Source hardware address of the frame.
    pub link_address: MacAddr,
    /// Source IPv4 address carried by the frame.
    pub network_address: Ipv4Addr,
}

/// Receives observations from the listener.
pub trait ObservationSink: Send + Sync {
    /// Handle one observation. Called on the capture thread; must not block.
    fn observe(&self, observation: Observation);
}

/// Matches frames whose source is a tracked device.
#[derive(Debug, Clone)]
pub struct CaptureFilter {
    sources: HashSet<MacAddr>,
}

impl CaptureFilter {
    /// Filter on every device in the roster.
    #[must_use]
    pub fn from_roster(roster: &Roster) -> Self {
        Self {
            sources: roster.link_addresses().collect(),
        }
    }

    /// Whether a frame from `source` passes the filter.
    #[must_use]
    pub fn matches(&self, source: &MacAddr) -> bool {
        self.sources.contains(source)
    }

    /// The filter as a BPF expression, e.g. `ether src host aa:.. or ether src host bb:..`.
    #[must_use]
    pub fn expression(&self) -> String {
        let mut hosts: Vec<String> = self.sources.iter().map(ToString::to_string).collect();
        hosts.sort();
        hosts
            .iter()
            .map(|mac| format!("ether src host {mac}"))
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// Extracts an observation from a raw ethernet frame.
///
/// Only frames from a tracked source carrying an IPv4 header or an ARP
/// payload produce an observation.
#[must_use]
pub fn parse_frame(frame: &[u8], filter: &CaptureFilter) -> Option<Observation> {
    let ethernet = EthernetPacket::new(frame)?;
    let source = ethernet.get_source();
    if !filter.matches(&source) {
        return None;
    }

    let network_address = match ethernet.get_ethertype() {
        EtherTypes::Ipv4 => Ipv4Packet::new(ethernet.payload())?.get_source(),
        EtherTypes::Arp => ArpPacket::new(ethernet.payload())?.get_sender_proto_addr(),
        _ => return None,
    };

    Some(Observation {
        link_address: source,
        network_address,
    })
}

/// Pause/resume switch shared between the tracker and the listener.
///
/// Pausing is cooperative: the listener notices between frames (or read
/// timeouts) and closes its capture session. Shutting down ends the listener
/// thread the same way.
#[derive(Debug, Clone, Default)]
pub struct ListenerControl {
    paused: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl ListenerControl {
    /// Create a running (not paused) control.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the listener to stop capturing.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            tracing::info!("All tracked devices online, pausing passive listener");
        }
    }

    /// Ask the listener to capture again.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            tracing::info!("Resuming passive listener");
        }
    }

    /// Whether the listener is asked to pause.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Ask the listener thread to exit. There is no way back.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            tracing::info!("Stopping passive listener");
        }
    }

    /// Whether the listener is asked to exit.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Opens capture sessions for the listener.
pub trait CaptureSource: Send + 'static {
    /// Open a new session. Called again after every failed or paused one.
    ///
    /// # Errors
    ///
    /// Returns an error if no session can be opened right now.
    fn open(&mut self) -> std::result::Result<Box<dyn DataLinkReceiver>, CaptureError>;
}

/// Captures on a network interface through pnet.
#[derive(Debug, Clone)]
pub struct InterfaceSource {
    interface: Option<String>,
    read_timeout: Duration,
}

impl InterfaceSource {
    /// `interface` names the capture interface; `None` picks one automatically
    /// each time a session opens.
    #[must_use]
    pub const fn new(interface: Option<String>, read_timeout: Duration) -> Self {
        Self {
            interface,
            read_timeout,
        }
    }
}

impl CaptureSource for InterfaceSource {
    fn open(&mut self) -> std::result::Result<Box<dyn DataLinkReceiver>, CaptureError> {
        let interface = find_interface(self.interface.as_deref())?;
        let (_tx, rx) = open_channel(&interface, self.read_timeout)?;
        tracing::debug!(interface = %interface.name, "Sniffing started");
        Ok(rx)
    }
}

/// Passive capture loop feeding an [`ObservationSink`].
pub struct PassiveListener<S, C = InterfaceSource> {
    source: C,
    filter: CaptureFilter,
    control: ListenerControl,
    sink: Arc<S>,
    config: ListenerConfig,
}

impl<S: ObservationSink + 'static, C: CaptureSource> PassiveListener<S, C> {
    /// Create a listener reading sessions from `source`.
    #[must_use]
    pub fn new(
        source: C,
        filter: CaptureFilter,
        control: ListenerControl,
        sink: Arc<S>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            source,
            filter,
            control,
            sink,
            config,
        }
    }

    /// Run on a dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let handle = std::thread::Builder::new()
            .name("passive-listener".into())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Capture until shut down, restarting failed sessions and idling while
    /// paused.
    pub fn run(mut self) {
        tracing::info!(filter = %self.filter.expression(), "Passive listener started");
        while !self.control.is_shut_down() {
            if self.control.is_paused() {
                std::thread::sleep(self.config.pause_poll());
                continue;
            }
            let session = self
                .source
                .open()
                .and_then(|mut rx| self.capture(&mut *rx));
            match session {
                Ok(()) => tracing::debug!("Sniffing stopped"),
                Err(e) => {
                    let err = GeofenceError::from(e);
                    if err.is_recoverable() {
                        tracing::warn!(
                            error = %err,
                            code = err.error_code(),
                            "Capture session failed, restarting"
                        );
                    } else {
                        tracing::error!(
                            error = %err,
                            code = err.error_code(),
                            "Cannot capture, retrying"
                        );
                    }
                    std::thread::sleep(self.config.restart_delay());
                }
            }
        }
        tracing::info!("Passive listener stopped");
    }

    /// Read one session; returns `Ok` when paused or shut down.
    fn capture(&self, rx: &mut dyn DataLinkReceiver) -> std::result::Result<(), CaptureError> {
        loop {
            if self.control.is_paused() || self.control.is_shut_down() {
                return Ok(());
            }
            match rx.next() {
                Ok(frame) => {
                    if let Some(observation) = parse_frame(frame, &self.filter) {
                        tracing::trace!(
                            mac = %observation.link_address,
                            ip = %observation.network_address,
                            "Packet from tracked device"
                        );
                        self.sink.observe(observation);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(CaptureError::Read(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Instant;

    use pnet::packet::ethernet::MutableEthernetPacket;
    use pnet::packet::ipv4::MutableIpv4Packet;

    use crate::probe::arp::build_request;
    use crate::roster::parse_mac;

    const TRACKED: &str = "AA:AA:AA:AA:AA:01";
    const STRANGER: &str = "CC:CC:CC:CC:CC:01";

    fn filter() -> CaptureFilter {
        let roster = Roster::parse(&[TRACKED, "AA:AA:AA:AA:AA:02"], &HashMap::new()).unwrap();
        CaptureFilter::from_roster(&roster)
    }

    fn ipv4_frame(source: MacAddr, ip: Ipv4Addr) -> Vec<u8> {
        let mut frame = vec![0u8; 14 + 20];
        {
            let mut ethernet = MutableEthernetPacket::new(&mut frame[..14]).unwrap();
            ethernet.set_source(source);
            ethernet.set_destination(MacAddr::broadcast());
            ethernet.set_ethertype(EtherTypes::Ipv4);
        }
        {
            let mut ipv4 = MutableIpv4Packet::new(&mut frame[14..]).unwrap();
            ipv4.set_version(4);
            ipv4.set_header_length(5);
            ipv4.set_total_length(20);
            ipv4.set_source(ip);
            ipv4.set_destination(Ipv4Addr::new(10, 0, 0, 1));
        }
        frame
    }

    #[test]
    fn test_expression_lists_every_device() {
        assert_eq!(
            filter().expression(),
            "ether src host aa:aa:aa:aa:aa:01 or ether src host aa:aa:aa:aa:aa:02"
        );
    }

    #[test]
    fn test_parses_ipv4_from_tracked_device() {
        let mac = parse_mac(TRACKED).unwrap();
        let frame = ipv4_frame(mac, Ipv4Addr::new(10, 0, 0, 5));

        assert_eq!(
            parse_frame(&frame, &filter()),
            Some(Observation {
                link_address: mac,
                network_address: Ipv4Addr::new(10, 0, 0, 5),
            })
        );
    }

    #[test]
    fn test_parses_arp_from_tracked_device() {
        let mac = parse_mac(TRACKED).unwrap();
        let frame = build_request(mac, Ipv4Addr::new(10, 0, 0, 7), Ipv4Addr::new(10, 0, 0, 1));

        let observation = parse_frame(&frame, &filter()).unwrap();
        assert_eq!(observation.network_address, Ipv4Addr::new(10, 0, 0, 7));
    }

    #[test]
    fn test_ignores_untracked_source() {
        let frame = ipv4_frame(parse_mac(STRANGER).unwrap(), Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(parse_frame(&frame, &filter()), None);
    }

    #[test]
    fn test_ignores_truncated_frame() {
        assert_eq!(parse_frame(&[0u8; 6], &filter()), None);
    }

    #[test]
    fn test_control_toggles() {
        let control = ListenerControl::new();
        let shared = control.clone();
        assert!(!control.is_paused());

        shared.pause();
        assert!(control.is_paused());
        shared.pause();
        assert!(control.is_paused());

        control.resume();
        assert!(!shared.is_paused());
    }

    #[test]
    fn test_shutdown_is_separate_from_pause() {
        let control = ListenerControl::new();
        control.pause();
        assert!(!control.is_shut_down());

        control.clone().shutdown();
        assert!(control.is_shut_down());
        control.resume();
        assert!(control.is_shut_down());
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Observation>>);

    impl Recorder {
        fn seen(&self) -> Vec<Observation> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ObservationSink for Recorder {
        fn observe(&self, observation: Observation) {
            self.0.lock().unwrap().push(observation);
        }
    }

    enum Step {
        Frame(Vec<u8>),
        Fail(io::ErrorKind),
    }

    /// Replays scripted reads, then either repeats one frame or times out.
    struct ScriptedReader {
        steps: VecDeque<Step>,
        repeat: Option<Vec<u8>>,
        current: Vec<u8>,
        closed: Arc<AtomicUsize>,
    }

    impl ScriptedReader {
        fn new(steps: Vec<Step>, closed: &Arc<AtomicUsize>) -> Self {
            Self {
                steps: steps.into(),
                repeat: None,
                current: Vec::new(),
                closed: Arc::clone(closed),
            }
        }

        fn repeating(frame: Vec<u8>, closed: &Arc<AtomicUsize>) -> Self {
            let mut reader = Self::new(Vec::new(), closed);
            reader.repeat = Some(frame);
            reader
        }
    }

    impl DataLinkReceiver for ScriptedReader {
        fn next(&mut self) -> io::Result<&[u8]> {
            match self.steps.pop_front() {
                Some(Step::Frame(frame)) => {
                    self.current = frame;
                    Ok(&self.current)
                }
                Some(Step::Fail(kind)) => Err(io::Error::from(kind)),
                None => {
                    std::thread::sleep(Duration::from_millis(1));
                    match &self.repeat {
                        Some(frame) => {
                            self.current.clone_from(frame);
                            Ok(&self.current)
                        }
                        None => Err(io::Error::from(io::ErrorKind::TimedOut)),
                    }
                }
            }
        }
    }

    impl Drop for ScriptedReader {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Hands out scripted sessions in order; fails once they run out.
    struct ScriptedSource {
        sessions: VecDeque<std::result::Result<ScriptedReader, CaptureError>>,
        opens: Arc<AtomicUsize>,
    }

    impl CaptureSource for ScriptedSource {
        fn open(&mut self) -> std::result::Result<Box<dyn DataLinkReceiver>, CaptureError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.sessions.pop_front() {
                Some(Ok(reader)) => Ok(Box::new(reader)),
                Some(Err(e)) => Err(e),
                None => Err(CaptureError::InterfaceNotFound {
                    name: "<auto>".into(),
                }),
            }
        }
    }

    struct Running {
        control: ListenerControl,
        recorder: Arc<Recorder>,
        opens: Arc<AtomicUsize>,
        handle: JoinHandle<()>,
    }

    impl Running {
        fn stop(self) {
            self.control.shutdown();
            self.handle.join().unwrap();
        }
    }

    fn start(sessions: Vec<std::result::Result<ScriptedReader, CaptureError>>) -> Running {
        let control = ListenerControl::new();
        let recorder = Arc::new(Recorder::default());
        let opens = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource {
            sessions: sessions.into(),
            opens: Arc::clone(&opens),
        };
        let config = ListenerConfig {
            read_timeout_millis: 1,
            restart_delay_millis: 1,
            pause_poll_millis: 1,
        };
        let handle = PassiveListener::new(
            source,
            filter(),
            control.clone(),
            Arc::clone(&recorder),
            config,
        )
        .spawn()
        .unwrap();
        Running {
            control,
            recorder,
            opens,
            handle,
        }
    }

    fn wait_for(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn tracked_frame(last: u8) -> (Vec<u8>, Observation) {
        let mac = parse_mac(TRACKED).unwrap();
        let ip = Ipv4Addr::new(10, 0, 0, last);
        (
            ipv4_frame(mac, ip),
            Observation {
                link_address: mac,
                network_address: ip,
            },
        )
    }

    #[test]
    fn test_failed_open_is_retried() {
        let closed = Arc::new(AtomicUsize::new(0));
        let (frame, observation) = tracked_frame(5);
        let running = start(vec![
            Err(CaptureError::Open {
                interface: "eth0".into(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            }),
            Ok(ScriptedReader::new(vec![Step::Frame(frame)], &closed)),
        ]);

        let recorder = Arc::clone(&running.recorder);
        wait_for("an observation", || !recorder.seen().is_empty());
        assert_eq!(running.opens.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.seen(), vec![observation]);

        running.stop();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_error_restarts_session() {
        let closed = Arc::new(AtomicUsize::new(0));
        let (first_frame, first) = tracked_frame(5);
        let (second_frame, second) = tracked_frame(6);
        let (stranger_frame, _) = tracked_frame(7);
        let stranger_frame = {
            let mut frame = stranger_frame;
            let mut ethernet = MutableEthernetPacket::new(&mut frame[..14]).unwrap();
            ethernet.set_source(parse_mac(STRANGER).unwrap());
            frame
        };
        let running = start(vec![
            Ok(ScriptedReader::new(
                vec![
                    Step::Frame(first_frame),
                    Step::Fail(io::ErrorKind::TimedOut),
                    Step::Frame(stranger_frame),
                    Step::Fail(io::ErrorKind::ConnectionReset),
                ],
                &closed,
            )),
            Ok(ScriptedReader::new(vec![Step::Frame(second_frame)], &closed)),
        ]);

        let recorder = Arc::clone(&running.recorder);
        wait_for("both observations", || recorder.seen().len() == 2);
        assert_eq!(recorder.seen(), vec![first, second]);
        assert_eq!(running.opens.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        running.stop();
    }

    #[test]
    fn test_pause_closes_session_and_resume_reopens() {
        let closed = Arc::new(AtomicUsize::new(0));
        let (frame, observation) = tracked_frame(5);
        let running = start(vec![
            Ok(ScriptedReader::repeating(frame.clone(), &closed)),
            Ok(ScriptedReader::repeating(frame, &closed)),
        ]);
        let recorder = Arc::clone(&running.recorder);

        wait_for("an observation", || !recorder.seen().is_empty());
        running.control.pause();
        wait_for("the session to close", || closed.load(Ordering::SeqCst) == 1);

        let while_paused = recorder.seen().len();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(recorder.seen().len(), while_paused);
        assert_eq!(running.opens.load(Ordering::SeqCst), 1);

        running.control.resume();
        wait_for("a new observation", || recorder.seen().len() > while_paused);
        assert_eq!(running.opens.load(Ordering::SeqCst), 2);
        assert!(recorder.seen().iter().all(|seen| *seen == observation));

        running.stop();
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shutdown_stops_listener_without_a_source() {
        let running = start(Vec::new());
        let opens = Arc::clone(&running.opens);
        wait_for("a few attempts", || opens.load(Ordering::SeqCst) >= 3);

        running.stop();
        let attempts = opens.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(opens.load(Ordering::SeqCst), attempts);
    }
}
