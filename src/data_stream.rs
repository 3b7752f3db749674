/*! Data streams: transports, formatters, and the transmit/receive
coordinator.

A [`DataStream`] pairs a byte [`Transport`] (TCP server, serial port —
implemented outside this crate) with a [`Formatter`] that turns packets
into transport bytes and back. Formatters are stateful, so every
transport client gets its own lazily created clone; a client's partial
frame never bleeds into another's.

[`ModemDataStream`] adds the coordinator: one worker thread that polls
the transport for inbound packets, queues them in a bounded FIFO, and
drives the [`Modem`](crate::modem::Modem) to put them on the air.
Packets transmit strictly in queue order, a packet is only dequeued
after its transmission succeeded, and a transmit fault disables the
stream rather than drop or retry — the surrounding pipeline decides on
recovery. The queue drops its oldest entry on overflow, trading the
stalest packet for bounded memory under producer overload.
*/
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::ax25::{Packet, decode_frame_no_fcs, encode_frame};
use crate::kiss::{self, CMD_DATA, KissFrame};
use crate::modem::Modem;
use crate::{Error, Result};

/// Outbound FIFO capacity; the oldest packet is dropped on overflow.
pub const QUEUE_CAPACITY: usize = 100;

/// How long the worker waits for transport data per iteration.
const POLL_MS: i32 = 10;

/// Byte transport capability. Implementations are expected to be
/// internally synchronized; the coordinator calls from its worker
/// thread while producers call from theirs.
pub trait Transport: Send + Sync {
    /// Start accepting clients / open the port.
    fn start(&self) -> Result<()>;

    /// Stop and disconnect everything.
    fn stop(&self);

    /// Broadcast bytes to all clients.
    fn write(&self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` pending bytes from one client.
    fn read(&self, client_id: u64, buf: &mut [u8]) -> usize;

    /// Currently known client ids.
    fn clients(&self) -> Vec<u64>;

    /// Flush buffered output.
    fn flush(&self) {}

    /// Wait until any client has pending data. Negative timeout waits
    /// forever; returns false on timeout.
    fn wait_data_received(&self, timeout_ms: i32) -> bool;

    /// Gate the transport on or off without tearing it down.
    fn set_enabled(&self, enable: bool);

    /// Whether the transport is currently enabled.
    fn enabled(&self) -> bool;
}

/// Packet ↔ transport bytes capability. Stateful: a formatter carries
/// partial frames between calls, which is why clients each get a
/// clone.
pub trait Formatter: Send {
    /// Encode a packet for the wire.
    fn encode(&mut self, p: &Packet) -> Result<Vec<u8>>;

    /// Feed received bytes (possibly none, to drain pending frames)
    /// and try to produce one packet. At most one frame is consumed
    /// per call; call again to drain.
    fn try_decode(&mut self, data: &[u8]) -> Option<Packet>;

    /// Clone this formatter, including buffered state and callbacks.
    fn clone_box(&self) -> Box<dyn Formatter>;
}

/// Callback for non-data KISS command frames.
pub type CommandCallback = Arc<dyn Fn(&KissFrame) + Send + Sync>;

/// The standard APRS formatter: AX.25 frames in KISS, FCS stripped.
///
/// Non-zero KISS commands (set TX-delay and friends) are surfaced
/// through the command callback and never treated as data; acting on
/// them is the pipeline's decision.
#[derive(Default)]
pub struct Ax25KissFormatter {
    decoder: kiss::Decoder,
    pending: VecDeque<KissFrame>,
    on_command: Option<CommandCallback>,
}

impl Ax25KissFormatter {
    /// New formatter with no command callback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the command callback. Clones share it.
    pub fn set_on_command(&mut self, cb: CommandCallback) {
        self.on_command = Some(cb);
    }
}

impl Formatter for Ax25KissFormatter {
    fn encode(&mut self, p: &Packet) -> Result<Vec<u8>> {
        let frame = encode_frame(p)?;
        // KISS data frames carry no FCS; the link below KISS is
        // assumed reliable.
        Ok(kiss::encode(0, CMD_DATA, &frame[..frame.len() - 2]))
    }

    fn try_decode(&mut self, data: &[u8]) -> Option<Packet> {
        if !data.is_empty() {
            self.decoder.decode(data);
            self.pending.extend(self.decoder.take_frames());
        }
        let frame = self.pending.pop_front()?;
        if frame.command == CMD_DATA {
            match decode_frame_no_fcs(&frame.data) {
                Some(f) => Some(f.to_packet()),
                None => {
                    debug!("dropping undecodable KISS data frame, {} bytes", frame.data.len());
                    None
                }
            }
        } else {
            trace!("KISS command {} on port {}", frame.command, frame.port);
            if let Some(cb) = &self.on_command {
                cb(&frame);
            }
            None
        }
    }

    fn clone_box(&self) -> Box<dyn Formatter> {
        Box::new(Ax25KissFormatter {
            decoder: self.decoder.clone(),
            pending: self.pending.clone(),
            on_command: self.on_command.clone(),
        })
    }
}

/// Pipeline event observer. All methods default to no-ops; implement
/// the ones the application cares about.
pub trait DataStreamEvents: Send + Sync {
    /// A packet arrived from a transport client.
    fn on_packet_received(&self, p: &Packet) {
        let _ = p;
    }
    /// A packet is about to be transmitted.
    fn on_transmit_started(&self, p: &Packet) {
        let _ = p;
    }
    /// A packet finished transmitting.
    fn on_transmit_completed(&self, p: &Packet) {
        let _ = p;
    }
    /// First data seen from a new client.
    fn on_client_connected(&self, client_id: u64) {
        let _ = client_id;
    }
    /// A client went away and its pending frames are drained.
    fn on_client_disconnected(&self, client_id: u64) {
        let _ = client_id;
    }
    /// A non-data KISS command arrived.
    fn on_command(&self, frame: &KissFrame) {
        let _ = frame;
    }
    /// The stream hit a fault and disabled itself.
    fn on_fault(&self, error: &Error) {
        let _ = error;
    }
}

/// A transport plus per-client formatter state.
pub struct DataStream {
    transport: Arc<dyn Transport>,
    formatter: Box<dyn Formatter>,
    client_formatters: HashMap<u64, Box<dyn Formatter>>,
    read_buffer: Vec<u8>,
    events: Option<Arc<dyn DataStreamEvents>>,
}

impl DataStream {
    /// Bind a transport and a formatter.
    pub fn new(transport: Arc<dyn Transport>, formatter: Box<dyn Formatter>) -> Self {
        Self {
            transport,
            formatter,
            client_formatters: HashMap::new(),
            read_buffer: vec![0u8; 4096],
            events: None,
        }
    }

    /// Attach an event observer.
    pub fn set_events(&mut self, events: Arc<dyn DataStreamEvents>) {
        self.events = Some(events);
    }

    /// Start the transport.
    pub fn start(&self) -> Result<()> {
        self.transport.start()
    }

    /// Stop the transport.
    pub fn stop(&self) {
        self.transport.stop();
    }

    /// Encode and broadcast a packet to all clients. A disabled
    /// transport swallows the packet.
    pub fn send(&mut self, p: &Packet) -> Result<()> {
        if !self.transport.enabled() {
            return Ok(());
        }
        let data = self.formatter.encode(p)?;
        self.transport.write(&data)
    }

    /// Poll every client once for a received packet.
    ///
    /// The first byte from an unknown client clones the formatter for
    /// it. Clients that disappeared have their clones drained of
    /// pending frames, one packet per call, before the clone is
    /// removed.
    pub fn try_receive(&mut self) -> Option<Packet> {
        if !self.transport.enabled() {
            return None;
        }

        let clients = self.transport.clients();
        for &client_id in &clients {
            if !self.client_formatters.contains_key(&client_id) {
                debug!("new client {client_id}, cloning formatter");
                self.client_formatters
                    .insert(client_id, self.formatter.clone_box());
                if let Some(ev) = &self.events {
                    ev.on_client_connected(client_id);
                }
            }
            let n = self.transport.read(client_id, &mut self.read_buffer);
            // An empty read still polls the clone, so frames left
            // pending from an earlier chunk drain one per call.
            let formatter = self.client_formatters.get_mut(&client_id).unwrap();
            if let Some(p) = formatter.try_decode(&self.read_buffer[..n]) {
                return Some(p);
            }
        }

        // Cleanup disconnected clients, draining pending frames first.
        let gone: Vec<u64> = self
            .client_formatters
            .keys()
            .filter(|id| !clients.contains(id))
            .copied()
            .collect();
        for client_id in gone {
            let formatter = self.client_formatters.get_mut(&client_id).unwrap();
            if let Some(p) = formatter.try_decode(&[]) {
                // More may be pending; cleanup continues next call.
                return Some(p);
            }
            self.client_formatters.remove(&client_id);
            debug!("client {client_id} disconnected, formatter removed");
            if let Some(ev) = &self.events {
                ev.on_client_disconnected(client_id);
            }
        }
        None
    }

    /// Wait for transport data; false on timeout or disabled
    /// transport.
    pub fn wait_data_received(&self, timeout_ms: i32) -> bool {
        if !self.transport.enabled() {
            return false;
        }
        self.transport.wait_data_received(timeout_ms)
    }
}

struct Shared {
    stream: Mutex<DataStream>,
    transport: Arc<dyn Transport>,
    modem: Arc<Mutex<Modem>>,
    queue: Mutex<VecDeque<Packet>>,
    events: Mutex<Option<Arc<dyn DataStreamEvents>>>,
    enabled: AtomicBool,
    running: AtomicBool,
    transmitting: AtomicBool,
    stop: AtomicBool,
    audio_errors: AtomicUsize,
    transmit_lock: Mutex<()>,
    transmit_cv: Condvar,
    stop_lock: Mutex<()>,
    stop_cv: Condvar,
}

impl Shared {
    fn events(&self) -> Option<Arc<dyn DataStreamEvents>> {
        self.events.lock().unwrap().clone()
    }
}

/// The transmit/receive coordinator.
///
/// Owns one worker thread for the whole start..stop lifetime. The
/// transport and modem are shared with the surrounding pipeline via
/// `Arc`; the coordinator never outlives its worker (stop joins, and
/// drop stops).
pub struct ModemDataStream {
    shared: Arc<Shared>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl ModemDataStream {
    /// Bind transport, formatter and modem.
    pub fn new(
        transport: Arc<dyn Transport>,
        formatter: Box<dyn Formatter>,
        modem: Arc<Mutex<Modem>>,
    ) -> Self {
        let stream = DataStream::new(transport.clone(), formatter);
        Self {
            shared: Arc::new(Shared {
                stream: Mutex::new(stream),
                transport,
                modem,
                queue: Mutex::new(VecDeque::new()),
                events: Mutex::new(None),
                enabled: AtomicBool::new(true),
                running: AtomicBool::new(false),
                transmitting: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                audio_errors: AtomicUsize::new(0),
                transmit_lock: Mutex::new(()),
                transmit_cv: Condvar::new(),
                stop_lock: Mutex::new(()),
                stop_cv: Condvar::new(),
            }),
            worker: None,
        }
    }

    /// Attach an event observer. Do this before `start`.
    pub fn set_events(&self, events: Arc<dyn DataStreamEvents>) {
        self.shared.stream.lock().unwrap().set_events(events.clone());
        *self.shared.events.lock().unwrap() = Some(events);
    }

    /// Start the transport and the worker thread.
    pub fn start(&mut self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Init("data stream already running".to_string()));
        }
        self.shared.stop.store(false, Ordering::SeqCst);
        if let Err(e) = self.shared.stream.lock().unwrap().start() {
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        let shared = self.shared.clone();
        self.worker = Some(
            std::thread::Builder::new()
                .name("modem-data-stream".to_string())
                .spawn(move || worker_loop(&shared))
                .expect("failed to spawn worker thread"),
        );
        info!("data stream started");
        Ok(())
    }

    /// Request stop and join the worker. Idempotent.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.transmit_cv.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        {
            let _guard = self.shared.stop_lock.lock().unwrap();
        }
        self.shared.stop_cv.notify_all();
        info!("data stream stopped");
    }

    /// Queue a packet for transmission. Never blocks; on overflow the
    /// oldest queued packet is dropped.
    pub fn enqueue(&self, p: Packet) {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.len() == QUEUE_CAPACITY {
            let dropped = queue.pop_front();
            debug!("queue full, dropping oldest packet: {:?}", dropped.map(|p| p.to_string()));
        }
        queue.push_back(p);
    }

    /// Encode and send a packet out to the transport clients.
    pub fn send(&self, p: &Packet) -> Result<()> {
        self.shared.stream.lock().unwrap().send(p)
    }

    /// Enable or disable transmission. A fault clears this; re-enable
    /// after recovery.
    pub fn set_enabled(&self, enable: bool) {
        self.shared.enabled.store(enable, Ordering::SeqCst);
    }

    /// Whether transmission is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    /// Whether the worker is running.
    #[must_use]
    pub fn running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of transmit faults since the counter was last set.
    #[must_use]
    pub fn audio_stream_error_count(&self) -> usize {
        self.shared.audio_errors.load(Ordering::SeqCst)
    }

    /// Replace the fault counter, returning the previous value.
    pub fn set_audio_stream_error_count(&self, count: usize) -> usize {
        self.shared.audio_errors.swap(count, Ordering::SeqCst)
    }

    /// Block until no transmission is in progress. Negative timeout
    /// waits forever; false on timeout.
    pub fn wait_transmit_idle(&self, timeout_ms: i32) -> bool {
        wait_while(
            &self.shared.transmit_lock,
            &self.shared.transmit_cv,
            timeout_ms,
            || self.shared.transmitting.load(Ordering::SeqCst),
        )
    }

    /// Block until the worker has stopped. Negative timeout waits
    /// forever; false on timeout.
    pub fn wait_stopped(&self, timeout_ms: i32) -> bool {
        wait_while(
            &self.shared.stop_lock,
            &self.shared.stop_cv,
            timeout_ms,
            || self.shared.running.load(Ordering::SeqCst),
        )
    }
}

impl Drop for ModemDataStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// Condvar wait with the crate's timeout convention.
fn wait_while(
    lock: &Mutex<()>,
    cv: &Condvar,
    timeout_ms: i32,
    condition: impl Fn() -> bool,
) -> bool {
    let deadline = if timeout_ms < 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
    };
    let mut guard = lock.lock().unwrap();
    while condition() {
        match deadline {
            None => guard = cv.wait(guard).unwrap(),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                let (g, _) = cv.wait_timeout(guard, deadline - now).unwrap();
                guard = g;
            }
        }
    }
    true
}

fn worker_loop(shared: &Shared) {
    debug!("worker thread running");
    while !shared.stop.load(Ordering::SeqCst) {
        // Inbound: one receive attempt per iteration.
        let received = shared.stream.lock().unwrap().try_receive();
        if let Some(p) = received {
            debug!("received packet: {p}");
            if let Some(ev) = shared.events() {
                ev.on_packet_received(&p);
            }
            let mut queue = shared.queue.lock().unwrap();
            if queue.len() == QUEUE_CAPACITY {
                queue.pop_front();
                debug!("queue full, dropping oldest packet");
            }
            queue.push_back(p);
        }

        if shared.enabled.load(Ordering::SeqCst) {
            if !shared.queue.lock().unwrap().is_empty() {
                let _guard = shared.transmit_lock.lock().unwrap();
                shared.transmitting.store(true, Ordering::SeqCst);
            }

            while !shared.stop.load(Ordering::SeqCst) {
                let packet = shared.queue.lock().unwrap().front().cloned();
                let Some(packet) = packet else {
                    break;
                };
                if let Some(ev) = shared.events() {
                    ev.on_transmit_started(&packet);
                }
                let result = shared.modem.lock().unwrap().transmit(&packet);
                match result {
                    Ok(()) => {
                        // Pop only after a successful transmit.
                        shared.queue.lock().unwrap().pop_front();
                        if let Some(ev) = shared.events() {
                            ev.on_transmit_completed(&packet);
                        }
                    }
                    Err(e) => {
                        warn!("transmit failed, disabling data stream: {e}");
                        shared.enabled.store(false, Ordering::SeqCst);
                        shared.audio_errors.fetch_add(1, Ordering::SeqCst);
                        if let Some(ev) = shared.events() {
                            ev.on_fault(&e);
                        }
                        break;
                    }
                }
            }

            {
                let _guard = shared.transmit_lock.lock().unwrap();
                shared.transmitting.store(false, Ordering::SeqCst);
            }
            shared.transmit_cv.notify_all();
        }

        // Bounded sleep keeps stop latency low even on a silent
        // transport. No locks are held across this wait.
        shared.transport.wait_data_received(POLL_MS);
    }
    debug!("worker thread exiting");
}
