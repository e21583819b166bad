//! Session engine: handshake, acknowledgements, retransmission, liveness
//!
//! One long-lived receive task per client. It reads the socket with a
//! one-second timeout, answers every ACK request before touching the state
//! store, asks for missing packets, and tears the session down after five
//! silent seconds. State is shared with API callers through short, bounded
//! lock sections; the engine never holds a lock across I/O.

use crate::events::{EventDispatcher, PendingEvents};
#[cfg(feature = "send-retention")]
use crate::ring::RetainedRing;
use atem_core::sequence::ID_MASK;
use atem_core::{
    Error as ProtocolError, EventSet, Packet, PacketFlags, PacketView, ProtocolVersion,
    SequenceTracker, StateEvent, SwitcherState, HANDSHAKE_SESSION_ID, HEADER_SIZE,
    MAX_COMMANDS_PER_PACKET,
};
use atem_core::packet::{HELLO_PACKET_SIZE, INIT_STATUS_ACCEPT, INIT_STATUS_HELLO, INIT_STATUS_NO_SLOT};
use atem_transport::Datagram;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Receive buffer; one byte above the largest describable packet
pub(crate) const RECV_BUFFER_SIZE: usize = 2048;

/// Socket read budget per iteration
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Silent reads before a keep-alive ping goes out
const PING_AFTER_TIMEOUTS: u32 = 4;

/// Silent reads before the link is declared dead
const DEAD_AFTER_TIMEOUTS: u32 = 5;

/// The unknown header field carries this marker on resend requests
const RESEND_MARKER: u16 = 0x0100;

/// Assumed firmware behavior until the switcher reports its version
const FALLBACK_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 30);

/// Connection lifecycle, in handshake order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No hello sent, or the last session died
    NotConnected = 0,
    /// Hello sent, waiting for the switcher to accept
    Connected = 1,
    /// Accepted; the boot snapshot is arriving
    Initializing = 2,
    /// Snapshot complete, session established
    Active = 3,
}

impl ConnectionState {
    fn from_u8(val: u8) -> ConnectionState {
        match val {
            1 => ConnectionState::Connected,
            2 => ConnectionState::Initializing,
            3 => ConnectionState::Active,
            _ => ConnectionState::NotConnected,
        }
    }
}

/// Send-side state behind its own lock: the outbound id counter and the
/// retention ring share fate
pub(crate) struct SendState {
    local_id: u16,
    #[cfg(feature = "send-retention")]
    ring: RetainedRing,
}

impl SendState {
    fn new(retention: usize) -> Self {
        #[cfg(not(feature = "send-retention"))]
        let _ = retention;
        SendState {
            local_id: 0,
            #[cfg(feature = "send-retention")]
            ring: RetainedRing::new(retention),
        }
    }

    /// Claim the next outbound packet id (first value 1)
    pub fn next_id(&mut self) -> u16 {
        self.local_id = (self.local_id + 1) & ID_MASK;
        self.local_id
    }

    #[cfg(feature = "send-retention")]
    pub fn retain(&mut self, id: u16, packet: Bytes) {
        self.ring.push(id, packet);
    }

    #[cfg(not(feature = "send-retention"))]
    pub fn retain(&mut self, _id: u16, _packet: Bytes) {}

    pub fn size_in_bytes(&self) -> usize {
        #[cfg(feature = "send-retention")]
        return std::mem::size_of::<Self>() + self.ring.size_in_bytes();
        #[cfg(not(feature = "send-retention"))]
        std::mem::size_of::<Self>()
    }

    fn reset(&mut self) {
        self.local_id = 0;
        #[cfg(feature = "send-retention")]
        self.ring.clear();
    }
}

/// State shared between the receive task and API callers
pub(crate) struct Shared {
    pub socket: Arc<dyn Datagram>,
    pub state: Mutex<SwitcherState>,
    pub send: Mutex<SendState>,
    pub dispatcher: EventDispatcher,
    connection: AtomicU8,
    session_id: AtomicU16,
    /// Advertised protocol version, packed (major << 16 | minor); 0 until known
    version: AtomicU32,
    closed: AtomicBool,
}

impl Shared {
    pub fn new(socket: Arc<dyn Datagram>, retention: usize) -> Self {
        Shared {
            socket,
            state: Mutex::new(SwitcherState::new()),
            send: Mutex::new(SendState::new(retention)),
            dispatcher: EventDispatcher::new(),
            connection: AtomicU8::new(ConnectionState::NotConnected as u8),
            session_id: AtomicU16::new(HANDSHAKE_SESSION_ID),
            version: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn connection(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection.load(Ordering::Acquire))
    }

    fn set_connection(&self, state: ConnectionState) {
        self.connection.store(state as u8, Ordering::Release);
    }

    pub fn session_id(&self) -> u16 {
        self.session_id.load(Ordering::Acquire)
    }

    fn set_session_id(&self, id: u16) {
        self.session_id.store(id, Ordering::Release);
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        match self.version.load(Ordering::Acquire) {
            0 => FALLBACK_PROTOCOL_VERSION,
            raw => ProtocolVersion::new((raw >> 16) as u16, raw as u16),
        }
    }

    fn set_protocol_version(&self, version: ProtocolVersion) {
        self.version.store(
            (version.major as u32) << 16 | version.minor as u32,
            Ordering::Release,
        );
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.set_connection(ConnectionState::NotConnected);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The receive task. Owns everything that only the engine touches.
pub(crate) struct SessionEngine {
    shared: Arc<Shared>,
    tracker: SequenceTracker,
    /// Last peer packet id, used as the ack id of keep-alive pings
    remote_id: u16,
    timeouts: u32,
    pending: PendingEvents,
}

impl SessionEngine {
    pub fn new(shared: Arc<Shared>) -> Self {
        SessionEngine {
            shared,
            tracker: SequenceTracker::new(),
            remote_id: 0,
            timeouts: 0,
            pending: PendingEvents::default(),
        }
    }

    pub async fn run(mut self) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        self.send_hello().await;

        while !self.shared.is_closed() {
            match tokio::time::timeout(RECV_TIMEOUT, self.shared.socket.recv(&mut buf)).await {
                Err(_) => self.handle_silence().await,
                Ok(Err(e)) => {
                    warn!("socket receive error: {}", e);
                    self.handle_silence().await;
                }
                Ok(Ok(n)) => {
                    self.timeouts = 0;
                    self.handle_datagram(&buf[..n]).await;
                }
            }
        }

        debug!("receive task exiting");
    }

    fn connection(&self) -> ConnectionState {
        self.shared.connection()
    }

    async fn send(&self, data: &[u8]) {
        if let Err(e) = self.shared.socket.send(data).await {
            warn!("send failed: {}", e);
        }
    }

    /// Open (or reopen) the handshake
    async fn send_hello(&mut self) {
        let mut hello = Packet::new(
            PacketFlags::INIT,
            HANDSHAKE_SESSION_ID,
            HELLO_PACKET_SIZE,
        );
        hello.body_mut()[0] = INIT_STATUS_HELLO;
        self.send(hello.as_bytes()).await;
        self.shared.set_connection(ConnectionState::Connected);
    }

    /// A read came back empty (or failed); count towards the heartbeat
    /// and the liveness limit
    async fn handle_silence(&mut self) {
        self.timeouts += 1;

        match self.connection() {
            ConnectionState::Active => {
                if self.timeouts >= DEAD_AFTER_TIMEOUTS {
                    self.reconnect("no traffic for 5 seconds").await;
                } else if self.timeouts >= PING_AFTER_TIMEOUTS {
                    self.send_ping().await;
                }
            }
            ConnectionState::Initializing => {
                // Re-sending the hello here would abort a slow snapshot.
                if self.timeouts >= DEAD_AFTER_TIMEOUTS {
                    self.reconnect("boot snapshot stalled").await;
                }
            }
            _ => {
                // The switcher may be booting or rejecting us; keep knocking.
                if self.timeouts >= DEAD_AFTER_TIMEOUTS {
                    self.reconnect("handshake unanswered").await;
                } else {
                    self.send_hello().await;
                }
            }
        }
    }

    /// Keep-alive: an ACK-requesting reply that consumes a fresh local id
    async fn send_ping(&mut self) {
        let id = self.shared.send.lock().next_id();
        let mut ping = Packet::new(
            PacketFlags::ACK_REQUEST | PacketFlags::ACK_REPLY,
            self.shared.session_id(),
            HEADER_SIZE as u16,
        );
        ping.set_packet_id(id);
        ping.set_ack_id(self.remote_id);
        debug!("ping (local id {})", id);
        self.send(ping.as_bytes()).await;
    }

    /// Drop the session and start over; the state store is cleared in full
    async fn reconnect(&mut self, reason: &str) {
        warn!("reconnecting: {}", reason);
        self.shared.set_connection(ConnectionState::NotConnected);
        self.shared.state.lock().clear();
        self.shared.send.lock().reset();
        self.shared.set_session_id(HANDSHAKE_SESSION_ID);
        self.tracker.reset();
        self.remote_id = 0;
        self.timeouts = 0;
        self.pending.clear();
        self.send_hello().await;
    }

    async fn handle_datagram(&mut self, data: &[u8]) {
        let view = match PacketView::parse(data) {
            Ok(view) => view,
            Err(e) => {
                warn!("malformed datagram: {}", e);
                return;
            }
        };

        if view.length() as usize != data.len() {
            warn!(
                "{}",
                ProtocolError::LengthMismatch {
                    declared: view.length(),
                    received: data.len(),
                }
            );
            return;
        }

        let flags = view.flags();
        let connection = self.connection();

        if connection == ConnectionState::Active
            && view.session_id() != self.shared.session_id()
        {
            warn!(
                "packet for session {:#06x}, expected {:#06x}",
                view.session_id(),
                self.shared.session_id()
            );
            return;
        }

        if flags.contains(PacketFlags::INIT) {
            if connection != ConnectionState::Active {
                self.handle_init(&view).await;
            }
            return;
        }

        if flags.contains(PacketFlags::ACK_REPLY) {
            self.handle_ack_reply(view.ack_id());
        }

        if flags.contains(PacketFlags::RESEND_REQUEST)
            && connection == ConnectionState::Active
        {
            self.handle_resend_request(view.resend_id()).await;
        }

        if flags.contains(PacketFlags::ACK_REQUEST) {
            match connection {
                ConnectionState::Initializing => {
                    if view.length() as usize == HEADER_SIZE {
                        // Empty ACK request: the boot snapshot is complete.
                        self.activate(&view).await;
                    } else {
                        self.send_ack(view.packet_id(), None).await;
                        self.process_commands(&view).await;
                    }
                }
                ConnectionState::Active => {
                    let id = view.packet_id() & ID_MASK;
                    let fresh = self.tracker.add(id);
                    self.remote_id = id;
                    let gap = self.tracker.missing();
                    self.send_ack(id, gap).await;
                    if fresh {
                        self.process_commands(&view).await;
                    } else {
                        debug!("packet {} already processed", id);
                    }
                }
                _ => debug!("data packet before the handshake accepted, dropped"),
            }
        }
    }

    async fn handle_init(&mut self, view: &PacketView<'_>) {
        match view.init_status() {
            Some(INIT_STATUS_ACCEPT) => {
                debug!("handshake accepted, session {:#06x}", view.session_id());
                self.shared.set_session_id(view.session_id());
                self.shared.set_connection(ConnectionState::Initializing);

                let reply =
                    Packet::new(PacketFlags::ACK_REPLY, view.session_id(), HEADER_SIZE as u16);
                self.send(reply.as_bytes()).await;
            }
            Some(INIT_STATUS_NO_SLOT) => {
                warn!("switcher has no session slot available");
            }
            status => {
                warn!("unknown handshake status {:?}", status);
            }
        }
    }

    /// First empty ACK request after the boot snapshot: latch the session,
    /// restart both id sequences, and flush the staged boot events
    async fn activate(&mut self, view: &PacketView<'_>) {
        let session_id = view.session_id();
        self.shared.set_session_id(session_id);
        self.shared.send.lock().reset();
        self.tracker.reset();
        self.remote_id = 0;

        self.send_ack(view.packet_id(), None).await;
        self.shared.set_connection(ConnectionState::Active);
        info!("initialization done, session {:#06x}", session_id);

        for (event, packet_id) in self.pending.take() {
            self.shared.dispatcher.dispatch_one(event, packet_id);
        }
    }

    /// Acknowledge `ack_id`, folding in a resend request when a gap is open
    async fn send_ack(&self, ack_id: u16, missing: Option<u16>) {
        let flags = match missing {
            Some(_) => PacketFlags::ACK_REPLY | PacketFlags::RESEND_REQUEST,
            None => PacketFlags::ACK_REPLY,
        };
        let mut reply = Packet::new(flags, self.shared.session_id(), HEADER_SIZE as u16);
        reply.set_ack_id(ack_id);
        if let Some(missing) = missing {
            debug!("requesting resend of {}", missing);
            reply.set_resend_id(missing);
            reply.set_unknown(RESEND_MARKER);
        }
        self.send(reply.as_bytes()).await;
    }

    /// The peer acknowledged one of our packets; retention can let go
    fn handle_ack_reply(&mut self, ack_id: u16) {
        #[cfg(feature = "send-retention")]
        self.shared.send.lock().ring.ack(ack_id);
        #[cfg(not(feature = "send-retention"))]
        let _ = ack_id;
    }

    /// The peer missed one of our packets
    async fn handle_resend_request(&mut self, requested: u16) {
        warn!("resend requested for {}", requested);

        match self.retained_packet(requested) {
            Some(packet) => {
                self.send(&packet).await;
            }
            None => {
                // Not retained; claim it carried nothing so the peer's
                // receive window can move on.
                let mut substitute = Packet::new(
                    PacketFlags::ACK_REQUEST,
                    self.shared.session_id(),
                    HEADER_SIZE as u16,
                );
                substitute.set_packet_id(requested);
                self.send(substitute.as_bytes()).await;
            }
        }
    }

    #[cfg(feature = "send-retention")]
    fn retained_packet(&self, id: u16) -> Option<Bytes> {
        self.shared.send.lock().ring.get(id)
    }

    #[cfg(not(feature = "send-retention"))]
    fn retained_packet(&self, _id: u16) -> Option<Bytes> {
        None
    }

    /// Walk the packet's commands into the state store, then deliver the
    /// accumulated categories (or stage them while the boot snapshot runs)
    async fn process_commands(&mut self, view: &PacketView<'_>) {
        let packet_id = view.packet_id() & ID_MASK;
        let mut events = EventSet::new();

        {
            let mut state = self.shared.state.lock();
            let mut count = 0usize;
            for command in view.commands() {
                count += 1;
                if count > MAX_COMMANDS_PER_PACKET {
                    error!(
                        "{}",
                        ProtocolError::TooManyCommands(MAX_COMMANDS_PER_PACKET)
                    );
                    break;
                }
                match state.apply(command.tag, command.payload, packet_id) {
                    Some(event) => {
                        events.insert(event);
                    }
                    None => debug!("command {} ignored", command.tag),
                }
            }

            if events.contains(StateEvent::ProtocolVersion) {
                if let Some(version) = state.protocol_version() {
                    info!("protocol version {}", version);
                    self.shared.set_protocol_version(version);
                }
            }
        }

        if events.is_empty() {
            return;
        }

        if self.connection() == ConnectionState::Active {
            self.shared.dispatcher.dispatch(events, packet_id);
        } else {
            self.pending.stage(events, packet_id);
        }
    }
}
