//! Common test helpers for the ATEM client crates
//!
//! Provides:
//! - A scripted switcher peer over loopback UDP ([`ScriptedSwitcher`])
//! - An event collector for subscription testing ([`EventCollector`])
//! - Condition-based waiting (no hardcoded sleeps where a condition can
//!   be polled)

use atem_core::packet::{INIT_STATUS_ACCEPT, INIT_STATUS_HELLO};
use atem_core::{
    CommandTag, Packet, PacketFlags, PacketView, StateEvent, HEADER_SIZE,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Default wait budget for scripted exchanges
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Wait for a condition with timeout
pub async fn wait_for<F>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// One parsed frame received from the client under test
#[derive(Debug, Clone)]
pub struct Frame {
    pub flags: PacketFlags,
    pub length: u16,
    pub session_id: u16,
    pub ack_id: u16,
    pub resend_id: u16,
    pub unknown: u16,
    pub packet_id: u16,
    pub init_status: Option<u8>,
    data: Vec<u8>,
}

impl Frame {
    fn parse(data: &[u8]) -> Option<Frame> {
        let view = PacketView::parse(data).ok()?;
        Some(Frame {
            flags: view.flags(),
            length: view.length(),
            session_id: view.session_id(),
            ack_id: view.ack_id(),
            resend_id: view.resend_id(),
            unknown: view.unknown(),
            packet_id: view.packet_id(),
            init_status: if view.flags().contains(PacketFlags::INIT) {
                view.init_status()
            } else {
                None
            },
            data: data.to_vec(),
        })
    }

    pub fn is_hello(&self) -> bool {
        self.flags.contains(PacketFlags::INIT) && self.init_status == Some(INIT_STATUS_HELLO)
    }

    pub fn is_ack_of(&self, id: u16) -> bool {
        self.flags.contains(PacketFlags::ACK_REPLY) && self.ack_id == id
    }

    /// Commands carried by this frame as (tag, payload) pairs
    pub fn commands(&self) -> Vec<(CommandTag, Vec<u8>)> {
        match PacketView::parse(&self.data) {
            Ok(view) => view
                .commands()
                .map(|c| (c.tag, c.payload.to_vec()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn has_command(&self, tag: &[u8; 4]) -> bool {
        self.commands()
            .iter()
            .any(|(t, _)| t == &CommandTag::new(tag))
    }
}

/// A switcher-side peer driven explicitly by the test
///
/// Speaks the session layer over loopback UDP: accepts the handshake,
/// sends boot bursts and command packets with chosen ids, requests
/// resends, and inspects everything the client transmits.
pub struct ScriptedSwitcher {
    socket: Arc<UdpSocket>,
    peer: Mutex<Option<SocketAddr>>,
    session_id: u16,
    next_id: AtomicU16,
}

impl ScriptedSwitcher {
    pub async fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("bind scripted switcher");
        ScriptedSwitcher {
            socket: Arc::new(socket),
            peer: Mutex::new(None),
            session_id: 0x1234,
            next_id: AtomicU16::new(0),
        }
    }

    /// Address for the client to connect to
    pub fn addr(&self) -> String {
        self.socket
            .local_addr()
            .expect("local addr")
            .to_string()
    }

    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    /// Claim the next switcher-side packet id (first value 1)
    pub fn next_packet_id(&self) -> u16 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Receive one frame from the client, waiting up to `max_wait`
    pub async fn recv_frame(&self, max_wait: Duration) -> Option<Frame> {
        let mut buf = [0u8; 2048];
        let (n, from) = timeout(max_wait, self.socket.recv_from(&mut buf))
            .await
            .ok()?
            .ok()?;
        *self.peer.lock() = Some(from);
        Frame::parse(&buf[..n])
    }

    /// Receive frames until one matches, discarding the rest
    pub async fn expect_frame<F>(&self, max_wait: Duration, matches: F) -> Option<Frame>
    where
        F: Fn(&Frame) -> bool,
    {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let frame = self.recv_frame(remaining).await?;
            if matches(&frame) {
                return Some(frame);
            }
        }
    }

    /// Wait for an acknowledgement of switcher packet `id`
    pub async fn expect_ack(&self, id: u16) -> Option<Frame> {
        self.expect_frame(DEFAULT_TIMEOUT, |f| f.is_ack_of(id)).await
    }

    pub async fn send_raw(&self, data: &[u8]) {
        let peer = (*self.peer.lock()).expect("no client seen yet");
        self.socket.send_to(data, peer).await.expect("send frame");
    }

    pub async fn send_packet(&self, packet: &Packet) {
        self.send_raw(packet.as_bytes()).await;
    }

    /// Wait for the client's hello and accept it
    pub async fn accept_handshake(&self) {
        self.expect_frame(DEFAULT_TIMEOUT, Frame::is_hello)
            .await
            .expect("client hello");

        let mut accept = Packet::new(PacketFlags::INIT, self.session_id, 20);
        accept.body_mut()[0] = INIT_STATUS_ACCEPT;
        self.send_packet(&accept).await;
    }

    /// Build and send one data packet carrying the given commands
    ///
    /// Returns the packet id used.
    pub async fn send_commands(&self, commands: &[(&[u8; 4], Vec<u8>)]) -> u16 {
        let id = self.next_packet_id();
        self.send_commands_with_id(id, commands).await;
        id
    }

    /// As [`send_commands`](Self::send_commands) with an explicit id, for
    /// duplicate and out-of-order scripts
    pub async fn send_commands_with_id(&self, id: u16, commands: &[(&[u8; 4], Vec<u8>)]) {
        let mut body = Vec::new();
        for (tag, payload) in commands {
            put_command(&mut body, tag, payload);
        }

        let mut packet = Packet::from_body(PacketFlags::ACK_REQUEST, self.session_id, &body)
            .expect("scripted packet too large");
        packet.set_packet_id(id);
        self.send_packet(&packet).await;
    }

    /// End the boot snapshot: the empty ACK request that activates the
    /// client session
    ///
    /// Both sides restart their packet ids afterwards, so the next
    /// [`send_commands`](Self::send_commands) uses id 1 again.
    pub async fn finish_handshake(&self) -> u16 {
        let id = self.next_packet_id();
        let mut done = Packet::new(
            PacketFlags::ACK_REQUEST,
            self.session_id,
            HEADER_SIZE as u16,
        );
        done.set_packet_id(id);
        self.send_packet(&done).await;
        self.next_id.store(0, Ordering::SeqCst);
        id
    }

    /// Ask the client to resend packet `id`
    pub async fn request_resend(&self, id: u16) {
        let mut request = Packet::new(
            PacketFlags::RESEND_REQUEST,
            self.session_id,
            HEADER_SIZE as u16,
        );
        request.set_resend_id(id);
        request.set_unknown(0x0100);
        self.send_packet(&request).await;
    }

    /// Acknowledge a client packet
    pub async fn ack(&self, id: u16) {
        let mut reply = Packet::new(
            PacketFlags::ACK_REPLY,
            self.session_id,
            HEADER_SIZE as u16,
        );
        reply.set_ack_id(id);
        self.send_packet(&reply).await;
    }
}

/// Standard boot snapshot used by most scripts: version, product,
/// topology with `me` mix-effects and `aux` aux outputs
pub fn boot_commands(me: u8, aux: u8) -> Vec<(&'static [u8; 4], Vec<u8>)> {
    let mut version = vec![0u8; 4];
    version[0..2].copy_from_slice(&2u16.to_be_bytes());
    version[2..4].copy_from_slice(&30u16.to_be_bytes());

    let mut product = vec![0u8; 45];
    product[0..9].copy_from_slice(b"Test Atem");

    let mut topology = vec![0u8; 14];
    topology[0] = me;
    topology[2] = 2; // downstream keyers
    topology[3] = aux;
    topology[5] = 2; // media players

    vec![
        (b"_ver", version),
        (b"_pin", product),
        (b"_top", topology),
    ]
}

/// `PrgI` payload for a mix-effect and source
pub fn program_payload(me: u8, source: u16) -> Vec<u8> {
    let mut p = vec![0u8; 4];
    p[0] = me;
    p[2..4].copy_from_slice(&source.to_be_bytes());
    p
}

/// `PrvI` payload for a mix-effect and source
pub fn preview_payload(me: u8, source: u16) -> Vec<u8> {
    program_payload(me, source)
}

/// `AuxS` payload for a channel and source
pub fn aux_payload(channel: u8, source: u16) -> Vec<u8> {
    let mut p = vec![0u8; 4];
    p[0] = channel;
    p[2..4].copy_from_slice(&source.to_be_bytes());
    p
}

/// Collector for state-change events with thread-safe access
#[derive(Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<(StateEvent, u16)>>>,
    count: Arc<AtomicU32>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a callback suitable for `Atem::on_event`
    pub fn callback(&self) -> impl Fn(StateEvent, u16) + Send + Sync + 'static {
        let events = self.events.clone();
        let count = self.count.clone();

        move |event, packet_id| {
            events.lock().push((event, packet_id));
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<(StateEvent, u16)> {
        self.events.lock().clone()
    }

    pub fn has_event(&self, event: StateEvent) -> bool {
        self.events.lock().iter().any(|(e, _)| *e == event)
    }

    /// How many times `event` was delivered
    pub fn count_of(&self, event: StateEvent) -> usize {
        self.events.lock().iter().filter(|(e, _)| *e == event).count()
    }

    /// Wait for at least `n` events
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for(
            || self.count.load(Ordering::SeqCst) >= n,
            DEFAULT_CHECK_INTERVAL,
            max_wait,
        )
        .await
    }

    /// Wait until `event` has been delivered at least once
    pub async fn wait_for_event(&self, event: StateEvent, max_wait: Duration) -> bool {
        let events = self.events.clone();
        wait_for(
            || events.lock().iter().any(|(e, _)| *e == event),
            DEFAULT_CHECK_INTERVAL,
            max_wait,
        )
        .await
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

/// Append one command TLV to a plain body buffer
fn put_command(body: &mut Vec<u8>, tag: &[u8; 4], payload: &[u8]) {
    let total = (8 + payload.len()) as u16;
    body.extend_from_slice(&total.to_be_bytes());
    body.extend_from_slice(&[0, 0]);
    body.extend_from_slice(tag);
    body.extend_from_slice(payload);
}
