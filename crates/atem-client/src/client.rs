//! The client handle

use crate::builder::AtemBuilder;
use crate::error::{ClientError, Result};
use crate::events::EventCallback;
use crate::session::{ConnectionState, SessionEngine, Shared};
use atem_core::{Command, Packet, PacketFlags, StateEvent, SwitcherState, HEADER_SIZE, MAX_PACKET_SIZE};
use atem_transport::Datagram;
use bytes::BytesMut;
use parking_lot::MutexGuard;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Budget for acquiring the state lock from an API call
const STATE_LOCK_BUDGET: Duration = Duration::from_millis(150);

/// Budget for acquiring the send lock from an API call
const SEND_LOCK_BUDGET: Duration = Duration::from_millis(50);

/// Largest command batch one packet can carry
const MAX_BATCH_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// A client session with one switcher
///
/// Constructed per switcher; several clients can coexist in a process,
/// each with its own socket. Dropping the client (or calling [`close`])
/// stops the receive task and frees any retained packets.
///
/// [`close`]: Atem::close
pub struct Atem {
    shared: Arc<Shared>,
}

impl Atem {
    /// Connect to a switcher and begin the handshake in the background
    ///
    /// `address` is `host`, `host:port`, or `ip:port`; the port defaults
    /// to 9910. Returns as soon as the socket is up — poll [`connected`]
    /// or subscribe to events to learn when the mirror is live.
    ///
    /// [`connected`]: Atem::connected
    pub async fn connect(address: &str) -> Result<Atem> {
        AtemBuilder::new(address).connect().await
    }

    /// Create a builder for more options
    pub fn builder(address: &str) -> AtemBuilder {
        AtemBuilder::new(address)
    }

    pub(crate) fn start(socket: Arc<dyn Datagram>, retention: usize) -> Atem {
        let shared = Arc::new(Shared::new(socket, retention));
        tokio::spawn(SessionEngine::new(shared.clone()).run());
        Atem { shared }
    }

    /// Whether the session is established and the mirror is being fed
    pub fn connected(&self) -> bool {
        self.shared.connection() == ConnectionState::Active
    }

    /// Current position in the connection lifecycle
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection()
    }

    /// Acquire the state lock and return a read guard over the mirror
    ///
    /// Acquisition is bounded (150 ms); contention past the budget is
    /// reported as [`ClientError::StateLockTimeout`] rather than blocking
    /// the caller indefinitely. Hold the guard across related queries for
    /// a consistent snapshot, but release it within a frame (~16 ms) and
    /// never perform I/O or re-enter this client while holding it.
    pub fn state(&self) -> Result<StateGuard<'_>> {
        self.shared
            .state
            .try_lock_for(STATE_LOCK_BUDGET)
            .map(StateGuard)
            .ok_or(ClientError::StateLockTimeout)
    }

    /// Send a batch of commands as one packet with one fresh packet id
    ///
    /// The batch must be non-empty and fit the packet ceiling. The send
    /// itself never blocks; a busy send lock is reported after 50 ms.
    /// Retained copies (for peer-requested retransmission) are freed on
    /// reconnect.
    pub fn send_commands(&self, commands: Vec<Command>) -> Result<()> {
        if commands.is_empty() {
            return Err(ClientError::EmptyBatch);
        }

        let version = self.shared.protocol_version();
        let mut body = BytesMut::new();
        for command in &commands {
            command.write(&mut body, version);
        }

        if body.len() > MAX_BATCH_SIZE {
            return Err(ClientError::BatchTooLarge {
                size: body.len(),
                max: MAX_BATCH_SIZE,
            });
        }

        let mut send = self
            .shared
            .send
            .try_lock_for(SEND_LOCK_BUDGET)
            .ok_or(ClientError::SendLockTimeout)?;

        let id = send.next_id();
        let mut packet = Packet::from_body(
            PacketFlags::ACK_REQUEST,
            self.shared.session_id(),
            &body,
        )?;
        packet.set_packet_id(id);
        let bytes = packet.into_bytes();

        debug!("sending {} command(s) as packet {}", commands.len(), id);
        self.shared.socket.try_send(&bytes)?;
        send.retain(id, bytes);
        Ok(())
    }

    /// Subscribe to state-change events; returns the subscription id
    ///
    /// The callback receives the change category and the id of the packet
    /// that carried it, at most once per category per packet. It runs on
    /// the receive task: return quickly and do not touch [`state`] from
    /// inside it.
    ///
    /// [`state`]: Atem::state
    pub fn on_event<F>(&self, callback: F) -> u32
    where
        F: Fn(StateEvent, u16) + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe(Box::new(callback) as EventCallback)
    }

    /// Remove a subscription
    pub fn off_event(&self, id: u32) -> bool {
        self.shared.dispatcher.unsubscribe(id)
    }

    /// Approximate memory footprint of the mirror and the retention ring
    pub fn size_in_bytes(&self) -> Result<usize> {
        let state = self
            .shared
            .state
            .try_lock_for(STATE_LOCK_BUDGET)
            .ok_or(ClientError::StateLockTimeout)?;
        let send = self
            .shared
            .send
            .try_lock_for(SEND_LOCK_BUDGET)
            .ok_or(ClientError::SendLockTimeout)?;
        Ok(state.size_in_bytes() + send.size_in_bytes())
    }

    /// Stop the receive task and end the session
    ///
    /// The task notices within one read timeout. No goodbye is sent; the
    /// switcher ages the session out on its own.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for Atem {
    fn drop(&mut self) {
        self.close();
    }
}

/// Scoped read access to the mirrored state
///
/// Releases the lock on drop, on every exit path. All typed queries of
/// [`SwitcherState`] are available through deref.
pub struct StateGuard<'a>(pub(crate) MutexGuard<'a, SwitcherState>);

impl Deref for StateGuard<'_> {
    type Target = SwitcherState;

    fn deref(&self) -> &SwitcherState {
        &self.0
    }
}
