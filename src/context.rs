use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use lot_packets::frame::{self, AckFrame, ACK_HEADER_LEN};
use lot_types::{Direction, SessionState, TransferError};

use crate::net::PacketLink;
use crate::params::TransferParams;
use crate::recv::RecvSession;
use crate::send::SendSession;
use crate::timer::{TimerScheduler, TimerToken};

/// Callbacks the application installs when creating a context.
///
/// Both run on the engine's serialization domain while the session tables
/// are locked; do not call back into the context from inside them.
pub trait TransferEvents: Send + Sync {
    /// One completed window of a receive session, delivered in strictly
    /// increasing offset order. `more` is false on the final window.
    fn on_receive(&self, session_id: u16, data: &[u8], more: bool);

    /// A session terminated: `Ok` on success, `Err(Expired)` when the send
    /// side ran out of retries (the session stays resumable), or the error
    /// that killed it.
    fn on_complete(
        &self,
        direction: Direction,
        session_id: u16,
        result: Result<(), TransferError>,
    );
}

pub(crate) struct Tables {
    pub(crate) send: Vec<SendSession>,
    pub(crate) recv: Vec<RecvSession>,
}

/// The container for one logical connection: transfer parameters, fixed
/// send/receive session tables and the link they share.
///
/// All entry points (`send`, `resume`, `close`, [LotContext::handle_packet],
/// [LotContext::handle_timeout]) serialize on one mutex held for the whole
/// event, link sends included.
pub struct LotContext<L: PacketLink> {
    pub(crate) link: Arc<L>,
    pub(crate) timers: Arc<dyn TimerScheduler>,
    pub(crate) events: Arc<dyn TransferEvents>,
    pub(crate) params: TransferParams,
    pub(crate) tables: Mutex<Tables>,
}

impl<L: PacketLink> LotContext<L> {
    /// Builds a context with `num_send` send slots and `num_recv` receive
    /// slots. Receive buffers are allocated here, once.
    pub fn new(
        params: TransferParams,
        num_send: u16,
        num_recv: u16,
        link: Arc<L>,
        timers: Arc<dyn TimerScheduler>,
        events: Arc<dyn TransferEvents>,
    ) -> Result<Self, TransferError> {
        params.validate()?;

        let buffer_capacity = (params.window_size as usize) * (params.block_size() as usize);
        let send = (0..num_send).map(|_| SendSession::new()).collect();
        let recv = (0..num_recv)
            .map(|_| RecvSession::new(buffer_capacity, params.window_size))
            .collect();

        Ok(Self {
            link,
            timers,
            events,
            params,
            tables: Mutex::new(Tables { send, recv }),
        })
    }

    /// Single entry point for inbound link packets.
    ///
    /// Routes by the 16-bit session id prefix: ACKs to the send table,
    /// DATA to the receive table, opening a receive session on demand for
    /// unknown ids.
    pub async fn handle_packet(&self, packet: &[u8]) {
        if packet.len() < ACK_HEADER_LEN {
            warn!("Dropping runt packet of {} bytes", packet.len());
            return;
        }
        let session_id = match frame::peek_session_id(packet) {
            Some(id) if id != 0 => id,
            _ => {
                warn!("Dropping packet with reserved session id 0");
                return;
            }
        };

        let mut tables = self.tables.lock().await;

        if let Some(slot) = tables.send.iter().position(|s| s.id == session_id) {
            if tables.send[slot].state == SessionState::Open {
                self.process_ack(&mut tables, slot, packet).await;
            } else {
                // The peer's receiver cannot act on an error reply, and
                // answering an ACK with an ACK would bounce between two
                // closed sessions forever.
                debug!(
                    "Dropping packet for send session {} in state {:?}",
                    session_id, tables.send[slot].state
                );
            }
            return;
        }

        if let Some(slot) = tables.recv.iter().position(|s| s.id == session_id) {
            match tables.recv[slot].state {
                SessionState::Open | SessionState::Resumable => {
                    self.process_block(&mut tables, slot, packet).await;
                }
                state => {
                    warn!(
                        "Block for receive session {} in state {:?}",
                        session_id, state
                    );
                    let _ = self
                        .send_ack(session_id, Some(TransferError::SessionAborted), &[])
                        .await;
                }
            }
            return;
        }

        match tables.recv.iter().position(|s| s.state.is_free()) {
            Some(slot) => {
                let window_size = self.params.window_size;
                tables.recv[slot].open(session_id, window_size);
                info!("Receive session {} opened", session_id);
                self.process_block(&mut tables, slot, packet).await;
            }
            None => {
                warn!("No free receive slot for session {}", session_id);
                let _ = self
                    .send_ack(session_id, Some(TransferError::SessionNotFound), &[])
                    .await;
            }
        }
    }

    /// Entry point for timer expirations, wired up by
    /// [crate::timer::drive_timers].
    pub async fn handle_timeout(&self, token: TimerToken) {
        match token.direction {
            Direction::Send => self.handle_retransmit_expiry(token.session_id).await,
            Direction::Receive => self.handle_ack_expiry(token.session_id).await,
        }
    }

    /// Forces a session into the closed state, stops its timer and frees
    /// the slot for reuse. Idempotent; no completion callback fires.
    pub async fn close(&self, direction: Direction, session_id: u16) -> Result<(), TransferError> {
        if session_id == 0 {
            return Err(TransferError::InvalidParam);
        }

        let mut tables = self.tables.lock().await;
        match direction {
            Direction::Send => {
                let slot = tables
                    .send
                    .iter()
                    .position(|s| s.id == session_id)
                    .ok_or(TransferError::SessionNotFound)?;
                self.close_send_slot(&mut tables, slot);
            }
            Direction::Receive => {
                let slot = tables
                    .recv
                    .iter()
                    .position(|s| s.id == session_id)
                    .ok_or(TransferError::SessionNotFound)?;
                self.close_recv_slot(&mut tables, slot);
            }
        }
        info!("Session {} ({:?}) closed", session_id, direction);
        Ok(())
    }

    /// Aborts every session and cancels every timer. Completion callbacks
    /// do not fire; the caller asked for the teardown.
    pub async fn destroy(&self) {
        let mut tables = self.tables.lock().await;
        for slot in 0..tables.send.len() {
            if !tables.send[slot].state.is_free() {
                self.close_send_slot(&mut tables, slot);
            }
        }
        for slot in 0..tables.recv.len() {
            if !tables.recv[slot].state.is_free() {
                self.close_recv_slot(&mut tables, slot);
            }
        }
        info!("Context destroyed");
    }

    /// One frame onto the link; anything short of a full send is a
    /// network failure.
    pub(crate) async fn send_frame(&self, bytes: &[u8]) -> Result<(), TransferError> {
        match self.link.send_packet(bytes).await {
            Ok(sent) if sent >= bytes.len() => Ok(()),
            Ok(sent) => {
                warn!("Link accepted {} of {} bytes", sent, bytes.len());
                Err(TransferError::Network)
            }
            Err(err) => {
                warn!("Link send failed: {:#}", err);
                Err(TransferError::Network)
            }
        }
    }

    pub(crate) async fn send_ack(
        &self,
        session_id: u16,
        error: Option<TransferError>,
        bitmap: &[u8],
    ) -> Result<(), TransferError> {
        let frame = AckFrame {
            session_id,
            error,
            bitmap,
        };
        self.send_frame(&frame.encode()).await
    }
}
