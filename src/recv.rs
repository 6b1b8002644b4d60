use log::{debug, error, info, warn};

use lot_packets::bitmap::BlockBitmap;
use lot_packets::frame::DataFrame;
use lot_types::{Direction, SessionState, TransferError, WindowColor};

use crate::context::{LotContext, Tables};
use crate::net::PacketLink;
use crate::timer::TimerToken;

/// One incoming transfer, owned by the context's receive table.
///
/// The reassembly buffer holds one window (`window_size * block_size`
/// bytes) and is preallocated when the context is created, so opening a
/// session on packet arrival never allocates.
pub(crate) struct RecvSession {
    pub(crate) id: u16,
    pub(crate) state: SessionState,
    pub(crate) buffer: Vec<u8>,
    /// Bytes held for the in-progress window.
    pub(crate) buffer_len: usize,
    /// Bytes delivered to the application across completed windows.
    pub(crate) offset: usize,
    pub(crate) blocks_received: u16,
    /// `window_size` until the LAST_BLOCK flag is seen, then the index of
    /// that block plus one.
    pub(crate) window_blocks_expected: u16,
    pub(crate) last_window: bool,
    pub(crate) bitmap: BlockBitmap,
    pub(crate) window_color: WindowColor,
}

impl RecvSession {
    pub(crate) fn new(buffer_capacity: usize, window_size: u16) -> Self {
        Self {
            id: 0,
            state: SessionState::Init,
            buffer: vec![0; buffer_capacity],
            buffer_len: 0,
            offset: 0,
            blocks_received: 0,
            window_blocks_expected: window_size,
            last_window: false,
            bitmap: BlockBitmap::all_missing(window_size),
            window_color: WindowColor::Even,
        }
    }

    pub(crate) fn open(&mut self, id: u16, window_size: u16) {
        self.id = id;
        self.buffer_len = 0;
        self.offset = 0;
        self.blocks_received = 0;
        self.window_blocks_expected = window_size;
        self.last_window = false;
        self.bitmap.reset();
        self.window_color = WindowColor::Even;
        self.state = SessionState::Open;
    }

    pub(crate) fn timer_token(&self) -> TimerToken {
        TimerToken {
            direction: Direction::Receive,
            session_id: self.id,
        }
    }
}

impl<L: PacketLink> LotContext<L> {
    /// Receiver half of the dispatcher: a DATA frame arrived for an open
    /// receive session.
    pub(crate) async fn process_block(&self, tables: &mut Tables, slot: usize, packet: &[u8]) {
        let session_id = tables.recv[slot].id;
        let frame = match DataFrame::parse(packet) {
            Ok(frame) => frame,
            Err(err) => {
                error!("Session {}: unparseable block: {:#}", session_id, err);
                self.close_recv_slot(tables, slot);
                let _ = self
                    .send_ack(session_id, Some(TransferError::InvalidPacket), &[])
                    .await;
                self.events.on_complete(
                    Direction::Receive,
                    session_id,
                    Err(TransferError::InvalidPacket),
                );
                return;
            }
        };

        // A color mismatch means the peer is replaying the previous window
        // because our acknowledgment was lost. Tell it to move on; no
        // receive state changes.
        if frame.flags.color() != tables.recv[slot].window_color {
            info!(
                "Session {}: block {} belongs to the previous window, replying wrong-window",
                session_id, frame.block_num
            );
            if let Err(err) = self
                .send_ack(session_id, Some(TransferError::WrongWindow), &[])
                .await
            {
                warn!(
                    "Session {}: failed to send acknowledgment: {}",
                    session_id, err
                );
            }
            return;
        }

        let block_size = self.params.block_size() as usize;
        if frame.block_num >= self.params.window_size || frame.data.len() > block_size {
            error!(
                "Session {}: invalid block, num {} of {} bytes",
                session_id,
                frame.block_num,
                frame.data.len()
            );
            self.close_recv_slot(tables, slot);
            let _ = self
                .send_ack(session_id, Some(TransferError::InvalidPacket), &[])
                .await;
            self.events.on_complete(
                Direction::Receive,
                session_id,
                Err(TransferError::InvalidPacket),
            );
            return;
        }

        if !tables.recv[slot].bitmap.is_missing(frame.block_num) {
            info!(
                "Session {}: duplicate block {}, ignoring",
                session_id, frame.block_num
            );
            return;
        }

        let token = tables.recv[slot].timer_token();
        let (window_complete, first_block) = {
            let session = &mut tables.recv[slot];
            session.bitmap.mark_received(frame.block_num);

            let at = (frame.block_num as usize) * block_size;
            session.buffer[at..at + frame.data.len()].copy_from_slice(frame.data);
            session.buffer_len += frame.data.len();
            session.blocks_received += 1;

            if frame.flags.last_block() {
                session.window_blocks_expected = frame.block_num + 1;
                session.last_window = true;
            }

            (
                session.blocks_received >= session.window_blocks_expected,
                session.blocks_received == 1,
            )
        };

        if !window_complete {
            if first_block {
                // delay the acknowledgment for the rest of the window
                self.timers.schedule(token, self.params.ack_delay());
            }
            return;
        }

        self.timers.cancel(token);

        let (delivered, last_window) = {
            let session = &mut tables.recv[slot];
            self.events.on_receive(
                session_id,
                &session.buffer[..session.buffer_len],
                !session.last_window,
            );

            session.offset += session.buffer_len;
            session.buffer_len = 0;
            session.blocks_received = 0;
            session.window_blocks_expected = self.params.window_size;
            session.bitmap.reset();
            session.window_color = session.window_color.toggled();
            (session.offset, session.last_window)
        };
        debug!(
            "Session {}: window delivered, {} bytes so far",
            session_id, delivered
        );

        if let Err(err) = self.send_ack(session_id, None, &[]).await {
            warn!(
                "Session {}: failed to send acknowledgment: {}",
                session_id, err
            );
        }

        if last_window {
            info!(
                "Receive session {} complete, {} bytes",
                session_id, delivered
            );
            self.close_recv_slot(tables, slot);
            self.events
                .on_complete(Direction::Receive, session_id, Ok(()));
        }
    }

    /// Delayed-ACK timer fired on a partial window: acknowledge with the
    /// bitmap of still-missing blocks. Fire and forget; if this ACK is
    /// lost the sender's retransmit timer rescues the session.
    pub(crate) async fn handle_ack_expiry(&self, session_id: u16) {
        let tables = self.tables.lock().await;
        let slot = match tables
            .recv
            .iter()
            .position(|s| s.id == session_id && s.state == SessionState::Open)
        {
            Some(slot) => slot,
            None => {
                debug!("Stale ACK timer for session {}", session_id);
                return;
            }
        };

        let session = &tables.recv[slot];
        if session.blocks_received == 0 {
            debug!("Session {}: ACK timer fired with no blocks held", session_id);
            return;
        }

        debug!(
            "Session {}: window incomplete ({} of {} blocks), acknowledging with bitmap",
            session_id, session.blocks_received, session.window_blocks_expected
        );
        if let Err(err) = self
            .send_ack(session_id, None, session.bitmap.wire_bytes())
            .await
        {
            warn!(
                "Session {}: failed to send acknowledgment: {}",
                session_id, err
            );
        }
    }

    /// Terminal close; silent, callers report completion where due.
    pub(crate) fn close_recv_slot(&self, tables: &mut Tables, slot: usize) {
        let session = &mut tables.recv[slot];
        session.state = SessionState::Closed;
        self.timers.cancel(session.timer_token());
    }
}
