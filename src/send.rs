use std::cmp::min;
use std::sync::Arc;

use log::{debug, error, info, warn};

use lot_packets::bitmap::wire_bit_is_missing;
use lot_packets::frame::{AckFrame, BlockFlags, DataFrame};
use lot_types::{Direction, SessionState, TransferError, WindowColor};

use crate::context::{LotContext, Tables};
use crate::net::PacketLink;
use crate::timer::TimerToken;

/// One outgoing transfer, owned by the context's send table.
pub(crate) struct SendSession {
    pub(crate) id: u16,
    pub(crate) state: SessionState,
    /// The whole object, shared with the caller. Never copied, never
    /// written; dropped once the session terminates.
    pub(crate) object: Arc<[u8]>,
    /// Bytes acknowledged through the previous window. A multiple of the
    /// block size until the final short window completes.
    pub(crate) offset: usize,
    pub(crate) window_color: WindowColor,
    pub(crate) retries_left: u16,
    /// Set while the current window has been re-emitted in full and not
    /// yet advanced. A receiver answers every block of a replayed window
    /// with its own WrongWindow ACK, and a late duplicate of an old block
    /// provokes the same reply; honoring more than the first would advance
    /// the window again and corrupt the stream.
    pub(crate) window_retransmitted: bool,
}

impl SendSession {
    pub(crate) fn new() -> Self {
        Self {
            id: 0,
            state: SessionState::Init,
            object: Vec::new().into(),
            offset: 0,
            window_color: WindowColor::Even,
            retries_left: 0,
            window_retransmitted: false,
        }
    }

    fn open(&mut self, id: u16, object: Arc<[u8]>, max_retries: u16) {
        self.id = id;
        self.object = object;
        self.offset = 0;
        self.window_color = WindowColor::Even;
        self.retries_left = max_retries;
        self.window_retransmitted = false;
        // state flips to Open only once the first window went out
    }

    pub(crate) fn timer_token(&self) -> TimerToken {
        TimerToken {
            direction: Direction::Send,
            session_id: self.id,
        }
    }

    /// Whether the window at the current offset covers the object's tail.
    fn window_includes_last(&self, window_size: u16, block_size: u16) -> bool {
        self.offset + (window_size as usize) * (block_size as usize) >= self.object.len()
    }
}

/// Any block of the window still flagged missing by the peer's bitmap.
fn has_missing_blocks(bitmap: &[u8], window_size: u16) -> bool {
    !bitmap.is_empty() && (0..window_size).any(|block| wire_bit_is_missing(bitmap, block))
}

impl<L: PacketLink> LotContext<L> {
    /// Starts sending an object. Returns the assigned session id, written
    /// to the caller only on success.
    pub async fn send(&self, object: Arc<[u8]>) -> Result<u16, TransferError> {
        if object.is_empty() {
            return Err(TransferError::InvalidParam);
        }
        let object_len = object.len();

        let mut tables = self.tables.lock().await;
        let slot = tables
            .send
            .iter()
            .position(|session| session.state.is_free())
            .ok_or(TransferError::MaxSessions)?;
        let session_id = slot as u16 + 1;

        tables.send[slot].open(session_id, object, self.params.max_retries);
        if let Err(err) = self.transmit_window(&tables.send[slot], None).await {
            let session = &mut tables.send[slot];
            session.id = 0;
            session.state = SessionState::Init;
            session.object = Vec::new().into();
            return Err(err);
        }

        let session = &mut tables.send[slot];
        session.state = SessionState::Open;
        self.timers
            .schedule(session.timer_token(), self.params.retransmit_delay());
        info!("Send session {} opened, {} bytes", session_id, object_len);
        Ok(session_id)
    }

    /// Resumes a session parked as resumable after a transient failure.
    /// Re-emits the current window with the same color and offset.
    pub async fn resume(&self, session_id: u16) -> Result<(), TransferError> {
        let mut tables = self.tables.lock().await;
        let slot = tables
            .send
            .iter()
            .position(|s| s.id == session_id && s.state == SessionState::Resumable)
            .ok_or(TransferError::InvalidParam)?;
        if tables.send[slot].offset >= tables.send[slot].object.len() {
            return Err(TransferError::InvalidParam);
        }

        // the peer may have acknowledged this window into the void already
        tables.send[slot].window_retransmitted = true;
        self.transmit_window(&tables.send[slot], None).await?;

        let session = &mut tables.send[slot];
        session.state = SessionState::Open;
        session.retries_left = self.params.max_retries;
        self.timers
            .schedule(session.timer_token(), self.params.retransmit_delay());
        info!(
            "Send session {} resumed at offset {}",
            session_id, session.offset
        );
        Ok(())
    }

    /// Emits the current window: up to `window_size` blocks from the
    /// session offset, stopping after the block that reaches the object's
    /// end (flagged LAST_BLOCK). With a bitmap, only the blocks the peer
    /// still misses go out.
    pub(crate) async fn transmit_window(
        &self,
        session: &SendSession,
        missing: Option<&[u8]>,
    ) -> Result<(), TransferError> {
        let block_size = self.params.block_size() as usize;
        let object = &session.object;

        for block_num in 0..self.params.window_size {
            let start = session.offset + (block_num as usize) * block_size;
            if start >= object.len() {
                break;
            }
            if let Some(bitmap) = missing {
                if !wire_bit_is_missing(bitmap, block_num) {
                    continue;
                }
            }

            let end = min(start + block_size, object.len());
            let last_block = end == object.len();
            let frame = DataFrame {
                session_id: session.id,
                block_num,
                flags: BlockFlags::emit(session.window_color, last_block),
                data: &object[start..end],
            };
            self.send_frame(&frame.encode()).await?;
            debug!(
                "Session {}: sent block {} ({} bytes{})",
                session.id,
                block_num,
                end - start,
                if last_block { ", last" } else { "" }
            );

            if last_block {
                break;
            }
        }

        Ok(())
    }

    /// Sender half of the dispatcher: an ACK arrived for an open send
    /// session.
    pub(crate) async fn process_ack(&self, tables: &mut Tables, slot: usize, packet: &[u8]) {
        let session_id = tables.send[slot].id;
        let ack = match AckFrame::parse(packet) {
            Ok(ack) => ack,
            Err(err) => {
                // unreachable after the dispatcher's length check
                error!("Session {}: unparseable ACK: {:#}", session_id, err);
                self.close_send_slot(tables, slot);
                self.events.on_complete(
                    Direction::Send,
                    session_id,
                    Err(TransferError::InvalidPacket),
                );
                return;
            }
        };

        let token = tables.send[slot].timer_token();
        self.timers.cancel(token);
        tables.send[slot].retries_left = self.params.max_retries;

        match ack.error {
            None => {
                if has_missing_blocks(ack.bitmap, self.params.window_size) {
                    debug!(
                        "Session {}: peer still missing blocks, bitmap {:?}",
                        session_id, ack.bitmap
                    );
                    tables.send[slot].window_retransmitted = false;
                    if let Err(err) = self
                        .transmit_window(&tables.send[slot], Some(ack.bitmap))
                        .await
                    {
                        self.park_send_slot(tables, slot, err);
                    }
                } else {
                    self.window_acked(tables, slot).await;
                }
            }
            Some(TransferError::WrongWindow) => {
                if tables.send[slot].window_retransmitted {
                    info!(
                        "Session {}: replayed window acknowledged as wrong-window, advancing",
                        session_id
                    );
                    self.window_acked(tables, slot).await;
                } else {
                    debug!("Session {}: stale wrong-window reply, ignoring", session_id);
                }
            }
            Some(err) => {
                warn!("Session {}: peer aborted with {}", session_id, err);
                self.close_send_slot(tables, slot);
                self.events
                    .on_complete(Direction::Send, session_id, Err(err));
            }
        }

        if tables.send[slot].state == SessionState::Open {
            self.timers.schedule(token, self.params.retransmit_delay());
        }
    }

    /// The current window is fully received: complete the session if it
    /// covered the object's tail, otherwise slide to the next window.
    async fn window_acked(&self, tables: &mut Tables, slot: usize) {
        let window_size = self.params.window_size;
        let block_size = self.params.block_size();

        if tables.send[slot].window_includes_last(window_size, block_size) {
            let session = &mut tables.send[slot];
            let session_id = session.id;
            session.offset = session.object.len();
            session.state = SessionState::Closed;
            session.object = Vec::new().into();
            info!("Send session {} complete", session_id);
            self.events.on_complete(Direction::Send, session_id, Ok(()));
            return;
        }

        {
            let session = &mut tables.send[slot];
            session.offset += (window_size as usize) * (block_size as usize);
            session.window_color = session.window_color.toggled();
            session.window_retransmitted = false;
            debug!(
                "Session {}: window acknowledged, next offset {}",
                session.id, session.offset
            );
        }

        if let Err(err) = self.transmit_window(&tables.send[slot], None).await {
            self.park_send_slot(tables, slot, err);
        }
    }

    /// Retransmit timer fired: replay the window while retries remain,
    /// otherwise park the session for a later [LotContext::resume].
    pub(crate) async fn handle_retransmit_expiry(&self, session_id: u16) {
        let mut tables = self.tables.lock().await;
        let slot = match tables
            .send
            .iter()
            .position(|s| s.id == session_id && s.state == SessionState::Open)
        {
            Some(slot) => slot,
            None => {
                debug!("Stale retransmit timer for session {}", session_id);
                return;
            }
        };

        if tables.send[slot].retries_left == 0 {
            warn!("Session {}: no retries remaining", session_id);
            self.park_send_slot(&mut tables, slot, TransferError::Expired);
            return;
        }

        let session = &mut tables.send[slot];
        session.retries_left -= 1;
        session.window_retransmitted = true;
        debug!(
            "Session {}: retransmitting window at offset {}, {} retries left",
            session_id, session.offset, session.retries_left
        );

        match self.transmit_window(&tables.send[slot], None).await {
            Ok(()) => self.timers.schedule(
                tables.send[slot].timer_token(),
                self.params.retransmit_delay(),
            ),
            Err(err) => self.park_send_slot(&mut tables, slot, err),
        }
    }

    /// Transient failure: keep the object and offset, stop transmitting,
    /// let the caller resume.
    fn park_send_slot(&self, tables: &mut Tables, slot: usize, err: TransferError) {
        let session = &mut tables.send[slot];
        session.state = SessionState::Resumable;
        let session_id = session.id;
        self.timers.cancel(session.timer_token());
        warn!("Send session {} parked as resumable: {}", session_id, err);
        self.events
            .on_complete(Direction::Send, session_id, Err(err));
    }

    /// Terminal close; silent, callers report completion where due.
    pub(crate) fn close_send_slot(&self, tables: &mut Tables, slot: usize) {
        let session = &mut tables.send[slot];
        session.state = SessionState::Closed;
        session.object = Vec::new().into();
        self.timers.cancel(session.timer_token());
    }
}
