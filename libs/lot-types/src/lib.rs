use core::fmt::{self, Display};
use std::error::Error;

/// Direction of a transfer session, relative to the local side.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Receive,
}

/// 1-bit window label attached to every block of a window.
///
/// Toggles once per acknowledged window. The receiver uses it to recognize
/// a replay of the previous window after its ACK was lost.
///
/// ```
/// use lot_types::WindowColor;
///
/// assert_eq!(WindowColor::Even.toggled(), WindowColor::Odd);
/// assert_eq!(WindowColor::Odd.toggled(), WindowColor::Even);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WindowColor {
    Even,
    Odd,
}

impl WindowColor {
    pub fn toggled(self) -> Self {
        match self {
            WindowColor::Even => WindowColor::Odd,
            WindowColor::Odd => WindowColor::Even,
        }
    }
}

/// Lifecycle of a session slot.
///
/// `Resumable` is reachable on the send side only, after a transient
/// failure. `Closed` is terminal. Slots in `Init` or `Closed` are free for
/// reuse.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Open,
    Resumable,
    Closed,
}

impl SessionState {
    pub fn is_free(self) -> bool {
        matches!(self, SessionState::Init | SessionState::Closed)
    }
}

/// Shared error enumeration for the transfer protocol.
///
/// The first five variants are peer-observable and travel in the error_code
/// byte of an ACK frame; the rest are local-only and are reported through
/// the completion callback or API return values, never on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferError {
    MaxSessions,
    SessionNotFound,
    SessionAborted,
    WrongWindow,
    InvalidPacket,

    NoMemory,
    Network,
    Expired,
    InvalidParam,
    Internal,
}

impl TransferError {
    /// Wire numbering shared with the peer. Success is 0 and is represented
    /// by the absence of an error (`None`), so codes start at 1.
    ///
    /// ```
    /// use lot_types::TransferError;
    ///
    /// assert_eq!(TransferError::MaxSessions.wire_code(), 1);
    /// assert_eq!(TransferError::WrongWindow.wire_code(), 4);
    /// assert_eq!(TransferError::InvalidPacket.wire_code(), 5);
    /// ```
    pub fn wire_code(self) -> u8 {
        match self {
            TransferError::MaxSessions => 1,
            TransferError::SessionNotFound => 2,
            TransferError::SessionAborted => 3,
            TransferError::WrongWindow => 4,
            TransferError::InvalidPacket => 5,
            TransferError::NoMemory => 6,
            TransferError::Network => 7,
            TransferError::Expired => 8,
            TransferError::InvalidParam => 9,
            TransferError::Internal => 10,
        }
    }

    /// Interprets an error_code byte received from the peer.
    ///
    /// `0` is success. Codes a peer should never send (the local-only range
    /// and anything unassigned) decode as [TransferError::Internal] rather
    /// than being rejected; the session aborts with that error either way.
    ///
    /// ```
    /// use lot_types::TransferError;
    ///
    /// assert_eq!(TransferError::from_wire(0), None);
    /// assert_eq!(TransferError::from_wire(4), Some(TransferError::WrongWindow));
    /// assert_eq!(TransferError::from_wire(200), Some(TransferError::Internal));
    /// ```
    pub fn from_wire(code: u8) -> Option<TransferError> {
        match code {
            0 => None,
            1 => Some(TransferError::MaxSessions),
            2 => Some(TransferError::SessionNotFound),
            3 => Some(TransferError::SessionAborted),
            4 => Some(TransferError::WrongWindow),
            5 => Some(TransferError::InvalidPacket),
            _ => Some(TransferError::Internal),
        }
    }
}

impl Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::MaxSessions => f.write_str("maximum number of sessions reached"),
            TransferError::SessionNotFound => f.write_str("session not found"),
            TransferError::SessionAborted => f.write_str("session aborted"),
            TransferError::WrongWindow => f.write_str("block belongs to a previous window"),
            TransferError::InvalidPacket => f.write_str("invalid packet"),
            TransferError::NoMemory => f.write_str("out of memory"),
            TransferError::Network => f.write_str("network send failed"),
            TransferError::Expired => f.write_str("retries exhausted"),
            TransferError::InvalidParam => f.write_str("invalid parameter"),
            TransferError::Internal => f.write_str("internal error"),
        }
    }
}

impl Error for TransferError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_round_trip() {
        for err in [
            TransferError::MaxSessions,
            TransferError::SessionNotFound,
            TransferError::SessionAborted,
            TransferError::WrongWindow,
            TransferError::InvalidPacket,
        ] {
            assert_eq!(TransferError::from_wire(err.wire_code()), Some(err));
        }
    }

    #[test]
    fn local_codes_never_round_trip() {
        // A peer sending a local-only code is misbehaving; the decode
        // collapses those onto Internal.
        assert_eq!(
            TransferError::from_wire(TransferError::Expired.wire_code()),
            Some(TransferError::Internal)
        );
    }

    #[test]
    fn free_states() {
        assert!(SessionState::Init.is_free());
        assert!(SessionState::Closed.is_free());
        assert!(!SessionState::Open.is_free());
        assert!(!SessionState::Resumable.is_free());
    }
}
