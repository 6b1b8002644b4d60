//! Large object transfer: a stop-and-wait, window-based reliable transport
//! for pushing payloads bigger than the link MTU across an unreliable,
//! unordered packet link (BLE GATT style) and reassembling them on the peer.
//!
//! The engine fragments an object into MTU-sized blocks and sends them one
//! window at a time. The receiver tracks arrived blocks in a bitmap and
//! acknowledges each window, listing the still-missing blocks when its
//! delayed-ACK timer fires first. Windows alternate a 1-bit color so that a
//! replay after a lost acknowledgement is recognized instead of being
//! absorbed into the next window.
//!
//! The physical link is abstracted behind [PacketLink]; timers behind
//! [TimerScheduler]. Everything else lives in [LotContext].

pub mod context;
pub mod net;
pub mod params;
pub mod timer;

mod recv;
mod send;

pub use context::{LotContext, TransferEvents};
pub use net::{run_packet_pump, PacketLink};
pub use params::{TransferParams, TransferParamsBuilder};
pub use timer::{drive_timers, TimerScheduler, TimerToken, TokioTimers};

pub use lot_packets as packets;
pub use lot_types::{Direction, SessionState, TransferError, WindowColor};
