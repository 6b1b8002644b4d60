use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use log::debug;

use crate::context::LotContext;

/// Packet-oriented link the engine transmits over.
///
/// One call carries exactly one frame and one inbound notification delivers
/// exactly one frame; the link never splits or merges them. Reordering and
/// loss are tolerated by the protocol.
#[async_trait]
pub trait PacketLink: Send + Sync {
    /// Sends one frame, best effort. Returns the number of bytes the link
    /// accepted; anything below the frame length counts as a failure.
    async fn send_packet(&self, frame: &[u8]) -> Result<usize>;
}

/// Feeds a stream of inbound link packets into the context's dispatcher.
///
/// Spawn this next to [crate::timer::drive_timers]; together they form the
/// engine's single serialization domain. Runs until the stream ends.
pub async fn run_packet_pump<L, S>(context: Arc<LotContext<L>>, mut packets: S)
where
    L: PacketLink,
    S: Stream<Item = Vec<u8>> + Unpin,
{
    while let Some(packet) = packets.next().await {
        context.handle_packet(&packet).await;
    }
    debug!("Inbound packet stream ended, dispatcher pump exiting");
}
