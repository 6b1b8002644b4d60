use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use lot::{
    drive_timers, run_packet_pump, Direction, LotContext, PacketLink, TokioTimers, TransferError,
    TransferEvents, TransferParamsBuilder,
};

/// In-memory packet link joining the two demo contexts, dropping every nth
/// frame when asked to.
struct LossyLink {
    peer: UnboundedSender<Vec<u8>>,
    drop_every: usize,
    counter: AtomicUsize,
}

impl LossyLink {
    fn new(peer: UnboundedSender<Vec<u8>>, drop_every: usize) -> Arc<Self> {
        Arc::new(Self {
            peer,
            drop_every,
            counter: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PacketLink for LossyLink {
    async fn send_packet(&self, frame: &[u8]) -> Result<usize> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        if self.drop_every != 0 && n % self.drop_every == 0 {
            warn!("link: dropping frame #{} ({} bytes)", n, frame.len());
            // lost in transit, not refused by the link
            return Ok(frame.len());
        }
        self.peer
            .send(frame.to_vec())
            .map_err(|_| anyhow!("peer is gone"))?;
        Ok(frame.len())
    }
}

type Completion = (
    &'static str,
    Direction,
    u16,
    std::result::Result<(), TransferError>,
);

struct SideEvents {
    name: &'static str,
    received: Mutex<Vec<u8>>,
    completions: UnboundedSender<Completion>,
}

impl SideEvents {
    fn new(name: &'static str, completions: UnboundedSender<Completion>) -> Arc<Self> {
        Arc::new(Self {
            name,
            received: Mutex::new(Vec::new()),
            completions,
        })
    }
}

impl TransferEvents for SideEvents {
    fn on_receive(&self, session_id: u16, data: &[u8], more: bool) {
        info!(
            "{}: session {} delivered a window of {} bytes (more: {})",
            self.name,
            session_id,
            data.len(),
            more
        );
        self.received.lock().unwrap().extend_from_slice(data);
    }

    fn on_complete(
        &self,
        direction: Direction,
        session_id: u16,
        result: std::result::Result<(), TransferError>,
    ) {
        info!(
            "{}: session {} ({:?}) finished: {:?}",
            self.name, session_id, direction, result
        );
        let _ = self
            .completions
            .send((self.name, direction, session_id, result));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    // lot_test_cli [object_size] [drop_every]
    let mut args = std::env::args().skip(1);
    let object_size: usize = match args.next() {
        Some(arg) => arg.parse()?,
        None => 100_000,
    };
    let drop_every: usize = match args.next() {
        Some(arg) => arg.parse()?,
        None => 0,
    };
    if drop_every == 1 {
        bail!("drop_every of 1 loses every frame; use 0 or >= 2");
    }

    if drop_every == 0 {
        println!("Transferring {} bytes over an in-memory link", object_size);
    } else {
        println!(
            "Transferring {} bytes, dropping every {}th frame",
            object_size, drop_every
        );
    }

    let params = TransferParamsBuilder::default()
        .mtu(23)
        .window_size(4)
        .timeout_ms(100)
        .max_retries(3)
        .build()
        .map_err(|err| anyhow!("bad parameters: {}", err))?;

    let (to_sender_tx, to_sender_rx) = mpsc::unbounded_channel();
    let (to_receiver_tx, to_receiver_rx) = mpsc::unbounded_channel();
    let (completions_tx, mut completions) = mpsc::unbounded_channel();

    let sender_events = SideEvents::new("sender", completions_tx.clone());
    let receiver_events = SideEvents::new("receiver", completions_tx);

    let (sender_timers, sender_expired) = TokioTimers::new();
    let (receiver_timers, receiver_expired) = TokioTimers::new();

    let sender = Arc::new(LotContext::new(
        params,
        1,
        1,
        LossyLink::new(to_receiver_tx, drop_every),
        sender_timers,
        sender_events,
    )?);
    let receiver = Arc::new(LotContext::new(
        params,
        1,
        1,
        LossyLink::new(to_sender_tx, drop_every),
        receiver_timers,
        receiver_events.clone(),
    )?);

    tokio::spawn(run_packet_pump(
        sender.clone(),
        UnboundedReceiverStream::new(to_sender_rx),
    ));
    tokio::spawn(run_packet_pump(
        receiver.clone(),
        UnboundedReceiverStream::new(to_receiver_rx),
    ));
    tokio::spawn(drive_timers(sender.clone(), sender_expired));
    tokio::spawn(drive_timers(receiver.clone(), receiver_expired));

    let object: Arc<[u8]> = (0..object_size)
        .map(|i| (i % 251) as u8)
        .collect::<Vec<u8>>()
        .into();
    let session_id = sender.send(object.clone()).await?;
    info!("Transfer running as session {}", session_id);

    loop {
        let (side, direction, id, result) = completions
            .recv()
            .await
            .ok_or_else(|| anyhow!("engine went away"))?;
        match (side, direction, result) {
            ("receiver", Direction::Receive, Ok(())) => break,
            ("sender", Direction::Send, Ok(())) => {}
            ("sender", Direction::Send, Err(TransferError::Expired)) => {
                warn!("Session {} ran out of retries, resuming", id);
                sender.resume(id).await?;
            }
            (side, direction, result) => {
                warn!(
                    "{}: session {} ({:?}) ended with {:?}",
                    side, id, direction, result
                );
            }
        }
    }

    let received = receiver_events.received.lock().unwrap().clone();
    if received.as_slice() == &object[..] {
        println!("Object of {} bytes delivered intact", received.len());
    } else {
        bail!(
            "delivery mismatch: sent {} bytes, got {}",
            object.len(),
            received.len()
        );
    }

    sender.destroy().await;
    receiver.destroy().await;
    Ok(())
}
