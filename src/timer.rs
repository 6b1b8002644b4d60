use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use lot_types::Direction;

use crate::context::LotContext;
use crate::net::PacketLink;

/// Stable handle for one session's timer: the retransmit timer of a send
/// session or the delayed-ACK timer of a receive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub direction: Direction,
    pub session_id: u16,
}

/// One-shot timers keyed by [TimerToken].
///
/// Scheduling a token that is already pending restarts it. Expirations must
/// reach [LotContext::handle_timeout] on the engine's serialization domain,
/// never from inside `schedule`.
pub trait TimerScheduler: Send + Sync {
    fn schedule(&self, token: TimerToken, delay: Duration);
    fn cancel(&self, token: TimerToken);
}

/// Production scheduler backed by tokio sleep tasks.
///
/// Expired tokens are reported on the channel returned by [TokioTimers::new];
/// pass it to [drive_timers]. Requires a running tokio runtime.
pub struct TokioTimers {
    expired_tx: UnboundedSender<TimerToken>,
    pending: Mutex<HashMap<TimerToken, JoinHandle<()>>>,
}

impl TokioTimers {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<TimerToken>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                expired_tx,
                pending: Mutex::new(HashMap::new()),
            }),
            expired_rx,
        )
    }
}

impl TimerScheduler for TokioTimers {
    fn schedule(&self, token: TimerToken, delay: Duration) {
        let tx = self.expired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // receiver gone means the context is being torn down
            let _ = tx.send(token);
        });

        if let Some(previous) = self.pending.lock().unwrap().insert(token, task) {
            previous.abort();
        }
    }

    fn cancel(&self, token: TimerToken) {
        if let Some(task) = self.pending.lock().unwrap().remove(&token) {
            task.abort();
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, task) in self.pending.lock().unwrap().drain() {
            task.abort();
        }
    }
}

/// Forwards timer expirations into the context.
///
/// A cancel can race an expiration that is already in the channel; the
/// context treats such tokens as stale and ignores them.
pub async fn drive_timers<L: PacketLink>(
    context: Arc<LotContext<L>>,
    mut expired: UnboundedReceiver<TimerToken>,
) {
    while let Some(token) = expired.recv().await {
        context.handle_timeout(token).await;
    }
    debug!("Timer channel closed, timer pump exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_after_the_delay() {
        let (timers, mut expired) = TokioTimers::new();
        let token = TimerToken {
            direction: Direction::Send,
            session_id: 1,
        };

        tokio::time::pause();
        timers.schedule(token, Duration::from_millis(200));
        tokio::time::advance(Duration::from_millis(250)).await;

        assert_eq!(expired.recv().await, Some(token));
    }

    #[tokio::test]
    async fn cancel_suppresses_the_expiration() {
        let (timers, mut expired) = TokioTimers::new();
        let token = TimerToken {
            direction: Direction::Receive,
            session_id: 7,
        };

        tokio::time::pause();
        timers.schedule(token, Duration::from_millis(200));
        timers.cancel(token);
        tokio::time::advance(Duration::from_millis(500)).await;

        drop(timers); // closes the channel once no timer can fire anymore
        assert_eq!(expired.recv().await, None);
    }

    #[tokio::test]
    async fn reschedule_restarts_the_timer() {
        let (timers, mut expired) = TokioTimers::new();
        let token = TimerToken {
            direction: Direction::Send,
            session_id: 2,
        };

        tokio::time::pause();
        timers.schedule(token, Duration::from_millis(200));
        tokio::time::advance(Duration::from_millis(150)).await;
        timers.schedule(token, Duration::from_millis(200));
        tokio::time::advance(Duration::from_millis(150)).await;

        // 300ms elapsed but the restart pushed expiry to 350ms
        assert!(expired.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(expired.recv().await, Some(token));
    }
}
