use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::SessionError;

type Waiter = oneshot::Sender<Result<serde_json::Value, SessionError>>;

#[derive(Default)]
struct Table {
    waiters: HashMap<u64, Waiter>,
    closed: bool,
}

/// Method calls waiting for their result, keyed by sequence number.
#[derive(Default)]
pub(crate) struct PendingCalls {
    next_seq: AtomicU64,
    table: Mutex<Table>,
}

impl PendingCalls {
    /// Allocates a sequence number and the receiver its result arrives on.
    pub(crate) fn register(
        &self,
    ) -> Result<(u64, oneshot::Receiver<Result<serde_json::Value, SessionError>>), SessionError>
    {
        let mut table = self.table.lock();
        if table.closed {
            return Err(SessionError::ConnectionClosed);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        table.waiters.insert(seq, tx);
        Ok((seq, rx))
    }

    /// Hands a result to its waiter. Returns `false` when nobody waits for
    /// `seq` any more, e.g. after a timeout.
    pub(crate) fn complete(&self, seq: u64, outcome: Result<serde_json::Value, SessionError>) -> bool {
        let Some(waiter) = self.table.lock().waiters.remove(&seq) else {
            return false;
        };
        waiter.send(outcome).is_ok()
    }

    pub(crate) fn cancel(&self, seq: u64) -> bool {
        self.table.lock().waiters.remove(&seq).is_some()
    }

    /// Fails every waiter with `ConnectionClosed` and refuses new calls.
    pub(crate) fn close(&self) -> usize {
        let waiters = {
            let mut table = self.table.lock();
            table.closed = true;
            std::mem::take(&mut table.waiters)
        };
        let count = waiters.len();
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(SessionError::ConnectionClosed));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.table.lock().waiters.len()
    }
}
