use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use log::trace;
use crate::utils::{ArrayDynF, GenericResult};

/// Moves blobs between partitions. Bridge layers are the only callers.
///
/// `recv` is the single suspension point the core tolerates: it blocks until
/// the remote blob is materialized, or fails. The core surfaces transport
/// failures upward as pass failures; retrying belongs to the external
/// scheduler.
pub trait BlobTransport: Send + Sync {
    fn send(&self, channel: &str, blob: &ArrayDynF) -> GenericResult<()>;
    fn recv(&self, channel: &str) -> GenericResult<ArrayDynF>;
}

struct ChannelState {
    queues: HashMap<String, VecDeque<ArrayDynF>>,
    closed: bool,
}

/// In-process transport backed by named FIFO queues. Used to wire partitions
/// living in the same address space and as the reference implementation for
/// the blocking contract in tests.
pub struct ChannelTransport {
    state: Mutex<ChannelState>,
    ready: Condvar,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState { queues: HashMap::new(), closed: false }),
            ready: Condvar::new(),
        }
    }

    /// Simulates a broken link: pending and future `recv` calls fail.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.ready.notify_all();
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobTransport for ChannelTransport {
    fn send(&self, channel: &str, blob: &ArrayDynF) -> GenericResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(anyhow::anyhow!("channel '{}' is closed", channel));
        }
        trace!("transport send on '{}' ({:?})", channel, blob.shape());
        state.queues.entry(channel.to_owned()).or_default().push_back(blob.clone());
        self.ready.notify_all();
        Ok(())
    }

    fn recv(&self, channel: &str) -> GenericResult<ArrayDynF> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(blob) = state.queues.get_mut(channel).and_then(VecDeque::pop_front) {
                trace!("transport recv on '{}' ({:?})", channel, blob.shape());
                return Ok(blob);
            }
            if state.closed {
                return Err(anyhow::anyhow!("channel '{}' is closed", channel));
            }
            state = self.ready.wait(state).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use ndarray::array;
    use super::*;

    #[test]
    fn test_send_then_recv() {
        let transport = ChannelTransport::new();
        let blob = array![1.0, 2.0, 3.0].into_dyn();
        transport.send("a", &blob).unwrap();
        assert_eq!(transport.recv("a").unwrap(), blob);
    }

    #[test]
    fn test_recv_blocks_until_remote_send() {
        let transport = Arc::new(ChannelTransport::new());
        let remote = Arc::clone(&transport);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.send("late", &array![7.0].into_dyn()).unwrap();
        });
        let received = transport.recv("late").unwrap();
        assert_eq!(received, array![7.0].into_dyn());
        handle.join().unwrap();
    }

    #[test]
    fn test_closed_channel_fails() {
        let transport = ChannelTransport::new();
        transport.close();
        assert!(transport.recv("a").is_err());
        assert!(transport.send("a", &array![1.0].into_dyn()).is_err());
    }

    #[test]
    fn test_channels_are_independent_fifo() {
        let transport = ChannelTransport::new();
        transport.send("a", &array![1.0].into_dyn()).unwrap();
        transport.send("a", &array![2.0].into_dyn()).unwrap();
        transport.send("b", &array![3.0].into_dyn()).unwrap();
        assert_eq!(transport.recv("b").unwrap(), array![3.0].into_dyn());
        assert_eq!(transport.recv("a").unwrap(), array![1.0].into_dyn());
        assert_eq!(transport.recv("a").unwrap(), array![2.0].into_dyn());
    }
}
