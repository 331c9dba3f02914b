use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

const ACQUIRE_POLL: Duration = Duration::from_millis(50);

/// Bounded pool of block-sized byte slabs. Readers block in `acquire` once
/// every slab is in flight, which throttles pipeline memory to roughly
/// `capacity * slab_size` bytes.
pub struct BufferPool {
    slab_size: usize,
    capacity: usize,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl BufferPool {
    pub fn new(capacity: usize, slab_size: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        for _ in 0..capacity {
            tx.send(Vec::with_capacity(slab_size))
                .expect("pool channel sized to capacity");
        }
        Self {
            slab_size,
            capacity,
            tx,
            rx,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// Number of slabs currently free. Observer snapshot only; the value is
    /// stale the moment it is read.
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Blocks until a slab is free or `cancel` is raised.
    pub fn acquire(&self, cancel: &AtomicBool) -> Option<Vec<u8>> {
        loop {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            match self.rx.recv_timeout(ACQUIRE_POLL) {
                Ok(buf) => return Some(buf),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        // Send cannot block: only slabs handed out by this pool come back.
        let _ = self.tx.try_send(buf);
    }
}
