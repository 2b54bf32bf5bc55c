//! Background flush: commits buffered objects to the lower tiers

use super::WriteBuffer;
use crate::lock::AddressLocks;
use casnode_common::{Error, Object, Result, Tier};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Destination of flushed objects
pub trait FlushTarget: Send + Sync {
    /// Durably store `object` in the lower tiers
    fn commit(&self, object: &Object) -> Result<()>;
}

enum Control {
    Pause,
    Resume,
    FlushNow(Sender<usize>),
    Shutdown { drain: bool },
}

struct Flusher {
    buffer: Arc<WriteBuffer>,
    target: Arc<dyn FlushTarget>,
    locks: Arc<AddressLocks>,
    batch_size: usize,
}

impl Flusher {
    /// Commit up to `limit` buffered objects; returns how many were evicted
    fn flush_pass(&self, limit: usize) -> usize {
        let mut flushed = 0;
        for address in self.buffer.pending(limit) {
            let _guard = self.locks.lock(&address);
            // a delete may have won the race for this address
            let Some(object) = self.buffer.peek(&address) else {
                continue;
            };
            match self.target.commit(&object) {
                Ok(()) => {
                    if let Err(e) = self.buffer.remove(&address) {
                        warn!("Flushed {} but could not evict it: {}", address, e);
                    }
                    self.buffer.record_flushed();
                    flushed += 1;
                }
                Err(e) => {
                    self.buffer.record_flush_error();
                    warn!("Failed to flush {}, will retry: {}", address, e);
                }
            }
        }
        if flushed > 0 {
            debug!("Flushed {} buffered objects", flushed);
        }
        flushed
    }

    /// Flush everything currently buffered
    fn drain(&self) -> usize {
        self.flush_pass(usize::MAX)
    }

    fn run(&self, control: &Receiver<Control>, interval: Duration) {
        let mut paused = false;
        loop {
            match control.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if !paused {
                        self.flush_pass(self.batch_size);
                    }
                }
                Ok(Control::Pause) => {
                    paused = true;
                    info!("Write buffer flush paused");
                }
                Ok(Control::Resume) => {
                    paused = false;
                    info!("Write buffer flush resumed");
                }
                Ok(Control::FlushNow(reply)) => {
                    let flushed = self.drain();
                    let _ = reply.send(flushed);
                }
                Ok(Control::Shutdown { drain }) => {
                    if drain {
                        let flushed = self.drain();
                        info!(
                            "Drained {} buffered objects on shutdown ({} left)",
                            flushed,
                            self.buffer.len()
                        );
                    }
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

/// Handle to the flush thread of one write buffer
pub struct FlushWorker {
    control: Sender<Control>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl FlushWorker {
    /// Start flushing `buffer` into `target` every `interval`
    pub fn spawn(
        buffer: Arc<WriteBuffer>,
        target: Arc<dyn FlushTarget>,
        locks: Arc<AddressLocks>,
    ) -> Result<Self> {
        let interval = buffer.config().flush_interval();
        let flusher = Flusher {
            batch_size: buffer.config().flush_batch_size,
            buffer,
            target,
            locks,
        };
        let (tx, rx) = crossbeam_channel::unbounded();

        let handle = thread::Builder::new()
            .name("writebuffer-flush".into())
            .spawn(move || {
                debug!("Write buffer flush thread started");
                flusher.run(&rx, interval);
                debug!("Write buffer flush thread stopped");
            })
            .map_err(|e| Error::io(Tier::WriteBuffer, e))?;

        Ok(Self {
            control: tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn send(&self, msg: Control) -> Result<()> {
        self.control
            .send(msg)
            .map_err(|_| Error::storage(Tier::WriteBuffer, "flush worker has stopped"))
    }

    /// Stop periodic flushing; explicit flushes still run
    pub fn pause(&self) -> Result<()> {
        self.send(Control::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Control::Resume)
    }

    /// Flush everything buffered now and wait; returns the number committed
    pub fn flush_now(&self) -> Result<usize> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(Control::FlushNow(tx))?;
        rx.recv()
            .map_err(|_| Error::storage(Tier::WriteBuffer, "flush worker has stopped"))
    }

    /// Stop the worker, optionally draining the buffer first
    pub fn shutdown(&self, drain: bool) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if self.send(Control::Shutdown { drain }).is_err() {
            warn!("Flush worker exited before shutdown");
        }
        if handle.join().is_err() {
            error!("Write buffer flush thread panicked");
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}
