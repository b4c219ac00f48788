//! Per-connection cooperative engine: feeds incoming bytes through a
//! [`Receiver`], and queues outgoing bytes for a [`TransmitHandler`]
//! (§4.7).
//!
//! Two run modes are offered, matching the two ways the rest of this
//! crate's ancestor runs a block graph: a cooperative `step` a caller
//! drives from its own event loop, and a background thread that drains
//! the outbox itself (`thread::Builder` + `Condvar`, the same shape
//! `mtgraph.rs` uses for its worker threads).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::file_manager::receiver::{Parsed, Receiver};
use crate::file_manager::shared::Shared;

/// Something that can push framed bytes out to the peer.
pub trait TransmitHandler: Send + Sync {
    /// Send `bytes` to the peer. Errors are logged by the worker and do
    /// not stop the background thread; a transport is expected to surface
    /// fatal failures by closing itself, which the caller observes
    /// separately.
    fn transmit(&self, bytes: &[u8]) -> Result<()>;
}

/// One connection's file-manager engine.
pub struct Worker<T: TransmitHandler> {
    shared: Arc<Shared>,
    receiver: Mutex<Receiver>,
    transmit: T,
    outbox: Mutex<VecDeque<Vec<u8>>>,
    outbox_capacity: usize,
    cv: Condvar,
    running: AtomicBool,
}

impl<T: TransmitHandler> Worker<T> {
    /// Build a new worker bound to `shared`'s file maps.
    #[must_use]
    pub fn new(shared: Arc<Shared>, transmit: T, config: &crate::config::Config) -> Self {
        Worker {
            shared,
            receiver: Mutex::new(Receiver::with_capacity(config.receiver_buffer_capacity)),
            transmit,
            outbox: Mutex::new(VecDeque::new()),
            outbox_capacity: config.outbox_capacity,
            cv: Condvar::new(),
            running: AtomicBool::new(true),
        }
    }

    /// Shared file maps this worker is driving.
    #[must_use]
    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Feed freshly-received bytes and drain every message they complete.
    /// Cooperative: the caller owns the event loop and calls this once per
    /// batch of bytes read off its transport.
    pub fn on_bytes_received(&self, bytes: &[u8]) -> Result<Vec<Parsed>> {
        let mut receiver = self.receiver.lock().expect("receiver lock poisoned");
        receiver.feed(bytes);
        let mut events = Vec::new();
        while let Some(parsed) = receiver.try_parse_next()? {
            trace!("file manager parsed {parsed:?}");
            events.push(parsed);
        }
        Ok(events)
    }

    /// Queue a fully-framed message for transmission. In cooperative mode
    /// the caller should follow up with [`Worker::drain_outgoing`]; in
    /// threaded mode the background thread wakes up and sends it.
    pub fn queue_outgoing(&self, bytes: Vec<u8>) -> Result<()> {
        let mut outbox = self.outbox.lock().expect("outbox lock poisoned");
        if outbox.len() >= self.outbox_capacity {
            return Err(Error::Mem(format!(
                "outbox at capacity ({})",
                self.outbox_capacity
            )));
        }
        outbox.push_back(bytes);
        self.cv.notify_one();
        Ok(())
    }

    /// Cooperative mode: pop and transmit at most one queued message.
    /// Returns `true` if a message was sent, `false` if the queue was
    /// empty. Matches §8's Cooperative worker property: "each `run()`
    /// dispatches at most one message; message queue length decreases by
    /// exactly one on success."
    pub fn run(&self) -> Result<bool> {
        let next = self.outbox.lock().expect("outbox lock poisoned").pop_front();
        let Some(bytes) = next else { return Ok(false) };
        self.transmit.transmit(&bytes)?;
        Ok(true)
    }

    /// Cooperative mode: synchronously send everything currently queued,
    /// by repeatedly calling [`Worker::run`].
    pub fn drain_outgoing(&self) -> Result<usize> {
        let mut sent = 0;
        while self.run()? {
            sent += 1;
        }
        Ok(sent)
    }

    /// Request the background thread (if any) to stop after its current
    /// wait.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cv.notify_all();
    }

    fn run_loop(self: &Arc<Self>) {
        debug!("file manager worker thread starting");
        loop {
            let mut outbox = self.outbox.lock().expect("outbox lock poisoned");
            while outbox.is_empty() && self.running.load(Ordering::SeqCst) {
                outbox = self.cv.wait(outbox).expect("outbox lock poisoned");
            }
            if !self.running.load(Ordering::SeqCst) && outbox.is_empty() {
                break;
            }
            let Some(bytes) = outbox.pop_front() else {
                continue;
            };
            drop(outbox);
            if let Err(e) = self.transmit.transmit(&bytes) {
                warn!("file manager transmit failed: {e}");
            }
        }
        debug!("file manager worker thread exiting");
    }

    /// Spawn a background thread that drains the outbox as messages
    /// arrive, until [`Worker::stop`] is called.
    pub fn spawn(self: Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("apx-file-manager".to_string())
            .spawn(move || self.run_loop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::rmf::Command;
    use std::sync::Mutex as StdMutex;

    struct RecordingTransmit {
        sent: StdMutex<Vec<Vec<u8>>>,
    }

    impl TransmitHandler for RecordingTransmit {
        fn transmit(&self, bytes: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    fn frame_ack() -> Vec<u8> {
        let mut payload = [0u8; 4];
        let n = Command::Ack.encode(&mut payload).unwrap();
        let mut addr = [0u8; 4];
        let alen = crate::rmf::address_encode(&mut addr, crate::file_info::CMD_ADDRESS, false);
        let mut framed = Vec::new();
        let mut nh = [0u8; 4];
        let nhlen = crate::numheader::encode(&mut nh, (alen + n) as u32).unwrap();
        framed.extend_from_slice(&nh[..nhlen]);
        framed.extend_from_slice(&addr[..alen]);
        framed.extend_from_slice(&payload[..n]);
        framed
    }

    #[test]
    fn cooperative_receive_and_drain() {
        let shared = Shared::new();
        let transmit = RecordingTransmit {
            sent: StdMutex::new(Vec::new()),
        };
        let worker = Worker::new(shared, transmit, &Config::default());
        let events = worker.on_bytes_received(&frame_ack()).unwrap();
        assert_eq!(events, vec![Parsed::Command(Command::Ack)]);

        worker.queue_outgoing(frame_ack()).unwrap();
        let sent = worker.drain_outgoing().unwrap();
        assert_eq!(sent, 1);
        assert_eq!(worker.transmit.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn run_dispatches_at_most_one_message_per_call() {
        let shared = Shared::new();
        let transmit = RecordingTransmit {
            sent: StdMutex::new(Vec::new()),
        };
        let worker = Worker::new(shared, transmit, &Config::default());
        worker.queue_outgoing(frame_ack()).unwrap();
        worker.queue_outgoing(frame_ack()).unwrap();
        worker.queue_outgoing(frame_ack()).unwrap();

        assert_eq!(worker.outbox.lock().unwrap().len(), 3);
        assert!(worker.run().unwrap());
        assert_eq!(worker.outbox.lock().unwrap().len(), 2);
        assert_eq!(worker.transmit.sent.lock().unwrap().len(), 1);

        assert!(worker.run().unwrap());
        assert_eq!(worker.outbox.lock().unwrap().len(), 1);
        assert!(worker.run().unwrap());
        assert_eq!(worker.outbox.lock().unwrap().len(), 0);
        assert_eq!(worker.transmit.sent.lock().unwrap().len(), 3);

        // Queue empty: run() is a no-op and reports false.
        assert!(!worker.run().unwrap());
        assert_eq!(worker.transmit.sent.lock().unwrap().len(), 3);
    }

    #[test]
    fn outbox_capacity_is_enforced() {
        let shared = Shared::new();
        let transmit = RecordingTransmit {
            sent: StdMutex::new(Vec::new()),
        };
        let mut config = Config::default();
        config.outbox_capacity = 1;
        let worker = Worker::new(shared, transmit, &config);
        worker.queue_outgoing(vec![1]).unwrap();
        assert!(worker.queue_outgoing(vec![2]).is_err());
    }

    #[test]
    fn threaded_mode_drains_in_background() {
        let shared = Shared::new();
        let transmit = RecordingTransmit {
            sent: StdMutex::new(Vec::new()),
        };
        let worker = Arc::new(Worker::new(shared, transmit, &Config::default()));
        let handle = worker.clone().spawn().unwrap();
        worker.queue_outgoing(vec![9, 9]).unwrap();
        // Give the background thread a moment to drain, then stop it.
        std::thread::sleep(std::time::Duration::from_millis(50));
        worker.stop();
        handle.join().unwrap();
        assert_eq!(worker.transmit.sent.lock().unwrap().len(), 1);
    }
}
