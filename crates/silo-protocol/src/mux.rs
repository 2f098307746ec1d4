use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::Message;
use crate::transport::{FramedReceiver, FramedSender};

/// A message carrying a correlation ID that pairs it with its counterpart
/// in the other direction.
pub trait Correlated: Message {
    fn correlation_id(&self) -> Uuid;
}

/// Table of callers waiting on a correlation ID.
///
/// `closed` and the slot map live under one lock: once the decode task has
/// marked the table closed and drained it, no late registration or delivery
/// can slip in behind the teardown.
struct Waiters<M> {
    closed: bool,
    slots: HashMap<Uuid, oneshot::Sender<M>>,
}

/// Fully asynchronous request/response correlation over one framed stream.
///
/// Any number of requests may be outstanding at once. A dedicated background
/// task decodes inbound messages and hands each to the single waiter
/// registered under its correlation ID; a response with no waiter (for
/// instance, one that already timed out) is dropped with a warning, never
/// buffered. Loss of the stream releases every outstanding waiter with
/// [`ProtocolError::ConnectionClosed`].
pub struct Multiplexer<S, M> {
    sender: tokio::sync::Mutex<FramedSender<WriteHalf<S>>>,
    waiters: Arc<Mutex<Waiters<M>>>,
    decode_task: tokio::task::JoinHandle<()>,
}

impl<S, M> Multiplexer<S, M>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    M: Correlated + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        let (read, write) = tokio::io::split(stream);
        let waiters = Arc::new(Mutex::new(Waiters {
            closed: false,
            slots: HashMap::new(),
        }));
        let decode_task = tokio::spawn(decode_loop(
            FramedReceiver::new(read),
            Arc::clone(&waiters),
        ));
        Self {
            sender: tokio::sync::Mutex::new(FramedSender::new(write)),
            waiters,
            decode_task,
        }
    }

    /// Send a request and wait for the response carrying the same
    /// correlation ID. Suspends only on this call's own slot, never on
    /// other callers'.
    pub async fn call(&self, msg: M) -> ProtocolResult<M> {
        let id = msg.correlation_id();
        let rx = {
            let mut waiters = self.waiters.lock().expect("waiter table poisoned");
            if waiters.closed {
                return Err(ProtocolError::ConnectionClosed);
            }
            let (tx, rx) = oneshot::channel();
            waiters.slots.insert(id, tx);
            rx
        };

        if let Err(e) = self.sender.lock().await.send(&msg).await {
            self.waiters
                .lock()
                .expect("waiter table poisoned")
                .slots
                .remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Returns `true` once the decode task has torn the session down.
    pub fn is_closed(&self) -> bool {
        self.waiters.lock().expect("waiter table poisoned").closed
    }

    /// Number of callers currently awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.waiters.lock().expect("waiter table poisoned").slots.len()
    }
}

impl<S, M> Drop for Multiplexer<S, M> {
    fn drop(&mut self) {
        self.decode_task.abort();
        let mut waiters = self.waiters.lock().expect("waiter table poisoned");
        waiters.closed = true;
        waiters.slots.clear();
    }
}

async fn decode_loop<R, M>(mut receiver: FramedReceiver<R>, waiters: Arc<Mutex<Waiters<M>>>)
where
    R: AsyncRead + Unpin,
    M: Correlated,
{
    loop {
        match receiver.recv::<M>().await {
            Ok(Some(msg)) => {
                let id = msg.correlation_id();
                let slot = waiters
                    .lock()
                    .expect("waiter table poisoned")
                    .slots
                    .remove(&id);
                match slot {
                    // The waiter may have given up between removal and send;
                    // a failed send is the same as a missing slot.
                    Some(tx) => {
                        if tx.send(msg).is_err() {
                            warn!(%id, "waiter gone before delivery");
                        }
                    }
                    None => warn!(%id, "dropping response with no registered waiter"),
                }
            }
            Ok(None) => {
                debug!("multiplexer stream closed");
                break;
            }
            Err(e) => {
                warn!("multiplexer session failed: {e}");
                break;
            }
        }
    }

    // Mark closed and drain in one critical section so nothing registers
    // against, or delivers into, a half-closed table. Dropping the senders
    // releases every outstanding waiter with an error.
    let mut waiters = waiters.lock().expect("waiter table poisoned");
    waiters.closed = true;
    waiters.slots.clear();
}
