//! Connection collaborator contract.
//!
//! The coordinator never speaks to the wire itself; it drives opaque
//! [`Interface`] objects constructed by a [`Dialer`]. Each interface
//! owns its transport (TCP, TLS or HTTP framing, message codecs,
//! keep-alive) and reports back only through the shared ingress queue.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel as chan;
use serde_json::Value;

use tumbaga_common::server::ServerId;

use crate::error::Error;
use crate::event::Event;

/// A single RPC request: method name and arguments.
pub type Request = (String, Vec<Value>);

/// Shared handle to a live connection.
pub type Conn = Arc<dyn Interface>;

/// Build a request for the given method.
pub fn request(method: &str, args: Vec<Value>) -> Request {
    (method.to_owned(), args)
}

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(0);

/// Receiver of request replies and subscription notifications.
///
/// An observer pairs a callback with an opaque token. The token is the
/// observer's registry identity, so cloning and re-subscribing the same
/// observer extends one registration instead of creating a second.
#[derive(Clone)]
pub struct Observer {
    id: u64,
    callback: Arc<dyn Fn(&Conn, &Value) + Send + Sync>,
}

impl Observer {
    /// Create an observer with a fresh token.
    pub fn new<F: Fn(&Conn, &Value) + Send + Sync + 'static>(callback: F) -> Self {
        Self {
            id: NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed),
            callback: Arc::new(callback),
        }
    }

    /// The opaque registry token.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deliver a reply. Runs on the calling interface's own thread;
    /// observers must be cheap and non-blocking.
    pub fn notify(&self, conn: &Conn, reply: &Value) {
        (self.callback)(conn, reply)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observer({})", self.id)
    }
}

/// One live connection to a remote server.
///
/// A started interface runs on its own thread and enqueues itself as a
/// [`Event::Status`] exactly once per connect-attempt outcome.
/// Stopping renders the handle disconnected immediately; if the
/// connection had been established, a final status event is still
/// delivered afterwards.
pub trait Interface: Send + Sync {
    /// The server this connection is for.
    fn server(&self) -> &ServerId;

    /// Whether the connection is currently established.
    fn is_connected(&self) -> bool;

    /// Whether every request sent over this connection was answered.
    fn is_up_to_date(&self) -> bool;

    /// Begin connecting. The outcome, and any later shutdown, is
    /// enqueued onto `events`.
    fn start(self: Arc<Self>, events: chan::Sender<Event>);

    /// Best-effort transmission: if connected, transmit; replies invoke
    /// `observer` on the interface's own thread.
    fn send(&self, messages: &[Request], observer: Observer);

    /// Blocking request/response round-trip, for callers that need a
    /// value now. Blocks the caller, never the coordinator.
    fn synchronous_get(&self, requests: &[Request]) -> Result<Vec<Value>, Error>;

    /// Close the connection.
    fn stop(&self);
}

/// Constructs interfaces for the coordinator to start.
pub trait Dialer {
    /// Construct an interface for the given server. The connection
    /// attempt begins only once the interface is started.
    fn dial(&self, server: &ServerId, proxy: Option<&str>) -> Conn;
}
