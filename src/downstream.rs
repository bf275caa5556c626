//! The host seam for the downstream side of a connection.
//!
//! The connection manager never touches sockets; it issues writes, close
//! requests and deferred deletions through [`DownstreamConnection`], and
//! the host feeds connection lifecycle changes back through
//! [`ConnectionEvent`]. A channel-backed implementation for tokio lives in
//! [`crate::server`].

use std::any::Any;

use bytes::BytesMut;

/// How a connection close should treat pending written data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseMode {
    /// Flush queued writes, then close.
    FlushWrite,
    /// Close immediately, discarding queued writes.
    NoFlush,
}

/// Lifecycle events observed on the downstream connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection is established.
    Connected,
    /// The peer closed the connection.
    RemoteClose,
    /// This end closed the connection.
    LocalClose,
}

/// Operations the connection manager performs against its downstream
/// connection and the event loop that owns it.
pub trait DownstreamConnection: Send {
    /// Write bytes to the client. `end_stream` requests a half-close after
    /// the write; the manager never sets it for replies.
    fn write(&mut self, data: BytesMut, end_stream: bool);

    /// Close the connection.
    fn close(&mut self, mode: CloseMode);

    /// Allow the peer to half-close while replies are still pending.
    fn enable_half_close(&mut self, enabled: bool);

    /// Destroy `item` on the next event-loop iteration.
    ///
    /// Retired rpcs are released through this hook so that returning from
    /// a callback never destroys the callback's own frame. Hosts without
    /// a native next-tick hook may post a zero-delay task.
    fn defer_delete(&mut self, item: Box<dyn Any + Send>);
}
