//! Tokio adapter between a socket and a [`ConnectionManager`].
//!
//! The manager is a synchronous state machine; this module supplies the
//! event loop around it. A [`DownstreamConnection`] implementation queues
//! the manager's operations (writes, close requests, deferred deletions)
//! on an unbounded channel, and the connection task drains the queue
//! after each read. Deferred deletions are released on the next loop
//! pass, which gives retired rpcs the required extra tick of life.

use std::{any::Any, io, sync::Arc};

use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::mpsc,
};

use crate::{
    config::Config,
    conn_manager::ConnectionManager,
    downstream::{CloseMode, DownstreamConnection},
};

/// Initial capacity of the per-connection read buffer.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

enum DownstreamOp {
    Write(BytesMut),
    Close(CloseMode),
    Release(Box<dyn Any + Send>),
}

/// [`DownstreamConnection`] implemented over an operation channel drained
/// by the connection task.
struct ChannelDownstream {
    ops: mpsc::UnboundedSender<DownstreamOp>,
}

impl DownstreamConnection for ChannelDownstream {
    fn write(&mut self, data: BytesMut, _end_stream: bool) {
        let _ = self.ops.send(DownstreamOp::Write(data));
    }

    fn close(&mut self, mode: CloseMode) { let _ = self.ops.send(DownstreamOp::Close(mode)); }

    fn enable_half_close(&mut self, _enabled: bool) {
        // The read/write split below half-closes naturally: reads may hit
        // EOF while the writer keeps flushing replies.
    }

    fn defer_delete(&mut self, item: Box<dyn Any + Send>) {
        let _ = self.ops.send(DownstreamOp::Release(item));
    }
}

/// Drive one downstream connection to completion.
///
/// # Errors
/// Returns an [`io::Error`] if reading from or writing to the socket
/// fails.
pub async fn drive_connection<S>(stream: S, config: Arc<dyn Config>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (ops_tx, mut ops_rx) = mpsc::unbounded_channel();
    let mut manager = ConnectionManager::new(config, Box::new(ChannelDownstream { ops: ops_tx }));
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut read_buffer = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    let mut deferred: Vec<Box<dyn Any + Send>> = Vec::new();

    loop {
        // Anything retired on the previous pass dies here, one tick
        // after its last callback returned.
        deferred.clear();

        let read = reader.read_buf(&mut read_buffer).await?;
        let end_stream = read == 0;
        let mut chunk = read_buffer.split();
        manager.on_data(&mut chunk, end_stream);

        if drain_ops(&mut ops_rx, &mut writer, &mut deferred).await? {
            return Ok(());
        }
        if end_stream {
            return Ok(());
        }
    }
}

/// Apply queued downstream operations. Returns `true` once the
/// connection has been closed.
async fn drain_ops<W>(
    ops: &mut mpsc::UnboundedReceiver<DownstreamOp>,
    writer: &mut W,
    deferred: &mut Vec<Box<dyn Any + Send>>,
) -> io::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    while let Ok(op) = ops.try_recv() {
        match op {
            DownstreamOp::Write(data) => writer.write_all(&data).await?,
            DownstreamOp::Close(CloseMode::FlushWrite) => {
                writer.flush().await?;
                writer.shutdown().await?;
                return Ok(true);
            }
            DownstreamOp::Close(CloseMode::NoFlush) => return Ok(true),
            DownstreamOp::Release(item) => deferred.push(item),
        }
    }
    writer.flush().await?;
    Ok(false)
}

/// Accept connections forever, driving each on its own task.
///
/// # Errors
/// Returns an [`io::Error`] if accepting a connection fails.
pub async fn serve(listener: TcpListener, config: Arc<dyn Config>) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            tracing::debug!(%peer, "accepted thrift connection");
            if let Err(error) = drive_connection(stream, config).await {
                tracing::warn!(%peer, error = %error, "connection terminated with error");
            }
        });
    }
}
