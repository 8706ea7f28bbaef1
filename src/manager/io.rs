//! Channel drivers for the per-tenant socket pools.
//!
//! Each live socket is driven by one task: the acceptor driver turns an
//! accept loop into `inbound_accepted` callbacks, the connection driver
//! pumps reads and queued writes for a single stream. Both report through
//! the [`ChannelEvents`] hooks the transport manager registers against.
//!
//! Per connection, `data_received` is awaited inline between reads, so
//! inbound notifications preserve wire order and `channel_closed` is only
//! reported after every queued notification has been delivered.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};

use crate::ConnectionId;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Callback hooks consumed by the channel drivers.
#[async_trait]
pub(crate) trait ChannelEvents: Send + Sync + 'static {
    /// An inbound stream completed its handshake; register it and return
    /// its fresh identifier.
    fn inbound_accepted(&self, stream: TcpStream) -> io::Result<ConnectionId>;

    /// Bytes arrived on the identified channel.
    async fn data_received(&self, id: ConnectionId, data: Vec<u8>);

    /// The identified channel went away; `cause` is set for error-driven
    /// teardown and `None` for a clean close.
    async fn channel_closed(&self, id: ConnectionId, cause: Option<io::Error>);
}

/// Accept loop for one listening socket.
pub(crate) async fn drive_acceptor<E: ChannelEvents>(
    events: Arc<E>,
    listener: TcpListener,
    id: ConnectionId,
    shutdown: Arc<Notify>,
) {
    let cause = loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => match events.inbound_accepted(stream) {
                    Ok(new_id) => {
                        tracing::debug!(
                            listener_id = id,
                            connection_id = new_id,
                            remote = %remote,
                            "Inbound connection accepted"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            listener_id = id,
                            remote = %remote,
                            error = %e,
                            "Failed to register accepted connection"
                        );
                    }
                },
                Err(e) => break Some(e),
            },
            _ = shutdown.notified() => break None,
        }
    };
    events.channel_closed(id, cause).await;
}

/// Read/write pump for one established stream.
pub(crate) async fn drive_connection<E: ChannelEvents>(
    events: Arc<E>,
    id: ConnectionId,
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: Arc<Notify>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let cause = loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break None,
                Ok(n) => events.data_received(id, buf[..n].to_vec()).await,
                Err(e) => break Some(e),
            },
            queued = outbound.recv() => match queued {
                Some(data) => {
                    if let Err(e) = writer.write_all(&data).await {
                        break Some(e);
                    }
                }
                // Sender dropped: the context was evicted, stop the pump
                None => break None,
            },
            _ = shutdown.notified() => {
                // Flush whatever was queued before the close request
                let mut cause = None;
                while let Ok(data) = outbound.try_recv() {
                    if let Err(e) = writer.write_all(&data).await {
                        cause = Some(e);
                        break;
                    }
                }
                break cause;
            }
        }
    };
    outbound.close();
    let _ = writer.shutdown().await;
    events.channel_closed(id, cause).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEvents {
        next_id: AtomicU64,
        received: Mutex<Vec<(ConnectionId, Vec<u8>)>>,
        closed: Mutex<Vec<(ConnectionId, bool)>>,
    }

    #[async_trait]
    impl ChannelEvents for RecordingEvents {
        fn inbound_accepted(&self, _stream: TcpStream) -> io::Result<ConnectionId> {
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn data_received(&self, id: ConnectionId, data: Vec<u8>) {
            self.received.lock().unwrap().push((id, data));
        }

        async fn channel_closed(&self, id: ConnectionId, cause: Option<io::Error>) {
            self.closed.lock().unwrap().push((id, cause.is_some()));
        }
    }

    #[tokio::test]
    async fn test_connection_driver_reports_reads_then_close() {
        let events = Arc::new(RecordingEvents::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let (_tx, rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        let driver = tokio::spawn(drive_connection(events.clone(), 7, server, rx, shutdown));

        client.write_all(b"one").await.unwrap();
        client.flush().await.unwrap();
        drop(client);
        driver.await.unwrap();

        let received = events.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], (7, b"one".to_vec()));
        let closed = events.closed.lock().unwrap();
        assert_eq!(*closed, vec![(7, false)]);
    }

    #[tokio::test]
    async fn test_connection_driver_writes_queued_data() {
        let events = Arc::new(RecordingEvents::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        tokio::spawn(drive_connection(events.clone(), 1, client, rx, shutdown.clone()));

        tx.send(b"payload".to_vec()).unwrap();

        let mut buf = vec![0u8; 16];
        let (mut server_reader, _) = server.into_split();
        let n = server_reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"payload");

        shutdown.notify_one();
    }

    #[tokio::test]
    async fn test_acceptor_driver_registers_and_stops() {
        let events = Arc::new(RecordingEvents::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = Arc::new(Notify::new());
        let driver = tokio::spawn(drive_acceptor(events.clone(), listener, 1, shutdown.clone()));

        let _client = TcpStream::connect(addr).await.unwrap();
        // Wait until the accept callback lands
        loop {
            if events.next_id.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        shutdown.notify_one();
        driver.await.unwrap();

        let closed = events.closed.lock().unwrap();
        assert_eq!(*closed, vec![(1, false)]);
    }
}
