//! Stream transport
//!
//! Drives a [`Protocol`] over any byte stream: a reader task feeds inbound
//! chunks to the frame decoder and a writer task drains outbound frames.
//! EOF, an IO error or a protocol violation terminates the protocol
//! lifetime, which in turn stops both tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use rd_core::{RdError, RdResult};
use rd_reactive::{Protocol, ProtocolBuilder};
use rd_wire::FrameSink;

/// Default read buffer size
pub const DEFAULT_READ_CHUNK: usize = 8 * 1024;

/// Stream transport configuration
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Bytes requested from the stream per read
    pub read_chunk_size: usize,
    /// Disable Nagle on TCP streams
    pub tcp_nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            read_chunk_size: DEFAULT_READ_CHUNK,
            tcp_nodelay: true,
        }
    }
}

impl TransportConfig {
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }
}

/// Outbound sink handing encoded frames to the writer task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        ChannelSink { tx }
    }
}

impl FrameSink for ChannelSink {
    fn send(&self, bytes: Bytes) -> RdResult<()> {
        self.tx
            .send(bytes)
            .map_err(|_| RdError::Transport("writer task stopped".into()))
    }
}

/// A protocol instance bound to a byte stream
pub struct StreamTransport {
    protocol: Arc<Protocol>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl StreamTransport {
    /// Build the protocol and start the IO tasks. Must be called from
    /// within a tokio runtime.
    pub fn spawn<S>(stream: S, builder: ProtocolBuilder, config: TransportConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let protocol = builder.build(Box::new(ChannelSink::new(tx)));

        let (closed_tx, closed_rx) = watch::channel(false);
        protocol.lifetime().on_termination(move || {
            let _ = closed_tx.send(true);
        });

        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&protocol),
            config.read_chunk_size.max(1),
            closed_rx.clone(),
        ));
        let writer = tokio::spawn(write_loop(write_half, rx, Arc::clone(&protocol), closed_rx));

        tracing::debug!(protocol = %protocol.name(), "stream transport started");
        StreamTransport {
            protocol,
            reader,
            writer,
        }
    }

    /// Connect to a TCP peer
    pub async fn connect_tcp(
        addr: SocketAddr,
        builder: ProtocolBuilder,
        config: TransportConfig,
    ) -> RdResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RdError::Transport(e.to_string()))?;
        stream
            .set_nodelay(config.tcp_nodelay)
            .map_err(|e| RdError::Transport(e.to_string()))?;
        Ok(Self::spawn(stream, builder, config))
    }

    /// Accept one TCP peer
    pub async fn accept_tcp(
        listener: &TcpListener,
        builder: ProtocolBuilder,
        config: TransportConfig,
    ) -> RdResult<(Self, SocketAddr)> {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| RdError::Transport(e.to_string()))?;
        stream
            .set_nodelay(config.tcp_nodelay)
            .map_err(|e| RdError::Transport(e.to_string()))?;
        tracing::debug!(peer = %peer, "accepted stream");
        Ok((Self::spawn(stream, builder, config), peer))
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn is_connected(&self) -> bool {
        self.protocol.is_connected()
    }

    /// Terminate the protocol; queued frames are flushed before the stream
    /// is shut down
    pub fn close(&self) {
        self.protocol.close();
    }

    /// Wait for both IO tasks to finish
    pub async fn join(self) {
        let _ = self.reader.await;
        let _ = self.writer.await;
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("protocol", &self.protocol.name())
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn read_loop<R>(
    mut reader: R,
    protocol: Arc<Protocol>,
    chunk_size: usize,
    mut closed: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    while !*closed.borrow() {
        let read = tokio::select! {
            read = reader.read(&mut buf) => read,
            _ = closed.changed() => break,
        };
        match read {
            Ok(0) => {
                tracing::debug!(protocol = %protocol.name(), "peer closed stream");
                protocol.close();
                break;
            }
            Ok(n) => {
                tracing::trace!(protocol = %protocol.name(), bytes = n, "read chunk");
                if let Err(e) = protocol.receive(&buf[..n]) {
                    tracing::debug!(protocol = %protocol.name(), error = %e, "stopping reader");
                    break;
                }
            }
            Err(e) => {
                tracing::error!(protocol = %protocol.name(), error = %e, "stream read failed");
                protocol.close();
                break;
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    protocol: Arc<Protocol>,
    mut closed: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let bytes = tokio::select! {
            biased;
            next = rx.recv() => match next {
                Some(bytes) => bytes,
                None => break,
            },
            _ = closed.changed() => break,
        };
        let written = match writer.write_all(&bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::error!(protocol = %protocol.name(), error = %e, "stream write failed");
            protocol.close();
            break;
        }
    }

    // Frames sent right before termination
    while let Ok(bytes) = rx.try_recv() {
        if writer.write_all(&bytes).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
    tracing::debug!(protocol = %protocol.name(), "stream writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rd_core::{IdKind, Lifetime, ProtocolConfig, Scheduler};
    use rd_reactive::{RdExtBase, RdList, RdProperty};

    use crate::TokioScheduler;

    async fn eventually(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    struct Model {
        root: RdExtBase,
        value: RdProperty<i32>,
        log: RdList<String>,
    }

    impl Model {
        fn new() -> Self {
            Model {
                root: RdExtBase::new("Model"),
                value: RdProperty::new(0),
                log: RdList::new(),
            }
        }

        fn connect(&self, protocol: &Arc<Protocol>) {
            self.root
                .connect(
                    &Lifetime::eternal(),
                    protocol,
                    &[("value", &self.value), ("log", &self.log)],
                )
                .unwrap();
        }
    }

    fn pair(config: TransportConfig) -> (StreamTransport, StreamTransport) {
        let (left, right) = tokio::io::duplex(64);
        let client = StreamTransport::spawn(
            left,
            Protocol::builder("client").kind(IdKind::Client),
            config.clone(),
        );
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::spawn("server").unwrap());
        let server = StreamTransport::spawn(
            right,
            Protocol::builder("server")
                .kind(IdKind::Server)
                .scheduler(scheduler),
            config,
        );
        (client, server)
    }

    #[tokio::test]
    async fn test_property_over_duplex() {
        let (client, server) = pair(TransportConfig::default());
        let (a, b) = (Model::new(), Model::new());
        a.connect(client.protocol());
        b.connect(server.protocol());

        a.value.set(42);
        for i in 0..20 {
            a.log.add(format!("entry {}", i));
        }
        eventually(|| b.value.get() == 42 && b.log.len() == 20).await;
        assert_eq!(b.log.to_vec(), a.log.to_vec());

        b.value.set(7);
        eventually(|| a.value.get() == 7).await;
    }

    #[tokio::test]
    async fn test_tiny_read_chunks() {
        let (client, server) = pair(TransportConfig::default().with_read_chunk_size(1));
        let (a, b) = (Model::new(), Model::new());
        a.connect(client.protocol());
        b.connect(server.protocol());

        a.log.add("x".repeat(500));
        eventually(|| b.log.len() == 1).await;
        assert_eq!(b.log.get(0), Some("x".repeat(500)));
    }

    #[tokio::test]
    async fn test_frames_before_remote_connect_are_replayed() {
        let (client, server) = pair(TransportConfig::default());
        let (a, b) = (Model::new(), Model::new());
        a.connect(client.protocol());
        a.value.set(5);
        a.log.add("early".into());

        tokio::time::sleep(Duration::from_millis(20)).await;
        b.connect(server.protocol());
        eventually(|| b.value.get() == 5 && b.log.len() == 1).await;
    }

    #[tokio::test]
    async fn test_close_propagates_to_peer() {
        let (client, server) = pair(TransportConfig::default());
        client.close();
        assert!(!client.is_connected());
        eventually(|| !server.is_connected()).await;
        tokio::time::timeout(Duration::from_secs(5), client.join())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), server.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_garbage_terminates_protocol() {
        let (mut raw, right) = tokio::io::duplex(64);
        let server = StreamTransport::spawn(
            right,
            Protocol::builder("server").config(ProtocolConfig::default().with_max_frame_len(16)),
            TransportConfig::default(),
        );
        // entity id 1, payload length far above the frame limit
        raw.write_all(&[0x01, 0xFF, 0xFF, 0xFF, 0x0F]).await.unwrap();
        eventually(|| !server.is_connected()).await;
    }

    #[tokio::test]
    async fn test_tcp_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            StreamTransport::accept_tcp(
                &listener,
                Protocol::builder("server").kind(IdKind::Server),
                TransportConfig::default(),
            )
            .await
        });
        let client = StreamTransport::connect_tcp(
            addr,
            Protocol::builder("client").kind(IdKind::Client),
            TransportConfig::default(),
        )
        .await
        .unwrap();
        let (server, _) = accept.await.unwrap().unwrap();

        let (a, b) = (Model::new(), Model::new());
        a.connect(client.protocol());
        b.connect(server.protocol());
        a.value.set(99);
        eventually(|| b.value.get() == 99).await;

        server.close();
        eventually(|| !client.is_connected()).await;
    }
}
