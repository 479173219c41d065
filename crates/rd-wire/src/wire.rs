//! The wire: one outbound writer and the inbound decoding path of a
//! connection
//!
//! Outbound frames are encoded whole and handed to the [`FrameSink`] under a
//! single lock, so concurrent senders never interleave partial frames.
//! Inbound chunks are decoded on the caller's thread and each frame is
//! dispatched to the broker on the protocol scheduler.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use rd_core::{Lifetime, LifetimeDefinition, ProtocolConfig, RdError, RdId, RdResult, Scheduler};

use crate::{Frame, FrameDecoder, MessageBroker, WireWriter};

/// Destination of encoded outbound frames
pub trait FrameSink: Send + Sync {
    fn send(&self, bytes: Bytes) -> RdResult<()>;
}

impl<F> FrameSink for F
where
    F: Fn(Bytes) -> RdResult<()> + Send + Sync,
{
    fn send(&self, bytes: Bytes) -> RdResult<()> {
        self(bytes)
    }
}

/// Wire counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WireStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
}

struct Outbound {
    sink: Box<dyn FrameSink>,
    scratch: BytesMut,
}

/// A connection's framing layer
pub struct Wire {
    broker: Arc<MessageBroker>,
    outbound: Mutex<Outbound>,
    decoder: Mutex<FrameDecoder>,
    scheduler: Arc<dyn Scheduler>,
    connection: LifetimeDefinition,
    stats: Mutex<WireStats>,
}

impl Wire {
    pub fn new(
        config: ProtocolConfig,
        sink: Box<dyn FrameSink>,
        scheduler: Arc<dyn Scheduler>,
        connection: LifetimeDefinition,
    ) -> Self {
        let decoder = FrameDecoder::new(config.max_frame_len);
        Wire {
            broker: MessageBroker::new(config),
            outbound: Mutex::new(Outbound {
                sink,
                scratch: BytesMut::new(),
            }),
            decoder: Mutex::new(decoder),
            scheduler,
            connection,
            stats: Mutex::new(WireStats::default()),
        }
    }

    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Lifetime of the underlying connection
    pub fn lifetime(&self) -> Lifetime {
        self.connection.lifetime()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_alive()
    }

    pub fn stats(&self) -> WireStats {
        self.stats.lock().clone()
    }

    /// Close the connection
    pub fn close(&self) {
        if self.connection.terminate() {
            tracing::debug!("wire closed");
        }
    }

    /// Encode and send one frame
    pub fn send(&self, id: RdId, payload: Bytes) -> RdResult<()> {
        if !self.connection.is_alive() {
            return Err(RdError::LifetimeTerminated);
        }

        let frame = Frame::new(id, payload);
        let result = {
            let mut outbound = self.outbound.lock();
            frame.encode(&mut outbound.scratch);
            let bytes = outbound.scratch.split().freeze();
            outbound.sink.send(bytes)
        };

        match result {
            Ok(()) => {
                tracing::trace!(id = %id, len = frame.payload.len(), "send");
                let mut stats = self.stats.lock();
                stats.frames_sent += 1;
                stats.bytes_sent += frame.size() as u64;
                Ok(())
            }
            Err(e) => {
                tracing::error!(id = %id, error = %e, "outbound failure, closing connection");
                self.connection.terminate();
                Err(RdError::Transport(e.to_string()))
            }
        }
    }

    /// Build a payload with `write` and send it
    pub fn send_with(&self, id: RdId, write: impl FnOnce(&mut WireWriter)) -> RdResult<()> {
        let mut writer = WireWriter::new();
        write(&mut writer);
        self.send(id, writer.freeze())
    }

    /// Feed inbound bytes. Chunks may split frames anywhere.
    ///
    /// A framing error leaves the stream unrecoverable and closes the
    /// connection.
    pub fn receive(&self, chunk: &[u8]) -> RdResult<()> {
        if !self.connection.is_alive() {
            tracing::trace!(len = chunk.len(), "dropping bytes on closed wire");
            return Ok(());
        }

        let frames = self.decoder.lock().decode(chunk);
        let frames = match frames {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!(error = %e, "undecodable inbound stream, closing connection");
                self.connection.terminate();
                return Err(e);
            }
        };

        {
            let mut stats = self.stats.lock();
            stats.bytes_received += chunk.len() as u64;
            stats.frames_received += frames.len() as u64;
        }

        for frame in frames {
            let broker = Arc::clone(&self.broker);
            self.scheduler.queue(Box::new(move || broker.dispatch(frame)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{WireHandler, WireReader};
    use rd_core::{ManualScheduler, SynchronousScheduler};

    #[derive(Default)]
    struct Collect {
        values: Mutex<Vec<u32>>,
    }

    impl WireHandler for Collect {
        fn location(&self) -> &str {
            "test.collect"
        }

        fn on_wire_received(&self, reader: &mut WireReader) -> RdResult<()> {
            self.values.lock().push(reader.read_u32()?);
            Ok(())
        }
    }

    fn capture() -> (Arc<Mutex<Vec<u8>>>, Box<dyn FrameSink>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink_out = Arc::clone(&out);
        let sink = move |bytes: Bytes| -> RdResult<()> {
            sink_out.lock().extend_from_slice(&bytes);
            Ok(())
        };
        let sink: Box<dyn FrameSink> = Box::new(sink);
        (out, sink)
    }

    fn wire(sink: Box<dyn FrameSink>, scheduler: Arc<dyn Scheduler>) -> Wire {
        Wire::new(
            ProtocolConfig::default(),
            sink,
            scheduler,
            LifetimeDefinition::new(),
        )
    }

    #[test]
    fn test_send_then_receive_in_chunks() {
        let (out, sink) = capture();
        let sender = wire(sink, Arc::new(SynchronousScheduler::new()));
        for v in [1u32, 2, 3] {
            sender.send_with(RdId(77), |w| w.write_u32(v)).unwrap();
        }

        let (_, sink) = capture();
        let receiver = wire(sink, Arc::new(SynchronousScheduler::new()));
        let collect = Arc::new(Collect::default());
        receiver
            .broker()
            .bind(&Lifetime::eternal(), RdId(77), collect.clone())
            .unwrap();

        let bytes = out.lock().clone();
        for chunk in bytes.chunks(3) {
            receiver.receive(chunk).unwrap();
        }
        assert_eq!(*collect.values.lock(), vec![1, 2, 3]);
        assert_eq!(receiver.stats().frames_received, 3);
        assert_eq!(sender.stats().frames_sent, 3);
    }

    #[test]
    fn test_dispatch_runs_on_scheduler() {
        let (out, sink) = capture();
        let sender = wire(sink, Arc::new(SynchronousScheduler::new()));
        sender.send_with(RdId(5), |w| w.write_u32(9)).unwrap();

        let scheduler = Arc::new(ManualScheduler::new());
        let (_, sink) = capture();
        let receiver = wire(sink, scheduler.clone());
        let collect = Arc::new(Collect::default());
        receiver
            .broker()
            .bind(&Lifetime::eternal(), RdId(5), collect.clone())
            .unwrap();

        receiver.receive(&out.lock()).unwrap();
        assert!(collect.values.lock().is_empty());
        assert_eq!(scheduler.pump(), 1);
        assert_eq!(*collect.values.lock(), vec![9]);
    }

    #[test]
    fn test_sink_failure_closes_connection() {
        let failing = |_: Bytes| -> RdResult<()> { Err(RdError::Transport("broken pipe".into())) };
        let wire = wire(Box::new(failing), Arc::new(SynchronousScheduler::new()));
        assert!(wire.send(RdId(1), Bytes::new()).is_err());
        assert!(!wire.is_connected());
        assert_eq!(wire.send(RdId(1), Bytes::new()), Err(RdError::LifetimeTerminated));
    }

    #[test]
    fn test_oversized_frame_closes_connection() {
        let (_, sink) = capture();
        let wire = Wire::new(
            ProtocolConfig::default().with_max_frame_len(4),
            sink,
            Arc::new(SynchronousScheduler::new()),
            LifetimeDefinition::new(),
        );
        let frame = Frame::new(RdId(1), Bytes::from_static(&[0; 8]));
        assert!(wire.receive(&frame.serialize()).is_err());
        assert!(!wire.is_connected());
    }

    #[test]
    fn test_closed_wire_stops_io() {
        let (out, sink) = capture();
        let wire = wire(sink, Arc::new(SynchronousScheduler::new()));
        wire.close();
        assert!(wire.send(RdId(1), Bytes::new()).is_err());
        assert!(out.lock().is_empty());
        wire.receive(&[1, 0]).unwrap();
        assert_eq!(wire.stats().frames_received, 0);
    }
}
