//! One client connection.
//!
//! The socket is split into a read half and a write half, each driven by its
//! own task. They rendezvous over a single-slot channel: for every request
//! line the read side produces exactly one [`Reply`] and waits until the write
//! side confirms it hit the socket before reading the next line. A long-lived
//! connection can therefore serve any number of requests, strictly one at a
//! time and in order.
//!
//! Anything that goes wrong (bad JSON, idle timeout, a store error) ends the
//! session. Nothing is written back; the client only sees the connection
//! close.

use crate::server::{
    engine::Engine,
    telemetry::{decrement_sessions_inflight, increment_requests, increment_sessions_inflight},
};
use futures::{SinkExt, StreamExt};
use seqd_core::{
    Error, Result,
    protocol::{AllocationRequest, encode_reply},
    store::{BufferStore, CounterStore},
    types::Allocation,
};
use std::sync::Arc;
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

/// A reply line travelling from the read half to the write half.
struct Reply {
    line: String,
    written: oneshot::Sender<()>,
}

/// Serves one client connection until it closes, times out, or fails.
#[tracing::instrument(name = "session", skip_all, fields(peer = %peer))]
pub async fn run_session<B, C>(stream: TcpStream, peer: String, engine: Arc<Engine<B, C>>)
where
    B: BufferStore,
    C: CounterStore,
{
    increment_sessions_inflight();

    let (read_half, write_half) = stream.into_split();
    let (reply_tx, reply_rx) = mpsc::channel::<Reply>(1);
    let writer = tokio::spawn(write_replies(write_half, reply_rx));

    let outcome = read_requests(read_half, &engine, reply_tx).await;
    // `reply_tx` is gone, so the writer drains and exits.
    let written = writer.await;

    match outcome {
        Ok(()) => tracing::debug!("Client closed the connection"),
        Err(Error::ConnectionTimeout) => tracing::debug!("Closing idle connection"),
        Err(e @ Error::Protocol { .. }) => tracing::info!("Closing connection: {e}"),
        Err(e) if e.is_store_error() => tracing::warn!("Closing connection: {e}"),
        Err(e) => tracing::debug!("Closing connection: {e}"),
    }

    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Writer stopped: {e}"),
        Err(e) => tracing::error!("Writer task failed: {e}"),
    }

    decrement_sessions_inflight();
}

async fn read_requests<B, C>(
    read_half: OwnedReadHalf,
    engine: &Engine<B, C>,
    reply_tx: mpsc::Sender<Reply>,
) -> Result<()>
where
    B: BufferStore,
    C: CounterStore,
{
    let config = engine.config();
    let mut lines = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(config.max_line_bytes),
    );

    loop {
        let line = match timeout(config.session_idle_timeout, lines.next()).await {
            Err(_elapsed) => return Err(Error::ConnectionTimeout),
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(codec_error(e)),
            Ok(Some(Ok(line))) => line,
        };

        tracing::trace!("Received {line}");
        let allocation = serve_request(engine, &line).await?;

        let (written_tx, written_rx) = oneshot::channel();
        reply_tx
            .send(Reply {
                line: encode_reply(allocation),
                written: written_tx,
            })
            .await
            .map_err(|_| Error::ChannelError {
                context: "writer is gone".to_owned(),
            })?;
        written_rx.await.map_err(|_| Error::ChannelError {
            context: "reply was not written".to_owned(),
        })?;
    }
}

/// Handles one decoded line: registers and touches the bucket, then pops.
async fn serve_request<B, C>(engine: &Engine<B, C>, line: &str) -> Result<Allocation>
where
    B: BufferStore,
    C: CounterStore,
{
    let config = engine.config();
    let request = AllocationRequest::decode(line)?;
    let key = request.bucket_key()?;
    let step = request.effective_step(config.default_step, config.max_step)?;
    increment_requests();

    engine.registry().ensure_and_touch(&key, step);

    engine.allocator().allocate(&key).await
}

async fn write_replies(
    write_half: OwnedWriteHalf,
    mut replies: mpsc::Receiver<Reply>,
) -> Result<()> {
    let mut sink = FramedWrite::new(write_half, LinesCodec::new());

    while let Some(reply) = replies.recv().await {
        sink.send(reply.line).await.map_err(codec_error)?;
        // The reader may already be gone; there is nobody left to tell.
        let _ = reply.written.send(());
    }

    Ok(())
}

fn codec_error(err: LinesCodecError) -> Error {
    match err {
        LinesCodecError::MaxLineLengthExceeded => Error::protocol("request line too long"),
        LinesCodecError::Io(e) => Error::Io(e),
    }
}
