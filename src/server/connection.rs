//! Driving one accepted connection.
//!
//! Each connection runs on three threads:
//! - reader: transport bytes into [`FrameDecoder`], complete frames out
//! - session: the calling thread, alternating between frames and store events
//! - writer: encoded replies from the outbox onto the transport

use crate::error::{ConnectionError, Result};
use crate::proto::{encode_reply, FrameDecoder, Reply};
use crate::session::{ConnectionIds, Outbox, Session};
use crate::store::{StoreClient, WatchEvent};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, trace, warn};

use super::{ServerConfig, Transport};

/// Frames decoded ahead of the session before the reader blocks.
const INBOUND_FRAMES: usize = 256;

enum Inbound {
    Frame(Vec<u8>),
    Closed(Result<()>),
}

/// Serve a connection until the peer disconnects or a fatal error occurs.
///
/// On return the session has been torn down: every subscription terminated,
/// the connection detached from the store, and the transport shut down.
pub fn serve_connection<T: Transport>(
    stream: T,
    store: Arc<dyn StoreClient>,
    ids: &ConnectionIds,
    config: &ServerConfig,
) -> Result<()> {
    let peer = stream.peer_label();
    let reader_stream = stream.split_clone()?;
    let writer_stream = stream.split_clone()?;
    // A peer that stops reading must not pin the writer, or teardown, forever.
    writer_stream.limit_writes(config.write_timeout())?;

    let (outbox, replies) = Outbox::bounded(config.outbound_buffer);
    let (mut session, events) = Session::new(store, ids, outbox);
    let conn = session.id();
    info!(conn = %conn, peer = %peer, "connection opened");

    let writer = thread::Builder::new()
        .name(format!("conn-{}-writer", conn))
        .spawn(move || write_loop(writer_stream, replies))?;

    let (frames_tx, frames) = bounded(INBOUND_FRAMES);
    let max_frame_bytes = config.max_frame_bytes;
    let chunk = config.read_chunk_bytes.max(1);
    let reader = thread::Builder::new()
        .name(format!("conn-{}-reader", conn))
        .spawn(move || {
            let outcome = read_loop(reader_stream, &frames_tx, max_frame_bytes, chunk);
            let _ = frames_tx.send(Inbound::Closed(outcome));
        })?;

    let outcome = run_session(&mut session, &frames, &events);

    // Teardown order: subscriptions and store detach first, then let the
    // writer flush what is queued, then stop the reader.
    drop(session);
    if outcome.is_err() {
        stream.close();
    }
    match writer.join() {
        Ok(Err(e)) => debug!(conn = %conn, error = %e, "writer stopped"),
        Ok(Ok(())) => {}
        Err(_) => warn!(conn = %conn, "writer thread panicked"),
    }
    stream.close();
    drop(frames);
    if reader.join().is_err() {
        warn!(conn = %conn, "reader thread panicked");
    }

    match &outcome {
        Ok(()) => info!(conn = %conn, peer = %peer, "connection closed"),
        Err(e) => warn!(conn = %conn, peer = %peer, error = %e, "connection closed with error"),
    }
    outcome
}

fn run_session(
    session: &mut Session,
    frames: &Receiver<Inbound>,
    events: &Receiver<WatchEvent>,
) -> Result<()> {
    loop {
        select! {
            recv(frames) -> msg => match msg {
                Ok(Inbound::Frame(frame)) => session.handle_frame(&frame)?,
                Ok(Inbound::Closed(outcome)) => return outcome,
                Err(_) => return Ok(()),
            },
            recv(events) -> event => match event {
                Ok(event) => session.deliver(event)?,
                Err(_) => return Ok(()),
            },
        }
    }
}

/// Returns `Ok` on a clean end of stream or when the session stops listening.
fn read_loop<T: Transport>(
    mut stream: T,
    frames: &Sender<Inbound>,
    max_frame_bytes: usize,
    chunk: usize,
) -> Result<()> {
    let mut decoder = FrameDecoder::with_max_frame_bytes(max_frame_bytes);
    let mut buf = vec![0u8; chunk];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                if decoder.buffered() > 0 {
                    debug!(bytes = decoder.buffered(), "discarding partial frame at end of stream");
                }
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        decoder.feed(&buf[..n]);
        while let Some(frame) = decoder.next_frame()? {
            trace!(len = frame.len(), "frame");
            if frames.send(Inbound::Frame(frame)).is_err() {
                return Ok(());
            }
        }
    }
}

fn write_loop<T: Transport>(mut stream: T, replies: Receiver<Reply>) -> Result<()> {
    for reply in replies.iter() {
        let written = encode_reply(&reply).and_then(|bytes| {
            stream
                .write_all(&bytes)
                .and_then(|()| stream.flush())
                .map_err(ConnectionError::from)
        });
        if let Err(e) = written {
            stream.close();
            return Err(e);
        }
    }
    Ok(())
}
