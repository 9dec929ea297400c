//! Wait-and-communicate: no reader tasks, one draining read after the
//! child is done.
//!
//! Cheaper than the poller for short-lived children, but it cannot serve
//! live-delivery sinks, and a child that outgrows the OS pipe buffer
//! before exiting will stall; validation steers such configurations to
//! the poller.

use cr_core::OutputDecoding;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tracing::debug;

use crate::pump::StreamDecoder;
use crate::sink::{ResolvedStreams, SharedSinks};

/// Read whatever the pipes still hold and deliver it to the sinks, one
/// chunk per stream, stdout before stderr.
///
/// `deadline` bounds the read so a grandchild that inherited the write
/// end cannot wedge the engine; whatever arrived before the cutoff is
/// still delivered (partial output). Returns true when the deadline cut
/// the drain off.
pub(crate) async fn drain_once(
    child: &mut Child,
    streams: &ResolvedStreams,
    decoding: OutputDecoding,
    deadline: Option<Duration>,
) -> bool {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_acc = Arc::new(Mutex::new(Vec::new()));
    let stderr_acc = Arc::new(Mutex::new(Vec::new()));

    let read_both = async {
        tokio::join!(
            read_into(stdout, stdout_acc.clone()),
            read_into(stderr, stderr_acc.clone())
        );
    };
    let mut cut_off = false;
    match deadline {
        Some(deadline) => {
            if tokio::time::timeout(deadline, read_both).await.is_err() {
                debug!("abandoned pipe drain at deadline");
                cut_off = true;
            }
        }
        None => read_both.await,
    }

    deliver(&stdout_acc, streams.stdout_sinks.as_ref(), decoding).await;
    deliver(&stderr_acc, streams.stderr_sinks.as_ref(), decoding).await;
    cut_off
}

async fn read_into<R: AsyncRead + Unpin>(reader: Option<R>, acc: Arc<Mutex<Vec<u8>>>) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut acc) = acc.lock() {
                    acc.extend_from_slice(&buf[..n]);
                }
            }
        }
    }
}

async fn deliver(acc: &Arc<Mutex<Vec<u8>>>, sinks: Option<&SharedSinks>, decoding: OutputDecoding) {
    let Some(sinks) = sinks else {
        return;
    };
    let bytes = acc
        .lock()
        .map(|mut acc| std::mem::take(&mut *acc))
        .unwrap_or_default();
    if bytes.is_empty() {
        return;
    }
    let mut decoder = StreamDecoder::new(decoding);
    let chunk = decoder.decode(&bytes);
    if !chunk.is_empty() {
        sinks.lock().await.dispatch(&chunk).await;
    }
    if let Some(tail) = decoder.finish() {
        sinks.lock().await.dispatch(&tail).await;
    }
}
