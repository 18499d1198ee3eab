// SPDX-License-Identifier: MIT OR Apache-2.0
//! Byte pumps between the parent-side endpoints and in-memory buffers.

use pw_cancel::CancelToken;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// How long a cancelled stage's pumps may keep draining before they are told
/// to stop.
pub(crate) const FLUSH_GRACE: Duration = Duration::from_millis(250);

const CHUNK: usize = 8 * 1024;

/// Buffer shared between a pump and the stage that owns it.
pub(crate) type SharedBuf = Arc<Mutex<Vec<u8>>>;

pub(crate) fn take(buf: &SharedBuf) -> Vec<u8> {
    std::mem::take(&mut *buf.lock().unwrap_or_else(PoisonError::into_inner))
}

/// Copy `reader` into `sink` until EOF or until `stop` fires. Bytes read
/// before `stop` is observed are kept.
pub(crate) fn capture<R>(
    label: &'static str,
    stage: String,
    mut reader: R,
    sink: SharedBuf,
    stop: CancelToken,
) -> JoinHandle<io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; CHUNK];
        loop {
            let read = tokio::select! {
                biased;
                read = reader.read(&mut chunk) => read,
                _ = stop.cancelled() => {
                    debug!(target: "pipewright.pump", stream = label, %stage, "stopped before EOF");
                    return Ok(());
                }
            };
            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    warn!(target: "pipewright.pump", stream = label, %stage, error = %e, "read failed");
                    return Err(e);
                }
            };
            if n == 0 {
                trace!(target: "pipewright.pump", stream = label, %stage, "eof");
                return Ok(());
            }
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&chunk[..n]);
        }
    })
}

/// Write `bytes` into `writer`, then close it.
pub(crate) fn feed<W>(stage: String, mut writer: W, bytes: Vec<u8>, stop: CancelToken) -> JoinHandle<io::Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let written = tokio::select! {
            biased;
            written = writer.write_all(&bytes) => written,
            _ = stop.cancelled() => Ok(()),
        };
        match written {
            Ok(()) => {
                trace!(target: "pipewright.pump", stream = "stdin", %stage, len = bytes.len(), "fed");
                writer.shutdown().await
            }
            // Reader quit early.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(target: "pipewright.pump", stream = "stdin", %stage, "reader closed early");
                Ok(())
            }
            Err(e) => {
                warn!(target: "pipewright.pump", stream = "stdin", %stage, error = %e, "write failed");
                Err(e)
            }
        }
    })
}
