//! Stdio server loop (privileged side)
//!
//! Reads one [`Request`] per line and dispatches it on its own task, so slow
//! capabilities (inference) never block fast ones. All output (responses and
//! event pushes alike) goes through a single writer task that owns the output
//! stream, which keeps every line whole and every channel in push order.
//!
//! On EOF the loop stops reading and waits for every in-flight request,
//! fire-and-forget ones included, then drains the writer. Generation has no
//! cancellation, so an exchange that started is always recorded; the host
//! decides how long it is willing to wait.

use crate::bridge::dispatcher::{Caller, Dispatcher};
use crate::bridge::protocol::{encode_line, Frame, Request};
use crate::envelope::{Envelope, BAD_REQUEST};
use crate::events;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WRITER_GRACE: Duration = Duration::from_secs(5);

pub async fn serve<R, W>(dispatcher: Arc<Dispatcher>, reader: R, writer: W, client_id: &str) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (publisher, frames) = events::channel();
    let mut writer_task = tokio::spawn(write_frames(frames, writer));
    let caller = Caller::new(client_id, publisher.clone());

    tracing::info!(op = "server.start", client = %client_id, "Serving requests");

    let mut inflight: Vec<JoinHandle<()>> = Vec::new();
    let mut lines = reader.lines();
    let mut served = 0u64;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(op = "server.bad_request", error = %e, "Unparsable request line");
                publisher.send_frame(Frame::Response {
                    id: String::new(),
                    envelope: Envelope::failure(BAD_REQUEST, "Malformed request", &e),
                });
                continue;
            }
        };

        served += 1;
        let dispatcher = dispatcher.clone();
        let caller = caller.clone();
        inflight.retain(|h| !h.is_finished());
        inflight.push(tokio::spawn(async move {
            let events = caller.events.clone();
            if let Some(frame) = dispatcher.handle(caller, request).await {
                events.send_frame(frame);
            }
        }));
    }

    tracing::info!(
        op = "server.eof",
        served,
        inflight = inflight.len(),
        "Input closed, shutting down"
    );

    for handle in inflight {
        if let Err(e) = handle.await {
            tracing::warn!(op = "server.task_failed", error = %e, "Request task ended abnormally");
        }
    }

    drop(caller);
    drop(publisher);
    if tokio::time::timeout(WRITER_GRACE, &mut writer_task).await.is_err() {
        writer_task.abort();
    }

    tracing::info!(op = "server.stop", "Server stopped");
    Ok(())
}

async fn write_frames<W>(mut frames: mpsc::UnboundedReceiver<Frame>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let line = match encode_line(&frame) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(op = "server.encode_error", error = %e, "Dropping unencodable frame");
                continue;
            }
        };
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(op = "server.write_error", error = %e, "Output closed");
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::warn!(op = "server.write_error", error = %e, "Output closed");
            break;
        }
    }
}
