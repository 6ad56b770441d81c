//! Recording wrapper for live response streams
//!
//! [`RecordingStream`] sits between a model client's stream and its
//! consumer. Every fragment is appended to a shared [`PartBuffer`] before
//! the consumer sees it, so the recorded history is always at least as
//! complete as what any observer has received. A completion callback fires
//! exactly once when the stream ends - by exhaustion, failure, or the
//! consumer dropping it mid-flight.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tracing::debug;

use exchangestore::{PartBuffer, ResponsePart};

use crate::model::{ModelError, ResponseStream};

/// Fires a callback exactly once, at the latest on drop
struct CompletionGuard {
    on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl CompletionGuard {
    fn new(on_complete: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            on_complete: Some(on_complete),
        }
    }

    fn fire(&mut self) {
        if let Some(callback) = self.on_complete.take() {
            callback();
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.fire();
    }
}

/// A response stream that records fragments as they pass through
pub struct RecordingStream {
    inner: ResponseStream,
    buffer: PartBuffer,
    guard: CompletionGuard,
    done: bool,
}

impl RecordingStream {
    /// Wrap a stream, recording into `buffer` and firing `on_complete`
    /// once the stream terminates for any reason.
    pub fn new(inner: ResponseStream, buffer: PartBuffer, on_complete: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            inner,
            buffer,
            guard: CompletionGuard::new(on_complete),
            done: false,
        }
    }

    fn record(&self, part: ResponsePart) {
        if let Ok(mut parts) = self.buffer.lock() {
            parts.push(part);
        }
    }
}

impl Stream for RecordingStream {
    type Item = Result<ResponsePart, ModelError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(part))) => {
                // Record before the consumer can observe the fragment
                self.record(part.clone());
                Poll::Ready(Some(Ok(part)))
            }
            Poll::Ready(Some(Err(err))) => {
                debug!(error = %err, "poll_next: stream failed, recording synthetic error fragment");
                self.record(ResponsePart::error_text(&err.to_string()));
                self.done = true;
                self.guard.fire();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.done = true;
                self.guard.fire();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
