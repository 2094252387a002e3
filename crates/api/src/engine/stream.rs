use std::pin::Pin;
use std::task::{Context, Poll};

use faceswap_core::events::JobEvent;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Events of one job, in order.
///
/// Dropping the stream cancels the job; after the job has finished this
/// has no effect.
pub struct JobEventStream {
    inner: ReceiverStream<JobEvent>,
    _guard: DropGuard,
}

impl JobEventStream {
    /// Stream that cancels `cancel` when dropped.
    pub fn cancel_on_drop(events: mpsc::Receiver<JobEvent>, cancel: CancellationToken) -> Self {
        Self {
            inner: ReceiverStream::new(events),
            _guard: cancel.drop_guard(),
        }
    }
}

impl Stream for JobEventStream {
    type Item = JobEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
