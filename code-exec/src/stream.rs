use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::error::{Error, ErrorResponse};
use crate::types::{ExecEvent, ExecResult};

const EVENT_BUFFER: usize = 64;

/// Events of one streaming execution.
///
/// Yields output chunks in the order they were produced, then exactly one
/// `Finished` or `Failed` event, then ends. Cancelling or dropping the stream
/// kills the running program.
pub struct ExecStream {
    events: ReceiverStream<ExecEvent>,
    done: bool,
}

impl ExecStream {
    /// Runs `execution` in the background, feeding its output into the stream.
    pub(crate) fn spawn<F, Fut>(execution: F) -> Self
    where
        F: FnOnce(mpsc::Sender<ExecEvent>) -> Fut,
        Fut: Future<Output = Result<ExecResult, Error>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let run = execution(tx.clone());

        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = run => Some(result),
                _ = tx.closed() => None,
            };

            let event = match outcome {
                Some(Ok(result)) => ExecEvent::Finished(result),
                Some(Err(e)) => ExecEvent::Failed(ErrorResponse::from(&e)),
                None => {
                    debug!("Execution stream cancelled");
                    return;
                }
            };
            if tx.send(event).await.is_err() {
                debug!("Execution stream dropped before the final event");
            }
        });

        Self {
            events: ReceiverStream::new(rx),
            done: false,
        }
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<ExecEvent> {
        StreamExt::next(self).await
    }

    /// Stops the execution. Events not yet received are discarded.
    pub fn cancel(&mut self) {
        self.events.close();
        self.done = true;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl Stream for ExecStream {
    type Item = ExecEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.events).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.done = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
