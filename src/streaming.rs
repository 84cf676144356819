//! Incremental consumption adapter.
//!
//! Wraps one orchestrated call so a consumer can observe progress without
//! blocking until completion: the orchestrator runs as a background task
//! reporting stage-advancing updates into a bounded queue, followed by
//! exactly one terminal result record. Dropping the adapter aborts the
//! background task; nothing is observable afterward.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{error::Outcome, job::ProgressUpdate};

/// Hand-off queue depth between the background task and the consumer.
const EVENT_BUFFER: usize = 64;

/// One record in the incremental event sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress(ProgressUpdate),
    Result(Outcome),
}

/// Pull-based view over one running generation call.
pub struct GenerationStream {
    events: mpsc::Receiver<StreamEvent>,
    task: JoinHandle<()>,
    terminal_seen: bool,
}

impl GenerationStream {
    /// Spawn `run` in the background, multiplexing its progress channel
    /// and final result into one event sequence.
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(mpsc::Sender<ProgressUpdate>) -> Fut + Send + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let task = tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressUpdate>(EVENT_BUFFER);
            let forward_tx = event_tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(update) = progress_rx.recv().await {
                    if forward_tx.send(StreamEvent::Progress(update)).await.is_err() {
                        break;
                    }
                }
            });

            let outcome = run(progress_tx).await;
            // The progress sender is gone once `run` returns, so the
            // forwarder drains whatever is left and exits before the
            // terminal record goes out.
            let _ = forwarder.await;
            let _ = event_tx.send(StreamEvent::Result(outcome)).await;
        });

        Self {
            events: event_rx,
            task,
            terminal_seen: false,
        }
    }

    /// Next event, or `None` once the terminal result has been yielded.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.terminal_seen {
            return None;
        }
        let event = self.events.recv().await?;
        if matches!(event, StreamEvent::Result(_)) {
            self.terminal_seen = true;
        }
        Some(event)
    }

    /// Whether the background task has run to completion.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Stream for GenerationStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminal_seen {
            return Poll::Ready(None);
        }
        match self.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if matches!(event, StreamEvent::Result(_)) {
                    self.terminal_seen = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}
