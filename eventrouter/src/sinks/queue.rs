use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{error, warn};

const WRITE_BATCH: usize = 64;

/// Bounded hand-off between `publish` and a sink's background writer
///
/// Envelopes are serialized to newline-terminated JSON on the caller's side and pushed
/// with `try_send`: when the writer falls behind the queue fills up and new events are
/// dropped rather than stalling the router.
pub(super) struct LineQueue {
    sink: &'static str,
    tx: mpsc::Sender<Bytes>,
    worker: JoinHandle<()>,
}

impl LineQueue {
    pub(super) fn spawn<F, Fut>(sink: &'static str, capacity: usize, worker: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<Bytes>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sink,
            tx,
            worker: tokio::spawn(worker(rx)),
        }
    }

    pub(super) fn push<T: Serialize + ?Sized>(&self, data: &T) {
        let mut line = match serde_json::to_vec(data) {
            Ok(line) => line,
            Err(err) => {
                warn!(sink = self.sink, error = %err, "failed to serialize event");
                return;
            }
        };
        line.push(b'\n');
        match self.tx.try_send(Bytes::from(line)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(sink = self.sink, "sink buffer full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(sink = self.sink, "sink worker has stopped, dropping event");
            }
        }
    }

    /// Stop accepting events and wait for everything queued so far to be handled
    pub(super) async fn close(self) {
        drop(self.tx);
        if let Err(err) = self.worker.await {
            warn!(sink = self.sink, error = %err, "sink worker failed");
        }
    }
}

/// Worker body for sinks that append lines to a byte stream, flushing after every batch
pub(super) async fn write_lines<W>(sink: &'static str, mut out: W, mut rx: mpsc::Receiver<Bytes>)
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(WRITE_BATCH);
    while rx.recv_many(&mut batch, WRITE_BATCH).await > 0 {
        for line in batch.drain(..) {
            if let Err(err) = out.write_all(&line).await {
                error!(sink, error = %err, "failed to write event");
            }
        }
        if let Err(err) = out.flush().await {
            error!(sink, error = %err, "failed to flush events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{write_lines, LineQueue};
    use bytes::Bytes;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn lines_are_written_in_order() {
        let (tx, rx) = mpsc::channel(8);
        for n in 0..3 {
            tx.send(Bytes::from(format!("{n}\n"))).await.unwrap();
        }
        drop(tx);
        let mut out = Vec::new();
        write_lines("test", &mut out, rx).await;
        assert_eq!(out, b"0\n1\n2\n");
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let queue = LineQueue::spawn("test", 1, move |mut rx| async move {
            let _ = release_rx.await;
            while let Some(line) = rx.recv().await {
                let _ = seen_tx.send(line);
            }
        });
        for n in 0..5 {
            queue.push(&json!({ "n": n }));
        }
        let _ = release_tx.send(());
        queue.close().await;

        let mut seen = Vec::new();
        while let Ok(line) = seen_rx.try_recv() {
            seen.push(line);
        }
        assert_eq!(seen, vec![Bytes::from_static(b"{\"n\":0}\n")]);
    }
}
