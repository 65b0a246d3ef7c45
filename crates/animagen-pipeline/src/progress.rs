//! In-process progress broadcast.

use tokio::sync::broadcast;

use animagen_models::ProgressEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out channel for [`ProgressEvent`]s. Slow subscribers lag and drop
/// events rather than backpressure the pipeline.
#[derive(Clone)]
pub struct ProgressChannel {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Emitting with no subscribers is a no-op.
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animagen_models::JobId;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let channel = ProgressChannel::default();
        let mut rx = channel.subscribe();

        channel.emit(ProgressEvent::job_started(JobId::from("batch_x"), 3));
        match rx.recv().await.unwrap() {
            ProgressEvent::JobStarted { total, .. } => assert_eq!(total, 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let channel = ProgressChannel::default();
        channel.emit(ProgressEvent::log("nobody listening"));
    }
}
