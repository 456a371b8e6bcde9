//! Per-database progress reporting for the streaming pass.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;

/// Capacity of the channel between the producer and the progress relay.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 100;

/// Receives progress notifications while a dump is streamed.
///
/// Implementations must be cheap; they run on the relay task and a slow sink
/// only delays progress output, never the restore itself.
pub trait ProgressSink: Send + Sync {
    /// A kept database started streaming.
    fn database_started(&self, name: &str);

    /// A database finished streaming (the next one started, or the stream ended).
    fn database_completed(&self, name: &str, elapsed: Duration);
}

/// Progress sink writing to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProgress;

impl ProgressSink for LoggingProgress {
    fn database_started(&self, name: &str) {
        info!("Restoring database: {}", name);
    }

    fn database_completed(&self, name: &str, elapsed: Duration) {
        info!("✓ Database {} restored ({:.1?})", name, elapsed);
    }
}

/// Turns switch notifications into sink calls until the channel closes.
///
/// Returns the databases in the order they were reported.
pub async fn relay_progress(
    mut updates: mpsc::Receiver<String>,
    sink: Arc<dyn ProgressSink>,
) -> Vec<String> {
    let mut reported = Vec::new();
    let mut current: Option<(String, Instant)> = None;

    while let Some(name) = updates.recv().await {
        if current.as_ref().is_some_and(|(last, _)| *last == name) {
            continue;
        }
        if let Some((last, started)) = current.take() {
            sink.database_completed(&last, started.elapsed());
        }
        sink.database_started(&name);
        reported.push(name.clone());
        current = Some((name, Instant::now()));
    }

    if let Some((last, started)) = current {
        sink.database_completed(&last, started.elapsed());
    }
    reported
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl ProgressSink for RecordingSink {
        fn database_started(&self, name: &str) {
            self.events.lock().unwrap().push(format!("start:{}", name));
        }

        fn database_completed(&self, name: &str, _elapsed: Duration) {
            self.events.lock().unwrap().push(format!("done:{}", name));
        }
    }

    #[tokio::test]
    async fn test_relay_reports_in_order_and_completes_last() {
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let sink = Arc::new(RecordingSink::default());
        let relay = tokio::spawn(relay_progress(rx, sink.clone()));

        for name in ["app_db", "app_db", "app_logs"] {
            tx.send(name.to_string()).await.unwrap();
        }
        drop(tx);

        let reported = relay.await.unwrap();
        assert_eq!(reported, vec!["app_db", "app_logs"]);
        assert_eq!(
            *sink.events.lock().unwrap(),
            vec!["start:app_db", "done:app_db", "start:app_logs", "done:app_logs"]
        );
    }

    #[tokio::test]
    async fn test_relay_with_no_updates_reports_nothing() {
        let (tx, rx) = mpsc::channel::<String>(1);
        drop(tx);
        let reported = relay_progress(rx, Arc::new(LoggingProgress)).await;
        assert!(reported.is_empty());
    }
}
