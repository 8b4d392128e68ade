use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{Event, EventError, EventLog, Record};

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub stream: String,
    pub max_len: u64,
    pub probe_timeout: Duration,
    pub drain_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            stream: "corral.auth".to_string(),
            max_len: 1_000_000,
            probe_timeout: Duration::from_millis(100),
            drain_interval: Duration::from_secs(5),
        }
    }
}

/// At-least-once producer: records that cannot be appended right away are
/// buffered in memory and replayed by [`ResilientPublisher::run`].
///
/// Clones are handles to the same publisher and share its pending queue.
pub struct ResilientPublisher<L: EventLog> {
    log: Arc<L>,
    config: Arc<PublisherConfig>,
    pending: Arc<Mutex<Vec<Record>>>,
}

impl<L: EventLog> Clone for ResilientPublisher<L> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            config: Arc::clone(&self.config),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<L: EventLog> ResilientPublisher<L> {
    pub fn new(log: Arc<L>, config: PublisherConfig) -> Self {
        Self {
            log,
            config: Arc::new(config),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Never fails because the log is down; only encoding errors surface.
    pub async fn publish<E: Event + ?Sized>(&self, event: &E) -> Result<(), EventError> {
        let record = event.encode()?;

        if let Err(e) = self.probe().await {
            tracing::warn!(error = %e, "event log unhealthy, buffering record");
            self.pending.lock().push(record);
            return Ok(());
        }

        if let Err(e) = self
            .log
            .append(&self.config.stream, &record, self.config.max_len)
            .await
        {
            tracing::warn!(error = %e, "event append failed, buffering record");
            self.pending.lock().push(record);
        }

        Ok(())
    }

    /// One replay pass, newest first. Returns how many records were appended.
    ///
    /// A record leaves the queue while its append is in flight and goes back
    /// on failure, so concurrent passes never replay or drop the same record.
    pub async fn drain(&self) -> usize {
        if self.probe().await.is_err() {
            return 0;
        }

        let mut drained = 0;
        loop {
            let Some(record) = self.pending.lock().pop() else {
                break;
            };

            match self
                .log
                .append(&self.config.stream, &record, self.config.max_len)
                .await
            {
                Ok(()) => drained += 1,
                Err(e) => {
                    let mut pending = self.pending.lock();
                    pending.push(record);
                    tracing::warn!(error = %e, remaining = pending.len(), "event replay interrupted");
                    break;
                }
            }
        }

        if drained > 0 {
            tracing::info!(drained, "replayed buffered events");
        }
        drained
    }

    /// Replays the pending queue on a fixed interval until `shutdown` resolves,
    /// then makes one last pass.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(self.config.drain_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    self.drain().await;
                    tracing::info!(pending = self.pending_len(), "event publisher stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.drain().await;
                }
            }
        }
    }

    pub fn spawn<F>(&self, shutdown: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(self.clone().run(shutdown))
    }

    async fn probe(&self) -> Result<(), EventError> {
        match tokio::time::timeout(self.config.probe_timeout, self.log.ping()).await {
            Ok(result) => result,
            Err(_) => Err(EventError::Unavailable("health probe timed out".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryEventLog;

    struct Numbered(usize);

    impl Event for Numbered {
        fn encode(&self) -> Result<Record, EventError> {
            Ok(Record::from([
                ("operation".to_string(), "test.numbered".to_string()),
                ("n".to_string(), self.0.to_string()),
            ]))
        }
    }

    struct Unencodable;

    impl Event for Unencodable {
        fn encode(&self) -> Result<Record, EventError> {
            Err(EventError::Encode("bad payload".to_string()))
        }
    }

    struct SlowLog;

    impl EventLog for SlowLog {
        async fn ping(&self) -> Result<(), EventError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        async fn append(&self, _: &str, _: &Record, _: u64) -> Result<(), EventError> {
            Ok(())
        }
    }

    fn config() -> PublisherConfig {
        PublisherConfig {
            stream: "test".to_string(),
            max_len: 0,
            probe_timeout: Duration::from_millis(50),
            drain_interval: Duration::from_millis(10),
        }
    }

    fn numbers(log: &InMemoryEventLog) -> Vec<String> {
        log.records("test")
            .into_iter()
            .filter_map(|r| r.get("n").cloned())
            .collect()
    }

    #[tokio::test]
    async fn healthy_log_appends_directly() {
        let log = Arc::new(InMemoryEventLog::new());
        let publisher = ResilientPublisher::new(Arc::clone(&log), config());

        publisher.publish(&Numbered(1)).await.unwrap();

        assert_eq!(numbers(&log), vec!["1"]);
        assert_eq!(publisher.pending_len(), 0);
    }

    #[tokio::test]
    async fn outage_buffers_without_error() {
        let log = Arc::new(InMemoryEventLog::new());
        log.set_available(false);
        let publisher = ResilientPublisher::new(Arc::clone(&log), config());

        publisher.publish(&Numbered(1)).await.unwrap();
        publisher.publish(&Numbered(2)).await.unwrap();

        assert_eq!(publisher.pending_len(), 2);
        assert!(numbers(&log).is_empty());
    }

    #[tokio::test]
    async fn append_failure_after_good_probe_buffers() {
        let log = Arc::new(InMemoryEventLog::new());
        log.set_failing_appends(true);
        let publisher = ResilientPublisher::new(Arc::clone(&log), config());

        publisher.publish(&Numbered(1)).await.unwrap();

        assert_eq!(publisher.pending_len(), 1);
    }

    #[tokio::test]
    async fn encode_failure_surfaces() {
        let log = Arc::new(InMemoryEventLog::new());
        let publisher = ResilientPublisher::new(log, config());

        let err = publisher.publish(&Unencodable).await.unwrap_err();

        assert!(matches!(err, EventError::Encode(_)));
        assert_eq!(publisher.pending_len(), 0);
    }

    #[tokio::test]
    async fn slow_probe_counts_as_outage() {
        let publisher = ResilientPublisher::new(Arc::new(SlowLog), config());

        publisher.publish(&Numbered(1)).await.unwrap();

        assert_eq!(publisher.pending_len(), 1);
    }

    #[tokio::test]
    async fn drain_replays_newest_first() {
        let log = Arc::new(InMemoryEventLog::new());
        log.set_available(false);
        let publisher = ResilientPublisher::new(Arc::clone(&log), config());
        for n in 1..=3 {
            publisher.publish(&Numbered(n)).await.unwrap();
        }

        log.set_available(true);
        let drained = publisher.drain().await;

        assert_eq!(drained, 3);
        assert_eq!(numbers(&log), vec!["3", "2", "1"]);
        assert_eq!(publisher.pending_len(), 0);
    }

    #[tokio::test]
    async fn drain_keeps_records_while_log_is_down() {
        let log = Arc::new(InMemoryEventLog::new());
        log.set_available(false);
        let publisher = ResilientPublisher::new(Arc::clone(&log), config());
        publisher.publish(&Numbered(1)).await.unwrap();

        assert_eq!(publisher.drain().await, 0);
        assert_eq!(publisher.pending_len(), 1);
    }

    #[tokio::test]
    async fn drain_stops_at_first_append_failure() {
        let log = Arc::new(InMemoryEventLog::new());
        log.set_failing_appends(true);
        let publisher = ResilientPublisher::new(Arc::clone(&log), config());
        publisher.publish(&Numbered(1)).await.unwrap();
        publisher.publish(&Numbered(2)).await.unwrap();

        assert_eq!(publisher.drain().await, 0);
        assert_eq!(publisher.pending_len(), 2);
    }

    #[tokio::test]
    async fn outage_loses_nothing_once_run_loop_drains() {
        // 1. Publish N records while the log is down
        let log = Arc::new(InMemoryEventLog::new());
        log.set_available(false);
        let publisher = ResilientPublisher::new(Arc::clone(&log), config());
        for n in 0..20 {
            publisher.publish(&Numbered(n)).await.unwrap();
        }
        assert_eq!(publisher.pending_len(), 20);

        // 2. Recover and let the background loop replay
        log.set_available(true);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = publisher.spawn(async move {
            let _ = rx.await;
        });

        for _ in 0..100 {
            if publisher.pending_len() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // 3. Every record arrived exactly once
        let _ = tx.send(());
        handle.await.unwrap();

        let mut appended: Vec<usize> = numbers(&log).iter().map(|n| n.parse().unwrap()).collect();
        appended.sort_unstable();
        assert_eq!(appended, (0..20).collect::<Vec<_>>());
        assert_eq!(publisher.pending_len(), 0);
    }

    #[tokio::test]
    async fn clones_share_the_pending_queue() {
        let log = Arc::new(InMemoryEventLog::new());
        log.set_available(false);
        let publisher = ResilientPublisher::new(log, config());
        let handle = publisher.clone();

        handle.publish(&Numbered(1)).await.unwrap();

        assert_eq!(publisher.pending_len(), 1);
    }

    struct GatedLog {
        inner: InMemoryEventLog,
        gate: tokio::sync::Barrier,
        gated: std::sync::atomic::AtomicUsize,
    }

    impl EventLog for GatedLog {
        async fn ping(&self) -> Result<(), EventError> {
            Ok(())
        }

        async fn append(&self, stream: &str, record: &Record, max_len: u64) -> Result<(), EventError> {
            if self.gated.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
                self.gate.wait().await;
            }
            self.inner.append(stream, record, max_len).await
        }
    }

    #[tokio::test]
    async fn concurrent_drains_append_each_record_once() {
        // 1. Two records queued behind a log that holds the first two appends together
        let log = Arc::new(GatedLog {
            inner: InMemoryEventLog::new(),
            gate: tokio::sync::Barrier::new(2),
            gated: std::sync::atomic::AtomicUsize::new(0),
        });
        let publisher = ResilientPublisher::new(Arc::clone(&log), config());
        publisher.pending.lock().extend([
            Numbered(1).encode().unwrap(),
            Numbered(2).encode().unwrap(),
        ]);

        // 2. Two handles drain at the same time
        let other = publisher.clone();
        let (a, b) = tokio::join!(publisher.drain(), other.drain());

        // 3. Each record was appended exactly once
        assert_eq!(a + b, 2);
        assert_eq!(publisher.pending_len(), 0);
        let mut appended = numbers(&log.inner);
        appended.sort();
        assert_eq!(appended, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn shutdown_makes_a_final_drain_pass() {
        let log = Arc::new(InMemoryEventLog::new());
        log.set_available(false);
        let publisher = ResilientPublisher::new(
            Arc::clone(&log),
            PublisherConfig {
                drain_interval: Duration::from_secs(3600),
                ..config()
            },
        );
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = publisher.spawn(async move {
            let _ = rx.await;
        });

        publisher.publish(&Numbered(1)).await.unwrap();
        log.set_available(true);
        let _ = tx.send(());
        handle.await.unwrap();

        assert_eq!(numbers(&log), vec!["1"]);
        assert_eq!(publisher.pending_len(), 0);
    }
}
