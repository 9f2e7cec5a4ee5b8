use std::{future::Future, sync::Arc, time::Duration};

use async_nats::{
    Client, ConnectOptions, Event,
    connection::State,
    jetstream::{
        self, AckKind, Message,
        consumer::{AckPolicy, PullConsumer, pull},
        stream,
    },
};
use async_trait::async_trait;
use dante_core::{Disposition, TaskSink};
use dante_model::Task;
use futures::StreamExt;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, instrument, warn};

use crate::{Inbound, NatsStatusPublisher, TransportConfig, TransportError, classify};

/// JetStream connection bound to one daemon instance.
pub struct NatsTransport {
    client: Client,
    js: jetstream::Context,
    cfg: TransportConfig,
    instance_id: String,
}

impl NatsTransport {
    /// Connects to `cfg.url`. The client keeps retrying in the background, so a
    /// broker that is down at startup is not an error.
    pub async fn connect(
        cfg: TransportConfig,
        instance_id: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let instance_id = instance_id.into();
        let name = format!("dante-providerd-{instance_id}");
        let client = ConnectOptions::new()
            .name(&name)
            .connection_timeout(cfg.connect_timeout())
            .retry_on_initial_connect()
            .event_callback(|event| async move {
                match event {
                    Event::Connected => info!(target: "dante.transport", "connected to nats"),
                    Event::Disconnected => warn!(target: "dante.transport", "disconnected from nats"),
                    other => debug!(target: "dante.transport", event = %other, "nats event"),
                }
            })
            .connect(cfg.url.as_str())
            .await
            .map_err(|e| TransportError::Connect {
                url: cfg.url.clone(),
                reason: e.to_string(),
            })?;

        let js = jetstream::new(client.clone());
        Ok(Self {
            client,
            js,
            cfg,
            instance_id,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.cfg
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.client.connection_state(), State::Connected)
    }

    /// Status publisher sharing this connection.
    pub fn publisher(&self) -> NatsStatusPublisher {
        NatsStatusPublisher::new(self.client.clone(), &self.cfg)
    }

    /// Pulls dispatch messages into `sink` until `stop` fires, with at most
    /// `max_in_flight` tasks running at once.
    ///
    /// Once stopped, no new messages are fetched; the call returns after every
    /// task already handed to the sink has been settled with the server.
    pub async fn run(&self, sink: Arc<dyn TaskSink>, max_in_flight: usize, stop: CancellationToken) {
        let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
        let tracker = TaskTracker::new();
        info!(
            target: "dante.transport",
            subject = %self.cfg.dispatch_subject(&self.instance_id),
            durable = %self.cfg.durable_name(&self.instance_id),
            max_in_flight,
            "receive loop started"
        );

        while !stop.is_cancelled() {
            let consumer = match self.consumer().await {
                Ok(c) => c,
                Err(e) => {
                    warn!(target: "dante.transport", error = %e, "consumer unavailable");
                    self.pause(&stop).await;
                    continue;
                }
            };
            if let Err(e) = self.receive(&consumer, &sink, &permits, &tracker, &stop).await {
                warn!(target: "dante.transport", error = %e, "receive interrupted; re-subscribing");
                self.pause(&stop).await;
            }
        }

        tracker.close();
        if !tracker.is_empty() {
            info!(target: "dante.transport", in_flight = tracker.len(), "waiting for in-flight tasks to settle");
        }
        tracker.wait().await;
        info!(target: "dante.transport", "receive loop stopped");
    }

    /// Flushes pending writes and drops the connection.
    pub async fn close(&self) {
        match tokio::time::timeout(self.cfg.flush_timeout(), self.client.flush()).await {
            Ok(Ok(())) => debug!(target: "dante.transport", "connection flushed"),
            Ok(Err(e)) => warn!(target: "dante.transport", error = %e, "flush on close failed"),
            Err(_) => warn!(target: "dante.transport", "flush on close timed out"),
        }
        info!(target: "dante.transport", "connection closed");
    }

    /// Looks up or creates the stream and this daemon's durable consumer.
    async fn consumer(&self) -> Result<PullConsumer, TransportError> {
        let stream = self
            .js
            .get_or_create_stream(stream::Config {
                name: self.cfg.stream_name.clone(),
                subjects: self.cfg.stream_subjects.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))?;

        let durable = self.cfg.durable_name(&self.instance_id);
        stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    filter_subject: self.cfg.dispatch_subject(&self.instance_id),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.cfg.ack_wait(),
                    max_deliver: self.cfg.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::Consumer(e.to_string()))
    }

    async fn receive(
        &self,
        consumer: &PullConsumer,
        sink: &Arc<dyn TaskSink>,
        permits: &Arc<Semaphore>,
        tracker: &TaskTracker,
        stop: &CancellationToken,
    ) -> Result<(), TransportError> {
        loop {
            // Only fetch when there is room for at least one more task.
            let Some(first) = acquire(permits, stop).await else {
                return Ok(());
            };
            let fetched = tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                r = consumer
                    .fetch()
                    .max_messages(self.cfg.fetch_batch.max(1))
                    .expires(self.cfg.fetch_expires())
                    .messages() => r,
            };
            let batch = fetched.map_err(|e| TransportError::Fetch(e.to_string()))?;
            let mut batch = std::pin::pin!(batch);

            let mut spare = Some(first);
            loop {
                let next = tokio::select! {
                    _ = stop.cancelled() => return Ok(()),
                    n = batch.next() => n,
                };
                let Some(msg) = next else { break };
                let msg = msg.map_err(|e| TransportError::Fetch(e.to_string()))?;

                let permit = match spare.take() {
                    Some(p) => p,
                    None => match acquire(permits, stop).await {
                        Some(p) => p,
                        None => return Ok(()),
                    },
                };
                self.dispatch(msg, permit, sink, tracker).await;
            }
        }
    }

    #[instrument(level = "debug", skip_all, fields(subject = %msg.subject))]
    async fn dispatch(
        &self,
        msg: Message,
        permit: OwnedSemaphorePermit,
        sink: &Arc<dyn TaskSink>,
        tracker: &TaskTracker,
    ) {
        let inbound = classify(&msg.payload, &self.instance_id);
        let settlement = Settlement::for_inbound(&inbound);
        match inbound {
            Inbound::Poison(reason) => {
                error!(target: "dante.transport", %reason, "undecodable dispatch message dropped");
            }
            Inbound::Misrouted { job_id, assigned } => {
                warn!(target: "dante.transport", %job_id, %assigned, "task addressed to another daemon dropped");
            }
            Inbound::Task(task) => {
                let sink = Arc::clone(sink);
                let every = self.cfg.progress_interval();
                let nak_delay = self.cfg.nak_delay();
                tracker.spawn(async move {
                    let _permit = permit;
                    run_task(sink.as_ref(), *task, &msg, every, nak_delay).await;
                });
                return;
            }
        }
        if let Some(settlement) = settlement {
            msg.settle(settlement).await;
        }
    }

    /// Waits for the connection to come back, then backs off one poll interval.
    async fn pause(&self, stop: &CancellationToken) {
        let poll = self.cfg.reconnect_poll();
        let mut waited = false;
        while !self.is_connected() {
            if !waited {
                warn!(target: "dante.transport", "connection lost; waiting for reconnect");
                waited = true;
            }
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(poll) => {}
            }
        }
        if waited {
            info!(target: "dante.transport", "connection restored");
        }
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

async fn acquire(permits: &Arc<Semaphore>, stop: &CancellationToken) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        _ = stop.cancelled() => None,
        p = Arc::clone(permits).acquire_owned() => p.ok(),
    }
}

/// Drives `fut` to completion, calling `beat` every `every` while it runs.
async fn with_heartbeat<F, B, BF>(fut: F, every: Duration, mut beat: B) -> F::Output
where
    F: Future,
    B: FnMut() -> BF,
    BF: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return out,
            _ = ticker.tick() => beat().await,
        }
    }
}

/// How a dispatch message is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    /// Ack and wait for the server to confirm it.
    Confirmed,
    Ack,
    /// Never redeliver.
    Term,
    /// Redeliver after the delay.
    Nak(Duration),
}

impl Settlement {
    /// Settlement decided before any handler runs. Tasks get `None`: they are
    /// settled by [`Settlement::for_disposition`] once the handler returns.
    fn for_inbound(inbound: &Inbound) -> Option<Self> {
        match inbound {
            Inbound::Poison(_) => Some(Self::Term),
            Inbound::Misrouted { .. } => Some(Self::Ack),
            Inbound::Task(_) => None,
        }
    }

    fn for_disposition(disposition: Disposition, nak_delay: Duration) -> Self {
        match disposition {
            Disposition::Ack => Self::Confirmed,
            Disposition::Retry => Self::Nak(nak_delay),
        }
    }
}

/// Acknowledgement side of one dispatch message.
#[async_trait]
trait Acknowledge: Send + Sync {
    async fn progress(&self);

    async fn settle(&self, settlement: Settlement);
}

#[async_trait]
impl Acknowledge for Message {
    async fn progress(&self) {
        if let Err(e) = self.ack_with(AckKind::Progress).await {
            debug!(target: "dante.transport", error = %e, "progress ack failed");
        }
    }

    async fn settle(&self, settlement: Settlement) {
        let kind = match settlement {
            Settlement::Confirmed => {
                if let Err(e) = self.double_ack().await {
                    warn!(target: "dante.transport", error = %e, "task ack not confirmed");
                }
                return;
            }
            Settlement::Ack => AckKind::Ack,
            Settlement::Term => AckKind::Term,
            Settlement::Nak(delay) => AckKind::Nak(Some(delay)),
        };
        if let Err(e) = self.ack_with(kind).await {
            warn!(target: "dante.transport", error = %e, "acknowledgement failed");
        }
    }
}

/// Runs one task through `sink`, keeping the message alive while it runs.
/// The message is settled only after the handler has returned, so after its
/// terminal status went out.
async fn run_task(
    sink: &dyn TaskSink,
    task: Task,
    acks: &impl Acknowledge,
    every: Duration,
    nak_delay: Duration,
) {
    let job_id = task.job_id.clone();
    let disposition = with_heartbeat(sink.run(task), every, || acks.progress()).await;
    let settlement = Settlement::for_disposition(disposition, nak_delay);
    debug!(target: "dante.transport", %job_id, ?settlement, "settling task");
    acks.settle(settlement).await;
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use dante_model::{ExecutionKind, JobParams};

    use super::*;

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Publishes a terminal entry after `runtime`, then answers `disposition`.
    struct Sink {
        journal: Arc<Journal>,
        runtime: Duration,
        disposition: Disposition,
    }

    #[async_trait]
    impl TaskSink for Sink {
        async fn run(&self, task: Task) -> Disposition {
            tokio::time::sleep(self.runtime).await;
            self.journal.push(format!("terminal {}", task.job_id));
            self.disposition
        }
    }

    struct Acks(Arc<Journal>);

    #[async_trait]
    impl Acknowledge for Acks {
        async fn progress(&self) {
            self.0.push("progress");
        }

        async fn settle(&self, settlement: Settlement) {
            self.0.push(format!("{settlement:?}"));
        }
    }

    fn task(id: &str) -> Task {
        Task::new(id, "provider-test", ExecutionKind::Script, JobParams::new())
    }

    #[test]
    fn inbound_settlements() {
        assert_eq!(
            Settlement::for_inbound(&Inbound::Poison("bad json".into())),
            Some(Settlement::Term)
        );
        assert_eq!(
            Settlement::for_inbound(&Inbound::Misrouted {
                job_id: "j1".into(),
                assigned: "other".into(),
            }),
            Some(Settlement::Ack)
        );
        assert_eq!(Settlement::for_inbound(&Inbound::Task(Box::new(task("j1")))), None);
    }

    #[test]
    fn disposition_settlements() {
        let delay = Duration::from_secs(5);
        assert_eq!(Settlement::for_disposition(Disposition::Ack, delay), Settlement::Confirmed);
        assert_eq!(
            Settlement::for_disposition(Disposition::Retry, delay),
            Settlement::Nak(delay)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn task_is_settled_after_its_terminal_status() {
        let journal = Arc::new(Journal::default());
        let sink = Sink {
            journal: journal.clone(),
            runtime: Duration::from_secs(25),
            disposition: Disposition::Ack,
        };
        let acks = Acks(journal.clone());
        run_task(&sink, task("j1"), &acks, Duration::from_secs(10), Duration::from_secs(5)).await;

        assert_eq!(
            journal.entries(),
            ["progress", "progress", "terminal j1", "Confirmed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retried_task_is_nacked_with_delay() {
        let journal = Arc::new(Journal::default());
        let sink = Sink {
            journal: journal.clone(),
            runtime: Duration::ZERO,
            disposition: Disposition::Retry,
        };
        let acks = Acks(journal.clone());
        run_task(&sink, task("j2"), &acks, Duration::from_secs(10), Duration::from_secs(5)).await;

        assert_eq!(journal.entries(), ["terminal j2", "Nak(5s)"]);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_beats_while_future_runs() {
        let beats = AtomicU32::new(0);
        let out = with_heartbeat(
            async {
                tokio::time::sleep(Duration::from_secs(35)).await;
                7
            },
            Duration::from_secs(10),
            || async {
                beats.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(out, 7);
        assert_eq!(beats.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn quick_future_never_beats() {
        let beats = AtomicU32::new(0);
        with_heartbeat(async {}, Duration::from_secs(10), || async {
            beats.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(beats.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn acquire_yields_nothing_once_stopped() {
        let permits = Arc::new(Semaphore::new(1));
        let stop = CancellationToken::new();

        let held = acquire(&permits, &stop).await;
        assert!(held.is_some());

        stop.cancel();
        assert!(acquire(&permits, &stop).await.is_none());
    }
}
