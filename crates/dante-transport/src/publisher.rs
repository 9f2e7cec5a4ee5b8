use std::{collections::VecDeque, time::Duration};

use async_nats::{Client, connection::State};
use async_trait::async_trait;
use dante_core::{CoreError, StatusPublisher};
use dante_model::TaskStatus;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::{TransportConfig, TransportError, status_subject};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    subject: String,
    payload: Vec<u8>,
}

/// Bounded FIFO of statuses that could not be published.
#[derive(Debug)]
struct Backlog {
    items: VecDeque<Pending>,
    cap: usize,
    dropped: u64,
}

impl Backlog {
    fn new(cap: usize) -> Self {
        Self {
            items: VecDeque::new(),
            cap,
            dropped: 0,
        }
    }

    /// Queues `item`, evicting the oldest entry when full. A zero capacity keeps nothing.
    fn push(&mut self, item: Pending) {
        if self.cap == 0 {
            self.dropped += 1;
            return;
        }
        while self.items.len() >= self.cap {
            self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back(item);
    }

    fn front(&self) -> Option<&Pending> {
        self.items.front()
    }

    fn pop(&mut self) {
        self.items.pop_front();
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Publishes status updates to `<prefix>.<job_id>` with a bounded flush.
///
/// Failed publishes are queued and retried, oldest first, before the next one,
/// so per-job ordering survives a reconnect.
pub struct NatsStatusPublisher {
    client: Client,
    prefix: String,
    flush_timeout: Duration,
    backlog: Mutex<Backlog>,
}

impl NatsStatusPublisher {
    pub fn new(client: Client, cfg: &TransportConfig) -> Self {
        Self {
            client,
            prefix: cfg.status_subject_prefix.clone(),
            flush_timeout: cfg.flush_timeout(),
            backlog: Mutex::new(Backlog::new(cfg.status_backlog)),
        }
    }

    /// Number of statuses waiting for republish.
    pub async fn backlog_len(&self) -> usize {
        self.backlog.lock().await.len()
    }

    /// Republishes queued statuses. Returns how many are still queued.
    pub async fn flush_backlog(&self) -> usize {
        let mut backlog = self.backlog.lock().await;
        if let Err(e) = self.drain(&mut backlog).await {
            warn!(target: "dante.transport", error = %e, left = backlog.len(), "status backlog not flushed");
        }
        if backlog.dropped > 0 {
            warn!(target: "dante.transport", dropped = backlog.dropped, "statuses dropped from full backlog");
        }
        backlog.len()
    }

    async fn drain(&self, backlog: &mut Backlog) -> Result<(), TransportError> {
        while let Some(item) = backlog.front() {
            self.send(item.subject.clone(), item.payload.clone()).await?;
            backlog.pop();
        }
        Ok(())
    }

    async fn send(&self, subject: String, payload: Vec<u8>) -> Result<(), TransportError> {
        if !matches!(self.client.connection_state(), State::Connected) {
            return Err(TransportError::NotConnected);
        }
        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        match tokio::time::timeout(self.flush_timeout, self.client.flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Publish(e.to_string())),
            Err(_) => Err(TransportError::Publish(format!(
                "flush timed out after {:?}",
                self.flush_timeout
            ))),
        }
    }
}

#[async_trait]
impl StatusPublisher for NatsStatusPublisher {
    #[instrument(level = "debug", skip_all, fields(job_id = %status.job_id, status = %status.status))]
    async fn publish(&self, status: &TaskStatus) -> Result<(), CoreError> {
        let pending = Pending {
            subject: status_subject(&self.prefix, &status.job_id),
            payload: serde_json::to_vec(status).map_err(|e| CoreError::Publish(e.to_string()))?,
        };

        let mut backlog = self.backlog.lock().await;
        if let Err(e) = self.drain(&mut backlog).await {
            backlog.push(pending);
            return Err(CoreError::Publish(format!("queued behind backlog: {e}")));
        }
        match self.send(pending.subject.clone(), pending.payload.clone()).await {
            Ok(()) => {
                debug!(target: "dante.transport", subject = %pending.subject, "status published");
                Ok(())
            }
            Err(e) => {
                backlog.push(pending);
                Err(CoreError::Publish(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: u8) -> Pending {
        Pending {
            subject: format!("status.j{n}"),
            payload: vec![n],
        }
    }

    #[test]
    fn backlog_is_fifo() {
        let mut b = Backlog::new(4);
        b.push(item(1));
        b.push(item(2));
        assert_eq!(b.front(), Some(&item(1)));
        b.pop();
        assert_eq!(b.front(), Some(&item(2)));
        b.pop();
        assert!(b.front().is_none());
    }

    #[test]
    fn full_backlog_evicts_oldest() {
        let mut b = Backlog::new(2);
        for n in 1..=3 {
            b.push(item(n));
        }
        assert_eq!(b.len(), 2);
        assert_eq!(b.dropped, 1);
        assert_eq!(b.front(), Some(&item(2)));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut b = Backlog::new(0);
        b.push(item(1));
        assert_eq!(b.len(), 0);
        assert_eq!(b.dropped, 1);
    }
}
