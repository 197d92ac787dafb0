// src/engine.rs
use crate::acquisition::CoreError;
use crate::config::{DrainPolicy, WorkerConfig};
use crate::orchestrator::TrialCircularBuffer;
use crate::types::{EngineEvent, StampedMessage};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cloneable handle for posting timestamped protocol messages to the worker.
#[derive(Clone)]
pub struct MessageSender {
    tx: Sender<StampedMessage>,
}

impl MessageSender {
    /// Returns `false` once the worker has stopped.
    pub fn send(&self, text: impl Into<String>, timestamp: i64) -> bool {
        self.tx.send(StampedMessage::new(text, timestamp)).is_ok()
    }

    pub fn send_message(&self, message: StampedMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Background worker that applies protocol messages in order and aggregates trials once
/// their post-trial window has been recorded.
pub struct AggregationEngine {
    statistics: Arc<TrialCircularBuffer>,
    sender: Option<MessageSender>,
    events: Receiver<EngineEvent>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AggregationEngine {
    pub fn spawn(statistics: Arc<TrialCircularBuffer>, config: &WorkerConfig) -> Result<Self, CoreError> {
        let (tx, rx) = mpsc::channel::<StampedMessage>();
        let (tx_events, events) = mpsc::channel::<EngineEvent>();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            statistics: statistics.clone(),
            rx,
            tx_events,
            stop: stop.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_messages: config.max_messages_per_poll.max(1),
            drain_policy: config.drain_policy,
        };
        let handle = thread::Builder::new()
            .name("psth-aggregation".into())
            .spawn(move || worker.run())
            .map_err(CoreError::WorkerSpawn)?;
        info!("aggregation worker started");
        Ok(Self {
            statistics,
            sender: Some(MessageSender { tx }),
            events,
            stop,
            handle: Some(handle),
        })
    }

    /// Handle for other threads. Messages sent after `shutdown` are dropped.
    pub fn sender(&self) -> Option<MessageSender> {
        self.sender.clone()
    }

    pub fn send(&self, text: impl Into<String>, timestamp: i64) -> bool {
        self.sender.as_ref().map_or(false, |s| s.send(text, timestamp))
    }

    /// Events produced since the last call.
    pub fn try_events(&self) -> Vec<EngineEvent> {
        self.events.try_iter().collect()
    }

    pub fn statistics(&self) -> &Arc<TrialCircularBuffer> {
        &self.statistics
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stops the worker after it has applied every message already queued, then drains
    /// the trial queue according to the configured policy. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.sender = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("aggregation worker panicked");
            }
            info!("aggregation worker stopped");
        }
    }
}

impl Drop for AggregationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    statistics: Arc<TrialCircularBuffer>,
    rx: Receiver<StampedMessage>,
    tx_events: Sender<EngineEvent>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
    max_messages: usize,
    drain_policy: DrainPolicy,
}

impl Worker {
    fn apply(&self, message: StampedMessage) {
        if let Some(event) = self.statistics.handle_message(&message.text, message.timestamp) {
            self.tx_events.send(event).ok();
        }
    }

    fn run(self) {
        loop {
            // ============================================================
            // 1. 消息处理 (每轮最多处理 max_messages 条)
            // ============================================================
            let mut handled = 0;
            let mut disconnected = false;
            while handled < self.max_messages {
                match self.rx.try_recv() {
                    Ok(message) => {
                        self.apply(message);
                        handled += 1;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }

            // ============================================================
            // 2. 聚合已超过 post 窗口的试次
            // ============================================================
            let aggregated = self.statistics.process_pending();
            let busy = handled > 0 || !aggregated.is_empty();
            for event in aggregated {
                self.tx_events.send(event).ok();
            }

            // ============================================================
            // 3. 退出：先处理完队列里剩余的消息，再按策略清空试次
            // ============================================================
            if disconnected || self.stop.load(Ordering::Acquire) {
                let remaining: Vec<StampedMessage> = self.rx.try_iter().collect();
                debug!("applying {} queued messages before stopping", remaining.len());
                for message in remaining {
                    self.apply(message);
                }
                for event in self.statistics.process_pending() {
                    self.tx_events.send(event).ok();
                }
                for event in self.statistics.drain(self.drain_policy) {
                    self.tx_events.send(event).ok();
                }
                break;
            }

            if !busy {
                thread::sleep(self.poll_interval);
            }
        }
    }
}
