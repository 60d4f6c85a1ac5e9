//! Worker-pool trace replay.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::trace::TraceEvent;
use crate::engine::{BridgeEvent, LearningBridge};
use crate::error::{BridgeError, Result};
use crate::platform::{MemoryPlatform, RuleEvent};

/// Upper bound on events submitted but not yet processed.
const MAX_IN_FLIGHT: u32 = 1024;

struct Job {
    event: BridgeEvent,
    _permit: OwnedSemaphorePermit,
}

/// Totals of one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub lines_read: u64,
    pub invalid_lines: u64,
    pub frames_dispatched: u64,
    pub rule_events_dispatched: u64,
}

/// Replays a trace against a bridge running over a [`MemoryPlatform`].
pub struct ReplayDaemon {
    bridge: Arc<LearningBridge>,
    platform: Arc<MemoryPlatform>,
    workers: usize,
}

/// Submission side of the worker pool.
struct Dispatcher {
    tx: mpsc::Sender<Job>,
    in_flight: Arc<Semaphore>,
}

impl Dispatcher {
    async fn submit(&self, event: BridgeEvent) -> Result<()> {
        let permit = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|_| BridgeError::Trace("replay dispatcher closed".to_string()))?;
        self.tx
            .send(Job {
                event,
                _permit: permit,
            })
            .await
            .map_err(|_| BridgeError::Trace("replay workers exited".to_string()))
    }

    /// Waits until every submitted job has been processed.
    async fn barrier(&self) -> Result<()> {
        let all = self
            .in_flight
            .acquire_many(MAX_IN_FLIGHT)
            .await
            .map_err(|_| BridgeError::Trace("replay dispatcher closed".to_string()))?;
        drop(all);
        Ok(())
    }
}

impl ReplayDaemon {
    pub fn new(bridge: Arc<LearningBridge>, platform: Arc<MemoryPlatform>, workers: usize) -> Self {
        Self {
            bridge,
            platform,
            workers: workers.max(1),
        }
    }

    /// Reads the trace to the end, dispatching every event.
    ///
    /// Does not stop the bridge.
    pub async fn run<R>(&self, reader: R) -> Result<ReplayReport>
    where
        R: AsyncBufRead + Unpin,
    {
        let (tx, rx) = mpsc::channel::<Job>(MAX_IN_FLIGHT as usize);
        let rx = Arc::new(Mutex::new(rx));
        let workers: Vec<JoinHandle<()>> = (0..self.workers)
            .map(|id| spawn_worker(id, Arc::clone(&self.bridge), Arc::clone(&rx)))
            .collect();
        let sweeper = self.spawn_sweeper();

        let dispatcher = Dispatcher {
            tx,
            in_flight: Arc::new(Semaphore::new(MAX_IN_FLIGHT as usize)),
        };
        let mut report = ReplayReport::default();
        let mut result = self.feed(reader.lines(), &dispatcher, &mut report).await;
        if result.is_ok() {
            result = dispatcher.barrier().await;
        }

        drop(dispatcher);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Replay worker panicked");
            }
        }
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        result?;
        info!(
            lines = report.lines_read,
            invalid = report.invalid_lines,
            frames = report.frames_dispatched,
            rule_events = report.rule_events_dispatched,
            "Trace replay complete"
        );
        Ok(report)
    }

    async fn feed<R>(
        &self,
        mut lines: Lines<R>,
        dispatcher: &Dispatcher,
        report: &mut ReplayReport,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| BridgeError::Trace(format!("failed to read trace: {}", e)))?
        {
            report.lines_read += 1;

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let event = match TraceEvent::parse_line(line) {
                Ok(event) => event,
                Err(e) => {
                    report.invalid_lines += 1;
                    warn!(line = report.lines_read, error = %e, "Skipping invalid trace line");
                    continue;
                }
            };

            match event {
                TraceEvent::InboundFrame { .. } => match event.to_frame() {
                    Ok(Some(frame)) => {
                        dispatcher.submit(BridgeEvent::InboundFrame(frame)).await?;
                        report.frames_dispatched += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        report.invalid_lines += 1;
                        warn!(line = report.lines_read, error = %e, "Skipping invalid frame");
                    }
                },
                TraceEvent::RuleRemoved {
                    switch,
                    src,
                    dst,
                    src_port,
                    dst_port,
                    bytes,
                    packets,
                } => {
                    dispatcher.barrier().await?;
                    let mut events = self.platform.remove_where(|r| {
                        switch.as_ref().map_or(true, |s| &r.switch == s)
                            && r.selector.matches_pair(&src, &dst)
                            && src_port.map_or(true, |p| r.selector.tcp_src == Some(p))
                            && dst_port.map_or(true, |p| r.selector.tcp_dst == Some(p))
                    });
                    if events.is_empty() {
                        debug!(src = %src, dst = %dst, "No installed rule matches removal");
                    }
                    for event in &mut events {
                        if let Some(bytes) = bytes {
                            event.bytes = bytes;
                        }
                        if let Some(packets) = packets {
                            event.packets = packets;
                        }
                    }
                    report.rule_events_dispatched += dispatch_removals(dispatcher, events).await?;
                }
                TraceEvent::ExpireAll => {
                    dispatcher.barrier().await?;
                    let events = self.platform.expire_all();
                    report.rule_events_dispatched += dispatch_removals(dispatcher, events).await?;
                }
                TraceEvent::Pause { millis } => {
                    dispatcher.barrier().await?;
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                }
            }
        }
        Ok(())
    }

    fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let aging = self.bridge.config().fdb_aging()?;
        let bridge = Arc::clone(&self.bridge);
        let period = (aging / 2).max(Duration::from_secs(1));
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                bridge.sweep_learning_table();
            }
        }))
    }
}

async fn dispatch_removals(dispatcher: &Dispatcher, events: Vec<RuleEvent>) -> Result<u64> {
    let count = events.len() as u64;
    for event in events {
        dispatcher.submit(BridgeEvent::RuleRemoved(event)).await?;
    }
    dispatcher.barrier().await?;
    Ok(count)
}

fn spawn_worker(
    id: usize,
    bridge: Arc<LearningBridge>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let job = rx.lock().await.recv().await;
            let Some(job) = job else {
                debug!(worker = id, "Replay worker exiting");
                break;
            };
            let outcome = bridge.dispatch(job.event).await;
            debug!(worker = id, ?outcome, "Dispatched event");
        }
    })
}
