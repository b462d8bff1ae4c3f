//! Periodic read → control → publish cycle with cooperative cancellation.
//!
//! ```text
//! Idle --start--> Running --stop--> Cancelling --(next sleep boundary)--> Stopped
//!                    ^                                                       |
//!                    +----------------------- start -------------------------+
//! ```
//!
//! Cancellation is only observed between cycles, so device reads and
//! controller writes in flight always complete.

use crate::chain::{ChainOutcome, ControllerChain};
use crate::metrics::LoopMetrics;
use crate::telemetry::{TelemetrySink, TelemetrySnapshot};
use crate::ControlError;
use cem_devices::{Fleet, RuntimeContext};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Idle,
    Running,
    Cancelling,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Simulated time between cycle starts.
    pub period: Duration,
    pub read_concurrency: usize,
    pub publish_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            read_concurrency: 8,
            publish_timeout: Duration::from_millis(500),
        }
    }
}

/// State the loop task owns while running and hands back when it stops.
struct LoopParts {
    fleet: Fleet,
    chain: ControllerChain,
    cycle: u64,
}

pub struct ControlLoop {
    parts: Option<LoopParts>,
    task: Option<JoinHandle<LoopParts>>,
    config: LoopConfig,
    ctx: RuntimeContext,
    sink: Arc<dyn TelemetrySink>,
    metrics: LoopMetrics,
    run_id: Uuid,
    state_tx: watch::Sender<LoopState>,
    cancel_tx: watch::Sender<bool>,
    /// Set when the loop task died and took fleet and chain with it.
    failure: Option<String>,
}

impl ControlLoop {
    pub fn new(
        fleet: Fleet,
        chain: ControllerChain,
        sink: Arc<dyn TelemetrySink>,
        ctx: RuntimeContext,
        config: LoopConfig,
    ) -> Result<Self, ControlError> {
        let metrics = LoopMetrics::new()?;
        metrics.devices_loaded.set(fleet.len() as i64);
        let (state_tx, _) = watch::channel(LoopState::Idle);
        let (cancel_tx, _) = watch::channel(false);
        Ok(Self {
            parts: Some(LoopParts {
                fleet,
                chain,
                cycle: 0,
            }),
            task: None,
            config,
            ctx,
            sink,
            metrics,
            run_id: Uuid::new_v4(),
            state_tx,
            cancel_tx,
            failure: None,
        })
    }

    pub fn state(&self) -> LoopState {
        *self.state_tx.borrow()
    }

    /// Watch state changes, e.g. to wait for `Stopped`.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state_tx.subscribe()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    /// Fleet and chain, available while the loop is not running.
    pub fn fleet(&self) -> Option<&Fleet> {
        self.parts.as_ref().map(|p| &p.fleet)
    }

    pub fn chain(&self) -> Option<&ControllerChain> {
        self.parts.as_ref().map(|p| &p.chain)
    }

    /// Spawn the loop. Allowed from `Idle` and, after `wait`, from `Stopped`.
    pub fn start(&mut self) -> Result<(), ControlError> {
        if let Some(reason) = &self.failure {
            return Err(ControlError::TaskFailed(reason.clone()));
        }
        let state = self.state();
        if !matches!(state, LoopState::Idle | LoopState::Stopped) {
            return Err(ControlError::NotStartable(state));
        }
        let Some(parts) = self.parts.take() else {
            return Err(ControlError::NotStartable(state));
        };
        self.cancel_tx.send_replace(false);
        self.state_tx.send_replace(LoopState::Running);
        info!(run_id = %self.run_id, devices = parts.fleet.len(), controllers = parts.chain.len(),
            "control loop starting");

        let worker = Worker {
            config: self.config.clone(),
            ctx: self.ctx.clone(),
            sink: self.sink.clone(),
            metrics: self.metrics.clone(),
            run_id: self.run_id,
            state_tx: self.state_tx.clone(),
        };
        let cancel_rx = self.cancel_tx.subscribe();
        self.task = Some(tokio::spawn(worker.run(parts, cancel_rx)));
        Ok(())
    }

    /// Request cancellation. Idempotent; a no-op unless running.
    pub fn stop(&self) {
        let changed = self.state_tx.send_if_modified(|s| {
            if *s == LoopState::Running {
                *s = LoopState::Cancelling;
                true
            } else {
                false
            }
        });
        if changed {
            info!(run_id = %self.run_id, "control loop cancelling");
            self.cancel_tx.send_replace(true);
        }
    }

    /// Wait for the loop task to finish and take back fleet and chain.
    /// Fails when the task itself died; the loop cannot be started again.
    pub async fn wait(&mut self) -> Result<(), ControlError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        let res = match task.await {
            Ok(parts) => {
                self.parts = Some(parts);
                Ok(())
            }
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "control loop task failed");
                self.failure = Some(e.to_string());
                Err(ControlError::TaskFailed(e.to_string()))
            }
        };
        self.state_tx.send_replace(LoopState::Stopped);
        res
    }

    /// `stop` followed by `wait`.
    pub async fn shutdown(&mut self) -> Result<(), ControlError> {
        self.stop();
        self.wait().await
    }
}

struct Worker {
    config: LoopConfig,
    ctx: RuntimeContext,
    sink: Arc<dyn TelemetrySink>,
    metrics: LoopMetrics,
    run_id: Uuid,
    state_tx: watch::Sender<LoopState>,
}

impl Worker {
    async fn run(self, mut parts: LoopParts, mut cancel_rx: watch::Receiver<bool>) -> LoopParts {
        let pause = self.ctx.scaled(self.config.period);
        loop {
            if *cancel_rx.borrow() {
                break;
            }
            parts.cycle += 1;
            let cycle = parts.cycle;
            let res = AssertUnwindSafe(self.cycle(&mut parts, cycle))
                .catch_unwind()
                .await;
            if res.is_err() {
                error!(cycle, "control cycle panicked; retrying next period");
            }

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel_rx.changed() => {}
            }
        }
        self.state_tx.send_replace(LoopState::Stopped);
        info!(run_id = %self.run_id, cycles = parts.cycle, "control loop stopped");
        parts
    }

    async fn cycle(&self, parts: &mut LoopParts, cycle: u64) {
        let report = parts.fleet.read_all(self.config.read_concurrency).await;
        self.metrics.point_reads.inc_by(report.points as u64);
        self.metrics.point_read_errors.inc_by(report.point_errors as u64);
        for name in &report.failed_devices {
            warn!(cycle, device = %name, "device read failed entirely");
        }

        let outcome: ChainOutcome = parts.chain.run(&parts.fleet).await;
        self.metrics.controller_write_errors.inc_by(outcome.write_errors);

        let snapshot = TelemetrySnapshot::assemble(self.run_id, cycle, &parts.fleet, &parts.chain, &outcome);
        self.publish(snapshot);
        self.metrics.cycles.inc();
        debug!(cycle, error_code = outcome.error_code, budget = ?outcome.budget, "cycle done");
    }

    /// Fire and forget: the cycle never waits for the sink.
    fn publish(&self, snapshot: TelemetrySnapshot) {
        let sink = self.sink.clone();
        let dropped = self.metrics.telemetry_dropped.clone();
        let limit = self.config.publish_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(limit, sink.publish(&snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    dropped.inc();
                    warn!(cycle = snapshot.cycle, error = %e, "telemetry publish failed");
                }
                Err(_) => {
                    dropped.inc();
                    warn!(cycle = snapshot.cycle, ?limit, "telemetry publish timed out");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerConfig, Mode, Policy, SwitchingSettings};
    use crate::telemetry::ChannelSink;
    use crate::testing::{device, FixedLibrary};
    use crate::SinkError;
    use async_trait::async_trait;
    use cem_devices::DeviceKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{self, Layer, SubscriberExt};
    use tracing_subscriber::Registry;

    fn setup(main_kw: f64) -> (Fleet, ControllerChain, Arc<FixedLibrary>) {
        let main = FixedLibrary::new(main_kw);
        let loads = FixedLibrary::new(0.0);
        let mut fleet = Fleet::new();
        fleet.add(device("main", DeviceKind::PowerSensor, &main, 0.0)).unwrap();
        fleet.add(device("hp", DeviceKind::HeatPump, &loads, 2.0)).unwrap();
        let chain = ControllerChain::from_configs(
            &[ControllerConfig {
                name: "hp-excess".to_string(),
                policy: Policy::Switching,
                main_meter: "main".to_string(),
                device_meter: None,
                controlled_device: "hp".to_string(),
                switching: SwitchingSettings {
                    threshold_kw: 1.0,
                    hysteresis_kw: 0.3,
                },
            }],
            &fleet,
        )
        .unwrap();
        (fleet, chain, loads)
    }

    fn config() -> LoopConfig {
        LoopConfig {
            period: Duration::from_secs(10),
            read_concurrency: 4,
            publish_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_cycles_and_stops_cleanly() {
        let (fleet, chain, loads) = setup(-5.0);
        let (sink, mut rx) = ChannelSink::new(16);
        let mut cl = ControlLoop::new(fleet, chain, Arc::new(sink), RuntimeContext::default(), config()).unwrap();
        assert_eq!(cl.state(), LoopState::Idle);

        cl.start().unwrap();
        assert_eq!(cl.state(), LoopState::Running);
        assert!(matches!(cl.start(), Err(ControlError::NotStartable(LoopState::Running))));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.cycle, 1);
        assert_eq!(first.run_id, cl.run_id());
        assert_eq!(first.budget_kw, Some(3.0));
        assert_eq!(first.devices["main"][0].value, -5.0);
        assert_eq!(first.controllers[0].mode, Mode::On);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.cycle, 2);

        cl.stop();
        cl.stop();
        assert_eq!(cl.state(), LoopState::Cancelling);
        cl.wait().await.unwrap();
        assert_eq!(cl.state(), LoopState::Stopped);

        // device and controller state survive the stop
        assert_eq!(cl.chain().unwrap().controllers()[0].mode(), Mode::On);
        assert_eq!(loads.writes().len(), 1);
        assert!(cl.metrics().cycles.get() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_continues_counting() {
        let (fleet, chain, _) = setup(-5.0);
        let (sink, mut rx) = ChannelSink::new(16);
        let mut cl = ControlLoop::new(fleet, chain, Arc::new(sink), RuntimeContext::default(), config()).unwrap();
        cl.start().unwrap();
        rx.recv().await.unwrap();
        cl.shutdown().await.unwrap();
        let before = cl.metrics().cycles.get();

        cl.start().unwrap();
        let next = rx.recv().await.unwrap();
        assert_eq!(next.cycle, before + 1);
        cl.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_is_a_no_op() {
        let (fleet, chain, _) = setup(0.0);
        let (sink, _rx) = ChannelSink::new(1);
        let mut cl = ControlLoop::new(fleet, chain, Arc::new(sink), RuntimeContext::default(), config()).unwrap();
        cl.stop();
        assert_eq!(cl.state(), LoopState::Idle);
        cl.wait().await.unwrap();
        assert_eq!(cl.state(), LoopState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn speed_factor_shortens_the_pause() {
        let (fleet, chain, _) = setup(0.0);
        let (sink, mut rx) = ChannelSink::new(16);
        let ctx = RuntimeContext::new(10.0);
        let mut cl = ControlLoop::new(fleet, chain, Arc::new(sink), ctx, config()).unwrap();
        let t0 = tokio::time::Instant::now();
        cl.start().unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        // 10 s period at 10x speed
        assert_eq!(t0.elapsed(), Duration::from_secs(1));
        cl.shutdown().await.unwrap();
    }

    struct StuckSink;

    #[async_trait]
    impl TelemetrySink for StuckSink {
        async fn publish(&self, _snapshot: &TelemetrySnapshot) -> Result<(), SinkError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_sink_does_not_stall_the_loop() {
        let (fleet, chain, _) = setup(-5.0);
        let mut cl = ControlLoop::new(fleet, chain, Arc::new(StuckSink), RuntimeContext::default(), config()).unwrap();
        let mut state = cl.subscribe();
        cl.start().unwrap();
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(cl.metrics().cycles.get() >= 3);
        assert!(cl.metrics().telemetry_dropped.get() >= 3);
        cl.stop();
        state.wait_for(|s| *s == LoopState::Stopped).await.unwrap();
        cl.wait().await.unwrap();
    }

    /// Log layer that panics on the first chain event it sees.
    struct PanicOnChainEvent {
        armed: AtomicBool,
    }

    impl<S: Subscriber> Layer<S> for PanicOnChainEvent {
        fn on_event(&self, event: &Event<'_>, _ctx: layer::Context<'_, S>) {
            if event.metadata().target() == "cem_control::chain" && self.armed.swap(false, Ordering::SeqCst) {
                panic!("log layer failed");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_cycle_is_skipped_and_the_loop_keeps_going() {
        let layer = PanicOnChainEvent {
            armed: AtomicBool::new(true),
        };
        let _log = tracing::subscriber::set_default(Registry::default().with(layer));

        let (fleet, chain, _) = setup(-5.0);
        let (sink, mut rx) = ChannelSink::new(16);
        let mut cl = ControlLoop::new(fleet, chain, Arc::new(sink), RuntimeContext::default(), config()).unwrap();
        cl.start().unwrap();

        // cycle 1 died before publishing
        let next = rx.recv().await.unwrap();
        assert_eq!(next.cycle, 2);
        assert_eq!(next.controllers[0].mode, Mode::On);
        let after = rx.recv().await.unwrap();
        assert_eq!(after.cycle, 3);
        assert_eq!(cl.metrics().cycles.get(), 2);

        cl.shutdown().await.unwrap();
        assert_eq!(cl.state(), LoopState::Stopped);
        assert!(cl.fleet().is_some());
    }

    async fn lost_worker() -> LoopParts {
        panic!("worker lost");
    }

    #[tokio::test]
    async fn dead_task_is_reported_and_blocks_restart() {
        let (fleet, chain, _) = setup(0.0);
        let (sink, _rx) = ChannelSink::new(1);
        let mut cl = ControlLoop::new(fleet, chain, Arc::new(sink), RuntimeContext::default(), config()).unwrap();
        cl.parts = None;
        cl.state_tx.send_replace(LoopState::Running);
        cl.task = Some(tokio::spawn(lost_worker()));

        assert!(matches!(cl.shutdown().await, Err(ControlError::TaskFailed(_))));
        assert_eq!(cl.state(), LoopState::Stopped);
        assert!(matches!(cl.start(), Err(ControlError::TaskFailed(_))));
        // a second wait has nothing left to join
        cl.wait().await.unwrap();
    }
}
