//! Strategy dispatcher: drives one engine run from launch to exit.
//!
//! ```text
//! NotStarted → Running → AwaitingPause → Deciding → Dispatched → Completed
//!                              │             │            └──────→ Failed
//!                              ├→ Completed / Failed (engine exited first)
//!                              └→ Terminated (window closed first)
//! ```
//!
//! While awaiting a pause point the dispatcher selects over engine exit,
//! the handshake poll tick, the close of the termination window, and
//! shutdown. The handshake channel is torn down on every terminal state.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::process::Child;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::launcher::{self, describe_exit, stop_engine, RunRequest};
use super::snapshot;
use crate::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::config::{CheckpointConfig, EngineConfig, GlobalConfig};
use crate::cost_model::CostModel;
use crate::estimator::process::PlanFeatures;
use crate::handshake::{HandshakeChannel, SegmentNames, SharedSegments};
use crate::models::run::{RunReport, RunState};
use crate::models::strategy::{Strategy, StrategyDecision};
use crate::{AppError, Result};

/// Consecutive failed polls tolerated before the run is abandoned.
const MAX_POLL_FAILURES: u32 = 20;

/// Teardown attempts on a terminal state.
const TEARDOWN_ATTEMPTS: u32 = 2;

enum PauseWait {
    Signaled(u64),
    Exited(Result<ExitStatus>),
    WindowClosed,
    Aborted(String),
}

enum SnapshotOutcome {
    Taken(PathBuf),
    EngineExited(Result<ExitStatus>),
    Failed(AppError),
}

/// Drives engine runs against one handshake channel.
pub struct Dispatcher<S: SharedSegments> {
    channel: Arc<HandshakeChannel<S>>,
    cost_model: CostModel,
    fallback: Option<Strategy>,
    poll_interval: Duration,
    engine: EngineConfig,
    checkpoint: CheckpointConfig,
    segments: SegmentNames,
    audit: Option<Arc<dyn AuditLogger>>,
    cancel: CancellationToken,
}

impl<S: SharedSegments> Dispatcher<S> {
    /// Build a dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InsufficientData` when the cost model has no
    /// process-level estimator and no fallback strategy is configured, since
    /// such a dispatcher could never decide.
    pub fn new(
        channel: Arc<HandshakeChannel<S>>,
        cost_model: CostModel,
        config: &GlobalConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if !cost_model.has_process_estimator() && config.fallback_strategy.is_none() {
            return Err(AppError::InsufficientData(
                "no size regression available and no fallback_strategy configured".into(),
            ));
        }
        Ok(Self {
            channel,
            cost_model,
            fallback: config.fallback_strategy,
            poll_interval: config.poll_interval(),
            engine: config.engine.clone(),
            checkpoint: config.checkpoint.clone(),
            segments: config.segments.clone(),
            audit: None,
            cancel,
        })
    }

    /// Record run events through `logger`.
    #[must_use]
    pub fn with_audit(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    /// Launch the engine for `request` and drive it to a terminal state.
    ///
    /// Engine, decision, and checkpoint failures are reported through a
    /// `Failed` [`RunReport`]; only setup failures are returned as errors.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LaunchFailure` if the engine cannot be spawned and
    /// `AppError::Handshake` if the channel cannot be initialized.
    pub async fn run(&self, request: &RunRequest, features: PlanFeatures) -> Result<RunReport> {
        let mut report = RunReport::new(request.query.clone());
        let span = info_span!("dispatch", run_id = %report.run_id, query = %request.query);

        let outcome = async {
            self.channel.initialize()?;
            let mut child = launcher::launch(&self.engine, request, &self.segments)?;
            let started = Instant::now();
            report.started_at = Utc::now();
            advance(&mut report, RunState::Running);
            self.record(AuditEntry::new(
                AuditEventType::RunStart,
                &report.run_id,
                &report.query,
            ));

            self.drive(&mut report, &mut child, started, features).await;
            report.elapsed = started.elapsed().as_secs_f64();
            Ok::<(), AppError>(())
        }
        .instrument(span)
        .await;

        self.teardown();
        report.finished_at = Utc::now();
        if let Err(err) = outcome {
            error!(run_id = %report.run_id, %err, "run setup failed");
            return Err(err);
        }

        let mut end = AuditEntry::new(AuditEventType::RunEnd, &report.run_id, &report.query)
            .with_state(report.state)
            .with_elapsed(report.elapsed);
        if let Some(err) = &report.error {
            end = end.with_detail(err.clone());
        }
        self.record(end);

        info!(
            run_id = %report.run_id,
            state = ?report.state,
            exit_code = ?report.exit_code,
            elapsed = report.elapsed,
            "run finished"
        );
        Ok(report)
    }

    async fn drive(
        &self,
        report: &mut RunReport,
        child: &mut Child,
        started: Instant,
        features: PlanFeatures,
    ) {
        advance(report, RunState::AwaitingPause);
        let observed = match self.await_pause(child, started).await {
            PauseWait::Signaled(bytes) => bytes,
            PauseWait::Exited(status) => {
                info!("engine exited before reaching a pause point");
                finish_with_exit(report, status);
                return;
            }
            PauseWait::WindowClosed => {
                info!("termination window closed before a pause point");
                self.terminate(report, child).await;
                return;
            }
            PauseWait::Aborted(reason) => {
                stop_engine(child).await;
                fail(report, reason);
                return;
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        let window_end = self.cost_model.config().window.end;
        if elapsed > window_end {
            info!(
                elapsed,
                window_end, "pause point reached after the termination window"
            );
            if let Err(err) = self.channel.acknowledge(Strategy::Redo) {
                warn!(%err, "failed to release engine after window close");
            }
            self.terminate(report, child).await;
            return;
        }

        advance(report, RunState::Deciding);
        let decision = match self.decide(elapsed, observed, features) {
            Ok(decision) => decision,
            Err(err) => {
                error!(%err, elapsed, observed, "refusing to decide");
                stop_engine(child).await;
                fail(report, format!("decision at {elapsed:.3}s failed: {err}"));
                return;
            }
        };
        info!(
            strategy = %decision.chosen,
            expected_cost = decision.expected_cost,
            redo = decision.costs.redo,
            process_checkpoint = decision.costs.process_checkpoint,
            pipeline_persist = decision.costs.pipeline_persist,
            checkpoint_at = ?decision.checkpoint_at,
            basis = ?decision.basis,
            "strategy decided"
        );
        self.record(
            AuditEntry::new(AuditEventType::Decision, &report.run_id, &report.query)
                .with_decision(decision.clone()),
        );
        report.decision = Some(decision.clone());

        if let Err(err) = self.channel.acknowledge(decision.chosen) {
            stop_engine(child).await;
            fail(
                report,
                format!(
                    "failed to write strategy {} at {elapsed:.3}s: {err}",
                    decision.chosen
                ),
            );
            return;
        }
        advance(report, RunState::Dispatched);

        let mut checkpoint_error = None;
        if decision.chosen == Strategy::ProcessCheckpoint {
            match self
                .schedule_snapshot(child, started, &decision, &report.query)
                .await
            {
                SnapshotOutcome::Taken(dir) => {
                    self.record(
                        AuditEntry::new(AuditEventType::Checkpoint, &report.run_id, &report.query)
                            .with_strategy(Strategy::ProcessCheckpoint)
                            .with_elapsed(started.elapsed().as_secs_f64())
                            .with_detail(dir.display().to_string()),
                    );
                    report.snapshot_dir = Some(dir.display().to_string());
                }
                SnapshotOutcome::EngineExited(status) => {
                    info!("engine exited before the scheduled snapshot");
                    finish_with_exit(report, status);
                    return;
                }
                SnapshotOutcome::Failed(err) => {
                    error!(%err, "process snapshot failed");
                    checkpoint_error = Some(err);
                }
            }
        }

        let status = self.wait_for_exit(child, decision.chosen).await;
        if let Some(err) = checkpoint_error {
            report.exit_code = status.ok().and_then(|s| s.code());
            fail(
                report,
                format!("strategy {} at {elapsed:.3}s: {err}", decision.chosen),
            );
            return;
        }
        finish_with_exit(report, status);
    }

    fn decide(&self, elapsed: f64, observed: u64, features: PlanFeatures) -> Result<StrategyDecision> {
        if self.cost_model.has_process_estimator() {
            return self.cost_model.decide(elapsed, observed, features);
        }
        match self.fallback {
            Some(strategy) => {
                warn!(%strategy, "size regression unavailable, using fallback strategy");
                Ok(StrategyDecision::fallback(strategy, elapsed, observed))
            }
            None => Err(AppError::InsufficientData(
                "no size regression available and no fallback strategy".into(),
            )),
        }
    }

    async fn await_pause(&self, child: &mut Child, started: Instant) -> PauseWait {
        let window_end = Duration::try_from_secs_f64(self.cost_model.config().window.end)
            .unwrap_or(Duration::ZERO);
        let window_closed = tokio::time::sleep_until(tokio::time::Instant::from_std(started) + window_end);
        tokio::pin!(window_closed);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll_failures: u32 = 0;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return PauseWait::Aborted("dispatcher shutdown requested".into());
                }
                status = child.wait() => {
                    return PauseWait::Exited(status.map_err(|err| {
                        AppError::ChildProcess(format!("failed to wait for engine: {err}"))
                    }));
                }
                _ = ticker.tick() => match self.channel.poll() {
                    Ok(Some(bytes)) => return PauseWait::Signaled(bytes),
                    Ok(None) => poll_failures = 0,
                    Err(err) => {
                        poll_failures += 1;
                        warn!(%err, poll_failures, "handshake poll failed");
                        if poll_failures >= MAX_POLL_FAILURES {
                            return PauseWait::Aborted(format!("handshake polling failed: {err}"));
                        }
                    }
                },
                () = &mut window_closed => return PauseWait::WindowClosed,
            }
        }
    }

    async fn schedule_snapshot(
        &self,
        child: &mut Child,
        started: Instant,
        decision: &StrategyDecision,
        query: &str,
    ) -> SnapshotOutcome {
        let at = decision.checkpoint_at.unwrap_or(decision.elapsed);
        let delay = Duration::try_from_secs_f64(at - started.elapsed().as_secs_f64())
            .unwrap_or(Duration::ZERO);
        info!(at, delay_secs = delay.as_secs_f64(), "process snapshot scheduled");

        let due = tokio::time::sleep(delay);
        tokio::pin!(due);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    stop_engine(child).await;
                    return SnapshotOutcome::EngineExited(Err(AppError::ChildProcess(
                        "run cancelled before snapshot".into(),
                    )));
                }
                status = child.wait() => {
                    return SnapshotOutcome::EngineExited(status.map_err(|err| {
                        AppError::ChildProcess(format!("failed to wait for engine: {err}"))
                    }));
                }
                () = &mut due => break,
                _ = ticker.tick() => self.release_later_pause(Strategy::ProcessCheckpoint),
            }
        }

        let Some(pid) = child.id() else {
            return SnapshotOutcome::EngineExited(child.wait().await.map_err(|err| {
                AppError::ChildProcess(format!("failed to wait for engine: {err}"))
            }));
        };
        match snapshot::take_snapshot(&self.checkpoint, query, pid).await {
            Ok(dir) => SnapshotOutcome::Taken(dir),
            Err(err) => SnapshotOutcome::Failed(err),
        }
    }

    /// Wait for the engine to exit, releasing any later pause point with
    /// `release_with` so the engine is never left parked.
    async fn wait_for_exit(&self, child: &mut Child, release_with: Strategy) -> Result<ExitStatus> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    stop_engine(child).await;
                    return Err(AppError::ChildProcess("run cancelled by shutdown".into()));
                }
                status = child.wait() => {
                    return status.map_err(|err| {
                        AppError::ChildProcess(format!("failed to wait for engine: {err}"))
                    });
                }
                _ = ticker.tick() => self.release_later_pause(release_with),
            }
        }
    }

    fn release_later_pause(&self, strategy: Strategy) {
        match self.channel.poll() {
            Ok(Some(bytes)) => {
                info!(bytes, %strategy, "releasing later pause point");
                if let Err(err) = self.channel.acknowledge(strategy) {
                    warn!(%err, "failed to release later pause point");
                }
            }
            Ok(None) => {}
            Err(err) => debug!(%err, "handshake poll failed while waiting for exit"),
        }
    }

    async fn terminate(&self, report: &mut RunReport, child: &mut Child) {
        let status = self.wait_for_exit(child, Strategy::Redo).await;
        match &status {
            Ok(status) => info!(exit = %describe_exit(*status), "engine finished after window close"),
            Err(err) => warn!(%err, "engine exit not observed after window close"),
        }
        report.exit_code = status.ok().and_then(|s| s.code());
        advance(report, RunState::Terminated);
    }

    fn teardown(&self) {
        for attempt in 1..=TEARDOWN_ATTEMPTS {
            match self.channel.teardown() {
                Ok(()) => return,
                Err(err) => warn!(attempt, %err, "handshake teardown failed"),
            }
        }
    }

    fn record(&self, entry: AuditEntry) {
        if let Some(audit) = &self.audit {
            if let Err(err) = audit.log_entry(entry) {
                warn!(%err, "failed to write decision log entry");
            }
        }
    }
}

fn advance(report: &mut RunReport, next: RunState) {
    if !report.state.can_transition_to(next) {
        warn!(from = ?report.state, to = ?next, "unexpected run state transition");
    }
    debug!(from = ?report.state, to = ?next, "run state transition");
    report.state = next;
}

fn fail(report: &mut RunReport, reason: String) {
    report.error = Some(reason);
    advance(report, RunState::Failed);
}

fn finish_with_exit(report: &mut RunReport, status: Result<ExitStatus>) {
    match status {
        Ok(status) => {
            report.exit_code = status.code();
            if status.success() {
                advance(report, RunState::Completed);
            } else {
                let err = AppError::ChildProcess(format!("engine {}", describe_exit(status)));
                fail(report, err.to_string());
            }
        }
        Err(err) => fail(report, err.to_string()),
    }
}
