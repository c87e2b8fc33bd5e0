//! Run-state machine and the dedicated simulation thread.
//!
//! `Driver` owns the simulation and its statistics and maps wall-clock time to
//! simulated time. `DriverHandle` runs a driver on its own thread: controls go
//! in over a channel and are applied between events, snapshots come out through
//! a single latest-wins slot.

use crate::config::SimConfig;
use crate::core::frame::FrameInfo;
use crate::core::sim::Simulation;
use crate::error::{Error, Result};
use crate::stats::{StatisticId, StatisticKind, StatisticReport, StatisticsEngine, TypeSet};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Ids handed out by `DriverHandle::register_statistic` start here, clear of
/// the ids used for statistics listed in the configuration.
const HANDLE_ID_BASE: StatisticId = 1 << 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

/// Simulated time, run state and speed multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationClock {
    time: f64,
    state: RunState,
    speed: f64,
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self {
            time: 0.0,
            state: RunState::Stopped,
            speed: 1.0,
        }
    }
}

impl SimulationClock {
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }
}

/// Commands accepted by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Start,
    Pause,
    Resume,
    Stop,
    Restart,
    SetSpeed(f64),
    Exit,
    MovePiston { target: f64, speed: f64 },
    StopPiston,
    SetReservoirTemperature(f64),
    SetFiniteSizeCorrection(bool),
    SetRealGasCorrection(bool),
    SetDemon(bool),
    RegisterStatistic {
        id: StatisticId,
        types: TypeSet,
        kind: StatisticKind,
    },
    UnregisterStatistic(StatisticId),
    SetHistogramRange { id: StatisticId, lo: f64, hi: f64 },
    ClearStatistics,
    ResetStatistics,
}

/// What a front-end renders for one frame.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub frame: FrameInfo,
    pub statistics: Vec<StatisticReport>,
    pub state: RunState,
    pub speed: f64,
}

/// Simulation, statistics and clock, advanced from the caller's thread.
#[derive(Debug)]
pub struct Driver {
    sim: Simulation,
    stats: StatisticsEngine,
    clock: SimulationClock,
    time_scale: f64,
    frame_interval: Duration,
    exit: bool,
}

impl Driver {
    pub fn new(config: &SimConfig) -> Result<Self> {
        let sim = Simulation::new(config)?;
        let mut stats = StatisticsEngine::for_simulation(&sim);
        stats.set_finite_size_correction(config.finite_size_correction);
        stats.set_real_gas_correction(config.real_gas_correction);
        for req in &config.statistics {
            stats.register(TypeSet::from_kinds(&req.types)?, req.kind)?;
        }
        Ok(Self {
            sim,
            stats,
            clock: SimulationClock::default(),
            time_scale: config.time_scale,
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            exit: false,
        })
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn statistics(&self) -> &StatisticsEngine {
        &self.stats
    }

    pub fn statistics_mut(&mut self) -> &mut StatisticsEngine {
        &mut self.stats
    }

    pub fn clock(&self) -> SimulationClock {
        self.clock
    }

    pub fn state(&self) -> RunState {
        self.clock.state
    }

    pub fn exit_requested(&self) -> bool {
        self.exit
    }

    /// Apply one control.
    pub fn apply(&mut self, cmd: Control) -> Result<()> {
        use RunState::*;
        match cmd {
            Control::Start => self.transition(Running),
            Control::Pause => {
                if self.clock.state == Running {
                    self.transition(Paused);
                }
            }
            Control::Resume => {
                if self.clock.state == Paused {
                    self.transition(Running);
                }
            }
            Control::Stop => self.transition(Stopped),
            Control::Restart => {
                self.sim.restart()?;
                self.stats.clear();
                self.stats.rebase(self.sim.time());
                self.stats.update_context(&self.sim.frame());
                self.clock.time = self.sim.time();
                log::info!("simulation restarted ({:?})", self.clock.state);
            }
            Control::SetSpeed(speed) => {
                if !speed.is_finite() || speed <= 0.0 {
                    return Err(Error::InvalidParam(format!(
                        "speed multiplier must be finite and > 0 (got {speed})"
                    )));
                }
                self.clock.speed = speed;
            }
            Control::Exit => self.exit = true,
            Control::MovePiston { target, speed } => self.sim.move_piston(target, speed)?,
            Control::StopPiston => self.sim.stop_piston()?,
            Control::SetReservoirTemperature(t) => self.sim.set_reservoir_temperature(t)?,
            Control::SetFiniteSizeCorrection(on) => self.stats.set_finite_size_correction(on),
            Control::SetRealGasCorrection(on) => self.stats.set_real_gas_correction(on),
            Control::SetDemon(on) => self.sim.set_demon(on)?,
            Control::RegisterStatistic { id, types, kind } => {
                self.stats.register_as(id, types, kind)?
            }
            Control::UnregisterStatistic(id) => self.stats.unregister(id)?,
            Control::SetHistogramRange { id, lo, hi } => self.stats.set_range(id, lo, hi)?,
            Control::ClearStatistics => self.stats.clear(),
            Control::ResetStatistics => self.stats.reset(),
        }
        Ok(())
    }

    fn transition(&mut self, to: RunState) {
        if self.clock.state != to {
            log::info!("run state {:?} -> {:?}", self.clock.state, to);
            self.clock.state = to;
        }
    }

    /// Resolve events up to simulated `target`, feeding the statistics.
    ///
    /// With `controls`, pending commands are applied between events; the run
    /// ends early if one of them leaves the running state or restarts the run.
    /// Stepping also stops once `deadline` passes, leaving the clock short of
    /// `target`.
    fn run_until(
        &mut self,
        target: f64,
        controls: Option<&Receiver<Control>>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let start = self.sim.time();
        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::debug!(
                    "frame budget spent at t = {:.3} ps, {:.3} ps short",
                    self.sim.time(),
                    target - self.sim.time()
                );
                break;
            }
            if let Some(rx) = controls {
                while let Ok(cmd) = rx.try_recv() {
                    self.apply_logged(cmd);
                }
                if self.exit || !self.clock.is_running() || self.sim.time() < start {
                    break;
                }
            }
            match self.sim.step(target)? {
                Some(ev) => self.stats.notify_of_event(&ev),
                None => break,
            }
        }
        self.stats.notify_of_simulation_time(self.sim.time());
        self.clock.time = self.sim.time();
        Ok(())
    }

    /// Advance by `sim_dt` of simulated time if running.
    pub fn advance_by(&mut self, sim_dt: f64) -> Result<()> {
        if !self.clock.is_running() || sim_dt <= 0.0 {
            return Ok(());
        }
        let target = self.sim.time() + sim_dt;
        self.run_until(target, None, None)
    }

    /// Advance by the simulated time `wall_dt` maps to and produce a snapshot.
    pub fn tick(&mut self, wall_dt: Duration) -> Result<Snapshot> {
        self.advance_by(self.clock.speed * self.time_scale * wall_dt.as_secs_f64())?;
        Ok(self.snapshot())
    }

    /// Materialize a frame, sample it and close the live interval.
    pub fn snapshot(&mut self) -> Snapshot {
        let frame = self.sim.frame();
        self.stats.notify_of_frame(&frame);
        Snapshot {
            frame,
            statistics: self.stats.publish(),
            state: self.clock.state,
            speed: self.clock.speed,
        }
    }

    /// Current picture without sampling it into the statistics.
    pub fn idle_snapshot(&self) -> Snapshot {
        Snapshot {
            frame: self.sim.frame(),
            statistics: self.stats.reports(),
            state: self.clock.state,
            speed: self.clock.speed,
        }
    }

    fn apply_logged(&mut self, cmd: Control) {
        let label = format!("{cmd:?}");
        if let Err(e) = self.apply(cmd) {
            log::warn!("control {label} rejected: {e}");
        }
    }

    /// Thread body: poll controls, advance by elapsed wall time, publish.
    fn run(mut self, rx: Receiver<Control>, slot: Arc<Mutex<Option<Arc<Snapshot>>>>) -> Result<()> {
        log::info!("simulation thread started");
        let mut last = Instant::now();
        loop {
            let frame_start = Instant::now();
            if !self.clock.is_running() {
                match rx.recv_timeout(self.frame_interval) {
                    Ok(cmd) => self.apply_logged(cmd),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(cmd) => self.apply_logged(cmd),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.exit = true;
                        break;
                    }
                }
            }
            if self.exit {
                break;
            }

            let now = Instant::now();
            // a slow frame costs simulated time rather than piling up work
            let wall_dt = now.duration_since(last).min(self.frame_interval);
            last = now;
            if self.clock.is_running() {
                let target = self.sim.time() + self.clock.speed * self.time_scale * wall_dt.as_secs_f64();
                self.run_until(target, Some(&rx), Some(frame_start + self.frame_interval))?;
                if self.exit {
                    break;
                }
            }

            let snap = if self.clock.is_running() {
                self.snapshot()
            } else {
                self.idle_snapshot()
            };
            *slot.lock() = Some(Arc::new(snap));

            let spent = frame_start.elapsed();
            if self.clock.is_running() && spent < self.frame_interval {
                std::thread::sleep(self.frame_interval - spent);
            }
        }
        log::info!("simulation thread exiting at t = {:.3} ps", self.sim.time());
        Ok(())
    }
}

/// Driver running on its own thread.
#[derive(Debug)]
pub struct DriverHandle {
    tx: Sender<Control>,
    latest: Arc<Mutex<Option<Arc<Snapshot>>>>,
    join: Option<JoinHandle<Result<()>>>,
    next_id: AtomicU64,
}

impl DriverHandle {
    /// Validate `config`, build the simulation and start its thread.
    pub fn spawn(config: &SimConfig) -> Result<Self> {
        let driver = Driver::new(config)?;
        let (tx, rx) = channel::unbounded();
        let latest = Arc::new(Mutex::new(Some(Arc::new(driver.idle_snapshot()))));
        let slot = Arc::clone(&latest);
        let join = std::thread::Builder::new()
            .name("boltzsim-driver".into())
            .spawn(move || driver.run(rx, slot))?;
        Ok(Self {
            tx,
            latest,
            join: Some(join),
            next_id: AtomicU64::new(HANDLE_ID_BASE),
        })
    }

    pub fn send(&self, cmd: Control) -> Result<()> {
        self.tx.send(cmd).map_err(|_| Error::Disconnected)
    }

    pub fn start(&self) -> Result<()> {
        self.send(Control::Start)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Control::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Control::Resume)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Control::Stop)
    }

    pub fn restart(&self) -> Result<()> {
        self.send(Control::Restart)
    }

    pub fn set_speed(&self, speed: f64) -> Result<()> {
        self.send(Control::SetSpeed(speed))
    }

    /// Register a statistic; the id is valid once the thread applies the command.
    pub fn register_statistic(&self, types: TypeSet, kind: StatisticKind) -> Result<StatisticId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(Control::RegisterStatistic { id, types, kind })?;
        Ok(id)
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.lock().clone()
    }

    /// Ask the thread to finish its current event and wait for it.
    pub fn exit(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        let _ = self.tx.send(Control::Exit);
        join.join().map_err(|_| Error::Disconnected)?
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("simulation thread ended with an error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimConfig {
        SimConfig {
            seed: Some(4),
            ..SimConfig::single_species(2, [20.0, 20.0, 0.0], 30, 0.2, 4.0, 300.0)
        }
    }

    #[test]
    fn state_machine_transitions() -> Result<()> {
        let mut d = Driver::new(&config())?;
        assert_eq!(d.state(), RunState::Stopped);
        d.apply(Control::Pause)?;
        assert_eq!(d.state(), RunState::Stopped);
        d.apply(Control::Start)?;
        assert_eq!(d.state(), RunState::Running);
        d.apply(Control::Pause)?;
        assert_eq!(d.state(), RunState::Paused);
        d.apply(Control::Resume)?;
        assert_eq!(d.state(), RunState::Running);
        d.apply(Control::Stop)?;
        assert_eq!(d.state(), RunState::Stopped);
        assert!(d.apply(Control::SetSpeed(0.0)).is_err());
        Ok(())
    }

    #[test]
    fn time_only_moves_while_running() -> Result<()> {
        let mut d = Driver::new(&config())?;
        d.advance_by(1.0)?;
        assert_eq!(d.simulation().time(), 0.0);
        d.apply(Control::Start)?;
        d.advance_by(1.0)?;
        assert!((d.clock().time() - 1.0).abs() < 1e-12);
        d.apply(Control::Pause)?;
        d.advance_by(1.0)?;
        assert!((d.clock().time() - 1.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn spent_frame_budget_stops_stepping() -> Result<()> {
        let mut d = Driver::new(&config())?;
        d.apply(Control::Start)?;
        let resolved = d.simulation().events_resolved();
        d.run_until(50.0, None, Some(Instant::now()))?;
        assert_eq!(d.simulation().events_resolved(), resolved);
        assert!(d.simulation().time() < 50.0);

        d.run_until(2.0, None, Some(Instant::now() + Duration::from_secs(60)))?;
        assert!((d.simulation().time() - 2.0).abs() < 1e-12);
        assert!(d.simulation().events_resolved() > resolved);
        Ok(())
    }

    #[test]
    fn restart_keeps_state_and_registrations() -> Result<()> {
        let mut d = Driver::new(&config())?;
        let id = d
            .statistics_mut()
            .register(TypeSet::single(0)?, StatisticKind::Speed)?;
        d.apply(Control::Start)?;
        d.apply(Control::Pause)?;
        d.apply(Control::Resume)?;
        d.advance_by(2.0)?;
        d.snapshot();
        assert!(d.statistics().report(id)?.samples > 0);
        d.apply(Control::Restart)?;
        assert_eq!(d.state(), RunState::Running);
        assert_eq!(d.simulation().time(), 0.0);
        assert_eq!(d.statistics().report(id)?.samples, 0);
        Ok(())
    }
}
