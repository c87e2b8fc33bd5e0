//! Measured averages and distributions, with kinetic-theory predictions.
//!
//! The engine only reads what the simulation hands it: resolved events,
//! elapsed simulated time and frames. It never touches simulation state.

pub mod accum;
pub mod kind;
pub mod theory;

pub use accum::{Accumulator, Histogram};
pub use kind::{StatisticKind, TypeSet};
pub use theory::{Corrections, TheoryContext};

use crate::core::arena::ArenaKind;
use crate::core::frame::{Contact, EngineEvent, FrameInfo};
use crate::core::particle::ParticleType;
use crate::core::sim::Simulation;
use crate::core::vector::norm_sq;
use crate::error::{Error, Result};
use crate::units::{best_unit, convert, Unit, UnitFamily};
use std::collections::BTreeMap;

pub type StatisticId = u64;

/// Bins of a freshly registered distribution.
pub const DEFAULT_BINS: usize = 50;

#[derive(Debug, Clone)]
struct Curve {
    ctx: TheoryContext,
    corrections: Corrections,
    range: (f64, f64),
    bins: usize,
}

#[derive(Debug, Clone)]
struct Distribution {
    live: Histogram,
    cumulative: Histogram,
    /// Range chosen by the caller rather than derived from theory.
    custom_range: bool,
    /// Range has been set from a theory context or by the caller.
    ready: bool,
    drawn: Option<Curve>,
}

impl Distribution {
    fn new(range: Option<(f64, f64)>, bins: usize) -> Result<Self> {
        let (lo, hi) = range.unwrap_or((0.0, 1.0));
        Ok(Self {
            live: Histogram::new(lo, hi, bins)?,
            cumulative: Histogram::new(lo, hi, bins)?,
            custom_range: false,
            ready: range.is_some(),
            drawn: None,
        })
    }

    fn set_range(&mut self, lo: f64, hi: f64, bins: usize) -> Result<()> {
        let live = Histogram::new(lo, hi, bins)?;
        self.cumulative = live.clone();
        self.live = live;
        self.ready = true;
        Ok(())
    }

    fn add(&mut self, x: f64) {
        self.live.add(x);
        self.cumulative.add(x);
    }
}

#[derive(Debug, Clone)]
struct Statistic {
    types: TypeSet,
    kind: StatisticKind,
    live: Accumulator,
    cumulative: Accumulator,
    distribution: Option<Distribution>,
}

impl Statistic {
    fn push(&mut self, x: f64) {
        self.live.push(x);
        self.cumulative.push(x);
    }

    fn sample(&mut self, x: f64) {
        self.push(x);
        if let Some(d) = self.distribution.as_mut() {
            d.add(x);
        }
    }
}

/// Everything a front-end shows for one statistic.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticReport {
    pub id: StatisticId,
    pub kind: StatisticKind,
    pub types: TypeSet,
    /// Unit every value below is expressed in.
    pub unit: Unit,
    /// Average over the last frame interval.
    pub current: Option<f64>,
    /// Average since the last clear or reset.
    pub cumulative: Option<f64>,
    pub prediction: Option<f64>,
    /// Standard deviation of the cumulative samples.
    pub width: Option<f64>,
    pub predicted_width: Option<f64>,
    pub samples: u64,
    /// Samples taken since the last publish, the weight behind `current`.
    pub live_samples: u64,
    pub range: Option<(f64, f64)>,
    pub live_bins: Vec<u64>,
    pub cumulative_bins: Vec<u64>,
    /// The theoretical curve must be redrawn.
    pub theory_dirty: bool,
}

impl StatisticReport {
    /// The same report expressed in `to`.
    pub fn convert(&self, to: Unit) -> Result<StatisticReport> {
        let from = self.unit;
        let value = |v: Option<f64>| v.map(|x| convert(x, from, to)).transpose();
        // fails on a family mismatch before widths are rescaled
        let current = value(self.current)?;
        let width = |w: Option<f64>| w.map(|x| x * from.scale / to.scale);
        let range = match self.range {
            Some((lo, hi)) => Some((convert(lo, from, to)?, convert(hi, from, to)?)),
            None => None,
        };
        Ok(StatisticReport {
            unit: to,
            current,
            cumulative: value(self.cumulative)?,
            prediction: value(self.prediction)?,
            width: width(self.width),
            predicted_width: width(self.predicted_width),
            range,
            ..self.clone()
        })
    }

    /// The report in whichever of `candidates` reads best.
    pub fn in_best_unit(&self, candidates: &[Unit]) -> Result<StatisticReport> {
        let typical = self.prediction.or(self.cumulative).unwrap_or(0.0);
        let base = convert(typical, self.unit, self.unit.family.base())?;
        let to = best_unit(base, self.unit.family, candidates)?;
        self.convert(to)
    }
}

/// Registered statistics of one simulation.
#[derive(Debug, Clone)]
pub struct StatisticsEngine {
    types: Vec<ParticleType>,
    dim: usize,
    periodic: bool,
    stats: BTreeMap<StatisticId, Statistic>,
    next_id: StatisticId,
    corrections: Corrections,
    ctx: Option<TheoryContext>,
    last_time: f64,
    last_frame_time: Option<f64>,
    pressure_area: f64,
}

impl StatisticsEngine {
    pub fn new(types: Vec<ParticleType>, dim: usize, periodic: bool) -> Self {
        Self {
            types,
            dim,
            periodic,
            stats: BTreeMap::new(),
            next_id: 0,
            corrections: Corrections::default(),
            ctx: None,
            last_time: 0.0,
            last_frame_time: None,
            pressure_area: 0.0,
        }
    }

    /// Engine bound to `sim`'s types and arena, with its current state as theory input.
    pub fn for_simulation(sim: &Simulation) -> Self {
        let mut s = Self::new(
            sim.types().to_vec(),
            sim.arena().dim(),
            sim.arena().kind() == ArenaKind::Periodic,
        );
        s.update_context(&sim.frame());
        s.last_time = sim.time();
        s
    }

    pub fn corrections(&self) -> Corrections {
        self.corrections
    }

    pub fn set_finite_size_correction(&mut self, enabled: bool) {
        self.corrections.finite_size = enabled;
    }

    pub fn set_real_gas_correction(&mut self, enabled: bool) {
        self.corrections.real_gas = enabled;
    }

    pub fn context(&self) -> Option<&TheoryContext> {
        self.ctx.as_ref()
    }

    pub fn ids(&self) -> Vec<StatisticId> {
        self.stats.keys().copied().collect()
    }

    pub fn register(&mut self, types: TypeSet, kind: StatisticKind) -> Result<StatisticId> {
        let id = self.next_id;
        self.register_as(id, types, kind)?;
        Ok(id)
    }

    /// Register under a caller-chosen id.
    pub fn register_as(&mut self, id: StatisticId, types: TypeSet, kind: StatisticKind) -> Result<()> {
        if self.stats.contains_key(&id) {
            return Err(Error::InvalidParam(format!("statistic id {id} already in use")));
        }
        match types.max_kind() {
            None => {
                return Err(Error::InvalidParam("statistic needs at least one type".into()));
            }
            Some(k) if k >= self.types.len() => {
                return Err(Error::InvalidParam(format!("unknown particle type {k}")));
            }
            _ => {}
        }
        if let StatisticKind::VelocityComponent(axis) = kind {
            if axis >= self.dim {
                return Err(Error::InvalidParam(format!(
                    "velocity axis {axis} does not exist in {} dimensions",
                    self.dim
                )));
            }
        }
        let distribution = if kind.has_distribution() {
            let range = self
                .ctx
                .as_ref()
                .map(|c| theory::default_range(kind, &types, c));
            Some(Distribution::new(range, DEFAULT_BINS)?)
        } else {
            None
        };
        self.stats.insert(
            id,
            Statistic {
                types,
                kind,
                live: Accumulator::default(),
                cumulative: Accumulator::default(),
                distribution,
            },
        );
        self.next_id = self.next_id.max(id + 1);
        log::debug!("registered statistic {id}: {}", kind.label());
        Ok(())
    }

    pub fn unregister(&mut self, id: StatisticId) -> Result<()> {
        self.stats
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::UnknownStatistic(id))
    }

    fn distribution_mut(&mut self, id: StatisticId) -> Result<&mut Distribution> {
        let stat = self.stats.get_mut(&id).ok_or(Error::UnknownStatistic(id))?;
        let label = stat.kind.label();
        stat.distribution
            .as_mut()
            .ok_or_else(|| Error::InvalidParam(format!("{label} has no distribution")))
    }

    /// Histogram range; clears both histograms.
    pub fn set_range(&mut self, id: StatisticId, lo: f64, hi: f64) -> Result<()> {
        let d = self.distribution_mut(id)?;
        let bins = d.cumulative.bins().len();
        d.set_range(lo, hi, bins)?;
        d.custom_range = true;
        Ok(())
    }

    /// Number of histogram bins; clears both histograms.
    pub fn set_bins(&mut self, id: StatisticId, bins: usize) -> Result<()> {
        let d = self.distribution_mut(id)?;
        let (lo, hi) = d.cumulative.range();
        let ready = d.ready;
        d.set_range(lo, hi, bins)?;
        d.ready = ready;
        Ok(())
    }

    // ============ Inputs ============

    /// Record one resolved event.
    pub fn notify_of_event(&mut self, ev: &EngineEvent) {
        match *ev {
            EngineEvent::Collision {
                kinds_before,
                free_paths,
                free_times,
                virial,
                ..
            } => {
                let volume = self.ctx.as_ref().map_or(0.0, |c| c.volume);
                for stat in self.stats.values_mut() {
                    for p in 0..2 {
                        if !stat.types.contains(kinds_before[p]) {
                            continue;
                        }
                        match stat.kind {
                            StatisticKind::FreePath => stat.sample(free_paths[p]),
                            StatisticKind::TimePerCollision => stat.sample(free_times[p]),
                            StatisticKind::CollisionRate => {
                                let n = subset_count(self.ctx.as_ref(), &stat.types);
                                stat.push(1.0 / n.max(1) as f64);
                            }
                            StatisticKind::Pressure if self.periodic && volume > 0.0 => {
                                stat.push(0.5 * virial / (self.dim as f64 * volume));
                            }
                            _ => {}
                        }
                    }
                }
            }
            EngineEvent::WallHit {
                kind,
                contact,
                impulse,
                ..
            } => {
                if contact == Contact::Divider || self.pressure_area <= 0.0 {
                    return;
                }
                let area = self.pressure_area;
                for stat in self.stats.values_mut() {
                    if stat.kind == StatisticKind::Pressure && stat.types.contains(kind) {
                        stat.push(impulse / area);
                    }
                }
            }
            _ => {}
        }
    }

    /// Simulated time has reached `t`; extends the window rates are averaged over.
    pub fn notify_of_simulation_time(&mut self, t: f64) {
        let dt = t - self.last_time;
        if dt > 0.0 {
            for stat in self.stats.values_mut().filter(|s| s.kind.is_rate()) {
                stat.live.add_span(dt);
                stat.cumulative.add_span(dt);
            }
        }
        self.last_time = t;
    }

    /// Sample state-based kinds from a frame and refresh the theory inputs.
    pub fn notify_of_frame(&mut self, frame: &FrameInfo) {
        self.update_context(frame);
        let dt = self
            .last_frame_time
            .map_or(0.0, |t0| (frame.time - t0).max(0.0));
        self.last_frame_time = Some(frame.time);

        let masses: Vec<f64> = self.types.iter().map(|t| t.mass).collect();
        for stat in self.stats.values_mut() {
            let types = stat.types;
            match stat.kind {
                StatisticKind::Speed => {
                    for p in frame.particles.iter().filter(|p| types.contains(p.kind)) {
                        stat.sample(p.speed());
                    }
                }
                StatisticKind::VelocityComponent(axis) => {
                    for p in frame.particles.iter().filter(|p| types.contains(p.kind)) {
                        stat.sample(p.v[axis]);
                    }
                }
                StatisticKind::KineticEnergy => {
                    for p in frame.particles.iter().filter(|p| types.contains(p.kind)) {
                        stat.sample(p.kinetic_energy(masses[p.kind]));
                    }
                }
                StatisticKind::Pressure if self.periodic && dt > 0.0 && frame.volume > 0.0 => {
                    let twice_ke: f64 = frame
                        .particles
                        .iter()
                        .filter(|p| types.contains(p.kind))
                        .map(|p| masses[p.kind] * norm_sq(&p.v))
                        .sum();
                    stat.push(twice_ke / (self.dim as f64 * frame.volume) * dt);
                }
                _ => {}
            }
        }
    }

    /// Refresh theory inputs without sampling.
    pub fn update_context(&mut self, frame: &FrameInfo) {
        let ctx = TheoryContext::from_frame(frame, &self.types);
        self.pressure_area = frame.pressure_area;
        for stat in self.stats.values_mut() {
            if let Some(d) = stat.distribution.as_mut() {
                if !d.ready && !d.custom_range {
                    let (lo, hi) = theory::default_range(stat.kind, &stat.types, &ctx);
                    let bins = d.cumulative.bins().len();
                    if let Err(e) = d.set_range(lo, hi, bins) {
                        log::warn!("keeping histogram range for {}: {e}", stat.kind.label());
                    }
                }
            }
        }
        self.ctx = Some(ctx);
    }

    /// Restart the time bookkeeping at `t` (after the simulation restarts).
    pub fn rebase(&mut self, t: f64) {
        self.last_time = t;
        self.last_frame_time = None;
    }

    // ============ Outputs ============

    pub fn report(&self, id: StatisticId) -> Result<StatisticReport> {
        let stat = self.stats.get(&id).ok_or(Error::UnknownStatistic(id))?;
        Ok(self.build_report(id, stat))
    }

    /// Reports of every statistic, by id.
    pub fn reports(&self) -> Vec<StatisticReport> {
        self.stats
            .iter()
            .map(|(&id, stat)| self.build_report(id, stat))
            .collect()
    }

    fn build_report(&self, id: StatisticId, stat: &Statistic) -> StatisticReport {
        let kind = stat.kind;
        let (current, cumulative) = if kind.is_rate() {
            (stat.live.rate(), stat.cumulative.rate())
        } else {
            (stat.live.mean(), stat.cumulative.mean())
        };
        let corr = self.corrections;
        let ctx = self.ctx.as_ref();
        let dist = stat.distribution.as_ref();
        StatisticReport {
            id,
            kind,
            types: stat.types,
            unit: kind.unit_family(self.dim).base(),
            current,
            cumulative,
            prediction: ctx.and_then(|c| theory::prediction(kind, &stat.types, c, corr)),
            width: dist.and_then(|_| stat.cumulative.std_dev()),
            predicted_width: ctx.and_then(|c| theory::predicted_width(kind, &stat.types, c, corr)),
            samples: stat.cumulative.count(),
            live_samples: stat.live.count(),
            range: dist.map(|d| d.cumulative.range()),
            live_bins: dist.map_or_else(Vec::new, |d| d.live.bins().to_vec()),
            cumulative_bins: dist.map_or_else(Vec::new, |d| d.cumulative.bins().to_vec()),
            theory_dirty: dist.is_some_and(|d| self.curve_dirty(d)),
        }
    }

    fn curve_dirty(&self, d: &Distribution) -> bool {
        let Some(ctx) = self.ctx.as_ref() else {
            return false;
        };
        match &d.drawn {
            None => true,
            Some(c) => {
                !(c.ctx.approx_eq(ctx)
                    && c.corrections == self.corrections
                    && c.range == d.cumulative.range()
                    && c.bins == d.cumulative.bins().len())
            }
        }
    }

    /// Predicted density at every bin centre; marks the curve as drawn.
    pub fn theory_curve(&mut self, id: StatisticId) -> Result<Vec<(f64, f64)>> {
        let corr = self.corrections;
        let ctx = self.ctx.clone();
        let stat = self.stats.get_mut(&id).ok_or(Error::UnknownStatistic(id))?;
        let (kind, types) = (stat.kind, stat.types);
        let d = stat
            .distribution
            .as_mut()
            .ok_or_else(|| Error::InvalidParam(format!("{} has no distribution", kind.label())))?;
        let Some(ctx) = ctx else {
            return Ok(Vec::new());
        };
        let h = &d.cumulative;
        let curve = (0..h.bins().len())
            .map(|k| {
                let x = h.bin_center(k);
                (x, theory::pdf(kind, &types, &ctx, corr, x).unwrap_or(0.0))
            })
            .collect();
        d.drawn = Some(Curve {
            ctx,
            corrections: corr,
            range: h.range(),
            bins: h.bins().len(),
        });
        Ok(curve)
    }

    /// Reports, then start a new live interval.
    pub fn publish(&mut self) -> Vec<StatisticReport> {
        let out = self.reports();
        self.end_live_interval();
        out
    }

    pub fn end_live_interval(&mut self) {
        for stat in self.stats.values_mut() {
            stat.live.clear();
            if let Some(d) = stat.distribution.as_mut() {
                d.live.clear();
            }
        }
    }

    /// Zero every accumulator and histogram; ranges and registrations stay.
    pub fn clear(&mut self) {
        for stat in self.stats.values_mut() {
            stat.live.clear();
            stat.cumulative.clear();
            if let Some(d) = stat.distribution.as_mut() {
                d.live.clear();
                d.cumulative.clear();
            }
        }
    }

    /// Clear, and return every histogram to its default range and bin count.
    pub fn reset(&mut self) {
        self.clear();
        self.last_frame_time = None;
        let ctx = self.ctx.as_ref();
        for stat in self.stats.values_mut() {
            if let Some(d) = stat.distribution.as_mut() {
                let range = ctx.map(|c| theory::default_range(stat.kind, &stat.types, c));
                match Distribution::new(range, DEFAULT_BINS) {
                    Ok(fresh) => *d = fresh,
                    Err(e) => log::warn!("could not reset {}: {e}", stat.kind.label()),
                }
            }
        }
    }

    /// Unit family readings of `id` are reported in.
    pub fn unit_family(&self, id: StatisticId) -> Result<UnitFamily> {
        self.stats
            .get(&id)
            .map(|s| s.kind.unit_family(self.dim))
            .ok_or(Error::UnknownStatistic(id))
    }
}

fn subset_count(ctx: Option<&TheoryContext>, types: &TypeSet) -> usize {
    ctx.map_or(1, |c| {
        types
            .iter()
            .filter(|&k| k < c.counts.len())
            .map(|k| c.counts[k])
            .sum()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::units::{M_PER_S, NM_PER_PS, PASCAL};
    use approx::assert_relative_eq;

    fn small_sim() -> Result<Simulation> {
        let cfg = SimConfig {
            seed: Some(17),
            ..SimConfig::single_species(2, [20.0, 20.0, 0.0], 40, 0.2, 4.0, 300.0)
        };
        Simulation::new(&cfg)
    }

    #[test]
    fn histogram_total_matches_samples() -> Result<()> {
        let mut sim = small_sim()?;
        let mut stats = StatisticsEngine::for_simulation(&sim);
        let id = stats.register(TypeSet::single(0)?, StatisticKind::Speed)?;
        for k in 1..=5 {
            sim.advance_to(k as f64)?;
            stats.notify_of_frame(&sim.frame());
        }
        let r = stats.report(id)?;
        assert_eq!(r.samples, 200);
        assert_eq!(r.cumulative_bins.iter().sum::<u64>(), r.samples);
        stats.clear();
        let r = stats.report(id)?;
        assert_eq!(r.samples, 0);
        assert!(r.cumulative_bins.iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn live_interval_resets_on_publish() -> Result<()> {
        let sim = small_sim()?;
        let mut stats = StatisticsEngine::for_simulation(&sim);
        let id = stats.register(TypeSet::single(0)?, StatisticKind::KineticEnergy)?;
        stats.notify_of_frame(&sim.frame());
        let first = stats.publish();
        assert!(first[0].current.is_some());
        let r = stats.report(id)?;
        assert!(r.current.is_none());
        assert!(r.cumulative.is_some());
        Ok(())
    }

    #[test]
    fn range_change_marks_curve_dirty() -> Result<()> {
        let sim = small_sim()?;
        let mut stats = StatisticsEngine::for_simulation(&sim);
        let id = stats.register(TypeSet::single(0)?, StatisticKind::Speed)?;
        assert!(stats.report(id)?.theory_dirty);
        let curve = stats.theory_curve(id)?;
        assert_eq!(curve.len(), DEFAULT_BINS);
        assert!(!stats.report(id)?.theory_dirty);
        stats.set_range(id, 0.0, 5.0)?;
        assert!(stats.report(id)?.theory_dirty);
        stats.theory_curve(id)?;
        stats.set_finite_size_correction(true);
        assert!(stats.report(id)?.theory_dirty);
        Ok(())
    }

    #[test]
    fn unknown_and_invalid_registrations() -> Result<()> {
        let sim = small_sim()?;
        let mut stats = StatisticsEngine::for_simulation(&sim);
        assert!(matches!(stats.report(9), Err(Error::UnknownStatistic(9))));
        assert!(stats.register(TypeSet::single(3)?, StatisticKind::Speed).is_err());
        assert!(stats
            .register(TypeSet::single(0)?, StatisticKind::VelocityComponent(2))
            .is_err());
        let id = stats.register(TypeSet::single(0)?, StatisticKind::Pressure)?;
        assert!(stats.set_range(id, 0.0, 1.0).is_err());
        stats.unregister(id)?;
        assert!(stats.unregister(id).is_err());
        Ok(())
    }

    #[test]
    fn reports_convert_between_units() -> Result<()> {
        let sim = small_sim()?;
        let mut stats = StatisticsEngine::for_simulation(&sim);
        let id = stats.register(TypeSet::single(0)?, StatisticKind::Speed)?;
        let r = stats.report(id)?;
        assert_eq!(r.unit, NM_PER_PS);
        let si = r.convert(M_PER_S)?;
        assert_relative_eq!(
            si.prediction.unwrap_or(0.0),
            1000.0 * r.prediction.unwrap_or(0.0),
            max_relative = 1e-12
        );
        assert!(matches!(r.convert(PASCAL), Err(Error::UnitMismatch { .. })));
        assert!(matches!(r.in_best_unit(&[]), Err(Error::NoUnitAvailable(_))));
        Ok(())
    }

    #[test]
    fn reset_restores_default_range() -> Result<()> {
        let sim = small_sim()?;
        let mut stats = StatisticsEngine::for_simulation(&sim);
        let id = stats.register(TypeSet::single(0)?, StatisticKind::Speed)?;
        let default = stats.report(id)?.range;
        stats.set_range(id, 0.0, 100.0)?;
        stats.set_bins(id, 7)?;
        stats.reset();
        let r = stats.report(id)?;
        assert_eq!(r.range, default);
        assert_eq!(r.cumulative_bins.len(), DEFAULT_BINS);
        Ok(())
    }
}
