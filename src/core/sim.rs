use crate::config::{max_packing, SimConfig};
use crate::core::arena::{Arena, ArenaKind, Side};
use crate::core::event::{EventKind, EventQueue};
use crate::core::frame::{EngineEvent, FrameInfo};
use crate::core::particle::{body_volume, Particle, ParticleStore, ParticleType};
use crate::core::predict::EPS_TIME;
use crate::core::reaction::ReactionTable;
use crate::core::vector::{norm_sq, Vec3};
use crate::error::{Error, Result};
use crate::units::BOLTZMANN;
use rand::{rng, rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Placement attempts per particle before giving up.
const MAX_PLACEMENT_ATTEMPTS: usize = 100_000;

/// Consecutive stale pops tolerated before the loop is declared stuck.
const MAX_DISCARDS_PER_STEP: u64 = 1_000_000;

/// Event-driven hard-body system in an arena.
///
/// Particles move in straight lines between events. `step` pops the earliest
/// pending event, resolves it and re-predicts only what it changed.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub(crate) time_now: f64,
    pub(crate) types: Vec<ParticleType>,
    pub(crate) reactions: ReactionTable,
    pub(crate) arena: Arena,
    pub(crate) store: ParticleStore,
    pub(crate) queue: EventQueue,
    /// Time of each particle's pending boundary event (infinite if none).
    pub(crate) next_boundary: Vec<f64>,
    pub(crate) rng: StdRng,
    config: SimConfig,
    evicted: Vec<(usize, usize)>,
    events_resolved: u64,
    pub(crate) work_total: f64,
    pub(crate) heat_total: f64,
}

impl Simulation {
    /// Build a simulation from a configuration.
    ///
    /// Validates the configuration, evicts excess particles if allowed, places
    /// every particle without overlap, draws Maxwell velocities rescaled to the
    /// exact configured temperature and schedules the initial events.
    pub fn new(config: &SimConfig) -> Result<Self> {
        config.validate()?;
        let mut config = config.clone();
        let evicted = config.fit_to_arena()?;
        let types = config.particle_types()?;
        let reactions = ReactionTable::new(config.reactions.clone(), &types)?;
        let arena = config.build_arena()?;

        let rng: StdRng = match config.seed {
            Some(s) => SeedableRng::seed_from_u64(s),
            None => SeedableRng::seed_from_u64(rng().random()),
        };

        let n = config.total_count();
        let mut sim = Self {
            time_now: 0.0,
            types,
            reactions,
            arena,
            store: ParticleStore::with_capacity(n),
            queue: EventQueue::new(n),
            next_boundary: vec![f64::INFINITY; n],
            rng,
            config,
            evicted,
            events_resolved: 0,
            work_total: 0.0,
            heat_total: 0.0,
        };
        sim.populate()?;
        sim.rebuild_event_queue()?;
        log::info!(
            "simulation ready: {} particles, {}D {:?} arena, T = {:.1} K",
            n,
            sim.arena.dim(),
            sim.arena.kind(),
            sim.temperature()
        );
        Ok(sim)
    }

    /// Re-initialize from the stored configuration with a fresh seed.
    ///
    /// The current state is only replaced once the new one is fully built.
    pub fn restart(&mut self) -> Result<()> {
        let mut config = self.config.clone();
        config.seed = Some(self.rng.random());
        *self = Self::new(&config)?;
        Ok(())
    }

    fn populate(&mut self) -> Result<()> {
        let dim = self.arena.dim();
        let ext = self.arena.extents();
        let periodic = self.arena.kind() == ArenaKind::Periodic;
        let divider = self.arena.divider_position();
        let x_range = match self.config.initial_side {
            Some(side) => self.arena.side_range(side),
            None => (0.0, ext[0]),
        };

        let counts: Vec<usize> = self.config.particle_types.iter().map(|t| t.count).collect();
        let mut placed: Vec<(Vec3, f64)> = Vec::with_capacity(self.next_boundary.len());
        for (kind, &count) in counts.iter().enumerate() {
            let radius = self.types[kind].radius;
            let sigma = (BOLTZMANN * self.config.temperature / self.types[kind].mass).sqrt();
            let normal = Normal::new(0.0, sigma)
                .map_err(|e| Error::MathError(format!("velocity distribution: {e}")))?;
            for _ in 0..count {
                let mut attempts = 0usize;
                let r = loop {
                    if attempts >= MAX_PLACEMENT_ATTEMPTS {
                        return Err(Error::Overcrowded(format!(
                            "failed to place particle {} of type '{}' without overlap",
                            placed.len(),
                            self.types[kind].name
                        )));
                    }
                    attempts += 1;
                    let mut r = [0.0_f64; 3];
                    for (k, r_k) in r.iter_mut().enumerate().take(dim) {
                        let (lo, hi) = if k == 0 { x_range } else { (0.0, ext[k]) };
                        *r_k = if periodic {
                            self.rng.random_range(lo..hi)
                        } else {
                            self.rng.random_range((lo + radius)..=(hi - radius))
                        };
                    }
                    if let Some(xd) = divider {
                        if (r[0] - xd).abs() < radius {
                            continue;
                        }
                    }
                    if !self.overlaps(&placed, &r, radius) {
                        break r;
                    }
                };
                let mut v = [0.0_f64; 3];
                for v_k in v.iter_mut().take(dim) {
                    *v_k = normal.sample(&mut self.rng);
                }
                let side = match divider {
                    Some(xd) if r[0] > xd => Side::Right,
                    _ => Side::Left,
                };
                self.store.push(kind, r, v, side, 0.0)?;
                placed.push((r, radius));
            }
        }
        self.thermalize()?;

        if let Some(p) = self.arena.piston_mut() {
            let occupied: f64 = counts
                .iter()
                .zip(&self.types)
                .map(|(&c, t)| c as f64 * body_volume(t.radius, dim))
                .sum();
            let lateral: f64 = ext[1..dim].iter().product();
            let r_max = self.types.iter().map(|t| t.radius).fold(0.0, f64::max);
            p.set_min_position((occupied / (max_packing(dim) * lateral)).max(4.0 * r_max));
        }
        Ok(())
    }

    fn overlaps(&self, placed: &[(Vec3, f64)], r: &Vec3, radius: f64) -> bool {
        placed.iter().any(|(q, rq)| {
            let d = self.min_image([r[0] - q[0], r[1] - q[1], r[2] - q[2]]);
            let min = radius + rq;
            norm_sq(&d) < min * min
        })
    }

    /// Remove net momentum in a periodic cell, then rescale to the exact target temperature.
    fn thermalize(&mut self) -> Result<()> {
        let n = self.store.len();
        if self.arena.kind() == ArenaKind::Periodic && n > 1 {
            let mut p = [0.0_f64; 3];
            let mut m_tot = 0.0;
            for i in 0..n {
                let m = self.types[self.store.kind(i)].mass;
                let v = self.store.velocity(i);
                for k in 0..3 {
                    p[k] += m * v[k];
                }
                m_tot += m;
            }
            for i in 0..n {
                let v = self.store.velocity(i);
                let v = [v[0] - p[0] / m_tot, v[1] - p[1] / m_tot, v[2] - p[2] / m_tot];
                self.store.set_velocity(i, v)?;
            }
        }
        let ke = self.kinetic_energy();
        if ke > 0.0 {
            let target = 0.5 * self.arena.dim() as f64 * n as f64 * BOLTZMANN * self.config.temperature;
            let f = (target / ke).sqrt();
            for i in 0..n {
                let v = self.store.velocity(i);
                self.store.set_velocity(i, [v[0] * f, v[1] * f, v[2] * f])?;
            }
        }
        Ok(())
    }

    /// Shortest separation vector under the periodic convention.
    pub(crate) fn min_image(&self, mut d: Vec3) -> Vec3 {
        if self.arena.kind() == ArenaKind::Periodic {
            let ext = self.arena.extents();
            for k in 0..self.arena.dim() {
                d[k] -= ext[k] * (d[k] / ext[k]).round();
            }
        }
        d
    }

    // ============ Scheduling ============

    fn schedule_boundary(&mut self, i: usize) -> Result<()> {
        match self.predict_boundary(i) {
            Some((t, kind)) => {
                self.next_boundary[i] = t;
                self.queue.insert(t, kind)
            }
            None => {
                self.next_boundary[i] = f64::INFINITY;
                Ok(())
            }
        }
    }

    /// Pair contacts later than either particle's next boundary event are not queued;
    /// the boundary event re-predicts them.
    fn schedule_pair(&mut self, i: usize, j: usize) -> Result<()> {
        let (a, b) = if i < j { (i, j) } else { (j, i) };
        if let Ok(t) = self.predict_pair(a, b) {
            if t <= self.next_boundary[a].min(self.next_boundary[b]) {
                self.queue.insert(
                    t,
                    EventKind::Pair {
                        i: a as u32,
                        j: b as u32,
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Invalidate and re-predict everything involving the `changed` particles.
    pub(crate) fn reschedule(&mut self, changed: &[usize]) -> Result<()> {
        for &i in changed {
            self.queue.invalidate(i);
        }
        for &i in changed {
            self.schedule_boundary(i)?;
        }
        let n = self.store.len();
        for (m, &i) in changed.iter().enumerate() {
            for j in 0..n {
                if j == i || changed[..m].contains(&j) {
                    continue;
                }
                self.schedule_pair(i, j)?;
            }
        }
        self.queue.compact(8 * n + 1024);
        Ok(())
    }

    /// Rebuild the event queue from the current particle states and arena.
    ///
    /// Must be called after externally modifying positions, velocities or the arena.
    pub fn rebuild_event_queue(&mut self) -> Result<()> {
        let n = self.store.len();
        self.queue.clear(n);
        self.next_boundary.clear();
        self.next_boundary.resize(n, f64::INFINITY);
        for i in 0..n {
            self.schedule_boundary(i)?;
        }
        for i in 0..n {
            for j in (i + 1)..n {
                self.schedule_pair(i, j)?;
            }
        }
        if let Some(t) = self.predict_piston_halt() {
            self.queue.insert(t, EventKind::PistonHalt)?;
        }
        Ok(())
    }

    // ============ Advancing ============

    /// Resolve the next event if it occurs no later than `target_time`.
    ///
    /// Returns the resolved event, or `None` once no event remains before the
    /// target; the clock then stands at `target_time`.
    pub fn step(&mut self, target_time: f64) -> Result<Option<EngineEvent>> {
        if !target_time.is_finite() {
            return Err(Error::InvalidParam("target_time must be finite".into()));
        }
        if target_time < self.time_now - EPS_TIME {
            return Err(Error::InvalidParam(
                "target_time cannot be earlier than current time".into(),
            ));
        }
        let mut discards = 0u64;
        loop {
            match self.queue.peek_time() {
                Some(t) if t <= target_time => {}
                _ => {
                    self.time_now = self.time_now.max(target_time);
                    return Ok(None);
                }
            }
            let Some(ev) = self.queue.pop() else {
                continue;
            };
            self.time_now = self.time_now.max(ev.time_f64());
            if let Some(out) = self.resolve(ev)? {
                self.events_resolved += 1;
                return Ok(Some(out));
            }
            discards += 1;
            if discards > MAX_DISCARDS_PER_STEP {
                return Err(Error::MathError(format!(
                    "event loop made no progress at t = {}",
                    self.time_now
                )));
            }
        }
    }

    /// Advance the simulation to `target_time` (must be >= current time).
    pub fn advance_to(&mut self, target_time: f64) -> Result<()> {
        self.advance_to_with(target_time, |_| {})
    }

    /// Advance to `target_time`, handing every resolved event to `observe`.
    pub fn advance_to_with<F>(&mut self, target_time: f64, mut observe: F) -> Result<()>
    where
        F: FnMut(&EngineEvent),
    {
        while let Some(ev) = self.step(target_time)? {
            observe(&ev);
        }
        Ok(())
    }

    // ============ Controls ============

    /// Start moving the piston toward `target` at `speed` (nm/ps).
    pub fn move_piston(&mut self, target: f64, speed: f64) -> Result<()> {
        let now = self.time_now;
        let p = self
            .arena
            .piston_mut()
            .ok_or_else(|| Error::InvalidParam("arena has no piston".into()))?;
        p.retarget(now, target, speed)?;
        log::debug!("piston moving to {:.3} nm at {} nm/ps", p.target(), speed);
        self.rebuild_event_queue()
    }

    pub fn stop_piston(&mut self) -> Result<()> {
        let now = self.time_now;
        let p = self
            .arena
            .piston_mut()
            .ok_or_else(|| Error::InvalidParam("arena has no piston".into()))?;
        p.halt(now);
        self.rebuild_event_queue()
    }

    /// Change the reservoir temperature; takes effect from the next wall contact.
    pub fn set_reservoir_temperature(&mut self, temperature: f64) -> Result<()> {
        self.arena.set_reservoir_temperature(temperature)?;
        if let Some(r) = self.config.reservoir.as_mut() {
            r.temperature = temperature;
        }
        Ok(())
    }

    /// Turn the one-way hole on or off.
    pub fn set_demon(&mut self, enabled: bool) -> Result<()> {
        if self.arena.kind() != ArenaKind::Divided {
            return Err(Error::InvalidParam(
                "demon mode needs a divided arena".into(),
            ));
        }
        self.arena.set_demon(enabled, self.config.demon_direction);
        self.config.demon = enabled;
        self.queue.invalidate_boundaries();
        self.rebuild_event_queue()
    }

    /// Put particle `i` at `r` with velocity `v` at the current time.
    ///
    /// Positions must lie inside the arena. Overlaps are not checked.
    pub fn place(&mut self, i: usize, r: Vec3, v: Vec3) -> Result<()> {
        if i >= self.store.len() {
            return Err(Error::OutOfBounds(format!("no particle {i}")));
        }
        let radius = self.types[self.store.kind(i)].radius;
        let periodic = self.arena.kind() == ArenaKind::Periodic;
        for k in 0..self.arena.dim() {
            let l = self.arena.length_at(k, self.time_now);
            let inside = if periodic {
                (0.0..=l).contains(&r[k])
            } else {
                (radius..=l - radius).contains(&r[k])
            };
            if !inside {
                return Err(Error::OutOfBounds(format!(
                    "position {:?} of particle {i} is outside the arena",
                    r
                )));
            }
        }
        let now = self.time_now;
        self.store.advance(i, now);
        self.store.set_position(i, r)?;
        self.store.set_velocity(i, v)?;
        if let Some(xd) = self.arena.divider_position() {
            self.store
                .set_side(i, if r[0] > xd { Side::Right } else { Side::Left });
        }
        self.rebuild_event_queue()
    }

    // ============ Observables ============

    /// Returns current simulation time.
    pub fn time(&self) -> f64 {
        self.time_now
    }

    /// Number of particles.
    pub fn num_particles(&self) -> usize {
        self.store.len()
    }

    pub fn types(&self) -> &[ParticleType] {
        &self.types
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn reactions(&self) -> &ReactionTable {
        &self.reactions
    }

    /// `(type, removed)` for every eviction made at construction.
    pub fn evicted(&self) -> &[(usize, usize)] {
        &self.evicted
    }

    /// Particle `i` at the current time.
    pub fn particle(&self, i: usize) -> Result<Particle> {
        if i >= self.store.len() {
            return Err(Error::OutOfBounds(format!("no particle {i}")));
        }
        Ok(self.store.particle_at(i, self.time_now))
    }

    pub fn particles(&self) -> Vec<Particle> {
        (0..self.store.len())
            .map(|i| self.store.particle_at(i, self.time_now))
            .collect()
    }

    /// Particles of `kind`, by slot.
    pub fn slots_of(&self, kind: usize) -> Vec<usize> {
        self.store.slots_of(kind).collect()
    }

    /// Compute total kinetic energy (kJ/mol).
    pub fn kinetic_energy(&self) -> f64 {
        (0..self.store.len())
            .map(|i| 0.5 * self.types[self.store.kind(i)].mass * norm_sq(&self.store.velocity(i)))
            .sum()
    }

    /// Total momentum (amu nm/ps).
    pub fn momentum(&self) -> Vec3 {
        let mut p = [0.0_f64; 3];
        for i in 0..self.store.len() {
            let m = self.types[self.store.kind(i)].mass;
            let v = self.store.velocity(i);
            for k in 0..3 {
                p[k] += m * v[k];
            }
        }
        p
    }

    /// Kinetic temperature `2 KE / (d N k_B)`.
    pub fn temperature(&self) -> f64 {
        let n = self.store.len();
        if n == 0 {
            return 0.0;
        }
        2.0 * self.kinetic_energy() / (self.arena.dim() as f64 * n as f64 * BOLTZMANN)
    }

    /// Particles left and right of the divider (all left when undivided).
    pub fn side_counts(&self) -> [usize; 2] {
        let mut c = [0usize; 2];
        for i in 0..self.store.len() {
            c[self.store.side(i).index()] += 1;
        }
        c
    }

    /// Work done on the gas by the piston so far.
    pub fn work_total(&self) -> f64 {
        self.work_total
    }

    /// Heat drawn from the reservoir so far.
    pub fn heat_total(&self) -> f64 {
        self.heat_total
    }

    pub fn events_resolved(&self) -> u64 {
        self.events_resolved
    }

    /// Stale queue entries skipped so far.
    pub fn discarded_events(&self) -> u64 {
        self.queue.discarded()
    }

    /// Snapshot of the whole system at the current time. Reading does not change state.
    pub fn frame(&self) -> FrameInfo {
        let t = self.time_now;
        let particles = self.particles();
        let mut counts = vec![0usize; self.types.len()];
        for p in &particles {
            counts[p.kind] += 1;
        }
        FrameInfo {
            time: t,
            dim: self.arena.dim(),
            arena: self.arena.kind(),
            extents: self.arena.extents(),
            piston_position: self.arena.piston().map(|p| p.position_at(t)),
            piston_velocity: self.arena.piston().map(|p| p.velocity()),
            divider_position: self.arena.divider_position(),
            hole_diameter: self.arena.hole_diameter(),
            demon: self.arena.demon(),
            reservoir_temperature: self.arena.reservoir().map(|r| r.temperature),
            volume: self.arena.volume_at(t),
            pressure_area: self.arena.pressure_area(t),
            particles,
            counts,
            side_counts: self.side_counts(),
            kinetic_energy: self.kinetic_energy(),
            temperature: self.temperature(),
            events_resolved: self.events_resolved,
            work_total: self.work_total,
            heat_total: self.heat_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParticleTypeConfig;

    #[test]
    fn make_small_sim_ok() -> Result<()> {
        let cfg = SimConfig {
            seed: Some(1234),
            ..SimConfig::single_species(3, [10.0, 10.0, 10.0], 4, 0.2, 1.0, 300.0)
        };
        let mut sim = Simulation::new(&cfg)?;
        assert_eq!(sim.num_particles(), 4);
        assert!((sim.temperature() - 300.0).abs() < 1e-9);
        sim.advance_to(0.1)?;
        assert!(sim.time() >= 0.1 - 1e-12);
        Ok(())
    }

    #[test]
    fn same_seed_same_state() -> Result<()> {
        let cfg = SimConfig {
            seed: Some(9),
            ..SimConfig::single_species(2, [10.0, 10.0, 0.0], 20, 0.2, 4.0, 300.0)
        };
        let a = Simulation::new(&cfg)?;
        let b = Simulation::new(&cfg)?;
        assert_eq!(a.particles(), b.particles());
        Ok(())
    }

    #[test]
    fn periodic_start_has_no_net_momentum() -> Result<()> {
        let cfg = SimConfig {
            arena: ArenaKind::Periodic,
            seed: Some(5),
            ..SimConfig::single_species(3, [10.0, 10.0, 10.0], 30, 0.2, 4.0, 300.0)
        };
        let sim = Simulation::new(&cfg)?;
        let p = sim.momentum();
        assert!(norm_sq(&p).sqrt() < 1e-9);
        Ok(())
    }

    #[test]
    fn initial_side_puts_everyone_left() -> Result<()> {
        let cfg = SimConfig {
            dimension: 2,
            extents: [20.0, 20.0, 0.0],
            arena: ArenaKind::Divided,
            initial_side: Some(Side::Left),
            particle_types: vec![ParticleTypeConfig::new("He", 0.1, 4.0, 50)],
            seed: Some(1),
            ..SimConfig::default()
        };
        let sim = Simulation::new(&cfg)?;
        assert_eq!(sim.side_counts(), [50, 0]);
        assert!(sim.particles().iter().all(|p| p.r[0] <= 10.0 - 0.1));
        Ok(())
    }

    #[test]
    fn restart_draws_a_new_state() -> Result<()> {
        let cfg = SimConfig {
            seed: Some(42),
            ..SimConfig::single_species(2, [10.0, 10.0, 0.0], 10, 0.2, 4.0, 300.0)
        };
        let mut sim = Simulation::new(&cfg)?;
        sim.advance_to(5.0)?;
        let before = sim.particles();
        sim.restart()?;
        assert_eq!(sim.time(), 0.0);
        assert_eq!(sim.num_particles(), 10);
        assert_ne!(sim.particles(), before);
        Ok(())
    }

    #[test]
    fn place_rejects_outside_positions() -> Result<()> {
        let cfg = SimConfig::single_species(2, [10.0, 10.0, 0.0], 2, 0.5, 1.0, 300.0);
        let mut sim = Simulation::new(&cfg)?;
        assert!(sim.place(0, [0.2, 5.0, 0.0], [0.0; 3]).is_err());
        assert!(sim.place(7, [5.0, 5.0, 0.0], [0.0; 3]).is_err());
        Ok(())
    }
}
