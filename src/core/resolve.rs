//! Applying popped events to particle state.

use crate::core::arena::{wall_axis_side, ArenaKind, Boundary, Side};
use crate::core::event::{Event, EventKind};
use crate::core::frame::{Contact, EngineEvent};
use crate::core::predict::straddles;
use crate::core::reaction::ReactionCandidate;
use crate::core::sim::Simulation;
use crate::core::vector::{add_scaled, dot, norm_sq, scale, sub, Vec3};
use crate::error::{Error, Result};
use crate::units::BOLTZMANN;
use rand::Rng;

/// Relative slack when checking that an event's contact geometry still holds.
const CONTACT_TOL: f64 = 1e-7;

impl Simulation {
    /// Resolve one popped event at its time, which is already `time_now`.
    ///
    /// Returns `None` when the geometry no longer supports the event; the
    /// participants are then re-predicted and nothing else changes.
    pub(crate) fn resolve(&mut self, ev: Event) -> Result<Option<EngineEvent>> {
        let t = ev.time_f64();
        match ev.kind {
            EventKind::Pair { i, j } => self.resolve_pair(i as usize, j as usize, t),
            EventKind::Wall { i, wall_id } => self.resolve_wall(i as usize, wall_id, t),
            EventKind::Divider { i } => self.resolve_divider(i as usize, t),
            EventKind::Hole { i } => self.resolve_hole(i as usize, t),
            EventKind::Rim { i } => self.resolve_rim(i as usize, t),
            EventKind::Piston { i } => self.resolve_piston(i as usize, t),
            EventKind::PistonHalt => self.resolve_piston_halt(t),
        }
    }

    fn stale(&mut self, changed: &[usize], what: &str, t: f64) -> Result<Option<EngineEvent>> {
        log::trace!("discarding {what} event for {changed:?} at t = {t}");
        self.reschedule(changed)?;
        Ok(None)
    }

    fn resolve_pair(&mut self, i: usize, j: usize, t: f64) -> Result<Option<EngineEvent>> {
        let (ki, kj) = (self.store.kind(i), self.store.kind(j));
        let sigma = self.types[ki].radius + self.types[kj].radius;
        let ri = self.store.position_at(i, t);
        let rj = self.store.position_at(j, t);
        let d = self.min_image(sub(&rj, &ri));
        let dist = norm_sq(&d).sqrt();
        let (vi, vj) = (self.store.velocity(i), self.store.velocity(j));
        let u = sub(&vj, &vi);
        if dist > sigma * (1.0 + CONTACT_TOL) + CONTACT_TOL || dot(&d, &u) >= 0.0 {
            return self.stale(&[i, j], "pair", t);
        }
        if dist <= f64::EPSILON {
            return Err(Error::MathError(
                "degenerate contact normal in pair collision".into(),
            ));
        }
        // unit normal from i to j
        let n = scale(&d, 1.0 / dist);

        self.store.advance(i, t);
        self.store.advance(j, t);
        let (path_i, time_i) = self.store.take_free_flight(i, t);
        let (path_j, time_j) = self.store.take_free_flight(j, t);

        let u_n = dot(&u, &n);
        let reacted = match self.reactions.lookup(ki, kj) {
            Some(c) => self.try_react(i, j, &n, u_n, c, t)?,
            None => false,
        };
        if !reacted {
            let (mi, mj) = (self.types[ki].mass, self.types[kj].mass);
            let fi = (2.0 * mj / (mi + mj)) * u_n;
            let fj = (2.0 * mi / (mi + mj)) * u_n;
            self.store.set_velocity(i, add_scaled(&vi, &n, fi))?;
            self.store.set_velocity(j, add_scaled(&vj, &n, -fj))?;
        }
        let kinds_after = [self.store.kind(i), self.store.kind(j)];
        let dp_j = scale(&sub(&self.store.velocity(j), &vj), self.types[kj].mass);
        let virial = dot(&d, &dp_j);

        self.reschedule(&[i, j])?;
        Ok(Some(EngineEvent::Collision {
            time: t,
            i,
            j,
            kinds_before: [ki, kj],
            kinds_after,
            free_paths: [path_i, path_j],
            free_times: [time_i, time_j],
            virial,
            reacted,
        }))
    }

    /// Fire `c` if the line-of-centres energy exceeds its barrier and the products fit.
    ///
    /// The centre-of-mass velocity is kept, the tangential relative velocity is
    /// rescaled to conserve angular momentum about the centre of mass, and the
    /// normal part absorbs the released energy.
    fn try_react(
        &mut self,
        i: usize,
        j: usize,
        n: &Vec3,
        u_n: f64,
        c: ReactionCandidate,
        t: f64,
    ) -> Result<bool> {
        let (ki, kj) = (self.store.kind(i), self.store.kind(j));
        let (mi, mj) = (self.types[ki].mass, self.types[kj].mass);
        let mu = mi * mj / (mi + mj);
        let line_energy = 0.5 * mu * u_n * u_n;
        if line_energy <= c.activation {
            return Ok(false);
        }
        let (pi, pj) = c.products;
        if !self.products_fit(i, j, (pi, pj), t) {
            return Ok(false);
        }
        let (mi2, mj2) = (self.types[pi].mass, self.types[pj].mass);
        let m = mi2 + mj2;
        let mu2 = mi2 * mj2 / m;
        let normal_energy = line_energy + c.released;
        if normal_energy < 0.0 {
            return Ok(false);
        }

        let (vi, vj) = (self.store.velocity(i), self.store.velocity(j));
        let mut vcm = [0.0_f64; 3];
        for k in 0..3 {
            vcm[k] = (mi * vi[k] + mj * vj[k]) / m;
        }
        let u = sub(&vj, &vi);
        let u_t = add_scaled(&u, n, -u_n);
        let u2 = add_scaled(&scale(&u_t, (mu / mu2).sqrt()), n, (2.0 * normal_energy / mu2).sqrt());

        self.store.set_kind(i, pi);
        self.store.set_kind(j, pj);
        self.store.set_velocity(i, add_scaled(&vcm, &u2, -mj2 / m))?;
        self.store.set_velocity(j, add_scaled(&vcm, &u2, mi2 / m))?;
        log::debug!(
            "reaction at t = {t:.4}: {} + {} -> {} + {}",
            self.types[ki].name,
            self.types[kj].name,
            self.types[pi].name,
            self.types[pj].name
        );
        Ok(true)
    }

    /// Whether products of kinds `(pi, pj)` at the current centres overlap nothing.
    fn products_fit(&self, i: usize, j: usize, (pi, pj): (usize, usize), t: f64) -> bool {
        let (ra, rb) = (self.types[pi].radius, self.types[pj].radius);
        let pos_i = self.store.position_at(i, t);
        let pos_j = self.store.position_at(j, t);
        let dij = norm_sq(&self.min_image(sub(&pos_j, &pos_i))).sqrt();
        if dij < (ra + rb) * (1.0 - CONTACT_TOL) {
            return false;
        }
        for (pos, rad) in [(pos_i, ra), (pos_j, rb)] {
            if !self.fits_in_arena(&pos, rad, t) {
                return false;
            }
            for k in 0..self.store.len() {
                if k == i || k == j {
                    continue;
                }
                let rk = self.types[self.store.kind(k)].radius;
                let d = self.min_image(sub(&self.store.position_at(k, t), &pos));
                if norm_sq(&d).sqrt() < (rad + rk) * (1.0 - CONTACT_TOL) {
                    return false;
                }
            }
        }
        true
    }

    fn fits_in_arena(&self, pos: &Vec3, radius: f64, t: f64) -> bool {
        if self.arena.kind() == ArenaKind::Periodic {
            return true;
        }
        let slack = CONTACT_TOL * radius;
        for k in 0..self.arena.dim() {
            let l = self.arena.length_at(k, t);
            if pos[k] - radius < -slack || pos[k] + radius > l + slack {
                return false;
            }
        }
        match self.arena.divider_position() {
            Some(xd) => (pos[0] - xd).abs() >= radius - slack || self.arena.hole_admits(pos, radius),
            None => true,
        }
    }

    fn resolve_wall(&mut self, i: usize, wall_id: u32, t: f64) -> Result<Option<EngineEvent>> {
        let (axis, is_max) = wall_axis_side(wall_id);
        let kind = self.store.kind(i);
        let (radius, mass) = (self.types[kind].radius, self.types[kind].mass);
        let l = self.arena.extents()[axis];
        let x = self.store.position_at(i, t)[axis];
        let v = self.store.velocity(i);
        let tol = CONTACT_TOL * l.max(1.0);
        let outward = if is_max { v[axis] > 0.0 } else { v[axis] < 0.0 };

        match self.arena.boundary(wall_id) {
            Boundary::Periodic => {
                let at_face = if is_max { x >= l - tol } else { x <= tol };
                if !outward || !at_face {
                    return self.stale(&[i], "wrap", t);
                }
                self.store.advance(i, t);
                self.store
                    .set_position_component(i, axis, if is_max { 0.0 } else { l });
                self.reschedule(&[i])?;
                Ok(Some(EngineEvent::Wrap {
                    time: t,
                    i,
                    kind,
                    wall_id,
                }))
            }
            boundary => {
                let plane = if is_max { l - radius } else { radius };
                let at_face = if is_max { x >= plane - tol } else { x <= plane + tol };
                if !outward || !at_face {
                    return self.stale(&[i], "wall", t);
                }
                self.store.advance(i, t);
                self.store.set_position_component(i, axis, plane);
                let vn = v[axis];
                let (new_vn, heat) = match (boundary, self.arena.reservoir()) {
                    (Boundary::Reservoir, Some(r)) => {
                        let speed = self.sample_wall_speed(mass, r.temperature);
                        let new_vn = if is_max { -speed } else { speed };
                        (new_vn, 0.5 * mass * (new_vn * new_vn - vn * vn))
                    }
                    _ => (-vn, 0.0),
                };
                let mut v2 = v;
                v2[axis] = new_vn;
                self.store.set_velocity(i, v2)?;
                self.heat_total += heat;
                self.reschedule(&[i])?;
                Ok(Some(EngineEvent::WallHit {
                    time: t,
                    i,
                    kind,
                    contact: Contact::Wall(wall_id),
                    impulse: mass * (vn - new_vn).abs(),
                    work: 0.0,
                    heat,
                }))
            }
        }
    }

    /// Normal speed leaving a thermal wall: flux-weighted Maxwell (Rayleigh) distribution.
    fn sample_wall_speed(&mut self, mass: f64, temperature: f64) -> f64 {
        let u: f64 = self.rng.random();
        (-2.0 * BOLTZMANN * temperature / mass * (1.0 - u).ln()).sqrt()
    }

    fn resolve_divider(&mut self, i: usize, t: f64) -> Result<Option<EngineEvent>> {
        let Some(xd) = self.arena.divider_position() else {
            return self.stale(&[i], "divider", t);
        };
        let kind = self.store.kind(i);
        let (radius, mass) = (self.types[kind].radius, self.types[kind].mass);
        let x = self.store.position_at(i, t)[0];
        let v = self.store.velocity(i);
        let tol = CONTACT_TOL * xd.max(1.0);
        let (plane, valid) = match self.store.side(i) {
            Side::Left => (xd - radius, v[0] > 0.0 && x >= xd - radius - tol),
            Side::Right => (xd + radius, v[0] < 0.0 && x <= xd + radius + tol),
        };
        if !valid {
            return self.stale(&[i], "divider", t);
        }
        self.store.advance(i, t);
        self.store.set_position_component(i, 0, plane);
        let mut v2 = v;
        v2[0] = -v[0];
        self.store.set_velocity(i, v2)?;
        self.reschedule(&[i])?;
        Ok(Some(EngineEvent::WallHit {
            time: t,
            i,
            kind,
            contact: Contact::Divider,
            impulse: 2.0 * mass * v[0].abs(),
            work: 0.0,
            heat: 0.0,
        }))
    }

    fn resolve_hole(&mut self, i: usize, t: f64) -> Result<Option<EngineEvent>> {
        let Some(xd) = self.arena.divider_position() else {
            return self.stale(&[i], "hole", t);
        };
        let kind = self.store.kind(i);
        let x = self.store.position_at(i, t)[0];
        let vx = self.store.velocity(i)[0];
        let tol = CONTACT_TOL * xd.max(1.0);
        let from = self.store.side(i);
        let valid = match from {
            Side::Left => vx > 0.0 && x >= xd - tol,
            Side::Right => vx < 0.0 && x <= xd + tol,
        };
        if !valid {
            return self.stale(&[i], "hole", t);
        }
        self.store.advance(i, t);
        if !self.arena.crossing_permitted(from) {
            // the demon shuts the hole on a body that turned back inside it
            let mass = self.types[kind].mass;
            let mut v = self.store.velocity(i);
            v[0] = -vx;
            self.store.set_velocity(i, v)?;
            self.reschedule(&[i])?;
            return Ok(Some(EngineEvent::WallHit {
                time: t,
                i,
                kind,
                contact: Contact::Divider,
                impulse: 2.0 * mass * vx.abs(),
                work: 0.0,
                heat: 0.0,
            }));
        }
        self.store.set_side(i, from.other());
        self.reschedule(&[i])?;
        Ok(Some(EngineEvent::HoleCrossing {
            time: t,
            i,
            kind,
            from,
        }))
    }

    /// Reflect a body inside the hole off the rim, normal to the hole axis.
    fn resolve_rim(&mut self, i: usize, t: f64) -> Result<Option<EngineEvent>> {
        let Some(xd) = self.arena.divider_position() else {
            return self.stale(&[i], "rim", t);
        };
        let kind = self.store.kind(i);
        let (radius, mass) = (self.types[kind].radius, self.types[kind].mass);
        let Some(cl) = self.arena.hole_clearance(radius) else {
            return self.stale(&[i], "rim", t);
        };
        let r = self.store.position_at(i, t);
        let v = self.store.velocity(i);
        let o = self.arena.hole_offset(&r);
        let dist = norm_sq(&o).sqrt();
        if dist <= 0.0 || !straddles(r[0], xd, radius) {
            return self.stale(&[i], "rim", t);
        }
        let n = scale(&o, 1.0 / dist);
        let vn = dot(&v, &n);
        if vn <= 0.0 || dist < cl - CONTACT_TOL * cl.max(1.0) {
            return self.stale(&[i], "rim", t);
        }
        self.store.advance(i, t);
        self.store.set_position(i, add_scaled(&r, &n, cl - dist))?;
        self.store.set_velocity(i, add_scaled(&v, &n, -2.0 * vn))?;
        self.reschedule(&[i])?;
        Ok(Some(EngineEvent::WallHit {
            time: t,
            i,
            kind,
            contact: Contact::Divider,
            impulse: 2.0 * mass * vn,
            work: 0.0,
            heat: 0.0,
        }))
    }

    fn resolve_piston(&mut self, i: usize, t: f64) -> Result<Option<EngineEvent>> {
        let Some(p) = self.arena.piston().copied() else {
            return self.stale(&[i], "piston", t);
        };
        let kind = self.store.kind(i);
        let (radius, mass) = (self.types[kind].radius, self.types[kind].mass);
        let xp = p.position_at(t);
        let vp = p.velocity();
        let x = self.store.position_at(i, t)[0];
        let v = self.store.velocity(i);
        let plane = xp - radius;
        if v[0] - vp <= 0.0 || x < plane - CONTACT_TOL * xp.max(1.0) {
            return self.stale(&[i], "piston", t);
        }
        self.store.advance(i, t);
        self.store.set_position_component(i, 0, plane);
        let new_vx = 2.0 * vp - v[0];
        let mut v2 = v;
        v2[0] = new_vx;
        self.store.set_velocity(i, v2)?;
        let work = 0.5 * mass * (new_vx * new_vx - v[0] * v[0]);
        self.work_total += work;
        self.reschedule(&[i])?;
        Ok(Some(EngineEvent::WallHit {
            time: t,
            i,
            kind,
            contact: Contact::Piston,
            impulse: mass * (v[0] - new_vx).abs(),
            work,
            heat: 0.0,
        }))
    }

    fn resolve_piston_halt(&mut self, t: f64) -> Result<Option<EngineEvent>> {
        let Some(p) = self.arena.piston_mut() else {
            return Ok(None);
        };
        p.arrive(t);
        let position = p.position_at(t);
        log::debug!("piston halted at {position:.4} nm, t = {t:.4}");
        self.rebuild_event_queue()?;
        Ok(Some(EngineEvent::PistonHalt { time: t, position }))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ParticleTypeConfig, ReservoirConfig, SimConfig};
    use crate::core::arena::{ArenaKind, Direction};
    use crate::core::frame::{Contact, EngineEvent};
    use crate::core::reaction::ReactionRelationship;
    use crate::core::sim::Simulation;
    use crate::error::Result;

    fn pair_sim(types: Vec<ParticleTypeConfig>) -> Result<Simulation> {
        let cfg = SimConfig {
            dimension: 1,
            extents: [20.0, 0.0, 0.0],
            particle_types: types,
            seed: Some(7),
            ..SimConfig::default()
        };
        Simulation::new(&cfg)
    }

    #[test]
    fn elastic_head_on_unequal_masses() -> Result<()> {
        let mut sim = pair_sim(vec![
            ParticleTypeConfig::new("light", 0.2, 1.0, 1),
            ParticleTypeConfig::new("heavy", 0.2, 3.0, 1),
        ])?;
        sim.place(0, [8.0, 0.0, 0.0], [1.0, 0.0, 0.0])?;
        sim.place(1, [12.0, 0.0, 0.0], [-1.0, 0.0, 0.0])?;
        let ev = sim.step(10.0)?.expect("collision first");
        assert!(matches!(ev, EngineEvent::Collision { reacted: false, .. }));
        assert!((sim.time() - 1.8).abs() < 1e-12);
        // u_n = -2: v0' = 1 + 1.5*(-2) = -2, v1' = -1 + 0.5*2 = 0
        assert!((sim.particle(0)?.v[0] + 2.0).abs() < 1e-12);
        assert!(sim.particle(1)?.v[0].abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn reaction_conserves_momentum_and_energy_budget() -> Result<()> {
        let cfg = SimConfig {
            dimension: 1,
            extents: [20.0, 0.0, 0.0],
            particle_types: vec![
                ParticleTypeConfig::new("A", 0.2, 2.0, 1),
                ParticleTypeConfig::new("B", 0.2, 4.0, 1),
                ParticleTypeConfig::new("C", 0.2, 3.0, 0),
                ParticleTypeConfig::new("D", 0.2, 3.0, 0),
            ],
            reactions: vec![ReactionRelationship {
                reactants: (0, 1),
                products: (2, 3),
                forward_activation: 1.0,
                reverse_activation: 3.0,
                suppress_reverse: false,
            }],
            seed: Some(1),
            ..SimConfig::default()
        };
        let mut sim = Simulation::new(&cfg)?;
        sim.place(0, [8.0, 0.0, 0.0], [2.0, 0.0, 0.0])?;
        sim.place(1, [12.0, 0.0, 0.0], [-1.0, 0.0, 0.0])?;
        let p0 = sim.momentum()[0];
        let e0 = sim.kinetic_energy();
        let ev = sim.step(10.0)?.expect("collision first");
        let EngineEvent::Collision { reacted, kinds_after, .. } = ev else {
            panic!("expected a collision, got {ev:?}");
        };
        assert!(reacted);
        assert_eq!(kinds_after, [2, 3]);
        assert!((sim.momentum()[0] - p0).abs() < 1e-10);
        // released = 3 - 1
        assert!((sim.kinetic_energy() - e0 - 2.0).abs() < 1e-10);
        Ok(())
    }

    #[test]
    fn reaction_below_barrier_is_elastic() -> Result<()> {
        let cfg = SimConfig {
            dimension: 1,
            extents: [20.0, 0.0, 0.0],
            particle_types: vec![
                ParticleTypeConfig::new("A", 0.2, 2.0, 1),
                ParticleTypeConfig::new("B", 0.2, 2.0, 1),
            ],
            reactions: vec![ReactionRelationship {
                reactants: (0, 1),
                products: (1, 0),
                forward_activation: 100.0,
                reverse_activation: 100.0,
                suppress_reverse: true,
            }],
            seed: Some(1),
            ..SimConfig::default()
        };
        let mut sim = Simulation::new(&cfg)?;
        sim.place(0, [8.0, 0.0, 0.0], [1.0, 0.0, 0.0])?;
        sim.place(1, [12.0, 0.0, 0.0], [-1.0, 0.0, 0.0])?;
        let ev = sim.step(10.0)?.expect("collision");
        assert!(matches!(ev, EngineEvent::Collision { reacted: false, .. }));
        Ok(())
    }

    #[test]
    fn reservoir_wall_records_heat() -> Result<()> {
        let cfg = SimConfig {
            dimension: 1,
            extents: [20.0, 0.0, 0.0],
            particle_types: vec![ParticleTypeConfig::new("A", 0.2, 4.0, 1)],
            reservoir: Some(ReservoirConfig {
                wall: 0,
                temperature: 1000.0,
            }),
            seed: Some(11),
            ..SimConfig::default()
        };
        let mut sim = Simulation::new(&cfg)?;
        sim.place(0, [5.0, 0.0, 0.0], [-1.0, 0.0, 0.0])?;
        let e0 = sim.kinetic_energy();
        let ev = sim.step(100.0)?.expect("wall hit");
        let EngineEvent::WallHit { contact, heat, .. } = ev else {
            panic!("expected a wall hit, got {ev:?}");
        };
        assert_eq!(contact, Contact::Wall(0));
        assert!(sim.particle(0)?.v[0] >= 0.0);
        assert!((sim.kinetic_energy() - e0 - heat).abs() < 1e-12);
        assert_eq!(sim.heat_total(), heat);
        Ok(())
    }

    #[test]
    fn moving_piston_does_work() -> Result<()> {
        let cfg = SimConfig {
            dimension: 1,
            extents: [20.0, 0.0, 0.0],
            arena: ArenaKind::Piston,
            particle_types: vec![ParticleTypeConfig::new("A", 0.2, 4.0, 1)],
            seed: Some(2),
            ..SimConfig::default()
        };
        let mut sim = Simulation::new(&cfg)?;
        sim.place(0, [10.0, 0.0, 0.0], [1.0, 0.0, 0.0])?;
        sim.move_piston(5.0, 0.5)?;
        let ev = sim.step(100.0)?.expect("piston contact");
        let EngineEvent::WallHit { contact, work, .. } = ev else {
            panic!("expected a wall hit, got {ev:?}");
        };
        assert_eq!(contact, Contact::Piston);
        // v' = 2 * (-0.5) - 1 = -2
        assert!((sim.particle(0)?.v[0] + 2.0).abs() < 1e-12);
        assert!((work - 0.5 * 4.0 * (4.0 - 1.0)).abs() < 1e-12);
        Ok(())
    }

    fn holed(demon: bool) -> Result<Simulation> {
        let cfg = SimConfig {
            dimension: 2,
            extents: [12.0, 12.0, 0.0],
            arena: ArenaKind::Divided,
            hole_diameter: Some(2.0),
            demon,
            demon_direction: Direction::LeftToRight,
            particle_types: vec![ParticleTypeConfig::new("A", 0.3, 1.0, 1)],
            seed: Some(3),
            ..SimConfig::default()
        };
        Simulation::new(&cfg)
    }

    #[test]
    fn rim_turns_back_lateral_motion() -> Result<()> {
        let mut sim = holed(false)?;
        sim.place(0, [6.1, 6.0, 0.0], [0.1, 1.0, 0.0])?;
        let ev = sim.step(5.0)?.expect("rim first");
        assert!(matches!(
            ev,
            EngineEvent::WallHit { contact: Contact::Divider, .. }
        ));
        assert!((sim.time() - 0.7).abs() < 1e-9);
        let p = sim.particle(0)?;
        assert!((p.r[1] - 6.7).abs() < 1e-9);
        assert!((p.v[0] - 0.1).abs() < 1e-12);
        assert!((p.v[1] + 1.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn demon_reflects_body_inside_hole() -> Result<()> {
        let mut sim = holed(true)?;
        sim.place(0, [6.1, 6.0, 0.0], [-1.0, 0.0, 0.0])?;
        assert_eq!(sim.side_counts(), [0, 1]);
        let ev = sim.step(0.5)?.expect("plane first");
        assert!(matches!(
            ev,
            EngineEvent::WallHit { contact: Contact::Divider, .. }
        ));
        assert!((sim.time() - 0.1).abs() < 1e-9);
        assert!((sim.particle(0)?.v[0] - 1.0).abs() < 1e-12);
        assert_eq!(sim.side_counts(), [0, 1]);
        Ok(())
    }
}
