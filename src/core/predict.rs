//! Contact-time prediction for pairs and boundaries.

use crate::core::arena::{ArenaKind, Side};
use crate::core::event::EventKind;
use crate::core::sim::Simulation;
use crate::core::vector::{add_scaled, dot, norm_sq, scale, Vec3};

/// Small numeric tolerance for time and velocity checks.
pub(crate) const EPS_TIME: f64 = 1e-12;

/// Why a pair has no future contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    /// Identical velocities.
    NoRelativeMotion,
    /// Moving apart along the line of centres.
    Receding,
    /// Closest approach stays outside contact distance.
    Grazing,
    /// The divider is between them at the moment of contact.
    Blocked,
}

/// Whether a body centred at `x` overlaps the divider slab at `xd`.
#[inline]
pub(crate) fn straddles(x: f64, xd: f64, radius: f64) -> bool {
    (x - xd).abs() < radius * (1.0 - 1e-9)
}

/// Time until `|d + u t| = sigma` for an approaching pair, with `a = |u|^2`.
///
/// Uses the cancellation-free form of the smaller root. An overlapping or
/// touching pair that is still approaching collides immediately.
fn contact_time(d: &Vec3, u: &Vec3, a: f64, sigma: f64) -> Result<f64, Miss> {
    let b = dot(d, u);
    if b >= 0.0 {
        return Err(Miss::Receding);
    }
    let c = norm_sq(d) - sigma * sigma;
    let disc = b * b - a * c;
    if disc <= 0.0 {
        return Err(Miss::Grazing);
    }
    if c <= 0.0 {
        return Ok(0.0);
    }
    let t = c / (-b + disc.sqrt());
    Ok(if t < EPS_TIME { 0.0 } else { t })
}

impl Simulation {
    /// Separation vectors to test for a pair: the direct one, plus the nearest
    /// wrapped images on every periodic axis.
    fn images(&self, d0: &Vec3) -> ([Vec3; 8], usize) {
        let mut out = [*d0; 8];
        let mut n = 1;
        if self.arena.kind() == ArenaKind::Periodic {
            let ext = self.arena.extents();
            for k in 0..self.arena.dim() {
                let shift = if d0[k] > 0.0 { -ext[k] } else { ext[k] };
                for m in 0..n {
                    let mut d = out[m];
                    d[k] += shift;
                    out[n + m] = d;
                }
                n *= 2;
            }
        }
        (out, n)
    }

    /// Absolute time of the next contact between `i` and `j`, measured from now.
    ///
    /// Boundary horizons are not applied here; see `schedule_pair`.
    pub fn predict_pair(&self, i: usize, j: usize) -> Result<f64, Miss> {
        let now = self.time_now;
        let ri = self.store.position_at(i, now);
        let rj = self.store.position_at(j, now);
        let vi = self.store.velocity(i);
        let vj = self.store.velocity(j);
        let u = [vj[0] - vi[0], vj[1] - vi[1], vj[2] - vi[2]];
        let a = norm_sq(&u);
        if a <= EPS_TIME {
            return Err(Miss::NoRelativeMotion);
        }
        let sigma = self.types[self.store.kind(i)].radius + self.types[self.store.kind(j)].radius;
        let d0 = [rj[0] - ri[0], rj[1] - ri[1], rj[2] - ri[2]];

        let (images, n) = self.images(&d0);
        let mut best: Option<f64> = None;
        let mut first_miss = Miss::Receding;
        for (m, d) in images[..n].iter().enumerate() {
            match contact_time(d, &u, a, sigma) {
                Ok(t) => best = Some(best.map_or(t, |b| b.min(t))),
                Err(miss) if m == 0 => first_miss = miss,
                Err(_) => {}
            }
        }
        let t_rel = best.ok_or(first_miss)?;
        let t_abs = now + t_rel;

        if self.arena.kind() == ArenaKind::Divided && self.store.side(i) != self.store.side(j) {
            let pi = add_scaled(&ri, &vi, t_rel);
            let pj = add_scaled(&rj, &vj, t_rel);
            let mid = scale(&[pi[0] + pj[0], pi[1] + pj[1], pi[2] + pj[2]], 0.5);
            if !self.arena.point_in_hole(&mid) {
                return Err(Miss::Blocked);
            }
        }
        Ok(t_abs)
    }

    /// Earliest boundary event of particle `i`: wall, wrap, divider, hole or piston.
    pub fn predict_boundary(&self, i: usize) -> Option<(f64, EventKind)> {
        let now = self.time_now;
        let r = self.store.position_at(i, now);
        let v = self.store.velocity(i);
        let radius = self.types[self.store.kind(i)].radius;
        let ext = self.arena.extents();
        let id = i as u32;
        let periodic = self.arena.kind() == ArenaKind::Periodic;

        let mut best: Option<(f64, EventKind)> = None;
        let mut keep = |t_rel: f64, kind: EventKind| {
            let t = now + t_rel.max(0.0);
            if best.map_or(true, |(bt, _)| t < bt) {
                best = Some((t, kind));
            }
        };

        for k in 0..self.arena.dim() {
            let (x, vk, l) = (r[k], v[k], ext[k]);
            let min_wall = (2 * k) as u32;
            let max_wall = min_wall + 1;
            if periodic {
                // wrap when the centre leaves the cell
                if vk > EPS_TIME {
                    keep((l - x) / vk, EventKind::Wall { i: id, wall_id: max_wall });
                } else if vk < -EPS_TIME {
                    keep(-x / vk, EventKind::Wall { i: id, wall_id: min_wall });
                }
                continue;
            }
            if vk < -EPS_TIME {
                keep((radius - x) / vk, EventKind::Wall { i: id, wall_id: min_wall });
            }
            match (k, self.arena.piston()) {
                (0, Some(p)) => {
                    let w = vk - p.velocity();
                    if w > EPS_TIME {
                        keep((p.position_at(now) - radius - x) / w, EventKind::Piston { i: id });
                    }
                }
                _ => {
                    if vk > EPS_TIME {
                        keep((l - radius - x) / vk, EventKind::Wall { i: id, wall_id: max_wall });
                    }
                }
            }
        }

        if let Some(xd) = self.arena.divider_position() {
            let side = self.store.side(i);
            let (x, vx) = (r[0], v[0]);
            let inside = straddles(x, xd, radius);
            let toward = match side {
                Side::Left => vx > EPS_TIME,
                Side::Right => vx < -EPS_TIME,
            };
            if toward {
                // faces of the divider slab the body's surface must clear
                let dir = vx.signum();
                let t_near = ((xd - dir * radius - x) / vx).max(0.0);
                let t_far = (xd + dir * radius - x) / vx;
                // a body already in the hole is kept in it by rim events
                let admitted = inside
                    || (self.arena.crossing_permitted(side)
                        && self.arena.hole_admits(&add_scaled(&r, &v, t_near), radius)
                        && self.arena.hole_admits(&add_scaled(&r, &v, t_far), radius));
                if admitted {
                    keep((xd - x) / vx, EventKind::Hole { i: id });
                } else {
                    keep(t_near, EventKind::Divider { i: id });
                }
            }
            if inside {
                if let Some(t) = self.rim_time(&r, &v, radius, xd) {
                    keep(t, EventKind::Rim { i: id });
                }
            }
        }
        best
    }

    /// Time until a body inside the hole reaches its rim, if that happens
    /// before the body has left the divider slab.
    fn rim_time(&self, r: &Vec3, v: &Vec3, radius: f64, xd: f64) -> Option<f64> {
        let cl = self.arena.hole_clearance(radius)?;
        let o = self.arena.hole_offset(r);
        let mut w = *v;
        w[0] = 0.0;
        let a = norm_sq(&w);
        if a <= EPS_TIME * EPS_TIME {
            return None;
        }
        let b = dot(&o, &w);
        let c = norm_sq(&o) - cl * cl;
        let disc = b * b - a * c;
        if disc < 0.0 {
            return None;
        }
        let t = match (b >= 0.0, c >= 0.0) {
            (true, true) => 0.0,
            (true, false) => -c / (b + disc.sqrt()),
            (false, _) => (-b + disc.sqrt()) / a,
        };
        straddles(r[0] + v[0] * t, xd, radius).then_some(t)
    }

    /// Time at which a moving piston stops.
    pub(crate) fn predict_piston_halt(&self) -> Option<f64> {
        self.arena
            .piston()
            .and_then(|p| p.halt_time())
            .map(|t| t.max(self.time_now))
    }
}
