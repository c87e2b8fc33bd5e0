use crate::core::arena::Side;
use crate::core::vector::{add_scaled, norm_sq, Vec3};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Hard-body species shared by every particle of that kind.
///
/// Fields:
/// - `name`: label shown by front-ends
/// - `radius`: hard-body radius in nm (> 0)
/// - `mass`: mass in amu (> 0)
/// - `color`: display color (RGB)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleType {
    pub name: String,
    pub radius: f64,
    pub mass: f64,
    #[serde(default = "default_color")]
    pub color: [u8; 3],
}

fn default_color() -> [u8; 3] {
    [70, 130, 180]
}

impl ParticleType {
    /// Create a new type after validating invariants.
    ///
    /// Errors:
    /// - `Error::InvalidParam` if `radius` or `mass` is non-positive or not finite.
    pub fn new(name: impl Into<String>, radius: f64, mass: f64) -> Result<Self> {
        let t = Self {
            name: name.into(),
            radius,
            mass,
            color: default_color(),
        };
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(Error::InvalidParam(format!(
                "radius of type '{}' must be finite and > 0",
                self.name
            )));
        }
        if !self.mass.is_finite() || self.mass <= 0.0 {
            return Err(Error::InvalidParam(format!(
                "mass of type '{}' must be finite and > 0",
                self.name
            )));
        }
        Ok(())
    }

    /// Volume of one body in `dim` dimensions (length, area or volume).
    pub fn volume(&self, dim: usize) -> f64 {
        body_volume(self.radius, dim)
    }
}

/// Length of a rod, area of a disc or volume of a sphere of radius `r`.
pub fn body_volume(r: f64, dim: usize) -> f64 {
    match dim {
        1 => 2.0 * r,
        2 => PI * r * r,
        _ => 4.0 / 3.0 * PI * r * r * r,
    }
}

/// Value view of one particle at a given time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub kind: usize,
    pub r: Vec3,
    pub v: Vec3,
}

impl Particle {
    /// 1/2 m |v|^2 for a particle of mass `mass`.
    #[inline]
    pub fn kinetic_energy(&self, mass: f64) -> f64 {
        0.5 * mass * norm_sq(&self.v)
    }

    #[inline]
    pub fn speed(&self) -> f64 {
        norm_sq(&self.v).sqrt()
    }
}

/// Parallel per-particle arrays.
///
/// Positions are stored at a per-particle reference time `t_ref`; the position
/// at time `t` is `r + v (t - t_ref)`. Only the resolver moves the reference
/// time, so reading positions for a frame never changes state.
#[derive(Debug, Clone, Default)]
pub struct ParticleStore {
    kind: Vec<usize>,
    r: Vec<Vec3>,
    v: Vec<Vec3>,
    t_ref: Vec<f64>,
    /// Time of the last particle-particle collision.
    last_collision: Vec<f64>,
    /// Path length travelled since the last particle-particle collision, up to `t_ref`.
    path: Vec<f64>,
    side: Vec<Side>,
}

impl ParticleStore {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            kind: Vec::with_capacity(n),
            r: Vec::with_capacity(n),
            v: Vec::with_capacity(n),
            t_ref: Vec::with_capacity(n),
            last_collision: Vec::with_capacity(n),
            path: Vec::with_capacity(n),
            side: Vec::with_capacity(n),
        }
    }

    /// Append a particle at time `t`. Returns its slot.
    pub fn push(&mut self, kind: usize, r: Vec3, v: Vec3, side: Side, t: f64) -> Result<usize> {
        if !r.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("position must be finite".into()));
        }
        if !v.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("velocity must be finite".into()));
        }
        self.kind.push(kind);
        self.r.push(r);
        self.v.push(v);
        self.t_ref.push(t);
        self.last_collision.push(t);
        self.path.push(0.0);
        self.side.push(side);
        Ok(self.kind.len() - 1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.kind.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty()
    }

    #[inline]
    pub fn kind(&self, i: usize) -> usize {
        self.kind[i]
    }

    #[inline]
    pub fn velocity(&self, i: usize) -> Vec3 {
        self.v[i]
    }

    #[inline]
    pub fn side(&self, i: usize) -> Side {
        self.side[i]
    }

    /// Position of particle `i` at absolute time `t` by straight-line motion.
    #[inline]
    pub fn position_at(&self, i: usize, t: f64) -> Vec3 {
        add_scaled(&self.r[i], &self.v[i], t - self.t_ref[i])
    }

    /// Particle `i` as seen at time `t`.
    pub fn particle_at(&self, i: usize, t: f64) -> Particle {
        Particle {
            kind: self.kind[i],
            r: self.position_at(i, t),
            v: self.v[i],
        }
    }

    /// Slots currently holding particles of `kind`.
    pub fn slots_of(&self, kind: usize) -> impl Iterator<Item = usize> + '_ {
        self.kind
            .iter()
            .enumerate()
            .filter(move |&(_, &k)| k == kind)
            .map(|(i, _)| i)
    }

    pub fn count_of(&self, kind: usize) -> usize {
        self.kind.iter().filter(|&&k| k == kind).count()
    }

    /// Move the reference of particle `i` forward to `t`, accumulating path length.
    pub fn advance(&mut self, i: usize, t: f64) {
        let dt = t - self.t_ref[i];
        if dt != 0.0 {
            self.r[i] = add_scaled(&self.r[i], &self.v[i], dt);
            self.path[i] += norm_sq(&self.v[i]).sqrt() * dt.abs();
            self.t_ref[i] = t;
        }
    }

    /// Overwrite the position at the current reference time.
    pub fn set_position(&mut self, i: usize, r: Vec3) -> Result<()> {
        if !r.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("position must be finite".into()));
        }
        self.r[i] = r;
        Ok(())
    }

    /// Set one position component at the current reference time.
    #[inline]
    pub fn set_position_component(&mut self, i: usize, axis: usize, x: f64) {
        self.r[i][axis] = x;
    }

    pub fn set_velocity(&mut self, i: usize, v: Vec3) -> Result<()> {
        if !v.iter().all(|x| x.is_finite()) {
            return Err(Error::MathError(format!(
                "non-finite velocity for particle {i}"
            )));
        }
        self.v[i] = v;
        Ok(())
    }

    #[inline]
    pub fn set_kind(&mut self, i: usize, kind: usize) {
        self.kind[i] = kind;
    }

    #[inline]
    pub fn set_side(&mut self, i: usize, side: Side) {
        self.side[i] = side;
    }

    /// Close the free flight of particle `i` at time `t` (which must already be its
    /// reference time) and return `(path length, flight time)`.
    pub fn take_free_flight(&mut self, i: usize, t: f64) -> (f64, f64) {
        let flight = (self.path[i], t - self.last_collision[i]);
        self.path[i] = 0.0;
        self.last_collision[i] = t;
        flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_type_ok() -> Result<()> {
        let t = ParticleType::new("He", 0.1, 4.0)?;
        assert_eq!(t.radius, 0.1);
        assert_eq!(t.mass, 4.0);
        Ok(())
    }

    #[test]
    fn invalid_radius_rejected() {
        let err = ParticleType::new("x", 0.0, 1.0).unwrap_err();
        assert!(err.to_string().contains("radius"));
    }

    #[test]
    fn invalid_mass_rejected() {
        let err = ParticleType::new("x", 1.0, -2.0).unwrap_err();
        assert!(err.to_string().contains("mass"));
    }

    #[test]
    fn body_volume_per_dimension() {
        assert_eq!(body_volume(0.5, 1), 1.0);
        assert!((body_volume(1.0, 2) - PI).abs() < 1e-12);
        assert!((body_volume(1.0, 3) - 4.0 / 3.0 * PI).abs() < 1e-12);
    }

    #[test]
    fn lazy_positions_and_free_flight() -> Result<()> {
        let mut s = ParticleStore::with_capacity(2);
        s.push(0, [1.0, 0.0, 0.0], [3.0, 4.0, 0.0], Side::Left, 0.0)?;
        s.push(1, [5.0, 5.0, 0.0], [0.0, 0.0, 0.0], Side::Left, 0.0)?;
        assert_eq!(s.position_at(0, 2.0), [7.0, 8.0, 0.0]);
        // reading does not move the reference
        assert_eq!(s.position_at(0, 0.0), [1.0, 0.0, 0.0]);

        s.advance(0, 2.0);
        let (path, time) = s.take_free_flight(0, 2.0);
        assert!((path - 10.0).abs() < 1e-12);
        assert_eq!(time, 2.0);
        assert_eq!(s.count_of(1), 1);
        assert_eq!(s.slots_of(0).collect::<Vec<_>>(), vec![0]);
        Ok(())
    }
}
