use crate::core::vector::{norm_sq, Vec3};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Wall id of the piston face (max face of the x axis).
pub const PISTON_WALL: u32 = 1;

/// Overall arena layout.
///
/// Walls are implicitly represented by axis-aligned planes:
/// - For axis k, wall_id = 2*k (min wall at x_k = 0), wall_id = 2*k+1 (max wall at x_k = L_k).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaKind {
    /// Every axis wraps around.
    Periodic,
    /// Every wall reflects.
    Reflecting,
    /// Reflecting box split at `x = L_x / 2` by a divider, optionally with a hole.
    Divided,
    /// Reflecting box whose x-max wall is a movable piston.
    Piston,
}

/// Behavior of one wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Periodic,
    Reflecting,
    /// Reflecting wall that thermalizes the normal velocity.
    Reservoir,
    Piston,
}

/// Half of a divided arena a particle's centre is in. Undivided arenas use `Left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[default]
    Left,
    Right,
}

impl Side {
    #[inline]
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

/// Direction of a crossing through the divider hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    LeftToRight,
    RightToLeft,
}

impl Direction {
    /// Direction of a crossing that starts on `side`.
    pub fn leaving(side: Side) -> Direction {
        match side {
            Side::Left => Direction::LeftToRight,
            Side::Right => Direction::RightToLeft,
        }
    }
}

/// Heat-reservoir wall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reservoir {
    pub wall: u32,
    pub temperature: f64,
}

/// Movable x-max wall moving at constant velocity toward a target, then resting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Piston {
    position: f64,
    velocity: f64,
    t_ref: f64,
    target: f64,
    min_position: f64,
    max_position: f64,
}

impl Piston {
    fn new(max_position: f64) -> Self {
        Self {
            position: max_position,
            velocity: 0.0,
            t_ref: 0.0,
            target: max_position,
            min_position: 0.0,
            max_position,
        }
    }

    #[inline]
    pub fn position_at(&self, t: f64) -> f64 {
        self.position + self.velocity * (t - self.t_ref)
    }

    #[inline]
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    #[inline]
    pub fn target(&self) -> f64 {
        self.target
    }

    #[inline]
    pub fn min_position(&self) -> f64 {
        self.min_position
    }

    /// Absolute time at which a moving piston reaches its target.
    pub fn halt_time(&self) -> Option<f64> {
        if self.velocity == 0.0 {
            return None;
        }
        let dt = (self.target - self.position) / self.velocity;
        Some(self.t_ref + dt.max(0.0))
    }

    pub(crate) fn set_min_position(&mut self, x: f64) {
        self.min_position = x.min(self.max_position);
    }

    /// Start moving toward `target` (clamped to the allowed travel) at `speed`.
    pub(crate) fn retarget(&mut self, now: f64, target: f64, speed: f64) -> Result<()> {
        if !target.is_finite() {
            return Err(Error::InvalidParam("piston target must be finite".into()));
        }
        if !speed.is_finite() || speed <= 0.0 {
            return Err(Error::InvalidParam("piston speed must be finite and > 0".into()));
        }
        let here = self.position_at(now);
        let target = target.clamp(self.min_position, self.max_position);
        self.position = here;
        self.t_ref = now;
        self.target = target;
        self.velocity = if (target - here).abs() <= f64::EPSILON * self.max_position {
            0.0
        } else {
            speed.copysign(target - here)
        };
        Ok(())
    }

    /// Stop where it is at `now`.
    pub(crate) fn halt(&mut self, now: f64) {
        let here = self.position_at(now);
        self.position = here;
        self.t_ref = now;
        self.target = here;
        self.velocity = 0.0;
    }

    /// Stop exactly at the target (used when the halt event fires).
    pub(crate) fn arrive(&mut self, now: f64) {
        self.position = self.target;
        self.t_ref = now;
        self.velocity = 0.0;
    }
}

/// Simulation domain: axis-aligned box in 1, 2 or 3 dimensions.
#[derive(Debug, Clone)]
pub struct Arena {
    dim: usize,
    extents: Vec3,
    kind: ArenaKind,
    hole_diameter: Option<f64>,
    demon: bool,
    demon_direction: Direction,
    piston: Option<Piston>,
    reservoir: Option<Reservoir>,
}

impl Arena {
    /// Create an arena of dimension `dim` with edge lengths `extents` (only the first
    /// `dim` components are used).
    pub fn new(dim: usize, extents: Vec3, kind: ArenaKind) -> Result<Self> {
        if !(1..=3).contains(&dim) {
            return Err(Error::InvalidParam(format!(
                "dimension must be 1, 2 or 3 (got {dim})"
            )));
        }
        let mut ext = [0.0_f64; 3];
        for k in 0..dim {
            let l = extents[k];
            if !l.is_finite() || l <= 0.0 {
                return Err(Error::InvalidParam(
                    "arena extents must be finite and > 0".into(),
                ));
            }
            ext[k] = l;
        }
        let piston = (kind == ArenaKind::Piston).then(|| Piston::new(ext[0]));
        Ok(Self {
            dim,
            extents: ext,
            kind,
            hole_diameter: None,
            demon: false,
            demon_direction: Direction::LeftToRight,
            piston,
            reservoir: None,
        })
    }

    /// Open a hole of `diameter` in the divider.
    pub fn with_hole(mut self, diameter: f64) -> Result<Self> {
        if self.kind != ArenaKind::Divided {
            return Err(Error::InvalidParam(
                "a hole needs a divided arena".into(),
            ));
        }
        if !diameter.is_finite() || diameter <= 0.0 {
            return Err(Error::InvalidParam(
                "hole diameter must be finite and > 0".into(),
            ));
        }
        self.hole_diameter = Some(diameter);
        Ok(self)
    }

    /// Make `wall` a heat reservoir at `temperature`.
    pub fn with_reservoir(mut self, wall: u32, temperature: f64) -> Result<Self> {
        if wall as usize >= 2 * self.dim {
            return Err(Error::InvalidParam(format!(
                "wall {wall} does not exist in {} dimensions",
                self.dim
            )));
        }
        if self.kind == ArenaKind::Periodic {
            return Err(Error::InvalidParam(
                "a periodic arena has no walls to hold a reservoir".into(),
            ));
        }
        if self.kind == ArenaKind::Piston && wall == PISTON_WALL {
            return Err(Error::InvalidParam(
                "the piston face cannot be a reservoir".into(),
            ));
        }
        check_temperature(temperature)?;
        self.reservoir = Some(Reservoir { wall, temperature });
        Ok(self)
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn extents(&self) -> Vec3 {
        self.extents
    }

    #[inline]
    pub fn kind(&self) -> ArenaKind {
        self.kind
    }

    #[inline]
    pub fn hole_diameter(&self) -> Option<f64> {
        self.hole_diameter
    }

    #[inline]
    pub fn piston(&self) -> Option<&Piston> {
        self.piston.as_ref()
    }

    #[inline]
    pub(crate) fn piston_mut(&mut self) -> Option<&mut Piston> {
        self.piston.as_mut()
    }

    #[inline]
    pub fn reservoir(&self) -> Option<Reservoir> {
        self.reservoir
    }

    pub fn demon(&self) -> Option<Direction> {
        self.demon.then_some(self.demon_direction)
    }

    pub(crate) fn set_demon(&mut self, enabled: bool, direction: Direction) {
        self.demon = enabled;
        self.demon_direction = direction;
    }

    pub(crate) fn set_reservoir_temperature(&mut self, temperature: f64) -> Result<()> {
        check_temperature(temperature)?;
        match self.reservoir.as_mut() {
            Some(r) => {
                r.temperature = temperature;
                Ok(())
            }
            None => Err(Error::InvalidParam(
                "arena has no heat-reservoir wall".into(),
            )),
        }
    }

    /// Boundary behavior of `wall_id`.
    pub fn boundary(&self, wall_id: u32) -> Boundary {
        if self.kind == ArenaKind::Periodic {
            return Boundary::Periodic;
        }
        if self.kind == ArenaKind::Piston && wall_id == PISTON_WALL {
            return Boundary::Piston;
        }
        match self.reservoir {
            Some(r) if r.wall == wall_id => Boundary::Reservoir,
            _ => Boundary::Reflecting,
        }
    }

    /// x position of the divider plane.
    pub fn divider_position(&self) -> Option<f64> {
        (self.kind == ArenaKind::Divided).then(|| 0.5 * self.extents[0])
    }

    /// Whether a body of `radius` centred at `r` fits through the hole.
    ///
    /// The hole is centred on the lateral midpoint of the divider. In one
    /// dimension it spans the whole cross-section.
    pub fn hole_admits(&self, r: &Vec3, radius: f64) -> bool {
        match self.hole_clearance(radius) {
            Some(cl) => norm_sq(&self.hole_offset(r)) <= cl * cl,
            None => false,
        }
    }

    /// How far a body's centre may stray from the hole axis while passing through.
    pub fn hole_clearance(&self, radius: f64) -> Option<f64> {
        let cl = 0.5 * self.hole_diameter? - radius;
        (cl >= 0.0).then_some(cl)
    }

    /// Lateral offset of `r` from the hole axis; the x component is zero.
    pub fn hole_offset(&self, r: &Vec3) -> Vec3 {
        let mut o = [0.0; 3];
        for k in 1..self.dim {
            o[k] = r[k] - 0.5 * self.extents[k];
        }
        o
    }

    /// Whether a point on the divider plane lies inside the hole.
    pub fn point_in_hole(&self, r: &Vec3) -> bool {
        self.hole_admits(r, 0.0)
    }

    /// Whether a crossing starting on `from` is allowed by the demon.
    pub fn crossing_permitted(&self, from: Side) -> bool {
        !self.demon || Direction::leaving(from) == self.demon_direction
    }

    /// Current length of `axis` (the piston shortens the x axis).
    pub fn length_at(&self, axis: usize, t: f64) -> f64 {
        match (axis, &self.piston) {
            (0, Some(p)) => p.position_at(t),
            _ => self.extents[axis],
        }
    }

    /// Enclosed volume (length, area or volume) at time `t`.
    pub fn volume_at(&self, t: f64) -> f64 {
        (0..self.dim).map(|k| self.length_at(k, t)).product()
    }

    /// x range `[lo, hi]` of a side; the whole box when undivided.
    pub fn side_range(&self, side: Side) -> (f64, f64) {
        match (self.divider_position(), side) {
            (Some(x), Side::Left) => (0.0, x),
            (Some(x), Side::Right) => (x, self.extents[0]),
            (None, _) => (0.0, self.length_at(0, 0.0)),
        }
    }

    /// Area of one wall at time `t` (1 in one dimension).
    pub fn wall_area(&self, wall_id: u32, t: f64) -> f64 {
        let axis = (wall_id / 2) as usize;
        (0..self.dim)
            .filter(|&k| k != axis)
            .map(|k| self.length_at(k, t))
            .product()
    }

    /// Total area of the walls that take momentum from the gas.
    pub fn pressure_area(&self, t: f64) -> f64 {
        (0..(2 * self.dim) as u32)
            .filter(|&w| self.boundary(w) != Boundary::Periodic)
            .map(|w| self.wall_area(w, t))
            .sum()
    }
}

fn check_temperature(temperature: f64) -> Result<()> {
    if !temperature.is_finite() || temperature <= 0.0 {
        return Err(Error::InvalidParam(
            "temperature must be finite and > 0".into(),
        ));
    }
    Ok(())
}

/// Axis and side of a wall id.
#[inline]
pub fn wall_axis_side(wall_id: u32) -> (usize, bool) {
    let axis = (wall_id / 2) as usize;
    let is_max = wall_id % 2 == 1;
    (axis, is_max)
}
