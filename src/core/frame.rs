//! What the engine reports outward: resolved events and whole-system frames.

use crate::core::arena::{ArenaKind, Direction, Side};
use crate::core::particle::Particle;
use crate::core::vector::Vec3;

/// Surface a particle bounced off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    Wall(u32),
    Divider,
    Piston,
}

/// One resolved event, as seen by observers such as the statistics engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Two particles collided, possibly reacting.
    Collision {
        time: f64,
        i: usize,
        j: usize,
        kinds_before: [usize; 2],
        kinds_after: [usize; 2],
        /// Path length each particle covered since its previous collision.
        free_paths: [f64; 2],
        /// Time each particle spent since its previous collision.
        free_times: [f64; 2],
        /// `r_ij . dp_j` of the exchanged impulse.
        virial: f64,
        reacted: bool,
    },
    /// A particle bounced off a wall, the divider or the piston.
    WallHit {
        time: f64,
        i: usize,
        kind: usize,
        contact: Contact,
        /// Magnitude of the momentum transferred to the surface.
        impulse: f64,
        /// Work done on the particle by a moving piston.
        work: f64,
        /// Energy taken from a heat reservoir.
        heat: f64,
    },
    /// A particle left the periodic cell through `wall_id` and re-entered opposite.
    Wrap {
        time: f64,
        i: usize,
        kind: usize,
        wall_id: u32,
    },
    /// A particle passed through the hole in the divider.
    HoleCrossing {
        time: f64,
        i: usize,
        kind: usize,
        from: Side,
    },
    /// The piston reached its target.
    PistonHalt { time: f64, position: f64 },
}

impl EngineEvent {
    pub fn time(&self) -> f64 {
        match *self {
            EngineEvent::Collision { time, .. }
            | EngineEvent::WallHit { time, .. }
            | EngineEvent::Wrap { time, .. }
            | EngineEvent::HoleCrossing { time, .. }
            | EngineEvent::PistonHalt { time, .. } => time,
        }
    }
}

/// Consistent picture of the whole system at one simulated time.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub time: f64,
    pub dim: usize,
    pub arena: ArenaKind,
    pub extents: Vec3,
    pub piston_position: Option<f64>,
    pub piston_velocity: Option<f64>,
    pub divider_position: Option<f64>,
    pub hole_diameter: Option<f64>,
    pub demon: Option<Direction>,
    pub reservoir_temperature: Option<f64>,
    /// Enclosed length, area or volume.
    pub volume: f64,
    /// Wall area that takes momentum from the gas (0 for a periodic cell).
    pub pressure_area: f64,
    pub particles: Vec<Particle>,
    /// Particles per type.
    pub counts: Vec<usize>,
    /// Particles left and right of the divider.
    pub side_counts: [usize; 2],
    pub kinetic_energy: f64,
    pub temperature: f64,
    pub events_resolved: u64,
    pub work_total: f64,
    pub heat_total: f64,
}

impl FrameInfo {
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    /// Particles of any kind in `kinds`.
    pub fn particles_of<'a>(&'a self, kinds: &'a [usize]) -> impl Iterator<Item = &'a Particle> + 'a {
        self.particles.iter().filter(move |p| kinds.contains(&p.kind))
    }
}
