//! Validated simulation configuration.
//!
//! A `SimConfig` is what a settings front-end hands the engine. It derives
//! serde so it can also be written as TOML:
//!
//! ```toml
//! dimension = 2
//! extents = [20.0, 20.0, 0.0]
//! arena = "divided"
//! hole_diameter = 4.0
//! temperature = 300.0
//!
//! [[particle_types]]
//! name = "He"
//! radius = 0.1
//! mass = 4.0
//! count = 100
//! ```

use crate::core::arena::{Arena, ArenaKind, Direction, Side};
use crate::core::particle::{body_volume, ParticleType};
use crate::core::reaction::{ReactionRelationship, ReactionTable};
use crate::error::{Error, Result};
use crate::stats::StatisticKind;
use serde::{Deserialize, Serialize};

/// Largest fraction of the arena that random placement is asked to fill.
pub fn max_packing(dim: usize) -> f64 {
    match dim {
        1 => 0.5,
        2 => 0.4,
        _ => 0.25,
    }
}

/// One particle type and how many of it to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleTypeConfig {
    pub name: String,
    pub radius: f64,
    pub mass: f64,
    pub count: usize,
    #[serde(default)]
    pub color: Option<[u8; 3]>,
}

impl ParticleTypeConfig {
    pub fn new(name: impl Into<String>, radius: f64, mass: f64, count: usize) -> Self {
        Self {
            name: name.into(),
            radius,
            mass,
            count,
            color: None,
        }
    }

    pub fn to_type(&self) -> Result<ParticleType> {
        let mut t = ParticleType::new(self.name.clone(), self.radius, self.mass)?;
        if let Some(c) = self.color {
            t.color = c;
        }
        Ok(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReservoirConfig {
    pub wall: u32,
    pub temperature: f64,
}

/// A statistic to register at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticRequest {
    pub types: Vec<usize>,
    pub kind: StatisticKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub dimension: usize,
    /// Edge lengths in nm; components beyond `dimension` are ignored.
    pub extents: [f64; 3],
    pub arena: ArenaKind,
    pub hole_diameter: Option<f64>,
    pub demon: bool,
    pub demon_direction: Direction,
    pub particle_types: Vec<ParticleTypeConfig>,
    pub reactions: Vec<ReactionRelationship>,
    /// Initial temperature in K.
    pub temperature: f64,
    pub reservoir: Option<ReservoirConfig>,
    /// Place every particle in one half of a divided arena.
    pub initial_side: Option<Side>,
    /// Evict the largest particles instead of failing when the arena is overcrowded.
    pub evict_excess: bool,
    pub seed: Option<u64>,
    pub statistics: Vec<StatisticRequest>,
    pub finite_size_correction: bool,
    pub real_gas_correction: bool,
    /// Wall-clock time between frames.
    pub frame_interval_ms: u64,
    /// Simulated picoseconds per wall-clock second at speed 1.
    pub time_scale: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dimension: 3,
            extents: [20.0, 20.0, 20.0],
            arena: ArenaKind::Reflecting,
            hole_diameter: None,
            demon: false,
            demon_direction: Direction::LeftToRight,
            particle_types: vec![ParticleTypeConfig::new("He", 0.1, 4.0, 200)],
            reactions: Vec::new(),
            temperature: 300.0,
            reservoir: None,
            initial_side: None,
            evict_excess: true,
            seed: None,
            statistics: Vec::new(),
            finite_size_correction: false,
            real_gas_correction: false,
            frame_interval_ms: 33,
            time_scale: 10.0,
        }
    }
}

impl SimConfig {
    /// Single species of `count` bodies in a reflecting box.
    pub fn single_species(
        dimension: usize,
        extents: [f64; 3],
        count: usize,
        radius: f64,
        mass: f64,
        temperature: f64,
    ) -> Self {
        Self {
            dimension,
            extents,
            particle_types: vec![ParticleTypeConfig::new("A", radius, mass, count)],
            temperature,
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: SimConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn particle_types(&self) -> Result<Vec<ParticleType>> {
        self.particle_types.iter().map(|t| t.to_type()).collect()
    }

    pub fn total_count(&self) -> usize {
        self.particle_types.iter().map(|t| t.count).sum()
    }

    /// Structural validation; nothing is built.
    pub fn validate(&self) -> Result<()> {
        let dim = self.dimension;
        if !(1..=3).contains(&dim) {
            return Err(Error::InvalidConfig(format!(
                "dimension must be 1, 2 or 3 (got {dim})"
            )));
        }
        if self.extents[..dim].iter().any(|l| !l.is_finite() || *l <= 0.0) {
            return Err(Error::InvalidConfig(
                "arena extents must be finite and > 0".into(),
            ));
        }
        if self.particle_types.is_empty() || self.total_count() == 0 {
            return Err(Error::InvalidConfig("particle set is empty".into()));
        }
        if self.particle_types.len() > 64 {
            return Err(Error::InvalidConfig(
                "at most 64 particle types are supported".into(),
            ));
        }
        let types = self
            .particle_types()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let min_extent = self.extents[..dim]
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let half_x = match self.arena {
            ArenaKind::Divided => 0.5 * self.extents[0],
            _ => self.extents[0],
        };
        for t in &types {
            if 2.0 * t.radius >= min_extent.min(half_x) {
                return Err(Error::InvalidConfig(format!(
                    "type '{}' is too large for the arena",
                    t.name
                )));
            }
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(Error::InvalidConfig(
                "temperature must be finite and > 0".into(),
            ));
        }
        if self.hole_diameter.is_some() && self.arena != ArenaKind::Divided {
            return Err(Error::InvalidConfig(
                "hole_diameter requires a divided arena".into(),
            ));
        }
        if (self.demon || self.initial_side.is_some()) && self.arena != ArenaKind::Divided {
            return Err(Error::InvalidConfig(
                "demon mode and initial_side require a divided arena".into(),
            ));
        }
        if self.frame_interval_ms == 0 {
            return Err(Error::InvalidConfig("frame_interval_ms must be > 0".into()));
        }
        if !self.time_scale.is_finite() || self.time_scale <= 0.0 {
            return Err(Error::InvalidConfig("time_scale must be > 0".into()));
        }
        for req in &self.statistics {
            if req.types.is_empty() || req.types.iter().any(|&k| k >= types.len()) {
                return Err(Error::InvalidConfig(format!(
                    "statistic {:?} names no or unknown particle types",
                    req.kind
                )));
            }
            if let StatisticKind::VelocityComponent(axis) = req.kind {
                if axis >= dim {
                    return Err(Error::InvalidConfig(format!(
                        "velocity axis {axis} does not exist in {dim} dimensions"
                    )));
                }
            }
        }
        ReactionTable::new(self.reactions.clone(), &types)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        self.build_arena()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(())
    }

    /// Arena described by this configuration.
    pub fn build_arena(&self) -> Result<Arena> {
        let mut arena = Arena::new(self.dimension, self.extents, self.arena)?;
        if let Some(d) = self.hole_diameter {
            arena = arena.with_hole(d)?;
        }
        if let Some(r) = self.reservoir {
            arena = arena.with_reservoir(r.wall, r.temperature)?;
        }
        arena.set_demon(self.demon, self.demon_direction);
        Ok(arena)
    }

    /// Volume the particles are initially placed in.
    pub fn placement_volume(&self) -> f64 {
        let full: f64 = self.extents[..self.dimension].iter().product();
        match (self.arena, self.initial_side) {
            (ArenaKind::Divided, Some(_)) => 0.5 * full,
            _ => full,
        }
    }

    /// Reduce counts until the bodies fit, largest radius first.
    ///
    /// Returns `(type index, removed)` per eviction. Fails when eviction is disabled
    /// and the arena is overcrowded, or when nothing is left.
    pub fn fit_to_arena(&mut self) -> Result<Vec<(usize, usize)>> {
        let dim = self.dimension;
        let capacity = max_packing(dim) * self.placement_volume();
        let volumes: Vec<f64> = self
            .particle_types
            .iter()
            .map(|t| body_volume(t.radius, dim))
            .collect();
        let mut occupied: f64 = self
            .particle_types
            .iter()
            .zip(&volumes)
            .map(|(t, v)| t.count as f64 * v)
            .sum();
        let mut evicted = Vec::new();
        while occupied > capacity {
            if !self.evict_excess {
                return Err(Error::Overcrowded(format!(
                    "bodies fill {:.1}% of the arena (limit {:.0}%)",
                    100.0 * occupied / self.placement_volume(),
                    100.0 * max_packing(dim)
                )));
            }
            let Some(k) = (0..self.particle_types.len())
                .filter(|&k| self.particle_types[k].count > 0)
                .max_by(|&a, &b| {
                    self.particle_types[a]
                        .radius
                        .total_cmp(&self.particle_types[b].radius)
                        .then(b.cmp(&a))
                })
            else {
                break;
            };
            let need = ((occupied - capacity) / volumes[k]).ceil() as usize;
            let remove = need.clamp(1, self.particle_types[k].count);
            self.particle_types[k].count -= remove;
            occupied -= remove as f64 * volumes[k];
            log::warn!(
                "arena overcrowded: evicted {} particles of type '{}'",
                remove,
                self.particle_types[k].name
            );
            evicted.push((k, remove));
        }
        if self.total_count() == 0 {
            return Err(Error::Overcrowded(
                "no particles fit in the arena".into(),
            ));
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() -> Result<()> {
        SimConfig::default().validate()
    }

    #[test]
    fn empty_particle_set_rejected() {
        let mut c = SimConfig::default();
        c.particle_types[0].count = 0;
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn non_positive_sizes_rejected() {
        let mut c = SimConfig::default();
        c.extents[1] = 0.0;
        assert!(c.validate().is_err());

        let mut c = SimConfig::default();
        c.particle_types[0].radius = -1.0;
        assert!(c.validate().is_err());

        let mut c = SimConfig::default();
        c.temperature = 0.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn divided_only_options() {
        let mut c = SimConfig::default();
        c.hole_diameter = Some(2.0);
        assert!(c.validate().is_err());
        c.arena = ArenaKind::Divided;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn eviction_removes_largest_radius_first() -> Result<()> {
        let mut c = SimConfig {
            dimension: 2,
            extents: [10.0, 10.0, 0.0],
            particle_types: vec![
                ParticleTypeConfig::new("small", 0.1, 1.0, 100),
                ParticleTypeConfig::new("big", 0.5, 10.0, 100),
            ],
            ..SimConfig::default()
        };
        c.validate()?;
        let evicted = c.fit_to_arena()?;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, 1);
        assert_eq!(c.particle_types[0].count, 100);
        // capacity 40 area units; small ones take ~3.14, each big one ~0.785
        let big = c.particle_types[1].count;
        let occupied = 100.0 * body_volume(0.1, 2) + big as f64 * body_volume(0.5, 2);
        assert!(occupied <= 40.0 + 1e-9);
        assert!(occupied + body_volume(0.5, 2) > 40.0);
        Ok(())
    }

    #[test]
    fn overcrowding_without_eviction_fails() {
        let mut c = SimConfig::single_species(1, [10.0, 0.0, 0.0], 100, 0.1, 1.0, 300.0);
        c.evict_excess = false;
        let err = c.fit_to_arena().unwrap_err();
        assert!(matches!(err, Error::Overcrowded(_)));
    }

    #[test]
    fn toml_round_trip() -> Result<()> {
        let src = r#"
            dimension = 2
            extents = [20.0, 20.0, 0.0]
            arena = "divided"
            hole_diameter = 4.0
            initial_side = "left"
            temperature = 250.0

            [[particle_types]]
            name = "Ar"
            radius = 0.15
            mass = 40.0
            count = 50

            [[statistics]]
            types = [0]
            kind = "speed"
        "#;
        let c = SimConfig::from_toml_str(src)?;
        assert_eq!(c.dimension, 2);
        assert_eq!(c.arena, ArenaKind::Divided);
        assert_eq!(c.initial_side, Some(Side::Left));
        assert_eq!(c.particle_types[0].count, 50);
        assert_eq!(c.statistics[0].kind, StatisticKind::Speed);
        assert_eq!(c.frame_interval_ms, 33);
        Ok(())
    }

    #[test]
    fn bad_toml_is_an_error() {
        let err = SimConfig::from_toml_str("dimension = \"three\"").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }
}
