use crate::error::{Error, Result};
use crate::units::UnitFamily;
use serde::{Deserialize, Serialize};

/// Quantity a statistic measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticKind {
    /// |v|, sampled every frame.
    Speed,
    /// One velocity component, sampled every frame.
    VelocityComponent(usize),
    /// 1/2 m v^2, sampled every frame.
    KineticEnergy,
    /// Distance flown between particle-particle collisions.
    FreePath,
    /// Collisions per particle per unit time.
    CollisionRate,
    /// Time between particle-particle collisions.
    TimePerCollision,
    /// Momentum flux into the walls (or virial pressure in a periodic cell).
    Pressure,
}

impl StatisticKind {
    /// Whether the statistic carries histograms.
    pub fn has_distribution(&self) -> bool {
        !matches!(self, StatisticKind::CollisionRate | StatisticKind::Pressure)
    }

    /// Averages are `sum / elapsed time` rather than `sum / count`.
    pub fn is_rate(&self) -> bool {
        matches!(self, StatisticKind::CollisionRate | StatisticKind::Pressure)
    }

    pub fn unit_family(&self, dim: usize) -> UnitFamily {
        match self {
            StatisticKind::Speed | StatisticKind::VelocityComponent(_) => UnitFamily::Speed,
            StatisticKind::KineticEnergy => UnitFamily::Energy,
            StatisticKind::FreePath => UnitFamily::Length,
            StatisticKind::CollisionRate => UnitFamily::Rate,
            StatisticKind::TimePerCollision => UnitFamily::Time,
            StatisticKind::Pressure => UnitFamily::pressure(dim),
        }
    }

    pub fn label(&self) -> String {
        match self {
            StatisticKind::Speed => "speed".into(),
            StatisticKind::VelocityComponent(axis) => {
                format!("velocity {}", ["x", "y", "z"].get(*axis).unwrap_or(&"?"))
            }
            StatisticKind::KineticEnergy => "kinetic energy".into(),
            StatisticKind::FreePath => "free path".into(),
            StatisticKind::CollisionRate => "collision rate".into(),
            StatisticKind::TimePerCollision => "time per collision".into(),
            StatisticKind::Pressure => "pressure".into(),
        }
    }
}

/// Subset of particle types, as a bit set over type indices (at most 64 types).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TypeSet(u64);

impl TypeSet {
    pub fn single(kind: usize) -> Result<Self> {
        Self::from_kinds(&[kind])
    }

    pub fn from_kinds(kinds: &[usize]) -> Result<Self> {
        let mut bits = 0u64;
        for &k in kinds {
            if k >= 64 {
                return Err(Error::InvalidParam(format!(
                    "type index {k} exceeds the 64-type limit"
                )));
            }
            bits |= 1 << k;
        }
        Ok(Self(bits))
    }

    /// Every one of the first `n` types.
    pub fn all(n: usize) -> Self {
        if n >= 64 {
            Self(u64::MAX)
        } else {
            Self((1u64 << n) - 1)
        }
    }

    #[inline]
    pub fn contains(&self, kind: usize) -> bool {
        kind < 64 && self.0 & (1 << kind) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..64).filter(move |&k| self.contains(k))
    }

    /// Highest type index in the set.
    pub fn max_kind(&self) -> Option<usize> {
        (self.0 != 0).then(|| 63 - self.0.leading_zeros() as usize)
    }
}
