use crate::core::particle::ParticleType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Reversible conversion `A + B <-> C + D` triggered by energetic collisions.
///
/// The forward direction fires when the line-of-centers kinetic energy of an
/// `A`-`B` collision (in the centre-of-mass frame) exceeds
/// `forward_activation`; the reverse direction likewise for `C`-`D` and
/// `reverse_activation` unless `suppress_reverse` is set. The forward reaction
/// releases `reverse_activation - forward_activation` into relative motion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionRelationship {
    pub reactants: (usize, usize),
    pub products: (usize, usize),
    pub forward_activation: f64,
    pub reverse_activation: f64,
    #[serde(default)]
    pub suppress_reverse: bool,
}

/// A reaction that may fire for a specific colliding pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReactionCandidate {
    /// Energy the line-of-centers motion must exceed.
    pub activation: f64,
    /// New kinds of the first and second colliding particle, in call order.
    pub products: (usize, usize),
    /// Kinetic energy gained (negative: absorbed) when the reaction fires.
    pub released: f64,
}

/// Reaction relationships indexed for lookup by colliding kinds.
#[derive(Debug, Clone, Default)]
pub struct ReactionTable {
    reactions: Vec<ReactionRelationship>,
}

impl ReactionTable {
    /// Validate relationships against the type list.
    ///
    /// Errors if a type index is unknown, an activation energy is negative or not
    /// finite, or total mass is not conserved.
    pub fn new(reactions: Vec<ReactionRelationship>, types: &[ParticleType]) -> Result<Self> {
        for (n, r) in reactions.iter().enumerate() {
            let kinds = [r.reactants.0, r.reactants.1, r.products.0, r.products.1];
            if kinds.iter().any(|&k| k >= types.len()) {
                return Err(Error::InvalidConfig(format!(
                    "reaction {n} names an unknown particle type"
                )));
            }
            for e in [r.forward_activation, r.reverse_activation] {
                if !e.is_finite() || e < 0.0 {
                    return Err(Error::InvalidConfig(format!(
                        "reaction {n}: activation energies must be finite and >= 0"
                    )));
                }
            }
            let m_in = types[r.reactants.0].mass + types[r.reactants.1].mass;
            let m_out = types[r.products.0].mass + types[r.products.1].mass;
            if (m_in - m_out).abs() > 1e-9 * m_in {
                return Err(Error::InvalidConfig(format!(
                    "reaction {n} does not conserve mass ({m_in} -> {m_out})"
                )));
            }
        }
        Ok(Self { reactions })
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }

    pub fn relationships(&self) -> &[ReactionRelationship] {
        &self.reactions
    }

    /// First reaction that applies to a collision between kinds `a` and `b`.
    pub fn lookup(&self, a: usize, b: usize) -> Option<ReactionCandidate> {
        for r in &self.reactions {
            let fwd_released = r.reverse_activation - r.forward_activation;
            if let Some(products) = match_pair((a, b), r.reactants, r.products) {
                return Some(ReactionCandidate {
                    activation: r.forward_activation,
                    products,
                    released: fwd_released,
                });
            }
            if !r.suppress_reverse {
                if let Some(products) = match_pair((a, b), r.products, r.reactants) {
                    return Some(ReactionCandidate {
                        activation: r.reverse_activation,
                        products,
                        released: -fwd_released,
                    });
                }
            }
        }
        None
    }
}

/// Map the colliding kinds onto `to`, respecting the order of `from`.
fn match_pair(
    (a, b): (usize, usize),
    from: (usize, usize),
    to: (usize, usize),
) -> Option<(usize, usize)> {
    if (a, b) == from {
        Some(to)
    } else if (b, a) == from {
        Some((to.1, to.0))
    } else {
        None
    }
}
