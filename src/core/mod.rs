//! Event-driven hard-body engine.
//!
//! Particles fly in straight lines between events; the queue holds predicted
//! pair contacts and boundary contacts, and resolving one event re-predicts
//! only the particles it touched.

pub mod arena;
pub mod event;
pub mod frame;
pub mod particle;
pub mod predict;
pub mod reaction;
mod resolve;
pub mod sim;
pub mod vector;

pub use arena::{Arena, ArenaKind, Boundary, Direction, Side};
pub use event::{Event, EventKind, EventQueue};
pub use frame::{Contact, EngineEvent, FrameInfo};
pub use particle::{Particle, ParticleType};
pub use predict::Miss;
pub use reaction::{ReactionRelationship, ReactionTable};
pub use sim::Simulation;
