use approx::assert_relative_eq;
use boltzsim::config::ParticleTypeConfig;
use boltzsim::core::{EngineEvent, ReactionRelationship};
use boltzsim::{Result, SimConfig, Simulation};

fn norm(p: [f64; 3]) -> f64 {
    (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt()
}

/// Elastic gas in a closed box keeps its kinetic energy exactly; only walls
/// exchange momentum.
#[test]
fn elastic_gas_keeps_energy() -> Result<()> {
    let cfg = SimConfig {
        seed: Some(2024),
        ..SimConfig::single_species(3, [12.0, 12.0, 12.0], 80, 0.3, 4.0, 300.0)
    };
    let mut sim = Simulation::new(&cfg)?;
    let e0 = sim.kinetic_energy();
    let mut collisions = 0usize;
    sim.advance_to_with(50.0, |ev| {
        if matches!(ev, EngineEvent::Collision { .. }) {
            collisions += 1;
        }
    })?;
    assert!(collisions > 0, "dense gas should collide");
    assert_relative_eq!(sim.kinetic_energy(), e0, max_relative = 1e-9);
    assert_relative_eq!(sim.temperature(), 300.0, max_relative = 1e-9);
    Ok(())
}

/// Pair collisions conserve momentum: in a periodic cell with zero net
/// momentum nothing else can change it.
#[test]
fn periodic_gas_keeps_momentum() -> Result<()> {
    let cfg = SimConfig {
        arena: boltzsim::core::ArenaKind::Periodic,
        seed: Some(77),
        ..SimConfig::single_species(2, [15.0, 15.0, 0.0], 60, 0.3, 10.0, 400.0)
    };
    let mut sim = Simulation::new(&cfg)?;
    let e0 = sim.kinetic_energy();
    sim.advance_to(40.0)?;
    assert!(norm(sim.momentum()) < 1e-8);
    assert_relative_eq!(sim.kinetic_energy(), e0, max_relative = 1e-9);
    Ok(())
}

/// Exothermic reactions add exactly the released energy per reaction.
#[test]
fn reactions_account_for_released_energy() -> Result<()> {
    let cfg = SimConfig {
        dimension: 2,
        extents: [10.0, 10.0, 0.0],
        particle_types: vec![
            ParticleTypeConfig::new("A", 0.3, 4.0, 30),
            ParticleTypeConfig::new("B", 0.3, 4.0, 30),
            ParticleTypeConfig::new("C", 0.3, 4.0, 0),
            ParticleTypeConfig::new("D", 0.3, 4.0, 0),
        ],
        reactions: vec![ReactionRelationship {
            reactants: (0, 1),
            products: (2, 3),
            forward_activation: 0.0,
            reverse_activation: 1.5,
            suppress_reverse: true,
        }],
        temperature: 300.0,
        seed: Some(5),
        ..SimConfig::default()
    };
    let mut sim = Simulation::new(&cfg)?;
    let e0 = sim.kinetic_energy();
    let mut reactions = 0usize;
    sim.advance_to_with(30.0, |ev| {
        if let EngineEvent::Collision { reacted: true, .. } = ev {
            reactions += 1;
        }
    })?;
    assert!(reactions > 0, "barrierless reaction should fire");
    let frame = sim.frame();
    assert_eq!(frame.counts[0], 30 - reactions);
    assert_eq!(frame.counts[2], reactions);
    assert_eq!(frame.counts.iter().sum::<usize>(), 60);
    assert_relative_eq!(
        sim.kinetic_energy(),
        e0 + 1.5 * reactions as f64,
        max_relative = 1e-9
    );
    Ok(())
}

/// Advancing in many small increments resolves the same events as one jump.
#[test]
fn trajectory_independent_of_advance_increments() -> Result<()> {
    let cfg = SimConfig {
        seed: Some(31),
        ..SimConfig::single_species(2, [10.0, 10.0, 0.0], 40, 0.25, 4.0, 300.0)
    };
    let mut coarse = Simulation::new(&cfg)?;
    let mut fine = coarse.clone();

    let mut coarse_events = Vec::new();
    coarse.advance_to_with(20.0, |ev| coarse_events.push(ev.clone()))?;

    let mut fine_events = Vec::new();
    for k in 1..=200 {
        fine.advance_to_with(0.1 * k as f64, |ev| fine_events.push(ev.clone()))?;
    }

    assert_eq!(coarse_events.len(), fine_events.len());
    for (a, b) in coarse_events.iter().zip(&fine_events) {
        assert_relative_eq!(a.time(), b.time(), max_relative = 1e-9);
    }
    for (a, b) in coarse.particles().iter().zip(fine.particles()) {
        assert_eq!(a.kind, b.kind);
        for k in 0..2 {
            assert_relative_eq!(a.r[k], b.r[k], epsilon = 1e-6);
            assert_relative_eq!(a.v[k], b.v[k], epsilon = 1e-6);
        }
    }
    Ok(())
}
