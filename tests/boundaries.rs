use approx::assert_relative_eq;
use boltzsim::config::{ParticleTypeConfig, ReservoirConfig};
use boltzsim::core::{ArenaKind, Contact, Direction, EngineEvent, Miss, Side};
use boltzsim::{Result, SimConfig, Simulation};

#[test]
fn periodic_wrap_keeps_velocity() -> Result<()> {
    let cfg = SimConfig {
        dimension: 1,
        extents: [10.0, 0.0, 0.0],
        arena: ArenaKind::Periodic,
        particle_types: vec![ParticleTypeConfig::new("A", 0.2, 4.0, 2)],
        seed: Some(3),
        ..SimConfig::default()
    };
    let mut sim = Simulation::new(&cfg)?;
    sim.place(0, [2.0, 0.0, 0.0], [1.0, 0.0, 0.0])?;
    sim.place(1, [7.0, 0.0, 0.0], [1.0, 0.0, 0.0])?;
    let p0 = sim.momentum()[0];

    let mut wraps = Vec::new();
    sim.advance_to_with(20.0, |ev| {
        if let EngineEvent::Wrap { time, i, wall_id, .. } = *ev {
            wraps.push((time, i, wall_id));
        }
    })?;
    // particle 1 wraps at 3 and 13, particle 0 at 8 and 18
    assert_eq!(wraps.len(), 4);
    assert!(wraps.iter().all(|&(_, _, wall)| wall == 1));
    assert_relative_eq!(wraps[0].0, 3.0, epsilon = 1e-9);
    assert_eq!(wraps[0].1, 1);
    assert_relative_eq!(sim.momentum()[0], p0, epsilon = 1e-12);
    assert_relative_eq!(sim.particle(0)?.r[0], 2.0, epsilon = 1e-9);
    Ok(())
}

#[test]
fn identical_velocities_never_meet() -> Result<()> {
    let cfg = SimConfig {
        seed: Some(8),
        ..SimConfig::single_species(2, [10.0, 10.0, 0.0], 2, 0.3, 4.0, 300.0)
    };
    let mut sim = Simulation::new(&cfg)?;
    sim.place(0, [3.0, 5.0, 0.0], [0.5, 0.0, 0.0])?;
    sim.place(1, [6.0, 5.0, 0.0], [0.5, 0.0, 0.0])?;
    assert_eq!(sim.predict_pair(0, 1), Err(Miss::NoRelativeMotion));
    sim.advance_to_with(5.0, |ev| {
        assert!(!matches!(ev, EngineEvent::Collision { .. }), "unexpected {ev:?}");
    })?;
    Ok(())
}

/// With a hot reservoir wall and a compressing piston, the change in kinetic
/// energy is exactly the work plus the heat.
#[test]
fn first_law_with_piston_and_reservoir() -> Result<()> {
    let cfg = SimConfig {
        dimension: 2,
        extents: [20.0, 10.0, 0.0],
        arena: ArenaKind::Piston,
        particle_types: vec![ParticleTypeConfig::new("Ar", 0.2, 40.0, 40)],
        temperature: 300.0,
        reservoir: Some(ReservoirConfig {
            wall: 0,
            temperature: 600.0,
        }),
        seed: Some(12),
        ..SimConfig::default()
    };
    let mut sim = Simulation::new(&cfg)?;
    let e0 = sim.kinetic_energy();
    sim.move_piston(10.0, 0.05)?;
    sim.advance_to(300.0)?;

    assert!(sim.work_total() > 0.0, "compression does work on the gas");
    assert!(sim.heat_total() > 0.0, "hot wall heats the gas");
    assert_relative_eq!(
        sim.kinetic_energy() - e0,
        sim.work_total() + sim.heat_total(),
        max_relative = 1e-8
    );
    Ok(())
}

#[test]
fn piston_halts_at_target() -> Result<()> {
    let cfg = SimConfig {
        dimension: 2,
        extents: [20.0, 20.0, 0.0],
        arena: ArenaKind::Piston,
        particle_types: vec![ParticleTypeConfig::new("He", 0.2, 4.0, 10)],
        seed: Some(21),
        ..SimConfig::default()
    };
    let mut sim = Simulation::new(&cfg)?;
    sim.move_piston(12.0, 0.5)?;
    let mut halts = Vec::new();
    sim.advance_to_with(40.0, |ev| {
        if let EngineEvent::PistonHalt { time, position } = *ev {
            halts.push((time, position));
        }
    })?;
    assert_eq!(halts.len(), 1);
    assert_relative_eq!(halts[0].0, 16.0, epsilon = 1e-9);
    assert_relative_eq!(halts[0].1, 12.0, epsilon = 1e-9);

    let frame = sim.frame();
    assert_eq!(frame.piston_velocity, Some(0.0));
    assert_relative_eq!(frame.volume, 12.0 * 20.0, epsilon = 1e-9);
    assert!(frame.particles.iter().all(|p| p.r[0] <= 12.0 - 0.2 + 1e-6));
    Ok(())
}

fn divided(count: usize, demon: bool, seed: u64) -> SimConfig {
    SimConfig {
        dimension: 2,
        extents: [20.0, 20.0, 0.0],
        arena: ArenaKind::Divided,
        hole_diameter: Some(4.0),
        demon,
        demon_direction: Direction::LeftToRight,
        particle_types: vec![ParticleTypeConfig::new("He", 0.1, 4.0, count)],
        initial_side: Some(Side::Left),
        seed: Some(seed),
        ..SimConfig::default()
    }
}

#[test]
fn effusion_equalizes_halves() -> Result<()> {
    let n = 100;
    let mut sim = Simulation::new(&divided(n, false, 99))?;
    assert_eq!(sim.side_counts(), [n, 0]);
    let mut crossings = 0usize;
    sim.advance_to_with(600.0, |ev| {
        if matches!(ev, EngineEvent::HoleCrossing { .. }) {
            crossings += 1;
        }
    })?;
    let [left, right] = sim.side_counts();
    assert_eq!(left + right, n);
    assert!(crossings > 0);
    assert!(
        left.abs_diff(right) as f64 <= 0.3 * n as f64,
        "halves did not equalize: {left} / {right}"
    );
    Ok(())
}

#[test]
fn demon_only_lets_particles_through_one_way() -> Result<()> {
    let n = 60;
    let mut sim = Simulation::new(&divided(n, true, 5))?;
    let mut backwards = 0usize;
    sim.advance_to_with(600.0, |ev| {
        if let EngineEvent::HoleCrossing { from: Side::Right, .. } = ev {
            backwards += 1;
        }
    })?;
    assert_eq!(backwards, 0);
    let [left, right] = sim.side_counts();
    assert!(right > left, "demon should pile particles on the right: {left} / {right}");

    // Turning the demon off lets them flow back.
    sim.set_demon(false)?;
    sim.advance_to_with(1200.0, |ev| {
        if let EngineEvent::HoleCrossing { from: Side::Right, .. } = ev {
            backwards += 1;
        }
    })?;
    assert!(backwards > 0);
    Ok(())
}

fn small_hole(count: usize, seed: u64) -> SimConfig {
    SimConfig {
        dimension: 2,
        extents: [12.0, 12.0, 0.0],
        arena: ArenaKind::Divided,
        hole_diameter: Some(2.0),
        particle_types: vec![ParticleTypeConfig::new("Ne", 0.3, 20.0, count)],
        seed: Some(seed),
        ..SimConfig::default()
    }
}

#[test]
fn oblique_approach_past_the_hole_hits_the_divider() -> Result<()> {
    let mut sim = Simulation::new(&small_hole(1, 2))?;
    // inside the clearance at the near face, past it at the far face
    sim.place(0, [5.5, 6.4, 0.0], [1.0, 1.0, 0.0])?;
    let ev = sim.step(5.0)?.expect("divider first");
    assert!(
        matches!(ev, EngineEvent::WallHit { contact: Contact::Divider, .. }),
        "unexpected {ev:?}"
    );
    assert_relative_eq!(sim.time(), 0.2, epsilon = 1e-9);
    assert_relative_eq!(sim.particle(0)?.v[0], -1.0, epsilon = 1e-12);
    assert_eq!(sim.side_counts(), [1, 0]);
    Ok(())
}

#[test]
fn no_body_overlaps_the_divider_outside_the_hole() -> Result<()> {
    let mut sim = Simulation::new(&small_hole(80, 9))?;
    let xd = sim.arena().divider_position().expect("divided arena");
    let radius = sim.types()[0].radius;
    let tol = 1e-6;
    let mut steps = 0usize;
    let mut crossings = 0usize;
    while let Some(ev) = sim.step(200.0)? {
        if matches!(ev, EngineEvent::HoleCrossing { .. }) {
            crossings += 1;
        }
        let particles = sim.particles();
        for (i, p) in particles.iter().enumerate() {
            if (p.r[0] - xd).abs() < radius - tol {
                assert!(
                    sim.arena().hole_admits(&p.r, radius - tol),
                    "particle {i} overlaps the divider at {:?} (t = {})",
                    p.r,
                    sim.time()
                );
            }
        }
        steps += 1;
        if steps % 25 == 0 {
            for i in 0..particles.len() {
                for j in i + 1..particles.len() {
                    let dx = particles[i].r[0] - particles[j].r[0];
                    let dy = particles[i].r[1] - particles[j].r[1];
                    assert!(
                        (dx * dx + dy * dy).sqrt() >= 2.0 * radius - tol,
                        "particles {i} and {j} overlap at t = {}",
                        sim.time()
                    );
                }
            }
        }
    }
    assert!(crossings > 0);
    let [left, right] = sim.side_counts();
    assert_eq!(left + right, 80);
    Ok(())
}
