use nalgebra::DVector;
use partsim::core::{Particle, ShapeKind, Simulation};
use partsim::error::Result;

fn vec2(x: f64, y: f64) -> DVector<f64> {
    DVector::from_vec(vec![x, y])
}

fn sample_particle() -> Result<Particle> {
    let mut p = Particle::new(2, ShapeKind::Spheroid)?;
    p.set_pos(&vec2(2.0, 3.0))?;
    p.set_speed(&vec2(4.0, 5.0))?;
    p.set_accel(&vec2(6.0, 7.0))?;
    p.set_mass(8.0);
    p.set_drag(0.25);
    Ok(p)
}

fn sample_simulation() -> Result<Simulation> {
    let mut sim = Simulation::new(2)?;
    sim.add_particles(2, ShapeKind::Spheroid)?;
    sim.particle_mut(0).set_speed(&vec2(1.0, 0.5))?;
    sim.particle_mut(1).set_pos(&vec2(3.0, 0.0))?;
    sim.particle_mut(1).set_mass(1.0);
    sim.set_down_gravity(9.81);
    sim.set_gravity(0.5);
    sim.set_cur_time(1.25);
    sim.set_delta_t(0.02);
    Ok(sim)
}

#[test]
fn particle_json_round_trip_compact_and_pretty() -> Result<()> {
    let p = sample_particle()?;
    for compact in [true, false] {
        let mut buf = Vec::new();
        p.save_json(&mut buf, compact)?;
        let loaded = Particle::load_json(&mut buf.as_slice())?;
        assert!(p.is_same(&loaded));
        // Drag is outside is_same but inside the persisted set.
        assert_eq!(loaded.drag(), 0.25);
    }
    Ok(())
}

#[test]
fn particle_text_round_trip() -> Result<()> {
    let p = sample_particle()?;
    let mut buf = Vec::new();
    p.write_text(&mut buf)?;
    let loaded = Particle::load_text(&mut buf.as_slice())?;
    assert!(p.is_same(&loaded));
    assert_eq!(loaded.drag(), 0.25);
    Ok(())
}

#[test]
fn rescaled_shape_survives_round_trip() -> Result<()> {
    let mut p = sample_particle()?;
    p.set_size_vec(&vec2(6.0, 7.0))?;
    let mut buf = Vec::new();
    p.save_json(&mut buf, true)?;
    let loaded = Particle::load_json(&mut buf.as_slice())?;
    assert!(p.is_same(&loaded));
    assert!((loaded.axis(0).norm() - 6.0).abs() < 1e-9);
    assert!((loaded.axis(1).norm() - 7.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn fixed_particle_round_trip_keeps_invariant() -> Result<()> {
    let mut p = sample_particle()?;
    p.set_fixed(true);
    let mut buf = Vec::new();
    p.save_json(&mut buf, true)?;
    let loaded = Particle::load_json(&mut buf.as_slice())?;
    assert!(loaded.is_fixed());
    assert!(loaded.speed().iter().all(|&c| c == 0.0));
    assert!(loaded.accel().iter().all(|&c| c == 0.0));
    assert!(p.is_same(&loaded));
    Ok(())
}

#[test]
fn simulation_json_round_trip_compact_and_pretty() -> Result<()> {
    let sim = sample_simulation()?;
    for compact in [true, false] {
        let mut buf = Vec::new();
        sim.save_json(&mut buf, compact)?;
        let loaded = Simulation::load_json(&mut buf.as_slice())?;
        assert!(sim.is_same(&loaded));
        assert_eq!(loaded.dim(), 2);
        assert_eq!(loaded.num_particles(), 2);
    }
    Ok(())
}

#[test]
fn simulation_text_round_trip() -> Result<()> {
    let sim = sample_simulation()?;
    let mut buf = Vec::new();
    sim.save_text(&mut buf)?;
    let loaded = Simulation::load_text(&mut buf.as_slice())?;
    assert!(sim.is_same(&loaded));
    Ok(())
}

#[test]
fn stepped_simulation_round_trips() -> Result<()> {
    let mut sim = sample_simulation()?;
    sim.set_gravity(0.0);
    for _ in 0..5 {
        sim.step()?;
    }
    let mut buf = Vec::new();
    sim.save_json(&mut buf, true)?;
    let loaded = Simulation::load_json(&mut buf.as_slice())?;
    assert!(sim.is_same(&loaded));
    Ok(())
}

#[test]
fn truncated_text_stream_fails() -> Result<()> {
    let sim = sample_simulation()?;
    let mut buf = Vec::new();
    sim.save_text(&mut buf)?;
    let cut = buf.len() / 2;
    assert!(Simulation::load_text(&mut &buf[..cut]).is_err());
    Ok(())
}

#[test]
fn corrupted_text_token_fails() -> Result<()> {
    let sim = sample_simulation()?;
    let mut buf = Vec::new();
    sim.save_text(&mut buf)?;
    let mut text = String::from_utf8(buf).expect("ascii output");
    text = text.replacen("9.81", "not-a-number", 1);
    assert!(Simulation::load_text(&mut text.as_bytes()).is_err());
    Ok(())
}

#[test]
fn truncated_json_stream_fails() -> Result<()> {
    let sim = sample_simulation()?;
    let mut buf = Vec::new();
    sim.save_json(&mut buf, true)?;
    let cut = buf.len() - 10;
    assert!(Simulation::load_json(&mut &buf[..cut]).is_err());
    Ok(())
}

#[test]
fn particle_count_mismatch_fails() -> Result<()> {
    let sim = sample_simulation()?;
    let mut buf = Vec::new();
    sim.save_json(&mut buf, true)?;
    let text = String::from_utf8(buf).expect("ascii output");
    let lying = text.replacen("\"_nbParticle\":\"2\"", "\"_nbParticle\":\"3\"", 1);
    assert_ne!(text, lying, "fixture must actually change the count");
    assert!(Simulation::load_json(&mut lying.as_bytes()).is_err());
    Ok(())
}

#[test]
fn missing_property_fails() {
    let json = r#"{"_dim": "2", "_curTime": "0"}"#;
    assert!(Simulation::load_json(&mut json.as_bytes()).is_err());
}

#[test]
fn non_positive_dimension_fails() {
    let json = r#"{"_dim": "0", "_curTime": "0", "_deltaT": "0.01",
        "_downGravity": "0", "_gravity": "0", "_nbParticle": "0",
        "_particles": []}"#;
    assert!(Simulation::load_json(&mut json.as_bytes()).is_err());
}

#[test]
fn clone_then_mutate_breaks_equality() -> Result<()> {
    let sim = sample_simulation()?;
    let mut clone = sim.clone();
    assert!(sim.is_same(&clone));
    clone.particle_mut(0).set_mass(99.0);
    assert!(!sim.is_same(&clone));
    Ok(())
}
