use glam::{Vec2, Vec3};

use sph_fluid::sim::kernels::{Kernels2d, Kernels3d};
use sph_fluid::sim::params::{FluidSettings2d, FluidSettings3d};
use sph_fluid::sim::solver2d::FluidSim2d;
use sph_fluid::sim::solver3d::FluidSim3d;
use sph_fluid::sim::spawner::{SpawnData2d, SpawnData3d, Spawner2d};
use sph_fluid::spatial::hash_grid::SortBackend;

const DT: f32 = 1.0 / 120.0;

fn still_settings_2d(smoothing_radius: f32) -> FluidSettings2d {
    FluidSettings2d {
        gravity: 0.0,
        smoothing_radius,
        near_pressure_multiplier: 0.0,
        viscosity_strength: 0.0,
        iterations_per_frame: 1,
        max_timestep_fps: 0.0,
        bounds_size: Vec2::splat(100.0),
        obstacle_size: Vec2::ZERO,
        ..FluidSettings2d::default()
    }
}

fn spawn_2d(positions: Vec<Vec2>) -> SpawnData2d {
    let velocities = vec![Vec2::ZERO; positions.len()];
    SpawnData2d {
        positions,
        velocities,
    }
}

#[test]
fn spawner_grid_counts() {
    let spawner = Spawner2d::default();
    let data = spawner.spawn_data();
    assert_eq!(data.positions.len(), spawner.particle_count());
    assert_eq!(data.positions.len(), data.velocities.len());
}

#[test]
fn lone_particle_density_is_self_term_only() {
    let h = 0.35;
    let settings = still_settings_2d(h);
    let mut sim = FluidSim2d::new(spawn_2d(vec![Vec2::ZERO]), SortBackend::Count).unwrap();
    sim.step_frame(&settings, DT).unwrap();

    let expected = Kernels2d::new(h).poly6(0.0);
    let density = sim.densities()[0].x;
    assert!(
        (density - expected).abs() <= expected * 1e-5,
        "density {density}, expected {expected}"
    );
}

#[test]
fn pressure_balanced_pair_stays_at_rest() {
    let h = 0.35;
    let kernels = Kernels2d::new(h);
    let separation = h / 2.0;

    // Each particle sees itself plus one neighbor at half the
    // smoothing radius; choosing that as the target density makes the
    // pressure term vanish (near pressure is disabled).
    let rest_density = kernels.poly6(0.0) + kernels.poly6(separation * separation);

    let settings = FluidSettings2d {
        target_density: rest_density,
        ..still_settings_2d(h)
    };
    let positions = vec![Vec2::ZERO, Vec2::new(separation, 0.0)];
    let mut sim = FluidSim2d::new(spawn_2d(positions.clone()), SortBackend::Count).unwrap();
    sim.step_frame(&settings, DT).unwrap();

    for (i, vel) in sim.velocities().iter().enumerate() {
        assert!(vel.length() < 1e-6, "particle {i} moved: {vel:?}");
    }
    // The buffers may be permuted by the spatial sort, but both
    // positions survive unchanged.
    let mut got: Vec<Vec2> = sim.positions().to_vec();
    got.sort_by(|a, b| a.x.total_cmp(&b.x));
    assert_eq!(got, positions);
}

#[test]
fn particles_never_escape_bounds() {
    let settings = FluidSettings2d {
        bounds_centre: Vec2::new(1.0, -2.0),
        bounds_size: Vec2::new(4.0, 3.0),
        iterations_per_frame: 1,
        max_timestep_fps: 0.0,
        ..FluidSettings2d::default()
    };

    // Velocities far beyond anything the forces could produce.
    let positions: Vec<Vec2> = (0..50)
        .map(|i| Vec2::new(1.0 + (i % 7) as f32 * 0.1, -2.0 + (i % 5) as f32 * 0.1))
        .collect();
    let velocities: Vec<Vec2> = (0..50)
        .map(|i| Vec2::new((i as f32 - 25.0) * 1e4, ((i as f32 * 13.0) % 11.0 - 5.0) * 1e4))
        .collect();

    let mut sim = FluidSim2d::new(
        SpawnData2d {
            positions,
            velocities,
        },
        SortBackend::Count,
    )
    .unwrap();

    for _ in 0..10 {
        sim.step_frame(&settings, DT).unwrap();
        let half = settings.bounds_size * 0.5;
        for pos in sim.positions() {
            let local = (*pos - settings.bounds_centre).abs();
            assert!(local.x <= half.x + 1e-4 && local.y <= half.y + 1e-4, "{pos:?}");
        }
    }
}

#[test]
fn reset_reseeds_from_spawn_data() {
    let spawner = Spawner2d::default();
    let data = spawner.spawn_data();
    let mut sim = FluidSim2d::new(data.clone(), SortBackend::Count).unwrap();

    let settings = FluidSettings2d::default();
    for _ in 0..5 {
        sim.step_frame(&settings, DT).unwrap();
    }
    assert_ne!(sim.positions(), data.positions.as_slice());

    sim.reset();
    assert_eq!(sim.positions(), data.positions.as_slice());
    assert!(sim.velocities().iter().all(|v| *v == Vec2::ZERO));
    assert_eq!(sim.sim_time(), 0.0);
}

#[test]
fn reset_with_reallocates_for_new_particle_count() {
    let settings = still_settings_2d(0.35);
    let mut sim = FluidSim2d::new(spawn_2d(vec![Vec2::ZERO]), SortBackend::Count).unwrap();
    sim.step_frame(&settings, DT).unwrap();

    let grown = spawn_2d(vec![Vec2::ZERO, Vec2::new(0.1, 0.0), Vec2::new(0.0, 0.2)]);
    sim.reset_with(grown.clone()).unwrap();
    assert_eq!(sim.particle_count(), 3);
    assert_eq!(sim.positions(), grown.positions.as_slice());

    sim.step_frame(&settings, DT).unwrap();
    assert_eq!(sim.densities().len(), 3);
}

#[test]
fn substep_observers_fire_once_per_substep() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    let count = Arc::new(AtomicU32::new(0));
    let observed = Arc::clone(&count);

    let settings = FluidSettings2d {
        iterations_per_frame: 4,
        ..still_settings_2d(0.35)
    };
    let mut sim = FluidSim2d::new(spawn_2d(vec![Vec2::ZERO]), SortBackend::Count).unwrap();
    sim.add_substep_observer(move |_| {
        observed.fetch_add(1, Ordering::Relaxed);
    });

    let substeps = sim.step_frame(&settings, DT).unwrap();
    assert_eq!(substeps, 4);
    assert_eq!(count.load(Ordering::Relaxed), 4);
}

#[test]
fn lone_particle_density_3d() {
    let h = 0.2;
    let settings = FluidSettings3d {
        gravity: 0.0,
        smoothing_radius: h,
        near_pressure_multiplier: 0.0,
        viscosity_strength: 0.0,
        iterations_per_frame: 1,
        max_timestep_fps: 0.0,
        bounds_size: Vec3::splat(100.0),
        ..FluidSettings3d::default()
    };
    let spawn = SpawnData3d {
        positions: vec![Vec3::ZERO],
        velocities: vec![Vec3::ZERO],
    };
    let mut sim = FluidSim3d::new(spawn, SortBackend::Count, 0).unwrap();
    sim.step_frame(&settings, DT).unwrap();

    let expected = Kernels3d::new(h).poly6(0.0);
    let density = sim.densities()[0].x;
    assert!((density - expected).abs() <= expected * 1e-5);
}

#[test]
fn containment_3d() {
    let settings = FluidSettings3d {
        bounds_centre: Vec3::ZERO,
        bounds_size: Vec3::new(3.0, 2.0, 2.0),
        iterations_per_frame: 2,
        max_timestep_fps: 0.0,
        ..FluidSettings3d::default()
    };
    let positions: Vec<Vec3> = (0..40)
        .map(|i| Vec3::new((i % 4) as f32 * 0.1, (i % 3) as f32 * 0.1, (i % 5) as f32 * 0.1))
        .collect();
    let velocities: Vec<Vec3> = (0..40)
        .map(|i| Vec3::splat((i as f32 - 20.0) * 5e3))
        .collect();

    let mut sim = FluidSim3d::new(
        SpawnData3d {
            positions,
            velocities,
        },
        SortBackend::Count,
        0,
    )
    .unwrap();

    for _ in 0..8 {
        sim.step_frame(&settings, DT).unwrap();
        let half = settings.bounds_size * 0.5;
        for pos in sim.positions() {
            let local = (*pos - settings.bounds_centre).abs();
            assert!(
                local.x <= half.x + 1e-4 && local.y <= half.y + 1e-4 && local.z <= half.z + 1e-4,
                "{pos:?}"
            );
        }
    }
}
