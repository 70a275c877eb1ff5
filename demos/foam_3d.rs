// headless 3D splash with the diffuse foam pass enabled
use glam::Vec3;

use sph_fluid::sim::params::FluidSettings3d;
use sph_fluid::sim::solver3d::FluidSim3d;
use sph_fluid::sim::spawner::{SpawnRegion3d, Spawner3d};
use sph_fluid::spatial::hash_grid::SortBackend;

const DT: f32 = 1.0 / 60.0;
const FRAMES: u32 = 240;
const MAX_FOAM: usize = 2000;

fn main() -> Result<(), sph_fluid::Error> {
    let spawner = Spawner3d {
        initial_velocity: Vec3::new(6.0, -8.0, 0.0),
        regions: vec![SpawnRegion3d {
            centre: Vec3::new(-0.8, 0.5, 0.0),
            size: 0.8,
        }],
        ..Spawner3d::default()
    };

    let mut settings = FluidSettings3d::default();
    settings.foam.active = true;
    settings.foam.trapped_air_velocity_min_max = glam::Vec2::new(2.0, 10.0);
    settings.foam.kinetic_energy_min_max = glam::Vec2::new(2.0, 50.0);

    let mut sim = FluidSim3d::new(spawner.spawn_data(), SortBackend::Count, MAX_FOAM)?;
    println!(
        "simulating {} particles, foam capacity {}",
        sim.particle_count(),
        MAX_FOAM
    );

    for frame in 0..FRAMES {
        sim.step_frame(&settings, DT)?;

        if frame % 30 == 0 {
            println!(
                "t = {:5.2}s   foam particles {:5} / {}",
                sim.sim_time(),
                sim.foam_live_count(),
                MAX_FOAM
            );
        }
    }

    Ok(())
}
