// headless 2D dam break: a column of fluid collapses under gravity
use glam::Vec2;

use sph_fluid::sim::params::FluidSettings2d;
use sph_fluid::sim::solver2d::FluidSim2d;
use sph_fluid::sim::spawner::{SpawnRegion2d, Spawner2d};
use sph_fluid::spatial::hash_grid::SortBackend;

const DT: f32 = 1.0 / 60.0;
const FRAMES: u32 = 300;

fn main() -> Result<(), sph_fluid::Error> {
    let spawner = Spawner2d {
        spawn_density: 60.0,
        regions: vec![SpawnRegion2d {
            centre: Vec2::new(-5.5, 0.0),
            size: Vec2::new(5.0, 8.0),
        }],
        ..Spawner2d::default()
    };
    let settings = FluidSettings2d::default();

    let mut sim = FluidSim2d::new(spawner.spawn_data(), SortBackend::Count)?;
    println!("simulating {} particles", sim.particle_count());

    for frame in 0..FRAMES {
        sim.step_frame(&settings, DT)?;

        if frame % 60 == 0 {
            let n = sim.particle_count() as f32;
            let avg_density: f32 = sim.densities().iter().map(|d| d.x).sum::<f32>() / n;
            let max_speed = sim
                .velocities()
                .iter()
                .map(|v| v.length())
                .fold(0.0f32, f32::max);
            println!(
                "t = {:5.2}s   avg density {:7.2}   max speed {:6.2}",
                sim.sim_time(),
                avg_density,
                max_speed
            );
        }
    }

    Ok(())
}
