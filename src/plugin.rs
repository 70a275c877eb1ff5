//! Bevy integration.
//!
//! The plugins own the driver-facing surface: settings and control
//! resources, solver construction from the spawner resource at
//! startup, one frame system per variant, and a
//! [`SimulationStepCompleted`] event fired once per completed substep
//! for render collaborators to observe.

use bevy::prelude::*;

use crate::sim::params::{FluidSettings2d, FluidSettings3d};
use crate::sim::solver2d::FluidSim2d;
use crate::sim::solver3d::FluidSim3d;
use crate::sim::spawner::{Spawner2d, Spawner3d};
use crate::spatial::hash_grid::SortBackend;

/// Fired once per completed simulation substep.
#[derive(Event, Default)]
pub struct SimulationStepCompleted;

/// Per-frame driver commands. A pause takes effect at the next frame
/// boundary; a running step is never interrupted mid-pipeline.
#[derive(Resource, Clone, Debug)]
pub struct SimControl {
    pub paused: bool,
    /// Runs a single frame, then pauses.
    pub step_once: bool,
    pub reset_requested: bool,
    pub slow_motion: bool,
    /// Extra time-scale factor applied while `slow_motion` is set.
    pub slow_time_scale: f32,
}

impl Default for SimControl {
    fn default() -> Self {
        Self {
            paused: false,
            step_once: false,
            reset_requested: false,
            slow_motion: false,
            slow_time_scale: 0.1,
        }
    }
}

pub struct FluidSim2dPlugin {
    pub backend: SortBackend,
}

impl Default for FluidSim2dPlugin {
    fn default() -> Self {
        Self {
            backend: SortBackend::Count,
        }
    }
}

impl Plugin for FluidSim2dPlugin {
    fn build(&self, app: &mut App) {
        let backend = self.backend;

        app.init_resource::<FluidSettings2d>()
            .init_resource::<Spawner2d>()
            .init_resource::<SimControl>()
            .add_event::<SimulationStepCompleted>()
            .add_systems(
                Startup,
                move |mut commands: Commands, spawner: Res<Spawner2d>| {
                    match FluidSim2d::new(spawner.spawn_data(), backend) {
                        Ok(sim) => {
                            info!("fluid sim ready: {} particles", sim.particle_count());
                            commands.insert_resource(sim);
                        }
                        Err(err) => error!("failed to initialize fluid sim: {err}"),
                    }
                },
            )
            .add_systems(Update, run_frame_2d);
    }
}

pub struct FluidSim3dPlugin {
    pub backend: SortBackend,
    pub max_foam_particles: usize,
}

impl Default for FluidSim3dPlugin {
    fn default() -> Self {
        Self {
            backend: SortBackend::Count,
            max_foam_particles: 1000,
        }
    }
}

impl Plugin for FluidSim3dPlugin {
    fn build(&self, app: &mut App) {
        let backend = self.backend;
        let max_foam_particles = self.max_foam_particles;

        app.init_resource::<FluidSettings3d>()
            .init_resource::<Spawner3d>()
            .init_resource::<SimControl>()
            .add_event::<SimulationStepCompleted>()
            .add_systems(
                Startup,
                move |mut commands: Commands, spawner: Res<Spawner3d>| {
                    match FluidSim3d::new(spawner.spawn_data(), backend, max_foam_particles) {
                        Ok(sim) => {
                            info!("fluid sim ready: {} particles", sim.particle_count());
                            commands.insert_resource(sim);
                        }
                        Err(err) => error!("failed to initialize fluid sim: {err}"),
                    }
                },
            )
            .add_systems(Update, run_frame_3d);
    }
}

fn run_frame_2d(
    time: Res<Time>,
    settings: Res<FluidSettings2d>,
    mut control: ResMut<SimControl>,
    sim: Option<ResMut<FluidSim2d>>,
    mut events: EventWriter<SimulationStepCompleted>,
) {
    let Some(mut sim) = sim else {
        return;
    };

    if control.reset_requested {
        control.reset_requested = false;
        sim.reset();
        info!("simulation reset ({} particles)", sim.particle_count());
    }

    let stepping = control.step_once;
    if control.paused && !stepping {
        return;
    }

    let mut settings = settings.clone();
    if control.slow_motion {
        settings.time_scale *= control.slow_time_scale;
    }

    match sim.step_frame(&settings, time.delta_secs()) {
        Ok(substeps) => {
            for _ in 0..substeps {
                events.write(SimulationStepCompleted);
            }
        }
        Err(err) => error!("fluid step failed: {err}"),
    }

    if stepping {
        control.step_once = false;
        control.paused = true;
    }
}

fn run_frame_3d(
    time: Res<Time>,
    settings: Res<FluidSettings3d>,
    mut control: ResMut<SimControl>,
    sim: Option<ResMut<FluidSim3d>>,
    mut events: EventWriter<SimulationStepCompleted>,
) {
    let Some(mut sim) = sim else {
        return;
    };

    if control.reset_requested {
        control.reset_requested = false;
        sim.reset();
        info!("simulation reset ({} particles)", sim.particle_count());
    }

    let stepping = control.step_once;
    if control.paused && !stepping {
        return;
    }

    let mut settings = settings.clone();
    if control.slow_motion {
        settings.time_scale *= control.slow_time_scale;
    }

    match sim.step_frame(&settings, time.delta_secs()) {
        Ok(substeps) => {
            for _ in 0..substeps {
                events.write(SimulationStepCompleted);
            }
        }
        Err(err) => error!("fluid step failed: {err}"),
    }

    if stepping {
        control.step_once = false;
        control.paused = true;
    }
}
