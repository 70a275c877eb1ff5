// smoothed particle hydrodynamics in 2D
use bevy::prelude::Resource;
use glam::{IVec2, Vec2};
use rayon::prelude::*;

use crate::Error;
use crate::sim::ffi::GpuParticle2d;
use crate::sim::kernels::Kernels2d;
use crate::sim::params::FluidSettings2d;
use crate::sim::spawner::SpawnData2d;
use crate::spatial::hash_grid::{SortBackend, SpatialHash, cell_coord_2d, hash_cell_2d};

type SubstepObserver = Box<dyn Fn(&FluidSim2d) + Send + Sync>;

/// 2D SPH solver.
///
/// Particle state lives in parallel arrays sharing one index space;
/// every per-substep stage is a parallel dispatch over that space, and
/// a stage only begins once the previous stage has fully completed.
/// After the spatial sort, all per-particle buffers are permuted into
/// sorted order so the neighbor-dependent stages read memory-coherent
/// runs.
#[derive(Resource)]
pub struct FluidSim2d {
    positions: Vec<Vec2>,
    predicted_positions: Vec<Vec2>,
    velocities: Vec<Vec2>,
    /// x = density, y = near density.
    densities: Vec<Vec2>,

    sort_target_positions: Vec<Vec2>,
    sort_target_predicted: Vec<Vec2>,
    sort_target_velocities: Vec<Vec2>,
    viscosity_deltas: Vec<Vec2>,

    hash: SpatialHash,
    spawn_data: SpawnData2d,
    observers: Vec<SubstepObserver>,
    sim_time: f32,
}

impl FluidSim2d {
    /// Builds a solver seeded from spawner output. The particle count
    /// is fixed until [`reset`](Self::reset) or teardown.
    pub fn new(spawn_data: SpawnData2d, backend: SortBackend) -> Result<Self, Error> {
        if spawn_data.positions.len() != spawn_data.velocities.len() {
            return Err(Error::LengthMismatch {
                expected: spawn_data.positions.len(),
                got: spawn_data.velocities.len(),
            });
        }

        let n = spawn_data.positions.len();
        Ok(Self {
            positions: spawn_data.positions.clone(),
            predicted_positions: spawn_data.positions.clone(),
            velocities: spawn_data.velocities.clone(),
            densities: vec![Vec2::ZERO; n],
            sort_target_positions: vec![Vec2::ZERO; n],
            sort_target_predicted: vec![Vec2::ZERO; n],
            sort_target_velocities: vec![Vec2::ZERO; n],
            viscosity_deltas: vec![Vec2::ZERO; n],
            hash: SpatialHash::new(n, backend),
            spawn_data,
            observers: Vec::new(),
            sim_time: 0.0,
        })
    }

    pub fn particle_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.positions
    }

    pub fn velocities(&self) -> &[Vec2] {
        &self.velocities
    }

    /// Per-particle `(density, near density)` pairs.
    pub fn densities(&self) -> &[Vec2] {
        &self.densities
    }

    pub fn sim_time(&self) -> f32 {
        self.sim_time
    }

    /// Registers a callback invoked synchronously after every
    /// completed substep.
    pub fn add_substep_observer(&mut self, observer: impl Fn(&FluidSim2d) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Re-seeds all particle state from the retained spawn data.
    pub fn reset(&mut self) {
        self.positions.copy_from_slice(&self.spawn_data.positions);
        self.predicted_positions.copy_from_slice(&self.spawn_data.positions);
        self.velocities.copy_from_slice(&self.spawn_data.velocities);
        self.densities.fill(Vec2::ZERO);
        self.sim_time = 0.0;
    }

    /// Reset with fresh spawn data, reallocating every buffer if the
    /// particle count changed. Only valid between frames.
    pub fn reset_with(&mut self, spawn_data: SpawnData2d) -> Result<(), Error> {
        if spawn_data.positions.len() != spawn_data.velocities.len() {
            return Err(Error::LengthMismatch {
                expected: spawn_data.positions.len(),
                got: spawn_data.velocities.len(),
            });
        }

        let n = spawn_data.positions.len();
        if n != self.positions.len() {
            self.positions.resize(n, Vec2::ZERO);
            self.predicted_positions.resize(n, Vec2::ZERO);
            self.velocities.resize(n, Vec2::ZERO);
            self.densities.resize(n, Vec2::ZERO);
            self.sort_target_positions.resize(n, Vec2::ZERO);
            self.sort_target_predicted.resize(n, Vec2::ZERO);
            self.sort_target_velocities.resize(n, Vec2::ZERO);
            self.viscosity_deltas.resize(n, Vec2::ZERO);
            self.hash.resize(n);
        }
        self.spawn_data = spawn_data;
        self.reset();
        Ok(())
    }

    /// Advances one frame, split into `iterations_per_frame` substeps.
    /// Frame time is scaled by `time_scale` and clamped by the
    /// frame-rate floor, so a stalled frame simulates slower than real
    /// time instead of taking one oversized step. Returns the number
    /// of substeps run.
    pub fn step_frame(&mut self, settings: &FluidSettings2d, frame_dt: f32) -> Result<u32, Error> {
        let max_dt = if settings.max_timestep_fps > 0.0 {
            1.0 / settings.max_timestep_fps
        } else {
            f32::INFINITY
        };
        let frame_time = (frame_dt * settings.time_scale).min(max_dt);

        let iterations = settings.iterations_per_frame.max(1);
        let dt = frame_time / iterations as f32;

        for _ in 0..iterations {
            self.sim_time += dt;
            self.substep(settings, dt)?;
            for observer in &self.observers {
                observer(self);
            }
        }

        Ok(iterations)
    }

    fn substep(&mut self, settings: &FluidSettings2d, dt: f32) -> Result<(), Error> {
        self.external_forces(settings, dt);
        self.run_spatial(settings.smoothing_radius)?;
        self.calculate_densities(settings);
        self.apply_pressure_forces(settings, dt);
        if settings.viscosity_strength != 0.0 {
            self.apply_viscosity(settings, dt);
        }
        self.update_positions(settings, dt);
        Ok(())
    }

    fn external_forces(&mut self, settings: &FluidSettings2d, dt: f32) {
        let Self {
            positions,
            predicted_positions,
            velocities,
            ..
        } = self;

        velocities
            .par_iter_mut()
            .zip(predicted_positions.par_iter_mut())
            .zip(positions.par_iter())
            .for_each(|((vel, predicted), &pos)| {
                *vel += external_acceleration(settings, pos, *vel) * dt;
                // Forward-Euler prediction, used only for the neighbor
                // search and pressure solve.
                *predicted = pos + *vel * dt;
            });
    }

    fn run_spatial(&mut self, cell_size: f32) -> Result<(), Error> {
        self.hash.update_keys_2d(&self.predicted_positions, cell_size)?;
        self.hash.run()?;

        let Self {
            positions,
            predicted_positions,
            velocities,
            sort_target_positions,
            sort_target_predicted,
            sort_target_velocities,
            hash,
            ..
        } = self;
        let indices = hash.indices();

        // Gather every per-particle buffer into sorted order...
        gather(sort_target_positions, positions.as_slice(), indices);
        gather(
            sort_target_predicted,
            predicted_positions.as_slice(),
            indices,
        );
        gather(sort_target_velocities, velocities.as_slice(), indices);

        // ...and copy back so the canonical buffers stay consistent
        // with the sorted key table for the rest of the substep.
        positions.copy_from_slice(sort_target_positions);
        predicted_positions.copy_from_slice(sort_target_predicted);
        velocities.copy_from_slice(sort_target_velocities);

        Ok(())
    }

    fn calculate_densities(&mut self, settings: &FluidSettings2d) {
        let kernels = Kernels2d::new(settings.smoothing_radius);
        let radius_sqr = settings.smoothing_radius * settings.smoothing_radius;

        let Self {
            predicted_positions,
            densities,
            hash,
            ..
        } = self;
        let predicted = predicted_positions.as_slice();
        let hash = &*hash;

        densities
            .par_iter_mut()
            .zip(predicted.par_iter())
            .for_each(|(density, &pos)| {
                let mut d = 0.0;
                let mut near = 0.0;
                for_each_neighbour(
                    hash,
                    settings.smoothing_radius,
                    predicted,
                    pos,
                    radius_sqr,
                    |_, _, sqr_dst| {
                        d += kernels.poly6(sqr_dst);
                        near += kernels.spiky_pow2(sqr_dst.sqrt());
                    },
                );
                *density = Vec2::new(d, near);
            });
    }

    fn apply_pressure_forces(&mut self, settings: &FluidSettings2d, dt: f32) {
        let kernels = Kernels2d::new(settings.smoothing_radius);
        let radius_sqr = settings.smoothing_radius * settings.smoothing_radius;

        let Self {
            predicted_positions,
            velocities,
            densities,
            hash,
            ..
        } = self;
        let predicted = predicted_positions.as_slice();
        let densities = densities.as_slice();
        let hash = &*hash;

        velocities.par_iter_mut().enumerate().for_each(|(i, vel)| {
            let pos = predicted[i];
            let density = densities[i].x;
            let near_density = densities[i].y;
            let pressure = (density - settings.target_density) * settings.pressure_multiplier;
            let near_pressure = settings.near_pressure_multiplier * near_density;

            let mut force = Vec2::ZERO;
            for_each_neighbour(
                hash,
                settings.smoothing_radius,
                predicted,
                pos,
                radius_sqr,
                |j, offset, sqr_dst| {
                    if j == i {
                        return;
                    }
                    let density_j = densities[j].x;
                    let near_density_j = densities[j].y;
                    let pressure_j =
                        (density_j - settings.target_density) * settings.pressure_multiplier;
                    let near_pressure_j = settings.near_pressure_multiplier * near_density_j;

                    let dst = sqr_dst.sqrt();
                    // Coincident particles have no separation direction.
                    let dir = if dst > 0.0 { offset / dst } else { Vec2::Y };

                    let shared_pressure = (pressure + pressure_j) * 0.5;
                    let shared_near_pressure = (near_pressure + near_pressure_j) * 0.5;

                    force +=
                        dir * (kernels.spiky_pow3_derivative(dst) * shared_pressure / density_j);
                    force += dir
                        * (kernels.spiky_pow2_derivative(dst) * shared_near_pressure
                            / near_density_j);
                },
            );

            *vel += force / density * dt;
        });
    }

    fn apply_viscosity(&mut self, settings: &FluidSettings2d, dt: f32) {
        let kernels = Kernels2d::new(settings.smoothing_radius);
        let radius_sqr = settings.smoothing_radius * settings.smoothing_radius;

        let Self {
            predicted_positions,
            velocities,
            viscosity_deltas,
            hash,
            ..
        } = self;
        let predicted = predicted_positions.as_slice();
        let hash = &*hash;

        {
            let velocities = velocities.as_slice();
            viscosity_deltas
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, delta)| {
                    let pos = predicted[i];
                    let vel = velocities[i];
                    let mut sum = Vec2::ZERO;
                    for_each_neighbour(
                        hash,
                        settings.smoothing_radius,
                        predicted,
                        pos,
                        radius_sqr,
                        |j, _, sqr_dst| {
                            if j == i {
                                return;
                            }
                            sum += (velocities[j] - vel) * kernels.poly6(sqr_dst);
                        },
                    );
                    *delta = sum;
                });
        }

        velocities
            .par_iter_mut()
            .zip(viscosity_deltas.par_iter())
            .for_each(|(vel, &delta)| *vel += delta * settings.viscosity_strength * dt);
    }

    fn update_positions(&mut self, settings: &FluidSettings2d, dt: f32) {
        let Self {
            positions,
            velocities,
            ..
        } = self;

        positions
            .par_iter_mut()
            .zip(velocities.par_iter_mut())
            .for_each(|(pos, vel)| {
                *pos += *vel * dt;
                resolve_collisions(pos, vel, settings);
            });
    }

    pub fn write_gpu_particles(&self, out: &mut Vec<GpuParticle2d>) {
        out.clear();
        out.reserve(self.positions.len());
        for i in 0..self.positions.len() {
            out.push(GpuParticle2d {
                pos: self.positions[i].to_array(),
                vel: self.velocities[i].to_array(),
                density: self.densities[i].to_array(),
            });
        }
    }
}

fn gather(target: &mut [Vec2], source: &[Vec2], indices: &[u32]) {
    target
        .par_iter_mut()
        .zip(indices.par_iter())
        .for_each(|(dst, &i)| *dst = source[i as usize]);
}

fn external_acceleration(settings: &FluidSettings2d, pos: Vec2, vel: Vec2) -> Vec2 {
    let gravity_accel = Vec2::new(0.0, settings.gravity);

    if settings.interaction_strength != 0.0 {
        let offset = settings.interaction_point - pos;
        let sqr_dst = offset.length_squared();
        let radius = settings.interaction_radius;
        if sqr_dst < radius * radius {
            let dst = sqr_dst.sqrt();
            let edge_t = dst / radius;
            let centre_t = 1.0 - edge_t;
            let dir = if dst > 0.0 { offset / dst } else { Vec2::ZERO };

            // Gravity fades as the pointer takes over, and existing
            // velocity is damped for finer control near the centre.
            let gravity_weight =
                1.0 - centre_t * (settings.interaction_strength / 10.0).clamp(0.0, 1.0);
            let mut accel =
                gravity_accel * gravity_weight + dir * (centre_t * settings.interaction_strength);
            accel -= vel * centre_t;
            return accel;
        }
    }

    gravity_accel
}

fn resolve_collisions(pos: &mut Vec2, vel: &mut Vec2, settings: &FluidSettings2d) {
    let half_size = settings.bounds_size * 0.5;
    let local = *pos - settings.bounds_centre;
    let edge_dst = half_size - local.abs();

    if edge_dst.x <= 0.0 {
        pos.x = settings.bounds_centre.x + half_size.x * local.x.signum();
        vel.x *= -settings.collision_damping;
    }
    if edge_dst.y <= 0.0 {
        pos.y = settings.bounds_centre.y + half_size.y * local.y.signum();
        vel.y *= -settings.collision_damping;
    }

    let obstacle_half = settings.obstacle_size * 0.5;
    if obstacle_half.x > 0.0 && obstacle_half.y > 0.0 {
        let local = *pos - settings.obstacle_centre;
        let edge_dst = obstacle_half - local.abs();
        if edge_dst.x > 0.0 && edge_dst.y > 0.0 {
            // Push out along the axis of least penetration.
            if edge_dst.x < edge_dst.y {
                pos.x = settings.obstacle_centre.x + obstacle_half.x * local.x.signum();
                vel.x *= -settings.collision_damping;
            } else {
                pos.y = settings.obstacle_centre.y + obstacle_half.y * local.y.signum();
                vel.y *= -settings.collision_damping;
            }
        }
    }
}

/// Visits every particle within `radius_sqr` of `sample`, passing the
/// sorted slot index, the offset toward the neighbor, and the squared
/// distance. The 3x3 cell block around the sample is scanned through
/// the hash; distinct cells colliding onto one key are visited once,
/// and hash false positives are removed by the distance test.
fn for_each_neighbour(
    hash: &SpatialHash,
    cell_size: f32,
    positions: &[Vec2],
    sample: Vec2,
    radius_sqr: f32,
    mut visit: impl FnMut(usize, Vec2, f32),
) {
    let centre = cell_coord_2d(sample, cell_size);
    let keys = hash.keys();
    let offsets = hash.offsets();
    let table_size = hash.table_size();

    let mut cell_keys = [0u32; 9];
    let mut num_keys = 0;
    for ox in -1..=1 {
        for oy in -1..=1 {
            let key = hash_cell_2d(centre + IVec2::new(ox, oy), table_size);
            if !cell_keys[..num_keys].contains(&key) {
                cell_keys[num_keys] = key;
                num_keys += 1;
            }
        }
    }

    for &key in &cell_keys[..num_keys] {
        let mut slot = offsets[key as usize] as usize;
        while slot < keys.len() && keys[slot] == key {
            let offset = positions[slot] - sample;
            let sqr_dst = offset.length_squared();
            if sqr_dst <= radius_sqr {
                visit(slot, offset, sqr_dst);
            }
            slot += 1;
        }
    }
}
