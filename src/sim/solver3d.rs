// smoothed particle hydrodynamics in 3D, with a diffuse particle pass
use bevy::prelude::Resource;
use glam::{IVec3, Vec2, Vec3};
use rayon::prelude::*;

use crate::Error;
use crate::sim::ffi::GpuParticle3d;
use crate::sim::foam::{FoamKind, FoamParticle, FoamPool};
use crate::sim::kernels::Kernels3d;
use crate::sim::params::{FluidSettings3d, FoamSettings};
use crate::sim::spawner::SpawnData3d;
use crate::spatial::hash_grid::{SortBackend, SpatialHash, cell_coord_3d, hash_cell_3d};

type SubstepObserver = Box<dyn Fn(&FluidSim3d) + Send + Sync>;

/// Bubbles are dragged toward the surrounding fluid velocity at this
/// rate (per second) on top of their buoyant lift.
const BUBBLE_DRAG_RATE: f32 = 5.0;

/// Particles below this fraction of the target density count as
/// surface particles and trap air more readily.
const SURFACE_DENSITY_FRACTION: f32 = 0.75;

/// 3D SPH solver. Pipeline matches [`FluidSim2d`] with a third axis,
/// and additionally feeds a bounded spray/foam/bubble pool: spawn
/// events are detected after the pressure stage each substep, while
/// the pool itself is aged, classified and compacted once per frame.
///
/// [`FluidSim2d`]: crate::sim::solver2d::FluidSim2d
#[derive(Resource)]
pub struct FluidSim3d {
    positions: Vec<Vec3>,
    predicted_positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
    /// x = density, y = near density.
    densities: Vec<Vec2>,

    sort_target_positions: Vec<Vec3>,
    sort_target_predicted: Vec<Vec3>,
    sort_target_velocities: Vec<Vec3>,
    viscosity_deltas: Vec<Vec3>,

    hash: SpatialHash,
    foam: FoamPool,
    spawn_data: SpawnData3d,
    observers: Vec<SubstepObserver>,
    sim_time: f32,
}

impl FluidSim3d {
    pub fn new(
        spawn_data: SpawnData3d,
        backend: SortBackend,
        max_foam_particles: usize,
    ) -> Result<Self, Error> {
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
            sort_target_positions: vec![Vec3::ZERO; n],
            sort_target_predicted: vec![Vec3::ZERO; n],
            sort_target_velocities: vec![Vec3::ZERO; n],
            viscosity_deltas: vec![Vec3::ZERO; n],
            hash: SpatialHash::new(n, backend),
            foam: FoamPool::new(max_foam_particles),
            spawn_data,
            observers: Vec::new(),
            sim_time: 0.0,
        })
    }

    pub fn particle_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    /// Per-particle `(density, near density)` pairs.
    pub fn densities(&self) -> &[Vec2] {
        &self.densities
    }

    pub fn foam_particles(&self) -> &[FoamParticle] {
        self.foam.particles()
    }

    pub fn foam_live_count(&self) -> usize {
        self.foam.live_count()
    }

    pub fn sim_time(&self) -> f32 {
        self.sim_time
    }

    pub fn add_substep_observer(&mut self, observer: impl Fn(&FluidSim3d) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Re-seeds particle state from the retained spawn data and clears
    /// the foam pool.
    pub fn reset(&mut self) {
        self.positions.copy_from_slice(&self.spawn_data.positions);
        self.predicted_positions.copy_from_slice(&self.spawn_data.positions);
        self.velocities.copy_from_slice(&self.spawn_data.velocities);
        self.densities.fill(Vec2::ZERO);
        self.foam.reset();
        self.sim_time = 0.0;
    }

    /// Reset with fresh spawn data, reallocating every buffer if the
    /// particle count changed. Only valid between frames.
    pub fn reset_with(&mut self, spawn_data: SpawnData3d) -> Result<(), Error> {
        if spawn_data.positions.len() != spawn_data.velocities.len() {
            return Err(Error::LengthMismatch {
                expected: spawn_data.positions.len(),
                got: spawn_data.velocities.len(),
            });
        }

        let n = spawn_data.positions.len();
        if n != self.positions.len() {
            self.positions.resize(n, Vec3::ZERO);
            self.predicted_positions.resize(n, Vec3::ZERO);
            self.velocities.resize(n, Vec3::ZERO);
            self.densities.resize(n, Vec2::ZERO);
            self.sort_target_positions.resize(n, Vec3::ZERO);
            self.sort_target_predicted.resize(n, Vec3::ZERO);
            self.sort_target_velocities.resize(n, Vec3::ZERO);
            self.viscosity_deltas.resize(n, Vec3::ZERO);
            self.hash.resize(n);
        }
        self.spawn_data = spawn_data;
        self.reset();
        Ok(())
    }

    /// Advances one frame of `iterations_per_frame` substeps, then
    /// runs the once-per-frame foam update. Returns the number of
    /// substeps run.
    pub fn step_frame(&mut self, settings: &FluidSettings3d, frame_dt: f32) -> Result<u32, Error> {
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

        if settings.foam.active {
            self.update_foam(settings, frame_time);
        }

        Ok(iterations)
    }

    fn substep(&mut self, settings: &FluidSettings3d, dt: f32) -> Result<(), Error> {
        self.external_forces(settings, dt);
        self.run_spatial(settings.smoothing_radius)?;
        self.calculate_densities(settings);
        self.apply_pressure_forces(settings, dt);
        if settings.foam.active {
            self.spawn_foam(settings, dt);
        }
        if settings.viscosity_strength != 0.0 {
            self.apply_viscosity(settings, dt);
        }
        self.update_positions(settings, dt);
        Ok(())
    }

    fn external_forces(&mut self, settings: &FluidSettings3d, dt: f32) {
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
                *predicted = pos + *vel * dt;
            });
    }

    fn run_spatial(&mut self, cell_size: f32) -> Result<(), Error> {
        self.hash.update_keys_3d(&self.predicted_positions, cell_size)?;
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

        gather(sort_target_positions, positions.as_slice(), indices);
        gather(
            sort_target_predicted,
            predicted_positions.as_slice(),
            indices,
        );
        gather(sort_target_velocities, velocities.as_slice(), indices);

        positions.copy_from_slice(sort_target_positions);
        predicted_positions.copy_from_slice(sort_target_predicted);
        velocities.copy_from_slice(sort_target_velocities);

        Ok(())
    }

    fn calculate_densities(&mut self, settings: &FluidSettings3d) {
        let kernels = Kernels3d::new(settings.smoothing_radius);
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

    fn apply_pressure_forces(&mut self, settings: &FluidSettings3d, dt: f32) {
        let kernels = Kernels3d::new(settings.smoothing_radius);
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

            let mut force = Vec3::ZERO;
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
                    let dir = if dst > 0.0 { offset / dst } else { Vec3::Y };

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

    /// High-energy surface particles probabilistically shed foam into
    /// the pool. Runs right after the pressure stage, while densities
    /// and the hash both describe the current predicted positions.
    fn spawn_foam(&mut self, settings: &FluidSettings3d, dt: f32) {
        let foam_settings = &settings.foam;
        let rate = spawn_rate(foam_settings, self.sim_time);
        if rate <= 0.0 {
            return;
        }
        let surface_density = settings.target_density * SURFACE_DENSITY_FRACTION;
        let clock_bits = self.sim_time.to_bits();

        let Self {
            predicted_positions,
            velocities,
            densities,
            foam,
            ..
        } = self;
        let predicted = predicted_positions.as_slice();
        let velocities = velocities.as_slice();
        let densities = densities.as_slice();

        let requests: Vec<FoamParticle> = (0..predicted.len())
            .into_par_iter()
            .filter_map(|i| {
                let vel = velocities[i];
                let sqr_speed = vel.length_squared();
                let speed = sqr_speed.sqrt();

                let speed_t = inverse_lerp(
                    foam_settings.trapped_air_velocity_min_max.x,
                    foam_settings.trapped_air_velocity_min_max.y,
                    speed,
                );
                let energy_t = inverse_lerp(
                    foam_settings.kinetic_energy_min_max.x,
                    foam_settings.kinetic_energy_min_max.y,
                    0.5 * sqr_speed,
                );
                if speed_t <= 0.0 || energy_t <= 0.0 {
                    return None;
                }

                // Sparse surroundings mean a free surface; air is
                // trapped there far more easily than in the bulk.
                let surface_boost = if densities[i].x < surface_density {
                    2.0
                } else {
                    1.0
                };

                let probability = rate * energy_t * speed_t * surface_boost * dt;
                let roll = hash01(i as u32 ^ clock_bits);
                if roll >= probability {
                    return None;
                }

                let lifetime_t = hash01((i as u32).wrapping_mul(0x9E3779B9) ^ clock_bits);
                let lifetime = foam_settings.lifetime_min_max.x
                    + (foam_settings.lifetime_min_max.y - foam_settings.lifetime_min_max.x)
                        * lifetime_t;

                Some(FoamParticle {
                    position: predicted[i].to_array(),
                    velocity: vel.to_array(),
                    lifetime,
                    scale: 1.0,
                })
            })
            .collect();

        foam.spawn_many(requests);
    }

    fn apply_viscosity(&mut self, settings: &FluidSettings3d, dt: f32) {
        let kernels = Kernels3d::new(settings.smoothing_radius);
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
                    let mut sum = Vec3::ZERO;
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

    fn update_positions(&mut self, settings: &FluidSettings3d, dt: f32) {
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

    /// Once-per-frame diffuse pass: age, classify against the main
    /// solver's spatial hash, integrate, then compact out dissolved
    /// entries.
    fn update_foam(&mut self, settings: &FluidSettings3d, frame_dt: f32) {
        let kernels = Kernels3d::new(settings.smoothing_radius);
        let radius_sqr = settings.smoothing_radius * settings.smoothing_radius;
        let gravity = Vec3::new(0.0, settings.gravity, 0.0);
        let foam_settings = &settings.foam;

        let Self {
            predicted_positions,
            velocities,
            hash,
            foam,
            ..
        } = self;
        let predicted = predicted_positions.as_slice();
        let velocities = velocities.as_slice();
        let hash = &*hash;

        foam.particles_mut().par_iter_mut().for_each(|particle| {
            let pos = particle.position();
            let mut vel = particle.velocity();

            let mut neighbours = 0u32;
            let mut weighted_vel = Vec3::ZERO;
            let mut weight = 0.0;
            for_each_neighbour(
                hash,
                settings.smoothing_radius,
                predicted,
                pos,
                radius_sqr,
                |j, _, sqr_dst| {
                    neighbours += 1;
                    let w = kernels.poly6(sqr_dst);
                    weighted_vel += velocities[j] * w;
                    weight += w;
                },
            );
            let fluid_vel = if weight > 0.0 { weighted_vel / weight } else { vel };

            let kind = FoamKind::classify(
                neighbours,
                foam_settings.spray_classify_max_neighbours,
                foam_settings.bubble_classify_min_neighbours,
            );
            match kind {
                FoamKind::Spray => vel += gravity * frame_dt,
                FoamKind::Foam => vel = fluid_vel,
                FoamKind::Bubble => {
                    vel = vel.lerp(fluid_vel, (frame_dt * BUBBLE_DRAG_RATE).min(1.0));
                    vel -= gravity * foam_settings.bubble_buoyancy * frame_dt;
                }
            }

            let target_scale = if kind == FoamKind::Bubble {
                foam_settings.bubble_scale
            } else {
                1.0
            };
            let max_step = foam_settings.scale_change_speed * frame_dt;
            particle.scale += (target_scale - particle.scale).clamp(-max_step, max_step);

            let mut pos = pos + vel * frame_dt;
            resolve_collisions(&mut pos, &mut vel, settings);

            particle.lifetime -= frame_dt;
            particle.position = pos.to_array();
            particle.velocity = vel.to_array();
        });

        foam.compact();
    }

    pub fn write_gpu_particles(&self, out: &mut Vec<GpuParticle3d>) {
        out.clear();
        out.reserve(self.positions.len());
        for i in 0..self.positions.len() {
            out.push(GpuParticle3d {
                pos: self.positions[i].to_array(),
                density: self.densities[i].x,
                vel: self.velocities[i].to_array(),
                near_density: self.densities[i].y,
            });
        }
    }
}

fn gather(target: &mut [Vec3], source: &[Vec3], indices: &[u32]) {
    target
        .par_iter_mut()
        .zip(indices.par_iter())
        .for_each(|(dst, &i)| *dst = source[i as usize]);
}

fn external_acceleration(settings: &FluidSettings3d, pos: Vec3, vel: Vec3) -> Vec3 {
    let gravity_accel = Vec3::new(0.0, settings.gravity, 0.0);

    if settings.interaction_strength != 0.0 {
        let offset = settings.interaction_point - pos;
        let sqr_dst = offset.length_squared();
        let radius = settings.interaction_radius;
        if sqr_dst < radius * radius {
            let dst = sqr_dst.sqrt();
            let edge_t = dst / radius;
            let centre_t = 1.0 - edge_t;
            let dir = if dst > 0.0 { offset / dst } else { Vec3::ZERO };

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

fn resolve_collisions(pos: &mut Vec3, vel: &mut Vec3, settings: &FluidSettings3d) {
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
    if edge_dst.z <= 0.0 {
        pos.z = settings.bounds_centre.z + half_size.z * local.z.signum();
        vel.z *= -settings.collision_damping;
    }

    let obstacle_half = settings.obstacle_size * 0.5;
    if obstacle_half.x > 0.0 && obstacle_half.y > 0.0 && obstacle_half.z > 0.0 {
        let local = *pos - settings.obstacle_centre;
        let edge_dst = obstacle_half - local.abs();
        if edge_dst.x > 0.0 && edge_dst.y > 0.0 && edge_dst.z > 0.0 {
            // Push out along the axis of least penetration.
            if edge_dst.x <= edge_dst.y && edge_dst.x <= edge_dst.z {
                pos.x = settings.obstacle_centre.x + obstacle_half.x * local.x.signum();
                vel.x *= -settings.collision_damping;
            } else if edge_dst.y <= edge_dst.z {
                pos.y = settings.obstacle_centre.y + obstacle_half.y * local.y.signum();
                vel.y *= -settings.collision_damping;
            } else {
                pos.z = settings.obstacle_centre.z + obstacle_half.z * local.z.signum();
                vel.z *= -settings.collision_damping;
            }
        }
    }
}

fn spawn_rate(foam_settings: &FoamSettings, sim_time: f32) -> f32 {
    let fade_t = if foam_settings.spawn_rate_fade_in_time <= 0.0 {
        1.0
    } else {
        ((sim_time - foam_settings.spawn_rate_fade_start_time)
            / foam_settings.spawn_rate_fade_in_time)
            .clamp(0.0, 1.0)
    };
    foam_settings.trapped_air_spawn_rate * fade_t * fade_t
}

#[inline]
fn inverse_lerp(a: f32, b: f32, v: f32) -> f32 {
    if b > a { ((v - a) / (b - a)).clamp(0.0, 1.0) } else { 0.0 }
}

/// Deterministic per-particle random in [0, 1).
#[inline]
fn hash01(seed: u32) -> f32 {
    let mut state = seed.wrapping_mul(747796405).wrapping_add(2891336453);
    state = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277803737);
    state ^= state >> 22;
    (state >> 8) as f32 / (1u32 << 24) as f32
}

/// 3D counterpart of the 2D neighbor scan: 27 surrounding cells,
/// deduplicated by hashed key, distance-filtered against the true
/// smoothing radius.
fn for_each_neighbour(
    hash: &SpatialHash,
    cell_size: f32,
    positions: &[Vec3],
    sample: Vec3,
    radius_sqr: f32,
    mut visit: impl FnMut(usize, Vec3, f32),
) {
    let centre = cell_coord_3d(sample, cell_size);
    let keys = hash.keys();
    let offsets = hash.offsets();
    let table_size = hash.table_size();

    let mut cell_keys = [0u32; 27];
    let mut num_keys = 0;
    for ox in -1..=1 {
        for oy in -1..=1 {
            for oz in -1..=1 {
                let key = hash_cell_3d(centre + IVec3::new(ox, oy, oz), table_size);
                if !cell_keys[..num_keys].contains(&key) {
                    cell_keys[num_keys] = key;
                    num_keys += 1;
                }
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
