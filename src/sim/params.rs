//! Simulation settings bundles.
//!
//! Every tunable is an explicit field, passed by reference into the
//! solvers' per-frame update; changing a value takes effect on the
//! next substep without any reallocation. Particle and foam capacity
//! are fixed at construction instead (resizing is only valid between
//! frames, through a full reset).

use bevy::prelude::Resource;
use glam::{Vec2, Vec3};

/// Scalar settings for the 2D solver.
#[derive(Resource, Clone, Debug)]
pub struct FluidSettings2d {
    /// Multiplier on real frame time before substepping.
    pub time_scale: f32,
    /// Frame-rate floor: frames longer than `1 / max_timestep_fps`
    /// simulate slower than real time rather than taking an oversized
    /// step. Zero disables the clamp.
    pub max_timestep_fps: f32,
    pub iterations_per_frame: u32,

    pub gravity: f32,
    /// Velocity retained along an axis after a collision, in [0, 1].
    pub collision_damping: f32,
    pub smoothing_radius: f32,
    pub target_density: f32,
    pub pressure_multiplier: f32,
    pub near_pressure_multiplier: f32,
    /// Zero skips the viscosity stage entirely.
    pub viscosity_strength: f32,

    pub bounds_centre: Vec2,
    pub bounds_size: Vec2,
    pub obstacle_size: Vec2,
    pub obstacle_centre: Vec2,

    pub interaction_point: Vec2,
    /// Positive attracts, negative repels, zero disables.
    pub interaction_strength: f32,
    pub interaction_radius: f32,
}

impl Default for FluidSettings2d {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            max_timestep_fps: 60.0,
            iterations_per_frame: 3,
            gravity: -12.0,
            collision_damping: 0.95,
            smoothing_radius: 0.35,
            target_density: 55.0,
            pressure_multiplier: 500.0,
            near_pressure_multiplier: 18.0,
            viscosity_strength: 0.06,
            bounds_centre: Vec2::ZERO,
            bounds_size: Vec2::new(17.1, 9.3),
            obstacle_size: Vec2::ZERO,
            obstacle_centre: Vec2::ZERO,
            interaction_point: Vec2::ZERO,
            interaction_strength: 0.0,
            interaction_radius: 2.0,
        }
    }
}

/// Scalar settings for the 3D solver.
#[derive(Resource, Clone, Debug)]
pub struct FluidSettings3d {
    pub time_scale: f32,
    pub max_timestep_fps: f32,
    pub iterations_per_frame: u32,

    pub gravity: f32,
    pub collision_damping: f32,
    pub smoothing_radius: f32,
    pub target_density: f32,
    pub pressure_multiplier: f32,
    pub near_pressure_multiplier: f32,
    pub viscosity_strength: f32,

    pub bounds_centre: Vec3,
    pub bounds_size: Vec3,
    pub obstacle_size: Vec3,
    pub obstacle_centre: Vec3,

    pub interaction_point: Vec3,
    pub interaction_strength: f32,
    pub interaction_radius: f32,

    pub foam: FoamSettings,
}

impl Default for FluidSettings3d {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            max_timestep_fps: 60.0,
            iterations_per_frame: 3,
            gravity: -10.0,
            collision_damping: 0.95,
            smoothing_radius: 0.2,
            target_density: 630.0,
            pressure_multiplier: 288.0,
            near_pressure_multiplier: 2.15,
            viscosity_strength: 0.0,
            bounds_centre: Vec3::ZERO,
            bounds_size: Vec3::new(3.5, 2.0, 2.0),
            obstacle_size: Vec3::ZERO,
            obstacle_centre: Vec3::ZERO,
            interaction_point: Vec3::ZERO,
            interaction_strength: 0.0,
            interaction_radius: 0.5,
            foam: FoamSettings::default(),
        }
    }
}

/// Spray/foam/bubble tuning (3D only).
#[derive(Clone, Debug)]
pub struct FoamSettings {
    pub active: bool,
    /// Spawn attempts per second of simulated time, before fade-in.
    pub trapped_air_spawn_rate: f32,
    pub spawn_rate_fade_in_time: f32,
    pub spawn_rate_fade_start_time: f32,
    /// Speed range mapped onto spawn probability.
    pub trapped_air_velocity_min_max: Vec2,
    /// Kinetic energy range mapped onto spawn probability.
    pub kinetic_energy_min_max: Vec2,
    /// Lifetime assigned at spawn, lerped by the speed factor.
    pub lifetime_min_max: Vec2,
    pub bubble_buoyancy: f32,
    /// At most this many fluid neighbors classifies as spray.
    pub spray_classify_max_neighbours: u32,
    /// At least this many fluid neighbors classifies as bubble.
    pub bubble_classify_min_neighbours: u32,
    pub bubble_scale: f32,
    pub scale_change_speed: f32,
}

impl Default for FoamSettings {
    fn default() -> Self {
        Self {
            active: false,
            trapped_air_spawn_rate: 70.0,
            spawn_rate_fade_in_time: 0.5,
            spawn_rate_fade_start_time: 0.0,
            trapped_air_velocity_min_max: Vec2::new(5.0, 25.0),
            kinetic_energy_min_max: Vec2::new(15.0, 80.0),
            lifetime_min_max: Vec2::new(2.0, 8.0),
            bubble_buoyancy: 1.5,
            spray_classify_max_neighbours: 5,
            bubble_classify_min_neighbours: 15,
            bubble_scale: 0.5,
            scale_change_speed: 7.0,
        }
    }
}
