//! Initial particle placement.
//!
//! The solvers treat spawners as opaque data sources: they consume the
//! produced position/velocity arrays at construction and on reset and
//! never look at the regions again. Jitter uses a seeded rng so runs
//! are reproducible.

use bevy::prelude::Resource;
use glam::{Vec2, Vec3};
use rand::{Rng, SeedableRng, rngs::StdRng};

#[derive(Clone, Debug, Default)]
pub struct SpawnData2d {
    pub positions: Vec<Vec2>,
    pub velocities: Vec<Vec2>,
}

#[derive(Clone, Debug, Default)]
pub struct SpawnData3d {
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
}

#[derive(Clone, Debug)]
pub struct SpawnRegion2d {
    pub centre: Vec2,
    pub size: Vec2,
}

#[derive(Resource, Clone, Debug)]
pub struct Spawner2d {
    /// Particles per unit area.
    pub spawn_density: f32,
    pub initial_velocity: Vec2,
    pub jitter_strength: f32,
    pub regions: Vec<SpawnRegion2d>,
    pub seed: u64,
}

impl Default for Spawner2d {
    fn default() -> Self {
        Self {
            spawn_density: 80.0,
            initial_velocity: Vec2::ZERO,
            jitter_strength: 0.025,
            regions: vec![SpawnRegion2d {
                centre: Vec2::new(-3.0, 0.0),
                size: Vec2::new(7.0, 7.0),
            }],
            seed: 42,
        }
    }
}

impl Spawner2d {
    pub fn spawn_data(&self) -> SpawnData2d {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut data = SpawnData2d::default();

        for region in &self.regions {
            let (nx, ny) = spawn_count_per_axis_2d(region.size, self.spawn_density);
            for y in 0..ny {
                for x in 0..nx {
                    let tx = axis_fraction(x, nx);
                    let ty = axis_fraction(y, ny);
                    let point = Vec2::new(
                        (tx - 0.5) * region.size.x + region.centre.x,
                        (ty - 0.5) * region.size.y + region.centre.y,
                    );

                    let angle = rng.r#gen::<f32>() * std::f32::consts::TAU;
                    let dir = Vec2::new(angle.cos(), angle.sin());
                    let jitter = dir * self.jitter_strength * (rng.r#gen::<f32>() - 0.5);

                    data.positions.push(point + jitter);
                    data.velocities.push(self.initial_velocity);
                }
            }
        }

        data
    }

    pub fn particle_count(&self) -> usize {
        self.regions
            .iter()
            .map(|region| {
                let (nx, ny) = spawn_count_per_axis_2d(region.size, self.spawn_density);
                nx * ny
            })
            .sum()
    }
}

#[derive(Clone, Debug)]
pub struct SpawnRegion3d {
    pub centre: Vec3,
    pub size: f32,
}

#[derive(Resource, Clone, Debug)]
pub struct Spawner3d {
    /// Particles per unit volume.
    pub spawn_density: f32,
    pub initial_velocity: Vec3,
    pub jitter_strength: f32,
    pub regions: Vec<SpawnRegion3d>,
    pub seed: u64,
}

impl Default for Spawner3d {
    fn default() -> Self {
        Self {
            spawn_density: 600.0,
            initial_velocity: Vec3::ZERO,
            jitter_strength: 0.02,
            regions: vec![SpawnRegion3d {
                centre: Vec3::new(0.0, 0.2, 0.0),
                size: 1.2,
            }],
            seed: 42,
        }
    }
}

impl Spawner3d {
    pub fn spawn_data(&self) -> SpawnData3d {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut data = SpawnData3d::default();

        for region in &self.regions {
            let per_axis = particles_per_axis_3d(region.size, self.spawn_density);
            for x in 0..per_axis {
                for y in 0..per_axis {
                    for z in 0..per_axis {
                        let t = Vec3::new(
                            axis_fraction(x, per_axis),
                            axis_fraction(y, per_axis),
                            axis_fraction(z, per_axis),
                        );
                        let point = (t - 0.5) * region.size + region.centre;
                        let jitter = inside_unit_sphere(&mut rng) * self.jitter_strength;

                        data.positions.push(point + jitter);
                        data.velocities.push(self.initial_velocity);
                    }
                }
            }
        }

        data
    }

    pub fn particle_count(&self) -> usize {
        self.regions
            .iter()
            .map(|region| particles_per_axis_3d(region.size, self.spawn_density).pow(3))
            .sum()
    }
}

#[inline]
fn axis_fraction(i: usize, n: usize) -> f32 {
    if n > 1 { i as f32 / (n - 1) as f32 } else { 0.5 }
}

fn spawn_count_per_axis_2d(size: Vec2, spawn_density: f32) -> (usize, usize) {
    let area = size.x * size.y;
    let target_total = (area * spawn_density).ceil();

    // Split the target between the axes in proportion to side length.
    let t = size / (size.x + size.y);
    let m = (target_total / (t.x * t.y)).sqrt();
    let nx = (t.x * m).ceil() as usize;
    let ny = (t.y * m).ceil() as usize;
    (nx.max(1), ny.max(1))
}

fn particles_per_axis_3d(size: f32, spawn_density: f32) -> usize {
    let volume = size * size * size;
    let target = volume * spawn_density;
    (target.cbrt() as usize).max(1)
}

fn inside_unit_sphere(rng: &mut StdRng) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.r#gen::<f32>() * 2.0 - 1.0,
            rng.r#gen::<f32>() * 2.0 - 1.0,
            rng.r#gen::<f32>() * 2.0 - 1.0,
        );
        if v.length_squared() <= 1.0 {
            return v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_counts_match_reported_total() {
        let spawner = Spawner2d::default();
        let data = spawner.spawn_data();
        assert_eq!(data.positions.len(), spawner.particle_count());
        assert_eq!(data.positions.len(), data.velocities.len());
        assert!(!data.positions.is_empty());

        let spawner = Spawner3d::default();
        let data = spawner.spawn_data();
        assert_eq!(data.positions.len(), spawner.particle_count());
    }

    #[test]
    fn particles_stay_near_their_region() {
        let spawner = Spawner2d {
            jitter_strength: 0.0,
            regions: vec![SpawnRegion2d {
                centre: Vec2::new(1.0, 2.0),
                size: Vec2::new(2.0, 2.0),
            }],
            ..Spawner2d::default()
        };
        for p in spawner.spawn_data().positions {
            assert!((p.x - 1.0).abs() <= 1.0 + 1e-5);
            assert!((p.y - 2.0).abs() <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn seeded_spawns_are_reproducible() {
        let spawner = Spawner3d::default();
        assert_eq!(spawner.spawn_data().positions, spawner.spawn_data().positions);
    }
}
