// bounded spray/foam/bubble particle pool (3D solver)
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// One diffuse particle. Layout is shader-compatible; classification
/// is not stored but derived each frame from the local fluid neighbor
/// count.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct FoamParticle {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    /// Seconds remaining; recycled once it reaches zero.
    pub lifetime: f32,
    pub scale: f32,
}

impl FoamParticle {
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn velocity(&self) -> Vec3 {
        Vec3::from_array(self.velocity)
    }

    pub fn is_dissolved(&self) -> bool {
        self.lifetime <= 0.0
    }
}

/// Behavior class, decided by how many fluid particles surround the
/// foam particle: airborne droplets fall ballistically, submerged
/// bubbles rise, surface foam rides the fluid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FoamKind {
    Spray,
    Foam,
    Bubble,
}

impl FoamKind {
    pub fn classify(neighbours: u32, spray_max: u32, bubble_min: u32) -> Self {
        if neighbours <= spray_max {
            FoamKind::Spray
        } else if neighbours >= bubble_min {
            FoamKind::Bubble
        } else {
            FoamKind::Foam
        }
    }
}

/// Fixed-capacity pool with a saturating live counter. Spawn requests
/// past capacity are dropped without error; dead entries are reclaimed
/// by [`compact`].
///
/// [`compact`]: FoamPool::compact
pub struct FoamPool {
    particles: Vec<FoamParticle>,
    compact_target: Vec<FoamParticle>,
    live: AtomicU32,
}

impl FoamPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            particles: vec![FoamParticle::default(); capacity],
            compact_target: vec![FoamParticle::default(); capacity],
            live: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.particles.len()
    }

    pub fn live_count(&self) -> usize {
        (self.live.load(Relaxed) as usize).min(self.capacity())
    }

    /// Live particles, in pool order.
    pub fn particles(&self) -> &[FoamParticle] {
        let live = self.live_count();
        &self.particles[..live]
    }

    pub fn particles_mut(&mut self) -> &mut [FoamParticle] {
        let live = self.live_count();
        &mut self.particles[..live]
    }

    pub fn spawn(&mut self, particle: FoamParticle) {
        let slot = self.live.fetch_add(1, Relaxed) as usize;
        if slot < self.particles.len() {
            self.particles[slot] = particle;
        } else {
            // Pool is full; undo the claim and drop the request.
            self.live.fetch_sub(1, Relaxed);
        }
    }

    pub fn spawn_many(&mut self, particles: impl IntoIterator<Item = FoamParticle>) {
        for particle in particles {
            self.spawn(particle);
        }
    }

    /// Scatters surviving particles to the front of the pool and
    /// copies them back, releasing every dissolved slot.
    pub fn compact(&mut self) {
        let live = self.live_count();
        let mut cursor = 0;
        for i in 0..live {
            if !self.particles[i].is_dissolved() {
                self.compact_target[cursor] = self.particles[i];
                cursor += 1;
            }
        }
        self.particles[..cursor].copy_from_slice(&self.compact_target[..cursor]);
        self.live.store(cursor as u32, Relaxed);
    }

    pub fn reset(&mut self) {
        self.live.store(0, Relaxed);
    }
}
