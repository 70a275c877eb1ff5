use bytemuck::{Pod, Zeroable};

// Plain float arrays rather than glam types so the layout matches
// shader-side structs byte for byte.

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuParticle2d {
    pub pos: [f32; 2],
    pub vel: [f32; 2],
    /// x = density, y = near density.
    pub density: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuParticle3d {
    pub pos: [f32; 3],
    pub density: f32,
    pub vel: [f32; 3],
    pub near_density: f32,
}
