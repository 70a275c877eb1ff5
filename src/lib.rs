use thiserror::Error;

pub mod sorting {
    pub mod bitonic;
    pub mod count_sort;
    pub mod scan;
}

pub mod spatial {
    pub mod hash_grid;
}

pub mod sim {
    pub mod ffi;
    pub mod foam;
    pub mod kernels;
    pub mod params;
    pub mod solver2d;
    pub mod solver3d;
    pub mod spawner;
}

pub mod plugin;

/// Fatal precondition violations. Capacity exhaustion (foam pool full)
/// is not an error; those spawn requests are silently dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("buffer length mismatch (expected {expected}, got {got})")]
    LengthMismatch { expected: usize, got: usize },

    #[error("key {key} exceeds declared maximum {max_key}")]
    KeyOutOfRange { key: u32, max_key: u32 },
}
