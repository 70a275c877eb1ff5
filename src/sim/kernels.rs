// SPH smoothing kernels with precomputed normalization constants
use std::f32::consts::PI;

/// 2D kernel set for smoothing radius `h`. Poly6 weighs density and
/// viscosity (smooth, zero gradient at the center); the spiky kernels
/// drive pressure gradients (non-vanishing gradient near the center).
/// Derivative functions return signed values (negative inside the
/// support), so forces point away from compressed neighbors when
/// multiplied by the outward direction.
#[derive(Debug, Clone, Copy)]
pub struct Kernels2d {
    h: f32,
    poly6_scale: f32,
    spiky_pow2_scale: f32,
    spiky_pow2_deriv_scale: f32,
    spiky_pow3_deriv_scale: f32,
}

impl Kernels2d {
    pub fn new(h: f32) -> Self {
        Self {
            h,
            poly6_scale: 4.0 / (PI * h.powi(8)),
            spiky_pow2_scale: 6.0 / (PI * h.powi(4)),
            spiky_pow2_deriv_scale: 12.0 / (PI * h.powi(4)),
            spiky_pow3_deriv_scale: 30.0 / (PI * h.powi(5)),
        }
    }

    /// Density weight. Takes the squared distance.
    #[inline]
    pub fn poly6(&self, sqr_dst: f32) -> f32 {
        let h2 = self.h * self.h;
        if sqr_dst < h2 {
            let v = h2 - sqr_dst;
            v * v * v * self.poly6_scale
        } else {
            0.0
        }
    }

    /// Near-density weight.
    #[inline]
    pub fn spiky_pow2(&self, dst: f32) -> f32 {
        if dst < self.h {
            let v = self.h - dst;
            v * v * self.spiky_pow2_scale
        } else {
            0.0
        }
    }

    /// Near-pressure gradient magnitude.
    #[inline]
    pub fn spiky_pow2_derivative(&self, dst: f32) -> f32 {
        if dst < self.h {
            -(self.h - dst) * self.spiky_pow2_deriv_scale
        } else {
            0.0
        }
    }

    /// Pressure gradient magnitude.
    #[inline]
    pub fn spiky_pow3_derivative(&self, dst: f32) -> f32 {
        if dst < self.h {
            let v = self.h - dst;
            -v * v * self.spiky_pow3_deriv_scale
        } else {
            0.0
        }
    }
}

/// 3D kernel set, same roles as [`Kernels2d`].
#[derive(Debug, Clone, Copy)]
pub struct Kernels3d {
    h: f32,
    poly6_scale: f32,
    spiky_pow2_scale: f32,
    spiky_pow2_deriv_scale: f32,
    spiky_pow3_deriv_scale: f32,
}

impl Kernels3d {
    pub fn new(h: f32) -> Self {
        Self {
            h,
            poly6_scale: 315.0 / (64.0 * PI * h.powi(9)),
            spiky_pow2_scale: 15.0 / (2.0 * PI * h.powi(5)),
            spiky_pow2_deriv_scale: 15.0 / (PI * h.powi(5)),
            spiky_pow3_deriv_scale: 45.0 / (PI * h.powi(6)),
        }
    }

    #[inline]
    pub fn poly6(&self, sqr_dst: f32) -> f32 {
        let h2 = self.h * self.h;
        if sqr_dst < h2 {
            let v = h2 - sqr_dst;
            v * v * v * self.poly6_scale
        } else {
            0.0
        }
    }

    #[inline]
    pub fn spiky_pow2(&self, dst: f32) -> f32 {
        if dst < self.h {
            let v = self.h - dst;
            v * v * self.spiky_pow2_scale
        } else {
            0.0
        }
    }

    #[inline]
    pub fn spiky_pow2_derivative(&self, dst: f32) -> f32 {
        if dst < self.h {
            -(self.h - dst) * self.spiky_pow2_deriv_scale
        } else {
            0.0
        }
    }

    #[inline]
    pub fn spiky_pow3_derivative(&self, dst: f32) -> f32 {
        if dst < self.h {
            let v = self.h - dst;
            -v * v * self.spiky_pow3_deriv_scale
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernels_vanish_at_support_edge() {
        let k2 = Kernels2d::new(0.35);
        assert_eq!(k2.poly6(0.35 * 0.35), 0.0);
        assert_eq!(k2.spiky_pow2(0.35), 0.0);
        assert_eq!(k2.spiky_pow2_derivative(0.35), 0.0);
        assert_eq!(k2.spiky_pow3_derivative(0.35), 0.0);

        let k3 = Kernels3d::new(0.2);
        assert_eq!(k3.poly6(0.2 * 0.2), 0.0);
        assert_eq!(k3.spiky_pow2(0.2), 0.0);
    }

    #[test]
    fn self_contribution_at_zero_distance() {
        let h = 0.35;
        let k = Kernels2d::new(h);
        let expected = 4.0 / (PI * h.powi(8)) * h.powi(6);
        assert!((k.poly6(0.0) - expected).abs() < expected * 1e-5);
        assert!(k.spiky_pow2(0.0) > 0.0);
    }

    #[test]
    fn derivatives_are_negative_inside_support() {
        let k = Kernels3d::new(0.2);
        assert!(k.spiky_pow3_derivative(0.1) < 0.0);
        assert!(k.spiky_pow2_derivative(0.1) < 0.0);
    }
}
