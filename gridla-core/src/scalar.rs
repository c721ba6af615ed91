//! Scalar traits.
//!
//! [`Entry`] is anything the redistribution engine can move (it only needs
//! copying and, for contractions, addition). [`Field`] adds the arithmetic the
//! kernels and factorizations need for `f32`, `f64`, `Complex32` and
//! `Complex64`; [`Real`] is the subset with an ordering.

use num_complex::Complex;
use num_traits::{Float, FromPrimitive, NumAssign, Zero};
use std::fmt::{Display, LowerExp};
use std::ops::{AddAssign, Mul, Neg};

/// Element type of a distributed matrix.
pub trait Entry:
    nalgebra::Scalar + Copy + Send + Sync + Default + Zero + AddAssign + Mul<Output = Self>
{
}

impl<T> Entry for T where
    T: nalgebra::Scalar + Copy + Send + Sync + Default + Zero + AddAssign + Mul<Output = T>
{
}

/// Real or complex floating-point scalar.
pub trait Field: Entry + NumAssign + Neg<Output = Self> + Display {
    /// Underlying real type.
    type Real: Real;
    /// Higher-precision type used by promoted refinement.
    type Promoted: Field;

    /// Whether flop counts must be scaled by four.
    const IS_COMPLEX: bool;
    /// False when the type already is its own promotion.
    const PROMOTES: bool;

    fn conj(self) -> Self;
    fn modulus(self) -> Self::Real;
    fn modulus_sq(self) -> Self::Real;
    fn real_part(self) -> Self::Real;
    fn imag_part(self) -> Self::Real;
    fn from_real(r: Self::Real) -> Self;
    fn promote(self) -> Self::Promoted;
    fn demote(p: Self::Promoted) -> Self;
    fn finite(self) -> bool;

    /// Conjugate only when `conjugate` is set.
    #[inline]
    fn conj_if(self, conjugate: bool) -> Self {
        if conjugate {
            self.conj()
        } else {
            self
        }
    }
}

/// Ordered real scalar.
pub trait Real: Field<Real = Self> + Float + FromPrimitive + PartialOrd + LowerExp {
    /// Lossy conversion of a literal.
    fn lit(v: f64) -> Self;
    /// Conversion for reporting.
    fn to_f64_lossy(self) -> f64;
}

macro_rules! impl_real {
    ($t:ty, $promoted:ty, $promotes:expr) => {
        impl Field for $t {
            type Real = $t;
            type Promoted = $promoted;
            const IS_COMPLEX: bool = false;
            const PROMOTES: bool = $promotes;

            #[inline]
            fn conj(self) -> Self {
                self
            }
            #[inline]
            fn modulus(self) -> $t {
                Float::abs(self)
            }
            #[inline]
            fn modulus_sq(self) -> $t {
                self * self
            }
            #[inline]
            fn real_part(self) -> $t {
                self
            }
            #[inline]
            fn imag_part(self) -> $t {
                0.0
            }
            #[inline]
            fn from_real(r: $t) -> Self {
                r
            }
            #[inline]
            fn promote(self) -> $promoted {
                self as $promoted
            }
            #[inline]
            fn demote(p: $promoted) -> Self {
                p as $t
            }
            #[inline]
            fn finite(self) -> bool {
                Float::is_finite(self)
            }
        }

        impl Real for $t {
            #[inline]
            fn lit(v: f64) -> Self {
                v as $t
            }
            #[inline]
            fn to_f64_lossy(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_real!(f32, f64, true);
impl_real!(f64, f64, false);

macro_rules! impl_complex {
    ($t:ty, $promoted:ty, $promotes:expr) => {
        impl Field for Complex<$t> {
            type Real = $t;
            type Promoted = Complex<$promoted>;
            const IS_COMPLEX: bool = true;
            const PROMOTES: bool = $promotes;

            #[inline]
            fn conj(self) -> Self {
                Complex::new(self.re, -self.im)
            }
            #[inline]
            fn modulus(self) -> $t {
                self.norm()
            }
            #[inline]
            fn modulus_sq(self) -> $t {
                self.norm_sqr()
            }
            #[inline]
            fn real_part(self) -> $t {
                self.re
            }
            #[inline]
            fn imag_part(self) -> $t {
                self.im
            }
            #[inline]
            fn from_real(r: $t) -> Self {
                Complex::new(r, 0.0)
            }
            #[inline]
            fn promote(self) -> Complex<$promoted> {
                Complex::new(self.re as $promoted, self.im as $promoted)
            }
            #[inline]
            fn demote(p: Complex<$promoted>) -> Self {
                Complex::new(p.re as $t, p.im as $t)
            }
            #[inline]
            fn finite(self) -> bool {
                self.re.is_finite() && self.im.is_finite()
            }
        }
    };
}

impl_complex!(f32, f64, true);
impl_complex!(f64, f64, false);

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    #[test]
    fn test_promotion_flags() {
        assert!(<f32 as Field>::PROMOTES);
        assert!(!<f64 as Field>::PROMOTES);
        assert!(<Complex64 as Field>::IS_COMPLEX);
        assert_eq!(<f32 as Field>::promote(1.5f32), 1.5f64);
    }

    #[test]
    fn test_complex_helpers() {
        let z = Complex64::new(3.0, -4.0);
        assert_eq!(Field::modulus(z), 5.0);
        assert_eq!(z.conj_if(true), Complex64::new(3.0, 4.0));
        assert_eq!(z.conj_if(false), z);
        assert_eq!(Field::modulus_sq(z), 25.0);
    }
}
