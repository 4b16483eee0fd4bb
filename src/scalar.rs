use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::{
    error::{AutogradError, Result},
    Dual, TapeTerm,
};

/// A trait that represents a type that expressions can be written over.
///
/// Implementations are provided for plain `f64` (evaluation only), [`Dual`] (forward mode)
/// and [`TapeTerm`] (reverse mode), so that the same function can be evaluated and
/// differentiated in any of them.
pub trait Scalar:
    Copy
    + Add<Self, Output = Self>
    + Sub<Self, Output = Self>
    + Mul<Self, Output = Self>
    + Div<Self, Output = Self>
    + Neg<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
{
    fn value(&self) -> f64;

    /// A constant that does not carry derivatives, in the same context as `self`.
    fn constant(&self, value: f64) -> Self;

    fn ln(self) -> Result<Self>;
    fn exp(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn abs(self) -> Self;

    /// Compare the current values. Not differentiable; only meant to steer control flow.
    fn lt(self, rhs: Self) -> bool {
        self.value() < rhs.value()
    }
}

impl Scalar for f64 {
    fn value(&self) -> f64 {
        *self
    }

    fn constant(&self, value: f64) -> Self {
        value
    }

    fn ln(self) -> Result<Self> {
        if self <= 0. {
            return Err(AutogradError::Domain {
                op: "ln",
                value: self,
            });
        }
        Ok(f64::ln(self))
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn sin(self) -> Self {
        f64::sin(self)
    }

    fn cos(self) -> Self {
        f64::cos(self)
    }

    fn abs(self) -> Self {
        f64::abs(self)
    }
}

impl Scalar for Dual {
    fn value(&self) -> f64 {
        self.primal()
    }

    fn constant(&self, value: f64) -> Self {
        Dual::constant(value)
    }

    fn ln(self) -> Result<Self> {
        Dual::ln(self)
    }

    fn exp(self) -> Self {
        Dual::exp(self)
    }

    fn sin(self) -> Self {
        Dual::sin(self)
    }

    fn cos(self) -> Self {
        Dual::cos(self)
    }

    fn abs(self) -> Self {
        Dual::abs(self)
    }
}

impl<'a> Scalar for TapeTerm<'a> {
    fn value(&self) -> f64 {
        TapeTerm::value(self)
    }

    fn constant(&self, value: f64) -> Self {
        self.tape.constant(value)
    }

    fn ln(self) -> Result<Self> {
        TapeTerm::ln(self)
    }

    fn exp(self) -> Self {
        TapeTerm::exp(self)
    }

    fn sin(self) -> Self {
        TapeTerm::sin(self)
    }

    fn cos(self) -> Self {
        TapeTerm::cos(self)
    }

    fn abs(self) -> Self {
        TapeTerm::abs(self)
    }

    fn lt(self, rhs: Self) -> bool {
        TapeTerm::lt(self, rhs)
    }
}
