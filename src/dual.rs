use std::{
    fmt::Display,
    ops::{Add, Div, Mul, Neg, Sub},
};

use crate::{
    error::{AutogradError, Result},
    unary_fn::sign,
};

/// A first order dual number for forward mode differentiation.
///
/// `tangent` carries the derivative along one direction, chosen by seeding the inputs.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Dual {
    primal: f64,
    tangent: f64,
}

impl Dual {
    pub fn new(primal: f64, tangent: f64) -> Self {
        Self { primal, tangent }
    }

    /// The variable to derive with respect to.
    pub fn variable(primal: f64) -> Self {
        Self::new(primal, 1.)
    }

    pub fn constant(primal: f64) -> Self {
        Self::new(primal, 0.)
    }

    pub fn primal(&self) -> f64 {
        self.primal
    }

    pub fn tangent(&self) -> f64 {
        self.tangent
    }

    pub fn ln(self) -> Result<Self> {
        if self.primal <= 0. {
            return Err(AutogradError::Domain {
                op: "ln",
                value: self.primal,
            });
        }
        Ok(Self::new(self.primal.ln(), self.tangent / self.primal))
    }

    pub fn exp(self) -> Self {
        let ex = self.primal.exp();
        Self::new(ex, ex * self.tangent)
    }

    pub fn sin(self) -> Self {
        Self::new(self.primal.sin(), self.primal.cos() * self.tangent)
    }

    pub fn cos(self) -> Self {
        Self::new(self.primal.cos(), -self.primal.sin() * self.tangent)
    }

    pub fn tan(self) -> Self {
        let cos = self.primal.cos();
        Self::new(self.primal.tan(), self.tangent / (cos * cos))
    }

    pub fn abs(self) -> Self {
        Self::new(self.primal.abs(), sign(self.primal) * self.tangent)
    }

    pub fn recip(self) -> Self {
        Self::new(
            self.primal.recip(),
            -self.tangent / (self.primal * self.primal),
        )
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.primal + rhs.primal, self.tangent + rhs.tangent)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.primal - rhs.primal, self.tangent - rhs.tangent)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        Self::new(
            self.primal * rhs.primal,
            self.tangent * rhs.primal + self.primal * rhs.tangent,
        )
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        Self::new(
            self.primal / rhs.primal,
            (self.tangent * rhs.primal - self.primal * rhs.tangent) / (rhs.primal * rhs.primal),
        )
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self::new(-self.primal, -self.tangent)
    }
}

impl Add<f64> for Dual {
    type Output = Self;
    fn add(self, rhs: f64) -> Self::Output {
        self + Self::constant(rhs)
    }
}

impl Sub<f64> for Dual {
    type Output = Self;
    fn sub(self, rhs: f64) -> Self::Output {
        self - Self::constant(rhs)
    }
}

impl Mul<f64> for Dual {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self::Output {
        Self::new(self.primal * rhs, self.tangent * rhs)
    }
}

impl Div<f64> for Dual {
    type Output = Self;
    fn div(self, rhs: f64) -> Self::Output {
        Self::new(self.primal / rhs, self.tangent / rhs)
    }
}

impl Add<Dual> for f64 {
    type Output = Dual;
    fn add(self, rhs: Dual) -> Self::Output {
        Dual::constant(self) + rhs
    }
}

impl Sub<Dual> for f64 {
    type Output = Dual;
    fn sub(self, rhs: Dual) -> Self::Output {
        Dual::constant(self) - rhs
    }
}

impl Mul<Dual> for f64 {
    type Output = Dual;
    fn mul(self, rhs: Dual) -> Self::Output {
        rhs * self
    }
}

impl Div<Dual> for f64 {
    type Output = Dual;
    fn div(self, rhs: Dual) -> Self::Output {
        Dual::constant(self) / rhs
    }
}

impl Display for Dual {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let precision = f.precision().unwrap_or(4);
        write!(
            f,
            "Dual({:.*}, {:.*})",
            precision, self.primal, precision, self.tangent
        )
    }
}

#[test]
fn test_dual() {
    let d1 = Dual::new(1., 2.);
    let d2 = Dual::new(3., 4.);
    assert_eq!(d1 + d2, Dual::new(4., 6.));
    assert_eq!(d2 - d1, Dual::new(2., 2.));

    let d4 = Dual::new(1., 2.);
    let d5 = Dual::new(20., -10.);
    assert_eq!(d4 * d5, Dual::new(20., 30.));
    assert_eq!(d4 * d5, d5 * d4);
    assert_eq!(d5 / d4, Dual::new(20., -50.));
    assert_eq!(2. * d4, Dual::new(2., 4.));
    assert_eq!(-d4, Dual::new(-1., -2.));
}

#[test]
fn test_dual_functions() {
    let x = Dual::variable(2.);
    // d/dx ln(x) * x = ln(x) + 1
    let y = x.ln().unwrap() * x;
    assert!((y.tangent() - (2f64.ln() + 1.)).abs() < 1e-15);
    assert_eq!(Dual::variable(0.).abs().tangent(), 0.);
    assert_eq!(Dual::variable(-3.).abs(), Dual::new(3., -1.));
    assert!(Dual::variable(-1.).ln().is_err());
    let t = Dual::variable(0.5).tan();
    assert_eq!(t.primal(), 0.5f64.tan());
    assert!((t.tangent() - (1. + 0.5f64.tan().powi(2))).abs() < 1e-12);
    assert_eq!(Dual::variable(4.).recip(), Dual::new(0.25, -0.0625));
    assert_eq!(format!("{:.2}", Dual::new(0.5, 1.)), "Dual(0.50, 1.00)");
}
