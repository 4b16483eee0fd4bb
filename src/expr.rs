//! The target expressions, written once over [`Scalar`] so they can be evaluated with plain
//! numbers, dual numbers or tape terms.

use crate::{error::Result, Scalar};

/// A polynomial built from a shared intermediate, so that `x` reaches the output through
/// several paths: `(x + 1) + x + 3 (x + 1) ((x + 1) + x)`.
pub fn f_x<S: Scalar>(x: S) -> S {
    let b = x + 1.;
    let c = b * 3.;
    let d = b + x;
    let e = c * d;
    d + e
}

/// An expression with a branch on an intermediate value and a 4-step multiplicative
/// accumulation loop. Fails if `x` is not positive.
pub fn f_xy<S: Scalar>(x: S, y: S) -> Result<S> {
    let mut tmp = x.ln()? + (-x) * y - y.sin();
    if (tmp * 2.).lt(tmp.constant(0.)) {
        tmp = tmp * tmp;
    }
    let tmp2 = tmp;
    for i in 1..5 {
        tmp = tmp * ((y - x) / i as f64).exp();
    }
    Ok(tmp / ((x * 2.).cos().abs() + tmp2))
}

#[test]
fn test_f_x_plain() {
    // 6x^2 + 11x + 4
    assert_eq!(f_x(2.), 50.);
    assert_eq!(f_x(0.), 4.);
}

#[test]
fn test_f_xy_plain() {
    let value = f_xy(2., 5.).unwrap();
    assert!((value - 513.1992293440788).abs() < 1e-9);
    assert!(f_xy(0., 5.).is_err());
}
