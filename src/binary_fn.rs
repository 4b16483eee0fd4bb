use crate::tape::TapeTerm;

/// The binary operations recorded on a tape, with their forward values and gradient rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
        }
    }

    #[cfg_attr(not(feature = "expr_name"), allow(dead_code))]
    pub(crate) fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }

    pub(crate) fn f(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
        }
    }

    /// Local derivatives with respect to lhs and rhs.
    pub(crate) fn grad(&self, lhs: f64, rhs: f64) -> (f64, f64) {
        match self {
            Self::Add => (1., 1.),
            Self::Sub => (1., -1.),
            Self::Mul => (rhs, lhs),
            Self::Div => (1. / rhs, -lhs / (rhs * rhs)),
        }
    }

    /// Pull `upstream` back to the operands, only for the sides in `wants`.
    /// Skipping a side avoids recording gradient nodes nobody will read.
    pub(crate) fn backward<'a>(
        &self,
        lhs: TapeTerm<'a>,
        rhs: TapeTerm<'a>,
        upstream: TapeTerm<'a>,
        wants: [bool; 2],
    ) -> [Option<TapeTerm<'a>>; 2] {
        let [want_lhs, want_rhs] = wants;
        match self {
            Self::Add => [want_lhs.then_some(upstream), want_rhs.then_some(upstream)],
            Self::Sub => [want_lhs.then_some(upstream), want_rhs.then(|| -upstream)],
            Self::Mul => [
                want_lhs.then(|| upstream * rhs),
                want_rhs.then(|| upstream * lhs),
            ],
            Self::Div => [
                want_lhs.then(|| upstream / rhs),
                want_rhs.then(|| -(upstream * lhs) / (rhs * rhs)),
            ],
        }
    }
}

#[test]
fn test_binary_grad() {
    assert_eq!(BinaryOp::Add.grad(2., 5.), (1., 1.));
    assert_eq!(BinaryOp::Sub.grad(2., 5.), (1., -1.));
    assert_eq!(BinaryOp::Mul.grad(2., 5.), (5., 2.));
    assert_eq!(BinaryOp::Div.grad(2., 4.), (0.25, -0.125));
}
