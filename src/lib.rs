mod backward;
mod binary_fn;
mod dual;
pub mod error;
pub mod expr;
mod scalar;
pub mod tape;
mod unary_fn;

pub use backward::{grad, GradOptions};
pub use dual::Dual;
pub use error::{AutogradError, Result};
pub use scalar::Scalar;
pub use tape::{Edge, Tape, TapeIndex, TapeState, TapeTerm};
pub use unary_fn::UnaryFn;
