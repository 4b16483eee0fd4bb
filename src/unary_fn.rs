use crate::tape::TapeTerm;

/// A trait that represents an unary operation on a value.
/// It needs to implement a transformation of the value, its local derivative
/// and the rule that pulls the gradient back to the input.
pub trait UnaryFn {
    fn name(&self) -> String;
    fn f(&self, data: f64) -> f64;
    fn grad(&self, data: f64) -> f64;

    /// Build the gradient of the input out of terms, given the input, the output of this
    /// function and the gradient flowing into the output.
    ///
    /// The result is recorded on the same tape as `upstream`, so if the terms are tracked,
    /// the gradient can be differentiated again.
    /// Returning `None` means the function has no graph rule. A first order pass then falls
    /// back to `grad`, but a pass with `create_graph` fails with `NoGraphRule`.
    fn backward<'a>(
        &self,
        _input: TapeTerm<'a>,
        _output: TapeTerm<'a>,
        _upstream: TapeTerm<'a>,
    ) -> Option<TapeTerm<'a>> {
        None
    }
}

/// Sign with zero at the origin, used as the derivative of `abs`.
pub(crate) fn sign(data: f64) -> f64 {
    if data > 0. {
        1.
    } else if data < 0. {
        -1.
    } else {
        0.
    }
}

pub(crate) struct NegFn;

impl UnaryFn for NegFn {
    fn name(&self) -> String {
        "neg".to_string()
    }
    fn f(&self, data: f64) -> f64 {
        -data
    }
    fn grad(&self, _data: f64) -> f64 {
        -1.
    }
    fn backward<'a>(
        &self,
        _: TapeTerm<'a>,
        _: TapeTerm<'a>,
        upstream: TapeTerm<'a>,
    ) -> Option<TapeTerm<'a>> {
        Some(-upstream)
    }
}

pub(crate) struct LnFn;

impl UnaryFn for LnFn {
    fn name(&self) -> String {
        "ln".to_string()
    }
    fn f(&self, data: f64) -> f64 {
        data.ln()
    }
    fn grad(&self, data: f64) -> f64 {
        1. / data
    }
    fn backward<'a>(
        &self,
        input: TapeTerm<'a>,
        _: TapeTerm<'a>,
        upstream: TapeTerm<'a>,
    ) -> Option<TapeTerm<'a>> {
        Some(upstream / input)
    }
}

pub(crate) struct ExpFn;

impl UnaryFn for ExpFn {
    fn name(&self) -> String {
        "exp".to_string()
    }
    fn f(&self, data: f64) -> f64 {
        data.exp()
    }
    fn grad(&self, data: f64) -> f64 {
        data.exp()
    }
    fn backward<'a>(
        &self,
        _: TapeTerm<'a>,
        output: TapeTerm<'a>,
        upstream: TapeTerm<'a>,
    ) -> Option<TapeTerm<'a>> {
        Some(upstream * output)
    }
}

pub(crate) struct SinFn;

impl UnaryFn for SinFn {
    fn name(&self) -> String {
        "sin".to_string()
    }
    fn f(&self, data: f64) -> f64 {
        data.sin()
    }
    fn grad(&self, data: f64) -> f64 {
        data.cos()
    }
    fn backward<'a>(
        &self,
        input: TapeTerm<'a>,
        _: TapeTerm<'a>,
        upstream: TapeTerm<'a>,
    ) -> Option<TapeTerm<'a>> {
        Some(upstream * input.cos())
    }
}

pub(crate) struct CosFn;

impl UnaryFn for CosFn {
    fn name(&self) -> String {
        "cos".to_string()
    }
    fn f(&self, data: f64) -> f64 {
        data.cos()
    }
    fn grad(&self, data: f64) -> f64 {
        -data.sin()
    }
    fn backward<'a>(
        &self,
        input: TapeTerm<'a>,
        _: TapeTerm<'a>,
        upstream: TapeTerm<'a>,
    ) -> Option<TapeTerm<'a>> {
        Some(upstream * -input.sin())
    }
}

pub(crate) struct TanFn;

impl UnaryFn for TanFn {
    fn name(&self) -> String {
        "tan".to_string()
    }
    fn f(&self, data: f64) -> f64 {
        data.tan()
    }
    fn grad(&self, data: f64) -> f64 {
        1. / (data.cos() * data.cos())
    }
    fn backward<'a>(
        &self,
        input: TapeTerm<'a>,
        _: TapeTerm<'a>,
        upstream: TapeTerm<'a>,
    ) -> Option<TapeTerm<'a>> {
        let cos = input.cos();
        Some(upstream / (cos * cos))
    }
}

/// `abs` is not differentiable at 0; the derivative there is taken to be 0.
pub(crate) struct AbsFn;

impl UnaryFn for AbsFn {
    fn name(&self) -> String {
        "abs".to_string()
    }
    fn f(&self, data: f64) -> f64 {
        data.abs()
    }
    fn grad(&self, data: f64) -> f64 {
        sign(data)
    }
    // sign is piecewise constant, so a constant factor is exact for higher orders too
    fn backward<'a>(
        &self,
        input: TapeTerm<'a>,
        _: TapeTerm<'a>,
        upstream: TapeTerm<'a>,
    ) -> Option<TapeTerm<'a>> {
        Some(upstream * sign(input.value()))
    }
}

pub(crate) struct RecipFn;

impl UnaryFn for RecipFn {
    fn name(&self) -> String {
        "recip".to_string()
    }
    fn f(&self, data: f64) -> f64 {
        data.recip()
    }
    fn grad(&self, data: f64) -> f64 {
        -1. / (data * data)
    }
    fn backward<'a>(
        &self,
        input: TapeTerm<'a>,
        _: TapeTerm<'a>,
        upstream: TapeTerm<'a>,
    ) -> Option<TapeTerm<'a>> {
        Some(-upstream / (input * input))
    }
}

#[test]
fn test_sign() {
    assert_eq!(sign(3.), 1.);
    assert_eq!(sign(-0.5), -1.);
    assert_eq!(sign(0.), 0.);
    assert_eq!(sign(-0.), 0.);
}
