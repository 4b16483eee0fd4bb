use approx::assert_relative_eq;
use rstest::rstest;
use tapegrad::{
    expr::{f_x, f_xy},
    grad, AutogradError, Dual, GradOptions, Tape,
};

fn create_graph() -> GradOptions {
    GradOptions::new().create_graph(true)
}

/// First derivative of `f_x` at `x`, on a fresh tape.
fn f_x_prime(x: f64) -> f64 {
    let tape = Tape::new();
    let x = tape.term("x", x);
    grad(f_x(x), &[x], GradOptions::new()).unwrap()[0].value()
}

#[test]
fn f_x_derivatives() {
    let _ = env_logger::builder().is_test(true).try_init();

    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let out = f_x(x);
    assert_eq!(out.value(), 50.);

    let dx = grad(out, &[x], create_graph()).unwrap()[0];
    assert_relative_eq!(dx.value(), 35.);
    let ddx = grad(dx, &[x], create_graph()).unwrap()[0];
    assert_relative_eq!(ddx.value(), 12.);

    // The second derivative is a constant, so nothing connects it to x anymore
    assert_eq!(
        grad(ddx, &[x], create_graph()).unwrap_err(),
        AutogradError::UnusedInput {
            name: "x".to_string()
        }
    );
    let dddx = grad(ddx, &[x], create_graph().materialize_grads(true)).unwrap()[0];
    assert_eq!(dddx.value(), 0.);
}

#[rstest]
#[case(2.)]
#[case(-0.5)]
#[case(10.)]
fn f_x_second_derivative_matches_finite_difference(#[case] x0: f64) {
    let tape = Tape::new();
    let x = tape.term("x", x0);
    let dx = grad(f_x(x), &[x], create_graph()).unwrap()[0];
    let ddx = grad(dx, &[x], GradOptions::new()).unwrap()[0];

    let h = 1e-4;
    let fd = (f_x_prime(x0 + h) - f_x_prime(x0 - h)) / (2. * h);
    assert!((ddx.value() - fd).abs() < 1e-4, "{} vs {fd}", ddx.value());
}

#[test]
fn f_xy_value() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = tape.term("y", 5.);
    let out = f_xy(x, y).unwrap();
    assert_eq!(format!("{:.10}", out.value()), "513.1992293441");
    assert_eq!(out.value(), f_xy(2., 5.).unwrap());
}

#[test]
fn f_xy_gradients() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = tape.term("y", 5.);
    let out = f_xy(x, y).unwrap();

    out.backprop(true).unwrap();
    assert_relative_eq!(x.grad().unwrap(), -1052.9807036889097, max_relative = 1e-10);
    assert_relative_eq!(y.grad().unwrap(), 1071.7742060035275, max_relative = 1e-10);

    // Forward mode agrees
    let dual_x = f_xy(Dual::variable(2.), Dual::constant(5.)).unwrap();
    let dual_y = f_xy(Dual::constant(2.), Dual::variable(5.)).unwrap();
    assert_relative_eq!(dual_x.tangent(), x.grad().unwrap(), max_relative = 1e-10);
    assert_relative_eq!(dual_y.tangent(), y.grad().unwrap(), max_relative = 1e-10);
    assert_relative_eq!(out.derive(&x), x.grad().unwrap(), max_relative = 1e-10);
}

#[test]
fn f_xy_higher_order() {
    let _ = env_logger::builder().is_test(true).try_init();

    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = tape.term("y", 5.);
    let out = f_xy(x, y).unwrap();

    let first = grad(out, &[x, y], create_graph()).unwrap();
    let (dx, dy) = (first[0], first[1]);
    assert_relative_eq!(dx.value(), -1052.9807036889097, max_relative = 1e-10);
    assert_relative_eq!(dy.value(), 1071.7742060035275, max_relative = 1e-10);

    let dx2 = grad(dx, &[x, y], create_graph()).unwrap();
    let (dxx, dxy) = (dx2[0], dx2[1]);
    assert_relative_eq!(dxx.value(), 2148.24866082655, max_relative = 1e-9);
    assert_relative_eq!(dxy.value(), -2208.0996977289578, max_relative = 1e-9);
    let dyy = grad(dy, &[y], create_graph()).unwrap()[0];
    assert_relative_eq!(dyy.value(), 2237.279498681892, max_relative = 1e-9);
    let dyx = grad(dy, &[x], create_graph()).unwrap()[0];
    assert_relative_eq!(dyx.value(), dxy.value(), max_relative = 1e-9);

    let dxx2 = grad(dxx, &[x, y], GradOptions::new().retain_graph(true)).unwrap();
    assert_relative_eq!(dxx2[0].value(), -4392.496196761193, max_relative = 1e-9);
    assert_relative_eq!(dxx2[1].value(), 4531.868743756646, max_relative = 1e-9);
}

#[test]
fn f_xy_second_derivative_matches_finite_difference() {
    let dx_at = |x0: f64| {
        let tape = Tape::new();
        let x = tape.term("x", x0);
        let y = tape.term("y", 5.);
        grad(f_xy(x, y).unwrap(), &[x], GradOptions::new()).unwrap()[0].value()
    };

    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = tape.term("y", 5.);
    let dx = grad(f_xy(x, y).unwrap(), &[x], create_graph()).unwrap()[0];
    let dxx = grad(dx, &[x], GradOptions::new()).unwrap()[0];

    let h = 1e-5;
    let fd = (dx_at(2. + h) - dx_at(2. - h)) / (2. * h);
    assert_relative_eq!(dxx.value(), fd, max_relative = 1e-6);
}
