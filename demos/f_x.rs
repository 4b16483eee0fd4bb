//! Derivatives of a polynomial in which `x` reaches the output through several paths.
//! The third derivative is zero because the second one no longer depends on `x`.

use tapegrad::{expr::f_x, grad, GradOptions, Tape};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let out = f_x(x);
    println!("f(x) = {out:.10}");

    let create_graph = GradOptions::new().create_graph(true);
    let dx = grad(out, &[x], create_graph)?[0];
    println!("df/dx = {:.10}", dx.value());
    let ddx = grad(dx, &[x], create_graph)?[0];
    println!("d2f/dx2 = {:.10}", ddx.value());
    let dddx = grad(ddx, &[x], GradOptions::new().materialize_grads(true))?[0];
    println!("d3f/dx3 = {:.10}", dddx.value());
    Ok(())
}
