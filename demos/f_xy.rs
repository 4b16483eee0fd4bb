//! Derivatives up to the third order of an expression with a branch and a loop.

use tapegrad::{expr::f_xy, grad, Dual, GradOptions, Tape};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = tape.term("y", 5.);
    let out = f_xy(x, y)?;
    println!("f(x, y) = {out:.10}");
    println!("recorded {} nodes, {} edges", tape.len(), tape.edge_count());

    let create_graph = GradOptions::new().create_graph(true);
    let first = grad(out, &[x, y], create_graph)?;
    let (dx, dy) = (first[0], first[1]);
    println!("df/dx = {:.10}", dx.value());
    println!("df/dy = {:.10}", dy.value());

    let dx2 = grad(dx, &[x, y], create_graph)?;
    let dyy = grad(dy, &[y], create_graph)?[0];
    println!("d2f/dx2 = {:.10}", dx2[0].value());
    println!("d2f/dxdy = {:.10}", dx2[1].value());
    println!("d2f/dy2 = {:.10}", dyy.value());

    let dxx2 = grad(dx2[0], &[x, y], GradOptions::new())?;
    println!("d3f/dx3 = {:.10}", dxx2[0].value());
    println!("d3f/dx2dy = {:.10}", dxx2[1].value());

    let forward = f_xy(Dual::variable(2.), Dual::constant(5.))?;
    println!("forward mode: {forward:.10}");
    Ok(())
}
