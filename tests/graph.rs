use tapegrad::{
    expr::f_xy, grad, AutogradError, GradOptions, Tape, TapeState, TapeTerm, UnaryFn,
};

#[test]
fn non_retained_graph_fails_on_reuse() {
    let _ = env_logger::builder().is_test(true).try_init();

    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = tape.term("y", 5.);
    let out = x * y + x.sin();
    assert_eq!(tape.state(), TapeState::Building);

    out.backprop(false).unwrap();
    assert_eq!(tape.state(), TapeState::Consumed);
    assert!(matches!(
        out.backprop(false),
        Err(AutogradError::GraphConsumed { .. })
    ));
    assert!(matches!(
        grad(out, &[x], GradOptions::new()),
        Err(AutogradError::GraphConsumed { .. })
    ));
}

#[test]
fn retained_graph_can_be_reused() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = tape.term("y", 5.);
    let out = x * y;

    let retain = GradOptions::new().retain_graph(true);
    assert_eq!(grad(out, &[x], retain).unwrap()[0].value(), 5.);
    assert_eq!(tape.state(), TapeState::Finalized);
    assert_eq!(grad(out, &[y], retain).unwrap()[0].value(), 2.);
    assert_eq!(grad(out, &[x, y], GradOptions::new()).unwrap()[1].value(), 2.);
    assert_eq!(tape.state(), TapeState::Consumed);
}

#[test]
fn consumed_tape_rejects_fresh_outputs() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = tape.term("y", 5.);
    let out = x * y;
    let out2 = x + y;
    grad(out, &[x], GradOptions::new()).unwrap();
    assert_eq!(tape.state(), TapeState::Consumed);

    // Neither the untouched output nor one recorded afterwards can be differentiated
    assert!(matches!(
        grad(out2, &[x], GradOptions::new().retain_graph(true)),
        Err(AutogradError::GraphConsumed { .. })
    ));
    let out3 = x * x;
    assert_eq!(out3.value(), 4.);
    assert!(matches!(
        out3.backprop(true),
        Err(AutogradError::GraphConsumed { .. })
    ));

    // A fresh forward pass on a new tape is
    let fresh = Tape::new();
    let (x, y) = (fresh.term("x", 2.), fresh.term("y", 5.));
    assert_eq!(grad(x * y, &[x], GradOptions::new()).unwrap()[0].value(), 5.);
}

#[test]
fn seeded_gradient() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = tape.term("y", 5.);
    let out = f_xy(x, y).unwrap();
    let retain = GradOptions::new().retain_graph(true);
    let unit = grad(out, &[x, y], retain).unwrap();
    let doubled = grad(out, &[x, y], retain.grad_output(2.)).unwrap();
    for (unit, doubled) in unit.iter().zip(&doubled) {
        assert_eq!(doubled.value(), 2. * unit.value());
    }
}

#[test]
fn unused_input() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = tape.term("y", 5.);
    let out = x.exp();

    let retain = GradOptions::new().retain_graph(true);
    assert_eq!(
        grad(out, &[x, y], retain).unwrap_err(),
        AutogradError::UnusedInput {
            name: "y".to_string()
        }
    );
    let grads = grad(out, &[x, y], retain.materialize_grads(true)).unwrap();
    assert_eq!(grads[0].value(), 2f64.exp());
    assert_eq!(grads[1].value(), 0.);

    // A source recorded after the output cannot contribute to it either
    let z = tape.term("z", 1.);
    assert!(matches!(
        grad(out, &[z], retain),
        Err(AutogradError::UnusedInput { .. })
    ));
}

#[test]
fn failed_request_keeps_graph() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = tape.term("y", 5.);
    let out = x * x;
    assert!(grad(out, &[y], GradOptions::new()).is_err());
    assert_eq!(grad(out, &[x], GradOptions::new()).unwrap()[0].value(), 4.);
}

#[test]
fn output_is_source() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    assert_eq!(grad(x, &[x], GradOptions::new()).unwrap()[0].value(), 1.);
}

#[test]
fn tape_mismatch() {
    let tape = Tape::new();
    let other = Tape::new();
    let x = tape.term("x", 2.);
    let y = other.term("y", 2.);
    assert_eq!(
        tape.grad(x, &[y], GradOptions::new()).unwrap_err(),
        AutogradError::TapeMismatch
    );
}

#[test]
fn branch_records_taken_side_only() {
    let taken = Tape::new();
    let out = f_xy(taken.term("x", 2.), taken.term("y", 5.)).unwrap();
    let not_taken = Tape::new();
    let out2 = f_xy(not_taken.term("x", 0.5), not_taken.term("y", -3.)).unwrap();
    assert!(out.value().is_finite() && out2.value().is_finite());

    // The squaring adds exactly one multiplication with both inputs from the same term
    assert_eq!(taken.len(), not_taken.len() + 1);
    assert_eq!(taken.edge_count(), not_taken.edge_count() + 2);
    let squares = |tape: &Tape| {
        tape.edges()
            .iter()
            .filter(|edge| {
                edge.op == "mul" && edge.inputs.len() == 2 && edge.inputs[0].0 == edge.inputs[1].0
            })
            .count()
    };
    assert_eq!(squares(&taken), 1);
    assert_eq!(squares(&not_taken), 0);
}

#[test]
fn abs_at_kink() {
    let tape = Tape::new();
    let x = tape.term("x", 0.);
    let out = x.abs();
    assert_eq!(grad(out, &[x], GradOptions::new()).unwrap()[0].value(), 0.);
}

struct Square;

impl UnaryFn for Square {
    fn name(&self) -> String {
        "square".to_string()
    }
    fn f(&self, data: f64) -> f64 {
        data * data
    }
    fn grad(&self, data: f64) -> f64 {
        2. * data
    }
    fn backward<'a>(
        &self,
        input: TapeTerm<'a>,
        _output: TapeTerm<'a>,
        upstream: TapeTerm<'a>,
    ) -> Option<TapeTerm<'a>> {
        Some(upstream * input * 2.)
    }
}

struct Cube;

impl UnaryFn for Cube {
    fn name(&self) -> String {
        "cube".to_string()
    }
    fn f(&self, data: f64) -> f64 {
        data * data * data
    }
    fn grad(&self, data: f64) -> f64 {
        3. * data * data
    }
}

#[test]
fn user_defined_function() {
    let tape = Tape::new();
    let x = tape.term("x", 3.);
    let sq = x.apply_t(Box::new(Square));
    assert_eq!(sq.value(), 9.);
    let dx = grad(sq, &[x], GradOptions::new().create_graph(true)).unwrap()[0];
    assert_eq!(dx.value(), 6.);
    assert_eq!(grad(dx, &[x], GradOptions::new()).unwrap()[0].value(), 2.);

}

#[test]
fn function_without_graph_rule() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let cube = x.apply_t(Box::new(Cube));
    let out = cube * x;
    assert_eq!(out.value(), 16.);
    assert_eq!(tape.edges()[0].inputs, vec![(x.index(), 12.)]);

    // A first order pass falls back to the local derivative
    let retain = GradOptions::new().retain_graph(true);
    assert_eq!(grad(out, &[x], retain).unwrap()[0].value(), 32.);

    // Recording the pass would freeze the derivative, so it fails and leaves no nodes behind
    let len = tape.len();
    assert_eq!(
        grad(out, &[x], GradOptions::new().create_graph(true)).unwrap_err(),
        AutogradError::NoGraphRule {
            op: "cube".to_string()
        }
    );
    assert_eq!(tape.len(), len);
    assert_eq!(tape.state(), TapeState::Finalized);
}
