//! Reverse-mode gradient propagation over a tape.
//!
//! The local derivative rules are written with the same operators that build the forward
//! graph. Without `create_graph` they run on a scratch tape over constant copies of the
//! forward values and only the numbers are kept. With `create_graph` they run on the
//! differentiated tape itself, over the original nodes, so the gradients are new tracked
//! terms that can be differentiated again. If such a pass fails, the nodes it recorded are
//! removed again.

use crate::{
    error::{AutogradError, Result},
    tape::{Tape, TapeIndex, TapeState, TapeTerm, TapeValue, UnaryFnPayload},
};

/// Flags of a gradient request.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GradOptions {
    /// Keep the graph so that another backward pass can walk it again.
    pub retain_graph: bool,
    /// Record the backward pass so that the gradients can be differentiated again.
    /// Implies `retain_graph`.
    pub create_graph: bool,
    /// Return zero for sources that do not contribute to the output instead of an error.
    pub materialize_grads: bool,
    /// Gradient seeded into the output, 1 if not given.
    pub grad_output: Option<f64>,
}

impl GradOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retain_graph(mut self, retain_graph: bool) -> Self {
        self.retain_graph = retain_graph;
        self
    }

    pub fn create_graph(mut self, create_graph: bool) -> Self {
        self.create_graph = create_graph;
        self
    }

    pub fn materialize_grads(mut self, materialize_grads: bool) -> Self {
        self.materialize_grads = materialize_grads;
        self
    }

    pub fn grad_output(mut self, grad_output: f64) -> Self {
        self.grad_output = Some(grad_output);
        self
    }

    fn seed(&self) -> f64 {
        self.grad_output.unwrap_or(1.)
    }

    fn retains(&self) -> bool {
        self.retain_graph || self.create_graph
    }
}

/// Gradients of `output` with respect to each of `sources`.
pub fn grad<'a>(
    output: TapeTerm<'a>,
    sources: &[TapeTerm<'a>],
    options: GradOptions,
) -> Result<Vec<TapeTerm<'a>>> {
    output.tape.grad(output, sources, options)
}

/// Gradient terms per node index, and the interior nodes that were walked.
type Propagated<'t> = (Vec<Option<TapeTerm<'t>>>, Vec<TapeIndex>);

struct Backward<'s, 't> {
    source: &'s Tape,
    target: &'t Tape,
    /// Whether `target` is `source`, so that the forward nodes can be used directly.
    linked: bool,
}

impl<'s, 't> Backward<'s, 't> {
    fn lift(&self, idx: TapeIndex) -> TapeTerm<'t> {
        if self.linked {
            TapeTerm::new(self.target, idx)
        } else {
            self.target.constant(self.source.data(idx))
        }
    }

    fn run(&self, output: TapeIndex, seed: f64) -> Result<Propagated<'t>> {
        let len = output as usize + 1;
        let mut grads: Vec<Option<TapeTerm<'t>>> = vec![None; len];
        grads[output as usize] = Some(self.target.constant(seed));
        let mut traversed = vec![];

        // Nodes only refer to earlier nodes, so the reverse index order is a reverse
        // topological order.
        for idx in (0..len).rev() {
            let Some(upstream) = grads[idx] else {
                continue;
            };
            let idx = idx as TapeIndex;
            let node = self.source.snapshot(idx);
            let contributions: Vec<(TapeIndex, TapeTerm<'t>)> = match node.value {
                TapeValue::Value => continue,
                _ if node.released => {
                    return Err(AutogradError::GraphConsumed { name: node.name })
                }
                TapeValue::Binary(op, lhs, rhs) => {
                    let wants = [
                        self.source.requires_grad(lhs),
                        self.source.requires_grad(rhs),
                    ];
                    let [dlhs, drhs] =
                        op.backward(self.lift(lhs), self.lift(rhs), upstream, wants);
                    dlhs.map(|grad| (lhs, grad))
                        .into_iter()
                        .chain(drhs.map(|grad| (rhs, grad)))
                        .collect()
                }
                TapeValue::UnaryFn(UnaryFnPayload { term, f }) => {
                    let grad = match f.backward(self.lift(term), self.lift(idx), upstream) {
                        Some(grad) => grad,
                        None if self.linked => {
                            return Err(AutogradError::NoGraphRule { op: f.name() })
                        }
                        None => upstream * f.grad(self.source.data(term)),
                    };
                    vec![(term, grad)]
                }
            };
            log::trace!(
                "backward {} (upstream {}): {} contributions",
                node.name,
                upstream.value(),
                contributions.len()
            );
            for (input, grad) in contributions {
                let slot = &mut grads[input as usize];
                *slot = Some(match *slot {
                    Some(acc) => acc + grad,
                    None => grad,
                });
            }
            traversed.push(idx);
        }
        Ok((grads, traversed))
    }
}

/// Pick the gradient of each source, substituting zero or failing for unreached sources.
fn resolve<T>(
    sources: &[TapeTerm],
    options: &GradOptions,
    mut lookup: impl FnMut(TapeIndex) -> Option<T>,
    mut zero: impl FnMut() -> T,
) -> Result<Vec<T>> {
    sources
        .iter()
        .map(|source| match lookup(source.idx) {
            Some(grad) => Ok(grad),
            None if options.materialize_grads => Ok(zero()),
            None => Err(AutogradError::UnusedInput {
                name: source.name(),
            }),
        })
        .collect()
}

impl Tape {
    fn check_backward(&self, output: &TapeTerm) -> Result<()> {
        if self.state() == TapeState::Consumed {
            return Err(AutogradError::GraphConsumed {
                name: output.name(),
            });
        }
        Ok(())
    }

    /// Gradients of `output` with respect to each of `sources`.
    ///
    /// With `create_graph` the gradients are tracked terms on this tape and can be fed
    /// to another call to get higher order derivatives. Otherwise they are returned as
    /// constants.
    ///
    /// Fails with `GraphConsumed` once a previous pass released the graph.
    pub fn grad<'a>(
        &'a self,
        output: TapeTerm<'a>,
        sources: &[TapeTerm<'a>],
        options: GradOptions,
    ) -> Result<Vec<TapeTerm<'a>>> {
        if !self.owns(&output) || !sources.iter().all(|source| self.owns(source)) {
            return Err(AutogradError::TapeMismatch);
        }
        self.check_backward(&output)?;
        log::debug!(
            "grad of {} wrt {} sources over {} nodes ({:?})",
            output.name(),
            sources.len(),
            output.idx + 1,
            options
        );

        if options.create_graph {
            let mark = self.len();
            let engine = Backward {
                source: self,
                target: self,
                linked: true,
            };
            let res = engine.run(output.idx, options.seed()).and_then(|(grads, traversed)| {
                let res = resolve(
                    sources,
                    &options,
                    |idx| grads.get(idx as usize).copied().flatten(),
                    || self.constant(0.),
                )?;
                Ok((res, traversed))
            });
            match res {
                Ok((res, traversed)) => {
                    self.finish_backward(&traversed, options.retains());
                    Ok(res)
                }
                Err(err) => {
                    log::debug!("dropping {} derivative nodes", self.len() - mark);
                    self.truncate(mark);
                    Err(err)
                }
            }
        } else {
            let scratch = Tape::new();
            let engine = Backward {
                source: self,
                target: &scratch,
                linked: false,
            };
            let (grads, traversed) = engine.run(output.idx, options.seed())?;
            let values = resolve(
                sources,
                &options,
                |idx| grads.get(idx as usize).copied().flatten().map(|g| g.value()),
                || 0.,
            )?;
            log::debug!("scratch tape used {} nodes", scratch.len());
            self.finish_backward(&traversed, options.retains());
            Ok(values.into_iter().map(|value| self.constant(value)).collect())
        }
    }
}

impl<'a> TapeTerm<'a> {
    /// Backpropagate from this term and accumulate the gradients into every leaf that
    /// requires them. Read them back with [`TapeTerm::grad`].
    pub fn backprop(&self, retain_graph: bool) -> Result<()> {
        self.backprop_with(1., retain_graph)
    }

    /// Same as [`TapeTerm::backprop`], seeding this term with `seed` instead of 1.
    pub fn backprop_with(&self, seed: f64, retain_graph: bool) -> Result<()> {
        self.tape.check_backward(self)?;
        let scratch = Tape::new();
        let engine = Backward {
            source: self.tape,
            target: &scratch,
            linked: false,
        };
        log::debug!("backprop from {} (retain_graph: {retain_graph})", self.name());
        let (grads, traversed) = engine.run(self.idx, seed)?;
        {
            let mut nodes = self.tape.nodes.borrow_mut();
            for (node, grad) in nodes.iter_mut().zip(grads) {
                if let Some(grad) = grad {
                    if node.requires_grad && node.is_leaf() {
                        node.grad = Some(node.grad.unwrap_or(0.) + grad.value());
                    }
                }
            }
        }
        self.tape.finish_backward(&traversed, retain_graph);
        Ok(())
    }
}

#[test]
fn test_scratch_isolation() {
    let tape = Tape::new();
    let x = tape.term("x", 3.);
    let y = x * x;
    let before = tape.len();
    let dx = tape.grad(y, &[x], GradOptions::new()).unwrap();
    assert_eq!(dx[0].value(), 6.);
    assert!(!dx[0].requires_grad());
    // Only the returned constant is recorded
    assert_eq!(tape.len(), before + 1);
}

#[test]
fn test_create_graph_records() {
    let tape = Tape::new();
    let x = tape.term("x", 3.);
    let y = x * x * x;
    let dx = tape
        .grad(y, &[x], GradOptions::new().create_graph(true))
        .unwrap();
    assert_eq!(dx[0].value(), 27.);
    assert!(dx[0].requires_grad());
    assert_eq!(tape.state(), TapeState::Finalized);
    let ddx = tape.grad(dx[0], &[x], GradOptions::new()).unwrap();
    assert_eq!(ddx[0].value(), 18.);
}

#[test]
fn test_grad_output_seed() {
    let tape = Tape::new();
    let x = tape.term("x", 3.);
    let y = x * x;
    let retain = GradOptions::new().retain_graph(true);
    let dx = tape.grad(y, &[x], retain.grad_output(2.)).unwrap();
    assert_eq!(dx[0].value(), 12.);
    let dx = tape
        .grad(y, &[x], retain.create_graph(true).grad_output(-0.5))
        .unwrap();
    assert_eq!(dx[0].value(), -3.);

    y.backprop_with(2., true).unwrap();
    assert_eq!(x.grad(), Some(12.));
}
