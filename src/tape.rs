//! Implementation of shared memory arena for the terms, aka a tape.
//! See https://rufflewind.com/2016-12-30/reverse-mode-automatic-differentiation
//!
//! Values are evaluated eagerly as the nodes are recorded, so the tape only ever contains
//! the operations that were actually executed. A branch decided on a forward value records
//! just the taken side, and a loop records one node per iteration.

use std::{
    cell::{Cell, RefCell},
    fmt::{Debug, Display},
    ops::{Add, Div, Mul, Neg, Sub},
    rc::Rc,
};

use crate::{
    binary_fn::BinaryOp,
    error::{AutogradError, Result},
    unary_fn::{AbsFn, CosFn, ExpFn, LnFn, NegFn, RecipFn, SinFn, TanFn, UnaryFn},
};

pub type TapeIndex = u32;

/// Lifecycle of a tape with respect to backward passes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TapeState {
    /// Operations are being recorded and no backward pass has run yet.
    #[default]
    Building,
    /// At least one backward pass has run, and every graph it walked is retained.
    Finalized,
    /// A backward pass released the nodes it walked. Terminal: every further backward pass
    /// on this tape fails with `GraphConsumed`. Operations still evaluate their values, but
    /// differentiating them needs a fresh tape.
    Consumed,
}

#[derive(Default, Debug)]
pub struct Tape {
    pub(crate) nodes: RefCell<Vec<TapeNode>>,
    state: Cell<TapeState>,
}

#[derive(Clone, Debug)]
pub(crate) struct TapeNode {
    pub(crate) name: String,
    pub(crate) value: TapeValue,
    pub(crate) data: f64,
    pub(crate) requires_grad: bool,
    pub(crate) released: bool,
    pub(crate) grad: Option<f64>,
}

impl TapeNode {
    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self.value, TapeValue::Value)
    }
}

#[derive(Clone)]
pub(crate) struct UnaryFnPayload {
    pub(crate) term: TapeIndex,
    pub(crate) f: Rc<dyn UnaryFn>,
}

impl Debug for UnaryFnPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(a{})", self.f.name(), self.term)
    }
}

/// A node is either a leaf, or an operation with the indices of its inputs.
/// Nodes that do not require gradients are always stored as leaves.
#[derive(Clone, Debug)]
pub(crate) enum TapeValue {
    Value,
    Binary(BinaryOp, TapeIndex, TapeIndex),
    UnaryFn(UnaryFnPayload),
}

/// One recorded operation with the inputs that gradients flow back to, each with the
/// local derivative of the output with respect to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    pub output: TapeIndex,
    pub op: String,
    pub inputs: Vec<(TapeIndex, f64)>,
}

#[derive(Copy, Clone)]
pub struct TapeTerm<'a> {
    pub(crate) tape: &'a Tape,
    pub(crate) idx: TapeIndex,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a leaf term that requires gradients.
    pub fn term<'a>(&'a self, name: impl Into<String>, init: f64) -> TapeTerm<'a> {
        self.leaf(Some(name.into()), init, true)
    }

    /// Create a leaf term that does not require gradients.
    pub fn constant<'a>(&'a self, value: f64) -> TapeTerm<'a> {
        self.leaf(None, value, false)
    }

    fn leaf<'a>(&'a self, name: Option<String>, data: f64, requires_grad: bool) -> TapeTerm<'a> {
        let mut nodes = self.nodes.borrow_mut();
        let idx = nodes.len();
        let name = name.unwrap_or_else(|| {
            if cfg!(feature = "expr_name") {
                format!("{data}")
            } else {
                format!("a{idx}")
            }
        });
        nodes.push(TapeNode {
            name,
            value: TapeValue::Value,
            data,
            requires_grad,
            released: false,
            grad: None,
        });
        TapeTerm {
            tape: self,
            idx: idx as TapeIndex,
        }
    }

    fn record<'a>(&'a self, value: TapeValue, data: f64, requires_grad: bool) -> TapeTerm<'a> {
        let mut nodes = self.nodes.borrow_mut();
        let idx = nodes.len();
        #[cfg(feature = "expr_name")]
        let name = match &value {
            TapeValue::Value => format!("{data}"),
            TapeValue::Binary(op, lhs, rhs) => format!(
                "({} {} {})",
                nodes[*lhs as usize].name,
                op.symbol(),
                nodes[*rhs as usize].name
            ),
            TapeValue::UnaryFn(UnaryFnPayload { term, f }) => {
                format!("{}({})", f.name(), nodes[*term as usize].name)
            }
        };
        #[cfg(not(feature = "expr_name"))]
        let name = format!("a{idx}");
        nodes.push(TapeNode {
            name,
            value: if requires_grad { value } else { TapeValue::Value },
            data,
            requires_grad,
            released: false,
            grad: None,
        });
        TapeTerm {
            tape: self,
            idx: idx as TapeIndex,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    pub fn state(&self) -> TapeState {
        self.state.get()
    }

    /// The recorded operations in creation order, with the inputs that require gradients.
    pub fn edges(&self) -> Vec<Edge> {
        let nodes = self.nodes.borrow();
        nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, node)| {
                let data = |idx: TapeIndex| nodes[idx as usize].data;
                let (op, inputs) = match &node.value {
                    TapeValue::Value => return None,
                    TapeValue::Binary(op, lhs, rhs) => {
                        let (dlhs, drhs) = op.grad(data(*lhs), data(*rhs));
                        (op.name().to_string(), vec![(*lhs, dlhs), (*rhs, drhs)])
                    }
                    TapeValue::UnaryFn(UnaryFnPayload { term, f }) => {
                        (f.name(), vec![(*term, f.grad(data(*term)))])
                    }
                };
                let inputs = inputs
                    .into_iter()
                    .filter(|(input, _)| nodes[*input as usize].requires_grad)
                    .collect();
                Some(Edge {
                    output: idx as TapeIndex,
                    op,
                    inputs,
                })
            })
            .collect()
    }

    /// Total number of (output, input) pairs that gradients can flow through.
    pub fn edge_count(&self) -> usize {
        self.edges().iter().map(|edge| edge.inputs.len()).sum()
    }

    /// Clear the gradients accumulated by `backprop` in every node.
    pub fn zero_grad(&self) {
        for node in self.nodes.borrow_mut().iter_mut() {
            node.grad = None;
        }
    }

    pub(crate) fn data(&self, idx: TapeIndex) -> f64 {
        self.nodes.borrow()[idx as usize].data
    }

    pub(crate) fn requires_grad(&self, idx: TapeIndex) -> bool {
        self.nodes.borrow()[idx as usize].requires_grad
    }

    pub(crate) fn snapshot(&self, idx: TapeIndex) -> TapeNode {
        self.nodes.borrow()[idx as usize].clone()
    }

    /// Drop the nodes from `len` on. Nothing may refer to them.
    pub(crate) fn truncate(&self, len: usize) {
        self.nodes.borrow_mut().truncate(len);
    }

    pub(crate) fn owns(&self, term: &TapeTerm) -> bool {
        std::ptr::eq(self, term.tape)
    }

    /// Update the state after a backward pass walked `traversed` interior nodes.
    pub(crate) fn finish_backward(&self, traversed: &[TapeIndex], retain_graph: bool) {
        if !retain_graph && !traversed.is_empty() {
            let mut nodes = self.nodes.borrow_mut();
            for idx in traversed {
                nodes[*idx as usize].released = true;
            }
            log::debug!("released {} nodes", traversed.len());
            self.state.set(TapeState::Consumed);
        } else if self.state.get() == TapeState::Building {
            self.state.set(TapeState::Finalized);
        }
    }
}

impl<'a> TapeTerm<'a> {
    pub(crate) fn new(tape: &'a Tape, idx: TapeIndex) -> Self {
        Self { tape, idx }
    }

    pub fn index(&self) -> TapeIndex {
        self.idx
    }

    pub fn name(&self) -> String {
        self.tape.nodes.borrow()[self.idx as usize].name.clone()
    }

    pub fn value(&self) -> f64 {
        self.tape.data(self.idx)
    }

    pub fn requires_grad(&self) -> bool {
        self.tape.requires_grad(self.idx)
    }

    /// The gradient accumulated by `backprop`, if any pass has reached this leaf.
    pub fn grad(&self) -> Option<f64> {
        self.tape.nodes.borrow()[self.idx as usize].grad
    }

    pub fn zero_grad(&self) {
        self.tape.nodes.borrow_mut()[self.idx as usize].grad = None;
    }

    fn binary(self, op: BinaryOp, rhs: Self) -> Self {
        assert!(
            std::ptr::eq(self.tape, rhs.tape),
            "Cannot combine terms from different tapes"
        );
        let data = op.f(self.value(), rhs.value());
        let requires_grad = self.requires_grad() || rhs.requires_grad();
        self.tape
            .record(TapeValue::Binary(op, self.idx, rhs.idx), data, requires_grad)
    }

    fn unary(self, f: Rc<dyn UnaryFn>) -> Self {
        let data = f.f(self.value());
        let requires_grad = self.requires_grad();
        self.tape.record(
            TapeValue::UnaryFn(UnaryFnPayload { term: self.idx, f }),
            data,
            requires_grad,
        )
    }

    /// Natural logarithm. Fails for non-positive values.
    pub fn ln(self) -> Result<Self> {
        let value = self.value();
        if value <= 0. {
            return Err(AutogradError::Domain { op: "ln", value });
        }
        Ok(self.unary(Rc::new(LnFn)))
    }

    pub fn exp(self) -> Self {
        self.unary(Rc::new(ExpFn))
    }

    pub fn sin(self) -> Self {
        self.unary(Rc::new(SinFn))
    }

    pub fn cos(self) -> Self {
        self.unary(Rc::new(CosFn))
    }

    pub fn tan(self) -> Self {
        self.unary(Rc::new(TanFn))
    }

    pub fn abs(self) -> Self {
        self.unary(Rc::new(AbsFn))
    }

    pub fn recip(self) -> Self {
        self.unary(Rc::new(RecipFn))
    }

    /// Apply a user-defined function.
    pub fn apply_t(self, f: Box<dyn UnaryFn>) -> Self {
        self.unary(Rc::from(f))
    }

    /// Compare the current values. The result only steers control flow and is not recorded.
    pub fn lt(self, rhs: Self) -> bool {
        self.value() < rhs.value()
    }

    /// One-time forward derivation. Does not update internal gradient values.
    pub fn derive(&self, var: &Self) -> f64 {
        if !std::ptr::eq(self.tape, var.tape) || self.idx < var.idx {
            return 0.;
        }
        let nodes = self.tape.nodes.borrow();
        let start = var.idx as usize;
        let mut tangents = vec![0.; self.idx as usize - start + 1];
        tangents[0] = 1.;
        let tangent = |tangents: &[f64], idx: TapeIndex| {
            (idx as usize)
                .checked_sub(start)
                .map_or(0., |offset| tangents[offset])
        };
        for idx in start + 1..=self.idx as usize {
            tangents[idx - start] = match &nodes[idx].value {
                TapeValue::Value => 0.,
                TapeValue::Binary(op, lhs, rhs) => {
                    let (dlhs, drhs) = op.grad(nodes[*lhs as usize].data, nodes[*rhs as usize].data);
                    dlhs * tangent(&tangents, *lhs) + drhs * tangent(&tangents, *rhs)
                }
                TapeValue::UnaryFn(UnaryFnPayload { term, f }) => {
                    f.grad(nodes[*term as usize].data) * tangent(&tangents, *term)
                }
            };
        }
        tangents[tangents.len() - 1]
    }
}

impl<'a> Add for TapeTerm<'a> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        self.binary(BinaryOp::Add, rhs)
    }
}

impl<'a> Sub for TapeTerm<'a> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        self.binary(BinaryOp::Sub, rhs)
    }
}

impl<'a> Mul for TapeTerm<'a> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        self.binary(BinaryOp::Mul, rhs)
    }
}

impl<'a> Div for TapeTerm<'a> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        self.binary(BinaryOp::Div, rhs)
    }
}

impl<'a> Neg for TapeTerm<'a> {
    type Output = Self;
    fn neg(self) -> Self::Output {
        self.unary(Rc::new(NegFn))
    }
}

impl<'a> Add<f64> for TapeTerm<'a> {
    type Output = Self;
    fn add(self, rhs: f64) -> Self::Output {
        self + self.tape.constant(rhs)
    }
}

impl<'a> Sub<f64> for TapeTerm<'a> {
    type Output = Self;
    fn sub(self, rhs: f64) -> Self::Output {
        self - self.tape.constant(rhs)
    }
}

impl<'a> Mul<f64> for TapeTerm<'a> {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self::Output {
        self * self.tape.constant(rhs)
    }
}

impl<'a> Div<f64> for TapeTerm<'a> {
    type Output = Self;
    fn div(self, rhs: f64) -> Self::Output {
        self / self.tape.constant(rhs)
    }
}

impl<'a> Add<TapeTerm<'a>> for f64 {
    type Output = TapeTerm<'a>;
    fn add(self, rhs: TapeTerm<'a>) -> Self::Output {
        rhs.tape.constant(self) + rhs
    }
}

impl<'a> Sub<TapeTerm<'a>> for f64 {
    type Output = TapeTerm<'a>;
    fn sub(self, rhs: TapeTerm<'a>) -> Self::Output {
        rhs.tape.constant(self) - rhs
    }
}

impl<'a> Mul<TapeTerm<'a>> for f64 {
    type Output = TapeTerm<'a>;
    fn mul(self, rhs: TapeTerm<'a>) -> Self::Output {
        rhs.tape.constant(self) * rhs
    }
}

impl<'a> Div<TapeTerm<'a>> for f64 {
    type Output = TapeTerm<'a>;
    fn div(self, rhs: TapeTerm<'a>) -> Self::Output {
        rhs.tape.constant(self) / rhs
    }
}

impl Debug for TapeTerm<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes = self.tape.nodes.borrow();
        let node = &nodes[self.idx as usize];
        f.debug_struct("TapeTerm")
            .field("idx", &self.idx)
            .field("name", &node.name)
            .field("value", &node.value)
            .field("data", &node.data)
            .field("grad", &node.grad)
            .finish()
    }
}

/// Prints `Term(value, grad=..., requires_grad=true)`, with the formatter's precision
/// (4 fractional digits if not given).
impl Display for TapeTerm<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let precision = f.precision().unwrap_or(4);
        let nodes = self.tape.nodes.borrow();
        let node = &nodes[self.idx as usize];
        write!(f, "Term({:.*}", precision, node.data)?;
        if let Some(grad) = node.grad {
            write!(f, ", grad={:.*}", precision, grad)?;
        }
        if node.requires_grad {
            write!(f, ", requires_grad=true")?;
        }
        write!(f, ")")
    }
}

#[test]
fn test_constant_folding() {
    let tape = Tape::new();
    let a = tape.constant(3.);
    let b = tape.constant(4.);
    let c = a * b + 1.;
    assert_eq!(c.value(), 13.);
    assert!(!c.requires_grad());
    assert!(tape.edges().is_empty());
}

#[test]
fn test_edges() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = x * 3.;
    let z = y.sin() + x;
    assert_eq!(z.value(), 6f64.sin() + 2.);
    let edges = tape.edges();
    assert_eq!(
        edges
            .iter()
            .map(|edge| edge.op.as_str())
            .collect::<Vec<_>>(),
        ["mul", "sin", "add"]
    );
    // The constant factor of the multiplication is not an edge
    assert_eq!(edges[0].inputs, vec![(x.index(), 3.)]);
    assert_eq!(edges[1].inputs, vec![(edges[0].output, 6f64.cos())]);
    assert_eq!(edges[2].inputs, vec![(edges[1].output, 1.), (x.index(), 1.)]);
    assert_eq!(tape.edge_count(), 4);
}

#[test]
fn test_ln_domain() {
    let tape = Tape::new();
    let x = tape.term("x", 0.);
    assert_eq!(
        x.ln().unwrap_err(),
        AutogradError::Domain { op: "ln", value: 0. }
    );
    let y = tape.term("y", -1.);
    assert!(matches!(y.ln(), Err(AutogradError::Domain { .. })));
}

#[test]
fn test_derive() {
    let tape = Tape::new();
    let a = tape.term("a", 1.5);
    let b = tape.term("b", 0.5);
    let c = (a * b).exp() / a;
    let (av, bv) = (a.value(), b.value());
    let expected_a = (av * bv).exp() * (bv / av - 1. / (av * av));
    assert!((c.derive(&a) - expected_a).abs() < 1e-12);
    assert!((c.derive(&b) - (a.value() * b.value()).exp()).abs() < 1e-12);
    assert_eq!(a.derive(&b), 0.);
}

#[test]
fn test_display() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    assert_eq!(format!("{x}"), "Term(2.0000, requires_grad=true)");
    assert_eq!(format!("{:.2}", tape.constant(0.5)), "Term(0.50)");
}
