//! Implementation of shared memory arena for the terms, aka a tape.
//! See https://rufflewind.com/2016-12-30/reverse-mode-automatic-differentiation
//!
//! Every node lives in the [`Tape`] and is addressed by its index, which is also its
//! construction order. Forward values are computed as soon as a node is created; gradients
//! are filled in by [`TapeTerm::backward`].

use std::cell::RefCell;

use log::{debug, trace};

use crate::{
    error::AutogradError,
    operation::{Operation, UnaryFnPayload},
};

#[derive(Default, Debug)]
pub struct Tape {
    nodes: RefCell<Vec<TapeNode>>,
}

#[derive(Clone, Debug)]
struct TapeNode {
    name: String,
    op: Operation,
    data: f64,
    grad: f64,
}

/// A handle to a node on a [`Tape`]. It is cheap to copy; arithmetic on handles records
/// new nodes on the same tape.
#[derive(Copy, Clone)]
pub struct TapeTerm<'a> {
    tape: &'a Tape,
    idx: u32,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a leaf node holding `value`.
    pub fn make(&self, value: f64) -> TapeTerm<'_> {
        self.push(None, Operation::Leaf, value)
    }

    /// Create a named leaf node holding `value`.
    pub fn term<'a>(&'a self, name: impl Into<String>, value: f64) -> TapeTerm<'a> {
        self.push(Some(name.into()), Operation::Leaf, value)
    }

    /// Low-level node construction. The value is stored as given and the operand indices in
    /// `op` are not checked, so this can build dangling or cyclic graphs. Those are reported
    /// by [`TapeTerm::backward`] instead of being propagated through.
    pub fn raw_node(&self, name: impl Into<String>, value: f64, op: Operation) -> TapeTerm<'_> {
        self.push(Some(name.into()), op, value)
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Reset every gradient on the tape to zero. Gradients accumulate across
    /// [`TapeTerm::backward`] calls until this is called.
    pub fn zero_grad(&self) {
        let mut nodes = self.nodes.borrow_mut();
        for node in nodes.iter_mut() {
            node.grad = 0.;
        }
        debug!("zero_grad: reset {} nodes", nodes.len());
    }

    fn push(&self, name: Option<String>, op: Operation, data: f64) -> TapeTerm<'_> {
        let mut nodes = self.nodes.borrow_mut();
        let idx = nodes.len();
        let name = name.unwrap_or_else(|| format!("a{idx}"));
        trace!("a{idx} = {name} [{}]: {data}", op.name());
        nodes.push(TapeNode {
            name,
            op,
            data,
            grad: 0.,
        });
        TapeTerm {
            tape: self,
            idx: idx as u32,
        }
    }

    fn term0(&self, op: Operation, fn_name: Option<&str>) -> TapeTerm<'_> {
        let (data, name) = {
            let nodes = self.nodes.borrow();
            let data = op.eval(|i| nodes[i as usize].data);
            debug_assert!(data.is_some(), "term0 is only used for derived nodes");
            (data.unwrap_or_default(), expr_name(&nodes, &op, fn_name))
        };
        self.push(name, op, data)
    }
}

/// Operand names longer than this are replaced by their index name, so that names stay
/// bounded on deep or heavily shared graphs.
#[cfg(feature = "expr_name")]
const MAX_OPERAND_NAME: usize = 64;

#[cfg(feature = "expr_name")]
fn expr_name(nodes: &[TapeNode], op: &Operation, fn_name: Option<&str>) -> Option<String> {
    use Operation::*;
    let name = |idx: u32| {
        let name = &nodes[idx as usize].name;
        if name.len() > MAX_OPERAND_NAME {
            format!("a{idx}")
        } else {
            name.clone()
        }
    };
    Some(match *op {
        Leaf => return None,
        Add(lhs, rhs) => format!("({} + {})", name(lhs), name(rhs)),
        Mul(lhs, rhs) => format!("({} * {})", name(lhs), name(rhs)),
        Pow(term, exponent) => format!("{}^{}", name(term), exponent),
        Tanh(term) => format!("tanh({})", name(term)),
        Exp(term) => format!("exp({})", name(term)),
        UnaryFn(UnaryFnPayload { term, .. }) => {
            format!("{}({})", fn_name.unwrap_or("fn"), name(term))
        }
    })
}

#[cfg(not(feature = "expr_name"))]
fn expr_name(_nodes: &[TapeNode], _op: &Operation, _fn_name: Option<&str>) -> Option<String> {
    None
}

impl<'a> std::ops::Add for TapeTerm<'a> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        self.same_tape(&rhs);
        self.tape.term0(Operation::Add(self.idx, rhs.idx), None)
    }
}

impl<'a> std::ops::Sub for TapeTerm<'a> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        self + (-rhs)
    }
}

impl<'a> std::ops::Mul for TapeTerm<'a> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        self.same_tape(&rhs);
        self.tape.term0(Operation::Mul(self.idx, rhs.idx), None)
    }
}

impl<'a> std::ops::Div for TapeTerm<'a> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        self * rhs.powi(-1)
    }
}

impl<'a> std::ops::Neg for TapeTerm<'a> {
    type Output = Self;
    fn neg(self) -> Self::Output {
        self * -1.
    }
}

/// Lift a scalar on either side of the operator to a leaf node.
macro_rules! impl_scalar_op {
    ($trait:ident, $method:ident) => {
        impl<'a> std::ops::$trait<f64> for TapeTerm<'a> {
            type Output = TapeTerm<'a>;
            fn $method(self, rhs: f64) -> Self::Output {
                std::ops::$trait::$method(self, self.tape.make(rhs))
            }
        }

        impl<'a> std::ops::$trait<TapeTerm<'a>> for f64 {
            type Output = TapeTerm<'a>;
            fn $method(self, rhs: TapeTerm<'a>) -> Self::Output {
                std::ops::$trait::$method(rhs.tape.make(self), rhs)
            }
        }
    };
}

impl_scalar_op!(Add, add);
impl_scalar_op!(Sub, sub);
impl_scalar_op!(Mul, mul);
impl_scalar_op!(Div, div);

impl<'a> TapeTerm<'a> {
    pub fn idx(&self) -> u32 {
        self.idx
    }

    pub fn name(&self) -> String {
        self.tape.nodes.borrow()[self.idx as usize].name.clone()
    }

    /// The forward value, fixed at construction.
    pub fn data(&self) -> f64 {
        self.tape.nodes.borrow()[self.idx as usize].data
    }

    /// The accumulated gradient. It is zero until a backward pass reaches this node.
    pub fn grad(&self) -> f64 {
        self.tape.nodes.borrow()[self.idx as usize].grad
    }

    pub fn operation(&self) -> Operation {
        self.tape.nodes.borrow()[self.idx as usize].op
    }

    /// Handles to the operands that exist on the tape.
    pub fn operands(&self) -> Vec<TapeTerm<'a>> {
        let nodes = self.tape.nodes.borrow();
        nodes[self.idx as usize]
            .op
            .operands()
            .filter(|&idx| (idx as usize) < nodes.len())
            .map(|idx| TapeTerm {
                tape: self.tape,
                idx,
            })
            .collect()
    }

    /// Raise to a real power. Fails with [`AutogradError::InvalidExponent`] if the exponent
    /// is NaN or infinite.
    pub fn pow(&self, exponent: f64) -> Result<Self, AutogradError> {
        if !exponent.is_finite() {
            return Err(AutogradError::InvalidExponent(exponent));
        }
        Ok(self.tape.term0(Operation::Pow(self.idx, exponent), None))
    }

    pub fn powi(&self, exponent: i32) -> Self {
        self.tape
            .term0(Operation::Pow(self.idx, exponent as f64), None)
    }

    pub fn tanh(&self) -> Self {
        self.tape.term0(Operation::Tanh(self.idx), None)
    }

    pub fn exp(&self) -> Self {
        self.tape.term0(Operation::Exp(self.idx), None)
    }

    /// Apply an arbitrary function `f` whose derivative is `grad`.
    pub fn apply(
        &self,
        name: &(impl AsRef<str> + ?Sized),
        f: fn(f64) -> f64,
        grad: fn(f64) -> f64,
    ) -> Self {
        self.tape.term0(
            Operation::UnaryFn(UnaryFnPayload {
                term: self.idx,
                f,
                grad,
            }),
            Some(name.as_ref()),
        )
    }

    /// All nodes reachable from this one, each after all of its operands.
    pub fn topo_order(&self) -> Result<Vec<TapeTerm<'a>>, AutogradError> {
        let nodes = self.tape.nodes.borrow();
        Ok(topo_order(&nodes, self.idx)?
            .into_iter()
            .map(|idx| TapeTerm {
                tape: self.tape,
                idx,
            })
            .collect())
    }

    /// The entry point to backpropagation.
    ///
    /// Sets this node's gradient to 1 and adds the partial derivative of this node to the
    /// gradient of every node it depends on. Gradients from earlier calls are not cleared;
    /// see [`Tape::zero_grad`]. Nothing is modified if the graph is malformed.
    pub fn backward(&self) -> Result<(), AutogradError> {
        let mut nodes = self.tape.nodes.borrow_mut();
        let order = topo_order(&nodes, self.idx).map_err(|err| {
            debug!("backward from a{}: {err}", self.idx);
            err
        })?;

        nodes[self.idx as usize].grad = 1.;
        for &idx in order.iter().rev() {
            let node = &nodes[idx as usize];
            let contributions =
                node.op
                    .contributions(node.data, node.grad, |i| nodes[i as usize].data);
            for (operand, delta) in contributions.into_iter().flatten() {
                nodes[operand as usize].grad += delta;
            }
        }
        debug!(
            "backward from a{}: propagated through {} nodes",
            self.idx,
            order.len()
        );
        Ok(())
    }

    fn same_tape(&self, other: &Self) {
        assert!(
            std::ptr::eq(self.tape, other.tape),
            "Terms from different tapes cannot be combined"
        );
    }
}

impl std::fmt::Debug for TapeTerm<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes = self.tape.nodes.borrow();
        let node = &nodes[self.idx as usize];
        f.debug_struct("TapeTerm")
            .field("idx", &self.idx)
            .field("name", &node.name)
            .field("op", &node.op)
            .field("data", &node.data)
            .field("grad", &node.grad)
            .finish()
    }
}

impl std::fmt::Display for TapeTerm<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes = self.tape.nodes.borrow();
        let node = &nodes[self.idx as usize];
        write!(f, "{}(data={}, grad={})", node.name, node.data, node.grad)
    }
}

/// Depth-first post-order from `root` with an explicit stack, so deep chains do not
/// overflow the call stack. A node reached again while it is still open closes a cycle.
fn topo_order(nodes: &[TapeNode], root: u32) -> Result<Vec<u32>, AutogradError> {
    #[derive(Clone, Copy)]
    enum Mark {
        New,
        Open,
        Done,
    }

    let mut marks = vec![Mark::New; nodes.len()];
    let mut order = vec![];
    // The flag tells whether the operands of the node were already scheduled.
    let mut stack = vec![(root, false)];
    while let Some((idx, expanded)) = stack.pop() {
        if expanded {
            marks[idx as usize] = Mark::Done;
            order.push(idx);
            continue;
        }
        match marks[idx as usize] {
            Mark::Done => continue,
            Mark::Open => return Err(AutogradError::CycleDetected { node: idx }),
            Mark::New => (),
        }
        marks[idx as usize] = Mark::Open;
        stack.push((idx, true));
        // Reversed so that the first operand is visited first.
        for operand in nodes[idx as usize].op.operands().rev() {
            match marks.get(operand as usize) {
                None => {
                    return Err(AutogradError::DanglingOperand {
                        node: idx,
                        operand,
                    })
                }
                Some(Mark::Open) => return Err(AutogradError::CycleDetected { node: operand }),
                Some(Mark::Done) => (),
                Some(Mark::New) => stack.push((operand, false)),
            }
        }
    }
    Ok(order)
}
