//! Operation tags recorded on the tape, with their forward evaluation and local derivative rule.
//!
//! A node never stores a closure. The rule is a dispatch over [`Operation`], which reads the
//! operand values through a lookup function so that each rule can be checked without a tape.

/// A user-supplied elementwise function.
/// `grad` is the derivative of `f`, evaluated at the operand's value.
#[derive(Clone, Copy, Debug)]
pub struct UnaryFnPayload {
    pub term: u32,
    pub f: fn(f64) -> f64,
    pub grad: fn(f64) -> f64,
}

/// How a node was produced. Operands are tape indices.
#[derive(Clone, Copy, Debug)]
pub enum Operation {
    Leaf,
    Add(u32, u32),
    Mul(u32, u32),
    Pow(u32, f64),
    Tanh(u32),
    Exp(u32),
    UnaryFn(UnaryFnPayload),
}

/// A gradient contribution: the operand index and the amount to add to its gradient.
pub type Contribution = (u32, f64);

impl Operation {
    /// Operand indices in order, 0 to 2 of them.
    pub fn operands(&self) -> impl DoubleEndedIterator<Item = u32> {
        use Operation::*;
        let operands = match *self {
            Leaf => [None, None],
            Add(lhs, rhs) | Mul(lhs, rhs) => [Some(lhs), Some(rhs)],
            Pow(term, _) | Tanh(term) | Exp(term) | UnaryFn(UnaryFnPayload { term, .. }) => {
                [Some(term), None]
            }
        };
        operands.into_iter().flatten()
    }

    /// Forward value from the operand values. Leaves return `None`; their value is not derived.
    pub fn eval(&self, data: impl Fn(u32) -> f64) -> Option<f64> {
        use Operation::*;
        Some(match *self {
            Leaf => return None,
            Add(lhs, rhs) => data(lhs) + data(rhs),
            Mul(lhs, rhs) => data(lhs) * data(rhs),
            Pow(term, exponent) => data(term).powf(exponent),
            Tanh(term) => tanh(data(term)),
            Exp(term) => data(term).exp(),
            UnaryFn(UnaryFnPayload { term, f, .. }) => f(data(term)),
        })
    }

    /// Local chain rule step. `out_data` and `out_grad` belong to the node carrying this
    /// operation. The returned deltas are meant to be added, never assigned, to the operands'
    /// gradients.
    pub fn contributions(
        &self,
        out_data: f64,
        out_grad: f64,
        data: impl Fn(u32) -> f64,
    ) -> [Option<Contribution>; 2] {
        use Operation::*;
        match *self {
            Leaf => [None, None],
            Add(lhs, rhs) => [Some((lhs, out_grad)), Some((rhs, out_grad))],
            Mul(lhs, rhs) => [
                Some((lhs, data(rhs) * out_grad)),
                Some((rhs, data(lhs) * out_grad)),
            ],
            // x^0 is constant, even at x = 0 where powf(-1) would give inf.
            Pow(term, exponent) if exponent == 0. => [Some((term, 0.)), None],
            Pow(term, exponent) => [
                Some((term, exponent * data(term).powf(exponent - 1.) * out_grad)),
                None,
            ],
            Tanh(term) => [Some((term, (1. - out_data * out_data) * out_grad)), None],
            Exp(term) => [Some((term, out_data * out_grad)), None],
            UnaryFn(UnaryFnPayload { term, grad, .. }) => {
                [Some((term, grad(data(term)) * out_grad)), None]
            }
        }
    }

    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        use Operation::*;
        match self {
            Leaf => "leaf",
            Add(..) => "+",
            Mul(..) => "*",
            Pow(..) => "pow",
            Tanh(_) => "tanh",
            Exp(_) => "exp",
            UnaryFn(_) => "fn",
        }
    }
}

/// (e^2x - 1) / (e^2x + 1), saturating where e^2x overflows.
fn tanh(x: f64) -> f64 {
    let e2x = (2. * x).exp();
    if e2x.is_infinite() {
        1.
    } else {
        (e2x - 1.) / (e2x + 1.)
    }
}
