//! Scalar reverse-mode automatic differentiation.
//!
//! Arithmetic on [`TapeTerm`] handles records a graph on a [`Tape`] while computing forward
//! values. [`TapeTerm::backward`] then fills in the gradient of that term with respect to
//! every node it depends on.
//!
//! ```
//! use scalargrad::Tape;
//!
//! let tape = Tape::new();
//! let a = tape.term("a", 2.);
//! let b = tape.term("b", -3.);
//! let c = a * b + 10.;
//! c.backward().unwrap();
//! assert_eq!(c.data(), 4.);
//! assert_eq!(a.grad(), -3.);
//! assert_eq!(b.grad(), 2.);
//! ```

pub mod error;
pub mod nn;
mod operation;
pub mod tape;

pub use error::AutogradError;
pub use nn::{Layer, Mlp, Neuron};
pub use operation::{Contribution, Operation, UnaryFnPayload};
pub use tape::{Tape, TapeTerm};
