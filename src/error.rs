use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutogradError {
    #[error("Exponent must be a finite real number, got {0}")]
    InvalidExponent(f64),

    #[error("Cycle detected in the graph at node a{node}. `backward()` needs an acyclic graph.")]
    CycleDetected { node: u32 },

    #[error("Node a{node} refers to operand a{operand} which is not on the tape")]
    DanglingOperand { node: u32, operand: u32 },

    #[error("Input length mismatch: expected {expected}, got {actual}")]
    InputLength { expected: usize, actual: usize },
}
