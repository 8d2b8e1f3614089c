//! A single tanh neuron with two inputs, differentiated with respect to everything.

use scalargrad::Tape;

fn main() -> Result<(), scalargrad::AutogradError> {
    let tape = Tape::new();
    let x1 = tape.term("x1", 2.);
    let x2 = tape.term("x2", 0.);
    let w1 = tape.term("w1", -3.);
    let w2 = tape.term("w2", 1.);
    let b = tape.term("b", 6.8813735870195432);

    let n = x1 * w1 + x2 * w2 + b;
    let o = n.tanh();
    o.backward()?;

    println!("o = {}", o.data());
    for term in [x1, x2, w1, w2, b] {
        println!("{term}");
    }
    Ok(())
}
