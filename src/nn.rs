//! Neuron, layer and multi-layer perceptron built from tape operators.
//!
//! These only compose expressions; gradients come from calling
//! [`TapeTerm::backward`] on whatever loss the caller builds from the outputs.

use rand::Rng;

use crate::{
    error::AutogradError,
    tape::{Tape, TapeTerm},
};

/// A tanh unit computing `tanh(b + sum(w[i] * x[i]))`.
#[derive(Clone, Debug)]
pub struct Neuron<'a> {
    w: Vec<TapeTerm<'a>>,
    b: TapeTerm<'a>,
}

impl<'a> Neuron<'a> {
    /// Weights and bias are drawn uniformly from [-1, 1).
    pub fn new(tape: &'a Tape, nin: usize, rng: &mut impl Rng) -> Self {
        let w = (0..nin)
            .map(|_| tape.make(rng.gen_range(-1.0..1.0)))
            .collect();
        let b = tape.make(rng.gen_range(-1.0..1.0));
        Self { w, b }
    }

    pub fn from_weights(tape: &'a Tape, w: &[f64], b: f64) -> Self {
        Self {
            w: w.iter().map(|&wi| tape.make(wi)).collect(),
            b: tape.make(b),
        }
    }

    pub fn nin(&self) -> usize {
        self.w.len()
    }

    pub fn forward(&self, x: &[TapeTerm<'a>]) -> Result<TapeTerm<'a>, AutogradError> {
        if x.len() != self.w.len() {
            return Err(AutogradError::InputLength {
                expected: self.w.len(),
                actual: x.len(),
            });
        }
        let activation = self
            .w
            .iter()
            .zip(x)
            .fold(self.b, |acc, (&wi, &xi)| acc + wi * xi);
        Ok(activation.tanh())
    }

    /// Weights followed by the bias.
    pub fn parameters(&self) -> Vec<TapeTerm<'a>> {
        self.w.iter().copied().chain(std::iter::once(self.b)).collect()
    }
}

/// Neurons sharing the same inputs, one output each.
#[derive(Clone, Debug)]
pub struct Layer<'a> {
    neurons: Vec<Neuron<'a>>,
}

impl<'a> Layer<'a> {
    pub fn new(tape: &'a Tape, nin: usize, nout: usize, rng: &mut impl Rng) -> Self {
        Self {
            neurons: (0..nout).map(|_| Neuron::new(tape, nin, &mut *rng)).collect(),
        }
    }

    pub fn neurons(&self) -> &[Neuron<'a>] {
        &self.neurons
    }

    pub fn forward(&self, x: &[TapeTerm<'a>]) -> Result<Vec<TapeTerm<'a>>, AutogradError> {
        self.neurons.iter().map(|n| n.forward(x)).collect()
    }

    pub fn parameters(&self) -> Vec<TapeTerm<'a>> {
        self.neurons.iter().flat_map(Neuron::parameters).collect()
    }
}

/// Layers applied in sequence.
#[derive(Clone, Debug)]
pub struct Mlp<'a> {
    layers: Vec<Layer<'a>>,
}

impl<'a> Mlp<'a> {
    /// `nouts` lists the width of each layer; the first layer takes `nin` inputs.
    pub fn new(tape: &'a Tape, nin: usize, nouts: &[usize], rng: &mut impl Rng) -> Self {
        let sizes: Vec<usize> = std::iter::once(nin).chain(nouts.iter().copied()).collect();
        let layers = sizes
            .windows(2)
            .map(|pair| Layer::new(tape, pair[0], pair[1], &mut *rng))
            .collect();
        Self { layers }
    }

    pub fn layers(&self) -> &[Layer<'a>] {
        &self.layers
    }

    pub fn forward(&self, x: &[TapeTerm<'a>]) -> Result<Vec<TapeTerm<'a>>, AutogradError> {
        let mut x = x.to_vec();
        for layer in &self.layers {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }

    pub fn parameters(&self) -> Vec<TapeTerm<'a>> {
        self.layers.iter().flat_map(Layer::parameters).collect()
    }
}
