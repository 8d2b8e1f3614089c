use approx::assert_abs_diff_eq;
use rand::{rngs::StdRng, SeedableRng};
use scalargrad::{AutogradError, Layer, Mlp, Neuron, Tape, TapeTerm};

fn inputs<'a>(tape: &'a Tape, xs: &[f64]) -> Vec<TapeTerm<'a>> {
    xs.iter().map(|&x| tape.make(x)).collect()
}

#[test]
fn neuron_forward_and_backward() {
    let tape = Tape::new();
    let n = Neuron::from_weights(&tape, &[-3., 1.], 6.8813735870195432);
    let x = inputs(&tape, &[2., 0.]);
    let o = n.forward(&x).unwrap();
    assert_abs_diff_eq!(o.data(), 0.5f64.sqrt(), epsilon = 1e-9);

    o.backward().unwrap();
    let params = n.parameters();
    assert_eq!(params.len(), 3);
    // d tanh / d activation = 1 - 0.5
    assert_abs_diff_eq!(params[0].grad(), 0.5 * 2., epsilon = 1e-9);
    assert_abs_diff_eq!(params[1].grad(), 0., epsilon = 1e-9);
    assert_abs_diff_eq!(params[2].grad(), 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(x[0].grad(), 0.5 * -3., epsilon = 1e-9);
    assert_abs_diff_eq!(x[1].grad(), 0.5, epsilon = 1e-9);
}

#[test]
fn neuron_input_length() {
    let tape = Tape::new();
    let n = Neuron::from_weights(&tape, &[1., 2., 3.], 0.);
    let x = inputs(&tape, &[1.]);
    assert_eq!(
        n.forward(&x).unwrap_err(),
        AutogradError::InputLength {
            expected: 3,
            actual: 1
        }
    );
}

#[test]
fn random_parameters_in_range() {
    let tape = Tape::new();
    let mut rng = StdRng::seed_from_u64(42);
    let n = Neuron::new(&tape, 5, &mut rng);
    assert_eq!(n.nin(), 5);
    for p in n.parameters() {
        assert!((-1.0..1.0).contains(&p.data()));
    }
}

#[test]
fn layer_outputs() {
    let tape = Tape::new();
    let mut rng = StdRng::seed_from_u64(1);
    let layer = Layer::new(&tape, 3, 4, &mut rng);
    assert_eq!(layer.neurons().len(), 4);
    assert_eq!(layer.parameters().len(), 4 * (3 + 1));
    let out = layer.forward(&inputs(&tape, &[0.1, -0.2, 0.3])).unwrap();
    assert_eq!(out.len(), 4);
    for o in out {
        assert!(o.data().abs() < 1.);
    }
}

#[test]
fn mlp_parameter_count() {
    let tape = Tape::new();
    let mut rng = StdRng::seed_from_u64(7);
    let mlp = Mlp::new(&tape, 3, &[4, 4, 1], &mut rng);
    assert_eq!(mlp.layers().len(), 3);
    assert_eq!(mlp.parameters().len(), 4 * 4 + 4 * 5 + 5);
}

#[test]
fn mlp_loss_gradients() {
    let tape = Tape::new();
    let mut rng = StdRng::seed_from_u64(7);
    let mlp = Mlp::new(&tape, 3, &[4, 4, 1], &mut rng);

    let xs = [[2., 3., -1.], [3., -1., 0.5], [0.5, 1., 1.], [1., 1., -1.]];
    let ys = [1., -1., -1., 1.];
    let batch: Vec<_> = xs.iter().map(|x| inputs(&tape, x)).collect();
    let mut loss = tape.make(0.);
    for (x, y) in batch.iter().zip(ys) {
        let pred = mlp.forward(x).unwrap();
        assert_eq!(pred.len(), 1);
        loss = loss + (pred[0] - y).powi(2);
    }
    loss.backward().unwrap();
    assert_eq!(loss.grad(), 1.);
    assert!(mlp.parameters().iter().any(|p| p.grad() != 0.));

    // Compare one input gradient against a central finite difference.
    let analytic = batch[0][0].grad();
    let loss_with = |delta: f64| {
        let tape = Tape::new();
        let mut rng = StdRng::seed_from_u64(7);
        let mlp = Mlp::new(&tape, 3, &[4, 4, 1], &mut rng);
        let mut loss = 0.;
        for (i, (x, y)) in xs.iter().zip(ys).enumerate() {
            let mut x = *x;
            if i == 0 {
                x[0] += delta;
            }
            let pred = mlp.forward(&inputs(&tape, &x)).unwrap();
            loss += (pred[0].data() - y).powi(2);
        }
        loss
    };
    let h = 1e-6;
    let numeric = (loss_with(h) - loss_with(-h)) / (2. * h);
    assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-5);
}

#[test]
fn mlp_input_length() {
    let tape = Tape::new();
    let mut rng = StdRng::seed_from_u64(3);
    let mlp = Mlp::new(&tape, 2, &[3, 1], &mut rng);
    assert!(matches!(
        mlp.forward(&inputs(&tape, &[1., 2., 3.])),
        Err(AutogradError::InputLength {
            expected: 2,
            actual: 3
        })
    ));
}
