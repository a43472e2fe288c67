use super::{
    Optimizer, OptimizerState,
    optimizer::{LEARNING_RATE, check_lengths},
};
use crate::Result;

#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &'static str {
        "adam"
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_lengths(grad, params)?;
        check_lengths(&self.v, params)?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((w, g), v), s)| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *w -= step_size * *v / (s.sqrt() + eps);
            });

        Ok(())
    }

    fn state(&self) -> OptimizerState {
        let mut state = OptimizerState::default();
        state
            .scalars
            .insert(LEARNING_RATE.to_string(), self.learning_rate);
        state.scalars.insert("beta1".to_string(), self.beta1);
        state.scalars.insert("beta2".to_string(), self.beta2);
        state.scalars.insert("epsilon".to_string(), self.epsilon);
        state.scalars.insert("beta1_t".to_string(), self.beta1_t);
        state.scalars.insert("beta2_t".to_string(), self.beta2_t);
        state.buffers.insert("v".to_string(), self.v.to_vec());
        state.buffers.insert("s".to_string(), self.s.to_vec());
        state
    }

    fn load_state(&mut self, mut state: OptimizerState) -> Result<()> {
        let len = self.v.len();
        let v = state.take_buffer("v", len)?;
        let s = state.take_buffer("s", len)?;

        let learning_rate = state.take_scalar(LEARNING_RATE)?;
        let beta1 = state.take_scalar("beta1")?;
        let beta2 = state.take_scalar("beta2")?;
        let epsilon = state.take_scalar("epsilon")?;
        let beta1_t = state.take_scalar("beta1_t")?;
        let beta2_t = state.take_scalar("beta2_t")?;

        *self = Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t,
            beta2_t,
            v: v.into_boxed_slice(),
            s: s.into_boxed_slice(),
            epsilon,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MlErr;

    #[test]
    fn first_step_moves_by_the_learning_rate() {
        // Bias correction makes the first step exactly lr * sign(g), up to epsilon.
        let mut adam = Adam::new(2, 0.1, 0.9, 0.999, 1e-8);
        let mut params = [1., 1.];

        adam.update_params(&[0.5, -3.], &mut params).unwrap();
        assert!((params[0] - 0.9).abs() < 1e-5);
        assert!((params[1] - 1.1).abs() < 1e-5);
    }

    #[test]
    fn restored_state_continues_identically() {
        let grads = [[0.3, -0.1, 2.], [0.2, 0.4, -1.], [-0.5, 0.1, 0.3]];

        let mut reference = Adam::new(3, 0.01, 0.9, 0.999, 1e-8);
        let mut expected = [0.5, -0.5, 0.];
        for grad in &grads {
            reference.update_params(grad, &mut expected).unwrap();
        }

        let mut first = Adam::new(3, 0.01, 0.9, 0.999, 1e-8);
        let mut params = [0.5, -0.5, 0.];
        first.update_params(&grads[0], &mut params).unwrap();

        let mut resumed = Adam::new(3, 0.01, 0.9, 0.999, 1e-8);
        resumed.load_state(first.state()).unwrap();
        for grad in &grads[1..] {
            resumed.update_params(grad, &mut params).unwrap();
        }

        assert_eq!(params, expected);
    }

    #[test]
    fn restored_state_brings_its_hyperparameters() {
        let saved = Adam::new(2, 0.01, 0.8, 0.99, 1e-6);
        let mut adam = Adam::new(2, 0.5, 0.9, 0.999, 1e-8);

        adam.load_state(saved.state()).unwrap();

        assert_eq!(adam.learning_rate(), 0.01);
        assert_eq!((adam.beta1, adam.beta2, adam.epsilon), (0.8, 0.99, 1e-6));
    }

    #[test]
    fn state_of_another_size_is_rejected() {
        let other = Adam::new(4, 0.01, 0.9, 0.999, 1e-8);
        let mut adam = Adam::new(3, 0.01, 0.9, 0.999, 1e-8);

        let err = adam.load_state(other.state()).unwrap_err();
        assert!(matches!(err, MlErr::SizeMismatch { got: 4, expected: 3, .. }));
    }
}
