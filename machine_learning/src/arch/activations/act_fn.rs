use super::{Relu, Sigmoid, Tanh};
use crate::specs::ActFnSpec;

/// An element wise activation function applied after a layer's affine map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActFn {
    Sigmoid(Sigmoid),
    Tanh(Tanh),
    Relu(Relu),
}

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        Self::Sigmoid(Sigmoid::new(amp))
    }

    pub fn tanh() -> Self {
        Self::Tanh(Tanh)
    }

    pub fn relu() -> Self {
        Self::Relu(Relu)
    }

    pub fn f(&self, z: f32) -> f32 {
        match self {
            Self::Sigmoid(a) => a.f(z),
            Self::Tanh(a) => a.f(z),
            Self::Relu(a) => a.f(z),
        }
    }

    pub fn df(&self, z: f32) -> f32 {
        match self {
            Self::Sigmoid(a) => a.df(z),
            Self::Tanh(a) => a.df(z),
            Self::Relu(a) => a.df(z),
        }
    }
}

impl From<ActFnSpec> for ActFn {
    fn from(spec: ActFnSpec) -> Self {
        match spec {
            ActFnSpec::Sigmoid { amp } => Self::sigmoid(amp),
            ActFnSpec::Tanh => Self::tanh(),
            ActFnSpec::Relu => Self::relu(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_derivative(act_fn: ActFn, z: f32) {
        let h = 1e-2;
        let numeric = (act_fn.f(z + h) - act_fn.f(z - h)) / (2. * h);
        assert!(
            (numeric - act_fn.df(z)).abs() < 1e-2,
            "{act_fn:?} at {z}: numeric {numeric}, analytic {}",
            act_fn.df(z)
        );
    }

    #[test]
    fn derivatives_match_finite_differences() {
        for z in [-2.0, -0.3, 0.4, 1.7] {
            assert_derivative(ActFn::sigmoid(1.5), z);
            assert_derivative(ActFn::tanh(), z);
            assert_derivative(ActFn::relu(), z);
        }
    }

    #[test]
    fn constructors_pick_their_variant() {
        assert!(matches!(ActFn::tanh(), ActFn::Tanh(_)));
        assert!(matches!(ActFn::relu(), ActFn::Relu(_)));
        assert!(matches!(ActFn::from(ActFnSpec::Tanh), ActFn::Tanh(_)));
        assert_eq!(ActFn::tanh().f(0.5), 0.5f32.tanh());
    }

    #[test]
    fn relu_clamps_negative_inputs() {
        let relu = ActFn::relu();
        assert_eq!(relu.f(-3.0), 0.0);
        assert_eq!(relu.f(2.5), 2.5);
        assert_eq!(relu.df(-3.0), 0.0);
    }
}
