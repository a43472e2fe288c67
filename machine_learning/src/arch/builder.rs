use rand::{SeedableRng, rngs::StdRng};

use super::{
    DomainClassifier, MeanPoolClassifier, Network, activations::ActFn, layers::Layer,
};
use crate::{
    MlErr, Result,
    specs::{ClassifierSpec, NetworkSpec},
};

/// Builds `Network`s and domain classifiers given a specification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkBuilder;

impl NetworkBuilder {
    /// Creates a new `NetworkBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `Network` following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification for the network.
    ///
    /// # Returns
    /// The network or an error if the spec has an empty dimension.
    pub fn build(&self, spec: &NetworkSpec) -> Result<Network> {
        self.validate(spec)?;

        let act_fn = ActFn::from(spec.act_fn);
        let residual = spec.n_residual_channels;

        let input = Layer::dense((spec.n_in_channels, residual), None);
        let convs = self.dilations(spec).map(|dilation| {
            Layer::causal_conv((residual, residual), spec.kernel_size, dilation, Some(act_fn))
        });
        let output = Layer::dense((residual, spec.n_out_channels), None);

        let layers = std::iter::once(input)
            .chain(convs)
            .chain(std::iter::once(output));

        Ok(Network::new(layers))
    }

    /// Builds a new domain classifier following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification for the classifier.
    /// * `latent_channels` - The amount of channels of the encodings it scores.
    /// * `num_domains` - The amount of domains it tells apart.
    pub fn build_classifier(
        &self,
        spec: &ClassifierSpec,
        latent_channels: usize,
        num_domains: usize,
    ) -> Result<Box<dyn DomainClassifier>> {
        match *spec {
            ClassifierSpec::MeanPool { seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                let classifier = MeanPoolClassifier::new(latent_channels, num_domains, &mut rng)?;
                Ok(Box::new(classifier))
            }
        }
    }

    /// The dilation of each convolution: `1, 2, 4, ...` wrapping around after `max_dilation`.
    fn dilations<'a>(&self, spec: &'a NetworkSpec) -> impl Iterator<Item = usize> + 'a {
        let cycle = spec.max_dilation.ilog2() + 1;
        (0..spec.n_layers).map(move |i| 1 << (i as u32 % cycle))
    }

    fn validate(&self, spec: &NetworkSpec) -> Result<()> {
        let fields = [
            ("n_in_channels", spec.n_in_channels),
            ("n_layers", spec.n_layers),
            ("max_dilation", spec.max_dilation),
            ("n_residual_channels", spec.n_residual_channels),
            ("n_out_channels", spec.n_out_channels),
            ("kernel_size", spec.kernel_size),
        ];

        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(MlErr::InvalidConfig(format!("{name} must be positive"))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::layers::Layer;

    fn spec(n_layers: usize, max_dilation: usize) -> NetworkSpec {
        NetworkSpec {
            n_in_channels: 3,
            n_layers,
            max_dilation,
            n_residual_channels: 4,
            n_out_channels: 5,
            kernel_size: 2,
            act_fn: Default::default(),
        }
    }

    #[test]
    fn dilations_cycle_up_to_the_maximum() {
        let net = NetworkBuilder::new().build(&spec(6, 4)).unwrap();

        let dilations: Vec<_> = net
            .layers()
            .iter()
            .filter_map(|layer| match layer {
                Layer::CausalConv(conv) => Some(conv.dilation()),
                Layer::Dense(_) => None,
            })
            .collect();

        assert_eq!(dilations, [1, 2, 4, 1, 2, 4]);
        assert_eq!(net.in_channels(), 3);
        assert_eq!(net.out_channels(), 5);
    }

    #[test]
    fn empty_dimensions_are_rejected() {
        let mut spec = spec(2, 2);
        spec.n_residual_channels = 0;

        let err = NetworkBuilder::new().build(&spec).unwrap_err();
        assert!(matches!(err, MlErr::InvalidConfig(_)));
    }
}
