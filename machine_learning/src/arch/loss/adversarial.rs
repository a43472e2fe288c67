use ndarray::prelude::*;
use rayon::prelude::*;

use super::CrossEntropy;
use crate::{MlErr, Result};

/// The weight of the domain confusion term when none is configured.
pub const DEFAULT_TRADEOFF: f32 = 0.5;

/// The value and gradients of one evaluation of the [`AdversarialLoss`].
#[derive(Debug, Clone)]
pub struct LossOutput {
    pub value: f32,
    /// The gradient with respect to each decoder's output, in domain order.
    pub d_reconstructions: Vec<Array3<f32>>,
    /// The gradient with respect to the domain classifier's logits.
    pub d_domain_logits: Array2<f32>,
}

/// Reconstruction loss of every domain's decoder minus a weighted domain confusion term.
///
/// For every domain `j` it adds the cross entropy between decoder `j`'s output and the
/// targets, and subtracts `tradeoff` times the cross entropy between the domain classifier's
/// logits and domain `j`. Minimizing it rewards encodings the classifier can't attribute to a
/// domain.
#[derive(Debug, Clone, Copy)]
pub struct AdversarialLoss {
    num_domains: usize,
    ce: CrossEntropy,
}

impl AdversarialLoss {
    /// Creates a new `AdversarialLoss` for `num_domains` decoders.
    pub fn new(num_domains: usize) -> Self {
        Self {
            num_domains,
            ce: CrossEntropy::new(),
        }
    }

    pub fn num_domains(&self) -> usize {
        self.num_domains
    }

    /// Evaluates the loss.
    ///
    /// # Arguments
    /// * `targets` - The `(batch, time)` expected sample classes.
    /// * `domain_logits` - The `(batch, num_domains)` output of the domain classifier.
    /// * `decoder_outputs` - One `(batch, time, num_classes)` logit tensor per domain.
    /// * `tradeoff` - The weight of the domain confusion term.
    ///
    /// # Returns
    /// The loss value and its gradients or an error if the shapes don't agree.
    pub fn compute(
        &self,
        targets: ArrayView2<usize>,
        domain_logits: ArrayView2<f32>,
        decoder_outputs: &[Array3<f32>],
        tradeoff: f32,
    ) -> Result<LossOutput> {
        let (batch, time) = targets.dim();
        self.check_shapes(batch, time, domain_logits, decoder_outputs)?;

        let flat_targets: Array1<usize> = targets.iter().copied().collect();

        let reconstruction_terms = decoder_outputs
            .par_iter()
            .map(|output| -> Result<(f32, Array3<f32>)> {
                let classes = output.dim().2;
                let logits = output.to_shape((batch * time, classes))?;
                let (loss, prime) = self.ce.loss_and_prime(logits.view(), flat_targets.view())?;
                Ok((loss, prime.into_shape_with_order((batch, time, classes))?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut value = 0.;
        let mut d_domain_logits = Array2::<f32>::zeros((batch, self.num_domains));
        let mut d_reconstructions = Vec::with_capacity(self.num_domains);

        for (domain, (reconstruction_loss, d_reconstruction)) in
            reconstruction_terms.into_iter().enumerate()
        {
            let domain_targets = Array1::from_elem(batch, domain);
            let (confusion_loss, d_confusion) = self
                .ce
                .loss_and_prime(domain_logits, domain_targets.view())?;

            value += reconstruction_loss - tradeoff * confusion_loss;
            d_domain_logits.scaled_add(-tradeoff, &d_confusion);
            d_reconstructions.push(d_reconstruction);
        }

        Ok(LossOutput {
            value,
            d_reconstructions,
            d_domain_logits,
        })
    }

    fn check_shapes(
        &self,
        batch: usize,
        time: usize,
        domain_logits: ArrayView2<f32>,
        decoder_outputs: &[Array3<f32>],
    ) -> Result<()> {
        if decoder_outputs.len() != self.num_domains {
            return Err(MlErr::ShapeMismatch {
                what: "decoder outputs",
                got: vec![decoder_outputs.len()],
                expected: vec![self.num_domains],
            });
        }

        if domain_logits.dim() != (batch, self.num_domains) {
            return Err(MlErr::ShapeMismatch {
                what: "domain logits",
                got: domain_logits.shape().to_vec(),
                expected: vec![batch, self.num_domains],
            });
        }

        for output in decoder_outputs {
            let (out_batch, out_time, classes) = output.dim();
            if (out_batch, out_time) != (batch, time) {
                return Err(MlErr::ShapeMismatch {
                    what: "decoder output",
                    got: vec![out_batch, out_time, classes],
                    expected: vec![batch, time, classes],
                });
            }
        }

        Ok(())
    }
}
