use ndarray::{Zip, prelude::*};

use crate::{MlErr, Result};

/// Softmax cross entropy between rows of logits and class indices, averaged over the rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    /// Returns a new `CrossEntropy`.
    pub fn new() -> Self {
        Self
    }

    /// Computes the loss.
    ///
    /// # Arguments
    /// * `logits` - The `(n, classes)` unnormalized scores.
    /// * `targets` - The `n` expected classes.
    pub fn loss(&self, logits: ArrayView2<f32>, targets: ArrayView1<usize>) -> Result<f32> {
        self.loss_and_prime(logits, targets).map(|(loss, _)| loss)
    }

    /// Computes the loss and its gradient with respect to the logits.
    ///
    /// # Arguments
    /// * `logits` - The `(n, classes)` unnormalized scores.
    /// * `targets` - The `n` expected classes.
    ///
    /// # Returns
    /// The mean loss and the `(n, classes)` gradient `(softmax(logits) - onehot(targets)) / n`.
    pub fn loss_and_prime(
        &self,
        logits: ArrayView2<f32>,
        targets: ArrayView1<usize>,
    ) -> Result<(f32, Array2<f32>)> {
        let (rows, classes) = logits.dim();
        if rows != targets.len() || rows == 0 {
            return Err(MlErr::ShapeMismatch {
                what: "cross entropy targets",
                got: vec![targets.len()],
                expected: vec![rows],
            });
        }

        if let Some(&class) = targets.iter().find(|&&class| class >= classes) {
            return Err(MlErr::InvalidTarget {
                class,
                num_classes: classes,
            });
        }

        let mut probs = logits.to_owned();
        let mut losses = Array1::<f32>::zeros(rows);

        Zip::from(probs.rows_mut())
            .and(&targets)
            .and(&mut losses)
            .par_for_each(|mut row, &target, loss| {
                let max = row.fold(f32::NEG_INFINITY, |max, &z| max.max(z));
                let shifted_target = row[target] - max;

                row.mapv_inplace(|z| (z - max).exp());
                let sum = row.sum();
                row /= sum;

                *loss = sum.ln() - shifted_target;
                row[target] -= 1.;
            });

        probs /= rows as f32;
        Ok((losses.sum() / rows as f32, probs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_logits_cost_log_classes() {
        let ce = CrossEntropy::new();
        let loss = ce
            .loss(Array2::zeros((3, 4)).view(), array![0, 1, 3].view())
            .unwrap();

        assert!((loss - 4f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn large_logits_stay_finite() {
        let ce = CrossEntropy::new();
        let (loss, prime) = ce
            .loss_and_prime(array![[1000., -1000.]].view(), array![1].view())
            .unwrap();

        assert!((loss - 2000.).abs() < 1e-2);
        assert!(prime.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn prime_matches_finite_differences() {
        let ce = CrossEntropy::new();
        let logits = array![[0.2, -1.3, 0.7], [1.1, 0.4, -0.5]];
        let targets = array![2, 0];

        let (_, prime) = ce.loss_and_prime(logits.view(), targets.view()).unwrap();

        let h = 1e-2;
        for ((i, j), analytic) in prime.indexed_iter() {
            let mut plus = logits.clone();
            plus[[i, j]] += h;
            let mut minus = logits.clone();
            minus[[i, j]] -= h;

            let numeric = (ce.loss(plus.view(), targets.view()).unwrap()
                - ce.loss(minus.view(), targets.view()).unwrap())
                / (2. * h);
            assert!((numeric - analytic).abs() < 1e-3);
        }
    }

    #[test]
    fn out_of_range_target_is_rejected() {
        let ce = CrossEntropy::new();
        let err = ce
            .loss(Array2::zeros((1, 2)).view(), array![2].view())
            .unwrap_err();

        assert_eq!(
            err,
            MlErr::InvalidTarget {
                class: 2,
                num_classes: 2
            }
        );
    }
}
