use std::{fs, num::NonZeroUsize, path::PathBuf, sync::Arc};

use log::{debug, info, warn};
use machine_learning::{
    Device,
    arch::{
        DomainClassifier, ForwardInput, Model, MultiDomainAutoencoder, NetworkBuilder,
        loss::AdversarialLoss,
    },
    optimization::{Optimizer, build_optimizer},
};

use crate::{
    Result, TrainErr,
    checkpoint::{self, checkpoint_path},
    config::Config,
    data::{AudioDataset, Batch, DataLoader, ShardSpec},
    distributed::{ProcessGroup, wrap_for_gradient_sync},
};

/// The stage a training run is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Training,
    Checkpointing,
    Done,
}

/// Something observable that happened during a training run.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    /// The run moved into `phase`.
    PhaseChanged { phase: Phase },
    EpochStarted { epoch: usize },
    /// A completed step, `loss` is averaged across the process group.
    Step { iteration: usize, loss: f32 },
    CheckpointSaved { iteration: usize, path: PathBuf },
}

/// The outcome of a training run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub events: Vec<TrainingEvent>,
    /// The value of the iteration counter once training finished.
    pub final_iteration: usize,
}

impl TrainingReport {
    /// The checkpoints written during the run, in order.
    pub fn checkpoints(&self) -> impl Iterator<Item = (usize, &PathBuf)> {
        self.events.iter().filter_map(|event| match event {
            TrainingEvent::CheckpointSaved { iteration, path } => Some((*iteration, path)),
            _ => None,
        })
    }

    /// The phases the run went through after initializing, in order.
    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.events.iter().filter_map(|event| match *event {
            TrainingEvent::PhaseChanged { phase } => Some(phase),
            _ => None,
        })
    }

    /// The iterations of every step taken, in order.
    pub fn steps(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.events.iter().filter_map(|event| match *event {
            TrainingEvent::Step { iteration, loss } => Some((iteration, loss)),
            _ => None,
        })
    }
}

/// Runs a whole training as process `rank` of the group called `group_name`.
///
/// An empty group name means single device training: with several devices available it
/// falls back to one of them, and only rank 0 may run.
///
/// # Arguments
/// * `config` - The parsed configuration.
/// * `rank` - This process' rank.
/// * `group_name` - The process group to join, empty for single device training.
///
/// # Returns
/// The report of the run or the first fatal error.
pub fn train(config: &Config, rank: usize, group_name: &str) -> Result<TrainingReport> {
    let world_size = config.dist_config.world_size;

    let group = if group_name.is_empty() {
        if world_size > 1 {
            warn!(
                world_size = world_size;
                "several devices are available but no group name was given, training on one"
            );
        }

        if rank != 0 {
            return Err(TrainErr::InvalidTopology {
                rank,
                world_size: 1,
            });
        }

        None
    } else {
        if world_size == 1 && rank != 0 {
            return Err(TrainErr::InvalidTopology { rank, world_size });
        }

        let group = ProcessGroup::init(rank, world_size, group_name, &config.dist_config)?;
        Some(Arc::new(group))
    };

    Orchestrator::new(config, rank, group).run()
}

/// Drives the training loop of a single process.
pub struct Orchestrator<'a> {
    config: &'a Config,
    rank: usize,
    group: Option<Arc<ProcessGroup>>,
    phase: Phase,
    events: Vec<TrainingEvent>,
}

impl<'a> Orchestrator<'a> {
    /// Creates a new `Orchestrator`.
    ///
    /// # Arguments
    /// * `config` - The parsed configuration.
    /// * `rank` - This process' rank, 0 when training alone.
    /// * `group` - The process group gradients are synchronized through, if any.
    pub fn new(config: &'a Config, rank: usize, group: Option<Arc<ProcessGroup>>) -> Self {
        Self {
            config,
            rank,
            group,
            phase: Phase::Initializing,
            events: Vec::new(),
        }
    }

    /// Trains for the configured amount of epochs.
    ///
    /// # Returns
    /// The report of the run or the first fatal error.
    pub fn run(mut self) -> Result<TrainingReport> {
        let config = self.config;
        let train = &config.train_config;
        let autoencoder = config.autoencoder();
        let num_classes = autoencoder.num_classes();
        let latent_channels = autoencoder.latent_channels();
        let num_domains = autoencoder.num_domains;

        let device = Device::cpu(self.rank, train.threads)?;
        info!(device = device.ordinal(), threads = device.threads(); "using cpu device");
        let model = MultiDomainAutoencoder::new(autoencoder, device.clone(), train.seed)?;

        let mut model: Box<dyn Model> = match &self.group {
            Some(group) if group.world_size() > 1 => {
                Box::new(wrap_for_gradient_sync(model, Arc::clone(group)))
            }
            _ => Box::new(model),
        };

        let mut classifier = NetworkBuilder::new().build_classifier(
            &train.domain_confusion_model,
            latent_channels,
            num_domains,
        )?;
        let loss_fn = AdversarialLoss::new(num_domains);
        let mut optimizer = build_optimizer(&train.optimizer, train.learning_rate, model.size());

        let mut iteration = 0;
        if let Some(path) = train.checkpoint_path() {
            let restored = checkpoint::load(path, &mut *model, &mut *optimizer)?;
            info!(
                iteration = restored.iteration,
                learning_rate = optimizer.learning_rate();
                "resuming from {}", path.display()
            );
            iteration = restored.iteration + 1;
        }

        let dataset = Arc::new(AudioDataset::from_config(&config.data_config)?);
        let world_size = self.group.as_ref().map_or(1, |group| group.world_size());
        let shard = NonZeroUsize::new(world_size)
            .and_then(|num_ranks| ShardSpec::new(self.rank, num_ranks))
            .ok_or(TrainErr::InvalidTopology {
                rank: self.rank,
                world_size,
            })?;

        let mut loader = DataLoader::new(dataset, shard, train.batch_size);
        let batches_per_epoch = loader.batches_per_epoch();
        if batches_per_epoch == 0 {
            return Err(TrainErr::Configuration(format!(
                "shard {:?} holds less than a batch of {}",
                loader.shard_range(),
                train.batch_size
            )));
        }

        if self.rank == 0 {
            fs::create_dir_all(&train.output_directory)?;
        }

        let resume_epoch = iteration / batches_per_epoch;
        self.transition(Phase::Training);

        for epoch in resume_epoch..train.epochs {
            loader.reset();
            if epoch == resume_epoch && train.skip_consumed_batches {
                loader.skip(iteration % batches_per_epoch);
            }

            info!(epoch = epoch; "starting epoch");
            self.events.push(TrainingEvent::EpochStarted { epoch });

            while let Some(batch) = loader.next_batch() {
                let loss = Self::step(
                    batch,
                    num_classes,
                    train.tradeoff,
                    &mut *model,
                    &mut *classifier,
                    &loss_fn,
                    &mut *optimizer,
                )?;

                let loss = match &self.group {
                    Some(group) => group.reduce_scalar(loss)?,
                    None => loss,
                };

                info!("{iteration}:\t{loss:.9}");
                self.events.push(TrainingEvent::Step { iteration, loss });

                if self.rank == 0 && iteration % train.iters_per_checkpoint == 0 {
                    self.transition(Phase::Checkpointing);

                    let path = checkpoint_path(&train.output_directory, iteration);
                    checkpoint::save(
                        &*model,
                        &*optimizer,
                        optimizer.learning_rate(),
                        iteration,
                        &path,
                        &device,
                    )?;
                    self.events
                        .push(TrainingEvent::CheckpointSaved { iteration, path });

                    self.transition(Phase::Training);
                }

                iteration += 1;
            }
        }

        if let Some(group) = &self.group {
            group.leave()?;
        }

        self.transition(Phase::Done);

        Ok(TrainingReport {
            events: self.events,
            final_iteration: iteration,
        })
    }

    /// Runs one optimization step on `batch`.
    ///
    /// # Returns
    /// The local value of the loss.
    fn step(
        batch: Batch,
        num_classes: usize,
        tradeoff: f32,
        model: &mut dyn Model,
        classifier: &mut dyn DomainClassifier,
        loss_fn: &AdversarialLoss,
        optimizer: &mut dyn Optimizer,
    ) -> Result<f32> {
        let Batch { features, targets } = batch;

        model.zero_grad();

        let input = ForwardInput::from_targets(features, targets.view(), num_classes)?;
        let output = model.forward(&input)?;
        let domain_logits = classifier.predict(output.encoding.view())?;

        let loss = loss_fn.compute(
            targets.view(),
            domain_logits.view(),
            &output.reconstructions,
            tradeoff,
        )?;

        let d_encoding = classifier.backward(loss.d_domain_logits.view())?;
        model.backward(&loss.d_reconstructions, d_encoding.view())?;
        model.step(optimizer)?;

        Ok(loss.value)
    }

    fn transition(&mut self, phase: Phase) {
        debug!(rank = self.rank; "{:?} -> {phase:?}", self.phase);
        self.phase = phase;
        self.events.push(TrainingEvent::PhaseChanged { phase });
    }
}
