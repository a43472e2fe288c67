mod common;

use machine_learning::{
    Device,
    arch::{
        AutoencoderConfig, DomainClassifier, ForwardInput, MeanPoolClassifier, Model,
        MultiDomainAutoencoder, loss::AdversarialLoss,
    },
};
use ndarray::{Array2, Array3};
use serde_json::json;
use trainer::{
    Phase, TrainErr, TrainingEvent, TrainingReport, checkpoint::checkpoint_path,
    data::AudioDataset, train,
};

use common::{config, config_with};

fn first_epoch(report: &TrainingReport) -> Option<usize> {
    report.events.iter().find_map(|event| match *event {
        TrainingEvent::EpochStarted { epoch } => Some(epoch),
        _ => None,
    })
}

#[test]
fn single_device_run_checkpoints_periodically() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("nested").join("checkpoints");

    let report = train(&config(&output), 0, "").unwrap();

    assert_eq!(report.final_iteration, 10);
    assert_eq!(first_epoch(&report), Some(0));
    assert_eq!(
        report.phases().collect::<Vec<_>>(),
        [
            Phase::Training,
            Phase::Checkpointing,
            Phase::Training,
            Phase::Checkpointing,
            Phase::Training,
            Phase::Done
        ]
    );

    let steps: Vec<_> = report.steps().collect();
    assert_eq!(steps.len(), 10);
    assert!(steps.iter().map(|&(_, loss)| loss).all(f32::is_finite));
    assert_eq!(steps.iter().map(|&(i, _)| i).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());

    let checkpoints: Vec<_> = report.checkpoints().map(|(i, _)| i).collect();
    assert_eq!(checkpoints, [0, 5]);
    assert!(checkpoint_path(&output, 0).is_file());
    assert!(checkpoint_path(&output, 5).is_file());
    assert!(!checkpoint_path(&output, 10).exists());
}

#[test]
fn training_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();

    let a = train(&config(&dir.path().join("a")), 0, "").unwrap();
    let b = train(&config(&dir.path().join("b")), 0, "").unwrap();

    assert_eq!(a.steps().collect::<Vec<_>>(), b.steps().collect::<Vec<_>>());
}

#[test]
fn resume_starts_after_the_checkpointed_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first");
    train(&config(&first), 0, "").unwrap();

    let resumed = dir.path().join("resumed");
    let checkpoint = checkpoint_path(&first, 5);
    let config = config_with(&resumed, |json| {
        json["train_config"]["checkpoint_path"] = json!(checkpoint);
    });

    let report = train(&config, 0, "").unwrap();
    let iterations: Vec<_> = report.steps().map(|(i, _)| i).collect();

    // The resumed epoch replays every batch of the shard.
    assert_eq!(iterations, (6..16).collect::<Vec<_>>());
    assert_eq!(report.final_iteration, 16);
    assert_eq!(report.checkpoints().map(|(i, _)| i).collect::<Vec<_>>(), [10, 15]);
}

#[test]
fn resume_can_skip_consumed_batches() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first");
    let full = train(&config(&first), 0, "").unwrap();

    let checkpoint = checkpoint_path(&first, 5);
    let config = config_with(&dir.path().join("resumed"), |json| {
        json["train_config"]["checkpoint_path"] = json!(checkpoint);
        json["train_config"]["skip_consumed_batches"] = json!(true);
    });

    let report = train(&config, 0, "").unwrap();
    let steps: Vec<_> = report.steps().collect();

    assert_eq!(steps.iter().map(|&(i, _)| i).collect::<Vec<_>>(), [6, 7, 8, 9]);
    assert_eq!(report.final_iteration, 10);

    // Same weights, optimizer state and batches as the uninterrupted run.
    let expected: Vec<_> = full.steps().filter(|&(i, _)| i >= 6).collect();
    assert_eq!(steps, expected);
}

#[test]
fn resume_in_a_later_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first");
    let config = config_with(&first, |json| {
        json["train_config"]["epochs"] = json!(2);
    });
    train(&config, 0, "").unwrap();

    let checkpoint = checkpoint_path(&first, 10);
    let config = config_with(&dir.path().join("resumed"), |json| {
        json["train_config"]["epochs"] = json!(2);
        json["train_config"]["checkpoint_path"] = json!(checkpoint);
    });

    let report = train(&config, 0, "").unwrap();

    assert_eq!(first_epoch(&report), Some(1));
    assert_eq!(report.steps().next().map(|(i, _)| i), Some(11));
    assert_eq!(report.final_iteration, 21);
}

#[test]
fn resume_restores_the_saved_learning_rate() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first");
    let full = train(&config(&first), 0, "").unwrap();

    // Resuming with another configured rate must still continue the saved run.
    let checkpoint = checkpoint_path(&first, 5);
    let config = config_with(&dir.path().join("resumed"), |json| {
        json["train_config"]["checkpoint_path"] = json!(checkpoint);
        json["train_config"]["skip_consumed_batches"] = json!(true);
        json["train_config"]["learning_rate"] = json!(0.5);
    });

    let report = train(&config, 0, "").unwrap();

    let expected: Vec<_> = full.steps().filter(|&(i, _)| i >= 6).collect();
    assert_eq!(report.steps().collect::<Vec<_>>(), expected);
}

#[test]
fn missing_checkpoint_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("wavenet_42");
    let config = config_with(dir.path(), |json| {
        json["train_config"]["checkpoint_path"] = json!(missing);
    });

    let err = train(&config, 0, "").unwrap_err();
    assert!(matches!(err, TrainErr::CheckpointNotFound(path) if path == missing));
}

#[test]
fn rank_without_group_is_an_invalid_topology() {
    let dir = tempfile::tempdir().unwrap();

    let err = train(&config(dir.path()), 1, "").unwrap_err();
    assert!(matches!(
        err,
        TrainErr::InvalidTopology {
            rank: 1,
            world_size: 1
        }
    ));
}

#[test]
fn rank_outside_a_single_device_group_is_an_invalid_topology() {
    let dir = tempfile::tempdir().unwrap();

    let err = train(&config(dir.path()), 1, "group").unwrap_err();
    assert!(matches!(err, TrainErr::InvalidTopology { rank: 1, .. }));
}

#[test]
fn several_devices_without_group_fall_back_to_one() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with(dir.path(), |json| {
        json["dist_config"]["world_size"] = json!(4);
    });

    let report = train(&config, 0, "").unwrap();
    assert_eq!(report.final_iteration, 10);
}

#[test]
fn too_few_segments_for_a_batch_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with(dir.path(), |json| {
        json["train_config"]["batch_size"] = json!(32);
    });

    let err = train(&config, 0, "").unwrap_err();
    assert!(matches!(err, TrainErr::Configuration(_)));
}

#[test]
fn trains_on_a_dataset_file_with_three_domains() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data.safetensors");

    let features = Array3::from_shape_fn((8, 10, 3), |(n, t, f)| ((n + t + f) as f32).sin());
    AudioDataset::new(features, Array2::zeros((8, 10)))
        .unwrap()
        .save(&data)
        .unwrap();

    let config = config_with(&dir.path().join("out"), |json| {
        json["train_config"]["num_domains"] = json!(3);
        json["data_config"] = json!({ "file": { "path": data } });
    });

    let report = train(&config, 0, "").unwrap();

    assert_eq!(report.final_iteration, 4);
    assert!(report.steps().all(|(_, loss)| loss.is_finite()));
}

#[test]
fn silent_targets_and_uniform_classifier_give_a_finite_loss() {
    let config = common::config(std::path::Path::new("unused"));
    let autoencoder = AutoencoderConfig {
        num_domains: 3,
        ..config.autoencoder()
    };
    let latent = autoencoder.latent_channels();
    let num_classes = autoencoder.num_classes();

    let device = Device::cpu(0, Some(1)).unwrap();
    let mut model = MultiDomainAutoencoder::new(autoencoder, device, 5).unwrap();
    let size = latent * 3 + 3;
    let mut classifier = MeanPoolClassifier::from_params(latent, 3, vec![0.; size]).unwrap();

    let targets = Array2::zeros((2, 6));
    let input = ForwardInput::from_targets(Array3::ones((2, 6, 3)), targets.view(), num_classes)
        .unwrap();
    let output = model.forward(&input).unwrap();
    assert_eq!(output.reconstructions.len(), 3);

    let logits = classifier.predict(output.encoding.view()).unwrap();
    assert!(logits.iter().all(|&x| x == 0.));

    let loss = AdversarialLoss::new(3)
        .compute(targets.view(), logits.view(), &output.reconstructions, 0.5)
        .unwrap();
    assert!(loss.value.is_finite());

    let d_encoding = classifier.backward(loss.d_domain_logits.view()).unwrap();
    assert_eq!(d_encoding.dim(), output.encoding.dim());
}
