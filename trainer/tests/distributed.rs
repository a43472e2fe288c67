mod common;

use std::{net::TcpListener, sync::Arc, thread};

use machine_learning::{
    Device,
    arch::{ForwardInput, Model, MultiDomainAutoencoder},
};
use ndarray::{Array2, Array3};
use serde_json::json;
use trainer::{
    TrainErr,
    checkpoint::checkpoint_path,
    config::DistConfig,
    distributed::{ProcessGroup, wrap_for_gradient_sync},
    train,
};

use common::config_with;

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn dist_config(port: u16, world_size: usize) -> DistConfig {
    DistConfig {
        dist_url: format!("tcp://127.0.0.1:{port}"),
        world_size,
        retry_interval_ms: 20,
        ..Default::default()
    }
}

fn on_threads<T, F>(groups: Vec<ProcessGroup>, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(ProcessGroup) -> T + Send + Copy + 'static,
{
    let handles: Vec<_> = groups
        .into_iter()
        .map(|group| thread::spawn(move || f(group)))
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn reduce_scalar_of_equal_values_is_the_value() {
    let groups = ProcessGroup::local(3).unwrap();

    let results = on_threads(groups, |group| group.reduce_scalar(0.25).unwrap());
    assert_eq!(results, [0.25; 3]);
}

#[test]
fn reduce_scalar_of_distinct_values_is_the_mean() {
    let groups = ProcessGroup::local(4).unwrap();

    let results = on_threads(groups, |group| {
        let value = group.rank() as f32 + 1.;
        group.reduce_scalar(value).unwrap()
    });

    assert_eq!(results, [2.5; 4]);
}

#[test]
fn gradient_sync_leaves_every_rank_with_the_average() {
    let config = common::config(std::path::Path::new("unused"));
    let autoencoder = config.autoencoder();
    let num_classes = autoencoder.num_classes();

    let groups = ProcessGroup::local(3).unwrap();
    let handles: Vec<_> = groups
        .into_iter()
        .map(|group| {
            let autoencoder = autoencoder.clone();
            thread::spawn(move || {
                let rank = group.rank();
                let features = Array3::from_elem((2, 5, 3), rank as f32 * 0.5 - 0.3);
                let targets = Array2::from_elem((2, 5), rank + 1);
                let input = ForwardInput::from_targets(features, targets.view(), num_classes)
                    .unwrap();

                let device = Device::cpu(rank, Some(1)).unwrap();
                let mut local = MultiDomainAutoencoder::new(autoencoder.clone(), device.clone(), 1)
                    .unwrap();
                let out = local.forward(&input).unwrap();
                let d_encoding = Array3::zeros(out.encoding.dim());
                local.backward(&out.reconstructions, d_encoding.view()).unwrap();

                let model = MultiDomainAutoencoder::new(autoencoder, device, 1).unwrap();
                let mut synced = wrap_for_gradient_sync(model, Arc::new(group));
                let out = synced.forward(&input).unwrap();
                synced.backward(&out.reconstructions, d_encoding.view()).unwrap();

                (local.grad().to_vec(), synced.grad().to_vec())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let len = results[0].0.len();
    let expected: Vec<f32> = (0..len)
        .map(|i| results.iter().map(|(local, _)| local[i]).sum::<f32>() / 3.)
        .collect();

    for (_, synced) in &results {
        assert_eq!(synced, &results[0].1);
        for (got, want) in synced.iter().zip(&expected) {
            assert!((got - want).abs() <= 1e-6 * want.abs().max(1.), "{got} != {want}");
        }
    }
}

#[test]
fn tcp_group_forms_and_reduces() {
    let port = free_port();

    let handles: Vec<_> = (0..3)
        .map(|rank| {
            thread::spawn(move || {
                let group = ProcessGroup::init(rank, 3, "group", &dist_config(port, 3)).unwrap();
                let mut buf = [rank as f32, 3.];
                group.all_reduce(&mut buf).unwrap();
                group.leave().unwrap();
                buf
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), [1., 3.]);
    }
}

#[test]
fn mismatched_group_name_fails_to_init() {
    let port = free_port();

    let handles: Vec<_> = [(0, "group"), (1, "other")]
        .into_iter()
        .map(|(rank, name)| {
            thread::spawn(move || ProcessGroup::init(rank, 2, name, &dist_config(port, 2)).err())
        })
        .collect();

    for handle in handles {
        let err = handle.join().unwrap();
        assert!(matches!(err, Some(TrainErr::DistributedInit(_))), "{err:?}");
    }
}

#[test]
fn data_parallel_training_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().to_path_buf();
    let port = free_port();

    let handles: Vec<_> = (0..2)
        .map(|rank| {
            let output = output.clone();
            thread::spawn(move || {
                let config = config_with(&output, |json| {
                    json["dist_config"] = json!({
                        "dist_url": format!("tcp://127.0.0.1:{port}"),
                        "world_size": 2,
                        "retry_interval_ms": 20
                    });
                });
                train(&config, rank, "wavenet").unwrap()
            })
        })
        .collect();

    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // 20 segments over 2 ranks give 5 batches of 2 each.
    for report in &reports {
        assert_eq!(report.final_iteration, 5);
    }

    let losses: Vec<Vec<_>> = reports.iter().map(|r| r.steps().collect()).collect();
    assert_eq!(losses[0], losses[1]);

    assert_eq!(reports[0].checkpoints().map(|(i, _)| i).collect::<Vec<_>>(), [0]);
    assert_eq!(reports[1].checkpoints().count(), 0);
    assert!(checkpoint_path(&output, 0).is_file());
}
