use rankwire::environment::{Config, DynamicProtocol};
use rankwire::request;
use rankwire::traits::*;
use rankwire::transport::local::LocalUniverse;
use rankwire::{Error, ErrorKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Mesh {
    label: String,
    cells: Vec<u32>,
}

fn configs() -> [Config; 2] {
    [
        Config::default().with_dynamic_protocol(DynamicProtocol::Probe),
        Config::default().with_dynamic_protocol(DynamicProtocol::SizePrefix),
    ]
}

#[test]
fn barrier_returns_everywhere() {
    let done = LocalUniverse::run(5, |world| {
        world.barrier().unwrap();
        world.barrier().unwrap();
        true
    });
    assert_eq!(done, vec![true; 5]);
}

#[test]
fn immediate_barrier_waits_for_every_rank() {
    let comms = LocalUniverse::new(3).communicators();
    let mut early = vec![
        comms[1].immediate_barrier().unwrap(),
        comms[2].immediate_barrier().unwrap(),
    ];
    assert!(early.iter_mut().all(|request| request.test().unwrap().is_none()));

    let mut last = comms[0].immediate_barrier().unwrap();
    last.wait().unwrap();
    request::wait_all(&mut early).unwrap();
    assert!(early.iter().all(|request| !request.active()));
}

#[test]
fn immediate_barrier_completes_with_the_combinators() {
    let done = LocalUniverse::run(4, |world| {
        let mut requests = vec![world.immediate_barrier().unwrap()];
        world.barrier().unwrap();
        request::wait_all(&mut requests).unwrap().len()
    });
    assert_eq!(done, vec![1; 4]);
}

#[test]
fn broadcast_reaches_every_rank() {
    for config in configs() {
        let meshes = LocalUniverse::run_with(config, 6, |world| {
            let mut mesh = Mesh::default();
            if world.rank() == 2 {
                mesh = Mesh {
                    label: "coarse".into(),
                    cells: vec![1, 2, 3, 5, 8],
                };
            }
            world.process_at_rank(2).broadcast(&mut mesh).unwrap();
            mesh
        });
        assert!(meshes.iter().all(|mesh| mesh.label == "coarse"));
        assert!(meshes.iter().all(|mesh| mesh.cells == [1, 2, 3, 5, 8]));
    }
}

#[test]
fn broadcast_into_fills_fixed_buffers() {
    let buffers = LocalUniverse::run(3, |world| {
        let mut buffer = [0i32; 4];
        if world.rank() == 0 {
            buffer = [1, 2, 3, 4];
        }
        world.process_at_rank(0).broadcast_into(&mut buffer[..]).unwrap();
        buffer
    });
    assert_eq!(buffers, vec![[1, 2, 3, 4]; 3]);
}

#[test]
fn immediate_broadcast_completes_with_the_combinators() {
    for config in configs() {
        let values = LocalUniverse::run_with(config, 4, |world| {
            let mut value = if world.rank() == 1 {
                vec!["a".to_string(), "b".to_string()]
            } else {
                Vec::new()
            };
            let mut requests = vec![world.process_at_rank(1).immediate_broadcast(&mut value).unwrap()];
            request::wait_all(&mut requests).unwrap();
            drop(requests);
            value
        });
        assert_eq!(values, vec![vec!["a".to_string(), "b".to_string()]; 4]);
    }
}

#[test]
fn gather_collects_in_rank_order() {
    let gathered = LocalUniverse::run(4, |world| {
        let root = world.process_at_rank(3);
        let value = format!("from {}", world.rank());
        if world.rank() == root.rank() {
            Some(root.gather_root(&value).unwrap())
        } else {
            root.gather(&value).unwrap();
            None
        }
    });
    assert_eq!(
        gathered[3].as_deref().unwrap(),
        ["from 0", "from 1", "from 2", "from 3"]
    );
    assert!(gathered[..3].iter().all(Option::is_none));
}

#[test]
fn all_gather_is_seen_everywhere() {
    let gathered = LocalUniverse::run(3, |world| world.all_gather(&(world.rank() * 2)).unwrap());
    assert_eq!(gathered, vec![vec![0, 2, 4]; 3]);
}

#[test]
fn scatter_hands_out_one_value_per_rank() {
    let shares = LocalUniverse::run(3, |world| {
        let root = world.process_at_rank(0);
        if world.rank() == 0 {
            root.scatter_root(&[10u8, 11, 12]).unwrap()
        } else {
            root.scatter::<u8>().unwrap()
        }
    });
    assert_eq!(shares, vec![10, 11, 12]);
}

#[test]
fn scatter_needs_one_value_per_rank() {
    let comms = LocalUniverse::new(2).communicators();
    let err = comms[0]
        .process_at_rank(0)
        .scatter_root(&[1u8])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport {
            kind: ErrorKind::Count,
            ..
        }
    ));
}

#[test]
fn root_only_calls_fail_elsewhere() {
    let comms = LocalUniverse::new(2).communicators();
    let err = comms[1]
        .process_at_rank(0)
        .gather_root(&1u8)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport {
            kind: ErrorKind::Root,
            ..
        }
    ));
}

#[test]
fn reduce_combines_in_rank_order() {
    for size in [1, 2, 5, 8] {
        let reduced = LocalUniverse::run(size, |world| {
            world
                .process_at_rank(0)
                .reduce(world.rank().to_string(), |a, b| a + &b)
                .unwrap()
        });
        let expected: String = (0..size).map(|rank| rank.to_string()).collect();
        assert_eq!(reduced[0].as_deref(), Some(expected.as_str()));
        assert!(reduced[1..].iter().all(Option::is_none));
    }
}

#[test]
fn all_reduce_returns_the_result_everywhere() {
    let sums = LocalUniverse::run(7, |world| world.all_reduce(world.rank() + 1, |a, b| a + b).unwrap());
    assert_eq!(sums, vec![28; 7]);
}
