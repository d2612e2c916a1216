#![deny(warnings)]

use std::collections::BTreeMap;

use log::{info, LevelFilter};
use rankwire::traits::*;
use rankwire::transport::local::LocalUniverse;
use simple_logger::SimpleLogger;

fn main() {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    LocalUniverse::run(5, |world| {
        let root_rank = 2;
        let root_process = world.process_at_rank(root_rank);

        let mut x = if world.rank() == root_rank {
            2u64.pow(10)
        } else {
            0
        };
        root_process.broadcast_into(&mut x).unwrap();
        info!("Rank {} received value: {}.", world.rank(), x);
        assert_eq!(x, 1024);

        let mut table = BTreeMap::new();
        if world.rank() == root_rank {
            table.insert("alpha".to_string(), vec![1.0f64, 2.0]);
            table.insert("beta".to_string(), vec![]);
        }
        root_process.broadcast(&mut table).unwrap();
        assert_eq!(table.len(), 2);

        let mut shared = Vec::new();
        if world.rank() == root_rank {
            shared = (0..world.size()).collect::<Vec<_>>();
        }
        let mut request = root_process.immediate_broadcast(&mut shared).unwrap();
        request.wait().unwrap();
        drop(request);
        info!("Rank {} received {:?}.", world.rank(), shared);
        assert_eq!(shared.len(), world.size() as usize);
    });
}
