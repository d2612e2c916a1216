#![deny(warnings)]
#![allow(clippy::float_cmp)]

use std::{thread, time};

use log::{info, LevelFilter};
use rankwire::environment::{Config, DynamicProtocol};
use rankwire::request::RequestCollection;
use rankwire::traits::*;
use rankwire::transport::local::LocalUniverse;
use simple_logger::SimpleLogger;

fn main() {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    let config = Config::default()
        .with_dynamic_protocol(DynamicProtocol::SizePrefix)
        .with_eager_limit(0);
    LocalUniverse::run_with(config, 4, |world| {
        let x = std::f32::consts::PI;

        if world.rank() == 0 {
            let mut requests = RequestCollection::with_capacity(world.size() as usize - 1);
            for i in 1..world.size() {
                let payload = vec![x; i as usize];
                requests.push(world.process_at_rank(i).immediate_send_vec_with_tag(&payload, 0).unwrap());
            }

            info!("World size {}", world.size());
            while let Some((index, _status)) = requests.wait_any().unwrap() {
                info!("Request with index {} completed", index);
            }
            info!("All requests completed");
        } else {
            let secs = time::Duration::from_millis(100 * world.rank() as u64);
            thread::sleep(secs);

            let (y, status) = world.any_process().receive_vec::<f32>().unwrap();
            assert_eq!(y, vec![x; world.rank() as usize]);
            info!("Process {} received {} values", world.rank(), status.count());
        }
    });
}
