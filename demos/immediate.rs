#![deny(warnings)]
#![allow(clippy::float_cmp)]

use log::{info, LevelFilter};
use rankwire::request::{self, CancelGuard, WaitGuard};
use rankwire::traits::*;
use rankwire::transport::local::LocalUniverse;
use simple_logger::SimpleLogger;

fn main() {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    LocalUniverse::run(2, |world| {
        let other = world.process_at_rank(1 - world.rank());
        let x = std::f32::consts::PI;
        let mut y: f32 = 0.0;

        {
            let mut sreq = other.immediate_send(&x).unwrap();
            let mut rreq = other.immediate_receive_into(&mut y).unwrap();
            rreq.wait().unwrap();
            while sreq.test().unwrap().is_none() {}
        }
        assert_eq!(x, y);

        y = 0.0;
        {
            let _rreq = WaitGuard::from(other.immediate_receive_into(&mut y).unwrap());
            let _sreq = WaitGuard::from(other.immediate_send(&x).unwrap());
        }
        assert_eq!(x, y);

        // Vectors and serialized values of unknown length.
        let mut lengths: Vec<u64> = Vec::new();
        let mut greeting = String::new();
        {
            let mut requests = vec![
                other.immediate_receive_vec_with_tag(&mut lengths, 1).unwrap(),
                other.immediate_receive_serialized_with_tag(&mut greeting, 2).unwrap(),
                other
                    .immediate_send_vec_with_tag(&[3u64, 1, 4, 1, 5], 1)
                    .unwrap(),
                other
                    .immediate_send_serialized_with_tag(&format!("hello from {}", world.rank()), 2)
                    .unwrap(),
            ];
            let statuses = request::wait_all(&mut requests).unwrap();
            info!("rank {} received {:?}", world.rank(), &statuses[..2]);
        }
        assert_eq!(lengths, vec![3, 1, 4, 1, 5]);
        assert_eq!(greeting, format!("hello from {}", other.rank()));

        // Nobody sends on tag 9; the guard cancels the receive on scope exit.
        let mut unused = 0i32;
        {
            let rreq = other.immediate_receive_into_with_tag(&mut unused, 9).unwrap();
            let _rreq = CancelGuard::from(rreq);
        }
        assert_eq!(unused, 0);

        world.barrier().unwrap();
        assert!(world.any_process().immediate_probe().unwrap().is_none());
        assert!(world.any_process().immediate_matched_probe().unwrap().is_none());
    });
}
