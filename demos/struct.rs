#![deny(warnings)]

use log::{info, LevelFilter};
use rankwire::traits::*;
use rankwire::transport::local::LocalUniverse;
use simple_logger::SimpleLogger;

#[derive(Equivalence, Default, PartialEq, Debug, Clone, Copy)]
struct MyDataRust {
    b: bool,
    f: f64,
    i: u16,
}

#[derive(Equivalence, Default, PartialEq, Debug, Clone, Copy)]
struct Parent {
    b: bool,
    child: Child,
}

#[derive(Equivalence, Default, PartialEq, Debug, Clone, Copy)]
struct Child(f64, u16);

fn main() {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    LocalUniverse::run(2, |world| {
        let other = world.process_at_rank(1 - world.rank());
        if world.rank() == 0 {
            let data = MyDataRust {
                b: true,
                f: 3.4,
                i: 7,
            };
            other.send(&data).unwrap();
            other.send_vec(&[data; 3]).unwrap();
        } else {
            // Both layouts are one bool, one f64 and one u16 back to back.
            let (parent, status) = other.receive::<Parent>().unwrap();
            assert_eq!(
                parent,
                Parent {
                    b: true,
                    child: Child(3.4, 7),
                }
            );
            info!("received {:?} ({} bytes)", parent, status.byte_len());

            let (many, status) = other.receive_vec::<MyDataRust>().unwrap();
            assert_eq!(status.count(), 3);
            assert!(many.iter().all(|data| data.i == 7));
        }
    });
}
