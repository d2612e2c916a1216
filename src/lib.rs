#![warn(missing_docs)]
#![warn(missing_copy_implementations)]
#![warn(trivial_casts)]
#![warn(trivial_numeric_casts)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_qualifications)]

//! Non-blocking message passing between ranks
//!
//! `rankwire` moves typed values between the ranks of a group over a pluggable byte
//! [`Transport`](transport/trait.Transport.html). Every non-blocking operation yields a
//! [`Request`](request/struct.Request.html) that is completed with `wait` or `test`, one at a
//! time or together with the combinators in [`request`](request/index.html).
//!
//! Values whose size the receiver cannot know in advance (vectors of unknown length, serialized
//! values) are transferred with one of two protocols: the receiver probes for the message and
//! sizes its buffer from the probe, or the sender announces the length in a separate message
//! first. The choice is part of the communicator's
//! [`Config`](environment/struct.Config.html).
//!
//! # Usage
//!
//! Add the `rankwire` crate as a dependency in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! rankwire = "0.1.0"
//! ```
//!
//! Then use it in your program like this:
//!
//! ```
//! use rankwire::traits::*;
//! use rankwire::transport::local::LocalUniverse;
//!
//! LocalUniverse::run(2, |world| {
//!     match world.rank() {
//!         0 => {
//!             let msg = vec![4.0f64, 8.0, 15.0];
//!             world.process_at_rank(1).send_vec(&msg).unwrap();
//!         }
//!         1 => {
//!             let (msg, status) = world.process_at_rank(0).receive_vec::<f64>().unwrap();
//!             assert_eq!(msg, vec![4.0, 8.0, 15.0]);
//!             assert_eq!(status.count(), 3);
//!         }
//!         _ => unreachable!(),
//!     }
//! });
//! ```
//!
//! # Features
//!
//! - **Point to point communication**: blocking and non-blocking send and receive of fixed-size
//!   data, vectors of unknown length and serialized values; probe; matched probe and receive;
//!   send-receive; the null process.
//! - **Requests**: wait, test, cancel; `wait_any`, `test_any`, `wait_all`, `wait_some`,
//!   `test_some` over requests of any protocol.
//! - **Collective communication**: barrier, broadcast (blocking and non-blocking), gather,
//!   all-gather, scatter, reduce and all-reduce with user closures.
//! - **Datatypes**: `Equivalence` for primitives, arrays, tuples and (with the `derive` feature)
//!   user structs.
//!
//! The sub-modules contain a more detailed description of the individual operations.

pub mod archive;
pub mod collective;
pub mod datatype;
pub mod environment;
pub mod error;
pub mod point_to_point;
pub mod request;
pub mod topology;
pub mod transport;

pub use crate::error::{Error, ErrorKind, Result};

/// Encodes number of values in multi-value messages.
pub type Count = i32;
/// Can be used to tag messages on the sender side and match on the receiver side.
pub type Tag = i32;

/// Re-exports all traits.
pub mod traits {
    pub use crate::collective::traits::*;
    pub use crate::datatype::traits::*;
    pub use crate::point_to_point::traits::*;
    pub use crate::request::traits::*;
    pub use crate::topology::traits::*;

    #[cfg(feature = "derive")]
    pub use rankwire_derive::Equivalence;
}
