#![cfg(feature = "derive")]

use rankwire::traits::*;
use rankwire::transport::local::LocalUniverse;

const CONSTANT: usize = 7;

/// Arrays sized by a constant expression are laid out element by element.
#[test]
fn derive_equivalence() {
    #[derive(Equivalence)]
    struct ArrayWrapper {
        field: [f32; CONSTANT],
    }

    assert_eq!(<ArrayWrapper as Equivalence>::SIZE, 4 * CONSTANT);
    let mut bytes = vec![0u8; <ArrayWrapper as Equivalence>::SIZE];
    ArrayWrapper { field: [1.5; CONSTANT] }.encode(&mut bytes);
    let decoded = ArrayWrapper::decode(&bytes).unwrap();
    assert_eq!(decoded.field, [1.5; CONSTANT]);
}

#[derive(Equivalence, Debug, Default, Clone, Copy, PartialEq)]
struct Particle {
    id: u32,
    alive: bool,
    position: [f64; 3],
    charge: (i8, i16),
}

#[derive(Equivalence, Debug, PartialEq)]
struct Pair<T>(T, T);

#[derive(Equivalence, Debug, PartialEq)]
struct Marker;

#[test]
fn fields_are_packed_in_order() {
    assert_eq!(<Particle as Equivalence>::SIZE, 4 + 1 + 24 + 3);
    assert_eq!(<Pair<u16> as Equivalence>::SIZE, 4);
    assert_eq!(<Marker as Equivalence>::SIZE, 0);

    let mut bytes = [0u8; 4];
    Pair(1u16, 2u16).encode(&mut bytes);
    assert_eq!(bytes, [1, 0, 2, 0]);
    assert_eq!(Pair::<u16>::decode(&bytes).unwrap(), Pair(1, 2));
    assert_eq!(Marker::decode(&[]).unwrap(), Marker);
}

#[test]
fn derived_structs_travel_between_ranks() {
    let received = LocalUniverse::run(2, |world| {
        let particles = [
            Particle {
                id: 7,
                alive: true,
                position: [1.0, -2.0, 0.5],
                charge: (-1, 300),
            },
            Particle::default(),
        ];
        match world.rank() {
            0 => {
                world.process_at_rank(1).send(&particles[..]).unwrap();
                None
            }
            _ => {
                let mut buf = [Particle::default(); 2];
                let status = world.process_at_rank(0).receive_into(&mut buf[..]).unwrap();
                assert_eq!(status.count(), 2);
                assert_eq!(buf, particles);
                Some(buf[0])
            }
        }
    });
    assert_eq!(received[1].map(|particle| particle.id), Some(7));
}
