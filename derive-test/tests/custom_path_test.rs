use wire::traits::Equivalence;

/// The `#[rankwire(crate)]` attribute points the derive at a renamed dependency.
/// This only compiles if the generated impl uses `::wire` to find the crate.
#[test]
fn derive_custom_path() {
    #[derive(Equivalence)]
    #[rankwire(crate = "::wire")]
    struct Particle {
        position: [f64; 3],
    }

    assert_eq!(<Particle as Equivalence>::SIZE, 24);
}
