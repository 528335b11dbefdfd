use criterion::{BenchmarkId, Criterion};
use mpc_engine::shamir::SecretSharingEngine;
use num_bigint::BigUint;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

pub fn shamir_benchmark(c: &mut Criterion) {
    let mut g = c.benchmark_group("shamir");
    let secret = BigUint::from(0xdead_beef_u64);
    for (n, t) in [(3, 2), (10, 6), (50, 26)] {
        let mut engine = SecretSharingEngine::new(ChaCha20Rng::seed_from_u64(42));
        g.bench_function(BenchmarkId::new("share", format!("{t}-of-{n}")), |b| {
            b.iter(|| engine.share(&secret, n, t).expect("valid threshold"))
        });

        let sharing = engine.share(&secret, n, t).expect("valid threshold");
        let shares = &sharing.shares[..t as usize];
        g.bench_function(BenchmarkId::new("reconstruct", format!("{t}-of-{n}")), |b| {
            b.iter(|| sharing.params.reconstruct(shares).expect("enough shares"))
        });
    }
}
