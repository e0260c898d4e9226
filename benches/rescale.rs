use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::sync::Arc;
use toy_he_graph::kernel::rescale_ciphertexts;
use toy_he_graph::{
    CiphertextHandle, CkksContext, CkksEvaluator, CkksParams, Evaluator, KeySet, Packing,
};

fn bench_rescale_kernel(c: &mut Criterion) {
    let mut group = c.benchmark_group("rescale_kernel");

    let context = Arc::new(CkksContext::new(CkksParams::toy()).expect("context"));
    let mut rng = ChaCha20Rng::seed_from_u64(123);
    let keys = KeySet::generate(&context, &mut rng).expect("keys");
    let evaluator = CkksEvaluator::new(Arc::clone(&context), keys.public, keys.relin, 7)
        .expect("evaluator");
    let scale = context.default_scale();

    for &size in &[16, 64, 256] {
        // Products sit at scale^2, which is what the kernel sees after a
        // multiply.
        let handles: Vec<CiphertextHandle> = (0..size)
            .map(|i| {
                let a = evaluator
                    .encrypt(&[i as f64 * 0.01], Packing::Real, scale, 3)
                    .expect("encrypt");
                let prod = evaluator.multiply(&a, &a).expect("multiply");
                CiphertextHandle::encrypted(prod, Packing::Real)
            })
            .collect();
        let zeros: Vec<CiphertextHandle> = (0..size)
            .map(|_| CiphertextHandle::zero(Packing::Real, scale * scale, 3))
            .collect();

        group.bench_with_input(BenchmarkId::new("encrypted", size), &handles, |b, handles| {
            let mut out = handles.clone();
            b.iter(|| rescale_ciphertexts(black_box(handles), &mut out, &evaluator).expect("rescale"));
        });
        group.bench_with_input(BenchmarkId::new("zero", size), &zeros, |b, zeros| {
            let mut out = zeros.clone();
            b.iter(|| rescale_ciphertexts(black_box(zeros), &mut out, &evaluator).expect("rescale"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rescale_kernel);
criterion_main!(benches);
