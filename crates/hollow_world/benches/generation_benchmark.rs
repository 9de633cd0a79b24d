//! Generation throughput: chunks per second straight from the noise
//! pipeline. Streaming feels sluggish below ~100 chunks/s.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use hollow_shared::math::IVec3;
use hollow_world::block_type::default_registry;
use hollow_world::generator::{Generator, GeneratorConfig};

fn bench_generate_chunk(c: &mut Criterion) {
    let types = default_registry();
    let generator = Generator::new(GeneratorConfig { seed: 42, ..GeneratorConfig::default() }, &types);

    c.bench_function("generate_chunk", |b| {
        let mut n = 0i32;
        b.iter(|| {
            n = n.wrapping_add(1);
            black_box(generator.generate(IVec3::new(n, 0, -n)))
        });
    });
}

fn bench_noise_field(c: &mut Criterion) {
    use hollow_world::noise::{SimplexNoise, WorldSeed};
    let noise = SimplexNoise::new(WorldSeed::new(42));
    c.bench_function("simplex_4096_samples", |b| {
        b.iter(|| {
            let mut total = 0.0f32;
            for i in 0..4096 {
                let f = i as f32 * 0.17;
                total += noise.sample(hollow_shared::math::Vec3::new(f, -f, f * 0.5));
            }
            black_box(total)
        });
    });
}

criterion_group!(benches, bench_generate_chunk, bench_noise_field);
criterion_main!(benches);
