//! Offline render benchmarks
//!
//! Run with: cargo bench -p resona_core

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use resona_core::{EffectSettings, RenderJob, SourceBuffer};

fn source(seconds: usize) -> Arc<SourceBuffer> {
    let frames = seconds * 44100;
    let samples: Vec<f32> = (0..frames * 2).map(|i| (i as f32 * 0.001).sin() * 0.5).collect();
    Arc::new(SourceBuffer::from_interleaved(samples, 2, 44100).unwrap())
}

fn job(source: Arc<SourceBuffer>, effects: EffectSettings, rate: f64) -> RenderJob {
    RenderJob {
        source,
        region: None,
        effects,
        rate,
        volume: 1.0,
        sample_rate: 44100,
    }
}

fn benchmark_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");
    group.sample_size(10);

    let src = source(5);
    group.throughput(Throughput::Elements(5 * 44100));

    group.bench_function("dry_5s", |b| {
        let job = job(src.clone(), EffectSettings::default(), 1.0);
        b.iter(|| black_box(job.run().unwrap()));
    });

    group.bench_function("shelf_pitch_5s", |b| {
        let effects = EffectSettings {
            bass_gain: 6.0,
            pitch: 3.0,
            ..Default::default()
        };
        let job = job(src.clone(), effects, 1.0);
        b.iter(|| black_box(job.run().unwrap()));
    });

    group.bench_function("convolution_5s", |b| {
        let effects = EffectSettings {
            reverb_wet: 0.5,
            room_size: 0.85,
            ..Default::default()
        };
        let job = job(src.clone(), effects, 0.85);
        b.iter(|| black_box(job.run().unwrap()));
    });

    group.finish();
}

criterion_group!(benches, benchmark_render);
criterion_main!(benches);
