//! Performance benchmarks for the DSP module
//!
//! Run with: cargo bench -p resona_dsp

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use resona_dsp::{
    impulse_seed, AudioProcessor, ConvolutionReverb, ImpulseResponse, LowShelf, PitchShifter,
    ProcessContext, Reverb,
};

const SAMPLE_RATE: f32 = 48000.0;

fn test_buffer(frames: usize) -> Vec<f32> {
    (0..frames * 2).map(|i| (i as f32 * 0.001).sin()).collect()
}

fn benchmark_live_stages(c: &mut Criterion) {
    let mut group = c.benchmark_group("live_stages");

    // Common buffer sizes in audio applications
    for size in [64, 256, 512, 1024] {
        let context = ProcessContext::new(SAMPLE_RATE, 2, size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("shelf_{}_frames", size), |b| {
            let mut shelf = LowShelf::with_gain(SAMPLE_RATE, 6.0).unwrap();
            let mut buffer = test_buffer(size);
            b.iter(|| shelf.process(black_box(&mut buffer), &context));
        });

        group.bench_function(format!("pitch_{}_frames", size), |b| {
            let mut pitch = PitchShifter::new(SAMPLE_RATE).unwrap();
            pitch.set_semitones(5.0);
            let mut buffer = test_buffer(size);
            b.iter(|| pitch.process(black_box(&mut buffer), &context));
        });

        group.bench_function(format!("reverb_{}_frames", size), |b| {
            let mut reverb = Reverb::new(SAMPLE_RATE).unwrap();
            reverb.set_params(0.8, 3000.0, 0.4);
            let mut buffer = test_buffer(size);
            b.iter(|| reverb.process(black_box(&mut buffer), &context));
        });
    }

    group.finish();
}

fn benchmark_shelf_coefficients(c: &mut Criterion) {
    c.bench_function("shelf_coefficients", |b| {
        let mut gain = -12.0_f32;
        b.iter(|| {
            // Simulate dragging the bass slider
            black_box(LowShelf::coefficients(SAMPLE_RATE, gain).unwrap());
            gain = if gain >= 12.0 { -12.0 } else { gain + 0.5 };
        });
    });
}

fn benchmark_convolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("convolution");
    group.sample_size(10);

    let frames = 44100;
    let context = ProcessContext::new(44100.0, 2, frames);
    group.throughput(Throughput::Elements(frames as u64));

    group.bench_function("one_second_medium_room", |b| {
        let ir = ImpulseResponse::generate(44100.0, 0.5, 3000.0, impulse_seed(0.5, 3000.0)).unwrap();
        b.iter(|| {
            let mut conv = ConvolutionReverb::new(&ir, 0.4).unwrap();
            let mut buffer = test_buffer(frames);
            conv.process(black_box(&mut buffer), &context);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_live_stages,
    benchmark_shelf_coefficients,
    benchmark_convolution
);

criterion_main!(benches);
