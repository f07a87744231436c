//! Benchmark tests for the Layer III encoder
//!
//! These benchmarks measure the quantization loop on a single granule and
//! the whole encoding pipeline for each iteration strategy.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use layer3_rs::distortion::{calc_xmin, MaskingParams};
use layer3_rs::iteration::LoopState;
use layer3_rs::types::{GranuleInfo, PsyRatio, XrPow, GRANULE_SIZE, SBMAX_L, SFBMAX};
use layer3_rs::{encode_pcm_to_mp3, EncoderConfig, VbrMode};

fn noise_spectrum(amp: f32) -> [f32; GRANULE_SIZE] {
    let mut xr = [0.0; GRANULE_SIZE];
    let mut state = 0x1234_5678u32;
    for (i, x) in xr.iter_mut().enumerate() {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        let tilt = 1.0 / (1.0 + i as f32 / 64.0);
        *x = ((state >> 8) as f32 / (1u32 << 23) as f32 - 1.0) * amp * tilt;
    }
    xr
}

fn benchmark_config_resolve(c: &mut Criterion) {
    let config = EncoderConfig::new(44100, 2).bitrate(192).quality(2);

    c.bench_function("config_resolve", |b| {
        b.iter(|| {
            black_box(config.resolve()).unwrap();
        })
    });
}

fn benchmark_outer_loop(c: &mut Criterion) {
    let session = EncoderConfig::new(44100, 1).bitrate(128).quality(2).resolve().unwrap();
    let mut state = LoopState::new(&session);
    let mut ratio = PsyRatio::default();
    ratio.en.l = [1.0; SBMAX_L];
    ratio.thm.l = [1e-4; SBMAX_L];

    let mut template = GranuleInfo { xr: noise_spectrum(2000.0), ..GranuleInfo::default() };
    state.quantizer.init_outer_loop(&mut template, &state.ath);
    let mut xmin = [0.0f32; SFBMAX];
    calc_xmin(&state.ath, state.quantizer.factors(), &MaskingParams::default(), &ratio, &mut template, &mut xmin);

    c.bench_function("outer_loop_long_granule", |b| {
        b.iter(|| {
            let mut gi = template.clone();
            let mut xrpow = XrPow::default();
            state.quantizer.init_xrpow(&mut gi, &mut xrpow);
            let over = state.quantizer.outer_loop(&mut gi, black_box(&xmin), &mut xrpow, 0, black_box(1600));
            black_box((over, gi.part2_3_length));
        })
    });
}

fn benchmark_stream_encode(c: &mut Criterion) {
    let left = util::white_noise(44100, 0.3, 1);
    let right = util::sine(44100, 440.0, 44100, 0.5).unwrap();
    let pcm = util::interleave(&left, &right).unwrap();

    let configs = [
        ("encode_1s_cbr128", EncoderConfig::new(44100, 2).bitrate(128)),
        ("encode_1s_abr160", EncoderConfig::new(44100, 2).vbr(VbrMode::Abr).bitrate(160)),
        ("encode_1s_vbr_rh", EncoderConfig::new(44100, 2).vbr(VbrMode::Rh).vbr_quality(4.0)),
        ("encode_1s_vbr_mtrh", EncoderConfig::new(44100, 2).vbr(VbrMode::Mtrh).vbr_quality(4.0)),
    ];
    let mut group = c.benchmark_group("stream");
    group.sample_size(10);
    for (name, config) in configs {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mp3 = encode_pcm_to_mp3(config.clone(), black_box(&pcm)).unwrap();
                black_box(mp3.len());
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_config_resolve, benchmark_outer_loop, benchmark_stream_encode);
criterion_main!(benches);
