use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};
use visgrid::{
    constants::VEL_C,
    ndarray::{Array2, Array4},
    Complex, DirectionAxis, GridMode, GridderConfig, GridderConfigBuilder, ImageAxes, RADec,
    Stokes, TabulatedFunction, VisChunk, VisGridder, UVW,
};

const NUM_ROWS: usize = 10_000;
const NUM_CHANS: usize = 4;
const IMAGE_SIZE: usize = 256;
const SUPPORT: usize = 7;
const OVERSAMPLE: usize = 4;
const FREQ_HZ: f64 = 150e6;

fn get_phase_centre() -> RADec {
    RADec::from_degrees(0., -27.)
}

fn get_increment() -> f64 {
    (30. / 3600_f64).to_radians()
}

fn get_axes() -> ImageAxes {
    let increment = get_increment();
    ImageAxes::new(DirectionAxis {
        tangent: get_phase_centre(),
        ref_pixel: [(IMAGE_SIZE / 2) as f64, (IMAGE_SIZE / 2) as f64],
        increment: [-increment, increment],
    })
}

fn get_config() -> GridderConfig {
    GridderConfigBuilder::default()
        .oversample(OVERSAMPLE as u32)
        .padding(1.2)
        .build()
        .unwrap()
}

/// A gaussian, sampled at each oversampled offset.
fn get_kernel() -> TabulatedFunction {
    let centre = (SUPPORT / 2) as f64;
    let planes = (0..OVERSAMPLE * OVERSAMPLE)
        .map(|idx| {
            let frac_u = (idx % OVERSAMPLE) as f64 / OVERSAMPLE as f64;
            let frac_v = (idx / OVERSAMPLE) as f64 / OVERSAMPLE as f64;
            Array2::from_shape_fn((SUPPORT, SUPPORT), |(ix, iy)| {
                let du = ix as f64 - centre + frac_u;
                let dv = iy as f64 - centre + frac_v;
                Complex::new((-(du * du + dv * dv) / 2.).exp() as f32, 0.)
            })
        })
        .collect();
    TabulatedFunction::new("gauss", OVERSAMPLE, planes).unwrap()
}

fn get_chunk(rng: &mut StdRng, n_row: usize) -> VisChunk {
    // well inside the edge of the grid at the highest frequency
    let max_freq_hz = FREQ_HZ + 1e6 * NUM_CHANS as f64;
    let max_uv = 0.4 / get_increment() * VEL_C / max_freq_hz;
    let uvw = (0..n_row)
        .map(|_| UVW {
            u: rng.gen_range(-max_uv..max_uv),
            v: rng.gen_range(-max_uv..max_uv),
            w: 0.,
        })
        .collect();
    let freqs = (0..NUM_CHANS).map(|c| FREQ_HZ + 1e6 * c as f64).collect();
    let mut chunk = VisChunk::new(uvw, freqs, vec![Stokes::I], get_phase_centre());
    for vis in chunk.vis.iter_mut() {
        *vis = Complex::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
    }
    chunk
}

fn bench_grid(crt: &mut Criterion) {
    let chunk = get_chunk(&mut StdRng::seed_from_u64(7), NUM_ROWS);
    let axes = get_axes();
    let mut gridder = VisGridder::new(get_config(), Arc::new(get_kernel())).unwrap();
    gridder
        .initialise_grid(&axes, [IMAGE_SIZE, IMAGE_SIZE, 1, 1], GridMode::Image)
        .unwrap();
    crt.bench_function(
        format!("grid - {} rows x {} chans", NUM_ROWS, NUM_CHANS).as_str(),
        |bch| {
            bch.iter(|| {
                gridder.grid(black_box(&chunk)).unwrap();
            })
        },
    );
}

fn bench_grid_par(crt: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(11);
    let chunks: Vec<VisChunk> = (0..8).map(|_| get_chunk(&mut rng, NUM_ROWS / 8)).collect();
    let axes = get_axes();
    let mut gridder = VisGridder::new(get_config(), Arc::new(get_kernel())).unwrap();
    gridder
        .initialise_grid(&axes, [IMAGE_SIZE, IMAGE_SIZE, 1, 1], GridMode::Image)
        .unwrap();
    crt.bench_function(
        format!("grid_par - 8 chunks of {} rows", NUM_ROWS / 8).as_str(),
        |bch| {
            bch.iter(|| {
                gridder.grid_par(black_box(chunks.as_slice())).unwrap();
            })
        },
    );
}

fn bench_degrid(crt: &mut Criterion) {
    let mut chunk = get_chunk(&mut StdRng::seed_from_u64(13), NUM_ROWS);
    let axes = get_axes();
    let mut model = Array4::<f64>::zeros((IMAGE_SIZE, IMAGE_SIZE, 1, 1));
    model[[IMAGE_SIZE / 2 + 5, IMAGE_SIZE / 2 - 3, 0, 0]] = 1.;
    let mut gridder = VisGridder::new(get_config(), Arc::new(get_kernel())).unwrap();
    gridder.initialise_degrid(&axes, model.view()).unwrap();
    crt.bench_function(
        format!("degrid - {} rows x {} chans", NUM_ROWS, NUM_CHANS).as_str(),
        |bch| {
            bch.iter(|| {
                gridder.degrid(black_box(&mut chunk)).unwrap();
            })
        },
    );
}

fn bench_finalise_grid(crt: &mut Criterion) {
    let chunk = get_chunk(&mut StdRng::seed_from_u64(17), NUM_ROWS / 10);
    let axes = get_axes();
    let mut gridder = VisGridder::new(get_config(), Arc::new(get_kernel())).unwrap();
    let mut image = Array4::<f64>::zeros((IMAGE_SIZE, IMAGE_SIZE, 1, 1));
    crt.bench_function(
        format!("initialise, grid, finalise - {}px", IMAGE_SIZE).as_str(),
        |bch| {
            bch.iter(|| {
                gridder
                    .initialise_grid(&axes, [IMAGE_SIZE, IMAGE_SIZE, 1, 1], GridMode::Image)
                    .unwrap();
                gridder.grid(&chunk).unwrap();
                gridder.finalise_grid(black_box(image.view_mut())).unwrap();
            })
        },
    );
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(20);
    targets =
        bench_grid,
        bench_grid_par,
        bench_degrid,
        bench_finalise_grid,
);
criterion_main!(benches);
