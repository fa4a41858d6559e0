//! Point Source Example
//! This example demonstrates how to use the `visgrid` library to make a dirty image of a simulated
//! point source, and then predict its visibilities back from a model image.
//! It uses `marlu` for the coordinate types, and logs through `env_logger`.
//!
//! ```bash
//! RUST_LOG=info cargo run --example point_source -- 128 0.5
//! ```
//!
//! The arguments are the image size in pixels and the cell size in arcminutes.

use std::{f64::consts::TAU, sync::Arc};

use log::info;
use visgrid::{
    constants::VEL_C,
    ndarray::{Array4, Axis},
    BoxFunction, Complex, DirectionAxis, GridMode, GridderConfigBuilder, ImageAxes, RADec,
    Stokes, VisChunk, VisGridder, UVW,
};

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    let size: usize = args.get(1).map_or(128, |arg| arg.parse().expect("bad image size"));
    let cell_arcmin: f64 = args.get(2).map_or(0.5, |arg| arg.parse().expect("bad cell size"));

    let increment = (cell_arcmin / 60.).to_radians();
    let phase_centre = RADec::from_degrees(60., -26.7);
    let axes = ImageAxes::new(DirectionAxis {
        tangent: phase_centre,
        ref_pixel: [(size / 2) as f64, (size / 2) as f64],
        increment: [-increment, increment],
    });

    // a 1 Jy source, 7 pixels east and 4 north of the centre
    let source_pixel = [size / 2 + 7, size / 2 + 4];
    let l = -7. * increment;
    let m = 4. * increment;
    let flux = 1.;

    let freqs = vec![150e6, 151e6];
    let max_uv = 0.4 / increment * VEL_C / freqs[1];
    let n_row = 2000;
    let uvw: Vec<UVW> = (0..n_row)
        .map(|row| {
            let frac = row as f64 / n_row as f64;
            let angle = TAU * 37. * frac;
            UVW {
                u: max_uv * frac * angle.cos(),
                v: max_uv * frac * angle.sin(),
                w: 0.,
            }
        })
        .collect();
    let mut chunk = VisChunk::new(uvw, freqs, vec![Stokes::I], phase_centre);
    for ((row, chan, _), vis) in chunk.vis.indexed_iter_mut() {
        let scale = chunk.freqs[chan] / VEL_C;
        let UVW { u, v, .. } = chunk.uvw[row];
        let phase = -TAU * scale * (u * l + v * m);
        *vis = Complex::from_polar(flux, phase as f32);
    }

    let config = GridderConfigBuilder::default()
        .padding(1.5)
        .build()
        .expect("bad gridder config");
    let mut gridder =
        VisGridder::new(config, Arc::new(BoxFunction)).expect("unable to create gridder");

    let shape = [size, size, 1, 1];
    gridder
        .initialise_grid(&axes, shape, GridMode::Image)
        .expect("unable to initialise grid");
    gridder.grid(&chunk).expect("unable to grid");
    let mut image = Array4::<f64>::zeros((size, size, 1, 1));
    let mut weights = Array4::<f64>::zeros((size, size, 1, 1));
    gridder.finalise_weights(weights.view_mut()).expect("unable to get weights");
    gridder.finalise_grid(image.view_mut()).expect("unable to finalise grid");

    let sum_of_weights = weights[[0, 0, 0, 0]];
    let (peak_pixel, peak) = image
        .index_axis(Axis(3), 0)
        .index_axis(Axis(2), 0)
        .indexed_iter()
        .fold(((0, 0), f64::MIN), |best, (idx, &value)| {
            if value > best.1 {
                (idx, value)
            } else {
                best
            }
        });
    info!(
        "dirty image peak {:.4} Jy at {:?}, source at {:?}",
        peak / sum_of_weights,
        peak_pixel,
        source_pixel
    );

    // predict the source back from a model image
    let mut model = Array4::<f64>::zeros((size, size, 1, 1));
    model[[source_pixel[0], source_pixel[1], 0, 0]] = flux as f64;
    let observed = chunk.vis.clone();
    chunk.vis.fill(Complex::new(0., 0.));
    gridder
        .initialise_degrid(&axes, model.view())
        .expect("unable to initialise degrid");
    gridder.degrid(&mut chunk).expect("unable to degrid");
    gridder.finalise_degrid().expect("unable to finalise degrid");

    // the prediction is scaled by the number of pixels in the padded grid
    let norm = chunk
        .vis
        .iter()
        .zip(observed.iter())
        .map(|(predicted, observed)| predicted.norm() / observed.norm())
        .sum::<f32>()
        / observed.len() as f32;
    info!("mean predicted / observed amplitude {:.4}", norm);
    println!(
        "peak {:.4} at {:?} (source {:?}), prediction ratio {:.4}",
        peak / sum_of_weights,
        peak_pixel,
        source_pixel,
        norm
    );
}
