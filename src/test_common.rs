//! Helpers shared by unit tests.

use rand::{rngs::StdRng, Rng};

use crate::{accessor::VisChunk, pol::Stokes, Complex, RADec, UVW};

/// A Stokes I chunk of `n_row` baselines with |u|, |v| < `max_uv` metres,
/// w = 0, and random visibilities and noise.
pub fn random_chunk(
    rng: &mut StdRng,
    n_row: usize,
    freqs: &[f64],
    max_uv: f64,
    phase_centre: RADec,
) -> VisChunk {
    let uvw = (0..n_row)
        .map(|_| UVW {
            u: rng.gen_range(-max_uv..max_uv),
            v: rng.gen_range(-max_uv..max_uv),
            w: 0.,
        })
        .collect();
    let mut chunk = VisChunk::new(uvw, freqs.to_vec(), vec![Stokes::I], phase_centre);
    for vis in chunk.vis.iter_mut() {
        *vis = Complex::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
    }
    for noise in chunk.noise.iter_mut() {
        let sigma: f32 = rng.gen_range(0.5..1.5);
        *noise = Complex::new(sigma, sigma);
    }
    chunk
}
