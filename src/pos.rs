// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Coordinate helpers for moving baselines and images between phase centres.
//!
//! Everything here is a pure function, so it can be shared freely between
//! gridders on different threads.

use crate::{RADec, UVW};

type Vec3 = [f64; 3];

fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// The (u, v, w) unit vectors of the frame with phase centre `pc`, in
/// equatorial cartesian coordinates.
fn uvw_frame(pc: RADec) -> [Vec3; 3] {
    let (s_ra, c_ra) = pc.ra.sin_cos();
    let (s_dec, c_dec) = pc.dec.sin_cos();
    [
        [-s_ra, c_ra, 0.],
        [-s_dec * c_ra, -s_dec * s_ra, c_dec],
        [c_dec * c_ra, c_dec * s_ra, s_dec],
    ]
}

/// Re-express a baseline measured towards `from` in the frame of `to`.
pub fn rotate_uvw(uvw: UVW, from: RADec, to: RADec) -> UVW {
    let [fu, fv, fw] = uvw_frame(from);
    let xyz = [
        uvw.u * fu[0] + uvw.v * fv[0] + uvw.w * fw[0],
        uvw.u * fu[1] + uvw.v * fv[1] + uvw.w * fw[1],
        uvw.u * fu[2] + uvw.v * fv[2] + uvw.w * fw[2],
    ];
    let [tu, tv, tw] = uvw_frame(to);
    UVW {
        u: dot(xyz, tu),
        v: dot(xyz, tv),
        w: dot(xyz, tw),
    }
}

/// The geometric delay [metres] of a baseline `uvw`, measured relative to
/// `tangent`, towards `image_centre`.
///
/// Multiplying by `2πf/c` gives the phase which moves the image centre onto
/// the tangent point.
pub fn uvw_rotation_delay(uvw: UVW, tangent: RADec, image_centre: RADec) -> f64 {
    let lmn = image_centre.to_lmn(tangent);
    uvw.u * lmn.l + uvw.v * lmn.m + uvw.w * (lmn.n - 1.)
}
