//! Conversion between polarisation frames.
//!
//! Every product is expressed in terms of the sky Stokes vector `(I, Q, U, V)`.
//! Feed products (linear `XX XY YX YY` and circular `RR RL LR LL`) are measured
//! in the frame of the feeds, which is rotated against the sky by the
//! parallactic angle χ:
//!
//! ```text
//! Q_feed =  cos 2χ Q + sin 2χ U
//! U_feed = -sin 2χ Q + cos 2χ U
//! ```
//!
//! A [`PolConverter`] holds the sparse matrix that takes a vector in one frame
//! to a vector in another. Its structure is fixed at construction; changing
//! the angle only refreshes the coefficient values.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use thiserror::Error;

use crate::Complex;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Errors building a [`PolConverter`].
pub enum PolConvError {
    /// One of the frames has no products.
    #[error("The {which} polarisation frame is empty")]
    EmptyFrame {
        /// "input" or "output"
        which: &'static str,
    },

    /// An output product needs an input which isn't there.
    #[error("Polarisation {target} can't be formed from {from:?}, {needed} is unavailable")]
    Unavailable {
        /// the output product
        target: Stokes,
        /// the input frame
        from: Vec<Stokes>,
        /// the product it needs
        needed: Stokes,
    },

    /// A product name couldn't be parsed.
    #[error("Unknown polarisation product {0}")]
    UnknownProduct(String),
}

/// A polarisation product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Stokes {
    I,
    Q,
    U,
    V,
    XX,
    XY,
    YX,
    YY,
    RR,
    RL,
    LR,
    LL,
}

/// The kind of receptor a feed product comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Linear,
    Circular,
}

const LINEAR: [Stokes; 4] = [Stokes::XX, Stokes::XY, Stokes::YX, Stokes::YY];
const CIRCULAR: [Stokes; 4] = [Stokes::RR, Stokes::RL, Stokes::LR, Stokes::LL];
const SKY: [Stokes; 4] = [Stokes::I, Stokes::Q, Stokes::U, Stokes::V];

/// Angle used to discover which coefficients can be non-zero once rotation
/// is enabled. Anything where neither cos 2χ nor sin 2χ vanish will do.
const GENERIC_ANGLE: f64 = 0.3;

/// Coefficients smaller than this are structural zeros.
const COEFF_EPSILON: f64 = 1e-6;

type Row4 = [Complex<f64>; 4];

impl Stokes {
    fn feed_kind(self) -> Option<FeedKind> {
        if LINEAR.contains(&self) {
            Some(FeedKind::Linear)
        } else if CIRCULAR.contains(&self) {
            Some(FeedKind::Circular)
        } else {
            None
        }
    }

    /// Whether this is a product of the feeds rather than of the sky.
    pub fn is_feed(self) -> bool {
        self.feed_kind().is_some()
    }

    /// The product as a combination of feed-frame `(I, Q, U, V)`.
    fn forward(self) -> Row4 {
        let (o, l, j) = (Complex::new(0., 0.), Complex::new(1., 0.), Complex::new(0., 1.));
        match self {
            Stokes::I => [l, o, o, o],
            Stokes::Q => [o, l, o, o],
            Stokes::U => [o, o, l, o],
            Stokes::V => [o, o, o, l],
            Stokes::XX => [l, l, o, o],
            Stokes::XY => [o, o, l, j],
            Stokes::YX => [o, o, l, -j],
            Stokes::YY => [l, -l, o, o],
            Stokes::RR => [l, o, o, l],
            Stokes::RL => [o, l, j, o],
            Stokes::LR => [o, l, -j, o],
            Stokes::LL => [l, o, o, -l],
        }
    }

    /// Contribution of this feed product to each feed-frame `(I, Q, U, V)`
    /// when the full set of its kind is available.
    fn inverse(self) -> Row4 {
        let (o, h, j) = (Complex::new(0., 0.), Complex::new(0.5, 0.), Complex::new(0., 0.5));
        match self {
            Stokes::XX => [h, h, o, o],
            Stokes::YY => [h, -h, o, o],
            Stokes::XY => [o, o, h, -j],
            Stokes::YX => [o, o, h, j],
            Stokes::RR => [h, o, o, h],
            Stokes::LL => [h, o, o, -h],
            Stokes::RL => [o, h, -j, o],
            Stokes::LR => [o, h, j, o],
            _ => [o, o, o, o],
        }
    }

    /// The product as a combination of sky `(I, Q, U, V)`, given
    /// `(cos 2χ, sin 2χ)`.
    fn sky_row(self, rot: (f64, f64)) -> Row4 {
        let row = self.forward();
        if !self.is_feed() {
            return row;
        }
        let (c, s) = rot;
        [row[0], row[1] * c - row[2] * s, row[1] * s + row[2] * c, row[3]]
    }

    /// Contribution of this feed product to each sky `(I, Q, U, V)`.
    fn sky_col(self, rot: (f64, f64)) -> Row4 {
        let col = self.inverse();
        let (c, s) = rot;
        [col[0], col[1] * c - col[2] * s, col[1] * s + col[2] * c, col[3]]
    }
}

impl Display for Stokes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for Stokes {
    type Err = PolConvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_uppercase().as_str() {
            "I" => Stokes::I,
            "Q" => Stokes::Q,
            "U" => Stokes::U,
            "V" => Stokes::V,
            "XX" => Stokes::XX,
            "XY" => Stokes::XY,
            "YX" => Stokes::YX,
            "YY" => Stokes::YY,
            "RR" => Stokes::RR,
            "RL" => Stokes::RL,
            "LR" => Stokes::LR,
            "LL" => Stokes::LL,
            _ => return Err(PolConvError::UnknownProduct(s.to_string())),
        })
    }
}

/// How a sky Stokes parameter is obtained from the input frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkySource {
    /// present in the input at this index
    Direct(usize),
    /// derived from feed products of this kind
    Feed(FeedKind),
    /// not available at all
    Missing,
}

fn rotation(chi: f64) -> (f64, f64) {
    ((2. * chi).cos(), (2. * chi).sin())
}

/// Converts vectors between two polarisation frames.
#[derive(Debug, Clone, PartialEq)]
pub struct PolConverter {
    from: Vec<Stokes>,
    to: Vec<Stokes>,
    rotating: bool,
    sources: [SkySource; 4],
    /// per output product, `(input index, coefficient)`. Empty for identity
    /// rows, which are marked in `identity`.
    rows: Vec<Vec<(usize, Complex<f32>)>>,
    identity: Vec<Option<usize>>,
}

impl PolConverter {
    /// Build a converter from frame `from` to frame `to`.
    ///
    /// With `strict`, an output product which needs an input that `from`
    /// lacks is an error; otherwise missing inputs are taken as zero.
    /// `par_angle` enables parallactic angle rotation of feed products,
    /// starting at the given angle [radians].
    ///
    /// # Errors
    ///
    /// [`PolConvError::EmptyFrame`] or [`PolConvError::Unavailable`].
    pub fn new(
        from: &[Stokes],
        to: &[Stokes],
        strict: bool,
        par_angle: Option<f64>,
    ) -> Result<Self, PolConvError> {
        if from.is_empty() {
            return Err(PolConvError::EmptyFrame { which: "input" });
        }
        if to.is_empty() {
            return Err(PolConvError::EmptyFrame { which: "output" });
        }
        let rotating = par_angle.is_some();
        let sources = Self::sky_sources(from);
        let struct_rot = rotation(if rotating { GENERIC_ANGLE } else { 0. });

        let mut rows = Vec::with_capacity(to.len());
        let mut identity = Vec::with_capacity(to.len());
        for &target in to {
            if let Some(idx) = from.iter().position(|&s| s == target) {
                rows.push(vec![]);
                identity.push(Some(idx));
                continue;
            }
            let t_row = target.sky_row(struct_rot);
            let mut row = vec![];
            for (k, coeff) in t_row.iter().enumerate() {
                if coeff.norm() < COEFF_EPSILON {
                    continue;
                }
                if strict {
                    Self::check_available(from, &sources, k, struct_rot, target)?;
                }
                for src in 0..from.len() {
                    if Self::sky_coeff(from, &sources, k, src, struct_rot).norm() >= COEFF_EPSILON
                        && !row.iter().any(|&(idx, _)| idx == src)
                    {
                        row.push((src, Complex::new(0., 0.)));
                    }
                }
            }
            row.sort_by_key(|&(idx, _)| idx);
            rows.push(row);
            identity.push(None);
        }

        let mut conv = Self {
            from: from.to_vec(),
            to: to.to_vec(),
            rotating,
            sources,
            rows,
            identity,
        };
        conv.refresh(rotation(par_angle.unwrap_or(0.)));
        Ok(conv)
    }

    fn sky_sources(from: &[Stokes]) -> [SkySource; 4] {
        let kind = if from.iter().any(|s| s.feed_kind() == Some(FeedKind::Linear)) {
            Some(FeedKind::Linear)
        } else if from.iter().any(|s| s.feed_kind() == Some(FeedKind::Circular)) {
            Some(FeedKind::Circular)
        } else {
            None
        };
        let mut sources = [SkySource::Missing; 4];
        for (k, sky) in SKY.iter().enumerate() {
            sources[k] = match (from.iter().position(|s| s == sky), kind) {
                (Some(idx), _) => SkySource::Direct(idx),
                (None, Some(kind)) => SkySource::Feed(kind),
                (None, None) => SkySource::Missing,
            };
        }
        sources
    }

    fn kind_products(kind: FeedKind) -> [Stokes; 4] {
        match kind {
            FeedKind::Linear => LINEAR,
            FeedKind::Circular => CIRCULAR,
        }
    }

    /// Coefficient of input `src` in sky parameter `k`.
    fn sky_coeff(
        from: &[Stokes],
        sources: &[SkySource; 4],
        k: usize,
        src: usize,
        rot: (f64, f64),
    ) -> Complex<f64> {
        match sources[k] {
            SkySource::Direct(idx) if idx == src => Complex::new(1., 0.),
            SkySource::Feed(kind) if from[src].feed_kind() == Some(kind) => {
                from[src].sky_col(rot)[k]
            }
            _ => Complex::new(0., 0.),
        }
    }

    fn check_available(
        from: &[Stokes],
        sources: &[SkySource; 4],
        k: usize,
        rot: (f64, f64),
        target: Stokes,
    ) -> Result<(), PolConvError> {
        let unavailable = |needed| PolConvError::Unavailable {
            target,
            from: from.to_vec(),
            needed,
        };
        match sources[k] {
            SkySource::Direct(_) => Ok(()),
            SkySource::Missing => Err(unavailable(SKY[k])),
            SkySource::Feed(kind) => {
                for product in Self::kind_products(kind) {
                    if product.sky_col(rot)[k].norm() >= COEFF_EPSILON && !from.contains(&product)
                    {
                        return Err(unavailable(product));
                    }
                }
                Ok(())
            }
        }
    }

    /// Recompute the coefficient values for `(cos 2χ, sin 2χ)`.
    fn refresh(&mut self, rot: (f64, f64)) {
        for (t, row) in self.rows.iter_mut().enumerate() {
            let t_row = self.to[t].sky_row(rot);
            for (src, value) in row.iter_mut() {
                let mut coeff = Complex::new(0., 0.);
                for (k, t_coeff) in t_row.iter().enumerate() {
                    coeff += t_coeff * Self::sky_coeff(&self.from, &self.sources, k, *src, rot);
                }
                *value = Complex::new(coeff.re as f32, coeff.im as f32);
            }
        }
    }

    /// Update the parallactic angle [radians]. Does nothing unless the
    /// converter was built with rotation.
    pub fn set_par_angle(&mut self, chi: f64) {
        if self.rotating {
            self.refresh(rotation(chi));
        }
    }

    /// The input frame.
    pub fn from_frame(&self) -> &[Stokes] {
        &self.from
    }

    /// The output frame.
    pub fn to_frame(&self) -> &[Stokes] {
        &self.to
    }

    /// Whether this converter was built with parallactic angle rotation.
    pub fn is_rotating(&self) -> bool {
        self.rotating
    }

    /// Whether the conversion does nothing at all.
    pub fn is_void(&self) -> bool {
        self.from == self.to
    }

    /// The `(input index, coefficient)` pairs which make output product `t`.
    pub fn row(&self, t: usize) -> Vec<(usize, Complex<f32>)> {
        match self.identity[t] {
            Some(idx) => vec![(idx, Complex::new(1., 0.))],
            None => self.rows[t].clone(),
        }
    }

    /// Convert `input`, in the input frame, to `out` in the output frame.
    #[inline]
    pub fn convert(&self, out: &mut [Complex<f32>], input: &[Complex<f32>]) {
        debug_assert_eq!(out.len(), self.to.len());
        debug_assert_eq!(input.len(), self.from.len());
        for (t, out) in out.iter_mut().enumerate() {
            *out = match self.identity[t] {
                Some(idx) => input[idx],
                None => self.rows[t]
                    .iter()
                    .fold(Complex::new(0., 0.), |acc, &(src, c)| acc + c * input[src]),
            };
        }
    }

    /// Propagate noise through the conversion. Real and imaginary parts are
    /// treated as independent: `sqrt(Σ|c|² re²) + i sqrt(Σ|c|² im²)`.
    #[inline]
    pub fn noise(&self, out: &mut [Complex<f32>], input: &[Complex<f32>]) {
        debug_assert_eq!(out.len(), self.to.len());
        debug_assert_eq!(input.len(), self.from.len());
        for (t, out) in out.iter_mut().enumerate() {
            *out = match self.identity[t] {
                Some(idx) => input[idx],
                None => {
                    let (re, im) = self.rows[t].iter().fold((0., 0.), |(re, im), &(src, c)| {
                        let weight = c.norm_sqr();
                        let n = input[src];
                        (re + weight * n.re * n.re, im + weight * n.im * n.im)
                    });
                    Complex::new(f32::sqrt(re), f32::sqrt(im))
                }
            };
        }
    }
}
