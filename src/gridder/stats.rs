//! Counters and timers accumulated over a gridding session.

use std::{ops::AddAssign, time::Duration};

use log::{info, warn};

use super::GridMode;

/// What a gridder has done so far in this session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridderStats {
    /// samples added to the grid
    pub samples_gridded: u64,
    /// samples read off the grid
    pub samples_degridded: u64,
    /// grid cells touched while gridding
    pub number_gridded: u64,
    /// grid cells touched while degridding
    pub number_degridded: u64,
    /// polarisation vectors skipped because a product was flagged
    pub vectors_flagged: u64,
    /// polarisation vectors skipped because w was out of range
    pub vectors_w_flagged: u64,
    /// polarisation vectors whose channel isn't in the image
    pub vectors_unmapped: u64,
    /// rows skipped because the feed pointed too far from the image centre
    pub rows_rejected_pointing: u64,
    /// samples whose kernel would leave the grid
    pub samples_off_grid: u64,
    /// time spent on coordinates and pixel mapping
    pub time_coordinates: Duration,
    /// time spent building convolution functions
    pub time_conv_functions: Duration,
    /// time spent gridding
    pub time_gridded: Duration,
    /// time spent degridding
    pub time_degridded: Duration,
}

impl AddAssign<&GridderStats> for GridderStats {
    fn add_assign(&mut self, other: &GridderStats) {
        self.samples_gridded += other.samples_gridded;
        self.samples_degridded += other.samples_degridded;
        self.number_gridded += other.number_gridded;
        self.number_degridded += other.number_degridded;
        self.vectors_flagged += other.vectors_flagged;
        self.vectors_w_flagged += other.vectors_w_flagged;
        self.vectors_unmapped += other.vectors_unmapped;
        self.rows_rejected_pointing += other.rows_rejected_pointing;
        self.samples_off_grid += other.samples_off_grid;
        self.time_coordinates += other.time_coordinates;
        self.time_conv_functions += other.time_conv_functions;
        self.time_gridded += other.time_gridded;
        self.time_degridded += other.time_degridded;
    }
}

fn per_point_ns(time: Duration, points: u64) -> f64 {
    if points == 0 {
        0.
    } else {
        time.as_secs_f64() * 1e9 / points as f64
    }
}

impl GridderStats {
    /// Write a summary to the info log. `name` identifies the convolution
    /// function builder.
    pub fn log_summary(&self, name: &str, mode: GridMode) {
        let label = match mode {
            GridMode::Image => "",
            GridMode::Psf => " (psf)",
            GridMode::Pcf => " (pcf)",
        };
        info!("{} gridding statistics{}", name, label);
        if self.samples_gridded > 0 {
            info!("   Samples gridded{}        = {}", label, self.samples_gridded);
            info!("   Points gridded{}         = {}", label, self.number_gridded);
            info!("   Time gridding{}          = {:.3}s", label, self.time_gridded.as_secs_f64());
            info!(
                "   Time per point{}         = {:.2} ns",
                label,
                per_point_ns(self.time_gridded, self.number_gridded)
            );
        }
        if self.samples_degridded > 0 {
            info!("   Samples degridded        = {}", self.samples_degridded);
            info!("   Points degridded         = {}", self.number_degridded);
            info!("   Time degridding          = {:.3}s", self.time_degridded.as_secs_f64());
            info!(
                "   Time per point           = {:.2} ns",
                per_point_ns(self.time_degridded, self.number_degridded)
            );
        }
        info!("   Coordinate conversion    = {:.3}s", self.time_coordinates.as_secs_f64());
        info!("   CFs and indices          = {:.3}s", self.time_conv_functions.as_secs_f64());
        info!("   Vectors flagged{}        = {}", label, self.vectors_flagged);
        info!("   Vectors with |w|>wmax{}  = {}", label, self.vectors_w_flagged);
        info!("   Vectors not in the image = {}", self.vectors_unmapped);
        info!("   Rows rejected (pointing) = {}", self.rows_rejected_pointing);
        info!("   Samples off the grid     = {}", self.samples_off_grid);
        if self.samples_gridded == 0 && self.samples_degridded == 0 {
            warn!("{} gridder{} has not been used", name, label);
        }
    }
}
