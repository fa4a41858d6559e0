//! Options for a gridding session.

use std::fmt::Display;

use derive_builder::Builder;

use crate::GridderError;

/// Options which control how visibilities are gridded and degridded.
///
/// # Examples
///
/// ```rust
/// use visgrid::GridderConfigBuilder;
///
/// let config = GridderConfigBuilder::default()
///     .oversample(4)
///     .padding(1.5)
///     .build()
///     .unwrap();
/// assert_eq!(config.oversample, 4);
/// assert!(!config.use_all_data_for_psf);
/// ```
#[derive(Builder, Debug, Clone, PartialEq)]
pub struct GridderConfig {
    /// Number of sub-pixel steps per uv cell
    #[builder(default = "1")]
    pub oversample: u32,
    /// Largest kernel support the builder may produce, 0 for no limit
    #[builder(default = "0")]
    pub support: u32,
    /// Ratio of the grid size to the image size
    #[builder(default = "1.0")]
    pub padding: f64,
    /// Reject rows whose feed points further than this from the image
    /// centre [radians]
    #[builder(default)]
    pub max_pointing_separation: Option<f64>,
    /// Whether the PSF uses every row, rather than one representative feed
    #[builder(default = "false")]
    pub use_all_data_for_psf: bool,
    /// Whether the sum of weights has a row per oversampled kernel, rather
    /// than per plane
    #[builder(default = "false")]
    pub track_weight_per_oversample_plane: bool,
    /// Whether grids are freed once they have been finalised
    #[builder(default = "false")]
    pub clear_grid: bool,
    /// Rotate feed polarisations by the parallactic angle plus this offset
    /// [radians]
    #[builder(default)]
    pub pa_rotation: Option<f64>,
}

impl Default for GridderConfig {
    fn default() -> Self {
        Self {
            oversample: 1,
            support: 0,
            padding: 1.0,
            max_pointing_separation: None,
            use_all_data_for_psf: false,
            track_weight_per_oversample_plane: false,
            clear_grid: false,
            pa_rotation: None,
        }
    }
}

impl Display for GridderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Will grid with oversampling {} and padding {}.",
            self.oversample, self.padding
        )?;
        if self.support > 0 {
            writeln!(f, "Will limit kernel support to {} pixels.", self.support)?;
        }
        match self.max_pointing_separation {
            Some(sep) => writeln!(
                f,
                "Will reject rows pointing more than {:.4} deg from the image centre.",
                sep.to_degrees()
            )?,
            None => writeln!(f, "Will not reject rows by pointing.")?,
        }
        writeln!(
            f,
            "{} use all data for the PSF.",
            if self.use_all_data_for_psf {
                "Will"
            } else {
                "Will not"
            }
        )?;
        writeln!(
            f,
            "{} track weights per oversampling plane.",
            if self.track_weight_per_oversample_plane {
                "Will"
            } else {
                "Will not"
            }
        )?;
        writeln!(
            f,
            "{} clear grids after finalising.",
            if self.clear_grid { "Will" } else { "Will not" }
        )?;
        match self.pa_rotation {
            Some(offset) => writeln!(
                f,
                "Will rotate polarisations by the parallactic angle with an offset of {:.4} deg.",
                offset.to_degrees()
            )?,
            None => writeln!(f, "Will not rotate polarisations.")?,
        }
        Ok(())
    }
}

impl GridderConfig {
    /// A one line description of the non-default options.
    pub fn as_comment(&self) -> String {
        [
            Some(format!("oversample {}", self.oversample)),
            if self.padding != 1.0 {
                Some(format!("padding {}", self.padding))
            } else {
                None
            },
            if self.support > 0 {
                Some(format!("support <= {}", self.support))
            } else {
                None
            },
            self.max_pointing_separation
                .map(|sep| format!("pointing cut {:.4} deg", sep.to_degrees())),
            if self.use_all_data_for_psf {
                Some("psf from all data".to_string())
            } else {
                None
            },
            if self.track_weight_per_oversample_plane {
                Some("weights per oversampling plane".to_string())
            } else {
                None
            },
            self.pa_rotation
                .map(|offset| format!("pa rotation {:.4} deg", offset.to_degrees())),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<String>>()
        .join(", ")
    }

    /// Check the options can work at all.
    ///
    /// # Errors
    ///
    /// [`GridderError::Configuration`] naming the first bad option.
    pub fn validate(&self) -> Result<(), GridderError> {
        if self.oversample == 0 {
            return Err(GridderError::Configuration(
                "oversample must be at least 1".to_string(),
            ));
        }
        if !self.padding.is_finite() || self.padding < 1.0 {
            return Err(GridderError::Configuration(format!(
                "padding must be a finite number >= 1, got {}",
                self.padding
            )));
        }
        if let Some(sep) = self.max_pointing_separation {
            if !(sep >= 0.) {
                return Err(GridderError::Configuration(format!(
                    "maximum pointing separation must be non-negative, got {sep}"
                )));
            }
        }
        if let Some(offset) = self.pa_rotation {
            if !offset.is_finite() {
                return Err(GridderError::Configuration(format!(
                    "parallactic angle offset must be finite, got {offset}"
                )));
            }
        }
        Ok(())
    }
}
