use serde::{Deserialize, Serialize};

use crate::{BowErr, BowResult};

/// Parameters of the SIFT detector. Defaults follow Lowe's paper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiftConfig {
    /// Scale levels per octave in which extrema are searched.
    pub n_octave_layers: usize,
    /// Minimum |DoG| response of a keypoint, before division by `n_octave_layers`.
    pub contrast_threshold: f32,
    /// Maximum ratio of principal curvatures; larger keeps more edge-like points.
    pub edge_threshold: f32,
    /// Blur of the base level of each octave.
    pub sigma: f32,
    /// Blur assumed already present in the input image.
    pub assumed_blur: f32,
    /// Keep only the strongest responses when set.
    pub max_features: Option<usize>,
    /// Double the image size before building the scale space. Finds many more
    /// small-scale keypoints on downsampled inputs.
    pub upsample: bool,
}

impl Default for SiftConfig {
    fn default() -> Self {
        SiftConfig {
            n_octave_layers: 3,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
            sigma: 1.6,
            assumed_blur: 0.5,
            max_features: None,
            upsample: true,
        }
    }
}

/// Preprocessing applied to each image before keypoint detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Width and height are divided by this factor. 1 disables downsampling.
    pub downsample: u32,
    /// Radius of the median denoising filter. 0 disables it.
    pub median_radius: u32,
    /// Extract images on the rayon thread pool.
    pub parallel: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            downsample: 2,
            median_radius: 1,
            parallel: false,
        }
    }
}

/// Mini-batch k-means settings for building the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VocabConfig {
    /// Number of visual words.
    pub k: usize,
    pub seed: u64,
    /// Samples drawn per mini-batch step.
    pub batch_size: usize,
    /// Maximum number of passes over the pool, counted in samples seen.
    pub max_iter: usize,
    /// Independent initializations. `None` picks automatically.
    pub n_init: Option<usize>,
    /// Stop after this many consecutive steps without improvement of the
    /// smoothed batch inertia.
    pub max_no_improvement: usize,
    /// Stop when the mean squared center shift of a step falls to this value.
    pub tol: f32,
}

impl Default for VocabConfig {
    fn default() -> Self {
        VocabConfig {
            k: 50,
            seed: 42,
            batch_size: 1024,
            max_iter: 100,
            n_init: None,
            max_no_improvement: 10,
            tol: 0.0,
        }
    }
}

impl VocabConfig {
    pub fn with_k(k: usize) -> Self {
        VocabConfig {
            k,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> BowResult<()> {
        if self.k == 0 {
            return Err(BowErr::InvalidConfig("k must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(BowErr::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.n_init == Some(0) {
            return Err(BowErr::InvalidConfig("n_init must be at least 1".into()));
        }
        Ok(())
    }
}

impl ExtractorConfig {
    pub(crate) fn validate(&self) -> BowResult<()> {
        if self.downsample == 0 {
            return Err(BowErr::InvalidConfig("downsample must be at least 1".into()));
        }
        Ok(())
    }
}

/// Settings for a train or test run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub extractor: ExtractorConfig,
    pub vocab: VocabConfig,
    /// Encode histograms on the rayon thread pool.
    pub parallel_encode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.vocab.k, 50);
        assert_eq!(cfg.vocab.seed, 42);
        assert_eq!(cfg.extractor.downsample, 2);
        assert!(cfg.vocab.validate().is_ok());
        assert!(cfg.extractor.validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(matches!(
            VocabConfig::with_k(0).validate(),
            Err(BowErr::InvalidConfig(_))
        ));
        let cfg = VocabConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = ExtractorConfig {
            downsample: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
