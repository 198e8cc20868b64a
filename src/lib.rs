use thiserror::Error;

/// Visual vocabulary: building it from training descriptors and encoding
/// descriptor sets into histograms. Provides the main functionality of this crate.
pub mod vocab;
pub use vocab::{TrainedVocabulary, Vocabulary};

/// BoW vectors and the feature matrix handed to classifiers.
pub mod bow;
pub use bow::{BoW, BoWTrait, FeatureMatrix};

/// Mini-batch k-means used to build the vocabulary.
pub mod kmeans;

/// Scale-invariant keypoint detection and 128-d descriptors.
pub mod sift;
pub use sift::{Detector, Sift};

/// Per-image preprocessing, descriptor extraction and drop-filtering.
pub mod extract;
pub use extract::{extract, Extracted, NoProgress, Progress};

/// Train/test entry points tying extraction, vocabulary and encoding together.
pub mod pipeline;
pub use pipeline::{test, train, TestOutput, TrainOutput};

/// Detector, extractor and clustering settings.
pub mod config;
pub use config::{ExtractorConfig, PipelineConfig, SiftConfig, VocabConfig};

/// Loading labeled images from disk.
pub mod io;

/// Integer and one-hot label encoding for the classifier stage.
pub mod labels;
pub use labels::LabelEncoder;

/// Width of a local descriptor.
pub const DESC_LEN: usize = 128;

/// Supported descriptor type is a 128 element float array.
///
/// This is the layout produced by SIFT: a 4x4 grid of 8-bin
/// gradient orientation histograms.
pub type Desc = [f32; DESC_LEN];

/// For each descriptor passed to [`Vocabulary::transform_with_assignments`],
/// the id of the word it was assigned to.
pub type Assignments = Vec<usize>;

pub type BowResult<T> = std::result::Result<T, BowErr>;

#[derive(Error, Debug)]
pub enum BowErr {
    #[error("Io Error")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "bincode")]
    #[error("Serialization Error")]
    Bincode(#[from] bincode::Error),
    #[error("Image decode error")]
    Image(#[from] image::ImageError),
    #[error("No usable training data: every image was dropped during descriptor extraction")]
    EmptyTrainingPool,
    #[error("Cannot build {k} clusters from {found} descriptors")]
    InsufficientDescriptors { k: usize, found: usize },
    #[error("Vocabulary mismatch: expected {expected} words, found {found}")]
    VocabularyMismatch { expected: usize, found: usize },
    #[error("Got {images} images but {labels} labels")]
    LengthMismatch { images: usize, labels: usize },
    #[error("Label at position {index} was not seen when fitting the encoder")]
    UnknownLabel { index: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
