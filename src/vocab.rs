use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Instant};
use tracing::info;

use crate::{
    bow::FeatureMatrix, config::VocabConfig, kmeans, Assignments, BoW, BowErr, BowResult, Desc,
    DESC_LEN,
};

#[derive(Serialize, Deserialize, PartialEq, Clone)]
/// Visual vocabulary built from a pool of local descriptors. Can be:
/// 1. Created from the descriptor sets of a training image set.
/// 2. Used to transform a new set of descriptors into a BoW histogram (and
///    optionally get the word each descriptor was assigned to).
///
/// It is never modified after creation, so it can be shared between threads freely.
pub struct Vocabulary {
    /// `k * DESC_LEN` values, word `j` at `[j * DESC_LEN..(j + 1) * DESC_LEN]`.
    centers: Vec<f32>,
    /// Training descriptors assigned to each word.
    cluster_size: Vec<usize>,
    k: usize,
}

/// Vocabulary API
impl Vocabulary {
    /// Build a vocabulary from the descriptor sets of a training image set.
    ///
    /// All sets are pooled into one list before clustering. Fails with
    /// [`BowErr::EmptyTrainingPool`] if there is nothing to cluster.
    pub fn create(sets: &[Vec<Desc>], config: &VocabConfig) -> BowResult<Self> {
        let pool: Vec<Desc> = sets.iter().flatten().copied().collect();
        Self::from_pool(&pool, config)
    }

    /// Build a vocabulary from an already pooled list of descriptors.
    pub fn from_pool(pool: &[Desc], config: &VocabConfig) -> BowResult<Self> {
        if pool.is_empty() {
            return Err(BowErr::EmptyTrainingPool);
        }
        info!(
            "Clustering {} descriptors into {} words",
            pool.len(),
            config.k
        );
        let start = Instant::now();
        let fit = kmeans::mini_batch(pool, config)?;
        info!(
            "Vocabulary built in {:.2}s ({} steps, inertia {:.1})",
            start.elapsed().as_secs_f32(),
            fit.steps,
            fit.inertia
        );
        Ok(Self {
            centers: fit.centers,
            cluster_size: fit.sizes,
            k: config.k,
        })
    }

    /// Number of words (clusters).
    pub fn num_words(&self) -> usize {
        self.k
    }

    /// Center of word `i`.
    pub fn word(&self, i: usize) -> Option<&[f32]> {
        self.centers.chunks_exact(DESC_LEN).nth(i)
    }

    pub fn words(&self) -> impl Iterator<Item = &[f32]> {
        self.centers.chunks_exact(DESC_LEN)
    }

    /// Number of training descriptors closest to each word.
    pub fn cluster_sizes(&self) -> &[usize] {
        &self.cluster_size
    }

    /// Id of the word closest to `feature`, by squared Euclidean distance.
    pub fn quantize(&self, feature: &Desc) -> usize {
        kmeans::nearest(&self.centers, feature).0
    }

    /// Transform a set of descriptors into its bag of words histogram with
    /// respect to the vocabulary. Entry `j` counts descriptors closest to word `j`,
    /// so the entries sum to `features.len()`.
    pub fn transform(&self, features: &[Desc]) -> BoW {
        let mut bow: BoW = vec![0.; self.k];
        for f in features {
            bow[self.quantize(f)] += 1.;
        }
        bow
    }

    /// Like [`Vocabulary::transform`], also returning the word assigned to each descriptor.
    pub fn transform_with_assignments(&self, features: &[Desc]) -> (BoW, Assignments) {
        let mut bow: BoW = vec![0.; self.k];
        let assignments: Assignments = features
            .iter()
            .map(|f| {
                let w = self.quantize(f);
                bow[w] += 1.;
                w
            })
            .collect();
        (bow, assignments)
    }

    /// Encode every descriptor set, in order, into one row per set.
    pub fn transform_all(&self, sets: &[Vec<Desc>], parallel: bool) -> FeatureMatrix {
        let rows: Vec<BoW> = if parallel {
            sets.par_iter().map(|s| self.transform(s)).collect()
        } else {
            sets.iter().map(|s| self.transform(s)).collect()
        };
        FeatureMatrix::from_rows_unchecked(self.k, rows)
    }

    /// Check that the stored centers and statistics agree with `k`.
    fn check_shape(&self) -> BowResult<()> {
        let words = self.centers.len() / DESC_LEN;
        if self.centers.len() % DESC_LEN != 0 || words != self.k {
            return Err(BowErr::VocabularyMismatch {
                expected: self.k,
                found: words,
            });
        }
        if self.cluster_size.len() != self.k {
            return Err(BowErr::VocabularyMismatch {
                expected: self.k,
                found: self.cluster_size.len(),
            });
        }
        Ok(())
    }
}

/// A vocabulary produced by [`crate::train`], together with the number of words
/// the training run asked for.
///
/// This is the only form in which [`crate::test`] accepts a vocabulary, so test
/// images can never be used to fit a new one. Persist it with
/// [`TrainedVocabulary::save`] and reload it for later test runs.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct TrainedVocabulary {
    vocab: Vocabulary,
    k: usize,
}

impl TrainedVocabulary {
    pub(crate) fn new(vocab: Vocabulary) -> Self {
        let k = vocab.num_words();
        Self { vocab, k }
    }

    /// Number of words, the width of every feature row.
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Verify that the vocabulary has exactly `k` words of [`DESC_LEN`] values,
    /// and at least one word.
    pub fn check(&self) -> BowResult<()> {
        if self.k == 0 {
            return Err(BowErr::InvalidConfig("vocabulary has no words".into()));
        }
        if self.vocab.num_words() != self.k {
            return Err(BowErr::VocabularyMismatch {
                expected: self.k,
                found: self.vocab.num_words(),
            });
        }
        self.vocab.check_shape()
    }

    /// Encode descriptor sets into a `sets.len() x k` matrix.
    pub fn encode(&self, sets: &[Vec<Desc>], parallel: bool) -> BowResult<FeatureMatrix> {
        self.check()?;
        Ok(self.vocab.transform_all(sets, parallel))
    }

    /// Serialize to bytes.
    #[cfg(feature = "bincode")]
    pub fn to_bytes(&self) -> BowResult<Vec<u8>> {
        Ok(bincode::serialize(&self)?)
    }

    /// Deserialize from bytes written by [`TrainedVocabulary::to_bytes`].
    #[cfg(feature = "bincode")]
    pub fn from_bytes(bytes: &[u8]) -> BowResult<Self> {
        let v: Self = bincode::deserialize(bytes)?;
        v.check()?;
        Ok(v)
    }

    /// Load a vocabulary from a file
    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> BowResult<Self> {
        let mut file = std::fs::File::open(file)?;
        let mut buffer: Vec<u8> = Vec::new();
        std::io::Read::read_to_end(&mut file, &mut buffer)?;
        Self::from_bytes(&buffer)
    }

    /// Save vocabulary to a file
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> BowResult<()> {
        let serialized = self.to_bytes()?;
        let mut file = std::fs::File::create(file)?;
        std::io::Write::write_all(&mut file, &serialized)?;
        Ok(())
    }
}

impl fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sizes = &self.cluster_size;
        let sum = sizes.iter().sum::<usize>();
        f.debug_struct("Vocabulary")
            .field("Words", &self.k)
            .field("Descriptor Length", &DESC_LEN)
            .field("Total Training Features", &sum)
            .field("Min Word Cluster Size", &sizes.iter().min())
            .field("Max Word Cluster Size", &sizes.iter().max())
            .field("Mean Word Cluster Size", &(sum / sizes.len().max(1)))
            .finish()
    }
}
