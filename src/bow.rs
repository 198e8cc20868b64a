use serde::{Deserialize, Serialize};

use crate::{BowErr, BowResult};

/// Bag-of-Words representation of an image or descriptor set.
///
/// Index: word id in the vocabulary.
///
/// Value: number of descriptors of the image assigned to that word.
pub type BoW = Vec<f32>;

/// Provides helpers on single BoW vectors.
pub trait BoWTrait {
    /// Sum of all entries. Equals the number of encoded descriptors until normalized.
    fn total(&self) -> f32;
    /// True if no descriptor was counted.
    fn is_zero(&self) -> bool;
    /// Copy scaled to unit L1 norm. All-zero vectors are returned unchanged.
    fn normalized(&self) -> BoW;
    /// Similarity score between two L1 normalized vectors, in [0, 1]. (Galvez, Eq 2).
    fn l1(&self, other: &Self) -> f32;
}

impl BoWTrait for BoW {
    fn total(&self) -> f32 {
        self.iter().sum()
    }

    fn is_zero(&self) -> bool {
        self.iter().all(|&w| w == 0.)
    }

    fn normalized(&self) -> BoW {
        let sum = self.total();
        if sum > 0. {
            let inv_sum = 1. / sum;
            self.iter().map(|w| w * inv_sum).collect()
        } else {
            self.clone()
        }
    }

    fn l1(&self, other: &Self) -> f32 {
        1. - 0.5
            * (self
                .iter()
                .zip(other)
                .fold(0., |a, (b, c)| a + (b - c).abs()))
    }
}

/// One BoW row per image, all of the same width (the vocabulary size).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    width: usize,
    rows: Vec<BoW>,
}

impl FeatureMatrix {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(width: usize, rows: Vec<BoW>) -> BowResult<Self> {
        let mut m = Self::new(width);
        m.rows.reserve(rows.len());
        for row in rows {
            m.push(row)?;
        }
        Ok(m)
    }

    /// Rows already known to be `width` wide.
    pub(crate) fn from_rows_unchecked(width: usize, rows: Vec<BoW>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == width));
        Self { width, rows }
    }

    pub fn push(&mut self, row: BoW) -> BowResult<()> {
        if row.len() != self.width {
            return Err(BowErr::VocabularyMismatch {
                expected: self.width,
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Number of columns, the vocabulary size K.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, i: usize) -> Option<&BoW> {
        self.rows.get(i)
    }

    pub fn rows(&self) -> &[BoW] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<BoW> {
        self.rows
    }

    pub fn row_sums(&self) -> Vec<f32> {
        self.rows.iter().map(BoWTrait::total).collect()
    }

    /// Indices of rows in which nothing was counted.
    ///
    /// Such rows carry no information and may upset downstream fitters that
    /// assume non-degenerate input.
    pub fn zero_rows(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_zero())
            .map(|(i, _)| i)
            .collect()
    }

    /// Row-major copy of the whole matrix.
    pub fn to_flat(&self) -> Vec<f32> {
        self.rows.iter().flatten().copied().collect()
    }

    /// Load a feature matrix from a file
    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> BowResult<Self> {
        let buffer = std::fs::read(file)?;
        let m: Self = bincode::deserialize(&buffer)?;
        if let Some(bad) = m.rows.iter().find(|r| r.len() != m.width) {
            return Err(BowErr::VocabularyMismatch {
                expected: m.width,
                found: bad.len(),
            });
        }
        Ok(m)
    }

    /// Save feature matrix to a file
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> BowResult<()> {
        let serialized = bincode::serialize(&self)?;
        std::fs::write(file, serialized)?;
        Ok(())
    }
}
