use serde::{Deserialize, Serialize};

use crate::{BowErr, BowResult};

/// Maps class labels to integer codes `0..n_classes`, in sorted label order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder<L> {
    classes: Vec<L>,
}

impl<L: Ord + Clone> LabelEncoder<L> {
    /// Learn the set of classes.
    pub fn fit(labels: &[L]) -> Self {
        let mut classes = labels.to_vec();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    /// Fit on `labels` and encode them.
    pub fn fit_transform(labels: &[L]) -> (Self, Vec<usize>) {
        let enc = Self::fit(labels);
        let codes = labels
            .iter()
            .map(|l| enc.classes.binary_search(l).unwrap_or_default())
            .collect();
        (enc, codes)
    }

    pub fn classes(&self) -> &[L] {
        &self.classes
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn encode(&self, label: &L) -> Option<usize> {
        self.classes.binary_search(label).ok()
    }

    /// Encode every label. Fails on the first label not seen by [`LabelEncoder::fit`].
    pub fn transform(&self, labels: &[L]) -> BowResult<Vec<usize>> {
        labels
            .iter()
            .enumerate()
            .map(|(i, l)| self.encode(l).ok_or(BowErr::UnknownLabel { index: i }))
            .collect()
    }

    pub fn inverse(&self, code: usize) -> Option<&L> {
        self.classes.get(code)
    }

    /// Save the encoder together with encoded labels.
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, codes: &[usize], file: P) -> BowResult<()>
    where
        L: Serialize,
    {
        let serialized = bincode::serialize(&(self, codes))?;
        std::fs::write(file, serialized)?;
        Ok(())
    }

    /// Load an encoder and its encoded labels written by [`LabelEncoder::save`].
    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> BowResult<(Self, Vec<usize>)>
    where
        L: serde::de::DeserializeOwned,
    {
        let buffer = std::fs::read(file)?;
        let (enc, codes): (Self, Vec<usize>) = bincode::deserialize(&buffer)?;
        if enc.classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BowErr::InvalidConfig("label classes are not sorted".into()));
        }
        if let Some(index) = codes.iter().position(|&c| c >= enc.classes.len()) {
            return Err(BowErr::UnknownLabel { index });
        }
        Ok((enc, codes))
    }

    /// One row per label with a single 1 in the column of its class.
    pub fn one_hot(&self, labels: &[L]) -> BowResult<Vec<Vec<f32>>> {
        Ok(self
            .transform(labels)?
            .into_iter()
            .map(|c| {
                let mut row = vec![0.; self.classes.len()];
                row[c] = 1.;
                row
            })
            .collect())
    }
}
