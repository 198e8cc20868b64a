use image::DynamicImage;
use tracing::{info, warn};

use crate::{
    bow::FeatureMatrix,
    config::PipelineConfig,
    extract::{extract, Progress},
    sift::Detector,
    vocab::{TrainedVocabulary, Vocabulary},
    BowResult,
};

/// Everything a training run hands over to the classifier stage.
#[derive(Debug, Clone)]
pub struct TrainOutput<L> {
    /// One row per surviving training image.
    pub features: FeatureMatrix,
    /// Must be kept and passed to every later [`test`] call.
    pub vocabulary: TrainedVocabulary,
    /// Number of words, the width of `features`.
    pub k: usize,
    /// Labels of the surviving images, aligned with the rows of `features`.
    pub labels: Vec<L>,
}

/// Features of a test run.
#[derive(Debug, Clone)]
pub struct TestOutput<L> {
    pub features: FeatureMatrix,
    pub labels: Vec<L>,
}

/// Training mode: extract descriptors, build the vocabulary from them and
/// encode every surviving training image with it.
pub fn train<L, D, P>(
    images: &[DynamicImage],
    labels: Vec<L>,
    detector: &D,
    config: &PipelineConfig,
    progress: &P,
) -> BowResult<TrainOutput<L>>
where
    D: Detector + ?Sized,
    P: Progress + ?Sized,
{
    config.vocab.validate()?;
    let extracted = extract(images, labels, detector, &config.extractor, progress)?;
    let vocabulary = TrainedVocabulary::new(Vocabulary::create(extracted.sets(), &config.vocab)?);
    let (sets, labels) = extracted.into_parts();
    let features = vocabulary.encode(&sets, config.parallel_encode)?;
    report(&features, "training");

    Ok(TrainOutput {
        k: vocabulary.k(),
        features,
        vocabulary,
        labels,
    })
}

/// Test mode: extract descriptors and encode them with the vocabulary of an
/// earlier training run. Nothing is fitted here.
pub fn test<L, D, P>(
    images: &[DynamicImage],
    labels: Vec<L>,
    vocabulary: &TrainedVocabulary,
    detector: &D,
    config: &PipelineConfig,
    progress: &P,
) -> BowResult<TestOutput<L>>
where
    D: Detector + ?Sized,
    P: Progress + ?Sized,
{
    vocabulary.check()?;
    let (sets, labels) =
        extract(images, labels, detector, &config.extractor, progress)?.into_parts();
    let features = vocabulary.encode(&sets, config.parallel_encode)?;
    report(&features, "test");

    Ok(TestOutput { features, labels })
}

fn report(features: &FeatureMatrix, stage: &str) {
    info!(
        "Encoded {} {} images into {} words",
        features.n_rows(),
        stage,
        features.width()
    );
    let zero = features.zero_rows();
    if !zero.is_empty() {
        warn!(
            "{} {} rows have no counted descriptors: {:?}",
            zero.len(),
            stage,
            zero
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{extract::NoProgress, BowErr, DESC_LEN};
    use image::{GrayImage, Luma};

    /// Reads descriptors straight off the image: pixel `(0, i)` holds the
    /// group of descriptor `i`, 0 meaning no more descriptors.
    struct Encoded;

    impl Detector for Encoded {
        fn detect_and_compute(&self, image: &GrayImage) -> Vec<Vec<f32>> {
            (0..image.width())
                .map(|x| image.get_pixel(x, 0)[0])
                .take_while(|&g| g != 0)
                .map(|g| {
                    let mut d = vec![0f32; DESC_LEN];
                    d[g as usize % DESC_LEN] = 100. + g as f32;
                    d
                })
                .collect()
        }
    }

    fn image(groups: &[u8]) -> DynamicImage {
        let mut img = GrayImage::new(16, 1);
        for (x, &g) in groups.iter().enumerate() {
            img.put_pixel(x as u32, 0, Luma([g]));
        }
        DynamicImage::ImageLuma8(img)
    }

    fn config(k: usize) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.extractor.downsample = 1;
        cfg.extractor.median_radius = 0;
        cfg.vocab.k = k;
        cfg
    }

    #[test]
    fn train_realigns_labels_after_drops() {
        let images = vec![image(&[1, 2, 2]), image(&[]), image(&[3, 1])];
        let out = train(&images, vec!["x", "y", "z"], &Encoded, &config(3), &NoProgress).unwrap();
        assert_eq!(out.labels, vec!["x", "z"]);
        assert_eq!(out.features.n_rows(), 2);
        assert_eq!(out.k, 3);
        assert_eq!(out.features.row_sums(), vec![3., 2.]);
    }

    #[test]
    fn all_dropped_is_empty_pool() {
        let images = vec![image(&[]), image(&[])];
        let err = train(&images, vec![0, 1], &Encoded, &config(2), &NoProgress).unwrap_err();
        assert!(matches!(err, BowErr::EmptyTrainingPool));
    }

    #[test]
    fn test_mode_reuses_vocabulary() {
        let train_images = vec![image(&[1, 1, 2]), image(&[2, 3, 3])];
        let out = train(&train_images, vec![0, 1], &Encoded, &config(3), &NoProgress).unwrap();
        let before = out.vocabulary.clone();

        // Group 9 was never seen during training.
        let test_images = vec![image(&[9, 9, 1]), image(&[3])];
        let t = test(&test_images, vec![5, 6], &out.vocabulary, &Encoded, &config(3), &NoProgress)
            .unwrap();
        assert_eq!(t.features.width(), 3);
        assert_eq!(t.features.row_sums(), vec![3., 1.]);
        assert_eq!(t.labels, vec![5, 6]);
        assert_eq!(out.vocabulary, before);

        let again = test(&test_images, vec![5, 6], &out.vocabulary, &Encoded, &config(3), &NoProgress)
            .unwrap();
        assert_eq!(again.features, t.features);
    }

    #[test]
    fn test_mode_ignores_vocab_config() {
        let train_images = vec![image(&[1, 2, 3, 4])];
        let out = train(&train_images, vec![()], &Encoded, &config(4), &NoProgress).unwrap();
        let t = test(&train_images, vec![()], &out.vocabulary, &Encoded, &config(7), &NoProgress)
            .unwrap();
        assert_eq!(t.features.width(), 4);
    }
}
