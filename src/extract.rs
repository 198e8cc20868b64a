use std::sync::atomic::{AtomicUsize, Ordering};

use image::{imageops::FilterType, DynamicImage, GrayImage};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{config::ExtractorConfig, sift::Detector, BowErr, BowResult, Desc};

/// Receives a notification after each image has been processed.
///
/// Called from worker threads when extraction runs in parallel, so `done` is the
/// number of finished images, not the index of the image that just finished.
pub trait Progress: Sync {
    fn update(&self, done: usize, total: usize);
}

/// Discards progress notifications.
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&self, _done: usize, _total: usize) {}
}

impl<F> Progress for F
where
    F: Fn(usize, usize) + Sync,
{
    fn update(&self, done: usize, total: usize) {
        self(done, total)
    }
}

/// Descriptor sets of the images that survived extraction, together with their labels.
///
/// Both sequences are always the same length and in the original relative order.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted<L> {
    sets: Vec<Vec<Desc>>,
    labels: Vec<L>,
    dropped: Vec<usize>,
}

impl<L> Extracted<L> {
    /// Number of surviving images.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn sets(&self) -> &[Vec<Desc>] {
        &self.sets
    }

    pub fn labels(&self) -> &[L] {
        &self.labels
    }

    /// Input positions of the images that were dropped, ascending.
    pub fn dropped(&self) -> &[usize] {
        &self.dropped
    }

    /// Total number of descriptors over all images.
    pub fn num_descriptors(&self) -> usize {
        self.sets.iter().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[Desc], &L)> {
        self.sets.iter().map(Vec::as_slice).zip(&self.labels)
    }

    pub fn into_parts(self) -> (Vec<Vec<Desc>>, Vec<L>) {
        (self.sets, self.labels)
    }

    /// Keep the images that produced a descriptor set, dropping the others
    /// together with their label.
    fn filter_zip<I>(results: I, labels: Vec<L>) -> Self
    where
        I: IntoIterator<Item = Option<Vec<Desc>>>,
    {
        let mut sets = Vec::new();
        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for (i, (set, label)) in results.into_iter().zip(labels).enumerate() {
            match set {
                Some(set) => {
                    sets.push(set);
                    kept.push(label);
                }
                None => dropped.push(i),
            }
        }
        Self {
            sets,
            labels: kept,
            dropped,
        }
    }
}

/// Extract local descriptors from every image.
///
/// Images without keypoints, or for which the detector returns any descriptor
/// whose width is not [`crate::DESC_LEN`], are dropped along with their label.
pub fn extract<L, D, P>(
    images: &[DynamicImage],
    labels: Vec<L>,
    detector: &D,
    config: &ExtractorConfig,
    progress: &P,
) -> BowResult<Extracted<L>>
where
    D: Detector + ?Sized,
    P: Progress + ?Sized,
{
    config.validate()?;
    if images.len() != labels.len() {
        return Err(BowErr::LengthMismatch {
            images: images.len(),
            labels: labels.len(),
        });
    }

    let total = images.len();
    let done = AtomicUsize::new(0);
    let run = |img: &DynamicImage| {
        let set = describe(img, detector, config);
        progress.update(done.fetch_add(1, Ordering::Relaxed) + 1, total);
        set
    };

    // Indexed collect keeps input order, so filtering below is the same either way.
    let results: Vec<Option<Vec<Desc>>> = if config.parallel {
        images.par_iter().map(run).collect()
    } else {
        images.iter().map(run).collect()
    };

    let extracted = Extracted::filter_zip(results, labels);
    for i in extracted.dropped() {
        debug!("Dropping image {}: no valid descriptors", i);
    }
    info!(
        "Extracted {} descriptors from {} of {} images",
        extracted.num_descriptors(),
        extracted.len(),
        total
    );
    Ok(extracted)
}

/// Descriptors of a single image, or `None` if the image must be dropped.
pub fn describe<D>(image: &DynamicImage, detector: &D, config: &ExtractorConfig) -> Option<Vec<Desc>>
where
    D: Detector + ?Sized,
{
    let gray = preprocess(image, config);
    validate(detector.detect_and_compute(&gray))
}

/// Downsample, convert to 8-bit luma and median filter.
pub fn preprocess(image: &DynamicImage, config: &ExtractorConfig) -> GrayImage {
    let f = config.downsample.max(1);
    let gray = if f > 1 {
        let (w, h) = ((image.width() / f).max(1), (image.height() / f).max(1));
        image.resize_exact(w, h, FilterType::Triangle).to_luma8()
    } else {
        image.to_luma8()
    };
    if config.median_radius > 0 {
        imageproc::filter::median_filter(&gray, config.median_radius, config.median_radius)
    } else {
        gray
    }
}

fn validate(rows: Vec<Vec<f32>>) -> Option<Vec<Desc>> {
    if rows.is_empty() {
        return None;
    }
    rows.iter()
        .map(|row| <Desc>::try_from(row.as_slice()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DESC_LEN;
    use image::{Luma, Rgb, RgbImage};
    use std::sync::Mutex;

    /// Returns as many rows as the mean intensity divided by 10, each `width` wide.
    struct Counting {
        width: usize,
    }

    impl Detector for Counting {
        fn detect_and_compute(&self, image: &GrayImage) -> Vec<Vec<f32>> {
            let n = image.as_raw().iter().map(|&p| p as usize).sum::<usize>()
                / image.as_raw().len().max(1)
                / 10;
            (0..n).map(|i| vec![i as f32; self.width]).collect()
        }
    }

    fn gray(v: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([v])))
    }

    fn cfg() -> ExtractorConfig {
        ExtractorConfig {
            downsample: 1,
            median_radius: 0,
            parallel: false,
        }
    }

    #[test]
    fn drops_images_without_descriptors() {
        let images = vec![gray(50), gray(0), gray(30)];
        let out = extract(&images, vec!["a", "b", "c"], &Counting { width: DESC_LEN }, &cfg(), &NoProgress)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.labels(), &["a", "c"]);
        assert_eq!(out.sets()[0].len(), 5);
        assert_eq!(out.sets()[1].len(), 3);
        assert_eq!(out.dropped(), &[1]);
        assert_eq!(out.num_descriptors(), 8);
    }

    #[test]
    fn drops_images_with_malformed_descriptors() {
        let images = vec![gray(50), gray(50)];
        let out = extract(&images, vec![1, 2], &Counting { width: 64 }, &cfg(), &NoProgress).unwrap();
        assert!(out.is_empty());
        assert!(out.labels().is_empty());
        assert_eq!(out.dropped(), &[0, 1]);
    }

    #[test]
    fn mixed_width_rows_drop_the_image() {
        assert!(validate(vec![vec![0.; DESC_LEN], vec![0.; DESC_LEN - 1]]).is_none());
        assert!(validate(vec![]).is_none());
        assert_eq!(validate(vec![vec![1.; DESC_LEN]]).map(|v| v.len()), Some(1));
    }

    #[test]
    fn length_mismatch_is_fatal() {
        let err = extract(&[gray(50)], vec![1, 2], &Counting { width: DESC_LEN }, &cfg(), &NoProgress)
            .unwrap_err();
        assert!(matches!(err, BowErr::LengthMismatch { images: 1, labels: 2 }));
    }

    #[test]
    fn parallel_matches_sequential() {
        let images: Vec<_> = (0..12).map(|i| gray((i * 7) as u8)).collect();
        let labels: Vec<usize> = (0..12).collect();
        let det = Counting { width: DESC_LEN };
        let seq = extract(&images, labels.clone(), &det, &cfg(), &NoProgress).unwrap();
        let par_cfg = ExtractorConfig {
            parallel: true,
            ..cfg()
        };
        let par = extract(&images, labels, &det, &par_cfg, &NoProgress).unwrap();
        assert_eq!(seq, par);
    }

    #[test]
    fn progress_is_reported_per_image() {
        let seen = Mutex::new(Vec::new());
        let progress = |done: usize, total: usize| seen.lock().unwrap().push((done, total));
        let images = vec![gray(50), gray(0), gray(30)];
        extract(&images, vec![0, 1, 2], &Counting { width: DESC_LEN }, &cfg(), &progress).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn preprocess_halves_and_converts_color() {
        let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([200, 10, 10])));
        let out = preprocess(&rgb, &ExtractorConfig::default());
        assert_eq!(out.dimensions(), (20, 15));
    }

    #[test]
    fn preprocess_keeps_tiny_images_nonempty() {
        let out = preprocess(&gray(10).crop_imm(0, 0, 1, 1), &ExtractorConfig::default());
        assert_eq!(out.dimensions(), (1, 1));
    }
}
