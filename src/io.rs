use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::{extract::Progress, BowResult};

/// Load an image with 8 bits per channel, grayscale or RGB depending on the file.
pub fn load_image<P: AsRef<Path>>(path: P) -> BowResult<DynamicImage> {
    let img = image::open(path)?;
    Ok(if img.color().has_color() {
        DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        DynamicImage::ImageLuma8(img.to_luma8())
    })
}

/// Load every image below `dir`, labeled with the name of the subdirectory it is in.
///
/// Subdirectories and files are visited in name order. Files that cannot be
/// decoded are skipped, as are plain files directly inside `dir`.
pub fn load_labeled_images<P, Pr>(dir: P, progress: &Pr) -> BowResult<(Vec<DynamicImage>, Vec<String>)>
where
    P: AsRef<Path>,
    Pr: Progress + ?Sized,
{
    let mut classes: Vec<(String, Vec<PathBuf>)> = Vec::new();
    for entry in sorted_entries(dir.as_ref())? {
        if !entry.is_dir() {
            continue;
        }
        let label = match entry.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_owned(),
            None => continue,
        };
        let files = sorted_entries(&entry)?
            .into_iter()
            .filter(|p| p.is_file())
            .collect();
        classes.push((label, files));
    }

    let total = classes.iter().map(|(_, f)| f.len()).sum();
    let mut done = 0;
    let mut images = Vec::with_capacity(total);
    let mut labels = Vec::with_capacity(total);
    for (label, files) in classes {
        for file in files {
            match load_image(&file) {
                Ok(img) => {
                    images.push(img);
                    labels.push(label.clone());
                }
                Err(e) => warn!("Skipping {:?}: {}", file, e),
            }
            done += 1;
            progress.update(done, total);
        }
    }
    debug!("Loaded {} of {} files", images.len(), total);
    Ok((images, labels))
}

fn sorted_entries(dir: &Path) -> BowResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in dir.read_dir()? {
        if let Ok(entry) = entry {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::NoProgress;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn labels_come_from_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        for class in ["cat", "dog"] {
            std::fs::create_dir(dir.path().join(class)).unwrap();
        }
        GrayImage::from_pixel(4, 4, Luma([9]))
            .save(dir.path().join("dog/b.png"))
            .unwrap();
        RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))
            .save(dir.path().join("dog/a.png"))
            .unwrap();
        GrayImage::from_pixel(5, 3, Luma([7]))
            .save(dir.path().join("cat/x.png"))
            .unwrap();
        std::fs::write(dir.path().join("cat/notes.txt"), b"not an image").unwrap();
        std::fs::write(dir.path().join("stray.png"), b"ignored").unwrap();

        let (images, labels) = load_labeled_images(dir.path(), &NoProgress).unwrap();
        assert_eq!(labels, vec!["cat", "dog", "dog"]);
        assert_eq!(images[0].width(), 5);
        assert!(images[1].color().has_color());
        assert!(!images[2].color().has_color());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_labeled_images(dir.path().join("nope"), &NoProgress).is_err());
    }
}
