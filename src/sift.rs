use image::GrayImage;
use smallvec::SmallVec;

use crate::{config::SiftConfig, Desc, DESC_LEN};

/// Anything that turns a grayscale image into local descriptors, one per keypoint.
///
/// Implementations must be stateless with respect to the images they see: a single
/// detector value is built once per run and shared by reference across all
/// extraction calls, possibly from several threads.
///
/// The returned rows are not trusted. The extractor drops the whole image if any
/// row is not exactly [`DESC_LEN`] wide.
pub trait Detector: Sync {
    fn detect_and_compute(&self, image: &GrayImage) -> Vec<Vec<f32>>;
}

/// A point of interest, in the coordinates of the image passed to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Diameter of the meaningful neighborhood.
    pub size: f32,
    /// Orientation in degrees, [0, 360).
    pub angle: f32,
    /// Absolute interpolated DoG value.
    pub response: f32,
    pub octave: usize,
}

/// Keypoint together with its descriptor.
#[derive(Debug, Clone)]
pub struct Feature {
    pub keypoint: Keypoint,
    pub descriptor: Desc,
}

/// Scale-invariant feature transform (Lowe 2004).
#[derive(Debug, Clone, Default)]
pub struct Sift {
    config: SiftConfig,
}

const IMG_BORDER: usize = 5;
const MAX_INTERP_STEPS: usize = 5;
const ORI_HIST_BINS: usize = 36;
const ORI_SIG_FCTR: f32 = 1.5;
const ORI_RADIUS: f32 = 3.0 * ORI_SIG_FCTR;
const ORI_PEAK_RATIO: f32 = 0.8;
const DESCR_WIDTH: usize = 4;
const DESCR_HIST_BINS: usize = 8;
const DESCR_SCL_FCTR: f32 = 3.0;
const DESCR_MAG_THR: f32 = 0.2;
const DESCR_INT_FCTR: f32 = 512.0;

impl Detector for Sift {
    fn detect_and_compute(&self, image: &GrayImage) -> Vec<Vec<f32>> {
        self.features(image)
            .into_iter()
            .map(|f| f.descriptor.to_vec())
            .collect()
    }
}

impl Sift {
    pub fn new(config: SiftConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SiftConfig {
        &self.config
    }

    /// Detect keypoints and compute one descriptor per keypoint orientation.
    pub fn features(&self, image: &GrayImage) -> Vec<Feature> {
        let mut base = Plane::from_gray(image);
        if base.width.min(base.height) < 2 * IMG_BORDER + 3 {
            return Vec::new();
        }
        let mut assumed_blur = self.config.assumed_blur;
        if self.config.upsample {
            base = base.upsample();
            assumed_blur *= 2.;
        }
        let min_dim = base.width.min(base.height);
        let n_octaves = ((min_dim as f32).log2().floor() as usize)
            .saturating_sub(2)
            .max(1);

        let gauss = self.gaussian_pyramid(base, n_octaves, assumed_blur);
        let dog: Vec<Vec<Plane>> = gauss
            .iter()
            .map(|octave| octave.windows(2).map(|w| w[1].sub(&w[0])).collect())
            .collect();

        let mut features = Vec::new();
        for (o, octave) in dog.iter().enumerate() {
            for layer in 1..=self.config.n_octave_layers {
                self.scan_layer(&gauss[o], octave, o, layer, &mut features);
            }
        }

        // Back to input image coordinates.
        if self.config.upsample {
            for f in features.iter_mut() {
                f.keypoint.x *= 0.5;
                f.keypoint.y *= 0.5;
                f.keypoint.size *= 0.5;
            }
        }

        if let Some(max) = self.config.max_features {
            features.sort_by(|a, b| {
                b.keypoint
                    .response
                    .partial_cmp(&a.keypoint.response)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            features.truncate(max);
        }
        features
    }

    fn gaussian_pyramid(
        &self,
        base: Plane,
        n_octaves: usize,
        assumed_blur: f32,
    ) -> Vec<Vec<Plane>> {
        let s = self.config.n_octave_layers;
        let sigma = self.config.sigma;

        // Incremental blur between consecutive levels of one octave.
        let k = 2f32.powf(1. / s as f32);
        let mut sig = vec![sigma; s + 3];
        for (i, si) in sig.iter_mut().enumerate().skip(1) {
            let prev = k.powi(i as i32 - 1) * sigma;
            let total = prev * k;
            *si = (total * total - prev * prev).sqrt();
        }

        let init = (sigma * sigma - assumed_blur * assumed_blur)
            .max(0.01)
            .sqrt();
        let mut pyr: Vec<Vec<Plane>> = Vec::with_capacity(n_octaves);
        let mut first = base.blur(init);
        for _ in 0..n_octaves {
            let mut octave = Vec::with_capacity(s + 3);
            octave.push(first);
            for &si in &sig[1..] {
                let next = octave[octave.len() - 1].blur(si);
                octave.push(next);
            }
            first = octave[s].downsample();
            pyr.push(octave);
        }
        pyr
    }

    fn scan_layer(
        &self,
        gauss: &[Plane],
        dog: &[Plane],
        octave: usize,
        layer: usize,
        out: &mut Vec<Feature>,
    ) {
        let s = self.config.n_octave_layers as f32;
        let threshold = 0.5 * self.config.contrast_threshold / s;
        let img = &dog[layer];
        let (w, h) = (img.width, img.height);
        if w <= 2 * IMG_BORDER || h <= 2 * IMG_BORDER {
            return;
        }

        for y in IMG_BORDER..h - IMG_BORDER {
            for x in IMG_BORDER..w - IMG_BORDER {
                let val = img.at(x, y);
                if val.abs() <= threshold || !is_extremum(dog, layer, x, y, val) {
                    continue;
                }
                let Some((kp, layer, xc, yc, scl)) = self.refine(dog, octave, layer, x, y) else {
                    continue;
                };
                let src = &gauss[layer];
                for angle in orientations(src, xc, yc, scl) {
                    let keypoint = Keypoint { angle, ..kp };
                    let pt = (
                        kp.x / (1 << octave) as f32,
                        kp.y / (1 << octave) as f32,
                    );
                    out.push(Feature {
                        keypoint,
                        descriptor: descriptor(src, pt, angle, scl),
                    });
                }
            }
        }
    }

    /// Sub-pixel, sub-scale refinement with contrast and edge rejection.
    ///
    /// Returns the keypoint, the layer it settled in, its integer position in that
    /// octave and its scale relative to the octave.
    fn refine(
        &self,
        dog: &[Plane],
        octave: usize,
        mut layer: usize,
        mut x: usize,
        mut y: usize,
    ) -> Option<(Keypoint, usize, usize, usize, f32)> {
        let n_layers = self.config.n_octave_layers;
        let (w, h) = (dog[0].width, dog[0].height);
        let mut offset = [0f32; 3];
        let mut grad = [0f32; 3];
        let mut converged = false;

        for _ in 0..MAX_INTERP_STEPS {
            let (prev, curr, next) = (&dog[layer - 1], &dog[layer], &dog[layer + 1]);
            let v2 = curr.at(x, y) * 2.;
            grad = [
                (curr.at(x + 1, y) - curr.at(x - 1, y)) * 0.5,
                (curr.at(x, y + 1) - curr.at(x, y - 1)) * 0.5,
                (next.at(x, y) - prev.at(x, y)) * 0.5,
            ];
            let dxx = curr.at(x + 1, y) + curr.at(x - 1, y) - v2;
            let dyy = curr.at(x, y + 1) + curr.at(x, y - 1) - v2;
            let dss = next.at(x, y) + prev.at(x, y) - v2;
            let dxy = (curr.at(x + 1, y + 1) - curr.at(x - 1, y + 1) - curr.at(x + 1, y - 1)
                + curr.at(x - 1, y - 1))
                * 0.25;
            let dxs = (next.at(x + 1, y) - next.at(x - 1, y) - prev.at(x + 1, y)
                + prev.at(x - 1, y))
                * 0.25;
            let dys = (next.at(x, y + 1) - next.at(x, y - 1) - prev.at(x, y + 1)
                + prev.at(x, y - 1))
                * 0.25;
            let hess = [[dxx, dxy, dxs], [dxy, dyy, dys], [dxs, dys, dss]];
            let sol = solve3(hess, grad)?;
            offset = [-sol[0], -sol[1], -sol[2]];

            if offset.iter().all(|o| o.abs() < 0.5) {
                converged = true;
                break;
            }
            if offset.iter().any(|o| !o.is_finite() || o.abs() > (w.max(h) as f32)) {
                return None;
            }

            let nx = x as isize + offset[0].round() as isize;
            let ny = y as isize + offset[1].round() as isize;
            let nl = layer as isize + offset[2].round() as isize;
            if nl < 1
                || nl > n_layers as isize
                || nx < IMG_BORDER as isize
                || nx >= (w - IMG_BORDER) as isize
                || ny < IMG_BORDER as isize
                || ny >= (h - IMG_BORDER) as isize
            {
                return None;
            }
            x = nx as usize;
            y = ny as usize;
            layer = nl as usize;
        }
        if !converged {
            return None;
        }

        let curr = &dog[layer];
        let t: f32 = grad.iter().zip(&offset).map(|(g, o)| g * o).sum();
        let contrast = curr.at(x, y) + t * 0.5;
        if contrast.abs() * (n_layers as f32) < self.config.contrast_threshold {
            return None;
        }

        let v2 = curr.at(x, y) * 2.;
        let dxx = curr.at(x + 1, y) + curr.at(x - 1, y) - v2;
        let dyy = curr.at(x, y + 1) + curr.at(x, y - 1) - v2;
        let dxy = (curr.at(x + 1, y + 1) - curr.at(x - 1, y + 1) - curr.at(x + 1, y - 1)
            + curr.at(x - 1, y - 1))
            * 0.25;
        let tr = dxx + dyy;
        let det = dxx * dyy - dxy * dxy;
        let edge = self.config.edge_threshold;
        if det <= 0. || tr * tr * edge >= (edge + 1.) * (edge + 1.) * det {
            return None;
        }

        let scale = (1 << octave) as f32;
        let scl_octv =
            self.config.sigma * 2f32.powf((layer as f32 + offset[2]) / n_layers as f32);
        let kp = Keypoint {
            x: (x as f32 + offset[0]) * scale,
            y: (y as f32 + offset[1]) * scale,
            size: scl_octv * scale * 2.,
            angle: 0.,
            response: contrast.abs(),
            octave,
        };
        Some((kp, layer, x, y, scl_octv))
    }
}

fn is_extremum(dog: &[Plane], layer: usize, x: usize, y: usize, val: f32) -> bool {
    let maximum = val > 0.;
    for plane in &dog[layer - 1..=layer + 1] {
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                let n = plane.at(nx, ny);
                if (maximum && n > val) || (!maximum && n < val) {
                    return false;
                }
            }
        }
    }
    true
}

/// Solve a 3x3 linear system with Cramer's rule. `None` when singular.
fn solve3(a: [[f32; 3]; 3], b: [f32; 3]) -> Option<[f32; 3]> {
    let det3 = |m: [[f32; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };
    let det = det3(a);
    if det.abs() < f32::EPSILON {
        return None;
    }
    let mut out = [0f32; 3];
    for (col, o) in out.iter_mut().enumerate() {
        let mut m = a;
        for row in 0..3 {
            m[row][col] = b[row];
        }
        *o = det3(m) / det;
    }
    Some(out)
}

/// Pixel gradient as (dx, dy) with y pointing up, as in Lowe's formulation.
#[inline]
fn gradient(img: &Plane, x: usize, y: usize) -> (f32, f32) {
    (
        img.at(x + 1, y) - img.at(x - 1, y),
        img.at(x, y - 1) - img.at(x, y + 1),
    )
}

#[inline]
fn degrees(dy: f32, dx: f32) -> f32 {
    let a = dy.atan2(dx).to_degrees();
    if a < 0. {
        a + 360.
    } else {
        a
    }
}

/// Dominant gradient orientations around a keypoint. Every histogram peak within
/// 80% of the highest one yields an orientation.
fn orientations(img: &Plane, x: usize, y: usize, scl: f32) -> SmallVec<[f32; 4]> {
    let n = ORI_HIST_BINS;
    let radius = (ORI_RADIUS * scl).round() as isize;
    let sigma = ORI_SIG_FCTR * scl;
    let exp_scale = -1. / (2. * sigma * sigma);
    let mut raw = [0f32; ORI_HIST_BINS];

    for i in -radius..=radius {
        let yy = y as isize + i;
        if yy <= 0 || yy >= img.height as isize - 1 {
            continue;
        }
        for j in -radius..=radius {
            let xx = x as isize + j;
            if xx <= 0 || xx >= img.width as isize - 1 {
                continue;
            }
            let (dx, dy) = gradient(img, xx as usize, yy as usize);
            let w = (((i * i + j * j) as f32) * exp_scale).exp();
            let bin = ((n as f32 / 360.) * degrees(dy, dx)).round() as usize % n;
            raw[bin] += w * (dx * dx + dy * dy).sqrt();
        }
    }

    let mut hist = [0f32; ORI_HIST_BINS];
    for (i, h) in hist.iter_mut().enumerate() {
        let at = |off: isize| raw[(i as isize + off).rem_euclid(n as isize) as usize];
        *h = (at(-2) + at(2)) * (1. / 16.) + (at(-1) + at(1)) * (4. / 16.) + at(0) * (6. / 16.);
    }

    let max = hist.iter().cloned().fold(0f32, f32::max);
    let threshold = max * ORI_PEAK_RATIO;
    let mut out = SmallVec::new();
    if max <= 0. {
        return out;
    }
    for j in 0..n {
        let l = hist[(j + n - 1) % n];
        let r = hist[(j + 1) % n];
        let c = hist[j];
        if c > l && c > r && c >= threshold {
            let mut bin = j as f32 + 0.5 * (l - r) / (l - 2. * c + r);
            if bin < 0. {
                bin += n as f32;
            } else if bin >= n as f32 {
                bin -= n as f32;
            }
            let mut angle = 360. - (360. / n as f32) * bin;
            if (angle - 360.).abs() < f32::EPSILON {
                angle = 0.;
            }
            out.push(angle);
        }
    }
    out
}

/// 4x4 spatial grid of 8-bin orientation histograms, rotated to the keypoint
/// orientation, trilinearly interpolated, clipped at 0.2 and scaled to 0..=255.
fn descriptor(img: &Plane, pt: (f32, f32), angle: f32, scl: f32) -> Desc {
    let d = DESCR_WIDTH;
    let n = DESCR_HIST_BINS;
    let (px, py) = (pt.0.round() as isize, pt.1.round() as isize);
    let mut ori = 360. - angle;
    if (ori - 360.).abs() < f32::EPSILON {
        ori = 0.;
    }
    let hist_width = DESCR_SCL_FCTR * scl;
    let diag = ((img.width * img.width + img.height * img.height) as f32).sqrt();
    let radius = (hist_width * std::f32::consts::SQRT_2 * (d as f32 + 1.) * 0.5)
        .round()
        .min(diag) as isize;
    let (sin_t, cos_t) = ori.to_radians().sin_cos();
    let (sin_t, cos_t) = (sin_t / hist_width, cos_t / hist_width);
    let bins_per_deg = n as f32 / 360.;
    let exp_scale = -1. / (d as f32 * d as f32 * 0.5);

    let mut hist = vec![0f32; (d + 2) * (d + 2) * (n + 2)];
    for i in -radius..=radius {
        for j in -radius..=radius {
            let c_rot = j as f32 * cos_t - i as f32 * sin_t;
            let r_rot = j as f32 * sin_t + i as f32 * cos_t;
            let rbin = r_rot + d as f32 / 2. - 0.5;
            let cbin = c_rot + d as f32 / 2. - 0.5;
            let (r, c) = (py + i, px + j);
            if rbin <= -1.
                || rbin >= d as f32
                || cbin <= -1.
                || cbin >= d as f32
                || r <= 0
                || r >= img.height as isize - 1
                || c <= 0
                || c >= img.width as isize - 1
            {
                continue;
            }
            let (dx, dy) = gradient(img, c as usize, r as usize);
            let weight = ((c_rot * c_rot + r_rot * r_rot) * exp_scale).exp();
            let mag = (dx * dx + dy * dy).sqrt() * weight;
            let obin = (degrees(dy, dx) - ori) * bins_per_deg;

            let (r0, c0, o0) = (rbin.floor(), cbin.floor(), obin.floor());
            let (rf, cf, of) = (rbin - r0, cbin - c0, obin - o0);
            let mut o0 = o0 as isize;
            if o0 < 0 {
                o0 += n as isize;
            }
            if o0 >= n as isize {
                o0 -= n as isize;
            }

            let v_r1 = mag * rf;
            let v_r0 = mag - v_r1;
            let v_rc11 = v_r1 * cf;
            let v_rc10 = v_r1 - v_rc11;
            let v_rc01 = v_r0 * cf;
            let v_rc00 = v_r0 - v_rc01;

            let idx = (((r0 as isize + 1) * (d as isize + 2) + c0 as isize + 1)
                * (n as isize + 2)
                + o0) as usize;
            let row = (d + 2) * (n + 2);
            for (base, v) in [
                (idx, v_rc00),
                (idx + n + 2, v_rc01),
                (idx + row, v_rc10),
                (idx + row + n + 2, v_rc11),
            ] {
                let v1 = v * of;
                hist[base] += v - v1;
                hist[base + 1] += v1;
            }
        }
    }

    let mut out = [0f32; DESC_LEN];
    for i in 0..d {
        for j in 0..d {
            let idx = ((i + 1) * (d + 2) + (j + 1)) * (n + 2);
            hist[idx] += hist[idx + n];
            hist[idx + 1] += hist[idx + n + 1];
            for k in 0..n {
                out[(i * d + j) * n + k] = hist[idx + k];
            }
        }
    }

    let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    let thr = norm * DESCR_MAG_THR;
    for v in out.iter_mut() {
        *v = v.min(thr);
    }
    let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    let scale = DESCR_INT_FCTR / norm.max(f32::EPSILON);
    for v in out.iter_mut() {
        *v = (*v * scale).min(255.);
    }
    out
}

/// Single channel f32 image with intensities in [0, 1].
#[derive(Clone)]
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_gray(img: &GrayImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.as_raw().iter().map(|&p| p as f32 / 255.).collect(),
        }
    }

    #[inline]
    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    fn sub(&self, other: &Plane) -> Plane {
        Plane {
            width: self.width,
            height: self.height,
            data: self.data.iter().zip(&other.data).map(|(a, b)| a - b).collect(),
        }
    }

    /// Keep every other pixel in both directions.
    fn downsample(&self) -> Plane {
        let (w, h) = ((self.width / 2).max(1), (self.height / 2).max(1));
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                data.push(self.at(x * 2, y * 2));
            }
        }
        Plane {
            width: w,
            height: h,
            data,
        }
    }

    /// Bilinear 2x enlargement with pixel centers aligned.
    fn upsample(&self) -> Plane {
        let (w, h) = (self.width * 2, self.height * 2);
        let (max_x, max_y) = ((self.width - 1) as f32, (self.height - 1) as f32);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            let sy = ((y as f32 + 0.5) * 0.5 - 0.5).clamp(0., max_y);
            let (y0, fy) = (sy.floor() as usize, sy.fract());
            let y1 = (y0 + 1).min(self.height - 1);
            for x in 0..w {
                let sx = ((x as f32 + 0.5) * 0.5 - 0.5).clamp(0., max_x);
                let (x0, fx) = (sx.floor() as usize, sx.fract());
                let x1 = (x0 + 1).min(self.width - 1);
                let top = self.at(x0, y0) * (1. - fx) + self.at(x1, y0) * fx;
                let bottom = self.at(x0, y1) * (1. - fx) + self.at(x1, y1) * fx;
                data.push(top * (1. - fy) + bottom * fy);
            }
        }
        Plane {
            width: w,
            height: h,
            data,
        }
    }

    /// Separable Gaussian blur, edge pixels replicated.
    fn blur(&self, sigma: f32) -> Plane {
        let kernel = gaussian_kernel(sigma);
        let half = (kernel.len() / 2) as isize;
        let (w, h) = (self.width as isize, self.height as isize);

        let mut tmp = vec![0f32; self.data.len()];
        for y in 0..h {
            let row = &self.data[(y * w) as usize..((y + 1) * w) as usize];
            for x in 0..w {
                let mut acc = 0.;
                for (ki, kv) in kernel.iter().enumerate() {
                    let sx = (x + ki as isize - half).clamp(0, w - 1);
                    acc += row[sx as usize] * kv;
                }
                tmp[(y * w + x) as usize] = acc;
            }
        }

        let mut data = vec![0f32; self.data.len()];
        for y in 0..h {
            for x in 0..w {
                let mut acc = 0.;
                for (ki, kv) in kernel.iter().enumerate() {
                    let sy = (y + ki as isize - half).clamp(0, h - 1);
                    acc += tmp[(sy * w + x) as usize] * kv;
                }
                data[(y * w + x) as usize] = acc;
            }
        }
        Plane {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let half = (3. * sigma).ceil().max(1.) as isize;
    let denom = 2. * sigma * sigma;
    let mut kernel: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Dark background with bright gaussian blobs of a few different radii.
    fn blobs() -> GrayImage {
        let centers = [(30., 30., 4.), (90., 35., 6.), (40., 95., 5.), (95., 95., 3.)];
        GrayImage::from_fn(128, 128, |x, y| {
            let v: f32 = centers
                .iter()
                .map(|&(cx, cy, r): &(f32, f32, f32)| {
                    let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
                    (-d2 / (2. * r * r)).exp()
                })
                .sum();
            Luma([(20. + 220. * v.min(1.)) as u8])
        })
    }

    #[test]
    fn flat_image_has_no_keypoints() {
        let img = GrayImage::from_pixel(96, 96, Luma([128]));
        assert!(Sift::default().features(&img).is_empty());
        assert!(Sift::default().detect_and_compute(&img).is_empty());
    }

    #[test]
    fn tiny_image_has_no_keypoints() {
        let img = GrayImage::from_pixel(8, 8, Luma([0]));
        assert!(Sift::default().features(&img).is_empty());
    }

    #[test]
    fn blobs_are_detected() {
        let features = Sift::default().features(&blobs());
        assert!(!features.is_empty());
        for f in &features {
            assert!(f.keypoint.x >= 0. && f.keypoint.x < 128.);
            assert!(f.keypoint.y >= 0. && f.keypoint.y < 128.);
            assert!(f.keypoint.angle >= 0. && f.keypoint.angle < 360.);
            assert!(f.descriptor.iter().all(|v| v.is_finite() && *v >= 0. && *v <= 255.));
        }
    }

    #[test]
    fn descriptor_rows_are_full_width() {
        let rows = Sift::default().detect_and_compute(&blobs());
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r.len() == DESC_LEN));
    }

    #[test]
    fn detection_is_deterministic() {
        let sift = Sift::default();
        let a = sift.detect_and_compute(&blobs());
        let b = sift.detect_and_compute(&blobs());
        assert_eq!(a, b);
    }

    #[test]
    fn max_features_truncates_by_response() {
        let all = Sift::default().features(&blobs());
        let capped = Sift::new(SiftConfig {
            max_features: Some(1),
            ..Default::default()
        })
        .features(&blobs());
        assert_eq!(capped.len(), 1);
        let best = all
            .iter()
            .map(|f| f.keypoint.response)
            .fold(0f32, f32::max);
        assert_eq!(capped[0].keypoint.response, best);
    }

    #[test]
    fn upsampling_finds_more_keypoints() {
        use image::imageops::{resize, FilterType};
        let img = resize(&blobs(), 64, 64, FilterType::Triangle);
        let plain = Sift::new(SiftConfig {
            upsample: false,
            ..Default::default()
        })
        .features(&img);
        let doubled = Sift::default().features(&img);
        assert!(!doubled.is_empty());
        assert!(doubled.len() >= plain.len());
        for f in &doubled {
            assert!(f.keypoint.x >= 0. && f.keypoint.x < 64.);
            assert!(f.keypoint.y >= 0. && f.keypoint.y < 64.);
        }
    }

    #[test]
    fn upsample_doubles_and_interpolates() {
        let p = Plane {
            width: 2,
            height: 1,
            data: vec![0., 1.],
        };
        let up = p.upsample();
        assert_eq!((up.width, up.height), (4, 2));
        assert_eq!(&up.data[..4], &[0f32, 0.25, 0.75, 1.]);
        assert_eq!(&up.data[..4], &up.data[4..]);
    }

    #[test]
    fn solve3_identity() {
        let id = [[1., 0., 0.], [0., 1., 0.], [0., 0., 1.]];
        assert_eq!(solve3(id, [1., 2., 3.]), Some([1., 2., 3.]));
        assert_eq!(solve3([[0.; 3]; 3], [1., 2., 3.]), None);
    }

    #[test]
    fn kernel_is_normalized() {
        let k = gaussian_kernel(1.6);
        assert_eq!(k.len() % 2, 1);
        assert!((k.iter().sum::<f32>() - 1.).abs() < 1e-5);
    }
}
