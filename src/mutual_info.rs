extern crate image;
extern crate ndarray;

use image::{GrayImage, ImageBuffer, Luma, Primitive};
use log::{debug, trace};
use ndarray::{Array1, Array2};
use rand::Rng;

use crate::error::{MutualInfoError, Result};
use crate::kernel::SmoothingKernel;

/// Mutual information matching cost for a rectified stereo pair.
///
/// Mutual information between two images is `MI(L,R) = H(L) + H(R) - H(L,R)`
/// where `H` is an entropy term estimated from the intensities at
/// corresponding pixels, so the cost adapts to illumination and exposure
/// differences between the cameras instead of assuming equal brightness the
/// way SAD/SSD do. The entropy terms are computed with the smoothed
/// histogram formulation of [1] (Eq. 5), which amounts to a Parzen density
/// estimate by iterated convolution.
///
/// Inputs with more than 8 bits per pixel are supported by scaling
/// intensities into a reduced histogram domain; without that a 12-bit image
/// would need a 4096x4096 joint table and a very flat PDF.
///
/// Typical usage: call [`process`](Self::process) once per stereo pair with
/// a prior disparity map, then query [`cost`](Self::cost) or precompute and
/// query [`cost_scaled`](Self::cost_scaled) from the aggregation loop.
/// Queries take `&self`, so a finished model can be read from many worker
/// threads at once.
///
/// [1] Hirschmuller, Heiko. "Stereo processing by semiglobal matching and
/// mutual information." IEEE TPAMI 30.2 (2007): 328-341.
pub struct StereoMutualInformation {
    smooth_kernel: SmoothingKernel,
    // scratch for the separable convolutions, sized with the tables
    smooth_work: Array2<f32>,
    smooth_line: Array1<f32>,

    // floor substituted for zero probabilities ahead of the log
    eps: f32,

    max_pixel_value: u32,
    max_histogram_value: u32,

    // number of correspondences with a valid disparity in the last process
    total_pairs: f32,

    hist_joint: Array2<u32>,

    prob_joint: Array2<f32>,
    prob_left: Array1<f32>,
    prob_right: Array1<f32>,

    entropy_joint: Array2<f32>,
    entropy_left: Array1<f32>,
    entropy_right: Array1<f32>,

    scaled_cost: Array2<u16>,
}

impl Default for StereoMutualInformation {
    fn default() -> Self {
        StereoMutualInformation::new()
    }
}

impl StereoMutualInformation {
    /// Estimator configured for 8-bit imagery with light smoothing.
    pub fn new() -> Self {
        let bins = 256;
        StereoMutualInformation {
            smooth_kernel: SmoothingKernel::gaussian(1),
            smooth_work: Array2::zeros((bins, bins)),
            smooth_line: Array1::zeros(bins),
            eps: f32::EPSILON,
            max_pixel_value: 255,
            max_histogram_value: 255,
            total_pairs: 0.0,
            hist_joint: Array2::zeros((bins, bins)),
            prob_joint: Array2::zeros((bins, bins)),
            prob_left: Array1::zeros(bins),
            prob_right: Array1::zeros(bins),
            entropy_joint: Array2::zeros((bins, bins)),
            entropy_left: Array1::zeros(bins),
            entropy_right: Array1::zeros(bins),
            scaled_cost: Array2::zeros((bins, bins)),
        }
    }

    /// Configures the histogram and how input intensities are scaled into
    /// it. For an 8-bit input just pass 255 for both values.
    ///
    /// All internal tables are reallocated here, never inside `process`.
    /// Memory and the exhaustive precompute grow quadratically with
    /// `max_histogram_value`, so keep it bounded.
    pub fn configure_histogram(
        &mut self,
        max_pixel_value: u32,
        max_histogram_value: u32,
    ) -> Result<()> {
        if max_histogram_value > max_pixel_value {
            return Err(MutualInfoError::HistogramExceedsPixelRange {
                max_pixel_value,
                max_histogram_value,
            });
        }
        self.max_pixel_value = max_pixel_value;
        self.max_histogram_value = max_histogram_value;
        let bins = max_histogram_value as usize + 1;

        self.hist_joint = Array2::zeros((bins, bins));
        self.prob_joint = Array2::zeros((bins, bins));
        self.entropy_joint = Array2::zeros((bins, bins));
        self.smooth_work = Array2::zeros((bins, bins));
        self.scaled_cost = Array2::zeros((bins, bins));
        self.prob_left = Array1::zeros(bins);
        self.prob_right = Array1::zeros(bins);
        self.entropy_left = Array1::zeros(bins);
        self.entropy_right = Array1::zeros(bins);
        self.smooth_line = Array1::zeros(bins);
        Ok(())
    }

    /// Amount of smoothing applied to the probability surfaces.
    /// A radius of 3 is recommended in the paper.
    pub fn configure_smoothing(&mut self, radius: usize) {
        self.smooth_kernel = SmoothingKernel::gaussian(radius);
    }

    /// Trains the entropy tables from a stereo pair and a prior disparity
    /// map aligned with `left`. Pixels whose disparity equals `invalid` are
    /// skipped; for the rest the effective disparity is
    /// `disparity(x,y) + min_disparity`.
    ///
    /// The caller must guarantee that every valid disparity keeps `x - d`
    /// inside the right image; the inner loop does not bounds check.
    /// At least one valid correspondence is required, otherwise
    /// [`MutualInfoError::NoValidCorrespondences`] is returned and the
    /// entropy tables keep whatever the previous pass produced.
    pub fn process<T>(
        &mut self,
        left: &ImageBuffer<Luma<T>, Vec<T>>,
        right: &ImageBuffer<Luma<T>, Vec<T>>,
        min_disparity: i32,
        disparity: &GrayImage,
        invalid: u8,
    ) -> Result<()>
    where
        T: Primitive + Into<u32> + 'static,
    {
        if left.dimensions() != right.dimensions() || left.dimensions() != disparity.dimensions()
        {
            return Err(MutualInfoError::ShapeMismatch {
                left: left.dimensions(),
                right: right.dimensions(),
                disparity: disparity.dimensions(),
            });
        }

        self.compute_joint_histogram(left, right, min_disparity, disparity, invalid);
        self.compute_probabilities()?;
        self.compute_entropy(self.eps);
        Ok(())
    }

    /// Mutual information cost of matching a left pixel of intensity
    /// `left_value` with a right pixel of intensity `right_value`. Lower is
    /// a better match. [`process`](Self::process) must have completed at
    /// least once, otherwise the entropy tables are still zeroed and the
    /// result is meaningless.
    pub fn cost(&self, left_value: u32, right_value: u32) -> f32 {
        let l = self.scale_pixel_value(left_value);
        let r = self.scale_pixel_value(right_value);
        // Equations 8b and 9a
        -(self.entropy_left[l] + self.entropy_right[r] - self.entropy_joint[(l, r)])
    }

    /// Fixed-point cost lookup for the aggregation inner loop. Both values
    /// are expected to already be in the histogram domain; no rescaling
    /// happens here. Requires [`precompute_scaled_cost`](Self::precompute_scaled_cost).
    pub fn cost_scaled(&self, left_value: u32, right_value: u32) -> u16 {
        self.scaled_cost[(left_value as usize, right_value as usize)]
    }

    /// Joint histogram of scaled pixel intensities, skipping pixels with no
    /// correspondence.
    fn compute_joint_histogram<T>(
        &mut self,
        left: &ImageBuffer<Luma<T>, Vec<T>>,
        right: &ImageBuffer<Luma<T>, Vec<T>>,
        min_disparity: i32,
        disparity: &GrayImage,
        invalid: u8,
    ) where
        T: Primitive + Into<u32> + 'static,
    {
        self.hist_joint.fill(0);

        for (x, y, pixel) in disparity.enumerate_pixels() {
            let Luma(dval) = *pixel;
            if dval[0] == invalid {
                continue;
            }
            let d = dval[0] as i32 + min_disparity;

            // NOTE: the paper says to take care that occlusions don't map two
            // left pixels onto one right pixel. Nothing is done about that
            // here, occluded regions double count.

            debug_assert!(
                d >= 0 && d <= x as i32,
                "valid disparity leaves the right image at ({},{})",
                x,
                y
            );
            let Luma(lval) = *left.get_pixel(x, y); // I(x,y)
            let Luma(rval) = *right.get_pixel((x as i32 - d) as u32, y); // I(x-d,y)

            let l = self.scale_pixel_value(lval[0].into());
            let r = self.scale_pixel_value(rval[0].into());
            self.hist_joint[(l, r)] += 1;
        }
    }

    /// Joint and per-image probabilities from the joint histogram. The
    /// marginals are row and column sums of the joint PMF, taken in the
    /// same pass, so the three distributions always agree.
    fn compute_probabilities(&mut self) -> Result<()> {
        let total: u64 = self.hist_joint.iter().map(|&c| u64::from(c)).sum();
        if total == 0 {
            return Err(MutualInfoError::NoValidCorrespondences);
        }
        debug!(
            "StereoMutualInformation::process {} valid correspondences",
            total
        );
        self.total_pairs = total as f32;

        let norm = total as f32;
        let bins = self.hist_joint.nrows();
        self.prob_right.fill(0.0);
        for row in 0..bins {
            let mut row_sum = 0.0f32;
            for col in 0..bins {
                let p = self.hist_joint[(row, col)] as f32 / norm;
                self.prob_joint[(row, col)] = p;
                row_sum += p;
                self.prob_right[col] += p;
            }
            self.prob_left[row] = row_sum;
        }
        Ok(())
    }

    /// Entropy terms from the probabilities, Eq. 5 of the paper:
    /// `H = -(1/n) * G * log(G * P)` with `G` the smoothing kernel.
    ///
    /// Zero probabilities are replaced by `eps` before the log, they are
    /// not shifted by it. That floor is a documented approximation, it
    /// biases empty bins instead of poisoning everything with `-inf`.
    fn compute_entropy(&mut self, eps: f32) {
        let n = self.total_pairs;

        self.smooth_kernel
            .smooth_rows(&self.prob_joint, &mut self.smooth_work);
        self.smooth_kernel
            .smooth_cols(&self.smooth_work, &mut self.entropy_joint);
        self.entropy_joint.mapv_inplace(|v| v.max(eps).ln());
        self.smooth_kernel
            .smooth_rows(&self.entropy_joint, &mut self.smooth_work);
        self.smooth_kernel
            .smooth_cols(&self.smooth_work, &mut self.entropy_joint);
        self.entropy_joint.mapv_inplace(|v| v / -n);

        // the marginals run the same pipeline in 1D
        self.smooth_kernel
            .smooth_1d(&self.prob_left, &mut self.smooth_line);
        self.smooth_line.mapv_inplace(|v| v.max(eps).ln());
        self.smooth_kernel
            .smooth_1d(&self.smooth_line, &mut self.entropy_left);
        self.entropy_left.mapv_inplace(|v| v / -n);

        self.smooth_kernel
            .smooth_1d(&self.prob_right, &mut self.smooth_line);
        self.smooth_line.mapv_inplace(|v| v.max(eps).ln());
        self.smooth_kernel
            .smooth_1d(&self.smooth_line, &mut self.entropy_right);
        self.entropy_right.mapv_inplace(|v| v / -n);
    }

    /// Precomputes the cost over the whole histogram domain, rescaled to
    /// `[0, max_cost]` inclusive. The minimum float cost maps to 0 and the
    /// maximum to `max_cost`; a perfectly uniform cost surface maps every
    /// cell to `max_cost / 2` rather than dividing by zero.
    pub fn precompute_scaled_cost(&mut self, max_cost: u16) {
        let bins = self.max_histogram_value as usize + 1;

        let mut min_value = f32::MAX;
        let mut max_value = f32::MIN;
        for left in 0..bins {
            for right in 0..bins {
                let v = -(self.entropy_left[left] + self.entropy_right[right]
                    - self.entropy_joint[(left, right)]);
                if v < min_value {
                    min_value = v;
                }
                if v > max_value {
                    max_value = v;
                }
            }
        }
        let range = max_value - min_value;
        trace!(
            "StereoMutualInformation::precompute_scaled_cost range [{}, {}]",
            min_value,
            max_value
        );

        for left in 0..bins {
            for right in 0..bins {
                self.scaled_cost[(left, right)] = if range > 0.0 {
                    let v = -(self.entropy_left[left] + self.entropy_right[right]
                        - self.entropy_joint[(left, right)]);
                    (max_cost as f32 * (v - min_value) / range).round() as u16
                } else {
                    max_cost / 2
                };
            }
        }
    }

    /// Fills the scaled cost table with random values in `[0, max_cost)`.
    /// A test seam for exercising aggregation code without imagery, not
    /// something to call in production.
    pub fn random_histogram<R: Rng>(&mut self, rng: &mut R, max_cost: u16) {
        for cell in self.scaled_cost.iter_mut() {
            *cell = rng.gen_range(0..max_cost);
        }
    }

    /// Scales a raw pixel intensity into the histogram domain.
    fn scale_pixel_value(&self, value: u32) -> usize {
        self.max_histogram_value as usize * value as usize / self.max_pixel_value as usize
    }

    /// The numerical floor substituted for zero probabilities ahead of the
    /// log. Defaults to `f32::EPSILON`.
    pub fn eps(&self) -> f32 {
        self.eps
    }

    /// Overrides the numerical floor used by the next `process` call.
    /// Must be strictly positive.
    pub fn set_eps(&mut self, eps: f32) {
        self.eps = eps;
    }

    pub fn max_pixel_value(&self) -> u32 {
        self.max_pixel_value
    }

    pub fn max_histogram_value(&self) -> u32 {
        self.max_histogram_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // every row walks through all 256 intensities
    fn ramp_image(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, _| Luma([(x % 256) as u8]))
    }

    fn zero_disparity(width: u32, height: u32) -> GrayImage {
        GrayImage::new(width, height)
    }

    fn trained_on_identical_pair() -> StereoMutualInformation {
        let left = ramp_image(256, 8);
        let right = ramp_image(256, 8);
        let disparity = zero_disparity(256, 8);
        let mut mi = StereoMutualInformation::new();
        mi.configure_smoothing(3);
        mi.process(&left, &right, 0, &disparity, 255).unwrap();
        mi
    }

    #[test]
    fn joint_probability_sums_to_one() {
        let mi = trained_on_identical_pair();
        let sum: f32 = mi.prob_joint.sum();
        assert!((sum - 1.0).abs() < 1e-5, "sum was {}", sum);
    }

    #[test]
    fn marginals_match_an_independent_histogram_pass() {
        let left = ramp_image(256, 8);
        let right = ramp_image(256, 8);
        let disparity = zero_disparity(256, 8);
        let mut mi = StereoMutualInformation::new();
        mi.process(&left, &right, 0, &disparity, 255).unwrap();

        let mut counts = vec![0u32; 256];
        let mut total = 0u32;
        for (_, _, p) in left.enumerate_pixels() {
            let Luma(v) = *p;
            counts[v[0] as usize] += 1;
            total += 1;
        }
        for (bin, &count) in counts.iter().enumerate() {
            let expected = count as f32 / total as f32;
            assert!(
                (mi.prob_left[bin] - expected).abs() < 1e-6,
                "bin {}: {} vs {}",
                bin,
                mi.prob_left[bin],
                expected
            );
        }
    }

    #[test]
    fn cost_queries_are_deterministic() {
        let mi = trained_on_identical_pair();
        let first = mi.cost(10, 200);
        for _ in 0..5 {
            assert_eq!(first.to_bits(), mi.cost(10, 200).to_bits());
        }
    }

    #[test]
    fn uniform_histogram_gives_flat_marginal_entropy() {
        let mut mi = StereoMutualInformation::new();
        mi.configure_smoothing(3);
        mi.hist_joint.fill(1);
        mi.compute_probabilities().unwrap();
        mi.compute_entropy(mi.eps);

        let reference = mi.entropy_left[0];
        for &v in mi.entropy_left.iter() {
            assert!((v - reference).abs() < 1e-7, "{} vs {}", v, reference);
        }
        let reference = mi.entropy_right[0];
        for &v in mi.entropy_right.iter() {
            assert!((v - reference).abs() < 1e-7, "{} vs {}", v, reference);
        }
    }

    #[test]
    fn all_invalid_disparities_are_rejected() {
        let left = ramp_image(64, 16);
        let right = ramp_image(64, 16);
        let invalid = 255u8;
        let disparity = GrayImage::from_pixel(64, 16, Luma([invalid]));
        let mut mi = StereoMutualInformation::new();
        let err = mi.process(&left, &right, 0, &disparity, invalid);
        assert_eq!(err, Err(MutualInfoError::NoValidCorrespondences));
    }

    #[test]
    fn scaled_cost_covers_the_full_output_range() {
        let mut mi = trained_on_identical_pair();
        let max_cost = 100u16;
        mi.precompute_scaled_cost(max_cost);

        let lo = mi.scaled_cost.iter().min().copied().unwrap();
        let hi = mi.scaled_cost.iter().max().copied().unwrap();
        assert_eq!(lo, 0);
        assert_eq!(hi, max_cost);
    }

    #[test]
    fn matching_intensities_cost_less_than_mismatched_ones() {
        let mi = trained_on_identical_pair();
        for &v in &[0u32, 30, 100, 127] {
            assert!(
                mi.cost(v, v) < mi.cost(v, v + 128),
                "v = {}: {} vs {}",
                v,
                mi.cost(v, v),
                mi.cost(v, v + 128)
            );
        }
    }

    #[test]
    fn ten_bit_values_scale_linearly_into_the_histogram() {
        let mut mi = StereoMutualInformation::new();
        mi.configure_histogram(1023, 255).unwrap();
        assert_eq!(mi.scale_pixel_value(0), 0);
        assert_eq!(mi.scale_pixel_value(1023), 255);
        assert_eq!(mi.scale_pixel_value(512), 255 * 512 / 1023);
    }

    #[test]
    fn ten_bit_images_train_the_model() {
        let left: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(1024, 4, |x, _| Luma([x as u16]));
        let right = left.clone();
        let disparity = zero_disparity(1024, 4);
        let mut mi = StereoMutualInformation::new();
        mi.configure_histogram(1023, 255).unwrap();
        mi.process(&left, &right, 0, &disparity, 255).unwrap();
        let sum: f32 = mi.prob_joint.sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn histogram_finer_than_pixels_is_a_configuration_error() {
        let mut mi = StereoMutualInformation::new();
        let err = mi.configure_histogram(255, 1023);
        assert_eq!(
            err,
            Err(MutualInfoError::HistogramExceedsPixelRange {
                max_pixel_value: 255,
                max_histogram_value: 1023,
            })
        );
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let left = ramp_image(64, 16);
        let right = ramp_image(32, 16);
        let disparity = zero_disparity(64, 16);
        let mut mi = StereoMutualInformation::new();
        let err = mi.process(&left, &right, 0, &disparity, 255);
        assert!(matches!(err, Err(MutualInfoError::ShapeMismatch { .. })));
    }

    #[test]
    fn random_histogram_stays_below_max_cost() {
        let mut mi = StereoMutualInformation::new();
        let mut rng = StdRng::seed_from_u64(7);
        mi.random_histogram(&mut rng, 64);
        assert!(mi.scaled_cost.iter().all(|&c| c < 64));
    }
}
