extern crate ndarray;

use ndarray::{Array1, Array2};

/// Normalized 1D kernel applied separably to smooth probability surfaces.
///
/// The weights sum to 1. Near a border each output is divided by the
/// in-bounds weight mass, so a flat signal stays flat and values supported
/// away from the borders keep their total mass; within a kernel radius of
/// an edge the mass is re-weighted, not conserved. Iterated convolution
/// with this kernel acts as a Parzen window density estimate over a
/// histogram.
#[derive(Debug, Clone)]
pub struct SmoothingKernel {
    radius: usize,
    weights: Vec<f32>,
}

impl SmoothingKernel {
    /// Gaussian kernel with sigma chosen so the support covers about three
    /// standard deviations. A radius of 3 is recommended in Hirschmuller's
    /// paper.
    pub fn gaussian(radius: usize) -> Self {
        let len = 2 * radius + 1;
        let sigma = len as f32 / 6.0;
        let mut weights = vec![0.0f32; len];
        for (i, w) in weights.iter_mut().enumerate() {
            let x = i as f32 - radius as f32;
            *w = (-(x * x) / (2.0 * sigma * sigma)).exp();
        }
        let total: f32 = weights.iter().sum();
        for w in &mut weights {
            *w /= total;
        }
        SmoothingKernel { radius, weights }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Convolves a single line, renormalizing at the borders.
    fn convolve_line(&self, src: &[f32], dst: &mut [f32]) {
        let n = src.len() as isize;
        let r = self.radius as isize;
        for i in 0..n {
            let mut acc = 0.0f32;
            let mut mass = 0.0f32;
            for k in -r..=r {
                let j = i + k;
                if j < 0 || j >= n {
                    continue;
                }
                let w = self.weights[(k + r) as usize];
                acc += w * src[j as usize];
                mass += w;
            }
            dst[i as usize] = acc / mass;
        }
    }

    /// 1D smoothing for marginal distributions.
    pub fn smooth_1d(&self, src: &Array1<f32>, dst: &mut Array1<f32>) {
        self.convolve_line(
            src.as_slice().unwrap(),
            dst.as_slice_mut().unwrap(),
        );
    }

    /// Convolves every row of a 2D surface (horizontal pass).
    pub fn smooth_rows(&self, src: &Array2<f32>, dst: &mut Array2<f32>) {
        for (s, mut d) in src.outer_iter().zip(dst.outer_iter_mut()) {
            self.convolve_line(s.as_slice().unwrap(), d.as_slice_mut().unwrap());
        }
    }

    /// Convolves every column of a 2D surface (vertical pass).
    pub fn smooth_cols(&self, src: &Array2<f32>, dst: &mut Array2<f32>) {
        let (rows, cols) = src.dim();
        let n = rows as isize;
        let r = self.radius as isize;
        for col in 0..cols {
            for row in 0..n {
                let mut acc = 0.0f32;
                let mut mass = 0.0f32;
                for k in -r..=r {
                    let j = row + k;
                    if j < 0 || j >= n {
                        continue;
                    }
                    let w = self.weights[(k + r) as usize];
                    acc += w * src[(j as usize, col)];
                    mass += w;
                }
                dst[(row as usize, col)] = acc / mass;
            }
        }
    }
}
