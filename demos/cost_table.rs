extern crate image;
extern crate sgm_mi_rs as sm;

use image::{GrayImage, Luma};
use sm::StereoMutualInformation;

pub fn main() {
    // Synthetic rectified pair: the right view is the left shifted by a
    // constant disparity and darkened by 30%, the situation MI handles and
    // plain photometric costs do not.
    let width = 320u32;
    let height = 240u32;
    let disp = 8u8;
    let invalid = 255u8;

    let left = GrayImage::from_fn(width, height, |x, y| {
        Luma([(((x / 3 + y / 5) * 7) % 256) as u8])
    });
    let right = GrayImage::from_fn(width, height, |x, y| {
        let sx = (x + disp as u32).min(width - 1);
        let Luma(v) = *left.get_pixel(sx, y);
        Luma([(v[0] as f32 * 0.7) as u8])
    });
    // pixels whose correspondence would leave the image are marked invalid
    let disparity = GrayImage::from_fn(width, height, |x, _| {
        if x < disp as u32 {
            Luma([invalid])
        } else {
            Luma([disp])
        }
    });

    let mut mi = StereoMutualInformation::new();
    mi.configure_smoothing(3);
    mi.process(&left, &right, 0, &disparity, invalid).unwrap();
    mi.precompute_scaled_cost(2047);

    for &v in &[32u32, 96, 160, 224] {
        let matched = mi.cost(v, (v as f32 * 0.7) as u32);
        let mismatched = mi.cost(v, (v + 128) % 256);
        println!(
            "left {:3}: cost darkened match {:9.6}  cost mismatch {:9.6}",
            v, matched, mismatched
        );
    }
    println!("scaled cost at (100, 70) = {}", mi.cost_scaled(100, 70));
}
