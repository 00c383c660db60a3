//! CPU previews of scenes and line scans

use glam::Vec2;
use image::{Rgb, RgbImage};

use linesplat_core::{build_covariance_2d, covariance_to_conic, evaluate_conic, ScanLine};

use crate::params::SplatParams;

const LINE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// One column per sample, `height` rows tall
pub fn line_strip(colors: &[[f32; 3]], height: u32) -> RgbImage {
    let width = colors.len() as u32;
    RgbImage::from_fn(width, height.max(1), |x, _| {
        let c = colors[x as usize];
        Rgb([to_byte(c[0]), to_byte(c[1]), to_byte(c[2])])
    })
}

/// Place two images next to each other with a black gap
pub fn side_by_side(left: &RgbImage, right: &RgbImage, gap: u32) -> RgbImage {
    let height = left.height().max(right.height());
    let mut out = RgbImage::new(left.width() + gap + right.width(), height);
    for (x, y, p) in left.enumerate_pixels() {
        out.put_pixel(x, y, *p);
    }
    let offset = left.width() + gap;
    for (x, y, p) in right.enumerate_pixels() {
        out.put_pixel(offset + x, y, *p);
    }
    out
}

/// Top-down view of a scene over the square `[min, max]²`
#[derive(Clone, Debug, PartialEq)]
pub struct ScenePreview {
    pub size: u32,
    pub min: f32,
    pub max: f32,
}

impl Default for ScenePreview {
    fn default() -> Self {
        Self {
            size: 256,
            min: -1.0,
            max: 9.0,
        }
    }
}

impl ScenePreview {
    /// Window covering every center of every scene with a margin of three
    /// of the largest scales
    pub fn covering(scenes: &[&SplatParams], size: u32) -> Self {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for params in scenes {
            for (center, scale) in params.centers().into_iter().zip(params.scales()) {
                let margin = 3.0 * scale.max_element();
                min = min.min(center.min_element() - margin);
                max = max.max(center.max_element() + margin);
            }
        }
        if !(min.is_finite() && max.is_finite() && max > min) {
            return Self { size, ..Self::default() };
        }
        Self { size, min, max }
    }

    fn pixel_size(&self) -> f32 {
        (self.max - self.min) / self.size as f32
    }

    /// World position of a pixel center, y pointing up
    pub fn world(&self, px: u32, py: u32) -> Vec2 {
        let step = self.pixel_size();
        Vec2::new(
            self.min + (px as f32 + 0.5) * step,
            self.max - (py as f32 + 0.5) * step,
        )
    }

    /// Splats blended in index order over black, with `line` drawn on top
    pub fn render(&self, params: &SplatParams, line: Option<&ScanLine>) -> RgbImage {
        let splats: Vec<_> = params
            .centers()
            .into_iter()
            .zip(params.scales())
            .zip(params.rotations())
            .zip(params.colors())
            .zip(params.opacities())
            .filter_map(|((((center, scale), theta), color), opacity)| {
                let conic = covariance_to_conic(build_covariance_2d(scale, theta))?;
                Some((center, conic, color, opacity))
            })
            .collect();

        let half_pixel = self.pixel_size() * 0.75;
        RgbImage::from_fn(self.size, self.size, |px, py| {
            let p = self.world(px, py);
            if let Some(line) = line {
                if line.signed_distance(p).abs() < half_pixel {
                    return LINE_COLOR;
                }
            }

            let mut rgb = [0.0f32; 3];
            for (center, conic, color, opacity) in &splats {
                let alpha = opacity * evaluate_conic(*conic, p - *center);
                for ch in 0..3 {
                    rgb[ch] = rgb[ch] * (1.0 - alpha) + color[ch] * alpha;
                }
            }
            Rgb(rgb.map(to_byte))
        })
    }
}

/// Top-down image of `params` over `[extent.0, extent.1]²`
pub fn scene_image(
    params: &SplatParams,
    line: Option<&ScanLine>,
    extent: (f32, f32),
    size: u32,
) -> RgbImage {
    ScenePreview {
        size,
        min: extent.0,
        max: extent.1,
    }
    .render(params, line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_strip() {
        let strip = line_strip(&[[1.0, 0.0, 0.0], [0.0, 0.5, 1.2], [-0.1, 0.0, 0.0]], 4);
        assert_eq!(strip.dimensions(), (3, 4));
        assert_eq!(*strip.get_pixel(0, 3), Rgb([255, 0, 0]));
        assert_eq!(*strip.get_pixel(1, 0), Rgb([0, 128, 255]));
        assert_eq!(*strip.get_pixel(2, 2), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_side_by_side() {
        let left = RgbImage::from_pixel(2, 3, Rgb([10, 10, 10]));
        let right = RgbImage::from_pixel(4, 2, Rgb([200, 0, 0]));
        let out = side_by_side(&left, &right, 1);
        assert_eq!(out.dimensions(), (7, 3));
        assert_eq!(*out.get_pixel(1, 2), Rgb([10, 10, 10]));
        assert_eq!(*out.get_pixel(2, 0), Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(3, 1), Rgb([200, 0, 0]));
    }

    #[test]
    fn test_scene_image_colors_splat_centers() {
        let gt = SplatParams::ground_truth(3).unwrap();
        let preview = ScenePreview {
            size: 100,
            min: 0.0,
            max: 10.0,
        };
        let image = preview.render(&gt, None);
        assert_eq!(image.dimensions(), (100, 100));

        // (3, 3) is the red splat, (6, 3) the green one
        let red = image.get_pixel(30, 70);
        assert!(red[0] > red[1] && red[0] > red[2]);
        let green = image.get_pixel(60, 70);
        assert!(green[1] > green[0] && green[1] > green[2]);
        // far corner stays dark
        assert!(image.get_pixel(99, 0).0.iter().all(|&c| c < 10));
    }

    #[test]
    fn test_scene_image_draws_line() {
        let gt = SplatParams::ground_truth(2).unwrap();
        let line = ScanLine::new(Vec2::new(1.0, 0.0), -9.0).unwrap();
        let image = scene_image(&gt, Some(&line), (0.0, 10.0), 100);
        // x = 9 falls on column 89 or 90
        assert!((85..95).any(|x| *image.get_pixel(x, 50) == LINE_COLOR));
        assert_ne!(*image.get_pixel(20, 50), LINE_COLOR);
    }

    #[test]
    fn test_covering_window() {
        let gt = SplatParams::ground_truth(3).unwrap();
        let preview = ScenePreview::covering(&[&gt], 64);
        assert_eq!(preview.size, 64);
        assert!(preview.min < 2.0);
        assert!(preview.max > 6.0);
    }
}
