//! Optic disc localization via a gradient Hough circle transform.
//!
//! Edge pixels come from Canny. Each edge pixel casts votes along its
//! gradient direction (both ways, since the disc may be brighter or
//! darker than its rim after enhancement) at every distance in the
//! configured radius range. Accumulator peaks are candidate centers; for
//! each, the radius is chosen from a histogram of edge distances.
//!
//! The disc is a soft landmark. Finding no circle is a normal outcome.

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use crate::config::OpticDiscParams;
use crate::types::{OpticDisc, Point};

/// Locate the most prominent circle in `image`, if any clears the
/// detector thresholds.
#[must_use]
pub fn locate(image: &GrayImage, params: &OpticDiscParams) -> Option<OpticDisc> {
    detect_circles(image, params).into_iter().next()
}

/// Detect all circles, strongest center first.
///
/// Accepted centers are at least `min_center_distance` apart.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
pub fn detect_circles(image: &GrayImage, params: &OpticDiscParams) -> Vec<OpticDisc> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 || params.min_radius > params.max_radius {
        return Vec::new();
    }

    let edges = canny(image, params.canny_high / 2.0, params.canny_high);
    let gx = horizontal_sobel(image);
    let gy = vertical_sobel(image);

    let edge_pixels: Vec<(usize, usize)> = edges
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] > 0)
        .map(|(x, y, _)| (x as usize, y as usize))
        .collect();

    // Vote along each edge pixel's gradient line.
    let mut acc = vec![0u32; w * h];
    for &(x, y) in &edge_pixels {
        let dx = f64::from(gx.get_pixel(x as u32, y as u32).0[0]);
        let dy = f64::from(gy.get_pixel(x as u32, y as u32).0[0]);
        let mag = dx.hypot(dy);
        if mag == 0.0 {
            continue;
        }
        let (ux, uy) = (dx / mag, dy / mag);
        for r in params.min_radius..=params.max_radius {
            let r = f64::from(r);
            for sign in [1.0, -1.0] {
                let cx = (sign * ux).mul_add(r, x as f64).round();
                let cy = (sign * uy).mul_add(r, y as f64).round();
                if cx >= 0.0 && cy >= 0.0 && (cx as usize) < w && (cy as usize) < h {
                    acc[cy as usize * w + cx as usize] += 1;
                }
            }
        }
    }

    let centers = peak_centers(&acc, w, h, params.accumulator_threshold);

    let mut found: Vec<OpticDisc> = Vec::new();
    for (cx, cy) in centers {
        let center = Point::new(cx as i32, cy as i32);
        if found
            .iter()
            .any(|c| c.center.distance(center) < params.min_center_distance)
        {
            continue;
        }
        if let Some(radius) = best_radius(&edge_pixels, center, params) {
            found.push(OpticDisc { center, radius });
        }
    }
    found
}

/// Accumulator cells above `threshold` that are 4-neighborhood maxima,
/// sorted by vote count (descending, raster order on ties).
fn peak_centers(acc: &[u32], w: usize, h: usize, threshold: u32) -> Vec<(usize, usize)> {
    let at = |x: usize, y: usize| acc[y * w + x];
    let mut peaks: Vec<(u32, usize, usize)> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let v = at(x, y);
            if v <= threshold {
                continue;
            }
            let left = if x > 0 { at(x - 1, y) } else { 0 };
            let right = if x + 1 < w { at(x + 1, y) } else { 0 };
            let up = if y > 0 { at(x, y - 1) } else { 0 };
            let down = if y + 1 < h { at(x, y + 1) } else { 0 };
            if v > left && v >= right && v > up && v >= down {
                peaks.push((v, x, y));
            }
        }
    }
    peaks.sort_by(|a, b| b.0.cmp(&a.0));
    peaks.into_iter().map(|(_, x, y)| (x, y)).collect()
}

/// Most supported radius around `center`, if its support reaches the
/// accumulator threshold.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn best_radius(edge_pixels: &[(usize, usize)], center: Point, params: &OpticDiscParams) -> Option<u32> {
    let lo = params.min_radius;
    let hi = params.max_radius;
    let mut hist = vec![0u32; (hi - lo + 1) as usize];
    for &(x, y) in edge_pixels {
        let d = center.distance(Point::new(x as i32, y as i32)).round();
        if d >= f64::from(lo) && d <= f64::from(hi) {
            hist[d as usize - lo as usize] += 1;
        }
    }
    let (offset, &support) = hist
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))?;
    (support >= params.accumulator_threshold).then_some(lo + offset as u32)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// A bright filled disc, softened the way a normalized frame is.
    fn disc_image(size: u32, cx: i32, cy: i32, radius: i32) -> GrayImage {
        let sharp = GrayImage::from_fn(size, size, |x, y| {
            let dx = x as i32 - cx;
            let dy = y as i32 - cy;
            if dx * dx + dy * dy <= radius * radius {
                image::Luma([200])
            } else {
                image::Luma([50])
            }
        });
        crate::blur::gaussian_blur(&sharp, 5)
    }

    #[test]
    fn uniform_image_has_no_disc() {
        let img = GrayImage::from_pixel(128, 128, image::Luma([100]));
        assert_eq!(locate(&img, &OpticDiscParams::default()), None);
    }

    #[test]
    fn finds_bright_disc() {
        let img = disc_image(128, 64, 60, 30);
        let disc = locate(&img, &OpticDiscParams::default()).unwrap();
        assert!(
            disc.center.distance(Point::new(64, 60)) <= 3.0,
            "center {:?}",
            disc.center
        );
        assert!(disc.radius.abs_diff(30) <= 3, "radius {}", disc.radius);
    }

    #[test]
    fn disc_outside_radius_range_is_ignored() {
        // Radius 5 is below the 10..=50 search range.
        let img = disc_image(128, 64, 64, 5);
        assert_eq!(locate(&img, &OpticDiscParams::default()), None);
    }

    #[test]
    fn peak_centers_sorted_by_votes() {
        let mut acc = vec![0u32; 25];
        acc[6] = 40;
        acc[18] = 90;
        let peaks = peak_centers(&acc, 5, 5, 30);
        assert_eq!(peaks, vec![(3, 3), (1, 1)]);
    }

    #[test]
    fn best_radius_picks_most_supported_distance() {
        let params = OpticDiscParams {
            accumulator_threshold: 3,
            ..OpticDiscParams::default()
        };
        let center = Point::new(50, 50);
        let edges = vec![(70, 50), (50, 70), (30, 50), (50, 30), (62, 50)];
        assert_eq!(best_radius(&edges, center, &params), Some(20));
    }

    #[test]
    fn best_radius_requires_support() {
        let params = OpticDiscParams::default();
        let edges = vec![(70, 50), (50, 70)];
        assert_eq!(best_radius(&edges, Point::new(50, 50), &params), None);
    }
}
