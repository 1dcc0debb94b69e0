//! Vessel junction detection on a skeleton.
//!
//! The skeleton is convolved with a 3x3 kernel that weights the center
//! pixel by `center_weight` and each of the 8 neighbors by 1. A skeleton
//! pixel with three or more skeleton neighbors scores at least
//! `center_weight + 3`, which is what separates junctions from plain
//! vessel runs (2 neighbors) and endpoints (1 neighbor).
//!
//! Junction candidates are then reduced to well-separated local maxima,
//! strongest first.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::filter_clamped;
use imageproc::kernel::Kernel;
use imageproc::map::map_subpixels;
use imageproc::suppress::suppress_non_maximum;

use crate::config::BifurcationParams;
use crate::types::Point;

/// Per-pixel junction response.
pub type Response = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Junction response of every pixel.
///
/// Pixels outside the image contribute nothing: the binary skeleton is
/// framed with a one-pixel zero border before filtering.
#[must_use]
pub fn response(skeleton: &GrayImage, center_weight: u32) -> Response {
    let (w, h) = skeleton.dimensions();
    let mut framed = GrayImage::new(w + 2, h + 2);
    image::imageops::replace(&mut framed, &map_subpixels(skeleton, |v| u8::from(v > 0)), 1, 1);

    let weights = [1, 1, 1, 1, center_weight, 1, 1, 1, 1];
    let filtered: Response = filter_clamped(&framed, Kernel::new(&weights, 3, 3));
    image::imageops::crop_imm(&filtered, 1, 1, w, h).to_image()
}

/// Detect bifurcation points on `skeleton`.
///
/// A pixel is a peak when its response exceeds `response_threshold` and
/// is the maximum within `min_distance` pixels (Chebyshev) of it, equal
/// maxima in one window resolving to the leftmost, then topmost. Peaks
/// are visited strongest first, raster order breaking ties; a peak within
/// `min_distance` of an already accepted one is dropped. At most
/// `max_points` points are returned, as `(x, y)`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn detect(skeleton: &GrayImage, params: &BifurcationParams) -> Vec<Point> {
    if skeleton.width() == 0 || skeleton.height() == 0 || params.max_points == 0 {
        return Vec::new();
    }
    let surface = response(skeleton, params.center_weight);
    let peaks = suppress_non_maximum(&surface, params.min_distance);

    let mut candidates: Vec<(u32, u32, u32)> = peaks
        .enumerate_pixels()
        .filter(|(_, _, v)| v.0[0] > params.response_threshold)
        .map(|(x, y, v)| (v.0[0], x, y))
        .collect();
    // Stable: equal responses keep raster order.
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    let radius = params.min_distance;
    let mut accepted: Vec<(u32, u32)> = Vec::new();
    for (_, x, y) in candidates {
        if accepted.len() >= params.max_points {
            break;
        }
        let too_close = accepted
            .iter()
            .any(|&(ax, ay)| ax.abs_diff(x).max(ay.abs_diff(y)) <= radius);
        if !too_close {
            accepted.push((x, y));
        }
    }
    accepted
        .into_iter()
        .map(|(x, y)| Point::new(x as i32, y as i32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vessels::FOREGROUND;

    fn draw(points: &[(u32, u32)], size: u32) -> GrayImage {
        let mut img = GrayImage::new(size, size);
        for &(x, y) in points {
            img.put_pixel(x, y, image::Luma([FOREGROUND]));
        }
        img
    }

    /// A "T": horizontal run with a vertical branch leaving its middle.
    fn t_junction() -> GrayImage {
        let mut points: Vec<(u32, u32)> = (5..26).map(|x| (x, 10)).collect();
        points.extend((11..26).map(|y| (15, y)));
        draw(&points, 32)
    }

    #[test]
    fn response_counts_center_and_neighbors() {
        let skeleton = draw(&[(1, 1), (0, 1), (2, 1), (1, 2)], 3);
        let resp = response(&skeleton, 10);
        assert_eq!(resp.get_pixel(1, 1).0[0], 13);
        // Background corner pixel sees two neighbors; nothing beyond the
        // edge is counted.
        assert_eq!(resp.get_pixel(0, 0).0[0], 2);
        assert_eq!(resp.get_pixel(0, 1).0[0], 10 + 2);
    }

    #[test]
    fn straight_line_has_no_junctions() {
        let points: Vec<(u32, u32)> = (2..30).map(|x| (x, 16)).collect();
        let skeleton = draw(&points, 32);
        assert!(detect(&skeleton, &BifurcationParams::default()).is_empty());
    }

    #[test]
    fn t_junction_is_detected_once() {
        // The first branch pixel touches the junction and both of its
        // run neighbors, so it carries the peak response of 14.
        let found = detect(&t_junction(), &BifurcationParams::default());
        assert_eq!(found, vec![Point::new(15, 11)]);
    }

    #[test]
    fn points_are_reported_as_x_y() {
        // Junction at column 6, row 20; peak just below it.
        let mut points: Vec<(u32, u32)> = (1..12).map(|x| (x, 20)).collect();
        points.extend((21..30).map(|y| (6, y)));
        let found = detect(&draw(&points, 32), &BifurcationParams::default());
        assert_eq!(found, vec![Point::new(6, 21)]);
    }

    #[test]
    fn close_peaks_are_suppressed() {
        // Two crossings 3 pixels apart along one line: only one survives.
        let mut points: Vec<(u32, u32)> = (2..30).map(|x| (x, 16)).collect();
        points.extend([(10, 15), (10, 14), (10, 13), (13, 17), (13, 18), (13, 19)]);
        let found = detect(&draw(&points, 32), &BifurcationParams::default());
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn distant_junctions_are_all_reported() {
        let mut points: Vec<(u32, u32)> = (2..60).map(|x| (x, 30)).collect();
        for bx in [10u32, 30, 50] {
            points.extend((31..40).map(|y| (bx, y)));
        }
        let found = detect(&draw(&points, 64), &BifurcationParams::default());
        assert_eq!(
            found,
            vec![Point::new(10, 31), Point::new(30, 31), Point::new(50, 31)]
        );
    }

    #[test]
    fn equal_peaks_in_one_window_keep_one() {
        // A "+" crossing: the center and the first pixel of each arm all
        // score 14. The leftmost of the tie survives.
        let mut points: Vec<(u32, u32)> = (5..26).map(|x| (x, 15)).collect();
        points.extend((5..26).filter(|&y| y != 15).map(|y| (15, y)));
        let found = detect(&draw(&points, 32), &BifurcationParams::default());
        assert_eq!(found, vec![Point::new(14, 15)]);
    }

    #[test]
    fn max_points_caps_output() {
        let mut points: Vec<(u32, u32)> = (2..60).map(|x| (x, 30)).collect();
        for bx in [10u32, 30, 50] {
            points.extend((31..40).map(|y| (bx, y)));
        }
        let params = BifurcationParams {
            max_points: 2,
            ..BifurcationParams::default()
        };
        assert_eq!(detect(&draw(&points, 64), &params).len(), 2);
    }
}
