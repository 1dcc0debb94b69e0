//! Topology-preserving thinning of binary masks (Zhang-Suen).
//!
//! Each iteration makes two sub-passes, peeling south-east boundary
//! pixels and then north-west ones, until nothing changes. The result
//! is a one-pixel-wide skeleton with the same connectivity as the mask.

use image::GrayImage;

use crate::vessels::FOREGROUND;

/// Thin `mask` to a one-pixel-wide skeleton.
///
/// Any nonzero pixel counts as foreground. The output uses 255 for
/// skeleton pixels and 0 elsewhere. Pixels outside the image count as
/// background.
#[must_use = "returns the skeleton"]
pub fn thin(mask: &GrayImage) -> GrayImage {
    let (w, h) = (mask.width() as usize, mask.height() as usize);
    let mut grid: Vec<bool> = mask.as_raw().iter().map(|&v| v > 0).collect();

    let mut to_clear = Vec::new();
    loop {
        let mut changed = false;
        for first_pass in [true, false] {
            to_clear.clear();
            for y in 0..h {
                for x in 0..w {
                    if grid[y * w + x] && removable(&grid, w, h, x, y, first_pass) {
                        to_clear.push(y * w + x);
                    }
                }
            }
            for &i in &to_clear {
                grid[i] = false;
            }
            changed |= !to_clear.is_empty();
        }
        if !changed {
            break;
        }
    }

    let mut out = GrayImage::new(mask.width(), mask.height());
    for (dst, &on) in out.as_mut().iter_mut().zip(&grid) {
        *dst = if on { FOREGROUND } else { 0 };
    }
    out
}

/// Neighbors P2..P9, clockwise from north.
fn neighbors(grid: &[bool], w: usize, h: usize, x: usize, y: usize) -> [bool; 8] {
    let at = |dx: isize, dy: isize| -> bool {
        let nx = x.checked_add_signed(dx);
        let ny = y.checked_add_signed(dy);
        match (nx, ny) {
            (Some(nx), Some(ny)) if nx < w && ny < h => grid[ny * w + nx],
            _ => false,
        }
    };
    [
        at(0, -1),
        at(1, -1),
        at(1, 0),
        at(1, 1),
        at(0, 1),
        at(-1, 1),
        at(-1, 0),
        at(-1, -1),
    ]
}

fn removable(grid: &[bool], w: usize, h: usize, x: usize, y: usize, first_pass: bool) -> bool {
    let n = neighbors(grid, w, h, x, y);
    let [p2, _, p4, _, p6, _, p8, _] = n;

    let count = n.iter().filter(|&&v| v).count();
    if !(2..=6).contains(&count) {
        return false;
    }
    let transitions = (0..8).filter(|&i| !n[i] && n[(i + 1) % 8]).count();
    if transitions != 1 {
        return false;
    }
    if first_pass {
        !(p2 && p4 && p6) && !(p4 && p6 && p8)
    } else {
        !(p2 && p4 && p8) && !(p2 && p6 && p8)
    }
}

/// Number of foreground pixels in a binary image.
#[must_use]
pub fn foreground_count(image: &GrayImage) -> u64 {
    image.pixels().map(|p| u64::from(p.0[0] > 0)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(width: u32, height: u32, rows: std::ops::Range<u32>, cols: std::ops::Range<u32>) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if rows.contains(&y) && cols.contains(&x) {
                image::Luma([FOREGROUND])
            } else {
                image::Luma([0])
            }
        })
    }

    #[test]
    fn empty_mask_stays_empty() {
        let mask = GrayImage::new(10, 10);
        assert_eq!(foreground_count(&thin(&mask)), 0);
    }

    #[test]
    fn thick_bar_thins_to_single_line() {
        let mask = bar(50, 25, 10..15, 5..45);
        let skeleton = thin(&mask);
        for x in 15..35 {
            let column = (0..25)
                .filter(|&y| skeleton.get_pixel(x, y).0[0] == FOREGROUND)
                .count();
            assert_eq!(column, 1, "column {x} has {column} skeleton pixels");
        }
        assert_eq!(skeleton.get_pixel(25, 12).0[0], FOREGROUND);
    }

    #[test]
    fn thin_line_is_unchanged() {
        let mask = bar(30, 9, 4..5, 3..27);
        assert_eq!(thin(&mask), mask);
    }

    #[test]
    fn isolated_pixel_survives() {
        let mut mask = GrayImage::new(9, 9);
        mask.put_pixel(4, 4, image::Luma([FOREGROUND]));
        assert_eq!(foreground_count(&thin(&mask)), 1);
    }

    #[test]
    fn skeleton_is_subset_of_mask() {
        let mask = GrayImage::from_fn(40, 40, |x, y| {
            if (x / 3 + y / 5) % 3 == 0 {
                image::Luma([FOREGROUND])
            } else {
                image::Luma([0])
            }
        });
        let skeleton = thin(&mask);
        for (s, m) in skeleton.pixels().zip(mask.pixels()) {
            assert!(s.0[0] == 0 || m.0[0] > 0);
        }
    }

    #[test]
    fn nonzero_values_count_as_foreground() {
        let mask = GrayImage::from_pixel(1, 1, image::Luma([7]));
        assert_eq!(thin(&mask).get_pixel(0, 0).0[0], FOREGROUND);
    }
}
