//! Global and grid-based vessel density.

use image::GrayImage;

use crate::config::GridSize;

/// Fraction of nonzero pixels in `mask`, in `[0, 1]`.
///
/// An empty image has density 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn vessel_density(mask: &GrayImage) -> f64 {
    let total = mask.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    let on = mask.as_raw().iter().filter(|&&v| v > 0).count();
    on as f64 / total as f64
}

/// Per-cell vessel density over a `grid.rows x grid.cols` partition,
/// flattened row-major.
///
/// Cell sizes are floor-divided, so when the image does not divide
/// evenly the rightmost columns and bottom rows are ignored. When a cell
/// would be empty (the grid is finer than the image) every entry is 0.
/// The output always has `grid.cell_count()` entries.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn spatial_distribution(mask: &GrayImage, grid: GridSize) -> Vec<f64> {
    let mut out = vec![0.0; grid.cell_count()];
    if grid.rows == 0 || grid.cols == 0 {
        return out;
    }
    let cell_h = mask.height() / grid.rows;
    let cell_w = mask.width() / grid.cols;
    if cell_h == 0 || cell_w == 0 {
        return out;
    }
    let cell_area = f64::from(cell_h) * f64::from(cell_w);

    for row in 0..grid.rows {
        for col in 0..grid.cols {
            let mut on = 0u32;
            for y in row * cell_h..(row + 1) * cell_h {
                for x in col * cell_w..(col + 1) * cell_w {
                    on += u32::from(mask.get_pixel(x, y).0[0] > 0);
                }
            }
            out[(row * grid.cols + col) as usize] = f64::from(on) / cell_area;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRID: GridSize = GridSize { rows: 8, cols: 8 };

    #[test]
    fn density_of_half_filled_mask() {
        let mask = GrayImage::from_fn(10, 10, |x, _| image::Luma([if x < 5 { 255 } else { 0 }]));
        assert!((vessel_density(&mask) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn density_of_empty_image_is_zero() {
        assert!(vessel_density(&GrayImage::new(0, 0)).abs() < f64::EPSILON);
    }

    #[test]
    fn top_left_cell_only() {
        // 256 / 8 = 32-pixel cells; only the first one is filled.
        let mask = GrayImage::from_fn(256, 256, |x, y| {
            image::Luma([if x < 32 && y < 32 { 255 } else { 0 }])
        });
        let grid = spatial_distribution(&mask, GRID);
        assert_eq!(grid.len(), 64);
        assert!((grid[0] - 1.0).abs() < f64::EPSILON);
        assert!(grid[1..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn layout_is_row_major() {
        // Fill the cell at row 1, column 2 of a 2x4 grid.
        let grid_size = GridSize { rows: 2, cols: 4 };
        let mask = GrayImage::from_fn(40, 20, |x, y| {
            image::Luma([if (20..30).contains(&x) && y >= 10 { 255 } else { 0 }])
        });
        let grid = spatial_distribution(&mask, grid_size);
        assert_eq!(grid.len(), 8);
        assert!((grid[6] - 1.0).abs() < f64::EPSILON);
        assert!((grid.iter().sum::<f64>() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn uneven_remainder_is_truncated() {
        // 10 / 3 = 3-pixel cells; column 9 and row 9 fall outside the grid.
        let grid_size = GridSize { rows: 3, cols: 3 };
        let mask = GrayImage::from_fn(10, 10, |x, y| {
            image::Luma([if x == 9 || y == 9 { 255 } else { 0 }])
        });
        let grid = spatial_distribution(&mask, grid_size);
        assert!(grid.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn grid_finer_than_image_yields_zeros() {
        let mask = GrayImage::from_pixel(4, 4, image::Luma([255]));
        let grid = spatial_distribution(&mask, GRID);
        assert_eq!(grid, vec![0.0; 64]);
    }
}
