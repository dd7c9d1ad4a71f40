//! DCT perceptual hash.
//!
//! The image is reduced to 32×32 luma, transformed with a 2-D DCT-II, and
//! the top-left 8×8 low-frequency block is thresholded against its median.
//! The 64 resulting bits are rendered row-major, most significant bit first,
//! as 16 lowercase hex characters.

use image::imageops::{self, FilterType};
use image::DynamicImage;

const SIDE: usize = 32;
const LOW: usize = 8;

/// Hashes an already decoded image.
pub fn perceptual_hash(image: &DynamicImage) -> String {
    let luma = image.to_luma8();
    let small = imageops::resize(&luma, SIDE as u32, SIDE as u32, FilterType::Lanczos3);

    let mut pixels = [[0f64; SIDE]; SIDE];
    for (x, y, pixel) in small.enumerate_pixels() {
        pixels[y as usize][x as usize] = f64::from(pixel[0]);
    }

    let coefficients = dct_2d(&pixels);
    let mut low = Vec::with_capacity(LOW * LOW);
    for row in coefficients.iter().take(LOW) {
        low.extend_from_slice(&row[..LOW]);
    }
    let median = median(&low);

    let mut bits: u64 = 0;
    for value in &low {
        bits = (bits << 1) | u64::from(*value > median);
    }
    format!("{:016x}", bits)
}

/// Decodes `bytes` (first frame for animated formats) and hashes it.
pub fn perceptual_hash_bytes(bytes: &[u8]) -> Result<String, image::ImageError> {
    let image = image::load_from_memory(bytes)?;
    Ok(perceptual_hash(&image))
}

/// Number of differing bits between two hashes of equal length.
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    let a = u64::from_str_radix(a, 16).ok()?;
    let b = u64::from_str_radix(b, 16).ok()?;
    Some((a ^ b).count_ones())
}

fn dct_2d(input: &[[f64; SIDE]; SIDE]) -> [[f64; SIDE]; SIDE] {
    let mut cosines = [[0f64; SIDE]; SIDE];
    for (k, row) in cosines.iter_mut().enumerate() {
        for (n, value) in row.iter_mut().enumerate() {
            *value = (std::f64::consts::PI * k as f64 * (2 * n + 1) as f64 / (2 * SIDE) as f64)
                .cos();
        }
    }

    // columns, then rows
    let mut columns = [[0f64; SIDE]; SIDE];
    for k in 0..SIDE {
        for x in 0..SIDE {
            columns[k][x] = (0..SIDE).map(|n| input[n][x] * cosines[k][n]).sum();
        }
    }
    let mut output = [[0f64; SIDE]; SIDE];
    for y in 0..SIDE {
        for k in 0..SIDE {
            output[y][k] = (0..SIDE).map(|n| columns[y][n] * cosines[k][n]).sum();
        }
    }
    output
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
