//! Pixel filters on `GrayPlane`s.

use crate::frame::GrayPlane;

/// Side of the square structuring element used by `close` and `open`.
pub const MORPH_KERNEL: usize = 5;

/// Map an out-of-range index back into `0..n` by mirroring around the edge
/// pixel without repeating it (`gfedcb|abcdefgh|gfedcba`).
fn reflect101(mut i: isize, n: isize) -> usize {
    if n == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Normalised 1-D Gaussian weights for a `k`-tap kernel.
fn gaussian_kernel(k: usize) -> Vec<f32> {
    let sigma = 0.3 * ((k as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (k / 2) as f32;
    let mut weights: Vec<f32> = (0..k)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Separable Gaussian blur with a `k × k` kernel. Even sizes are rounded up to odd;
/// sizes ≤ 1 return the plane unchanged.
pub fn gaussian_blur(plane: &GrayPlane, kernel_size: u32) -> GrayPlane {
    let k = if kernel_size % 2 == 0 {
        kernel_size as usize + 1
    } else {
        kernel_size as usize
    };
    if k <= 1 || plane.data.is_empty() {
        return plane.clone();
    }
    let weights = gaussian_kernel(k);
    let radius = (k / 2) as isize;
    let (w, h) = (plane.width as usize, plane.height as usize);

    let mut horizontal = vec![0f32; w * h];
    for y in 0..h {
        let row = &plane.data[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0f32;
            for (i, weight) in weights.iter().enumerate() {
                let sx = reflect101(x as isize + i as isize - radius, w as isize);
                acc += row[sx] as f32 * weight;
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut data = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0f32;
            for (i, weight) in weights.iter().enumerate() {
                let sy = reflect101(y as isize + i as isize - radius, h as isize);
                acc += horizontal[sy * w + x] * weight;
            }
            data[y * w + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    GrayPlane {
        width: plane.width,
        height: plane.height,
        data,
    }
}

/// Per-pixel `|a - b|`. Both planes must share dimensions.
pub fn absdiff(a: &GrayPlane, b: &GrayPlane) -> GrayPlane {
    debug_assert_eq!((a.width, a.height), (b.width, b.height));
    GrayPlane {
        width: a.width,
        height: a.height,
        data: a
            .data
            .iter()
            .zip(&b.data)
            .map(|(&x, &y)| x.abs_diff(y))
            .collect(),
    }
}

/// Binary threshold: values strictly above `threshold` become 255, the rest 0.
pub fn threshold(plane: &GrayPlane, threshold: u8) -> GrayPlane {
    GrayPlane {
        width: plane.width,
        height: plane.height,
        data: plane
            .data
            .iter()
            .map(|&v| if v > threshold { 255 } else { 0 })
            .collect(),
    }
}

#[derive(Clone, Copy)]
enum Morph {
    Erode,
    Dilate,
}

/// Square min/max filter. Pixels outside the plane are ignored.
fn morph(plane: &GrayPlane, size: usize, op: Morph) -> GrayPlane {
    let (w, h) = (plane.width as usize, plane.height as usize);
    let radius = size / 2;
    let pick = |acc: u8, v: u8| match op {
        Morph::Erode => acc.min(v),
        Morph::Dilate => acc.max(v),
    };
    let init = match op {
        Morph::Erode => u8::MAX,
        Morph::Dilate => u8::MIN,
    };

    let mut rows = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(w - 1);
            rows[y * w + x] = plane.data[y * w + lo..=y * w + hi]
                .iter()
                .fold(init, |acc, &v| pick(acc, v));
        }
    }

    let mut data = vec![0u8; w * h];
    for y in 0..h {
        let lo = y.saturating_sub(radius);
        let hi = (y + radius).min(h - 1);
        for x in 0..w {
            data[y * w + x] = (lo..=hi).fold(init, |acc, sy| pick(acc, rows[sy * w + x]));
        }
    }
    GrayPlane {
        width: plane.width,
        height: plane.height,
        data,
    }
}

/// Dilate then erode: bridges small gaps inside changed areas.
pub fn close(plane: &GrayPlane) -> GrayPlane {
    if plane.data.is_empty() {
        return plane.clone();
    }
    morph(&morph(plane, MORPH_KERNEL, Morph::Dilate), MORPH_KERNEL, Morph::Erode)
}

/// Erode then dilate: drops specks smaller than the structuring element.
pub fn open(plane: &GrayPlane) -> GrayPlane {
    if plane.data.is_empty() {
        return plane.clone();
    }
    morph(&morph(plane, MORPH_KERNEL, Morph::Erode), MORPH_KERNEL, Morph::Dilate)
}

/// JET colormap (blue → cyan → yellow → red) as RGB.
pub fn jet(value: u8) -> [u8; 3] {
    let t = value as f32 / 255.0;
    let channel = |offset: f32| {
        let v = 1.5 - (4.0 * t - offset).abs();
        (v.clamp(0.0, 1.0) * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(width: u32, height: u32, data: &[u8]) -> GrayPlane {
        GrayPlane::new(width, height, data.to_vec()).expect("plane")
    }

    #[test]
    fn reflect101_mirrors_without_edge_repeat() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(6, 5), 2);
        assert_eq!(reflect101(3, 1), 0);
    }

    #[test]
    fn kernel_is_normalised_and_symmetric() {
        let k = gaussian_kernel(21);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((k[0] - k[20]).abs() < 1e-7);
        assert!(k[10] > k[9]);
    }

    #[test]
    fn blur_keeps_flat_planes_flat() {
        let flat = GrayPlane {
            width: 30,
            height: 20,
            data: vec![77; 600],
        };
        assert_eq!(gaussian_blur(&flat, 21), flat);
        // even kernel sizes are accepted
        assert_eq!(gaussian_blur(&flat, 4), flat);
    }

    #[test]
    fn blur_spreads_a_point() {
        let mut p = GrayPlane::zeros(11, 11);
        p.data[5 * 11 + 5] = 255;
        let blurred = gaussian_blur(&p, 5);
        assert!(blurred.get(5, 5) < 255);
        assert!(blurred.get(4, 5) > 0);
        assert_eq!(blurred.get(0, 0), 0);
    }

    #[test]
    fn threshold_is_strict() {
        let p = plane(3, 1, &[30, 31, 200]);
        assert_eq!(threshold(&p, 30).data, vec![0, 255, 255]);
    }

    #[test]
    fn absdiff_is_symmetric() {
        let a = plane(2, 1, &[10, 200]);
        let b = plane(2, 1, &[50, 100]);
        assert_eq!(absdiff(&a, &b).data, vec![40, 100]);
        assert_eq!(absdiff(&b, &a).data, vec![40, 100]);
    }

    #[test]
    fn open_removes_specks_close_fills_gaps() {
        let mut speck = GrayPlane::zeros(20, 20);
        speck.data[10 * 20 + 10] = 255;
        assert!(open(&speck).data.iter().all(|&v| v == 0));

        let mut gap = GrayPlane::zeros(20, 20);
        for y in 5..15 {
            for x in 5..15 {
                if x != 10 {
                    gap.data[y * 20 + x] = 255;
                }
            }
        }
        assert_eq!(close(&gap).get(10, 10), 255);
    }

    #[test]
    fn jet_endpoints() {
        assert_eq!(jet(0), [0, 0, 128]);
        assert_eq!(jet(255), [128, 0, 0]);
    }
}
