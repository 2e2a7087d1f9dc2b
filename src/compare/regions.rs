//! Connected regions of a binary mask.

use crate::frame::GrayPlane;

/// One external region of a mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Component {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    /// Foreground pixel count after hole filling.
    pub area: u32,
}

impl Component {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// Turn enclosed background into foreground.
///
/// Background pixels 4-connected to the border stay background; everything else
/// becomes 255. An outer outline and its interior then form one region.
pub fn fill_holes(mask: &GrayPlane) -> GrayPlane {
    let (w, h) = (mask.width as usize, mask.height as usize);
    if w == 0 || h == 0 {
        return mask.clone();
    }
    let mut outside = vec![false; w * h];
    let mut stack = Vec::new();

    let mut seed = |x: usize, y: usize, stack: &mut Vec<usize>| {
        let idx = y * w + x;
        if mask.data[idx] == 0 && !outside[idx] {
            outside[idx] = true;
            stack.push(idx);
        }
    };
    for x in 0..w {
        seed(x, 0, &mut stack);
        if h > 1 {
            seed(x, h - 1, &mut stack);
        }
    }
    for y in 0..h {
        seed(0, y, &mut stack);
        if w > 1 {
            seed(w - 1, y, &mut stack);
        }
    }

    while let Some(idx) = stack.pop() {
        let (x, y) = (idx % w, idx / w);
        let mut visit = |nx: usize, ny: usize| {
            let n = ny * w + nx;
            if mask.data[n] == 0 && !outside[n] {
                outside[n] = true;
                stack.push(n);
            }
        };
        if x > 0 {
            visit(x - 1, y);
        }
        if x + 1 < w {
            visit(x + 1, y);
        }
        if y > 0 {
            visit(x, y - 1);
        }
        if y + 1 < h {
            visit(x, y + 1);
        }
    }

    GrayPlane {
        width: mask.width,
        height: mask.height,
        data: outside.iter().map(|&o| if o { 0 } else { 255 }).collect(),
    }
}

/// Label 8-connected foreground components, in raster order of their first pixel.
pub fn label_components(mask: &GrayPlane) -> Vec<Component> {
    let (w, h) = (mask.width as usize, mask.height as usize);
    let mut seen = vec![false; w * h];
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for start in 0..w * h {
        if mask.data[start] == 0 || seen[start] {
            continue;
        }
        seen[start] = true;
        stack.push(start);
        let mut c = Component {
            min_x: u32::MAX,
            min_y: u32::MAX,
            max_x: 0,
            max_y: 0,
            area: 0,
        };

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            c.area += 1;
            c.min_x = c.min_x.min(x as u32);
            c.min_y = c.min_y.min(y as u32);
            c.max_x = c.max_x.max(x as u32);
            c.max_y = c.max_y.max(y as u32);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if mask.data[n] != 0 && !seen[n] {
                        seen[n] = true;
                        stack.push(n);
                    }
                }
            }
        }
        components.push(c);
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(mask: &mut GrayPlane, x0: usize, y0: usize, x1: usize, y1: usize) {
        let w = mask.width as usize;
        for y in y0..y1 {
            for x in x0..x1 {
                mask.data[y * w + x] = 255;
            }
        }
    }

    #[test]
    fn ring_is_filled_into_one_solid_region() {
        let mut mask = GrayPlane::zeros(20, 20);
        draw(&mut mask, 5, 5, 15, 15);
        // punch a hole
        for y in 8..12 {
            for x in 8..12 {
                mask.data[y * 20 + x] = 0;
            }
        }
        let filled = fill_holes(&mask);
        let components = label_components(&filled);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].area, 100);
        assert_eq!((components[0].width(), components[0].height()), (10, 10));
    }

    #[test]
    fn diagonal_neighbours_are_connected() {
        let mut mask = GrayPlane::zeros(4, 4);
        mask.data[0] = 255;
        mask.data[5] = 255;
        mask.data[10] = 255;
        let components = label_components(&mask);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].area, 3);
    }

    #[test]
    fn separate_blobs_in_raster_order() {
        let mut mask = GrayPlane::zeros(30, 10);
        draw(&mut mask, 20, 1, 25, 4);
        draw(&mut mask, 2, 5, 6, 9);
        let components = label_components(&mask);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].min_x, 20);
        assert_eq!(components[1].min_x, 2);
    }

    #[test]
    fn border_touching_background_stays_background() {
        let mut mask = GrayPlane::zeros(10, 10);
        draw(&mut mask, 0, 0, 10, 1);
        let filled = fill_holes(&mask);
        assert_eq!(filled.data.iter().filter(|&&v| v == 255).count(), 10);
    }
}
