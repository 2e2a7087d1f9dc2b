//! Before/after image comparison.
//!
//! `ImageComparator::compare` turns a pair of frames from one zone into change
//! regions:
//!
//! 1. Grayscale, Gaussian blur, absolute difference, binary threshold
//! 2. Morphological close then open to join fragments and drop specks
//! 3. Hole filling and 8-connected labeling into external regions
//! 4. Area filter, then brightness of the unblurred frames inside each
//!    bounding rectangle decides addition vs removal
//!
//! Regions from several zones can then be filtered by confidence and merged.

mod filters;
mod regions;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::frame::Frame;

pub use filters::{absdiff, gaussian_blur, jet, threshold};
pub use regions::{fill_holes, label_components, Component};

/// Overlap above which `merge_overlapping` folds a region into a larger one.
pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.5;

const ADDITION_COLOR: [u8; 3] = [0, 255, 0];
const REMOVAL_COLOR: [u8; 3] = [255, 0, 0];
const ANNOTATION_THICKNESS: u32 = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparatorConfig {
    /// Pixels whose blurred difference exceeds this become change.
    pub diff_threshold: u8,
    /// Regions smaller than this many pixels are discarded.
    pub min_contour_area: u32,
    pub blur_kernel_size: u32,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            diff_threshold: 30,
            min_contour_area: 500,
            blur_kernel_size: 21,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Addition,
    Removal,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Addition => f.write_str("addition"),
            ChangeType::Removal => f.write_str("removal"),
        }
    }
}

/// A rectangle of one zone where the scene changed between captures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Brightness shift inside the rectangle, in `[0, 1]`.
    pub confidence: f32,
    pub zone: String,
    pub change_type: ChangeType,
}

impl ChangeRegion {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn intersection_area(&self, other: &ChangeRegion) -> u64 {
        let x1 = self.x.max(other.x) as u64;
        let y1 = self.y.max(other.y) as u64;
        let x2 = (self.x as u64 + self.width as u64).min(other.x as u64 + other.width as u64);
        let y2 = (self.y as u64 + self.height as u64).min(other.y as u64 + other.height as u64);
        if x2 <= x1 || y2 <= y1 {
            return 0;
        }
        (x2 - x1) * (y2 - y1)
    }
}

/// Result of comparing one zone.
#[derive(Clone, Debug)]
pub struct ZoneComparison {
    pub regions: Vec<ChangeRegion>,
    /// After frame with one rectangle per region (green addition, red removal).
    pub annotated: Frame,
}

pub struct ImageComparator {
    config: ComparatorConfig,
}

impl Default for ImageComparator {
    fn default() -> Self {
        Self::new(ComparatorConfig::default())
    }
}

impl ImageComparator {
    pub fn new(config: ComparatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ComparatorConfig {
        &self.config
    }

    /// Compare one zone's before and after frames.
    ///
    /// An `after` frame of a different size is resized to `before`'s dimensions.
    pub fn compare(&self, before: &Frame, after: &Frame, zone: &str) -> Result<ZoneComparison> {
        if before.width == 0 || before.height == 0 {
            return Err(anyhow!("zone {}: before frame is empty", zone));
        }
        let resized;
        let after = if (after.width, after.height) != (before.width, before.height) {
            log::warn!(
                "zone {}: after frame {}x{} resized to {}x{}",
                zone,
                after.width,
                after.height,
                before.width,
                before.height
            );
            resized = after.resize_to(before.width, before.height)?;
            &resized
        } else {
            after
        };

        let gray_before = before.to_gray();
        let gray_after = after.to_gray();

        let diff = absdiff(
            &gaussian_blur(&gray_before, self.config.blur_kernel_size),
            &gaussian_blur(&gray_after, self.config.blur_kernel_size),
        );
        let mask = threshold(&diff, self.config.diff_threshold);
        let mask = filters::open(&filters::close(&mask));
        let mask = fill_holes(&mask);

        let mut annotated = after.clone();
        annotated.zone = zone.to_string();
        let mut regions = Vec::new();
        for component in label_components(&mask) {
            if component.area < self.config.min_contour_area {
                continue;
            }
            let (x, y, w, h) = (
                component.min_x,
                component.min_y,
                component.width(),
                component.height(),
            );
            let mean_before = gray_before.mean_in(x, y, w, h);
            let mean_after = gray_after.mean_in(x, y, w, h);
            let change_type = if mean_after > mean_before {
                ChangeType::Addition
            } else {
                ChangeType::Removal
            };
            let confidence = ((mean_after - mean_before).abs() / 255.0).min(1.0) as f32;

            let color = match change_type {
                ChangeType::Addition => ADDITION_COLOR,
                ChangeType::Removal => REMOVAL_COLOR,
            };
            annotated.draw_rect(x, y, w, h, color, ANNOTATION_THICKNESS);

            regions.push(ChangeRegion {
                x,
                y,
                width: w,
                height: h,
                confidence,
                zone: zone.to_string(),
                change_type,
            });
        }

        log::debug!("zone {}: {} change region(s)", zone, regions.len());
        Ok(ZoneComparison { regions, annotated })
    }

    /// Compare every zone present in `before`. Zones without an after frame, or
    /// whose comparison fails, are skipped with a warning.
    pub fn compare_all_zones(
        &self,
        before: &BTreeMap<String, Frame>,
        after: &BTreeMap<String, Frame>,
    ) -> BTreeMap<String, ZoneComparison> {
        let mut results = BTreeMap::new();
        for (zone, before_frame) in before {
            let Some(after_frame) = after.get(zone) else {
                log::warn!("missing after frame for zone {}", zone);
                continue;
            };
            match self.compare(before_frame, after_frame, zone) {
                Ok(result) => {
                    results.insert(zone.clone(), result);
                }
                Err(e) => log::warn!("zone {} not compared: {:#}", zone, e),
            }
        }
        let total: usize = results.values().map(|r| r.regions.len()).sum();
        log::info!(
            "compared {} zone(s): {} change region(s)",
            results.len(),
            total
        );
        results
    }

    /// JET heatmap of the gray difference, blended 0.6 after / 0.4 heat.
    pub fn difference_heatmap(&self, before: &Frame, after: &Frame) -> Result<Frame> {
        let after = if (after.width, after.height) != (before.width, before.height) {
            after.resize_to(before.width, before.height)?
        } else {
            after.clone()
        };
        let diff = absdiff(&before.to_gray(), &after.to_gray());

        let mut out = after.clone();
        for y in 0..after.height {
            for x in 0..after.width {
                let heat = jet(diff.get(x, y));
                let base = after.pixel(x, y);
                let mut blended = [0u8; 3];
                for c in 0..3 {
                    blended[c] = (0.6 * base[c] as f32 + 0.4 * heat[c] as f32)
                        .round()
                        .clamp(0.0, 255.0) as u8;
                }
                out.put_pixel(x, y, blended);
            }
        }
        Ok(out)
    }
}

/// Keep regions whose confidence is at least `min_confidence`.
pub fn filter_by_confidence(regions: &[ChangeRegion], min_confidence: f32) -> Vec<ChangeRegion> {
    regions
        .iter()
        .filter(|r| r.confidence >= min_confidence)
        .cloned()
        .collect()
}

/// Intersection over the smaller area. Disjoint, edge-touching or zero-area
/// rectangles overlap 0.
pub fn overlap_ratio(a: &ChangeRegion, b: &ChangeRegion) -> f32 {
    let smaller = a.area().min(b.area());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection_area(b) as f32 / smaller as f32
}

/// Fold overlapping regions of the same zone into the larger one.
///
/// Regions are visited largest first (ties keep input order); each is merged into
/// the first kept region it overlaps by more than `overlap_threshold`, which then
/// keeps the higher confidence. Merged rectangles are not grown, so applying the
/// merge twice changes nothing.
pub fn merge_overlapping(regions: &[ChangeRegion], overlap_threshold: f32) -> Vec<ChangeRegion> {
    let mut sorted: Vec<&ChangeRegion> = regions.iter().collect();
    sorted.sort_by(|a, b| b.area().cmp(&a.area()));

    let mut merged: Vec<ChangeRegion> = Vec::new();
    for region in sorted {
        let target = merged
            .iter_mut()
            .find(|kept| overlap_ratio(region, kept) > overlap_threshold);
        match target {
            Some(kept) => kept.confidence = kept.confidence.max(region.confidence),
            None => merged.push(region.clone()),
        }
    }
    if merged.len() != regions.len() {
        log::debug!(
            "merged {} change region(s) into {}",
            regions.len(),
            merged.len()
        );
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: u32, y: u32, w: u32, h: u32, confidence: f32) -> ChangeRegion {
        ChangeRegion {
            x,
            y,
            width: w,
            height: h,
            confidence,
            zone: "shelf_1".to_string(),
            change_type: ChangeType::Addition,
        }
    }

    fn small_comparator() -> ImageComparator {
        ImageComparator::new(ComparatorConfig {
            diff_threshold: 30,
            min_contour_area: 100,
            blur_kernel_size: 21,
        })
    }

    #[test]
    fn identical_frames_have_no_regions() -> Result<()> {
        let frame = Frame::filled("shelf_1", 64, 48, [90, 120, 60]);
        let result = ImageComparator::default().compare(&frame, &frame.clone(), "shelf_1")?;
        assert!(result.regions.is_empty());
        Ok(())
    }

    #[test]
    fn white_square_is_one_addition() -> Result<()> {
        let before = Frame::filled("shelf_1", 100, 100, [0, 0, 0]);
        let mut after = before.clone();
        after.fill_rect(40, 40, 20, 20, [255, 255, 255]);

        let result = small_comparator().compare(&before, &after, "shelf_1")?;
        assert_eq!(result.regions.len(), 1);
        let r = &result.regions[0];
        assert_eq!(r.change_type, ChangeType::Addition);
        assert_eq!(r.zone, "shelf_1");
        assert!((35..=37).contains(&r.x), "x = {}", r.x);
        assert!((35..=37).contains(&r.y), "y = {}", r.y);
        assert!((27..=29).contains(&r.width), "width = {}", r.width);
        assert!((27..=29).contains(&r.height), "height = {}", r.height);
        assert!((0.45..=0.57).contains(&r.confidence), "confidence = {}", r.confidence);

        // the outline is drawn in green on the annotated copy
        assert_eq!(result.annotated.pixel(r.x, r.y), ADDITION_COLOR);
        Ok(())
    }

    #[test]
    fn removed_item_is_a_removal() -> Result<()> {
        let after = Frame::filled("shelf_1", 100, 100, [0, 0, 0]);
        let mut before = after.clone();
        before.fill_rect(40, 40, 20, 20, [255, 255, 255]);

        let result = small_comparator().compare(&before, &after, "shelf_1")?;
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].change_type, ChangeType::Removal);
        Ok(())
    }

    #[test]
    fn small_changes_fall_below_min_area() -> Result<()> {
        let before = Frame::filled("shelf_1", 100, 100, [0, 0, 0]);
        let mut after = before.clone();
        after.fill_rect(10, 10, 3, 3, [255, 255, 255]);
        let result = small_comparator().compare(&before, &after, "shelf_1")?;
        assert!(result.regions.is_empty());
        Ok(())
    }

    #[test]
    fn mismatched_after_is_resized() -> Result<()> {
        let before = Frame::filled("shelf_1", 100, 100, [0, 0, 0]);
        let after = Frame::filled("shelf_1", 50, 50, [0, 0, 0]);
        let result = small_comparator().compare(&before, &after, "shelf_1")?;
        assert!(result.regions.is_empty());
        assert_eq!((result.annotated.width, result.annotated.height), (100, 100));
        Ok(())
    }

    #[test]
    fn compare_all_skips_zones_without_after() {
        let mut before = BTreeMap::new();
        before.insert("a".to_string(), Frame::filled("a", 20, 20, [0, 0, 0]));
        before.insert("b".to_string(), Frame::filled("b", 20, 20, [0, 0, 0]));
        let mut after = BTreeMap::new();
        after.insert("a".to_string(), Frame::filled("a", 20, 20, [0, 0, 0]));

        let results = small_comparator().compare_all_zones(&before, &after);
        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn merge_keeps_max_confidence() {
        let merged = merge_overlapping(
            &[region(10, 10, 20, 20, 0.4), region(10, 10, 20, 20, 0.9)],
            DEFAULT_OVERLAP_THRESHOLD,
        );
        assert_eq!(merged.len(), 1);
        assert!((merged[0].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn merge_targets_the_larger_region() {
        let big = region(0, 0, 50, 50, 0.7);
        let inner = region(10, 10, 10, 10, 0.95);
        let merged = merge_overlapping(&[inner, big.clone()], DEFAULT_OVERLAP_THRESHOLD);
        assert_eq!(merged.len(), 1);
        assert_eq!((merged[0].width, merged[0].height), (big.width, big.height));
        assert!((merged[0].confidence - 0.95).abs() < f32::EPSILON);
    }

    #[test]
    fn merge_crosses_zones() {
        let mut other = region(10, 10, 20, 20, 0.9);
        other.zone = "shelf_2".to_string();
        let merged = merge_overlapping(
            &[region(10, 10, 20, 20, 0.4), other],
            DEFAULT_OVERLAP_THRESHOLD,
        );
        assert_eq!(merged.len(), 1);
        assert!((merged[0].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn touching_edges_do_not_overlap() {
        let a = region(0, 0, 10, 10, 0.5);
        let b = region(10, 0, 10, 10, 0.5);
        assert_eq!(overlap_ratio(&a, &b), 0.0);
        assert_eq!(overlap_ratio(&a, &region(50, 50, 5, 5, 0.5)), 0.0);
        assert_eq!(overlap_ratio(&a, &region(0, 0, 0, 5, 0.5)), 0.0);
        assert_eq!(merge_overlapping(&[a, b], DEFAULT_OVERLAP_THRESHOLD).len(), 2);
    }

    #[test]
    fn filter_and_merge_are_idempotent() {
        let regions = vec![
            region(0, 0, 40, 40, 0.9),
            region(5, 5, 30, 30, 0.7),
            region(100, 100, 10, 10, 0.3),
            region(60, 0, 20, 20, 0.6),
        ];
        let filtered = filter_by_confidence(&regions, 0.6);
        assert_eq!(filtered.len(), 3);
        assert_eq!(filter_by_confidence(&filtered, 0.6), filtered);

        let merged = merge_overlapping(&filtered, DEFAULT_OVERLAP_THRESHOLD);
        assert_eq!(merge_overlapping(&merged, DEFAULT_OVERLAP_THRESHOLD), merged);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn heatmap_matches_after_dimensions() -> Result<()> {
        let before = Frame::filled("z", 30, 20, [0, 0, 0]);
        let mut after = before.clone();
        after.fill_rect(0, 0, 10, 10, [255, 255, 255]);
        let heat = ImageComparator::default().difference_heatmap(&before, &after)?;
        assert_eq!((heat.width, heat.height), (30, 20));
        // unchanged pixels carry the cold end of the colormap
        assert_eq!(heat.pixel(29, 19), [0, 0, 51]);
        Ok(())
    }
}
