use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates. The origin may lie outside the
/// frame when a model predicts past the border.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + (self.width / 2) as i32,
            y: self.y + (self.height / 2) as i32,
        }
    }

    pub fn intersection(&self, other: &BoundingBox) -> u64 {
        let x1 = self.x.max(other.x) as i64;
        let y1 = self.y.max(other.y) as i64;
        let x2 = (self.x as i64 + self.width as i64).min(other.x as i64 + other.width as i64);
        let y2 = (self.y as i64 + self.height as i64).min(other.y as i64 + other.height as i64);
        if x2 <= x1 || y2 <= y1 {
            return 0;
        }
        ((x2 - x1) * (y2 - y1)) as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// One labelled object found in a frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub center: Point,
}

impl Detection {
    pub fn new(class_label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_label: class_label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
            center: bbox.center(),
        }
    }
}

/// Intersection over union. Zero-area boxes have IoU 0 with everything.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let intersection = a.intersection(b);
    let union = a.area() + b.area() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// Greedy class-agnostic NMS.
///
/// Candidates are visited by descending confidence; each is kept unless it
/// overlaps an already kept box by more than `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept
            .iter()
            .all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_is_derived_from_box() {
        let d = Detection::new("milk", 0.8, BoundingBox::new(10, 20, 30, 40));
        assert_eq!(d.center, Point { x: 25, y: 40 });
    }

    #[test]
    fn iou_cases() {
        let a = BoundingBox::new(0, 0, 10, 10);
        assert!((iou(&a, &a) - 1.0).abs() < f32::EPSILON);
        assert_eq!(iou(&a, &BoundingBox::new(10, 0, 10, 10)), 0.0);
        let half = iou(&a, &BoundingBox::new(5, 0, 10, 10));
        assert!((half - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(iou(&BoundingBox::new(0, 0, 0, 0), &BoundingBox::new(0, 0, 0, 0)), 0.0);
    }

    #[test]
    fn nms_keeps_the_stronger_overlap() {
        let weak = Detection::new("apple", 0.6, BoundingBox::new(0, 0, 100, 100));
        let strong = Detection::new("apple", 0.9, BoundingBox::new(5, 5, 100, 100));
        let kept = non_max_suppression(vec![weak, strong.clone()], 0.4);
        assert_eq!(kept, vec![strong]);
    }

    #[test]
    fn nms_keeps_disjoint_boxes() {
        let a = Detection::new("apple", 0.6, BoundingBox::new(0, 0, 10, 10));
        let b = Detection::new("milk", 0.9, BoundingBox::new(50, 50, 10, 10));
        assert_eq!(non_max_suppression(vec![a, b], 0.4).len(), 2);
    }

    #[test]
    fn nms_is_class_agnostic() {
        let a = Detection::new("apple", 0.7, BoundingBox::new(0, 0, 10, 10));
        let b = Detection::new("orange", 0.8, BoundingBox::new(0, 0, 10, 10));
        let kept = non_max_suppression(vec![a, b], 0.4);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class_label, "orange");
    }
}
