use crate::Errors;
use crate::EPS;
use anyhow::Result;

/// Bounding box in the format (left, top, width, height)
///
#[derive(Clone, Default, Debug, Copy, PartialEq)]
pub struct BoundingBox {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
}

impl BoundingBox {
    /// Constructor
    ///
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Constructor from the corner form (x1, y1, x2, y2)
    ///
    pub fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn left(&self) -> f32 {
        self.left
    }

    pub fn top(&self) -> f32 {
        self.top
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Checks that the box is finite and has positive sides
    ///
    /// The derived values (corners, center, aspect and area) must be finite too.
    ///
    pub fn validate(&self) -> Result<()> {
        let (cx, cy) = self.center();
        let finite = [
            self.left,
            self.top,
            self.width,
            self.height,
            self.right(),
            self.bottom(),
            cx,
            cy,
            self.width / self.height,
            self.area(),
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite || self.width <= 0.0 || self.height <= 0.0 {
            return Err(
                Errors::MalformedBox(self.left, self.top, self.width, self.height).into(),
            );
        }
        Ok(())
    }

    /// Area of the intersection, zero when the boxes don't overlap
    ///
    pub fn intersection(&self, other: &BoundingBox) -> f32 {
        let w = self.right().min(other.right()) - self.left.max(other.left);
        let h = self.bottom().min(other.bottom()) - self.top.max(other.top);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    /// Intersection over union
    ///
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection(other);
        if intersection == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - intersection;
        if union <= EPS {
            0.0
        } else {
            intersection / union
        }
    }

    /// Intersection over the area of `self`
    ///
    pub fn iou_on_self(&self, other: &BoundingBox) -> f32 {
        let area = self.area();
        if area <= EPS {
            0.0
        } else {
            self.intersection(other) / area
        }
    }

    /// The box scaled around its center
    ///
    pub fn expand(&self, ratio: f32) -> BoundingBox {
        let (cx, cy) = self.center();
        let (w, h) = (self.width * ratio, self.height * ratio);
        BoundingBox::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }

    /// Shape-aware similarity: IoU penalized by the difference of the boxes' slope angles
    ///
    pub fn similarity(&self, other: &BoundingBox) -> f32 {
        let slope_a = (self.height / self.width).atan();
        let slope_b = (other.height / other.width).atan();
        self.iou(other) - (slope_a - slope_b).abs()
    }
}

/// Bounding box in the format (xc, yc, aspect, height), the Kalman measurement space
///
#[derive(Clone, Default, Debug, Copy, PartialEq)]
pub struct AspectBox {
    pub xc: f32,
    pub yc: f32,
    pub aspect: f32,
    pub height: f32,
}

impl AspectBox {
    pub fn new(xc: f32, yc: f32, aspect: f32, height: f32) -> Self {
        Self {
            xc,
            yc,
            aspect,
            height,
        }
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.xc, self.yc, self.aspect, self.height]
    }
}

impl From<&BoundingBox> for AspectBox {
    fn from(f: &BoundingBox) -> Self {
        let (xc, yc) = f.center();
        AspectBox {
            xc,
            yc,
            aspect: f.width / f.height,
            height: f.height,
        }
    }
}

impl From<BoundingBox> for AspectBox {
    fn from(f: BoundingBox) -> Self {
        AspectBox::from(&f)
    }
}

impl From<AspectBox> for BoundingBox {
    fn from(f: AspectBox) -> Self {
        let width = f.aspect * f.height;
        BoundingBox {
            left: f.xc - width / 2.0,
            top: f.yc - f.height / 2.0,
            width,
            height: f.height,
        }
    }
}

/// Pair score of a face and a person box
///
/// The face is expected to sit inside the upper part of the person box. The score mixes the
/// vertical placement, the overlap with the person's head area and the horizontal alignment.
///
pub fn face_person_score(face: &BoundingBox, person: &BoundingBox) -> f32 {
    let face_size = face.width.max(face.height);
    let (face_cx, face_cy) = face.center();
    if face_cy < person.top || person.height > face_size * 18.0 {
        return 0.0;
    }

    let ydiff = face_cy - person.top - face_size * 0.7;
    let ydiff_score = 1.0 - ydiff / face.height;

    let (person_cx, _) = person.center();
    let xdiff_score = 1.0 - (person_cx - face_cx).abs() / face_size;

    let head_area = BoundingBox::from_ltrb(
        person.left + person.width * 0.2,
        person.top + face_size * 0.25,
        person.left + person.width * 0.8,
        face.top + face_size * 1.25,
    );
    if head_area.width <= 0.0 || head_area.height <= 0.0 {
        return 0.0;
    }

    ydiff_score * 0.2 + face.iou(&head_area) * 0.7 + xdiff_score * 0.1
}

/// Pair score of a head and a person box
///
pub fn head_person_score(head: &BoundingBox, person: &BoundingBox) -> f32 {
    let head_size = head.width.max(head.height);
    let (head_cx, head_cy) = head.center();
    let (person_cx, person_cy) = person.center();
    if head_cx <= person.left || head_cx >= person.right() || head_cy >= person_cy {
        return 0.0;
    }
    if person.height > head_size * 15.0 {
        return 0.0;
    }

    let ydiff_score = 1.0 - (head.top - person.top).abs() / head.height;
    let xdiff_score = 1.0 - (person_cx - head_cx).abs() / head_size;

    let offset = 0.2;
    let head_area = BoundingBox::new(
        person.left + person.width * 0.2,
        person.top + head_size * offset,
        person.width * 0.8,
        head_size * (1.0 + offset),
    );
    if head.iou_on_self(&head_area) < 0.8 {
        return 0.0;
    }

    ydiff_score * 0.2 + head.iou(&head_area) * 0.7 + xdiff_score * 0.1
}
