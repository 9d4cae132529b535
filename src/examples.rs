use crate::track::utils::FromVec;
use crate::track::Feature;
use crate::trackers::deepsort::Detection;
use crate::utils::bbox::BoundingBox;
use rand::distributions::Uniform;
use rand::prelude::ThreadRng;
use rand::Rng;

/// Random walk of a bounding box
///
pub struct BoxGen2 {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    gen: ThreadRng,
    dist_pos: Uniform<f32>,
    dist_box: Uniform<f32>,
}

impl BoxGen2 {
    pub fn new(x: f32, y: f32, width: f32, height: f32, pos_drift: f32, box_drift: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            gen: rand::thread_rng(),
            dist_pos: Uniform::new_inclusive(-pos_drift, pos_drift),
            dist_box: Uniform::new_inclusive(-box_drift, box_drift),
        }
    }

    /// The box moves towards the bottom-right corner only
    ///
    pub fn new_monotonous(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        pos_drift: f32,
        box_drift: f32,
    ) -> Self {
        Self {
            x,
            y,
            width,
            height,
            gen: rand::thread_rng(),
            dist_pos: Uniform::new_inclusive(0.0, pos_drift),
            dist_box: Uniform::new_inclusive(-box_drift, box_drift),
        }
    }
}

impl Iterator for BoxGen2 {
    type Item = BoundingBox;

    fn next(&mut self) -> Option<Self::Item> {
        self.x += self.gen.sample(self.dist_pos);
        self.y += self.gen.sample(self.dist_pos);

        self.width += self.gen.sample(self.dist_box);
        self.height += self.gen.sample(self.dist_box);

        if self.width < 1.0 {
            self.width = 1.0;
        }
        if self.height < 1.0 {
            self.height = 1.0;
        }

        Some(BoundingBox::new(self.x, self.y, self.width, self.height))
    }
}

/// Noisy observations of one random appearance vector
///
pub struct FeatGen {
    base: Vec<f32>,
    gen: ThreadRng,
    dist: Uniform<f32>,
}

impl FeatGen {
    /// # Parameters
    /// * `center` - center of the uniform range the base vector is drawn from
    /// * `drift` - half-width of the range; also the amplitude of the per-sample noise
    /// * `len` - feature dimension
    ///
    pub fn new(center: f32, drift: f32, len: usize) -> Self {
        let mut gen = rand::thread_rng();
        let base_dist = Uniform::new_inclusive(center - drift, center + drift);
        let base = (0..len).map(|_| gen.sample(base_dist)).collect();
        Self {
            base,
            gen,
            dist: Uniform::new_inclusive(-drift, drift),
        }
    }

    /// Replaces the per-sample noise amplitude
    ///
    pub fn with_noise(mut self, noise: f32) -> Self {
        self.dist = Uniform::new_inclusive(-noise, noise);
        self
    }

    pub fn base(&self) -> Feature {
        Feature::from_vec(&self.base)
    }

    pub fn next_feature(&mut self) -> Feature {
        let v = self
            .base
            .iter()
            .map(|b| b + self.gen.sample(self.dist))
            .collect::<Vec<_>>();
        Feature::from_vec(v)
    }
}

impl Iterator for FeatGen {
    type Item = Feature;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_feature())
    }
}

/// Detections of one moving object with a stable appearance
///
pub struct DetectionGen {
    class_id: i32,
    boxes: BoxGen2,
    features: Option<FeatGen>,
}

impl DetectionGen {
    pub fn new(class_id: i32, boxes: BoxGen2) -> Self {
        Self {
            class_id,
            boxes,
            features: None,
        }
    }

    /// Attaches appearance features of the given dimension to the detections
    ///
    pub fn with_features(mut self, len: usize, noise: f32) -> Self {
        self.features = Some(FeatGen::new(0.0, 1.0, len).with_noise(noise));
        self
    }
}

impl Iterator for DetectionGen {
    type Item = Detection;

    fn next(&mut self) -> Option<Self::Item> {
        let bbox = self.boxes.next()?;
        let detection = Detection::new(bbox, self.class_id, 0.9);
        Some(match self.features.as_mut() {
            Some(f) => detection.with_feature(f.next_feature()),
            None => detection,
        })
    }
}
