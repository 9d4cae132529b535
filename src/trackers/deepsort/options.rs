use crate::utils::kalman::{KalmanFilterOptions, NoiseRule, DEFAULT_INITIAL_NOISE, DIM_X};
use std::collections::HashMap;

/// Life-cycle and appearance-gallery settings of the tracks
///
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerOptions {
    pub(crate) max_unmatched_num: usize,
    pub(crate) accreditation_threshold: usize,
    pub(crate) feature_budget_size: usize,
    pub(crate) feature_update_interval: usize,
    pub(crate) max_unmatched_times_for_bbox_matching: usize,
    pub(crate) initial_noise: [NoiseRule; DIM_X],
    pub(crate) enable_qa_feature_update: bool,
    pub(crate) enable_qa_feature_init: bool,
    pub(crate) feature_update_quality_threshold: f32,
    pub(crate) feature_init_quality_threshold: f32,
    pub(crate) pair_missed_margin: usize,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            max_unmatched_num: 40,
            accreditation_threshold: 3,
            feature_budget_size: 8,
            feature_update_interval: 1,
            max_unmatched_times_for_bbox_matching: 2,
            initial_noise: DEFAULT_INITIAL_NOISE,
            enable_qa_feature_update: false,
            enable_qa_feature_init: false,
            feature_update_quality_threshold: 0.75,
            feature_init_quality_threshold: 0.75,
            pair_missed_margin: 5,
        }
    }
}

impl TrackerOptions {
    /// The number of consecutive frames an accredited track survives without a match.
    ///
    /// It is also the depth of the matching cascade: tracks unseen for `t` frames compete at the
    /// level `t`, and the levels are visited from the freshest one. The pair missed margin is
    /// lowered to `n - 1` when it doesn't fit.
    ///
    pub fn max_unmatched_num(mut self, n: usize) -> Self {
        assert!(n > 0, "Max unmatched number must be a positive number");
        self.max_unmatched_num = n;
        self.pair_missed_margin = self.pair_missed_margin.min(n - 1);
        self
    }

    /// The number of matches after which a probation track becomes accredited.
    ///
    /// The creating detection counts as the first match.
    ///
    pub fn accreditation_threshold(mut self, n: usize) -> Self {
        self.accreditation_threshold = n;
        self
    }

    /// The maximum number of appearance features kept by a track, the oldest is evicted first.
    ///
    pub fn feature_budget_size(mut self, n: usize) -> Self {
        assert!(n > 0, "Feature budget must be a positive number");
        self.feature_budget_size = n;
        self
    }

    /// Every `n`-th matched feature is appended to the gallery.
    ///
    pub fn feature_update_interval(mut self, n: usize) -> Self {
        assert!(n > 0, "Feature update interval must be a positive number");
        self.feature_update_interval = n;
        self
    }

    /// Tracks unseen for longer than `n` frames don't take part in the IoU matching.
    ///
    pub fn max_unmatched_times_for_bbox_matching(mut self, n: usize) -> Self {
        self.max_unmatched_times_for_bbox_matching = n;
        self
    }

    /// Initial covariance rules of a new track.
    ///
    pub fn initial_noise(mut self, rules: [NoiseRule; DIM_X]) -> Self {
        self.initial_noise = rules;
        self
    }

    /// Appends a matched feature only when the detection quality exceeds the threshold.
    ///
    pub fn qa_feature_update(mut self, threshold: Option<f32>) -> Self {
        self.enable_qa_feature_update = threshold.is_some();
        if let Some(t) = threshold {
            self.feature_update_quality_threshold = t;
        }
        self
    }

    /// Starts a track with an empty gallery when the detection quality is under the threshold.
    ///
    pub fn qa_feature_init(mut self, threshold: Option<f32>) -> Self {
        self.enable_qa_feature_init = threshold.is_some();
        if let Some(t) = threshold {
            self.feature_init_quality_threshold = t;
        }
        self
    }

    /// A track refreshed only from its pair partner dies `n` frames before the regular limit
    /// would be reached.
    ///
    pub fn pair_missed_margin(mut self, n: usize) -> Self {
        assert!(
            n < self.max_unmatched_num,
            "Pair missed margin must be less than the max unmatched number"
        );
        self.pair_missed_margin = n;
        self
    }

    pub fn get_max_unmatched_num(&self) -> usize {
        self.max_unmatched_num
    }

    pub fn get_accreditation_threshold(&self) -> usize {
        self.accreditation_threshold
    }

    pub fn get_feature_budget_size(&self) -> usize {
        self.feature_budget_size
    }

    pub fn get_pair_missed_margin(&self) -> usize {
        self.pair_missed_margin
    }

    /// The ceiling of `unmatched_times` kept for a track updated from its pair partner
    ///
    /// The builder keeps the margin below `max_unmatched_num`, so the ceiling is at least one.
    ///
    pub(crate) fn pair_update_ceiling(&self) -> usize {
        self.max_unmatched_num - self.pair_missed_margin
    }
}

/// Matching thresholds and motion model of one object class
///
#[derive(Debug, Clone, PartialEq)]
pub struct ClassOptions {
    pub(crate) max_distance_iou: f32,
    pub(crate) max_distance_cosine: f32,
    pub(crate) tracker: TrackerOptions,
    pub(crate) filter: KalmanFilterOptions,
    pub(crate) crowd_expand_ratio: f32,
    pub(crate) crowd_iou_threshold: f32,
    pub(crate) uncrowd_min_iou: f32,
    pub(crate) uncrowd_min_similarity: f32,
    pub(crate) uncrowd_max_unmatched_times: usize,
}

impl Default for ClassOptions {
    fn default() -> Self {
        Self {
            max_distance_iou: 0.7,
            max_distance_cosine: 0.2,
            tracker: TrackerOptions::default(),
            filter: KalmanFilterOptions::default(),
            crowd_expand_ratio: 1.5,
            crowd_iou_threshold: 0.0,
            uncrowd_min_iou: 0.1,
            uncrowd_min_similarity: 0.75,
            uncrowd_max_unmatched_times: 2,
        }
    }
}

impl ClassOptions {
    /// IoU distance (`1 - IoU`) under which a track and a detection are matched spatially.
    ///
    pub fn max_distance_iou(mut self, d: f32) -> Self {
        assert!((0.0..=1.0).contains(&d), "IoU distance must be in [0, 1]");
        self.max_distance_iou = d;
        self
    }

    /// Cosine distance under which a track and a detection are matched by appearance.
    ///
    pub fn max_distance_cosine(mut self, d: f32) -> Self {
        assert!((0.0..=2.0).contains(&d), "Cosine distance must be in [0, 2]");
        self.max_distance_cosine = d;
        self
    }

    pub fn tracker(mut self, opts: TrackerOptions) -> Self {
        self.tracker = opts;
        self
    }

    pub fn filter(mut self, opts: KalmanFilterOptions) -> Self {
        self.filter = opts;
        self
    }

    /// A box is crowded when its copy scaled by `ratio` overlaps another box of the frame.
    ///
    pub fn crowd_expand_ratio(mut self, ratio: f32) -> Self {
        assert!(ratio >= 1.0, "Crowd expansion ratio must be at least 1");
        self.crowd_expand_ratio = ratio;
        self
    }

    /// The IoU of the expanded box with another box above which the box is crowded.
    ///
    /// Zero means any overlap. Faces are usually checked with 0.1, persons with 0.7.
    ///
    pub fn crowd_iou_threshold(mut self, threshold: f32) -> Self {
        assert!(
            (0.0..=1.0).contains(&threshold),
            "Crowd IoU threshold must be in [0, 1]"
        );
        self.crowd_iou_threshold = threshold;
        self
    }

    /// The minimal IoU of an isolated track and detection recalled after the IoU matching.
    ///
    pub fn uncrowd_min_iou(mut self, iou: f32) -> Self {
        assert!((0.0..=1.0).contains(&iou), "IoU must be in [0, 1]");
        self.uncrowd_min_iou = iou;
        self
    }

    /// The minimal shape similarity of a recalled isolated pair.
    ///
    pub fn uncrowd_min_similarity(mut self, similarity: f32) -> Self {
        self.uncrowd_min_similarity = similarity;
        self
    }

    /// Tracks unseen for longer than `n` frames are not recalled.
    ///
    pub fn uncrowd_max_unmatched_times(mut self, n: usize) -> Self {
        self.uncrowd_max_unmatched_times = n;
        self
    }

    pub fn get_max_distance_iou(&self) -> f32 {
        self.max_distance_iou
    }

    pub fn get_max_distance_cosine(&self) -> f32 {
        self.max_distance_cosine
    }

    pub fn get_tracker(&self) -> &TrackerOptions {
        &self.tracker
    }

    pub fn get_filter(&self) -> &KalmanFilterOptions {
        &self.filter
    }
}

/// Class that is used to configure the DeepSORT tracker
///
#[derive(Debug, Clone, PartialEq)]
pub struct DeepSortOptions {
    pub(crate) default: ClassOptions,
    pub(crate) overrides: HashMap<i32, ClassOptions>,
    pub(crate) per_class_ids: bool,
    pub(crate) track_by_class: bool,
    pub(crate) face_mode: bool,
    pub(crate) refine_uncrowd: bool,
}

impl Default for DeepSortOptions {
    fn default() -> Self {
        Self {
            default: ClassOptions::default(),
            overrides: HashMap::default(),
            per_class_ids: false,
            track_by_class: true,
            face_mode: false,
            refine_uncrowd: false,
        }
    }
}

impl DeepSortOptions {
    /// Options used by the classes without an override.
    ///
    pub fn default_class(mut self, opts: ClassOptions) -> Self {
        self.default = opts;
        self
    }

    /// Options of a specific class.
    ///
    pub fn class(mut self, class_id: i32, opts: ClassOptions) -> Self {
        self.overrides.insert(class_id, opts);
        self
    }

    /// Each class gets its own id sequence instead of the shared one.
    ///
    pub fn per_class_ids(mut self, enabled: bool) -> Self {
        self.per_class_ids = enabled;
        self
    }

    /// Detections are matched only against the tracks of the same class.
    ///
    /// When disabled, the whole frame is matched in one pass with the default class options.
    ///
    pub fn track_by_class(mut self, enabled: bool) -> Self {
        self.track_by_class = enabled;
        self
    }

    /// Faces are small and move fast relative to their size: the appearance cost is restricted
    /// by the box overlap instead of the Mahalanobis gate.
    ///
    pub fn face_mode(mut self, enabled: bool) -> Self {
        self.face_mode = enabled;
        self
    }

    /// After the IoU matching, isolated detections are recalled by the shape similarity to
    /// isolated recently seen tracks.
    ///
    pub fn refine_uncrowd(mut self, enabled: bool) -> Self {
        self.refine_uncrowd = enabled;
        self
    }

    /// Options that apply to the class
    ///
    pub fn for_class(&self, class_id: i32) -> &ClassOptions {
        self.overrides.get(&class_id).unwrap_or(&self.default)
    }
}
