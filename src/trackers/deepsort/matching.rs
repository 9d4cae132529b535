use crate::distance::{gate_cost_matrix, restrict_cost_matrix};
use crate::trackers::deepsort::kalman_tracker::KalmanTracker;
use crate::trackers::deepsort::options::ClassOptions;
use crate::trackers::deepsort::store::{TrackHandle, TrackStore};
use crate::trackers::deepsort::Detection;
use crate::utils::bbox::BoundingBox;
use crate::utils::kalman::kalman_2d_box::KalmanFilter;
use crate::utils::munkres;
use anyhow::Result;
use itertools::{iproduct, Itertools};
use log::debug;
use pathfinding::matrix::Matrix;

/// IoU distance above which the appearance match of a face is not considered
pub const FACE_IOU_RESTRICTION: f32 = 0.9;

/// Cost used to associate tracks with detections
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CostMetric {
    /// Gallery cosine distance, restricted by the motion gate or by the box overlap
    Cosine { max_distance: f32, restrict_by_iou: bool },
    /// Squared Mahalanobis distance under the chi-square gate
    Mahalanobis { chi2_threshold: f32 },
    /// `1 - IoU` of the estimated track box and the detection box
    IoU { max_distance: f32 },
}

impl CostMetric {
    /// The metric of the cascade stage
    ///
    pub fn for_cascade(use_reid: bool, face_mode: bool, opts: &ClassOptions) -> Self {
        if use_reid {
            CostMetric::Cosine {
                max_distance: opts.max_distance_cosine,
                restrict_by_iou: face_mode,
            }
        } else {
            CostMetric::Mahalanobis {
                chi2_threshold: opts.filter.get_chi2_threshold(),
            }
        }
    }

    /// The metric of the cascade level: the motion gate narrows by `decay` per level
    ///
    pub fn at_level(&self, level: usize, decay: f32) -> Self {
        match self {
            CostMetric::Mahalanobis { chi2_threshold } => CostMetric::Mahalanobis {
                chi2_threshold: (chi2_threshold - level as f32 * decay).max(0.0),
            },
            other => *other,
        }
    }

    fn threshold(&self) -> f32 {
        match self {
            CostMetric::Cosine { max_distance, .. } | CostMetric::IoU { max_distance } => {
                *max_distance
            }
            CostMetric::Mahalanobis { chi2_threshold } => *chi2_threshold,
        }
    }

    fn accepts(&self, tracker: &KalmanTracker) -> bool {
        match self {
            CostMetric::Cosine { .. } => tracker.has_features(),
            _ => true,
        }
    }

    fn costs(
        &self,
        trackers: &[&KalmanTracker],
        detections: &[&Detection],
        filter: &KalmanFilter,
        opts: &ClassOptions,
    ) -> Matrix<f32> {
        let threshold = self.threshold();
        let mut costs = match self {
            CostMetric::Cosine {
                restrict_by_iou, ..
            } => {
                let mut costs = KalmanTracker::get_cost_matrix_feature(trackers, detections);
                if *restrict_by_iou {
                    let guard = KalmanTracker::get_cost_matrix_bbox(trackers, detections);
                    restrict_cost_matrix(&mut costs, &guard, FACE_IOU_RESTRICTION);
                } else {
                    let guard = KalmanTracker::get_cost_matrix_mahalanobis(
                        trackers,
                        detections,
                        filter,
                        &opts.filter,
                    );
                    restrict_cost_matrix(&mut costs, &guard, opts.filter.get_chi2_threshold());
                }
                costs
            }
            CostMetric::Mahalanobis { .. } => KalmanTracker::get_cost_matrix_mahalanobis(
                trackers,
                detections,
                filter,
                &opts.filter,
            ),
            CostMetric::IoU { .. } => KalmanTracker::get_cost_matrix_bbox(trackers, detections),
        };
        gate_cost_matrix(&mut costs, threshold);
        costs
    }
}

/// Outcome of an association step
///
/// Tracks are referenced by handle, detections by their index in the frame.
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    pub matched: Vec<(TrackHandle, usize)>,
    pub unmatched_tracks: Vec<TrackHandle>,
    pub unmatched_detections: Vec<usize>,
}

impl MatchResult {
    pub fn unmatched(tracks: Vec<TrackHandle>, detections: Vec<usize>) -> Self {
        Self {
            matched: Vec::default(),
            unmatched_tracks: tracks,
            unmatched_detections: detections,
        }
    }

    /// Track matched to the detection
    ///
    pub fn track_of(&self, detection: usize) -> Option<TrackHandle> {
        self.matched
            .iter()
            .find(|(_, d)| *d == detection)
            .map(|(h, _)| *h)
    }

    pub fn is_matched(&self, handle: TrackHandle) -> bool {
        self.matched.iter().any(|(h, _)| *h == handle)
    }

    fn absorb(&mut self, other: MatchResult) {
        self.matched.extend(other.matched);
        self.unmatched_detections = other.unmatched_detections;
    }
}

/// Matching environment of one class pass
///
pub struct Matcher<'a> {
    store: &'a TrackStore,
    filter: &'a KalmanFilter,
    opts: &'a ClassOptions,
    detections: &'a [Detection],
    gate_decay: f32,
}

impl<'a> Matcher<'a> {
    pub fn new(
        store: &'a TrackStore,
        filter: &'a KalmanFilter,
        opts: &'a ClassOptions,
        detections: &'a [Detection],
    ) -> Self {
        Self {
            store,
            filter,
            opts,
            detections,
            gate_decay: 0.0,
        }
    }

    /// Narrows the Mahalanobis gate of the cascade level `t` by `t * decay`.
    ///
    pub fn gate_decay(mut self, decay: f32) -> Self {
        assert!(decay >= 0.0, "Gate decay must be non-negative");
        self.gate_decay = decay;
        self
    }

    /// Solves one assignment between the tracks and the detection indexes
    ///
    /// A pair is accepted only when its cost is under the metric threshold.
    ///
    pub fn match_by(
        &self,
        metric: &CostMetric,
        tracks: &[TrackHandle],
        detections: &[usize],
    ) -> Result<MatchResult> {
        let (handles, trackers): (Vec<_>, Vec<_>) = tracks
            .iter()
            .filter_map(|h| self.store.get(*h).map(|t| (*h, t)))
            .unzip();
        if handles.is_empty() || detections.is_empty() {
            return Ok(MatchResult::unmatched(handles, detections.to_vec()));
        }

        let frame = detections
            .iter()
            .map(|i| &self.detections[*i])
            .collect::<Vec<_>>();
        let costs = metric.costs(&trackers, &frame, self.filter, self.opts);
        let threshold = metric.threshold();
        let solution = munkres::solve(&costs)?;

        let mut result = MatchResult::default();
        let mut taken = vec![false; detections.len()];
        for (row, col) in solution.into_iter().enumerate() {
            match col {
                Some(c) if c < detections.len() && costs[(row, c)] < threshold => {
                    taken[c] = true;
                    result.matched.push((handles[row], detections[c]));
                }
                _ => result.unmatched_tracks.push(handles[row]),
            }
        }
        result.unmatched_detections = detections
            .iter()
            .zip(taken)
            .filter(|(_, t)| !t)
            .map(|(d, _)| *d)
            .collect();

        debug!(
            "{:?}: {} matched, {} tracks and {} detections left",
            metric,
            result.matched.len(),
            result.unmatched_tracks.len(),
            result.unmatched_detections.len()
        );
        Ok(result)
    }

    /// Matches the fresher tracks first
    ///
    /// Level `t` takes the tracks unseen for exactly `t` frames. The cascade stops as soon as all
    /// the detections are matched. With a gate decay, staler levels face a tighter motion gate.
    ///
    pub fn cascade(
        &self,
        metric: &CostMetric,
        tracks: &[TrackHandle],
        detections: Vec<usize>,
    ) -> Result<MatchResult> {
        let mut result = MatchResult::unmatched(Vec::default(), detections);
        for level in 0..self.opts.tracker.max_unmatched_num {
            if result.unmatched_detections.is_empty() {
                break;
            }
            let level_tracks = tracks
                .iter()
                .copied()
                .filter(|h| {
                    self.store
                        .get(*h)
                        .map_or(false, |t| t.unmatched_times() == level && metric.accepts(t))
                })
                .collect::<Vec<_>>();
            if level_tracks.is_empty() {
                continue;
            }
            let level_metric = metric.at_level(level, self.gate_decay);
            let level_result =
                self.match_by(&level_metric, &level_tracks, &result.unmatched_detections)?;
            result.absorb(level_result);
        }

        result.unmatched_tracks = tracks
            .iter()
            .copied()
            .filter(|h| !result.is_matched(*h))
            .collect();
        Ok(result)
    }

    /// Spatial fallback over the recently seen unmatched tracks
    ///
    pub fn iou_fallback(&self, mut result: MatchResult) -> Result<MatchResult> {
        let limit = self.opts.tracker.max_unmatched_times_for_bbox_matching;
        let (candidates, stale): (Vec<_>, Vec<_>) =
            result.unmatched_tracks.iter().copied().partition(|h| {
                self.store
                    .get(*h)
                    .map_or(false, |t| t.unmatched_times() <= limit)
            });

        let metric = CostMetric::IoU {
            max_distance: self.opts.max_distance_iou,
        };
        let iou_result = self.match_by(&metric, &candidates, &result.unmatched_detections)?;

        result.matched.extend(iou_result.matched);
        result.unmatched_detections = iou_result.unmatched_detections;
        result.unmatched_tracks = stale.into_iter().chain(iou_result.unmatched_tracks).collect();
        Ok(result)
    }

    /// Greedy recall of isolated detections by isolated recently seen tracks
    ///
    /// A detection is isolated when its expanded box doesn't overlap another detection of the
    /// pass above the crowd threshold of the class. Tracks are checked against all the live
    /// tracks the same way.
    ///
    pub fn refine_uncrowd(&self, mut result: MatchResult, all_detections: &[usize]) -> MatchResult {
        let opts = self.opts;
        let crowd = |boxes: &[BoundingBox]| {
            isolated(boxes, opts.crowd_expand_ratio, opts.crowd_iou_threshold)
        };
        let detection_boxes = all_detections
            .iter()
            .map(|i| self.detections[*i].bbox)
            .collect::<Vec<_>>();
        let isolated_detections = crowd(&detection_boxes);

        let track_boxes = self
            .store
            .iter()
            .map(|(h, t)| (h, t.bbox()))
            .collect::<Vec<_>>();
        let isolated_tracks = crowd(&track_boxes.iter().map(|(_, b)| *b).collect::<Vec<_>>());
        let isolated_track = |h: TrackHandle| {
            track_boxes
                .iter()
                .position(|(th, _)| *th == h)
                .map_or(false, |i| isolated_tracks[i])
        };

        let mut left = Vec::default();
        for d in result.unmatched_detections.clone() {
            let lonely = all_detections
                .iter()
                .position(|i| *i == d)
                .map_or(false, |i| isolated_detections[i]);
            let bbox = self.detections[d].bbox;

            let candidate = result.unmatched_tracks.iter().copied().find(|h| {
                self.store.get(*h).map_or(false, |t| {
                    let track_box = t.bbox();
                    lonely
                        && isolated_track(*h)
                        && t.unmatched_times() <= opts.uncrowd_max_unmatched_times
                        && track_box.iou(&bbox) > opts.uncrowd_min_iou
                        && track_box.similarity(&bbox) > opts.uncrowd_min_similarity
                })
            });

            match candidate {
                Some(h) => {
                    debug!("Detection {} is recalled by an isolated track", d);
                    result.unmatched_tracks.retain(|t| *t != h);
                    result.matched.push((h, d));
                }
                None => left.push(d),
            }
        }
        result.unmatched_detections = left;
        result
    }
}

/// Marks the boxes whose expanded copy overlaps no other box above `iou_threshold`
///
pub fn isolated(boxes: &[BoundingBox], expand_ratio: f32, iou_threshold: f32) -> Vec<bool> {
    let expanded = boxes
        .iter()
        .map(|b| b.expand(expand_ratio))
        .collect::<Vec<_>>();
    let crowded = iproduct!(0..boxes.len(), 0..boxes.len())
        .filter(|(i, j)| i != j && expanded[*i].iou(&boxes[*j]) > iou_threshold)
        .map(|(i, _)| i)
        .unique()
        .collect::<Vec<_>>();
    (0..boxes.len()).map(|i| !crowded.contains(&i)).collect()
}
