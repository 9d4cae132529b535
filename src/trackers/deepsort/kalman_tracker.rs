use crate::distance::{gallery_distance, iou_distance, GATED_COST};
use crate::track::utils::l2_normalize;
use crate::track::Feature;
use crate::trackers::deepsort::options::{ClassOptions, TrackerOptions};
use crate::trackers::deepsort::store::TrackHandle;
use crate::trackers::deepsort::{Detection, TrackState};
use crate::utils::bbox::{AspectBox, BoundingBox};
use crate::utils::kalman::kalman_2d_box::KalmanFilter;
use crate::utils::kalman::{variances, KalmanFilterOptions, KalmanStage, KalmanState, NoiseRule};
use crate::utils::kalman::DIM_X;
use crate::Errors;
use anyhow::Result;
use log::{debug, warn};
use nalgebra::SMatrix;
use pathfinding::matrix::Matrix;
use std::collections::VecDeque;

/// Life-cycle state of a track
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// The track is new and dies on the first miss
    Probation,
    /// The track was matched enough times and tolerates misses
    Accreditation,
    /// The track is dead and will be removed
    Miss,
}

/// Relative placement of the pair partner
///
/// Offsets and sizes are expressed in the units of the owner's box width and height.
///
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Correlation {
    pub offset_scale_x: f32,
    pub offset_scale_y: f32,
    pub pair_size_scale_x: f32,
    pub pair_size_scale_y: f32,
    pub votes: usize,
}

impl Correlation {
    const UPDATE_WEIGHT: f32 = 0.5;

    fn vote(&mut self, own: &BoundingBox, pair: &BoundingBox) {
        let (own_x, own_y) = own.center();
        let (pair_x, pair_y) = pair.center();
        let current = Correlation {
            offset_scale_x: (pair_x - own_x) / own.width(),
            offset_scale_y: (pair_y - own_y) / own.height(),
            pair_size_scale_x: pair.width() / own.width(),
            pair_size_scale_y: pair.height() / own.height(),
            votes: self.votes + 1,
        };
        if self.votes == 0 {
            *self = current;
            return;
        }

        let w = Self::UPDATE_WEIGHT;
        self.offset_scale_x = self.offset_scale_x * (1.0 - w) + current.offset_scale_x * w;
        self.offset_scale_y = self.offset_scale_y * (1.0 - w) + current.offset_scale_y * w;
        self.pair_size_scale_x = self.pair_size_scale_x * (1.0 - w) + current.pair_size_scale_x * w;
        self.pair_size_scale_y = self.pair_size_scale_y * (1.0 - w) + current.pair_size_scale_y * w;
        self.votes = current.votes;
    }

    /// Expected box of the partner when the owner is at `own`
    ///
    pub fn project(&self, own: &KalmanState, partner_aspect: f32) -> AspectBox {
        let own_box = own.bbox();
        AspectBox::new(
            own.mean[0] + own_box.width() * self.offset_scale_x,
            own.mean[1] + own_box.height() * self.offset_scale_y,
            partner_aspect,
            own_box.height() * self.pair_size_scale_y,
        )
    }
}

/// Link to the track of another class that belongs to the same physical object
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairLink {
    pub handle: TrackHandle,
    pub track_id: u64,
    pub correlation: Correlation,
}

/// Single DeepSORT track
///
#[derive(Debug, Clone)]
pub struct KalmanTracker {
    id: u64,
    class_id: i32,
    state: TrackerState,
    kalman: KalmanState,
    estimate_before_predict: KalmanState,
    features: VecDeque<Feature>,
    feature_update_counter: usize,
    matched_counter: usize,
    unmatched_times: usize,
    ages: usize,
    observed_bbox: BoundingBox,
    confidence: f32,
    pair: Option<PairLink>,
    false_update_times: usize,
    out_count: i32,
}

impl KalmanTracker {
    /// Starts a track on the unmatched detection
    ///
    /// The detection counts as the first match. Its feature seeds the gallery unless the
    /// detection quality is below the initialization threshold.
    ///
    pub fn new(id: u64, detection: &Detection, opts: &ClassOptions, filter: &KalmanFilter) -> Self {
        let kalman = filter.initiate(&detection.bbox.into(), &opts.tracker.initial_noise);
        let mut tracker = Self {
            id,
            class_id: detection.class_id,
            state: TrackerState::Probation,
            kalman,
            estimate_before_predict: kalman,
            features: VecDeque::with_capacity(opts.tracker.feature_budget_size + 1),
            feature_update_counter: 0,
            matched_counter: 1,
            unmatched_times: 0,
            ages: 1,
            observed_bbox: detection.bbox,
            confidence: detection.confidence,
            pair: None,
            false_update_times: 0,
            out_count: 0,
        };

        let quality_ok = !opts.tracker.enable_qa_feature_init
            || detection.quality.unwrap_or(0.0) >= opts.tracker.feature_init_quality_threshold;
        if let (Some(feature), true) = (&detection.feature, quality_ok) {
            tracker.update_feature(feature, &opts.tracker);
        }
        tracker
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn class_id(&self) -> i32 {
        self.class_id
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn kalman_state(&self) -> &KalmanState {
        &self.kalman
    }

    pub fn features(&self) -> &VecDeque<Feature> {
        &self.features
    }

    pub fn has_features(&self) -> bool {
        !self.features.is_empty()
    }

    pub fn matched_counter(&self) -> usize {
        self.matched_counter
    }

    pub fn unmatched_times(&self) -> usize {
        self.unmatched_times
    }

    pub fn ages(&self) -> usize {
        self.ages
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn false_update_times(&self) -> usize {
        self.false_update_times
    }

    pub fn out_count(&self) -> i32 {
        self.out_count
    }

    pub fn set_out_count(&mut self, n: i32) {
        self.out_count = n;
    }

    /// Box estimated by the filter in the (left, top, width, height) form
    ///
    pub fn bbox(&self) -> BoundingBox {
        self.kalman.bbox()
    }

    /// The last detection box merged into the track
    ///
    pub fn observed_bbox(&self) -> BoundingBox {
        self.observed_bbox
    }

    pub fn pair(&self) -> Option<&PairLink> {
        self.pair.as_ref()
    }

    pub fn pair_handle(&self) -> Option<TrackHandle> {
        self.pair.map(|p| p.handle)
    }

    /// Lifecycle state reported to the caller
    ///
    pub fn output_state(&self) -> TrackState {
        match self.state {
            _ if self.ages == 1 => TrackState::New,
            TrackerState::Accreditation => TrackState::Stable,
            TrackerState::Probation | TrackerState::Miss => TrackState::Unstable,
        }
    }

    /// Moves the filter one frame ahead
    ///
    /// When the innovation covariance of the predicted state cannot be factorized, the
    /// covariance is restarted around the predicted mean.
    ///
    pub fn predict(&mut self, filter: &KalmanFilter, opts: &ClassOptions) -> Result<()> {
        let estimate = self.kalman;
        self.kalman = filter.predict(&self.kalman, &opts.filter)?;
        self.estimate_before_predict = estimate;
        if !filter.is_gateable(&self.kalman, &opts.filter) {
            warn!(
                "Track {}: the predicted covariance is degenerate, resetting it",
                self.id
            );
            self.reset_covariance(&opts.tracker.initial_noise);
        }
        self.ages += 1;
        Ok(())
    }

    /// Returns a track left predicted by an aborted frame to its previous estimate
    ///
    /// Tracks that were updated or missed in the frame are not changed.
    ///
    pub(crate) fn cancel_prediction(&mut self) {
        if self.kalman.stage == KalmanStage::Predicted {
            debug!("Track {}: the prediction is cancelled", self.id);
            self.kalman = self.estimate_before_predict;
            self.ages = self.ages.saturating_sub(1);
        }
    }

    fn reset_covariance(&mut self, initial_noise: &[NoiseRule; DIM_X]) {
        let covariance: SMatrix<f32, DIM_X, DIM_X> =
            SMatrix::from_diagonal(&variances(initial_noise, &self.kalman.mean));
        self.kalman.covariance = covariance;
    }

    fn kalman_update(
        &mut self,
        filter: &KalmanFilter,
        opts: &ClassOptions,
        measurement: &AspectBox,
    ) -> Result<()> {
        match filter.update(&self.kalman, measurement, &opts.filter) {
            Ok(state) => {
                self.kalman = state;
                Ok(())
            }
            Err(e) if e.downcast_ref::<Errors>() == Some(&Errors::CovarianceNotPositiveDefinite) => {
                warn!(
                    "Track {}: the update failed on a degenerate covariance, resetting it",
                    self.id
                );
                self.reset_covariance(&opts.tracker.initial_noise);
                self.kalman = match filter.update(&self.kalman, measurement, &opts.filter) {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(
                            "Track {}: the update failed after the reset ({}), restarting at the detection",
                            self.id, e
                        );
                        filter.initiate(measurement, &opts.tracker.initial_noise)
                    }
                };
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Merges the matched detection box into the filter
    ///
    pub fn update(
        &mut self,
        filter: &KalmanFilter,
        opts: &ClassOptions,
        detection: &Detection,
    ) -> Result<()> {
        self.kalman_update(filter, opts, &detection.bbox.into())?;
        self.observed_bbox = detection.bbox;
        self.confidence = detection.confidence;
        Ok(())
    }

    /// Appends the L2-normalized feature to the gallery
    ///
    /// The first feature is always taken. Then every `feature_update_interval`-th call appends,
    /// evicting the oldest entries beyond `feature_budget_size`.
    ///
    pub fn update_feature(&mut self, feature: &Feature, opts: &TrackerOptions) {
        if self.features.is_empty() {
            self.features.push_back(l2_normalize(feature));
            self.feature_update_counter = 0;
            return;
        }

        self.feature_update_counter += 1;
        if self.feature_update_counter >= opts.feature_update_interval {
            self.features.push_back(l2_normalize(feature));
            self.feature_update_counter = 0;
            while self.features.len() > opts.feature_budget_size {
                self.features.pop_front();
            }
        }
    }

    /// Checks the quality rules for a matched detection's feature
    ///
    pub fn accepts_feature_of(detection: &Detection, opts: &TrackerOptions) -> bool {
        match (opts.enable_qa_feature_update, detection.quality) {
            (true, q) => q.unwrap_or(0.0) > opts.feature_update_quality_threshold,
            (false, Some(q)) => q != 0.0,
            (false, None) => true,
        }
    }

    /// Advances the life-cycle state machine
    ///
    /// A miss also closes the predict/update cycle of the filter: the predicted state is
    /// kept as the estimate for the next frame.
    ///
    pub fn update_state(&mut self, is_matched: bool, opts: &TrackerOptions) {
        if self.state == TrackerState::Miss {
            return;
        }

        if is_matched {
            if self.state == TrackerState::Probation {
                self.matched_counter += 1;
                if self.matched_counter >= opts.accreditation_threshold {
                    debug!("Track {} is accredited", self.id);
                    self.state = TrackerState::Accreditation;
                }
            }
            self.unmatched_times = 0;
            return;
        }

        self.kalman.stage = KalmanStage::Updated;
        match self.state {
            TrackerState::Probation => self.state = TrackerState::Miss,
            _ => {
                self.unmatched_times += 1;
                if self.unmatched_times > opts.max_unmatched_num {
                    self.state = TrackerState::Miss;
                }
            }
        }
    }

    /// Promotes a new track confirmed by an accredited pair partner
    ///
    pub(crate) fn accredit(&mut self) {
        if self.state == TrackerState::Probation {
            self.state = TrackerState::Accreditation;
        }
    }

    /// Records the current placement of the partner relative to this track
    ///
    pub fn update_pair_info(&mut self, handle: TrackHandle, partner: &KalmanTracker) {
        match self.pair.as_mut() {
            Some(link) if link.handle == handle => {}
            current => {
                if let Some(old) = current {
                    warn!(
                        "Track {} is relinked from pair track {} to {}",
                        self.id, old.track_id, partner.id
                    );
                }
                self.pair = Some(PairLink {
                    handle,
                    track_id: partner.id,
                    correlation: Correlation::default(),
                });
            }
        }

        let own = self.bbox();
        if let Some(link) = self.pair.as_mut() {
            link.correlation.vote(&own, &partner.bbox());
        }
    }

    pub fn reset_pair_info(&mut self) {
        if let Some(link) = self.pair.take() {
            debug!("Track {} drops the pair track {}", self.id, link.track_id);
        }
    }

    /// Moves the unobserved track along with its matched partner
    ///
    /// The measurement is the box the partner's correlation places this track at. The miss
    /// counter still grows but stays below the death limit.
    ///
    pub fn false_update_from_pair(
        &mut self,
        partner: &KalmanTracker,
        filter: &KalmanFilter,
        opts: &ClassOptions,
    ) -> Result<bool> {
        let correlation = match partner.pair {
            Some(link) if link.track_id == self.id && link.correlation.votes > 0 => {
                link.correlation
            }
            _ => {
                warn!(
                    "Track {} is not correlated by its pair track {}",
                    self.id, partner.id
                );
                return Ok(false);
            }
        };

        let measurement = correlation.project(&partner.kalman, self.kalman.mean[2]);
        if BoundingBox::from(measurement).validate().is_err() {
            return Ok(false);
        }

        debug!(
            "Track {} is updated from its pair track {}",
            self.id, partner.id
        );
        self.kalman_update(filter, opts, &measurement)?;
        self.unmatched_times = (self.unmatched_times + 1).min(opts.tracker.pair_update_ceiling());
        self.false_update_times += 1;
        Ok(true)
    }

    /// Mahalanobis distances to the detections, `None` for a degenerate covariance
    ///
    pub fn gating_distances(
        &self,
        filter: &KalmanFilter,
        opts: &KalmanFilterOptions,
        detections: &[&Detection],
    ) -> Option<Vec<f32>> {
        let measurements = detections
            .iter()
            .map(|d| AspectBox::from(&d.bbox))
            .collect::<Vec<_>>();
        match filter.mahalanobis(&self.kalman, &measurements, opts) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!("Track {}: gating distance is unavailable: {}", self.id, e);
                None
            }
        }
    }

    /// Appearance cost matrix: rows are tracks, columns are detections
    ///
    /// Detections without a feature and tracks with an empty gallery get [GATED_COST].
    ///
    pub fn get_cost_matrix_feature(
        trackers: &[&KalmanTracker],
        detections: &[&Detection],
    ) -> Matrix<f32> {
        let mut costs = Matrix::new(trackers.len(), detections.len(), GATED_COST);
        for (r, t) in trackers.iter().enumerate() {
            for (c, d) in detections.iter().enumerate() {
                if let Some(dist) = d
                    .feature
                    .as_ref()
                    .and_then(|f| gallery_distance(&t.features, f))
                {
                    costs[(r, c)] = dist;
                }
            }
        }
        costs
    }

    /// Spatial cost matrix over the estimated track boxes
    ///
    pub fn get_cost_matrix_bbox(
        trackers: &[&KalmanTracker],
        detections: &[&Detection],
    ) -> Matrix<f32> {
        let mut costs = Matrix::new(trackers.len(), detections.len(), 1.0);
        for (r, t) in trackers.iter().enumerate() {
            let bbox = t.bbox();
            for (c, d) in detections.iter().enumerate() {
                costs[(r, c)] = iou_distance(&bbox, &d.bbox);
            }
        }
        costs
    }

    /// Squared Mahalanobis cost matrix, a degenerate track gets a row of [GATED_COST]
    ///
    pub fn get_cost_matrix_mahalanobis(
        trackers: &[&KalmanTracker],
        detections: &[&Detection],
        filter: &KalmanFilter,
        opts: &KalmanFilterOptions,
    ) -> Matrix<f32> {
        let mut costs = Matrix::new(trackers.len(), detections.len(), GATED_COST);
        for (r, t) in trackers.iter().enumerate() {
            if let Some(distances) = t.gating_distances(filter, opts, detections) {
                for (c, d) in distances.into_iter().enumerate() {
                    costs[(r, c)] = d;
                }
            }
        }
        costs
    }
}
