//! DeepSORT multi-object tracker with the face/person pair extension.
//!
//! Every frame the tracks are predicted with the Kalman filter, associated with the detections by
//! a cascade of appearance (or motion) matching followed by the box-overlap matching, and updated.
//! The unmatched detections start new tracks. [DeepSort::track_pairs] additionally ties the tracks
//! of a part (face or head) and its body together, so a briefly occluded part keeps following
//! the body.
//!
use crate::track::Feature;
use crate::trackers::deepsort::kalman_tracker::{KalmanTracker, TrackerState};
use crate::trackers::deepsort::matching::{CostMetric, MatchResult, Matcher};
use crate::trackers::deepsort::options::{ClassOptions, DeepSortOptions};
use crate::trackers::deepsort::pair::{collect_links, pair_detections, DetectionPairs, PairSpec};
use crate::trackers::deepsort::store::{TrackHandle, TrackStore};
use crate::utils::bbox::BoundingBox;
use crate::utils::kalman::kalman_2d_box::KalmanFilter;
use crate::Errors;
use anyhow::Result;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Single track
pub mod kalman_tracker;
/// Track-to-detection association
pub mod matching;
/// Tracker configuration
pub mod options;
/// Part-to-body pairing
pub mod pair;
/// Track storage
pub mod store;

/// Detected object of one frame
///
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: i32,
    pub confidence: f32,
    pub feature: Option<Feature>,
    pub quality: Option<f32>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class_id: i32, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
            feature: None,
            quality: None,
        }
    }

    /// Appearance feature used by the re-identification matching
    ///
    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.feature = Some(feature);
        self
    }

    /// Quality of the detection crop, used by the gallery quality rules
    ///
    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = Some(quality);
        self
    }
}

/// Track state reported to the caller
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// The track was created in this frame
    New,
    /// The track is not confirmed yet
    Unstable,
    /// The track is confirmed
    Stable,
}

/// Track assigned to an input detection
///
#[derive(Debug, Clone, PartialEq)]
pub struct TrackAssignment {
    pub track_id: u64,
    pub class_id: i32,
    pub state: TrackState,
    /// Box estimated by the filter
    pub bbox: BoundingBox,
    /// `false` when the detection started a new track
    pub matched: bool,
}

/// Live track listing entry
///
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub track_id: u64,
    pub class_id: i32,
    pub state: TrackState,
    pub bbox: BoundingBox,
    pub out_count: i32,
}

impl From<&KalmanTracker> for TrackInfo {
    fn from(t: &KalmanTracker) -> Self {
        Self {
            track_id: t.id(),
            class_id: t.class_id(),
            state: t.output_state(),
            bbox: t.bbox(),
            out_count: t.out_count(),
        }
    }
}

/// Matching pass over a group of detections
///
struct Pass {
    opts: ClassOptions,
    tracks: Vec<TrackHandle>,
    detections: Vec<usize>,
}

/// DeepSORT tracker
///
pub struct DeepSort {
    opts: DeepSortOptions,
    filter: KalmanFilter,
    store: TrackStore,
    accredited: Vec<TrackHandle>,
    probation: Vec<TrackHandle>,
    next_id: u64,
    class_next_id: HashMap<i32, u64>,
    frame: u64,
}

impl Default for DeepSort {
    fn default() -> Self {
        Self::new(DeepSortOptions::default())
    }
}

impl DeepSort {
    pub fn new(opts: DeepSortOptions) -> Self {
        Self {
            opts,
            filter: KalmanFilter::default(),
            store: TrackStore::default(),
            accredited: Vec::default(),
            probation: Vec::default(),
            next_id: 0,
            class_next_id: HashMap::default(),
            frame: 0,
        }
    }

    pub fn options(&self) -> &DeepSortOptions {
        &self.opts
    }

    /// Replaces the options of the class, the live tracks pick them up on the next frame
    ///
    pub fn set_options(&mut self, class_id: i32, opts: ClassOptions) {
        self.opts.overrides.insert(class_id, opts);
    }

    /// Replaces the options of the classes without an override
    ///
    pub fn set_default_options(&mut self, opts: ClassOptions) {
        self.opts.default = opts;
    }

    /// The number of processed frames
    ///
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Tracks one frame
    ///
    /// # Parameters
    /// * `detections` - detections of the frame
    /// * `use_reid` - associate by the appearance features; every detection must carry a feature
    ///   of the same dimension, or none of them must
    ///
    /// Returns one assignment per detection, in the input order. Invalid input is rejected before
    /// the tracker state is touched. When the frame fails midway, the tracks left predicted are
    /// returned to their previous estimates, so the next frame is processed normally.
    ///
    pub fn track(
        &mut self,
        detections: &[Detection],
        use_reid: bool,
    ) -> Result<Vec<TrackAssignment>> {
        let use_reid = Self::validate(detections, use_reid)?;
        let mut assigned = vec![None; detections.len()];
        let res = self.regular_passes(detections, use_reid, |_| true, &mut assigned);
        self.settle(res, &assigned)
    }

    fn regular_passes<F>(
        &mut self,
        detections: &[Detection],
        use_reid: bool,
        filter: F,
        assigned: &mut [Option<(TrackHandle, bool)>],
    ) -> Result<()>
    where
        F: Fn(i32) -> bool,
    {
        for pass in self.passes(detections, filter) {
            self.predict(&pass.tracks, &pass.opts)?;
            let result = self.associate(&pass, detections, use_reid, 0.0)?;
            self.apply_matches(&result, detections, &pass.opts, assigned)?;
            self.miss(&result.unmatched_tracks, &pass.opts, &HashSet::default());
            self.store.purge();
            self.spawn(&result.unmatched_detections, detections, &pass.opts, assigned);
        }
        Ok(())
    }

    /// Tracks one frame with the part and the body classes of `spec` tied together
    ///
    /// Detections of the other classes are tracked as by [DeepSort::track].
    ///
    pub fn track_pairs(
        &mut self,
        detections: &[Detection],
        spec: &PairSpec,
        use_reid: bool,
    ) -> Result<Vec<TrackAssignment>> {
        let use_reid = Self::validate(detections, use_reid)?;
        let mut assigned = vec![None; detections.len()];
        let res = self
            .paired_passes(detections, spec, use_reid, &mut assigned)
            .and_then(|_| {
                self.regular_passes(
                    detections,
                    use_reid,
                    |c| !spec.is_paired_class(c),
                    &mut assigned,
                )
            });
        self.settle(res, &assigned)
    }

    fn paired_passes(
        &mut self,
        detections: &[Detection],
        spec: &PairSpec,
        use_reid: bool,
        assigned: &mut [Option<(TrackHandle, bool)>],
    ) -> Result<()> {
        let primary = self.class_pass(detections, spec.primary);
        let secondary = self.class_pass(detections, spec.secondary);
        self.predict(&primary.tracks, &primary.opts)?;
        self.predict(&secondary.tracks, &secondary.opts)?;

        let pairs = pair_detections(spec, detections, &primary.detections, &secondary.detections)?;

        let mut primary_result =
            self.associate(&primary, detections, use_reid, spec.cascade_gate_decay)?;

        // a matched part brings its body along
        let recalled = primary_result
            .matched
            .iter()
            .filter_map(|(h, d)| {
                let body = pairs.secondary_of(*d)?;
                let partner = self.store.get(*h)?.pair_handle()?;
                secondary.tracks.contains(&partner).then_some((partner, body))
            })
            .collect::<Vec<_>>();
        let secondary_rest = Pass {
            opts: secondary.opts.clone(),
            tracks: secondary
                .tracks
                .iter()
                .copied()
                .filter(|h| !recalled.iter().any(|(r, _)| r == h))
                .collect(),
            detections: secondary
                .detections
                .iter()
                .copied()
                .filter(|d| !recalled.iter().any(|(_, r)| r == d))
                .collect(),
        };
        let mut secondary_result =
            self.associate(&secondary_rest, detections, use_reid, spec.cascade_gate_decay)?;
        for r in &recalled {
            debug!("Body detection {} is recalled by its part", r.1);
        }
        secondary_result.matched.extend(recalled);

        // a matched body brings its part along
        for (h, body) in secondary_result.matched.clone() {
            let part = match pairs.primary_of(body) {
                Some(part) if primary_result.unmatched_detections.contains(&part) => part,
                _ => continue,
            };
            let partner = match self.store.get(h).and_then(|t| t.pair_handle()) {
                Some(p) if primary_result.unmatched_tracks.contains(&p) => p,
                _ => continue,
            };
            debug!("Part detection {} is recalled by its body", part);
            primary_result.unmatched_detections.retain(|d| *d != part);
            primary_result.unmatched_tracks.retain(|t| *t != partner);
            primary_result.matched.push((partner, part));
        }

        self.apply_matches(&primary_result, detections, &primary.opts, assigned)?;
        self.apply_matches(&secondary_result, detections, &secondary.opts, assigned)?;
        let spawned = [
            self.spawn(
                &primary_result.unmatched_detections,
                detections,
                &primary.opts,
                assigned,
            ),
            self.spawn(
                &secondary_result.unmatched_detections,
                detections,
                &secondary.opts,
                assigned,
            ),
        ]
        .concat();
        self.confirm_by_pair(&spawned, detections, &pairs, assigned);

        let seen = assigned.iter().flatten().map(|(h, _)| *h).collect::<HashSet<_>>();
        let handles = assigned
            .iter()
            .map(|a| a.map(|(h, _)| h))
            .collect::<Vec<_>>();
        let links = collect_links(&self.store, spec, &pairs, &handles, &seen);
        let mut exempt = HashSet::default();
        let mut failure = None;
        for (p, s) in links {
            let updated = match (seen.contains(&p), seen.contains(&s)) {
                (true, true) => {
                    self.store.link(p, s);
                    continue;
                }
                (true, false) => self.false_update(s, p, &secondary.opts).map(|u| (s, u)),
                (false, true) => self.false_update(p, s, &primary.opts).map(|u| (p, u)),
                (false, false) => continue,
            };
            match updated {
                Ok((h, true)) => {
                    exempt.insert(h);
                }
                Ok(_) => {}
                Err(e) if failure.is_none() => failure = Some(e),
                Err(e) => warn!("Pair bookkeeping failed: {}", e),
            }
        }

        // the misses close the frame of the unmatched tracks before any error is reported
        self.miss(&primary_result.unmatched_tracks, &primary.opts, &exempt);
        self.miss(&secondary_result.unmatched_tracks, &secondary.opts, &exempt);
        self.store.purge();
        failure.map_or(Ok(()), Err)
    }

    /// Checks the frame and decides whether the appearance matching is possible
    ///
    fn validate(detections: &[Detection], use_reid: bool) -> Result<bool> {
        for d in detections {
            d.bbox.validate().map_err(|e| {
                warn!("The frame is rejected: {}", e);
                e
            })?;
        }
        if !use_reid {
            return Ok(false);
        }

        let features = detections
            .iter()
            .filter_map(|d| d.feature.as_ref())
            .collect::<Vec<_>>();
        if features.is_empty() {
            debug!("No features in the frame, the appearance matching is skipped");
            return Ok(false);
        }
        if features.len() != detections.len() {
            warn!(
                "The frame is rejected: {} detections, {} features",
                detections.len(),
                features.len()
            );
            return Err(Errors::DetectionFeatureMismatch {
                detections: detections.len(),
                features: features.len(),
            }
            .into());
        }
        let expected = features[0].len();
        if let Some(f) = features.iter().find(|f| f.len() != expected) {
            warn!("The frame is rejected: feature dimensions differ");
            return Err(Errors::FeatureDimensionMismatch {
                expected,
                actual: f.len(),
            }
            .into());
        }
        Ok(true)
    }

    /// Matching passes of the frame for the classes accepted by `filter`
    ///
    /// A class is processed when it has detections or live tracks. Without class separation
    /// all the accepted detections and tracks form a single pass.
    ///
    fn passes<F>(&self, detections: &[Detection], filter: F) -> Vec<Pass>
    where
        F: Fn(i32) -> bool,
    {
        if !self.opts.track_by_class {
            let tracks = self.indexed_tracks(|t| filter(t.class_id()));
            let detections = (0..detections.len())
                .filter(|i| filter(detections[*i].class_id))
                .collect::<Vec<_>>();
            if tracks.is_empty() && detections.is_empty() {
                return Vec::default();
            }
            return vec![Pass {
                opts: self.opts.default.clone(),
                tracks,
                detections,
            }];
        }

        let classes = detections
            .iter()
            .map(|d| d.class_id)
            .chain(self.store.iter().map(|(_, t)| t.class_id()))
            .filter(|c| filter(*c))
            .collect::<BTreeSet<_>>();
        classes
            .into_iter()
            .map(|c| self.class_pass(detections, c))
            .collect()
    }

    fn class_pass(&self, detections: &[Detection], class_id: i32) -> Pass {
        Pass {
            opts: self.opts.for_class(class_id).clone(),
            tracks: self.indexed_tracks(|t| t.class_id() == class_id),
            detections: (0..detections.len())
                .filter(|i| detections[*i].class_id == class_id)
                .collect(),
        }
    }

    /// Accredited tracks first, then the probation ones
    ///
    fn indexed_tracks<F>(&self, filter: F) -> Vec<TrackHandle>
    where
        F: Fn(&KalmanTracker) -> bool,
    {
        self.accredited
            .iter()
            .chain(self.probation.iter())
            .copied()
            .filter(|h| self.store.get(*h).map_or(false, &filter))
            .collect()
    }

    fn predict(&mut self, tracks: &[TrackHandle], opts: &ClassOptions) -> Result<()> {
        for h in tracks {
            if let Some(t) = self.store.get_mut(*h) {
                t.predict(&self.filter, opts)?;
            }
        }
        Ok(())
    }

    fn associate(
        &self,
        pass: &Pass,
        detections: &[Detection],
        use_reid: bool,
        gate_decay: f32,
    ) -> Result<MatchResult> {
        let matcher =
            Matcher::new(&self.store, &self.filter, &pass.opts, detections).gate_decay(gate_decay);
        let metric = CostMetric::for_cascade(use_reid, self.opts.face_mode, &pass.opts);
        let result = matcher.cascade(&metric, &pass.tracks, pass.detections.clone())?;
        let result = matcher.iou_fallback(result)?;
        Ok(if self.opts.refine_uncrowd {
            matcher.refine_uncrowd(result, &pass.detections)
        } else {
            result
        })
    }

    fn apply_matches(
        &mut self,
        result: &MatchResult,
        detections: &[Detection],
        opts: &ClassOptions,
        assigned: &mut [Option<(TrackHandle, bool)>],
    ) -> Result<()> {
        for (h, d) in &result.matched {
            let detection = &detections[*d];
            let t = match self.store.get_mut(*h) {
                Some(t) => t,
                None => continue,
            };
            t.update(&self.filter, opts, detection)?;
            if let Some(feature) = detection.feature.as_ref() {
                if KalmanTracker::accepts_feature_of(detection, &opts.tracker) {
                    t.update_feature(feature, &opts.tracker);
                }
            }
            t.update_state(true, &opts.tracker);
            assigned[*d] = Some((*h, true));
        }
        Ok(())
    }

    fn miss(&mut self, tracks: &[TrackHandle], opts: &ClassOptions, exempt: &HashSet<TrackHandle>) {
        for h in tracks.iter().filter(|h| !exempt.contains(h)) {
            if let Some(t) = self.store.get_mut(*h) {
                t.update_state(false, &opts.tracker);
            }
        }
    }

    fn spawn(
        &mut self,
        unmatched: &[usize],
        detections: &[Detection],
        opts: &ClassOptions,
        assigned: &mut [Option<(TrackHandle, bool)>],
    ) -> Vec<TrackHandle> {
        unmatched
            .iter()
            .map(|d| {
                let detection = &detections[*d];
                let id = self.next_track_id(detection.class_id);
                info!("Track {} (class {}) is created", id, detection.class_id);
                let h = self
                    .store
                    .insert(KalmanTracker::new(id, detection, opts, &self.filter));
                assigned[*d] = Some((h, false));
                h
            })
            .collect()
    }

    fn next_track_id(&mut self, class_id: i32) -> u64 {
        let counter = if self.opts.per_class_ids {
            self.class_next_id.entry(class_id).or_insert(0)
        } else {
            &mut self.next_id
        };
        *counter += 1;
        *counter
    }

    /// New tracks paired with a confident accredited track seen in this frame are accredited
    ///
    fn confirm_by_pair(
        &mut self,
        spawned: &[TrackHandle],
        detections: &[Detection],
        pairs: &DetectionPairs,
        assigned: &[Option<(TrackHandle, bool)>],
    ) {
        for (d, (h, _)) in assigned
            .iter()
            .enumerate()
            .filter_map(|(d, a)| a.map(|a| (d, a)))
            .filter(|(_, (h, _))| spawned.contains(h))
        {
            let partner = pairs
                .partner_of(d)
                .and_then(|p| assigned[p])
                .filter(|(_, matched)| *matched)
                .and_then(|(ph, _)| self.store.get(ph));
            let confirmed = partner.map_or(false, |p| {
                p.state() == TrackerState::Accreditation && p.unmatched_times() == 0
            }) && detections[d].confidence > 0.5;
            if confirmed {
                if let Some(t) = self.store.get_mut(h) {
                    debug!("Track {} is confirmed by its pair track", t.id());
                    t.accredit();
                }
            }
        }
    }

    fn false_update(
        &mut self,
        unseen: TrackHandle,
        partner: TrackHandle,
        opts: &ClassOptions,
    ) -> Result<bool> {
        let partner = match self.store.get(partner) {
            Some(p) => p.clone(),
            None => return Ok(false),
        };
        match self.store.get_mut(unseen) {
            Some(t) => t.false_update_from_pair(&partner, &self.filter, opts),
            None => Ok(false),
        }
    }

    /// Completes the frame, or undoes the predictions of the tracks the failed frame left behind
    ///
    fn settle(
        &mut self,
        res: Result<()>,
        assigned: &[Option<(TrackHandle, bool)>],
    ) -> Result<Vec<TrackAssignment>> {
        match res {
            Ok(()) => self.finish_frame(assigned),
            Err(e) => {
                warn!("Frame {} is aborted: {}", self.frame + 1, e);
                for (_, t) in self.store.iter_mut() {
                    t.cancel_prediction();
                }
                self.reindex();
                Err(e)
            }
        }
    }

    fn reindex(&mut self) {
        self.accredited.clear();
        self.probation.clear();
        for (h, t) in self.store.iter() {
            match t.state() {
                TrackerState::Accreditation => self.accredited.push(h),
                TrackerState::Probation => self.probation.push(h),
                TrackerState::Miss => {}
            }
        }
    }

    fn finish_frame(
        &mut self,
        assigned: &[Option<(TrackHandle, bool)>],
    ) -> Result<Vec<TrackAssignment>> {
        self.frame += 1;
        self.reindex();

        assigned
            .iter()
            .enumerate()
            .map(|(d, a)| -> Result<TrackAssignment> {
                let t = a
                    .and_then(|(h, matched)| self.store.get(h).map(|t| (t, matched)));
                let (t, matched) = t.ok_or(Errors::UnassignedDetection(d))?;
                Ok(TrackAssignment {
                    track_id: t.id(),
                    class_id: t.class_id(),
                    state: t.output_state(),
                    bbox: t.bbox(),
                    matched,
                })
            })
            .collect()
    }

    /// Live tracks in the creation order
    ///
    pub fn trackers(&self) -> Vec<TrackInfo> {
        self.store.iter().map(|(_, t)| TrackInfo::from(t)).collect()
    }

    pub fn tracker_by_id(&self, id: u64) -> Option<TrackInfo> {
        self.store
            .find(id)
            .and_then(|h| self.store.get(h))
            .map(TrackInfo::from)
    }

    /// Accredited tracks without a detection in the last frame
    ///
    pub fn trackers_unmatched_last_time(&self) -> Vec<TrackInfo> {
        self.store
            .iter()
            .filter(|(_, t)| t.state() == TrackerState::Accreditation && t.unmatched_times() > 0)
            .map(|(_, t)| TrackInfo {
                state: TrackState::Stable,
                ..TrackInfo::from(t)
            })
            .collect()
    }

    /// Stores the caller's counter on the track
    ///
    pub fn set_out_count(&mut self, id: u64, n: i32) -> Result<()> {
        let h = self.store.find(id).ok_or(Errors::MissingTrack(id))?;
        let t = self.store.get_mut(h).ok_or(Errors::MissingTrack(id))?;
        t.set_out_count(n);
        Ok(())
    }

    /// Restarts the id sequences
    ///
    /// Allowed only when no track is alive, so an id is never reused by a concurrent track.
    ///
    pub fn clean_counter(&mut self) -> Result<()> {
        if !self.store.is_empty() {
            return Err(Errors::CounterInUse(self.store.len()).into());
        }
        self.next_id = 0;
        self.class_next_id.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::examples::{BoxGen2, DetectionGen};
    use crate::track::utils::FromVec;
    use crate::track::Feature;
    use crate::trackers::deepsort::options::{ClassOptions, DeepSortOptions, TrackerOptions};
    use crate::trackers::deepsort::pair::{PairKind, PairSpec};
    use crate::trackers::deepsort::{DeepSort, Detection, TrackState};
    use crate::utils::bbox::BoundingBox;
    use crate::Errors;

    const FACE: i32 = 0;
    const PERSON: i32 = 1;

    fn boxed(x: f32, y: f32) -> Detection {
        Detection::new(BoundingBox::new(x, y, 20.0, 40.0), 0, 0.9)
    }

    fn with_feature(d: Detection, f: &[f32]) -> Detection {
        d.with_feature(Feature::from_vec(f.to_vec()))
    }

    #[test]
    fn identical_boxes_without_features() {
        let mut tracker = DeepSort::default();
        let first = tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].track_id, 1);
        assert_eq!(first[0].state, TrackState::New);
        assert!(!first[0].matched);

        let second = tracker.track(&[boxed(10.0, 10.0)], true).unwrap();
        assert_eq!(second[0].track_id, 1);
        assert!(second[0].matched);
        assert_eq!(second[0].state, TrackState::Unstable);

        let third = tracker.track(&[boxed(10.0, 10.0)], true).unwrap();
        assert_eq!(third[0].state, TrackState::Stable);
        assert_eq!(tracker.trackers().len(), 1);
    }

    #[test]
    fn far_detection_spawns_track() {
        let mut tracker = DeepSort::default();
        for _ in 0..3 {
            tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        }
        let res = tracker
            .track(&[boxed(11.0, 10.0), boxed(500.0, 500.0)], false)
            .unwrap();
        dbg!(&res);
        assert_eq!(res[0].track_id, 1);
        assert!(res[0].matched);
        assert_eq!(res[1].track_id, 2);
        assert!(!res[1].matched);
        assert_eq!(res[1].state, TrackState::New);
    }

    #[test]
    fn appearance_keeps_identities() {
        let mut tracker = DeepSort::default();
        let a = [1.0, 0.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0, 0.0];
        for i in 0..4 {
            let x = i as f32;
            let res = tracker
                .track(
                    &[
                        with_feature(boxed(x, 0.0), &a),
                        with_feature(boxed(30.0 + x, 0.0), &b),
                    ],
                    true,
                )
                .unwrap();
            assert_eq!(
                res.iter().map(|r| r.track_id).collect::<Vec<_>>(),
                vec![1, 2]
            );
        }

        // the order of the detections changes, the identities don't
        let res = tracker
            .track(
                &[
                    with_feature(boxed(34.0, 0.0), &b),
                    with_feature(boxed(4.0, 0.0), &a),
                ],
                true,
            )
            .unwrap();
        assert_eq!(res[0].track_id, 2);
        assert_eq!(res[1].track_id, 1);
        assert!(res.iter().all(|r| r.state == TrackState::Stable));
    }

    #[test]
    fn accredited_track_dies_after_misses() {
        let opts = DeepSortOptions::default().default_class(
            ClassOptions::default().tracker(TrackerOptions::default().max_unmatched_num(3)),
        );
        let mut tracker = DeepSort::new(opts);
        for _ in 0..3 {
            tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        }
        for i in 1..=3 {
            tracker.track(&[], false).unwrap();
            assert_eq!(tracker.trackers().len(), 1);
            let unseen = tracker.trackers_unmatched_last_time();
            assert_eq!(unseen.len(), 1);
            assert_eq!(unseen[0].state, TrackState::Stable);
            dbg!(i, &unseen);
        }
        tracker.track(&[], false).unwrap();
        assert!(tracker.trackers().is_empty());
        assert!(tracker.tracker_by_id(1).is_none());
    }

    #[test]
    fn probation_track_dies_on_first_miss() {
        let mut tracker = DeepSort::default();
        tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        tracker.track(&[], false).unwrap();
        assert!(tracker.trackers().is_empty());

        let res = tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        assert_eq!(res[0].track_id, 2);
    }

    #[test]
    fn invalid_input_leaves_tracker_untouched() {
        let mut tracker = DeepSort::default();
        let f = [1.0, 0.0];
        tracker.track(&[with_feature(boxed(0.0, 0.0), &f)], true).unwrap();
        let before = tracker.trackers();

        let err = tracker
            .track(&[with_feature(boxed(0.0, 0.0), &f), boxed(50.0, 0.0)], true)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<Errors>(),
            Some(&Errors::DetectionFeatureMismatch {
                detections: 2,
                features: 1
            })
        );

        let long = vec![1.0; 20];
        let err = tracker
            .track(
                &[with_feature(boxed(0.0, 0.0), &f), with_feature(boxed(50.0, 0.0), &long)],
                true,
            )
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<Errors>(),
            Some(&Errors::FeatureDimensionMismatch {
                expected: 1,
                actual: 3
            })
        );

        let broken = Detection::new(BoundingBox::new(0.0, 0.0, 0.0, 10.0), 0, 0.9);
        let err = tracker.track(&[broken], false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::MalformedBox(..))
        ));

        assert_eq!(tracker.trackers(), before);
        assert_eq!(tracker.frame(), 1);

        // the stage protocol is intact after the rejected frames
        let res = tracker.track(&[with_feature(boxed(0.0, 0.0), &f)], true).unwrap();
        assert_eq!(res[0].track_id, 1);
        assert!(res[0].matched);
    }

    #[test]
    fn overflowing_boxes_keep_tracker_usable() {
        let mut tracker = DeepSort::default();
        tracker.track(&[boxed(10.0, 10.0)], false).unwrap();

        let huge = Detection::new(BoundingBox::new(3e38, 0.0, 3e38, 10.0), 0, 0.9);
        let err = tracker.track(&[huge], false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::MalformedBox(..))
        ));

        // a valid box far enough to overflow the motion distance is gated, not fatal
        let far = Detection::new(BoundingBox::new(1e30, 0.0, 20.0, 40.0), 0, 0.9);
        let res = tracker.track(&[boxed(10.0, 10.0), far], false).unwrap();
        dbg!(&res);
        assert_eq!(res[0].track_id, 1);
        assert!(res[0].matched);
        assert_eq!(res[1].track_id, 2);
        assert!(!res[1].matched);

        let res = tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        assert_eq!(res[0].track_id, 1);
        assert!(res[0].matched);
    }

    #[test]
    fn aborted_frame_is_rolled_back() {
        let mut tracker = DeepSort::default();
        tracker.track(&[boxed(10.0, 10.0)], false).unwrap();

        let pass = tracker.class_pass(&[], FACE);
        tracker.predict(&pass.tracks, &pass.opts).unwrap();
        let err = tracker
            .settle(Err(Errors::NonFiniteCost(0, 0).into()), &[])
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<Errors>(),
            Some(&Errors::NonFiniteCost(0, 0))
        );
        assert_eq!(tracker.frame(), 1);

        let res = tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        assert_eq!(res[0].track_id, 1);
        assert!(res[0].matched);
        assert_eq!(res[0].state, TrackState::Unstable);
    }

    #[test]
    fn unassigned_detection_is_reported() {
        let mut tracker = DeepSort::default();
        let err = tracker.finish_frame(&[None]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Errors>(),
            Some(&Errors::UnassignedDetection(0))
        );
    }

    #[test]
    fn stale_track_is_matched_by_overlap() {
        let lifetime = |bbox_matching: usize| {
            ClassOptions::default().tracker(
                TrackerOptions::default()
                    .max_unmatched_num(1)
                    .max_unmatched_times_for_bbox_matching(bbox_matching),
            )
        };

        // the cascade has a single level, a track missed once is left to the overlap matching
        let mut tracker = DeepSort::new(DeepSortOptions::default().default_class(lifetime(2)));
        for _ in 0..3 {
            tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        }
        tracker.track(&[], false).unwrap();
        assert_eq!(tracker.trackers_unmatched_last_time().len(), 1);
        let res = tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        assert_eq!(res[0].track_id, 1);
        assert!(res[0].matched);
        assert_eq!(res[0].state, TrackState::Stable);

        let mut tracker = DeepSort::new(DeepSortOptions::default().default_class(lifetime(0)));
        for _ in 0..3 {
            tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        }
        tracker.track(&[], false).unwrap();
        let res = tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        assert_eq!(res[0].track_id, 2);
        assert!(!res[0].matched);
    }

    #[test]
    fn classes_are_separated() {
        let mut tracker = DeepSort::new(DeepSortOptions::default().per_class_ids(true));
        let mut person = boxed(10.0, 10.0);
        person.class_id = PERSON;
        let res = tracker.track(&[boxed(10.0, 10.0), person.clone()], false).unwrap();
        assert_eq!(res[0].track_id, 1);
        assert_eq!(res[1].track_id, 1);
        assert_eq!(res[1].class_id, PERSON);

        let res = tracker.track(&[person.clone(), boxed(10.0, 10.0)], false).unwrap();
        assert_eq!(res[0].class_id, PERSON);
        assert_eq!(res[1].class_id, FACE);
        assert!(res.iter().all(|r| r.matched));

        let mut tracker = DeepSort::new(DeepSortOptions::default().track_by_class(false));
        tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        let res = tracker.track(&[person], false).unwrap();
        assert!(res[0].matched);
        assert_eq!(res[0].track_id, 1);
        assert_eq!(res[0].class_id, FACE);
    }

    #[test]
    fn per_class_options_apply() {
        let strict = ClassOptions::default()
            .tracker(TrackerOptions::default().accreditation_threshold(5));
        let mut tracker = DeepSort::new(DeepSortOptions::default());
        tracker.set_options(PERSON, strict);
        let mut person = boxed(10.0, 10.0);
        person.class_id = PERSON;
        for _ in 0..3 {
            tracker.track(&[boxed(10.0, 10.0), person.clone()], false).unwrap();
        }
        let states = tracker
            .trackers()
            .iter()
            .map(|t| (t.class_id, t.state))
            .collect::<Vec<_>>();
        assert_eq!(
            states,
            vec![(FACE, TrackState::Stable), (PERSON, TrackState::Unstable)]
        );
        assert_eq!(
            tracker
                .options()
                .for_class(PERSON)
                .get_tracker()
                .get_accreditation_threshold(),
            5
        );
    }

    #[test]
    fn counters_and_out_count() {
        let mut tracker = DeepSort::default();
        tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        assert_eq!(
            tracker.clean_counter().unwrap_err().downcast_ref::<Errors>(),
            Some(&Errors::CounterInUse(1))
        );

        tracker.set_out_count(1, 7).unwrap();
        assert_eq!(tracker.tracker_by_id(1).unwrap().out_count, 7);
        assert_eq!(
            tracker.set_out_count(9, 1).unwrap_err().downcast_ref::<Errors>(),
            Some(&Errors::MissingTrack(9))
        );

        tracker.track(&[], false).unwrap();
        tracker.clean_counter().unwrap();
        let res = tracker.track(&[boxed(10.0, 10.0)], false).unwrap();
        assert_eq!(res[0].track_id, 1);
    }

    #[test]
    fn random_walk_is_followed() {
        let gen = DetectionGen::new(0, BoxGen2::new_monotonous(100.0, 100.0, 40.0, 80.0, 1.0, 0.2))
            .with_features(64, 0.02);
        let mut tracker = DeepSort::new(DeepSortOptions::default().refine_uncrowd(true));
        for d in gen.take(50) {
            let res = tracker.track(&[d], true).unwrap();
            assert_eq!(res[0].track_id, 1);
        }
        assert_eq!(tracker.trackers().len(), 1);
        assert_eq!(tracker.frame(), 50);
    }

    fn person(x: f32) -> Detection {
        Detection::new(BoundingBox::new(x, 100.0, 60.0, 180.0), PERSON, 0.9)
    }

    fn face(x: f32) -> Detection {
        Detection::new(BoundingBox::new(x + 18.0, 105.0, 24.0, 24.0), FACE, 0.9)
    }

    #[test]
    fn occluded_face_follows_person() {
        let spec = PairSpec::new(FACE, PERSON, PairKind::FacePerson);
        let mut tracker = DeepSort::default();
        for i in 0..4 {
            let x = i as f32 * 2.0;
            let res = tracker.track_pairs(&[face(x), person(x)], &spec, false).unwrap();
            assert_eq!(res[0].track_id, 1);
            assert_eq!(res[1].track_id, 2);
        }

        // the face is occluded while the person walks on
        for i in 4..10 {
            let x = i as f32 * 2.0;
            let res = tracker.track_pairs(&[person(x)], &spec, false).unwrap();
            assert_eq!(res[0].track_id, 2);
            let face_track = tracker.tracker_by_id(1).unwrap();
            dbg!(&face_track);
            assert_eq!(face_track.state, TrackState::Stable);
            assert!(face_track.bbox.left() > 18.0 + x - 6.0);
        }

        let res = tracker.track_pairs(&[face(20.0), person(20.0)], &spec, false).unwrap();
        assert_eq!(res[0].track_id, 1);
        assert_eq!(res[1].track_id, 2);
        assert!(res.iter().all(|r| r.matched));
    }

    #[test]
    fn pair_misses_together() {
        let spec = PairSpec::new(FACE, PERSON, PairKind::FacePerson);
        let mut tracker = DeepSort::default();
        for _ in 0..3 {
            tracker.track_pairs(&[face(0.0), person(0.0)], &spec, false).unwrap();
        }
        tracker.track_pairs(&[], &spec, false).unwrap();
        let face_track = tracker.tracker_by_id(1).unwrap();
        assert_eq!(face_track.state, TrackState::Stable);
        assert_eq!(tracker.trackers_unmatched_last_time().len(), 2);
    }

    #[test]
    fn new_face_is_confirmed_by_person() {
        let spec = PairSpec::new(FACE, PERSON, PairKind::FacePerson);
        let mut tracker = DeepSort::default();
        for _ in 0..3 {
            tracker.track_pairs(&[person(0.0)], &spec, false).unwrap();
        }
        let res = tracker.track_pairs(&[face(0.0), person(0.0)], &spec, false).unwrap();
        assert_eq!(res[0].track_id, 2);
        assert_eq!(res[0].state, TrackState::New);
        assert_eq!(res[1].state, TrackState::Stable);

        let res = tracker.track_pairs(&[face(0.0), person(0.0)], &spec, false).unwrap();
        assert_eq!(res[0].state, TrackState::Stable);
    }

    #[test]
    fn other_classes_in_pair_mode() {
        let spec = PairSpec::new(FACE, PERSON, PairKind::FacePerson);
        let mut tracker = DeepSort::default();
        let mut car = boxed(500.0, 500.0);
        car.class_id = 7;
        let res = tracker
            .track_pairs(&[car.clone(), face(0.0), person(0.0)], &spec, false)
            .unwrap();
        assert_eq!(res.len(), 3);
        assert_eq!(res[0].class_id, 7);

        let res = tracker
            .track_pairs(&[face(0.0), person(0.0), car], &spec, false)
            .unwrap();
        assert!(res.iter().all(|r| r.matched));
    }
}
