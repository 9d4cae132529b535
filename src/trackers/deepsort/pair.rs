use crate::trackers::deepsort::store::{TrackHandle, TrackStore};
use crate::trackers::deepsort::Detection;
use crate::utils::bbox::{face_person_score, head_person_score, BoundingBox};
use crate::utils::munkres;
use anyhow::Result;
use log::debug;
use pathfinding::matrix::Matrix;
use std::collections::HashSet;

/// Geometry rule that scores a part box against the whole-body box
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairKind {
    FacePerson,
    HeadPerson,
}

impl PairKind {
    pub fn score(&self, part: &BoundingBox, person: &BoundingBox) -> f32 {
        match self {
            PairKind::FacePerson => face_person_score(part, person),
            PairKind::HeadPerson => head_person_score(part, person),
        }
    }
}

/// Two classes tracked as parts of the same object
///
#[derive(Debug, Clone, PartialEq)]
pub struct PairSpec {
    pub(crate) primary: i32,
    pub(crate) secondary: i32,
    pub(crate) kind: PairKind,
    pub(crate) correlation_threshold: f32,
    pub(crate) cascade_gate_decay: f32,
}

impl PairSpec {
    /// # Parameters
    /// * `primary` - class of the part (face or head)
    /// * `secondary` - class of the whole body
    /// * `kind` - scoring rule of the pair
    ///
    pub fn new(primary: i32, secondary: i32, kind: PairKind) -> Self {
        assert_ne!(primary, secondary, "Paired classes must differ");
        Self {
            primary,
            secondary,
            kind,
            correlation_threshold: 0.1,
            cascade_gate_decay: 0.1,
        }
    }

    /// The minimal pair score for two detections to be paired.
    ///
    pub fn correlation_threshold(mut self, threshold: f32) -> Self {
        assert!(
            (0.0..=1.0).contains(&threshold),
            "Correlation threshold must be in [0, 1]"
        );
        self.correlation_threshold = threshold;
        self
    }

    /// The chi-square gate of the paired classes narrows by `decay` per cascade level, so stale
    /// tracks must be closer to win a detection.
    ///
    pub fn cascade_gate_decay(mut self, decay: f32) -> Self {
        assert!(decay >= 0.0, "Gate decay must be non-negative");
        self.cascade_gate_decay = decay;
        self
    }

    pub fn get_primary(&self) -> i32 {
        self.primary
    }

    pub fn get_secondary(&self) -> i32 {
        self.secondary
    }

    pub fn is_paired_class(&self, class_id: i32) -> bool {
        class_id == self.primary || class_id == self.secondary
    }
}

/// Detection indexes paired within the frame, as (primary, secondary)
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionPairs(Vec<(usize, usize)>);

impl DetectionPairs {
    pub fn secondary_of(&self, primary: usize) -> Option<usize> {
        self.0.iter().find(|(p, _)| *p == primary).map(|(_, s)| *s)
    }

    pub fn primary_of(&self, secondary: usize) -> Option<usize> {
        self.0.iter().find(|(_, s)| *s == secondary).map(|(p, _)| *p)
    }

    /// Paired detection of any side
    ///
    pub fn partner_of(&self, detection: usize) -> Option<usize> {
        self.secondary_of(detection)
            .or_else(|| self.primary_of(detection))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(usize, usize)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Pairs the part detections with the body detections
///
/// The assignment minimizes `1 - score`; a pair is kept when its score exceeds the
/// correlation threshold.
///
pub fn pair_detections(
    spec: &PairSpec,
    detections: &[Detection],
    primary: &[usize],
    secondary: &[usize],
) -> Result<DetectionPairs> {
    if primary.is_empty() || secondary.is_empty() {
        return Ok(DetectionPairs::default());
    }

    let mut costs = Matrix::new(primary.len(), secondary.len(), 1.0_f32);
    for (r, p) in primary.iter().enumerate() {
        for (c, s) in secondary.iter().enumerate() {
            costs[(r, c)] = 1.0 - spec.kind.score(&detections[*p].bbox, &detections[*s].bbox);
        }
    }

    let limit = 1.0 - spec.correlation_threshold;
    let pairs = munkres::solve(&costs)?
        .into_iter()
        .enumerate()
        .filter_map(|(r, c)| match c {
            Some(c) if c < secondary.len() && costs[(r, c)] < limit => Some((primary[r], secondary[c])),
            _ => None,
        })
        .collect::<Vec<_>>();
    debug!("{} detection pairs are found", pairs.len());
    Ok(DetectionPairs(pairs))
}

/// Track pairs to maintain in the frame, as (primary, secondary) handles
///
/// The pairs of assigned detections go first, then the existing links of the tracks seen in the
/// frame. A track takes part in one pair at most, the first one wins.
///
pub fn collect_links(
    store: &TrackStore,
    spec: &PairSpec,
    pairs: &DetectionPairs,
    assigned: &[Option<TrackHandle>],
    seen: &HashSet<TrackHandle>,
) -> Vec<(TrackHandle, TrackHandle)> {
    let from_detections = pairs
        .iter()
        .filter_map(|(p, s)| Some((assigned[*p]?, assigned[*s]?)));

    let from_tracks = store
        .iter()
        .filter(|(h, t)| t.class_id() == spec.primary && seen.contains(h))
        .filter_map(|(h, t)| {
            let partner = t.pair_handle()?;
            let partner_track = store.get(partner)?;
            (partner_track.class_id() == spec.secondary).then_some((h, partner))
        })
        .chain(
            store
                .iter()
                .filter(|(h, t)| t.class_id() == spec.secondary && seen.contains(h))
                .filter_map(|(h, t)| {
                    let partner = t.pair_handle()?;
                    let partner_track = store.get(partner)?;
                    (partner_track.class_id() == spec.primary).then_some((partner, h))
                }),
        );

    let mut links: Vec<(TrackHandle, TrackHandle)> = Vec::default();
    for (p, s) in from_detections.chain(from_tracks) {
        if links.iter().any(|(lp, ls)| *lp == p || *ls == s) {
            continue;
        }
        links.push((p, s));
    }
    links
}

#[cfg(test)]
mod tests {
    use crate::trackers::deepsort::kalman_tracker::KalmanTracker;
    use crate::trackers::deepsort::options::ClassOptions;
    use crate::trackers::deepsort::pair::{
        collect_links, pair_detections, PairKind, PairSpec,
    };
    use crate::trackers::deepsort::store::TrackStore;
    use crate::trackers::deepsort::Detection;
    use crate::utils::bbox::BoundingBox;
    use crate::utils::kalman::kalman_2d_box::KalmanFilter;
    use std::collections::HashSet;

    const FACE: i32 = 0;
    const PERSON: i32 = 1;

    fn person(x: f32) -> Detection {
        Detection::new(BoundingBox::new(x, 100.0, 60.0, 180.0), PERSON, 0.9)
    }

    fn face(x: f32) -> Detection {
        Detection::new(BoundingBox::new(x + 18.0, 105.0, 24.0, 24.0), FACE, 0.9)
    }

    #[test]
    fn detections_are_paired() {
        let spec = PairSpec::new(FACE, PERSON, PairKind::FacePerson);
        let detections = [person(0.0), face(300.0), person(300.0), face(0.0), face(800.0)];
        let pairs = pair_detections(&spec, &detections, &[1, 3, 4], &[0, 2]).unwrap();
        dbg!(&pairs);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs.secondary_of(1), Some(2));
        assert_eq!(pairs.secondary_of(3), Some(0));
        assert_eq!(pairs.secondary_of(4), None);
        assert_eq!(pairs.primary_of(0), Some(3));
        assert_eq!(pairs.partner_of(2), Some(1));
    }

    #[test]
    fn threshold_rejects_weak_pairs() {
        let spec = PairSpec::new(FACE, PERSON, PairKind::FacePerson).correlation_threshold(1.0);
        let detections = [person(0.0), face(0.0)];
        let pairs = pair_detections(&spec, &detections, &[1], &[0]).unwrap();
        assert!(pairs.is_empty());

        let pairs = pair_detections(&spec, &detections, &[], &[0]).unwrap();
        assert!(pairs.is_empty());
    }

    #[test]
    fn links_are_unique() {
        let spec = PairSpec::new(FACE, PERSON, PairKind::FacePerson);
        let f = KalmanFilter::default();
        let opts = ClassOptions::default();
        let mut store = TrackStore::default();
        let detections = [person(0.0), face(0.0), person(300.0), face(300.0)];
        let handles = detections
            .iter()
            .enumerate()
            .map(|(i, d)| store.insert(KalmanTracker::new(i as u64 + 1, d, &opts, &f)))
            .collect::<Vec<_>>();

        // an old link of the second face points to the first person
        let first_person = store.get(handles[0]).unwrap().clone();
        store
            .get_mut(handles[3])
            .unwrap()
            .update_pair_info(handles[0], &first_person);

        let pairs = pair_detections(&spec, &detections, &[1, 3], &[0, 2]).unwrap();
        let assigned = handles.iter().map(|h| Some(*h)).collect::<Vec<_>>();
        let seen = handles.iter().copied().collect::<HashSet<_>>();
        let links = collect_links(&store, &spec, &pairs, &assigned, &seen);
        assert_eq!(links, vec![(handles[1], handles[0]), (handles[3], handles[2])]);

        let links = collect_links(&store, &spec, &Default::default(), &assigned, &seen);
        assert_eq!(links, vec![(handles[3], handles[0])]);

        let links = collect_links(&store, &spec, &Default::default(), &assigned, &HashSet::new());
        assert!(links.is_empty());
    }
}
