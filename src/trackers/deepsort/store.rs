use crate::trackers::deepsort::kalman_tracker::{KalmanTracker, TrackerState};
use log::info;
use std::collections::BTreeMap;

/// Stable reference to a track in the store
///
/// Handles are never reused, so a handle captured before a sweep either still resolves to the
/// same track or resolves to nothing.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackHandle(u64);

/// Owner of the live tracks
///
#[derive(Debug, Default)]
pub struct TrackStore {
    tracks: BTreeMap<TrackHandle, KalmanTracker>,
    next_handle: u64,
}

impl TrackStore {
    pub fn insert(&mut self, tracker: KalmanTracker) -> TrackHandle {
        let handle = TrackHandle(self.next_handle);
        self.next_handle += 1;
        self.tracks.insert(handle, tracker);
        handle
    }

    pub fn get(&self, handle: TrackHandle) -> Option<&KalmanTracker> {
        self.tracks.get(&handle)
    }

    pub fn get_mut(&mut self, handle: TrackHandle) -> Option<&mut KalmanTracker> {
        self.tracks.get_mut(&handle)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Tracks in the creation order
    ///
    pub fn iter(&self) -> impl Iterator<Item = (TrackHandle, &KalmanTracker)> {
        self.tracks.iter().map(|(h, t)| (*h, t))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (TrackHandle, &mut KalmanTracker)> {
        self.tracks.iter_mut().map(|(h, t)| (*h, t))
    }

    /// Handle of the track with the public id
    ///
    pub fn find(&self, id: u64) -> Option<TrackHandle> {
        self.iter().find(|(_, t)| t.id() == id).map(|(h, _)| h)
    }

    /// Links two tracks both ways and votes their correlation
    ///
    /// A former partner that still points to one of the tracks loses its link.
    ///
    pub fn link(&mut self, a: TrackHandle, b: TrackHandle) {
        for (own, partner) in [(a, b), (b, a)] {
            let former = self
                .get(own)
                .and_then(|t| t.pair_handle())
                .filter(|h| *h != partner);
            if let Some(t) = former
                .and_then(|h| self.get_mut(h))
                .filter(|t| t.pair_handle() == Some(own))
            {
                t.reset_pair_info();
            }
        }

        let (Some(track_a), Some(track_b)) = (self.get(a).cloned(), self.get(b).cloned()) else {
            return;
        };
        if let Some(t) = self.get_mut(a) {
            t.update_pair_info(b, &track_b);
        }
        if let Some(t) = self.get_mut(b) {
            t.update_pair_info(a, &track_a);
        }
    }

    /// Removes the tracks in the `Miss` state
    ///
    /// The pair links that pointed to the removed tracks are dropped from their partners.
    ///
    pub fn purge(&mut self) -> Vec<KalmanTracker> {
        let wasted = self
            .iter()
            .filter(|(_, t)| t.state() == TrackerState::Miss)
            .map(|(h, _)| h)
            .collect::<Vec<_>>();

        let removed = wasted
            .iter()
            .filter_map(|h| self.tracks.remove(h))
            .collect::<Vec<_>>();

        for (_, t) in self.iter_mut() {
            if t.pair_handle().map_or(false, |p| wasted.contains(&p)) {
                t.reset_pair_info();
            }
        }

        for t in &removed {
            info!(
                "Track {} (class {}) is removed after {} frames",
                t.id(),
                t.class_id(),
                t.ages()
            );
        }
        removed
    }
}
