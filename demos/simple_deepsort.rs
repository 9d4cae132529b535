use deepsort::examples::{BoxGen2, DetectionGen};
use deepsort::prelude::{ClassOptions, DeepSort, DeepSortOptions, TrackerOptions};

fn main() {
    env_logger::init();

    let opts = DeepSortOptions::default().default_class(
        ClassOptions::default()
            .max_distance_cosine(0.3)
            .tracker(TrackerOptions::default().max_unmatched_num(10)),
    );
    let mut tracker = DeepSort::new(opts);

    let pos_drift = 1.0;
    let box_drift = 0.2;
    let mut d1 = DetectionGen::new(
        0,
        BoxGen2::new_monotonous(100.0, 100.0, 40.0, 80.0, pos_drift, box_drift),
    )
    .with_features(128, 0.05);
    let mut d2 = DetectionGen::new(
        0,
        BoxGen2::new_monotonous(300.0, 100.0, 42.0, 84.0, pos_drift, box_drift),
    )
    .with_features(128, 0.05);

    for frame in 0..20 {
        let detections = [d1.next().unwrap(), d2.next().unwrap()];
        let tracks = tracker.track(&detections, true).unwrap();
        eprintln!(
            "Frame {}: {:?}",
            frame,
            tracks
                .iter()
                .map(|t| (t.track_id, t.state))
                .collect::<Vec<_>>()
        );
    }

    // the second object leaves the scene
    for _ in 0..5 {
        tracker.track(&[d1.next().unwrap()], true).unwrap();
    }

    for t in tracker.trackers_unmatched_last_time() {
        eprintln!("Track {} is unseen, last box: {:?}", t.track_id, t.bbox);
    }
    eprintln!("Live tracks: {:#?}", tracker.trackers());
}
