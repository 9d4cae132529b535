#![feature(test)]

extern crate test;

use deepsort::examples::{BoxGen2, DetectionGen};
use deepsort::prelude::{DeepSort, DeepSortOptions};
use test::Bencher;

#[bench]
fn deepsort_maha_00010(b: &mut Bencher) {
    bench_deepsort(10, None, b);
}

#[bench]
fn deepsort_maha_00100(b: &mut Bencher) {
    bench_deepsort(100, None, b);
}

#[bench]
fn deepsort_reid_00010(b: &mut Bencher) {
    bench_deepsort(10, Some(128), b);
}

#[bench]
fn deepsort_reid_00100(b: &mut Bencher) {
    bench_deepsort(100, Some(128), b);
}

fn bench_deepsort(objects: usize, feature_len: Option<usize>, b: &mut Bencher) {
    let pos_drift = 1.0;
    let box_drift = 0.01;
    let mut iterators = (0..objects)
        .map(|i| {
            let boxes = BoxGen2::new(
                1000.0 * i as f32,
                1000.0 * i as f32,
                50.0,
                80.0,
                pos_drift,
                box_drift,
            );
            let gen = DetectionGen::new(0, boxes);
            match feature_len {
                Some(len) => gen.with_features(len, 0.05),
                None => gen,
            }
        })
        .collect::<Vec<_>>();

    let mut tracker = DeepSort::new(DeepSortOptions::default());
    b.iter(|| {
        let detections = iterators
            .iter_mut()
            .map(|i| i.next().unwrap())
            .collect::<Vec<_>>();
        let tracks = tracker.track(&detections, feature_len.is_some()).unwrap();
        assert_eq!(tracks.len(), objects);
    });
    assert_eq!(tracker.trackers().len(), objects);
}
