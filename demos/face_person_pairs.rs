use deepsort::examples::BoxGen2;
use deepsort::prelude::{BoundingBox, DeepSort, DeepSortOptions, Detection, PairKind, PairSpec};

const FACE: i32 = 0;
const PERSON: i32 = 1;

fn face_of(person: &BoundingBox) -> BoundingBox {
    let size = person.width() * 0.4;
    BoundingBox::new(
        person.left() + (person.width() - size) / 2.0,
        person.top() + size * 0.2,
        size,
        size,
    )
}

fn main() {
    env_logger::init();

    let spec = PairSpec::new(FACE, PERSON, PairKind::FacePerson);
    let mut tracker = DeepSort::new(DeepSortOptions::default());
    let mut person = BoxGen2::new_monotonous(100.0, 100.0, 60.0, 180.0, 2.0, 0.1);

    for frame in 0..30 {
        let body = person.next().unwrap();
        let mut detections = vec![Detection::new(body, PERSON, 0.9)];
        // the face is hidden in the middle of the sequence
        if !(10..20).contains(&frame) {
            detections.push(Detection::new(face_of(&body), FACE, 0.8));
        }

        let tracks = tracker.track_pairs(&detections, &spec, false).unwrap();
        eprintln!(
            "Frame {}: {:?}",
            frame,
            tracks
                .iter()
                .map(|t| (t.class_id, t.track_id, t.state))
                .collect::<Vec<_>>()
        );
        if let Some(face) = tracker.trackers().iter().find(|t| t.class_id == FACE) {
            eprintln!("  face track {} at {:?}", face.track_id, face.bbox);
        }
    }
}
