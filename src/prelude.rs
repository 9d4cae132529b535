use crate::trackers;

pub use crate::track::utils::FromVec;
pub use crate::track::Feature;
pub use crate::utils::bbox::BoundingBox;
pub use crate::utils::kalman::{ConfidenceLevel, KalmanFilterOptions, NoiseRule};
pub use trackers::deepsort::options::{ClassOptions, DeepSortOptions, TrackerOptions};
pub use trackers::deepsort::pair::{PairKind, PairSpec};
pub use trackers::deepsort::{DeepSort, Detection, TrackAssignment, TrackInfo, TrackState};
