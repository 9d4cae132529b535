pub mod distance;
pub mod examples;
pub mod prelude;
pub mod track;
pub mod trackers;
pub mod utils;

use crate::utils::kalman::KalmanStage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Errors {
    #[error("Kalman state is {actual:?}, the operation requires {expected:?}")]
    InvalidStateTransition {
        expected: KalmanStage,
        actual: KalmanStage,
    },
    #[error("Innovation covariance is not positive definite - Cholesky factorization failed")]
    CovarianceNotPositiveDefinite,
    #[error("Re-identification requires a feature for every detection: {detections} detections, {features} features")]
    DetectionFeatureMismatch { detections: usize, features: usize },
    #[error("Feature dimension {actual} differs from the frame dimension {expected}")]
    FeatureDimensionMismatch { expected: usize, actual: usize },
    #[error("Malformed bounding box (left={0}, top={1}, width={2}, height={3})")]
    MalformedBox(f32, f32, f32, f32),
    #[error("Cost matrix contains a non-finite value at ({0}, {1})")]
    NonFiniteCost(usize, usize),
    #[error("Missing track {0}")]
    MissingTrack(u64),
    #[error("Detection {0} is not assigned to a live track")]
    UnassignedDetection(usize),
    #[error("Id counters cannot be reset while {0} tracks are alive")]
    CounterInUse(usize),
}

pub(crate) const EPS: f32 = 0.00001;
