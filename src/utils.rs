/// Bounding boxes
pub mod bbox;

/// Kalman filter
pub mod kalman;

/// Optimal assignment solver for the track/detection cost matrices
pub mod munkres;
