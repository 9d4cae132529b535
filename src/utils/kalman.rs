use crate::utils::bbox::{AspectBox, BoundingBox};
use nalgebra::{SMatrix, SVector};

/// Kalman filter over the (xc, yc, aspect, height) box with constant velocity motion
pub mod kalman_2d_box;

pub const DIM_Z: usize = 4;
pub const DIM_X: usize = DIM_Z * 2;
pub const DT: u64 = 1;

/// Upper-tail quantiles of the chi-square distribution for 1..=9 degrees of freedom
///
/// Each table is named by the probability mass kept under the gate.
///
pub const CHI2INV90: [f32; 9] = [
    2.7055, 4.6052, 6.2514, 7.7794, 9.2364, 10.645, 12.017, 13.362, 14.684,
];
pub const CHI2INV95: [f32; 9] = [
    3.8415, 5.9915, 7.8147, 9.4877, 11.070, 12.592, 14.067, 15.507, 16.919,
];
pub const CHI2INV975: [f32; 9] = [
    5.0239, 7.3778, 9.3484, 11.143, 12.833, 14.449, 16.013, 17.535, 19.023,
];
pub const CHI2INV99: [f32; 9] = [
    6.6349, 9.2103, 11.345, 13.277, 15.086, 16.812, 18.475, 20.090, 21.666,
];
pub const CHI2INV995: [f32; 9] = [
    7.8794, 10.597, 12.838, 14.860, 16.750, 18.548, 20.278, 21.955, 23.589,
];

/// Significance level of the Mahalanobis gate
///
/// `L050` rejects 5% of the true matches, `L005` only 0.5%.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfidenceLevel {
    L005,
    L010,
    L025,
    #[default]
    L050,
    L100,
}

impl ConfidenceLevel {
    /// Gate for the measurement space of the given dimension
    ///
    /// # Parameters
    /// * `dof` - degrees of freedom, clamped to `1..=9`
    ///
    pub fn chi2_threshold(&self, dof: usize) -> f32 {
        let idx = dof.clamp(1, 9) - 1;
        match self {
            ConfidenceLevel::L005 => CHI2INV995[idx],
            ConfidenceLevel::L010 => CHI2INV99[idx],
            ConfidenceLevel::L025 => CHI2INV975[idx],
            ConfidenceLevel::L050 => CHI2INV95[idx],
            ConfidenceLevel::L100 => CHI2INV90[idx],
        }
    }
}

/// Position of the filter in the predict/update cycle
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KalmanStage {
    Predicted,
    Updated,
}

/// Mean, covariance and cycle stage of the filter
///
#[derive(Debug, Clone, Copy)]
pub struct KalmanState {
    pub mean: SVector<f32, DIM_X>,
    pub covariance: SMatrix<f32, DIM_X, DIM_X>,
    pub stage: KalmanStage,
}

impl KalmanState {
    pub fn aspect_box(&self) -> AspectBox {
        AspectBox::new(self.mean[0], self.mean[1], self.mean[2], self.mean[3])
    }

    /// Estimated box in the (left, top, width, height) form
    ///
    pub fn bbox(&self) -> BoundingBox {
        self.aspect_box().into()
    }
}

/// Standard deviation rule of one noise dimension: `alpha * x[source] + beta`
///
/// Without a source the deviation is `beta`. The variance placed on the diagonal is the
/// squared deviation.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseRule {
    pub alpha: f32,
    pub beta: f32,
    pub source: Option<usize>,
}

impl NoiseRule {
    /// Deviation proportional to the state element
    ///
    pub const fn scaled(alpha: f32, source: usize) -> Self {
        Self {
            alpha,
            beta: 0.0,
            source: Some(source),
        }
    }

    /// Constant deviation
    ///
    pub const fn constant(beta: f32) -> Self {
        Self {
            alpha: 0.0,
            beta,
            source: None,
        }
    }

    pub fn std(&self, x: &SVector<f32, DIM_X>) -> f32 {
        self.source
            .and_then(|i| x.get(i))
            .map_or(self.beta, |v| self.alpha * v + self.beta)
    }
}

/// Diagonal variances produced by the rules for the state `x`
///
pub fn variances<const N: usize>(rules: &[NoiseRule; N], x: &SVector<f32, DIM_X>) -> SVector<f32, N> {
    SVector::from_iterator(rules.iter().map(|r| {
        let std = r.std(x);
        std * std
    }))
}

const HEIGHT: usize = 3;

pub const DEFAULT_PROCESS_NOISE: [NoiseRule; DIM_X] = [
    NoiseRule::scaled(1.0 / 20.0, HEIGHT),
    NoiseRule::scaled(1.0 / 20.0, HEIGHT),
    NoiseRule::constant(1e-1),
    NoiseRule::scaled(1.0 / 20.0, HEIGHT),
    NoiseRule::scaled(1.0 / 160.0, HEIGHT),
    NoiseRule::scaled(1.0 / 160.0, HEIGHT),
    NoiseRule::constant(1e-5),
    NoiseRule::scaled(1.0 / 160.0, HEIGHT),
];

pub const DEFAULT_MEASUREMENT_NOISE: [NoiseRule; DIM_Z] = [
    NoiseRule::scaled(1.0 / 20.0, HEIGHT),
    NoiseRule::scaled(1.0 / 20.0, HEIGHT),
    NoiseRule::constant(1e-1),
    NoiseRule::scaled(1.0 / 20.0, HEIGHT),
];

pub const DEFAULT_INITIAL_NOISE: [NoiseRule; DIM_X] = [
    NoiseRule::scaled(2.0 / 20.0, HEIGHT),
    NoiseRule::scaled(2.0 / 20.0, HEIGHT),
    NoiseRule::constant(1e-2),
    NoiseRule::scaled(2.0 / 20.0, HEIGHT),
    NoiseRule::scaled(10.0 / 160.0, HEIGHT),
    NoiseRule::scaled(10.0 / 160.0, HEIGHT),
    NoiseRule::constant(1e-5),
    NoiseRule::scaled(10.0 / 160.0, HEIGHT),
];

/// Noise model and gate of the filter
///
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanFilterOptions {
    process_noise: [NoiseRule; DIM_X],
    measurement_noise: [NoiseRule; DIM_Z],
    chi2_threshold: f32,
    legacy_gating_noise: bool,
}

impl Default for KalmanFilterOptions {
    fn default() -> Self {
        Self {
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
            chi2_threshold: ConfidenceLevel::default().chi2_threshold(DIM_Z),
            legacy_gating_noise: false,
        }
    }
}

impl KalmanFilterOptions {
    /// Rules of the process noise `Q`, evaluated on the state before the prediction
    ///
    pub fn process_noise(mut self, rules: [NoiseRule; DIM_X]) -> Self {
        self.process_noise = rules;
        self
    }

    /// Rules of the measurement noise `R`, evaluated on the predicted state
    ///
    pub fn measurement_noise(mut self, rules: [NoiseRule; DIM_Z]) -> Self {
        self.measurement_noise = rules;
        self
    }

    /// Sets the Mahalanobis gate from the significance level
    ///
    pub fn confidence_level(mut self, level: ConfidenceLevel) -> Self {
        self.chi2_threshold = level.chi2_threshold(DIM_Z);
        self
    }

    /// Sets the Mahalanobis gate directly
    ///
    pub fn chi2_threshold(mut self, threshold: f32) -> Self {
        self.chi2_threshold = threshold;
        self
    }

    /// Swaps the aspect and the height measurement noise when the gating distance is computed.
    ///
    /// Older deployments computed the gate with the constant term on the height and the scaled
    /// term on the aspect, while the update used the opposite assignment. Enable to reproduce
    /// their gating decisions; the default uses the update noise for both.
    ///
    pub fn legacy_gating_noise(mut self, enabled: bool) -> Self {
        self.legacy_gating_noise = enabled;
        self
    }

    pub fn get_chi2_threshold(&self) -> f32 {
        self.chi2_threshold
    }

    pub fn get_process_noise(&self) -> &[NoiseRule; DIM_X] {
        &self.process_noise
    }

    pub fn get_measurement_noise(&self) -> &[NoiseRule; DIM_Z] {
        &self.measurement_noise
    }

    pub(crate) fn gating_noise(&self) -> [NoiseRule; DIM_Z] {
        let mut rules = self.measurement_noise;
        if self.legacy_gating_noise {
            rules.swap(2, 3);
        }
        rules
    }
}
