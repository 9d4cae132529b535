// Original source code idea from
// https://github.com/nwojke/deep_sort/blob/master/deep_sort/kalman_filter.py
//
use crate::utils::bbox::AspectBox;
use crate::utils::kalman::{
    variances, KalmanFilterOptions, KalmanStage, KalmanState, NoiseRule, DIM_X, DIM_Z, DT,
};
use crate::Errors;
use anyhow::Result;
use nalgebra::{Cholesky, Const, SMatrix, SVector};

/// Kalman filter
///
/// The observation matrix is the identity on the first four state elements, so the
/// projection is a block of the state and the gain is solved on the 4x4 innovation
/// covariance only.
///
#[derive(Debug)]
pub struct KalmanFilter {
    motion_matrix: SMatrix<f32, DIM_X, DIM_X>,
}

/// Default initializer
impl Default for KalmanFilter {
    fn default() -> Self {
        let mut motion_matrix: SMatrix<f32, DIM_X, DIM_X> = SMatrix::identity();
        for i in 0..DIM_Z {
            motion_matrix[(i, DIM_Z + i)] = DT as f32;
        }
        KalmanFilter { motion_matrix }
    }
}

impl KalmanFilter {
    /// Initialize the filter with the first observation
    ///
    /// Velocities start at zero, the covariance diagonal follows `initial_noise`.
    ///
    pub fn initiate(
        &self,
        measurement: &AspectBox,
        initial_noise: &[NoiseRule; DIM_X],
    ) -> KalmanState {
        let mut mean: SVector<f32, DIM_X> = SVector::zeros();
        for (i, v) in measurement.as_array().into_iter().enumerate() {
            mean[i] = v;
        }
        let covariance = SMatrix::from_diagonal(&variances(initial_noise, &mean));
        KalmanState {
            mean,
            covariance,
            stage: KalmanStage::Updated,
        }
    }

    /// Predicts the state from the last state
    ///
    pub fn predict(&self, state: &KalmanState, opts: &KalmanFilterOptions) -> Result<KalmanState> {
        ensure_stage(state, KalmanStage::Updated)?;
        let motion_cov = SMatrix::from_diagonal(&variances(opts.get_process_noise(), &state.mean));

        let mean = self.motion_matrix * state.mean;
        let covariance =
            self.motion_matrix * state.covariance * self.motion_matrix.transpose() + motion_cov;
        Ok(KalmanState {
            mean,
            covariance,
            stage: KalmanStage::Predicted,
        })
    }

    fn innovation_factor(
        state: &KalmanState,
        noise: &[NoiseRule; DIM_Z],
    ) -> Result<Cholesky<f32, Const<DIM_Z>>> {
        let innovation_noise = SMatrix::from_diagonal(&variances(noise, &state.mean));
        let innovation_cov: SMatrix<f32, DIM_Z, DIM_Z> =
            state.covariance.fixed_view::<DIM_Z, DIM_Z>(0, 0).into_owned() + innovation_noise;
        innovation_cov
            .cholesky()
            .ok_or_else(|| Errors::CovarianceNotPositiveDefinite.into())
    }

    /// Updates the state with the current observation
    ///
    pub fn update(
        &self,
        state: &KalmanState,
        measurement: &AspectBox,
        opts: &KalmanFilterOptions,
    ) -> Result<KalmanState> {
        ensure_stage(state, KalmanStage::Predicted)?;
        let factor = Self::innovation_factor(state, opts.get_measurement_noise())?;

        let cross_cov: SMatrix<f32, DIM_X, DIM_Z> =
            state.covariance.fixed_view::<DIM_X, DIM_Z>(0, 0).into_owned();
        let kalman_gain: SMatrix<f32, DIM_X, DIM_Z> =
            factor.solve(&cross_cov.transpose()).transpose();

        let projected_mean: SVector<f32, DIM_Z> = state.mean.fixed_rows::<DIM_Z>(0).into_owned();
        let innovation = SVector::from(measurement.as_array()) - projected_mean;

        let mean = state.mean + kalman_gain * innovation;
        let projected_rows: SMatrix<f32, DIM_Z, DIM_X> =
            state.covariance.fixed_view::<DIM_Z, DIM_X>(0, 0).into_owned();
        let covariance = state.covariance - kalman_gain * projected_rows;
        let covariance = (covariance + covariance.transpose()) * 0.5;

        Ok(KalmanState {
            mean,
            covariance,
            stage: KalmanStage::Updated,
        })
    }

    /// Checks that both the update and the gating innovation covariances can be factorized
    ///
    pub fn is_gateable(&self, state: &KalmanState, opts: &KalmanFilterOptions) -> bool {
        Self::innovation_factor(state, opts.get_measurement_noise()).is_ok()
            && Self::innovation_factor(state, &opts.gating_noise()).is_ok()
    }

    /// Squared Mahalanobis distances between the projected state and the measurements
    ///
    pub fn mahalanobis(
        &self,
        state: &KalmanState,
        measurements: &[AspectBox],
        opts: &KalmanFilterOptions,
    ) -> Result<Vec<f32>> {
        let factor = Self::innovation_factor(state, &opts.gating_noise())?;
        let lower = factor.l();
        let projected_mean: SVector<f32, DIM_Z> = state.mean.fixed_rows::<DIM_Z>(0).into_owned();

        measurements
            .iter()
            .map(|m| {
                let diff = SVector::from(m.as_array()) - projected_mean;
                lower
                    .solve_lower_triangular(&diff)
                    .map(|z| z.norm_squared())
                    .ok_or_else(|| Errors::CovarianceNotPositiveDefinite.into())
            })
            .collect()
    }
}

fn ensure_stage(state: &KalmanState, expected: KalmanStage) -> Result<()> {
    if state.stage != expected {
        return Err(Errors::InvalidStateTransition {
            expected,
            actual: state.stage,
        }
        .into());
    }
    Ok(())
}
