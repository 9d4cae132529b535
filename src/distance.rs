use crate::track::utils::norm_squared;
use crate::track::Feature;
use crate::utils::bbox::BoundingBox;
use crate::EPS;
use pathfinding::matrix::Matrix;
use std::ops::MulAssign;

/// Cost placed into gated cost-matrix cells
///
/// The value is far above any threshold in use, so the solver avoids the cell whenever another
/// complete assignment exists and the caller's threshold check always rejects it.
///
pub const GATED_COST: f32 = 1e5;

/// Cosine similarity between two vectors
///
/// When the features distances lengths don't match, the longer feature vector is truncated to
/// shorter one when the distance is calculated. A zero vector is not similar to anything.
///
pub fn cosine(f1: &Feature, f2: &Feature) -> f32 {
    let mut divided = 0.0;
    let len = f1.len().min(f2.len());
    for i in 0..len {
        let mut block1 = f1[i];
        let block2 = &f2[i];
        block1.mul_assign(block2);
        divided += block1.reduce_add();
    }

    let f1_divisor = norm_squared(&f1[..len]);
    let f2_divisor = norm_squared(&f2[..len]);
    let divisor = (f1_divisor * f2_divisor).sqrt();
    if divisor <= f32::EPSILON {
        0.0
    } else {
        divided / divisor
    }
}

/// Appearance distance `1 - cos(a, b)`, in `[0, 2]`
///
pub fn cosine_distance(f1: &Feature, f2: &Feature) -> f32 {
    1.0 - cosine(f1, f2)
}

/// The smallest cosine distance between the feature and any gallery entry
///
/// An empty gallery yields `None`.
///
pub fn gallery_distance<'a, I>(gallery: I, feature: &Feature) -> Option<f32>
where
    I: IntoIterator<Item = &'a Feature>,
{
    gallery
        .into_iter()
        .map(|g| cosine_distance(g, feature))
        .fold(None, |acc: Option<f32>, d| {
            Some(acc.map_or(d, |best| best.min(d)))
        })
}

/// Spatial distance `1 - IoU(a, b)`, in `[0, 1]`
///
pub fn iou_distance(a: &BoundingBox, b: &BoundingBox) -> f32 {
    1.0 - a.iou(b)
}

/// Replaces every cost above `max_distance` with [GATED_COST]
///
/// NaN costs are gated as well.
///
pub fn gate_cost_matrix(costs: &mut Matrix<f32>, max_distance: f32) {
    for r in 0..costs.rows {
        for c in 0..costs.columns {
            if !(costs[(r, c)] <= max_distance + EPS) {
                costs[(r, c)] = GATED_COST;
            }
        }
    }
}

/// Gates the cells of `costs` whose counterpart in `guard` exceeds `limit`
///
/// Both matrices must describe the same (track, detection) grid.
///
pub fn restrict_cost_matrix(costs: &mut Matrix<f32>, guard: &Matrix<f32>, limit: f32) {
    debug_assert_eq!(costs.rows, guard.rows);
    debug_assert_eq!(costs.columns, guard.columns);
    for r in 0..costs.rows.min(guard.rows) {
        for c in 0..costs.columns.min(guard.columns) {
            if !(guard[(r, c)] <= limit) {
                costs[(r, c)] = GATED_COST;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::distance::{
        cosine, cosine_distance, gallery_distance, gate_cost_matrix, iou_distance,
        restrict_cost_matrix, GATED_COST,
    };
    use crate::examples::FeatGen;
    use crate::track::utils::FromVec;
    use crate::track::Feature;
    use crate::utils::bbox::BoundingBox;
    use crate::EPS;
    use pathfinding::matrix::Matrix;
    use ultraviolet::f32x8;

    #[test]
    fn cosine_distances() {
        let v1 = dbg!(Feature::from_vec(vec![1f32, 0.0, 0.0]));
        let v2 = dbg!(Feature::from_vec(vec![0f32, 1.0f32, 0.0]));
        let v3 = dbg!(Feature::from_vec(vec![-1.0f32, 0.0, 0.0]));
        let d = cosine(&v1, &v1);
        assert!((d - 1.0).abs() < EPS);
        let d = cosine(&v1, &v3);
        assert!((d + 1.0).abs() < EPS);
        let d = cosine(&v1, &v2);
        assert!(d.abs() < EPS);

        assert!(cosine_distance(&v1, &v1).abs() < EPS);
        assert!((cosine_distance(&v1, &v3) - 2.0).abs() < EPS);

        let zero = Feature::from_vec(vec![0f32; 3]);
        assert!((cosine_distance(&zero, &v1) - 1.0).abs() < EPS);
    }

    #[test]
    fn cosine_scale_invariance() {
        let mut gen = FeatGen::new(0.0, 1.0, 128);
        for _ in 0..20 {
            let a = gen.next_feature();
            let b = gen.next_feature();
            let base = cosine_distance(&a, &b);
            for k in [0.001_f32, 0.5, 3.0, 1000.0] {
                let scaled: Feature = a.iter().map(|block| *block * f32x8::splat(k)).collect();
                assert!((cosine_distance(&scaled, &b) - base).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn gallery_minimum() {
        let a = Feature::from_vec(vec![1f32, 0.0]);
        let b = Feature::from_vec(vec![0f32, 1.0]);
        let q = Feature::from_vec(vec![0.1f32, 1.0]);
        let gallery = vec![a.clone(), b];
        let d = gallery_distance(&gallery, &q).unwrap();
        assert!((d - cosine_distance(&gallery[1], &q)).abs() < EPS);
        assert!(d < cosine_distance(&a, &q));

        let empty: Vec<Feature> = vec![];
        assert!(gallery_distance(&empty, &q).is_none());
    }

    #[test]
    fn iou_distances() {
        let bb = BoundingBox::new(3.0, 7.0, 20.0, 41.5);
        assert_eq!(iou_distance(&bb, &bb), 0.0);

        let far = BoundingBox::new(300.0, 7.0, 20.0, 41.5);
        assert_eq!(iou_distance(&bb, &far), 1.0);
    }

    #[test]
    fn gating() {
        let mut costs = Matrix::new(2, 2, 0.0_f32);
        costs[(0, 0)] = 0.1;
        costs[(0, 1)] = 0.2 + 1e-6;
        costs[(1, 0)] = 0.3;
        costs[(1, 1)] = 0.2;
        gate_cost_matrix(&mut costs, 0.2);
        assert_eq!(costs[(0, 0)], 0.1);
        assert_eq!(costs[(0, 1)], 0.2 + 1e-6);
        assert_eq!(costs[(1, 0)], GATED_COST);
        assert_eq!(costs[(1, 1)], 0.2);

        let mut guard = Matrix::new(2, 2, 0.0_f32);
        guard[(1, 1)] = 10.0;
        restrict_cost_matrix(&mut costs, &guard, 9.4877);
        assert_eq!(costs[(1, 1)], GATED_COST);
        assert_eq!(costs[(0, 0)], 0.1);
    }

    #[test]
    fn nan_costs_are_gated() {
        let mut costs = Matrix::new(1, 2, f32::NAN);
        costs[(0, 1)] = 0.1;
        gate_cost_matrix(&mut costs, 0.2);
        assert_eq!(costs[(0, 0)], GATED_COST);
        assert_eq!(costs[(0, 1)], 0.1);

        let mut guard = Matrix::new(1, 2, 0.0_f32);
        guard[(0, 1)] = f32::NAN;
        restrict_cost_matrix(&mut costs, &guard, 9.4877);
        assert_eq!(costs[(0, 1)], GATED_COST);
    }
}
