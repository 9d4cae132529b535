use crate::track::{Feature, FEATURE_LANES_SIZE};
use std::ops::Mul;
use ultraviolet::f32x8;

/// Utility trait to get conversion between feature vector representations
///
pub trait FromVec<V, R> {
    fn from_vec(vec: V) -> R;
}

fn pack<T, I>(len: usize, values: I) -> Feature
where
    T: Into<f32>,
    I: IntoIterator<Item = T>,
{
    let mut feature = {
        let one_more = usize::from(len % FEATURE_LANES_SIZE > 0);
        Feature::with_capacity(len / FEATURE_LANES_SIZE + one_more)
    };

    let mut acc: [f32; FEATURE_LANES_SIZE] = [0.0; FEATURE_LANES_SIZE];
    let mut part = FEATURE_LANES_SIZE;
    for (counter, v) in values.into_iter().enumerate() {
        part = counter % FEATURE_LANES_SIZE;
        if part == 0 {
            acc = [0.0; FEATURE_LANES_SIZE];
        }
        acc[part] = v.into();
        if part == FEATURE_LANES_SIZE - 1 {
            feature.push(f32x8::new(acc));
            part = FEATURE_LANES_SIZE;
        }
    }

    if part < FEATURE_LANES_SIZE {
        feature.push(f32x8::new(acc));
    }
    feature
}

impl FromVec<&Feature, Vec<f32>> for Vec<f32> {
    fn from_vec(vec: &Feature) -> Vec<f32> {
        let mut res = Vec::with_capacity(vec.len() * FEATURE_LANES_SIZE);
        for e in vec {
            res.extend_from_slice(e.as_array_ref());
        }
        res
    }
}

impl FromVec<Vec<f32>, Feature> for Feature {
    fn from_vec(vec: Vec<f32>) -> Feature {
        Feature::from_vec(vec.as_slice())
    }
}

impl FromVec<&Vec<f32>, Feature> for Feature {
    fn from_vec(vec: &Vec<f32>) -> Feature {
        Feature::from_vec(vec.as_slice())
    }
}

impl FromVec<&[f32], Feature> for Feature {
    fn from_vec(vec: &[f32]) -> Feature {
        pack(vec.len(), vec.iter().copied())
    }
}

/// Quantized embeddings (int8 model outputs)
///
impl FromVec<&[i8], Feature> for Feature {
    fn from_vec(vec: &[i8]) -> Feature {
        pack(vec.len(), vec.iter().copied())
    }
}

impl FromVec<&[u8], Feature> for Feature {
    fn from_vec(vec: &[u8]) -> Feature {
        pack(vec.len(), vec.iter().copied())
    }
}

/// Squared L2 norm of the feature
///
pub fn norm_squared(f: &[f32x8]) -> f32 {
    f.iter().fold(0.0_f32, |acc, a| acc + a.mul(a).reduce_add())
}

/// Returns the feature scaled to the unit L2 norm
///
/// A zero vector is returned as is.
///
pub fn l2_normalize(f: &[f32x8]) -> Feature {
    let norm = norm_squared(f).sqrt();
    if norm <= f32::EPSILON {
        return f.to_vec();
    }
    let scale = f32x8::splat(1.0 / norm);
    f.iter().map(|block| *block * scale).collect()
}

#[cfg(test)]
mod tests {
    use crate::track::utils::{l2_normalize, norm_squared, FromVec};
    use crate::track::Feature;
    use crate::EPS;

    #[test]
    fn conv_tests() {
        let v = vec![0.0, 0.2, 0.3];
        let o = Feature::from_vec(v);
        let v2 = Vec::from_vec(&o);
        assert_eq!(v2, vec![0.0, 0.2, 0.3, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let v: Vec<f32> = (0..16).map(|x| x as f32).collect();
        let o = Feature::from_vec(&v);
        assert_eq!(o.len(), 2);
        assert_eq!(Vec::from_vec(&o), v);
    }

    #[test]
    fn quantized_conv() {
        let q: &[i8] = &[-1, 2, 127];
        let o = Feature::from_vec(q);
        let v = Vec::from_vec(&o);
        assert_eq!(&v[..3], &[-1.0, 2.0, 127.0]);

        let q: &[u8] = &[255, 0, 1];
        let o = Feature::from_vec(q);
        let v = Vec::from_vec(&o);
        assert_eq!(&v[..3], &[255.0, 0.0, 1.0]);
    }

    #[test]
    fn normalization() {
        let f = Feature::from_vec(vec![3.0, 4.0]);
        let n = l2_normalize(&f);
        assert!((norm_squared(&n) - 1.0).abs() < EPS);
        let v = Vec::from_vec(&n);
        assert!((v[0] - 0.6).abs() < EPS);
        assert!((v[1] - 0.8).abs() < EPS);

        let zero = Feature::from_vec(vec![0.0; 3]);
        assert_eq!(norm_squared(&l2_normalize(&zero)), 0.0);
    }
}
