/// DeepSORT tracker with the cascade matching and the part/body pairing
///
pub mod deepsort;
