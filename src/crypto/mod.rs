pub mod signatures;

pub use signatures::{verify_encoded, PublicKeyMaterial, SecretKeyMaterial};
