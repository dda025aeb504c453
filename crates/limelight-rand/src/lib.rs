//! Deterministic, bias-free sampling for turn selection.
//!
//! One seed string drives any number of registered draws. For a fixed seed
//! and a fixed draw sequence the output is byte-for-byte reproducible, which
//! is what lets anyone re-run a pick once the secrets behind the seed are
//! revealed.

pub mod digest;
pub mod sampler;

pub use digest::sha3_hex;
pub use sampler::{Draw, RandError, Sampler, Value};
