pub mod database;
pub mod matcher;

pub use database::{FingerprintDatabase, FingerprintRow};
pub use matcher::{FingerprintMatcher, FingerprintSample, MagneticMatcher, RadioMatcher};
