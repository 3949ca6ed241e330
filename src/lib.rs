//! Indoor pedestrian navigation.
//!
//! A complementary-filter compass, step-driven dead reckoning and
//! fingerprint fixes (magnetic field, radio signal strength) fused by a
//! linear Kalman filter on a single floor.
//!
//! The `filters`, `fingerprint` and `strategy::KalmanStrategy` layers are pure
//! computation. `compass`, `strategy::StrategyRunner` and
//! `strategy::LocatorRunner` wire them to `observer::Channel`s.

pub mod compass;
pub mod config;
pub mod error;
pub mod filters;
pub mod fingerprint;
pub mod observer;
pub mod replay;
pub mod scheduler;
pub mod strategy;
pub mod types;

pub use compass::Compass;
pub use config::NavConfig;
pub use error::{ConfigError, FilterError, LoadError, LocatorError, SessionError};
pub use observer::{Channel, Emitter, SubscriptionId};
pub use replay::{ReplayPipeline, SessionEvent};
pub use strategy::{KalmanStrategy, LocatorRunner, StrategyRunner};
