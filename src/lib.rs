//! Reserve Flux - On-device compute engine for a continuous physiological reserve score
//!
//! Flux turns a time-ordered stream of wearable epochs into a 0-100 reserve
//! series through a deterministic pipeline: alias adaptation → baseline
//! resolution → classification, imputation, quality and sleep-architecture
//! prepasses → sequential charge/drain integration → summary.
//!
//! ## Optional stages
//!
//! - **Behavioral baseline**: personal sleep-duration and workout-intensity norms
//!   learned from an observation window scale later nights and workouts
//! - **Three-kernel hybrid**: blends the reserve with a learned time-of-day
//!   trend and can append a synthetic forecast tail

pub mod adapter;
pub mod baseline;
pub mod behavior;
pub mod calm;
pub mod config;
pub mod context;
pub mod encoder;
pub mod error;
pub mod features;
pub mod imputation;
pub mod integrator;
pub mod math;
pub mod pipeline;
pub mod quality;
pub mod segments;
pub mod summary;
pub mod trend;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use adapter::EpochAdapter;
pub use baseline::{default_baselines, infer_baselines};
pub use config::{BehaviorBaselineConfig, Params, RunConfig, ThreeKernelConfig};
pub use context::{Context, ContextKind};
pub use encoder::ReportEncoder;
pub use error::ComputeError;
pub use pipeline::{compute_series, compute_series_json, ReserveProcessor, RunInput};
pub use types::{Baselines, Epoch, ReserveResult, SeriesRow, Summary};

/// Crate version embedded in every result
pub const RESERVE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for report envelopes
pub const PRODUCER_NAME: &str = "reserve-flux";

/// Default engine parameters
pub fn default_params() -> Params {
    Params::default()
}
