//! # Trajectory control module
//!
//! Trajectory control is responsible for keeping the vehicle on the reference path. It does this
//! with a model predictive controller (MPC) which is rerun from scratch on every telemetry
//! snapshot.
//!
//! Each cycle:
//!
//! 1. The global waypoints are transformed into the vehicle body frame, in which the vehicle sits
//!    at the origin pointing along +x (see [`frame`]).
//! 2. A polynomial, the reference curve, is fitted through the transformed waypoints (see
//!    [`poly_fit`]).
//! 3. The cross track error (cte) and heading error (epsi) are read off the curve at the origin
//!    (see [`error_state`]).
//! 4. A finite horizon optimisation over a kinematic bicycle model finds the steering and
//!    throttle sequence that best tracks the curve (see [`mpc`]). Only the first actuation is
//!    applied, the next cycle solves again with fresh telemetry.
//! 5. The actuation is scaled into the vehicle's [-1, 1] actuator range and a braking override
//!    is applied for sharp turns at high reference speed (see [`post_proc`]).

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod error_state;
pub mod frame;
pub mod mpc;
pub mod params;
pub mod poly_fit;
pub mod post_proc;
pub mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use params::{FallbackPolicy, Params};
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during TrajCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum TrajCtrlError {
    #[error("Could not load the TrajCtrl parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("Invalid TrajCtrl parameters: {0}")]
    InvalidParams(String),

    #[error("Could not initialise the TrajCtrl archive: {0}")]
    ArchiveError(util::archive::ArchiveError),

    #[error("The telemetry contains non-finite values: {0}")]
    NonFiniteTelemetry(String),

    #[error("Could not transform the waypoints into the body frame: {0}")]
    FrameError(frame::FrameError),

    #[error("Could not fit the reference curve: {0}")]
    PolyFitError(poly_fit::PolyFitError),

    #[error("Could not compute the error state: {0}")]
    ErrorStateError(error_state::ErrorStateError),

    #[error("MPC failed: {0}")]
    MpcError(mpc::MpcError),
}
