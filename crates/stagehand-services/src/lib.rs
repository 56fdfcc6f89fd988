//! ---
//! sh_section: "02-service-lifecycle"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Service lifecycle state machine and concurrent supervision."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
//! Long-running services and the supervisor that runs them as one unit.
//!
//! A [`Service`] walks the [`State`] machine and publishes each transition to its
//! listeners. [`BasicService`] builds one from [`Lifecycle`] hooks. [`ServiceManager`]
//! starts a frozen set of services concurrently and stops all of them once the run is
//! cancelled or any one of them fails.

pub mod basic;
pub mod error;
pub mod manager;
pub mod service;
pub mod state;

pub use basic::{BasicService, Idle, IdleService, Lifecycle};
pub use error::{
    is_stop_requested, Phase, Result, ServiceError, ServiceFailure, StopRequested,
    SupervisorError,
};
pub use manager::{ServiceManager, SupervisorPhase};
pub use service::{Service, SharedService, Transition, TransitionSender};
pub use state::State;
