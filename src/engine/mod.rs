//! Ticket engine: state machine, lease management, dependency resolution,
//! and the workflow operations built on them.

pub mod lease;
pub mod resolver;
pub mod retry;
pub mod state_machine;
pub mod sweep;
pub mod workflow;

pub use lease::{ExpirationResult, ExpireClaimsResult};
pub use resolver::Cascade;
pub use state_machine::{Guards, Rejection, Transition};
pub use sweep::Sweeper;
pub use workflow::Workflow;
