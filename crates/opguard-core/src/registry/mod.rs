//! Operation registry: tracks named in-flight operations, their progress and
//! optional timeouts.
//!
//! This is a best-effort observability structure. Unknown ids and invalid
//! progress values degrade to no-ops; nothing here returns an error. Every
//! mutation recomputes the aggregate [`RegistryStats`] under the same lock,
//! publishes it on a `watch` channel, and emits a [`RegistryEvent`] on a
//! broadcast channel.

mod guard;
mod operation;
mod state;
mod stats;

pub use guard::{LoadingGuard, ProgressHandle};
pub use operation::{Operation, RegistryEvent, StartOptions, TimeoutCallback};
pub use state::{OperationRegistry, RegistryOptions};
pub use stats::RegistryStats;
