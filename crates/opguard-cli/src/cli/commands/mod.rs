//! CLI command handlers, one file per command.

mod classify;
mod policies;
mod schedule;
mod simulate;

pub use classify::{run_classify, ClassifyArgs};
pub use policies::run_policies;
pub use schedule::run_schedule;
pub use simulate::{run_simulate, SimulateArgs};
