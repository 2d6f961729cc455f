//! # Runtime
//!
//! Long-running tasks that feed the reconciler, gated by leader election.

pub mod leader;
pub mod watch;

pub use leader::{LeaderElector, LeadershipEnd};
pub use watch::{run_watch_loop, PvcEvent, PvcStore};
