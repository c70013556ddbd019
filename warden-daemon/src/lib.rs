//! Long-running warden runtime: watcher + scan processor + cleaner.

mod error;
mod runtime;

pub use error::DaemonError;
pub use runtime::{init_tracing, run, run_until_shutdown, start_blocking, DEBOUNCE_WINDOW};
