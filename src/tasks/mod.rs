//! Built-in supervised background tasks.

mod flush;
mod stale;

pub use flush::RecoveryFlushTask;
pub use stale::StaleConnectionTask;
