//! Process-wide `tracing` setup. Library code only uses the re-exported macros;
//! the binary installs the subscriber.

mod logger;
pub use logger::*;

pub use tracing::{debug, error, info, trace, warn};
