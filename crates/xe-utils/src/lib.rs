#![forbid(unsafe_code)]

//! Shared glue for the xe-ui component crates: logging macros, development
//! diagnostics and monotonic ids.

pub mod id;
pub mod logging;
pub mod warning;

// Re-export tracing macros at crate root for ergonomic use.
#[cfg(feature = "tracing")]
pub use logging::{debug, error, info, trace, warn};

pub use id::{IdGenerator, get_id};
pub use warning::{Diagnostics, DiagnosticsMode};
