//! tunecache session layer: environment switches, the tuning session and the
//! command-line front end.

#[cfg(feature = "cli")]
pub mod cli;
pub mod env;
pub mod session;

#[cfg(feature = "cli")]
pub use cli::*;
pub use env::*;
pub use session::*;
