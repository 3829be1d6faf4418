//! Kernel-side types for tunecache: configurations, runtime arguments, the
//! `Kernel` capability and CPU reference kernels.

pub mod accumulate;
pub mod args;
pub mod config;
pub mod kernel;
pub mod matmul;

pub use accumulate::*;
pub use args::*;
pub use config::*;
pub use kernel::*;
pub use matmul::*;
