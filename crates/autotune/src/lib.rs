//! Memoizing autotuner for parameterized kernels.
//!
//! An [`Autotuner`] wraps a [`tunecache_kernels::Kernel`], benchmarks its
//! candidate configurations once per cache key, and dispatches every later
//! call with the same key straight to the remembered winner.

pub mod bench;
pub mod cache;
pub mod error;
pub mod hooks;
pub mod identity;
pub mod key;
pub mod options;
pub mod prune;
pub mod space;
pub mod store;
pub mod tuner;

pub use bench::*;
pub use cache::*;
pub use error::*;
pub use hooks::*;
pub use identity::*;
pub use key::*;
pub use options::*;
pub use prune::*;
pub use space::*;
pub use store::*;
pub use tuner::*;
