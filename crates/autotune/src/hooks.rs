//! Hooks that keep argument-mutating kernels measurable.
//!
//! Benchmarking runs one logical call many times. Arguments a kernel writes to
//! must look the same at the start of every trial and again before the
//! production launch. The engine drives a [`PreDispatchHook`] before and a
//! [`PostDispatchHook`] after every trial; the built-in [`ResetRestore`] pair
//! implements both from a [`ResetHook`] and a [`RestoreHook`].

use anyhow::{bail, Result};
use ndarray::ArrayD;
use std::sync::{Mutex, PoisonError};
use tunecache_kernels::KernelArgs;

/// Why the pre-dispatch hook is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookMode {
    /// Before a benchmarking trial; a matching post-dispatch call follows.
    Trial,
    /// Once after resolution, before the production launch; no post-dispatch
    /// call follows.
    ResetOnly,
}

/// Puts arguments into their initial state. Must be idempotent.
pub trait ResetHook: Send + Sync {
    fn reset(&self, args: &KernelArgs) -> Result<()>;
}

/// Captures argument contents and later writes them back. `restore` is the
/// exact inverse of the last `snapshot`, and a no-op without one.
pub trait RestoreHook: Send + Sync {
    fn snapshot(&self, args: &KernelArgs) -> Result<()>;
    fn restore(&self, args: &KernelArgs) -> Result<()>;
}

pub trait PreDispatchHook: Send + Sync {
    fn pre_dispatch(&self, args: &KernelArgs, mode: HookMode) -> Result<()>;
}

pub trait PostDispatchHook: Send + Sync {
    fn post_dispatch(&self, args: &KernelArgs) -> Result<()>;
}

impl<F> PreDispatchHook for F
where
    F: Fn(&KernelArgs, HookMode) -> Result<()> + Send + Sync,
{
    fn pre_dispatch(&self, args: &KernelArgs, mode: HookMode) -> Result<()> {
        self(args, mode)
    }
}

impl<F> PostDispatchHook for F
where
    F: Fn(&KernelArgs) -> Result<()> + Send + Sync,
{
    fn post_dispatch(&self, args: &KernelArgs) -> Result<()> {
        self(args)
    }
}

/// Zeroes the named tensor arguments.
#[derive(Debug, Clone)]
pub struct ZeroArguments {
    names: Vec<String>,
}

impl ZeroArguments {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

impl ResetHook for ZeroArguments {
    fn reset(&self, args: &KernelArgs) -> Result<()> {
        for name in &self.names {
            args.get_tensor(name)?.zero_();
        }
        Ok(())
    }
}

/// Snapshots the named tensor arguments and copies them back.
#[derive(Debug)]
pub struct RestoreArguments {
    names: Vec<String>,
    copies: Mutex<Vec<ArrayD<f32>>>,
}

impl RestoreArguments {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            copies: Mutex::new(Vec::new()),
        }
    }
}

impl RestoreHook for RestoreArguments {
    fn snapshot(&self, args: &KernelArgs) -> Result<()> {
        let copies = self
            .names
            .iter()
            .map(|name| Ok(args.get_tensor(name)?.snapshot()))
            .collect::<Result<Vec<_>>>()?;
        *self.copies.lock().unwrap_or_else(PoisonError::into_inner) = copies;
        Ok(())
    }

    fn restore(&self, args: &KernelArgs) -> Result<()> {
        let copies = std::mem::take(&mut *self.copies.lock().unwrap_or_else(PoisonError::into_inner));
        if copies.is_empty() {
            return Ok(());
        }
        if copies.len() != self.names.len() {
            bail!(
                "restore expected {} snapshots, found {}",
                self.names.len(),
                copies.len()
            );
        }
        for (name, copy) in self.names.iter().zip(&copies) {
            args.get_tensor(name)?.copy_from(copy)?;
        }
        Ok(())
    }
}

/// The engine's built-in pre/post pair for `reset_to_zero` and `restore_value`.
#[derive(Debug)]
pub struct ResetRestore {
    reset: Option<ZeroArguments>,
    restore: Option<RestoreArguments>,
}

impl ResetRestore {
    pub fn new(reset_to_zero: &[String], restore_value: &[String]) -> Self {
        Self {
            reset: (!reset_to_zero.is_empty()).then(|| ZeroArguments::new(reset_to_zero.to_vec())),
            restore: (!restore_value.is_empty())
                .then(|| RestoreArguments::new(restore_value.to_vec())),
        }
    }
}

impl PreDispatchHook for ResetRestore {
    fn pre_dispatch(&self, args: &KernelArgs, mode: HookMode) -> Result<()> {
        if let Some(reset) = &self.reset {
            reset.reset(args)?;
        }
        if mode == HookMode::Trial {
            if let Some(restore) = &self.restore {
                restore.snapshot(args)?;
            }
        }
        Ok(())
    }
}

impl PostDispatchHook for ResetRestore {
    fn post_dispatch(&self, args: &KernelArgs) -> Result<()> {
        match &self.restore {
            Some(restore) => restore.restore(args),
            None => Ok(()),
        }
    }
}
