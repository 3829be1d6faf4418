//! In-place accumulation, a kernel that mutates its own inputs.

use crate::args::KernelArgs;
use crate::kernel::{Kernel, KernelError, LaunchRequest};
use anyhow::anyhow;
use ndarray::Axis;

/// `acc += x`, processed in chunks of `BLOCK` elements.
///
/// Running it more than once per logical call double-counts `x`, so tuning it
/// needs `acc` restored between trials.
#[derive(Debug, Default)]
pub struct AccumulateKernel {
    max_block: Option<usize>,
}

impl AccumulateKernel {
    pub const ARG_NAMES: [&'static str; 3] = ["acc", "x", "n"];

    pub fn new() -> Self {
        Self { max_block: None }
    }

    /// Blocks larger than `max_block` fail with `OutOfResources`.
    pub fn with_max_block(mut self, max_block: usize) -> Self {
        self.max_block = Some(max_block);
        self
    }

    fn block(&self, request: &LaunchRequest) -> Result<usize, KernelError> {
        let block = request.int_param("BLOCK")?;
        if block <= 0 {
            return Err(KernelError::CompileTimeAssertion(format!(
                "BLOCK must be positive, got {block}"
            )));
        }
        let block = block as usize;
        if let Some(limit) = self.max_block {
            if block > limit {
                return Err(KernelError::OutOfResources {
                    resource: "threads per block".into(),
                    required: block,
                    limit,
                });
            }
        }
        Ok(block)
    }
}

impl Kernel for AccumulateKernel {
    type Output = ();

    fn name(&self) -> &str {
        "accumulate"
    }

    fn arg_names(&self) -> &[&'static str] {
        &Self::ARG_NAMES
    }

    fn run(&self, args: &KernelArgs, request: &LaunchRequest) -> Result<(), KernelError> {
        let block = self.block(request)?;
        let n = args.get_int("n")? as usize;
        // Read x before locking acc so aliasing the two arguments cannot deadlock.
        let x = args.get_tensor("x")?.snapshot();
        let acc = args.get_tensor("acc")?;
        if x.len() < n {
            return Err(anyhow!("x holds {} elements, n is {}", x.len(), n).into());
        }
        acc.with_data_mut(|data| {
            let len = data.len();
            if len < n {
                return Err(anyhow!("acc holds {len} elements, n is {n}").into());
            }
            let mut flat = data.view_mut().into_shape(len).map_err(|e| anyhow!("{e}"))?;
            let x = x.view().into_shape(x.len()).map_err(|e| anyhow!("{e}"))?;
            for (mut dst, src) in flat
                .slice_mut(ndarray::s![..n])
                .axis_chunks_iter_mut(Axis(0), block)
                .zip(x.slice(ndarray::s![..n]).axis_chunks_iter(Axis(0), block))
            {
                dst += &src;
            }
            Ok(())
        })
    }

    fn warmup(&self, _args: &KernelArgs, request: &LaunchRequest) -> Result<(), KernelError> {
        self.block(request).map(|_| ())
    }
}
