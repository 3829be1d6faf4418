//! Tiled matrix multiplication with tunable block sizes.

use crate::args::KernelArgs;
use crate::kernel::{Kernel, KernelError, LaunchRequest};
use anyhow::{anyhow, bail, Result};
use ndarray::linalg::general_mat_mul;
use ndarray::{s, Array2, ArrayView2, Ix2};
use rayon::prelude::*;

/// Scratch budget a single program instance may use for its operand tiles.
pub const DEFAULT_SCRATCH_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulBlocks {
    pub block_m: usize,
    pub block_n: usize,
    pub block_k: usize,
}

impl MatmulBlocks {
    pub fn from_request(request: &LaunchRequest) -> Result<Self, KernelError> {
        let block = |name: &str| -> Result<usize, KernelError> {
            let value = request.int_param(name)?;
            if value <= 0 || !(value as u64).is_power_of_two() {
                return Err(KernelError::CompileTimeAssertion(format!(
                    "{name} must be a positive power of two, got {value}"
                )));
            }
            Ok(value as usize)
        };
        Ok(Self {
            block_m: block("BLOCK_M")?,
            block_n: block("BLOCK_N")?,
            block_k: block("BLOCK_K")?,
        })
    }

    /// Bytes of operand tiles resident per program instance.
    pub fn scratch_bytes(&self, element_size: usize) -> usize {
        (self.block_m * self.block_k + self.block_k * self.block_n) * element_size
    }
}

/// `lhs (m x k) * rhs (k x n)`, tiled by `BLOCK_M`/`BLOCK_N`/`BLOCK_K`.
///
/// Arguments: `lhs`, `rhs` tensors and `m`, `n`, `k` integer scalars.
pub struct TiledMatmul {
    scratch_limit: usize,
}

impl TiledMatmul {
    pub const ARG_NAMES: [&'static str; 5] = ["lhs", "rhs", "m", "n", "k"];

    pub fn new() -> Self {
        Self {
            scratch_limit: DEFAULT_SCRATCH_BYTES,
        }
    }

    pub fn with_scratch_limit(mut self, bytes: usize) -> Self {
        self.scratch_limit = bytes;
        self
    }

    fn compile(&self, args: &KernelArgs, request: &LaunchRequest) -> Result<MatmulBlocks, KernelError> {
        let blocks = MatmulBlocks::from_request(request)?;
        let element_size = args.get_tensor("lhs")?.dtype().element_size_bytes();
        let required = blocks.scratch_bytes(element_size);
        if required > self.scratch_limit {
            return Err(KernelError::OutOfResources {
                resource: "scratch memory".into(),
                required,
                limit: self.scratch_limit,
            });
        }
        Ok(blocks)
    }
}

impl Default for TiledMatmul {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for TiledMatmul {
    type Output = Array2<f32>;

    fn name(&self) -> &str {
        "tiled_matmul"
    }

    fn arg_names(&self) -> &[&'static str] {
        &Self::ARG_NAMES
    }

    fn run(&self, args: &KernelArgs, request: &LaunchRequest) -> Result<Array2<f32>, KernelError> {
        let blocks = self.compile(args, request)?;
        let dims = |name: &str| -> Result<usize> {
            let value = args.get_int(name)?;
            usize::try_from(value).map_err(|_| anyhow!("`{name}` must be non-negative, got {value}"))
        };
        let (m, n, k) = (dims("m")?, dims("n")?, dims("k")?);

        let lhs = args
            .get_tensor("lhs")?
            .snapshot()
            .into_dimensionality::<Ix2>()
            .map_err(|e| anyhow!("lhs must be 2-D: {e}"))?;
        let rhs = args
            .get_tensor("rhs")?
            .snapshot()
            .into_dimensionality::<Ix2>()
            .map_err(|e| anyhow!("rhs must be 2-D: {e}"))?;
        validate_matmul_inputs(&lhs.view(), &rhs.view(), m, n, k)?;

        Ok(tiled_product(&lhs.view(), &rhs.view(), blocks))
    }

    fn warmup(&self, args: &KernelArgs, request: &LaunchRequest) -> Result<(), KernelError> {
        self.compile(args, request).map(|_| ())
    }
}

pub fn validate_matmul_inputs(
    lhs: &ArrayView2<'_, f32>,
    rhs: &ArrayView2<'_, f32>,
    m: usize,
    n: usize,
    k: usize,
) -> Result<()> {
    if lhs.dim() != (m, k) || rhs.dim() != (k, n) {
        bail!(
            "matmul dimension mismatch: lhs {}x{} rhs {}x{} for m={} n={} k={}",
            lhs.nrows(),
            lhs.ncols(),
            rhs.nrows(),
            rhs.ncols(),
            m,
            n,
            k
        );
    }
    Ok(())
}

fn tiled_product(lhs: &ArrayView2<'_, f32>, rhs: &ArrayView2<'_, f32>, blocks: MatmulBlocks) -> Array2<f32> {
    let (m, k) = lhs.dim();
    let n = rhs.ncols();
    let row_starts: Vec<usize> = (0..m).step_by(blocks.block_m).collect();

    let row_blocks: Vec<(usize, Array2<f32>)> = row_starts
        .par_iter()
        .map(|&i0| {
            let i_max = (i0 + blocks.block_m).min(m);
            let mut block = Array2::<f32>::zeros((i_max - i0, n));
            for j0 in (0..n).step_by(blocks.block_n) {
                let j_max = (j0 + blocks.block_n).min(n);
                for p0 in (0..k).step_by(blocks.block_k) {
                    let p_max = (p0 + blocks.block_k).min(k);
                    let a = lhs.slice(s![i0..i_max, p0..p_max]);
                    let b = rhs.slice(s![p0..p_max, j0..j_max]);
                    general_mat_mul(1.0, &a, &b, 1.0, &mut block.slice_mut(s![.., j0..j_max]));
                }
            }
            (i0, block)
        })
        .collect();

    let mut output = Array2::<f32>::zeros((m, n));
    for (i0, block) in row_blocks {
        let rows = block.nrows();
        output.slice_mut(s![i0..i0 + rows, ..]).assign(&block);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Tensor;
    use crate::config::{Configuration, DataType, Params};

    fn request(bm: i64, bn: i64, bk: i64) -> LaunchRequest {
        let config = Configuration::default()
            .with_param("BLOCK_M", bm)
            .with_param("BLOCK_N", bn)
            .with_param("BLOCK_K", bk);
        LaunchRequest::merged(&Params::new(), &config)
    }

    fn args(m: usize, n: usize, k: usize) -> KernelArgs {
        let lhs: Vec<f32> = (0..m * k).map(|v| (v % 7) as f32).collect();
        let rhs: Vec<f32> = (0..k * n).map(|v| (v % 5) as f32 - 2.0).collect();
        KernelArgs::new()
            .tensor("lhs", Tensor::from_shape_vec(DataType::F32, &[m, k], lhs).unwrap())
            .tensor("rhs", Tensor::from_shape_vec(DataType::F32, &[k, n], rhs).unwrap())
            .scalar("m", m)
            .scalar("n", n)
            .scalar("k", k)
    }

    #[test]
    fn tiled_matches_reference_for_ragged_shapes() {
        let args = args(37, 19, 23);
        let kernel = TiledMatmul::new();
        let out = kernel.run(&args, &request(16, 8, 4)).unwrap();

        let lhs = args.get_tensor("lhs").unwrap().snapshot().into_dimensionality::<Ix2>().unwrap();
        let rhs = args.get_tensor("rhs").unwrap().snapshot().into_dimensionality::<Ix2>().unwrap();
        let expected = lhs.dot(&rhs);
        assert_eq!(out, expected);
    }

    #[test]
    fn oversized_tiles_run_out_of_resources() {
        let kernel = TiledMatmul::new().with_scratch_limit(1024);
        let err = kernel.run(&args(4, 4, 4), &request(64, 64, 64)).unwrap_err();
        assert!(matches!(err, KernelError::OutOfResources { .. }));
    }

    #[test]
    fn non_power_of_two_block_fails_compilation() {
        let kernel = TiledMatmul::new();
        let err = kernel.warmup(&args(4, 4, 4), &request(12, 16, 16)).unwrap_err();
        assert!(matches!(err, KernelError::CompileTimeAssertion(_)));
    }

    #[test]
    fn dimension_mismatch_is_not_a_configuration_failure() {
        let mut bad = args(4, 4, 4);
        bad.push("m", crate::args::Arg::Scalar(5usize.into()));
        let err = TiledMatmul::new().run(&bad, &request(4, 4, 4)).unwrap_err();
        assert!(!err.is_configuration_failure());
    }
}
