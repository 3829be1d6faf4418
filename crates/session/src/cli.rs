//! CLI wiring for the tunecache toolkit.

use crate::session::{default_matmul_space, SessionOptions, TuningSession};
use anyhow::{ensure, Result};
use clap::{Parser, Subcommand};
use ndarray::Array2;
use std::fs;
use std::path::PathBuf;
use tunecache_autotune::{BenchMode, ConfigurationSpace};
use tunecache_kernels::{TiledMatmul, DEFAULT_SCRATCH_BYTES};

#[derive(Parser, Debug)]
#[command(name = "tunecache", about = "Kernel autotuning cache toolkit")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum BenchModeArg {
    Direct,
    Graph,
}

impl From<BenchModeArg> for BenchMode {
    fn from(value: BenchModeArg) -> BenchMode {
        match value {
            BenchModeArg::Direct => BenchMode::Direct,
            BenchModeArg::Graph => BenchMode::GraphReplay,
        }
    }
}

/// Block-size lists for the tiled matmul space.
#[derive(clap::Args, Debug, Clone)]
pub struct SpaceArgs {
    #[arg(long, value_delimiter = ',')]
    pub block_m: Vec<i64>,
    #[arg(long, value_delimiter = ',')]
    pub block_n: Vec<i64>,
    #[arg(long, value_delimiter = ',')]
    pub block_k: Vec<i64>,
    #[arg(long, value_delimiter = ',')]
    pub num_warps: Vec<u32>,
}

impl SpaceArgs {
    /// The default matmul space with any supplied lists swapped in.
    pub fn to_space(&self) -> ConfigurationSpace {
        let mut space = default_matmul_space();
        if !self.block_m.is_empty() {
            space = space.param("BLOCK_M", self.block_m.iter().copied());
        }
        if !self.block_n.is_empty() {
            space = space.param("BLOCK_N", self.block_n.iter().copied());
        }
        if !self.block_k.is_empty() {
            space = space.param("BLOCK_K", self.block_k.iter().copied());
        }
        if !self.num_warps.is_empty() {
            space = space.num_warps(self.num_warps.iter().copied());
        }
        space
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the configurations a matmul space expands to.
    Space {
        #[command(flatten)]
        space: SpaceArgs,
    },
    /// Resolve and run a tiled matmul, persisting the decision.
    TuneMatmul {
        #[arg(long, default_value_t = 256)]
        m: usize,
        #[arg(long, default_value_t = 256)]
        n: usize,
        #[arg(long, default_value_t = 256)]
        k: usize,
        #[command(flatten)]
        space: SpaceArgs,
        #[arg(long)]
        store_dir: Option<PathBuf>,
        #[arg(long, default_value_t = 5)]
        warmup: usize,
        #[arg(long, default_value_t = 20)]
        runs: usize,
        #[arg(long, value_enum, default_value = "direct")]
        bench_mode: BenchModeArg,
        #[arg(long, default_value_t = false)]
        clear_store: bool,
        #[arg(long, default_value_t = DEFAULT_SCRATCH_BYTES / 1024)]
        scratch_kib: usize,
        #[arg(long)]
        dump: Option<PathBuf>,
    },
    /// List the decisions held in a store directory.
    ShowCache {
        #[arg(long)]
        store_dir: PathBuf,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    match cli.command {
        Command::Space { space } => {
            let space = space.to_space();
            let configs = space.generate()?;
            println!("{space}");
            for config in &configs {
                println!("  {config}");
            }
            println!("{} configurations", configs.len());
        }
        Command::TuneMatmul {
            m,
            n,
            k,
            space,
            store_dir,
            warmup,
            runs,
            bench_mode,
            clear_store,
            scratch_kib,
            dump,
        } => {
            ensure!(m > 0 && n > 0 && k > 0, "matmul dimensions must be positive");
            let options = SessionOptions {
                store_dir,
                warmup_runs: warmup,
                runs,
                clear_store,
                bench_mode: bench_mode.into(),
            };
            let session = TuningSession::new(options)?;
            let kernel = TiledMatmul::new().with_scratch_limit(scratch_kib * 1024);
            let tuner = session.matmul_tuner(space.to_space(), kernel)?;

            let lhs = Array2::from_elem((m, k), 1.0f32);
            let rhs = Array2::from_elem((k, n), 1.0f32);
            let result = session.execute_matmul(&tuner, &lhs, &rhs)?;

            println!("key: {}", result.key);
            if let Some(config) = &result.config {
                println!("config: {config}");
            }
            match result.timing {
                Some(timing) => println!("timing: {timing}"),
                None => println!("timing: restored from store"),
            }
            if let Some(elapsed) = tuner.bench_time() {
                println!("tuning took {:.3}s", elapsed.as_secs_f64());
            }

            if let Some(path) = dump {
                let report = serde_json::json!({
                    "kernel": "tiled_matmul",
                    "key": result.key,
                    "config": result.config,
                    "timing": result.timing,
                });
                fs::write(path, serde_json::to_string_pretty(&report)?)?;
            }
        }
        Command::ShowCache { store_dir } => {
            let options = SessionOptions {
                store_dir: Some(store_dir),
                ..SessionOptions::default()
            };
            let session = TuningSession::new(options)?;
            let tables = session.stored_tables()?;
            if tables.is_empty() {
                println!("no stored decisions");
            }
            for table in tables {
                println!(
                    "{} (candidates={}, warmup={}, rep={}, bench={:.3}s)",
                    table.identity,
                    table.candidate_count,
                    table.warmup_count,
                    table.repeat_count,
                    table.total_bench_time_s
                );
                for entry in &table.entries {
                    match entry.timing {
                        Some(timing) => println!("  {} -> {} [{}]", entry.key, entry.config, timing),
                        None => println!("  {} -> {}", entry.key, entry.config),
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn space_lists_override_defaults() {
        let cli = Cli::parse_from(["tunecache", "space", "--block-m", "16,32", "--num-warps", "2,4,8"]);
        let Command::Space { space } = cli.command else {
            panic!("expected space subcommand");
        };
        // 2 BLOCK_M x 3 BLOCK_N x 2 BLOCK_K x 3 num_warps
        assert_eq!(space.to_space().generate().unwrap().len(), 36);
    }

    #[test]
    fn tune_matmul_defaults() {
        let cli = Cli::parse_from(["tunecache", "tune-matmul", "--bench-mode", "graph"]);
        match cli.command {
            Command::TuneMatmul {
                m,
                bench_mode,
                scratch_kib,
                ..
            } => {
                assert_eq!(m, 256);
                assert_eq!(BenchMode::from(bench_mode), BenchMode::GraphReplay);
                assert_eq!(scratch_kib, 64);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
