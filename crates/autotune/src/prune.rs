//! Candidate pruning ahead of benchmarking.
//!
//! Pruning trades completeness for tuning time: a cost model that mis-ranks
//! candidates can leave the true winner unmeasured.

use crate::error::{Result, TuneError};
use std::sync::Arc;
use tunecache_kernels::{ArgView, Configuration, KernelArgs, Params};

/// Predicted cost of one candidate, lower is better. Sees the call arguments
/// plus kwargs merged with the candidate's parameters.
pub type CostModel = Arc<dyn Fn(&ArgView<'_>) -> anyhow::Result<f64> + Send + Sync>;

/// Returns any subsequence of the candidates worth benchmarking.
pub type EarlyPrune = Arc<
    dyn Fn(&[Configuration], &KernelArgs, &Params) -> anyhow::Result<Vec<Configuration>>
        + Send
        + Sync,
>;

/// How many cost-ranked candidates survive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TopK {
    Count(usize),
    /// Fraction of the full candidate list; values above 1.0 are read as a count.
    Fraction(f64),
}

impl TopK {
    pub fn resolve(&self, total: usize) -> usize {
        match *self {
            TopK::Count(count) => count,
            TopK::Fraction(fraction) if fraction <= 1.0 => {
                (total as f64 * fraction.max(0.0)).floor() as usize
            }
            TopK::Fraction(count) => count.floor() as usize,
        }
    }
}

impl Default for TopK {
    fn default() -> Self {
        TopK::Fraction(1.0)
    }
}

#[derive(Clone, Default)]
pub struct PruneSpec {
    pub cost_model: Option<CostModel>,
    pub top_k: TopK,
    pub early_prune: Option<EarlyPrune>,
}

impl PruneSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cost_model<F>(mut self, model: F, top_k: TopK) -> Self
    where
        F: Fn(&ArgView<'_>) -> anyhow::Result<f64> + Send + Sync + 'static,
    {
        self.cost_model = Some(Arc::new(model));
        self.top_k = top_k;
        self
    }

    pub fn with_early_prune<F>(mut self, prune: F) -> Self
    where
        F: Fn(&[Configuration], &KernelArgs, &Params) -> anyhow::Result<Vec<Configuration>>
            + Send
            + Sync
            + 'static,
    {
        self.early_prune = Some(Arc::new(prune));
        self
    }

    /// Early rejection first, then cost ranking truncated to top-K of the
    /// original candidate count. Ranking is stable, so equal predictions keep
    /// their original order.
    pub fn apply(
        &self,
        configs: &[Configuration],
        args: &KernelArgs,
        kwargs: &Params,
    ) -> Result<Vec<Configuration>> {
        let mut pruned = match &self.early_prune {
            Some(prune) => prune(configs, args, kwargs).map_err(TuneError::Prune)?,
            None => configs.to_vec(),
        };

        if let Some(model) = &self.cost_model {
            let top_k = self.top_k.resolve(configs.len());
            if pruned.len() > top_k {
                let mut estimated = Vec::with_capacity(pruned.len());
                for config in pruned {
                    let mut params = kwargs.clone();
                    params.extend(config.all_params());
                    let cost = model(&ArgView::new(args, &params)).map_err(TuneError::Prune)?;
                    estimated.push((cost, config));
                }
                estimated.sort_by(|a, b| a.0.total_cmp(&b.0));
                pruned = estimated
                    .into_iter()
                    .take(top_k)
                    .map(|(_, config)| config)
                    .collect();
            }
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunecache_kernels::ParamValue;

    fn candidates() -> Vec<Configuration> {
        [64, 16, 128, 32]
            .into_iter()
            .map(|block| Configuration::default().with_param("BLOCK", block))
            .collect()
    }

    fn block(config: &Configuration) -> i64 {
        config.param("BLOCK").and_then(ParamValue::as_int).unwrap()
    }

    fn block_cost(view: &ArgView<'_>) -> anyhow::Result<f64> {
        Ok(view.int("BLOCK").unwrap_or(0) as f64)
    }

    #[test]
    fn top_k_fraction_keeps_cheapest_half() {
        let spec = PruneSpec::new().with_cost_model(block_cost, TopK::Fraction(0.5));
        let pruned = spec.apply(&candidates(), &KernelArgs::new(), &Params::new()).unwrap();
        let blocks: Vec<i64> = pruned.iter().map(block).collect();
        assert_eq!(blocks, vec![16, 32]);
    }

    #[test]
    fn top_k_count_truncates() {
        let spec = PruneSpec::new().with_cost_model(block_cost, TopK::Count(3));
        let pruned = spec.apply(&candidates(), &KernelArgs::new(), &Params::new()).unwrap();
        assert_eq!(pruned.iter().map(block).collect::<Vec<_>>(), vec![16, 32, 64]);
    }

    #[test]
    fn ranking_skipped_when_already_small_enough() {
        let spec = PruneSpec::new()
            .with_early_prune(|configs, _, _| Ok(configs[..2].to_vec()))
            .with_cost_model(block_cost, TopK::Count(2));
        let pruned = spec.apply(&candidates(), &KernelArgs::new(), &Params::new()).unwrap();
        assert_eq!(pruned.iter().map(block).collect::<Vec<_>>(), vec![64, 16]);
    }

    #[test]
    fn fraction_is_relative_to_original_count() {
        // 4 candidates, early prune keeps 3, top_k 0.5 of the original 4 keeps 2.
        let spec = PruneSpec::new()
            .with_early_prune(|configs, _, _| Ok(configs[1..].to_vec()))
            .with_cost_model(block_cost, TopK::Fraction(0.5));
        let pruned = spec.apply(&candidates(), &KernelArgs::new(), &Params::new()).unwrap();
        assert_eq!(pruned.iter().map(block).collect::<Vec<_>>(), vec![16, 32]);
    }

    #[test]
    fn cost_model_sees_kwargs_and_launch_params() {
        let spec = PruneSpec::new().with_cost_model(
            |view: &ArgView<'_>| {
                assert_eq!(view.int("num_warps"), Some(4));
                assert_eq!(view.int("SPLIT"), Some(2));
                Ok(0.0)
            },
            TopK::Count(1),
        );
        let mut kwargs = Params::new();
        kwargs.insert("SPLIT".into(), ParamValue::Int(2));
        let pruned = spec.apply(&candidates(), &KernelArgs::new(), &kwargs).unwrap();
        assert_eq!(pruned.len(), 1);
    }

    #[test]
    fn top_k_resolution() {
        assert_eq!(TopK::Fraction(0.5).resolve(5), 2);
        assert_eq!(TopK::Fraction(1.0).resolve(5), 5);
        assert_eq!(TopK::Fraction(3.0).resolve(5), 3);
        assert_eq!(TopK::Count(7).resolve(5), 7);
    }

    #[test]
    fn early_prune_errors_propagate() {
        let spec = PruneSpec::new().with_early_prune(|_, _, _| anyhow::bail!("no"));
        let err = spec.apply(&candidates(), &KernelArgs::new(), &Params::new()).unwrap_err();
        assert!(matches!(err, TuneError::Prune(_)));
    }
}
