//! Declarative configuration spaces.

use crate::error::{Result, TuneError};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use tunecache_kernels::{ConfigHook, Configuration, LaunchParams, ParamValue, Params};

/// Predicate over one expanded parameter combination. Returning `Ok(false)`
/// rejects the combination; an error aborts generation.
pub type ParamCondition = Arc<dyn Fn(&Params) -> anyhow::Result<bool> + Send + Sync>;

/// Per-parameter candidate values plus launch-parameter candidates.
///
/// ```ignore
/// let space = ConfigurationSpace::new()
///     .param("BLOCK_N", [1024, 2048, 4096])
///     .num_warps([4, 8, 16])
///     .num_stages([1, 2, 4, 6]);
/// let configs = space.generate()?;
/// ```
#[derive(Clone)]
pub struct ConfigurationSpace {
    params: Vec<(String, Vec<ParamValue>)>,
    num_warps: Vec<u32>,
    num_ctas: Vec<u32>,
    num_stages: Vec<u32>,
    maxnreg: Vec<Option<u32>>,
    pre_hook: Option<Arc<dyn ConfigHook>>,
    conditions: Vec<ParamCondition>,
}

impl Default for ConfigurationSpace {
    fn default() -> Self {
        Self {
            params: Vec::new(),
            num_warps: vec![4],
            num_ctas: vec![1],
            num_stages: vec![2],
            maxnreg: vec![None],
            pre_hook: None,
            conditions: Vec::new(),
        }
    }
}

impl ConfigurationSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the candidate values of one tunable parameter.
    pub fn param<V, I>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        let name = name.into();
        let values: Vec<ParamValue> = values.into_iter().map(Into::into).collect();
        match self.params.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = values,
            None => self.params.push((name, values)),
        }
        self
    }

    pub fn num_warps(mut self, values: impl IntoIterator<Item = u32>) -> Self {
        self.num_warps = values.into_iter().collect();
        self
    }

    pub fn num_ctas(mut self, values: impl IntoIterator<Item = u32>) -> Self {
        self.num_ctas = values.into_iter().collect();
        self
    }

    pub fn num_stages(mut self, values: impl IntoIterator<Item = u32>) -> Self {
        self.num_stages = values.into_iter().collect();
        self
    }

    pub fn maxnreg(mut self, values: impl IntoIterator<Item = u32>) -> Self {
        self.maxnreg = values.into_iter().map(Some).collect();
        self
    }

    pub fn pre_hook(mut self, hook: Arc<dyn ConfigHook>) -> Self {
        self.pre_hook = Some(hook);
        self
    }

    /// Keeps only combinations accepted by `condition` (AND across conditions).
    pub fn condition<F>(self, condition: F) -> Self
    where
        F: Fn(&Params) -> bool + Send + Sync + 'static,
    {
        self.try_condition(move |params| Ok(condition(params)))
    }

    pub fn try_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Params) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.conditions.push(Arc::new(condition));
        self
    }

    /// Expands the space into concrete configurations, parameter combinations
    /// outermost, the last declared parameter varying fastest.
    pub fn generate(&self) -> Result<Vec<Configuration>> {
        let mut valid = Vec::new();
        for combination in self.param_combinations() {
            if self.accepts(&combination)? {
                valid.push(combination);
            }
        }

        let launches = self.launch_combinations();
        let mut configs = Vec::with_capacity(valid.len() * launches.len());
        for params in &valid {
            for launch in &launches {
                configs.push(
                    Configuration::new(params.clone(), *launch).with_pre_hook(self.pre_hook.clone()),
                );
            }
        }

        debug!(count = configs.len(), space = %self, "generated configurations");
        Ok(configs)
    }

    fn accepts(&self, combination: &Params) -> Result<bool> {
        for condition in &self.conditions {
            if !condition(combination).map_err(TuneError::SpaceGeneration)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn param_combinations(&self) -> Vec<Params> {
        let mut combinations = vec![Params::new()];
        for (name, values) in &self.params {
            let mut next = Vec::with_capacity(combinations.len() * values.len());
            for partial in &combinations {
                for value in values {
                    let mut combination = partial.clone();
                    combination.insert(name.clone(), value.clone());
                    next.push(combination);
                }
            }
            combinations = next;
        }
        combinations
    }

    fn launch_combinations(&self) -> Vec<LaunchParams> {
        let mut launches = Vec::new();
        for &num_warps in &self.num_warps {
            for &num_ctas in &self.num_ctas {
                for &num_stages in &self.num_stages {
                    for &maxnreg in &self.maxnreg {
                        launches.push(LaunchParams {
                            num_warps,
                            num_stages,
                            num_ctas,
                            maxnreg,
                        });
                    }
                }
            }
        }
        launches
    }
}

fn join<T: fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for ConfigurationSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .params
            .iter()
            .map(|(name, values)| format!("{name}: [{}]", join(values)))
            .collect();
        parts.push(format!("num_warps: [{}]", join(&self.num_warps)));
        parts.push(format!("num_ctas: [{}]", join(&self.num_ctas)));
        parts.push(format!("num_stages: [{}]", join(&self.num_stages)));
        if self.maxnreg.iter().any(Option::is_some) {
            let maxnreg: Vec<u32> = self.maxnreg.iter().flatten().copied().collect();
            parts.push(format!("maxnreg: [{}]", join(&maxnreg)));
        }
        write!(f, "ConfigurationSpace: {}", parts.join(", "))
    }
}

impl fmt::Debug for ConfigurationSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn block_by_warps_yields_four_distinct_configurations() {
        let space = ConfigurationSpace::new()
            .param("BLOCK", [16, 32])
            .num_warps([4, 8]);
        let configs = space.generate().unwrap();
        assert_eq!(configs.len(), 4);

        let pairs: HashSet<(i64, u32)> = configs
            .iter()
            .map(|c| (c.param("BLOCK").and_then(ParamValue::as_int).unwrap(), c.launch().num_warps))
            .collect();
        assert_eq!(pairs.len(), 4);
    }

    #[test]
    fn cardinality_is_product_of_all_lists() {
        let space = ConfigurationSpace::new()
            .param("BLOCK_M", [16, 32, 64])
            .param("BLOCK_N", [16, 32])
            .param("EVEN_K", [true, false])
            .num_warps([2, 4, 8])
            .num_stages([1, 2])
            .num_ctas([1]);
        assert_eq!(space.generate().unwrap().len(), 3 * 2 * 2 * 3 * 2);
    }

    #[test]
    fn rejecting_predicate_empties_the_space() {
        let space = ConfigurationSpace::new()
            .param("BLOCK", [16, 32])
            .num_warps([4, 8])
            .condition(|_| false);
        assert!(space.generate().unwrap().is_empty());
    }

    #[test]
    fn accepting_predicate_keeps_full_product() {
        let space = ConfigurationSpace::new()
            .param("BLOCK", [16, 32])
            .num_warps([4, 8])
            .condition(|_| true);
        assert_eq!(space.generate().unwrap().len(), 4);
    }

    #[test]
    fn conditions_are_anded() {
        let space = ConfigurationSpace::new()
            .param("BLOCK_M", [16, 32, 64])
            .param("BLOCK_N", [16, 32, 64])
            .condition(|p| p["BLOCK_M"].as_int() >= Some(32))
            .condition(|p| p["BLOCK_M"] == p["BLOCK_N"]);
        let configs = space.generate().unwrap();
        assert_eq!(configs.len(), 2);
        for config in configs {
            assert_eq!(config.param("BLOCK_M"), config.param("BLOCK_N"));
        }
    }

    #[test]
    fn generation_is_deterministic_and_last_param_fastest() {
        let space = ConfigurationSpace::new()
            .param("A", [1, 2])
            .param("B", [10, 20]);
        let first = space.generate().unwrap();
        assert_eq!(first, space.generate().unwrap());
        let order: Vec<(i64, i64)> = first
            .iter()
            .map(|c| (c.param("A").unwrap().as_int().unwrap(), c.param("B").unwrap().as_int().unwrap()))
            .collect();
        assert_eq!(order, vec![(1, 10), (1, 20), (2, 10), (2, 20)]);
    }

    #[test]
    fn failing_predicate_aborts_generation() {
        let space = ConfigurationSpace::new()
            .param("BLOCK", [16])
            .try_condition(|_| anyhow::bail!("bad predicate"));
        assert!(matches!(space.generate(), Err(TuneError::SpaceGeneration(_))));
    }

    #[test]
    fn pre_hook_is_copied_into_every_configuration() {
        let hook: Arc<dyn ConfigHook> =
            Arc::new(|_: &tunecache_kernels::ArgView<'_>| -> anyhow::Result<()> { Ok(()) });
        let configs = ConfigurationSpace::new()
            .param("BLOCK", [16, 32])
            .pre_hook(hook)
            .generate()
            .unwrap();
        assert!(configs.iter().all(|c| c.pre_hook().is_some()));
    }

    #[test]
    fn empty_space_has_one_default_configuration() {
        let configs = ConfigurationSpace::new().generate().unwrap();
        assert_eq!(configs, vec![Configuration::default()]);
    }

    #[test]
    fn display_summarizes_lists() {
        let space = ConfigurationSpace::new().param("BLOCK", [16, 32]).num_warps([4, 8]);
        assert_eq!(
            space.to_string(),
            "ConfigurationSpace: BLOCK: [16, 32], num_warps: [4, 8], num_ctas: [1], num_stages: [2]"
        );
    }
}
