//! Static dependency graph and topological wave decomposition (§4.4).
//!
//! The algorithm mirrors the Python reference's in-degree approach: build an
//! in-degree table restricted to hooks actually present in the strategy,
//! repeatedly peel off the zero-in-degree frontier as a wave, and detect a
//! cycle when a full pass makes no progress.

use std::collections::{HashMap, HashSet};

use crate::error::OrchestratorError;
use crate::hook::HookDefinition;

/// Static `dependent -> prerequisite[]` map over hook names.
///
/// Dependencies are purely name-based; a prerequisite absent from the
/// current strategy is silently ignored rather than treated as an error,
/// since the graph is shared across strategies that may not use every hook.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: HashMap<String, Vec<String>>) -> Self {
        Self { edges }
    }

    pub fn add_dependency(&mut self, dependent: impl Into<String>, prerequisite: impl Into<String>) {
        self.edges
            .entry(dependent.into())
            .or_default()
            .push(prerequisite.into());
    }

    fn prerequisites_of(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Compute the execution waves for `hooks` under this graph.
    ///
    /// Returns one `Vec<HookDefinition>` per wave, each a clone of the
    /// hooks runnable at that point, in the strategy's original order
    /// (stability guarantee, §4.4). Returns [`OrchestratorError::Cycle`]
    /// naming every hook that never reached in-degree zero.
    pub fn compute_waves(
        &self,
        hooks: &[HookDefinition],
    ) -> Result<Vec<Vec<HookDefinition>>, OrchestratorError> {
        let hook_map: HashMap<&str, &HookDefinition> =
            hooks.iter().map(|h| (h.name.as_str(), h)).collect();

        let mut in_degree: HashMap<&str, usize> = hooks
            .iter()
            .map(|h| {
                let degree = self
                    .prerequisites_of(&h.name)
                    .iter()
                    .filter(|dep| hook_map.contains_key(dep.as_str()))
                    .count();
                (h.name.as_str(), degree)
            })
            .collect();

        let mut remaining: HashSet<&str> = hook_map.keys().copied().collect();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            // Stable: emit in original strategy order within the wave.
            let ready: Vec<&str> = hooks
                .iter()
                .map(|h| h.name.as_str())
                .filter(|name| remaining.contains(name) && in_degree[name] == 0)
                .collect();

            if ready.is_empty() {
                let mut cyclic: Vec<String> = remaining.iter().map(|s| s.to_string()).collect();
                cyclic.sort();
                return Err(OrchestratorError::Cycle(cyclic));
            }

            for name in &ready {
                remaining.remove(name);
            }

            // Decrement in-degree of every hook whose prerequisite list
            // contained one of the just-emitted hooks.
            for name in remaining.clone() {
                let deps = self.prerequisites_of(name);
                let satisfied = deps.iter().filter(|d| ready.contains(&d.as_str())).count();
                if satisfied > 0 {
                    *in_degree.get_mut(name).unwrap() -= satisfied;
                }
            }

            waves.push(
                ready
                    .into_iter()
                    .map(|name| hook_map[name].clone())
                    .collect(),
            );
        }

        Ok(waves)
    }
}
