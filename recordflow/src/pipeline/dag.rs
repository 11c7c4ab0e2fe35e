//! Dependency-graph ordering for pipeline stages.
//!
//! Ordering is deterministic: ties are broken by declaration order, so the
//! same pipeline always executes the same way.

use std::collections::{HashMap, HashSet};

use super::config::StageConfig;
use crate::errors::CycleDetectedError;

/// Returns a topological execution order over `stages`.
///
/// Depth-first in declaration order, so independent stages keep their
/// declared relative order.
///
/// # Errors
///
/// Returns [`CycleDetectedError`] carrying the offending path when the
/// dependency graph contains a cycle.
pub fn execution_order(stages: &[StageConfig]) -> Result<Vec<String>, CycleDetectedError> {
    let ids: Vec<&str> = stages.iter().map(|s| s.id.as_str()).collect();
    let deps: HashMap<&str, &[String]> = stages
        .iter()
        .map(|s| (s.id.as_str(), s.dependencies.as_slice()))
        .collect();

    let mut order = Vec::with_capacity(stages.len());
    let mut done: HashSet<&str> = HashSet::new();
    let mut in_progress: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = Vec::new();

    fn visit<'a>(
        id: &'a str,
        deps: &HashMap<&'a str, &'a [String]>,
        done: &mut HashSet<&'a str>,
        in_progress: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), CycleDetectedError> {
        if done.contains(id) {
            return Ok(());
        }
        if in_progress.contains(id) {
            let start = path.iter().position(|p| *p == id).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|p| (*p).to_string()).collect();
            cycle.push(id.to_string());
            return Err(CycleDetectedError { cycle });
        }
        in_progress.insert(id);
        path.push(id);
        if let Some(dep_ids) = deps.get(id) {
            for dep in *dep_ids {
                // Unknown deps are caught by Pipeline::validate; skip here.
                if deps.contains_key(dep.as_str()) {
                    visit(dep.as_str(), deps, done, in_progress, path, order)?;
                }
            }
        }
        path.pop();
        in_progress.remove(id);
        done.insert(id);
        order.push(id.to_string());
        Ok(())
    }

    for id in ids {
        visit(id, &deps, &mut done, &mut in_progress, &mut path, &mut order)?;
    }
    Ok(order)
}

/// Groups an execution order into batches that may run concurrently.
///
/// Consecutive stages in `order` sharing the same `parallel_group` tag form
/// one batch, provided none depends on another batch member. Everything else
/// runs in its own single-stage batch.
#[must_use]
pub fn parallel_batches(order: &[String], stages: &[StageConfig]) -> Vec<Vec<String>> {
    let by_id: HashMap<&str, &StageConfig> =
        stages.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut batches: Vec<Vec<String>> = Vec::new();
    for id in order {
        let stage = match by_id.get(id.as_str()) {
            Some(s) => *s,
            None => {
                batches.push(vec![id.clone()]);
                continue;
            }
        };

        let joined = stage.parallel_group.as_ref().is_some_and(|group| {
            let Some(batch) = batches.last() else {
                return false;
            };
            let same_group = batch.iter().all(|member| {
                by_id
                    .get(member.as_str())
                    .and_then(|m| m.parallel_group.as_ref())
                    .is_some_and(|g| g == group)
            });
            let independent = batch
                .iter()
                .all(|member| !stage.dependencies.contains(member));
            same_group && independent
        });

        if joined {
            if let Some(batch) = batches.last_mut() {
                batch.push(id.clone());
            }
        } else {
            batches.push(vec![id.clone()]);
        }
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::StageParams;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap as StdHashMap;

    fn stage(id: &str, deps: &[&str]) -> StageConfig {
        let mut config = StageConfig::new(
            id,
            StageParams::Ingestion {
                field_mappings: StdHashMap::new(),
                required_fields: Vec::new(),
            },
        );
        for dep in deps {
            config = config.with_dependency(*dep);
        }
        config
    }

    #[test]
    fn test_linear_order() {
        let stages = vec![stage("a", &[]), stage("b", &["a"]), stage("c", &["b"])];
        let order = execution_order(&stages).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_order_is_deterministic_for_diamond() {
        let stages = vec![
            stage("a", &[]),
            stage("b", &["a"]),
            stage("c", &["a"]),
            stage("d", &["b", "c"]),
        ];
        for _ in 0..5 {
            let order = execution_order(&stages).unwrap();
            assert_eq!(order, vec!["a", "b", "c", "d"]);
        }
    }

    #[test]
    fn test_dependency_always_precedes_dependent() {
        let stages = vec![
            stage("z", &["m"]),
            stage("m", &["a"]),
            stage("a", &[]),
        ];
        let order = execution_order(&stages).unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos("a") < pos("m"));
        assert!(pos("m") < pos("z"));
    }

    #[test]
    fn test_cycle_reports_path() {
        let stages = vec![
            stage("a", &["c"]),
            stage("b", &["a"]),
            stage("c", &["b"]),
        ];
        let err = execution_order(&stages).unwrap_err();
        assert_eq!(err.cycle.first(), err.cycle.last());
        assert!(err.cycle.len() >= 3);
    }

    #[test]
    fn test_self_cycle() {
        let stages = vec![stage("a", &["a"])];
        let err = execution_order(&stages).unwrap_err();
        assert_eq!(err.cycle, vec!["a", "a"]);
    }

    #[test]
    fn test_parallel_batches_groups_tagged_stages() {
        let stages = vec![
            stage("load", &[]),
            stage("x", &["load"]).with_parallel_group("fanout"),
            stage("y", &["load"]).with_parallel_group("fanout"),
            stage("merge", &["x", "y"]),
        ];
        let order = execution_order(&stages).unwrap();
        let batches = parallel_batches(&order, &stages);
        assert_eq!(
            batches,
            vec![
                vec!["load".to_string()],
                vec!["x".to_string(), "y".to_string()],
                vec!["merge".to_string()],
            ]
        );
    }

    #[test]
    fn test_parallel_batches_respects_dependencies() {
        // Same tag but b depends on a, so they cannot share a batch.
        let stages = vec![
            stage("a", &[]).with_parallel_group("g"),
            stage("b", &["a"]).with_parallel_group("g"),
        ];
        let order = execution_order(&stages).unwrap();
        let batches = parallel_batches(&order, &stages);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_untagged_stages_run_alone() {
        let stages = vec![stage("a", &[]), stage("b", &[])];
        let order = execution_order(&stages).unwrap();
        let batches = parallel_batches(&order, &stages);
        assert_eq!(batches, vec![vec!["a".to_string()], vec!["b".to_string()]]);
    }
}
