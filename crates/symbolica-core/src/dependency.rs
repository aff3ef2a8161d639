//! Rule dependency analysis
//!
//! Builds a directed graph over rule ids from the compiled read/write sets:
//! an edge `A -> B` exists when A writes a field B reads, or when B appears
//! in A's trigger list (trigger chains are ordering obligations even
//! without shared fields). Cycles are compile-time errors. The output is a
//! layered topological order; ties within a layer are broken by ascending
//! priority with the rule id as the final tie-breaker, which puts the
//! highest-priority rule last in its layer so its writes dominate under the
//! later-write-wins overlay policy.

use crate::error::{SymbolicaError, SymbolicaResult};
use crate::types::CompiledRule;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Dependency graph and derived ordering for one rule set
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Successor sets: `edges[a]` holds every rule that must run after `a`
    pub edges: HashMap<String, BTreeSet<String>>,
    /// Rule ids grouped by topological layer
    pub layers: Vec<Vec<String>>,
    /// Flattened execution order
    pub order: Vec<String>,
}

impl DependencyGraph {
    /// Whether an ordering edge `from -> to` exists
    #[must_use]
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges.get(from).is_some_and(|succ| succ.contains(to))
    }

    /// Number of edges in the graph
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }
}

/// Analyze rule dependencies and produce the execution order.
///
/// # Errors
///
/// Returns [`SymbolicaError::CyclicDependency`] naming one cycle when the
/// graph cannot be ordered.
pub fn analyze(rules: &[CompiledRule]) -> SymbolicaResult<DependencyGraph> {
    let mut edges: HashMap<String, BTreeSet<String>> = HashMap::new();
    for rule in rules {
        edges.entry(rule.id.clone()).or_default();
    }

    // Field data flow: writer precedes reader
    for producer in rules {
        for consumer in rules {
            if producer.id == consumer.id {
                continue;
            }
            if producer.writes.intersection(&consumer.reads).next().is_some() {
                edges.get_mut(&producer.id).unwrap().insert(consumer.id.clone());
            }
        }
    }

    // Trigger chains are ordering obligations regardless of fields
    for rule in rules {
        for target in &rule.triggers {
            if target != &rule.id {
                edges.get_mut(&rule.id).unwrap().insert(target.clone());
            }
        }
    }

    let mut in_degree: HashMap<&str, usize> = rules.iter().map(|r| (r.id.as_str(), 0)).collect();
    for successors in edges.values() {
        for successor in successors {
            if let Some(degree) = in_degree.get_mut(successor.as_str()) {
                *degree += 1;
            }
        }
    }

    let by_id: HashMap<&str, &CompiledRule> = rules.iter().map(|r| (r.id.as_str(), r)).collect();

    // Layered Kahn: peel all currently-free rules as one layer, order the
    // layer by (priority, id) ascending, then release their successors
    let mut remaining: BTreeSet<&str> = rules.iter().map(|r| r.id.as_str()).collect();
    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut order: Vec<String> = Vec::with_capacity(rules.len());

    while !remaining.is_empty() {
        let mut layer: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| in_degree[id] == 0)
            .collect();
        if layer.is_empty() {
            let cycle = find_cycle(&edges, &remaining);
            warn!(cycle = ?cycle, "Cycle detected in rule dependency graph");
            return Err(SymbolicaError::CyclicDependency { cycle });
        }

        layer.sort_by_key(|id| (by_id[id].priority, *id));

        for id in &layer {
            remaining.remove(id);
            for successor in &edges[*id] {
                if let Some(degree) = in_degree.get_mut(successor.as_str()) {
                    *degree -= 1;
                }
            }
        }
        order.extend(layer.iter().map(|id| (*id).to_string()));
        layers.push(layer.into_iter().map(str::to_string).collect());
    }

    debug!(
        rules = rules.len(),
        layers = layers.len(),
        edges = edges.values().map(BTreeSet::len).sum::<usize>(),
        "Dependency analysis complete"
    );

    Ok(DependencyGraph {
        edges,
        layers,
        order,
    })
}

/// Extract one concrete cycle from the stuck subgraph for the error report.
/// Every stuck node has an in-graph predecessor, so walking predecessors
/// must revisit a node.
fn find_cycle(edges: &HashMap<String, BTreeSet<String>>, stuck: &BTreeSet<&str>) -> Vec<String> {
    let mut predecessors: HashMap<&str, &str> = HashMap::new();
    for (from, successors) in edges {
        if !stuck.contains(from.as_str()) {
            continue;
        }
        for to in successors {
            if stuck.contains(to.as_str()) {
                predecessors.entry(to.as_str()).or_insert(from.as_str());
            }
        }
    }

    let start = *stuck.iter().next().expect("stuck set is non-empty");
    let mut path = vec![start];
    let mut seen: HashMap<&str, usize> = HashMap::from([(start, 0)]);
    let mut current = start;

    while let Some(&pred) = predecessors.get(current) {
        if let Some(&at) = seen.get(pred) {
            let mut cycle: Vec<String> = path[at..].iter().map(|s| (*s).to_string()).collect();
            cycle.reverse(); // predecessor walk found it backwards
            return cycle;
        }
        seen.insert(pred, path.len());
        path.push(pred);
        current = pred;
    }

    // Should be unreachable; report the whole stuck set rather than panic
    stuck.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::types::{RuleSet, RuleSpec};

    fn compile(specs: Vec<RuleSpec>) -> SymbolicaResult<RuleSet> {
        RuleSet::compile(specs, &FunctionRegistry::with_builtins())
    }

    #[test]
    fn test_data_flow_ordering() {
        let rule_set = compile(vec![
            RuleSpec::new("consumer", "intermediate == 1").set("output", 1i64),
            RuleSpec::new("producer", "input > 0").set("intermediate", 1i64),
        ])
        .unwrap();

        let order: Vec<&str> = rule_set.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["producer", "consumer"]);
        assert!(rule_set.graph().has_edge("producer", "consumer"));
        assert!(!rule_set.graph().has_edge("consumer", "producer"));
    }

    #[test]
    fn test_trigger_edge_without_shared_fields() {
        let rule_set = compile(vec![
            RuleSpec::new("follow_up", "unrelated == 1").set("done", true),
            RuleSpec::new("kickoff", "x > 0").set("y", 1i64).triggers(&["follow_up"]),
        ])
        .unwrap();

        assert!(rule_set.graph().has_edge("kickoff", "follow_up"));
        let order: Vec<&str> = rule_set.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["kickoff", "follow_up"]);
    }

    #[test]
    fn test_cycle_is_compile_error() {
        let err = compile(vec![
            RuleSpec::new("a", "field_c == 1").set("field_a", 1i64),
            RuleSpec::new("b", "field_a == 1").set("field_b", 1i64),
            RuleSpec::new("c", "field_b == 1").set("field_c", 1i64),
        ])
        .unwrap_err();

        match err {
            SymbolicaError::CyclicDependency { cycle } => {
                assert_eq!(cycle.len(), 3);
                for id in ["a", "b", "c"] {
                    assert!(cycle.contains(&id.to_string()), "{id} missing from {cycle:?}");
                }
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_layer_orders_ascending_priority() {
        // Same layer, no dependencies: lower priority first, so the
        // higher-priority rule's writes land last and win
        let rule_set = compile(vec![
            RuleSpec::new("strict", "x > 0").priority(100).set("limit", 50_000i64),
            RuleSpec::new("lenient", "x > 0").priority(50).set("limit", 25_000i64),
        ])
        .unwrap();

        let order: Vec<&str> = rule_set.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["lenient", "strict"]);
    }

    #[test]
    fn test_id_breaks_priority_ties() {
        let rule_set = compile(vec![
            RuleSpec::new("zeta", "x > 0").set("a", 1i64),
            RuleSpec::new("alpha", "x > 0").set("b", 1i64),
        ])
        .unwrap();

        let order: Vec<&str> = rule_set.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_declaration_order_is_irrelevant() {
        let forward = vec![
            RuleSpec::new("a", "x > 0").priority(10).set("m", 1i64),
            RuleSpec::new("b", "m == 1").priority(90).set("n", 1i64),
            RuleSpec::new("c", "x > 0").priority(50).set("k", 1i64),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let first: Vec<String> = compile(forward)
            .unwrap()
            .rules()
            .iter()
            .map(|r| r.id.clone())
            .collect();
        let second: Vec<String> = compile(reversed)
            .unwrap()
            .rules()
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_self_reference_is_not_a_cycle() {
        // A rule that reads and writes the same field orders fine
        let rule_set = compile(vec![
            RuleSpec::new("acc", "counter >= 0").set_template("counter", "counter + 1"),
        ])
        .unwrap();
        assert_eq!(rule_set.len(), 1);
    }
}
