// 🌊 Transition Aggregator - timelines → weighted flow graph
//
// Nodes are (period, category) pairs. Every pair exists, even when nothing
// flows through it, so the renderer always has a full grid of anchors.
// Edges connect adjacent periods only and carry the number of entities that
// made exactly that move.
//
// Node order (edge indices point into it):
//   closed categories, period-major: 2022 Q1, 2022 Q2, ..., 2024 Q4
//   then one sentinel node per period: 2022 U, 2023 U, 2024 U

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::category::{Category, CategorySet};
use crate::error::FlowResult;
use crate::period::{Period, PeriodSequence};
use crate::timeline::{PeriodRecords, ResolveReport, TimelineResolver, TimelineSet};

// ============================================================================
// SOURCE RULE
// ============================================================================

/// What to do when an entity has no record at the earlier period of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRule {
    /// No outgoing edge from a period the entity is absent in
    #[default]
    RequirePresence,

    /// Route the absent source through the sentinel node, as long as the
    /// entity has a record at the later period of the pair
    SentinelForAbsent,
}

// ============================================================================
// GRAPH TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub index: usize,
    pub period: Period,
    pub category: Category,

    /// Display label, e.g. "2022 Q1"
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub weight: u64,
}

/// Counts for one adjacent period pair, rows = from, columns = to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionMatrix {
    pub from: Period,
    pub to: Period,

    /// Categories per side, sentinel included
    pub size: usize,

    /// Row-major, indexed by category slot
    pub counts: Vec<u64>,
}

impl TransitionMatrix {
    fn new(from: Period, to: Period, size: usize) -> Self {
        TransitionMatrix {
            from,
            to,
            size,
            counts: vec![0; size * size],
        }
    }

    pub fn get(&self, from_slot: usize, to_slot: usize) -> u64 {
        if from_slot >= self.size || to_slot >= self.size {
            return 0;
        }
        self.counts[from_slot * self.size + to_slot]
    }

    pub fn row_total(&self, from_slot: usize) -> u64 {
        (0..self.size).map(|to| self.get(from_slot, to)).sum()
    }

    pub fn column_total(&self, to_slot: usize) -> u64 {
        (0..self.size).map(|from| self.get(from, to_slot)).sum()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Entities that kept the same category
    pub fn retained(&self) -> u64 {
        (0..self.size).map(|i| self.get(i, i)).sum()
    }
}

/// Inflow and outflow of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeThroughput {
    pub index: usize,
    pub inflow: u64,
    pub outflow: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowGraph {
    #[serde(skip)]
    periods: PeriodSequence,

    #[serde(skip)]
    categories: CategorySet,

    nodes: Vec<Node>,

    /// Sorted by descending weight, then (source, target)
    edges: Vec<Edge>,

    #[serde(skip)]
    matrices: Vec<TransitionMatrix>,
}

impl FlowGraph {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn periods(&self) -> &PeriodSequence {
        &self.periods
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    /// Index of the node for (period, category)
    pub fn node_index(&self, period: Period, category: Category) -> Option<usize> {
        let position = self.periods.position(period)?;
        Some(node_index(&self.periods, &self.categories, position, category))
    }

    /// Weight of the edge between two nodes, 0 if absent
    pub fn weight(&self, source: usize, target: usize) -> u64 {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target)
            .map(|e| e.weight)
            .unwrap_or(0)
    }

    /// Total weight leaving nodes of one period
    pub fn outflow(&self, period: Period) -> u64 {
        self.edges
            .iter()
            .filter(|e| self.nodes[e.source].period == period)
            .map(|e| e.weight)
            .sum()
    }

    /// Total weight arriving at nodes of one period
    pub fn inflow(&self, period: Period) -> u64 {
        self.edges
            .iter()
            .filter(|e| self.nodes[e.target].period == period)
            .map(|e| e.weight)
            .sum()
    }

    pub fn node_throughput(&self) -> Vec<NodeThroughput> {
        let mut throughput: Vec<NodeThroughput> = self
            .nodes
            .iter()
            .map(|n| NodeThroughput {
                index: n.index,
                inflow: 0,
                outflow: 0,
            })
            .collect();

        for edge in &self.edges {
            throughput[edge.source].outflow += edge.weight;
            throughput[edge.target].inflow += edge.weight;
        }

        throughput
    }

    pub fn total_weight(&self) -> u64 {
        self.edges.iter().map(|e| e.weight).sum()
    }

    /// One matrix per adjacent period pair, in sequence order
    pub fn matrices(&self) -> &[TransitionMatrix] {
        &self.matrices
    }

    pub fn transition_matrix(&self, pair_index: usize) -> Option<&TransitionMatrix> {
        self.matrices.get(pair_index)
    }

    /// SHA-256 over the node labels and the edges in (source, target) order.
    /// Two runs over the same input produce the same digest.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        for node in &self.nodes {
            hasher.update(format!("{}:{}\n", node.index, node.label));
        }

        let mut edges = self.edges.clone();
        edges.sort_by_key(|e| (e.source, e.target));
        for edge in &edges {
            hasher.update(format!("{}>{}={}\n", edge.source, edge.target, edge.weight));
        }

        format!("{:x}", hasher.finalize())
    }
}

fn node_index(
    periods: &PeriodSequence,
    categories: &CategorySet,
    position: usize,
    category: Category,
) -> usize {
    let closed = categories.closed_len();
    match category {
        Category::Ranked(i) if i < closed => position * closed + i,
        _ => periods.len() * closed + position,
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct TransitionAggregator<'a> {
    categories: &'a CategorySet,
    rule: SourceRule,
}

impl<'a> TransitionAggregator<'a> {
    pub fn new(categories: &'a CategorySet) -> Self {
        TransitionAggregator {
            categories,
            rule: SourceRule::default(),
        }
    }

    pub fn with_rule(mut self, rule: SourceRule) -> Self {
        self.rule = rule;
        self
    }

    /// Build the full node grid and the aggregated edge list
    pub fn aggregate(&self, timelines: &TimelineSet) -> FlowGraph {
        let periods = timelines.periods();
        let size = self.categories.len();

        let nodes = self.build_nodes(periods);

        let mut matrices: Vec<TransitionMatrix> = periods
            .as_slice()
            .windows(2)
            .map(|pair| TransitionMatrix::new(pair[0], pair[1], size))
            .collect();

        for (_, timeline) in timelines.iter() {
            for (pair, (a, b)) in periods.adjacent_pairs().enumerate() {
                let source = match (timeline.get(a), self.rule) {
                    (Some(category), _) => category,
                    (None, SourceRule::RequirePresence) => continue,
                    (None, SourceRule::SentinelForAbsent) => {
                        if !timeline.is_present(b) {
                            continue;
                        }
                        Category::Uncategorized
                    }
                };
                let target = timeline.get(b).unwrap_or(Category::Uncategorized);

                let cell = self.categories.slot(source) * size + self.categories.slot(target);
                matrices[pair].counts[cell] += 1;
            }
        }

        let mut edges = Vec::new();
        for (pair, (a, b)) in periods.adjacent_pairs().enumerate() {
            let matrix = &matrices[pair];
            for from in self.categories.all() {
                for to in self.categories.all() {
                    let weight = matrix.get(self.categories.slot(from), self.categories.slot(to));
                    if weight == 0 {
                        continue;
                    }
                    edges.push(Edge {
                        source: node_index(periods, self.categories, a, from),
                        target: node_index(periods, self.categories, b, to),
                        weight,
                    });
                }
            }
        }

        edges.sort_by(|x, y| {
            y.weight
                .cmp(&x.weight)
                .then(x.source.cmp(&y.source))
                .then(x.target.cmp(&y.target))
        });

        debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            rule = ?self.rule,
            "aggregated transitions"
        );

        FlowGraph {
            periods: periods.clone(),
            categories: self.categories.clone(),
            nodes,
            edges,
            matrices,
        }
    }

    fn build_nodes(&self, periods: &PeriodSequence) -> Vec<Node> {
        let mut nodes = Vec::with_capacity(periods.len() * self.categories.len());

        for period in periods.iter() {
            for i in 0..self.categories.closed_len() {
                nodes.push(self.node(nodes.len(), period, Category::Ranked(i)));
            }
        }
        for period in periods.iter() {
            nodes.push(self.node(nodes.len(), period, Category::Uncategorized));
        }

        nodes
    }

    fn node(&self, index: usize, period: Period, category: Category) -> Node {
        Node {
            index,
            period,
            category,
            label: format!("{} {}", period, self.categories.label(category)),
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Everything one run of the engine produces
#[derive(Debug, Clone)]
pub struct FlowRun {
    pub graph: FlowGraph,
    pub timelines: TimelineSet,
    pub report: ResolveReport,
}

/// Resolve timelines and aggregate them in one go
pub fn build_flow(
    periods: &PeriodSequence,
    categories: &CategorySet,
    rule: SourceRule,
    batches: &[PeriodRecords],
) -> FlowResult<FlowRun> {
    let (timelines, report) = TimelineResolver::new(periods, categories).resolve(batches)?;
    let graph = TransitionAggregator::new(categories)
        .with_rule(rule)
        .aggregate(&timelines);

    Ok(FlowRun {
        graph,
        timelines,
        report,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const Q1: Category = Category::Ranked(0);
    const Q2: Category = Category::Ranked(1);
    const Q3: Category = Category::Ranked(2);
    const Q4: Category = Category::Ranked(3);
    const NONE: Category = Category::Uncategorized;

    fn years() -> PeriodSequence {
        PeriodSequence::new(vec![Period(2022), Period(2023), Period(2024)]).unwrap()
    }

    fn quartiles() -> CategorySet {
        CategorySet::quartiles("Uncategorized").unwrap()
    }

    fn run(batches: &[PeriodRecords]) -> FlowGraph {
        build_flow(&years(), &quartiles(), SourceRule::RequirePresence, batches)
            .unwrap()
            .graph
    }

    fn weight(graph: &FlowGraph, from: (i32, Category), to: (i32, Category)) -> u64 {
        let source = graph.node_index(Period(from.0), from.1).unwrap();
        let target = graph.node_index(Period(to.0), to.1).unwrap();
        graph.weight(source, target)
    }

    #[test]
    fn test_node_layout() {
        let graph = run(&[]);
        let labels: Vec<&str> = graph.nodes().iter().map(|n| n.label.as_str()).collect();

        assert_eq!(labels.len(), 15);
        assert_eq!(labels[0], "2022 Q1");
        assert_eq!(labels[3], "2022 Q4");
        assert_eq!(labels[4], "2023 Q1");
        assert_eq!(labels[11], "2024 Q4");
        assert_eq!(labels[12], "2022 Uncategorized");
        assert_eq!(labels[14], "2024 Uncategorized");

        for (i, node) in graph.nodes().iter().enumerate() {
            assert_eq!(node.index, i);
            assert_eq!(graph.node_index(node.period, node.category), Some(i));
        }
    }

    #[test]
    fn test_scenario_stable_and_gap() {
        // A: Q1, Q1, Q1   B: Q2, absent, Q3
        let graph = run(&[
            PeriodRecords::from_pairs(Period(2022), [("A", "Q1"), ("B", "Q2")]),
            PeriodRecords::from_pairs(Period(2023), [("A", "Q1")]),
            PeriodRecords::from_pairs(Period(2024), [("A", "Q1"), ("B", "Q3")]),
        ]);

        assert_eq!(weight(&graph, (2022, Q1), (2023, Q1)), 1);
        assert_eq!(weight(&graph, (2023, Q1), (2024, Q1)), 1);
        assert_eq!(weight(&graph, (2022, Q2), (2023, NONE)), 1);

        // Nothing leaves 2023 for B
        assert_eq!(weight(&graph, (2023, NONE), (2024, Q3)), 0);
        assert_eq!(graph.edges().len(), 3);
        assert_eq!(graph.outflow(Period(2023)), 1);
    }

    #[test]
    fn test_scenario_last_period_only() {
        let graph = run(&[PeriodRecords::from_pairs(Period(2024), [("C", "Q4")])]);

        assert!(graph.edges().is_empty());
        assert_eq!(graph.nodes().len(), 15);
    }

    #[test]
    fn test_scenario_dirty_categories() {
        let graph = run(&[
            PeriodRecords::from_pairs(Period(2022), [("D", "q1 "), ("E", "N/A")]),
            PeriodRecords::from_pairs(Period(2023), [("D", "Q1"), ("E", "Q4")]),
        ]);

        assert_eq!(weight(&graph, (2022, Q1), (2023, Q1)), 1);
        // A present-but-sentinel source still emits from the sentinel node
        assert_eq!(weight(&graph, (2022, NONE), (2023, Q4)), 1);
    }

    #[test]
    fn test_scenario_aggregated_weight() {
        let graph = run(&[
            PeriodRecords::from_pairs(Period(2022), [("X", "Q2"), ("Y", "Q2")]),
            PeriodRecords::from_pairs(Period(2023), [("X", "Q3"), ("Y", "Q3")]),
        ]);

        assert_eq!(weight(&graph, (2022, Q2), (2023, Q3)), 2);
        assert_eq!(graph.transition_matrix(0).unwrap().total(), 2);

        // Both drop out in 2024
        assert_eq!(weight(&graph, (2023, Q3), (2024, NONE)), 2);
        assert_eq!(graph.edges().len(), 2);
    }

    #[test]
    fn test_duplicate_record_counted_once() {
        let graph = run(&[
            PeriodRecords::from_pairs(Period(2022), [("X", "Q2"), ("X", "Q2"), ("X", "Q1")]),
            PeriodRecords::from_pairs(Period(2023), [("X", "Q3"), ("X", "Q3")]),
        ]);

        assert_eq!(weight(&graph, (2022, Q2), (2023, Q3)), 1);
        assert_eq!(weight(&graph, (2022, Q1), (2023, Q3)), 0);
        assert_eq!(graph.outflow(Period(2022)), 1);
        assert_eq!(graph.total_weight(), 2);
    }

    #[test]
    fn test_edges_sorted_by_weight() {
        let graph = run(&[
            PeriodRecords::from_pairs(
                Period(2022),
                [("A", "Q1"), ("B", "Q1"), ("C", "Q1"), ("D", "Q4")],
            ),
            PeriodRecords::from_pairs(
                Period(2023),
                [("A", "Q1"), ("B", "Q1"), ("C", "Q2"), ("D", "Q4")],
            ),
        ]);

        // 2023 -> 2024 edges all end in the sentinel
        let weights: Vec<u64> = graph.edges().iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![2, 2, 1, 1, 1, 1]);

        // Equal weights fall back to node order
        for pair in graph.edges().windows(2) {
            if pair[0].weight == pair[1].weight {
                assert!((pair[0].source, pair[0].target) < (pair[1].source, pair[1].target));
            }
        }
        assert_eq!(weight(&graph, (2022, Q1), (2023, Q1)), 2);
        assert_eq!(weight(&graph, (2023, Q1), (2024, NONE)), 2);
    }

    #[test]
    fn test_sentinel_for_absent_rule() {
        let batches = [
            PeriodRecords::from_pairs(Period(2022), [("B", "Q2")]),
            PeriodRecords::from_pairs(Period(2024), [("B", "Q3"), ("C", "Q4")]),
        ];
        let graph = build_flow(&years(), &quartiles(), SourceRule::SentinelForAbsent, &batches)
            .unwrap()
            .graph;

        assert_eq!(weight(&graph, (2022, Q2), (2023, NONE)), 1);
        assert_eq!(weight(&graph, (2023, NONE), (2024, Q3)), 1);
        assert_eq!(weight(&graph, (2023, NONE), (2024, Q4)), 1);
        // C is absent at both ends of 2022→2023
        assert_eq!(weight(&graph, (2022, NONE), (2023, NONE)), 0);
    }

    #[test]
    fn test_transition_matrix() {
        let graph = run(&[
            PeriodRecords::from_pairs(Period(2022), [("A", "Q1"), ("B", "Q2"), ("C", "Q2")]),
            PeriodRecords::from_pairs(Period(2023), [("A", "Q1"), ("B", "Q1")]),
        ]);

        let matrix = graph.transition_matrix(0).unwrap();
        assert_eq!(matrix.from, Period(2022));
        assert_eq!(matrix.to, Period(2023));
        assert_eq!(matrix.get(0, 0), 1);
        assert_eq!(matrix.get(1, 0), 1);
        assert_eq!(matrix.get(1, 4), 1);
        assert_eq!(matrix.row_total(1), 2);
        assert_eq!(matrix.column_total(0), 2);
        assert_eq!(matrix.retained(), 1);
        assert_eq!(matrix.total(), 3);

        assert_eq!(graph.transition_matrix(1).unwrap().total(), 2);
        assert!(graph.transition_matrix(2).is_none());
    }

    #[test]
    fn test_node_throughput() {
        let graph = run(&[
            PeriodRecords::from_pairs(Period(2022), [("A", "Q1")]),
            PeriodRecords::from_pairs(Period(2023), [("A", "Q2")]),
            PeriodRecords::from_pairs(Period(2024), [("A", "Q2")]),
        ]);

        let throughput = graph.node_throughput();
        let q2_2023 = graph.node_index(Period(2023), Q2).unwrap();
        assert_eq!(throughput[q2_2023].inflow, 1);
        assert_eq!(throughput[q2_2023].outflow, 1);
        assert_eq!(graph.total_weight(), 2);
        assert_eq!(graph.inflow(Period(2024)), 1);
    }

    #[test]
    fn test_zero_periods() {
        let periods = PeriodSequence::new(vec![]).unwrap();
        let run = build_flow(&periods, &quartiles(), SourceRule::default(), &[]).unwrap();

        assert!(run.graph.nodes().is_empty());
        assert!(run.graph.edges().is_empty());
        assert!(run.graph.matrices().is_empty());
    }

    #[test]
    fn test_fingerprint_stable() {
        let batches = [
            PeriodRecords::from_pairs(Period(2022), [("A", "Q1"), ("B", "Q3")]),
            PeriodRecords::from_pairs(Period(2023), [("B", "Q2"), ("A", "Q1")]),
        ];
        let first = run(&batches);
        let second = run(&batches);
        assert_eq!(first.fingerprint(), second.fingerprint());

        let other = run(&batches[..1]);
        assert_ne!(first.fingerprint(), other.fingerprint());
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    const RAW: [&str; 7] = ["Q1", "q2", " Q3", "Q4 ", "N/A", "", "-"];

    fn batches_strategy() -> impl Strategy<Value = Vec<PeriodRecords>> {
        // Each entity: per year an optional raw value, plus an optional repeat
        // of the same id with another raw value
        let slot = (prop::option::of(0..RAW.len()), prop::option::of(0..RAW.len()));
        prop::collection::vec(prop::collection::vec(slot, 3), 0..40).prop_map(|entities| {
            let mut batches = vec![
                PeriodRecords::new(Period(2022)),
                PeriodRecords::new(Period(2023)),
                PeriodRecords::new(Period(2024)),
            ];
            for (id, slots) in entities.iter().enumerate() {
                for (year, (first, repeat)) in slots.iter().enumerate() {
                    if let Some(raw) = first {
                        batches[year].push(format!("J{}", id), RAW[*raw]);
                        if let Some(again) = repeat {
                            batches[year].push(format!("J{}", id), RAW[*again]);
                        }
                    }
                }
            }
            batches
        })
    }

    proptest! {
        #[test]
        fn prop_weight_conservation(batches in batches_strategy()) {
            let run = build_flow(&years(), &quartiles(), SourceRule::RequirePresence, &batches).unwrap();

            for (a, _) in run.timelines.periods().adjacent_pairs() {
                let period = run.timelines.periods().get(a).unwrap();
                prop_assert_eq!(
                    run.graph.outflow(period),
                    run.timelines.present_at(a) as u64
                );
            }
        }

        #[test]
        fn prop_no_zero_weight_edges(batches in batches_strategy()) {
            let graph = run(&batches);
            prop_assert!(graph.edges().iter().all(|e| e.weight >= 1));
        }

        #[test]
        fn prop_node_set_complete(batches in batches_strategy()) {
            let graph = run(&batches);
            prop_assert_eq!(graph.nodes().len(), 3 * 5);
        }

        #[test]
        fn prop_deterministic(batches in batches_strategy()) {
            let first = run(&batches);
            let second = run(&batches);
            prop_assert_eq!(first.edges(), second.edges());
            prop_assert_eq!(first.fingerprint(), second.fingerprint());
        }

        #[test]
        fn prop_edge_weight_matches_entity_count(batches in batches_strategy()) {
            let run = build_flow(&years(), &quartiles(), SourceRule::RequirePresence, &batches).unwrap();
            let graph = &run.graph;

            for edge in graph.edges() {
                let from = &graph.nodes()[edge.source];
                let to = &graph.nodes()[edge.target];
                let expected = run
                    .timelines
                    .iter()
                    .filter(|(id, _)| {
                        run.timelines.category_at(id, from.period) == Some(from.category)
                            && run
                                .timelines
                                .category_at(id, to.period)
                                .unwrap_or(Category::Uncategorized)
                                == to.category
                    })
                    .count() as u64;
                prop_assert_eq!(edge.weight, expected);
            }
        }
    }

    #[test]
    fn test_unused_categories_have_nodes() {
        let graph = run(&[PeriodRecords::from_pairs(Period(2022), [("A", "Q3")])]);

        for period in [2022, 2023, 2024] {
            for category in [Q1, Q2, Q3, Q4, NONE] {
                assert!(graph.node_index(Period(period), category).is_some());
            }
        }
    }
}
