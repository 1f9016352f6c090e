// Test selection: combines the change set with the usage graph.
//
// Pure and deterministic: no I/O, no clock, output ordered by test name.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::store::UsageGraphStore;
use crate::types::{ChangeSet, SelectionReason, SelectionResult};

/// Nested classes are reported as `Outer$Inner`; they belong to `Outer`'s source file.
const NESTED_CLASS_SEPARATOR: char = '$';

/// Choose the tests to run for `changes`.
///
/// Rules, in order of precedence when several apply to one test:
/// 1. a changed test is always selected (changed support classes in the test
///    roots only count as changed classes for rule 2);
/// 2. a test whose recorded edges contain a changed class is selected;
/// 3. a test that failed last time is selected again;
/// 4. a known test without a graph entry is selected conservatively.
///
/// When the graph holds no entries at all, every known test is selected and
/// the result is not `per_test`.
pub fn select(
    changes: &ChangeSet,
    graph: &UsageGraphStore,
    known_tests: &BTreeSet<String>,
) -> SelectionResult {
    let mut reasons: BTreeMap<String, SelectionReason> = BTreeMap::new();
    choose_changed_tests(&mut reasons, changes, known_tests);

    if graph.is_empty() {
        for test in known_tests {
            choose(&mut reasons, test, SelectionReason::Fallback);
        }
        debug!(
            selected = reasons.len(),
            "Usage graph empty, selecting every known test"
        );
        return SelectionResult::from_reasons(reasons, false);
    }

    let changed_classes: BTreeSet<&str> = changes
        .production
        .iter()
        .chain(&changes.tests)
        .map(String::as_str)
        .collect();
    if !changed_classes.is_empty() {
        for (test, classes) in graph.tests() {
            if classes
                .iter()
                .any(|class| changed_classes.contains(owning_class(class)))
            {
                choose(&mut reasons, test, SelectionReason::Dependency);
            }
        }
    }

    for test in graph.failing() {
        choose(&mut reasons, test, SelectionReason::PreviouslyFailed);
    }

    for test in known_tests {
        if !graph.contains_test(test) {
            choose(&mut reasons, test, SelectionReason::Unmapped);
        }
    }

    let result = SelectionResult::from_reasons(reasons, true);
    debug!(
        selected = result.len(),
        conservative = result.conservative_count(),
        changed_classes = changed_classes.len(),
        "Selection complete"
    );
    result
}

/// Select every known test regardless of history, for forced runs.
pub fn select_all(changes: &ChangeSet, known_tests: &BTreeSet<String>) -> SelectionResult {
    let mut reasons = BTreeMap::new();
    choose_changed_tests(&mut reasons, changes, known_tests);
    for test in known_tests {
        choose(&mut reasons, test, SelectionReason::Fallback);
    }
    SelectionResult::from_reasons(reasons, false)
}

fn choose_changed_tests(
    reasons: &mut BTreeMap<String, SelectionReason>,
    changes: &ChangeSet,
    known_tests: &BTreeSet<String>,
) {
    for test in changes.tests.intersection(known_tests) {
        choose(reasons, test, SelectionReason::Changed);
    }
}

/// Keep the strongest reason seen for `test`.
fn choose(reasons: &mut BTreeMap<String, SelectionReason>, test: &str, reason: SelectionReason) {
    reasons
        .entry(test.to_string())
        .and_modify(|current| *current = (*current).min(reason))
        .or_insert(reason);
}

fn owning_class(class: &str) -> &str {
    class
        .split_once(NESTED_CLASS_SEPARATOR)
        .map_or(class, |(outer, _)| outer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoverageReport, TestCoverage, TestOutcome};
    use proptest::prelude::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn graph(edges: &[(&str, &[&str])]) -> UsageGraphStore {
        let mut graph = UsageGraphStore::new();
        for (test, classes) in edges {
            graph.replace_edges(*test, classes.iter().map(|c| (*c).to_string()));
        }
        graph
    }

    fn names(result: &SelectionResult) -> Vec<&str> {
        result.names().collect()
    }

    #[test]
    fn changed_production_class_selects_its_tests_only() {
        let graph = graph(&[
            ("com.app.FooTest", &["com.app.Foo"]),
            ("com.app.BarTest", &["com.app.Bar"]),
        ]);
        let changes = ChangeSet::new(vec!["com.app.Foo".to_string()], Vec::new());
        let known = set(&["com.app.FooTest", "com.app.BarTest"]);

        let result = select(&changes, &graph, &known);
        assert_eq!(names(&result), vec!["com.app.FooTest"]);
        assert!(result.per_test);
        assert_eq!(
            result.reason_for("com.app.FooTest"),
            Some(SelectionReason::Dependency)
        );
    }

    #[test]
    fn empty_graph_selects_all_known_tests() {
        let changes = ChangeSet::default();
        let result = select(&changes, &UsageGraphStore::new(), &set(&["T1", "T2"]));
        assert_eq!(names(&result), vec!["T1", "T2"]);
        assert!(!result.per_test);
        assert_eq!(result.conservative_count(), 2);
    }

    #[test]
    fn changed_tests_are_always_selected() {
        let graph = graph(&[("t.ATest", &["p.A"]), ("t.BTest", &["p.B"])]);
        let changes = ChangeSet::new(Vec::new(), vec!["t.BTest".to_string()]);
        let result = select(&changes, &graph, &set(&["t.ATest", "t.BTest"]));
        assert_eq!(names(&result), vec!["t.BTest"]);
        assert_eq!(result.reason_for("t.BTest"), Some(SelectionReason::Changed));
    }

    #[test]
    fn unmapped_test_is_selected_conservatively() {
        let graph = graph(&[("t.ATest", &["p.A"])]);
        let changes = ChangeSet::new(vec!["p.Unrelated".to_string()], Vec::new());
        let result = select(&changes, &graph, &set(&["t.ATest", "t.NewTest"]));
        assert_eq!(names(&result), vec!["t.NewTest"]);
        assert_eq!(result.reason_for("t.NewTest"), Some(SelectionReason::Unmapped));
        assert!(result.per_test);
    }

    #[test]
    fn nothing_changed_selects_nothing() {
        let graph = graph(&[("t.ATest", &["p.A"])]);
        let result = select(&ChangeSet::default(), &graph, &set(&["t.ATest"]));
        assert!(result.is_empty());
        assert!(result.per_test);
    }

    #[test]
    fn nested_class_edges_match_outer_source() {
        let graph = graph(&[
            ("t.ATest", &["p.Outer$Inner"]),
            ("t.BTest", &["p.OuterHelper"]),
        ]);
        let changes = ChangeSet::new(vec!["p.Outer".to_string()], Vec::new());
        let result = select(&changes, &graph, &set(&["t.ATest", "t.BTest"]));
        assert_eq!(names(&result), vec!["t.ATest"]);
    }

    #[test]
    fn changed_test_helper_selects_tests_that_used_it() {
        let graph = graph(&[("t.ATest", &["p.A", "t.Fixtures"]), ("t.BTest", &["p.B"])]);
        let changes = ChangeSet::new(Vec::new(), vec!["t.Fixtures".to_string()]);
        let result = select(&changes, &graph, &set(&["t.ATest", "t.BTest"]));
        assert_eq!(names(&result), vec!["t.ATest"]);
        assert_eq!(result.reason_for("t.ATest"), Some(SelectionReason::Dependency));
    }

    #[test]
    fn changed_helper_is_never_selected_itself() {
        let changes = ChangeSet::new(Vec::new(), vec!["t.Fixtures".to_string()]);
        let known = set(&["t.ATest"]);

        let result = select(&changes, &graph(&[("t.ATest", &["p.A"])]), &known);
        assert!(result.is_empty());

        let forced = select_all(&changes, &known);
        assert_eq!(names(&forced), vec!["t.ATest"]);
    }

    #[test]
    fn previously_failed_tests_rerun() {
        let mut graph = graph(&[("t.ATest", &["p.A"]), ("t.BTest", &["p.B"])]);
        graph.apply_report(&CoverageReport {
            tests: vec![TestCoverage {
                test: "t.BTest".into(),
                classes: set(&["p.B"]),
                outcome: TestOutcome::Failed,
            }],
        });
        let result = select(&ChangeSet::default(), &graph, &set(&["t.ATest", "t.BTest"]));
        assert_eq!(names(&result), vec!["t.BTest"]);
        assert_eq!(
            result.reason_for("t.BTest"),
            Some(SelectionReason::PreviouslyFailed)
        );
    }

    #[test]
    fn strongest_reason_wins() {
        let graph = graph(&[("t.ATest", &["p.A"])]);
        let changes = ChangeSet::new(vec!["p.A".to_string()], vec!["t.ATest".to_string()]);
        let result = select(&changes, &graph, &set(&["t.ATest"]));
        assert_eq!(result.reason_for("t.ATest"), Some(SelectionReason::Changed));
    }

    #[test]
    fn select_all_ignores_graph() {
        let changes = ChangeSet::new(Vec::new(), vec!["t.BTest".to_string()]);
        let result = select_all(&changes, &set(&["t.ATest", "t.BTest"]));
        assert_eq!(names(&result), vec!["t.ATest", "t.BTest"]);
        assert!(!result.per_test);
        assert_eq!(result.reason_for("t.BTest"), Some(SelectionReason::Changed));
    }

    fn arb_class() -> impl Strategy<Value = String> {
        "p\\.[A-E]".prop_map(String::from)
    }

    fn arb_test() -> impl Strategy<Value = String> {
        "t\\.[A-H]Test".prop_map(String::from)
    }

    fn arb_graph() -> impl Strategy<Value = Vec<(String, BTreeSet<String>)>> {
        proptest::collection::vec(
            (arb_test(), proptest::collection::btree_set(arb_class(), 0..4)),
            0..8,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// No false negatives: every test with an edge to a changed class is selected.
        #[test]
        fn selection_is_sound(
            edges in arb_graph(),
            changed in proptest::collection::btree_set(arb_class(), 0..4),
            known in proptest::collection::btree_set(arb_test(), 0..8),
        ) {
            let mut graph = UsageGraphStore::new();
            for (test, classes) in &edges {
                graph.replace_edges(test.clone(), classes.iter().cloned());
            }
            let changes = ChangeSet::new(changed.iter().cloned(), Vec::new());
            let result = select(&changes, &graph, &known);

            for (test, classes) in graph.tests() {
                if classes.iter().any(|c| changed.contains(c)) {
                    prop_assert!(result.contains(test), "missed {}", test);
                }
            }
            for test in &known {
                if !graph.contains_test(test) {
                    prop_assert!(result.contains(test), "unmapped {} not selected", test);
                }
            }
        }

        /// Identical inputs give identical, name-ordered output.
        #[test]
        fn selection_is_deterministic(
            edges in arb_graph(),
            changed in proptest::collection::btree_set(arb_class(), 0..4),
            known in proptest::collection::btree_set(arb_test(), 0..8),
        ) {
            let mut forward = UsageGraphStore::new();
            for (test, classes) in &edges {
                forward.replace_edges(test.clone(), classes.iter().cloned());
            }
            let changes = ChangeSet::new(changed.iter().cloned(), Vec::new());
            let first = select(&changes, &forward, &known);
            let second = select(&changes, &forward, &known);
            prop_assert_eq!(&first, &second);

            let names: Vec<&str> = first.names().collect();
            let mut sorted = names.clone();
            sorted.sort_unstable();
            prop_assert_eq!(names, sorted);
        }
    }
}
