use ccgraph::core::query::reachable;
use ccgraph::core::EntityOrigin;
use ccgraph::{build, AnalysisConfig, EdgeKind, SourceEntry, SourceTree};
use petgraph::Direction;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet, VecDeque};

const NAMES: &[&str] = &["alpha", "beta", "gamma"];

#[derive(Debug, Clone)]
struct Def {
    class: bool,
    name: &'static str,
    children: Vec<Def>,
}

fn def_strategy() -> impl Strategy<Value = Def> {
    let leaf = (any::<bool>(), prop::sample::select(NAMES)).prop_map(|(class, name)| Def {
        class,
        name,
        children: Vec::new(),
    });
    leaf.prop_recursive(4, 32, 3, |inner| {
        (
            any::<bool>(),
            prop::sample::select(NAMES),
            prop::collection::vec(inner, 1..4),
        )
            .prop_map(|(class, name, children)| Def {
                class,
                name,
                children,
            })
    })
}

/// Writes `def` as Python source and returns how many definitions it holds.
fn render(def: &Def, depth: usize, out: &mut String) -> usize {
    let indent = "    ".repeat(depth);
    if def.class {
        out.push_str(&format!("{indent}class {}:\n", def.name));
    } else {
        out.push_str(&format!("{indent}def {}():\n", def.name));
    }
    if def.children.is_empty() {
        out.push_str(&format!("{indent}    pass\n"));
        return 1;
    }
    1 + def
        .children
        .iter()
        .map(|child| render(child, depth + 1, out))
        .sum::<usize>()
}

fn single_file(path: &str, code: String) -> SourceTree {
    SourceTree::from_entries(vec![SourceEntry::new(path, code)])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_definition_becomes_one_uniquely_named_entity(
        defs in prop::collection::vec(def_strategy(), 1..4)
    ) {
        let mut code = String::new();
        let definitions: usize = defs.iter().map(|def| render(def, 0, &mut code)).sum();

        let config = AnalysisConfig::default().with_concurrency(1);
        let (graph, _) = build(&single_file("nested.py", code), &config).unwrap();

        let source: Vec<_> = graph
            .entities()
            .filter(|(_, e)| e.origin == EntityOrigin::Source)
            .collect();
        prop_assert_eq!(source.len(), definitions + 1);

        let names: HashSet<&str> = graph
            .entities()
            .map(|(_, e)| e.qualified_name.as_str())
            .collect();
        prop_assert_eq!(names.len(), graph.entity_count());
        prop_assert!(graph.containment_is_forest());
    }

    #[test]
    fn call_edges_are_deduplicated_and_traversal_terminates(
        calls in prop::collection::vec(prop::collection::vec(0usize..6, 0..6), 6)
    ) {
        let mut code = String::new();
        for (i, callees) in calls.iter().enumerate() {
            code.push_str(&format!("def f{i}():\n"));
            for j in callees {
                code.push_str(&format!("    f{j}()\n"));
            }
            code.push_str("    return None\n\n");
        }

        let config = AnalysisConfig::default().with_concurrency(1);
        let (graph, diagnostics) = build(&single_file("calls.py", code), &config).unwrap();
        prop_assert!(diagnostics.is_empty());

        let distinct: BTreeSet<(usize, usize)> = calls
            .iter()
            .enumerate()
            .flat_map(|(i, callees)| callees.iter().map(move |&j| (i, j)))
            .collect();
        let call_edges = graph
            .edges()
            .filter(|(_, _, edge)| edge.kind == EdgeKind::Calls)
            .count();
        prop_assert_eq!(call_edges, distinct.len());

        for start in 0..calls.len() {
            let mut expected = BTreeSet::from([start]);
            let mut queue = VecDeque::from([start]);
            while let Some(i) = queue.pop_front() {
                for &j in &calls[i] {
                    if expected.insert(j) {
                        queue.push_back(j);
                    }
                }
            }

            let node = graph.find(&format!("calls.py::f{start}")).unwrap();
            let visited: BTreeSet<String> = reachable(&graph, node, EdgeKind::Calls, Direction::Outgoing)
                .into_iter()
                .map(|n| graph.entity(n).name.clone())
                .collect();
            let expected: BTreeSet<String> = expected.into_iter().map(|i| format!("f{i}")).collect();
            prop_assert_eq!(visited, expected);
        }
    }
}
