use hurdle_lang::{parse_program, StmtKind};
use proptest::prelude::*;

const TEMPLATE: &str = r#"
from collections import deque

def bfs(graph, start):
    visited = set()
    queue = deque([start])
    order = []
    while queue:
        node = queue.popleft()
        if node in visited:
            continue
        visited.add(node)
        order.append(node)
        for nxt in graph.get(node, []):
            if nxt not in visited:
                queue.append(nxt)
    return order

graph = {'A': ['B', 'C'], 'B': ['D'], 'C': [], 'D': []}
print(f"BFS order: {bfs(graph, 'A')}")
"#;

#[test]
fn parses_a_realistic_program() {
    let program = parse_program(TEMPLATE).expect("template should parse");
    let kinds: Vec<&str> = program
        .body
        .iter()
        .map(|stmt| match &stmt.kind {
            StmtKind::ImportFrom { .. } => "from",
            StmtKind::FunctionDef(_) => "def",
            StmtKind::Assign { .. } => "assign",
            StmtKind::Expr(_) => "expr",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["from", "def", "assign", "expr"]);
    assert_eq!(program.first_line(), Some(2));
}

fn source_fragment() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop::sample::select(vec![
            "x", "=", "1", "2.5", "'s'", "f'{x}'", "(", ")", "[", "]", "{", "}", ":", ",",
            "+", "-", "*", "**", "//", "not", "and", "if", "else", "for", "in", "def",
            "return", "lambda", "while", "\n", "    ", "\t", "#", "\\", "\"", ".", ";",
        ]),
        0..64,
    )
    .prop_map(|parts| parts.concat())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 512,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0),
        max_shrink_iters: 0,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn parser_never_panics_on_token_soup(source in source_fragment()) {
        let result = std::panic::catch_unwind(|| parse_program(&source));
        prop_assert!(result.is_ok(), "parse_program panicked on {source:?}");
    }

    #[test]
    fn parser_never_panics_on_arbitrary_text(source in "\\PC{0,200}") {
        let result = std::panic::catch_unwind(|| parse_program(&source));
        prop_assert!(result.is_ok(), "parse_program panicked on {source:?}");
    }
}
