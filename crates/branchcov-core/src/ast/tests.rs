use super::*;
use crate::{parser::RubyParser, rewriter};
use crate::CoverConfig;

const UNIT: UnitId = UnitId(7);

fn build(source: &str) -> (SyntaxTree, usize) {
    let raw = RubyParser::new().unwrap().parse_str(source).unwrap();
    let mut allocator = TrackerAllocator::new();
    let tree = SyntaxTree::build(&raw, source, UNIT, &CoverConfig::default(), &mut allocator)
        .unwrap();
    (tree, allocator.count())
}

fn find(tree: &SyntaxTree, source: &str, kind: NodeKind, text: &str) -> NodeId {
    tree.nodes()
        .find(|node| node.kind() == kind && &source[node.range()] == text)
        .map(|node| node.id())
        .unwrap_or_else(|| panic!("no {kind:?} node for {text:?}"))
}

#[test]
fn test_root_tracker_is_first() {
    let (tree, count) = build("a = 1\n");
    assert_eq!(count, 1);
    assert_eq!(tree.node(tree.root()).entry_tracker(), Some(0));
    assert_eq!(tree.kind(tree.main()), NodeKind::Sequence);
}

#[test]
fn test_assignment_only_wraps_root() {
    let source = "a = 1\n";
    let (tree, _) = build(source);
    assert_eq!(
        rewriter::instrument(&tree, source),
        "($_cov[7][0]+=1;a = 1)\n"
    );
}

#[test]
fn test_bare_identifier_is_tracked_send() {
    let source = "raise";
    let (tree, count) = build(source);
    assert_eq!(count, 2);
    assert_eq!(
        rewriter::instrument(&tree, source),
        "($_cov[7][0]+=1;[(raise),$_cov[7][1]+=1][0])"
    );
}

#[test]
fn test_bound_identifier_is_variable() {
    let source = "x = 1\nx\n";
    let (tree, count) = build(source);
    assert_eq!(count, 1);
    let read = tree
        .nodes()
        .find(|node| node.range() == (6..7))
        .unwrap();
    assert_eq!(read.kind(), NodeKind::Variable);
}

#[test]
fn test_if_else_branches_get_entry_trackers() {
    let source = "if false\n  raise\nelse\n  \"yay\"\nend\n";
    let (tree, count) = build(source);
    assert_eq!(count, 4);
    assert_eq!(
        rewriter::instrument(&tree, source),
        "($_cov[7][0]+=1;if false\n  ($_cov[7][2]+=1;[(raise),$_cov[7][1]+=1][0])\nelse\n  ($_cov[7][3]+=1;\"yay\")\nend)\n"
    );
}

#[test]
fn test_if_flow_counts() {
    let source = "if false\n  raise\nelse\n  \"yay\"\nend\n";
    let (tree, _) = build(source);
    let hits: Vec<u64> = vec![1, 0, 0, 1];
    let raise = find(&tree, source, NodeKind::Send, "raise");
    let if_node = tree.children(tree.main()).next().unwrap();

    assert_eq!(tree.flow_entry_count(raise, &hits), 0);
    assert_eq!(tree.flow_entry_count(if_node, &hits), 1);
    assert_eq!(tree.flow_completion_count(if_node, &hits), 1);
    assert_eq!(tree.flow_completion_count(tree.root(), &hits), 1);
}

#[test]
fn test_elsif_entry_is_derived() {
    let source = "if a\n  1\nelsif b\n  2\nend\n";
    let (tree, count) = build(source);
    // root, a, b, elsif then, outer then
    assert_eq!(count, 5);

    let outer = tree.children(tree.main()).next().unwrap();
    let elsif = tree.child(outer, "alternative").unwrap();
    assert_eq!(tree.kind(elsif), NodeKind::If);
    assert_eq!(tree.node(elsif).entry_tracker(), None);

    // `a` completed twice, outer then entered once, `b` completed once,
    // elsif then never entered
    let hits: Vec<u64> = vec![2, 2, 1, 0, 1];
    assert_eq!(tree.flow_entry_count(elsif, &hits), 1);
    let runs: Vec<u64> = tree.branch_runs(elsif, &hits).into_iter().map(|(_, r)| r).collect();
    assert_eq!(runs, vec![0, 1]);
}

#[test]
fn test_and_tracks_right_operand() {
    let source = "a && b";
    let (tree, _) = build(source);
    assert_eq!(
        rewriter::instrument(&tree, source),
        "($_cov[7][0]+=1;[(a),$_cov[7][1]+=1][0] && ($_cov[7][3]+=1;[(b),$_cov[7][2]+=1][0]))"
    );

    let and = tree.children(tree.main()).next().unwrap();
    // `a` completed twice, `b` entered once and completed once
    let hits: Vec<u64> = vec![2, 2, 1, 1];
    assert_eq!(tree.flow_completion_count(and, &hits), 2);
}

#[test]
fn test_short_circuit_assignment_tracks_value() {
    let source = "a ||= 1";
    let (tree, _) = build(source);
    assert_eq!(
        rewriter::instrument(&tree, source),
        "($_cov[7][0]+=1;a ||= ($_cov[7][1]+=1;1))"
    );
}

#[test]
fn test_rescue_modifier_flow() {
    let source = "raise rescue 1";
    let (tree, count) = build(source);
    assert_eq!(count, 3);
    let modifier = tree.children(tree.main()).next().unwrap();
    assert_eq!(tree.kind(modifier), NodeKind::RescueModifier);
    let hits: Vec<u64> = vec![1, 0, 1];
    assert_eq!(tree.flow_completion_count(modifier, &hits), 1);
}

#[test]
fn test_while_condition_counts_loop_backs() {
    let source = "i = 0\nwhile i < 3\n  i += 1\nend\n";
    let (tree, count) = build(source);
    assert_eq!(count, 4);
    let while_node = find(&tree, source, NodeKind::While, &source[6..source.len() - 1]);
    let condition = tree.child(while_node, "condition").unwrap();

    let hits: Vec<u64> = vec![1, 4, 3, 3];
    assert_eq!(tree.flow_entry_count(condition, &hits), 4);
    assert_eq!(tree.flow_completion_count(while_node, &hits), 1);
}

#[test]
fn test_begin_rescue_flow() {
    let source = "begin\n  raise\nrescue\n  1\nend\n";
    let (tree, count) = build(source);
    assert_eq!(count, 3);
    let begin = tree.children(tree.main()).next().unwrap();
    assert_eq!(tree.kind(begin), NodeKind::Begin);

    let hits: Vec<u64> = vec![1, 0, 1];
    assert_eq!(tree.flow_completion_count(begin, &hits), 1);
    let literal = find(&tree, source, NodeKind::Literal, "1");
    assert_eq!(tree.flow_entry_count(literal, &hits), 1);
}

#[test]
fn test_empty_rescue_gets_trailer() {
    let source = "begin\n  raise\nrescue\nend\n";
    let (tree, _) = build(source);
    let rescue = tree
        .nodes()
        .find(|node| node.kind() == NodeKind::Rescue)
        .unwrap();
    let end = rescue.range().end;
    assert_eq!(tree.entry_anchor(rescue.id()), Some(Anchor::Trail(end)));
}

#[test]
fn test_fragment_order_for_doubly_tracked_node() {
    let source = "a || b";
    let (tree, _) = build(source);
    let right = tree.child(tree.children(tree.main()).next().unwrap(), "right").unwrap();
    let sides: Vec<_> = tree
        .insertion_fragments(right)
        .into_iter()
        .map(|f| (f.side, f.text))
        .collect();
    assert_eq!(
        sides,
        vec![
            (crate::rewriter::Side::Before, "($_cov[7][3]+=1;".to_string()),
            (crate::rewriter::Side::Before, "[(".to_string()),
            (crate::rewriter::Side::After, "),$_cov[7][2]+=1][0]".to_string()),
            (crate::rewriter::Side::After, ")".to_string()),
        ]
    );
}

#[test]
fn test_interpolated_string_is_executable_only_with_interpolation() {
    let source = "x = 1\n\"plain\"\n\"v=#{x}\"\n";
    let (tree, _) = build(source);
    let plain = find(&tree, source, NodeKind::Interpolated, "\"plain\"");
    let interpolated = find(&tree, source, NodeKind::Interpolated, "\"v=#{x}\"");
    assert!(!tree.is_executable(plain));
    assert!(tree.is_executable(interpolated));
}

#[test]
fn test_opaque_constructs_have_no_children() {
    let source = "class Foo\n  raise\nend\n";
    let (tree, count) = build(source);
    assert_eq!(count, 1);
    let class = tree.children(tree.main()).next().unwrap();
    assert_eq!(tree.kind(class), NodeKind::Opaque);
    assert_eq!(tree.children(class).count(), 0);
}

#[test]
fn test_empty_rescue_trailer_keeps_nil_value() {
    let source = "begin\n  raise\nrescue\nend\n";
    let (tree, _) = build(source);
    assert!(rewriter::instrument(&tree, source).contains("rescue;$_cov[7][2]+=1;nil\nend"));
}

#[test]
fn test_method_body_gets_leading_entry() {
    let source = "def foo(x)\n  raise if x\nend\n";
    let (tree, count) = build(source);
    // root, raise completion, modifier body, method body
    assert_eq!(count, 4);
    let def = tree.children(tree.main()).next().unwrap();
    assert_eq!(tree.kind(def), NodeKind::Def);
    assert_eq!(
        rewriter::instrument(&tree, source),
        "($_cov[7][0]+=1;def foo(x)\n  $_cov[7][3]+=1;($_cov[7][2]+=1;[(raise),$_cov[7][1]+=1][0]) if x\nend)\n"
    );

    // parameters are locals, not calls
    let x = find(&tree, source, NodeKind::Variable, "x");

    // defined but never called
    let hits: Vec<u64> = vec![1, 0, 0, 0];
    let raise = find(&tree, source, NodeKind::Send, "raise");
    assert_eq!(tree.flow_entry_count(def, &hits), 1);
    assert_eq!(tree.flow_entry_count(x, &hits), 0);
    assert_eq!(tree.flow_entry_count(raise, &hits), 0);
    assert_eq!(tree.flow_completion_count(def, &hits), 1);
}

#[test]
fn test_block_body_is_wrapped() {
    let source = "[1, 2].each { |n| puts n }";
    let (tree, _) = build(source);
    let block = tree
        .nodes()
        .find(|node| node.kind() == NodeKind::Block)
        .unwrap();
    let body = tree.child(block.id(), "body").unwrap();
    assert!(tree.node(body).entry_tracker().is_some());

    let instrumented = rewriter::instrument(&tree, source);
    assert!(instrumented.contains("{ |n| ($_cov[7]["));
    assert!(instrumented.ends_with("][0]) })"));
}

#[test]
fn test_lambda_tracks_inner_block_only() {
    let source = "f = ->(n) { n }\n";
    let (tree, count) = build(source);
    // root and the block body
    assert_eq!(count, 2);
    assert_eq!(
        rewriter::instrument(&tree, source),
        "($_cov[7][0]+=1;f = ->(n) { ($_cov[7][1]+=1;n) })\n"
    );
}

#[test]
fn test_do_while_keeps_begin() {
    let source = "i = 0\nbegin\n  i += 1\nend while false\n";
    let (tree, count) = build(source);
    assert_eq!(count, 3);
    assert_eq!(
        rewriter::instrument(&tree, source),
        "($_cov[7][0]+=1;i = 0\nbegin\n  $_cov[7][2]+=1;[(i += 1),$_cov[7][1]+=1][0]\nend while false)\n"
    );
}

#[test]
fn test_do_while_flow_counts() {
    let source = "i = 0\nbegin\n  i += 1\nend while i < 3\n";
    let (tree, _) = build(source);
    let modifier = tree
        .nodes()
        .find(|node| node.kind() == NodeKind::WhileModifier)
        .unwrap()
        .id();
    assert!(tree.is_do_while(modifier));
    let condition = tree.child(modifier, "condition").unwrap();
    let body = tree.child(modifier, "body").unwrap();

    // three passes, the condition checked after each
    let hits: Vec<u64> = vec![1, 3, 3, 3];
    assert_eq!(tree.flow_entry_count(body, &hits), 3);
    assert_eq!(tree.flow_entry_count(condition, &hits), 3);
    assert_eq!(tree.flow_completion_count(modifier, &hits), 1);
}

#[test]
fn test_case_without_else_gets_fallthrough() {
    let source = "case 2\nwhen 1 then :a\nend\n";
    let (tree, count) = build(source);
    // root, pattern, when body, fallthrough
    assert_eq!(count, 4);
    assert_eq!(
        rewriter::instrument(&tree, source),
        "($_cov[7][0]+=1;case 2\nwhen ($_cov[7][1]+=1;1) then ($_cov[7][2]+=1;:a)\nelse $_cov[7][3]+=1;nil;end)\n"
    );

    let case = tree.children(tree.main()).next().unwrap();
    let hits: Vec<u64> = vec![1, 1, 0, 1];
    assert_eq!(tree.case_fallthrough(case, &hits), 1);
    assert_eq!(tree.flow_completion_count(case, &hits), 1);
}

#[test]
fn test_case_else_entry_is_tracked() {
    let source = "case 2\nwhen 1, 2 then :a\nelse :b\nend\n";
    let (tree, count) = build(source);
    // root, two patterns, when body, else
    assert_eq!(count, 5);
    let case = tree.children(tree.main()).next().unwrap();
    assert_eq!(tree.node(case).fallthrough_tracker(), None);
    assert_eq!(tree.case_patterns(case).len(), 2);

    // matched on the second pattern
    let hits: Vec<u64> = vec![1, 1, 1, 1, 0];
    let when = tree
        .children(case)
        .find(|clause| tree.kind(*clause) == NodeKind::When)
        .unwrap();
    assert_eq!(tree.when_matches(when, &hits), 1);
    assert_eq!(tree.case_fallthrough(case, &hits), 0);
    assert_eq!(tree.flow_completion_count(case, &hits), 1);
}
