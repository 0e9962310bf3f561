use std::sync::Arc;

use branchcov_core::{
    BranchAnalyser, CounterRegistry, CoveredCode, Evaluator, NodeAnalyser, NodeKind, UnitState,
};
use pretty_assertions::assert_eq;

fn unit(source: &str) -> (CoveredCode, Arc<CounterRegistry>) {
    let registry = Arc::new(CounterRegistry::new());
    let unit = CoveredCode::builder()
        .source(source)
        .registry(Arc::clone(&registry))
        .build()
        .unwrap();
    (unit, registry)
}

fn executed(source: &str) -> CoveredCode {
    let (mut unit, registry) = unit(source);
    let mut evaluator = Evaluator::with_registry(registry).unwrap();
    unit.execute(&mut evaluator).unwrap();
    unit
}

fn blank_except(lines: &[String], marked: usize) -> bool {
    lines
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != marked)
        .all(|(_, line)| line.trim().is_empty())
}

#[test]
fn test_unreached_raise_in_if_is_marked() {
    let unit = executed("if false\n  raise\nelse\n  \"yay\"\nend\n");
    let lines = unit.branch_coverage().unwrap();

    assert_eq!(lines[1], "  xxxxx");
    assert!(blank_except(&lines, 1), "unexpected marks: {lines:?}");
}

#[test]
fn test_unreached_right_operand_is_marked() {
    let unit = executed("a = nil\na && raise\n");
    let lines = unit.branch_coverage().unwrap();

    assert_eq!(lines[1], "     xxxxx");
    assert!(blank_except(&lines, 1), "unexpected marks: {lines:?}");
}

#[test]
fn test_unreached_literal_is_inert() {
    let unit = executed("if false\n  1\nend\n");
    let lines = unit.branch_coverage().unwrap();

    assert_eq!(lines[1], "  -");
}

#[test]
fn test_empty_source_executes_to_nothing() {
    let (mut unit, registry) = unit("");
    assert_eq!(unit.instrumented_source().unwrap(), "");

    let mut evaluator = Evaluator::with_registry(registry).unwrap();
    unit.execute(&mut evaluator).unwrap();

    assert_eq!(unit.state(), UnitState::Executed);
    assert!(unit.cover().unwrap().is_empty());
    assert!(unit.branch_coverage().unwrap().is_empty());
}

#[test]
fn test_units_have_distinct_ids_and_counters() {
    let registry = Arc::new(CounterRegistry::new());
    let build = |source: &str| {
        CoveredCode::builder()
            .source(source)
            .registry(Arc::clone(&registry))
            .build()
            .unwrap()
    };
    let mut first = build("x = 1\nx + 1\n");
    let mut second = build("y = 2\ny * 2\n");
    assert_ne!(first.id(), second.id());

    let mut evaluator = Evaluator::with_registry(Arc::clone(&registry)).unwrap();
    first.execute(&mut evaluator).unwrap();
    let before = first.cover().unwrap();
    second.execute(&mut evaluator).unwrap();

    assert_eq!(first.cover().unwrap(), before);
    assert!(registry.contains(first.id()));
    assert!(registry.contains(second.id()));
    assert!(second.cover().unwrap().iter().all(|hits| *hits == 1));
}

#[test]
fn test_execute_twice_is_a_no_op() {
    let (mut unit, registry) = unit("i = 0\ni += 1 while i < 3\n");
    let mut evaluator = Evaluator::with_registry(registry).unwrap();
    unit.execute(&mut evaluator).unwrap();
    let hits = unit.cover().unwrap();

    unit.execute(&mut evaluator).unwrap();
    assert_eq!(unit.cover().unwrap(), hits);
}

#[test]
fn test_branch_analyser_reports_taken_else() {
    let mut unit = executed("if false\n  raise\nelse\n  \"yay\"\nend\n");
    let branches = unit.analyse(&BranchAnalyser).unwrap();
    let tree = unit.tree().unwrap().unwrap();

    let (&if_node, if_branches) = branches
        .iter()
        .find(|(id, _)| tree.kind(**id) == NodeKind::If)
        .unwrap();
    assert_eq!(tree.node(if_node).raw_kind(), "if");
    assert_eq!(if_branches.len(), 2);
    assert!(!if_branches[0].taken());
    assert_eq!(if_branches[1].runs, 1);
}

#[test]
fn test_if_branches_partition_entries() {
    let source = r##"
i = 0
evens = 0
while i < 6
  if i.even?
    evens += 1
  else
    evens -= 0
  end
  i += 1
end
"##;
    let mut unit = executed(source);
    let branches = unit.analyse(&BranchAnalyser).unwrap();
    let hits = unit.cover().unwrap();
    let tree = unit.tree().unwrap().unwrap();

    let mut checked = 0;
    for (id, node_branches) in &branches {
        if tree.kind(*id) != NodeKind::If {
            continue;
        }
        let total: u64 = node_branches.iter().map(|branch| branch.runs).sum();
        assert_eq!(total, tree.flow_entry_count(*id, &hits));
        assert_eq!(total, 6);
        checked += 1;
    }
    assert_eq!(checked, 1);
}

/// Programs whose instrumented form must behave exactly like the original
const EQUIVALENCE_PROGRAMS: &[&str] = &[
    r##"
def classify(n)
  if n < 0
    "neg"
  elsif n == 0
    "zero"
  else
    "pos"
  end
end
[-2, 0, 3].each { |n| puts classify(n) }
"##,
    r##"
total = 0
i = 0
while i < 5
  total += i if i.odd?
  i += 1
end
puts total
total
"##,
    r##"
a = nil
b = a || "default"
c = b && b.upcase
d = nil
d ||= 10
d &&= d * 2
puts b, c, d
[b, c, d]
"##,
    r##"
log = []
begin
  log << "start"
  Integer("nope")
rescue ArgumentError => e
  log << "rescued"
else
  log << "else"
ensure
  log << "ensure"
end
value = (1 / 0 rescue :inf)
puts log.join(","), value
"##,
    r##"
words = %w[apple banana cherry]
lengths = words.map { |w| w.length }
long = words.select { |w| w.length > 5 }
puts "#{words.first}: #{lengths.sum}", long.inspect
h = {count: 0}
words.each { |w| h[:count] += 1 unless w.start_with?("b") }
h[:count]
"##,
    r##"
n = 0
n += 2 until n >= 7
msg = n.even? ? "even" : "odd"
unless n > 100
  puts msg
end
n
"##,
    r##"
i = 0
begin
  i += 1
end while false
j = 0
begin
  j += 2
end while j < 6
k = 10
begin
  k -= 1
end until true
puts i, j, k
[i, j, k]
"##,
    r##"
def size_of(n)
  case n
  when 0 then "none"
  when 1, 2 then "few"
  when 3..5
    "some"
  else
    "many"
  end
end
puts [0, 2, 4, 9].map { |n| size_of(n) }.join(",")
label = case :x
        when :y then 1
        end
puts label.inspect
[size_of(1), label]
"##,
    r##"
results = []
results << ([1, raise, *nil?, 3] rescue nil)
results << ({a: raise, :b => 2} rescue nil)
results << ("oo#{raise}ps#{:never}" rescue nil)
results << (raise..42 rescue nil)
puts results.inspect
results
"##,
];

#[test]
fn test_instrumented_programs_behave_like_originals() {
    for source in EQUIVALENCE_PROGRAMS {
        let mut plain = Evaluator::with_registry(Arc::new(CounterRegistry::new())).unwrap();
        let expected_value = plain.eval_source(source).unwrap();
        let expected_output = plain.output();

        let (mut unit, registry) = unit(source);
        let mut evaluator = Evaluator::with_registry(Arc::clone(&registry)).unwrap();
        unit.execute(&mut evaluator).unwrap();
        assert_eq!(evaluator.output(), expected_output, "output of {source}");
        let hits = unit.cover().unwrap();
        assert_eq!(hits.first().copied(), Some(1), "root entry of {source}");

        // replay against a separate table so the unit's counters stay as run
        let instrumented = unit.instrumented_source().unwrap().to_string();
        let replay_registry = Arc::new(CounterRegistry::new());
        let replay_counters = replay_registry.add(unit.id(), unit.tracker_count().unwrap());
        let mut replay = Evaluator::with_registry(replay_registry).unwrap();
        let value = replay.eval_source(&instrumented).unwrap();
        assert_eq!(value, expected_value, "value of {instrumented}");

        assert_eq!(unit.cover().unwrap(), hits, "counters of {source}");
        assert_eq!(replay_counters.snapshot(), hits, "replayed counters of {source}");
    }
}

/// Line and column of a byte offset in single-line-per-row text
fn position(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset];
    let line = before.matches('\n').count();
    let line_start = before.rfind('\n').map_or(0, |newline| newline + 1);
    (line, source[line_start..offset].chars().count())
}

/// Every node's own characters are marked exactly when the node never ran,
/// with `x` for executable nodes and `-` for the rest
fn assert_marks_partition(source: &str) {
    let mut unit = executed(source);
    let runs = unit.analyse(&NodeAnalyser).unwrap();
    let image: Vec<Vec<char>> = unit
        .branch_coverage()
        .unwrap()
        .iter()
        .map(|line| line.chars().collect())
        .collect();
    let tree = unit.tree().unwrap().unwrap();

    let mut seen = 0;
    for node in tree.nodes() {
        let range = node.range();
        let children: Vec<_> = tree.children(node.id()).map(|c| tree.node(c).range()).collect();
        let expected = match runs[&node.id()] {
            0 if tree.is_executable(node.id()) => 'x',
            0 => '-',
            _ => ' ',
        };
        for (index, ch) in source[range.clone()].char_indices() {
            let offset = range.start + index;
            if ch.is_whitespace() || children.iter().any(|child| child.contains(&offset)) {
                continue;
            }
            let (line, column) = position(source, offset);
            assert_eq!(
                image[line][column], expected,
                "{:?} at {line}:{column} in {:?}",
                node.kind(),
                &source[range.clone()]
            );
            seen += 1;
        }
    }
    assert!(seen > 0);
}

#[test]
fn test_marks_partition_by_node_runs() {
    for source in EQUIVALENCE_PROGRAMS {
        assert_marks_partition(source);
    }
    assert_marks_partition("if false\n  raise\nelse\n  \"yay\"\nend\n");
    assert_marks_partition("def f(x)\n  x ? 1 : raise\nend\ny = nil\ny && f(y)\n");
}

fn marked(line: &str, columns: std::ops::Range<usize>) -> bool {
    let row: Vec<char> = line.chars().collect();
    columns.into_iter().all(|column| row.get(column).is_some_and(|c| *c != ' '))
}

fn blank(line: &str, columns: std::ops::Range<usize>) -> bool {
    let row: Vec<char> = line.chars().collect();
    columns.into_iter().all(|column| row.get(column).map_or(true, |c| *c == ' '))
}

#[test]
fn test_elements_after_raise_are_marked() {
    let unit = executed("[1, raise, *nil?, 3] rescue nil
");
    let line = &unit.branch_coverage().unwrap()[0];
    assert!(blank(line, 0..10), "{line:?}");
    assert_eq!(&line[11..16], "xxxxx");
    assert_eq!(&line[18..19], "-");
}

#[test]
fn test_hash_pairs_after_raise_are_marked() {
    let unit = executed("{a: raise, :b => 2} rescue nil
");
    let line = &unit.branch_coverage().unwrap()[0];
    assert!(blank(line, 0..10), "{line:?}");
    assert!(marked(line, 11..13), "{line:?}");
    assert!(marked(line, 14..16), "{line:?}");
    assert!(marked(line, 17..18), "{line:?}");
}

#[test]
fn test_interpolation_after_raise_is_marked() {
    let unit = executed("\"oo#{raise}ps#{:never}\" rescue nil\n");
    let line = &unit.branch_coverage().unwrap()[0];
    assert!(blank(line, 0..11), "{line:?}");
    assert!(marked(line, 11..22), "{line:?}");
    assert_eq!(&line[13..15], "xx");
    assert!(blank(line, 22..line.len()), "{line:?}");
}

#[test]
fn test_range_end_after_raise_is_marked() {
    let unit = executed("raise..42 rescue nil\n");
    let line = &unit.branch_coverage().unwrap()[0];
    assert!(blank(line, 0..7), "{line:?}");
    assert_eq!(&line[7..9], "--");
}

#[test]
fn test_uncalled_method_body_is_marked() {
    let unit = executed("def f(x)\n  if x\n    raise\n  end\nend\n");
    let lines = unit.branch_coverage().unwrap();

    assert!(lines[0].trim().is_empty(), "{lines:?}");
    assert_eq!(lines[1], "  -- x");
    assert_eq!(lines[2], "    xxxxx");
    assert_eq!(lines[3], "  ---");
    assert!(lines[4].trim().is_empty(), "{lines:?}");
}

#[test]
fn test_block_body_skipped_by_modifier_is_marked() {
    let unit = executed("[1, 2].each do |x|\n  puts x if x > 5\nend\n");
    let lines = unit.branch_coverage().unwrap();

    assert_eq!(lines[1].trim_end(), "  xxxx x");
    assert!(blank_except(&lines, 1), "unexpected marks: {lines:?}");
}

#[test]
fn test_do_while_body_runs_once_when_condition_is_false() {
    let mut unit = executed("i = 0\nbegin\n  i += 1\nend while false\n");
    let lines = unit.branch_coverage().unwrap();
    assert!(lines.iter().all(|line| line.trim().is_empty()), "{lines:?}");

    let tree = unit.tree().unwrap().unwrap();
    let modifier = tree
        .nodes()
        .find(|node| node.kind() == NodeKind::WhileModifier)
        .unwrap()
        .id();
    let body = tree.child(modifier, "body").unwrap();
    let hits = unit.cover().unwrap();
    let tree = unit.tree().unwrap().unwrap();
    assert_eq!(tree.flow_entry_count(body, &hits), 1);
    assert_eq!(tree.flow_completion_count(modifier, &hits), 1);
}

#[test]
fn test_case_reports_unmatched_whens() {
    let mut unit = executed("x = 2\ncase x\nwhen 1 then :one\nwhen 2 then :two\nend\n");
    let lines = unit.branch_coverage().unwrap();
    assert!(blank(&lines[2], 0..7), "{lines:?}");
    assert!(marked(&lines[2], 12..16), "{lines:?}");
    assert!(lines[3].trim().is_empty(), "{lines:?}");

    let branches = unit.analyse(&BranchAnalyser).unwrap();
    let tree = unit.tree().unwrap().unwrap();
    let (_, case_branches) = branches
        .iter()
        .find(|(id, _)| tree.kind(**id) == NodeKind::Case)
        .unwrap();
    let runs: Vec<u64> = case_branches.iter().map(|branch| branch.runs).collect();
    assert_eq!(runs, vec![0, 1, 0]);
}

#[test]
fn test_executor_failure_keeps_partial_counts() {
    let (mut unit, registry) = unit("x = 1\nraise \"boom\"\ny = 2\n");
    let mut evaluator = Evaluator::with_registry(registry).unwrap();

    let error = unit.execute(&mut evaluator).unwrap_err();
    assert!(error.to_string().contains("boom"));
    assert_eq!(unit.state(), UnitState::Executed);

    let lines = unit.line_coverage().unwrap();
    assert_eq!(lines[0], Some(1));
    assert_eq!(lines[2], Some(0));
}

#[test]
fn test_report_serializes_after_purge() {
    let unit = executed("x = [1, 2]\nx.first\n");
    let purged = unit.purge();
    assert!(purged.is_some());

    let report = unit.report().unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["tracker_count"], report.hits.len());
    assert!(report.hits.iter().any(|hits| *hits > 0));
}
