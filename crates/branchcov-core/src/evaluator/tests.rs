use super::*;

fn create_test_evaluator() -> (Evaluator, Arc<CounterRegistry>) {
    let registry = Arc::new(CounterRegistry::new());
    let evaluator = Evaluator::with_registry(Arc::clone(&registry)).unwrap();
    (evaluator, registry)
}

fn eval(code: &str) -> Value {
    let (mut evaluator, _registry) = create_test_evaluator();
    evaluator.eval_source(code).unwrap()
}

fn raised(code: &str) -> (String, String) {
    let (mut evaluator, _registry) = create_test_evaluator();
    let error = evaluator.eval_source(code).unwrap_err();
    match error.downcast_ref::<EvaluatorError>() {
        Some(EvaluatorError::Raised { class, message }) => (class.clone(), message.clone()),
        other => panic!("expected a Ruby exception, got {other:?}"),
    }
}

#[test]
fn test_arithmetic_follows_ruby_rounding() {
    assert_eq!(eval("1 + 2 * 3"), Value::Integer(7));
    assert_eq!(eval("(-7) / 2"), Value::Integer(-4));
    assert_eq!(eval("(-7) % 3"), Value::Integer(2));
    assert_eq!(eval("7.0 / 2"), Value::Float(3.5));
    assert_eq!(eval("2 ** 10"), Value::Integer(1024));
    assert_eq!(eval("0x1f + 0b11 + 1_000"), Value::Integer(1034));
}

#[test]
fn test_integer_overflow_raises_range_error() {
    let (class, _) = raised("9223372036854775807 + 1");
    assert_eq!(class, "RangeError");
}

#[test]
fn test_division_by_zero() {
    let (class, message) = raised("1 / 0");
    assert_eq!(class, "ZeroDivisionError");
    assert_eq!(message, "divided by 0");
}

#[test]
fn test_puts_and_interpolation() {
    let (mut evaluator, _registry) = create_test_evaluator();
    let code = r##"
name = "world"
puts "hello #{name}"
puts [1, [2, nil]]
print "a", 1, "\n"
p :sym, "q"
"##;
    evaluator.eval_source(code).unwrap();
    assert_eq!(evaluator.output(), "hello world\n1\n2\n\na1\n:sym\n\"q\"\n");
}

#[test]
fn test_single_quoted_strings_keep_backslashes() {
    assert_eq!(eval(r"'a\nb'"), Value::str("a\\nb"));
    assert_eq!(eval(r#""a\tb""#), Value::str("a\tb"));
}

#[test]
fn test_if_elsif_else_and_modifiers() {
    let code = r##"
x = 5
r = if x < 3
  "small"
elsif x < 10
  "medium"
else
  "large"
end
r += "!" unless x == 0
r
"##;
    assert_eq!(eval(code), Value::str("medium!"));
    assert_eq!(eval("true ? 1 : 2"), Value::Integer(1));
}

#[test]
fn test_while_with_break_and_next() {
    let code = r##"
sum = 0
i = 0
while true
  i += 1
  next if i == 3
  break if i > 5
  sum += i
end
sum
"##;
    // 1 + 2 + 4 + 5
    assert_eq!(eval(code), Value::Integer(12));
}

#[test]
fn test_do_while_runs_body_first() {
    let code = r##"
n = 10
begin
  n += 1
end while n < 5
n
"##;
    assert_eq!(eval(code), Value::Integer(11));
    assert_eq!(eval("i = 0\ni += 1 until i == 4\ni"), Value::Integer(4));
}

#[test]
fn test_boolean_operators_short_circuit() {
    assert_eq!(eval("a = nil\na && raise"), Value::Nil);
    assert_eq!(eval("false || 3"), Value::Integer(3));
    assert_eq!(eval("x = nil\nx ||= 4\nx &&= x + 1\nx"), Value::Integer(5));
    assert_eq!(eval("not true"), Value::Bool(false));
}

#[test]
fn test_begin_rescue_else_ensure() {
    let (mut evaluator, _registry) = create_test_evaluator();
    let code = r##"
def risky(n)
  raise ArgumentError, "bad #{n}" if n > 1
  n
end

log = []
[1, 2].each do |n|
  begin
    log << risky(n)
  rescue TypeError
    log << "type"
  rescue ArgumentError => e
    log << e.message
  else
    log << "ok"
  ensure
    log << "done"
  end
end
log
"##;
    let value = evaluator.eval_source(code).unwrap();
    assert_eq!(value.inspect(), r#"[1, "ok", "done", "bad 2", "done"]"#);
}

#[test]
fn test_retry_reruns_begin_body() {
    let code = r##"
attempts = 0
begin
  attempts += 1
  raise "again" if attempts < 3
  attempts
rescue
  retry
end
"##;
    assert_eq!(eval(code), Value::Integer(3));
}

#[test]
fn test_bare_rescue_only_catches_standard_errors() {
    let (class, _) = raised("begin\n  raise NotImplementedError\nrescue\n  1\nend");
    assert_eq!(class, "NotImplementedError");
    assert_eq!(eval("begin\n  raise KeyError\nrescue IndexError\n  :caught\nend"), Value::Symbol("caught".into()));
}

#[test]
fn test_rescue_modifier() {
    assert_eq!(eval("(raise 'x') rescue 7"), Value::Integer(7));
    assert_eq!(eval("Integer('zz') rescue -1"), Value::Integer(-1));
}

#[test]
fn test_reraise_inside_rescue() {
    let (class, message) = raised("begin\n  raise TypeError, 'inner'\nrescue\n  raise\nend");
    assert_eq!(class, "TypeError");
    assert_eq!(message, "inner");
}

#[test]
fn test_methods_with_optional_and_splat_parameters() {
    let code = r##"
def greet(name, greeting = "hi", *rest)
  "#{greeting} #{name} #{rest.length}"
end
[greet("a"), greet("b", "yo", 1, 2)]
"##;
    assert_eq!(eval(code).inspect(), r#"["hi a 0", "yo b 2"]"#);
    let (class, _) = raised("def one(a)\n  a\nend\none");
    assert_eq!(class, "ArgumentError");
}

#[test]
fn test_return_and_recursion() {
    let code = r##"
def fib(n)
  return n if n < 2
  fib(n - 1) + fib(n - 2)
end
fib(15)
"##;
    assert_eq!(eval(code), Value::Integer(610));
}

#[test]
fn test_runaway_recursion_raises_system_stack_error() {
    let (class, _) = raised("def down(n)\n  down(n + 1)\nend\ndown(0)");
    assert_eq!(class, "SystemStackError");
}

#[test]
fn test_collections_and_blocks() {
    assert_eq!(eval("[3, 1, 2].sort.map { |x| x * 2 }").inspect(), "[2, 4, 6]");
    assert_eq!(eval("(1..4).reduce(:+)"), Value::Integer(10));
    assert_eq!(eval("(1...4).to_a").inspect(), "[1, 2, 3]");
    assert_eq!(
        eval("h = {a: 1, 'b' => 2}\nh[:c] = 3\nh.map { |k, v| v }.sum"),
        Value::Integer(6)
    );
    assert_eq!(eval("a, *b = [1, 2, 3]\nb").inspect(), "[2, 3]");
    assert_eq!(eval("x = [1, 2]\nx[5] = 9\nx").inspect(), "[1, 2, nil, nil, nil, 9]");
}

#[test]
fn test_array_times_integer_repeats_elements() {
    assert_eq!(eval("[1, 2] * 2").inspect(), "[1, 2, 1, 2]");
    assert_eq!(eval("[:a] * 0").inspect(), "[]");
    let (class, _) = raised("[1] * -1");
    assert_eq!(class, "ArgumentError");
}

#[test]
fn test_case_when_uses_case_equality() {
    let code = r##"
def kind(v)
  case v
  when Integer then "int"
  when /^a/ then "a-word"
  when "x", "y" then "xy"
  else "other"
  end
end
[kind(1), kind("apple"), kind("y"), kind(:z)]
"##;
    assert_eq!(eval(code).inspect(), r#"["int", "a-word", "xy", "other"]"#);
}

#[test]
fn test_loop_stops_on_break_value() {
    assert_eq!(eval("i = 0\nloop do\n  i += 1\n  break i * 10 if i == 3\nend"), Value::Integer(30));
}

#[test]
fn test_undefined_names_raise_name_error() {
    let (class, message) = raised("undefined_thing");
    assert_eq!(class, "NameError");
    assert!(message.contains("undefined_thing"));
    let (class, _) = raised("nil.upcase");
    assert_eq!(class, "NoMethodError");
}

#[test]
fn test_unsupported_constructs_raise_not_implemented() {
    let (class, _) = raised("class Foo\nend");
    assert_eq!(class, "NotImplementedError");
}

#[test]
fn test_syntax_error_is_reported_as_parse_error() {
    let (mut evaluator, _registry) = create_test_evaluator();
    let error = evaluator.eval_source("x = (1 +\n").unwrap_err();
    assert!(matches!(
        error.downcast_ref::<EvaluatorError>(),
        Some(EvaluatorError::Parse(_))
    ));
}

#[test]
fn test_empty_source_is_nil() {
    assert_eq!(eval(""), Value::Nil);
    assert_eq!(eval("# only a comment\n"), Value::Nil);
}

#[test]
fn test_counter_global_increments_registered_counters() {
    let (mut evaluator, registry) = create_test_evaluator();
    let counters = registry.add(UnitId(5), 3);
    evaluator
        .eval_source("2.times { $_cov[5][1] += 1 }\n$_cov[5][2] += 4")
        .unwrap();
    assert_eq!(counters.snapshot(), vec![0, 2, 4]);
    assert_eq!(evaluator.eval_source("$_cov[99]").unwrap(), Value::Nil);
}

#[test]
fn test_counter_index_out_of_range() {
    let (mut evaluator, registry) = create_test_evaluator();
    registry.add(UnitId(6), 1);
    let error = evaluator.eval_source("$_cov[6][3] += 1").unwrap_err();
    assert!(error.to_string().contains("IndexError"));
}

#[test]
fn test_format_directives() {
    assert_eq!(eval(r#"format("%05.2f|%-3s|%+d", 3.14159, "a", 4)"#), Value::str("03.14|a  |+4"));
    assert_eq!(eval(r#""%d items" % 3"#), Value::str("3 items"));
}

#[test]
fn test_methods_persist_across_sources() {
    let (mut evaluator, _registry) = create_test_evaluator();
    evaluator.eval_source("def double(x)\n  x * 2\nend").unwrap();
    assert_eq!(evaluator.eval_source("double(21)").unwrap(), Value::Integer(42));
}
