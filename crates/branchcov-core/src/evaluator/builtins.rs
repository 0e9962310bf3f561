// Kernel functions, method dispatch and the scalar core classes
use std::{cell::RefCell, rc::Rc};

use super::{errors::EvaluatorError, parse_integer, Eval, Evaluator, Pattern, Unwind, Value};
use crate::parser::RawNode;

const KERNEL_FUNCTIONS: &[&str] = &[
    "puts", "print", "p", "raise", "fail", "loop", "Integer", "Float", "String", "Array",
    "format", "sprintf", "block_given?",
];

const KNOWN_CLASSES: &[&str] = &[
    "Object", "BasicObject", "Kernel", "Comparable", "NilClass", "TrueClass", "FalseClass",
    "Numeric", "Integer", "Float", "String", "Symbol", "Array", "Hash", "Range", "Regexp", "Class",
    "Exception", "StandardError", "RuntimeError", "ArgumentError", "TypeError", "NameError",
    "NoMethodError", "ZeroDivisionError", "IndexError", "KeyError", "StopIteration", "RangeError",
    "FloatDomainError", "LocalJumpError", "FrozenError", "RegexpError", "IOError", "EOFError",
    "ScriptError", "NotImplementedError", "LoadError", "SyntaxError", "SystemStackError",
    "NoMemoryError", "SecurityError", "SystemExit", "SignalException", "Interrupt",
];

pub(super) fn is_kernel_function(name: &str) -> bool {
    KERNEL_FUNCTIONS.contains(&name)
}

pub(super) fn is_known_class(name: &str) -> bool {
    KNOWN_CLASSES.contains(&name)
}

fn superclass(class: &str) -> Option<&'static str> {
    match class {
        "Object" | "BasicObject" | "Kernel" | "Comparable" | "Exception" => None,
        "Integer" | "Float" => Some("Numeric"),
        "Numeric" | "String" | "Symbol" | "Array" | "Hash" | "Range" | "Regexp" | "Class"
        | "NilClass" | "TrueClass" | "FalseClass" => Some("Object"),
        "StandardError" | "ScriptError" | "SystemStackError" | "NoMemoryError" | "SecurityError"
        | "SystemExit" | "SignalException" => Some("Exception"),
        "Interrupt" => Some("SignalException"),
        "NotImplementedError" | "LoadError" | "SyntaxError" => Some("ScriptError"),
        "NoMethodError" => Some("NameError"),
        "KeyError" | "StopIteration" => Some("IndexError"),
        "FloatDomainError" => Some("RangeError"),
        "FrozenError" => Some("RuntimeError"),
        "EOFError" => Some("IOError"),
        // user-raised classes we know nothing about
        _ => Some("StandardError"),
    }
}

pub(super) fn class_is_a(class: &str, ancestor: &str) -> bool {
    let mut current = Some(class);
    while let Some(class) = current {
        if class == ancestor {
            return true;
        }
        current = superclass(class);
    }
    false
}

pub(super) fn value_is_a(value: &Value, class: &str) -> bool {
    match class {
        "Object" | "BasicObject" | "Kernel" => true,
        "Comparable" => matches!(value, Value::Integer(_) | Value::Float(_) | Value::Str(_)),
        _ => class_is_a(&value.class_name(), class),
    }
}

pub(super) fn raise(class: &str, message: impl Into<String>) -> Unwind {
    Unwind::Raise(Value::exception(class, message))
}

pub(super) fn require_block<'n>(block: Option<&'n RawNode>, method: &str) -> Eval<&'n RawNode> {
    block.ok_or_else(|| EvaluatorError::unsupported(format!("{method} without a block")).into())
}

impl Evaluator {
    /// Receiver-less call: user methods first, then kernel functions
    pub(super) fn call_function(
        &mut self,
        name: &str,
        args: Vec<Value>,
        block: Option<&RawNode>,
    ) -> Eval {
        if let Some(method) = self.methods.get(name).cloned() {
            if block.is_some() {
                return Err(EvaluatorError::unsupported("passing a block to a method").into());
            }
            return self.invoke(method, args);
        }
        match name {
            "puts" => {
                let mut out = String::new();
                if args.is_empty() {
                    out.push('\n');
                }
                for arg in &args {
                    puts_lines(arg, &mut out);
                }
                self.write(&out);
                Ok(Value::Nil)
            }
            "print" => {
                let text: String = args.iter().map(Value::to_text).collect();
                self.write(&text);
                Ok(Value::Nil)
            }
            "p" => {
                for arg in &args {
                    self.write(&format!("{}\n", arg.inspect()));
                }
                let mut args = args;
                Ok(match args.len() {
                    0 => Value::Nil,
                    1 => args.remove(0),
                    _ => Value::array(args),
                })
            }
            "raise" | "fail" => Err(Unwind::Raise(self.exception_from(args)?)),
            "loop" => {
                let block = require_block(block, "loop")?;
                loop {
                    match self.call_block(block, Vec::new()) {
                        Ok(_) => {}
                        Err(Unwind::Raise(exception)) if value_is_a(&exception, "StopIteration") => {
                            return Ok(Value::Nil)
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
            "Integer" => match args.as_slice() {
                [value] => to_integer_strict(value).map(Value::Integer),
                _ => Err(EvaluatorError::arity(args.len(), "1").into()),
            },
            "Float" => match args.as_slice() {
                [Value::Integer(n)] => Ok(Value::Float(*n as f64)),
                [Value::Float(x)] => Ok(Value::Float(*x)),
                [Value::Str(text)] => text
                    .trim()
                    .replace('_', "")
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| raise("ArgumentError", format!("invalid value for Float(): {}", Value::str(text.as_str()).inspect()))),
                [other] => Err(raise("TypeError", format!("can't convert {} into Float", other.class_name()))),
                _ => Err(EvaluatorError::arity(args.len(), "1").into()),
            },
            "String" => match args.as_slice() {
                [value] => Ok(Value::Str(value.to_text())),
                _ => Err(EvaluatorError::arity(args.len(), "1").into()),
            },
            "Array" => match args.as_slice() {
                [Value::Nil] => Ok(Value::array(Vec::new())),
                [value @ Value::Array(_)] => Ok(value.clone()),
                [value] => Ok(Value::array(value.elements().unwrap_or_else(|| vec![value.clone()]))),
                _ => Err(EvaluatorError::arity(args.len(), "1").into()),
            },
            "format" | "sprintf" => match args.split_first() {
                Some((Value::Str(template), rest)) => Ok(Value::Str(format_string(template, rest)?)),
                _ => Err(raise("TypeError", "format string expected")),
            },
            "block_given?" => Ok(Value::Bool(false)),
            _ if args.is_empty() && block.is_none() => Err(EvaluatorError::undefined_name(name).into()),
            _ => Err(EvaluatorError::undefined_method(name, "main").into()),
        }
    }

    /// The exception `raise` throws for its arguments
    fn exception_from(&mut self, mut args: Vec<Value>) -> Eval<Value> {
        let not_an_exception = || raise("TypeError", "exception class/object expected");
        match args.len() {
            0 => Ok(self
                .rescued
                .last()
                .cloned()
                .unwrap_or_else(|| Value::exception("RuntimeError", "unhandled exception"))),
            1 => match args.remove(0) {
                Value::Str(message) => Ok(Value::exception("RuntimeError", message)),
                Value::Class(class) if class_is_a(&class, "Exception") => {
                    Ok(Value::exception(class.clone(), class))
                }
                exception @ Value::Exception { .. } => Ok(exception),
                _ => Err(not_an_exception()),
            },
            _ => {
                let message = args.remove(1).to_text();
                match args.remove(0) {
                    Value::Class(class) if class_is_a(&class, "Exception") => {
                        Ok(Value::exception(class, message))
                    }
                    Value::Exception { class, .. } => Ok(Value::exception(class, message)),
                    _ => Err(not_an_exception()),
                }
            }
        }
    }

    /// `pattern === subject`, as used by `case`/`when`
    pub(super) fn case_eq(&mut self, pattern: &Value, subject: &Value) -> Eval<bool> {
        Ok(match pattern {
            Value::Class(class) => value_is_a(subject, class),
            Value::Range {
                start,
                end,
                exclusive,
            } => {
                let (start, end) = (*start as f64, *end as f64);
                let inside = |x: f64| x >= start && if *exclusive { x < end } else { x <= end };
                match subject {
                    Value::Integer(n) => inside(*n as f64),
                    Value::Float(x) => inside(*x),
                    _ => false,
                }
            }
            Value::Regexp(pattern) => match subject {
                Value::Str(text) | Value::Symbol(text) => pattern.regex.is_match(text),
                _ => false,
            },
            other => other == subject,
        })
    }

    /// Call `name` on a value, raising `NoMethodError` when it has no such method
    pub(super) fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
        block: Option<&RawNode>,
    ) -> Eval {
        if let Some(value) = self.object_method(&receiver, name, &args, block)? {
            return Ok(value);
        }
        let found = match &receiver {
            Value::Integer(n) => self.integer_method(*n, name, &args, block)?,
            Value::Float(x) => float_method(*x, name, &args)?,
            Value::Str(text) => self.string_method(text, name, &args, block)?,
            Value::Symbol(symbol) => symbol_method(symbol, name, &args),
            Value::Array(items) => self.array_method(&receiver, items, name, &args, block)?,
            Value::Hash(pairs) => self.hash_method(&receiver, pairs, name, &args, block)?,
            Value::Range {
                start,
                end,
                exclusive,
            } => self.range_method(&receiver, (*start, *end, *exclusive), name, &args, block)?,
            Value::Regexp(pattern) => regexp_method(pattern, name, &args),
            Value::Exception { class, message } => exception_method(class, message, name, &args),
            Value::Class(class) => class_method(class, name, &args)?,
            Value::Counters(counters) => match (name, args.as_slice()) {
                ("[]", [Value::Integer(tracker)]) => Some(
                    usize::try_from(*tracker)
                        .ok()
                        .and_then(|tracker| counters.get(tracker))
                        .map(|hits| Value::Integer(hits as i64))
                        .unwrap_or(Value::Nil),
                ),
                ("[]=", _) => {
                    return Err(EvaluatorError::unsupported("assigning a coverage counter").into())
                }
                _ => {
                    let snapshot = Rc::new(RefCell::new(receiver.elements().unwrap_or_default()));
                    let copy = Value::Array(Rc::clone(&snapshot));
                    self.array_method(&copy, &snapshot, name, &args, block)?
                }
            },
            Value::CounterTable => match (name, args.as_slice()) {
                ("[]", [Value::Integer(unit)]) => Some(self.counters_for(*unit)),
                ("key?" | "include?", [Value::Integer(unit)]) => {
                    Some(Value::Bool(self.counters_for(*unit) != Value::Nil))
                }
                _ => None,
            },
            Value::Nil => match (name, args.as_slice()) {
                ("to_a", []) => Some(Value::array(Vec::new())),
                ("to_h", []) => Some(Value::hash(Vec::new())),
                ("to_i", []) => Some(Value::Integer(0)),
                ("to_f", []) => Some(Value::Float(0.0)),
                ("&", [_]) => Some(Value::Bool(false)),
                ("|", [other]) => Some(Value::Bool(other.truthy())),
                _ => None,
            },
            Value::Bool(b) => match (name, args.as_slice()) {
                ("&", [other]) => Some(Value::Bool(*b && other.truthy())),
                ("|", [other]) => Some(Value::Bool(*b || other.truthy())),
                ("^", [other]) => Some(Value::Bool(*b != other.truthy())),
                _ => None,
            },
            Value::Main => None,
        };
        found.ok_or_else(|| {
            let receiver = match receiver {
                Value::Nil => "nil".to_string(),
                other => other.class_name(),
            };
            EvaluatorError::undefined_method(name, &receiver).into()
        })
    }

    /// Methods every object responds to
    fn object_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: &[Value],
        block: Option<&RawNode>,
    ) -> Eval<Option<Value>> {
        Ok(Some(match (name, args) {
            ("==" | "eql?" | "equal?", [other]) => Value::Bool(receiver == other),
            ("!", []) => Value::Bool(!receiver.truthy()),
            ("===", [other]) => Value::Bool(self.case_eq(receiver, other)?),
            ("nil?", []) => Value::Bool(*receiver == Value::Nil),
            ("to_s", []) => Value::Str(receiver.to_text()),
            ("inspect", []) => Value::Str(receiver.inspect()),
            ("class", []) => Value::Class(receiver.class_name()),
            ("is_a?" | "kind_of?", [Value::Class(class)]) => Value::Bool(value_is_a(receiver, class)),
            ("instance_of?", [Value::Class(class)]) => Value::Bool(receiver.class_name() == *class),
            ("frozen?", []) => Value::Bool(!matches!(
                receiver,
                Value::Str(_) | Value::Array(_) | Value::Hash(_)
            )),
            ("freeze" | "itself", []) => receiver.clone(),
            ("dup" | "clone", []) => match receiver {
                Value::Array(items) => Value::array(items.borrow().clone()),
                Value::Hash(pairs) => Value::hash(pairs.borrow().clone()),
                other => other.clone(),
            },
            ("tap", []) if block.is_some() => {
                self.call_block(require_block(block, "tap")?, vec![receiver.clone()])?;
                receiver.clone()
            }
            ("then" | "yield_self", []) if block.is_some() => {
                self.call_block(require_block(block, name)?, vec![receiver.clone()])?
            }
            ("send" | "public_send" | "__send__", [Value::Symbol(method) | Value::Str(method), rest @ ..]) => {
                self.call_method(receiver.clone(), method, rest.to_vec(), block)?
            }
            ("respond_to?", [Value::Symbol(_) | Value::Str(_)]) => {
                return Err(EvaluatorError::unsupported("respond_to?").into())
            }
            _ => return Ok(None),
        }))
    }

    fn integer_method(
        &mut self,
        n: i64,
        name: &str,
        args: &[Value],
        block: Option<&RawNode>,
    ) -> Eval<Option<Value>> {
        if let [rhs] = args {
            if let Some(value) = numeric_binop(&Value::Integer(n), name, rhs)? {
                return Ok(Some(value));
            }
        }
        let overflow = || -> Unwind {
            EvaluatorError::Overflow {
                operation: format!("{name} of {n}"),
            }
            .into()
        };
        Ok(Some(match (name, args) {
            ("-@", []) => Value::Integer(n.checked_neg().ok_or_else(overflow)?),
            ("+@" | "to_i" | "to_int" | "floor" | "ceil" | "round" | "truncate", []) => Value::Integer(n),
            ("~", []) => Value::Integer(!n),
            ("abs" | "magnitude", []) => Value::Integer(n.checked_abs().ok_or_else(overflow)?),
            ("succ" | "next", []) => Value::Integer(n.checked_add(1).ok_or_else(overflow)?),
            ("pred", []) => Value::Integer(n.checked_sub(1).ok_or_else(overflow)?),
            ("zero?", []) => Value::Bool(n == 0),
            ("positive?", []) => Value::Bool(n > 0),
            ("negative?", []) => Value::Bool(n < 0),
            ("even?", []) => Value::Bool(n % 2 == 0),
            ("odd?", []) => Value::Bool(n % 2 != 0),
            ("integer?" | "finite?", []) => Value::Bool(true),
            ("to_f", []) => Value::Float(n as f64),
            ("to_s" | "inspect", [Value::Integer(base)]) if (2..=36).contains(base) => {
                Value::Str(to_radix(n, *base as u32))
            }
            ("chr", []) => u8::try_from(n)
                .map(|byte| Value::str(char::from(byte).to_string()))
                .map_err(|_| raise("RangeError", format!("{n} out of char range")))?,
            ("digits", []) if n >= 0 => {
                let digits = n.to_string().chars().rev().filter_map(|c| c.to_digit(10)).map(|d| Value::Integer(d as i64)).collect();
                Value::array(digits)
            }
            ("between?", [low, high]) => Value::Bool(
                self.call_method(Value::Integer(n), ">=", vec![low.clone()], None)?.truthy()
                    && self.call_method(Value::Integer(n), "<=", vec![high.clone()], None)?.truthy(),
            ),
            ("clamp", [Value::Integer(low), Value::Integer(high)]) => Value::Integer(n.clamp(*low, (*high).max(*low))),
            ("times", []) => {
                let block = require_block(block, "times")?;
                for i in 0..n {
                    self.call_block(block, vec![Value::Integer(i)])?;
                }
                Value::Integer(n)
            }
            ("upto", [Value::Integer(limit)]) => {
                let block = require_block(block, "upto")?;
                for i in n..=*limit {
                    self.call_block(block, vec![Value::Integer(i)])?;
                }
                Value::Integer(n)
            }
            ("downto", [Value::Integer(limit)]) => {
                let block = require_block(block, "downto")?;
                for i in (*limit..=n).rev() {
                    self.call_block(block, vec![Value::Integer(i)])?;
                }
                Value::Integer(n)
            }
            _ => return Ok(None),
        }))
    }

    fn string_method(
        &mut self,
        text: &str,
        name: &str,
        args: &[Value],
        block: Option<&RawNode>,
    ) -> Eval<Option<Value>> {
        let length = text.chars().count();
        Ok(Some(match (name, args) {
            ("+", [Value::Str(other)]) => Value::Str(format!("{text}{other}")),
            ("+", [other]) => {
                return Err(raise(
                    "TypeError",
                    format!("no implicit conversion of {} into String", other.class_name()),
                ))
            }
            ("concat" | "<<", [other]) => Value::Str(format!("{text}{}", other.to_text())),
            ("*", [Value::Integer(times)]) => match usize::try_from(*times) {
                Ok(times) => Value::Str(text.repeat(times)),
                Err(_) => return Err(raise("ArgumentError", "negative argument")),
            },
            ("%", [Value::Array(items)]) => {
                let items = items.borrow().clone();
                Value::Str(format_string(text, &items)?)
            }
            ("%", [arg]) => Value::Str(format_string(text, std::slice::from_ref(arg))?),
            ("<" | ">" | "<=" | ">=", [Value::Str(other)]) => {
                let ordering = text.cmp(other.as_str());
                Value::Bool(match name {
                    "<" => ordering.is_lt(),
                    ">" => ordering.is_gt(),
                    "<=" => ordering.is_le(),
                    _ => ordering.is_ge(),
                })
            }
            ("<" | ">" | "<=" | ">=", [other]) => {
                return Err(raise(
                    "ArgumentError",
                    format!("comparison of String with {} failed", other.class_name()),
                ))
            }
            ("<=>", [Value::Str(other)]) => Value::Integer(text.cmp(other.as_str()) as i64),
            ("<=>", [_]) => Value::Nil,
            ("=~", [Value::Regexp(pattern)]) => regex_position(pattern, text),
            ("match?", [Value::Regexp(pattern)]) => Value::Bool(pattern.regex.is_match(text)),
            ("match?", [Value::Str(other)]) => Value::Bool(text.contains(other.as_str())),
            ("length" | "size", []) => Value::Integer(length as i64),
            ("bytesize", []) => Value::Integer(text.len() as i64),
            ("empty?", []) => Value::Bool(text.is_empty()),
            ("upcase", []) => Value::str(text.to_uppercase()),
            ("downcase", []) => Value::str(text.to_lowercase()),
            ("capitalize", []) => {
                let mut chars = text.chars();
                Value::Str(match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                    None => String::new(),
                })
            }
            ("swapcase", []) => Value::Str(
                text.chars()
                    .flat_map(|c| -> Vec<char> {
                        if c.is_uppercase() {
                            c.to_lowercase().collect()
                        } else {
                            c.to_uppercase().collect()
                        }
                    })
                    .collect(),
            ),
            ("reverse", []) => Value::Str(text.chars().rev().collect()),
            ("strip", []) => Value::str(text.trim()),
            ("lstrip", []) => Value::str(text.trim_start()),
            ("rstrip", []) => Value::str(text.trim_end()),
            ("chomp", []) => Value::str(
                text.strip_suffix("\r\n")
                    .or_else(|| text.strip_suffix('\n'))
                    .or_else(|| text.strip_suffix('\r'))
                    .unwrap_or(text),
            ),
            ("chop", []) => {
                let mut chars = text.chars();
                chars.next_back();
                Value::str(chars.as_str())
            }
            ("chars", []) => Value::array(text.chars().map(|c| Value::Str(c.to_string())).collect()),
            ("bytes", []) => Value::array(text.bytes().map(|b| Value::Integer(b as i64)).collect()),
            ("lines", []) => Value::array(text.split_inclusive('\n').map(Value::str).collect()),
            ("ord", []) => match text.chars().next() {
                Some(c) => Value::Integer(c as i64),
                None => return Err(raise("ArgumentError", "empty string")),
            },
            ("include?", [Value::Str(other)]) => Value::Bool(text.contains(other.as_str())),
            ("start_with?", prefixes) if !prefixes.is_empty() => Value::Bool(
                prefixes
                    .iter()
                    .any(|prefix| matches!(prefix, Value::Str(p) if text.starts_with(p.as_str()))),
            ),
            ("end_with?", suffixes) if !suffixes.is_empty() => Value::Bool(
                suffixes
                    .iter()
                    .any(|suffix| matches!(suffix, Value::Str(s) if text.ends_with(s.as_str()))),
            ),
            ("index", [Value::Str(other)]) => text
                .find(other.as_str())
                .map(|byte| Value::Integer(text[..byte].chars().count() as i64))
                .unwrap_or(Value::Nil),
            ("index", [Value::Regexp(pattern)]) => regex_position(pattern, text),
            ("casecmp?", [Value::Str(other)]) => Value::Bool(text.to_lowercase() == other.to_lowercase()),
            ("delete", [Value::Str(chars)]) => Value::Str(text.chars().filter(|c| !chars.contains(*c)).collect()),
            ("count", [Value::Str(chars)]) => {
                Value::Integer(text.chars().filter(|c| chars.contains(*c)).count() as i64)
            }
            ("to_sym" | "intern", []) => Value::Symbol(text.to_string()),
            ("to_str", []) => Value::str(text),
            ("to_i", []) => Value::Integer(leading_integer(text)),
            ("to_f", []) => Value::Float(leading_float(text)),
            ("[]" | "slice", [Value::Integer(index)]) => super::collections::normalize_index(*index, length)
                .and_then(|index| text.chars().nth(index))
                .map(|c| Value::Str(c.to_string()))
                .unwrap_or(Value::Nil),
            ("[]" | "slice", [Value::Integer(start), Value::Integer(count)]) => {
                super::collections::slice_bounds(*start, *count, length)
                    .map(|(start, count)| Value::Str(text.chars().skip(start).take(count).collect()))
                    .unwrap_or(Value::Nil)
            }
            ("[]" | "slice", [Value::Range { start, end, exclusive }]) => {
                super::collections::range_bounds(*start, *end, *exclusive, length)
                    .map(|(start, count)| Value::Str(text.chars().skip(start).take(count).collect()))
                    .unwrap_or(Value::Nil)
            }
            ("[]" | "slice", [Value::Str(other)]) => {
                if text.contains(other.as_str()) {
                    Value::str(other.as_str())
                } else {
                    Value::Nil
                }
            }
            ("split", []) => Value::array(text.split_whitespace().map(Value::str).collect()),
            ("split", [Value::Str(separator)]) if separator == " " => {
                Value::array(text.split_whitespace().map(Value::str).collect())
            }
            ("split", [Value::Str(separator)]) => {
                let parts: Vec<&str> = if separator.is_empty() {
                    text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect()
                } else {
                    text.split(separator.as_str()).collect()
                };
                Value::array(trim_trailing_empty(parts).into_iter().map(Value::str).collect())
            }
            ("split", [Value::Regexp(pattern)]) => {
                let parts: Vec<&str> = pattern.regex.split(text).collect();
                Value::array(trim_trailing_empty(parts).into_iter().map(Value::str).collect())
            }
            ("sub" | "gsub", [pattern, Value::Str(replacement)]) => {
                Value::Str(substitute(text, pattern, replacement, name == "gsub")?)
            }
            ("center" | "ljust" | "rjust", [Value::Integer(width)]) => {
                Value::Str(justify(text, name, *width, " "))
            }
            ("center" | "ljust" | "rjust", [Value::Integer(width), Value::Str(pad)]) if !pad.is_empty() => {
                Value::Str(justify(text, name, *width, pad))
            }
            ("each_char", []) => {
                let block = require_block(block, "each_char")?;
                for c in text.chars() {
                    self.call_block(block, vec![Value::Str(c.to_string())])?;
                }
                Value::str(text)
            }
            _ => return Ok(None),
        }))
    }
}

fn puts_lines(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            let items = items.borrow();
            if items.is_empty() {
                out.push('\n');
            }
            for item in items.iter() {
                puts_lines(item, out);
            }
        }
        other => {
            let text = other.to_text();
            out.push_str(&text);
            if !text.ends_with('\n') {
                out.push('\n');
            }
        }
    }
}

fn to_integer_strict(value: &Value) -> Eval<i64> {
    match value {
        Value::Integer(n) => Ok(*n),
        Value::Float(x) => float_to_integer(*x),
        Value::Str(text) => parse_integer(text.trim()).ok_or_else(|| {
            raise(
                "ArgumentError",
                format!("invalid value for Integer(): {}", value.inspect()),
            )
        }),
        Value::Nil => Err(raise("TypeError", "can't convert nil into Integer")),
        other => Err(raise(
            "TypeError",
            format!("can't convert {} into Integer", other.class_name()),
        )),
    }
}

fn float_to_integer(x: f64) -> Eval<i64> {
    if !x.is_finite() {
        return Err(raise("FloatDomainError", Value::Float(x).inspect()));
    }
    let truncated = x.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(EvaluatorError::Overflow {
            operation: format!("conversion of {x}"),
        }
        .into());
    }
    Ok(truncated as i64)
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

const NUMERIC_OPERATORS: &[&str] = &[
    "+", "-", "*", "/", "%", "**", "<", ">", "<=", ">=", "<=>", "div", "modulo", "fdiv", "pow",
    "divmod",
];

/// Arithmetic and comparison between numbers. `Ok(None)` when `op` is not
/// a numeric operator for these operand types.
pub(super) fn numeric_binop(left: &Value, op: &str, right: &Value) -> Eval<Option<Value>> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => integer_binop(*a, op, *b),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            match (as_float(left), as_float(right)) {
                (Some(a), Some(b)) => float_binop(a, op, b),
                _ => Ok(None),
            }
        }
        _ if !NUMERIC_OPERATORS.contains(&op) => Ok(None),
        _ if op == "<=>" => Ok(Some(Value::Nil)),
        _ if matches!(op, "<" | ">" | "<=" | ">=") => Err(raise(
            "ArgumentError",
            format!(
                "comparison of {} with {} failed",
                left.class_name(),
                right.class_name()
            ),
        )),
        _ => {
            let operand = match right {
                Value::Nil => "nil".to_string(),
                other => other.class_name(),
            };
            Err(raise(
                "TypeError",
                format!("{operand} can't be coerced into {}", left.class_name()),
            ))
        }
    }
}

fn floor_div(a: i64, b: i64) -> Eval<i64> {
    if b == 0 {
        return Err(EvaluatorError::DivisionByZero.into());
    }
    let quotient = a.checked_div(b).ok_or_else(|| -> Unwind {
        EvaluatorError::Overflow {
            operation: format!("{a} / {b}"),
        }
        .into()
    })?;
    Ok(if a % b != 0 && ((a < 0) != (b < 0)) {
        quotient - 1
    } else {
        quotient
    })
}

fn floor_mod(a: i64, b: i64) -> Eval<i64> {
    if b == 0 {
        return Err(EvaluatorError::DivisionByZero.into());
    }
    let remainder = a.checked_rem(b).unwrap_or(0);
    Ok(if remainder != 0 && ((remainder < 0) != (b < 0)) {
        remainder + b
    } else {
        remainder
    })
}

fn integer_binop(a: i64, op: &str, b: i64) -> Eval<Option<Value>> {
    let overflow = || -> Unwind {
        EvaluatorError::Overflow {
            operation: format!("{a} {op} {b}"),
        }
        .into()
    };
    let shift_left = |amount: i64| -> Eval<i64> {
        if amount >= 64 {
            return if a == 0 { Ok(0) } else { Err(overflow()) };
        }
        i64::try_from((a as i128) << amount).map_err(|_| overflow())
    };
    let shift_right = |amount: i64| a >> amount.min(63);
    Ok(Some(match op {
        "+" => Value::Integer(a.checked_add(b).ok_or_else(overflow)?),
        "-" => Value::Integer(a.checked_sub(b).ok_or_else(overflow)?),
        "*" => Value::Integer(a.checked_mul(b).ok_or_else(overflow)?),
        "/" | "div" => Value::Integer(floor_div(a, b)?),
        "%" | "modulo" => Value::Integer(floor_mod(a, b)?),
        "divmod" => Value::array(vec![
            Value::Integer(floor_div(a, b)?),
            Value::Integer(floor_mod(a, b)?),
        ]),
        "fdiv" => Value::Float(a as f64 / b as f64),
        "**" | "pow" => match u32::try_from(b) {
            Ok(exponent) => Value::Integer(a.checked_pow(exponent).ok_or_else(overflow)?),
            Err(_) if b < 0 => Value::Float((a as f64).powf(b as f64)),
            Err(_) => return Err(overflow()),
        },
        "<" => Value::Bool(a < b),
        ">" => Value::Bool(a > b),
        "<=" => Value::Bool(a <= b),
        ">=" => Value::Bool(a >= b),
        "<=>" => Value::Integer(a.cmp(&b) as i64),
        "&" => Value::Integer(a & b),
        "|" => Value::Integer(a | b),
        "^" => Value::Integer(a ^ b),
        "<<" if b >= 0 => Value::Integer(shift_left(b)?),
        "<<" => Value::Integer(shift_right(b.saturating_neg())),
        ">>" if b >= 0 => Value::Integer(shift_right(b)),
        ">>" => Value::Integer(shift_left(b.saturating_neg())?),
        _ => return Ok(None),
    }))
}

fn float_binop(a: f64, op: &str, b: f64) -> Eval<Option<Value>> {
    Ok(Some(match op {
        "+" => Value::Float(a + b),
        "-" => Value::Float(a - b),
        "*" => Value::Float(a * b),
        "/" | "fdiv" => Value::Float(a / b),
        "%" | "modulo" => {
            let remainder = a % b;
            Value::Float(if remainder != 0.0 && ((remainder < 0.0) != (b < 0.0)) {
                remainder + b
            } else {
                remainder
            })
        }
        "**" | "pow" => Value::Float(a.powf(b)),
        "div" => Value::Integer(float_to_integer((a / b).floor())?),
        "<" => Value::Bool(a < b),
        ">" => Value::Bool(a > b),
        "<=" => Value::Bool(a <= b),
        ">=" => Value::Bool(a >= b),
        "<=>" => a
            .partial_cmp(&b)
            .map(|ordering| Value::Integer(ordering as i64))
            .unwrap_or(Value::Nil),
        _ => return Ok(None),
    }))
}

fn float_method(x: f64, name: &str, args: &[Value]) -> Eval<Option<Value>> {
    if let [rhs] = args {
        if let Some(value) = numeric_binop(&Value::Float(x), name, rhs)? {
            return Ok(Some(value));
        }
    }
    Ok(Some(match (name, args) {
        ("-@", []) => Value::Float(-x),
        ("+@" | "to_f", []) => Value::Float(x),
        ("abs" | "magnitude", []) => Value::Float(x.abs()),
        ("to_i" | "to_int" | "truncate", []) => Value::Integer(float_to_integer(x)?),
        ("floor", []) => Value::Integer(float_to_integer(x.floor())?),
        ("ceil", []) => Value::Integer(float_to_integer(x.ceil())?),
        ("round", []) => Value::Integer(float_to_integer(x.round())?),
        ("round", [Value::Integer(digits)]) => {
            let scale = 10f64.powi(i32::try_from(*digits).unwrap_or(0));
            Value::Float((x * scale).round() / scale)
        }
        ("nan?", []) => Value::Bool(x.is_nan()),
        ("finite?", []) => Value::Bool(x.is_finite()),
        ("infinite?", []) => match x {
            x if x == f64::INFINITY => Value::Integer(1),
            x if x == f64::NEG_INFINITY => Value::Integer(-1),
            _ => Value::Nil,
        },
        ("zero?", []) => Value::Bool(x == 0.0),
        ("positive?", []) => Value::Bool(x > 0.0),
        ("negative?", []) => Value::Bool(x < 0.0),
        ("integer?", []) => Value::Bool(false),
        _ => return Ok(None),
    }))
}

fn symbol_method(symbol: &str, name: &str, args: &[Value]) -> Option<Value> {
    Some(match (name, args) {
        ("to_s" | "id2name" | "name", []) => Value::str(symbol),
        ("to_sym", []) => Value::Symbol(symbol.to_string()),
        ("length" | "size", []) => Value::Integer(symbol.chars().count() as i64),
        ("upcase", []) => Value::Symbol(symbol.to_uppercase()),
        ("downcase", []) => Value::Symbol(symbol.to_lowercase()),
        ("<=>", [Value::Symbol(other)]) => Value::Integer(symbol.cmp(other.as_str()) as i64),
        _ => return None,
    })
}

fn regexp_method(pattern: &Pattern, name: &str, args: &[Value]) -> Option<Value> {
    Some(match (name, args) {
        ("match?", [Value::Str(text)]) => Value::Bool(pattern.regex.is_match(text)),
        ("=~", [Value::Str(text)]) => regex_position(pattern, text),
        ("source", []) => Value::str(pattern.source.as_str()),
        _ => return None,
    })
}

fn exception_method(class: &str, message: &str, name: &str, args: &[Value]) -> Option<Value> {
    Some(match (name, args) {
        ("message", []) => Value::str(message),
        ("full_message", []) => Value::Str(format!("{message} ({class})")),
        ("backtrace" | "cause", []) => Value::Nil,
        ("exception", []) => Value::exception(class, message),
        ("exception", [message]) => Value::exception(class, message.to_text()),
        _ => return None,
    })
}

fn class_method(class: &str, name: &str, args: &[Value]) -> Eval<Option<Value>> {
    Ok(Some(match (name, args) {
        ("new" | "exception", []) if class_is_a(class, "Exception") => Value::exception(class, class),
        ("new" | "exception", [message]) if class_is_a(class, "Exception") => {
            Value::exception(class, message.to_text())
        }
        ("new", []) if class == "Array" => Value::array(Vec::new()),
        ("new", [Value::Integer(count)]) if class == "Array" => {
            Value::array(vec![Value::Nil; usize::try_from(*count).unwrap_or(0)])
        }
        ("new", [Value::Integer(count), fill]) if class == "Array" => {
            Value::array(vec![fill.clone(); usize::try_from(*count).unwrap_or(0)])
        }
        ("new", []) if class == "Hash" => Value::hash(Vec::new()),
        ("new", []) if class == "String" => Value::str(""),
        ("new", [Value::Str(text)]) if class == "String" => Value::str(text.as_str()),
        ("new", _) => {
            return Err(EvaluatorError::unsupported(format!("{class}.new")).into());
        }
        ("name", []) => Value::str(class),
        ("superclass", []) => superclass(class)
            .map(|parent| Value::Class(parent.to_string()))
            .unwrap_or(Value::Nil),
        ("<", [Value::Class(other)]) => Value::Bool(class != other && class_is_a(class, other)),
        ("<=", [Value::Class(other)]) => Value::Bool(class_is_a(class, other)),
        _ => return Ok(None),
    }))
}

fn regex_position(pattern: &Pattern, text: &str) -> Value {
    pattern
        .regex
        .find(text)
        .map(|found| Value::Integer(text[..found.start()].chars().count() as i64))
        .unwrap_or(Value::Nil)
}

/// Ruby-style replacement (`\1`, `\0`) to the `regex` crate's syntax
fn replacement_template(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    chars.next();
                    out.push_str(&format!("${{{d}}}"));
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    out
}

fn substitute(text: &str, pattern: &Value, replacement: &str, global: bool) -> Eval<String> {
    match pattern {
        Value::Str(needle) if global => Ok(text.replace(needle.as_str(), replacement)),
        Value::Str(needle) => Ok(text.replacen(needle.as_str(), replacement, 1)),
        Value::Regexp(pattern) => {
            let template = replacement_template(replacement);
            Ok(if global {
                pattern.regex.replace_all(text, template.as_str()).into_owned()
            } else {
                pattern.regex.replace(text, template.as_str()).into_owned()
            })
        }
        other => Err(raise(
            "TypeError",
            format!("wrong argument type {} (expected Regexp)", other.class_name()),
        )),
    }
}

fn trim_trailing_empty(mut parts: Vec<&str>) -> Vec<&str> {
    while parts.last().is_some_and(|part| part.is_empty()) {
        parts.pop();
    }
    parts
}

fn justify(text: &str, how: &str, width: i64, pad: &str) -> String {
    let length = text.chars().count();
    let width = usize::try_from(width).unwrap_or(0);
    if width <= length {
        return text.to_string();
    }
    let fill = |n: usize| -> String { pad.chars().cycle().take(n).collect() };
    let total = width - length;
    match how {
        "ljust" => format!("{text}{}", fill(total)),
        "rjust" => format!("{}{text}", fill(total)),
        _ => {
            let left = total / 2;
            format!("{}{text}{}", fill(left), fill(total - left))
        }
    }
}

fn to_radix(n: i64, base: u32) -> String {
    let mut magnitude = n.unsigned_abs();
    if magnitude == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while magnitude > 0 {
        let digit = (magnitude % base as u64) as u32;
        digits.push(char::from_digit(digit, base).unwrap_or('?'));
        magnitude /= base as u64;
    }
    if n < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

fn leading_integer(text: &str) -> i64 {
    let text = text.trim_start();
    let mut end = 0;
    for (i, c) in text.char_indices() {
        let sign = i == 0 && (c == '-' || c == '+');
        if c.is_ascii_digit() || sign || (c == '_' && i > 0) {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    text[..end].replace('_', "").parse().unwrap_or(0)
}

fn leading_float(text: &str) -> f64 {
    let text = text.trim_start();
    let candidate: String = text
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E' | '_'))
        .filter(|c| *c != '_')
        .collect();
    (1..=candidate.len())
        .rev()
        .find_map(|end| candidate[..end].parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// `format`/`String#%` for the common directives
pub(super) fn format_string(template: &str, args: &[Value]) -> Eval<String> {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut flags = String::new();
        while let Some(&flag) = chars.peek() {
            if !"-0+ ".contains(flag) {
                break;
            }
            flags.push(flag);
            chars.next();
        }
        let mut width = String::new();
        while let Some(&digit) = chars.peek().filter(|c| c.is_ascii_digit()) {
            width.push(digit);
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(&digit) = chars.peek().filter(|c| c.is_ascii_digit()) {
                digits.push(digit);
                chars.next();
            }
            precision = Some(digits.parse::<usize>().unwrap_or(0));
        }
        let Some(directive) = chars.next() else {
            out.push('%');
            break;
        };
        if directive == '%' {
            out.push('%');
            continue;
        }
        let arg = args
            .next()
            .ok_or_else(|| raise("ArgumentError", "too few arguments"))?;
        let signed = |body: String, negative: bool| -> String {
            if negative {
                format!("-{body}")
            } else if flags.contains('+') {
                format!("+{body}")
            } else if flags.contains(' ') {
                format!(" {body}")
            } else {
                body
            }
        };
        let (body, numeric) = match directive {
            'd' | 'i' | 'u' => {
                let n = to_integer_strict(arg)?;
                (signed(n.unsigned_abs().to_string(), n < 0), true)
            }
            'x' | 'X' | 'o' | 'b' => {
                let n = to_integer_strict(arg)?;
                let base = match directive {
                    'x' | 'X' => 16,
                    'o' => 8,
                    _ => 2,
                };
                let digits = to_radix(n.unsigned_abs() as i64 & i64::MAX, base);
                let digits = if directive == 'X' { digits.to_uppercase() } else { digits };
                (signed(digits, n < 0), true)
            }
            'f' => {
                let x = match arg {
                    Value::Str(text) => leading_float(text),
                    other => as_float(other).ok_or_else(|| {
                        raise(
                            "TypeError",
                            format!("can't convert {} into Float", other.class_name()),
                        )
                    })?,
                };
                let body = format!("{:.*}", precision.unwrap_or(6), x.abs());
                (signed(body, x.is_sign_negative() && x != 0.0), true)
            }
            's' => {
                let text = arg.to_text();
                let text = match precision {
                    Some(limit) => text.chars().take(limit).collect(),
                    None => text,
                };
                (text, false)
            }
            'p' => (arg.inspect(), false),
            other => {
                return Err(EvaluatorError::unsupported(format!("format directive %{other}")).into())
            }
        };
        let width = width.parse::<usize>().unwrap_or(0);
        let length = body.chars().count();
        if length >= width {
            out.push_str(&body);
        } else if flags.contains('-') {
            out.push_str(&body);
            out.push_str(&" ".repeat(width - length));
        } else if flags.contains('0') && numeric {
            let (sign, digits) = match body.chars().next() {
                Some(sign @ ('-' | '+' | ' ')) => (sign.to_string(), &body[1..]),
                _ => (String::new(), body.as_str()),
            };
            out.push_str(&sign);
            out.push_str(&"0".repeat(width - length));
            out.push_str(digits);
        } else {
            out.push_str(&" ".repeat(width - length));
            out.push_str(&body);
        }
    }
    Ok(out)
}
