use std::{cell::RefCell, fmt, rc::Rc, sync::Arc};

use regex::Regex;

use crate::registry::CounterArray;

/// Runtime values of the reference evaluator
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Str(String),
    Symbol(String),
    Array(Rc<RefCell<Vec<Value>>>),
    /// Insertion-ordered pairs
    Hash(Rc<RefCell<Vec<(Value, Value)>>>),
    Range {
        start: i64,
        end: i64,
        exclusive: bool,
    },
    Regexp(Pattern),
    Exception {
        class: String,
        message: String,
    },
    Class(String),
    /// The top-level `self`
    Main,
    /// The counter global: indexed by unit id
    CounterTable,
    /// One unit's counters: indexed by tracker id
    Counters(Arc<CounterArray>),
}

/// A compiled regular expression together with its Ruby source
#[derive(Debug, Clone)]
pub struct Pattern {
    pub source: String,
    pub regex: Regex,
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn hash(pairs: Vec<(Value, Value)>) -> Self {
        Value::Hash(Rc::new(RefCell::new(pairs)))
    }

    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    pub fn exception(class: impl Into<String>, message: impl Into<String>) -> Self {
        Value::Exception {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Only `nil` and `false` are falsy
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn class_name(&self) -> String {
        match self {
            Value::Nil => "NilClass".into(),
            Value::Bool(true) => "TrueClass".into(),
            Value::Bool(false) => "FalseClass".into(),
            Value::Integer(_) => "Integer".into(),
            Value::Float(_) => "Float".into(),
            Value::Str(_) => "String".into(),
            Value::Symbol(_) => "Symbol".into(),
            Value::Array(_) | Value::Counters(_) => "Array".into(),
            Value::Hash(_) | Value::CounterTable => "Hash".into(),
            Value::Range { .. } => "Range".into(),
            Value::Regexp(_) => "Regexp".into(),
            Value::Exception { class, .. } => class.clone(),
            Value::Class(_) => "Class".into(),
            Value::Main => "Object".into(),
        }
    }

    /// `to_s`
    pub fn to_text(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::Str(text) => text.clone(),
            Value::Symbol(name) => name.clone(),
            Value::Exception { message, .. } => message.clone(),
            Value::Class(name) => name.clone(),
            Value::Main => "main".into(),
            other => other.inspect(),
        }
    }

    /// `inspect`
    pub fn inspect(&self) -> String {
        match self {
            Value::Nil => "nil".into(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(text) => inspect_str(text),
            Value::Symbol(name) => format!(":{name}"),
            Value::Array(items) => {
                let items: Vec<_> = items.borrow().iter().map(Value::inspect).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Hash(pairs) => {
                if pairs.borrow().is_empty() {
                    return "{}".into();
                }
                let pairs: Vec<_> = pairs
                    .borrow()
                    .iter()
                    .map(|(key, value)| match key {
                        Value::Symbol(name) => format!("{name}: {}", value.inspect()),
                        key => format!("{} => {}", key.inspect(), value.inspect()),
                    })
                    .collect();
                format!("{{{}}}", pairs.join(", "))
            }
            Value::Range {
                start,
                end,
                exclusive,
            } => format!("{start}{}{end}", if *exclusive { "..." } else { ".." }),
            Value::Regexp(pattern) => format!("/{}/", pattern.source),
            Value::Exception { class, message } => format!("#<{class}: {message}>"),
            Value::Class(name) => name.clone(),
            Value::Main => "main".into(),
            Value::CounterTable => "{...}".into(),
            Value::Counters(counters) => Value::array(
                counters.snapshot().into_iter().map(|n| Value::Integer(n as i64)).collect(),
            )
            .inspect(),
        }
    }

    /// Values of a range as a vector
    pub fn range_values(start: i64, end: i64, exclusive: bool) -> Vec<Value> {
        let end = if exclusive { end } else { end.saturating_add(1) };
        (start..end).map(Value::Integer).collect()
    }

    /// Elements when iterated: arrays, ranges, hashes as pairs, counters
    pub fn elements(&self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items.borrow().clone()),
            Value::Range {
                start,
                end,
                exclusive,
            } => Some(Value::range_values(*start, *end, *exclusive)),
            Value::Hash(pairs) => Some(
                pairs
                    .borrow()
                    .iter()
                    .map(|(k, v)| Value::array(vec![k.clone(), v.clone()]))
                    .collect(),
            ),
            Value::Counters(counters) => Some(
                counters
                    .snapshot()
                    .into_iter()
                    .map(|n| Value::Integer(n as i64))
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::Main, Value::Main) => true,
            (Value::CounterTable, Value::CounterTable) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) | (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => *a.borrow() == *b.borrow(),
            (Value::Hash(a), Value::Hash(b)) => *a.borrow() == *b.borrow(),
            (
                Value::Range {
                    start: s1,
                    end: e1,
                    exclusive: x1,
                },
                Value::Range {
                    start: s2,
                    end: e2,
                    exclusive: x2,
                },
            ) => s1 == s2 && e1 == e2 && x1 == x2,
            (Value::Regexp(a), Value::Regexp(b)) => a.source == b.source,
            (
                Value::Exception {
                    class: c1,
                    message: m1,
                },
                Value::Exception {
                    class: c2,
                    message: m2,
                },
            ) => c1 == c2 && m1 == m2,
            (Value::Counters(a), Value::Counters(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".into()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.into()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

fn inspect_str(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{1b}' => out.push_str("\\e"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
