// Array, Hash, Range and the Enumerable methods they share
use std::{cell::RefCell, cmp::Ordering, rc::Rc};

use super::{
    builtins::{raise, require_block},
    errors::EvaluatorError,
    insert_pair, Eval, Evaluator, Value,
};
use crate::parser::RawNode;

type Items = Rc<RefCell<Vec<Value>>>;
type Pairs = Rc<RefCell<Vec<(Value, Value)>>>;

/// Enumerable methods that need a block; without one Ruby would hand back
/// an enumerator
const BLOCK_ITERATORS: &[&str] = &[
    "each", "each_with_index", "each_with_object", "map", "collect", "flat_map", "select",
    "filter", "reject", "filter_map", "find", "detect", "min_by", "max_by", "sort_by", "partition",
    "group_by", "each_slice", "take_while", "drop_while",
];

/// Position for a possibly negative index into `len` elements
pub(super) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let index = if index < 0 { index + len as i64 } else { index };
    usize::try_from(index).ok().filter(|index| *index < len)
}

/// `(start, count)` for `[start, count]` slicing; `None` gives `nil`
pub(super) fn slice_bounds(start: i64, count: i64, len: usize) -> Option<(usize, usize)> {
    let start = if start < 0 { start + len as i64 } else { start };
    let start = usize::try_from(start).ok().filter(|start| *start <= len)?;
    let count = usize::try_from(count).ok()?;
    Some((start, count.min(len - start)))
}

/// `(start, count)` for range slicing
pub(super) fn range_bounds(start: i64, end: i64, exclusive: bool, len: usize) -> Option<(usize, usize)> {
    let first = if start < 0 { start + len as i64 } else { start };
    let first = usize::try_from(first).ok().filter(|first| *first <= len)?;
    let last = if end < 0 { end + len as i64 } else { end };
    let stop = if exclusive { last } else { last + 1 };
    let count = usize::try_from(stop - first as i64).unwrap_or(0);
    Some((first, count.min(len - first)))
}

/// Ordering used by `sort`, `min` and `max`
pub(super) fn compare(a: &Value, b: &Value) -> Eval<Ordering> {
    let failed = || {
        raise(
            "ArgumentError",
            format!("comparison of {} with {} failed", a.class_name(), b.class_name()),
        )
    };
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(x.cmp(y)),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            let as_float = |v: &Value| match v {
                Value::Integer(n) => *n as f64,
                Value::Float(x) => *x,
                _ => f64::NAN,
            };
            as_float(a).partial_cmp(&as_float(b)).ok_or_else(failed)
        }
        (Value::Str(x), Value::Str(y)) | (Value::Symbol(x), Value::Symbol(y)) => Ok(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            for (p, q) in x.iter().zip(y.iter()) {
                let ordering = compare(p, q)?;
                if ordering != Ordering::Equal {
                    return Ok(ordering);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Err(failed()),
    }
}

fn sort_values(values: &mut [Value]) -> Eval<()> {
    let mut failure = None;
    values.sort_by(|a, b| {
        compare(a, b).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    failure.map_or(Ok(()), Err)
}

fn flatten_into(values: &[Value], out: &mut Vec<Value>) {
    for value in values {
        match value {
            Value::Array(items) => {
                let items = items.borrow().clone();
                flatten_into(&items, out);
            }
            other => out.push(other.clone()),
        }
    }
}

fn join(values: &[Value], separator: &str) -> String {
    values
        .iter()
        .map(|value| match value {
            Value::Array(items) => join(&items.borrow(), separator),
            other => other.to_text(),
        })
        .collect::<Vec<_>>()
        .join(separator)
}

fn unique(values: Vec<Value>) -> Vec<Value> {
    let mut seen: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

fn count_arg(value: &Value) -> Eval<usize> {
    match value {
        Value::Integer(n) => {
            usize::try_from(*n).map_err(|_| raise("ArgumentError", "negative array size"))
        }
        other => Err(EvaluatorError::unary_type_error("count", "Integer", &other.class_name()).into()),
    }
}

impl Evaluator {
    pub(super) fn array_method(
        &mut self,
        receiver: &Value,
        items: &Items,
        name: &str,
        args: &[Value],
        block: Option<&RawNode>,
    ) -> Eval<Option<Value>> {
        let len = items.borrow().len();
        Ok(Some(match (name, args) {
            ("[]" | "slice" | "at", [Value::Integer(index)]) => normalize_index(*index, len)
                .and_then(|index| items.borrow().get(index).cloned())
                .unwrap_or(Value::Nil),
            ("[]" | "slice", [Value::Integer(start), Value::Integer(count)]) => {
                slice_bounds(*start, *count, len)
                    .map(|(start, count)| Value::array(items.borrow()[start..start + count].to_vec()))
                    .unwrap_or(Value::Nil)
            }
            ("[]" | "slice", [Value::Range { start, end, exclusive }]) => {
                range_bounds(*start, *end, *exclusive, len)
                    .map(|(start, count)| Value::array(items.borrow()[start..start + count].to_vec()))
                    .unwrap_or(Value::Nil)
            }
            ("[]=", [Value::Integer(index), value]) => {
                let position = if *index < 0 { index + len as i64 } else { *index };
                let Ok(position) = usize::try_from(position) else {
                    return Err(raise(
                        "IndexError",
                        format!("index {index} too small for array; minimum: -{len}"),
                    ));
                };
                let mut items = items.borrow_mut();
                if position >= items.len() {
                    items.resize(position + 1, Value::Nil);
                }
                items[position] = value.clone();
                value.clone()
            }
            ("fetch", [Value::Integer(index), rest @ ..]) if rest.len() <= 1 => {
                match normalize_index(*index, len).and_then(|i| items.borrow().get(i).cloned()) {
                    Some(value) => value,
                    None => match rest.first() {
                        Some(default) => default.clone(),
                        None => return Err(EvaluatorError::IndexOutOfRange { index: *index }.into()),
                    },
                }
            }
            ("first", []) => items.borrow().first().cloned().unwrap_or(Value::Nil),
            ("last", []) => items.borrow().last().cloned().unwrap_or(Value::Nil),
            ("last", [count]) => {
                let count = count_arg(count)?.min(len);
                Value::array(items.borrow()[len - count..].to_vec())
            }
            ("length" | "size", []) => Value::Integer(len as i64),
            ("empty?", []) => Value::Bool(len == 0),
            ("push" | "append" | "<<", values) if !values.is_empty() => {
                items.borrow_mut().extend(values.iter().cloned());
                receiver.clone()
            }
            ("pop", []) => items.borrow_mut().pop().unwrap_or(Value::Nil),
            ("shift", []) => {
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    Value::Nil
                } else {
                    items.remove(0)
                }
            }
            ("unshift" | "prepend", values) => {
                let mut items = items.borrow_mut();
                for (offset, value) in values.iter().enumerate() {
                    items.insert(offset, value.clone());
                }
                drop(items);
                receiver.clone()
            }
            ("concat", [Value::Array(other)]) => {
                let other = other.borrow().clone();
                items.borrow_mut().extend(other);
                receiver.clone()
            }
            ("delete", [value]) => {
                let mut items = items.borrow_mut();
                let before = items.len();
                items.retain(|item| item != value);
                if items.len() == before {
                    Value::Nil
                } else {
                    value.clone()
                }
            }
            ("delete_at", [Value::Integer(index)]) => match normalize_index(*index, len) {
                Some(position) => items.borrow_mut().remove(position),
                None => Value::Nil,
            },
            ("clear", []) => {
                items.borrow_mut().clear();
                receiver.clone()
            }
            ("compact", []) => Value::array(
                items
                    .borrow()
                    .iter()
                    .filter(|item| **item != Value::Nil)
                    .cloned()
                    .collect(),
            ),
            ("flatten", []) => {
                let mut flat = Vec::new();
                let snapshot = items.borrow().clone();
                flatten_into(&snapshot, &mut flat);
                Value::array(flat)
            }
            ("reverse", []) => Value::array(items.borrow().iter().rev().cloned().collect()),
            ("join", []) => Value::Str(join(&items.borrow(), "")),
            ("join", [Value::Str(separator)]) => Value::Str(join(&items.borrow(), separator)),
            ("*", [Value::Str(separator)]) => Value::Str(join(&items.borrow(), separator)),
            ("*", [Value::Integer(times)]) => {
                let times = count_arg(&Value::Integer(*times))?;
                let items = items.borrow();
                Value::array((0..times).flat_map(|_| items.iter().cloned()).collect())
            }
            ("+", [Value::Array(other)]) => {
                let mut joined = items.borrow().clone();
                joined.extend(other.borrow().iter().cloned());
                Value::array(joined)
            }
            ("+", [other]) => {
                return Err(raise(
                    "TypeError",
                    format!("no implicit conversion of {} into Array", other.class_name()),
                ))
            }
            ("-", [Value::Array(other)]) => {
                let other = other.borrow().clone();
                Value::array(items.borrow().iter().filter(|item| !other.contains(item)).cloned().collect())
            }
            ("&", [Value::Array(other)]) => {
                let other = other.borrow().clone();
                let common = items.borrow().iter().filter(|item| other.contains(item)).cloned().collect();
                Value::array(unique(common))
            }
            ("|", [Value::Array(other)]) => {
                let mut union = items.borrow().clone();
                union.extend(other.borrow().iter().cloned());
                Value::array(unique(union))
            }
            ("index" | "find_index", [value]) => items
                .borrow()
                .iter()
                .position(|item| item == value)
                .map(|position| Value::Integer(position as i64))
                .unwrap_or(Value::Nil),
            ("to_a" | "entries", []) => receiver.clone(),
            ("to_h", []) => {
                let mut pairs = Vec::new();
                for item in items.borrow().iter() {
                    match item.elements().as_deref() {
                        Some([key, value]) if matches!(item, Value::Array(_)) => {
                            insert_pair(&mut pairs, key.clone(), value.clone())
                        }
                        _ => {
                            return Err(raise(
                                "TypeError",
                                format!("wrong element type {} (expected array)", item.class_name()),
                            ))
                        }
                    }
                }
                Value::hash(pairs)
            }
            ("each", []) if block.is_some() => {
                let block = require_block(block, "each")?;
                let mut index = 0;
                // the block may grow or shrink the array
                loop {
                    let item = items.borrow().get(index).cloned();
                    let Some(item) = item else { break };
                    self.call_block(block, vec![item])?;
                    index += 1;
                }
                receiver.clone()
            }
            _ => {
                let snapshot = items.borrow().clone();
                return self.enumerable_method(receiver, snapshot, name, args, block);
            }
        }))
    }

    pub(super) fn hash_method(
        &mut self,
        receiver: &Value,
        pairs: &Pairs,
        name: &str,
        args: &[Value],
        block: Option<&RawNode>,
    ) -> Eval<Option<Value>> {
        let lookup = |key: &Value| {
            pairs
                .borrow()
                .iter()
                .find(|(existing, _)| existing == key)
                .map(|(_, value)| value.clone())
        };
        Ok(Some(match (name, args) {
            ("[]", [key]) => lookup(key).unwrap_or(Value::Nil),
            ("[]=" | "store", [key, value]) => {
                insert_pair(&mut pairs.borrow_mut(), key.clone(), value.clone());
                value.clone()
            }
            ("fetch", [key]) => match lookup(key) {
                Some(value) => value,
                None => match block {
                    Some(block) => self.call_block(block, vec![key.clone()])?,
                    None => {
                        return Err(EvaluatorError::KeyNotFound { key: key.inspect() }.into())
                    }
                },
            },
            ("fetch", [key, default]) => lookup(key).unwrap_or_else(|| default.clone()),
            ("dig", [key]) => lookup(key).unwrap_or(Value::Nil),
            ("key?" | "has_key?" | "include?" | "member?", [key]) => Value::Bool(lookup(key).is_some()),
            ("value?" | "has_value?", [value]) => {
                Value::Bool(pairs.borrow().iter().any(|(_, existing)| existing == value))
            }
            ("key", [value]) => pairs
                .borrow()
                .iter()
                .find(|(_, existing)| existing == value)
                .map(|(key, _)| key.clone())
                .unwrap_or(Value::Nil),
            ("keys", []) => Value::array(pairs.borrow().iter().map(|(key, _)| key.clone()).collect()),
            ("values", []) => {
                Value::array(pairs.borrow().iter().map(|(_, value)| value.clone()).collect())
            }
            ("length" | "size", []) => Value::Integer(pairs.borrow().len() as i64),
            ("empty?", []) => Value::Bool(pairs.borrow().is_empty()),
            ("delete", [key]) => {
                let mut pairs = pairs.borrow_mut();
                match pairs.iter().position(|(existing, _)| existing == key) {
                    Some(position) => pairs.remove(position).1,
                    None => Value::Nil,
                }
            }
            ("clear", []) => {
                pairs.borrow_mut().clear();
                receiver.clone()
            }
            ("merge", [Value::Hash(other)]) => {
                let mut merged = pairs.borrow().clone();
                for (key, value) in other.borrow().iter() {
                    insert_pair(&mut merged, key.clone(), value.clone());
                }
                Value::hash(merged)
            }
            ("merge!" | "update", [Value::Hash(other)]) => {
                let other = other.borrow().clone();
                let mut pairs = pairs.borrow_mut();
                for (key, value) in other {
                    insert_pair(&mut pairs, key, value);
                }
                drop(pairs);
                receiver.clone()
            }
            ("to_h", []) => receiver.clone(),
            ("invert", []) => Value::hash(
                pairs
                    .borrow()
                    .iter()
                    .map(|(key, value)| (value.clone(), key.clone()))
                    .collect(),
            ),
            ("each" | "each_pair", []) if block.is_some() => {
                let block = require_block(block, name)?;
                let snapshot = pairs.borrow().clone();
                for (key, value) in snapshot {
                    self.call_block(block, vec![Value::array(vec![key, value])])?;
                }
                receiver.clone()
            }
            ("select" | "filter" | "reject", []) if block.is_some() => {
                let block = require_block(block, name)?;
                let keep_matches = name != "reject";
                let snapshot = pairs.borrow().clone();
                let mut kept = Vec::new();
                for (key, value) in snapshot {
                    let matched = self.call_block(block, vec![key.clone(), value.clone()])?.truthy();
                    if matched == keep_matches {
                        kept.push((key, value));
                    }
                }
                Value::hash(kept)
            }
            ("transform_values" | "transform_keys", []) if block.is_some() => {
                let block = require_block(block, name)?;
                let snapshot = pairs.borrow().clone();
                let mut transformed = Vec::new();
                for (key, value) in snapshot {
                    if name == "transform_values" {
                        let value = self.call_block(block, vec![value])?;
                        transformed.push((key, value));
                    } else {
                        let key = self.call_block(block, vec![key])?;
                        insert_pair(&mut transformed, key, value);
                    }
                }
                Value::hash(transformed)
            }
            _ => {
                let entries = receiver.elements().unwrap_or_default();
                return self.enumerable_method(receiver, entries, name, args, block);
            }
        }))
    }

    pub(super) fn range_method(
        &mut self,
        receiver: &Value,
        (start, end, exclusive): (i64, i64, bool),
        name: &str,
        args: &[Value],
        block: Option<&RawNode>,
    ) -> Eval<Option<Value>> {
        let last = if exclusive { end.saturating_sub(1) } else { end };
        Ok(Some(match (name, args) {
            ("begin", []) => Value::Integer(start),
            ("end", []) => Value::Integer(end),
            ("last", []) => Value::Integer(end),
            ("first" | "min", []) if last >= start => Value::Integer(start),
            ("max", []) if last >= start => Value::Integer(last),
            ("first" | "min" | "max", []) => Value::Nil,
            ("exclude_end?", []) => Value::Bool(exclusive),
            ("size" | "count", []) if block.is_none() => {
                Value::Integer(last.saturating_sub(start).saturating_add(1).max(0))
            }
            ("include?" | "member?" | "cover?", [value]) => {
                Value::Bool(self.case_eq(receiver, value)?)
            }
            ("to_a" | "entries", []) => Value::array(Value::range_values(start, end, exclusive)),
            ("each", []) if block.is_some() => {
                let block = require_block(block, "each")?;
                for i in start..=last {
                    self.call_block(block, vec![Value::Integer(i)])?;
                }
                receiver.clone()
            }
            ("reverse_each", []) if block.is_some() => {
                let block = require_block(block, "reverse_each")?;
                for i in (start..=last).rev() {
                    self.call_block(block, vec![Value::Integer(i)])?;
                }
                receiver.clone()
            }
            ("step", [Value::Integer(step)]) if *step > 0 => {
                let block = require_block(block, "step")?;
                let step = usize::try_from(*step).unwrap_or(usize::MAX);
                for i in (start..=last).step_by(step) {
                    self.call_block(block, vec![Value::Integer(i)])?;
                }
                receiver.clone()
            }
            _ => {
                let values = Value::range_values(start, end, exclusive);
                return self.enumerable_method(receiver, values, name, args, block);
            }
        }))
    }

    fn enumerable_method(
        &mut self,
        receiver: &Value,
        elements: Vec<Value>,
        name: &str,
        args: &[Value],
        block: Option<&RawNode>,
    ) -> Eval<Option<Value>> {
        let Some(block) = block else {
            return self.enumerable_without_block(elements, name, args);
        };
        Ok(Some(match (name, args) {
            ("each", []) => {
                for element in elements {
                    self.call_block(block, vec![element])?;
                }
                receiver.clone()
            }
            ("each_with_index", []) => {
                for (index, element) in elements.into_iter().enumerate() {
                    self.call_block(block, vec![element, Value::Integer(index as i64)])?;
                }
                receiver.clone()
            }
            ("each_with_object", [memo]) => {
                for element in elements {
                    self.call_block(block, vec![element, memo.clone()])?;
                }
                memo.clone()
            }
            ("map" | "collect", []) => {
                let mut mapped = Vec::with_capacity(elements.len());
                for element in elements {
                    mapped.push(self.call_block(block, vec![element])?);
                }
                Value::array(mapped)
            }
            ("flat_map", []) => {
                let mut mapped = Vec::new();
                for element in elements {
                    match self.call_block(block, vec![element])? {
                        Value::Array(items) => mapped.extend(items.borrow().iter().cloned()),
                        other => mapped.push(other),
                    }
                }
                Value::array(mapped)
            }
            ("filter_map", []) => {
                let mut mapped = Vec::new();
                for element in elements {
                    let value = self.call_block(block, vec![element])?;
                    if value.truthy() {
                        mapped.push(value);
                    }
                }
                Value::array(mapped)
            }
            ("select" | "filter" | "reject", []) => {
                let keep_matches = name != "reject";
                let mut kept = Vec::new();
                for element in elements {
                    if self.call_block(block, vec![element.clone()])?.truthy() == keep_matches {
                        kept.push(element);
                    }
                }
                Value::array(kept)
            }
            ("partition", []) => {
                let (mut matched, mut rest) = (Vec::new(), Vec::new());
                for element in elements {
                    if self.call_block(block, vec![element.clone()])?.truthy() {
                        matched.push(element);
                    } else {
                        rest.push(element);
                    }
                }
                Value::array(vec![Value::array(matched), Value::array(rest)])
            }
            ("find" | "detect", []) => {
                for element in elements {
                    if self.call_block(block, vec![element.clone()])?.truthy() {
                        return Ok(Some(element));
                    }
                }
                Value::Nil
            }
            ("find_index", []) => {
                for (index, element) in elements.into_iter().enumerate() {
                    if self.call_block(block, vec![element])?.truthy() {
                        return Ok(Some(Value::Integer(index as i64)));
                    }
                }
                Value::Nil
            }
            ("any?" | "all?" | "none?", []) => {
                let mut hits = 0;
                let total = elements.len();
                for element in elements {
                    if self.call_block(block, vec![element])?.truthy() {
                        hits += 1;
                    }
                }
                Value::Bool(match name {
                    "any?" => hits > 0,
                    "all?" => hits == total,
                    _ => hits == 0,
                })
            }
            ("count", []) => {
                let mut hits = 0;
                for element in elements {
                    if self.call_block(block, vec![element])?.truthy() {
                        hits += 1;
                    }
                }
                Value::Integer(hits)
            }
            ("sum", []) => {
                let mut total = Value::Integer(0);
                for element in elements {
                    let value = self.call_block(block, vec![element])?;
                    total = self.call_method(total, "+", vec![value], None)?;
                }
                total
            }
            ("reduce" | "inject", []) => {
                let mut elements = elements.into_iter();
                let Some(mut memo) = elements.next() else {
                    return Ok(Some(Value::Nil));
                };
                for element in elements {
                    memo = self.call_block(block, vec![memo, element])?;
                }
                memo
            }
            ("reduce" | "inject", [initial]) => {
                let mut memo = initial.clone();
                for element in elements {
                    memo = self.call_block(block, vec![memo, element])?;
                }
                memo
            }
            ("sort", []) => {
                let mut sorted = elements;
                let mut failure = None;
                sorted.sort_by(|a, b| {
                    let ordering = self
                        .call_block(block, vec![a.clone(), b.clone()])
                        .and_then(|order| match order {
                            Value::Integer(n) => Ok(n.cmp(&0)),
                            other => Err(raise(
                                "ArgumentError",
                                format!("comparison of {} with 0 failed", other.class_name()),
                            )),
                        });
                    ordering.unwrap_or_else(|e| {
                        failure.get_or_insert(e);
                        Ordering::Equal
                    })
                });
                if let Some(e) = failure {
                    return Err(e);
                }
                Value::array(sorted)
            }
            ("sort_by", []) => {
                let mut keyed = Vec::with_capacity(elements.len());
                for element in elements {
                    let key = self.call_block(block, vec![element.clone()])?;
                    keyed.push((key, element));
                }
                let mut failure = None;
                keyed.sort_by(|(a, _), (b, _)| {
                    compare(a, b).unwrap_or_else(|e| {
                        failure.get_or_insert(e);
                        Ordering::Equal
                    })
                });
                if let Some(e) = failure {
                    return Err(e);
                }
                Value::array(keyed.into_iter().map(|(_, element)| element).collect())
            }
            ("min_by" | "max_by", []) => {
                let wanted = if name == "min_by" {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let mut best: Option<(Value, Value)> = None;
                for element in elements {
                    let key = self.call_block(block, vec![element.clone()])?;
                    let better = match &best {
                        None => true,
                        Some((best_key, _)) => compare(&key, best_key)? == wanted,
                    };
                    if better {
                        best = Some((key, element));
                    }
                }
                best.map(|(_, element)| element).unwrap_or(Value::Nil)
            }
            ("group_by", []) => {
                let mut groups: Vec<(Value, Value)> = Vec::new();
                for element in elements {
                    let key = self.call_block(block, vec![element.clone()])?;
                    match groups.iter().find(|(existing, _)| *existing == key) {
                        Some((_, Value::Array(members))) => members.borrow_mut().push(element),
                        _ => groups.push((key, Value::array(vec![element]))),
                    }
                }
                Value::hash(groups)
            }
            ("each_slice", [size]) => {
                let size = count_arg(size)?;
                if size == 0 {
                    return Err(raise("ArgumentError", "invalid slice size"));
                }
                for chunk in elements.chunks(size) {
                    self.call_block(block, vec![Value::array(chunk.to_vec())])?;
                }
                receiver.clone()
            }
            ("take_while" | "drop_while", []) => {
                let mut split = elements.len();
                for (index, element) in elements.iter().enumerate() {
                    if !self.call_block(block, vec![element.clone()])?.truthy() {
                        split = index;
                        break;
                    }
                }
                if name == "take_while" {
                    Value::array(elements[..split].to_vec())
                } else {
                    Value::array(elements[split..].to_vec())
                }
            }
            _ => return Ok(None),
        }))
    }

    fn enumerable_without_block(
        &mut self,
        elements: Vec<Value>,
        name: &str,
        args: &[Value],
    ) -> Eval<Option<Value>> {
        Ok(Some(match (name, args) {
            ("first", []) => elements.into_iter().next().unwrap_or(Value::Nil),
            ("first" | "take", [count]) => {
                let count = count_arg(count)?;
                Value::array(elements.into_iter().take(count).collect())
            }
            ("drop", [count]) => {
                let count = count_arg(count)?;
                Value::array(elements.into_iter().skip(count).collect())
            }
            ("count", []) => Value::Integer(elements.len() as i64),
            ("count", [value]) => {
                Value::Integer(elements.iter().filter(|element| *element == value).count() as i64)
            }
            ("include?" | "member?", [value]) => Value::Bool(elements.contains(value)),
            ("any?", []) => Value::Bool(elements.iter().any(Value::truthy)),
            ("all?", []) => Value::Bool(elements.iter().all(Value::truthy)),
            ("none?", []) => Value::Bool(!elements.iter().any(Value::truthy)),
            ("any?" | "all?" | "none?", [pattern]) => {
                let mut hits = 0;
                for element in &elements {
                    if self.case_eq(pattern, element)? {
                        hits += 1;
                    }
                }
                Value::Bool(match name {
                    "any?" => hits > 0,
                    "all?" => hits == elements.len(),
                    _ => hits == 0,
                })
            }
            ("sum", []) | ("sum", [_]) => {
                let mut total = args.first().cloned().unwrap_or(Value::Integer(0));
                for element in elements {
                    total = self.call_method(total, "+", vec![element], None)?;
                }
                total
            }
            ("reduce" | "inject", [Value::Symbol(operator)]) => {
                let mut elements = elements.into_iter();
                let Some(mut memo) = elements.next() else {
                    return Ok(Some(Value::Nil));
                };
                for element in elements {
                    memo = self.call_method(memo, operator, vec![element], None)?;
                }
                memo
            }
            ("reduce" | "inject", [initial, Value::Symbol(operator)]) => {
                let mut memo = initial.clone();
                for element in elements {
                    memo = self.call_method(memo, operator, vec![element], None)?;
                }
                memo
            }
            ("min" | "max", []) => {
                let mut best: Option<Value> = None;
                for element in elements {
                    best = Some(match best {
                        None => element,
                        Some(current) => {
                            let ordering = compare(&element, &current)?;
                            let better = if name == "min" {
                                ordering == Ordering::Less
                            } else {
                                ordering == Ordering::Greater
                            };
                            if better {
                                element
                            } else {
                                current
                            }
                        }
                    });
                }
                best.unwrap_or(Value::Nil)
            }
            ("sort", []) => {
                let mut sorted = elements;
                sort_values(&mut sorted)?;
                Value::array(sorted)
            }
            ("uniq", []) => Value::array(unique(elements)),
            ("tally", []) => {
                let mut counts: Vec<(Value, Value)> = Vec::new();
                for element in elements {
                    match counts.iter_mut().find(|(existing, _)| *existing == element) {
                        Some((_, Value::Integer(n))) => *n += 1,
                        _ => counts.push((element, Value::Integer(1))),
                    }
                }
                Value::hash(counts)
            }
            ("zip", others) => {
                let others: Vec<Vec<Value>> = others
                    .iter()
                    .map(|other| other.elements().unwrap_or_default())
                    .collect();
                let zipped = elements
                    .into_iter()
                    .enumerate()
                    .map(|(index, element)| {
                        let mut row = vec![element];
                        row.extend(
                            others
                                .iter()
                                .map(|other| other.get(index).cloned().unwrap_or(Value::Nil)),
                        );
                        Value::array(row)
                    })
                    .collect();
                Value::array(zipped)
            }
            ("to_a" | "entries", []) => Value::array(elements),
            _ if BLOCK_ITERATORS.contains(&name) => {
                return Err(EvaluatorError::unsupported(format!("{name} without a block")).into())
            }
            _ => return Ok(None),
        }))
    }
}
