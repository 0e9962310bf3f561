//! Reference execution facility.
//!
//! A tree-walking evaluator for a subset of Ruby, enough to run the
//! instrumented form of ordinary scripts: literals, strings with
//! interpolation, collections, conditionals, loops, boolean operators,
//! assignments, `begin`/`rescue`/`else`/`ensure`, top-level methods and
//! common core methods. The counter global resolves to the counter
//! registry, so inserted increments land in the unit's counters.
//! Anything outside the subset raises `NotImplementedError`.

use std::{collections::HashMap, rc::Rc, sync::Arc};

use anyhow::Result;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    parser::{RawNode, RubyParser},
    registry::{CounterRegistry, UnitId},
    unit::{ExecutionRequest, Executor},
    CoverConfig,
};

mod builtins;
mod collections;
pub mod errors;
mod value;

#[cfg(test)]
mod tests;

pub use errors::EvaluatorError;
pub use value::{Pattern, Value};

/// Ruby-level method call nesting limit
const MAX_DEPTH: usize = 64;

/// Non-local exits
#[derive(Debug, Clone)]
enum Unwind {
    Raise(Value),
    Break(Value),
    Next(Value),
    Return(Value),
    Retry,
}

impl From<EvaluatorError> for Unwind {
    fn from(error: EvaluatorError) -> Self {
        Unwind::Raise(Value::exception(error.exception_class(), error.to_string()))
    }
}

type Eval<T = Value> = std::result::Result<T, Unwind>;

/// Local variables of one method body or block
#[derive(Debug, Default)]
struct Scope {
    vars: HashMap<String, Value>,
    /// Lookups stop at a method boundary; blocks see their enclosing scope
    boundary: bool,
}

impl Scope {
    fn boundary() -> Self {
        Self {
            vars: HashMap::new(),
            boundary: true,
        }
    }
}

/// A user-defined method, kept with the source it was parsed from
#[derive(Debug)]
struct MethodDef {
    node: RawNode,
    source: Rc<str>,
}

/// Assignable place, evaluated once for compound assignments
enum Target {
    Local(String),
    Global(String),
    Index(Value, Vec<Value>),
}

pub struct Evaluator {
    registry: Arc<CounterRegistry>,
    counter_global: String,
    output: Arc<Mutex<String>>,
    parser: RubyParser,
    source: Rc<str>,
    globals: HashMap<String, Value>,
    scopes: Vec<Scope>,
    methods: HashMap<String, Rc<MethodDef>>,
    /// Exceptions being handled, innermost last (`$!`)
    rescued: Vec<Value>,
    depth: usize,
}

impl Evaluator {
    /// Evaluator bound to the process-wide counter registry
    pub fn new() -> crate::Result<Self> {
        Self::with_registry(CounterRegistry::global())
    }

    pub fn with_registry(registry: Arc<CounterRegistry>) -> crate::Result<Self> {
        Ok(Self {
            registry,
            counter_global: CoverConfig::default().counter_global,
            output: Arc::new(Mutex::new(String::new())),
            parser: RubyParser::new()?,
            source: Rc::from(""),
            globals: HashMap::new(),
            scopes: vec![Scope::boundary()],
            methods: HashMap::new(),
            rescued: Vec::new(),
            depth: 0,
        })
    }

    /// Write program output into a shared sink instead of a private one
    pub fn with_output(mut self, output: Arc<Mutex<String>>) -> Self {
        self.output = output;
        self
    }

    /// Everything the program printed so far
    pub fn output(&self) -> String {
        self.output.lock().clone()
    }

    pub fn output_sink(&self) -> Arc<Mutex<String>> {
        Arc::clone(&self.output)
    }

    /// Parse and run a whole program, returning the value of its last
    /// statement. Uncaught Ruby exceptions become `EvaluatorError::Raised`.
    pub fn eval_source(&mut self, source: &str) -> Result<Value> {
        let raw = match self.parser.parse_program(source) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(Value::Nil),
            Err(e) => return Err(EvaluatorError::Parse(e.to_string()).into()),
        };
        self.source = Rc::from(source);
        self.scopes = vec![Scope::boundary()];
        self.depth = 0;

        match self.eval(&raw) {
            Ok(value) | Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Raise(exception)) => Err(EvaluatorError::Raised {
                class: exception.class_name(),
                message: exception.to_text(),
            }
            .into()),
            Err(Unwind::Break(_)) => Err(EvaluatorError::UnexpectedJump { keyword: "break" }.into()),
            Err(Unwind::Next(_)) => Err(EvaluatorError::UnexpectedJump { keyword: "next" }.into()),
            Err(Unwind::Retry) => Err(EvaluatorError::UnexpectedJump { keyword: "retry" }.into()),
        }
    }

    fn text(&self, node: &RawNode) -> String {
        node.text(&self.source).to_string()
    }

    fn write(&self, text: &str) {
        self.output.lock().push_str(text);
    }

    fn eval(&mut self, node: &RawNode) -> Eval {
        match node.kind.as_str() {
            "program" | "then" | "else" | "do" | "parenthesized_statements" | "block_body"
            | "ensure" | "interpolation" => self.eval_statements(node.nodes()),
            "begin" | "body_statement" => {
                let children: Vec<&RawNode> = node.nodes().collect();
                self.eval_begin(&children)
            }
            "comment" | "empty_statement" | "nil" => Ok(Value::Nil),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "self" => Ok(Value::Main),
            "integer" => {
                let text = self.text(node);
                parse_integer(&text)
                    .map(Value::Integer)
                    .ok_or_else(|| EvaluatorError::Overflow { operation: text }.into())
            }
            "float" => {
                let text = self.text(node).replace('_', "");
                text.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| EvaluatorError::unsupported(format!("float literal {text}")).into())
            }
            "string" | "bare_string" => Ok(Value::Str(self.eval_string_parts(node)?)),
            "chained_string" => {
                let mut text = String::new();
                for part in node.nodes() {
                    text.push_str(&self.eval_string_parts(part)?);
                }
                Ok(Value::Str(text))
            }
            "character" => Ok(Value::str(self.text(node).trim_start_matches('?'))),
            "simple_symbol" => Ok(Value::Symbol(self.text(node).trim_start_matches(':').to_string())),
            "hash_key_symbol" => Ok(Value::Symbol(self.text(node))),
            "delimited_symbol" | "bare_symbol" => Ok(Value::Symbol(self.eval_string_parts(node)?)),
            "string_array" | "symbol_array" => {
                let items = node.nodes().map(|item| self.eval(item)).collect::<Eval<Vec<_>>>()?;
                Ok(Value::array(items))
            }
            "regex" => self.eval_regex(node),
            "array" => Ok(Value::array(self.eval_list(node.nodes())?)),
            "hash" => self.eval_hash(node),
            "range" => self.eval_range(node),
            "identifier" => {
                let name = self.text(node);
                match self.lookup(&name) {
                    Some(value) => Ok(value),
                    None => self.call_function(&name, Vec::new(), None),
                }
            }
            "constant" => self.eval_constant(&self.text(node)),
            "global_variable" | "instance_variable" | "class_variable" => {
                let name = self.text(node);
                if name == self.counter_global {
                    return Ok(Value::CounterTable);
                }
                Ok(self.globals.get(&name).cloned().unwrap_or(Value::Nil))
            }
            "assignment" => self.eval_assignment(node),
            "operator_assignment" => self.eval_op_assignment(node),
            "binary" => self.eval_binary(node),
            "unary" => self.eval_unary(node),
            "if" | "elsif" => self.eval_if(node, false),
            "unless" => self.eval_if(node, true),
            "conditional" => self.eval_if(node, false),
            "if_modifier" | "unless_modifier" => {
                let (body, condition) = (field(node, "body")?, field(node, "condition")?);
                let negate = node.kind == "unless_modifier";
                if self.eval(condition)?.truthy() != negate {
                    self.eval(body)
                } else {
                    Ok(Value::Nil)
                }
            }
            "while" | "until" => {
                let (condition, body) = (field(node, "condition")?, field(node, "body")?);
                self.eval_loop(condition, body, node.kind == "until", false)
            }
            "while_modifier" | "until_modifier" => {
                let (body, condition) = (field(node, "body")?, field(node, "condition")?);
                // `begin ... end while cond` runs the body first
                let do_while = body.kind == "begin";
                self.eval_loop(condition, body, node.kind == "until_modifier", do_while)
            }
            "rescue_modifier" => {
                let (body, handler) = (field(node, "body")?, field(node, "handler")?);
                match self.eval(body) {
                    Err(Unwind::Raise(exception)) if rescues_by_default(&exception) => {
                        self.rescued.push(exception);
                        let result = self.eval(handler);
                        self.rescued.pop();
                        result
                    }
                    other => other,
                }
            }
            "case" => self.eval_case(node),
            "call" => self.eval_call(node),
            "element_reference" => {
                let receiver = self.eval(field(node, "object")?)?;
                let args = self.eval_list(node.unnamed_children())?;
                self.call_method(receiver, "[]", args, None)
            }
            "return" | "break" | "next" => {
                let value = match node.nodes().next() {
                    Some(arguments) => {
                        let mut values = self.eval_list(arguments.nodes())?;
                        match values.len() {
                            0 => Value::Nil,
                            1 => values.remove(0),
                            _ => Value::array(values),
                        }
                    }
                    None => Value::Nil,
                };
                Err(match node.kind.as_str() {
                    "return" => Unwind::Return(value),
                    "break" => Unwind::Break(value),
                    _ => Unwind::Next(value),
                })
            }
            "retry" => Err(Unwind::Retry),
            "method" => {
                let name = self.text(field(node, "name")?);
                debug!("Defining method {}", name);
                self.methods.insert(
                    name.clone(),
                    Rc::new(MethodDef {
                        node: node.clone(),
                        source: Rc::clone(&self.source),
                    }),
                );
                Ok(Value::Symbol(name))
            }
            other => Err(EvaluatorError::unsupported(other).into()),
        }
    }

    fn eval_statements<'n>(&mut self, statements: impl Iterator<Item = &'n RawNode>) -> Eval {
        let mut last = Value::Nil;
        for statement in statements {
            last = self.eval(statement)?;
        }
        Ok(last)
    }

    /// Evaluate list elements, expanding splats
    fn eval_list<'n>(&mut self, items: impl Iterator<Item = &'n RawNode>) -> Eval<Vec<Value>> {
        let mut values = Vec::new();
        let mut keywords = Vec::new();
        for item in items {
            match item.kind.as_str() {
                "splat_argument" => {
                    let value = self.eval(field_or_first(item)?)?;
                    match value.elements() {
                        Some(elements) if !matches!(value, Value::Hash(_)) => values.extend(elements),
                        _ => values.push(value),
                    }
                }
                "pair" => {
                    let key = self.eval(field(item, "key")?)?;
                    let value = match item.field("value") {
                        Some(value) => self.eval(value)?,
                        None => self.lookup_or_call(&key.to_text())?,
                    };
                    keywords.push((key, value));
                }
                "hash_splat_argument" => match self.eval(field_or_first(item)?)? {
                    Value::Hash(pairs) => keywords.extend(pairs.borrow().iter().cloned()),
                    other => {
                        return Err(EvaluatorError::unary_type_error(
                            "**",
                            "Hash",
                            &other.class_name(),
                        )
                        .into())
                    }
                },
                "block_argument" => return Err(EvaluatorError::unsupported("block argument").into()),
                _ => values.push(self.eval(item)?),
            }
        }
        if !keywords.is_empty() {
            values.push(Value::hash(keywords));
        }
        Ok(values)
    }

    fn lookup_or_call(&mut self, name: &str) -> Eval {
        match self.lookup(name) {
            Some(value) => Ok(value),
            None => self.call_function(name, Vec::new(), None),
        }
    }

    fn eval_string_parts(&mut self, node: &RawNode) -> Eval<String> {
        let single_quoted = {
            let text = node.text(&self.source);
            text.starts_with('\'') || text.starts_with("%q")
        };
        let mut out = String::new();
        for part in node.nodes() {
            match part.kind.as_str() {
                "string_content" => out.push_str(part.text(&self.source)),
                "escape_sequence" => out.push_str(&unescape(part.text(&self.source), single_quoted)),
                _ => {
                    let value = self.eval(part)?;
                    out.push_str(&value.to_text());
                }
            }
        }
        Ok(out)
    }

    fn eval_regex(&mut self, node: &RawNode) -> Eval {
        let mut source = String::new();
        for part in node.nodes() {
            match part.kind.as_str() {
                "string_content" | "escape_sequence" => source.push_str(part.text(&self.source)),
                _ => {
                    let value = self.eval(part)?;
                    source.push_str(&value.to_text());
                }
            }
        }
        let text = node.text(&self.source);
        let flags: String = text
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_alphabetic())
            .filter_map(|c| match c {
                'i' => Some('i'),
                'm' => Some('s'),
                'x' => Some('x'),
                _ => None,
            })
            .collect();
        let pattern = if flags.is_empty() {
            source.clone()
        } else {
            format!("(?{flags}){source}")
        };
        match regex::Regex::new(&pattern) {
            Ok(regex) => Ok(Value::Regexp(Pattern { source, regex })),
            Err(e) => Err(Unwind::Raise(Value::exception("RegexpError", e.to_string()))),
        }
    }

    fn eval_hash(&mut self, node: &RawNode) -> Eval {
        let mut pairs: Vec<(Value, Value)> = Vec::new();
        let entries = self.eval_list(node.nodes())?;
        for entry in entries {
            match entry {
                Value::Hash(more) => {
                    for (key, value) in more.borrow().iter() {
                        insert_pair(&mut pairs, key.clone(), value.clone());
                    }
                }
                other => {
                    return Err(EvaluatorError::unary_type_error(
                        "hash literal",
                        "pair",
                        &other.class_name(),
                    )
                    .into())
                }
            }
        }
        Ok(Value::hash(pairs))
    }

    fn eval_range(&mut self, node: &RawNode) -> Eval {
        let mut bounds = node.nodes();
        let (Some(first), Some(last)) = (bounds.next(), bounds.next()) else {
            return Err(EvaluatorError::unsupported("endless range").into());
        };
        let operator = node.operator_between(&self.source, first, last).to_string();
        match (self.eval(first)?, self.eval(last)?) {
            (Value::Integer(start), Value::Integer(end)) => Ok(Value::Range {
                start,
                end,
                exclusive: operator == "...",
            }),
            (start, end) => Err(EvaluatorError::binary_type_error(
                "range",
                &start.class_name(),
                &end.class_name(),
            )
            .into()),
        }
    }

    fn eval_constant(&mut self, name: &str) -> Eval {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if builtins::is_known_class(name) {
            return Ok(Value::Class(name.to_string()));
        }
        Err(Unwind::Raise(Value::exception(
            "NameError",
            format!("uninitialized constant {name}"),
        )))
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.vars.get(name) {
                return Some(value.clone());
            }
            if scope.boundary {
                break;
            }
        }
        None
    }

    fn set_local(&mut self, name: &str, value: Value) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.vars.get_mut(name) {
                *slot = value;
                return;
            }
            if scope.boundary {
                break;
            }
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.vars.insert(name.to_string(), value);
        }
    }

    fn define_local(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.vars.insert(name.to_string(), value);
        }
    }

    fn eval_assignment(&mut self, node: &RawNode) -> Eval {
        let (left, right) = (field(node, "left")?, field(node, "right")?);
        let value = if right.kind == "right_assignment_list" {
            Value::array(self.eval_list(right.nodes())?)
        } else {
            self.eval(right)?
        };
        self.assign(left, value.clone())?;
        Ok(value)
    }

    fn assign(&mut self, target: &RawNode, value: Value) -> Eval<()> {
        match target.kind.as_str() {
            "left_assignment_list" | "destructured_left_assignment" => {
                self.destructure(target, value)
            }
            _ => {
                let target = self.eval_target(target)?;
                self.write_target(target, value)
            }
        }
    }

    fn destructure(&mut self, targets: &RawNode, value: Value) -> Eval<()> {
        let values = match &value {
            Value::Array(items) => items.borrow().clone(),
            _ => vec![value],
        };
        let targets: Vec<&RawNode> = targets.nodes().collect();
        let rest = targets.iter().position(|t| t.kind == "rest_assignment");
        let after = rest.map_or(0, |index| targets.len() - index - 1);

        for (index, target) in targets.iter().enumerate() {
            let value = match rest {
                Some(rest_index) if index == rest_index => {
                    let end = values.len().saturating_sub(after).max(index);
                    Value::array(values.get(index..end).map(<[Value]>::to_vec).unwrap_or_default())
                }
                Some(rest_index) if index > rest_index => {
                    let from_end = targets.len() - index;
                    values
                        .len()
                        .checked_sub(from_end)
                        .filter(|position| *position >= rest_index)
                        .and_then(|position| values.get(position).cloned())
                        .unwrap_or(Value::Nil)
                }
                _ => values.get(index).cloned().unwrap_or(Value::Nil),
            };
            if target.kind == "rest_assignment" {
                if let Some(name) = target.nodes().next() {
                    self.assign(name, value)?;
                }
            } else {
                self.assign(target, value)?;
            }
        }
        Ok(())
    }

    fn eval_target(&mut self, target: &RawNode) -> Eval<Target> {
        match target.kind.as_str() {
            "identifier" => Ok(Target::Local(self.text(target))),
            "global_variable" | "instance_variable" | "class_variable" | "constant" => {
                Ok(Target::Global(self.text(target)))
            }
            "element_reference" => {
                let receiver = self.eval(field(target, "object")?)?;
                let args = self.eval_list(target.unnamed_children())?;
                Ok(Target::Index(receiver, args))
            }
            other => Err(EvaluatorError::unsupported(format!("assignment to {other}")).into()),
        }
    }

    fn read_target(&mut self, target: &Target) -> Eval {
        match target {
            Target::Local(name) => Ok(self.lookup(name).unwrap_or(Value::Nil)),
            Target::Global(name) => {
                if *name == self.counter_global {
                    return Ok(Value::CounterTable);
                }
                Ok(self.globals.get(name).cloned().unwrap_or(Value::Nil))
            }
            Target::Index(receiver, args) => {
                self.call_method(receiver.clone(), "[]", args.clone(), None)
            }
        }
    }

    fn write_target(&mut self, target: Target, value: Value) -> Eval<()> {
        match target {
            Target::Local(name) => self.set_local(&name, value),
            Target::Global(name) => {
                self.globals.insert(name, value);
            }
            Target::Index(receiver, mut args) => {
                args.push(value);
                self.call_method(receiver, "[]=", args, None)?;
            }
        }
        Ok(())
    }

    fn eval_op_assignment(&mut self, node: &RawNode) -> Eval {
        let (left, right) = (field(node, "left")?, field(node, "right")?);
        let operator = node.operator_between(&self.source, left, right);
        let operator = operator.strip_suffix('=').unwrap_or(operator).to_string();
        let target = self.eval_target(left)?;

        // counter increments go straight to the atomic array
        if let Target::Index(Value::Counters(counters), args) = &target {
            if operator == "+" {
                let delta = self.eval(right)?;
                return match (args.as_slice(), delta) {
                    ([Value::Integer(tracker)], Value::Integer(delta)) if *tracker >= 0 && delta >= 0 => {
                        counters
                            .increment_by(*tracker as usize, delta as u64)
                            .map(|hits| Value::Integer(hits as i64))
                            .ok_or_else(|| EvaluatorError::IndexOutOfRange { index: *tracker }.into())
                    }
                    _ => Err(EvaluatorError::unsupported("non-integer counter increment").into()),
                };
            }
        }

        let current = self.read_target(&target)?;
        let value = match operator.as_str() {
            "||" if current.truthy() => return Ok(current),
            "&&" if !current.truthy() => return Ok(current),
            "||" | "&&" => self.eval(right)?,
            _ => {
                let operand = self.eval(right)?;
                self.call_method(current, &operator, vec![operand], None)?
            }
        };
        self.write_target(target, value.clone())?;
        Ok(value)
    }

    fn eval_binary(&mut self, node: &RawNode) -> Eval {
        let (left, right) = (field(node, "left")?, field(node, "right")?);
        let operator = node.operator_between(&self.source, left, right).to_string();
        match operator.as_str() {
            "&&" | "and" => {
                let value = self.eval(left)?;
                if value.truthy() {
                    self.eval(right)
                } else {
                    Ok(value)
                }
            }
            "||" | "or" => {
                let value = self.eval(left)?;
                if value.truthy() {
                    Ok(value)
                } else {
                    self.eval(right)
                }
            }
            "!=" | "!~" => {
                let (l, r) = (self.eval(left)?, self.eval(right)?);
                let positive = if operator == "!=" { "==" } else { "=~" };
                Ok(Value::Bool(!self.call_method(l, positive, vec![r], None)?.truthy()))
            }
            _ => {
                let (l, r) = (self.eval(left)?, self.eval(right)?);
                self.call_method(l, &operator, vec![r], None)
            }
        }
    }

    fn eval_unary(&mut self, node: &RawNode) -> Eval {
        let operand = field(node, "operand")?;
        let operator = self
            .source
            .get(node.range.start..operand.range.start)
            .unwrap_or("")
            .trim()
            .trim_end_matches('(')
            .to_string();
        match operator.as_str() {
            "!" | "not" => Ok(Value::Bool(!self.eval(operand)?.truthy())),
            "defined?" => Ok(self.eval_defined(operand)),
            "-" => {
                let value = self.eval(operand)?;
                self.call_method(value, "-@", Vec::new(), None)
            }
            "+" => {
                let value = self.eval(operand)?;
                self.call_method(value, "+@", Vec::new(), None)
            }
            "~" => {
                let value = self.eval(operand)?;
                self.call_method(value, "~", Vec::new(), None)
            }
            other => Err(EvaluatorError::unsupported(format!("unary {other}")).into()),
        }
    }

    fn eval_defined(&mut self, operand: &RawNode) -> Value {
        let operand = match operand.kind.as_str() {
            "parenthesized_statements" => match operand.nodes().next() {
                Some(inner) => inner,
                None => return Value::str("expression"),
            },
            _ => operand,
        };
        let name = self.text(operand);
        let found = match operand.kind.as_str() {
            "identifier" if self.lookup(&name).is_some() => Some("local-variable"),
            "identifier" if self.methods.contains_key(&name) || builtins::is_kernel_function(&name) => {
                Some("method")
            }
            "identifier" => None,
            "global_variable" if name == self.counter_global || self.globals.contains_key(&name) => {
                Some("global-variable")
            }
            "global_variable" => None,
            "constant" if self.globals.contains_key(&name) || builtins::is_known_class(&name) => {
                Some("expression")
            }
            "constant" => None,
            "assignment" | "operator_assignment" => Some("assignment"),
            _ => Some("expression"),
        };
        found.map(Value::str).unwrap_or(Value::Nil)
    }

    fn eval_if(&mut self, node: &RawNode, negate: bool) -> Eval {
        let condition = self.eval(field(node, "condition")?)?;
        let branch = if condition.truthy() != negate {
            node.field("consequence")
        } else {
            node.field("alternative")
        };
        match branch {
            Some(branch) => self.eval(branch),
            None => Ok(Value::Nil),
        }
    }

    fn eval_loop(
        &mut self,
        condition: &RawNode,
        body: &RawNode,
        until: bool,
        do_while: bool,
    ) -> Eval {
        let mut skip_check = do_while;
        loop {
            if !skip_check && self.eval(condition)?.truthy() == until {
                break;
            }
            skip_check = false;
            match self.eval(body) {
                Ok(_) | Err(Unwind::Next(_)) => {}
                Err(Unwind::Break(value)) => return Ok(value),
                Err(other) => return Err(other),
            }
        }
        Ok(Value::Nil)
    }

    fn eval_case(&mut self, node: &RawNode) -> Eval {
        let subject = match node.field("value") {
            Some(value) => Some(self.eval(value)?),
            None => None,
        };
        for clause in node.nodes() {
            match clause.kind.as_str() {
                "when" => {
                    let patterns = clause
                        .children
                        .iter()
                        .filter(|child| child.field == Some("pattern"))
                        .map(|child| unwrap_pattern(&child.node));
                    for pattern in patterns {
                        let pattern = self.eval(pattern)?;
                        let matched = match &subject {
                            Some(subject) => self.case_eq(&pattern, subject)?,
                            None => pattern.truthy(),
                        };
                        if matched {
                            return match clause.field("body") {
                                Some(body) => self.eval(body),
                                None => Ok(Value::Nil),
                            };
                        }
                    }
                }
                "else" => return self.eval(clause),
                _ => {}
            }
        }
        Ok(Value::Nil)
    }

    /// Runs statements, then the first matching rescue clause on a raise,
    /// else on success, and ensure in every case
    fn eval_begin(&mut self, children: &[&RawNode]) -> Eval {
        let statements: Vec<&RawNode> = children
            .iter()
            .copied()
            .filter(|child| !matches!(child.kind.as_str(), "rescue" | "else" | "ensure"))
            .collect();
        let rescues: Vec<&RawNode> = children.iter().copied().filter(|c| c.kind == "rescue").collect();
        let else_clause = children.iter().copied().find(|c| c.kind == "else");
        let ensure = children.iter().copied().find(|c| c.kind == "ensure");

        let result = loop {
            let outcome = match self.eval_statements(statements.iter().copied()) {
                Err(Unwind::Raise(exception)) => match self.find_rescue(&rescues, &exception) {
                    Ok(Some(rescue)) => {
                        self.rescued.push(exception.clone());
                        let handled = self.eval_rescue(rescue, exception);
                        self.rescued.pop();
                        if matches!(handled, Err(Unwind::Retry)) {
                            continue;
                        }
                        handled
                    }
                    Ok(None) => Err(Unwind::Raise(exception)),
                    Err(e) => Err(e),
                },
                Ok(value) => match else_clause {
                    Some(else_clause) => self.eval(else_clause),
                    None => Ok(value),
                },
                other => other,
            };
            break outcome;
        };

        if let Some(ensure) = ensure {
            self.eval(ensure)?;
        }
        result
    }

    fn find_rescue<'n>(
        &mut self,
        rescues: &[&'n RawNode],
        exception: &Value,
    ) -> Eval<Option<&'n RawNode>> {
        for rescue in rescues {
            let matched = match rescue.field("exceptions") {
                None => rescues_by_default(exception),
                Some(classes) => {
                    let mut matched = false;
                    for class in classes.nodes() {
                        if let Value::Class(class) = self.eval(class)? {
                            if builtins::value_is_a(exception, &class) {
                                matched = true;
                                break;
                            }
                        }
                    }
                    matched
                }
            };
            if matched {
                return Ok(Some(*rescue));
            }
        }
        Ok(None)
    }

    fn eval_rescue(&mut self, rescue: &RawNode, exception: Value) -> Eval {
        if let Some(variable) = rescue.field("variable") {
            if let Some(name) = variable.nodes().next() {
                self.assign(name, exception)?;
            }
        }
        match rescue.field("body") {
            Some(body) => self.eval(body),
            None => Ok(Value::Nil),
        }
    }

    fn eval_call(&mut self, node: &RawNode) -> Eval {
        let method = self.text(field(node, "method")?);
        let block = node.field("block");
        let receiver = match node.field("receiver") {
            Some(receiver) => {
                let safe = self
                    .source
                    .get(receiver.range.end..field(node, "method")?.range.start)
                    .is_some_and(|between| between.contains("&."));
                let value = self.eval(receiver)?;
                if safe && value == Value::Nil {
                    return Ok(Value::Nil);
                }
                Some(value)
            }
            None => None,
        };
        let args = match node.field("arguments") {
            Some(arguments) => self.eval_list(arguments.nodes())?,
            None => Vec::new(),
        };

        let result = match receiver {
            Some(receiver) => self.call_method(receiver, &method, args, block),
            None => self.call_function(&method, args, block),
        };
        match result {
            Err(Unwind::Break(value)) if block.is_some() => Ok(value),
            other => other,
        }
    }

    /// Call a method defined with `def`
    fn invoke(&mut self, method: Rc<MethodDef>, args: Vec<Value>) -> Eval {
        if self.depth >= MAX_DEPTH {
            return Err(EvaluatorError::StackTooDeep.into());
        }
        let saved_source = std::mem::replace(&mut self.source, Rc::clone(&method.source));
        self.scopes.push(Scope::boundary());
        self.depth += 1;

        let result = self
            .bind_parameters(&method.node, args)
            .and_then(|()| {
                let body: Vec<&RawNode> = method
                    .node
                    .children
                    .iter()
                    .filter(|child| !matches!(child.field, Some("name") | Some("parameters")))
                    .map(|child| &child.node)
                    .collect();
                match body.as_slice() {
                    [single] if single.kind == "body_statement" => self.eval(single),
                    body => self.eval_begin(body),
                }
            });

        self.depth -= 1;
        self.scopes.pop();
        self.source = saved_source;

        match result {
            Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Break(_)) => Err(EvaluatorError::UnexpectedJump { keyword: "break" }.into()),
            Err(Unwind::Next(_)) => Err(EvaluatorError::UnexpectedJump { keyword: "next" }.into()),
            other => other,
        }
    }

    fn bind_parameters(&mut self, method: &RawNode, mut args: Vec<Value>) -> Eval<()> {
        let Some(parameters) = method.field("parameters") else {
            return if args.is_empty() {
                Ok(())
            } else {
                Err(EvaluatorError::arity(args.len(), "0").into())
            };
        };
        let parameters: Vec<&RawNode> = parameters.nodes().collect();
        let required = parameters.iter().filter(|p| p.kind == "identifier").count();
        let optional = parameters.iter().filter(|p| p.kind == "optional_parameter").count();
        let splat = parameters.iter().any(|p| p.kind == "splat_parameter");
        let keywords = parameters.iter().any(|p| p.kind == "keyword_parameter");

        let mut keyword_args = Vec::new();
        if keywords {
            if let Some(Value::Hash(pairs)) = args.last().cloned() {
                args.pop();
                keyword_args = pairs.borrow().clone();
            }
        }
        if args.len() < required || (!splat && args.len() > required + optional) {
            let expected = if splat {
                format!("{required}+")
            } else if optional > 0 {
                format!("{required}..{}", required + optional)
            } else {
                required.to_string()
            };
            return Err(EvaluatorError::arity(args.len(), expected).into());
        }

        let mut spare_optional = args.len() - required;
        let mut args = args.into_iter();
        for parameter in parameters {
            match parameter.kind.as_str() {
                "identifier" => {
                    let value = args.next().unwrap_or(Value::Nil);
                    self.define_local(&self.text(parameter), value);
                }
                "optional_parameter" => {
                    let name = self.text(field(parameter, "name")?);
                    let value = if spare_optional > 0 {
                        spare_optional -= 1;
                        args.next().unwrap_or(Value::Nil)
                    } else {
                        self.eval(field(parameter, "value")?)?
                    };
                    self.define_local(&name, value);
                }
                "splat_parameter" => {
                    let rest: Vec<Value> = args.by_ref().collect();
                    if let Some(name) = parameter.field("name") {
                        self.define_local(&self.text(name), Value::array(rest));
                    }
                }
                "keyword_parameter" => {
                    let name = self.text(field(parameter, "name")?);
                    let supplied = keyword_args
                        .iter()
                        .find(|(key, _)| *key == Value::Symbol(name.clone()))
                        .map(|(_, value)| value.clone());
                    let value = match (supplied, parameter.field("value")) {
                        (Some(value), _) => value,
                        (None, Some(default)) => self.eval(default)?,
                        (None, None) => {
                            return Err(Unwind::Raise(Value::exception(
                                "ArgumentError",
                                format!("missing keyword: :{name}"),
                            )))
                        }
                    };
                    self.define_local(&name, value);
                }
                other => {
                    return Err(EvaluatorError::unsupported(format!("{other} parameter")).into())
                }
            }
        }
        Ok(())
    }

    /// Run a block with its own parameters over the enclosing locals
    fn call_block(&mut self, block: &RawNode, args: Vec<Value>) -> Eval {
        let parameters: Vec<&RawNode> = block
            .nodes()
            .find(|child| child.kind == "block_parameters")
            .map(|params| params.nodes().collect())
            .unwrap_or_default();
        let body = block.field("body").or_else(|| {
            block
                .nodes()
                .find(|child| matches!(child.kind.as_str(), "block_body" | "body_statement"))
        });

        // a single array argument spreads over several parameters
        let args = match args.as_slice() {
            [Value::Array(items)] if parameters.len() > 1 => items.borrow().clone(),
            _ => args,
        };

        self.scopes.push(Scope::default());
        let mut bound: Eval<()> = Ok(());
        for (index, parameter) in parameters.iter().enumerate() {
            let value = args.get(index).cloned().unwrap_or(Value::Nil);
            bound = match parameter.kind.as_str() {
                "identifier" => {
                    self.define_local(&self.text(parameter), value);
                    Ok(())
                }
                "destructured_parameter" => {
                    let values = value.elements().unwrap_or_else(|| vec![value.clone()]);
                    for (position, name) in parameter.nodes().enumerate() {
                        let value = values.get(position).cloned().unwrap_or(Value::Nil);
                        self.define_local(&self.text(name), value);
                    }
                    Ok(())
                }
                other => Err(EvaluatorError::unsupported(format!("{other} block parameter")).into()),
            };
            if bound.is_err() {
                break;
            }
        }
        let result = bound.and_then(|()| match body {
            Some(body) => self.eval(body),
            None => Ok(Value::Nil),
        });
        self.scopes.pop();

        match result {
            Err(Unwind::Next(value)) => Ok(value),
            other => other,
        }
    }
}

impl Executor for Evaluator {
    fn execute(&mut self, request: ExecutionRequest<'_>) -> Result<()> {
        self.registry = Arc::clone(request.registry);
        self.counter_global = request.config.counter_global.clone();
        debug!(
            "Evaluating unit {} ({}) starting at line {}",
            request.unit, request.name, request.lineno
        );
        self.eval_source(request.source).map(|_| ())
    }
}

impl Evaluator {
    /// Counters registered for a unit id, as seen from the program
    fn counters_for(&self, unit: i64) -> Value {
        u64::try_from(unit)
            .ok()
            .and_then(|unit| self.registry.get(UnitId(unit)))
            .map(Value::Counters)
            .unwrap_or(Value::Nil)
    }
}

/// A bare `rescue` catches `StandardError` and its descendants only
fn rescues_by_default(exception: &Value) -> bool {
    builtins::value_is_a(exception, "StandardError")
}

fn field<'n>(node: &'n RawNode, name: &str) -> Eval<&'n RawNode> {
    node.field(name).ok_or_else(|| {
        EvaluatorError::unsupported(format!("{} without {}", node.kind, name)).into()
    })
}

fn field_or_first(node: &RawNode) -> Eval<&RawNode> {
    node.nodes()
        .next()
        .ok_or_else(|| EvaluatorError::unsupported(format!("empty {}", node.kind)).into())
}

/// `when` values arrive wrapped in a `pattern` node
fn unwrap_pattern(node: &RawNode) -> &RawNode {
    match node.kind.as_str() {
        "pattern" => node.nodes().next().unwrap_or(node),
        _ => node,
    }
}

fn insert_pair(pairs: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match pairs.iter_mut().find(|(existing, _)| *existing == key) {
        Some(pair) => pair.1 = value,
        None => pairs.push((key, value)),
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect::<String>().to_ascii_lowercase();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    let (radix, body) = if let Some(rest) = digits.strip_prefix("0x") {
        (16, rest)
    } else if let Some(rest) = digits.strip_prefix("0b") {
        (2, rest)
    } else if let Some(rest) = digits.strip_prefix("0o") {
        (8, rest)
    } else if let Some(rest) = digits.strip_prefix("0d") {
        (10, rest)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    let value = i64::from_str_radix(body, radix).ok()?;
    Some(if negative { -value } else { value })
}

fn unescape(text: &str, single_quoted: bool) -> String {
    let Some(rest) = text.strip_prefix('\\') else {
        return text.to_string();
    };
    if single_quoted {
        return match rest {
            "\\" | "'" => rest.to_string(),
            _ => text.to_string(),
        };
    }
    let mut chars = rest.chars();
    let Some(first) = chars.next() else {
        return "\\".to_string();
    };
    let tail: String = chars.collect();
    let simple = match first {
        'n' => Some('\n'),
        't' => Some('\t'),
        's' => Some(' '),
        'r' => Some('\r'),
        '0' if tail.is_empty() => Some('\0'),
        'e' => Some('\u{1b}'),
        'a' => Some('\u{07}'),
        'b' => Some('\u{08}'),
        'f' => Some('\u{0c}'),
        'v' => Some('\u{0b}'),
        _ => None,
    };
    if let Some(ch) = simple {
        return format!("{ch}{tail}");
    }
    match first {
        'u' => tail
            .trim_start_matches('{')
            .trim_end_matches('}')
            .split_whitespace()
            .filter_map(|hex| u32::from_str_radix(hex, 16).ok().and_then(char::from_u32))
            .collect(),
        'x' => u32::from_str_radix(&tail, 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default(),
        '\n' => tail,
        other => format!("{other}{tail}"),
    }
}
