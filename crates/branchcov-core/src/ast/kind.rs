use std::collections::HashSet;

use serde::Serialize;

use crate::parser::RawNode;

/// Closed set of node variants; every coverage behaviour dispatches on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    /// Synthetic top-of-unit wrapper
    Root,
    /// Statement lists: program, then, else, do, parentheses
    Sequence,
    Literal,
    /// Reads that cannot raise in practice: locals, ivars, constants
    Variable,
    /// Method calls, including bare identifiers that may be calls
    Send,
    /// `recv[index]`
    Index,
    /// Operator method calls: `a + b`, `-a`
    Operator,
    /// `!a`, `not a`
    Not,
    And,
    Or,
    /// if / unless / elsif / ternary
    If,
    /// `body if cond`, `body unless cond`
    IfModifier,
    While,
    WhileModifier,
    /// `body rescue handler`
    RescueModifier,
    /// begin ... rescue ... else ... ensure ... end
    Begin,
    /// One `rescue` clause
    Rescue,
    /// Arrays, hashes, ranges, argument lists
    Collection,
    Pair,
    /// `*a`, `**h`, `&b`
    Splat,
    /// Strings, regexps and symbols that may contain interpolation
    Interpolated,
    /// `#{...}`
    Interpolation,
    Assignment,
    OpAssignment { short_circuit: bool },
    /// return / break / next / redo / retry
    Jump,
    /// `def`, whose body runs once per call
    Def,
    /// `{ |x| ... }`, `do |x| ... end` and lambdas
    Block,
    /// case / when / else
    Case,
    /// One `when` clause
    When,
    /// Constructs evaluated as one opaque step
    Opaque,
}

impl NodeKind {
    /// Map a raw node onto its variant.
    ///
    /// `locals` holds the identifiers bound so far; an identifier outside it
    /// may be a method call and is tracked as a `Send`.
    pub fn classify(raw: &RawNode, source: &str, locals: &HashSet<String>) -> NodeKind {
        match raw.kind.as_str() {
            "program" | "then" | "else" | "do" | "parenthesized_statements" | "ensure"
            | "block_body" | "pattern" => NodeKind::Sequence,
            "begin" | "body_statement" => NodeKind::Begin,
            "rescue" => NodeKind::Rescue,
            "integer" | "float" | "complex" | "rational" | "nil" | "true" | "false"
            | "simple_symbol" | "character" | "hash_key_symbol" | "string_content"
            | "escape_sequence" | "string_array" | "symbol_array" | "empty_statement" => {
                NodeKind::Literal
            }
            "instance_variable" | "global_variable" | "class_variable" | "constant" | "self" => {
                NodeKind::Variable
            }
            "identifier" => {
                if locals.contains(raw.text(source)) {
                    NodeKind::Variable
                } else {
                    NodeKind::Send
                }
            }
            "call" if raw.field("method").is_some() => NodeKind::Send,
            "element_reference" if raw.field("object").is_some() => NodeKind::Index,
            "binary" => match binary_operator(raw, source) {
                "&&" | "and" => NodeKind::And,
                "||" | "or" => NodeKind::Or,
                _ => NodeKind::Operator,
            },
            "unary" => match unary_operator(raw, source) {
                "!" | "not" => NodeKind::Not,
                "defined?" => NodeKind::Opaque,
                _ => NodeKind::Operator,
            },
            "if" | "unless" | "elsif" | "conditional" => NodeKind::If,
            "if_modifier" | "unless_modifier" => NodeKind::IfModifier,
            "while" | "until" => NodeKind::While,
            "while_modifier" | "until_modifier" => NodeKind::WhileModifier,
            "rescue_modifier" => NodeKind::RescueModifier,
            "array" | "hash" | "range" | "argument_list" => NodeKind::Collection,
            "pair" => NodeKind::Pair,
            "splat_argument" | "hash_splat_argument" | "block_argument" => NodeKind::Splat,
            "string" | "regex" | "delimited_symbol" => NodeKind::Interpolated,
            "interpolation" => NodeKind::Interpolation,
            "assignment" => NodeKind::Assignment,
            "operator_assignment" => {
                let short_circuit = matches!(assignment_operator(raw, source), "||=" | "&&=");
                NodeKind::OpAssignment { short_circuit }
            }
            "return" | "break" | "next" | "redo" | "retry" => NodeKind::Jump,
            "method" | "singleton_method" => NodeKind::Def,
            "block" | "do_block" | "lambda" => NodeKind::Block,
            "case" => NodeKind::Case,
            "when" => NodeKind::When,
            _ => NodeKind::Opaque,
        }
    }

    /// Executable nodes are marked `'x'` when unreached, inert ones `'-'`
    pub fn is_executable(self) -> bool {
        matches!(
            self,
            NodeKind::Variable
                | NodeKind::Send
                | NodeKind::Index
                | NodeKind::Operator
                | NodeKind::Not
                | NodeKind::Splat
                | NodeKind::Interpolation
                | NodeKind::Assignment
                | NodeKind::OpAssignment { .. }
                | NodeKind::Jump
                | NodeKind::Def
                | NodeKind::Opaque
        )
    }

    /// Kinds whose children run once each, in order
    pub fn is_chain(self) -> bool {
        matches!(
            self,
            NodeKind::Sequence
                | NodeKind::Send
                | NodeKind::Index
                | NodeKind::Operator
                | NodeKind::Not
                | NodeKind::Collection
                | NodeKind::Pair
                | NodeKind::Splat
                | NodeKind::Interpolated
                | NodeKind::Interpolation
                | NodeKind::Assignment
                | NodeKind::OpAssignment { short_circuit: false }
                | NodeKind::Jump
                | NodeKind::Rescue
        )
    }

    /// Kinds that get a completion tracker: anything dispatching a method
    pub fn tracks_completion(self) -> bool {
        matches!(
            self,
            NodeKind::Send
                | NodeKind::Index
                | NodeKind::Operator
                | NodeKind::OpAssignment { short_circuit: false }
        )
    }

    /// Kinds that form one branch of a conditional and may be sequences
    pub fn is_sequence(self) -> bool {
        matches!(self, NodeKind::Sequence)
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::Sequence => "sequence",
            NodeKind::Literal => "literal",
            NodeKind::Variable => "variable",
            NodeKind::Send => "send",
            NodeKind::Index => "index",
            NodeKind::Operator => "operator",
            NodeKind::Not => "not",
            NodeKind::And => "and",
            NodeKind::Or => "or",
            NodeKind::If => "if",
            NodeKind::IfModifier => "if_modifier",
            NodeKind::While => "while",
            NodeKind::WhileModifier => "while_modifier",
            NodeKind::RescueModifier => "rescue_modifier",
            NodeKind::Begin => "begin",
            NodeKind::Rescue => "rescue",
            NodeKind::Collection => "collection",
            NodeKind::Pair => "pair",
            NodeKind::Splat => "splat",
            NodeKind::Interpolated => "interpolated",
            NodeKind::Interpolation => "interpolation",
            NodeKind::Assignment => "assignment",
            NodeKind::OpAssignment { .. } => "op_assignment",
            NodeKind::Jump => "jump",
            NodeKind::Def => "def",
            NodeKind::Block => "block",
            NodeKind::Case => "case",
            NodeKind::When => "when",
            NodeKind::Opaque => "opaque",
        }
    }
}

fn binary_operator<'s>(raw: &RawNode, source: &'s str) -> &'s str {
    match (raw.field("left"), raw.field("right")) {
        (Some(left), Some(right)) => raw.operator_between(source, left, right),
        _ => "",
    }
}

fn unary_operator<'s>(raw: &RawNode, source: &'s str) -> &'s str {
    match raw.field("operand") {
        Some(operand) => source
            .get(raw.range.start..operand.range.start)
            .unwrap_or("")
            .trim()
            .trim_end_matches('('),
        None => "",
    }
}

fn assignment_operator<'s>(raw: &RawNode, source: &'s str) -> &'s str {
    match (raw.field("left"), raw.field("right")) {
        (Some(left), Some(right)) => raw.operator_between(source, left, right),
        _ => "",
    }
}

/// Names bound by an assignment target, including destructuring lists
pub(crate) fn bound_names(target: &RawNode, source: &str, out: &mut Vec<String>) {
    match target.kind.as_str() {
        "identifier" => out.push(target.text(source).to_string()),
        "left_assignment_list" | "destructured_left_assignment" | "rest_assignment" => {
            for child in target.nodes() {
                bound_names(child, source, out);
            }
        }
        _ => {}
    }
}

/// Names bound by method or block parameters
pub(crate) fn parameter_names(parameters: &RawNode, source: &str, out: &mut Vec<String>) {
    for parameter in parameters.nodes() {
        match parameter.kind.as_str() {
            "identifier" => out.push(parameter.text(source).to_string()),
            "destructured_parameter" => parameter_names(parameter, source, out),
            _ => {
                if let Some(name) = parameter.field("name") {
                    out.push(name.text(source).to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_depends_on_bound_locals() {
        let raw = RawNode::new("identifier", 0..1);
        let mut locals = HashSet::new();
        assert_eq!(NodeKind::classify(&raw, "a", &locals), NodeKind::Send);
        locals.insert("a".to_string());
        assert_eq!(NodeKind::classify(&raw, "a", &locals), NodeKind::Variable);
    }

    #[test]
    fn test_binary_operator_selects_kind() {
        let source = "a || b";
        let raw = RawNode::new("binary", 0..6)
            .with_child(Some("left"), RawNode::new("identifier", 0..1))
            .with_child(Some("right"), RawNode::new("identifier", 5..6));
        assert_eq!(NodeKind::classify(&raw, source, &HashSet::new()), NodeKind::Or);

        let source = "a + b";
        let raw = RawNode::new("binary", 0..5)
            .with_child(Some("left"), RawNode::new("identifier", 0..1))
            .with_child(Some("right"), RawNode::new("identifier", 4..5));
        assert_eq!(
            NodeKind::classify(&raw, source, &HashSet::new()),
            NodeKind::Operator
        );
    }

    #[test]
    fn test_short_circuit_assignment() {
        let source = "a ||= 1";
        let raw = RawNode::new("operator_assignment", 0..7)
            .with_child(Some("left"), RawNode::new("identifier", 0..1))
            .with_child(Some("right"), RawNode::new("integer", 6..7));
        assert_eq!(
            NodeKind::classify(&raw, source, &HashSet::new()),
            NodeKind::OpAssignment { short_circuit: true }
        );
    }

    #[test]
    fn test_unknown_kinds_are_opaque() {
        let raw = RawNode::new("class", 0..10);
        assert_eq!(NodeKind::classify(&raw, "", &HashSet::new()), NodeKind::Opaque);
        assert!(NodeKind::Opaque.is_executable());
        assert!(!NodeKind::Literal.is_executable());
    }

    #[test]
    fn test_parameter_names_cover_every_form() {
        let source = "a, b = 1, *c, d:, &e";
        let parameters = RawNode::new("method_parameters", 0..source.len())
            .with_child(None, RawNode::new("identifier", 0..1))
            .with_child(
                None,
                RawNode::new("optional_parameter", 3..8)
                    .with_child(Some("name"), RawNode::new("identifier", 3..4))
                    .with_child(Some("value"), RawNode::new("integer", 7..8)),
            )
            .with_child(
                None,
                RawNode::new("splat_parameter", 10..12)
                    .with_child(Some("name"), RawNode::new("identifier", 11..12)),
            )
            .with_child(
                None,
                RawNode::new("keyword_parameter", 14..16)
                    .with_child(Some("name"), RawNode::new("identifier", 14..15)),
            )
            .with_child(
                None,
                RawNode::new("block_parameter", 18..20)
                    .with_child(Some("name"), RawNode::new("identifier", 19..20)),
            );
        let mut names = Vec::new();
        parameter_names(&parameters, source, &mut names);
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    }
}
