//! Static child schemas.
//!
//! Each node kind declares an ordered list of slots. A slot names the grammar
//! field it reads (or `None` for positional children), how many children it
//! takes, and whether those children are decorated or kept as atoms.
//! At most one `Rest` slot is allowed and it must come last.

use super::NodeKind;
use crate::{parser::RawNode, CoverError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    One,
    Optional,
    Rest,
}

/// What a slot accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepts {
    /// Any raw node, decorated recursively
    Node,
    /// Only these raw kinds, decorated recursively
    Kinds(&'static [&'static str]),
    /// Any raw node, kept verbatim and never instrumented
    Atom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub name: &'static str,
    pub field: Option<&'static str>,
    pub arity: Arity,
    pub accepts: Accepts,
}

impl Slot {
    const fn new(
        name: &'static str,
        field: Option<&'static str>,
        arity: Arity,
        accepts: Accepts,
    ) -> Self {
        Self {
            name,
            field,
            arity,
            accepts,
        }
    }

    pub fn decorates(&self) -> bool {
        !matches!(self.accepts, Accepts::Atom)
    }

    fn field_matches(&self, field: Option<&'static str>) -> bool {
        match self.field {
            Some(expected) => field == Some(expected),
            None => true,
        }
    }

    fn kind_matches(&self, raw: &RawNode) -> bool {
        match self.accepts {
            Accepts::Node | Accepts::Atom => true,
            Accepts::Kinds(kinds) => kinds.contains(&raw.kind.as_str()),
        }
    }
}

use Accepts::{Atom, Kinds, Node};
use Arity::{One, Optional, Rest};

const ROOT: &[Slot] = &[Slot::new("main", None, One, Node)];
const STATEMENTS: &[Slot] = &[Slot::new("statements", None, Rest, Node)];
const ATOMS: &[Slot] = &[Slot::new("parts", None, Rest, Atom)];
const SEND: &[Slot] = &[
    Slot::new("receiver", Some("receiver"), Optional, Node),
    Slot::new("method", Some("method"), One, Atom),
    Slot::new("arguments", Some("arguments"), Optional, Kinds(&["argument_list"])),
    Slot::new("block", Some("block"), Optional, Kinds(&["block", "do_block"])),
];
const INDEX: &[Slot] = &[
    Slot::new("receiver", Some("object"), One, Node),
    Slot::new("arguments", None, Rest, Node),
];
const BINARY: &[Slot] = &[
    Slot::new("left", Some("left"), One, Node),
    Slot::new("right", Some("right"), One, Node),
];
const UNARY: &[Slot] = &[Slot::new("operand", Some("operand"), One, Node)];
const IF: &[Slot] = &[
    Slot::new("condition", Some("condition"), One, Node),
    Slot::new("consequence", Some("consequence"), Optional, Node),
    Slot::new("alternative", Some("alternative"), Optional, Node),
];
const MODIFIER: &[Slot] = &[
    Slot::new("body", Some("body"), One, Node),
    Slot::new("condition", Some("condition"), One, Node),
];
const WHILE: &[Slot] = &[
    Slot::new("condition", Some("condition"), One, Node),
    Slot::new("body", Some("body"), One, Node),
];
const RESCUE_MODIFIER: &[Slot] = &[
    Slot::new("body", Some("body"), One, Node),
    Slot::new("handler", Some("handler"), One, Node),
];
const RESCUE: &[Slot] = &[
    Slot::new("exceptions", Some("exceptions"), Optional, Atom),
    Slot::new("variable", Some("variable"), Optional, Atom),
    Slot::new("body", Some("body"), Optional, Node),
];
const PAIR: &[Slot] = &[
    Slot::new("key", Some("key"), One, Node),
    Slot::new("value", Some("value"), Optional, Node),
];
const SPLAT: &[Slot] = &[Slot::new("value", None, Optional, Node)];
const ELEMENTS: &[Slot] = &[Slot::new("elements", None, Rest, Node)];
const PARTS: &[Slot] = &[Slot::new("parts", None, Rest, Node)];
const ASSIGNMENT: &[Slot] = &[
    Slot::new("target", Some("left"), One, Atom),
    Slot::new("value", Some("right"), One, Node),
];
const JUMP: &[Slot] = &[Slot::new("arguments", None, Optional, Kinds(&["argument_list"]))];
const DEF: &[Slot] = &[
    Slot::new("object", Some("object"), Optional, Atom),
    Slot::new("name", Some("name"), One, Atom),
    Slot::new("parameters", Some("parameters"), Optional, Atom),
    Slot::new("body", Some("body"), Optional, Node),
];
const BLOCK: &[Slot] = &[
    Slot::new("parameters", Some("parameters"), Optional, Atom),
    Slot::new("body", Some("body"), Optional, Node),
];
const CASE: &[Slot] = &[
    Slot::new("value", Some("value"), Optional, Node),
    Slot::new("clauses", None, Rest, Kinds(&["when", "else"])),
];
const WHEN: &[Slot] = &[
    Slot::new("patterns", Some("pattern"), Rest, Kinds(&["pattern"])),
    Slot::new("body", Some("body"), Optional, Node),
];

/// The declared schema of a node kind
pub fn schema_for(kind: NodeKind) -> &'static [Slot] {
    match kind {
        NodeKind::Root => ROOT,
        NodeKind::Sequence | NodeKind::Begin | NodeKind::Interpolation => STATEMENTS,
        NodeKind::Literal | NodeKind::Variable | NodeKind::Opaque => ATOMS,
        NodeKind::Send => SEND,
        NodeKind::Index => INDEX,
        NodeKind::Operator | NodeKind::Not => UNARY,
        NodeKind::And | NodeKind::Or => BINARY,
        NodeKind::If => IF,
        NodeKind::IfModifier | NodeKind::WhileModifier => MODIFIER,
        NodeKind::While => WHILE,
        NodeKind::RescueModifier => RESCUE_MODIFIER,
        NodeKind::Rescue => RESCUE,
        NodeKind::Collection => ELEMENTS,
        NodeKind::Pair => PAIR,
        NodeKind::Splat => SPLAT,
        NodeKind::Interpolated => PARTS,
        NodeKind::Assignment | NodeKind::OpAssignment { .. } => ASSIGNMENT,
        NodeKind::Jump => JUMP,
        NodeKind::Def => DEF,
        NodeKind::Block => BLOCK,
        NodeKind::Case => CASE,
        NodeKind::When => WHEN,
    }
}

/// Binary operators share the `Operator` kind with unary ones; pick the
/// schema by the raw shape
pub fn schema_for_raw(kind: NodeKind, raw: &RawNode) -> &'static [Slot] {
    match kind {
        NodeKind::Operator if raw.kind == "binary" => BINARY,
        NodeKind::Send if raw.kind == "identifier" || raw.kind == "identifier_suffix" => ATOMS,
        _ => schema_for(kind),
    }
}

/// Assign raw children to slots, failing on the first violation
pub fn assign<'r>(
    kind: NodeKind,
    raw: &'r RawNode,
    schema: &'static [Slot],
) -> Result<Vec<(&'static Slot, &'r RawNode)>> {
    let children = &raw.children;
    let mut assigned = Vec::with_capacity(children.len());
    let mut index = 0;

    for slot in schema {
        match slot.arity {
            Arity::One => {
                let child = children
                    .get(index)
                    .filter(|child| slot.field_matches(child.field))
                    .ok_or_else(|| {
                        CoverError::child_mismatch(kind.name(), slot.name, "required child missing")
                    })?;
                check_kind(kind, slot, &child.node)?;
                assigned.push((slot, &child.node));
                index += 1;
            }
            Arity::Optional => {
                if let Some(child) = children.get(index) {
                    let take = match slot.field {
                        Some(_) => slot.field_matches(child.field),
                        None => slot.kind_matches(&child.node),
                    };
                    if take {
                        check_kind(kind, slot, &child.node)?;
                        assigned.push((slot, &child.node));
                        index += 1;
                    }
                }
            }
            Arity::Rest => {
                while let Some(child) = children.get(index) {
                    if !slot.field_matches(child.field) {
                        break;
                    }
                    check_kind(kind, slot, &child.node)?;
                    assigned.push((slot, &child.node));
                    index += 1;
                }
            }
        }
    }

    if let Some(extra) = children.get(index) {
        return Err(CoverError::child_mismatch(
            kind.name(),
            extra.field.unwrap_or("<positional>"),
            format!("unexpected child of kind '{}'", extra.node.kind),
        ));
    }
    Ok(assigned)
}

fn check_kind(kind: NodeKind, slot: &Slot, raw: &RawNode) -> Result<()> {
    if slot.kind_matches(raw) {
        Ok(())
    } else {
        Err(CoverError::child_mismatch(
            kind.name(),
            slot.name,
            format!("child of kind '{}' not accepted", raw.kind),
        ))
    }
}
