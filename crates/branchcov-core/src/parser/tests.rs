use super::*;

fn parse(source: &str) -> Option<RawNode> {
    RubyParser::new().unwrap().parse_str(source)
}

#[test]
fn test_empty_source_yields_no_tree() {
    assert_eq!(parse(""), None);
    assert_eq!(parse("   \n"), None);
}

#[test]
fn test_comments_are_dropped() {
    let program = parse("# leading comment\n42 # trailing\n").unwrap();
    assert_eq!(program.kind, "program");
    assert_eq!(program.children.len(), 1);
    assert_eq!(program.children[0].node.kind, "integer");
}

#[test]
fn test_if_fields() {
    let source = "if false\n  raise\nelse\n  \"yay\"\nend\n";
    let program = parse(source).unwrap();
    let if_node = &program.children[0].node;
    assert_eq!(if_node.kind, "if");
    assert_eq!(if_node.field("condition").unwrap().kind, "false");
    assert_eq!(if_node.field("consequence").unwrap().kind, "then");
    assert_eq!(if_node.field("alternative").unwrap().kind, "else");
}

#[test]
fn test_operator_between_children() {
    let source = "a && b";
    let program = parse(source).unwrap();
    let binary = &program.children[0].node;
    assert_eq!(binary.kind, "binary");
    let left = binary.field("left").unwrap();
    let right = binary.field("right").unwrap();
    assert_eq!(binary.operator_between(source, left, right), "&&");
}

#[test]
fn test_syntax_error_yields_no_tree() {
    assert_eq!(parse("if (\n"), None);
}

#[test]
fn test_parse_program_reports_syntax_errors() {
    let mut parser = RubyParser::new().unwrap();
    assert!(matches!(
        parser.parse_program("x = (1 +\n"),
        Err(crate::CoverError::Parser(_))
    ));
    assert!(parser.parse_program("# only a comment\n").unwrap().is_none());
}
