//! Context-key expressions.
//!
//! A small boolean predicate language over named context keys, used for walkthrough and
//! step visibility (`when`) and for `onContext:` completion triggers. Supported syntax:
//! bare keys (truthiness), `true`/`false`, `!`, `==`, `!=`, `&&`, `||`, and parentheses.
//! `&&` binds tighter than `||`. Literals on the right of a comparison may be quoted with
//! `'` or `"`, or written bare.
//!
//! The engine only relies on `parse`, `evaluate`, `referenced_keys`, and `serialize`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Errors produced while parsing an expression.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextExprError {
    #[error("expression cannot be empty")]
    Empty,
    #[error("unbalanced quotes or parentheses in '{0}'")]
    Unbalanced(String),
    #[error("comparison '{0}' must include both left and right operands")]
    MissingOperand(String),
    #[error("unsupported operand '{0}'")]
    InvalidOperand(String),
}

/// Snapshot of context key values an expression is evaluated against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSnapshot {
    values: HashMap<String, Value>,
}

impl ContextSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    fn is_truthy(&self, key: &str) -> bool {
        match self.values.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(value)) => *value,
            Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(text)) => !text.is_empty(),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        }
    }

    fn literal(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ContextSnapshot {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Node {
    True,
    False,
    Has(String),
    Equals(String, String),
    NotEquals(String, String),
    Not(Box<Node>),
    And(Vec<Node>),
    Or(Vec<Node>),
}

/// A parsed, evaluable context expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextExpr {
    node: Node,
}

impl ContextExpr {
    /// Parses `source` into an expression.
    pub fn parse(source: &str) -> Result<Self, ContextExprError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(ContextExprError::Empty);
        }
        if !is_balanced(trimmed) {
            return Err(ContextExprError::Unbalanced(trimmed.to_string()));
        }
        let node = normalize(parse_node(trimmed)?);
        Ok(Self { node })
    }

    /// Evaluates the expression against `context`.
    pub fn evaluate(&self, context: &ContextSnapshot) -> bool {
        evaluate_node(&self.node, context)
    }

    /// Every key the expression reads.
    pub fn referenced_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        collect_keys(&self.node, &mut keys);
        keys
    }

    /// Canonical text form. Equivalent expressions that differ only in operand order or
    /// redundant terms of `&&`/`||` serialize identically.
    pub fn serialize(&self) -> String {
        serialize_node(&self.node)
    }
}

impl fmt::Display for ContextExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

fn parse_node(expression: &str) -> Result<Node, ContextExprError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(ContextExprError::Empty);
    }

    if let Some(parts) = split_expression(expression, "||")? {
        return Ok(Node::Or(parts.into_iter().map(parse_node).collect::<Result<_, _>>()?));
    }
    if let Some(parts) = split_expression(expression, "&&")? {
        return Ok(Node::And(parts.into_iter().map(parse_node).collect::<Result<_, _>>()?));
    }

    let (negations, inner) = strip_leading_negations(expression);
    let inner = inner.trim();
    if inner.is_empty() {
        return Err(ContextExprError::InvalidOperand(expression.to_string()));
    }

    let node = if let Some(unwrapped) = strip_enclosing_parens(inner) {
        parse_node(unwrapped)?
    } else if let Some(position) = find_top_level_operator(inner, "!=") {
        let (key, value) = comparison_operands(inner, position)?;
        Node::NotEquals(key, value)
    } else if let Some(position) = find_top_level_operator(inner, "==") {
        let (key, value) = comparison_operands(inner, position)?;
        Node::Equals(key, value)
    } else {
        match inner {
            "true" => Node::True,
            "false" => Node::False,
            key if is_key(key) => Node::Has(key.to_string()),
            other => return Err(ContextExprError::InvalidOperand(other.to_string())),
        }
    };

    Ok(if negations % 2 == 1 { Node::Not(Box::new(node)) } else { node })
}

fn comparison_operands(expression: &str, position: usize) -> Result<(String, String), ContextExprError> {
    let left = expression[..position].trim();
    let right = expression[position + 2..].trim();
    if left.is_empty() || right.is_empty() {
        return Err(ContextExprError::MissingOperand(expression.to_string()));
    }
    if !is_key(left) {
        return Err(ContextExprError::InvalidOperand(left.to_string()));
    }
    Ok((left.to_string(), parse_literal(right)?))
}

fn parse_literal(literal: &str) -> Result<String, ContextExprError> {
    for quote in ['\'', '"'] {
        if let Some(rest) = literal.strip_prefix(quote) {
            return match rest.strip_suffix(quote) {
                Some(inner) if !inner.contains(quote) => Ok(inner.to_string()),
                _ => Err(ContextExprError::InvalidOperand(literal.to_string())),
            };
        }
    }
    if literal.contains(char::is_whitespace) || literal.contains(['(', ')', '!', '=']) {
        return Err(ContextExprError::InvalidOperand(literal.to_string()));
    }
    Ok(literal.to_string())
}

fn is_key(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|character| character.is_alphanumeric() || matches!(character, '_' | '.' | '-' | ':' | '/' | '@' | '#'))
}

fn normalize(node: Node) -> Node {
    match node {
        Node::Not(inner) => match normalize(*inner) {
            Node::Not(double) => *double,
            Node::True => Node::False,
            Node::False => Node::True,
            Node::Equals(key, value) => Node::NotEquals(key, value),
            Node::NotEquals(key, value) => Node::Equals(key, value),
            other => Node::Not(Box::new(other)),
        },
        Node::And(terms) => normalize_terms(terms, true),
        Node::Or(terms) => normalize_terms(terms, false),
        other => other,
    }
}

fn normalize_terms(terms: Vec<Node>, conjunction: bool) -> Node {
    let mut flattened = Vec::new();
    for term in terms.into_iter().map(normalize) {
        match (term, conjunction) {
            (Node::And(inner), true) | (Node::Or(inner), false) => flattened.extend(inner),
            (other, _) => flattened.push(other),
        }
    }
    flattened.sort_by_cached_key(serialize_node);
    flattened.dedup();
    if flattened.len() == 1 {
        return flattened.remove(0);
    }
    if conjunction { Node::And(flattened) } else { Node::Or(flattened) }
}

fn evaluate_node(node: &Node, context: &ContextSnapshot) -> bool {
    match node {
        Node::True => true,
        Node::False => false,
        Node::Has(key) => context.is_truthy(key),
        Node::Equals(key, value) => context.literal(key).as_deref() == Some(value.as_str()),
        Node::NotEquals(key, value) => context.literal(key).as_deref() != Some(value.as_str()),
        Node::Not(inner) => !evaluate_node(inner, context),
        Node::And(terms) => terms.iter().all(|term| evaluate_node(term, context)),
        Node::Or(terms) => terms.iter().any(|term| evaluate_node(term, context)),
    }
}

fn collect_keys(node: &Node, keys: &mut BTreeSet<String>) {
    match node {
        Node::True | Node::False => {}
        Node::Has(key) | Node::Equals(key, _) | Node::NotEquals(key, _) => {
            keys.insert(key.clone());
        }
        Node::Not(inner) => collect_keys(inner, keys),
        Node::And(terms) | Node::Or(terms) => terms.iter().for_each(|term| collect_keys(term, keys)),
    }
}

fn serialize_node(node: &Node) -> String {
    match node {
        Node::True => "true".to_string(),
        Node::False => "false".to_string(),
        Node::Has(key) => key.clone(),
        Node::Equals(key, value) => format!("{key} == {}", quote_literal(value)),
        Node::NotEquals(key, value) => format!("{key} != {}", quote_literal(value)),
        Node::Not(inner) => match inner.as_ref() {
            Node::Has(key) => format!("!{key}"),
            other => format!("!({})", serialize_node(other)),
        },
        Node::And(terms) => terms
            .iter()
            .map(|term| match term {
                Node::Or(_) => format!("({})", serialize_node(term)),
                _ => serialize_node(term),
            })
            .collect::<Vec<_>>()
            .join(" && "),
        Node::Or(terms) => terms.iter().map(serialize_node).collect::<Vec<_>>().join(" || "),
    }
}

fn quote_literal(value: &str) -> String {
    if value.contains('\'') { format!("\"{value}\"") } else { format!("'{value}'") }
}

fn split_expression<'a>(expression: &'a str, operator: &str) -> Result<Option<Vec<&'a str>>, ContextExprError> {
    let mut parts = Vec::new();
    let mut start = 0usize;

    while let Some(relative_index) = find_top_level_operator(&expression[start..], operator) {
        let absolute_index = start + relative_index;
        parts.push(expression[start..absolute_index].trim());
        start = absolute_index + operator.len();
    }
    if parts.is_empty() {
        return Ok(None);
    }
    parts.push(expression[start..].trim());

    if parts.iter().any(|part| part.is_empty()) {
        return Err(ContextExprError::MissingOperand(expression.to_string()));
    }
    Ok(Some(parts))
}

fn strip_leading_negations(expression: &str) -> (usize, &str) {
    let mut count = 0usize;
    let mut remainder = expression.trim_start();
    while let Some(stripped) = remainder.strip_prefix('!') {
        if stripped.starts_with('=') {
            break;
        }
        count += 1;
        remainder = stripped.trim_start();
    }
    (count, remainder)
}

/// Returns the inside of `(...)` when the opening parenthesis closes at the very end.
fn strip_enclosing_parens(expression: &str) -> Option<&str> {
    let inner = expression.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for character in inner.chars() {
        match (quote, character) {
            (Some(open), current) if current == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(character),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(inner)
}

fn is_balanced(expression: &str) -> bool {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for character in expression.chars() {
        match (quote, character) {
            (Some(open), current) if current == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(character),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0 && quote.is_none()
}

fn find_top_level_operator(expression: &str, operator: &str) -> Option<usize> {
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut depth = 0i32;

    for (index, character) in expression.char_indices() {
        match character {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                continue;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                continue;
            }
            '(' if !in_single_quote && !in_double_quote => {
                depth += 1;
                continue;
            }
            ')' if !in_single_quote && !in_double_quote => {
                if depth > 0 {
                    depth -= 1;
                }
                continue;
            }
            _ => {}
        }

        if !in_single_quote && !in_double_quote && depth == 0 && expression[index..].starts_with(operator) {
            return Some(index);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(pairs: &[(&str, Value)]) -> ContextSnapshot {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expression = ContextExpr::parse("a || b && c").unwrap();
        assert!(expression.evaluate(&context(&[("a", json!(true))])));
        assert!(!expression.evaluate(&context(&[("b", json!(true))])));
        assert!(expression.evaluate(&context(&[("b", json!(true)), ("c", json!(true))])));
    }

    #[test]
    fn parentheses_and_negation() {
        let expression = ContextExpr::parse("!(a || b) && c").unwrap();
        assert!(expression.evaluate(&context(&[("c", json!(true))])));
        assert!(!expression.evaluate(&context(&[("a", json!(true)), ("c", json!(true))])));
        assert_eq!(expression.referenced_keys().into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn comparisons_use_string_forms() {
        let expression = ContextExpr::parse("workbenchState == 'folder' && count != 0").unwrap();
        assert!(expression.evaluate(&context(&[("workbenchState", json!("folder")), ("count", json!(2))])));
        assert!(!expression.evaluate(&context(&[("workbenchState", json!("empty")), ("count", json!(2))])));
        assert!(!expression.evaluate(&context(&[("workbenchState", json!("folder")), ("count", json!(0))])));
    }

    #[test]
    fn serialization_is_canonical() {
        let left = ContextExpr::parse("b && (a)").unwrap();
        let right = ContextExpr::parse("  a&&b && a ").unwrap();
        assert_eq!(left.serialize(), "a && b");
        assert_eq!(left.serialize(), right.serialize());

        let mixed = ContextExpr::parse("!!x && (y || z == \"v\")").unwrap();
        assert_eq!(mixed.serialize(), "x && (y || z == 'v')");
        assert_eq!(ContextExpr::parse(&mixed.serialize()).unwrap(), mixed);

        assert_eq!(ContextExpr::parse("!(k == 'v')").unwrap().serialize(), "k != 'v'");
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        assert_eq!(ContextExpr::parse("   "), Err(ContextExprError::Empty));
        assert!(matches!(ContextExpr::parse("(a && b"), Err(ContextExprError::Unbalanced(_))));
        assert!(matches!(ContextExpr::parse("a &&"), Err(ContextExprError::MissingOperand(_))));
        assert!(matches!(ContextExpr::parse("== b"), Err(ContextExprError::MissingOperand(_))));
        assert!(matches!(ContextExpr::parse("a b"), Err(ContextExprError::InvalidOperand(_))));
        assert!(matches!(ContextExpr::parse("a == b c"), Err(ContextExprError::InvalidOperand(_))));
    }

    #[test]
    fn utf8_literals_do_not_panic() {
        let expression = ContextExpr::parse("locale == \"café\" && region == 'ü'").unwrap();
        assert!(expression.evaluate(&context(&[("locale", json!("café")), ("region", json!("ü"))])));
    }

    #[test]
    fn missing_keys_are_falsy() {
        let expression = ContextExpr::parse("!missing").unwrap();
        assert!(expression.evaluate(&ContextSnapshot::new()));
        assert!(ContextExpr::parse("missing != 'x'").unwrap().evaluate(&ContextSnapshot::new()));
    }
}
