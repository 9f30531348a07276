//! Element paths inside geometry documents
//!
//! Supports the path subset parameter files use:
//!
//! - `tag`, `*` and `.` steps separated by `/`
//! - `//` for any depth below the current elements
//! - predicates `[@attr]`, `[@attr='value']`, `[tag]`, `[tag='text']`
//!   and 1-based positions `[n]`
//!
//! Paths are evaluated relative to the document root, which is never a
//! match itself unless the path is `.`.

use xmltree::{Element, XMLNode};

use crate::error::{Result, TrialError};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
enum NameTest {
    /// `.`
    Current,
    /// `*`
    Any,
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    HasAttr(String),
    AttrEquals(String, String),
    HasChild(String),
    ChildText(String, String),
    Position(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NameTest,
    predicates: Vec<Predicate>,
}

/// A parsed element path
#[derive(Debug, Clone, PartialEq)]
pub struct ElementPath {
    source: String,
    steps: Vec<Step>,
}

/// Location of an element: child indices from the root
pub type NodePath = Vec<usize>;

impl ElementPath {
    pub fn parse(selector: &str) -> Result<Self> {
        let invalid = |reason: &str| TrialError::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        };

        let text = selector.trim();
        if text.is_empty() {
            return Err(invalid("empty path"));
        }
        if text.starts_with('/') {
            return Err(invalid("absolute paths are not supported on an element"));
        }

        let mut steps = Vec::new();
        let mut axis = Axis::Child;
        let mut rest = text;
        while !rest.is_empty() {
            let (step_text, remainder) = split_step(rest).map_err(|reason| invalid(&reason))?;
            steps.push(parse_step(step_text, axis).map_err(|reason| invalid(&reason))?);
            if let Some(after) = remainder.strip_prefix("//") {
                axis = Axis::Descendant;
                rest = after;
            } else if let Some(after) = remainder.strip_prefix('/') {
                axis = Axis::Child;
                rest = after;
            } else {
                rest = remainder;
            }
            if rest.is_empty() && remainder.starts_with('/') {
                return Err(invalid("path ends with a separator"));
            }
        }

        Ok(Self {
            source: selector.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Locations of every matching element, in document order
    pub fn select(&self, root: &Element) -> Vec<NodePath> {
        let mut current: Vec<NodePath> = vec![Vec::new()];
        for step in &self.steps {
            let mut next: Vec<NodePath> = Vec::new();
            for context in &current {
                let Some(element) = resolve(root, context) else {
                    continue;
                };
                let candidates = match (&step.test, &step.axis) {
                    (NameTest::Current, Axis::Child) => vec![context.clone()],
                    (_, Axis::Child) => child_paths(element, context),
                    (_, Axis::Descendant) => {
                        let mut found = Vec::new();
                        collect_descendants(element, context, &mut found);
                        found
                    }
                };
                let candidates: Vec<NodePath> = candidates
                    .into_iter()
                    .filter(|path| {
                        resolve(root, path).map_or(false, |el| step.test.matches(el))
                    })
                    .collect();
                for path in apply_predicates(root, candidates, &step.predicates) {
                    if !next.contains(&path) {
                        next.push(path);
                    }
                }
            }
            current = next;
        }
        current
    }
}

impl NameTest {
    fn matches(&self, element: &Element) -> bool {
        match self {
            NameTest::Current | NameTest::Any => true,
            NameTest::Named(name) => element.name == *name,
        }
    }
}

/// Element at a location
pub fn resolve<'a>(root: &'a Element, path: &[usize]) -> Option<&'a Element> {
    let mut element = root;
    for &index in path {
        match element.children.get(index) {
            Some(XMLNode::Element(child)) => element = child,
            _ => return None,
        }
    }
    Some(element)
}

/// Mutable element at a location
pub fn resolve_mut<'a>(root: &'a mut Element, path: &[usize]) -> Option<&'a mut Element> {
    let mut element = root;
    for &index in path {
        match element.children.get_mut(index) {
            Some(XMLNode::Element(child)) => element = child,
            _ => return None,
        }
    }
    Some(element)
}

fn child_paths(element: &Element, base: &NodePath) -> Vec<NodePath> {
    element
        .children
        .iter()
        .enumerate()
        .filter(|(_, node)| matches!(node, XMLNode::Element(_)))
        .map(|(index, _)| {
            let mut path = base.clone();
            path.push(index);
            path
        })
        .collect()
}

fn collect_descendants(element: &Element, base: &NodePath, out: &mut Vec<NodePath>) {
    for (index, node) in element.children.iter().enumerate() {
        if let XMLNode::Element(child) = node {
            let mut path = base.clone();
            path.push(index);
            out.push(path.clone());
            collect_descendants(child, &path, out);
        }
    }
}

fn apply_predicates(root: &Element, mut paths: Vec<NodePath>, predicates: &[Predicate]) -> Vec<NodePath> {
    for predicate in predicates {
        paths = match predicate {
            Predicate::Position(n) => paths.into_iter().nth(n - 1).into_iter().collect(),
            other => paths
                .into_iter()
                .filter(|path| resolve(root, path).map_or(false, |el| other.holds(el)))
                .collect(),
        };
    }
    paths
}

impl Predicate {
    fn holds(&self, element: &Element) -> bool {
        match self {
            Predicate::HasAttr(name) => element.attributes.contains_key(name.as_str()),
            Predicate::AttrEquals(name, value) => {
                element.attributes.get(name.as_str()).map_or(false, |v| v == value)
            }
            Predicate::HasChild(tag) => element.get_child(tag.as_str()).is_some(),
            Predicate::ChildText(tag, text) => element.children.iter().any(|node| match node {
                XMLNode::Element(child) if child.name == *tag => child
                    .get_text()
                    .map_or(text.is_empty(), |t| t == text.as_str()),
                _ => false,
            }),
            Predicate::Position(_) => true,
        }
    }
}

/// Split off the next step, respecting brackets and quotes
fn split_step(input: &str) -> std::result::Result<(&str, &str), String> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ']'".to_string())?
            }
            (None, '/') if depth == 0 => return Ok((&input[..i], &input[i..])),
            _ => {}
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if depth != 0 {
        return Err("unbalanced '['".to_string());
    }
    Ok((input, ""))
}

fn parse_step(text: &str, axis: Axis) -> std::result::Result<Step, String> {
    let (name, mut rest) = match text.find('[') {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    };
    let test = match name.trim() {
        "" => return Err("empty step".to_string()),
        "." => NameTest::Current,
        "*" => NameTest::Any,
        ".." => return Err("parent steps are not supported".to_string()),
        other if other.chars().all(is_name_char) => NameTest::Named(other.to_string()),
        other => return Err(format!("invalid element name '{}'", other)),
    };

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let inner_end = closing_bracket(rest).ok_or_else(|| "unbalanced '['".to_string())?;
        predicates.push(parse_predicate(rest[1..inner_end].trim())?);
        rest = &rest[inner_end + 1..];
    }
    Ok(Step {
        axis,
        test,
        predicates,
    })
}

fn closing_bracket(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_predicate(text: &str) -> std::result::Result<Predicate, String> {
    if let Ok(position) = text.parse::<usize>() {
        if position == 0 {
            return Err("positions start at 1".to_string());
        }
        return Ok(Predicate::Position(position));
    }
    let (lhs, value) = match text.split_once('=') {
        Some((lhs, rhs)) => (lhs.trim(), Some(unquote(rhs.trim())?)),
        None => (text, None),
    };
    match (lhs.strip_prefix('@'), value) {
        (Some(attr), None) if is_name(attr) => Ok(Predicate::HasAttr(attr.to_string())),
        (Some(attr), Some(value)) if is_name(attr) => {
            Ok(Predicate::AttrEquals(attr.to_string(), value))
        }
        (None, None) if is_name(lhs) => Ok(Predicate::HasChild(lhs.to_string())),
        (None, Some(value)) if is_name(lhs) => Ok(Predicate::ChildText(lhs.to_string(), value)),
        _ => Err(format!("unsupported predicate '[{}]'", text)),
    }
}

fn unquote(text: &str) -> std::result::Result<String, String> {
    let quoted = (text.starts_with('\'') && text.ends_with('\''))
        || (text.starts_with('"') && text.ends_with('"'));
    if quoted && text.len() >= 2 {
        Ok(text[1..text.len() - 1].to_string())
    } else {
        Err(format!("value {} must be quoted", text))
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn is_name(text: &str) -> bool {
    !text.is_empty() && text.chars().all(is_name_char)
}
