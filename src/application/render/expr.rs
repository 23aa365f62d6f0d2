//! Expressions accepted inside `{{ … }}` markers and directive attributes.
//!
//! The grammar is intentionally small: a path or literal, an optional
//! leading `!`, and a chain of `| filter:arg` pipes.

use std::{collections::HashMap, sync::Arc};

use serde_json::{Map, Number, Value};

use super::error::BindingError;

pub type FilterFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync>;

/// Named filters available to expressions, assembled by the injector.
#[derive(Clone, Default)]
pub struct Filters {
    entries: HashMap<String, FilterFn>,
}

impl Filters {
    pub fn insert(&mut self, name: impl Into<String>, filter: FilterFn) {
        self.entries.insert(name.into(), filter);
    }

    pub fn extend(&mut self, other: &Filters) {
        for (name, filter) in &other.entries {
            self.entries.insert(name.clone(), Arc::clone(filter));
        }
    }

    fn apply(&self, name: &str, value: &Value, args: &[Value]) -> Result<Value, BindingError> {
        let filter = self
            .entries
            .get(name)
            .ok_or_else(|| BindingError::UnknownFilter(name.to_string()))?;
        filter(value, args).map_err(|message| BindingError::Filter {
            filter: name.to_string(),
            message,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Anything expressions can read names from.
pub trait Resolve {
    fn resolve(&self, key: &str) -> Option<&Value>;
}

impl Resolve for Map<String, Value> {
    fn resolve(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

impl Resolve for Value {
    fn resolve(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    Path(Vec<Segment>),
}

#[derive(Debug, Clone, PartialEq)]
struct FilterCall {
    name: String,
    args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    negate: bool,
    head: Operand,
    filters: Vec<FilterCall>,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, BindingError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(BindingError::expression(source, "expression is empty"));
        }

        let mut parts = split_outside_quotes(trimmed, '|')
            .map_err(|message| BindingError::expression(source, message))?
            .into_iter();
        let head_src = parts.next().unwrap_or_default();
        let head_src = head_src.trim();
        let (negate, head_src) = match head_src.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, head_src),
        };
        let head = parse_operand(head_src).map_err(|message| BindingError::expression(source, message))?;

        let mut filters = Vec::new();
        for part in parts {
            let mut pieces = split_outside_quotes(part.trim(), ':')
                .map_err(|message| BindingError::expression(source, message))?
                .into_iter();
            let name = pieces.next().unwrap_or_default().trim().to_string();
            if name.is_empty() || !name.chars().all(is_ident_char) {
                return Err(BindingError::expression(
                    source,
                    format!("invalid filter name `{name}`"),
                ));
            }
            let args = pieces
                .map(|arg| parse_operand(arg.trim()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|message| BindingError::expression(source, message))?;
            filters.push(FilterCall { name, args });
        }

        Ok(Self {
            source: trimmed.to_string(),
            negate,
            head,
            filters,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, scope: &dyn Resolve, filters: &Filters) -> Result<Value, BindingError> {
        let mut value = evaluate_operand(&self.head, scope);
        if self.negate {
            value = Value::Bool(!is_truthy(&value));
        }
        for call in &self.filters {
            let args = call
                .args
                .iter()
                .map(|arg| evaluate_operand(arg, scope))
                .collect::<Vec<_>>();
            value = filters.apply(&call.name, &value, &args)?;
        }
        Ok(value)
    }
}

/// Text split into literal runs and `{{ expression }}` markers.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Literal(String),
    Expr(Expression),
}

impl Interpolation {
    pub fn parse(text: &str) -> Result<Self, BindingError> {
        let mut parts = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            if start > 0 {
                parts.push(Part::Literal(rest[..start].to_string()));
            }
            let inner = &rest[start + 2..start + 2 + len];
            parts.push(Part::Expr(Expression::parse(inner)?));
            rest = &rest[start + 2 + len + 2..];
        }

        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn is_static(&self) -> bool {
        self.parts.iter().all(|part| matches!(part, Part::Literal(_)))
    }

    /// Substitute every marker with its display string. No escaping is applied.
    pub fn render(&self, scope: &dyn Resolve, filters: &Filters) -> Result<String, BindingError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Expr(expr) => out.push_str(&display(&expr.evaluate(scope, filters)?)),
            }
        }
        Ok(out)
    }
}

pub fn has_markers(text: &str) -> bool {
    text.find("{{")
        .is_some_and(|start| text[start + 2..].contains("}}"))
}

/// Display form of a value as it appears in rendered markup.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Filters registered by the `core` module.
pub fn base_filters() -> Filters {
    let mut filters = Filters::default();
    filters.insert("json", filter(|value, _| Ok(Value::String(value.to_string()))));
    filters.insert(
        "uppercase",
        filter(|value, _| Ok(Value::String(display(value).to_uppercase()))),
    );
    filters.insert(
        "lowercase",
        filter(|value, _| Ok(Value::String(display(value).to_lowercase()))),
    );
    filters.insert(
        "default",
        filter(|value, args| {
            let empty = value.is_null() || value.as_str().is_some_and(str::is_empty);
            match (empty, args.first()) {
                (true, Some(fallback)) => Ok(fallback.clone()),
                (true, None) => Err("missing fallback argument".to_string()),
                (false, _) => Ok(value.clone()),
            }
        }),
    );
    filters.insert(
        "length",
        filter(|value, _| {
            let len = match value {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::String(text) => text.chars().count(),
                _ => 0,
            };
            Ok(Value::Number(Number::from(len)))
        }),
    );
    filters
}

/// Wrap a closure as a [`FilterFn`].
pub fn filter(
    f: impl Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
) -> FilterFn {
    Arc::new(f)
}

fn evaluate_operand(operand: &Operand, scope: &dyn Resolve) -> Value {
    match operand {
        Operand::Literal(value) => value.clone(),
        Operand::Path(segments) => lookup_path(segments, scope).cloned().unwrap_or(Value::Null),
    }
}

fn lookup_path<'a>(segments: &[Segment], scope: &'a dyn Resolve) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let Segment::Key(root) = first else {
        return None;
    };
    let mut current = scope.resolve(root)?;
    for segment in rest {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(idx), Value::Array(items)) => items.get(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '$' | '-')
}

fn parse_operand(src: &str) -> Result<Operand, String> {
    if src.is_empty() {
        return Err("missing operand".to_string());
    }

    if let Some(quote) = src.chars().next().filter(|ch| matches!(ch, '\'' | '"')) {
        return parse_string_literal(src, quote).map(|text| Operand::Literal(Value::String(text)));
    }

    match src {
        "true" => return Ok(Operand::Literal(Value::Bool(true))),
        "false" => return Ok(Operand::Literal(Value::Bool(false))),
        "null" => return Ok(Operand::Literal(Value::Null)),
        _ => {}
    }

    if src.starts_with(|ch: char| ch.is_ascii_digit() || ch == '-') {
        if let Ok(int) = src.parse::<i64>() {
            return Ok(Operand::Literal(Value::Number(Number::from(int))));
        }
        if let Some(number) = src.parse::<f64>().ok().and_then(Number::from_f64) {
            return Ok(Operand::Literal(Value::Number(number)));
        }
        return Err(format!("invalid number `{src}`"));
    }

    parse_path(src).map(Operand::Path)
}

fn parse_string_literal(src: &str, quote: char) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = src.chars().skip(1);
    let mut closed = false;
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(escaped) => out.push(escaped),
                None => return Err("dangling escape in string literal".to_string()),
            },
            ch if ch == quote => {
                closed = true;
                break;
            }
            ch => out.push(ch),
        }
    }
    if !closed {
        return Err("unterminated string literal".to_string());
    }
    if chars.next().is_some() {
        return Err("unexpected characters after string literal".to_string());
    }
    Ok(out)
}

fn parse_path(src: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut chars = src.chars().peekable();
    let mut current = String::new();

    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if current.is_empty() {
                    return Err(format!("empty path segment in `{src}`"));
                }
                segments.push(Segment::Key(std::mem::take(&mut current)));
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
                let mut inner = String::new();
                let mut closed = false;
                for ch in chars.by_ref() {
                    if ch == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(ch);
                }
                if !closed {
                    return Err(format!("unterminated index in `{src}`"));
                }
                let inner = inner.trim();
                if let Ok(idx) = inner.parse::<usize>() {
                    segments.push(Segment::Index(idx));
                } else if let Some(quote) = inner.chars().next().filter(|ch| matches!(ch, '\'' | '"')) {
                    segments.push(Segment::Key(parse_string_literal(inner, quote)?));
                } else {
                    return Err(format!("invalid index `{inner}`"));
                }
                if chars.peek() == Some(&'.') {
                    chars.next();
                }
            }
            ch if is_ident_char(ch) => current.push(ch),
            ch => return Err(format!("unexpected character `{ch}` in `{src}`")),
        }
    }

    if !current.is_empty() {
        segments.push(Segment::Key(current));
    }
    if !matches!(segments.first(), Some(Segment::Key(_))) {
        return Err(format!("path `{src}` must start with a name"));
    }
    Ok(segments)
}

fn split_outside_quotes(src: &str, delimiter: char) -> Result<Vec<String>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in src.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => {
                current.push(ch);
                escaped = true;
            }
            (Some(open), ch) if ch == open => {
                current.push(ch);
                quote = None;
            }
            (None, '\'' | '"') => {
                current.push(ch);
                quote = Some(ch);
            }
            (None, ch) if ch == delimiter => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal".to_string());
    }
    parts.push(current);
    Ok(parts)
}
