//! Named parameters and statement preparation.
//!
//! Callers write named placeholders as `:name`. Preparation rewrites them to
//! the engine's positional `@P1`, `@P2`, ... markers and collects the values
//! in marker order, so the driver binds every value natively. Placeholders
//! inside string literals, quoted identifiers and comments are left alone, and
//! `::` (static method calls such as `geography::Point`) is never treated as a
//! placeholder.

use crate::error::ConnectorError;
use crate::value::SqlValue;

/// A named query parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    name: String,
    value: SqlValue,
    sensitive: bool,
}

impl Param {
    /// Parameter name without the leading colon
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound value
    pub fn value(&self) -> &SqlValue {
        &self.value
    }

    /// True when the value must be redacted from errors and logs
    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    fn display_value(&self) -> String {
        if self.sensitive {
            return "****".to_string();
        }
        match &self.value {
            SqlValue::Text(s) => format!("'{}'", s),
            other => other.to_string(),
        }
    }
}

/// Ordered mapping of parameter name to value.
///
/// # Example
/// ```rust
/// use cxmidl_core::QueryParams;
///
/// let params = QueryParams::new()
///     .bind("schema", "dbo")
///     .bind_sensitive("api_key", "s3cr3t");
///
/// assert_eq!(params.len(), 2);
/// assert!(params.get("api_key").unwrap().is_sensitive());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    params: Vec<Param>,
}

impl QueryParams {
    /// Creates an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a parameter
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(name.into(), value.into(), false);
        self
    }

    /// Adds or replaces a parameter whose value is redacted in diagnostics
    #[must_use]
    pub fn bind_sensitive(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(name.into(), value.into(), true);
        self
    }

    /// Flags an existing parameter as sensitive; returns false if absent
    pub fn mark_sensitive(&mut self, name: &str) -> bool {
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(param) => {
                param.sensitive = true;
                true
            }
            None => false,
        }
    }

    /// Looks up a parameter by name
    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Iterates parameters in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True when no parameters are set
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    fn insert(&mut self, name: String, value: SqlValue, sensitive: bool) {
        let name = name.trim_start_matches(':').to_string();
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(existing) => {
                existing.value = value;
                existing.sensitive = sensitive;
            }
            None => self.params.push(Param {
                name,
                value,
                sensitive,
            }),
        }
    }
}

impl<K: Into<String>, V: Into<SqlValue>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |params, (name, value)| params.bind(name, value))
    }
}

/// A statement ready to hand to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    original: String,
    sql: String,
    bound: Vec<Param>,
}

impl Statement {
    /// A statement with no parameters, sent verbatim
    pub fn raw(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            original: sql.clone(),
            sql,
            bound: Vec::new(),
        }
    }

    /// Rewrites `:name` placeholders and collects their values.
    ///
    /// # Errors
    /// Returns a binding error if the text is empty or a placeholder has no
    /// matching parameter.
    pub fn prepare(sql: &str, params: &QueryParams) -> crate::Result<Self> {
        if sql.trim().is_empty() {
            return Err(ConnectorError::binding("<empty>", "query text is empty"));
        }

        let mut rewritten = String::with_capacity(sql.len());
        let mut bound: Vec<Param> = Vec::new();
        let chars: Vec<char> = sql.chars().collect();
        let mut state = LexState::Code;
        let mut i = 0usize;

        while let Some(&c) = chars.get(i) {
            let next = chars.get(i.saturating_add(1)).copied();
            match state {
                LexState::Code => match c {
                    '\'' => state = LexState::StringLiteral,
                    '"' => state = LexState::QuotedIdent,
                    '[' => state = LexState::BracketIdent,
                    '-' if next == Some('-') => state = LexState::LineComment,
                    '/' if next == Some('*') => {
                        state = LexState::BlockComment(1);
                        rewritten.push_str("/*");
                        i = i.saturating_add(2);
                        continue;
                    }
                    ':' if next == Some(':') => {
                        rewritten.push_str("::");
                        i = i.saturating_add(2);
                        continue;
                    }
                    ':' if next.is_some_and(is_ident_start) => {
                        let start = i.saturating_add(1);
                        let end = chars[start..]
                            .iter()
                            .position(|ch| !is_ident_char(*ch))
                            .map_or(chars.len(), |offset| start.saturating_add(offset));
                        let name: String = chars[start..end].iter().collect();
                        let position = match bound.iter().position(|p| p.name == name) {
                            Some(existing) => existing,
                            None => {
                                let param = params.get(&name).ok_or_else(|| {
                                    ConnectorError::binding(
                                        sql,
                                        format!("no value supplied for parameter ':{}'", name),
                                    )
                                })?;
                                bound.push(param.clone());
                                bound.len().saturating_sub(1)
                            }
                        };
                        rewritten.push_str(&format!("@P{}", position.saturating_add(1)));
                        i = end;
                        continue;
                    }
                    _ => {}
                },
                LexState::StringLiteral => {
                    if c == '\'' {
                        if next == Some('\'') {
                            rewritten.push_str("''");
                            i = i.saturating_add(2);
                            continue;
                        }
                        state = LexState::Code;
                    }
                }
                LexState::QuotedIdent => {
                    if c == '"' {
                        state = LexState::Code;
                    }
                }
                LexState::BracketIdent => {
                    if c == ']' {
                        if next == Some(']') {
                            rewritten.push_str("]]");
                            i = i.saturating_add(2);
                            continue;
                        }
                        state = LexState::Code;
                    }
                }
                LexState::LineComment => {
                    if c == '\n' {
                        state = LexState::Code;
                    }
                }
                LexState::BlockComment(depth) => {
                    if c == '/' && next == Some('*') {
                        state = LexState::BlockComment(depth.saturating_add(1));
                        rewritten.push_str("/*");
                        i = i.saturating_add(2);
                        continue;
                    }
                    if c == '*' && next == Some('/') {
                        state = if depth <= 1 {
                            LexState::Code
                        } else {
                            LexState::BlockComment(depth.saturating_sub(1))
                        };
                        rewritten.push_str("*/");
                        i = i.saturating_add(2);
                        continue;
                    }
                }
            }
            rewritten.push(c);
            i = i.saturating_add(1);
        }

        Ok(Self {
            original: sql.to_string(),
            sql: rewritten,
            bound,
        })
    }

    /// Text sent to the engine, with positional markers
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Text as the caller wrote it
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Values in marker order (`@P1` first)
    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.bound.iter().map(Param::value)
    }

    /// Number of bound values
    pub fn param_count(&self) -> usize {
        self.bound.len()
    }

    /// Statement text plus parameters with sensitive values masked.
    pub fn redacted(&self) -> String {
        let text = self.original.split_whitespace().collect::<Vec<_>>().join(" ");
        if self.bound.is_empty() {
            return text;
        }
        let rendered: Vec<String> = self
            .bound
            .iter()
            .map(|p| format!(":{}={}", p.name, p.display_value()))
            .collect();
        format!("{} [{}]", text, rendered.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Code,
    StringLiteral,
    QuotedIdent,
    BracketIdent,
    LineComment,
    BlockComment(u32),
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
