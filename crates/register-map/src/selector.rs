//! Field-path selectors for REST responses.
//!
//! A selector walks a JSON document and never executes anything:
//!
//! ```text
//! selector := '$'? step*
//! step     := '.' ident | '[' integer ']' | '[' quoted ']'
//! ```
//!
//! The first step may omit its dot, so `data.power`, `$.data.power`,
//! `["data"]["power"]` and `data.items[0].value` are all valid.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    steps: Vec<Step>,
}

impl Selector {
    pub fn parse(src: &str) -> Result<Self, String> {
        let s = src.trim();
        let bytes = s.as_bytes();
        let mut i = 0usize;
        let mut steps = Vec::new();

        if bytes.first() == Some(&b'$') {
            i = 1;
        }
        let mut first = true;
        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    i += 1;
                    let (ident, next) = read_ident(s, i)?;
                    steps.push(Step::Field(ident));
                    i = next;
                }
                b'[' => {
                    let close = s[i..]
                        .find(']')
                        .map(|p| p + i)
                        .ok_or_else(|| format!("unclosed '[' at {i}"))?;
                    let inner = s[i + 1..close].trim();
                    steps.push(parse_bracket(inner)?);
                    i = close + 1;
                }
                _ if first => {
                    let (ident, next) = read_ident(s, i)?;
                    steps.push(Step::Field(ident));
                    i = next;
                }
                c => return Err(format!("unexpected '{}' at {i}", c as char)),
            }
            first = false;
        }
        if steps.is_empty() {
            return Err("empty selector".to_string());
        }
        Ok(Self {
            source: s.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Walk the document; `None` when any step does not resolve.
    pub fn select<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut cur = doc;
        for step in &self.steps {
            cur = match step {
                Step::Field(name) => cur.as_object()?.get(name)?,
                Step::Index(idx) => cur.as_array()?.get(*idx)?,
            };
        }
        Some(cur)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn read_ident(s: &str, start: usize) -> Result<(String, usize), String> {
    let end = s[start..]
        .find(|c: char| c == '.' || c == '[')
        .map(|p| p + start)
        .unwrap_or(s.len());
    let ident = &s[start..end];
    if ident.is_empty() {
        return Err(format!("empty field name at {start}"));
    }
    if !ident
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!("invalid field name `{ident}`"));
    }
    Ok((ident.to_string(), end))
}

fn parse_bracket(inner: &str) -> Result<Step, String> {
    for q in ['"', '\''] {
        if let Some(rest) = inner.strip_prefix(q) {
            let name = rest
                .strip_suffix(q)
                .ok_or_else(|| format!("unterminated quote in [{inner}]"))?;
            return Ok(Step::Field(name.to_string()));
        }
    }
    inner
        .parse::<usize>()
        .map(Step::Index)
        .map_err(|_| format!("expected index or quoted name, got [{inner}]"))
}

/// Numeric view of a selected JSON value: numbers, numeric strings, booleans.
pub fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
