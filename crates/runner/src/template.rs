//! Command Templates
//!
//! Argument templates with `{name}` placeholders, rendered per invocation.
//!
//! - A token that is exactly one list placeholder expands to one argument
//!   per value.
//! - A token that references an unset placeholder is dropped, so an optional
//!   flag written as `--sketch-size={sketch_size}` disappears when the
//!   resource profile imposes no restriction.
//! - A token that references an unknown placeholder is a configuration error.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use strain_cascade_core::{CoreError, CoreResult};

/// Value bound to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    Single(String),
    List(Vec<String>),
    /// Known placeholder with no value for this invocation
    Unset,
}

/// Placeholder bindings for one rendering.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: BTreeMap<String, TemplateValue>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a single value.
    pub fn set(mut self, name: &str, value: impl Display) -> Self {
        self.values
            .insert(name.to_string(), TemplateValue::Single(value.to_string()));
        self
    }

    /// Bind a list value.
    pub fn set_list<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Display,
    {
        self.values.insert(
            name.to_string(),
            TemplateValue::List(values.into_iter().map(|v| v.to_string()).collect()),
        );
        self
    }

    /// Bind a value that may be absent.
    pub fn set_optional<V: Display>(mut self, name: &str, value: Option<V>) -> Self {
        let value = match value {
            Some(v) => TemplateValue::Single(v.to_string()),
            None => TemplateValue::Unset,
        };
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.values.get(name)
    }
}

/// Piece of a tokenised template argument.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Split a token into literals and `{name}` placeholders. Braces that do not
/// enclose a valid name are literal text.
fn segments(token: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = token;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder_name(&after[..close]) => {
                if open > 0 {
                    out.push(Segment::Literal(&rest[..open]));
                }
                out.push(Segment::Placeholder(&after[..close]));
                rest = &after[close + 1..];
            }
            _ => {
                out.push(Segment::Literal(&rest[..open + 1]));
                rest = after;
            }
        }
    }
    if !rest.is_empty() {
        out.push(Segment::Literal(rest));
    }
    out
}

/// A single template token list (`args`) or a single-token locator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate {
    tokens: Vec<String>,
}

impl CommandTemplate {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Placeholder names referenced anywhere in the template.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tokens
            .iter()
            .flat_map(|token| segments(token))
            .filter_map(|segment| match segment {
                Segment::Placeholder(name) => Some(name),
                Segment::Literal(_) => None,
            })
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Reject placeholders outside `known`.
    pub fn validate(&self, known: &[&str]) -> CoreResult<()> {
        let unknown: Vec<&str> = self
            .placeholders()
            .into_iter()
            .filter(|name| !known.contains(name))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(CoreError::config(format!(
                "Unknown placeholder(s) {} in template '{}' (available: {})",
                unknown
                    .iter()
                    .map(|n| format!("{{{}}}", n))
                    .collect::<Vec<_>>()
                    .join(", "),
                self.tokens.join(" "),
                known.join(", ")
            )))
        }
    }

    /// Render against `context`.
    pub fn render(&self, context: &TemplateContext) -> CoreResult<Vec<String>> {
        let mut args = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            let parts = segments(token);

            if let [Segment::Placeholder(name)] = parts.as_slice() {
                match lookup(context, name)? {
                    TemplateValue::List(values) => {
                        args.extend(values.iter().cloned());
                        continue;
                    }
                    TemplateValue::Unset => continue,
                    TemplateValue::Single(_) => {}
                }
            }

            if let Some(rendered) = render_token(token, &parts, context)? {
                args.push(rendered);
            }
        }
        Ok(args)
    }

    /// Render a template that must produce exactly one value, such as an
    /// artifact locator.
    pub fn render_single(&self, context: &TemplateContext) -> CoreResult<String> {
        let mut rendered = self.render(context)?;
        match rendered.len() {
            1 => Ok(rendered.remove(0)),
            n => Err(CoreError::config(format!(
                "Template '{}' rendered to {} values, expected exactly one",
                self.tokens.join(" "),
                n
            ))),
        }
    }
}

fn lookup<'c>(context: &'c TemplateContext, name: &str) -> CoreResult<&'c TemplateValue> {
    context
        .get(name)
        .ok_or_else(|| CoreError::config(format!("Unknown placeholder {{{}}}", name)))
}

/// Render one embedded-placeholder token. `None` drops the token.
fn render_token(
    token: &str,
    parts: &[Segment<'_>],
    context: &TemplateContext,
) -> CoreResult<Option<String>> {
    let mut out = String::with_capacity(token.len());
    for part in parts {
        match part {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder(name) => match lookup(context, name)? {
                TemplateValue::Single(value) => out.push_str(value),
                TemplateValue::Unset => return Ok(None),
                TemplateValue::List(_) => {
                    return Err(CoreError::config(format!(
                        "List placeholder {{{}}} must be a whole argument, found in '{}'",
                        name, token
                    )))
                }
            },
        }
    }
    Ok(Some(out))
}
