//! Claim templates
//!
//! A template is JSON text with `{{path.to.field}}` placeholders, rendered
//! against a JSON context and parsed back into a claim map:
//!
//! ```text
//! {"act": {"sub": "agent:{{identity.entity.id}}"}, "groups": {{identity.subject.groups}}}
//! ```
//!
//! - Inside a JSON string, a placeholder splices the value as text (strings
//!   raw, anything else as compact JSON), escaped for the string.
//! - Outside a string, it splices the value as JSON, so arrays and objects
//!   keep their shape.
//! - A path that does not resolve is an error. There is no empty fallback.
//! - Numeric segments index arrays (`groups.0`). A leading `.` is ignored.
//!
//! Templates are compiled when a role is written, so syntax errors and
//! templates that cannot produce an object are caught before any exchange.

use serde_json::{Map, Value, json};

use crate::{Claims, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field { path: Vec<String>, quoted: bool },
}

/// A parsed claim template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimTemplate {
    segments: Vec<Segment>,
}

impl ClaimTemplate {
    /// Parse `source` and check it renders to a JSON object.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedInput`] for an unterminated or empty placeholder, an
    /// invalid path, or text that is not a JSON object.
    pub fn compile(source: &str) -> Result<Self> {
        let bytes = source.as_bytes();
        let mut segments = Vec::new();
        let mut literal_start = 0;
        let mut in_string = false;
        let mut escaped = false;
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i..].starts_with(b"{{") {
                let rest = &source[i + 2..];
                let end = rest.find("}}").ok_or_else(|| {
                    Error::malformed(format!("unterminated placeholder at offset {i}"))
                })?;
                let path = parse_path(&rest[..end])?;

                if literal_start < i {
                    segments.push(Segment::Literal(source[literal_start..i].to_string()));
                }
                segments.push(Segment::Field {
                    path,
                    quoted: in_string,
                });

                i += end + 4;
                literal_start = i;
                escaped = false;
                continue;
            }

            let b = bytes[i];
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
            } else if b == b'"' {
                in_string = true;
            }
            i += 1;
        }

        if literal_start < bytes.len() {
            segments.push(Segment::Literal(source[literal_start..].to_string()));
        }

        let template = Self { segments };
        template.check_shape()?;
        Ok(template)
    }

    /// Render against `context`.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedInput`] if a placeholder does not resolve or the
    /// result is not a JSON object.
    pub fn render(&self, context: &Value) -> Result<Claims> {
        let mut out = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { path, quoted } => {
                    let value = lookup(context, path).ok_or_else(|| {
                        Error::malformed(format!(
                            "template field {} not found in context",
                            path.join(".")
                        ))
                    })?;
                    if *quoted {
                        let text = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        let encoded = serde_json::to_string(&text)?;
                        out.push_str(&encoded[1..encoded.len() - 1]);
                    } else {
                        out.push_str(&value.to_string());
                    }
                }
            }
        }

        parse_object(&out)
    }

    /// Dotted paths of all placeholders, in order.
    pub fn fields(&self) -> impl Iterator<Item = String> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field { path, .. } => Some(path.join(".")),
            Segment::Literal(_) => None,
        })
    }

    /// Render with every placeholder stubbed and require an object.
    fn check_shape(&self) -> Result<()> {
        let probe: String = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.as_str(),
                Segment::Field { quoted: true, .. } => "",
                Segment::Field { quoted: false, .. } => "null",
            })
            .collect();
        parse_object(&probe).map(drop)
    }
}

/// Compile and render in one step.
pub fn render(template: &str, context: &Value) -> Result<Claims> {
    ClaimTemplate::compile(template)?.render(context)
}

/// Context for subject templates: `{"identity": {"subject": <claims>}}`.
#[must_use]
pub fn subject_context(claims: &Claims) -> Value {
    json!({ "identity": { "subject": claims } })
}

fn parse_path(raw: &str) -> Result<Vec<String>> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(Error::malformed("empty template placeholder"));
    }

    trimmed
        .split('.')
        .map(|seg| {
            let valid = !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if valid {
                Ok(seg.to_string())
            } else {
                Err(Error::malformed(format!(
                    "invalid template placeholder {{{{{raw}}}}}"
                )))
            }
        })
        .collect()
}

fn lookup<'a>(context: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(context, |node, seg| match node {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn parse_object(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::malformed("template must produce a JSON object")),
        Err(e) => Err(Error::malformed(format!("template is not valid JSON: {e}"))),
    }
}
