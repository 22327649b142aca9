//! Named SQL templates with extract-window placeholders.
//!
//! A template is plain SQL in which `{StartDate}` and `{StopDate}` mark where
//! the window bounds go. Rendering turns each marker into a bound parameter of
//! the target engine (`$n` for Postgres, `?` for ClickHouse), so bound values
//! never become SQL text. `{{` and `}}` stand for literal braces. A marker
//! wrapped in single quotes (`'{StartDate}'`) loses its quotes, which keeps
//! templates written for plain string formatting usable.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Engine;
use crate::error::{IntegrationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBound {
    Start,
    Stop,
}

impl WindowBound {
    pub fn placeholder(self) -> &'static str {
        match self {
            WindowBound::Start => "StartDate",
            WindowBound::Stop => "StopDate",
        }
    }

    fn from_placeholder(name: &str) -> Option<Self> {
        match name {
            "StartDate" => Some(WindowBound::Start),
            "StopDate" => Some(WindowBound::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Bound(WindowBound),
}

/// SQL ready for execution plus the bounds to bind, in bind order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    pub sql: String,
    pub binds: Vec<WindowBound>,
}

#[derive(Debug, Clone)]
pub struct SqlTemplate {
    name: String,
    text: String,
}

impl SqlTemplate {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Reads `<dir>/<name>.sql` as UTF-8.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let path = template_path(dir, name)?;
        let text = fs::read_to_string(&path).map_err(|err| {
            IntegrationError::template(name, format!("cannot read {}: {err}", path.display()))
        })?;
        Ok(Self::new(name, text))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, engine: Engine) -> Result<RenderedQuery> {
        let segments = self.parse()?;
        let mut sql = String::with_capacity(self.text.len());
        let mut binds = Vec::new();

        match engine {
            Engine::Postgres => {
                for segment in segments {
                    match segment {
                        Segment::Text(text) => sql.push_str(&text),
                        Segment::Bound(bound) => {
                            let position = match binds.iter().position(|b| *b == bound) {
                                Some(position) => position,
                                None => {
                                    binds.push(bound);
                                    binds.len() - 1
                                }
                            };
                            sql.push('$');
                            sql.push_str(&(position + 1).to_string());
                        }
                    }
                }
            }
            Engine::ClickHouse => {
                // The client substitutes `?` itself; literal question marks are doubled.
                for segment in segments {
                    match segment {
                        Segment::Text(text) => sql.push_str(&text.replace('?', "??")),
                        Segment::Bound(bound) => {
                            binds.push(bound);
                            sql.push('?');
                        }
                    }
                }
            }
        }

        Ok(RenderedQuery { sql, binds })
    }

    fn parse(&self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = self.text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => {
                                return Err(IntegrationError::template(
                                    &self.name,
                                    "unterminated '{' placeholder",
                                ))
                            }
                        }
                    }

                    let bound = WindowBound::from_placeholder(name.trim()).ok_or_else(|| {
                        IntegrationError::template(
                            &self.name,
                            format!(
                                "unknown placeholder '{{{name}}}', expected {{StartDate}} or {{StopDate}}"
                            ),
                        )
                    })?;

                    if text.ends_with('\'') && chars.peek() == Some(&'\'') {
                        text.pop();
                        chars.next();
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Bound(bound));
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '}' => {
                    return Err(IntegrationError::template(
                        &self.name,
                        "single '}' encountered outside a placeholder",
                    ))
                }
                _ => text.push(c),
            }
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(segments)
    }
}

fn template_path(dir: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        return Err(IntegrationError::template(
            name,
            "template names must not contain path separators",
        ));
    }
    Ok(dir.join(format!("{name}.sql")))
}
