//! Release-name formats: `{key}`, `{username}` and `{owner_id}` placeholders.

use std::fmt;

use thiserror::Error;

use crate::tenant::{MAX_RELEASE_LEN, Owner, is_dns_label};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReleaseNameError {
    #[error("unknown placeholder `{{{0}}}`")]
    UnknownPlaceholder(String),
    #[error("unbalanced braces in `{0}`")]
    Unbalanced(String),
    #[error("release name `{0}` is not a DNS label of at most 53 characters")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Key,
    Username,
    OwnerId,
}

/// A parsed `release_name_format`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseNameFormat {
    raw: String,
    segments: Vec<Segment>,
}

impl ReleaseNameFormat {
    pub fn parse(raw: &str) -> Result<Self, ReleaseNameError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(ReleaseNameError::Unbalanced(raw.to_string())),
                            c => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(ReleaseNameError::Unbalanced(raw.to_string()));
                    }
                    let segment = match name.as_str() {
                        "key" => Segment::Key,
                        "username" => Segment::Username,
                        "owner_id" => Segment::OwnerId,
                        _ => return Err(ReleaseNameError::UnknownPlaceholder(name)),
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                '}' => return Err(ReleaseNameError::Unbalanced(raw.to_string())),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Render the release name for one owner. The result must be a valid
    /// Helm release name.
    pub fn render(&self, service_key: &str, owner: &Owner) -> Result<String, ReleaseNameError> {
        let mut name = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => name.push_str(s),
                Segment::Key => name.push_str(service_key),
                Segment::Username => name.push_str(&owner.username),
                Segment::OwnerId => name.push_str(&owner.id.to_string()),
            }
        }
        if name.len() > MAX_RELEASE_LEN || !is_dns_label(&name) {
            return Err(ReleaseNameError::InvalidName(name));
        }
        Ok(name)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Default for ReleaseNameFormat {
    fn default() -> Self {
        Self {
            raw: "{key}".to_string(),
            segments: vec![Segment::Key],
        }
    }
}

impl fmt::Display for ReleaseNameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
