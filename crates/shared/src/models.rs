//! Subscription targets and change event kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RealtimeError;

/// Separator between the doctype and the document id in a subscription key.
///
/// Doctypes are reverse-DNS names (`io.cozy.files`) and never contain it.
pub const KEY_SEPARATOR: char = '/';

/// Reference to either every document of a doctype or a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub doctype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EntityRef {
    /// All documents of `doctype`.
    pub fn all(doctype: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            id: None,
        }
    }

    /// The single document `id` of `doctype`.
    pub fn document(doctype: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            id: Some(id.into()),
        }
    }

    /// Normalized key: `doctype` or `doctype/id`.
    pub fn key(&self) -> String {
        match &self.id {
            Some(id) => format!("{}{}{}", self.doctype, KEY_SEPARATOR, id),
            None => self.doctype.clone(),
        }
    }

    /// Reject references that could never match a server event.
    pub fn validate(&self) -> Result<(), RealtimeError> {
        if self.doctype.trim().is_empty() {
            return Err(RealtimeError::InvalidSubscription(
                "doctype must not be empty".to_string(),
            ));
        }
        if self.doctype.contains(KEY_SEPARATOR) {
            return Err(RealtimeError::InvalidSubscription(format!(
                "doctype '{}' must not contain '{}'",
                self.doctype, KEY_SEPARATOR
            )));
        }
        if matches!(&self.id, Some(id) if id.is_empty()) {
            return Err(RealtimeError::InvalidSubscription(format!(
                "document id for doctype '{}' must not be empty",
                self.doctype
            )));
        }
        Ok(())
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for EntityRef {
    type Err = RealtimeError;

    /// Parse `doctype` or `doctype/id`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entity = match s.split_once(KEY_SEPARATOR) {
            Some((doctype, id)) => EntityRef::document(doctype, id),
            None => EntityRef::all(s),
        };
        entity.validate()?;
        Ok(entity)
    }
}

/// Kind of change a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventName {
    Created,
    Updated,
    Deleted,
}

impl EventName {
    pub const ALL: [EventName; 3] = [EventName::Created, EventName::Updated, EventName::Deleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Created => "created",
            EventName::Updated => "updated",
            EventName::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = RealtimeError;

    /// Case-insensitive, the server sends upper-case names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(EventName::Created),
            "updated" => Ok(EventName::Updated),
            "deleted" => Ok(EventName::Deleted),
            other => Err(RealtimeError::InvalidSubscription(format!(
                "unknown event name '{}'",
                other
            ))),
        }
    }
}
