use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::State;
use crate::template;

/// A named, user-editable text fragment: a prompt template or a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextData {
    pub label: String,
    pub text: String,
}

impl TextData {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

/// Shared handle to a `TextData`. The owning node or connector and the
/// flowchart's registry hold clones of the same handle, so an edit made
/// through either is seen by both.
#[derive(Debug, Clone)]
pub struct SharedText(Arc<RwLock<TextData>>);

impl SharedText {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(TextData::new(label, text))))
    }

    fn read(&self) -> RwLockReadGuard<'_, TextData> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TextData> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn label(&self) -> String {
        self.read().label.clone()
    }

    pub fn text(&self) -> String {
        self.read().text.clone()
    }

    pub fn snapshot(&self) -> TextData {
        self.read().clone()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        self.write().text = text.into();
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.write().label = label.into();
    }

    /// Format the text as a prompt template against `state`.
    pub fn format(&self, state: &State) -> Result<String> {
        template::render(&self.read().text, state)
    }

    pub fn same_as(&self, other: &SharedText) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<TextData> for SharedText {
    fn from(data: TextData) -> Self {
        Self(Arc::new(RwLock::new(data)))
    }
}
