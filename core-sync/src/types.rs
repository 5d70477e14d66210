//! # Identity Types
//!
//! Validated newtypes for the two identities the engine keys everything by:
//! the content token (which blob) and the file name (which local entry).
//!
//! Both end up as a single path component on disk, so construction rejects
//! anything that could escape the folder.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Directory under a folder that holds blobs and the link table
pub const DATA_DIR_NAME: &str = "data";

fn is_single_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

// ============================================================================
// ContentToken
// ============================================================================

/// Opaque identifier of a unique content blob issued by the remote system
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentToken(String);

impl ContentToken {
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidToken`] for empty tokens or tokens that are
    /// not a single path component.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if !is_single_component(&token) {
            return Err(SyncError::InvalidToken(token));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentToken {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ContentToken> for String {
    fn from(token: ContentToken) -> Self {
        token.0
    }
}

// ============================================================================
// FileName
// ============================================================================

/// User-visible file name
///
/// Case is preserved for display and on disk, but equality and hashing use
/// the lower-cased form: `Cover.JPG` and `cover.jpg` are the same entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileName {
    display: String,
    normalized: String,
}

impl FileName {
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidFileName`] for empty names, the reserved
    /// `data` directory name, or names that are not a single path component.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let display = name.into();
        let normalized = normalize_name(&display);
        if !is_single_component(&display) || normalized == DATA_DIR_NAME {
            return Err(SyncError::InvalidFileName(display));
        }
        Ok(Self {
            display,
            normalized,
        })
    }

    /// Name as it appears on disk
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// Comparison key
    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

/// Lower-cased comparison form of a name
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}

impl PartialEq for FileName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for FileName {}

impl Hash for FileName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl TryFrom<String> for FileName {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<FileName> for String {
    fn from(name: FileName) -> Self {
        name.display
    }
}

// ============================================================================
// FileRef
// ============================================================================

/// One remote file instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    pub token: ContentToken,
    pub name: FileName,
}

impl FileRef {
    pub fn new(url: impl Into<String>, token: ContentToken, name: FileName) -> Self {
        Self {
            url: url.into(),
            token,
            name,
        }
    }
}
