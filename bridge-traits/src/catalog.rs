//! Remote Media Catalog Abstraction
//!
//! The remote system organizes content as resources (tables) whose records
//! ("things") carry media fields. Every media field value is a file reference
//! identified by a content token. The engine only needs the flattened list of
//! those references plus a way to turn a token into a downloadable URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A resource (table) in the remote schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogResource {
    pub id: String,
    pub name: String,
    pub label: Option<String>,
}

/// Where a file reference was found in the remote catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileOccurrence {
    /// Resource the record belongs to
    pub resource_id: String,
    /// Media field holding the file
    pub field_name: String,
    /// Record identifier
    pub thing_id: String,
    /// Value of the record's first textual field, if any
    pub thing_label: Option<String>,
    /// Language of a translatable field
    pub lang: Option<String>,
}

/// A single file value found in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFile {
    /// Opaque content token issued by the remote system
    pub token: String,
    /// File name as uploaded
    pub name: String,
    pub occurrence: FileOccurrence,
}

/// Remote catalog client
///
/// # Errors
///
/// Implementations return [`BridgeError::Catalog`](crate::BridgeError::Catalog)
/// when the catalog is unreachable or returns malformed data.
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    /// List every resource of the schema that may hold media fields
    async fn list_resources(&self) -> Result<Vec<CatalogResource>>;

    /// List every file value of every media field of a resource
    async fn list_files(&self, resource: &CatalogResource) -> Result<Vec<CatalogFile>>;

    /// Direct (possibly signed) download URL for a token
    fn file_url(&self, token: &str, name: &str) -> String;
}
