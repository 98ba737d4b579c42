//! Store and paging configuration
//!
//! Both structs deserialize from YAML so deployments can ship them alongside
//! the rest of the service configuration:
//!
//! ```yaml
//! uri: "mongodb://localhost:27017"
//! database: "assets"
//! audit_collection: "audit_trail"
//! ```

use mongodb::{Client, Database};
use serde::{Deserialize, Serialize};

use crate::core::error::Result;

/// Service-wide page size; also the advertised maximum in paged responses.
pub const PAGE_SIZE: u32 = 20;

/// Paging defaults applied when a page request carries no explicit size.
///
/// The unfiltered and filtered paths have historically distinct defaults
/// (20 and 10). The divergence is deliberate and kept as configuration —
/// unifying it would silently change existing callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Default page size on the unfiltered paged path.
    pub page_size: u32,
    /// Default page size on the filtered (single-predicate) paged path.
    pub find_page_size: u32,
    /// Effective page size reported for OData queries without `$top`.
    pub odata_page_size: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            find_page_size: 10,
            odata_page_size: PAGE_SIZE,
        }
    }
}

/// Connection settings for the backing MongoDB deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
    /// Collection audit entries are flushed into.
    #[serde(default = "default_audit_collection")]
    pub audit_collection: String,
}

fn default_audit_collection() -> String {
    "audit_trail".to_string()
}

impl StoreConfig {
    /// Parse a config from its YAML representation.
    pub fn from_yaml(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Open a database handle for this configuration.
    pub async fn connect(&self) -> Result<Database> {
        let client = Client::with_uri_str(&self.uri).await?;
        Ok(client.database(&self.database))
    }
}
