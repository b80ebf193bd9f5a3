//! Read-only MCP resources.
//!
//! Resources give the client views of the open design and of the bridge
//! without calling a tool. Host-backed views go through the dispatcher like
//! any other command, so they honour the current mode.

use serde::Serialize;

/// URI scheme shared by every resource.
pub const RESOURCE_SCHEME: &str = "cad://";

/// MIME type of every resource body.
pub const RESOURCE_MIME_TYPE: &str = "application/json";

/// Where a resource's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSource {
    /// The host's `get_design_info` command.
    DesignInfo,
    /// The host's `get_features` command.
    DesignFeatures,
    /// Components recorded in the design intent store.
    Components,
    /// Sketches recorded in the design intent store.
    Sketches,
    /// Store summary, design statement and recent history.
    ContextSummary,
    /// The stored design statement.
    DesignIntent,
    /// Server and bridge status.
    SystemStatus,
}

/// One entry of the resource catalogue.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSpec {
    /// Resource URI.
    pub uri: &'static str,
    /// Short name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Content source.
    pub source: ResourceSource,
}

const fn resource(
    uri: &'static str,
    name: &'static str,
    description: &'static str,
    source: ResourceSource,
) -> ResourceSpec {
    ResourceSpec {
        uri,
        name,
        description,
        source,
    }
}

/// Every resource the server exposes.
pub const RESOURCES: &[ResourceSpec] = &[
    resource(
        "cad://design/info",
        "Design info",
        "The open host document, as reported by the CAD host",
        ResourceSource::DesignInfo,
    ),
    resource(
        "cad://design/features",
        "Design features",
        "Features of the open design, as reported by the CAD host",
        ResourceSource::DesignFeatures,
    ),
    resource(
        "cad://design/components",
        "Components",
        "Components recorded in this design session",
        ResourceSource::Components,
    ),
    resource(
        "cad://design/sketches",
        "Sketches",
        "Sketches recorded in this design session",
        ResourceSource::Sketches,
    ),
    resource(
        "cad://context/summary",
        "Context summary",
        "Entity counts, design statement and recent command history",
        ResourceSource::ContextSummary,
    ),
    resource(
        "cad://context/design_intent",
        "Design intent",
        "The stored project statement: description, requirements, constraints and tags",
        ResourceSource::DesignIntent,
    ),
    resource(
        "cad://system/status",
        "System status",
        "Server version, bridge mode and connection health",
        ResourceSource::SystemStatus,
    ),
];

/// Looks up a resource by URI.
#[must_use]
pub fn find(uri: &str) -> Option<&'static ResourceSpec> {
    RESOURCES.iter().find(|spec| spec.uri == uri)
}

/// A resource entry for the resources/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// Resource URI.
    pub uri: &'static str,
    /// Short name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Content type.
    pub mime_type: &'static str,
}

impl From<&ResourceSpec> for ResourceDefinition {
    fn from(spec: &ResourceSpec) -> Self {
        Self {
            uri: spec.uri,
            name: spec.name,
            description: spec.description,
            mime_type: RESOURCE_MIME_TYPE,
        }
    }
}

/// One content item of a resources/read response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// URI that was read.
    pub uri: String,
    /// Content type.
    pub mime_type: &'static str,
    /// Pretty-printed JSON body.
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uris_are_unique_and_scoped() {
        let mut uris: Vec<_> = RESOURCES.iter().map(|r| r.uri).collect();
        uris.sort_unstable();
        uris.dedup();
        assert_eq!(uris.len(), RESOURCES.len());
        assert!(RESOURCES.iter().all(|r| r.uri.starts_with(RESOURCE_SCHEME)));
    }

    #[test]
    fn lookup_by_uri() {
        let spec = find("cad://system/status").unwrap();
        assert_eq!(spec.source, ResourceSource::SystemStatus);
        assert!(find("cad://nowhere").is_none());
    }
}
