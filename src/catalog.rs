//! Framework, protocol and method metadata offered to clients.
//!
//! Purely informational: the store accepts any token for these fields.

use serde::Serialize;

use crate::config::CatalogConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Framework {
    pub id: String,
    pub name: String,
}

pub struct Catalog {
    config: CatalogConfig,
}

impl Catalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self { config }
    }

    pub fn frameworks(&self) -> Vec<Framework> {
        self.config
            .frameworks
            .iter()
            .map(|f| Framework {
                id: f.id.clone(),
                name: f.name.clone(),
            })
            .collect()
    }

    /// Protocols of `framework`; unknown frameworks (or frameworks with
    /// an empty list) get the default protocol alone.
    pub fn protocols_for(&self, framework: &str) -> Vec<String> {
        self.config
            .frameworks
            .iter()
            .find(|f| f.id == framework && !f.protocols.is_empty())
            .map(|f| f.protocols.clone())
            .unwrap_or_else(|| vec![self.config.default_protocol.clone()])
    }

    pub fn methods(&self) -> &[String] {
        &self.config.methods
    }
}
