//! Startup data for the entity store.
//!
//! Seeds are JSON documents with `services`, `incidents`, and per-service
//! `logs`. Every record passes through the store's validating inserts.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use opsdeck_core::{Incident, LogLine, Service};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::{EntityStore, StoreError};

const BUILTIN_SEED: &str = include_str!("../data/builtin_seed.json");

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub incidents: Vec<Incident>,
    #[serde(default)]
    pub logs: BTreeMap<String, Vec<LogLine>>,
}

/// How many records a seed added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub services: usize,
    pub incidents: usize,
    pub log_lines: usize,
}

impl SeedData {
    /// The small catalog bundled with the binary.
    ///
    /// # Errors
    ///
    /// Fails only if the bundled document is malformed.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_json(BUILTIN_SEED).context("built-in seed data is malformed")
    }

    /// # Errors
    ///
    /// Fails if `text` is not a valid seed document.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("failed to parse seed data")
    }

    /// Reads and parses a seed file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid seed file {}", path.display()))
    }

    /// Inserts services, then incidents, then log lines in document order.
    ///
    /// # Errors
    ///
    /// Stops at the first record the store rejects: a duplicate id, an
    /// invariant violation, or a reference to an unknown service.
    pub fn apply(self, store: &EntityStore) -> Result<SeedSummary, StoreError> {
        let mut summary = SeedSummary::default();

        for service in self.services {
            store.insert_service(service)?;
            summary.services += 1;
        }
        for incident in self.incidents {
            store.insert_incident(incident)?;
            summary.incidents += 1;
        }
        for (service_id, lines) in self.logs {
            for line in lines {
                store.append_log(&service_id, line)?;
                summary.log_lines += 1;
            }
        }

        info!(
            services = summary.services,
            incidents = summary.incidents,
            log_lines = summary.log_lines,
            "entity store seeded"
        );
        Ok(summary)
    }
}
