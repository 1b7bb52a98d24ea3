//! Service registry.
//!
//! A process-wide catalog of every provider the build knows about. At
//! startup each configured provider is registered as `(service_type, name,
//! metadata, factory)`; after that the registry is read-only. Discovery
//! filters on configured credentials so an unconfigured vendor simply does
//! not exist as far as selection is concerned.

use std::collections::HashMap;

use es_domain::error::{Error, Result};
use es_domain::service::{AsrVariant, ServiceType};

use crate::traits::ServiceClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static facts about a provider, fixed at registration.
///
/// `cost_per_unit` is in the provider family's natural unit: USD per audio
/// minute for ASR, USD per 1M input tokens for LLM, USD per GB-month for
/// storage. It only feeds relative scoring, so the unit never mixes across
/// service types.
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    pub display_name: String,
    pub cost_per_unit: f64,
    pub supports_streaming: bool,
    /// ASR quota lanes this provider serves.
    pub variants: Vec<AsrVariant>,
    /// Declared model ids (LLM only).
    pub models: Vec<String>,
    pub default_model: Option<String>,
    /// Monthly free-tier allocation in seconds. Zero = none.
    pub free_tier_seconds: i64,
}

impl ProviderMetadata {
    /// Whether instantiation needs an explicit `model_id`.
    pub fn requires_model_id(&self) -> bool {
        self.models.len() > 1 && self.default_model.is_none()
    }
}

/// Per-instantiation overrides.
#[derive(Debug, Clone, Default)]
pub struct InstantiateOverrides {
    pub model_id: Option<String>,
}

/// Builds a fresh client from configured credentials.
pub type ClientFactory = Box<dyn Fn(&InstantiateOverrides) -> Result<ServiceClient> + Send + Sync>;

/// One catalog entry.
pub struct Registration {
    pub service_type: ServiceType,
    pub name: String,
    pub metadata: ProviderMetadata,
    /// Env vars that must all be set for this provider to be discovered.
    pub credential_envs: Vec<String>,
    pub factory: ClientFactory,
}

impl Registration {
    pub fn credentials_present(&self) -> bool {
        self.credential_envs
            .iter()
            .all(|v| std::env::var(v).is_ok())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ServiceRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Catalog of `(service_type, provider_name)` → registration.
///
/// Populated once at startup, then shared behind an `Arc` with no locking:
/// reads dominate and the entries never change.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: HashMap<(ServiceType, String), Registration>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration. Duplicate `(service_type, name)` keys are
    /// rejected rather than silently replaced.
    pub fn register(&mut self, reg: Registration) -> Result<()> {
        let key = (reg.service_type, reg.name.clone());
        if self.entries.contains_key(&key) {
            return Err(Error::Config(format!(
                "duplicate provider registration: {}/{}",
                reg.service_type, reg.name
            )));
        }
        tracing::info!(
            service_type = %reg.service_type,
            provider = %reg.name,
            "registered provider"
        );
        self.entries.insert(key, reg);
        Ok(())
    }

    pub fn get(&self, service_type: ServiceType, name: &str) -> Option<&Registration> {
        self.entries.get(&(service_type, name.to_string()))
    }

    /// Registrations for a service type whose credentials are configured,
    /// sorted by provider name for deterministic iteration.
    pub fn discover(&self, service_type: ServiceType) -> Vec<&Registration> {
        let mut found: Vec<&Registration> = self
            .entries
            .values()
            .filter(|r| r.service_type == service_type && r.credentials_present())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// Every registration regardless of credentials (for observability).
    pub fn list(&self) -> Vec<&Registration> {
        let mut all: Vec<&Registration> = self.entries.values().collect();
        all.sort_by(|a, b| (a.service_type.as_str(), &a.name).cmp(&(b.service_type.as_str(), &b.name)));
        all
    }

    /// Build a fresh client for a registered provider.
    ///
    /// LLM providers that declare multiple models and no default require an
    /// explicit `model_id` override.
    pub fn instantiate(
        &self,
        service_type: ServiceType,
        name: &str,
        overrides: &InstantiateOverrides,
    ) -> Result<ServiceClient> {
        let reg = self.get(service_type, name).ok_or_else(|| {
            Error::NotFound(format!("provider {service_type}/{name} is not registered"))
        })?;

        if service_type == ServiceType::Llm
            && reg.metadata.requires_model_id()
            && overrides.model_id.is_none()
        {
            return Err(Error::Config(format!(
                "provider {name} declares multiple models and no default; model_id is required"
            )));
        }

        if let Some(ref model) = overrides.model_id {
            if !reg.metadata.models.is_empty() && !reg.metadata.models.iter().any(|m| m == model) {
                return Err(Error::Config(format!(
                    "model '{model}' is not declared by provider {name}"
                )));
            }
        }

        (reg.factory)(overrides)
    }
}
