//! TOML configuration naming the tenant, application and API Management
//! instance to operate on.
//!
//! The client secret is never read from this file; the CLI takes it from
//! `--secret` or `APIM_CLIENT_SECRET`.

use std::path::Path;

use serde::Deserialize;

use crate::error::{ApimError, Result};

/// ARM API version used for all management calls. Subscription keys are
/// still returned inline by GET at this version.
pub const DEFAULT_API_VERSION: &str = "2022-08-01";

/// Azure Resource Manager endpoint for the public cloud.
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com/";

/// The (subscription, resource group, service) triple every management
/// call is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceScope {
    /// Azure subscription ID hosting the service.
    pub subscription_id: String,
    /// Resource group containing the service.
    pub resource_group: String,
    /// API Management service instance name.
    pub service_name: String,
}

impl ServiceScope {
    /// Path of the service resource below the ARM root, with trailing `/`.
    pub fn resource_path(&self) -> String {
        format!(
            "subscriptions/{}/resourceGroups/{}/providers/Microsoft.ApiManagement/service/{}/",
            self.subscription_id, self.resource_group, self.service_name
        )
    }
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_management_url() -> String {
    DEFAULT_MANAGEMENT_URL.to_string()
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ApimConfig {
    /// Azure AD tenant ID.
    pub tenant_id: String,
    /// Application (client) ID of the service principal.
    pub client_id: String,
    /// Service the management calls are scoped to.
    #[serde(flatten)]
    pub service: ServiceScope,
    /// ARM `api-version` query value.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// ARM root URL, with trailing `/`.
    #[serde(default = "default_management_url")]
    pub management_url: String,
}

impl ApimConfig {
    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ApimConfig = toml::from_str(content).map_err(|e| ApimError::Config {
            message: "configuration is not valid TOML".to_string(),
            source: Some(Box::new(e)),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ApimError::Config {
            message: format!("cannot read {}", path.display()),
            source: Some(Box::new(e)),
        })?;
        Self::from_toml(&content)
    }

    /// Base URL of the service resource, ready for relative paths.
    pub fn service_url(&self) -> String {
        let root = if self.management_url.ends_with('/') {
            self.management_url.clone()
        } else {
            format!("{}/", self.management_url)
        };
        format!("{root}{}", self.service.resource_path())
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("subscription_id", &self.service.subscription_id),
            ("resource_group", &self.service.resource_group),
            ("service_name", &self.service.service_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ApimError::Config {
                    message: format!("{field} must not be empty"),
                    source: None,
                });
            }
        }
        Ok(())
    }
}
