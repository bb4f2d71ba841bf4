//! Discovery of runnable backends.

use std::path::PathBuf;

use alsvid_api::{ApiClient, ApiSettings, BackendStatus, BackendTypeResource, PageReader};
use tracing::instrument;

use crate::backend::Backend;
use crate::error::{JobError, JobResult};

/// Local predicate applied to the listed backend descriptors.
#[derive(Debug, Clone, Default)]
pub struct BackendFilter {
    /// Keep only the backend with this exact name.
    pub name: Option<String>,
    /// Keep only physical devices.
    pub hardware_only: bool,
    /// Drop backends that are currently offline.
    pub online_only: bool,
}

impl BackendFilter {
    /// Match everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Match a single backend by name.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Match physical devices only.
    pub fn hardware_only() -> Self {
        Self {
            hardware_only: true,
            ..Self::default()
        }
    }

    fn matches(&self, descriptor: &BackendTypeResource) -> bool {
        if let Some(name) = &self.name {
            if descriptor.name != *name {
                return false;
            }
        }
        if self.hardware_only && !descriptor.is_hardware {
            return false;
        }
        if self.online_only && descriptor.status == BackendStatus::Offline {
            return false;
        }
        true
    }
}

/// Entry point: lists the backends available on the configured host.
#[derive(Debug, Clone)]
pub struct Provider {
    client: ApiClient,
}

impl Provider {
    /// Connect using the settings file at its default (or overridden)
    /// location.
    pub async fn connect() -> JobResult<Self> {
        Self::connect_with(ApiSettings::config_path()).await
    }

    /// Connect using an explicit settings file.
    pub async fn connect_with(path: impl Into<PathBuf>) -> JobResult<Self> {
        let client = ApiClient::from_config_file(path).await?;
        Ok(Self { client })
    }

    /// Wrap an existing API client.
    pub fn with_client(client: ApiClient) -> Self {
        Self { client }
    }

    /// The underlying API client.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// List all backends matching `filter`, walking every page.
    #[instrument(skip(self))]
    pub async fn backends(&self, filter: &BackendFilter) -> JobResult<Vec<Backend>> {
        let descriptors =
            PageReader::get_all(|page| self.client.list_backend_types(page)).await?;
        Ok(descriptors
            .into_iter()
            .filter(|descriptor| filter.matches(descriptor))
            .map(|descriptor| Backend::new(self.client.clone(), descriptor))
            .collect())
    }

    /// Fetch a single backend by name.
    pub async fn get_backend(&self, name: &str) -> JobResult<Backend> {
        self.backends(&BackendFilter::by_name(name))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| JobError::BackendNotFound(name.to_string()))
    }
}
