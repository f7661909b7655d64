//! [`CloudProvider`] adapter for the Scaleway Instance API.
//!
//! Image lookup goes through `scaleway-rs`; every other call is a direct
//! HTTP request so the response status reaches the retry policy intact.
//! Scaleway reports long-running actions as tasks, which become the
//! [`OperationHandle`]s the waiter polls.

mod error;
mod image;
mod types;

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, StatusCode, Url};
use scaleway_rs::ScalewayApi;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::{ConfigError, ScalewayConfig};
use crate::provider::{
    CloudProvider, InstanceInfo, InstanceSpec, OperationHandle, OperationStatus, ProviderError,
    ProviderFuture, Submission,
};
use error::{api_error, transport_error};
use types::{
    ActionRequest, CreateServerRequest, Server, ServerEnvelope, ServerList, ServerProducts,
    TaskEnvelope,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";
const AUTH_HEADER: &str = "X-Auth-Token";
const PROVIDER_ID: &str = "scaleway";
const INSTANCE_TAG: &str = "autoproxy";

/// Availability zones offered by Scaleway for Instances.
pub const ZONE_CATALOGUE: &[&str] = &[
    "fr-par-1", "fr-par-2", "fr-par-3", "nl-ams-1", "nl-ams-2", "nl-ams-3", "pl-waw-1",
    "pl-waw-2", "pl-waw-3",
];

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Provider that manages proxy instances through the Scaleway Instance API.
#[derive(Clone)]
pub struct ScalewayProvider {
    api: ScalewayApi,
    config: ScalewayConfig,
    api_base: String,
}

impl ScalewayProvider {
    /// Constructs a provider from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
            api_base: SCALEWAY_INSTANCE_API_BASE.to_owned(),
        })
    }

    /// Points direct HTTP calls at another API root.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    fn url(&self, zone: &str, path: &str) -> String {
        format!("{}/zones/{zone}/{path}", self.api_base)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, Vec<u8>), ProviderError> {
        let mut request = HTTP_CLIENT
            .request(method.clone(), url)
            .header(AUTH_HEADER, &self.config.secret_key);
        if let Some(body) = body {
            request = request.json(&body);
        }
        debug!(%method, url, "scaleway request");

        let response = request.send().await.map_err(|err| transport_error(&err))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|err| transport_error(&err))?;
        Ok((status, bytes.to_vec()))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ProviderError> {
        let (status, bytes) = self.send(method, url, body).await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &bytes));
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| ProviderError::fatal(format!("unexpected response from {url}: {err}")))
    }

    async fn find_server(&self, zone: &str, name: &str) -> Result<Option<Server>, ProviderError> {
        let url = Url::parse_with_params(
            &self.url(zone, "servers"),
            &[("name", name), ("per_page", "50")],
        )
        .map_err(|err| ProviderError::fatal(format!("invalid server lookup URL: {err}")))?;
        let list: ServerList = self.call(Method::GET, url.as_str(), None).await?;
        Ok(list.servers.into_iter().find(|server| server.name == name))
    }

    async fn create_server(&self, spec: &InstanceSpec) -> Result<Server, ProviderError> {
        let image = self.resolve_image_id(&spec.zone).await?;
        let payload = CreateServerRequest {
            name: &spec.name,
            commercial_type: &spec.machine_type,
            image: &image,
            project: &self.config.default_project_id,
            organization: self.config.default_organization_id.as_deref(),
            dynamic_ip_required: true,
            routed_ip_enabled: true,
            tags: vec![INSTANCE_TAG],
        };
        let envelope: ServerEnvelope = self
            .call(Method::POST, &self.url(&spec.zone, "servers"), Some(json_body(&payload)?))
            .await?;
        info!(name = %spec.name, instance_id = %envelope.server.id, "server created");
        Ok(envelope.server)
    }

    async fn perform_action(
        &self,
        zone: &str,
        server_id: &str,
        action: &str,
    ) -> Result<Submission, ProviderError> {
        let url = self.url(zone, &format!("servers/{server_id}/action"));
        let envelope: TaskEnvelope = self
            .call(Method::POST, &url, Some(json_body(&ActionRequest { action })?))
            .await?;
        debug!(server_id, action, task = %envelope.task.id, "action submitted");
        Ok(Submission::pending(
            server_id,
            OperationHandle {
                zone: zone.to_owned(),
                token: envelope.task.id,
            },
        ))
    }

    /// Creates the server unless one with the same name exists, then powers
    /// it on. A retried submission never creates a second server.
    async fn create_and_start(&self, spec: &InstanceSpec) -> Result<Submission, ProviderError> {
        let server = match self.find_server(&spec.zone, &spec.name).await? {
            Some(existing) => {
                info!(name = %spec.name, instance_id = %existing.id, "reusing existing server");
                existing
            }
            None => self.create_server(spec).await?,
        };

        match server.state.as_str() {
            "running" | "starting" => Ok(Submission::completed(server.id)),
            _ if server.allows("poweron") => {
                self.perform_action(&spec.zone, &server.id, "poweron").await
            }
            state => Err(ProviderError::fatal(format!(
                "instance {} in state {state} cannot be powered on",
                server.id
            ))),
        }
    }

    async fn remove_volume(&self, zone: &str, disk_id: &str) -> Result<Submission, ProviderError> {
        let url = self.url(zone, &format!("volumes/{disk_id}"));
        let (status, bytes) = self.send(Method::DELETE, &url, None).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(Submission::completed(disk_id));
        }
        Err(api_error(status.as_u16(), &bytes))
    }

    async fn machine_types(&self, zone: &str) -> Result<Vec<String>, ProviderError> {
        let url = self.url(zone, "products/servers?per_page=100");
        let products: ServerProducts = self.call(Method::GET, &url, None).await?;
        let mut types: Vec<String> = products.servers.into_keys().collect();
        types.sort();
        Ok(types)
    }
}

fn json_body<T: Serialize>(body: &T) -> Result<serde_json::Value, ProviderError> {
    serde_json::to_value(body)
        .map_err(|err| ProviderError::fatal(format!("failed to encode request: {err}")))
}

/// Regions derived from [`ZONE_CATALOGUE`], in catalogue order.
#[must_use]
pub fn catalogue_regions() -> Vec<String> {
    let mut regions: Vec<String> = Vec::new();
    for zone in ZONE_CATALOGUE {
        let region = zone.rsplit_once('-').map_or(*zone, |(region, _)| region);
        if !regions.iter().any(|known| known == region) {
            regions.push(region.to_owned());
        }
    }
    regions
}

/// Zones from [`ZONE_CATALOGUE`] that belong to `region`.
#[must_use]
pub fn catalogue_zones(region: &str) -> Vec<String> {
    ZONE_CATALOGUE
        .iter()
        .filter(|zone| {
            zone.rsplit_once('-')
                .is_some_and(|(zone_region, _)| zone_region == region)
        })
        .map(|zone| (*zone).to_owned())
        .collect()
}

impl CloudProvider for ScalewayProvider {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn list_regions(&self) -> ProviderFuture<'_, Vec<String>> {
        Box::pin(async { Ok(catalogue_regions()) })
    }

    fn list_zones<'a>(&'a self, region: &'a str) -> ProviderFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(catalogue_zones(region)) })
    }

    fn list_machine_types<'a>(&'a self, zone: &'a str) -> ProviderFuture<'a, Vec<String>> {
        Box::pin(self.machine_types(zone))
    }

    fn recommended_machine_type(&self) -> &str {
        &self.config.recommended_instance_type
    }

    fn create_instance<'a>(&'a self, spec: &'a InstanceSpec) -> ProviderFuture<'a, Submission> {
        Box::pin(self.create_and_start(spec))
    }

    fn delete_instance<'a>(
        &'a self,
        zone: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Submission> {
        Box::pin(self.perform_action(zone, instance_id, "terminate"))
    }

    fn delete_disk<'a>(
        &'a self,
        zone: &'a str,
        disk_id: &'a str,
    ) -> ProviderFuture<'a, Submission> {
        Box::pin(self.remove_volume(zone, disk_id))
    }

    fn instance_info<'a>(
        &'a self,
        zone: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, InstanceInfo> {
        Box::pin(async move {
            let url = self.url(zone, &format!("servers/{instance_id}"));
            let envelope: ServerEnvelope = self.call(Method::GET, &url, None).await?;
            Ok(envelope.server.info())
        })
    }

    fn operation_status<'a>(
        &'a self,
        operation: &'a OperationHandle,
    ) -> ProviderFuture<'a, OperationStatus> {
        Box::pin(async move {
            let url = self.url(&operation.zone, &format!("tasks/{}", operation.token));
            let envelope: TaskEnvelope = self.call(Method::GET, &url, None).await?;
            Ok(envelope.task.operation_status())
        })
    }
}
