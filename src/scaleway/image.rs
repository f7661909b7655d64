//! Image label resolution.

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};

use crate::provider::ProviderError;

use super::ScalewayProvider;
use super::error::sdk_error;

impl ScalewayProvider {
    /// Resolves the configured image label to the newest available image id
    /// in `zone`, preferring images scoped to the configured project.
    pub(super) async fn resolve_image_id(&self, zone: &str) -> Result<String, ProviderError> {
        let label = &self.config.default_image;
        let arch = &self.config.default_architecture;

        let mut scoped = ScalewayListInstanceImagesBuilder::new(self.api.clone(), zone)
            .public(true)
            .project(&self.config.default_project_id)
            .name(label)
            .arch(arch);
        if let Some(org) = &self.config.default_organization_id {
            scoped = scoped.organization(org);
        }
        let project_images = scoped
            .run_async()
            .await
            .map_err(|err| sdk_error("image lookup failed", &err))?;

        let candidates = if project_images.is_empty() {
            ScalewayListInstanceImagesBuilder::new(self.api.clone(), zone)
                .public(true)
                .name(label)
                .arch(arch)
                .run_async()
                .await
                .map_err(|err| sdk_error("image lookup failed", &err))?
        } else {
            project_images
        };

        select_image_id(candidates, arch).ok_or_else(|| {
            ProviderError::fatal(format!("image '{label}' (arch {arch}) not found in zone {zone}"))
        })
    }
}

/// Picks the newest available image matching `arch`.
pub(super) fn select_image_id(images: Vec<ScalewayImage>, arch: &str) -> Option<String> {
    images
        .into_iter()
        .filter(|image| image.arch == arch && image.state == "available")
        .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
        .map(|image| image.id)
}
