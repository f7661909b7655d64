//! Interactive selection of where and what to provision.
//!
//! The flow asks for a region (shown by its display label), then a zone in
//! that region, then a machine type, and turns the answers into a
//! [`ProvisionRequest`].

use thiserror::Error;
use tracing::debug;

use crate::provider::{CloudProvider, ProviderError};
use crate::provision::ProvisionRequest;
use crate::regions::RegionLabels;

const RECOMMENDED_SUFFIX: &str = " (recommended)";
const NAME_PREFIX: &str = "proxy-";

/// Failure reported by a [`Prompter`].
#[derive(Debug, Error, Eq, PartialEq)]
#[error("prompt failed: {0}")]
pub struct PromptError(pub String);

/// Presents a list of options and returns the chosen index.
pub trait Prompter {
    /// Shows `items` under `prompt` with `default` preselected.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when no answer can be read.
    fn select(&self, prompt: &str, items: &[String], default: usize) -> Result<usize, PromptError>;
}

/// Terminal prompter backed by `dialoguer`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DialoguerPrompter;

impl Prompter for DialoguerPrompter {
    fn select(&self, prompt: &str, items: &[String], default: usize) -> Result<usize, PromptError> {
        dialoguer::Select::new()
            .with_prompt(prompt)
            .items(items)
            .default(default)
            .interact()
            .map_err(|err| PromptError(err.to_string()))
    }
}

/// Errors raised while choosing a provisioning target.
#[derive(Debug, Error)]
pub enum CreateFlowError {
    /// Listing the options failed at the provider.
    #[error("failed to list {what}: {source}")]
    Listing {
        /// Kind of option being listed.
        what: &'static str,
        /// Provider failure.
        source: ProviderError,
    },
    /// The provider offered nothing to choose from.
    #[error("no {what} available{}", scope.as_deref().map(|s| format!(" in {s}")).unwrap_or_default())]
    NoChoices {
        /// Kind of option being listed.
        what: &'static str,
        /// Region or zone the listing was scoped to.
        scope: Option<String>,
    },
    /// The prompt could not be answered.
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// The prompter returned an index outside the offered list.
    #[error("selection {index} is out of range for {what}")]
    OutOfRange {
        /// Kind of option being chosen.
        what: &'static str,
        /// Index returned by the prompter.
        index: usize,
    },
}

/// Logical proxy name for a zone: `proxy-` followed by the zone without
/// dashes.
///
/// ```
/// assert_eq!(autoproxy::create_flow::proxy_name("fr-par-1"), "proxy-frpar1");
/// ```
#[must_use]
pub fn proxy_name(zone: &str) -> String {
    format!("{NAME_PREFIX}{}", zone.replace('-', ""))
}

/// Walks the user through region, zone, and machine type selection.
///
/// # Errors
///
/// Returns [`CreateFlowError`] when a listing fails, comes back empty, or the
/// prompt cannot be answered.
pub async fn choose_target<P, Q>(
    provider: &P,
    labels: &RegionLabels,
    prompter: &Q,
) -> Result<ProvisionRequest, CreateFlowError>
where
    P: CloudProvider,
    Q: Prompter,
{
    let regions = provider
        .list_regions()
        .await
        .map_err(|source| CreateFlowError::Listing {
            what: "regions",
            source,
        })?;
    let region_items: Vec<String> = regions
        .iter()
        .map(|region| labels.label_for(region).to_owned())
        .collect();
    let region = pick(prompter, "Select a region", "regions", None, &regions, &region_items, 0)?;

    let zones = provider
        .list_zones(&region)
        .await
        .map_err(|source| CreateFlowError::Listing {
            what: "zones",
            source,
        })?;
    let zone = pick(prompter, "Select a zone", "zones", Some(&region), &zones, &zones, 0)?;

    let machine_types = provider
        .list_machine_types(&zone)
        .await
        .map_err(|source| CreateFlowError::Listing {
            what: "machine types",
            source,
        })?;
    let recommended = provider.recommended_machine_type();
    let type_items: Vec<String> = machine_types
        .iter()
        .map(|machine_type| {
            if machine_type == recommended {
                format!("{machine_type}{RECOMMENDED_SUFFIX}")
            } else {
                machine_type.clone()
            }
        })
        .collect();
    let default = machine_types
        .iter()
        .position(|machine_type| machine_type == recommended)
        .unwrap_or(0);
    let machine_type = pick(
        prompter,
        "Select a machine type",
        "machine types",
        Some(&zone),
        &machine_types,
        &type_items,
        default,
    )?;

    let request = ProvisionRequest {
        name: proxy_name(&zone),
        location: labels.label_for(&region).to_owned(),
        region,
        zone,
        machine_type,
    };
    debug!(name = %request.name, zone = %request.zone, machine_type = %request.machine_type, "target chosen");
    Ok(request)
}

fn pick<Q: Prompter>(
    prompter: &Q,
    prompt: &str,
    what: &'static str,
    scope: Option<&str>,
    values: &[String],
    items: &[String],
    default: usize,
) -> Result<String, CreateFlowError> {
    if values.is_empty() {
        return Err(CreateFlowError::NoChoices {
            what,
            scope: scope.map(str::to_owned),
        });
    }
    let index = prompter.select(prompt, items, default)?;
    values
        .get(index)
        .cloned()
        .ok_or(CreateFlowError::OutOfRange { what, index })
}
