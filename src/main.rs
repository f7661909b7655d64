//! Binary entry point for the autoproxy CLI.

use std::env;
use std::ffi::OsString;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use autoproxy::config::{ConfigError, ProxyConfig, ScalewayConfig};
use autoproxy::create_flow::{CreateFlowError, DialoguerPrompter, choose_target};
use autoproxy::deploy::{AnsibleConfigurator, DeployError};
use autoproxy::operation::OperationWaiter;
use autoproxy::provision::{ProvisionError, ProvisionPipeline};
use autoproxy::records::{
    JsonRecordStore, ProxyRecord, RecordStore, RecordStoreError, ResourceKind, find_instance,
};
use autoproxy::regions::{RegionLabelError, RegionLabels};
use autoproxy::scaleway::ScalewayProvider;
use autoproxy::teardown::{ReclaimSummary, TeardownError, TeardownOutcome, TeardownPipeline};

mod cli;

use cli::{Cli, DeleteCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("region labels: {0}")]
    Regions(#[from] RegionLabelError),
    #[error("{0}")]
    CreateFlow(#[from] CreateFlowError),
    #[error("deployment setup failed: {0}")]
    Deploy(#[from] DeployError),
    #[error("{0}")]
    Provision(#[from] ProvisionError<DeployError>),
    #[error("{0}")]
    Teardown(#[from] TeardownError),
    #[error("{0}")]
    Records(#[from] RecordStoreError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse_from(normalise_args(env::args_os()));
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            write_error(io::stderr(), &err);
            1
        }
    };

    process::exit(exit_code);
}

/// Rewrites the single-dash `-name` spelling to `--name` so clap does not
/// read it as `-n ame`.
fn normalise_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some("-name") => OsString::from("--name"),
            Some(text) if text.starts_with("-name=") => OsString::from(format!("-{text}")),
            _ => arg,
        })
        .collect()
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let proxy_config = ProxyConfig::load_without_cli_args()?;
    let store = JsonRecordStore::new(proxy_config.records_path());
    match cli {
        Cli::Create => create(&proxy_config, store).await,
        Cli::Delete(command) => delete(&proxy_config, store, &command).await,
        Cli::List => write_records(io::stdout(), &store.load()?),
        Cli::Reclaim => reclaim(&proxy_config, store).await,
    }
}

fn provider() -> Result<ScalewayProvider, CliError> {
    let config = ScalewayConfig::load_without_cli_args()?;
    Ok(ScalewayProvider::new(config)?)
}

fn waiter(config: &ProxyConfig) -> OperationWaiter {
    OperationWaiter::default().with_timeout(config.operation_timeout())
}

async fn create(config: &ProxyConfig, store: JsonRecordStore) -> Result<(), CliError> {
    let configurator =
        AnsibleConfigurator::with_streaming_runner(config.ansible_settings(), config.proxy_settings()?)?;
    let provider = provider()?;
    let labels = RegionLabels::load(&config.region_map_path())?;

    let request = choose_target(&provider, &labels, &DialoguerPrompter).await?;
    let endpoint_settings = configurator.proxy().clone();
    let pipeline = ProvisionPipeline::new(provider, configurator, store)
        .with_waiter(waiter(config))
        .with_readiness_timeout(config.readiness_timeout());
    let provisioned = pipeline.provision(&request).await?;

    writeln!(io::stdout(), "{}", endpoint_settings.endpoint(provisioned.address))?;
    Ok(())
}

async fn delete(
    config: &ProxyConfig,
    store: JsonRecordStore,
    command: &DeleteCommand,
) -> Result<(), CliError> {
    if find_instance(&store.load()?, &command.name).is_none() {
        return write_teardown(io::stdout(), &command.name, &TeardownOutcome::NotFound);
    }
    let pipeline = TeardownPipeline::new(provider()?, store).with_waiter(waiter(config));
    let outcome = pipeline.teardown(&command.name).await?;
    write_teardown(io::stdout(), &command.name, &outcome)
}

async fn reclaim(config: &ProxyConfig, store: JsonRecordStore) -> Result<(), CliError> {
    let pipeline = TeardownPipeline::new(provider()?, store).with_waiter(waiter(config));
    let summary = pipeline.reclaim_orphans().await?;
    write_reclaim(io::stdout(), &summary)
}

fn write_records(mut out: impl Write, records: &[ProxyRecord]) -> Result<(), CliError> {
    if records.is_empty() {
        writeln!(out, "No proxies found.")?;
        return Ok(());
    }
    for record in records {
        let region = if record.location.is_empty() {
            &record.region
        } else {
            &record.location
        };
        match record.kind {
            ResourceKind::Instance => writeln!(
                out,
                "Name: {}, IP: {}, Region: {region}, Zone: {}",
                record.name, record.ip, record.zone
            )?,
            ResourceKind::Disk => writeln!(
                out,
                "Orphaned disk: {} (from {}), Region: {region}, Zone: {}",
                record.instance_id, record.name, record.zone
            )?,
        }
    }
    Ok(())
}

fn write_teardown(mut out: impl Write, name: &str, outcome: &TeardownOutcome) -> Result<(), CliError> {
    match outcome {
        TeardownOutcome::NotFound => writeln!(out, "No proxy named {name} found.")?,
        TeardownOutcome::Deleted { orphaned_disk } => {
            writeln!(out, "Deleted proxy {name}.")?;
            if let Some(disk_id) = orphaned_disk {
                writeln!(
                    out,
                    "Boot disk {disk_id} could not be deleted; run `autoproxy reclaim` to retry."
                )?;
            }
        }
    }
    Ok(())
}

fn write_reclaim(mut out: impl Write, summary: &ReclaimSummary) -> Result<(), CliError> {
    writeln!(
        out,
        "Reclaimed {} orphaned disk(s); {} remaining.",
        summary.reclaimed.len(),
        summary.remaining.len()
    )?;
    Ok(())
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(name: &str, kind: ResourceKind, location: &str) -> ProxyRecord {
        ProxyRecord {
            name: name.to_owned(),
            provider: String::from("scaleway"),
            region: String::from("fr-par"),
            zone: String::from("fr-par-1"),
            instance_id: String::from("vol-1"),
            ip: String::from("51.15.0.9"),
            kind,
            location: location.to_owned(),
        }
    }

    fn render(write: impl FnOnce(&mut Vec<u8>) -> Result<(), CliError>) -> String {
        let mut buf = Vec::new();
        write(&mut buf).unwrap_or_else(|err| panic!("write: {err}"));
        String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"))
    }

    #[rstest]
    #[case(&["autoproxy", "delete", "-name", "proxy-frpar1"])]
    #[case(&["autoproxy", "delete", "-name=proxy-frpar1"])]
    #[case(&["autoproxy", "delete", "--name", "proxy-frpar1"])]
    #[case(&["autoproxy", "delete", "-n", "proxy-frpar1"])]
    fn delete_accepts_every_name_spelling(#[case] args: &[&str]) {
        let cli = Cli::try_parse_from(normalise_args(args.iter().copied().map(OsString::from)))
            .unwrap_or_else(|err| panic!("parse {args:?}: {err}"));

        let Cli::Delete(command) = cli else {
            panic!("expected delete, parsed {cli:?}");
        };
        assert_eq!(command.name, "proxy-frpar1");
    }

    #[test]
    fn normalise_leaves_other_arguments_alone() {
        let args = normalise_args(["autoproxy", "list", "-named"].map(OsString::from));
        assert_eq!(args, ["autoproxy", "list", "-named"].map(OsString::from));
    }

    #[test]
    fn list_reports_empty_store() {
        assert_eq!(render(|buf| write_records(buf, &[])), "No proxies found.\n");
    }

    #[test]
    fn list_prefers_location_label() {
        let rendered = render(|buf| {
            write_records(
                buf,
                &[
                    record("proxy-frpar1", ResourceKind::Instance, "Paris"),
                    record("proxy-frpar2", ResourceKind::Disk, ""),
                ],
            )
        });

        assert_eq!(
            rendered,
            "Name: proxy-frpar1, IP: 51.15.0.9, Region: Paris, Zone: fr-par-1\n\
             Orphaned disk: vol-1 (from proxy-frpar2), Region: fr-par, Zone: fr-par-1\n"
        );
    }

    #[test]
    fn teardown_messages_mention_orphans() {
        let rendered = render(|buf| {
            write_teardown(
                buf,
                "p1",
                &TeardownOutcome::Deleted {
                    orphaned_disk: Some(String::from("vol-9")),
                },
            )
        });
        assert!(rendered.starts_with("Deleted proxy p1.\n"), "{rendered}");
        assert!(rendered.contains("vol-9"), "{rendered}");

        let missing = render(|buf| write_teardown(buf, "p2", &TeardownOutcome::NotFound));
        assert_eq!(missing, "No proxy named p2 found.\n");
    }

    #[test]
    fn reclaim_summary_counts_disks() {
        let summary = ReclaimSummary {
            reclaimed: vec![String::from("vol-1"), String::from("vol-2")],
            remaining: vec![String::from("vol-3")],
        };
        assert_eq!(
            render(|buf| write_reclaim(buf, &summary)),
            "Reclaimed 2 orphaned disk(s); 1 remaining.\n"
        );
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Config(ConfigError::MissingField(String::from("secret")));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert_eq!(rendered, "configuration error: missing configuration field: secret\n");
    }
}
