//! Wire types for the parts of the Scaleway Instance API the adapter calls
//! directly.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::provider::{InstanceInfo, OperationStatus};

/// Root volume slot in a server's volume map.
pub(super) const ROOT_VOLUME_SLOT: &str = "0";

#[derive(Debug, Serialize)]
pub(super) struct CreateServerRequest<'a> {
    pub(super) name: &'a str,
    pub(super) commercial_type: &'a str,
    pub(super) image: &'a str,
    pub(super) project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) organization: Option<&'a str>,
    pub(super) dynamic_ip_required: bool,
    pub(super) routed_ip_enabled: bool,
    pub(super) tags: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
pub(super) struct ActionRequest<'a> {
    pub(super) action: &'a str,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerList {
    #[serde(default)]
    pub(super) servers: Vec<Server>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerEnvelope {
    pub(super) server: Server,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct Server {
    pub(super) id: String,
    #[serde(default)]
    pub(super) name: String,
    #[serde(default)]
    pub(super) state: String,
    #[serde(default)]
    pub(super) allowed_actions: Vec<String>,
    #[serde(default)]
    pub(super) public_ip: Option<PublicIp>,
    #[serde(default)]
    pub(super) public_ips: Vec<PublicIp>,
    #[serde(default)]
    pub(super) volumes: HashMap<String, VolumeRef>,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct PublicIp {
    pub(super) address: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct VolumeRef {
    pub(super) id: String,
}

impl Server {
    pub(super) fn allows(&self, action: &str) -> bool {
        self.allowed_actions.iter().any(|allowed| allowed == action)
    }

    pub(super) fn info(&self) -> InstanceInfo {
        let address = self
            .public_ip
            .iter()
            .chain(self.public_ips.iter())
            .find_map(|ip| ip.address.parse::<IpAddr>().ok());
        InstanceInfo {
            address,
            boot_disk_id: self
                .volumes
                .get(ROOT_VOLUME_SLOT)
                .map(|volume| volume.id.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TaskEnvelope {
    pub(super) task: Task,
}

#[derive(Debug, Deserialize)]
pub(super) struct Task {
    pub(super) id: String,
    #[serde(default)]
    pub(super) status: String,
    #[serde(default)]
    pub(super) description: String,
}

impl Task {
    pub(super) fn operation_status(self) -> OperationStatus {
        match self.status.as_str() {
            "success" => OperationStatus::Done,
            "failure" => OperationStatus::Failed {
                message: if self.description.is_empty() {
                    format!("task {} failed", self.id)
                } else {
                    format!("task {} ({}) failed", self.id, self.description)
                },
            },
            _ => OperationStatus::Pending { state: self.status },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerProducts {
    #[serde(default)]
    pub(super) servers: HashMap<String, serde_json::Value>,
}
