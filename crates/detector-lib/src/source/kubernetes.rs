//! Kubernetes pod inventory adapter

use super::{InventorySource, SourceError};
use crate::models::{ContainerIdentity, ContainerInfo};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::debug;

/// Lists running containers across all namespaces
pub struct KubeInventory {
    client: Client,
}

impl KubeInventory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self, SourceError> {
        let client = Client::try_default()
            .await
            .map_err(|e| SourceError::Permanent(format!("failed to create Kubernetes client: {}", e)))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl InventorySource for KubeInventory {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, SourceError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields("status.phase=Running");
        let list = pods.list(&params).await.map_err(classify_kube_error)?;

        let containers: Vec<ContainerInfo> = list.items.iter().flat_map(pod_containers).collect();
        debug!(pods = list.items.len(), containers = containers.len(), "Listed running pods");
        Ok(containers)
    }
}

fn classify_kube_error(e: kube::Error) -> SourceError {
    match &e {
        kube::Error::Api(resp) if resp.code >= 500 || resp.code == 429 => {
            SourceError::Transient(e.to_string())
        }
        kube::Error::HyperError(_) | kube::Error::Service(_) => SourceError::Transient(e.to_string()),
        _ => SourceError::Permanent(e.to_string()),
    }
}

/// Running containers of one pod
///
/// The container runtime ID becomes the identity UID, so a restarted
/// container is a new identity. Pods without a name, namespace or start
/// time are skipped.
pub(crate) fn pod_containers(pod: &Pod) -> Vec<ContainerInfo> {
    let meta = &pod.metadata;
    let (Some(namespace), Some(pod_name)) = (meta.namespace.as_ref(), meta.name.as_ref()) else {
        return Vec::new();
    };
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };

    let status = pod.status.as_ref();
    let pod_started = status
        .and_then(|s| s.start_time.as_ref())
        .or(meta.creation_timestamp.as_ref())
        .map(|t| t.0.timestamp());
    let pod_labels = meta.labels.clone().unwrap_or_default();
    let owner_kind = meta
        .owner_references
        .as_ref()
        .and_then(|refs| {
            refs.iter()
                .find(|r| r.controller == Some(true))
                .or_else(|| refs.first())
        })
        .map(|r| r.kind.clone());

    spec.containers
        .iter()
        .filter_map(|container| {
            let container_status = status
                .and_then(|s| s.container_statuses.as_ref())
                .and_then(|statuses| statuses.iter().find(|cs| cs.name == container.name));

            let running_since = container_status
                .and_then(|cs| cs.state.as_ref())
                .and_then(|state| state.running.as_ref())
                .and_then(|running| running.started_at.as_ref())
                .map(|t| t.0.timestamp());
            if container_status.is_some() && running_since.is_none() {
                return None;
            }
            let created_at = running_since.or(pod_started)?;

            let uid = container_status
                .and_then(|cs| cs.container_id.clone())
                .or_else(|| meta.uid.clone());
            let mut identity = ContainerIdentity::new(namespace, pod_name, &container.name);
            if let Some(uid) = uid {
                identity = identity.with_uid(uid);
            }

            let memory_limit_bytes = container
                .resources
                .as_ref()
                .and_then(|r| r.limits.as_ref())
                .and_then(|l| l.get("memory"))
                .and_then(|q| parse_memory_bytes(&q.0));

            Some(ContainerInfo {
                identity,
                node_name: spec.node_name.clone(),
                created_at,
                pod_labels: pod_labels.clone(),
                container_labels: BTreeMap::new(),
                owner_kind: owner_kind.clone(),
                memory_limit_bytes,
            })
        })
        .collect()
}

/// Parse a Kubernetes memory quantity (`512Mi`, `1G`, `1e9`, `128974848`) into bytes
pub fn parse_memory_bytes(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();
    let suffixes: [(&str, f64); 12] = [
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let (number, multiplier) = suffixes
        .iter()
        .find_map(|(suffix, mult)| quantity.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((quantity, 1.0));

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_memory_quantities() {
        assert_eq!(parse_memory_bytes("512Mi"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("1Gi"), Some(1 << 30));
        assert_eq!(parse_memory_bytes("1G"), Some(1_000_000_000));
        assert_eq!(parse_memory_bytes("128974848"), Some(128_974_848));
        assert_eq!(parse_memory_bytes("1e9"), Some(1_000_000_000));
        assert_eq!(parse_memory_bytes("100k"), Some(100_000));
        assert_eq!(parse_memory_bytes("lots"), None);
    }

    fn pod() -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "worker-5c8d",
                "namespace": "jobs",
                "uid": "pod-uid-1",
                "labels": {"app": "worker", "zombie-detection.exclude": "true"},
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "ownerReferences": [{
                    "apiVersion": "batch/v1",
                    "kind": "Job",
                    "name": "nightly",
                    "uid": "job-uid",
                    "controller": true
                }]
            },
            "spec": {
                "nodeName": "node-a",
                "containers": [
                    {
                        "name": "main",
                        "resources": {"limits": {"memory": "1Gi", "cpu": "500m"}}
                    },
                    {"name": "sidecar"}
                ]
            },
            "status": {
                "phase": "Running",
                "startTime": "2024-01-01T00:00:05Z",
                "containerStatuses": [
                    {
                        "name": "main",
                        "image": "worker:1",
                        "imageID": "",
                        "ready": true,
                        "restartCount": 0,
                        "containerID": "containerd://abc123",
                        "state": {"running": {"startedAt": "2024-01-01T00:01:00Z"}}
                    },
                    {
                        "name": "sidecar",
                        "image": "proxy:1",
                        "imageID": "",
                        "ready": false,
                        "restartCount": 3,
                        "state": {"waiting": {"reason": "CrashLoopBackOff"}}
                    }
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_pod_containers_reads_metadata() {
        let containers = pod_containers(&pod());

        // The waiting sidecar is not running and is skipped
        assert_eq!(containers.len(), 1);
        let main = &containers[0];
        assert_eq!(main.identity.to_string(), "jobs/worker-5c8d/main");
        assert_eq!(main.identity.uid.as_deref(), Some("containerd://abc123"));
        assert_eq!(main.node_name.as_deref(), Some("node-a"));
        assert_eq!(main.created_at, 1_704_067_260);
        assert_eq!(main.owner_kind.as_deref(), Some("Job"));
        assert_eq!(main.memory_limit_bytes, Some(1 << 30));
        assert_eq!(main.pod_labels["zombie-detection.exclude"], "true");
    }

    #[test]
    fn test_pod_without_namespace_skipped() {
        let mut pod = pod();
        pod.metadata.namespace = None;
        assert!(pod_containers(&pod).is_empty());
    }
}
