//! C1 — Cluster Driver. Wraps a Kubernetes API client and exposes the narrow
//! set of idempotent operations the lifecycle controller needs: namespace
//! and quota management, and manifest apply-or-patch for the six recognized
//! workload kinds.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, ResourceQuota, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Config, ResourceExt};
use serde_json::Value;

use crate::error::DriverError;

/// The six manifest kinds the driver will apply. Anything else is refused.
pub const RECOGNIZED_KINDS: &[&str] = &[
    "Deployment",
    "Service",
    "Ingress",
    "PersistentVolumeClaim",
    "ConfigMap",
    "Secret",
];

#[async_trait]
pub trait ClusterDriver: Send + Sync + 'static {
    async fn create_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<(), DriverError>;

    async fn delete_namespace(&self, name: &str) -> Result<(), DriverError>;

    async fn namespace_exists(&self, name: &str) -> Result<bool, DriverError>;

    async fn create_resource_quota(
        &self,
        namespace: &str,
        cpu: &str,
        memory: &str,
        pods: &str,
    ) -> Result<(), DriverError>;

    async fn apply_manifest(&self, manifest: &Value) -> Result<(), DriverError>;

    /// `Ok(None)` means the namespace does not exist.
    async fn get_namespace_status(&self, name: &str) -> Result<Option<String>, DriverError>;
}

/// Real implementation, backed by `kube::Client`.
pub struct KubeClusterDriver {
    client: Client,
}

impl KubeClusterDriver {
    pub async fn connect(kubeconfig_path: Option<&str>) -> Result<Self, DriverError> {
        let config = match kubeconfig_path {
            Some(path) => {
                let kubeconfig = kube::config::Kubeconfig::read_from(path)
                    .map_err(|e| DriverError::Transient(format!("reading kubeconfig: {e}")))?;
                Config::from_kubeconfig(&kubeconfig)
                    .await
                    .map_err(|e| DriverError::Transient(format!("loading kubeconfig: {e}")))?
            }
            None => Config::infer()
                .await
                .map_err(|e| DriverError::Transient(format!("inferring cluster config: {e}")))?,
        };
        let client = Client::try_from(config)
            .map_err(|e| DriverError::Transient(format!("building kube client: {e}")))?;
        Ok(KubeClusterDriver { client })
    }

    pub fn from_client(client: Client) -> Self {
        KubeClusterDriver { client }
    }
}

/// `kube::Error::Api` with HTTP code `code`.
fn api_status(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(status) => Some(status.code),
        _ => None,
    }
}

#[async_trait]
impl ClusterDriver for KubeClusterDriver {
    async fn create_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<(), DriverError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(e) if api_status(&e) == Some(409) => Ok(()), // already exists
            Err(e) => Err(DriverError::Transient(format!("create_namespace({name}): {e}"))),
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), DriverError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(e) if api_status(&e) == Some(404) => Ok(()), // not found
            Err(e) => Err(DriverError::Transient(format!("delete_namespace({name}): {e}"))),
        }
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, DriverError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(e) if api_status(&e) == Some(404) => Ok(false),
            Err(e) => Err(DriverError::Transient(format!("namespace_exists({name}): {e}"))),
        }
    }

    async fn create_resource_quota(
        &self,
        namespace: &str,
        cpu: &str,
        memory: &str,
        pods: &str,
    ) -> Result<(), DriverError> {
        let api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        let mut hard = BTreeMap::new();
        hard.insert("requests.cpu".to_string(), Quantity(cpu.to_string()));
        hard.insert("requests.memory".to_string(), Quantity(memory.to_string()));
        hard.insert("limits.cpu".to_string(), Quantity(cpu.to_string()));
        hard.insert("limits.memory".to_string(), Quantity(memory.to_string()));
        hard.insert("pods".to_string(), Quantity(pods.to_string()));

        let quota = ResourceQuota {
            metadata: ObjectMeta { name: Some("ephemera-quota".to_string()), ..ObjectMeta::default() },
            spec: Some(k8s_openapi::api::core::v1::ResourceQuotaSpec { hard: Some(hard), ..Default::default() }),
            ..ResourceQuota::default()
        };

        match api.create(&PostParams::default(), &quota).await {
            Ok(_) => Ok(()),
            Err(e) if api_status(&e) == Some(409) => Ok(()),
            Err(e) => Err(DriverError::Transient(format!("create_resource_quota({namespace}): {e}"))),
        }
    }

    async fn apply_manifest(&self, manifest: &Value) -> Result<(), DriverError> {
        let kind = manifest["kind"].as_str().ok_or_else(|| DriverError::MalformedManifest("kind".into()))?;
        let namespace = manifest["metadata"]["namespace"]
            .as_str()
            .ok_or_else(|| DriverError::MalformedManifest("metadata.namespace".into()))?;
        let name = manifest["metadata"]["name"]
            .as_str()
            .ok_or_else(|| DriverError::MalformedManifest("metadata.name".into()))?
            .to_string();

        match kind {
            "Deployment" => self.apply_typed::<Deployment>(manifest, namespace, &name).await,
            "Service" => self.apply_typed::<Service>(manifest, namespace, &name).await,
            "Ingress" => self.apply_typed::<Ingress>(manifest, namespace, &name).await,
            "PersistentVolumeClaim" => self.apply_typed::<PersistentVolumeClaim>(manifest, namespace, &name).await,
            "ConfigMap" => self.apply_typed::<ConfigMap>(manifest, namespace, &name).await,
            "Secret" => self.apply_typed::<Secret>(manifest, namespace, &name).await,
            other => Err(DriverError::UnrecognizedKind(other.to_string())),
        }
    }

    async fn get_namespace_status(&self, name: &str) -> Result<Option<String>, DriverError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(ns) => Ok(ns.status.and_then(|s| s.phase)),
            Err(e) if api_status(&e) == Some(404) => Ok(None),
            Err(e) => Err(DriverError::Transient(format!("get_namespace_status({name}): {e}"))),
        }
    }
}

impl KubeClusterDriver {
    /// Create; on 409 conflict, patch with the same body. Any other error fails.
    async fn apply_typed<K>(&self, manifest: &Value, namespace: &str, name: &str) -> Result<(), DriverError>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + serde::de::DeserializeOwned
            + serde::Serialize
            + Clone
            + std::fmt::Debug
            + ResourceExt,
        K::DynamicType: Default,
    {
        let object: K = serde_json::from_value(manifest.clone())
            .map_err(|e| DriverError::MalformedManifest(format!("{name}: {e}")))?;
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);

        match api.create(&PostParams::default(), &object).await {
            Ok(_) => Ok(()),
            Err(e) if api_status(&e) == Some(409) => api
                .patch(name, &PatchParams::apply("ephemera").force(), &Patch::Apply(&object))
                .await
                .map(|_| ())
                .map_err(|e| DriverError::Transient(format!("patch {name}: {e}"))),
            Err(e) => Err(DriverError::Transient(format!("create {name}: {e}"))),
        }
    }
}

/// Disabled-mode driver: every write fails fatally with `ClusterNotConfigured`,
/// used when the cluster client could not be built at startup.
pub struct DisabledClusterDriver;

#[async_trait]
impl ClusterDriver for DisabledClusterDriver {
    async fn create_namespace(&self, _name: &str, _labels: &BTreeMap<String, String>) -> Result<(), DriverError> {
        Err(DriverError::ClusterNotConfigured)
    }

    async fn delete_namespace(&self, _name: &str) -> Result<(), DriverError> {
        Err(DriverError::ClusterNotConfigured)
    }

    async fn namespace_exists(&self, _name: &str) -> Result<bool, DriverError> {
        Err(DriverError::ClusterNotConfigured)
    }

    async fn create_resource_quota(&self, _n: &str, _c: &str, _m: &str, _p: &str) -> Result<(), DriverError> {
        Err(DriverError::ClusterNotConfigured)
    }

    async fn apply_manifest(&self, _manifest: &Value) -> Result<(), DriverError> {
        Err(DriverError::ClusterNotConfigured)
    }

    async fn get_namespace_status(&self, _name: &str) -> Result<Option<String>, DriverError> {
        Err(DriverError::ClusterNotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_kinds_match_spec() {
        assert_eq!(
            RECOGNIZED_KINDS,
            &["Deployment", "Service", "Ingress", "PersistentVolumeClaim", "ConfigMap", "Secret"]
        );
    }

    #[tokio::test]
    async fn disabled_driver_fails_every_write() {
        let driver = DisabledClusterDriver;
        assert!(matches!(
            driver.create_namespace("ns", &BTreeMap::new()).await,
            Err(DriverError::ClusterNotConfigured)
        ));
        assert!(matches!(driver.delete_namespace("ns").await, Err(DriverError::ClusterNotConfigured)));
        assert!(matches!(
            driver.apply_manifest(&serde_json::json!({})).await,
            Err(DriverError::ClusterNotConfigured)
        ));
    }

    #[tokio::test]
    async fn apply_manifest_refuses_unknown_kind() {
        let m = serde_json::json!({
            "kind": "DaemonSet",
            "apiVersion": "apps/v1",
            "metadata": {"name": "x", "namespace": "ns"},
        });
        // DisabledClusterDriver short-circuits before the kind check in the real
        // driver, so exercise the match arm logic directly via RECOGNIZED_KINDS.
        assert!(!RECOGNIZED_KINDS.contains(&m["kind"].as_str().unwrap()));
    }
}
