//! Safety gate between synthesized manifests (deterministic or LLM-generated)
//! and the cluster driver. Operates on the raw JSON shape the driver applies,
//! since the LLM path produces arbitrary structure that must be checked
//! before it is trusted with a typed representation.

use serde_json::Value;

use crate::error::RuleViolation;

pub const ALLOWED_KINDS: &[&str] = &[
    "Deployment",
    "Service",
    "Ingress",
    "PersistentVolumeClaim",
    "ConfigMap",
    "Secret",
];

pub const ALLOWED_API_VERSIONS: &[&str] = &["apps/v1", "v1", "networking.k8s.io/v1"];

pub const INTERNAL_ONLY_SERVICE_TYPES: &[&str] = &["NodePort", "LoadBalancer", "ExternalName"];

pub const MAX_MANIFESTS: usize = 50;
pub const MAX_REPLICAS: i64 = 2;
pub const MAX_CPU_LIMIT_MILLICORES: i64 = 2000;
pub const MAX_MEMORY_LIMIT_MI: i64 = 2048;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub corrected_manifests: Option<Vec<Value>>,
}

impl ValidationResult {
    fn new() -> Self {
        ValidationResult {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            corrected_manifests: None,
        }
    }

    fn add_error(&mut self, violation: RuleViolation) {
        self.errors.push(violation.to_string());
        self.is_valid = false;
    }

    fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Validates and in-place corrects a set of Kubernetes-shaped manifests.
///
/// Rules are enforced in a fixed order: structural checks,
/// then kind/apiVersion allow-lists, then name validity, then namespace
/// correction, then kind-specific rules. The corrected manifest set is only
/// produced when every check that can fail as an error passed.
pub struct Validator;

impl Validator {
    pub fn validate_all(manifests: &Value, expected_namespace: &str) -> ValidationResult {
        let mut result = ValidationResult::new();

        let Some(array) = manifests.as_array() else {
            result.add_error(RuleViolation::NotAList);
            return result;
        };

        if array.is_empty() {
            result.add_error(RuleViolation::Empty);
            return result;
        }

        if array.len() > MAX_MANIFESTS {
            result.add_error(RuleViolation::TooMany {
                count: array.len(),
                max: MAX_MANIFESTS,
            });
            return result;
        }

        let mut corrected = Vec::with_capacity(array.len());
        for (index, manifest) in array.iter().enumerate() {
            if let Some(m) = Self::validate_and_correct(manifest.clone(), expected_namespace, index, &mut result) {
                corrected.push(m);
            }
        }

        if result.is_valid {
            result.corrected_manifests = Some(corrected);
        }
        result
    }

    fn validate_and_correct(
        mut manifest: Value,
        expected_namespace: &str,
        index: usize,
        result: &mut ValidationResult,
    ) -> Option<Value> {
        let Some(obj) = manifest.as_object() else {
            result.add_error(RuleViolation::NotAnObject { index });
            return None;
        };

        let kind = obj.get("kind").and_then(Value::as_str).map(str::to_owned);
        let api_version = obj.get("apiVersion").and_then(Value::as_str).map(str::to_owned);
        let metadata_is_object = obj.get("metadata").is_some_and(Value::is_object);

        let Some(kind) = kind else {
            result.add_error(RuleViolation::MissingKind { index });
            return None;
        };
        let Some(api_version) = api_version else {
            result.add_error(RuleViolation::MissingApiVersion { index });
            return None;
        };
        if !metadata_is_object {
            result.add_error(RuleViolation::MissingMetadata { index });
            return None;
        }

        let name = manifest["metadata"]["name"].as_str().map(str::to_owned);
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            result.add_error(RuleViolation::MissingName { index, kind });
            return None;
        };

        if !ALLOWED_KINDS.contains(&kind.as_str()) {
            result.add_error(RuleViolation::DisallowedKind { index, kind });
            return None;
        }

        if !ALLOWED_API_VERSIONS.contains(&api_version.as_str()) {
            result.add_error(RuleViolation::DisallowedApiVersion { index, kind, name, api_version });
            return None;
        }

        if !is_dns_label(&name) {
            result.add_error(RuleViolation::InvalidName { index, kind, name });
            return None;
        }

        let actual_ns = manifest["metadata"]["namespace"].as_str().map(str::to_owned);
        if actual_ns.as_deref() != Some(expected_namespace) {
            if let Some(actual_ns) = actual_ns.filter(|ns| !ns.is_empty()) {
                result.add_warning(format!(
                    "manifest[{index}] ({kind}/{name}): corrected namespace from '{actual_ns}' to '{expected_namespace}'"
                ));
            }
            manifest["metadata"]["namespace"] = Value::String(expected_namespace.to_string());
        }

        let ok = match kind.as_str() {
            "Deployment" => Self::validate_deployment(&mut manifest, index, &name, result),
            "Service" => Self::validate_service(&manifest, index, &name, result),
            "Ingress" => Self::validate_ingress(&manifest, index, &name, result),
            "PersistentVolumeClaim" => Self::validate_pvc(&manifest, index, &name, result),
            // ConfigMap and Secret have no kind-specific rules.
            _ => true,
        };

        ok.then_some(manifest)
    }

    fn validate_deployment(manifest: &mut Value, index: usize, name: &str, result: &mut ValidationResult) -> bool {
        let spec = &mut manifest["spec"];

        let replicas = spec.get("replicas").and_then(Value::as_i64).unwrap_or(1);
        if replicas > MAX_REPLICAS {
            result.add_warning(format!(
                "manifest[{index}] (Deployment/{name}): capped replicas from {replicas} to {MAX_REPLICAS}"
            ));
            spec["replicas"] = Value::from(MAX_REPLICAS);
        }

        let Some(pod_spec) = spec.get("template").and_then(|t| t.get("spec")).cloned() else {
            result.add_error(RuleViolation::MissingPodSpec { index, name: name.to_string() });
            return false;
        };

        if pod_spec.get("hostNetwork").and_then(Value::as_bool).unwrap_or(false) {
            result.add_error(RuleViolation::HostNetworkNotAllowed { index, name: name.to_string() });
            return false;
        }
        if pod_spec.get("hostPID").and_then(Value::as_bool).unwrap_or(false) {
            result.add_error(RuleViolation::HostPidNotAllowed { index, name: name.to_string() });
            return false;
        }
        if pod_spec.get("hostIPC").and_then(Value::as_bool).unwrap_or(false) {
            result.add_error(RuleViolation::HostIpcNotAllowed { index, name: name.to_string() });
            return false;
        }

        let containers = pod_spec.get("containers").and_then(Value::as_array).cloned().unwrap_or_default();
        if containers.is_empty() {
            result.add_error(RuleViolation::NoContainers { index, name: name.to_string() });
            return false;
        }
        for (ci, container) in containers.iter().enumerate() {
            let context = format!("Deployment/{name}/container[{ci}]");
            if !Self::validate_container(container, index, &context, result) {
                return false;
            }
        }

        if let Some(volumes) = pod_spec.get("volumes").and_then(Value::as_array) {
            for vol in volumes {
                if vol.get("hostPath").is_some() {
                    result.add_error(RuleViolation::HostPathNotAllowed { index, name: name.to_string() });
                    return false;
                }
            }
        }

        true
    }

    fn validate_container(container: &Value, index: usize, context: &str, result: &mut ValidationResult) -> bool {
        let Some(obj) = container.as_object() else {
            result.add_error(RuleViolation::ContainerNotAnObject { index, context: context.to_string() });
            return false;
        };

        if obj.get("name").and_then(Value::as_str).filter(|s| !s.is_empty()).is_none() {
            result.add_error(RuleViolation::MissingContainerName { index, context: context.to_string() });
            return false;
        }

        let Some(image) = obj.get("image").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
            result.add_error(RuleViolation::MissingContainerImage { index, context: context.to_string() });
            return false;
        };

        if image.starts_with("NEEDS_BUILD:") {
            result.add_warning(format!(
                "manifest[{index}] ({context}): image '{image}' requires a build step, the service will not start until a pre-built image is pushed"
            ));
        }

        if container["securityContext"]["privileged"].as_bool().unwrap_or(false) {
            result.add_error(RuleViolation::PrivilegedNotAllowed { index, context: context.to_string() });
            return false;
        }

        let limits = &container["resources"]["limits"];
        if let Some(cpu) = limits.get("cpu").and_then(Value::as_str) {
            check_resource_limit(cpu, "cpu", index, context, result);
        }
        if let Some(memory) = limits.get("memory").and_then(Value::as_str) {
            check_resource_limit(memory, "memory", index, context, result);
        }

        true
    }

    fn validate_service(manifest: &Value, index: usize, name: &str, result: &mut ValidationResult) -> bool {
        let spec = &manifest["spec"];
        let service_type = spec.get("type").and_then(Value::as_str).unwrap_or("ClusterIP");
        if INTERNAL_ONLY_SERVICE_TYPES.contains(&service_type) {
            result.add_error(RuleViolation::DisallowedServiceType {
                index,
                name: name.to_string(),
                service_type: service_type.to_string(),
            });
            return false;
        }

        if spec.get("ports").and_then(Value::as_array).is_none_or(Vec::is_empty) {
            result.add_warning(format!("manifest[{index}] (Service/{name}): no ports defined"));
        }
        true
    }

    fn validate_ingress(manifest: &Value, index: usize, name: &str, result: &mut ValidationResult) -> bool {
        if manifest["spec"]["rules"].as_array().is_none_or(Vec::is_empty) {
            result.add_warning(format!("manifest[{index}] (Ingress/{name}): no rules defined"));
        }
        true
    }

    fn validate_pvc(manifest: &Value, index: usize, name: &str, result: &mut ValidationResult) -> bool {
        let spec = &manifest["spec"];
        if spec.get("accessModes").and_then(Value::as_array).is_none_or(Vec::is_empty) {
            result.add_warning(format!("manifest[{index}] (PVC/{name}): no accessModes specified"));
        }
        if spec["resources"]["requests"]["storage"].as_str().is_none() {
            result.add_warning(format!("manifest[{index}] (PVC/{name}): no storage request specified"));
        }
        true
    }
}

fn check_resource_limit(value: &str, resource_type: &str, index: usize, context: &str, result: &mut ValidationResult) {
    let parsed = match resource_type {
        "cpu" => parse_cpu_millicores(value),
        _ => parse_memory_mi(value),
    };
    let Some(parsed) = parsed else {
        result.add_warning(format!("manifest[{index}] ({context}): could not parse {resource_type} limit '{value}'"));
        return;
    };
    let max = if resource_type == "cpu" { MAX_CPU_LIMIT_MILLICORES } else { MAX_MEMORY_LIMIT_MI };
    let unit = if resource_type == "cpu" { "m" } else { "Mi" };
    if parsed > max {
        result.add_warning(format!(
            "manifest[{index}] ({context}): {resource_type} limit {value} exceeds maximum {max}{unit}, will be capped"
        ));
    }
}

/// Trailing `m` = millicores, else cores * 1000.
pub fn parse_cpu_millicores(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Some(stripped) = value.strip_suffix('m') {
        stripped.parse::<i64>().ok()
    } else {
        value.parse::<f64>().ok().map(|cores| (cores * 1000.0) as i64)
    }
}

/// Gi*1024 / Mi*1 / Ki/1024 / bytes/(1024*1024) -> Mi.
pub fn parse_memory_mi(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Some(stripped) = value.strip_suffix("Gi") {
        stripped.parse::<f64>().ok().map(|gi| (gi * 1024.0) as i64)
    } else if let Some(stripped) = value.strip_suffix("Mi") {
        stripped.parse::<f64>().ok().map(|mi| mi as i64)
    } else if let Some(stripped) = value.strip_suffix("Ki") {
        stripped.parse::<f64>().ok().map(|ki| (ki / 1024.0) as i64)
    } else {
        value.parse::<i64>().ok().map(|bytes| bytes / (1024 * 1024))
    }
}

/// RFC-1123-ish DNS label: lowercase alphanumeric and hyphens, 1-63 chars,
/// must start and end with an alphanumeric.
pub fn is_dns_label(s: &str) -> bool {
    if s.is_empty() || s.len() > 63 {
        return false;
    }
    let chars: Vec<char> = s.chars().collect();
    let is_alnum = |c: &char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !is_alnum(&chars[0]) || !is_alnum(chars.last().unwrap()) {
        return false;
    }
    chars.iter().all(|c| is_alnum(c) || *c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(name: &str, namespace: &str) -> Value {
        json!({
            "kind": "Deployment",
            "apiVersion": "apps/v1",
            "metadata": {"name": name, "namespace": namespace},
            "spec": {
                "replicas": 1,
                "template": {"spec": {"containers": [{"name": "web", "image": "nginx:latest"}]}}
            }
        })
    }

    #[test]
    fn accepts_well_formed_deployment() {
        let manifests = json!([deployment("web", "pr-7-widget")]);
        let result = Validator::validate_all(&manifests, "pr-7-widget");
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(result.corrected_manifests.unwrap().len(), 1);
    }

    #[test]
    fn rejects_disallowed_kind() {
        let manifests = json!([{
            "kind": "DaemonSet",
            "apiVersion": "apps/v1",
            "metadata": {"name": "web"},
        }]);
        let result = Validator::validate_all(&manifests, "pr-7-widget");
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("Disallowed kind") || result.errors[0].contains("disallowed kind"));
    }

    #[test]
    fn corrects_mismatched_namespace_as_warning() {
        let manifests = json!([deployment("web", "some-other-ns")]);
        let result = Validator::validate_all(&manifests, "pr-7-widget");
        assert!(result.is_valid);
        let corrected = result.corrected_manifests.unwrap();
        assert_eq!(corrected[0]["metadata"]["namespace"], "pr-7-widget");
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn caps_replicas_as_warning_not_error() {
        let mut m = deployment("web", "pr-7-widget");
        m["spec"]["replicas"] = json!(10);
        let manifests = json!([m]);
        let result = Validator::validate_all(&manifests, "pr-7-widget");
        assert!(result.is_valid);
        let corrected = result.corrected_manifests.unwrap();
        assert_eq!(corrected[0]["spec"]["replicas"], 2);
    }

    #[test]
    fn rejects_host_network() {
        let mut m = deployment("web", "pr-7-widget");
        m["spec"]["template"]["spec"]["hostNetwork"] = json!(true);
        let manifests = json!([m]);
        let result = Validator::validate_all(&manifests, "pr-7-widget");
        assert!(!result.is_valid);
    }

    #[test]
    fn rejects_privileged_container() {
        let mut m = deployment("web", "pr-7-widget");
        m["spec"]["template"]["spec"]["containers"][0]["securityContext"] = json!({"privileged": true});
        let manifests = json!([m]);
        let result = Validator::validate_all(&manifests, "pr-7-widget");
        assert!(!result.is_valid);
    }

    #[test]
    fn warns_on_needs_build_image() {
        let mut m = deployment("web", "pr-7-widget");
        m["spec"]["template"]["spec"]["containers"][0]["image"] = json!("NEEDS_BUILD:web");
        let manifests = json!([m]);
        let result = Validator::validate_all(&manifests, "pr-7-widget");
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.contains("requires a build step")));
    }

    #[test]
    fn rejects_node_port_service() {
        let manifests = json!([{
            "kind": "Service",
            "apiVersion": "v1",
            "metadata": {"name": "web", "namespace": "pr-7-widget"},
            "spec": {"type": "NodePort", "ports": [{"port": 80}]},
        }]);
        let result = Validator::validate_all(&manifests, "pr-7-widget");
        assert!(!result.is_valid);
    }

    #[test]
    fn rejects_not_a_list() {
        let result = Validator::validate_all(&json!({"kind": "Deployment"}), "pr-7-widget");
        assert!(!result.is_valid);
    }

    #[test]
    fn rejects_empty_list() {
        let result = Validator::validate_all(&json!([]), "pr-7-widget");
        assert!(!result.is_valid);
    }

    #[test]
    fn rejects_too_many_manifests() {
        let many: Vec<Value> = (0..51).map(|i| deployment(&format!("web-{i}"), "pr-7-widget")).collect();
        let result = Validator::validate_all(&json!(many), "pr-7-widget");
        assert!(!result.is_valid);
    }

    #[test]
    fn cpu_parsing() {
        assert_eq!(parse_cpu_millicores("500m"), Some(500));
        assert_eq!(parse_cpu_millicores("2"), Some(2000));
        assert_eq!(parse_cpu_millicores("1.5"), Some(1500));
    }

    #[test]
    fn memory_parsing() {
        assert_eq!(parse_memory_mi("1Gi"), Some(1024));
        assert_eq!(parse_memory_mi("512Mi"), Some(512));
        assert_eq!(parse_memory_mi("2048Ki"), Some(2));
    }

    #[test]
    fn dns_label_validation() {
        assert!(is_dns_label("web-server"));
        assert!(is_dns_label("a"));
        assert!(!is_dns_label("-leading-hyphen"));
        assert!(!is_dns_label("Uppercase"));
        assert!(!is_dns_label(""));
    }
}
