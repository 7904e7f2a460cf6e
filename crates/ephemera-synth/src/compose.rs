//! Parses a container-compose document and synthesizes the deterministic
//! baseline manifest set (C3). This is the fallback path when no AI provider
//! is configured, and the recovery path when the LLM pipeline fails.

use serde_json::{json, Value};
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;

use crate::error::SynthError;

const DEFAULT_IMAGE: &str = "nginx:latest";
const INGRESS_CLASS: &str = "nginx";
const CLUSTER_ISSUER: &str = "letsencrypt-prod";

#[derive(Debug, Clone, PartialEq)]
pub struct PortMapping {
    pub host: Option<i64>,
    pub container: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ComposeService {
    pub image: Option<String>,
    /// Present when the compose service declares a `build:` section, meaning
    /// no ready-to-pull image exists.
    pub needs_build: bool,
    pub env: Vec<(String, String)>,
    pub ports: Vec<PortMapping>,
}

#[derive(Debug, Clone, Default)]
pub struct ComposeDocument {
    pub services: BTreeMap<String, ComposeService>,
}

/// Parses a raw compose YAML document. The only required top-level key is
/// `services`; anything else (`version`, `networks`, `volumes`) is ignored.
pub fn parse_compose(raw: &str) -> Result<ComposeDocument, SynthError> {
    let root: YamlValue =
        serde_yaml::from_str(raw).map_err(|e| SynthError::ComposeParse(e.to_string()))?;

    let services_value = root
        .as_mapping()
        .and_then(|m| m.get(YamlValue::String("services".into())))
        .ok_or_else(|| SynthError::ComposeParse("missing top-level 'services' key".into()))?;

    let services_map = services_value
        .as_mapping()
        .ok_or_else(|| SynthError::ComposeParse("'services' is not a mapping".into()))?;

    let mut services = BTreeMap::new();
    for (name, def) in services_map {
        let name = name
            .as_str()
            .ok_or_else(|| SynthError::ComposeParse("service name is not a string".into()))?
            .to_string();
        services.insert(name, parse_service(def)?);
    }

    Ok(ComposeDocument { services })
}

fn parse_service(def: &YamlValue) -> Result<ComposeService, SynthError> {
    let mapping = def
        .as_mapping()
        .ok_or_else(|| SynthError::ComposeParse("service definition is not a mapping".into()))?;

    let image = mapping
        .get(YamlValue::String("image".into()))
        .and_then(YamlValue::as_str)
        .map(str::to_string);
    let needs_build = mapping.contains_key(YamlValue::String("build".into()));

    let env = mapping
        .get(YamlValue::String("environment".into()))
        .map(parse_environment)
        .unwrap_or_default();

    let ports = mapping
        .get(YamlValue::String("ports".into()))
        .and_then(YamlValue::as_sequence)
        .map(|seq| seq.iter().filter_map(parse_port_entry).collect())
        .unwrap_or_default();

    Ok(ComposeService { image, needs_build, env, ports })
}

/// Accepts both the map form (`{K: V}`) and the list form (`["K=V"]`).
fn parse_environment(value: &YamlValue) -> Vec<(String, String)> {
    if let Some(mapping) = value.as_mapping() {
        return mapping
            .iter()
            .filter_map(|(k, v)| {
                let k = k.as_str()?.to_string();
                let v = yaml_scalar_to_string(v)?;
                Some((k, v))
            })
            .collect();
    }
    if let Some(seq) = value.as_sequence() {
        return seq
            .iter()
            .filter_map(|entry| {
                let entry = entry.as_str()?;
                let (k, v) = entry.split_once('=')?;
                Some((k.to_string(), v.to_string()))
            })
            .collect();
    }
    Vec::new()
}

fn yaml_scalar_to_string(v: &YamlValue) -> Option<String> {
    match v {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accepts a bare integer (`8000`), a single-port string (`"8000"`), or a
/// `host:container` string (`"8000:8000"`). The container side is always the
/// trailing element when split by `:`.
fn parse_port_entry(value: &YamlValue) -> Option<PortMapping> {
    if let Some(n) = value.as_i64() {
        return Some(PortMapping { host: None, container: n });
    }
    let s = value.as_str()?;
    let parts: Vec<&str> = s.split(':').collect();
    match parts.as_slice() {
        [container] => Some(PortMapping { host: None, container: container.parse().ok()? }),
        [host, container] => Some(PortMapping {
            host: host.parse().ok(),
            container: container.parse().ok()?,
        }),
        _ => None,
    }
}

/// Emits the Deployment/Service/Ingress set for every compose service.
pub fn synthesize_baseline(
    compose: &ComposeDocument,
    namespace: &str,
    app_name: &str,
    base_domain: &str,
) -> Vec<Value> {
    let pr_number = namespace.split('-').nth(1).unwrap_or("0");
    let mut manifests = Vec::new();

    for (service_name, service) in &compose.services {
        manifests.push(deployment_manifest(service_name, service, namespace, app_name));

        if !service.ports.is_empty() {
            manifests.push(service_manifest(service_name, service, namespace, app_name));
            manifests.push(ingress_manifest(service_name, namespace, app_name, pr_number, base_domain));
        }
    }

    manifests
}

fn labels(app_name: &str, service_name: &str) -> Value {
    json!({"app": app_name, "service": service_name, "managed-by": "ephemera"})
}

fn deployment_manifest(service_name: &str, service: &ComposeService, namespace: &str, app_name: &str) -> Value {
    let image = if service.needs_build {
        format!("NEEDS_BUILD:{service_name}")
    } else {
        service.image.clone().unwrap_or_else(|| DEFAULT_IMAGE.to_string())
    };

    let env: Vec<Value> = service
        .env
        .iter()
        .map(|(k, v)| json!({"name": k, "value": v}))
        .collect();

    let container_ports: Vec<Value> = service
        .ports
        .iter()
        .map(|p| json!({"containerPort": p.container}))
        .collect();

    json!({
        "kind": "Deployment",
        "apiVersion": "apps/v1",
        "metadata": {
            "name": service_name,
            "namespace": namespace,
            "labels": labels(app_name, service_name),
        },
        "spec": {
            "replicas": 1,
            "selector": {"matchLabels": {"service": service_name}},
            "template": {
                "metadata": {"labels": labels(app_name, service_name)},
                "spec": {
                    "containers": [{
                        "name": service_name,
                        "image": image,
                        "env": env,
                        "ports": container_ports,
                    }]
                }
            }
        }
    })
}

fn service_manifest(service_name: &str, service: &ComposeService, namespace: &str, app_name: &str) -> Value {
    let ports: Vec<Value> = service
        .ports
        .iter()
        .map(|p| {
            let host = p.host.unwrap_or(p.container);
            json!({
                "name": format!("port-{}", p.container),
                "port": host,
                "targetPort": p.container,
            })
        })
        .collect();

    json!({
        "kind": "Service",
        "apiVersion": "v1",
        "metadata": {
            "name": service_name,
            "namespace": namespace,
            "labels": labels(app_name, service_name),
        },
        "spec": {
            "type": "ClusterIP",
            "selector": {"service": service_name},
            "ports": ports,
        }
    })
}

fn ingress_manifest(service_name: &str, namespace: &str, app_name: &str, pr_number: &str, base_domain: &str) -> Value {
    let host = format!("pr-{pr_number}-{service_name}.{base_domain}");
    json!({
        "kind": "Ingress",
        "apiVersion": "networking.k8s.io/v1",
        "metadata": {
            "name": service_name,
            "namespace": namespace,
            "labels": labels(app_name, service_name),
            "annotations": {
                "cert-manager.io/cluster-issuer": CLUSTER_ISSUER,
                "nginx.ingress.kubernetes.io/ssl-redirect": "true",
            },
        },
        "spec": {
            "ingressClassName": INGRESS_CLASS,
            "tls": [{"hosts": [host.clone()], "secretName": format!("{service_name}-tls")}],
            "rules": [{
                "host": host,
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {"service": {"name": service_name, "port": {"number": 80}}},
                    }]
                }
            }]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE_YAML: &str = r#"
services:
  web:
    image: myorg/web:latest
    environment:
      - DB_HOST=db
      - DEBUG=true
    ports:
      - "8080:8000"
  db:
    image: postgres:16
    environment:
      POSTGRES_PASSWORD: changeme
"#;

    #[test]
    fn parses_services_and_ports() {
        let doc = parse_compose(COMPOSE_YAML).unwrap();
        assert_eq!(doc.services.len(), 2);
        let web = &doc.services["web"];
        assert_eq!(web.ports[0], PortMapping { host: Some(8080), container: 8000 });
    }

    #[test]
    fn env_list_and_map_forms_both_parse() {
        let doc = parse_compose(COMPOSE_YAML).unwrap();
        assert!(doc.services["web"].env.contains(&("DB_HOST".to_string(), "db".to_string())));
        assert!(doc.services["db"].env.contains(&("POSTGRES_PASSWORD".to_string(), "changeme".to_string())));
    }

    #[test]
    fn missing_services_key_errors() {
        let err = parse_compose("version: '3'\n").unwrap_err();
        assert!(matches!(err, SynthError::ComposeParse(_)));
    }

    #[test]
    fn port_forms_all_yield_same_container_port() {
        let bare = parse_port_entry(&YamlValue::Number(8000.into())).unwrap();
        let single = parse_port_entry(&YamlValue::String("8000".into())).unwrap();
        let mapped = parse_port_entry(&YamlValue::String("8000:8000".into())).unwrap();
        assert_eq!(bare.container, 8000);
        assert_eq!(single.container, 8000);
        assert_eq!(mapped.container, 8000);
    }

    #[test]
    fn baseline_includes_service_and_ingress_only_when_ports_exposed() {
        let doc = parse_compose(COMPOSE_YAML).unwrap();
        let manifests = synthesize_baseline(&doc, "pr-7-widget", "widget", "preview.example.com");
        let kinds: Vec<&str> = manifests.iter().map(|m| m["kind"].as_str().unwrap()).collect();
        // web has ports -> Deployment+Service+Ingress; db has none -> Deployment only.
        assert_eq!(kinds.iter().filter(|k| **k == "Deployment").count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == "Service").count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == "Ingress").count(), 1);
    }

    #[test]
    fn ingress_hostname_uses_pr_number_from_namespace() {
        let doc = parse_compose(COMPOSE_YAML).unwrap();
        let manifests = synthesize_baseline(&doc, "pr-7-widget", "widget", "preview.example.com");
        let ingress = manifests.iter().find(|m| m["kind"] == "Ingress").unwrap();
        assert_eq!(ingress["spec"]["rules"][0]["host"], "pr-7-widget.preview.example.com");
    }

    #[test]
    fn build_declaration_yields_needs_build_placeholder() {
        let doc = parse_compose(
            r#"
services:
  worker:
    build: .
"#,
        )
        .unwrap();
        let manifests = synthesize_baseline(&doc, "pr-1-app", "app", "preview.example.com");
        let image = manifests[0]["spec"]["template"]["spec"]["containers"][0]["image"].as_str().unwrap();
        assert_eq!(image, "NEEDS_BUILD:worker");
    }
}
