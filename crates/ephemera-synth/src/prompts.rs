//! Fixed prompt templates for the LLM synthesizer. The rules encoded here
//! (allowed kinds, resource caps, per-stack heuristics, build placeholder)
//! mirror the validator in `ephemera-validate` so the model is told the same
//! constraints the output will be checked against.

pub const SYSTEM_PROMPT: &str = r#"You are a Kubernetes deployment specialist for Ephemera, a platform that creates preview environments for pull requests.

Your job: given repository files (compose file, Dockerfiles, configuration files), generate production-quality Kubernetes manifests for a preview environment.

## Rules

1. OUTPUT FORMAT: Return ONLY a JSON array of Kubernetes manifest objects. No markdown, no explanation, no code fences. Pure JSON.

2. MANIFEST TYPES you may generate: Deployment (apps/v1), Service (v1), Ingress (networking.k8s.io/v1), PersistentVolumeClaim (v1), ConfigMap (v1), Secret (v1).

3. SERVICE TYPE AWARENESS:
   - Databases (postgres, mysql, mariadb, mongodb): official images, PersistentVolumeClaim (1Gi), ClusterIP only, no Ingress, TCP probes on the database port.
   - Caches (redis, memcached) and queues (rabbitmq, kafka, nats): same shape as databases but smaller resources, PVC only if compose configures persistence.
   - Web applications / APIs: Deployment + ClusterIP Service + Ingress, readiness/liveness probes, HTTP probes when a health endpoint can be inferred (/health, /api/health, /healthz, /).
   - Workers/background jobs: Deployment only, no Service, no Ingress.
   - Static frontends: Deployment + Service + Ingress.

4. IMAGE HANDLING: use `image:` directly when present. If the service has `build:` instead, you cannot build images — use the placeholder `NEEDS_BUILD:<service_name>` as the image value.

5. ENVIRONMENT VARIABLES: carry over all variables from the compose file. Rewrite hostnames that reference other compose services to the Kubernetes service name you create for them. Never invent real secrets; keep placeholder values as-is.

6. NETWORKING: externally-reachable services get an Ingress with hostname `{namespace}-{service_name}.{base_domain}`, ingressClassName `nginx`, annotation `cert-manager.io/cluster-issuer: letsencrypt-prod`, annotation `nginx.ingress.kubernetes.io/ssl-redirect: "true"`, TLS with secretName `{service_name}-tls`. Internal services use ClusterIP only.

7. RESOURCE LIMITS (conservative, preview environments): web apps/APIs 100m/128Mi requests, 500m/512Mi limits; databases 100m/256Mi requests, 500m/1Gi limits; caches 50m/64Mi requests, 250m/256Mi limits; workers 100m/128Mi requests, 500m/512Mi limits.

8. HEALTH CHECKS: readinessProbe and livenessProbe on every service. initialDelaySeconds 10 for apps, 5 for caches, 15 for databases; periodSeconds 10; timeoutSeconds 5.

9. LABELS on every resource: app: {app_name}, service: {service_name}, managed-by: ephemera.

10. NAMESPACE: every resource specifies namespace: {namespace}.

11. VOLUMES: databases get a 1Gi ReadWriteOnce PersistentVolumeClaim mounted at the standard data directory for that engine; omit storageClassName.

12. REPLICAS: always 1 for preview environments.

13. You do not need to handle startup ordering; Kubernetes readiness probes cover it. Just make sure environment variables reference the correct Kubernetes service names.
"#;

/// Files to fetch from the target repository, in priority order, with a
/// per-file character budget. Only the first compose file found is used.
pub const REPO_FILES_TO_FETCH: &[(&str, usize)] = &[
    ("docker-compose.yml", 10_000),
    ("docker-compose.yaml", 10_000),
    ("compose.yml", 10_000),
    ("compose.yaml", 10_000),
    ("Dockerfile", 5_000),
    (".env.example", 3_000),
    (".env.sample", 3_000),
    ("README.md", 4_000),
    ("package.json", 3_000),
    ("requirements.txt", 2_000),
    ("Pipfile", 2_000),
    ("go.mod", 2_000),
    ("Cargo.toml", 2_000),
    ("pom.xml", 3_000),
    ("build.gradle", 2_000),
    ("Gemfile", 2_000),
];

/// Total character budget for everything *besides* the compose file itself.
pub const MAX_ADDITIONAL_CONTEXT_CHARS: usize = 25_000;

pub fn build_user_prompt(
    compose_content: &str,
    namespace: &str,
    app_name: &str,
    base_domain: &str,
    additional_files: &[(String, String)],
) -> String {
    let mut parts = vec![
        "Generate Kubernetes manifests for this application.".to_string(),
        String::new(),
        format!("- Namespace: `{namespace}`"),
        format!("- App name: `{app_name}`"),
        format!("- Base domain: `{base_domain}`"),
        String::new(),
        "## docker-compose.yml".to_string(),
        "```yaml".to_string(),
        compose_content.trim().to_string(),
        "```".to_string(),
    ];

    for (filename, content) in additional_files {
        if !content.trim().is_empty() {
            parts.push(String::new());
            parts.push(format!("## {filename}"));
            parts.push("```".to_string());
            parts.push(content.trim().to_string());
            parts.push("```".to_string());
        }
    }

    parts.join("\n")
}
