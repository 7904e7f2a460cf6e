//! Orchestrates the optional LLM synthesis pipeline (C4): fetch repository
//! context, check the cache, prompt the configured provider, parse and
//! validate its response. Every fallible step maps to a `SynthError` that the
//! caller (the lifecycle controller) recovers from by falling back to the
//! deterministic baseline synthesizer in [`crate::compose`].

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use ephemera_validate::Validator;

use crate::cache::LlmCache;
use crate::error::SynthError;
use crate::prompts::{build_user_prompt, MAX_ADDITIONAL_CONTEXT_CHARS, REPO_FILES_TO_FETCH, SYSTEM_PROMPT};
use crate::providers::LlmProvider;

const COMPOSE_CANDIDATES: &[&str] = &["docker-compose.yml", "docker-compose.yaml", "compose.yml", "compose.yaml"];
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Narrow capability the synthesizer needs from the source-host driver: read
/// one file at a ref. Kept separate from the driver crate so `ephemera-synth`
/// does not depend on `ephemera-driver` (and vice versa).
#[async_trait]
pub trait RepoFileFetcher: Send + Sync {
    async fn fetch_file(&self, repo_full_name: &str, path: &str, git_ref: &str) -> Result<Option<Vec<u8>>, SynthError>;
}

pub struct RepoContext {
    pub compose_content: String,
    pub additional_files: Vec<(String, String)>,
}

/// Fetches the compose file plus a budgeted set of supporting files.
/// Missing files are skipped silently; the non-compose budget is a hard cap
/// on total characters, not on file count.
pub async fn fetch_repo_context(
    fetcher: &dyn RepoFileFetcher,
    repo_full_name: &str,
    git_ref: &str,
) -> Result<RepoContext, SynthError> {
    let mut compose_content = None;
    let mut additional_files = Vec::new();
    let mut additional_chars = 0usize;

    for (path, budget) in REPO_FILES_TO_FETCH {
        let is_compose = COMPOSE_CANDIDATES.contains(path);
        if is_compose && compose_content.is_some() {
            continue;
        }

        let bytes = fetcher
            .fetch_file(repo_full_name, path, git_ref)
            .await
            .map_err(|e| SynthError::ContextFetch(format!("{path}: {e}")))?;
        let Some(bytes) = bytes else { continue };
        let content = String::from_utf8_lossy(&bytes).to_string();
        let truncated: String = content.chars().take(*budget).collect();

        if is_compose {
            compose_content = Some(truncated);
        } else {
            if additional_chars >= MAX_ADDITIONAL_CONTEXT_CHARS {
                break;
            }
            additional_chars += truncated.len();
            additional_files.push((path.to_string(), truncated));
        }
    }

    let compose_content = compose_content.ok_or(SynthError::ComposeNotFound)?;
    Ok(RepoContext { compose_content, additional_files })
}

/// Strips Markdown code fences if present, then parses as JSON. Accepts a
/// bare array, or an object with one of the keys `manifests`/`resources`/`items`.
pub fn parse_llm_response(text: &str) -> Result<Value, SynthError> {
    let stripped = strip_code_fences(text);

    let parsed: Value = match serde_json::from_str(stripped) {
        Ok(v) => v,
        Err(_) => {
            // Fall back to extracting the first top-level array substring,
            // in case the model wrapped the JSON in prose despite instructions.
            let start = stripped.find('[');
            let end = stripped.rfind(']');
            match (start, end) {
                (Some(s), Some(e)) if e > s => serde_json::from_str(&stripped[s..=e])
                    .map_err(|err| SynthError::ResponseParse(err.to_string()))?,
                _ => return Err(SynthError::ResponseParse("no JSON array found in response".into())),
            }
        }
    };

    match parsed {
        Value::Array(_) => Ok(parsed),
        Value::Object(ref map) => {
            for key in ["manifests", "resources", "items"] {
                if let Some(inner) = map.get(key) {
                    if inner.is_array() {
                        return Ok(inner.clone());
                    }
                }
            }
            Err(SynthError::ResponseParse("object response has no manifests/resources/items array".into()))
        }
        _ => Err(SynthError::ResponseParse("response is neither an array nor an object".into())),
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

pub struct LlmSynthesizer {
    provider: Box<dyn LlmProvider>,
    cache: LlmCache,
}

impl LlmSynthesizer {
    pub fn new(provider: Box<dyn LlmProvider>, cache_ttl: Duration) -> Self {
        LlmSynthesizer { provider, cache: LlmCache::new(cache_ttl) }
    }

    pub fn with_default_ttl(provider: Box<dyn LlmProvider>) -> Self {
        Self::new(provider, Duration::from_secs(DEFAULT_CACHE_TTL_SECS))
    }

    /// Runs the full pipeline and returns validated, corrected manifests.
    /// Any step failing returns a `SynthError`; the caller is expected to
    /// fall back to [`crate::compose::synthesize_baseline`].
    pub async fn generate(
        &self,
        fetcher: &dyn RepoFileFetcher,
        repo_full_name: &str,
        git_ref: &str,
        namespace: &str,
        app_name: &str,
        base_domain: &str,
    ) -> Result<(Vec<Value>, Vec<String>), SynthError> {
        let context = fetch_repo_context(fetcher, repo_full_name, git_ref).await?;
        let cache_key = LlmCache::key(&context.compose_content, namespace);

        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok((cached, vec![]));
        }

        let user_prompt = build_user_prompt(
            &context.compose_content,
            namespace,
            app_name,
            base_domain,
            &context.additional_files,
        );

        let response = self.provider.generate(SYSTEM_PROMPT, &user_prompt).await?;
        let raw = parse_llm_response(&response.text)?;

        let result = Validator::validate_all(&raw, namespace);
        if !result.is_valid {
            return Err(SynthError::Validation(result.errors.join("; ")));
        }

        let manifests = result.corrected_manifests.unwrap_or_default();
        self.cache.put(cache_key, manifests.clone()).await;

        let analyzed_files: Vec<String> = std::iter::once("docker-compose.yml".to_string())
            .chain(context.additional_files.iter().map(|(name, _)| name.clone()))
            .collect();
        Ok((manifests, analyzed_files))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}

/// Markdown plan summary attached to the Deployment row when AI synthesis
/// succeeds, in a fixed section order: provider, analyzed files, generated
/// resources by kind, service URLs, warnings.
pub fn generate_plan_summary(
    provider_name: &str,
    analyzed_files: &[String],
    manifests: &[Value],
    service_urls: &[String],
    warnings: &[String],
) -> String {
    let mut sections = vec![format!("**Provider**: {provider_name}")];

    if !analyzed_files.is_empty() {
        sections.push(format!("**Analyzed files**: {}", analyzed_files.join(", ")));
    }

    let mut by_kind: std::collections::BTreeMap<&str, Vec<&str>> = std::collections::BTreeMap::new();
    for m in manifests {
        if let (Some(kind), Some(name)) = (m["kind"].as_str(), m["metadata"]["name"].as_str()) {
            by_kind.entry(kind).or_default().push(name);
        }
    }
    if !by_kind.is_empty() {
        let mut lines = vec!["**Generated resources**:".to_string()];
        for (kind, names) in &by_kind {
            lines.push(format!("- {kind}: {}", names.join(", ")));
        }
        sections.push(lines.join("\n"));
    }

    if !service_urls.is_empty() {
        sections.push(format!("**Service URLs**:\n{}", service_urls.iter().map(|u| format!("- {u}")).collect::<Vec<_>>().join("\n")));
    }

    if !warnings.is_empty() {
        sections.push(format!("**Warnings**:\n{}", warnings.iter().map(|w| format!("- {w}")).collect::<Vec<_>>().join("\n")));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_array() {
        let v = parse_llm_response(r#"[{"kind":"Deployment"}]"#).unwrap();
        assert!(v.is_array());
    }

    #[test]
    fn strips_markdown_fences() {
        let v = parse_llm_response("```json\n[{\"kind\":\"Deployment\"}]\n```").unwrap();
        assert!(v.is_array());
    }

    #[test]
    fn unwraps_manifests_key() {
        let v = parse_llm_response(r#"{"manifests": [{"kind":"Deployment"}]}"#).unwrap();
        assert!(v.is_array());
    }

    #[test]
    fn unwraps_resources_key() {
        let v = parse_llm_response(r#"{"resources": [{"kind":"Service"}]}"#).unwrap();
        assert_eq!(v[0]["kind"], "Service");
    }

    #[test]
    fn falls_back_to_array_substring_when_wrapped_in_prose() {
        let v = parse_llm_response("Here you go:\n[{\"kind\":\"Deployment\"}]\nHope that helps!").unwrap();
        assert!(v.is_array());
    }

    #[test]
    fn rejects_unparseable_garbage() {
        assert!(parse_llm_response("not json at all").is_err());
    }

    #[test]
    fn plan_summary_lists_sections_in_order() {
        let manifests = vec![json!({"kind": "Deployment", "metadata": {"name": "web"}})];
        let summary = generate_plan_summary("anthropic", &["docker-compose.yml".to_string()], &manifests, &["https://pr-7-widget.example.com".to_string()], &[]);
        let provider_pos = summary.find("**Provider**").unwrap();
        let resources_pos = summary.find("**Generated resources**").unwrap();
        let urls_pos = summary.find("**Service URLs**").unwrap();
        assert!(provider_pos < resources_pos);
        assert!(resources_pos < urls_pos);
    }

    struct FakeFetcher;
    #[async_trait]
    impl RepoFileFetcher for FakeFetcher {
        async fn fetch_file(&self, _repo: &str, path: &str, _git_ref: &str) -> Result<Option<Vec<u8>>, SynthError> {
            if path == "docker-compose.yml" {
                Ok(Some(b"services:\n  web:\n    image: nginx\n".to_vec()))
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn context_fetch_errors_when_no_compose_found() {
        struct EmptyFetcher;
        #[async_trait]
        impl RepoFileFetcher for EmptyFetcher {
            async fn fetch_file(&self, _repo: &str, _path: &str, _git_ref: &str) -> Result<Option<Vec<u8>>, SynthError> {
                Ok(None)
            }
        }
        let err = fetch_repo_context(&EmptyFetcher, "acme/widget", "main").await.unwrap_err();
        assert!(matches!(err, SynthError::ComposeNotFound));
    }

    #[tokio::test]
    async fn context_fetch_finds_compose_and_skips_missing_files() {
        let ctx = fetch_repo_context(&FakeFetcher, "acme/widget", "main").await.unwrap();
        assert!(ctx.compose_content.contains("nginx"));
        assert!(ctx.additional_files.is_empty());
    }
}
