pub mod cache;
pub mod compose;
pub mod error;
pub mod prompts;
pub mod providers;
pub mod synthesizer;

pub use compose::{parse_compose, synthesize_baseline, ComposeDocument, ComposeService};
pub use error::SynthError;
pub use providers::{create_provider, LlmProvider, LlmResponse, ProviderConfig};
pub use synthesizer::{fetch_repo_context, generate_plan_summary, LlmSynthesizer, RepoContext, RepoFileFetcher};
