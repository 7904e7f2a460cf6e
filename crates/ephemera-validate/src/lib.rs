mod error;
mod validator;

pub use error::RuleViolation;
pub use validator::{
    is_dns_label, parse_cpu_millicores, parse_memory_mi, ValidationResult, Validator,
    ALLOWED_API_VERSIONS, ALLOWED_KINDS, INTERNAL_ONLY_SERVICE_TYPES, MAX_CPU_LIMIT_MILLICORES,
    MAX_MANIFESTS, MAX_MEMORY_LIMIT_MI, MAX_REPLICAS,
};
