use thiserror::Error;

/// One rule violation. Only emitted by `Validator::validate_all` as a hard
/// `ValidationResult.errors` entry — rules that are merely warnings never
/// construct one of these, they push onto `warnings` directly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    #[error("AI response is not a list of manifests")]
    NotAList,

    #[error("no manifests generated")]
    Empty,

    #[error("too many manifests: {count} (max {max})")]
    TooMany { count: usize, max: usize },

    #[error("manifest[{index}]: not a JSON object")]
    NotAnObject { index: usize },

    #[error("manifest[{index}]: missing 'kind'")]
    MissingKind { index: usize },

    #[error("manifest[{index}]: missing 'apiVersion'")]
    MissingApiVersion { index: usize },

    #[error("manifest[{index}]: missing or invalid 'metadata'")]
    MissingMetadata { index: usize },

    #[error("manifest[{index}] ({kind}): missing 'metadata.name'")]
    MissingName { index: usize, kind: String },

    #[error("manifest[{index}]: disallowed kind '{kind}'")]
    DisallowedKind { index: usize, kind: String },

    #[error("manifest[{index}] ({kind}/{name}): disallowed apiVersion '{api_version}'")]
    DisallowedApiVersion {
        index: usize,
        kind: String,
        name: String,
        api_version: String,
    },

    #[error("manifest[{index}] ({kind}/{name}): invalid resource name, must be a valid DNS label")]
    InvalidName { index: usize, kind: String, name: String },

    #[error("manifest[{index}] (Deployment/{name}): hostNetwork is not allowed")]
    HostNetworkNotAllowed { index: usize, name: String },

    #[error("manifest[{index}] (Deployment/{name}): hostPID is not allowed")]
    HostPidNotAllowed { index: usize, name: String },

    #[error("manifest[{index}] (Deployment/{name}): hostIPC is not allowed")]
    HostIpcNotAllowed { index: usize, name: String },

    #[error("manifest[{index}] (Deployment/{name}): missing spec.template.spec")]
    MissingPodSpec { index: usize, name: String },

    #[error("manifest[{index}] (Deployment/{name}): no containers defined")]
    NoContainers { index: usize, name: String },

    #[error("manifest[{index}] (Deployment/{name}): hostPath volumes are not allowed")]
    HostPathNotAllowed { index: usize, name: String },

    #[error("manifest[{index}] ({context}): container is not a JSON object")]
    ContainerNotAnObject { index: usize, context: String },

    #[error("manifest[{index}] ({context}): missing container name")]
    MissingContainerName { index: usize, context: String },

    #[error("manifest[{index}] ({context}): missing container image")]
    MissingContainerImage { index: usize, context: String },

    #[error("manifest[{index}] ({context}): privileged containers are not allowed")]
    PrivilegedNotAllowed { index: usize, context: String },

    #[error("manifest[{index}] (Service/{name}): service type '{service_type}' is not allowed in preview environments, use ClusterIP")]
    DisallowedServiceType { index: usize, name: String, service_type: String },
}
