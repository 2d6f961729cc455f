//! # Command-line Flags
//!
//! `clap` definition of the controller's flags and their conversion into the
//! tagging [`Config`] plus the process-level [`RuntimeSettings`].

use super::{parse_copy_labels, parse_tag_string, Cloud, Config, ConfigError, TagFormat};
use crate::constants::{
    DEFAULT_ANNOTATION_PREFIX, DEFAULT_LEASE_LOCK_NAME, DEFAULT_METRICS_PORT, DEFAULT_STATUS_PORT,
    SERVICE_ACCOUNT_NAMESPACE_PATH,
};
use crate::tags::Tags;
use clap::Parser;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};
use uuid::Uuid;

static AWS_REGION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w]{2}[-][\w]{4,9}[-][\d]$|^[\w]{2}[-][\w]{3}[-][\w]{4,9}[-][\d]$")
        .expect("Failed to compile AWS region regex - this should never happen")
});

/// Kubernetes controller that tags cloud volumes from PersistentVolumeClaims
#[derive(Debug, Parser)]
#[command(name = "k8s-pvc-tagger", version = env!("BUILD_VERSION"), about, long_about = None)]
pub struct Args {
    /// Absolute path to the kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// The kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// The lease holder identity (a random UUID when unset)
    #[arg(long)]
    pub lease_id: Option<String>,

    /// The lease lock resource name
    #[arg(long, default_value = DEFAULT_LEASE_LOCK_NAME)]
    pub lease_lock_name: String,

    /// The lease lock resource namespace (the service account's namespace when unset)
    #[arg(long, env = "NAMESPACE")]
    pub lease_lock_namespace: Option<String>,

    /// The AWS region (resolved from the instance metadata when unset)
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Default tags to add to every volume
    #[arg(long, default_value = "")]
    pub default_tags: String,

    /// Whether tags are written as json or csv
    #[arg(long, value_enum, default_value_t = TagFormat::Json)]
    pub tag_format: TagFormat,

    /// Annotation prefix to check
    #[arg(long, default_value = DEFAULT_ANNOTATION_PREFIX)]
    pub annotation_prefix: String,

    /// Comma separated namespaces to watch (default is all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    pub watch_namespace: String,

    /// The healthz port
    #[arg(long, default_value_t = DEFAULT_STATUS_PORT)]
    pub status_port: u16,

    /// The prometheus metrics port
    #[arg(long, default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Allow any tag, even Kubernetes assigned ones, to be set
    #[arg(long)]
    pub allow_all_tags: bool,

    /// The cloud provider
    #[arg(long, value_enum, default_value_t = Cloud::Aws)]
    pub cloud: Cloud,

    /// Comma separated PVC labels to copy to volumes, `*` copies all labels
    #[arg(long, default_value = "")]
    pub copy_labels: String,
}

/// Process-level settings that are not part of the tagging configuration
#[derive(Debug, Clone, Default)]
pub struct RuntimeSettings {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    /// Explicit AWS region, if one was given
    pub region: Option<String>,
    /// Namespaces to watch; a single empty string means all namespaces
    pub watch_namespaces: Vec<String>,
    pub status_port: u16,
    pub metrics_port: u16,
    pub lease: LeaseSettings,
}

/// Lease used to elect the single active replica
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseSettings {
    pub name: String,
    pub namespace: String,
    /// Holder identity written into the Lease
    pub identity: String,
}

impl LeaseSettings {
    /// Fill in the lease defaults
    ///
    /// An unset namespace is read from `service_account_namespace`, an unset
    /// identity becomes a random UUID.
    ///
    /// # Errors
    /// Returns an error when the lock name is empty or no namespace can be found
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub fn resolve(
        identity: Option<String>,
        name: String,
        namespace: Option<String>,
        service_account_namespace: &Path,
    ) -> Result<Self, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::MissingLeaseLockName);
        }
        let namespace = match namespace.filter(|ns| !ns.is_empty()) {
            Some(namespace) => namespace,
            None => read_namespace_file(service_account_namespace)
                .ok_or(ConfigError::MissingLeaseNamespace)?,
        };
        let identity = identity
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Self {
            name,
            namespace,
            identity,
        })
    }
}

fn read_namespace_file(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let namespace = contents.trim();
    (!namespace.is_empty()).then(|| namespace.to_string())
}

impl Args {
    /// Validate the flags and split them into tagging and runtime configuration
    ///
    /// # Errors
    /// Returns an error if the default tags are not valid JSON (JSON format only),
    /// an explicit AWS region is malformed or the lease lock cannot be located
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub fn resolve(self) -> Result<(Config, RuntimeSettings), ConfigError> {
        let lease = LeaseSettings::resolve(
            self.lease_id,
            self.lease_lock_name,
            self.lease_lock_namespace,
            Path::new(SERVICE_ACCOUNT_NAMESPACE_PATH),
        )?;

        let region = self.region.filter(|region| !region.is_empty());
        if self.cloud == Cloud::Aws {
            if let Some(region) = region.as_deref() {
                validate_aws_region(region)?;
            }
        }

        let default_tags = if self.default_tags.is_empty() {
            Tags::new()
        } else {
            debug!(default_tags = %self.default_tags, "Parsing default tags");
            parse_tag_string(&self.default_tags, self.tag_format)
                .map_err(ConfigError::InvalidDefaultTags)?
        };

        let copy_labels = parse_copy_labels(&self.copy_labels);
        if !copy_labels.is_empty() {
            info!(labels = ?copy_labels, "Copying PVC labels to tags");
        }

        let config = Config {
            default_tags,
            annotation_prefix: self.annotation_prefix,
            tag_format: self.tag_format,
            allow_all_tags: self.allow_all_tags,
            copy_labels,
            cloud: self.cloud,
        };

        let runtime = RuntimeSettings {
            kubeconfig: self.kubeconfig.filter(|path| !path.as_os_str().is_empty()),
            context: self.context.filter(|context| !context.is_empty()),
            region,
            watch_namespaces: split_namespaces(&self.watch_namespace),
            status_port: self.status_port,
            metrics_port: self.metrics_port,
            lease,
        };

        Ok((config, runtime))
    }
}

/// Check a region name against the AWS `xx-xxxx-N` / `xx-xxx-xxxx-N` shapes
///
/// # Errors
/// Returns [`ConfigError::InvalidRegion`] when the name does not match
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn validate_aws_region(region: &str) -> Result<(), ConfigError> {
    if AWS_REGION_PATTERN.is_match(region) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRegion(region.to_string()))
    }
}

fn split_namespaces(value: &str) -> Vec<String> {
    if value.is_empty() {
        return vec![String::new()];
    }
    value.split(',').map(|ns| ns.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["k8s-pvc-tagger"];
        argv.extend_from_slice(args);
        Args {
            lease_lock_namespace: Some("tagger".to_string()),
            ..Args::try_parse_from(argv).expect("arguments should parse")
        }
    }

    #[test]
    fn test_validate_aws_region() {
        let cases = vec![
            ("us-east-1", true),
            ("eu-central-1", true),
            ("ap-southeast-2", true),
            ("us-gov-west-1", true),
            ("us-east", false),
            ("useast1", false),
            ("", false),
        ];
        for (region, valid) in cases {
            assert_eq!(
                validate_aws_region(region).is_ok(),
                valid,
                "validate_aws_region({region:?})"
            );
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let args = Args {
            region: None,
            watch_namespace: String::new(),
            ..parse(&[])
        };
        let (config, runtime) = args.resolve().expect("defaults should resolve");

        assert!(config.default_tags.is_empty());
        assert_eq!(config.annotation_prefix, DEFAULT_ANNOTATION_PREFIX);
        assert_eq!(config.tag_format, TagFormat::Json);
        assert_eq!(config.cloud, Cloud::Aws);
        assert!(!config.allow_all_tags);
        assert!(config.copy_labels.is_empty());
        assert_eq!(runtime.watch_namespaces, vec![String::new()]);
        assert_eq!(runtime.status_port, 8000);
        assert_eq!(runtime.metrics_port, 8001);
        assert_eq!(runtime.lease.name, "k8s-pvc-tagger");
        assert_eq!(runtime.lease.namespace, "tagger");
        assert!(!runtime.lease.identity.is_empty());
    }

    #[test]
    fn test_resolve_csv_default_tags_and_namespaces() {
        let args = Args {
            region: None,
            ..parse(&[
                "--tag-format",
                "csv",
                "--default-tags",
                "team=storage,env=prod",
                "--watch-namespace",
                "a,b",
                "--copy-labels",
                "*",
                "--cloud",
                "gcp",
            ])
        };
        let (config, runtime) = args.resolve().expect("flags should resolve");

        assert_eq!(config.default_tags.get("team").map(String::as_str), Some("storage"));
        assert_eq!(config.default_tags.get("env").map(String::as_str), Some("prod"));
        assert_eq!(config.copy_labels, vec!["*".to_string()]);
        assert_eq!(config.cloud, Cloud::Gcp);
        assert_eq!(runtime.watch_namespaces, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_resolve_rejects_invalid_json_default_tags() {
        let args = Args {
            region: None,
            ..parse(&["--default-tags", "{not json"])
        };
        assert!(matches!(
            args.resolve(),
            Err(ConfigError::InvalidDefaultTags(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_invalid_region_for_aws_only() {
        let aws = Args {
            region: Some("moon-1".to_string()),
            ..parse(&[])
        };
        assert!(matches!(aws.resolve(), Err(ConfigError::InvalidRegion(_))));

        let gcp = Args {
            region: Some("moon-1".to_string()),
            ..parse(&["--cloud", "gcp"])
        };
        assert!(gcp.resolve().is_ok());
    }

    #[test]
    fn test_lease_settings_resolve() {
        let missing_file = Path::new("/nonexistent/serviceaccount/namespace");

        let explicit = LeaseSettings::resolve(
            Some("replica-a".to_string()),
            "locks".to_string(),
            Some("ops".to_string()),
            missing_file,
        )
        .expect("explicit lease settings resolve");
        assert_eq!(
            explicit,
            LeaseSettings {
                name: "locks".to_string(),
                namespace: "ops".to_string(),
                identity: "replica-a".to_string(),
            }
        );

        let generated = || {
            LeaseSettings::resolve(None, "locks".to_string(), Some("ops".to_string()), missing_file)
                .expect("generated identity")
        };
        let first = generated();
        let second = generated();
        assert!(Uuid::parse_str(&first.identity).is_ok());
        assert_ne!(first.identity, second.identity);

        assert!(matches!(
            LeaseSettings::resolve(None, String::new(), Some("ops".to_string()), missing_file),
            Err(ConfigError::MissingLeaseLockName)
        ));
        assert!(matches!(
            LeaseSettings::resolve(None, "locks".to_string(), Some(String::new()), missing_file),
            Err(ConfigError::MissingLeaseNamespace)
        ));
    }

    #[test]
    fn test_lease_namespace_falls_back_to_service_account() {
        let path = std::env::temp_dir().join(format!("k8s-pvc-tagger-ns-{}", Uuid::new_v4()));
        std::fs::write(&path, "storage-system\n").expect("write namespace file");

        let lease = LeaseSettings::resolve(None, "locks".to_string(), None, &path);
        std::fs::remove_file(&path).expect("remove namespace file");

        assert_eq!(lease.expect("namespace from file").namespace, "storage-system");
    }
}
