//! Connector configuration.
//!
//! Parses the flat property map handed over by the host into a typed
//! `SourceConfig`. Keys are lower-cased at ingress and legacy key names are
//! remapped before validation.

mod route;

pub use route::{FormatKind, Route};

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{
    ConfigError, InvalidPropertySnafu, MissingPropertySnafu, UnknownAuthModeSnafu,
};

/// Route expressions, `;`-separated.
pub const KCQL: &str = "connect.s3.kcql";
/// Directory depth below each root used for partitioning.
pub const SEARCH_RECURSE_LEVELS: &str = "connect.s3.source.partition.search.recurse.levels";
/// Debounce between discovery cycles, in milliseconds.
pub const SEARCH_INTERVAL_MILLIS: &str = "connect.s3.source.partition.search.interval.millis";
/// Maximum new prefixes per discovery call before pausing. 0 disables.
pub const SEARCH_PAUSE_AFTER_COUNT: &str = "connect.s3.source.partition.search.pause.after.count";
/// Discovery wall-clock budget per call, in milliseconds. 0 disables.
pub const SEARCH_PAUSE_AFTER_MILLIS: &str = "connect.s3.source.partition.search.pause.after.millis";
/// Whether the first poll blocks until discovery completes.
pub const SEARCH_BLOCK: &str = "connect.s3.source.partition.search.block";
/// Partition extractor type: `hierarchical`, `regex`, or absent.
pub const EXTRACTOR_TYPE: &str = "connect.s3.source.partition.extractor.type";
/// Regex whose first capture group is the partition number.
pub const EXTRACTOR_REGEX: &str = "connect.s3.source.partition.extractor.regex";
/// Global cap on records returned by a single poll.
pub const MAX_POLL_RECORDS: &str = "connect.s3.source.max.poll.records";
/// Page size for flat object listings.
pub const LIST_PAGE_SIZE: &str = "connect.s3.source.list.page.size";
/// Number of tasks the configured roots are distributed over.
pub const TASK_COUNT: &str = "connect.task.count";
/// Index of this task within the task count.
pub const TASK_INDEX: &str = "connect.task.index";

pub const AWS_REGION: &str = "aws.region";
pub const AWS_ACCESS_KEY: &str = "aws.access.key";
pub const AWS_SECRET_KEY: &str = "aws.secret.key";
pub const AWS_AUTH_MODE: &str = "aws.auth.mode";
pub const AWS_CUSTOM_ENDPOINT: &str = "aws.custom.endpoint";
pub const AWS_VHOST_BUCKET: &str = "aws.vhost.bucket";

/// Legacy key names remapped to their current equivalents at ingress.
const DEPRECATED_KEYS: &[(&str, &str)] = &[
    (
        "connect.s3.partition.search.recurse.levels",
        SEARCH_RECURSE_LEVELS,
    ),
    (
        "connect.s3.partition.search.interval.millis",
        SEARCH_INTERVAL_MILLIS,
    ),
    (
        "connect.s3.partition.search.pause.after.count",
        SEARCH_PAUSE_AFTER_COUNT,
    ),
    ("connect.s3.partition.search.block", SEARCH_BLOCK),
];

fn default_search_interval_millis() -> u64 {
    300_000
}

fn default_pause_after_count() -> usize {
    1000
}

fn default_max_poll_records() -> usize {
    1000
}

fn default_list_page_size() -> usize {
    1000
}

/// Partition discovery settings.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// Directory depth below the root prefix, 0 = immediate children.
    pub recurse_levels: u32,
    /// Debounce between discovery cycles.
    pub interval: Duration,
    /// Max new prefixes per discovery call. 0 means never pause on count.
    pub pause_after_count: usize,
    /// Wall-clock budget per discovery call. 0 means no deadline.
    pub pause_after_millis: u64,
    /// Whether the first poll drives discovery to completion before reading.
    pub block: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            recurse_levels: 0,
            interval: Duration::from_millis(default_search_interval_millis()),
            pause_after_count: default_pause_after_count(),
            pause_after_millis: 0,
            block: false,
        }
    }
}

/// Partition extractor settings, resolved into an extractor at start.
#[derive(Debug, Clone, Default)]
pub struct ExtractorSettings {
    pub kind: Option<String>,
    pub pattern: Option<String>,
}

/// AWS client settings.
#[derive(Debug, Clone, Default)]
pub struct AwsSettings {
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub auth_mode: AuthMode,
    pub custom_endpoint: Option<String>,
    pub vhost_bucket: bool,
}

/// How the S3 client obtains credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Static access/secret key pair from the properties.
    Credentials,
    /// Ambient provider chain (environment, instance profile).
    #[default]
    Default,
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "credentials" => Ok(AuthMode::Credentials),
            "default" => Ok(AuthMode::Default),
            _ => UnknownAuthModeSnafu { mode: s }.fail(),
        }
    }
}

/// This task's slot in the deterministic root distribution.
#[derive(Debug, Clone, Copy)]
pub struct TaskSlot {
    pub count: usize,
    pub index: usize,
}

impl Default for TaskSlot {
    fn default() -> Self {
        Self { count: 1, index: 0 }
    }
}

/// Fully parsed source connector configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub routes: Vec<Route>,
    pub search: SearchSettings,
    pub extractor: ExtractorSettings,
    pub aws: AwsSettings,
    pub max_poll_records: usize,
    pub list_page_size: usize,
    pub task: TaskSlot,
}

impl SourceConfig {
    /// Parse the host-supplied property map.
    pub fn from_props(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let props = normalize_props(props);

        let kcql = props
            .get(KCQL)
            .ok_or_else(|| MissingPropertySnafu { key: KCQL }.build())?;
        let routes = Route::parse_all(kcql)?;

        let search = SearchSettings {
            recurse_levels: parse_or(&props, SEARCH_RECURSE_LEVELS, 0)?,
            interval: Duration::from_millis(parse_or(
                &props,
                SEARCH_INTERVAL_MILLIS,
                default_search_interval_millis(),
            )?),
            pause_after_count: parse_or(
                &props,
                SEARCH_PAUSE_AFTER_COUNT,
                default_pause_after_count(),
            )?,
            pause_after_millis: parse_or(&props, SEARCH_PAUSE_AFTER_MILLIS, 0)?,
            block: parse_or(&props, SEARCH_BLOCK, false)?,
        };

        let extractor = ExtractorSettings {
            kind: props.get(EXTRACTOR_TYPE).cloned(),
            pattern: props.get(EXTRACTOR_REGEX).cloned(),
        };

        let auth_mode = match props.get(AWS_AUTH_MODE) {
            Some(mode) => mode.parse()?,
            None => AuthMode::default(),
        };
        let aws = AwsSettings {
            region: props.get(AWS_REGION).cloned(),
            access_key: props.get(AWS_ACCESS_KEY).cloned(),
            secret_key: props.get(AWS_SECRET_KEY).cloned(),
            auth_mode,
            custom_endpoint: props.get(AWS_CUSTOM_ENDPOINT).cloned(),
            vhost_bucket: parse_or(&props, AWS_VHOST_BUCKET, false)?,
        };

        Ok(SourceConfig {
            routes,
            search,
            extractor,
            aws,
            max_poll_records: parse_or(&props, MAX_POLL_RECORDS, default_max_poll_records())?,
            list_page_size: parse_or(&props, LIST_PAGE_SIZE, default_list_page_size())?,
            task: TaskSlot {
                count: parse_or(&props, TASK_COUNT, 1)?,
                index: parse_or(&props, TASK_INDEX, 0)?,
            },
        })
    }
}

/// Lower-case all keys and remap deprecated names.
fn normalize_props(props: &HashMap<String, String>) -> HashMap<String, String> {
    let mut normalized = HashMap::with_capacity(props.len());

    for (key, value) in props {
        let key = key.to_ascii_lowercase();
        let key = match DEPRECATED_KEYS.iter().find(|(old, _)| *old == key) {
            Some((old, new)) => {
                warn!(old = %old, new = %new, "Deprecated property remapped");
                (*new).to_string()
            }
            None => key,
        };
        normalized.insert(key, value.clone());
    }

    normalized
}

/// Parse an optional property, falling back to a default.
fn parse_or<T: FromStr>(
    props: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match props.get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            InvalidPropertySnafu {
                key,
                value: raw.clone(),
                message: format!("expected {}", std::any::type_name::<T>()),
            }
            .build()
        }),
    }
}
