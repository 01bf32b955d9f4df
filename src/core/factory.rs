//! Versioned registry of activity wrapper factories.
//!
//! Execution engines register a factory per activity type and version.
//! Engines may register after the first command that needs them, so
//! resolution retries on a fixed schedule before giving up.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::RwLock;
use semver::Version;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapters::{LiveActivityConfiguration, LiveActivityFilesystem};
use crate::domain::{ActivityWrapper, InstalledLiveActivity};

/// Separates the type name from a version range in a type string
pub const VERSION_RANGE_SEPARATOR: char = ';';

/// Version given to factories that do not declare one
pub const DEFAULT_VERSION: Version = Version::new(0, 0, 0);

/// Errors from factory registration and resolution
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("No wrapper factory for activity type '{activity_type}' (version {range}) after {attempts} attempts")]
    NotFound {
        activity_type: String,
        range: String,
        attempts: u32,
    },

    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Invalid version range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },
}

/// Creates wrappers for one activity type
pub trait ActivityWrapperFactory: Send + Sync {
    /// Activity type handled; matched case-insensitively
    fn activity_type(&self) -> &str;

    /// Version of the engine, [`DEFAULT_VERSION`] if `None`
    fn version(&self) -> Option<Version> {
        None
    }

    /// Build a wrapper for an installed activity
    fn new_activity_wrapper(
        &self,
        activity: &InstalledLiveActivity,
        filesystem: &Arc<dyn LiveActivityFilesystem>,
        configuration: &Arc<dyn LiveActivityConfiguration>,
    ) -> Result<Arc<dyn ActivityWrapper>>;
}

/// Parse a version, padding missing minor and patch components with zeros
pub fn parse_version(version: &str) -> Result<Version, FactoryError> {
    let version = version.trim();
    let invalid = |reason: &str| FactoryError::InvalidVersion {
        version: version.to_string(),
        reason: reason.to_string(),
    };

    let split = version.find(|c: char| c == '-' || c == '+').unwrap_or(version.len());
    let (numbers, suffix) = version.split_at(split);
    let parts: Vec<&str> = numbers.split('.').collect();

    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(invalid("expected major[.minor[.patch]]"));
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);

    Version::parse(&padded).map_err(|e| invalid(&e.to_string()))
}

/// A range of versions with an inclusive lower bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    min: Version,
    max: Option<Version>,
    max_inclusive: bool,
}

impl VersionRange {
    /// Exactly one version
    pub fn exact(version: Version) -> Self {
        Self {
            min: version.clone(),
            max: Some(version),
            max_inclusive: true,
        }
    }

    /// `[min, max)`
    pub fn half_open(min: Version, max: Version) -> Self {
        Self {
            min,
            max: Some(max),
            max_inclusive: false,
        }
    }

    /// `[min, )`
    pub fn at_least(min: Version) -> Self {
        Self {
            min,
            max: None,
            max_inclusive: false,
        }
    }

    /// Whether `version` lies in the range
    pub fn contains(&self, version: &Version) -> bool {
        if version < &self.min {
            return false;
        }
        match &self.max {
            None => true,
            Some(max) if self.max_inclusive => version <= max,
            Some(max) => version < max,
        }
    }

    fn is_exact(&self) -> bool {
        self.max_inclusive && self.max.as_ref() == Some(&self.min)
    }
}

impl FromStr for VersionRange {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: &str| FactoryError::InvalidRange {
            range: s.to_string(),
            reason: reason.to_string(),
        };

        if s.starts_with('(') {
            return Err(invalid("the lower bound must be inclusive"));
        }

        let Some(body) = s.strip_prefix('[') else {
            return Ok(Self::exact(parse_version(s)?));
        };

        let (body, max_inclusive) = if let Some(body) = body.strip_suffix(')') {
            (body, false)
        } else if let Some(body) = body.strip_suffix(']') {
            (body, true)
        } else {
            return Err(invalid("missing closing ')' or ']'"));
        };

        let (min, max) = body
            .split_once(',')
            .ok_or_else(|| invalid("expected '[min, max)' or '[min, max]'"))?;

        let min = parse_version(min)?;
        let max = match max.trim() {
            "" => None,
            max => Some(parse_version(max)?),
        };

        // Equal bounds name one version; reversed bounds are swapped.
        let range = match max {
            Some(max) if max == min => Self::exact(min),
            Some(max) if max < min => Self {
                min: max,
                max: Some(min),
                max_inclusive,
            },
            max => Self {
                min,
                max,
                max_inclusive,
            },
        };
        Ok(range)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_exact() {
            return write!(f, "{}", self.min);
        }
        match &self.max {
            None => write!(f, "[{}, )", self.min),
            Some(max) if self.max_inclusive => write!(f, "[{}, {}]", self.min, max),
            Some(max) => write!(f, "[{}, {})", self.min, max),
        }
    }
}

/// Split `type;range` into a lowercased type name and an optional range
pub fn parse_type_string(type_string: &str) -> Result<(String, Option<VersionRange>), FactoryError> {
    match type_string.split_once(VERSION_RANGE_SEPARATOR) {
        Some((name, range)) if !range.trim().is_empty() => {
            Ok((name.trim().to_lowercase(), Some(range.parse()?)))
        }
        Some((name, _)) => Ok((name.trim().to_lowercase(), None)),
        None => Ok((type_string.trim().to_lowercase(), None)),
    }
}

/// How resolution waits for late registrations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryRetryPolicy {
    /// Total lookups, including the first
    pub attempts: u32,

    /// Pause between lookups
    pub delay: Duration,
}

impl Default for FactoryRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

type Versions = BTreeMap<Version, Arc<dyn ActivityWrapperFactory>>;

/// Factories keyed by lowercased type and version
#[derive(Default)]
pub struct WrapperFactoryRegistry {
    factories: RwLock<HashMap<String, Versions>>,
    retry: FactoryRetryPolicy,
}

impl WrapperFactoryRegistry {
    /// Create an empty registry with the default retry policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different retry policy
    pub fn with_retry_policy(mut self, retry: FactoryRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The retry policy in use
    pub fn retry_policy(&self) -> FactoryRetryPolicy {
        self.retry
    }

    /// Register a factory, replacing any factory with the same type and version
    pub fn register(&self, factory: Arc<dyn ActivityWrapperFactory>) {
        let activity_type = factory.activity_type().to_lowercase();
        let version = factory.version().unwrap_or(DEFAULT_VERSION);

        let previous = self
            .factories
            .write()
            .entry(activity_type.clone())
            .or_default()
            .insert(version.clone(), factory);

        if previous.is_some() {
            warn!(%activity_type, %version, "Replacing registered wrapper factory");
        } else {
            info!(%activity_type, %version, "Registered wrapper factory");
        }
    }

    /// Remove a factory if it is still the one registered for its key.
    ///
    /// Returns whether anything was removed.
    pub fn unregister(&self, factory: &Arc<dyn ActivityWrapperFactory>) -> bool {
        let activity_type = factory.activity_type().to_lowercase();
        let version = factory.version().unwrap_or(DEFAULT_VERSION);

        let mut factories = self.factories.write();
        let Some(versions) = factories.get_mut(&activity_type) else {
            return false;
        };

        let current = versions
            .get(&version)
            .map_or(false, |c| same_factory(c, factory));
        if !current {
            debug!(%activity_type, %version, "Ignoring unregister of a factory that is no longer registered");
            return false;
        }

        versions.remove(&version);
        if versions.is_empty() {
            factories.remove(&activity_type);
        }
        info!(%activity_type, %version, "Unregistered wrapper factory");
        true
    }

    /// Every registered type and version
    pub fn registered(&self) -> Vec<(String, Version)> {
        self.factories
            .read()
            .iter()
            .flat_map(|(t, versions)| versions.keys().map(move |v| (t.clone(), v.clone())))
            .collect()
    }

    /// Single lookup for a `type` or `type;range` string
    pub fn lookup(&self, type_string: &str) -> Result<Option<Arc<dyn ActivityWrapperFactory>>, FactoryError> {
        let (activity_type, range) = parse_type_string(type_string)?;
        Ok(self.find(&activity_type, range.as_ref()))
    }

    /// Look up a factory, retrying while it may still be registering
    pub async fn resolve(&self, type_string: &str) -> Result<Arc<dyn ActivityWrapperFactory>, FactoryError> {
        let (activity_type, range) = parse_type_string(type_string)?;
        let attempts = self.retry.attempts.max(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry.delay).await;
            }

            if let Some(factory) = self.find(&activity_type, range.as_ref()) {
                return Ok(factory);
            }

            debug!(%activity_type, attempt, attempts, "Wrapper factory not registered yet");
        }

        let range = range.map_or_else(|| "any".to_string(), |r| r.to_string());
        warn!(%activity_type, %range, attempts, "Giving up on wrapper factory resolution");

        Err(FactoryError::NotFound {
            activity_type,
            range,
            attempts,
        })
    }

    fn find(&self, activity_type: &str, range: Option<&VersionRange>) -> Option<Arc<dyn ActivityWrapperFactory>> {
        let factories = self.factories.read();
        let versions = factories.get(activity_type)?;

        versions
            .iter()
            .rev()
            .find(|(version, _)| range.map_or(true, |r| r.contains(version)))
            .map(|(_, factory)| Arc::clone(factory))
    }
}

fn same_factory(a: &Arc<dyn ActivityWrapperFactory>, b: &Arc<dyn ActivityWrapperFactory>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
