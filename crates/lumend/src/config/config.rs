use serde::Deserialize;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;

use tracing_subscriber::filter::LevelFilter;

use super::diagnostics::{format_diagnostics, Diagnostic, Error, ValidationError, Warning};
use super::partial::PartialConfig;

#[derive(Debug, Default)]
pub struct Config {
    pub logging: LoggingConfig,

    /// HTTP API; absent section disables the server entirely.
    pub api: Option<ApiConfig>,

    /// Virtual lights, keyed by object id (`bed` -> `light.bed`).
    pub lights: HashMap<String, LightConfig>,

    /// Groups, keyed by object id (`downstairs` -> `light.downstairs`).
    pub groups: HashMap<String, GroupConfig>,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1".to_string(),
            port: 8645,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LightConfig {
    /// Human-readable name
    pub name: Option<String>,

    /// Bitmask of SUPPORT_* feature flags the light advertises
    pub supported_features: u32,

    /// Effects the light advertises
    pub effect_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupConfig {
    /// Human-readable name
    pub name: Option<String>,

    /// Member entity ids (full ids, e.g. "light.bed")
    pub members: Vec<String>,
}

impl Config {
    /// Load configuration from multiple TOML files with import resolution
    ///
    /// Supports multiple config files (e.g. base + overrides), import
    /// statements within config files, conflict detection across all
    /// sources, and validation with all errors and warnings reported
    /// together.
    ///
    /// Returns Ok((Config, diagnostics)) where diagnostics contains
    /// warnings. Only returns Err if there are actual errors.
    pub fn from_files(
        paths: &[PathBuf],
    ) -> Result<(Self, Vec<Diagnostic>), Box<dyn std::error::Error>> {
        let configs = PartialConfig::load_with_imports(paths)?;

        // Merge with first-wins semantics, collecting diagnostics
        let (partial, diagnostics) = PartialConfig::merge(configs);

        Self::from_partial(partial, diagnostics)
    }

    /// Convert a PartialConfig to a Config, validating all fields
    ///
    /// Takes diagnostics from the merge step and adds validation
    /// diagnostics. Returns Ok if there are no errors, Err otherwise.
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Vec<Diagnostic>), Box<dyn std::error::Error>> {
        let logging = partial
            .logging
            .map(|partial_logging| LoggingConfig {
                level: partial_logging
                    .level
                    .map(|s| *s.get_ref())
                    .unwrap_or_default(),
            })
            .unwrap_or_default();

        let api = partial.api.map(|partial_api| {
            let defaults = ApiConfig::default();
            ApiConfig {
                listen: partial_api
                    .listen
                    .map(|s| s.into_inner())
                    .unwrap_or(defaults.listen),
                port: partial_api
                    .port
                    .map(|s| *s.get_ref())
                    .unwrap_or(defaults.port),
            }
        });

        let mut lights = HashMap::new();
        if let Some(partial_lights) = partial.lights {
            let mut entries: Vec<_> = partial_lights.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (key, partial_light) in entries {
                if !is_valid_object_id(&key) {
                    diagnostics.push(invalid_key_error("lights", &key, &partial.source));
                    continue;
                }
                lights.insert(
                    key,
                    LightConfig {
                        name: partial_light.name,
                        supported_features: partial_light.supported_features.unwrap_or(0),
                        effect_list: partial_light.effect_list,
                    },
                );
            }
        }

        let mut groups = HashMap::new();
        if let Some(partial_groups) = partial.groups {
            let mut entries: Vec<_> = partial_groups.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (key, partial_group) in entries {
                if !is_valid_object_id(&key) {
                    diagnostics.push(invalid_key_error("groups", &key, &partial.source));
                    continue;
                }

                // Members that are not light entity ids are dropped with a
                // warning instead of failing the whole load; a group left
                // with no usable members just sits at unavailable. Repeated
                // members keep their first occurrence.
                let mut members = Vec::new();
                for member in partial_group.members.unwrap_or_default() {
                    if !is_light_entity_id(&member) {
                        diagnostics.push(Diagnostic::Warning(Warning::InvalidMember {
                            group: key.clone(),
                            member,
                        }));
                    } else if !members.contains(&member) {
                        members.push(member);
                    }
                }

                groups.insert(
                    key,
                    GroupConfig {
                        name: partial_group.name,
                        members,
                    },
                );
            }
        }

        resolve_membership_cycles(&mut groups, &mut diagnostics);

        let config = Config {
            logging,
            api,
            lights,
            groups,
        };

        // Check if there are any errors (not just warnings)
        let has_errors = diagnostics.iter().any(|d| d.is_error());

        if has_errors {
            Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format_diagnostics(&diagnostics),
            )))
        } else {
            Ok((config, diagnostics))
        }
    }
}

/// Object ids are the part after the domain: lowercase ascii, digits, and
/// underscores only.
fn is_valid_object_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn is_light_entity_id(id: &str) -> bool {
    id.strip_prefix("light.").is_some_and(is_valid_object_id)
}

fn invalid_key_error(
    section: &str,
    key: &str,
    source: &Option<super::diagnostics::SourceInfo>,
) -> Diagnostic {
    Diagnostic::Error(Error::Validation(ValidationError {
        field_path: format!("{}.{}", section, key),
        message: "section key must be a lowercase object id ([a-z0-9_])".to_string(),
        span: None,
        source: source.clone(),
    }))
}

/// Detect groups that are members of themselves, directly or through other
/// groups, and neuter them: their member lists are cleared so each one
/// degrades to a permanently unavailable composite instead of feeding an
/// endless recompute loop.
fn resolve_membership_cycles(
    groups: &mut HashMap<String, GroupConfig>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut keys: Vec<String> = groups.keys().cloned().collect();
    keys.sort();

    let cyclic: Vec<String> = keys
        .iter()
        .filter(|key| in_membership_cycle(groups, key))
        .cloned()
        .collect();

    for key in &cyclic {
        if let Some(group) = groups.get_mut(key) {
            group.members.clear();
        }
        diagnostics.push(Diagnostic::Warning(Warning::GroupCycle {
            group: key.clone(),
        }));
    }

    for key in &keys {
        if cyclic.contains(key) {
            continue;
        }
        if groups.get(key).is_some_and(|g| g.members.is_empty()) {
            diagnostics.push(Diagnostic::Warning(Warning::EmptyGroup {
                group: key.clone(),
            }));
        }
    }
}

/// Member groups of `key` that exist in the config.
fn member_groups<'a>(groups: &'a HashMap<String, GroupConfig>, key: &str) -> Vec<&'a str> {
    let Some(group) = groups.get(key) else {
        return Vec::new();
    };
    group
        .members
        .iter()
        .filter_map(|member| {
            member.strip_prefix("light.").and_then(|object_id| {
                groups.get_key_value(object_id).map(|(k, _)| k.as_str())
            })
        })
        .collect()
}

fn in_membership_cycle(groups: &HashMap<String, GroupConfig>, key: &str) -> bool {
    let mut stack = member_groups(groups, key);
    let mut seen: HashSet<&str> = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == key {
            return true;
        }
        if seen.insert(current) {
            stack.extend(member_groups(groups, current));
        }
    }
    false
}
