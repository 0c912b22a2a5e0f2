use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::diagnostics::{
    Diagnostic, Error, LoadError, MergeConflictLocation, MergeError, SourceInfo, Warning,
};
use super::LogLevel;

#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub api: Option<PartialApiConfig>,
    pub lights: Option<HashMap<String, PartialLight>>,
    pub groups: Option<HashMap<String, PartialGroup>>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<toml::Spanned<LogLevel>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialApiConfig {
    pub listen: Option<toml::Spanned<String>>,
    pub port: Option<toml::Spanned<u16>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialLight {
    pub name: Option<String>,
    pub supported_features: Option<u32>,
    pub effect_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialGroup {
    pub name: Option<String>,
    pub members: Option<Vec<String>>,
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Each file is loaded, then its imports are processed depth-first, so
    /// imported configs land before their importer. Cycle detection stops
    /// infinite import loops.
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visited = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visited, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    fn load_recursive(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        // Canonicalize so the same file reached through different relative
        // paths still trips the cycle check.
        let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if visited.contains(&canonical_path) {
            return Err(LoadError::ImportCycle {
                path: canonical_path.clone(),
                cycle: visited.iter().cloned().collect(),
            });
        }
        visited.insert(canonical_path.clone());

        let config = Self::from_file(path)?;

        for import in &config.imports {
            let import_path = PathBuf::from(import);
            // Relative imports resolve from the importing file's directory.
            let resolved = if import_path.is_absolute() {
                import_path
            } else {
                path.parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(import_path)
            };
            Self::load_recursive(&resolved, visited, configs)?;
        }

        configs.push(config);

        // Allow the same file to be imported again from a sibling branch.
        visited.remove(&canonical_path);

        Ok(())
    }

    /// Merge multiple partial configs together
    ///
    /// Uses first-wins semantics: the first occurrence of a field is kept.
    /// Conflicts (same field defined in multiple configs) are collected as
    /// errors but merging continues, so every conflict is reported at once.
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut diagnostics = Vec::new();
        let mut imports = Vec::new();

        // Where each field was first set, for conflict reports.
        let mut logging_level_loc: Option<MergeConflictLocation> = None;
        let mut api_listen_loc: Option<MergeConflictLocation> = None;
        let mut api_port_loc: Option<MergeConflictLocation> = None;
        let mut light_locs: HashMap<String, MergeConflictLocation> = HashMap::new();
        let mut group_locs: HashMap<String, MergeConflictLocation> = HashMap::new();

        for config in configs {
            imports.extend(config.imports.clone());

            let source_info = config.source.as_ref().cloned().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            let is_empty = config.logging.is_none()
                && config.api.is_none()
                && config.lights.is_none()
                && config.groups.is_none()
                && config.imports.is_empty();
            if is_empty {
                diagnostics.push(Diagnostic::Warning(Warning::EmptyConfig {
                    file_path: source_info.file_path.clone(),
                }));
            }

            if let Some(logging) = config.logging {
                let result_logging = result
                    .logging
                    .get_or_insert(PartialLoggingConfig { level: None });

                if let Some(level_spanned) = logging.level {
                    let conflict_loc = MergeConflictLocation {
                        file_path: source_info.file_path.clone(),
                        span: level_spanned.span(),
                        content: source_info.content.clone(),
                    };

                    if let Some(prev_loc) = logging_level_loc.as_ref() {
                        diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                            field_path: "logging.level".to_string(),
                            message: "Logging level defined in multiple config files".to_string(),
                            conflicts: vec![prev_loc.clone(), conflict_loc],
                        })));
                    } else {
                        result_logging.level = Some(level_spanned);
                        logging_level_loc = Some(conflict_loc);
                    }
                }
            }

            if let Some(api) = config.api {
                let result_api = result.api.get_or_insert(PartialApiConfig {
                    listen: None,
                    port: None,
                });

                if let Some(listen_spanned) = api.listen {
                    let conflict_loc = MergeConflictLocation {
                        file_path: source_info.file_path.clone(),
                        span: listen_spanned.span(),
                        content: source_info.content.clone(),
                    };

                    if let Some(prev_loc) = api_listen_loc.as_ref() {
                        diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                            field_path: "api.listen".to_string(),
                            message: "API listen address defined in multiple config files"
                                .to_string(),
                            conflicts: vec![prev_loc.clone(), conflict_loc],
                        })));
                    } else {
                        result_api.listen = Some(listen_spanned);
                        api_listen_loc = Some(conflict_loc);
                    }
                }

                if let Some(port_spanned) = api.port {
                    let conflict_loc = MergeConflictLocation {
                        file_path: source_info.file_path.clone(),
                        span: port_spanned.span(),
                        content: source_info.content.clone(),
                    };

                    if let Some(prev_loc) = api_port_loc.as_ref() {
                        diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                            field_path: "api.port".to_string(),
                            message: "API port defined in multiple config files".to_string(),
                            conflicts: vec![prev_loc.clone(), conflict_loc],
                        })));
                    } else {
                        result_api.port = Some(port_spanned);
                        api_port_loc = Some(conflict_loc);
                    }
                }
            }

            if let Some(lights) = config.lights {
                let result_lights = result.lights.get_or_insert(HashMap::new());
                for (key, value) in lights {
                    let conflict_loc =
                        section_location(&source_info, &format!("[lights.{}]", key));

                    if let Some(prev_loc) = light_locs.get(&key) {
                        diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                            field_path: format!("lights.{}", key),
                            message: format!("Light '{}' defined in multiple config files", key),
                            conflicts: vec![prev_loc.clone(), conflict_loc],
                        })));
                    } else {
                        result_lights.insert(key.clone(), value);
                        light_locs.insert(key, conflict_loc);
                    }
                }
            }

            if let Some(groups) = config.groups {
                let result_groups = result.groups.get_or_insert(HashMap::new());
                for (key, value) in groups {
                    let conflict_loc =
                        section_location(&source_info, &format!("[groups.{}]", key));

                    if let Some(prev_loc) = group_locs.get(&key) {
                        diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                            field_path: format!("groups.{}", key),
                            message: format!("Group '{}' defined in multiple config files", key),
                            conflicts: vec![prev_loc.clone(), conflict_loc],
                        })));
                    } else {
                        result_groups.insert(key.clone(), value);
                        group_locs.insert(key, conflict_loc);
                    }
                }
            }
        }

        result.imports = imports;

        (result, diagnostics)
    }
}

/// Span of a `[section.key]` header within its source file, for pointing
/// conflict reports at the right line. Sub-tables carry no Spanned value of
/// their own, so the header text is located directly.
fn section_location(source_info: &SourceInfo, header: &str) -> MergeConflictLocation {
    let span = source_info
        .content
        .find(header)
        .map(|start| start..(start + header.len()))
        .unwrap_or(0..0);

    MergeConflictLocation {
        file_path: source_info.file_path.clone(),
        span,
        content: source_info.content.clone(),
    }
}
