//! Classification of paths into user files and system/cache noise.
//!
//! `classify` is pure: it looks only at the path (relative to its monitored
//! root) and the metadata it is handed. Rules run in a fixed order and the
//! first match wins:
//!
//! 1. OS / cache / build directories (built-in deny-list) → `ignored`
//! 2. Hidden or system attribute → `ignored`
//! 3. Zero-byte files, lock/placeholder names, temp extensions → `ignored`
//! 4. User rules (globs, configured extensions and directories) → per rule
//! 5. Everything else → `user`
//!
//! Built-in exclusions deliberately run before user rules so a broad
//! whitelist cannot resurface browser caches or partial downloads.

use glob::{MatchOptions, Pattern};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};

use crate::config::AppConfig;
use crate::error::{CleanError, Result};
use crate::types::{Classification, FilterRule, RuleVerdict};

// ═══════════════════════════════════════════════════════════════════════════════
// Built-in deny-lists
// ═══════════════════════════════════════════════════════════════════════════════

static IGNORED_DIRECTORIES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "appdata",
        ".cache",
        "__pycache__",
        "node_modules",
        ".git",
        ".hg",
        ".svn",
        "temp",
        "tmp",
        "$recycle.bin",
        "system volume information",
        ".vscode",
        ".idea",
        ".vs",
        ".gradle",
        "build",
        "dist",
        "venv",
        ".venv",
        "env",
        ".env",
        ".trash",
        ".local",
        "cache",
        "caches",
    ]
    .into_iter()
    .collect()
});

/// Multi-component fragments matched as contiguous directory sequences.
static IGNORED_PATH_FRAGMENTS: Lazy<Vec<Vec<&'static str>>> = Lazy::new(|| {
    [
        "appdata/local/temp",
        "appdata/local/microsoft",
        "appdata/local/google/chrome/user data",
        "appdata/local/packages",
        "appdata/roaming/microsoft",
        "programdata",
        "windows",
        "library/caches",
        "library/application support",
        ".mozilla/firefox",
        "google/chrome",
        ".npm",
        ".cargo/registry",
    ]
    .into_iter()
    .map(|fragment| fragment.split('/').collect())
    .collect()
});

static IGNORED_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "tmp",
        "temp",
        "crdownload",
        "partial",
        "part",
        "download",
        "log",
        "etl",
        "dll",
        "sys",
        "dat",
        "ini",
        "drv",
        "lock",
        "lck",
        "db-journal",
        "db-wal",
        "db-shm",
        "pyc",
        "pyo",
        "o",
        "obj",
        "class",
        "cache",
    ]
    .into_iter()
    .collect()
});

const LOCK_FILE_PREFIXES: &[&str] = &["~$", ".~lock."];

/// True when a directory with this name is never worth descending into.
pub fn is_ignored_dir_name(name: &str) -> bool {
    IGNORED_DIRECTORIES.contains(name.to_lowercase().as_str())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Metadata
// ═══════════════════════════════════════════════════════════════════════════════

/// The minimal signals classification needs about a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub hidden: bool,
    pub system: bool,
}

impl FileMeta {
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Self {
        let (hidden_attr, system) = platform_attributes(metadata);
        let dot_named = path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with('.'))
            .unwrap_or(false);
        Self {
            size: metadata.len(),
            hidden: hidden_attr || (cfg!(unix) && dot_named),
            system,
        }
    }
}

#[cfg(windows)]
fn platform_attributes(metadata: &Metadata) -> (bool, bool) {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
    let attrs = metadata.file_attributes();
    (
        attrs & FILE_ATTRIBUTE_HIDDEN != 0,
        attrs & FILE_ATTRIBUTE_SYSTEM != 0,
    )
}

#[cfg(not(windows))]
fn platform_attributes(_metadata: &Metadata) -> (bool, bool) {
    (false, false)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum CompiledRule {
    Glob {
        pattern: Pattern,
        verdict: RuleVerdict,
    },
    Extension(String),
    Directory(String),
}

impl CompiledRule {
    fn compile(rule: &FilterRule) -> Result<Self> {
        let pattern = Pattern::new(&rule.pattern).map_err(|err| CleanError::InvalidRule {
            pattern: rule.pattern.clone(),
            details: err.to_string(),
        })?;
        Ok(CompiledRule::Glob {
            pattern,
            verdict: rule.verdict,
        })
    }

    fn verdict_for(&self, candidate: &PathView<'_>) -> Option<RuleVerdict> {
        const OPTIONS: MatchOptions = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        match self {
            CompiledRule::Glob { pattern, verdict } => {
                let hit = pattern.matches_with(&candidate.relative, OPTIONS)
                    || pattern.matches_with(&candidate.file_name, OPTIONS);
                hit.then_some(*verdict)
            }
            CompiledRule::Extension(ext) => {
                (candidate.extension.as_deref() == Some(ext.as_str())).then_some(RuleVerdict::Ignored)
            }
            CompiledRule::Directory(name) => candidate
                .directories
                .iter()
                .any(|dir| dir == name)
                .then_some(RuleVerdict::Ignored),
        }
    }
}

/// Lower-cased, root-relative view of a path.
struct PathView<'a> {
    original_name: &'a str,
    file_name: String,
    relative: String,
    directories: Vec<String>,
    extension: Option<String>,
}

impl<'a> PathView<'a> {
    fn new(root: &Path, path: &'a Path) -> Self {
        let relative_path = path.strip_prefix(root).unwrap_or(path);
        let mut parts: Vec<String> = relative_path
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().to_lowercase()),
                _ => None,
            })
            .collect();
        let file_name = parts.pop().unwrap_or_default();
        let relative = if parts.is_empty() {
            file_name.clone()
        } else {
            format!("{}/{}", parts.join("/"), file_name)
        };
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());
        let original_name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");

        Self {
            original_name,
            file_name,
            relative,
            directories: parts,
            extension,
        }
    }

    fn under_ignored_directory(&self) -> bool {
        if self
            .directories
            .iter()
            .any(|dir| IGNORED_DIRECTORIES.contains(dir.as_str()))
        {
            return true;
        }
        IGNORED_PATH_FRAGMENTS.iter().any(|fragment| {
            self.directories
                .windows(fragment.len())
                .any(|window| window.iter().zip(fragment).all(|(a, b)| a == b))
        })
    }

    fn under_hidden_directory(&self) -> bool {
        self.directories.iter().any(|dir| dir.starts_with('.'))
    }

    fn is_placeholder(&self, meta: &FileMeta) -> bool {
        if meta.size == 0 {
            return true;
        }
        if LOCK_FILE_PREFIXES
            .iter()
            .any(|prefix| self.original_name.starts_with(prefix))
        {
            return true;
        }
        self.extension
            .as_deref()
            .map(|ext| IGNORED_EXTENSIONS.contains(ext))
            .unwrap_or(false)
    }
}

/// Classifies paths using the built-in deny-lists plus configured rules.
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    rules: Vec<CompiledRule>,
    root_overrides: HashMap<PathBuf, Vec<CompiledRule>>,
    config_rules: Vec<CompiledRule>,
    show_hidden: bool,
}

impl FilterEngine {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let rules = config
            .rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>>>()?;

        let mut root_overrides = HashMap::new();
        for root in &config.roots {
            if let Some(rules) = &root.rules {
                let compiled = rules
                    .iter()
                    .map(CompiledRule::compile)
                    .collect::<Result<Vec<_>>>()?;
                root_overrides.insert(root.path.clone(), compiled);
            }
        }

        let config_rules = config
            .ignored_extensions
            .iter()
            .map(|ext| CompiledRule::Extension(ext.trim_start_matches('.').to_lowercase()))
            .chain(
                config
                    .ignored_directories
                    .iter()
                    .map(|dir| CompiledRule::Directory(dir.to_lowercase())),
            )
            .collect();

        Ok(Self {
            rules,
            root_overrides,
            config_rules,
            show_hidden: config.show_hidden_files,
        })
    }

    /// Classifies `path`, found under monitored `root`, from its metadata.
    pub fn classify(&self, root: &Path, path: &Path, meta: &FileMeta) -> Classification {
        let view = PathView::new(root, path);

        if view.under_ignored_directory() {
            return Classification::Ignored;
        }

        if !self.show_hidden && (meta.hidden || view.under_hidden_directory()) {
            return Classification::Ignored;
        }
        if meta.system {
            return Classification::Ignored;
        }

        if view.is_placeholder(meta) {
            return Classification::Ignored;
        }

        let user_rules = self.root_overrides.get(root).unwrap_or(&self.rules);
        user_rules
            .iter()
            .chain(self.config_rules.iter())
            .find_map(|rule| rule.verdict_for(&view))
            .map(Classification::from)
            .unwrap_or(Classification::User)
    }

    /// Stats and classifies a path; `None` when it is gone or not a regular file.
    pub fn classify_path(&self, root: &Path, path: &Path) -> Option<(Classification, Metadata)> {
        let metadata = fs_err::symlink_metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let meta = FileMeta::from_metadata(path, &metadata);
        Some((self.classify(root, path, &meta), metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MonitoredRoot;

    fn meta(size: u64) -> FileMeta {
        FileMeta {
            size,
            hidden: false,
            system: false,
        }
    }

    fn engine() -> FilterEngine {
        FilterEngine::new(&AppConfig::default()).expect("engine")
    }

    #[test]
    fn regular_download_is_user() {
        let root = Path::new("/home/u/Downloads");
        let result = engine().classify(root, &root.join("report.pdf"), &meta(2048));
        assert_eq!(result, Classification::User);
    }

    #[test]
    fn cache_directories_are_ignored() {
        let root = Path::new("/home/u");
        let engine = engine();
        for path in [
            "node_modules/pkg/index.js",
            ".cache/thumbs/a.png",
            "AppData/Local/Temp/setup.exe",
            "Library/Caches/com.apple.Safari/data.bin",
            "Downloads/Google/Chrome/User Data/blob.bin",
        ] {
            assert_eq!(
                engine.classify(root, &root.join(path), &meta(10)),
                Classification::Ignored,
                "{path}"
            );
        }
    }

    #[test]
    fn root_location_does_not_count_against_files() {
        let root = Path::new("/tmp/.tmpA1b2/Downloads");
        let result = engine().classify(root, &root.join("a.pdf"), &meta(10));
        assert_eq!(result, Classification::User);
    }

    #[test]
    fn hidden_files_are_ignored_unless_enabled() {
        let root = Path::new("/home/u/Documents");
        let hidden = FileMeta {
            size: 10,
            hidden: true,
            system: false,
        };
        assert_eq!(
            engine().classify(root, &root.join(".notes.txt"), &hidden),
            Classification::Ignored
        );

        let config = AppConfig {
            show_hidden_files: true,
            ..AppConfig::default()
        };
        let permissive = FilterEngine::new(&config).expect("engine");
        assert_eq!(
            permissive.classify(root, &root.join(".notes.txt"), &hidden),
            Classification::User
        );
    }

    #[test]
    fn placeholders_and_empty_files_are_ignored() {
        let root = Path::new("/home/u/Downloads");
        let engine = engine();
        assert_eq!(
            engine.classify(root, &root.join("movie.mkv.crdownload"), &meta(100)),
            Classification::Ignored
        );
        assert_eq!(
            engine.classify(root, &root.join("~$report.docx"), &meta(100)),
            Classification::Ignored
        );
        assert_eq!(
            engine.classify(root, &root.join("empty.txt"), &meta(0)),
            Classification::Ignored
        );
    }

    #[test]
    fn user_rules_apply_after_builtin_exclusions() {
        let config = AppConfig {
            rules: vec![
                FilterRule {
                    pattern: "*.iso".to_string(),
                    verdict: RuleVerdict::System,
                },
                FilterRule {
                    pattern: "**".to_string(),
                    verdict: RuleVerdict::User,
                },
            ],
            ignored_extensions: vec![".bak".to_string()],
            ..AppConfig::default()
        };
        let engine = FilterEngine::new(&config).expect("engine");
        let root = Path::new("/home/u/Downloads");

        assert_eq!(
            engine.classify(root, &root.join("ubuntu.ISO"), &meta(10)),
            Classification::System
        );
        // The broad whitelist does not resurface temp files.
        assert_eq!(
            engine.classify(root, &root.join("file.part"), &meta(10)),
            Classification::Ignored
        );
        assert_eq!(
            engine.classify(root, &root.join("node_modules/x.js"), &meta(10)),
            Classification::Ignored
        );
    }

    #[test]
    fn configured_extensions_and_directories_are_ignored() {
        let config = AppConfig {
            ignored_extensions: vec![".bak".to_string()],
            ignored_directories: vec!["Exports".to_string()],
            ..AppConfig::default()
        };
        let engine = FilterEngine::new(&config).expect("engine");
        let root = Path::new("/home/u/Documents");

        assert_eq!(
            engine.classify(root, &root.join("old.BAK"), &meta(10)),
            Classification::Ignored
        );
        assert_eq!(
            engine.classify(root, &root.join("exports/a.pdf"), &meta(10)),
            Classification::Ignored
        );
        assert_eq!(
            engine.classify(root, &root.join("a.pdf"), &meta(10)),
            Classification::User
        );
    }

    #[test]
    fn root_override_replaces_global_rules() {
        let mut usb = MonitoredRoot::new("/media/usb");
        usb.rules = Some(vec![FilterRule {
            pattern: "*.jpg".to_string(),
            verdict: RuleVerdict::Ignored,
        }]);
        let config = AppConfig {
            roots: vec![usb],
            rules: vec![FilterRule {
                pattern: "*.pdf".to_string(),
                verdict: RuleVerdict::System,
            }],
            ..AppConfig::default()
        };
        let engine = FilterEngine::new(&config).expect("engine");

        let usb_root = Path::new("/media/usb");
        assert_eq!(
            engine.classify(usb_root, &usb_root.join("photo.jpg"), &meta(10)),
            Classification::Ignored
        );
        assert_eq!(
            engine.classify(usb_root, &usb_root.join("doc.pdf"), &meta(10)),
            Classification::User
        );

        let home = Path::new("/home/u/Documents");
        assert_eq!(
            engine.classify(home, &home.join("doc.pdf"), &meta(10)),
            Classification::System
        );
    }

    #[test]
    fn invalid_rule_is_rejected() {
        let config = AppConfig {
            rules: vec![FilterRule {
                pattern: "[".to_string(),
                verdict: RuleVerdict::User,
            }],
            ..AppConfig::default()
        };
        assert!(matches!(
            FilterEngine::new(&config),
            Err(CleanError::InvalidRule { .. })
        ));
    }
}
