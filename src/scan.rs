//! Builds descriptors from what is on disk.
//!
//! A directory is always described together with its whole subtree, so an
//! `Add` for a freshly created directory already carries everything below it.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;

use crate::descriptor::Descriptor;

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdown", "rmd", "qmd"];

const CODE_LANGUAGES: &[(&str, &str)] = &[
    ("c", "c"),
    ("h", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("css", "css"),
    ("go", "go"),
    ("html", "html"),
    ("java", "java"),
    ("js", "javascript"),
    ("json", "json"),
    ("jsx", "javascript"),
    ("lua", "lua"),
    ("py", "python"),
    ("r", "r"),
    ("rb", "ruby"),
    ("rs", "rust"),
    ("sh", "shell"),
    ("sql", "sql"),
    ("tex", "latex"),
    ("toml", "toml"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
];

/// Rules deciding which paths become descriptors and of which kind.
#[derive(Debug, Clone)]
pub struct ScanRules {
    ignore: GlobSet,
    code_languages: HashMap<String, String>,
}

impl ScanRules {
    /// `ignore` patterns are matched against every component of a path, so
    /// `.git` hides a `.git` directory at any depth. `extra_code` maps
    /// additional extensions to language tags.
    pub fn new<I, S>(ignore: I, extra_code: &HashMap<String, String>) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        for pattern in ignore {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).map_err(|source| ScanError::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            })?;
            builder.add(glob);
        }

        let ignore = builder.build().map_err(|source| ScanError::InvalidPattern {
            pattern: String::new(),
            source,
        })?;

        let mut code_languages: HashMap<String, String> = CODE_LANGUAGES
            .iter()
            .map(|(ext, lang)| (ext.to_string(), lang.to_string()))
            .collect();
        for (ext, lang) in extra_code {
            code_languages.insert(ext.to_ascii_lowercase(), lang.clone());
        }

        Ok(Self {
            ignore,
            code_languages,
        })
    }

    /// `relative_path` is relative to the root being scanned, so that the
    /// location of the root itself never matters.
    pub fn is_ignored(&self, relative_path: &Path) -> bool {
        relative_path
            .components()
            .any(|component| self.ignore.is_match(component.as_os_str()))
    }

    fn file_descriptor(&self, path: PathBuf, size: u64) -> Descriptor {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if MARKDOWN_EXTENSIONS.contains(&extension.as_str()) {
            Descriptor::markdown_file(path, size)
        } else if let Some(language) = self.code_languages.get(&extension) {
            Descriptor::code_file(path, size, language.clone())
        } else {
            Descriptor::other_file(path, size)
        }
    }
}

impl Default for ScanRules {
    fn default() -> Self {
        Self::new(Vec::<String>::new(), &HashMap::new())
            .expect("an empty glob set always builds")
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("Invalid ignore pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },
}

/// Describes `path` as it currently exists on disk. Directories are described
/// recursively and children whose name is ignored are left out. Whether `path`
/// itself is ignored is up to the caller. Symlinks are never followed.
pub fn describe_path(path: &Path, rules: &ScanRules) -> Result<Descriptor, ScanError> {
    let metadata = fs_err::symlink_metadata(path)?;
    let modified_time = metadata.modified().map(to_millis).unwrap_or(0);
    let created_time = metadata.created().map(to_millis).unwrap_or(modified_time);

    let descriptor = if metadata.is_dir() {
        let mut children = Vec::new();

        for entry in fs_err::read_dir(path)? {
            let entry = entry?;
            if rules.is_ignored(Path::new(&entry.file_name())) {
                continue;
            }

            let child_path = entry.path();

            match describe_path(&child_path, rules) {
                Ok(child) => children.push(child),
                // Entries can vanish between listing and reading them. The
                // watcher reports that as its own event.
                Err(ScanError::Io { source }) if source.kind() == io::ErrorKind::NotFound => {
                    log::trace!("{} disappeared during scan", child_path.display());
                }
                Err(err) => return Err(err),
            }
        }

        Descriptor::directory(path, children)
    } else {
        rules.file_descriptor(path.to_path_buf(), metadata.len())
    };

    Ok(descriptor.with_times(modified_time, created_time))
}

fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
