//! Textual include graph of a geometry tree
//!
//! Geometry files include each other by path, either relative to the
//! including file's directory or through `${DETECTOR_PATH}`. Only files in
//! the directories above a compact file can include it, so the graph is
//! built from those directories alone.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use regex::{Captures, Regex};
use walkdir::WalkDir;

use crate::error::{Result, TrialError};
use crate::naming::is_versioned_name;

/// Variable geometry files use to refer to the detector root
pub const DETECTOR_PATH_VAR: &str = "${DETECTOR_PATH}";

/// Characters that may appear inside a path token
const TOKEN_CHARS: &str = r"A-Za-z0-9_.\-";

#[derive(Debug)]
struct SourceFile {
    path: PathBuf,
    text: String,
}

/// An edge of the graph: `from` references `target` as `reference`
#[derive(Debug, Clone, PartialEq)]
pub struct Inclusion {
    pub from: PathBuf,
    pub reference: String,
}

/// Original (untagged) text files of every directory above a compact file
#[derive(Debug)]
pub struct IncludeGraph {
    root: PathBuf,
    files: Vec<SourceFile>,
}

impl IncludeGraph {
    /// Read the files of each directory from `compact`'s own up to `root`
    ///
    /// Versioned copies, hidden files and files that are not valid UTF-8
    /// are left out.
    pub fn scan(root: &Path, compact: &str) -> Result<Self> {
        let mut dirs = Vec::new();
        let mut relative = Path::new(compact).parent();
        while let Some(dir) = relative {
            dirs.push(if dir.as_os_str().is_empty() {
                root.to_path_buf()
            } else {
                root.join(dir)
            });
            relative = dir.parent();
        }

        let mut files = Vec::new();
        for dir in dirs.iter().filter(|d| d.is_dir()) {
            for entry in WalkDir::new(dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
            {
                let entry = entry.map_err(|e| TrialError::io(dir, io::Error::from(e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if is_versioned_name(&name) || name.starts_with('.') {
                    continue;
                }
                match fs::read_to_string(entry.path()) {
                    Ok(text) => files.push(SourceFile {
                        path: entry.path().to_path_buf(),
                        text,
                    }),
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        log::debug!("skipping non-text file {}", entry.path().display());
                    }
                    Err(e) => return Err(TrialError::io(entry.path(), e)),
                }
            }
        }
        log::debug!(
            "include graph for {}: {} files in {} directories",
            compact,
            files.len(),
            dirs.len()
        );

        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files whose original text references `target`, in scan order
    pub fn dependents(&self, target: &Path) -> Result<Vec<Inclusion>> {
        let mut found = Vec::new();
        for file in self.files.iter().filter(|f| f.path != target) {
            for reference in self.reference_forms(&file.path, target) {
                if reference_pattern(&reference)?.is_match(&file.text) {
                    found.push(Inclusion {
                        from: file.path.clone(),
                        reference,
                    });
                }
            }
        }
        Ok(found)
    }

    /// Ways `from` can spell the path of `target`
    fn reference_forms(&self, from: &Path, target: &Path) -> Vec<String> {
        let mut forms = Vec::new();
        if let Some(rel) = from.parent().and_then(|dir| target.strip_prefix(dir).ok()) {
            forms.push(slash_path(rel));
        }
        if let Ok(rel) = target.strip_prefix(&self.root) {
            forms.push(format!("{}/{}", DETECTOR_PATH_VAR, slash_path(rel)));
        }
        forms
    }
}

/// Replace every whole-token occurrence of `reference` in `text`
///
/// Returns the new text and the number of replacements made.
pub fn replace_reference(text: &str, reference: &str, replacement: &str) -> Result<(String, usize)> {
    let pattern = reference_pattern(reference)?;
    let mut current = text.to_string();
    let mut total = 0;
    // adjacent references share one boundary character; the second pass
    // picks up those the first one stepped over
    for _ in 0..2 {
        let mut count = 0;
        let next = pattern
            .replace_all(&current, |caps: &Captures| {
                count += 1;
                format!("{}{}{}", &caps[1], replacement, &caps[2])
            })
            .into_owned();
        current = next;
        total += count;
        if count == 0 {
            break;
        }
    }
    Ok((current, total))
}

fn reference_pattern(reference: &str) -> Result<Regex> {
    let pattern = format!(
        r"((?:^|[^{chars}/])(?:\./)?){reference}($|[^{chars}])",
        chars = TOKEN_CHARS,
        reference = regex::escape(reference)
    );
    Regex::new(&pattern).map_err(|e| TrialError::invalid("include reference", e.to_string()))
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
