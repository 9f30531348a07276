//! Per-trial geometry copies
//!
//! Original geometry files are never written. Each trial tag gets its own
//! copy of every file it touches, named by inserting `_aid2e_<tag>` before
//! the extension, and all edits land in those copies. A copy that already
//! exists is reused as-is, so repeated edits for one tag accumulate.

pub mod includes;
pub mod selector;

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use xmltree::{Element, EmitterConfig};

use crate::config::{ParamTarget, ParamValue, ParameterSpec, RunConfig};
use crate::error::{Result, TrialError};
use crate::naming::version_suffix;
use crate::script::atomic_write;

pub use includes::{replace_reference, IncludeGraph, Inclusion, DETECTOR_PATH_VAR};
pub use selector::ElementPath;

/// Insert the version suffix of `tag` before the extension of the last
/// path segment of `name`
///
/// `det/module.xml` becomes `det/module_aid2e_T1.xml`.
pub fn versioned_name(name: &str, tag: &str) -> String {
    let (dir, file) = match name.rfind('/') {
        Some(i) => name.split_at(i + 1),
        None => ("", name),
    };
    match file.rfind('.') {
        Some(i) if i > 0 => format!("{}{}{}{}", dir, &file[..i], version_suffix(tag), &file[i..]),
        _ => format!("{}{}{}", dir, file, version_suffix(tag)),
    }
}

/// Path of the versioned copy of `original` for `tag`
pub fn versioned_path(original: &Path, tag: &str) -> PathBuf {
    match original.file_name() {
        Some(name) => original.with_file_name(versioned_name(&name.to_string_lossy(), tag)),
        None => original.to_path_buf(),
    }
}

/// Make sure the versioned copy of `original` exists, copying it if needed
///
/// Never overwrites an existing copy. Returns the versioned path.
pub fn ensure_versioned(original: &Path, tag: &str) -> Result<PathBuf> {
    let versioned = versioned_path(original, tag);
    if versioned.exists() {
        return Ok(versioned);
    }
    if !original.is_file() {
        return Err(TrialError::SourceMissing(original.to_path_buf()));
    }
    fs::copy(original, &versioned).map_err(|e| TrialError::io(&versioned, e))?;
    log::debug!("copied {} to {}", original.display(), versioned.display());
    Ok(versioned)
}

fn load_document(path: &Path) -> Result<Element> {
    let file = fs::File::open(path).map_err(|e| TrialError::io(path, e))?;
    Element::parse(BufReader::new(file)).map_err(|e| TrialError::Xml {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn save_document(path: &Path, root: &Element) -> Result<()> {
    let mut buffer = Vec::new();
    root.write_with_config(&mut buffer, EmitterConfig::new().perform_indent(true))
        .map_err(|e| TrialError::Xml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    atomic_write(path, &buffer)
}

/// Edits geometry files on behalf of trials
#[derive(Debug, Clone)]
pub struct GeometryEditor {
    det_path: PathBuf,
    det_config: String,
}

impl GeometryEditor {
    pub fn new(run: &RunConfig) -> Self {
        Self {
            det_path: run.det_path.clone(),
            det_config: run.det_config.clone(),
        }
    }

    pub fn det_path(&self) -> &Path {
        &self.det_path
    }

    /// Path of the original top-level configuration
    pub fn config_path(&self) -> PathBuf {
        self.det_path.join(format!("{}.xml", self.det_config))
    }

    /// Configuration name a trial's scripts export as `DETECTOR_CONFIG`
    pub fn config_name(&self, tag: &str) -> String {
        format!("{}{}", self.det_config, version_suffix(tag))
    }

    fn compact_of<'p>(spec: &'p ParameterSpec) -> Result<(&'p str, &'p str, &'p str, &'p str)> {
        match &spec.target {
            ParamTarget::Compact {
                compact,
                path,
                element,
                units,
            } => Ok((compact.as_str(), path.as_str(), element.as_str(), units.as_str())),
            ParamTarget::RecoArg { .. } => Err(TrialError::invalid(
                &spec.name,
                "reconstruction parameters have no geometry file",
            )),
        }
    }

    /// Set one attribute in the trial's copy of the parameter's compact file
    ///
    /// The selector must match exactly one element. The file is written
    /// back before returning.
    pub fn edit_compact(&self, spec: &ParameterSpec, value: &ParamValue, tag: &str) -> Result<PathBuf> {
        let (compact, selector, attribute, units) = Self::compact_of(spec)?;
        let path = ensure_versioned(&self.det_path.join(compact), tag)?;
        let selector = ElementPath::parse(selector)?;

        let mut root = load_document(&path)?;
        let matches = selector.select(&root);
        let target = match matches.as_slice() {
            [only] => only.clone(),
            _ => {
                return Err(TrialError::ElementNotFound {
                    selector: selector.as_str().to_string(),
                    file: path,
                    matches: matches.len(),
                })
            }
        };
        let literal = value.with_units(units);
        let element = selector::resolve_mut(&mut root, &target).ok_or_else(|| {
            TrialError::ElementNotFound {
                selector: selector.as_str().to_string(),
                file: path.clone(),
                matches: 0,
            }
        })?;
        element.attributes.insert(attribute.to_string(), literal.clone());

        save_document(&path, &root)?;
        log::debug!(
            "{}: set {}@{} = {} in {}",
            spec.name,
            selector.as_str(),
            attribute,
            literal,
            path.display()
        );
        Ok(path)
    }

    /// Point the trial's configuration at the trial's copy of the compact file
    ///
    /// Only an include still naming the original compact file is rewritten;
    /// when there is none the file is left untouched. Returns the path of
    /// the trial's configuration either way.
    pub fn edit_config(&self, spec: &ParameterSpec, tag: &str) -> Result<PathBuf> {
        let (compact, ..) = Self::compact_of(spec)?;
        let path = ensure_versioned(&self.config_path(), tag)?;

        let original = format!("{}/{}", DETECTOR_PATH_VAR, compact);
        let tagged = format!("{}/{}", DETECTOR_PATH_VAR, versioned_name(compact, tag));

        let mut root = load_document(&path)?;
        let includes = ElementPath::parse(".//include")?.select(&root);
        let hit = includes.into_iter().find(|location| {
            selector::resolve(&root, location)
                .and_then(|el| el.attributes.get("ref"))
                .map_or(false, |r| *r == original)
        });

        match hit {
            Some(location) => {
                if let Some(include) = selector::resolve_mut(&mut root, &location) {
                    include.attributes.insert("ref".to_string(), tagged.clone());
                }
                save_document(&path, &root)?;
                log::debug!("{}: include {} -> {}", path.display(), original, tagged);
            }
            None => log::warn!(
                "{}: no include of {} left to rewrite",
                path.display(),
                original
            ),
        }
        Ok(path)
    }

    /// Version every file that includes the compact file, transitively
    ///
    /// Walks the include graph backwards from the compact file. Each
    /// dependent gets a versioned copy in which its references to already
    /// versioned files are rewritten to their tagged names. Returns the
    /// versioned copy of every dependent, each once, in visit order.
    pub fn edit_related_files(&self, spec: &ParameterSpec, tag: &str) -> Result<Vec<PathBuf>> {
        let (compact, ..) = Self::compact_of(spec)?;
        let seed = self.det_path.join(compact);
        ensure_versioned(&seed, tag)?;

        let graph = IncludeGraph::scan(&self.det_path, compact)?;
        let mut visited: HashSet<PathBuf> = HashSet::from([seed.clone()]);
        let mut queue: VecDeque<PathBuf> = VecDeque::from([seed]);
        let mut patched: Vec<PathBuf> = Vec::new();

        while let Some(target) = queue.pop_front() {
            for inclusion in graph.dependents(&target)? {
                let copy = ensure_versioned(&inclusion.from, tag)?;
                let text = fs::read_to_string(&copy).map_err(|e| TrialError::io(&copy, e))?;
                let (edited, count) =
                    replace_reference(&text, &inclusion.reference, &versioned_name(&inclusion.reference, tag))?;
                if count > 0 {
                    atomic_write(&copy, edited.as_bytes())?;
                    log::debug!(
                        "{}: rewrote {} reference(s) to {}",
                        copy.display(),
                        count,
                        inclusion.reference
                    );
                }
                if !patched.contains(&copy) {
                    patched.push(copy);
                }
                if visited.insert(inclusion.from.clone()) {
                    queue.push_back(inclusion.from);
                }
            }
        }
        Ok(patched)
    }
}
