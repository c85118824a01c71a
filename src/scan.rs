//! Class sources backed by the filesystem: class directories, jars and lone class files.
//!
//! Every class handed out is validated with `jclassfile` before the reader sees it.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use jclassfile::class_file;
use parking_lot::Mutex;
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::classpath::ClassSource;
use crate::reader::read_class;
use crate::{Error, Result};

const CLASS_SUFFIX: &str = ".class";

/// Open `path` as a class source, choosing the kind from what is on disk.
pub fn open_source(path: &Path) -> anyhow::Result<Box<dyn ClassSource>> {
    if path.is_dir() {
        return Ok(Box::new(DirectorySource::new(path)));
    }
    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "jar" | "zip" => Ok(Box::new(JarSource::open(path)?)),
        "class" => Ok(Box::new(SingleClassSource::open(path)?)),
        _ => anyhow::bail!("unsupported input file: {}", path.display()),
    }
}

/// Open every path in order; earlier sources win when two define the same class.
pub fn open_sources(paths: &[PathBuf]) -> anyhow::Result<Vec<Box<dyn ClassSource>>> {
    paths.iter().map(|path| open_source(path)).collect()
}

fn validate(bytes: &[u8], origin: &str) -> Result<()> {
    class_file::parse(bytes)
        .map(|_| ())
        .map_err(|err| malformed_error!("{origin}: {err}"))
}

/// A directory laid out by package, `a/b/C.class` holding `a/b/C`.
#[derive(Debug)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: &Path) -> Self {
        DirectorySource {
            root: root.to_path_buf(),
        }
    }
}

impl ClassSource for DirectorySource {
    fn resolve(&self, internal_name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(format!("{internal_name}{CLASS_SUFFIX}"));
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        validate(&bytes, &path.to_string_lossy())?;
        Ok(Some(bytes))
    }

    fn list_entries(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        walk(&self.root, "", &mut names)?;
        names.sort();
        debug!(root = %self.root.display(), classes = names.len(), "listed class directory");
        Ok(names)
    }
}

fn walk(dir: &Path, prefix: &str, names: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let path = entry.path();
        if path.is_dir() {
            walk(&path, &format!("{prefix}{file_name}/"), names)?;
        } else if let Some(stem) = file_name.strip_suffix(CLASS_SUFFIX) {
            names.push(format!("{prefix}{stem}"));
        }
    }
    Ok(())
}

/// A jar or zip archive. Entries under `META-INF/` are ignored.
pub struct JarSource {
    path: PathBuf,
    archive: Mutex<ZipArchive<fs::File>>,
}

impl JarSource {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let archive =
            ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
        Ok(JarSource {
            path: path.to_path_buf(),
            archive: Mutex::new(archive),
        })
    }
}

fn zip_error(err: ZipError) -> Error {
    Error::FileError(io::Error::other(err))
}

impl ClassSource for JarSource {
    fn resolve(&self, internal_name: &str) -> Result<Option<Vec<u8>>> {
        let entry_name = format!("{internal_name}{CLASS_SUFFIX}");
        let mut archive = self.archive.lock();
        let mut entry = match archive.by_name(&entry_name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(zip_error(err)),
        };
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        validate(&bytes, &format!("{}!/{entry_name}", self.path.display()))?;
        Ok(Some(bytes))
    }

    fn list_entries(&self) -> Result<Vec<String>> {
        let archive = self.archive.lock();
        let mut names: Vec<String> = archive
            .file_names()
            .filter(|name| !name.starts_with("META-INF/"))
            .filter_map(|name| name.strip_suffix(CLASS_SUFFIX))
            .map(str::to_string)
            .collect();
        names.sort();
        debug!(jar = %self.path.display(), classes = names.len(), "listed jar");
        Ok(names)
    }
}

/// One class file, named by the class it declares rather than by its path.
#[derive(Debug)]
pub struct SingleClassSource {
    name: String,
    bytes: Vec<u8>,
}

impl SingleClassSource {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        validate(&bytes, &path.to_string_lossy())
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let class = read_class(&bytes).with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(SingleClassSource {
            name: class.name.name().to_string(),
            bytes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ClassSource for SingleClassSource {
    fn resolve(&self, internal_name: &str) -> Result<Option<Vec<u8>>> {
        Ok((internal_name == self.name).then(|| self.bytes.clone()))
    }

    fn list_entries(&self) -> Result<Vec<String>> {
        Ok(vec![self.name.clone()])
    }
}
