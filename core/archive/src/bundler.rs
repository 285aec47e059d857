//! Creating, extending and unpacking zip bundles.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use keycrypt_common::{Error, Result};

/// Deflate level used for every entry.
pub const COMPRESSION_LEVEL: i64 = 9;

fn options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
}

fn write_error(err: ZipError) -> Error {
    match err {
        ZipError::Io(e) => Error::Io(e),
        other => Error::Archive(other.to_string()),
    }
}

fn open_error(bundle: &Path, err: ZipError) -> Error {
    Error::InvalidInput(format!(
        "{} is not a valid bundle: {}",
        bundle.display(),
        err
    ))
}

/// Removes a partially written file unless disarmed.
struct PartialFile<'a> {
    path: &'a Path,
    armed: bool,
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_file(self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove partial bundle");
            }
        }
    }
}

/// Validate that `name` is a bare file name with no separators.
fn check_bundle_name(name: &str) -> Result<()> {
    let bare = Path::new(name).file_name().and_then(|n| n.to_str());
    if name.is_empty() || bare != Some(name) {
        return Err(Error::InvalidInput(format!(
            "Bundle name must be a plain file name: {:?}",
            name
        )));
    }
    Ok(())
}

/// Convert a relative filesystem path into a `/`-separated entry name.
fn entry_name(relative: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "Path is not valid UTF-8: {}",
                        relative.display()
                    ))
                })?;
                parts.push(part);
            }
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Unexpected path component in {}",
                    relative.display()
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

fn base_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("Invalid file name: {}", path.display())))
}

fn add_file(writer: &mut ZipWriter<File>, name: String, source: &Path) -> Result<()> {
    let mut input = File::open(source)?;
    writer.start_file(name, options()).map_err(write_error)?;
    io::copy(&mut input, writer)?;
    Ok(())
}

/// Create `dest_dir/name` exclusively and fill it.
fn write_container<F>(archive_path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut ZipWriter<File>) -> Result<()>,
{
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(archive_path)
        .map_err(|e| Error::from_exclusive_create(e, archive_path.display()))?;
    let mut partial = PartialFile {
        path: archive_path,
        armed: true,
    };

    let mut writer = ZipWriter::new(file);
    fill(&mut writer)?;
    writer.finish().map_err(write_error)?;

    partial.armed = false;
    Ok(())
}

/// Recursively bundle a directory.
///
/// Entries keep their path relative to the parent of `source_dir`, so the
/// directory itself is the single top-level entry. Directories are recorded
/// too, which keeps empty directories on extraction.
///
/// # Errors
/// - `InvalidInput` if `source_dir` is not a directory or `name` is not a
///   plain file name
/// - `Conflict` if `dest_dir/name` already exists
pub fn bundle_directory(name: &str, source_dir: &Path, dest_dir: &Path) -> Result<PathBuf> {
    check_bundle_name(name)?;
    if !source_dir.is_dir() {
        return Err(Error::InvalidInput(format!(
            "Not a directory: {}",
            source_dir.display()
        )));
    }

    let root = source_dir.parent().unwrap_or_else(|| Path::new(""));
    let archive_path = dest_dir.join(name);

    write_container(&archive_path, |writer| {
        for entry in WalkDir::new(source_dir).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            let path = entry.path();
            if path == archive_path {
                continue;
            }

            let relative = path.strip_prefix(root).map_err(|_| {
                Error::InvalidInput(format!("{} escapes the source tree", path.display()))
            })?;
            let name = entry_name(relative)?;

            if entry.file_type().is_dir() {
                writer
                    .add_directory(format!("{}/", name), options())
                    .map_err(write_error)?;
            } else if entry.file_type().is_file() {
                add_file(writer, name, path)?;
            } else {
                debug!(path = %path.display(), "Skipping non-regular file");
            }
        }
        Ok(())
    })?;

    debug!(bundle = %archive_path.display(), "Directory bundled");
    Ok(archive_path)
}

/// Bundle an explicit list of files, each stored under its base name.
///
/// # Errors
/// - `InvalidInput` if a source is not a file or two sources share a name
/// - `Conflict` if `dest_dir/name` already exists
pub fn bundle_files<P: AsRef<Path>>(name: &str, sources: &[P], dest_dir: &Path) -> Result<PathBuf> {
    check_bundle_name(name)?;
    let mut names: Vec<&str> = Vec::with_capacity(sources.len());
    for source in sources {
        let source = source.as_ref();
        if !source.is_file() {
            return Err(Error::InvalidInput(format!(
                "Not a file: {}",
                source.display()
            )));
        }
        let base = base_name(source)?;
        if names.contains(&base) {
            return Err(Error::InvalidInput(format!(
                "Duplicate entry name in bundle: {}",
                base
            )));
        }
        names.push(base);
    }

    let archive_path = dest_dir.join(name);
    write_container(&archive_path, |writer| {
        for (source, base) in sources.iter().zip(&names) {
            add_file(writer, base.to_string(), source.as_ref())?;
        }
        Ok(())
    })?;

    debug!(bundle = %archive_path.display(), entries = names.len(), "Files bundled");
    Ok(archive_path)
}

/// List the entry names of a bundle.
///
/// # Errors
/// - `InvalidInput` if `bundle` is not a valid container
pub fn entry_names(bundle: &Path) -> Result<Vec<String>> {
    let file = File::open(bundle).map_err(|e| {
        Error::InvalidInput(format!("Cannot open bundle {}: {}", bundle.display(), e))
    })?;
    let archive = ZipArchive::new(file).map_err(|e| open_error(bundle, e))?;
    Ok(archive.file_names().map(str::to_string).collect())
}

/// Append files to an existing bundle, each under its base name.
///
/// Existing entries are never replaced.
///
/// # Errors
/// - `InvalidInput` if `bundle` is not a valid container or a source is not a file
/// - `Conflict` if an entry with the same name is already present
pub fn append_files<P: AsRef<Path>>(bundle: &Path, sources: &[P]) -> Result<()> {
    let mut present = entry_names(bundle)?;
    for source in sources {
        let source = source.as_ref();
        if !source.is_file() {
            return Err(Error::InvalidInput(format!(
                "Not a file: {}",
                source.display()
            )));
        }
        let base = base_name(source)?.to_string();
        if present.contains(&base) {
            return Err(Error::Conflict(format!(
                "{} already contains {}",
                bundle.display(),
                base
            )));
        }
        present.push(base);
    }

    let file = OpenOptions::new().read(true).write(true).open(bundle)?;
    let mut writer = ZipWriter::new_append(file).map_err(|e| open_error(bundle, e))?;
    for source in sources {
        let source = source.as_ref();
        add_file(&mut writer, base_name(source)?.to_string(), source)?;
    }
    writer.finish().map_err(write_error)?;

    debug!(bundle = %bundle.display(), added = sources.len(), "Files appended");
    Ok(())
}

/// Create `dir` and any missing ancestors, recording each one created.
fn create_dirs(dir: &Path, created: &mut Vec<PathBuf>) -> Result<()> {
    let missing: Vec<&Path> = dir
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .collect();
    for path in missing.into_iter().rev() {
        match fs::create_dir(path) {
            Ok(()) => created.push(path.to_path_buf()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Stream one entry into `target`, replacing any existing file.
///
/// Data goes to a staging file next to `target` first, so a corrupted entry
/// never clobbers what was there. At most one byte past the declared size
/// is read.
fn unpack_entry<R: Read>(entry: &mut R, name: &str, declared: u64, target: &Path) -> Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = NamedTempFile::new_in(parent)?;

    let mut limited = entry.take(declared.saturating_add(1));
    let copied = io::copy(&mut limited, staged.as_file_mut())
        .map_err(|e| Error::Integrity(format!("Bundle entry {} is corrupted: {}", name, e)))?;
    if copied != declared {
        return Err(Error::Integrity(format!(
            "Bundle entry {} does not match its declared size of {} bytes",
            name, declared
        )));
    }

    staged.persist(target).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Unpack every entry of `bundle` into `dest_dir`, creating it if absent.
///
/// Returns the paths of the files written. If unpacking fails part way, the
/// files and directories this call created are removed again.
///
/// # Errors
/// - `InvalidInput` if `bundle` is not a valid container or an entry would
///   land outside `dest_dir`
/// - `Integrity` if an entry's data is corrupted or does not match its
///   declared size
pub fn extract(bundle: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(bundle).map_err(|e| {
        Error::InvalidInput(format!("Cannot open bundle {}: {}", bundle.display(), e))
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| open_error(bundle, e))?;

    let mut created_dirs: Vec<PathBuf> = Vec::new();
    let mut created: Vec<PathBuf> = Vec::new();
    let mut written: Vec<PathBuf> = Vec::new();

    let result = create_dirs(dest_dir, &mut created_dirs).and_then(|()| {
        (0..archive.len()).try_for_each(|index| -> Result<()> {
            let mut entry = archive.by_index(index).map_err(|e| open_error(bundle, e))?;
            let relative = entry.enclosed_name().ok_or_else(|| {
                Error::InvalidInput(format!("Bundle entry has an unsafe path: {}", entry.name()))
            })?;
            let target = dest_dir.join(relative);

            if entry.is_dir() {
                return create_dirs(&target, &mut created_dirs);
            }
            if let Some(parent) = target.parent() {
                create_dirs(parent, &mut created_dirs)?;
            }

            let name = entry.name().to_string();
            let declared = entry.size();
            let existed = target.exists();
            unpack_entry(&mut entry, &name, declared, &target)?;
            if !existed {
                created.push(target.clone());
            }
            written.push(target);
            Ok(())
        })
    });

    if let Err(e) = result {
        for path in created.iter().rev() {
            if let Err(remove_err) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %remove_err, "Failed to roll back extracted file");
            }
        }
        for dir in created_dirs.iter().rev() {
            if let Err(remove_err) = fs::remove_dir(dir) {
                warn!(path = %dir.display(), error = %remove_err, "Failed to roll back extracted directory");
            }
        }
        return Err(e);
    }

    debug!(bundle = %bundle.display(), files = written.len(), "Bundle extracted");
    Ok(written)
}
