use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use tracing::{debug, info, warn};

const EXTENSION: &str = ".png";
const MAX_STEM_LEN: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum GalleryError {
    #[error("invalid image name {0:?}")]
    InvalidName(String),
    #[error("an image named {0} already exists")]
    NameTaken(String),
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Outcome of a batch delete. Every requested name ends up in exactly one list.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub removed: Vec<String>,
    /// Already gone when we got to it (deleted elsewhere in the meantime).
    pub missing: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// A flat directory of PNG files. The directory itself is the only record of
/// what the gallery holds; nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct Gallery {
    dir: PathBuf,
    overwrite: bool,
}

impl Gallery {
    /// Open the gallery, creating its directory if needed.
    pub fn open(dir: impl Into<PathBuf>, overwrite: bool) -> Result<Self, GalleryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| GalleryError::Io {
            action: "create",
            path: dir.display().to_string(),
            source: e,
        })?;
        Ok(Self { dir, overwrite })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// PNG file names in the directory, newest-looking first (descending by
    /// name). Files whose names `read` and `delete` would refuse are left out.
    pub fn list(&self) -> Result<Vec<String>, GalleryError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(GalleryError::Io {
                    action: "list",
                    path: self.dir.display().to_string(),
                    source: e,
                })
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| validate_file_name(name).is_ok())
            .collect();
        names.sort_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Write `image` as `<stem>.png`. Returns the path written.
    pub fn save(&self, image: &RgbImage, stem: &str) -> Result<PathBuf, GalleryError> {
        let stem = validate_stem(stem)?;
        let file_name = format!("{stem}{EXTENSION}");
        let path = self.dir.join(&file_name);

        let opened = if self.overwrite {
            File::create(&path)
        } else {
            OpenOptions::new().write(true).create_new(true).open(&path)
        };
        let file = opened.map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => GalleryError::NameTaken(file_name.clone()),
            _ => GalleryError::Io {
                action: "create",
                path: path.display().to_string(),
                source: e,
            },
        })?;

        let mut writer = BufWriter::new(file);
        image
            .write_to(&mut writer, ImageFormat::Png)
            .map_err(|e| GalleryError::Encode {
                path: path.display().to_string(),
                source: e,
            })?;
        writer.flush().map_err(|e| GalleryError::Io {
            action: "write",
            path: path.display().to_string(),
            source: e,
        })?;

        info!(path = %path.display(), width = image.width(), height = image.height(), "saved image");
        Ok(path)
    }

    /// Remove each named file. Keeps going past failures.
    pub fn delete(&self, names: &[String]) -> DeleteReport {
        let mut report = DeleteReport::default();
        for name in names {
            if let Err(e) = validate_file_name(name) {
                warn!(name = %name, "refusing to delete");
                report.failed.push((name.clone(), e.to_string()));
                continue;
            }
            let path = self.dir.join(name);
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "deleted image");
                    report.removed.push(name.clone());
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %path.display(), "image already gone");
                    report.missing.push(name.clone());
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to delete image");
                    report.failed.push((name.clone(), e.to_string()));
                }
            }
        }
        report
    }

    /// Raw bytes of a gallery file, or `None` if it does not exist.
    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>, GalleryError> {
        validate_file_name(name)?;
        let path = self.dir.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GalleryError::Io {
                action: "read",
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}

/// A stem must name a plain file directly inside the gallery directory.
fn validate_stem(stem: &str) -> Result<&str, GalleryError> {
    let stem = stem.trim();
    let bad = stem.is_empty()
        || stem.len() > MAX_STEM_LEN
        || stem.starts_with('.')
        || stem.contains(['/', '\\'])
        || stem.chars().any(char::is_control);
    if bad {
        return Err(GalleryError::InvalidName(stem.to_string()));
    }
    Ok(stem)
}

fn validate_file_name(name: &str) -> Result<(), GalleryError> {
    let stem = name
        .strip_suffix(EXTENSION)
        .ok_or_else(|| GalleryError::InvalidName(name.to_string()))?;
    if stem.trim() != stem || validate_stem(stem).is_err() {
        return Err(GalleryError::InvalidName(name.to_string()));
    }
    Ok(())
}
