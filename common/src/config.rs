use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub gallery: GalleryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

/// Where frames come from: the system video device or a still image on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraKind {
    Device,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_kind")]
    pub source: CameraKind,
    #[serde(default)]
    pub index: u32,
    /// Still image read on every grab when `source = "file"`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_cascade_path")]
    pub cascade_path: PathBuf,
    /// Smallest face side in pixels. 0 scans from the cascade's native window.
    #[serde(default)]
    pub min_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    #[serde(default = "default_min_neighbors")]
    pub min_neighbors: u32,
    #[serde(default = "default_box_color")]
    pub box_color: String,
    #[serde(default = "default_box_thickness")]
    pub box_thickness: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GalleryConfig {
    #[serde(default = "default_gallery_dir")]
    pub dir: PathBuf,
    /// Silently replace an existing image saved under the same name.
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
    #[serde(default = "default_columns")]
    pub columns: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_kind(),
            index: 0,
            path: None,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            cascade_path: default_cascade_path(),
            min_size: 0,
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            scale_factor: default_scale_factor(),
            min_neighbors: default_min_neighbors(),
            box_color: default_box_color(),
            box_thickness: default_box_thickness(),
        }
    }
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            dir: default_gallery_dir(),
            overwrite: default_overwrite(),
            columns: default_columns(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.gallery.columns == 0 {
            return Err(ConfigError::Parse("gallery.columns must be at least 1".into()));
        }
        if config.camera.source == CameraKind::File && config.camera.path.is_none() {
            return Err(ConfigError::Parse(
                "camera.path is required when camera.source = \"file\"".into(),
            ));
        }
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0:8501".into()
}
fn default_session_ttl() -> u64 {
    3600
}
fn default_camera_kind() -> CameraKind {
    CameraKind::Device
}
fn default_cascade_path() -> PathBuf {
    PathBuf::from("haarcascade_frontalface_default.xml")
}
fn default_scale_factor() -> f64 {
    1.1
}
fn default_min_neighbors() -> u32 {
    5
}
fn default_box_color() -> String {
    "#00FF00".into()
}
fn default_box_thickness() -> u32 {
    2
}
fn default_gallery_dir() -> PathBuf {
    PathBuf::from("captures")
}
fn default_overwrite() -> bool {
    true
}
fn default_columns() -> usize {
    3
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8501");
        assert_eq!(config.camera.source, CameraKind::Device);
        assert_eq!(config.defaults.scale_factor, 1.1);
        assert_eq!(config.defaults.min_neighbors, 5);
        assert_eq!(config.defaults.box_color, "#00FF00");
        assert_eq!(config.gallery.dir, PathBuf::from("captures"));
        assert_eq!(config.gallery.columns, 3);
        assert!(config.gallery.overwrite);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.detector.min_size, 0);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [gallery]
            dir = "/tmp/shots"
            overwrite = false

            [camera]
            source = "file"
            path = "still.png"
            "#,
        )
        .unwrap();
        assert_eq!(config.gallery.dir, PathBuf::from("/tmp/shots"));
        assert!(!config.gallery.overwrite);
        assert_eq!(config.gallery.columns, 3);
        assert_eq!(config.camera.source, CameraKind::File);
        assert_eq!(config.camera.path, Some(PathBuf::from("still.png")));
    }

    #[test]
    fn file_source_requires_path() {
        let err = Config::parse("[camera]\nsource = \"file\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_columns_rejected() {
        assert!(Config::parse("[gallery]\ncolumns = 0\n").is_err());
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(..)));
    }
}
