//! Runtime configuration handed over by the shell at startup.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::capabilities::{CameraFacing, ImageFormat};
use crate::views::ViewName;

pub const DEFAULT_ORIGIN: &str = "http://localhost:8000";
pub const DEFAULT_FRAGMENT_BASE_PATH: &str = "/static/views";
pub const DEFAULT_PROCESS_ENDPOINT: &str = "/process-image";
pub const DEFAULT_STORAGE_KEY: &str = "myPdfs";
pub const DEFAULT_UPLOAD_FILE_NAME: &str = "scan.png";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const MAX_STORAGE_KEY_LENGTH: usize = 512;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid storage key: {reason}")]
    InvalidStorageKey { reason: String },

    #[error("invalid default view '{name}'")]
    InvalidDefaultView { name: String },

    #[error("upload limit must be greater than zero")]
    ZeroUploadLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scheme, host and port the fragments and the processing endpoint live on.
    pub origin: String,
    pub fragment_base_path: String,
    pub process_endpoint: String,
    pub storage_key: String,
    pub default_view: String,
    pub camera_facing: CameraFacing,
    pub capture_format: ImageFormat,
    pub upload_file_name: String,
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            fragment_base_path: DEFAULT_FRAGMENT_BASE_PATH.to_string(),
            process_endpoint: DEFAULT_PROCESS_ENDPOINT.to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            default_view: ViewName::Home.as_str().to_string(),
            camera_facing: CameraFacing::Environment,
            capture_format: ImageFormat::Png,
            upload_file_name: DEFAULT_UPLOAD_FILE_NAME.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.origin_url()?;
        Self::validate_path(&self.fragment_base_path)?;
        Self::validate_path(&self.process_endpoint)?;

        let key = self.storage_key.trim();
        if key.is_empty() {
            return Err(ConfigError::InvalidStorageKey {
                reason: "key cannot be empty".to_string(),
            });
        }
        if key.len() > MAX_STORAGE_KEY_LENGTH {
            return Err(ConfigError::InvalidStorageKey {
                reason: format!("key exceeds maximum length of {MAX_STORAGE_KEY_LENGTH} bytes"),
            });
        }

        ViewName::parse(&self.default_view).map_err(|_| ConfigError::InvalidDefaultView {
            name: self.default_view.clone(),
        })?;

        if self.max_upload_bytes == 0 {
            return Err(ConfigError::ZeroUploadLimit);
        }

        Ok(())
    }

    /// Returns `self` when valid, otherwise the defaults (logging why).
    pub fn or_default(self) -> Self {
        match self.validate() {
            Ok(()) => self,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting shell configuration, using defaults");
                Self::default()
            }
        }
    }

    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin).map_err(|e| ConfigError::InvalidOrigin {
            origin: self.origin.clone(),
            reason: e.to_string(),
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidOrigin {
                origin: self.origin.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidOrigin {
                origin: self.origin.clone(),
                reason: "missing host".to_string(),
            });
        }

        Ok(url)
    }

    pub fn fragment_url(&self, view: &ViewName) -> Result<Url, ConfigError> {
        let base = self.fragment_base_path.trim_end_matches('/');
        self.join(&format!("{base}/{}.html", view.as_str()))
    }

    pub fn process_url(&self) -> Result<Url, ConfigError> {
        self.join(&self.process_endpoint)
    }

    pub fn default_view(&self) -> ViewName {
        ViewName::parse(&self.default_view).unwrap_or(ViewName::Home)
    }

    fn join(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin_url()?
            .join(path)
            .map_err(|e| ConfigError::InvalidPath {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    fn validate_path(path: &str) -> Result<(), ConfigError> {
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidPath {
                path: path.to_string(),
                reason: "path must be absolute".to_string(),
            });
        }
        if path.contains("..") {
            return Err(ConfigError::InvalidPath {
                path: path.to_string(),
                reason: "path cannot contain traversal sequences".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(AppConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_fragment_url() {
        let config = AppConfig::default();
        let url = config.fragment_url(&ViewName::MyPdfs).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/static/views/my_pdfs.html");
    }

    #[test]
    fn test_fragment_url_tolerates_trailing_slash() {
        let config = AppConfig {
            fragment_base_path: "/fragments/".into(),
            ..AppConfig::default()
        };
        let url = config.fragment_url(&ViewName::Camera).unwrap();
        assert_eq!(url.path(), "/fragments/camera.html");
    }

    #[test]
    fn test_process_url() {
        let config = AppConfig {
            origin: "https://scan.example.com".into(),
            ..AppConfig::default()
        };
        assert_eq!(
            config.process_url().unwrap().as_str(),
            "https://scan.example.com/process-image"
        );
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let config = AppConfig {
            origin: "ftp://example.com".into(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidOrigin { .. })
        ));

        let config = AppConfig {
            origin: "not a url".into(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_paths_rejected() {
        let config = AppConfig {
            process_endpoint: "process-image".into(),
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPath { .. })));
    }

    #[test]
    fn test_invalid_config_falls_back_to_defaults() {
        let config = AppConfig {
            storage_key: "   ".into(),
            ..AppConfig::default()
        };
        assert_eq!(config.or_default(), AppConfig::default());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"origin":"https://pdf.example.org"}"#).unwrap();
        assert_eq!(config.origin, "https://pdf.example.org");
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
        assert_eq!(config.default_view(), ViewName::Home);
    }
}
