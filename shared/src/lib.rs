#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod app;
pub mod capabilities;
pub mod config;
pub mod event;
pub mod lifecycle;
pub mod model;
pub mod offline_cache;
pub mod pdf_index;
pub mod pipeline;
pub mod views;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use crux_core::App as CruxApp;
pub use event::Event;
pub use model::{Model, ViewModel};

use capabilities::{CameraError, CropError};
use config::ConfigError;
use offline_cache::CacheError;
use pdf_index::IndexError;
use pipeline::SubmissionError;
use views::LoadFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    LoadFailure,
    PermissionDenied,
    Camera,
    CropTool,
    SubmissionFailure,
    NamingAbandoned,
    StorageFailure,
    CacheInstallFailure,
    InvalidState,
    Configuration,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::LoadFailure => "LOAD_FAILURE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Camera => "CAMERA_ERROR",
            Self::CropTool => "CROP_TOOL_ERROR",
            Self::SubmissionFailure => "SUBMISSION_FAILURE",
            Self::NamingAbandoned => "NAMING_ABANDONED",
            Self::StorageFailure => "STORAGE_FAILURE",
            Self::CacheInstallFailure => "CACHE_INSTALL_FAILURE",
            Self::InvalidState => "INVALID_STATE",
            Self::Configuration => "CONFIGURATION_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::NamingAbandoned | Self::InvalidState | Self::Configuration => {
                ErrorSeverity::Warning
            }
            Self::LoadFailure
            | Self::PermissionDenied
            | Self::Camera
            | Self::CropTool
            | Self::SubmissionFailure
            | Self::StorageFailure
            | Self::CacheInstallFailure => ErrorSeverity::Error,
        }
    }
}

/// Crate-wide error carried into notices and logs. Nothing here is fatal.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{}: {message}", .kind.code())]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::LoadFailure => match self.context.get("view") {
                Some(view) => format!("Error loading page: {view}"),
                None => "Error loading page.".into(),
            },
            ErrorKind::PermissionDenied => {
                "Could not access the camera. Make sure you have granted permission.".into()
            }
            ErrorKind::Camera => "The camera did not respond. Please try again.".into(),
            ErrorKind::CropTool => "Could not crop the photo. Please try again.".into(),
            ErrorKind::SubmissionFailure => "Error generating the PDF.".into(),
            ErrorKind::NamingAbandoned => "The PDF was not saved without a name.".into(),
            ErrorKind::StorageFailure => "Could not save your PDFs on this device.".into(),
            ErrorKind::CacheInstallFailure => "Offline mode is not available right now.".into(),
            ErrorKind::InvalidState => self.message.clone(),
            ErrorKind::Configuration => "Invalid settings, using the defaults.".into(),
        }
    }
}

impl From<LoadFailure> for AppError {
    fn from(e: LoadFailure) -> Self {
        AppError::new(ErrorKind::LoadFailure, e.to_string())
    }
}

impl From<CameraError> for AppError {
    fn from(e: CameraError) -> Self {
        let kind = if e.is_permission_error() {
            ErrorKind::PermissionDenied
        } else {
            ErrorKind::Camera
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<CropError> for AppError {
    fn from(e: CropError) -> Self {
        AppError::new(ErrorKind::CropTool, e.to_string())
    }
}

impl From<SubmissionError> for AppError {
    fn from(e: SubmissionError) -> Self {
        match e {
            SubmissionError::AlreadyInFlight => AppError::new(
                ErrorKind::InvalidState,
                "A PDF is already being generated.",
            ),
            SubmissionError::AwaitingName => {
                AppError::new(ErrorKind::InvalidState, "Name the current PDF first.")
            }
            SubmissionError::NotAwaitingName => {
                AppError::new(ErrorKind::InvalidState, "There is no PDF waiting for a name.")
                    .with_severity(ErrorSeverity::Info)
            }
            SubmissionError::NamingAbandoned => {
                AppError::new(ErrorKind::NamingAbandoned, e.to_string())
            }
            SubmissionError::ImageTooLarge { .. }
            | SubmissionError::Status { .. }
            | SubmissionError::Network { .. }
            | SubmissionError::EmptyResponse => {
                AppError::new(ErrorKind::SubmissionFailure, e.to_string())
            }
        }
    }
}

impl From<IndexError> for AppError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::EmptyName => AppError::new(ErrorKind::NamingAbandoned, e.to_string()),
            IndexError::InvalidContent | IndexError::Encode(_) => {
                AppError::new(ErrorKind::StorageFailure, e.to_string())
            }
        }
    }
}

impl From<CacheError> for AppError {
    fn from(e: CacheError) -> Self {
        AppError::new(ErrorKind::CacheInstallFailure, e.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, e.to_string())
    }
}
