use serde::{Deserialize, Serialize};

use crate::capabilities::{CropSessionId, StreamId};
use crate::config::AppConfig;
use crate::lifecycle::ViewState;
use crate::pdf_index::PdfIndex;
use crate::pipeline::SubmissionState;
use crate::views::{Content, ViewLoader};
use crate::{AppError, ErrorSeverity};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    #[default]
    Info,
    Warning,
    Error,
}

/// A short message the shell shows to the user and the user dismisses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub message: String,
    pub kind: NoticeKind,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NoticeKind::Info,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NoticeKind::Warning,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NoticeKind::Error,
        }
    }
}

impl From<&AppError> for Notice {
    fn from(error: &AppError) -> Self {
        let kind = match error.severity {
            ErrorSeverity::Info => NoticeKind::Info,
            ErrorSeverity::Warning => NoticeKind::Warning,
            ErrorSeverity::Error => NoticeKind::Error,
        };
        Self {
            message: error.user_facing_message(),
            kind,
        }
    }
}

#[derive(Debug, Default)]
pub struct Model {
    pub config: AppConfig,
    pub loader: ViewLoader,
    pub view_state: ViewState,
    pub pdf_index: PdfIndex,
    pub submission: SubmissionState,
    pub notice: Option<Notice>,
}

// ---------- View model ----------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NavItem {
    pub view: String,
    pub label: String,
    pub active: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PdfEntry {
    pub id: i64,
    pub name: String,
    pub caption: String,
    pub download_href: String,
    pub download_filename: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CameraStage {
    Starting,
    Live,
    Editing,
    Idle,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FilterValues {
    pub brightness: f64,
    pub contrast: f64,
    pub sharpness: f64,
    pub grayscale: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Screen {
    Blank,
    Home,
    MyPdfs {
        entries: Vec<PdfEntry>,
        empty_message: Option<String>,
    },
    Camera {
        stage: CameraStage,
        capture_enabled: bool,
        stream: Option<StreamId>,
        crop_session: Option<CropSessionId>,
        has_image: bool,
        preview_filter: String,
        filters: FilterValues,
    },
    Other {
        view: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NamingPrompt {
    pub message: String,
    pub suggested_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ViewModel {
    /// A view load or a crop extraction is outstanding.
    pub loading: bool,
    /// An image is being converted to PDF.
    pub processing: bool,
    pub nav: Vec<NavItem>,
    pub content: Content,
    pub screen: Screen,
    pub naming_prompt: Option<NamingPrompt>,
    pub notice: Option<Notice>,
}
