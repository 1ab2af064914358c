//! Capture/edit pipeline: filter settings, submission encoding and the
//! naming workflow that follows a successful conversion.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::capabilities::ImageBlob;
use crate::pdf_index::PDF_DATA_URL_PREFIX;

pub const FILTER_MIN: f64 = 0.0;
pub const FILTER_MAX: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    pub brightness: f64,
    pub contrast: f64,
    pub sharpness: f64,
    pub grayscale: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            contrast: 1.0,
            sharpness: 1.0,
            grayscale: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", content = "value", rename_all = "snake_case")]
pub enum FilterChange {
    Brightness(f64),
    Contrast(f64),
    Sharpness(f64),
    Grayscale(bool),
}

impl FilterSettings {
    /// Applies a control change. Non-finite values leave the setting untouched.
    pub fn apply(&mut self, change: FilterChange) -> bool {
        let (slot, value) = match change {
            FilterChange::Grayscale(on) => {
                let changed = self.grayscale != on;
                self.grayscale = on;
                return changed;
            }
            FilterChange::Brightness(v) => (&mut self.brightness, v),
            FilterChange::Contrast(v) => (&mut self.contrast, v),
            FilterChange::Sharpness(v) => (&mut self.sharpness, v),
        };

        if !value.is_finite() {
            tracing::debug!(?change, "ignoring non-finite filter value");
            return false;
        }

        let clamped = value.clamp(FILTER_MIN, FILTER_MAX);
        let changed = (*slot - clamped).abs() > f64::EPSILON;
        *slot = clamped;
        changed
    }

    /// CSS filter for the live preview. Sharpness is only applied server-side.
    pub fn preview_css(&self) -> String {
        format!(
            "brightness({}) contrast({}) grayscale({}%)",
            self.brightness,
            self.contrast,
            if self.grayscale { 100 } else { 0 }
        )
    }
}

/// A fully encoded `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartBody {
    pub content_type: String,
    pub body: Vec<u8>,
}

pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::with_boundary(format!("----scan2pdf-{}", Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: impl std::fmt::Display) -> Self {
        self.open_part(name);
        self.body.extend_from_slice(b"\r\n");
        self.body.extend_from_slice(value.to_string().as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        self.open_part(name);
        self.body
            .extend_from_slice(format!("; filename=\"{}\"", escape_quoted(file_name)).as_bytes());
        self.body
            .extend_from_slice(format!("\r\nContent-Type: {content_type}\r\n\r\n").as_bytes());
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> MultipartBody {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        MultipartBody {
            content_type: format!("multipart/form-data; boundary={}", self.boundary),
            body: self.body,
        }
    }

    fn open_part(&mut self, name: &str) {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
                self.boundary,
                escape_quoted(name)
            )
            .as_bytes(),
        );
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "%22")
        .replace(['\r', '\n'], " ")
}

/// Encodes the processing request: the image part followed by the filter fields.
pub fn encode_submission(
    form: MultipartForm,
    image: &ImageBlob,
    filters: &FilterSettings,
    file_name: &str,
) -> MultipartBody {
    form.file("image", file_name, image.mime_type(), image.data())
        .text("brightness", filters.brightness)
        .text("contrast", filters.contrast)
        .text("sharpness", filters.sharpness)
        .text("grayscale", filters.grayscale)
        .finish()
}

pub fn pdf_data_url(pdf: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(pdf);
    format!("{PDF_DATA_URL_PREFIX}{encoded}")
}

pub fn suggested_name(now: DateTime<Utc>) -> String {
    format!("Document {}", now.format("%Y-%m-%d"))
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("a submission is already in progress")]
    AlreadyInFlight,

    #[error("a converted PDF is still waiting for a name")]
    AwaitingName,

    #[error("no submission is waiting for a name")]
    NotAwaitingName,

    #[error("image of {size} bytes exceeds the upload limit of {max} bytes")]
    ImageTooLarge { size: usize, max: usize },

    #[error("processing server returned HTTP {status}")]
    Status { status: u16 },

    #[error("processing request failed: {message}")]
    Network { message: String },

    #[error("processing server returned an empty document")]
    EmptyResponse,

    #[error("PDF discarded without a name")]
    NamingAbandoned,
}

/// Where the single submission slot currently stands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubmissionState {
    #[default]
    Idle,
    InFlight,
    AwaitingName {
        content: String,
        suggested_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPdf {
    pub name: String,
    pub content: String,
}

impl SubmissionState {
    pub fn is_busy(&self) -> bool {
        !matches!(self, SubmissionState::Idle)
    }

    pub fn suggested_name(&self) -> Option<&str> {
        match self {
            SubmissionState::AwaitingName { suggested_name, .. } => Some(suggested_name),
            _ => None,
        }
    }

    /// Claims the slot for a new upload.
    pub fn begin(&mut self, image: &ImageBlob, max_bytes: usize) -> Result<(), SubmissionError> {
        match self {
            SubmissionState::Idle => {}
            SubmissionState::InFlight => return Err(SubmissionError::AlreadyInFlight),
            SubmissionState::AwaitingName { .. } => return Err(SubmissionError::AwaitingName),
        }
        if image.len() > max_bytes {
            return Err(SubmissionError::ImageTooLarge {
                size: image.len(),
                max: max_bytes,
            });
        }
        *self = SubmissionState::InFlight;
        Ok(())
    }

    /// Records the server's answer. On success the slot waits for a name.
    pub fn complete(
        &mut self,
        result: Result<Vec<u8>, SubmissionError>,
        now: DateTime<Utc>,
    ) -> Result<(), SubmissionError> {
        if *self != SubmissionState::InFlight {
            tracing::warn!(state = ?self, "processing result without a submission in flight");
        }

        let pdf = match result {
            Ok(pdf) if pdf.is_empty() => Err(SubmissionError::EmptyResponse),
            other => other,
        };

        match pdf {
            Ok(pdf) => {
                *self = SubmissionState::AwaitingName {
                    content: pdf_data_url(&pdf),
                    suggested_name: suggested_name(now),
                };
                Ok(())
            }
            Err(e) => {
                *self = SubmissionState::Idle;
                Err(e)
            }
        }
    }

    /// Resolves the naming prompt. A missing or blank name discards the PDF.
    pub fn name(&mut self, name: Option<&str>) -> Result<NamedPdf, SubmissionError> {
        let content = match std::mem::take(self) {
            SubmissionState::AwaitingName { content, .. } => content,
            other => {
                *self = other;
                return Err(SubmissionError::NotAwaitingName);
            }
        };

        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => Ok(NamedPdf {
                name: name.to_string(),
                content,
            }),
            None => Err(SubmissionError::NamingAbandoned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::fixtures;
    use chrono::TimeZone;

    #[test]
    fn test_filter_defaults_and_preview() {
        let filters = FilterSettings::default();
        assert_eq!(
            filters.preview_css(),
            "brightness(1) contrast(1) grayscale(0%)"
        );
    }

    #[test]
    fn test_filter_preview_ignores_sharpness() {
        let mut filters = FilterSettings::default();
        filters.apply(FilterChange::Brightness(1.4));
        filters.apply(FilterChange::Sharpness(2.5));
        filters.apply(FilterChange::Grayscale(true));
        assert_eq!(
            filters.preview_css(),
            "brightness(1.4) contrast(1) grayscale(100%)"
        );
    }

    #[test]
    fn test_filter_clamps_and_rejects_non_finite() {
        let mut filters = FilterSettings::default();
        assert!(filters.apply(FilterChange::Contrast(9.0)));
        assert!((filters.contrast - FILTER_MAX).abs() < f64::EPSILON);

        assert!(filters.apply(FilterChange::Brightness(-1.0)));
        assert!(filters.brightness.abs() < f64::EPSILON);

        assert!(!filters.apply(FilterChange::Sharpness(f64::NAN)));
        assert!((filters.sharpness - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_encode_submission_fields() {
        let image = fixtures::png(1);
        let filters = FilterSettings {
            brightness: 1.2,
            contrast: 0.8,
            sharpness: 1.0,
            grayscale: true,
        };
        let encoded = encode_submission(
            MultipartForm::with_boundary("XYZ"),
            &image,
            &filters,
            "scan.png",
        );

        assert_eq!(encoded.content_type, "multipart/form-data; boundary=XYZ");
        let text = String::from_utf8_lossy(&encoded.body);
        assert!(text.starts_with(
            "--XYZ\r\nContent-Disposition: form-data; name=\"image\"; filename=\"scan.png\"\r\nContent-Type: image/png\r\n\r\n"
        ));
        assert!(text.contains("name=\"brightness\"\r\n\r\n1.2\r\n"));
        assert!(text.contains("name=\"contrast\"\r\n\r\n0.8\r\n"));
        assert!(text.contains("name=\"sharpness\"\r\n\r\n1\r\n"));
        assert!(text.contains("name=\"grayscale\"\r\n\r\ntrue\r\n"));
        assert!(text.ends_with("--XYZ--\r\n"));
    }

    #[test]
    fn test_generated_boundaries_differ() {
        let a = MultipartForm::new().finish();
        let b = MultipartForm::new().finish();
        assert_ne!(a.content_type, b.content_type);
    }

    #[test]
    fn test_pdf_data_url() {
        assert_eq!(pdf_data_url(b"%PDF"), "data:application/pdf;base64,JVBERg==");
    }

    #[test]
    fn test_single_submission_in_flight() {
        let image = fixtures::png(2);
        let mut state = SubmissionState::default();
        state.begin(&image, usize::MAX).unwrap();
        assert_eq!(
            state.begin(&image, usize::MAX),
            Err(SubmissionError::AlreadyInFlight)
        );
    }

    #[test]
    fn test_upload_limit() {
        let image = fixtures::png(2);
        let mut state = SubmissionState::default();
        assert!(matches!(
            state.begin(&image, 4),
            Err(SubmissionError::ImageTooLarge { .. })
        ));
        assert_eq!(state, SubmissionState::Idle);
    }

    #[test]
    fn test_successful_completion_prompts_for_name() {
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 8, 0, 0).unwrap();
        let mut state = SubmissionState::InFlight;
        state.complete(Ok(b"%PDF-1.4".to_vec()), now).unwrap();

        assert_eq!(state.suggested_name(), Some("Document 2024-05-17"));
        let named = state.name(Some(" Invoice ")).unwrap();
        assert_eq!(named.name, "Invoice");
        assert!(named.content.starts_with(PDF_DATA_URL_PREFIX));
        assert_eq!(state, SubmissionState::Idle);
    }

    #[test]
    fn test_failed_completion_frees_slot() {
        let mut state = SubmissionState::InFlight;
        let err = state
            .complete(Err(SubmissionError::Status { status: 500 }), Utc::now())
            .unwrap_err();
        assert_eq!(err, SubmissionError::Status { status: 500 });
        assert!(!state.is_busy());

        let mut state = SubmissionState::InFlight;
        assert_eq!(
            state.complete(Ok(Vec::new()), Utc::now()),
            Err(SubmissionError::EmptyResponse)
        );
    }

    #[test]
    fn test_blank_or_missing_name_discards() {
        for name in [None, Some(""), Some("   ")] {
            let mut state = SubmissionState::InFlight;
            state.complete(Ok(b"%PDF".to_vec()), Utc::now()).unwrap();
            assert_eq!(state.name(name), Err(SubmissionError::NamingAbandoned));
            assert_eq!(state, SubmissionState::Idle);
        }
    }

    #[test]
    fn test_name_without_prompt() {
        let mut state = SubmissionState::InFlight;
        assert_eq!(state.name(Some("x")), Err(SubmissionError::NotAwaitingName));
        assert_eq!(state, SubmissionState::InFlight);
    }
}
