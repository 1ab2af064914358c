use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_IMAGE_SIZE_BYTES: usize = 20 * 1024 * 1024;

/// Live camera access: acquire a stream, grab stills from it, stop its tracks.
///
/// The shell owns the actual media objects; the core only holds the handles
/// returned here and is responsible for telling the shell when to release them.
pub struct Camera<E> {
    context: CapabilityContext<CameraOperation, E>,
}

impl<Ev> Capability<Ev> for Camera<Ev> {
    type Operation = CameraOperation;
    type MappedSelf<MappedEv> = Camera<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Camera::new(self.context.map_event(f))
    }
}

impl<E> Camera<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<CameraOperation, E>) -> Self {
        Self { context }
    }

    pub fn start_stream<F>(&self, request: RequestId, facing: CameraFacing, callback: F)
    where
        F: FnOnce(CameraResult) -> E + Send + 'static,
    {
        self.request(CameraOperation::StartStream { request, facing }, callback);
    }

    pub fn capture_still<F>(&self, stream: StreamId, format: ImageFormat, callback: F)
    where
        F: FnOnce(CameraResult) -> E + Send + 'static,
    {
        self.request(CameraOperation::CaptureStill { stream, format }, callback);
    }

    pub fn stop_tracks<F>(&self, stream: &CameraStream, callback: F)
    where
        F: FnOnce(CameraResult) -> E + Send + 'static,
    {
        self.request(
            CameraOperation::StopTracks {
                stream: stream.id,
                tracks: stream.tracks.clone(),
            },
            callback,
        );
    }

    fn request<F>(&self, operation: CameraOperation, callback: F)
    where
        F: FnOnce(CameraResult) -> E + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(callback(result));
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CameraOperation {
    StartStream { request: RequestId, facing: CameraFacing },
    CaptureStill { stream: StreamId, format: ImageFormat },
    StopTracks { stream: StreamId, tracks: Vec<TrackId> },
}

impl Operation for CameraOperation {
    type Output = CameraResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    /// Front camera (`facingMode: "user"`).
    User,
    /// Rear camera (`facingMode: "environment"`).
    #[default]
    Environment,
}

impl CameraFacing {
    pub fn from_param(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" | "front" => Some(CameraFacing::User),
            "environment" | "back" | "rear" => Some(CameraFacing::Environment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    pub fn sniff(data: &[u8]) -> Option<Self> {
        match image::guess_format(data).ok()? {
            image::ImageFormat::Png => Some(ImageFormat::Png),
            image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

/// A live media stream and the tracks that must be stopped to release it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraStream {
    pub id: StreamId,
    pub tracks: Vec<TrackId>,
}

/// Encoded image bytes produced by the camera or the crop tool.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageBlob {
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
    format: ImageFormat,
}

impl ImageBlob {
    pub fn new(data: Vec<u8>, format: ImageFormat) -> Result<Self, CameraError> {
        if data.is_empty() {
            return Err(CameraError::InvalidImage {
                reason: "image data is empty".to_string(),
            });
        }

        if data.len() > MAX_IMAGE_SIZE_BYTES {
            return Err(CameraError::ImageTooLarge {
                size: data.len(),
                max: MAX_IMAGE_SIZE_BYTES,
            });
        }

        match ImageFormat::sniff(&data) {
            Some(detected) if detected != format => Err(CameraError::InvalidImage {
                reason: format!("format mismatch: declared {format:?} but detected {detected:?}"),
            }),
            Some(_) => Ok(Self { data, format }),
            None => Err(CameraError::InvalidImage {
                reason: "unrecognized image encoding".to_string(),
            }),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// Image payloads can be megabytes; keep them out of logs.
impl std::fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBlob")
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CameraOutput {
    Stream(CameraStream),
    Still(ImageBlob),
    Stopped { stream: StreamId },
}

impl CameraOutput {
    pub fn into_stream(self) -> Option<CameraStream> {
        match self {
            CameraOutput::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn into_still(self) -> Option<ImageBlob> {
        match self {
            CameraOutput::Still(image) => Some(image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("camera unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("capture failed: {reason}")]
    CaptureFailed { reason: String },

    #[error("stream {stream:?} is not live")]
    StreamNotLive { stream: StreamId },

    #[error("image too large: {size} bytes exceeds maximum of {max} bytes")]
    ImageTooLarge { size: usize, max: usize },

    #[error("invalid image: {reason}")]
    InvalidImage { reason: String },

    #[error("unexpected camera output")]
    UnexpectedOutput,
}

impl CameraError {
    pub fn is_permission_error(&self) -> bool {
        matches!(self, CameraError::PermissionDenied)
    }
}

pub type CameraResult = Result<CameraOutput, CameraError>;


#[cfg(test)]
mod tests {
    use super::fixtures::PNG_HEADER;
    use super::*;

    #[test]
    fn test_image_format_sniff_png() {
        assert_eq!(ImageFormat::sniff(&PNG_HEADER), Some(ImageFormat::Png));
    }

    #[test]
    fn test_image_format_sniff_jpeg() {
        let jpeg_header = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01];
        assert_eq!(ImageFormat::sniff(&jpeg_header), Some(ImageFormat::Jpeg));
    }

    #[test]
    fn test_image_format_sniff_unknown() {
        let random_data = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B];
        assert_eq!(ImageFormat::sniff(&random_data), None);
    }

    #[test]
    fn test_image_blob_empty_data() {
        let result = ImageBlob::new(vec![], ImageFormat::Png);
        assert!(matches!(result, Err(CameraError::InvalidImage { .. })));
    }

    #[test]
    fn test_image_blob_format_mismatch() {
        let result = ImageBlob::new(PNG_HEADER.to_vec(), ImageFormat::Jpeg);
        assert!(matches!(result, Err(CameraError::InvalidImage { .. })));
    }

    #[test]
    fn test_image_blob_too_large() {
        let mut data = PNG_HEADER.to_vec();
        data.resize(MAX_IMAGE_SIZE_BYTES + 1, 0);
        let result = ImageBlob::new(data, ImageFormat::Png);
        assert!(matches!(result, Err(CameraError::ImageTooLarge { .. })));
    }

    #[test]
    fn test_image_blob_debug_hides_payload() {
        let blob = fixtures::png(7);
        let rendered = format!("{blob:?}");
        assert!(rendered.contains("len"));
        assert!(!rendered.contains("137"));
    }

    #[test]
    fn test_facing_from_param() {
        assert_eq!(CameraFacing::from_param("user"), Some(CameraFacing::User));
        assert_eq!(
            CameraFacing::from_param(" Environment "),
            Some(CameraFacing::Environment)
        );
        assert_eq!(CameraFacing::from_param("sideways"), None);
        assert_eq!(CameraFacing::default(), CameraFacing::Environment);
    }

    #[test]
    fn test_camera_output_helpers() {
        let stream = fixtures::stream(1, &["video-0"]);
        assert_eq!(
            CameraOutput::Stream(stream.clone()).into_stream(),
            Some(stream)
        );
        assert!(CameraOutput::Stopped { stream: StreamId(1) }
            .into_still()
            .is_none());
    }

    #[test]
    fn test_permission_error() {
        assert!(CameraError::PermissionDenied.is_permission_error());
        assert!(!CameraError::Unavailable {
            reason: "busy".into()
        }
        .is_permission_error());
    }
}
