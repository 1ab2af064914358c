use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::camera::{ImageBlob, ImageFormat};

/// Interactive rectangular crop tool overlaid on an image by the shell.
pub struct Cropper<E> {
    context: CapabilityContext<CropOperation, E>,
}

impl<Ev> Capability<Ev> for Cropper<Ev> {
    type Operation = CropOperation;
    type MappedSelf<MappedEv> = Cropper<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Cropper::new(self.context.map_event(f))
    }
}

impl<E> Cropper<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<CropOperation, E>) -> Self {
        Self { context }
    }

    pub fn create<F>(&self, session: CropSessionId, image: ImageBlob, options: CropOptions, callback: F)
    where
        F: FnOnce(CropResult) -> E + Send + 'static,
    {
        self.request(
            CropOperation::Create {
                session,
                image,
                options,
            },
            callback,
        );
    }

    pub fn extract<F>(&self, session: CropSessionId, format: ImageFormat, callback: F)
    where
        F: FnOnce(CropResult) -> E + Send + 'static,
    {
        self.request(CropOperation::Extract { session, format }, callback);
    }

    pub fn destroy<F>(&self, session: CropSessionId, callback: F)
    where
        F: FnOnce(CropResult) -> E + Send + 'static,
    {
        self.request(CropOperation::Destroy { session }, callback);
    }

    fn request<F>(&self, operation: CropOperation, callback: F)
    where
        F: FnOnce(CropResult) -> E + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(callback(result));
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropSessionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropOptions {
    /// Restricts the crop box to the canvas (cropper view mode 1).
    pub view_mode: u8,
    /// Initial crop box size as a fraction of the image, in `(0, 1]`.
    pub auto_crop_area: f64,
    pub background: bool,
}

impl CropOptions {
    /// Options for the session opened over a fresh capture.
    pub fn initial() -> Self {
        Self {
            view_mode: 1,
            auto_crop_area: 0.9,
            background: false,
        }
    }

    /// Options for the session reopened over an already-cropped image.
    pub fn after_confirm() -> Self {
        Self {
            auto_crop_area: 1.0,
            ..Self::initial()
        }
    }
}

impl Default for CropOptions {
    fn default() -> Self {
        Self::initial()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CropOperation {
    Create {
        session: CropSessionId,
        image: ImageBlob,
        options: CropOptions,
    },
    Extract {
        session: CropSessionId,
        format: ImageFormat,
    },
    Destroy {
        session: CropSessionId,
    },
}

impl Operation for CropOperation {
    type Output = CropResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CropOutput {
    Created { session: CropSessionId },
    Extracted { session: CropSessionId, image: ImageBlob },
    Destroyed { session: CropSessionId },
}

impl CropOutput {
    pub fn session(&self) -> CropSessionId {
        match self {
            CropOutput::Created { session }
            | CropOutput::Extracted { session, .. }
            | CropOutput::Destroyed { session } => *session,
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CropError {
    #[error("crop session {session:?} does not exist")]
    UnknownSession { session: CropSessionId },

    #[error("crop region is empty")]
    EmptySelection,

    #[error("crop tool failed: {reason}")]
    Failed { reason: String },

    #[error("unexpected crop tool output")]
    UnexpectedOutput,
}

pub type CropResult = Result<CropOutput, CropError>;
