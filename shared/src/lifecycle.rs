//! Per-view setup and teardown, and the camera/crop resource lifecycle.
//!
//! Every transition consumes the current [`ViewState`] and returns the next one
//! together with the resource actions the app must carry out. The camera phase
//! is a single enum, so at most one of {camera stream, crop session} is live.

use crate::capabilities::{
    CameraError, CameraFacing, CameraOutput, CameraResult, CameraStream, CropError, CropOptions,
    CropOutput, CropResult, CropSessionId, ImageBlob, RequestId, StreamId,
};
use crate::model::Notice;
use crate::pipeline::{FilterChange, FilterSettings};
use crate::views::{ViewName, ViewParams};
use crate::AppError;

pub const CAMERA_ACCESS_MESSAGE: &str =
    "Could not access the camera. Make sure you have granted permission.";
pub const CROP_APPLIED_MESSAGE: &str = "Crop applied.";
pub const NO_IMAGE_MESSAGE: &str = "You must capture or crop a photo first.";

/// View parameter selecting the camera (`user` or `environment`).
pub const FACING_PARAM: &str = "facing";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CameraPhase {
    #[default]
    Off,
    Acquiring {
        request: RequestId,
    },
    Capturing {
        stream: CameraStream,
        capture_pending: bool,
    },
    /// The crop tool is open on `ViewState::pending_image`. While `extracting`,
    /// a confirmed crop is on its way back from the shell.
    Editing {
        crop: CropSessionId,
        extracting: bool,
    },
}

/// Monotonic source of camera request and crop session handles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleSeq {
    last: u64,
}

impl HandleSeq {
    fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    pub fn next_request(&mut self) -> RequestId {
        RequestId(self.next())
    }

    pub fn next_crop_session(&mut self) -> CropSessionId {
        CropSessionId(self.next())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleAction {
    StartCamera {
        request: RequestId,
        facing: CameraFacing,
    },
    CaptureStill {
        stream: StreamId,
    },
    StopTracks {
        stream: CameraStream,
    },
    CreateCropSession {
        session: CropSessionId,
        image: ImageBlob,
        options: CropOptions,
    },
    ExtractCrop {
        session: CropSessionId,
    },
    DestroyCropSession {
        session: CropSessionId,
    },
    Submit {
        image: ImageBlob,
        filters: FilterSettings,
    },
    Navigate(ViewName),
    Notify(Notice),
}

#[derive(Debug)]
pub struct Transition {
    pub state: ViewState,
    pub actions: Vec<LifecycleAction>,
}

impl Transition {
    fn new(state: ViewState, actions: Vec<LifecycleAction>) -> Self {
        Self { state, actions }
    }

    fn unchanged(state: ViewState) -> Self {
        Self::new(state, Vec::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub active_view: Option<ViewName>,
    pub camera: CameraPhase,
    pub pending_image: Option<ImageBlob>,
    pub filters: FilterSettings,
    pub facing: CameraFacing,
    pub handles: HandleSeq,
}

impl ViewState {
    pub fn active_camera_stream(&self) -> Option<&CameraStream> {
        match &self.camera {
            CameraPhase::Capturing { stream, .. } => Some(stream),
            _ => None,
        }
    }

    pub fn active_crop_session(&self) -> Option<CropSessionId> {
        match &self.camera {
            CameraPhase::Editing { crop, .. } => Some(*crop),
            _ => None,
        }
    }

    pub fn is_extracting(&self) -> bool {
        matches!(
            self.camera,
            CameraPhase::Editing {
                extracting: true,
                ..
            }
        )
    }

    /// Releases everything the outgoing view holds.
    pub fn teardown(mut self) -> Transition {
        let mut actions = Vec::new();
        self.release_camera(&mut actions);
        self.pending_image = None;
        self.filters = FilterSettings::default();
        self.active_view = None;
        Transition::new(self, actions)
    }

    pub fn setup(mut self, view: ViewName, params: &ViewParams, default_facing: CameraFacing) -> Transition {
        let mut actions = Vec::new();

        // No crop session outlives the view that opened it.
        if let CameraPhase::Editing { crop, .. } = self.camera {
            actions.push(LifecycleAction::DestroyCropSession { session: crop });
            self.camera = CameraPhase::Off;
        }

        self.active_view = Some(view.clone());

        match view {
            ViewName::Camera => {
                self.facing = params
                    .get(FACING_PARAM)
                    .and_then(|value| CameraFacing::from_param(value))
                    .unwrap_or(default_facing);
                self.start_camera(&mut actions);
            }
            ViewName::Home | ViewName::MyPdfs => {}
            ViewName::Custom(ref name) => {
                tracing::debug!(view = %name, "no setup for view");
            }
        }

        Transition::new(self, actions)
    }

    pub fn camera_started(mut self, request: RequestId, result: CameraResult) -> Transition {
        let expected = matches!(self.camera, CameraPhase::Acquiring { request: r } if r == request);

        if !expected {
            // The view was left or the camera restarted while this request was in flight.
            return match result {
                Ok(CameraOutput::Stream(stream)) => {
                    tracing::debug!(?request, stream = ?stream.id, "stopping stale camera stream");
                    Transition::new(self, vec![LifecycleAction::StopTracks { stream }])
                }
                _ => Transition::unchanged(self),
            };
        }

        let stream = result.and_then(|output| output.into_stream().ok_or(CameraError::UnexpectedOutput));

        match stream {
            Ok(stream) => {
                tracing::info!(stream = ?stream.id, tracks = stream.tracks.len(), "camera stream started");
                self.camera = CameraPhase::Capturing {
                    stream,
                    capture_pending: false,
                };
                Transition::unchanged(self)
            }
            Err(e) => {
                let error = AppError::from(e);
                tracing::warn!(kind = ?error.kind, error = %error.message, "camera unavailable");
                self.camera = CameraPhase::Off;
                Transition::new(
                    self,
                    vec![
                        LifecycleAction::Notify(Notice::error(CAMERA_ACCESS_MESSAGE)),
                        LifecycleAction::Navigate(ViewName::Home),
                    ],
                )
            }
        }
    }

    pub fn capture(mut self) -> Transition {
        match &mut self.camera {
            CameraPhase::Capturing {
                stream,
                capture_pending,
            } if !*capture_pending => {
                *capture_pending = true;
                let stream = stream.id;
                Transition::new(self, vec![LifecycleAction::CaptureStill { stream }])
            }
            _ => {
                tracing::debug!(phase = ?self.camera, "capture ignored");
                Transition::unchanged(self)
            }
        }
    }

    pub fn still_captured(mut self, stream_id: StreamId, result: CameraResult) -> Transition {
        let stream = match &self.camera {
            CameraPhase::Capturing {
                stream,
                capture_pending: true,
            } if stream.id == stream_id => stream.clone(),
            _ => {
                tracing::debug!(stream = ?stream_id, "ignoring stale capture");
                return Transition::unchanged(self);
            }
        };

        let image = match result.and_then(|output| output.into_still().ok_or(CameraError::UnexpectedOutput)) {
            Ok(image) => image,
            Err(e) => {
                let error = AppError::from(e);
                tracing::warn!(error = %error.message, "capture failed");
                self.camera = CameraPhase::Capturing {
                    stream,
                    capture_pending: false,
                };
                return Transition::new(
                    self,
                    vec![LifecycleAction::Notify(Notice::from(&error))],
                );
            }
        };

        let session = self.handles.next_crop_session();
        self.pending_image = Some(image.clone());
        self.camera = CameraPhase::Editing {
            crop: session,
            extracting: false,
        };

        Transition::new(
            self,
            vec![
                LifecycleAction::StopTracks { stream },
                LifecycleAction::CreateCropSession {
                    session,
                    image,
                    options: CropOptions::initial(),
                },
            ],
        )
    }

    /// Handles the shell's answer to opening a crop session.
    pub fn crop_created(mut self, session: CropSessionId, result: CropResult) -> Transition {
        if self.active_crop_session() != Some(session) {
            return Transition::unchanged(self);
        }

        match result {
            Ok(CropOutput::Created { .. }) => Transition::unchanged(self),
            Ok(_) => self.crop_failed(CropError::UnexpectedOutput),
            Err(e) => self.crop_failed(e),
        }
    }

    fn crop_failed(mut self, e: CropError) -> Transition {
        let error = AppError::from(e);
        tracing::warn!(error = %error.message, "crop tool failed");
        // The captured image is kept so it can still be submitted uncropped.
        self.camera = CameraPhase::Off;
        Transition::new(self, vec![LifecycleAction::Notify(Notice::from(&error))])
    }

    pub fn update_filter(mut self, change: FilterChange) -> Transition {
        self.filters.apply(change);
        Transition::unchanged(self)
    }

    pub fn confirm_crop(mut self) -> Transition {
        match &mut self.camera {
            CameraPhase::Editing {
                crop,
                extracting: extracting @ false,
            } => {
                *extracting = true;
                let session = *crop;
                Transition::new(self, vec![LifecycleAction::ExtractCrop { session }])
            }
            _ => {
                tracing::debug!(phase = ?self.camera, "crop confirmation ignored");
                Transition::unchanged(self)
            }
        }
    }

    pub fn crop_extracted(mut self, session: CropSessionId, result: CropResult) -> Transition {
        match self.camera {
            CameraPhase::Editing {
                crop,
                extracting: true,
            } if crop == session => {}
            _ => {
                tracing::debug!(?session, "ignoring stale crop extraction");
                return Transition::unchanged(self);
            }
        }

        let image = match result {
            Ok(CropOutput::Extracted { image, .. }) => image,
            Ok(_) => return self.extraction_failed(session, CropError::UnexpectedOutput),
            Err(e) => return self.extraction_failed(session, e),
        };

        let next = self.handles.next_crop_session();
        self.pending_image = Some(image.clone());
        self.camera = CameraPhase::Editing {
            crop: next,
            extracting: false,
        };
        Transition::new(
            self,
            vec![
                LifecycleAction::DestroyCropSession { session },
                LifecycleAction::CreateCropSession {
                    session: next,
                    image,
                    options: CropOptions::after_confirm(),
                },
                LifecycleAction::Notify(Notice::info(CROP_APPLIED_MESSAGE)),
            ],
        )
    }

    fn extraction_failed(mut self, session: CropSessionId, e: CropError) -> Transition {
        let error = AppError::from(e);
        tracing::warn!(error = %error.message, "crop extraction failed");
        self.camera = CameraPhase::Editing {
            crop: session,
            extracting: false,
        };
        Transition::new(self, vec![LifecycleAction::Notify(Notice::from(&error))])
    }

    /// Sends the working image: the capture, or the last confirmed crop.
    pub fn process(self) -> Transition {
        match self.pending_image.clone() {
            Some(image) => {
                let filters = self.filters;
                Transition::new(self, vec![LifecycleAction::Submit { image, filters }])
            }
            None => Transition::new(
                self,
                vec![LifecycleAction::Notify(Notice::warning(NO_IMAGE_MESSAGE))],
            ),
        }
    }

    /// Drops the current image and goes back to the live camera.
    pub fn retake(mut self) -> Transition {
        if self.active_view != Some(ViewName::Camera) {
            tracing::debug!(view = ?self.active_view, "retake outside the camera view");
            return Transition::unchanged(self);
        }

        let mut actions = Vec::new();
        self.release_camera(&mut actions);
        self.pending_image = None;
        self.start_camera(&mut actions);
        Transition::new(self, actions)
    }

    pub fn back_to_home(self) -> Transition {
        Transition::new(self, vec![LifecycleAction::Navigate(ViewName::Home)])
    }

    fn start_camera(&mut self, actions: &mut Vec<LifecycleAction>) {
        let request = self.handles.next_request();
        self.camera = CameraPhase::Acquiring { request };
        actions.push(LifecycleAction::StartCamera {
            request,
            facing: self.facing,
        });
    }

    fn release_camera(&mut self, actions: &mut Vec<LifecycleAction>) {
        match std::mem::take(&mut self.camera) {
            CameraPhase::Off | CameraPhase::Acquiring { .. } => {}
            CameraPhase::Capturing { stream, .. } => {
                actions.push(LifecycleAction::StopTracks { stream });
            }
            CameraPhase::Editing { crop, .. } => {
                actions.push(LifecycleAction::DestroyCropSession { session: crop });
            }
        }
    }
}
