use serde::{Deserialize, Serialize};

use crate::capabilities::{CameraResult, CropResult, CropSessionId, RequestId, StreamId};
use crate::config::AppConfig;
use crate::pipeline::{FilterChange, SubmissionError};
use crate::views::{LoadFailure, ViewParams};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum Event {
    // --- Shell → core ---
    /// First event after launch. Loads the saved PDFs and the default view.
    Started {
        #[serde(default)]
        config: Option<AppConfig>,
    },
    Navigate {
        view: String,
        #[serde(default)]
        params: ViewParams,
    },
    CapturePressed,
    FilterChanged(FilterChange),
    ConfirmCrop,
    Process,
    Retake,
    BackToHome,
    /// Answer to the naming prompt; `None` when the user cancelled.
    PdfNamed {
        name: Option<String>,
    },
    DismissNotice,

    // --- Capability responses ---
    #[serde(skip)]
    FragmentFetched {
        generation: u64,
        outcome: Result<String, LoadFailure>,
    },
    #[serde(skip)]
    CameraStarted {
        request: RequestId,
        result: CameraResult,
    },
    #[serde(skip)]
    StillCaptured {
        stream: StreamId,
        result: CameraResult,
    },
    #[serde(skip)]
    TracksStopped {
        stream: StreamId,
        result: CameraResult,
    },
    #[serde(skip)]
    CropCreated {
        session: CropSessionId,
        result: CropResult,
    },
    #[serde(skip)]
    CropExtracted {
        session: CropSessionId,
        result: CropResult,
    },
    #[serde(skip)]
    CropDestroyed {
        session: CropSessionId,
        result: CropResult,
    },
    #[serde(skip)]
    ProcessingCompleted {
        result: Result<Vec<u8>, SubmissionError>,
    },
    #[serde(skip)]
    PdfIndexLoaded {
        result: Result<Option<Vec<u8>>, String>,
    },
    /// `record_ids` are the records this write stores for the first time.
    #[serde(skip)]
    PdfIndexSaved {
        record_ids: Vec<i64>,
        result: Result<(), String>,
    },
}

impl Event {
    pub fn navigate(view: impl Into<String>) -> Self {
        Event::Navigate {
            view: view.into(),
            params: ViewParams::new(),
        }
    }
}
