use chrono::Utc;
use crux_http::Response;
use tracing::{debug, error, info, warn};

use crate::capabilities::{CameraResult, Capabilities, CropResult, ImageBlob};
use crate::config::AppConfig;
use crate::event::Event;
use crate::lifecycle::{CameraPhase, LifecycleAction, Transition, ViewState};
use crate::model::{
    CameraStage, FilterValues, Model, NamingPrompt, NavItem, Notice, PdfEntry, Screen, ViewModel,
};
use crate::pdf_index::IndexWrite;
use crate::pipeline::{encode_submission, FilterSettings, MultipartForm, NamedPdf, SubmissionError, SubmissionState};
use crate::views::{LoadFailure, Settled, ViewName, ViewParams};
use crate::{AppError, ErrorKind};

pub const PDF_SAVED_MESSAGE: &str = "PDF saved and ready to download.";
pub const NAMING_PROMPT_MESSAGE: &str = "Enter a name for your PDF:";
pub const EMPTY_LIST_MESSAGE: &str = "You don't have any saved PDFs yet.";

#[derive(Default)]
pub struct App;

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        self.handle(event, model, caps);
        caps.render.render();
    }

    fn view(&self, model: &Model) -> ViewModel {
        let state = &model.view_state;

        ViewModel {
            loading: model.loader.is_loading() || state.is_extracting(),
            processing: model.submission == SubmissionState::InFlight,
            nav: model
                .loader
                .nav()
                .map(|(entry, active)| NavItem {
                    view: entry.view.as_str().to_string(),
                    label: entry.label.to_string(),
                    active,
                })
                .collect(),
            content: model.loader.content().clone(),
            screen: screen(model),
            naming_prompt: model.submission.suggested_name().map(|name| NamingPrompt {
                message: NAMING_PROMPT_MESSAGE.to_string(),
                suggested_name: name.to_string(),
            }),
            notice: model.notice.clone(),
        }
    }
}

impl App {
    fn handle(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        match event {
            Event::Started { config } => {
                model.config = config.map(AppConfig::or_default).unwrap_or_default();
                info!(origin = %model.config.origin, "starting");

                self.load_index(model, caps);

                let view = model.config.default_view();
                self.begin_load(view.as_str(), ViewParams::new(), model, caps);
            }

            Event::Navigate { view, params } => self.begin_load(&view, params, model, caps),

            Event::FragmentFetched {
                generation,
                outcome,
            } => match model.loader.finish(generation, outcome) {
                None => {}
                Some(Settled::Loaded { view, params }) => {
                    info!(view = %view, "view loaded");
                    self.transition(model, caps, ViewState::teardown);
                    let facing = model.config.camera_facing;
                    self.transition(model, caps, |state| state.setup(view, &params, facing));
                }
                Some(Settled::Failed { view, failure }) => {
                    let error = AppError::from(failure).with_context("view", view.as_str());
                    warn!(view = %view, error = %error.message, "view failed to load");
                    self.transition(model, caps, ViewState::teardown);
                }
            },

            Event::CapturePressed => self.transition(model, caps, ViewState::capture),
            Event::FilterChanged(change) => {
                self.transition(model, caps, |state| state.update_filter(change));
            }
            Event::ConfirmCrop => self.transition(model, caps, ViewState::confirm_crop),
            Event::Process => self.transition(model, caps, ViewState::process),
            Event::Retake => self.transition(model, caps, ViewState::retake),
            Event::BackToHome => self.transition(model, caps, ViewState::back_to_home),

            Event::CameraStarted { request, result } => {
                self.transition(model, caps, |state| state.camera_started(request, result));
            }
            Event::StillCaptured { stream, result } => {
                self.transition(model, caps, |state| state.still_captured(stream, result));
            }
            Event::TracksStopped { stream, result } => log_release("camera stream", &stream, &result),
            Event::CropCreated { session, result } => {
                self.transition(model, caps, |state| state.crop_created(session, result));
            }
            Event::CropExtracted { session, result } => {
                self.transition(model, caps, |state| state.crop_extracted(session, result));
            }
            Event::CropDestroyed { session, result } => log_crop_release(session, &result),

            Event::ProcessingCompleted { result } => {
                if let Err(e) = model.submission.complete(result, Utc::now()) {
                    self.report(AppError::from(e), model);
                } else {
                    info!("PDF generated, waiting for a name");
                }
            }

            Event::PdfNamed { name } => match model.submission.name(name.as_deref()) {
                Ok(named) => self.save_pdf(named, model, caps),
                Err(e) => self.report(AppError::from(e), model),
            },

            Event::PdfIndexLoaded { result } => match result {
                Ok(stored) => {
                    if !model.pdf_index.hydrate(stored.as_deref()) {
                        debug!("ignoring repeated PDF index load");
                        return;
                    }
                    info!(count = model.pdf_index.len(), "PDF index loaded");
                    // Saves made before the stored list arrived were deferred.
                    self.persist_index(model, caps);
                }
                Err(e) => {
                    if !model.pdf_index.read_failed() {
                        debug!(error = %e, "ignoring stale PDF index read failure");
                        return;
                    }
                    // Unsaved records wait for a successful read; the stored
                    // list is never replaced without one.
                    self.report(
                        AppError::new(ErrorKind::StorageFailure, e).with_context("operation", "read"),
                        model,
                    );
                }
            },

            Event::PdfIndexSaved { record_ids, result } => {
                match result {
                    Ok(()) => {
                        if model.pdf_index.write_succeeded().is_empty() {
                            debug!(records = ?record_ids, "ignoring stale PDF index write");
                            return;
                        }
                        debug!(records = ?record_ids, "PDF index saved");
                        model.notice = Some(Notice::info(PDF_SAVED_MESSAGE));
                        self.handle(Event::navigate(ViewName::MyPdfs.as_str()), model, caps);
                    }
                    Err(e) => {
                        let dropped = model.pdf_index.write_failed();
                        if dropped.is_empty() {
                            debug!(records = ?record_ids, "ignoring stale PDF index write failure");
                            return;
                        }
                        warn!(records = ?dropped, "rolled back unsaved PDFs");
                        self.report(
                            AppError::new(ErrorKind::StorageFailure, e)
                                .with_context("operation", "write"),
                            model,
                        );
                    }
                }
                // Records named while the write was outstanding.
                self.persist_index(model, caps);
            }

            Event::DismissNotice => model.notice = None,
        }
    }

    fn begin_load(&self, name: &str, params: ViewParams, model: &mut Model, caps: &Capabilities) {
        let pending = match model.loader.begin(name, params) {
            Ok(pending) => pending,
            Err(failure) => {
                warn!(view = name, error = %failure, "refusing to load view");
                self.transition(model, caps, ViewState::teardown);
                return;
            }
        };

        let generation = pending.generation;
        match model.config.fragment_url(&pending.view) {
            Ok(url) => {
                debug!(%url, generation, "fetching view fragment");
                caps.http.get(url.as_str()).send(move |result| Event::FragmentFetched {
                    generation,
                    outcome: fragment_outcome(result),
                });
            }
            Err(e) => self.handle(
                Event::FragmentFetched {
                    generation,
                    outcome: Err(LoadFailure::Url {
                        reason: e.to_string(),
                    }),
                },
                model,
                caps,
            ),
        }
    }

    fn transition<F>(&self, model: &mut Model, caps: &Capabilities, f: F)
    where
        F: FnOnce(ViewState) -> Transition,
    {
        let Transition { state, actions } = f(std::mem::take(&mut model.view_state));
        model.view_state = state;

        for action in actions {
            self.perform(action, model, caps);
        }
    }

    fn perform(&self, action: LifecycleAction, model: &mut Model, caps: &Capabilities) {
        match action {
            LifecycleAction::StartCamera { request, facing } => {
                debug!(?request, ?facing, "starting camera");
                caps.camera
                    .start_stream(request, facing, move |result| Event::CameraStarted { request, result });
            }
            LifecycleAction::CaptureStill { stream } => {
                caps.camera
                    .capture_still(stream, model.config.capture_format, move |result| {
                        Event::StillCaptured { stream, result }
                    });
            }
            LifecycleAction::StopTracks { stream } => {
                let id = stream.id;
                debug!(stream = ?id, tracks = stream.tracks.len(), "stopping camera tracks");
                caps.camera
                    .stop_tracks(&stream, move |result| Event::TracksStopped { stream: id, result });
            }
            LifecycleAction::CreateCropSession {
                session,
                image,
                options,
            } => {
                caps.cropper
                    .create(session, image, options, move |result| Event::CropCreated { session, result });
            }
            LifecycleAction::ExtractCrop { session } => {
                caps.cropper
                    .extract(session, model.config.capture_format, move |result| {
                        Event::CropExtracted { session, result }
                    });
            }
            LifecycleAction::DestroyCropSession { session } => {
                caps.cropper
                    .destroy(session, move |result| Event::CropDestroyed { session, result });
            }
            LifecycleAction::Submit { image, filters } => self.submit(&image, &filters, model, caps),
            LifecycleAction::Navigate(view) => {
                self.handle(Event::navigate(view.as_str()), model, caps);
            }
            LifecycleAction::Notify(notice) => model.notice = Some(notice),
        }
    }

    fn submit(&self, image: &ImageBlob, filters: &FilterSettings, model: &mut Model, caps: &Capabilities) {
        if let Err(e) = model.submission.begin(image, model.config.max_upload_bytes) {
            self.report(AppError::from(e), model);
            return;
        }

        let url = match model.config.process_url() {
            Ok(url) => url,
            Err(e) => {
                model.submission = SubmissionState::Idle;
                self.report(AppError::from(e), model);
                return;
            }
        };

        let form = encode_submission(
            MultipartForm::new(),
            image,
            filters,
            &model.config.upload_file_name,
        );
        info!(bytes = form.body.len(), ?filters, "submitting image for processing");

        caps.http
            .post(url.as_str())
            .body_bytes(form.body)
            .header("Content-Type", form.content_type.as_str())
            .send(|result| Event::ProcessingCompleted {
                result: processing_outcome(result),
            });
    }

    fn save_pdf(&self, named: NamedPdf, model: &mut Model, caps: &Capabilities) {
        match model.pdf_index.append(&named.name, named.content, Utc::now()) {
            Ok(record) => {
                info!(id = record.id, name = %record.name, "PDF added to index");
                self.persist_index(model, caps);
            }
            Err(e) => self.report(AppError::from(e), model),
        }
    }

    fn load_index(&self, model: &mut Model, caps: &Capabilities) {
        if !model.pdf_index.begin_read() {
            return;
        }

        caps.key_value
            .get(model.config.storage_key.clone(), |result| Event::PdfIndexLoaded {
                result: result.map_err(|e| e.to_string()),
            });
    }

    fn persist_index(&self, model: &mut Model, caps: &Capabilities) {
        if !model.pdf_index.is_hydrated() {
            debug!(records = ?model.pdf_index.unsaved(), "deferring PDF index write until it is loaded");
            // Retries the read if the last attempt failed.
            self.load_index(model, caps);
            return;
        }

        match model.pdf_index.begin_write() {
            Ok(Some(IndexWrite { record_ids, bytes })) => {
                caps.key_value
                    .set(model.config.storage_key.clone(), bytes, move |result| Event::PdfIndexSaved {
                        record_ids,
                        result: result.map(|_| ()).map_err(|e| e.to_string()),
                    });
            }
            Ok(None) => {}
            Err(e) => self.report(AppError::from(e), model),
        }
    }

    fn report(&self, error: AppError, model: &mut Model) {
        match error.severity {
            crate::ErrorSeverity::Error => error!(kind = ?error.kind, error = %error.message, "operation failed"),
            _ => warn!(kind = ?error.kind, error = %error.message, "operation rejected"),
        }
        model.notice = Some(Notice::from(&error));
    }
}

fn fragment_outcome(result: crux_http::Result<Response<Vec<u8>>>) -> Result<String, LoadFailure> {
    let mut response = result.map_err(|e| LoadFailure::Network {
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(LoadFailure::Status {
            status: u16::from(status),
        });
    }

    String::from_utf8(response.take_body().unwrap_or_default()).map_err(|_| LoadFailure::Decode)
}

fn processing_outcome(result: crux_http::Result<Response<Vec<u8>>>) -> Result<Vec<u8>, SubmissionError> {
    let mut response = result.map_err(|e| SubmissionError::Network {
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(SubmissionError::Status {
            status: u16::from(status),
        });
    }

    Ok(response.take_body().unwrap_or_default())
}

fn log_release<T: std::fmt::Debug>(what: &str, handle: &T, result: &CameraResult) {
    match result {
        Ok(_) => debug!(handle = ?handle, "{what} released"),
        Err(e) => warn!(handle = ?handle, error = %e, "{what} release failed"),
    }
}

fn log_crop_release<T: std::fmt::Debug>(session: T, result: &CropResult) {
    match result {
        Ok(_) => debug!(?session, "crop session destroyed"),
        Err(e) => warn!(?session, error = %e, "crop session destroy failed"),
    }
}

fn screen(model: &Model) -> Screen {
    let Some(view) = model.loader.active_view() else {
        return Screen::Blank;
    };

    match view {
        ViewName::Home => Screen::Home,
        ViewName::MyPdfs => {
            let entries: Vec<PdfEntry> = model
                .pdf_index
                .list()
                .iter()
                .map(|record| PdfEntry {
                    id: record.id,
                    name: record.name.clone(),
                    caption: format!("Converted on {}", record.date),
                    download_href: record.content.clone(),
                    download_filename: record.download_filename(),
                })
                .collect();
            let empty_message = entries.is_empty().then(|| EMPTY_LIST_MESSAGE.to_string());
            Screen::MyPdfs {
                entries,
                empty_message,
            }
        }
        ViewName::Camera => {
            let state = &model.view_state;
            let (stage, capture_enabled) = match &state.camera {
                CameraPhase::Off => (CameraStage::Idle, false),
                CameraPhase::Acquiring { .. } => (CameraStage::Starting, false),
                CameraPhase::Capturing {
                    capture_pending, ..
                } => (CameraStage::Live, !capture_pending),
                CameraPhase::Editing { .. } => (CameraStage::Editing, false),
            };
            Screen::Camera {
                stage,
                capture_enabled,
                stream: state.active_camera_stream().map(|s| s.id),
                crop_session: state.active_crop_session(),
                has_image: state.pending_image.is_some(),
                preview_filter: state.filters.preview_css(),
                filters: FilterValues {
                    brightness: state.filters.brightness,
                    contrast: state.filters.contrast,
                    sharpness: state.filters.sharpness,
                    grayscale: state.filters.grayscale,
                },
            }
        }
        ViewName::Custom(name) => Screen::Other { view: name.clone() },
    }
}
