mod camera;
mod cropper;

pub use self::camera::{
    Camera, CameraError, CameraFacing, CameraOperation, CameraOutput, CameraResult, CameraStream,
    ImageBlob, ImageFormat, RequestId, StreamId, TrackId, MAX_IMAGE_SIZE_BYTES,
};
pub use self::cropper::{
    CropError, CropOperation, CropOptions, CropOutput, CropResult, CropSessionId, Cropper,
};

#[cfg(test)]
pub(crate) use self::camera::fixtures;

// Crux's built-in capabilities cover rendering, HTTP and key-value storage.
pub use crux_core::render::Render;
pub use crux_http::Http;
pub use crux_kv::KeyValue;

use crate::app::App;
use crate::event::Event;

/// Everything the core may ask the shell to do.
///
/// Field types name the generated `Effect` variants: `Effect::Http`,
/// `Effect::KeyValue`, `Effect::Render`, `Effect::Camera`, `Effect::Cropper`.
#[derive(crux_core::macros::Effect)]
#[effect(app = "App")]
pub struct Capabilities {
    pub http: Http<Event>,
    pub key_value: KeyValue<Event>,
    pub render: Render<Event>,
    pub camera: Camera<Event>,
    pub cropper: Cropper<Event>,
}
