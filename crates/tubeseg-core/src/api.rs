//! Typed surface of the tube segmentation backend.

use std::future::Future;

use serde::Serialize;
use serde_json::{Value, json};

use crate::rpc::{CallHandle, Result, RpcError, Session};
use crate::tubes::{DEFAULT_SCALE, ImageId, TubeError, TubeReply, TubeUid};

/// Parameters of one segmentation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentParams {
    /// Expected tube radius in world units.
    pub scale: f64,
}

impl SegmentParams {
    /// Validate `scale`. It must be finite and positive.
    pub fn new(scale: f64) -> std::result::Result<Self, TubeError> {
        if scale.is_finite() && scale > 0.0 {
            Ok(Self { scale })
        } else {
            Err(TubeError::InvalidScale(scale.to_string()))
        }
    }
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self { scale: DEFAULT_SCALE }
    }
}

/// The fixed set of backend methods, each bound to the session.
#[derive(Debug, Clone)]
pub struct TubeApi {
    session: Session,
    load_file: CallHandle,
    unload_image: CallHandle,
    segment_tube: CallHandle,
    save_tubes: CallHandle,
    delete_tube: CallHandle,
}

impl TubeApi {
    pub const LOAD_FILE: &'static str = "app.load_file";
    pub const UNLOAD_IMAGE: &'static str = "app.unload_image";
    pub const SEGMENT: &'static str = "app.segment";
    pub const SAVE_TUBES: &'static str = "app.save_tubes";
    pub const DELETE_TUBE: &'static str = "app.delete_tube";

    pub fn new(session: &Session) -> Self {
        Self {
            session: session.clone(),
            load_file: session.call_handle(Self::LOAD_FILE),
            unload_image: session.call_handle(Self::UNLOAD_IMAGE),
            segment_tube: session.call_handle(Self::SEGMENT),
            save_tubes: session.call_handle(Self::SAVE_TUBES),
            delete_tube: session.call_handle(Self::DELETE_TUBE),
        }
    }

    /// Session the handles are bound to.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Load an image file on the backend.
    pub fn load_file(&self, path: &str) -> impl Future<Output = Result<ImageId>> + Send + 'static {
        let reply = self.load_file.invoke(vec![json!(path)]);
        async move { decode(reply.await?) }
    }

    /// Release a loaded image.
    pub fn unload_image(&self, image: ImageId) -> impl Future<Output = Result<()>> + Send + 'static {
        let reply = self.unload_image.invoke(vec![json!(image)]);
        async move { reply.await.map(drop) }
    }

    /// Extract a tube seeded at voxel `ijk`.
    pub fn segment_tube(
        &self,
        image: ImageId,
        ijk: [i64; 3],
        params: SegmentParams,
    ) -> impl Future<Output = Result<TubeReply>> + Send + 'static {
        let reply = self.segment_tube.invoke(vec![json!(image), json!(ijk), json!(params)]);
        async move { decode(reply.await?) }
    }

    /// Write the tubes of `image` to `path` on the backend host.
    pub fn save_tubes(&self, image: ImageId, path: &str) -> impl Future<Output = Result<()>> + Send + 'static {
        let reply = self.save_tubes.invoke(vec![json!(image), json!(path)]);
        async move { reply.await.map(drop) }
    }

    /// Delete one tube of `image`.
    pub fn delete_tube(&self, image: ImageId, uid: TubeUid) -> impl Future<Output = Result<()>> + Send + 'static {
        let reply = self.delete_tube.invoke(vec![json!(image), json!(uid)]);
        async move { reply.await.map(drop) }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(RpcError::from)
}
