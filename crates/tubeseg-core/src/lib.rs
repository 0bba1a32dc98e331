//! TubeSeg Core - session and state management for the tube segmentation front-end.
//!
//! This crate provides:
//! - A single retrying session to the analysis backend (wslink over WebSocket)
//! - The named capability surface the backend exposes (load, segment, save, ...)
//! - The segmentation editor: per-image tube lists kept consistent with the backend
//!
//! # Example
//!
//! ```rust,no_run
//! use tubeseg_core::{ClientConfig, Session, SegmentationEditor, TubeApi};
//! use tubeseg_core::rpc::transport::WebSocketConnector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::load(None)?;
//!     let session = Session::new(config.session(), WebSocketConnector::new());
//!     session.connect().await?;
//!
//!     let editor = SegmentationEditor::new(TubeApi::new(&session));
//!     println!("{} tubes", editor.tubes().len());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod editor;
pub mod rpc;
pub mod tubes;

pub use api::{SegmentParams, TubeApi};
pub use config::{ClientConfig, ConfigError};
pub use editor::{
    EditorError, EntityId, ImageSource, OutputLog, SegmentOutcome, SegmentationEditor, Selection,
};
pub use rpc::{
    Endpoint, RemoteError, RetryPolicy, RpcError, Session, SessionConfig, SessionState,
    Subscription,
};
pub use tubes::{DEFAULT_SCALE, ImageId, NO_TUBE, Point3, Tube, TubeError, TubeReply, TubeUid};
