//! Segmentation editor.
//!
//! Keeps one tube list per image, mirrored against the backend. Images are
//! loaded lazily on first selection and at most once, however many selections
//! race for them. Exactly one image is active at a time and only its tubes are
//! visible. Segment results are routed to the image they were requested for,
//! which is not necessarily the active one by the time they arrive.

pub mod log;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{SegmentParams, TubeApi};
use crate::rpc::RpcError;
use crate::tubes::{DEFAULT_SCALE, ImageId, Tube, TubeError, TubeUid, parse_scale};

pub use log::OutputLog;

/// Result type for editor operations.
pub type Result<T> = std::result::Result<T, EditorError>;

/// Errors surfaced by the editor. Each one is also appended to the output log.
#[derive(Debug, Clone, Error)]
pub enum EditorError {
    /// A backend call failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The backend sent a malformed tube, or the scale is invalid.
    #[error(transparent)]
    Tube(#[from] TubeError),

    /// The operation needs a selected image.
    #[error("No image is selected")]
    NoActiveImage,

    /// The active image has no tube with this uid.
    #[error("Tube {0} does not exist")]
    UnknownTube(TubeUid),
}

impl EditorError {
    /// Text written to the output log.
    pub fn log_message(&self) -> String {
        match self {
            Self::Rpc(err) => err.log_message(),
            other => other.to_string(),
        }
    }
}

/// Front-end identity of an image (a view proxy id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An image the user can select, with the file backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    pub id: EntityId,
    pub path: String,
}

impl ImageSource {
    pub fn new(id: impl Into<EntityId>, path: impl Into<String>) -> Self {
        Self { id: id.into(), path: path.into() }
    }
}

/// Which image is bound to the visible tube list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    /// Nothing selected; mutations are disabled.
    #[default]
    None,
    /// This image is active.
    Active(EntityId),
}

impl Selection {
    pub fn active(&self) -> Option<&EntityId> {
        match self {
            Self::None => None,
            Self::Active(id) => Some(id),
        }
    }

    fn is(&self, id: &EntityId) -> bool {
        self.active() == Some(id)
    }
}

/// What happened to a segmentation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// A tube was added to the image it was requested for.
    Added(TubeUid),
    /// The backend found no tube at the seed point.
    NoTube,
    /// The image was deregistered or reloaded before the result arrived.
    Stale,
    /// Segmentation is switched off or nothing is selected.
    Disabled,
}

type SharedLoad = Shared<BoxFuture<'static, std::result::Result<ImageId, RpcError>>>;

#[derive(Debug)]
struct EntityRecord {
    image: ImageId,
    generation: u64,
    tubes: Vec<Tube>,
    unloading: bool,
}

enum Slot {
    Loading { generation: u64, load: SharedLoad },
    Loaded(EntityRecord),
}

impl Slot {
    fn generation(&self) -> u64 {
        match self {
            Self::Loading { generation, .. } => *generation,
            Self::Loaded(record) => record.generation,
        }
    }
}

struct EditorState {
    slots: HashMap<EntityId, Slot>,
    selection: Selection,
    /// Bumped by every selection; only the latest one may activate.
    select_ticket: u64,
    next_generation: u64,
    segmentation_enabled: bool,
    scale: f64,
    scale_text: String,
}

impl EditorState {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            selection: Selection::None,
            select_ticket: 0,
            next_generation: 0,
            segmentation_enabled: false,
            scale: DEFAULT_SCALE,
            scale_text: DEFAULT_SCALE.to_string(),
        }
    }

    fn active_record(&self) -> Option<(&EntityId, &EntityRecord)> {
        let id = self.selection.active()?;
        match self.slots.get(id) {
            Some(Slot::Loaded(record)) => Some((id, record)),
            _ => None,
        }
    }

    fn clear_selection(&mut self) {
        self.selection = Selection::None;
        self.segmentation_enabled = false;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-image tube lists for the front-end.
///
/// All mutation goes through these methods. The internal lock is never held
/// across a backend call.
pub struct SegmentationEditor {
    api: TubeApi,
    state: Mutex<EditorState>,
    visible: watch::Sender<Vec<Tube>>,
    log: Mutex<OutputLog>,
}

impl SegmentationEditor {
    pub fn new(api: TubeApi) -> Self {
        let (visible, _) = watch::channel(Vec::new());
        Self { api, state: Mutex::new(EditorState::new()), visible, log: Mutex::new(OutputLog::new()) }
    }

    pub fn api(&self) -> &TubeApi {
        &self.api
    }

    /// Tubes of the active image, empty when nothing is selected.
    pub fn tubes(&self) -> Vec<Tube> {
        self.visible.borrow().clone()
    }

    /// Receiver notified whenever the visible tube list changes.
    pub fn watch_tubes(&self) -> watch::Receiver<Vec<Tube>> {
        self.visible.subscribe()
    }

    pub fn selection(&self) -> Selection {
        lock(&self.state).selection.clone()
    }

    pub fn active_image(&self) -> Option<EntityId> {
        lock(&self.state).selection.active().cloned()
    }

    /// Backend handle of a loaded image.
    pub fn image_id(&self, id: &EntityId) -> Option<ImageId> {
        match lock(&self.state).slots.get(id) {
            Some(Slot::Loaded(record)) => Some(record.image),
            _ => None,
        }
    }

    /// Cached tubes of any loaded image, active or not.
    pub fn cached_tubes(&self, id: &EntityId) -> Option<Vec<Tube>> {
        match lock(&self.state).slots.get(id) {
            Some(Slot::Loaded(record)) => Some(record.tubes.clone()),
            _ => None,
        }
    }

    pub fn is_loading(&self, id: &EntityId) -> bool {
        matches!(lock(&self.state).slots.get(id), Some(Slot::Loading { .. }))
    }

    /// Every image the editor holds state for, loaded or loading.
    pub fn images(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = lock(&self.state).slots.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_segmentation_enabled(&self) -> bool {
        lock(&self.state).segmentation_enabled
    }

    pub fn scale(&self) -> f64 {
        lock(&self.state).scale
    }

    pub fn scale_text(&self) -> String {
        lock(&self.state).scale_text.clone()
    }

    /// Snapshot of the output log.
    pub fn output_log(&self) -> OutputLog {
        lock(&self.log).clone()
    }

    /// Append a message from outside the editor, such as session status.
    pub fn append_log(&self, message: &str) {
        lock(&self.log).append(message);
    }

    pub fn clear_log(&self) {
        lock(&self.log).clear();
    }

    /// Select an image, or clear the selection with `None`.
    ///
    /// The first selection of an image loads it on the backend. Concurrent
    /// selections of the same image share that load. If another selection
    /// happened while the load was in flight, the loaded image is cached but
    /// not activated.
    pub async fn select_image(&self, source: Option<ImageSource>) -> Result<()> {
        let outcome = match source {
            Some(source) => self.select_source(source).await,
            None => {
                self.deselect();
                Ok(())
            }
        };
        self.surface(outcome)
    }

    async fn select_source(&self, source: ImageSource) -> Result<()> {
        let ImageSource { id, path } = source;

        let (ticket, generation, load) = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            state.select_ticket += 1;
            let ticket = state.select_ticket;

            match state.slots.get(&id) {
                Some(Slot::Loaded(_)) => {
                    self.activate(state, &id);
                    return Ok(());
                }
                Some(Slot::Loading { generation, load }) => {
                    debug!(entity = %id, "Joining in-flight image load");
                    (ticket, *generation, load.clone())
                }
                None => {
                    state.next_generation += 1;
                    let generation = state.next_generation;
                    let load = self.api.load_file(&path).boxed().shared();
                    state.slots.insert(id.clone(), Slot::Loading { generation, load: load.clone() });
                    info!(entity = %id, path = %path, "Loading image");
                    (ticket, generation, load)
                }
            }
        };

        let loaded = load.await;

        let mut guard = lock(&self.state);
        let state = &mut *guard;
        if state.slots.get(&id).map(Slot::generation) != Some(generation) {
            debug!(entity = %id, "Image was deregistered while loading");
            return Ok(());
        }

        match loaded {
            Ok(image) => {
                if let Some(slot) = state.slots.get_mut(&id) {
                    if matches!(slot, Slot::Loading { .. }) {
                        debug!(entity = %id, image = %image, "Image loaded");
                        *slot = Slot::Loaded(EntityRecord { image, generation, tubes: Vec::new(), unloading: false });
                    }
                }
                if state.select_ticket == ticket {
                    self.activate(state, &id);
                } else {
                    debug!(entity = %id, "Selection changed while loading, not activating");
                }
                Ok(())
            }
            Err(err) => {
                if matches!(state.slots.get(&id), Some(Slot::Loading { .. })) {
                    state.slots.remove(&id);
                }
                Err(err.into())
            }
        }
    }

    fn activate(&self, state: &mut EditorState, id: &EntityId) {
        let Some(Slot::Loaded(record)) = state.slots.get(id) else {
            return;
        };
        let image = record.image;
        let tubes = record.tubes.clone();
        if !state.selection.is(id) {
            info!(entity = %id, image = %image, tubes = tubes.len(), "Image selected");
        }
        state.selection = Selection::Active(id.clone());
        state.segmentation_enabled = true;
        self.publish(tubes);
    }

    fn deselect(&self) {
        let mut state = lock(&self.state);
        state.select_ticket += 1;
        if state.selection != Selection::None {
            info!("Image selection cleared");
        }
        state.clear_selection();
        self.publish(Vec::new());
    }

    fn publish(&self, tubes: Vec<Tube>) {
        self.visible.send_if_modified(|current| {
            if *current == tubes {
                return false;
            }
            *current = tubes;
            true
        });
    }

    fn surface<T>(&self, outcome: Result<T>) -> Result<T> {
        if let Err(err) = &outcome {
            warn!(error = %err, "Editor operation failed");
            lock(&self.log).append(&err.log_message());
        }
        outcome
    }

    /// Segment a tube seeded at voxel `ijk` of the active image.
    pub async fn segment_at(&self, ijk: [i64; 3]) -> Result<SegmentOutcome> {
        let outcome = self.try_segment_at(ijk).await;
        self.surface(outcome)
    }

    async fn try_segment_at(&self, ijk: [i64; 3]) -> Result<SegmentOutcome> {
        let (entity, image, generation, params) = {
            let state = lock(&self.state);
            if !state.segmentation_enabled {
                return Ok(SegmentOutcome::Disabled);
            }
            let Some((entity, record)) = state.active_record() else {
                return Ok(SegmentOutcome::Disabled);
            };
            (entity.clone(), record.image, record.generation, SegmentParams::new(state.scale)?)
        };

        debug!(entity = %entity, image = %image, ?ijk, scale = params.scale, "Segmenting");
        let reply = self.api.segment_tube(image, ijk, params).await?;
        let Some(tube) = Tube::from_reply(reply)? else {
            debug!(entity = %entity, ?ijk, "No tube at seed point");
            return Ok(SegmentOutcome::NoTube);
        };

        let uid = tube.uid();
        if self.insert_tube(&entity, image, Some(generation), tube) {
            Ok(SegmentOutcome::Added(uid))
        } else {
            Ok(SegmentOutcome::Stale)
        }
    }

    /// Append `tube` to the image `target`, provided it is still loaded as
    /// `image` and not being unloaded. Returns whether the tube was added.
    pub fn add_tube(&self, target: &EntityId, image: ImageId, tube: Tube) -> bool {
        self.insert_tube(target, image, None, tube)
    }

    /// `generation` pins the exact load; a reload that got the same backend
    /// handle back still counts as a different record.
    fn insert_tube(&self, target: &EntityId, image: ImageId, generation: Option<u64>, tube: Tube) -> bool {
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        let Some(Slot::Loaded(record)) = state.slots.get_mut(target) else {
            debug!(entity = %target, uid = %tube.uid(), "Dropping tube for an image that is gone");
            return false;
        };
        let reloaded = generation.is_some_and(|generation| generation != record.generation);
        if record.image != image || record.unloading || reloaded {
            debug!(entity = %target, image = %image, uid = %tube.uid(), "Dropping stale tube");
            return false;
        }

        debug!(entity = %target, uid = %tube.uid(), points = tube.points().len(), "Tube added");
        record.tubes.push(tube);
        if state.selection.is(target) {
            self.publish(record.tubes.clone());
        }
        true
    }

    /// Delete a tube of the active image. The local list only changes once the
    /// backend confirmed the delete.
    pub async fn delete_tube(&self, uid: TubeUid) -> Result<()> {
        let outcome = self.try_delete_tube(uid).await;
        self.surface(outcome)
    }

    async fn try_delete_tube(&self, uid: TubeUid) -> Result<()> {
        let (entity, image) = {
            let state = lock(&self.state);
            let Some((entity, record)) = state.active_record() else {
                return Err(EditorError::NoActiveImage);
            };
            if !record.tubes.iter().any(|tube| tube.uid() == uid) {
                return Err(EditorError::UnknownTube(uid));
            }
            (entity.clone(), record.image)
        };

        self.api.delete_tube(image, uid).await?;

        let mut guard = lock(&self.state);
        let state = &mut *guard;
        if let Some(Slot::Loaded(record)) = state.slots.get_mut(&entity) {
            if record.image == image {
                record.tubes.retain(|tube| tube.uid() != uid);
                if state.selection.is(&entity) {
                    self.publish(record.tubes.clone());
                }
            }
        }
        info!(entity = %entity, uid = %uid, "Tube deleted");
        Ok(())
    }

    /// Flip the display flag of a tube of the active image. Local only.
    /// Returns whether such a tube exists.
    pub fn toggle_visibility(&self, uid: TubeUid) -> bool {
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        let Selection::Active(id) = &state.selection else {
            return false;
        };
        let Some(Slot::Loaded(record)) = state.slots.get_mut(id) else {
            return false;
        };
        let Some(tube) = record.tubes.iter_mut().find(|tube| tube.uid() == uid) else {
            return false;
        };
        tube.toggle_visible();
        self.publish(record.tubes.clone());
        true
    }

    /// Ask the backend to write the active image's tubes to `path`.
    pub async fn save_tubes(&self, path: &str) -> Result<()> {
        let outcome = self.try_save_tubes(path).await;
        self.surface(outcome)
    }

    async fn try_save_tubes(&self, path: &str) -> Result<()> {
        let image = {
            let state = lock(&self.state);
            let Some((_, record)) = state.active_record() else {
                return Err(EditorError::NoActiveImage);
            };
            record.image
        };
        self.api.save_tubes(image, path).await?;
        info!(image = %image, path, "Tubes saved");
        Ok(())
    }

    /// Forget an image the front-end destroyed.
    ///
    /// A loaded image is unloaded on the backend first and evicted once that
    /// call resolves, even if it failed. An image still loading is dropped at
    /// once; if its load succeeds anyway, the image is unloaded.
    pub async fn deregister_image(&self, id: &EntityId) -> Result<()> {
        let outcome = self.try_deregister_image(id).await;
        self.surface(outcome)
    }

    async fn try_deregister_image(&self, id: &EntityId) -> Result<()> {
        enum Teardown {
            Unload(ImageId),
            Abandon(SharedLoad),
        }

        let teardown = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            match state.slots.get_mut(id) {
                None => return Ok(()),
                Some(Slot::Loaded(record)) => {
                    if record.unloading {
                        return Ok(());
                    }
                    record.unloading = true;
                    Teardown::Unload(record.image)
                }
                Some(Slot::Loading { .. }) => match state.slots.remove(id) {
                    Some(Slot::Loading { load, .. }) => Teardown::Abandon(load),
                    _ => return Ok(()),
                },
            }
        };

        match teardown {
            Teardown::Unload(image) => {
                info!(entity = %id, image = %image, "Unloading image");
                let unloaded = self.api.unload_image(image).await;
                self.evict(id, image);
                unloaded.map_err(EditorError::from)
            }
            Teardown::Abandon(load) => {
                info!(entity = %id, "Image deregistered while loading");
                match load.await {
                    Ok(image) => {
                        debug!(entity = %id, image = %image, "Unloading image that finished loading late");
                        self.api.unload_image(image).await?;
                    }
                    Err(err) => debug!(entity = %id, error = %err, "Abandoned load failed"),
                }
                Ok(())
            }
        }
    }

    fn evict(&self, id: &EntityId, image: ImageId) {
        let mut state = lock(&self.state);
        if matches!(state.slots.get(id), Some(Slot::Loaded(record)) if record.image == image) {
            state.slots.remove(id);
            debug!(entity = %id, image = %image, "Image evicted");
        }
        if state.selection.is(id) {
            state.clear_selection();
            self.publish(Vec::new());
        }
    }

    /// Deregister every image not in `live`. Returns how many were dropped.
    ///
    /// All images are evicted even if some unloads fail; the first failure is
    /// returned.
    pub async fn retain_images(&self, live: &HashSet<EntityId>) -> Result<usize> {
        let doomed: Vec<EntityId> = lock(&self.state)
            .slots
            .keys()
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect();

        let outcomes = join_all(doomed.iter().map(|id| self.deregister_image(id))).await;
        outcomes.into_iter().find_map(Result::err).map_or(Ok(doomed.len()), Err)
    }

    /// Switch segmentation on or off. Switching on needs a selected image.
    pub fn set_segmentation_enabled(&self, enabled: bool) -> Result<()> {
        let outcome = {
            let mut state = lock(&self.state);
            if enabled && state.active_record().is_none() {
                Err(EditorError::NoActiveImage)
            } else {
                state.segmentation_enabled = enabled;
                Ok(())
            }
        };
        self.surface(outcome)
    }

    /// Set the segmentation scale from user text. Invalid text keeps the
    /// previous scale.
    pub fn set_scale_text(&self, text: &str) -> Result<f64> {
        let outcome = parse_scale(text).map_err(EditorError::from).map(|scale| {
            let mut state = lock(&self.state);
            state.scale = scale;
            state.scale_text = text.to_string();
            scale
        });
        self.surface(outcome)
    }
}

impl fmt::Debug for SegmentationEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SegmentationEditor")
            .field("selection", &state.selection)
            .field("images", &state.slots.len())
            .field("segmentation_enabled", &state.segmentation_enabled)
            .field("scale", &state.scale)
            .finish_non_exhaustive()
    }
}
