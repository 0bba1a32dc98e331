//! Segmented tubes and the values exchanged with the backend about them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire sentinel for "no tube extracted" and "no parent".
pub const NO_TUBE: i64 = -1;

/// Segmentation scale used until the user enters one.
pub const DEFAULT_SCALE: f64 = 2.0;

/// A world-space point.
pub type Point3 = [f64; 3];

/// Backend-assigned tube identity, unique within one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TubeUid(pub u64);

impl fmt::Display for TubeUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of an image loaded on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub i64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised when building tubes or segmentation parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TubeError {
    /// Every point needs exactly one radius.
    #[error("Tube has {points} points but {radii} radii")]
    LengthMismatch {
        /// Number of points.
        points: usize,
        /// Number of radii.
        radii: usize,
    },

    /// Uids are non-negative apart from the sentinel.
    #[error("Invalid tube uid: {0}")]
    InvalidUid(i64),

    /// Scale text is not a positive decimal.
    #[error("Invalid scale: {0:?}")]
    InvalidScale(String),
}

/// Result of `app.segment` as sent by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TubeReply {
    /// Tube uid, or [`NO_TUBE`].
    pub uid: i64,
    /// Parent uid, or [`NO_TUBE`] for a root tube.
    #[serde(default = "no_parent")]
    pub parent: i64,
    /// Centerline points.
    #[serde(default)]
    pub points: Vec<Point3>,
    /// Radius at each point.
    #[serde(default)]
    pub radii: Vec<f64>,
}

fn no_parent() -> i64 {
    NO_TUBE
}

impl TubeReply {
    /// Reply meaning nothing was extracted.
    pub fn none() -> Self {
        Self { uid: NO_TUBE, parent: NO_TUBE, points: Vec::new(), radii: Vec::new() }
    }
}

/// A tube held by the editor. Points and radii always have the same length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tube {
    uid: TubeUid,
    parent: Option<TubeUid>,
    points: Vec<Point3>,
    radii: Vec<f64>,
    visible: bool,
}

impl Tube {
    /// Build a visible tube.
    pub fn new(uid: TubeUid, parent: Option<TubeUid>, points: Vec<Point3>, radii: Vec<f64>) -> Result<Self, TubeError> {
        if points.len() != radii.len() {
            return Err(TubeError::LengthMismatch { points: points.len(), radii: radii.len() });
        }
        Ok(Self { uid, parent, points, radii, visible: true })
    }

    /// Convert a segment reply. `Ok(None)` when the backend found no tube.
    pub fn from_reply(reply: TubeReply) -> Result<Option<Self>, TubeError> {
        if reply.uid == NO_TUBE {
            return Ok(None);
        }
        let uid = u64::try_from(reply.uid).map_err(|_| TubeError::InvalidUid(reply.uid))?;
        let parent = u64::try_from(reply.parent).ok().map(TubeUid);
        Self::new(TubeUid(uid), parent, reply.points, reply.radii).map(Some)
    }

    pub fn uid(&self) -> TubeUid {
        self.uid
    }

    pub fn parent(&self) -> Option<TubeUid> {
        self.parent
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    /// Display flag. Never sent to the backend.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn toggle_visible(&mut self) {
        self.visible = !self.visible;
    }
}

/// Parse user-entered scale text.
///
/// Accepts an empty string (meaning [`DEFAULT_SCALE`]) or a positive decimal
/// such as `3`, `2.5`, `4.` or `.5`.
pub fn parse_scale(text: &str) -> Result<f64, TubeError> {
    if text.is_empty() {
        return Ok(DEFAULT_SCALE);
    }

    let mut dots = 0;
    let mut digits = 0;
    for c in text.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return Err(TubeError::InvalidScale(text.to_string())),
        }
    }
    if dots > 1 || digits == 0 {
        return Err(TubeError::InvalidScale(text.to_string()));
    }

    match text.parse::<f64>() {
        Ok(scale) if scale.is_finite() && scale > 0.0 => Ok(scale),
        _ => Err(TubeError::InvalidScale(text.to_string())),
    }
}
