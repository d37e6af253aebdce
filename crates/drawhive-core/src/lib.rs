//! Drawhive core: the replicated canvas state machine of a collaborative
//! painting session.
//!
//! Every participant feeds the same ordered command stream into a
//! [`CanvasModel`] and ends up with the same canvas. The model filters
//! commands through access control, applies drawing commands to a layer
//! stack, keeps an undoable history and can produce a snapshot that
//! rebuilds the session from scratch.

pub mod acl;
pub mod canvas;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod model;
pub mod paint;
pub mod presence;
pub mod protocol;
pub mod recording;
pub mod selection;
pub mod snapshot;
pub mod tracker;
pub mod users;

pub use acl::{AclChange, AclFilter, Feature, RejectReason, Tier, Verdict};
pub use canvas::{Annotation, Layer, LayerStack};
pub use config::{ConfigError, SessionConfig};
pub use error::{Error, Result};
pub use events::CanvasEvent;
pub use model::{CanvasModel, Handled, SessionMode};
pub use paint::{Bitmap, BlendMode, PaintEngine, SoftwareEngine};
pub use protocol::{Command, CommandKind, LayerId, UserId};
pub use recording::{JsonLinesRecorder, MemoryRecorder, RecordedCommand, Recorder};
pub use selection::Selection;
