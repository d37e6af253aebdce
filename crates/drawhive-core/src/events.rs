//! Notifications emitted by the canvas model.

use crate::acl::AclChange;
use crate::protocol::{LayerId, UserId};
use kurbo::Point;

/// Something observers of the canvas may want to react to.
///
/// Events are queued in processing order and drained with
/// [`CanvasModel::take_events`](crate::CanvasModel::take_events).
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasEvent {
    UserJoined { id: UserId, name: String },
    /// `name` is `None` when the user was not known.
    UserLeft { id: UserId, name: Option<String> },
    ChatReceived {
        user: UserId,
        flags: u8,
        message: String,
    },
    /// `None` when the pin was removed.
    PinnedMessageChanged(Option<String>),
    MarkerReceived { user: UserId, text: String },
    PointerMoved { user: UserId, position: Point },
    LaserTrailStarted {
        user: UserId,
        color: u32,
        persistence: u8,
    },
    UserMarkerMoved {
        user: UserId,
        layer: LayerId,
        position: Point,
    },
    UserMarkerHidden(UserId),
    DefaultLayerChanged(LayerId),
    /// The local user should switch to this layer.
    LayerAutoselectRequest(LayerId),
    CanvasModified,
    CanvasResized { offset_x: i32, offset_y: i32 },
    SelectionChanged,
    SelectionRemoved,
    TitleChanged(String),
    Acl(AclChange),
    CatchupProgress(u8),
}
