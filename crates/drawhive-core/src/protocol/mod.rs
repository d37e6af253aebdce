//! Command types exchanged between session participants.
//!
//! A [`Command`] is the unit of replication. Every participant receives the
//! same commands in the same order, which is what makes the canvas converge.
//!
//! Commands fall in three categories:
//! - **internal**: synthesized locally, never filtered
//! - **meta**: session bookkeeping (users, permissions, chat, pointers)
//! - **drawing**: changes to the canvas content, kept in the history log

mod bytes;

use crate::acl::Tier;
use crate::paint::BlendMode;
use serde::{Deserialize, Serialize};

/// Session-unique participant id. Zero is reserved for the server.
pub type UserId = u8;

/// Layer id. Top-level layers carry their creator's id in the high byte.
pub type LayerId = u16;

/// Annotation id. Like layers, the high byte is the creator's id.
pub type AnnotationId = u16;

/// Context id used by messages originating from the server itself.
pub const SERVER_ID: UserId = 0;

/// Flags for [`CommandKind::UserJoin`].
pub mod join_flags {
    /// The user is logged in with a registered account.
    pub const AUTH: u8 = 0x01;
    /// The user is a server-wide moderator.
    pub const MOD: u8 = 0x02;
    /// The user is a bot.
    pub const BOT: u8 = 0x04;
}

/// Flags for [`CommandKind::Chat`].
pub mod chat_flags {
    pub const BYPASS: u8 = 0x01;
    pub const SHOUT: u8 = 0x02;
    pub const ACTION: u8 = 0x04;
    /// Pin the message. The text `"-"` removes the current pin.
    pub const PIN: u8 = 0x08;
}

/// Flags for [`CommandKind::LayerCreate`].
pub mod layer_create_flags {
    /// Copy the content of the source layer.
    pub const COPY: u8 = 0x01;
    /// Insert above the source layer instead of at the top.
    pub const INSERT: u8 = 0x02;
}

/// Flags for [`CommandKind::LayerAttributes`].
pub mod layer_attr_flags {
    pub const CENSOR: u8 = 0x01;
    pub const FIXED: u8 = 0x02;
}

/// Flags for [`CommandKind::AnnotationEdit`].
pub mod annotation_flags {
    pub const PROTECT: u8 = 0x01;
}

/// A single dab of a classic brush stroke.
///
/// Positions are offsets from the previous dab (the first one is relative
/// to the command origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicDab {
    pub x: i32,
    pub y: i32,
    /// Dab diameter in pixels.
    pub size: u16,
    /// 0 is fully soft, 255 is a hard edge.
    pub hardness: u8,
    pub opacity: u8,
}

/// Broad category of a command, deciding how the canvas model routes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Internal,
    Meta,
    Drawing,
}

/// An immutable command tagged with its originating participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Originating user.
    pub context_id: UserId,
    #[serde(flatten)]
    pub kind: CommandKind,
}

/// The closed set of command kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    // --- Internal ---
    /// Progress of the initial session download (0-100).
    Catchup { progress: u8 },
    /// The server reset its history: nothing before this point can be undone.
    SoftReset,

    // --- Meta ---
    UserJoin {
        name: String,
        #[serde(with = "bytes", default)]
        avatar: Vec<u8>,
        flags: u8,
    },
    UserLeave,
    SessionOwner { users: Vec<UserId> },
    TrustedUsers { users: Vec<UserId> },
    /// Users whose drawing rights are revoked.
    UserAcl { users: Vec<UserId> },
    /// Minimum tier for each [`Feature`](crate::acl::Feature), in feature order.
    FeatureLevels { tiers: Vec<Tier> },
    LayerAcl {
        layer: LayerId,
        locked: bool,
        tier: Tier,
        exclusive: Vec<UserId>,
    },
    Chat { flags: u8, message: String },
    /// Recording timing hint.
    Interval { msecs: u16 },
    LaserTrail { color: u32, persistence: u8 },
    /// Pointer position in quarter pixels.
    MovePointer { x: i32, y: i32 },
    Marker { text: String },
    DefaultLayer { layer: LayerId },

    // --- Drawing ---
    CanvasResize {
        top: i32,
        right: i32,
        bottom: i32,
        left: i32,
    },
    CanvasBackground { color: u32 },
    LayerCreate {
        layer: LayerId,
        source: LayerId,
        fill: u32,
        flags: u8,
        title: String,
    },
    LayerAttributes {
        layer: LayerId,
        flags: u8,
        opacity: u8,
        blend: BlendMode,
    },
    LayerRetitle { layer: LayerId, title: String },
    LayerOrder { order: Vec<LayerId> },
    LayerDelete { layer: LayerId, merge: bool },
    PutImage {
        layer: LayerId,
        mode: BlendMode,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        /// Non-premultiplied ARGB pixels, four bytes each, big endian.
        #[serde(with = "bytes")]
        pixels: Vec<u8>,
    },
    FillRect {
        layer: LayerId,
        mode: BlendMode,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        color: u32,
    },
    DrawDabs {
        layer: LayerId,
        x: i32,
        y: i32,
        color: u32,
        mode: BlendMode,
        dabs: Vec<ClassicDab>,
    },
    PenUp,
    AnnotationCreate {
        id: AnnotationId,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    AnnotationReshape {
        id: AnnotationId,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    AnnotationEdit {
        id: AnnotationId,
        background: u32,
        flags: u8,
        text: String,
    },
    AnnotationDelete { id: AnnotationId },
    /// Undo or redo the latest action of `override_user` (or of the sender
    /// when zero).
    Undo { override_user: UserId, redo: bool },
}

impl Command {
    pub fn new(context_id: UserId, kind: CommandKind) -> Self {
        Self { context_id, kind }
    }

    pub fn category(&self) -> Category {
        self.kind.category()
    }

    pub fn is_meta(&self) -> bool {
        self.category() == Category::Meta
    }

    pub fn is_drawing(&self) -> bool {
        self.category() == Category::Drawing
    }

    /// Human readable message type name, used in diagnostics.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// The layer this command paints on or edits, if any.
    pub fn target_layer(&self) -> Option<LayerId> {
        match &self.kind {
            CommandKind::LayerCreate { layer, .. }
            | CommandKind::LayerAttributes { layer, .. }
            | CommandKind::LayerRetitle { layer, .. }
            | CommandKind::LayerDelete { layer, .. }
            | CommandKind::PutImage { layer, .. }
            | CommandKind::FillRect { layer, .. }
            | CommandKind::DrawDabs { layer, .. } => Some(*layer),
            _ => None,
        }
    }
}

impl CommandKind {
    pub fn category(&self) -> Category {
        use CommandKind::*;
        match self {
            Catchup { .. } | SoftReset => Category::Internal,
            UserJoin { .. }
            | UserLeave
            | SessionOwner { .. }
            | TrustedUsers { .. }
            | UserAcl { .. }
            | FeatureLevels { .. }
            | LayerAcl { .. }
            | Chat { .. }
            | Interval { .. }
            | LaserTrail { .. }
            | MovePointer { .. }
            | Marker { .. }
            | DefaultLayer { .. } => Category::Meta,
            CanvasResize { .. }
            | CanvasBackground { .. }
            | LayerCreate { .. }
            | LayerAttributes { .. }
            | LayerRetitle { .. }
            | LayerOrder { .. }
            | LayerDelete { .. }
            | PutImage { .. }
            | FillRect { .. }
            | DrawDabs { .. }
            | PenUp
            | AnnotationCreate { .. }
            | AnnotationReshape { .. }
            | AnnotationEdit { .. }
            | AnnotationDelete { .. }
            | Undo { .. } => Category::Drawing,
        }
    }

    /// Whether a command of this kind can be the target of an undo.
    ///
    /// Pen-up markers and undo requests themselves are never undone.
    pub fn is_undoable(&self) -> bool {
        self.category() == Category::Drawing
            && !matches!(self, CommandKind::PenUp | CommandKind::Undo { .. })
    }

    pub fn name(&self) -> &'static str {
        use CommandKind::*;
        match self {
            Catchup { .. } => "Catchup",
            SoftReset => "SoftReset",
            UserJoin { .. } => "UserJoin",
            UserLeave => "UserLeave",
            SessionOwner { .. } => "SessionOwner",
            TrustedUsers { .. } => "TrustedUsers",
            UserAcl { .. } => "UserAcl",
            FeatureLevels { .. } => "FeatureLevels",
            LayerAcl { .. } => "LayerAcl",
            Chat { .. } => "Chat",
            Interval { .. } => "Interval",
            LaserTrail { .. } => "LaserTrail",
            MovePointer { .. } => "MovePointer",
            Marker { .. } => "Marker",
            DefaultLayer { .. } => "DefaultLayer",
            CanvasResize { .. } => "CanvasResize",
            CanvasBackground { .. } => "CanvasBackground",
            LayerCreate { .. } => "LayerCreate",
            LayerAttributes { .. } => "LayerAttributes",
            LayerRetitle { .. } => "LayerRetitle",
            LayerOrder { .. } => "LayerOrder",
            LayerDelete { .. } => "LayerDelete",
            PutImage { .. } => "PutImage",
            FillRect { .. } => "FillRect",
            DrawDabs { .. } => "DrawDabs",
            PenUp => "PenUp",
            AnnotationCreate { .. } => "AnnotationCreate",
            AnnotationReshape { .. } => "AnnotationReshape",
            AnnotationEdit { .. } => "AnnotationEdit",
            AnnotationDelete { .. } => "AnnotationDelete",
            Undo { .. } => "Undo",
        }
    }
}

/// Parse a list of commands from JSON lines, skipping blank lines.
pub fn commands_from_json_lines(input: &str) -> Result<Vec<Command>, serde_json::Error> {
    input
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

/// Serialize commands as JSON lines.
pub fn commands_to_json_lines(commands: &[Command]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for cmd in commands {
        out.push_str(&serde_json::to_string(cmd)?);
        out.push('\n');
    }
    Ok(out)
}
