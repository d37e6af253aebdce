//! Command sequences that rebuild a canvas from empty.

use crate::acl::{AclFilter, Feature, Tier};
use crate::canvas::LayerStack;
use crate::history::HistoryLog;
use crate::paint::BlendMode;
use crate::protocol::{Command, CommandKind, LayerId, UserId};

/// Build a snapshot from the current canvas content.
///
/// The sequence resizes the canvas, sets the background, recreates every
/// layer bottom to top with its pixels and attributes and recreates the
/// annotations. A soft reset then closes the history so nothing before it
/// can be undone, and the default layer and access controls come last.
///
/// The participant sending the snapshot must fold its own history the same
/// way, see [`crate::CanvasModel::generate_snapshot`].
pub fn from_canvas(
    stack: &LayerStack,
    acl: &AclFilter,
    default_layer: LayerId,
    context_id: UserId,
) -> Vec<Command> {
    let cmd = |kind| Command::new(context_id, kind);
    let mut out = Vec::new();

    if !stack.is_empty() {
        out.push(cmd(CommandKind::CanvasResize {
            top: 0,
            right: stack.width() as i32,
            bottom: stack.height() as i32,
            left: 0,
        }));
    }
    out.push(cmd(CommandKind::CanvasBackground {
        color: stack.background(),
    }));

    for layer in stack.layers() {
        let pixels = layer.pixels();
        // A uniform layer is recreated by its fill color alone
        let uniform = pixels
            .pixels()
            .first()
            .copied()
            .filter(|first| pixels.pixels().iter().all(|p| p == first));

        out.push(cmd(CommandKind::LayerCreate {
            layer: layer.id(),
            source: 0,
            fill: uniform.unwrap_or(0),
            flags: 0,
            title: layer.title.clone(),
        }));
        if !layer.has_default_attributes() {
            out.push(cmd(CommandKind::LayerAttributes {
                layer: layer.id(),
                flags: layer.flags(),
                opacity: layer.opacity,
                blend: layer.blend,
            }));
        }
        if uniform.is_some() {
            continue;
        }
        if let Some((x, y, width, height)) = pixels.opaque_bounds() {
            let region = pixels.copy(x as i64, y as i64, width, height);
            out.push(cmd(CommandKind::PutImage {
                layer: layer.id(),
                mode: BlendMode::Replace,
                x,
                y,
                width,
                height,
                pixels: region.to_argb_bytes(),
            }));
        }
    }

    for a in stack.annotations() {
        out.push(cmd(CommandKind::AnnotationCreate {
            id: a.id(),
            x: a.x,
            y: a.y,
            width: a.width,
            height: a.height,
        }));
        out.push(cmd(CommandKind::AnnotationEdit {
            id: a.id(),
            background: a.background,
            flags: a.flags(),
            text: a.text.clone(),
        }));
    }

    out.push(cmd(CommandKind::SoftReset));

    if default_layer > 0 {
        out.push(cmd(CommandKind::DefaultLayer {
            layer: default_layer,
        }));
    }
    out.extend(acl_commands(stack, acl, context_id));
    out
}

/// Build a snapshot by reusing the history log.
///
/// Only valid while the log is complete. Every entry is replayed, and each
/// undone entry is followed by an undo from its author, so the receiver ends
/// up with the same live and undone entries and can redo them. The entries
/// are prefixed with the default layer selection and followed by the access
/// controls that differ from the defaults.
pub fn from_history(
    history: &HistoryLog,
    stack: &LayerStack,
    acl: &AclFilter,
    default_layer: LayerId,
    context_id: UserId,
) -> Vec<Command> {
    debug_assert!(history.is_complete());
    let mut out = Vec::with_capacity(history.len() + 2);
    if default_layer > 0 {
        out.push(Command::new(
            context_id,
            CommandKind::DefaultLayer {
                layer: default_layer,
            },
        ));
    }
    for entry in history.entries() {
        out.push(entry.command.clone());
        if !entry.is_live() {
            // The entry just applied is its author's newest undo target
            out.push(Command::new(
                entry.command.context_id,
                CommandKind::Undo {
                    override_user: 0,
                    redo: false,
                },
            ));
        }
    }
    out.extend(acl_commands(stack, acl, context_id));
    out
}

/// Commands restoring every non-default access control setting.
///
/// Layer entries are only emitted for layers that exist in `stack`.
fn acl_commands(stack: &LayerStack, acl: &AclFilter, context_id: UserId) -> Vec<Command> {
    let mut out = Vec::new();

    if Feature::ALL
        .iter()
        .any(|f| acl.feature_tier(*f) != f.default_tier())
    {
        out.push(Command::new(
            context_id,
            CommandKind::FeatureLevels {
                tiers: Feature::ALL.iter().map(|f| acl.feature_tier(*f)).collect(),
            },
        ));
    }

    if acl.is_session_locked() {
        out.push(Command::new(
            context_id,
            CommandKind::LayerAcl {
                layer: 0,
                locked: true,
                tier: Tier::Guest,
                exclusive: Vec::new(),
            },
        ));
    }

    for layer in stack.layers() {
        let entry = acl.layer_acl(layer.id());
        if !entry.is_restricted() {
            continue;
        }
        out.push(Command::new(
            context_id,
            CommandKind::LayerAcl {
                layer: layer.id(),
                locked: entry.locked,
                tier: entry.tier,
                exclusive: entry.exclusive.iter().copied().collect(),
            },
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::SoftwareEngine;

    fn apply_all(commands: &[Command]) -> LayerStack {
        let mut stack = LayerStack::new();
        for cmd in commands.iter().filter(|c| c.is_drawing()) {
            stack.apply(&SoftwareEngine, cmd);
        }
        stack
    }

    fn sample_stack() -> LayerStack {
        apply_all(&[
            Command::new(1, CommandKind::CanvasResize {
                top: 0,
                right: 6,
                bottom: 4,
                left: 0,
            }),
            Command::new(1, CommandKind::CanvasBackground { color: 0xffffffff }),
            Command::new(1, CommandKind::LayerCreate {
                layer: 0x0101,
                source: 0,
                fill: 0xff202020,
                flags: 0,
                title: "Base".into(),
            }),
            Command::new(1, CommandKind::LayerCreate {
                layer: 0x0102,
                source: 0,
                fill: 0,
                flags: 0,
                title: "Ink".into(),
            }),
            Command::new(1, CommandKind::FillRect {
                layer: 0x0102,
                mode: BlendMode::Normal,
                x: 1,
                y: 1,
                width: 2,
                height: 2,
                color: 0x80ff0000,
            }),
            Command::new(1, CommandKind::LayerAttributes {
                layer: 0x0102,
                flags: 0,
                opacity: 128,
                blend: BlendMode::Multiply,
            }),
            Command::new(1, CommandKind::AnnotationCreate {
                id: 0x0101,
                x: 0,
                y: 0,
                width: 3,
                height: 3,
            }),
        ])
    }

    #[test]
    fn test_canvas_round_trip() {
        let stack = sample_stack();
        let acl = AclFilter::new(1);
        let snapshot = from_canvas(&stack, &acl, 0x0102, 1);
        assert_eq!(apply_all(&snapshot), stack);
        assert!(matches!(
            snapshot.last().map(|c| &c.kind),
            Some(CommandKind::DefaultLayer { layer: 0x0102 })
        ));
    }

    #[test]
    fn test_uniform_layer_has_no_image() {
        let stack = sample_stack();
        let snapshot = from_canvas(&stack, &AclFilter::new(1), 0, 1);
        let images: Vec<_> = snapshot
            .iter()
            .filter_map(|c| match &c.kind {
                CommandKind::PutImage { layer, .. } => Some(*layer),
                _ => None,
            })
            .collect();
        assert_eq!(images, vec![0x0102]);
    }

    #[test]
    fn test_canvas_snapshot_closes_history() {
        let snapshot = from_canvas(&sample_stack(), &AclFilter::new(1), 0x0102, 1);
        let kinds: Vec<_> = snapshot.iter().rev().take(2).map(|c| &c.kind).collect();
        assert!(matches!(kinds[0], CommandKind::DefaultLayer { .. }));
        assert!(matches!(kinds[1], CommandKind::SoftReset));
    }

    #[test]
    fn test_history_keeps_undone_entries() {
        let fill = |user, color| {
            Command::new(user, CommandKind::FillRect {
                layer: 0x0101,
                mode: BlendMode::Normal,
                x: 0,
                y: 0,
                width: 1,
                height: 1,
                color,
            })
        };
        let mut history = HistoryLog::new();
        history.push(fill(1, 0xff0000ff), true);
        let undone = history.push(fill(2, 0xff00ff00), false);
        history.push(fill(1, 0xffff0000), true);
        history.set_state(undone, crate::history::UndoState::Undone);

        let snapshot = from_history(&history, &LayerStack::new(), &AclFilter::new(1), 0, 1);
        let shape: Vec<_> = snapshot
            .iter()
            .map(|c| match c.kind {
                CommandKind::FillRect { color, .. } => (c.context_id, Some(color)),
                CommandKind::Undo { override_user: 0, redo: false } => (c.context_id, None),
                _ => panic!("unexpected {}", c.name()),
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                (1, Some(0xff0000ff)),
                (2, Some(0xff00ff00)),
                (2, None),
                (1, Some(0xffff0000)),
            ]
        );
    }

    #[test]
    fn test_acl_suffix() {
        let stack = apply_all(&[
            Command::new(1, CommandKind::CanvasResize {
                top: 0,
                right: 2,
                bottom: 2,
                left: 0,
            }),
            Command::new(1, CommandKind::LayerCreate {
                layer: 3,
                source: 0,
                fill: 0,
                flags: 0,
                title: "Locked".into(),
            }),
        ]);
        let mut acl = AclFilter::new(1);
        // Layer 5 is not part of the canvas and must not be restored
        for layer in [3, 5, 0] {
            acl.evaluate(&Command::new(
                1,
                CommandKind::LayerAcl {
                    layer,
                    locked: true,
                    tier: Tier::Guest,
                    exclusive: Vec::new(),
                },
            ));
        }
        let commands = acl_commands(&stack, &acl, 1);
        let layers: Vec<_> = commands
            .iter()
            .filter_map(|c| match c.kind {
                CommandKind::LayerAcl { layer, .. } => Some(layer),
                _ => None,
            })
            .collect();
        assert_eq!(layers, vec![0, 3]);
    }
}
