//! Applies drawing commands in arrival order and implements undo by replay.
//!
//! The canvas is always equal to the baseline plus every live history entry
//! applied in sequence order. Undo and redo flip one entry and rebuild the
//! canvas from the nearest savepoint, so commands other users sent after the
//! undone one keep their effect.

use crate::canvas::{LayerStack, StackChange};
use crate::config::{ConfigResult, SessionConfig};
use crate::history::{HistoryLog, Seq, UndoState};
use crate::paint::PaintEngine;
use crate::protocol::{Command, CommandKind, LayerId, UserId};
use std::collections::BTreeSet;

/// Side effects of applying commands, drained by the canvas model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEffect {
    /// Canvas size changed; old content moved by the offset.
    CanvasResized { offset_x: i32, offset_y: i32 },
    /// The local user created a layer and should switch to it.
    LayerAutoselect(LayerId),
    /// A user's brush moved.
    UserMarkerMoved {
        user: UserId,
        layer: LayerId,
        x: i32,
        y: i32,
    },
    /// A user's brush marker should disappear.
    UserMarkerHidden(UserId),
    /// Session download progress in percent.
    CatchupProgress(u8),
}

/// Owner of the canvas content and its history.
pub struct StateTracker {
    engine: Box<dyn PaintEngine>,
    config: SessionConfig,
    stack: LayerStack,
    history: HistoryLog,
    local_id: UserId,
    participated: bool,
    show_all_markers: bool,
    /// Users with a stroke in progress.
    drawing: BTreeSet<UserId>,
    effects: Vec<TrackerEffect>,
}

impl StateTracker {
    /// Fails when the configuration does not validate.
    pub fn new(
        local_id: UserId,
        config: SessionConfig,
        engine: Box<dyn PaintEngine>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            config,
            stack: LayerStack::new(),
            history: HistoryLog::new(),
            local_id,
            participated: false,
            show_all_markers: false,
            drawing: BTreeSet::new(),
            effects: Vec::new(),
        })
    }

    pub fn stack(&self) -> &LayerStack {
        &self.stack
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn engine(&self) -> &dyn PaintEngine {
        self.engine.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn local_id(&self) -> UserId {
        self.local_id
    }

    pub fn set_local_id(&mut self, id: UserId) {
        self.local_id = id;
    }

    /// Whether the local user has sent any drawing command since the last
    /// reset.
    pub fn has_participated(&self) -> bool {
        self.participated
    }

    /// Whether the history rebuilds the canvas from empty.
    pub fn has_full_history(&self) -> bool {
        self.history.is_complete()
    }

    pub fn set_show_all_user_markers(&mut self, show: bool) {
        self.show_all_markers = show;
    }

    pub fn take_effects(&mut self) -> Vec<TrackerEffect> {
        std::mem::take(&mut self.effects)
    }

    /// Clear canvas and history.
    pub fn reset(&mut self) {
        self.stack = LayerStack::new();
        self.history.clear();
        self.participated = false;
        self.drawing.clear();
    }

    /// Apply a command from another participant (or from the server).
    ///
    /// Replicated undo requests rewrite the history of the user they target
    /// and are not logged themselves.
    pub fn apply_remote(&mut self, cmd: Command) {
        match cmd.kind {
            CommandKind::Catchup { .. } | CommandKind::SoftReset => self.handle_internal(&cmd),
            CommandKind::Undo {
                override_user,
                redo,
            } => {
                let target = if override_user != 0 {
                    override_user
                } else {
                    cmd.context_id
                };
                self.flip(target, redo, false);
            }
            _ => self.append(cmd, false),
        }
    }

    /// Apply a command made by the local user.
    pub fn apply_local(&mut self, cmd: Command) {
        self.participated = true;
        match cmd.kind {
            CommandKind::Undo { redo, .. } => {
                self.flip(self.local_id, redo, true);
            }
            _ => {
                let undoable = cmd.kind.is_undoable();
                self.append(cmd, undoable);
            }
        }
    }

    /// Undo the local user's most recent live action. Returns false if
    /// there was nothing to undo.
    pub fn undo(&mut self) -> bool {
        self.flip(self.local_id, false, true)
    }

    /// Redo the local user's most recently undone action. Returns false if
    /// there was nothing to redo.
    pub fn redo(&mut self) -> bool {
        self.flip(self.local_id, true, true)
    }

    /// Hide the markers of every remote user, e.g. after a disconnect.
    pub fn end_remote_contexts(&mut self) {
        let local = self.local_id;
        let remote: Vec<UserId> = self.drawing.iter().copied().filter(|u| *u != local).collect();
        for user in remote {
            self.drawing.remove(&user);
            self.effects.push(TrackerEffect::UserMarkerHidden(user));
        }
    }

    /// End every stroke in progress when a recording stops.
    pub fn end_playback(&mut self) {
        for user in std::mem::take(&mut self.drawing) {
            self.effects.push(TrackerEffect::UserMarkerHidden(user));
        }
    }

    /// Internal commands are synthesized locally and never logged.
    pub fn handle_internal(&mut self, cmd: &Command) {
        match cmd.kind {
            CommandKind::Catchup { progress } => {
                self.effects
                    .push(TrackerEffect::CatchupProgress(progress.min(100)));
            }
            CommandKind::SoftReset => {
                let end = self.history.next_seq();
                log::debug!("Soft reset: folding {} history entries", self.history.len());
                self.history.fold_before(end, self.stack.clone());
            }
            _ => {
                debug_assert!(false, "{} is not an internal command", cmd.name());
                log::warn!("Ignoring non-internal command {}", cmd.name());
            }
        }
    }

    fn append(&mut self, cmd: Command, undoable: bool) {
        let seq = self.history.next_seq();
        if seq % self.config.savepoint_interval == 0 {
            self.history.add_savepoint(seq, self.stack.clone());
        }

        let change = self.stack.apply(self.engine.as_ref(), &cmd);
        self.report(&cmd, change);
        self.history.push(cmd, undoable);

        if self.history.len() > self.config.compaction_threshold {
            self.compact();
        }
    }

    fn report(&mut self, cmd: &Command, change: StackChange) {
        let user = cmd.context_id;
        if let StackChange::Resized { offset_x, offset_y } = change {
            self.effects
                .push(TrackerEffect::CanvasResized { offset_x, offset_y });
        }

        match &cmd.kind {
            CommandKind::LayerCreate { layer, .. }
                if user == self.local_id && change == StackChange::Layers =>
            {
                self.effects.push(TrackerEffect::LayerAutoselect(*layer));
            }
            CommandKind::DrawDabs {
                layer, x, y, dabs, ..
            } => {
                if user != self.local_id || self.show_all_markers {
                    let (dx, dy) = dabs.iter().fold((0i64, 0i64), |(ax, ay), d| {
                        (ax + d.x as i64, ay + d.y as i64)
                    });
                    self.drawing.insert(user);
                    self.effects.push(TrackerEffect::UserMarkerMoved {
                        user,
                        layer: *layer,
                        x: clamp_coordinate(*x as i64 + dx),
                        y: clamp_coordinate(*y as i64 + dy),
                    });
                }
            }
            CommandKind::PenUp => {
                if self.drawing.remove(&user) {
                    self.effects.push(TrackerEffect::UserMarkerHidden(user));
                }
            }
            _ => {}
        }
    }

    /// Undo or redo one entry of `user`, then rebuild the canvas.
    fn flip(&mut self, user: UserId, redo: bool, local: bool) -> bool {
        let depth = self.config.undo_depth;
        let target = if redo {
            self.history.find_redo(user, depth, local)
        } else {
            self.history.find_undo(user, depth, local)
        };
        let Some(seq) = target else {
            log::debug!(
                "Nothing to {} for user {user}",
                if redo { "redo" } else { "undo" }
            );
            return false;
        };

        let state = if redo {
            UndoState::Live
        } else {
            UndoState::Undone
        };
        self.history.set_state(seq, state);
        self.replay_from(seq);
        true
    }

    /// Rebuild the canvas after the entry `seq` changed state.
    fn replay_from(&mut self, seq: Seq) {
        let savepoint = self.history.savepoint_before(seq);
        let start = savepoint.seq;
        let mut stack = savepoint.stack.clone();
        let interval = self.config.savepoint_interval;

        let mut savepoints = Vec::new();
        let mut replayed = 0usize;
        for entry in self.history.entries().iter().filter(|e| e.seq >= start) {
            if entry.seq > seq && entry.seq % interval == 0 {
                savepoints.push((entry.seq, stack.clone()));
            }
            if entry.is_live() {
                stack.apply(self.engine.as_ref(), &entry.command);
                replayed += 1;
            }
        }
        log::debug!("Replayed {replayed} entries from savepoint {start}");

        self.history.discard_savepoints_after(seq);
        for (sp_seq, sp_stack) in savepoints {
            self.history.add_savepoint(sp_seq, sp_stack);
        }

        let old_size = (self.stack.width(), self.stack.height());
        self.stack = stack;
        if old_size != (self.stack.width(), self.stack.height()) {
            self.report_replayed_resize(seq);
        }
    }

    fn report_replayed_resize(&mut self, seq: Seq) {
        let Some(entry) = self.history.entry(seq) else {
            return;
        };
        let (offset_x, offset_y) = match entry.command.kind {
            CommandKind::CanvasResize { top, left, .. } if entry.is_live() => (left, top),
            CommandKind::CanvasResize { top, left, .. } => (-left, -top),
            _ => (0, 0),
        };
        self.effects
            .push(TrackerEffect::CanvasResized { offset_x, offset_y });
    }

    /// Canvas state just before entry `seq`.
    fn state_before(&self, seq: Seq) -> LayerStack {
        if seq >= self.history.next_seq() {
            return self.stack.clone();
        }
        let savepoint = self.history.savepoint_before(seq);
        let mut stack = savepoint.stack.clone();
        for entry in self
            .history
            .entries()
            .iter()
            .filter(|e| e.seq >= savepoint.seq && e.seq < seq && e.is_live())
        {
            stack.apply(self.engine.as_ref(), &entry.command);
        }
        stack
    }

    /// Fold entries no undo can reach into the baseline.
    fn compact(&mut self) {
        let fold = self.history.fold_point(self.config.undo_depth);
        let folded = self
            .history
            .entries()
            .iter()
            .take_while(|e| e.seq < fold)
            .count();
        if folded == 0 {
            return;
        }
        let baseline = self.state_before(fold);
        self.history.fold_before(fold, baseline);
        log::debug!(
            "Compacted {folded} history entries, {} remain",
            self.history.len()
        );
    }
}

fn clamp_coordinate(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}
