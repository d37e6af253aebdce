//! The sequenced history of accepted drawing commands.
//!
//! The log stores entries and savepoints. It knows nothing about how to
//! apply commands; replay is driven by the [`StateTracker`](crate::tracker::StateTracker).

use crate::canvas::LayerStack;
use crate::protocol::{Command, UserId};

/// Sequence number of a history entry. Strictly increasing, never reused.
pub type Seq = u64;

/// Whether an entry currently contributes to the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoState {
    Live,
    Undone,
}

/// An accepted drawing command with its undo bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub seq: Seq,
    pub command: Command,
    /// Fixed at insertion. Only local commands of undoable kinds qualify.
    pub undoable: bool,
    pub state: UndoState,
}

impl HistoryEntry {
    pub fn is_live(&self) -> bool {
        self.state == UndoState::Live
    }

    /// Whether the entry is an undo target for `user`.
    ///
    /// Local undo only considers entries flagged undoable at insertion.
    /// Undo requests replicated from a participant consider that
    /// participant's entries of undoable kinds.
    fn is_undo_target(&self, user: UserId, local: bool) -> bool {
        self.command.context_id == user
            && self.command.kind.is_undoable()
            && (!local || self.undoable)
    }
}

/// Canvas state cached just before the entry with sequence number `seq`.
#[derive(Debug, Clone)]
pub struct Savepoint {
    pub seq: Seq,
    pub stack: LayerStack,
}

/// Ordered log of history entries plus the savepoints used to replay it.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    /// Always non-empty: the first savepoint is the baseline.
    savepoints: Vec<Savepoint>,
    next_seq: Seq,
    complete: bool,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryLog {
    /// Create an empty log starting from an empty canvas.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            savepoints: vec![Savepoint {
                seq: 0,
                stack: LayerStack::new(),
            }],
            next_seq: 0,
            complete: true,
        }
    }

    /// Drop every entry and savepoint. Sequence numbers keep counting.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.savepoints = vec![Savepoint {
            seq: self.next_seq,
            stack: LayerStack::new(),
        }];
        self.complete = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Live commands in sequence order.
    pub fn live_commands(&self) -> impl Iterator<Item = &Command> {
        self.entries
            .iter()
            .filter(|e| e.is_live())
            .map(|e| &e.command)
    }

    /// Sequence number the next entry will get.
    pub fn next_seq(&self) -> Seq {
        self.next_seq
    }

    /// True while nothing has been folded into the baseline since the last
    /// clear, i.e. the entries rebuild the canvas from empty.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn position(&self, seq: Seq) -> Option<usize> {
        self.entries.binary_search_by_key(&seq, |e| e.seq).ok()
    }

    pub fn entry(&self, seq: Seq) -> Option<&HistoryEntry> {
        self.position(seq).map(|i| &self.entries[i])
    }

    /// Append a command and return its sequence number.
    pub fn push(&mut self, command: Command, undoable: bool) -> Seq {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(HistoryEntry {
            seq,
            command,
            undoable,
            state: UndoState::Live,
        });
        seq
    }

    /// Change the state of an entry. Returns false if there is no such entry.
    pub fn set_state(&mut self, seq: Seq, state: UndoState) -> bool {
        match self.position(seq) {
            Some(i) => {
                self.entries[i].state = state;
                true
            }
            None => false,
        }
    }

    /// Undo targets of `user` among the `depth` most recent entries of
    /// undoable kinds, newest first.
    ///
    /// The window is shared by all users, so every participant agrees on
    /// what is still reachable.
    fn undo_window(
        &self,
        user: UserId,
        depth: usize,
        local: bool,
    ) -> impl Iterator<Item = &HistoryEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.command.kind.is_undoable())
            .take(depth)
            .filter(move |e| e.is_undo_target(user, local))
    }

    /// Most recent live undo target of `user` within the undo depth.
    pub fn find_undo(&self, user: UserId, depth: usize, local: bool) -> Option<Seq> {
        self.undo_window(user, depth, local)
            .find(|e| e.is_live())
            .map(|e| e.seq)
    }

    /// Entry a redo of `user` restores.
    ///
    /// This is the oldest entry of the run of undone targets at the tail, so
    /// redos happen in the reverse order of the undos. A newer live target
    /// ends the run.
    pub fn find_redo(&self, user: UserId, depth: usize, local: bool) -> Option<Seq> {
        self.undo_window(user, depth, local)
            .take_while(|e| !e.is_live())
            .last()
            .map(|e| e.seq)
    }

    /// Sequence number before which no undo or redo can reach: the oldest
    /// entry of the undo window. Returns `next_seq` when no entry can be
    /// undone at all.
    pub fn fold_point(&self, depth: usize) -> Seq {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.command.kind.is_undoable())
            .take(depth)
            .last()
            .map_or(self.next_seq, |e| e.seq)
    }

    /// The baseline: canvas state before the oldest entry.
    pub fn baseline(&self) -> &Savepoint {
        &self.savepoints[0]
    }

    /// Latest savepoint at or before `seq`.
    pub fn savepoint_before(&self, seq: Seq) -> &Savepoint {
        self.savepoints
            .iter()
            .rev()
            .find(|sp| sp.seq <= seq)
            .unwrap_or(&self.savepoints[0])
    }

    pub fn savepoint_count(&self) -> usize {
        self.savepoints.len()
    }

    /// Record the canvas state before entry `seq`, replacing a stale one.
    pub fn add_savepoint(&mut self, seq: Seq, stack: LayerStack) {
        if seq <= self.baseline().seq {
            return;
        }
        match self.savepoints.binary_search_by_key(&seq, |sp| sp.seq) {
            Ok(i) => self.savepoints[i].stack = stack,
            Err(i) => self.savepoints.insert(i, Savepoint { seq, stack }),
        }
    }

    /// Forget savepoints taken after `seq`; they no longer match the log.
    pub fn discard_savepoints_after(&mut self, seq: Seq) {
        let keep = self.savepoints.partition_point(|sp| sp.seq <= seq).max(1);
        self.savepoints.truncate(keep);
    }

    /// Fold every entry older than `seq` into a new baseline.
    ///
    /// `baseline` must be the canvas state just before `seq`. Afterwards the
    /// log no longer rebuilds the canvas from empty.
    pub fn fold_before(&mut self, seq: Seq, baseline: LayerStack) {
        let cut = self.entries.partition_point(|e| e.seq < seq);
        if cut == 0 && self.baseline().seq >= seq {
            return;
        }
        self.entries.drain(..cut);
        self.savepoints.retain(|sp| sp.seq > seq);
        self.savepoints.insert(
            0,
            Savepoint {
                seq,
                stack: baseline,
            },
        );
        self.complete = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandKind;

    fn bg(user: UserId) -> Command {
        Command::new(user, CommandKind::CanvasBackground { color: 0xffffffff })
    }

    #[test]
    fn test_sequence_numbers() {
        let mut log = HistoryLog::new();
        assert_eq!(log.push(bg(1), true), 0);
        assert_eq!(log.push(bg(2), false), 1);
        log.clear();
        assert_eq!(log.push(bg(1), true), 2);
        assert_eq!(log.baseline().seq, 2);
    }

    #[test]
    fn test_find_undo_skips_other_users() {
        let mut log = HistoryLog::new();
        let mine = log.push(bg(1), true);
        log.push(bg(2), false);
        log.push(Command::new(1, CommandKind::PenUp), false);
        assert_eq!(log.find_undo(1, 30, true), Some(mine));
        assert_eq!(log.find_undo(3, 30, true), None);
        // Remote entries are only undo targets for replicated undo requests
        assert_eq!(log.find_undo(2, 30, true), None);
        assert_eq!(log.find_undo(2, 30, false), Some(1));
    }

    #[test]
    fn test_redo_order() {
        let mut log = HistoryLog::new();
        let a = log.push(bg(1), true);
        let b = log.push(bg(1), true);
        let c = log.push(bg(1), true);
        log.set_state(c, UndoState::Undone);
        log.set_state(b, UndoState::Undone);
        assert_eq!(log.find_undo(1, 30, true), Some(a));
        assert_eq!(log.find_redo(1, 30, true), Some(b));
        log.set_state(b, UndoState::Live);
        assert_eq!(log.find_redo(1, 30, true), Some(c));
    }

    #[test]
    fn test_new_action_blocks_redo() {
        let mut log = HistoryLog::new();
        let a = log.push(bg(1), true);
        log.set_state(a, UndoState::Undone);
        log.push(bg(1), true);
        assert_eq!(log.find_redo(1, 30, true), None);
    }

    #[test]
    fn test_undo_depth() {
        let mut log = HistoryLog::new();
        let first = log.push(bg(1), true);
        let second = log.push(bg(1), true);
        log.set_state(second, UndoState::Undone);
        assert_eq!(log.find_undo(1, 1, true), None);
        assert_eq!(log.find_undo(1, 2, true), Some(first));
    }

    #[test]
    fn test_fold_point() {
        let mut log = HistoryLog::new();
        for _ in 0..5 {
            log.push(bg(1), true);
        }
        log.push(bg(2), false);
        log.push(Command::new(2, CommandKind::PenUp), false);
        // The window holds user 2's entry and user 1's newest one
        assert_eq!(log.fold_point(2), 4);

        let mut empty = HistoryLog::new();
        empty.push(Command::new(1, CommandKind::PenUp), false);
        assert_eq!(empty.fold_point(2), 1);
    }

    #[test]
    fn test_fold_before() {
        let mut log = HistoryLog::new();
        for _ in 0..4 {
            log.push(bg(1), true);
        }
        log.add_savepoint(3, LayerStack::new());
        log.fold_before(2, LayerStack::new());
        assert!(!log.is_complete());
        assert_eq!(log.entries().first().map(|e| e.seq), Some(2));
        assert_eq!(log.baseline().seq, 2);
        assert_eq!(log.savepoint_before(5).seq, 3);
        assert_eq!(log.savepoint_count(), 2);
    }

    #[test]
    fn test_savepoints() {
        let mut log = HistoryLog::new();
        for _ in 0..10 {
            log.push(bg(1), true);
        }
        log.add_savepoint(4, LayerStack::new());
        log.add_savepoint(8, LayerStack::new());
        assert_eq!(log.savepoint_before(7).seq, 4);
        assert_eq!(log.savepoint_before(8).seq, 8);
        assert_eq!(log.savepoint_before(2).seq, 0);
        log.discard_savepoints_after(5);
        assert_eq!(log.savepoint_before(9).seq, 4);
        log.discard_savepoints_after(0);
        assert_eq!(log.savepoint_count(), 1);
    }
}
