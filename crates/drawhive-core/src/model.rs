//! The canvas model: single entry point for everything that happens in a
//! session.
//!
//! Commands from the network go through [`CanvasModel::handle`], commands
//! made by the local user through [`CanvasModel::handle_local`]. Both run
//! access control first. Accepted meta commands update users, permissions
//! and presence; accepted drawing commands go to the state tracker.
//! Observers drain [`CanvasEvent`]s, the network layer drains the outbox.

use crate::acl::{AclChange, AclFilter, RejectReason, Verdict};
use crate::canvas::LayerStack;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::CanvasEvent;
use crate::history::HistoryLog;
use crate::paint::{Bitmap, PaintEngine, SoftwareEngine, alpha};
use crate::presence::Presence;
use crate::protocol::{
    AnnotationId, Category, Command, CommandKind, LayerId, UserId, chat_flags,
};
use crate::recording::{RecordedCommand, Recorder};
use crate::selection::Selection;
use crate::snapshot;
use crate::tracker::{StateTracker, TrackerEffect};
use crate::users::{User, UserRegistry};
use kurbo::{Point, Vec2};
use peniko::Color;
use uuid::Uuid;

/// Connection state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Local canvas, no server.
    Offline,
    /// Joined a network session.
    Online,
    /// Replaying a recording.
    Playback,
}

/// Outcome of handling a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Accepted,
    Filtered(RejectReason),
}

impl Handled {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Handled::Accepted)
    }
}

/// Session context owning canvas, history, users and permissions.
pub struct CanvasModel {
    session_id: Uuid,
    mode: SessionMode,
    acl: AclFilter,
    users: UserRegistry,
    tracker: StateTracker,
    presence: Presence,
    selection: Option<Selection>,
    recorder: Option<Box<dyn Recorder>>,
    title: String,
    pinned_message: Option<String>,
    default_layer: LayerId,
    /// The default layer autoselect request has been sent.
    autoselected: bool,
    events: Vec<CanvasEvent>,
    outgoing: Vec<Command>,
}

impl CanvasModel {
    /// Create an offline session using the software paint engine.
    pub fn new(local_id: UserId, config: SessionConfig) -> Result<Self> {
        Self::with_engine(local_id, config, Box::new(SoftwareEngine::new()))
    }

    /// Create an offline session with a custom paint engine.
    pub fn with_engine(
        local_id: UserId,
        config: SessionConfig,
        engine: Box<dyn PaintEngine>,
    ) -> Result<Self> {
        let tracker = StateTracker::new(local_id, config, engine)?;
        let session_id = Uuid::new_v4();
        log::info!("Canvas session {session_id} created for local user {local_id}");
        let mut model = Self {
            session_id,
            mode: SessionMode::Offline,
            acl: AclFilter::new(local_id),
            users: UserRegistry::new(local_id),
            tracker,
            presence: Presence::new(),
            selection: None,
            recorder: None,
            title: String::new(),
            pinned_message: None,
            default_layer: 0,
            autoselected: false,
            events: Vec::new(),
            outgoing: Vec::new(),
        };
        model.drain_acl_changes();
        Ok(model)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn local_id(&self) -> UserId {
        self.tracker.local_id()
    }

    pub fn config(&self) -> &SessionConfig {
        self.tracker.config()
    }

    pub fn acl(&self) -> &AclFilter {
        &self.acl
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    pub fn layer_stack(&self) -> &LayerStack {
        self.tracker.stack()
    }

    pub fn history(&self) -> &HistoryLog {
        self.tracker.history()
    }

    pub fn has_full_history(&self) -> bool {
        self.tracker.has_full_history()
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        let title = title.into();
        if title != self.title {
            self.title = title.clone();
            self.events.push(CanvasEvent::TitleChanged(title));
        }
    }

    pub fn pinned_message(&self) -> Option<&str> {
        self.pinned_message.as_deref()
    }

    pub fn default_layer(&self) -> LayerId {
        self.default_layer
    }

    /// Take queued notifications, oldest first.
    pub fn take_events(&mut self) -> Vec<CanvasEvent> {
        std::mem::take(&mut self.events)
    }

    /// Take local commands waiting to be sent to the other participants.
    pub fn take_outgoing(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.outgoing)
    }

    /// Install or remove the recorder. The previous one is flushed.
    pub fn set_recorder(&mut self, recorder: Option<Box<dyn Recorder>>) -> Result<()> {
        if let Some(mut old) = std::mem::replace(&mut self.recorder, recorder) {
            old.flush()?;
        }
        Ok(())
    }

    // ---- Command handling ----

    /// Handle a command received from the session.
    pub fn handle(&mut self, cmd: Command) -> Handled {
        if cmd.category() == Category::Internal {
            self.tracker.handle_internal(&cmd);
            self.drain_tracker_effects();
            return Handled::Accepted;
        }

        if self.mode != SessionMode::Playback {
            let verdict = self.acl.evaluate(&cmd);
            self.drain_acl_changes();
            if let Verdict::Reject(reason) = verdict {
                log::warn!(
                    "Filtered {} from user {}: {reason}",
                    cmd.name(),
                    cmd.context_id
                );
                self.record(&cmd, true);
                return Handled::Filtered(reason);
            }
        }
        self.record(&cmd, false);

        match cmd.category() {
            Category::Meta => self.handle_meta(cmd),
            Category::Drawing => {
                self.tracker.apply_remote(cmd);
                self.drain_tracker_effects();
                self.events.push(CanvasEvent::CanvasModified);
            }
            Category::Internal => {}
        }
        Handled::Accepted
    }

    /// Handle a drawing command made by the local user.
    ///
    /// Accepted commands are applied and queued for sending.
    pub fn handle_local(&mut self, cmd: Command) -> Result<Handled> {
        if !cmd.is_drawing() {
            debug_assert!(false, "{} is not a local drawing command", cmd.name());
            return Err(Error::ProtocolMisuse(format!(
                "{} cannot be applied as a local drawing command",
                cmd.name()
            )));
        }
        if cmd.context_id != self.local_id() {
            debug_assert!(false, "local command tagged with user {}", cmd.context_id);
            return Err(Error::ProtocolMisuse(format!(
                "local command tagged with user {} instead of {}",
                cmd.context_id,
                self.local_id()
            )));
        }

        let verdict = self.acl.evaluate(&cmd);
        self.drain_acl_changes();
        if let Verdict::Reject(reason) = verdict {
            log::warn!("Filtered local {}: {reason}", cmd.name());
            self.record(&cmd, true);
            return Ok(Handled::Filtered(reason));
        }

        self.record(&cmd, false);
        self.tracker.apply_local(cmd.clone());
        self.outgoing.push(cmd);
        self.drain_tracker_effects();
        self.events.push(CanvasEvent::CanvasModified);
        Ok(Handled::Accepted)
    }

    /// Undo the local user's latest action. Returns false if there was
    /// nothing to undo or undo is not permitted.
    pub fn undo(&mut self) -> bool {
        self.undo_or_redo(false)
    }

    /// Redo the local user's latest undone action.
    pub fn redo(&mut self) -> bool {
        self.undo_or_redo(true)
    }

    fn undo_or_redo(&mut self, redo: bool) -> bool {
        let cmd = Command::new(
            self.local_id(),
            CommandKind::Undo {
                override_user: 0,
                redo,
            },
        );
        if let Verdict::Reject(reason) = self.acl.evaluate(&cmd) {
            log::warn!("Cannot undo: {reason}");
            return false;
        }

        let changed = if redo {
            self.tracker.redo()
        } else {
            self.tracker.undo()
        };
        if changed {
            self.record(&cmd, false);
            self.outgoing.push(cmd);
            self.drain_tracker_effects();
            self.events.push(CanvasEvent::CanvasModified);
        }
        changed
    }

    fn handle_meta(&mut self, cmd: Command) {
        let user = cmd.context_id;
        match cmd.kind {
            CommandKind::UserJoin {
                name,
                avatar,
                flags,
            } => {
                let mut joined =
                    User::from_join(user, &name, &avatar, flags, self.config().avatar_size);
                joined.is_operator = self.acl.is_operator(user);
                joined.is_trusted = self.acl.is_trusted(user);
                joined.is_muted = self.acl.is_locked(user);
                self.users.add_user(joined);
                log::info!("User {user} ({name}) joined");
                self.events.push(CanvasEvent::UserJoined { id: user, name });
            }
            CommandKind::UserLeave => {
                let name = self.users.remove_user(user);
                if name.is_none() {
                    log::warn!("Unknown user {user} left");
                }
                self.presence.remove_user(user);
                self.events.push(CanvasEvent::UserLeft { id: user, name });
            }
            CommandKind::Chat { flags, message } => {
                if flags & chat_flags::PIN != 0 {
                    self.pinned_message = if message == "-" { None } else { Some(message) };
                    self.events
                        .push(CanvasEvent::PinnedMessageChanged(self.pinned_message.clone()));
                } else {
                    self.events.push(CanvasEvent::ChatReceived {
                        user,
                        flags,
                        message,
                    });
                }
            }
            CommandKind::LaserTrail { color, persistence } => {
                self.presence.start_trail(user, color, persistence);
                self.events.push(CanvasEvent::LaserTrailStarted {
                    user,
                    color,
                    persistence,
                });
            }
            CommandKind::MovePointer { x, y } => {
                // Pointer coordinates are in quarter pixels
                let position = Point::new(x as f64 / 4.0, y as f64 / 4.0);
                self.presence.move_pointer(user, position);
                self.events
                    .push(CanvasEvent::PointerMoved { user, position });
            }
            CommandKind::Marker { text } => {
                self.events.push(CanvasEvent::MarkerReceived { user, text });
            }
            CommandKind::DefaultLayer { layer } => {
                self.default_layer = layer;
                self.events.push(CanvasEvent::DefaultLayerChanged(layer));
                if !self.autoselected && !self.tracker.has_participated() {
                    self.autoselected = true;
                    self.events.push(CanvasEvent::LayerAutoselectRequest(layer));
                }
            }
            // Permission commands only change access control state, which
            // the filter has already done
            CommandKind::SessionOwner { .. }
            | CommandKind::TrustedUsers { .. }
            | CommandKind::UserAcl { .. }
            | CommandKind::FeatureLevels { .. }
            | CommandKind::LayerAcl { .. }
            | CommandKind::Interval { .. } => {}
            other => {
                debug_assert!(false, "{} is not a meta command", other.name());
                log::warn!("Ignoring non-meta command {}", other.name());
            }
        }
    }

    fn record(&mut self, cmd: &Command, filtered: bool) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        let entry = RecordedCommand {
            filtered,
            command: cmd.clone(),
        };
        if let Err(err) = recorder.record(&entry) {
            log::error!("Recording failed: {err}");
        }
    }

    fn drain_acl_changes(&mut self) {
        for change in self.acl.take_changes() {
            match &change {
                AclChange::Operators(ids) => self.users.update_operators(ids),
                AclChange::TrustedUsers(ids) => self.users.update_trusted_users(ids),
                AclChange::Locks(ids) => self.users.update_locks(ids),
                _ => {}
            }
            self.events.push(CanvasEvent::Acl(change));
        }
    }

    fn drain_tracker_effects(&mut self) {
        for effect in self.tracker.take_effects() {
            match effect {
                TrackerEffect::CanvasResized { offset_x, offset_y } => {
                    if let Some(selection) = &mut self.selection {
                        selection.translate(Vec2::new(offset_x as f64, offset_y as f64));
                    }
                    self.events
                        .push(CanvasEvent::CanvasResized { offset_x, offset_y });
                }
                TrackerEffect::LayerAutoselect(layer) => {
                    self.events.push(CanvasEvent::LayerAutoselectRequest(layer));
                }
                TrackerEffect::UserMarkerMoved { user, layer, x, y } => {
                    let position = Point::new(x as f64, y as f64);
                    self.presence.marker_moved(user, layer, position);
                    self.events.push(CanvasEvent::UserMarkerMoved {
                        user,
                        layer,
                        position,
                    });
                }
                TrackerEffect::UserMarkerHidden(user) => {
                    self.presence.hide_marker(user);
                    self.events.push(CanvasEvent::UserMarkerHidden(user));
                }
                TrackerEffect::CatchupProgress(progress) => {
                    self.events.push(CanvasEvent::CatchupProgress(progress));
                }
            }
        }
    }

    // ---- Session mode ----

    /// The session was joined; `local_id` is the id the server assigned.
    ///
    /// Nobody is an operator until the server says so.
    pub fn connected_to_server(&mut self, local_id: UserId) -> Result<()> {
        self.require_mode(SessionMode::Offline, "connected_to_server")?;
        self.users.rebind_local(local_id)?;
        self.tracker.set_local_id(local_id);
        self.acl.reset(local_id, false);
        self.drain_acl_changes();
        self.mode = SessionMode::Online;
        log::info!("Session {} online as user {local_id}", self.session_id);
        Ok(())
    }

    /// The connection was closed. Remote users are gone and the local user
    /// owns the canvas again.
    pub fn disconnected_from_server(&mut self) -> Result<()> {
        self.require_mode(SessionMode::Online, "disconnected_from_server")?;
        self.tracker.end_remote_contexts();
        self.drain_tracker_effects();
        self.users.clear_users();
        self.users.unbind_local();
        self.presence.clear();
        let local_id = self.local_id();
        self.acl.reset(local_id, true);
        self.drain_acl_changes();
        self.mode = SessionMode::Offline;
        log::info!("Session {} offline", self.session_id);
        Ok(())
    }

    /// Start replaying a recording. Every user's markers are shown.
    pub fn start_playback(&mut self) -> Result<()> {
        self.require_mode(SessionMode::Offline, "start_playback")?;
        self.tracker.set_show_all_user_markers(true);
        self.mode = SessionMode::Playback;
        log::info!("Session {} playback started", self.session_id);
        Ok(())
    }

    pub fn end_playback(&mut self) -> Result<()> {
        self.require_mode(SessionMode::Playback, "end_playback")?;
        self.tracker.end_playback();
        self.tracker.set_show_all_user_markers(false);
        self.drain_tracker_effects();
        self.mode = SessionMode::Offline;
        log::info!("Session {} playback ended", self.session_id);
        Ok(())
    }

    fn require_mode(&self, expected: SessionMode, operation: &str) -> Result<()> {
        if self.mode == expected {
            return Ok(());
        }
        debug_assert!(
            false,
            "{operation} requires {expected:?} mode, session is {:?}",
            self.mode
        );
        Err(Error::InvalidMode(format!(
            "{operation} requires {expected:?} mode, session is {:?}",
            self.mode
        )))
    }

    /// Clear the canvas for a fresh session download or a new document.
    pub fn reset_canvas(&mut self) {
        self.set_title("");
        self.tracker.reset();
        self.default_layer = 0;
        self.autoselected = false;
        self.pinned_message = None;
        let local_id = self.local_id();
        let local_mode = self.mode != SessionMode::Online;
        self.acl.reset(local_id, local_mode);
        self.drain_acl_changes();
        self.set_selection(None);
        self.events.push(CanvasEvent::CanvasModified);
    }

    // ---- Snapshots and queries ----

    /// Commands that rebuild the current session from empty.
    ///
    /// The history is reused while it is complete, unless `force_new` asks
    /// for a snapshot built from the canvas content. A canvas snapshot ends
    /// with a soft reset, which is applied here too: afterwards nothing
    /// drawn before the snapshot can be undone, here or by the receivers.
    pub fn generate_snapshot(&mut self, force_new: bool) -> Vec<Command> {
        let local_id = self.local_id();
        if force_new || !self.tracker.has_full_history() {
            let commands = snapshot::from_canvas(
                self.tracker.stack(),
                &self.acl,
                self.default_layer,
                local_id,
            );
            self.tracker
                .handle_internal(&Command::new(local_id, CommandKind::SoftReset));
            commands
        } else {
            snapshot::from_history(
                self.tracker.history(),
                self.tracker.stack(),
                &self.acl,
                self.default_layer,
                local_id,
            )
        }
    }

    /// Topmost layer with visible content at a canvas position.
    pub fn pick_layer(&self, x: i32, y: i32) -> Option<LayerId> {
        self.tracker.stack().layer_at(x, y)
    }

    /// Average color around a point, from one layer or from the flattened
    /// image. `None` when the area is fully transparent.
    pub fn pick_color(
        &self,
        x: i32,
        y: i32,
        layer: Option<LayerId>,
        diameter: u32,
    ) -> Option<Color> {
        let argb = self
            .tracker
            .stack()
            .color_at(self.tracker.engine(), x, y, layer, diameter)?;
        if alpha(argb) == 0 {
            return None;
        }
        let [a, r, g, b] = argb.to_be_bytes();
        Some(Color::from_rgba8(r, g, b, a))
    }

    /// The flattened canvas.
    pub fn to_image(&self) -> Bitmap {
        self.tracker.stack().flatten(self.tracker.engine())
    }

    pub fn needs_multi_layer_format(&self) -> bool {
        self.tracker.stack().needs_multi_layer_format()
    }

    /// First free annotation id owned by the local user.
    pub fn available_annotation_id(&self) -> Option<AnnotationId> {
        let prefix = (self.local_id() as AnnotationId) << 8;
        let stack = self.tracker.stack();
        (1..=0xff)
            .map(|i| prefix | i)
            .find(|id| stack.annotation(*id).is_none())
    }

    // ---- Selection ----

    /// Replace the selection. The previous one is dropped.
    pub fn set_selection(&mut self, selection: Option<Selection>) {
        let had_selection = self.selection.is_some();
        self.selection = selection;
        if self.selection.is_some() {
            self.events.push(CanvasEvent::SelectionChanged);
        } else if had_selection {
            self.events.push(CanvasEvent::SelectionRemoved);
        }
    }

    /// Turn an image into a floating selection.
    ///
    /// It is centered on the current selection unless `force_default` is
    /// set or there is none, in which case `default_point` is used.
    pub fn paste_from_image(&mut self, image: Bitmap, default_point: Point, force_default: bool) {
        let center = match &self.selection {
            Some(selection) if !force_default => selection.bounds().center(),
            _ => default_point,
        };
        self.set_selection(Some(Selection::with_image(image, center)));
    }

    /// Pixels under the selection, from `layer` or the flattened image.
    pub fn selection_to_image(&self, layer: Option<LayerId>) -> Option<Bitmap> {
        let selection = self.selection.as_ref()?;
        if let Some(image) = selection.paste_image() {
            return Some(image.clone());
        }
        let stack = self.tracker.stack();
        let image = match layer {
            Some(id) => selection.to_image(stack.layer(id)?.pixels()),
            None => selection.to_image(&stack.flatten(self.tracker.engine())),
        };
        Some(image)
    }
}
