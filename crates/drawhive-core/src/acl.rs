//! Access control for incoming commands.
//!
//! The [`AclFilter`] decides whether a command may take effect. It never
//! touches the canvas. It does update its own policy state when it processes
//! permission meta commands, and records [`AclChange`]s for the user registry
//! to pick up.

use crate::protocol::{Command, CommandKind, LayerId, SERVER_ID, UserId, join_flags};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Ordered trust level. A user of a higher tier can do everything a lower
/// tier can.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Guest,
    Trusted,
    Operator,
}

/// Session features that can be restricted to a minimum tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    PutImage,
    Resize,
    Background,
    EditLayers,
    OwnLayers,
    CreateAnnotation,
    Laser,
    Undo,
}

impl Feature {
    /// All features, in wire order.
    pub const ALL: [Feature; 8] = [
        Feature::PutImage,
        Feature::Resize,
        Feature::Background,
        Feature::EditLayers,
        Feature::OwnLayers,
        Feature::CreateAnnotation,
        Feature::Laser,
        Feature::Undo,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Tier a fresh session requires for this feature.
    pub fn default_tier(self) -> Tier {
        match self {
            Feature::Resize | Feature::Background | Feature::EditLayers => Tier::Operator,
            Feature::PutImage
            | Feature::OwnLayers
            | Feature::CreateAnnotation
            | Feature::Laser
            | Feature::Undo => Tier::Guest,
        }
    }
}

/// Access control entry of a single layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayerAcl {
    pub locked: bool,
    pub tier: Tier,
    /// When non-empty, only these users may draw on the layer.
    pub exclusive: BTreeSet<UserId>,
}

impl LayerAcl {
    /// Whether this entry differs from the default (unlocked, guest, open).
    pub fn is_restricted(&self) -> bool {
        self.locked || self.tier != Tier::Guest || !self.exclusive.is_empty()
    }
}

/// Why a command was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("user {0} is locked")]
    UserLocked(UserId),
    #[error("session is locked")]
    SessionLocked,
    #[error("layer {0:#06x} is locked for this user")]
    LayerLocked(LayerId),
    #[error("operator privileges required")]
    NotOperator,
    #[error("feature {0:?} not available at this user's tier")]
    MissingFeature(Feature),
}

/// Outcome of evaluating a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Policy change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclChange {
    Operators(Vec<UserId>),
    TrustedUsers(Vec<UserId>),
    Locks(Vec<UserId>),
    LocalOperator(bool),
    LocalLock(bool),
    Layer(LayerId),
    FeatureTiers,
}

/// Stateful access control policy.
#[derive(Debug, Clone)]
pub struct AclFilter {
    local_id: UserId,
    operators: BTreeSet<UserId>,
    trusted: BTreeSet<UserId>,
    authenticated: BTreeSet<UserId>,
    locked: BTreeSet<UserId>,
    session_locked: bool,
    layers: BTreeMap<LayerId, LayerAcl>,
    feature_tiers: [Tier; Feature::ALL.len()],
    changes: Vec<AclChange>,
}

impl AclFilter {
    /// Create a filter for an offline session owned by `local_id`.
    pub fn new(local_id: UserId) -> Self {
        let mut filter = Self {
            local_id,
            operators: BTreeSet::new(),
            trusted: BTreeSet::new(),
            authenticated: BTreeSet::new(),
            locked: BTreeSet::new(),
            session_locked: false,
            layers: BTreeMap::new(),
            feature_tiers: Feature::ALL.map(Feature::default_tier),
            changes: Vec::new(),
        };
        filter.reset(local_id, true);
        filter
    }

    /// Clear all policy state.
    ///
    /// In local mode the local user is the sole operator, so that an offline
    /// canvas can be set up without a server.
    pub fn reset(&mut self, local_id: UserId, local_mode: bool) {
        self.local_id = local_id;
        self.operators.clear();
        self.trusted.clear();
        self.authenticated.clear();
        self.locked.clear();
        self.session_locked = false;
        self.layers.clear();
        self.feature_tiers = Feature::ALL.map(Feature::default_tier);

        if local_mode {
            self.operators.insert(local_id);
        }

        self.changes.clear();
        self.changes.push(AclChange::Operators(self.operator_list()));
        self.changes.push(AclChange::TrustedUsers(Vec::new()));
        self.changes.push(AclChange::Locks(Vec::new()));
        self.changes.push(AclChange::LocalOperator(local_mode));
        self.changes.push(AclChange::LocalLock(false));
    }

    pub fn local_id(&self) -> UserId {
        self.local_id
    }

    /// Take the accumulated policy change notifications.
    pub fn take_changes(&mut self) -> Vec<AclChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn is_operator(&self, user: UserId) -> bool {
        user == SERVER_ID || self.operators.contains(&user)
    }

    pub fn is_trusted(&self, user: UserId) -> bool {
        self.trusted.contains(&user)
    }

    pub fn is_authenticated(&self, user: UserId) -> bool {
        self.authenticated.contains(&user)
    }

    /// Whether the user may not draw at all right now.
    pub fn is_locked(&self, user: UserId) -> bool {
        self.locked.contains(&user) || (self.session_locked && !self.is_operator(user))
    }

    pub fn is_session_locked(&self) -> bool {
        self.session_locked
    }

    pub fn operator_list(&self) -> Vec<UserId> {
        self.operators.iter().copied().collect()
    }

    pub fn user_tier(&self, user: UserId) -> Tier {
        if self.is_operator(user) {
            Tier::Operator
        } else if self.is_trusted(user) {
            Tier::Trusted
        } else {
            Tier::Guest
        }
    }

    pub fn feature_tier(&self, feature: Feature) -> Tier {
        self.feature_tiers[feature.index()]
    }

    pub fn can_use_feature(&self, user: UserId, feature: Feature) -> bool {
        self.user_tier(user) >= self.feature_tier(feature)
    }

    /// ACL entry of a layer; layers without an explicit entry are open.
    pub fn layer_acl(&self, layer: LayerId) -> LayerAcl {
        self.layers.get(&layer).cloned().unwrap_or_default()
    }

    /// Whether `user` may currently change the content of `layer`.
    pub fn can_edit_layer(&self, user: UserId, layer: LayerId) -> bool {
        let Some(acl) = self.layers.get(&layer) else {
            return true;
        };
        !acl.locked
            && (self.user_tier(user) >= acl.tier || self.is_operator(user))
            && (acl.exclusive.is_empty() || acl.exclusive.contains(&user))
    }

    fn is_own_layer(user: UserId, layer: LayerId) -> bool {
        (layer >> 8) as UserId == user
    }

    /// Decide whether a command may take effect, updating policy state for
    /// accepted permission commands.
    pub fn evaluate(&mut self, cmd: &Command) -> Verdict {
        match self.check(cmd) {
            Ok(()) => Verdict::Accept,
            Err(reason) => Verdict::Reject(reason),
        }
    }

    fn check(&mut self, cmd: &Command) -> Result<(), RejectReason> {
        let user = cmd.context_id;
        match &cmd.kind {
            CommandKind::Catchup { .. } | CommandKind::SoftReset => Ok(()),

            CommandKind::UserJoin { flags, .. } => {
                if flags & join_flags::AUTH != 0 {
                    self.authenticated.insert(user);
                }
                Ok(())
            }
            CommandKind::UserLeave => {
                self.authenticated.remove(&user);
                if self.operators.remove(&user) {
                    self.changes.push(AclChange::Operators(self.operator_list()));
                }
                if self.trusted.remove(&user) {
                    self.changes.push(AclChange::TrustedUsers(self.trusted_list()));
                }
                if self.locked.remove(&user) {
                    self.changes.push(AclChange::Locks(self.locked_list()));
                }
                Ok(())
            }
            CommandKind::SessionOwner { users } => {
                self.require_operator(user)?;
                let was_op = self.is_operator(self.local_id);
                self.operators = users.iter().copied().collect();
                self.changes.push(AclChange::Operators(self.operator_list()));
                let is_op = self.is_operator(self.local_id);
                if was_op != is_op {
                    self.changes.push(AclChange::LocalOperator(is_op));
                }
                Ok(())
            }
            CommandKind::TrustedUsers { users } => {
                self.require_operator(user)?;
                self.trusted = users.iter().copied().collect();
                self.changes.push(AclChange::TrustedUsers(self.trusted_list()));
                Ok(())
            }
            CommandKind::UserAcl { users } => {
                self.require_operator(user)?;
                let was_locked = self.is_locked(self.local_id);
                self.locked = users.iter().copied().collect();
                self.changes.push(AclChange::Locks(self.locked_list()));
                self.push_local_lock_change(was_locked);
                Ok(())
            }
            CommandKind::FeatureLevels { tiers } => {
                self.require_operator(user)?;
                for (feature, tier) in Feature::ALL.iter().zip(tiers) {
                    self.feature_tiers[feature.index()] = *tier;
                }
                self.changes.push(AclChange::FeatureTiers);
                Ok(())
            }
            CommandKind::LayerAcl {
                layer,
                locked,
                tier,
                exclusive,
            } => {
                self.require_operator(user)?;
                if *layer == 0 {
                    // Layer zero stands for the whole session
                    let was_locked = self.is_locked(self.local_id);
                    self.session_locked = *locked;
                    self.push_local_lock_change(was_locked);
                } else {
                    let acl = LayerAcl {
                        locked: *locked,
                        tier: *tier,
                        exclusive: exclusive.iter().copied().collect(),
                    };
                    if acl.is_restricted() {
                        self.layers.insert(*layer, acl);
                    } else {
                        self.layers.remove(layer);
                    }
                    self.changes.push(AclChange::Layer(*layer));
                }
                Ok(())
            }
            CommandKind::DefaultLayer { .. } => self.require_operator(user),
            CommandKind::LaserTrail { .. } => {
                self.require_unlocked(user)?;
                self.require_feature(user, Feature::Laser)
            }
            CommandKind::Chat { .. }
            | CommandKind::Interval { .. }
            | CommandKind::MovePointer { .. }
            | CommandKind::Marker { .. } => Ok(()),

            // A deleted layer takes its ACL entry along
            CommandKind::LayerDelete { layer, .. } => {
                self.check_drawing(cmd)?;
                if self.layers.remove(layer).is_some() {
                    self.changes.push(AclChange::Layer(*layer));
                }
                Ok(())
            }

            _ => self.check_drawing(cmd),
        }
    }

    fn check_drawing(&self, cmd: &Command) -> Result<(), RejectReason> {
        let user = cmd.context_id;
        self.require_unlocked(user)?;

        match &cmd.kind {
            CommandKind::CanvasResize { .. } => self.require_feature(user, Feature::Resize),
            CommandKind::CanvasBackground { .. } => {
                self.require_feature(user, Feature::Background)
            }
            CommandKind::LayerCreate { layer, .. }
            | CommandKind::LayerAttributes { layer, .. }
            | CommandKind::LayerRetitle { layer, .. } => self.require_layer_editing(user, *layer),
            CommandKind::LayerDelete { layer, .. } => {
                self.require_layer_editing(user, *layer)?;
                self.require_layer_access(user, *layer)
            }
            CommandKind::LayerOrder { .. } => self.require_feature(user, Feature::EditLayers),
            CommandKind::PutImage { layer, .. } | CommandKind::FillRect { layer, .. } => {
                self.require_feature(user, Feature::PutImage)?;
                self.require_layer_access(user, *layer)
            }
            CommandKind::DrawDabs { layer, .. } => self.require_layer_access(user, *layer),
            CommandKind::AnnotationCreate { .. } => {
                self.require_feature(user, Feature::CreateAnnotation)
            }
            CommandKind::Undo { override_user, .. } => {
                self.require_feature(user, Feature::Undo)?;
                if *override_user != 0 && *override_user != user {
                    self.require_operator(user)?;
                }
                Ok(())
            }
            CommandKind::PenUp
            | CommandKind::AnnotationReshape { .. }
            | CommandKind::AnnotationEdit { .. }
            | CommandKind::AnnotationDelete { .. } => Ok(()),
            other => {
                debug_assert!(false, "{} is not a drawing command", other.name());
                Err(RejectReason::NotOperator)
            }
        }
    }

    fn trusted_list(&self) -> Vec<UserId> {
        self.trusted.iter().copied().collect()
    }

    fn locked_list(&self) -> Vec<UserId> {
        self.locked.iter().copied().collect()
    }

    fn push_local_lock_change(&mut self, was_locked: bool) {
        let is_locked = self.is_locked(self.local_id);
        if was_locked != is_locked {
            self.changes.push(AclChange::LocalLock(is_locked));
        }
    }

    fn require_unlocked(&self, user: UserId) -> Result<(), RejectReason> {
        if self.locked.contains(&user) {
            Err(RejectReason::UserLocked(user))
        } else if self.session_locked && !self.is_operator(user) {
            Err(RejectReason::SessionLocked)
        } else {
            Ok(())
        }
    }

    fn require_operator(&self, user: UserId) -> Result<(), RejectReason> {
        if self.is_operator(user) {
            Ok(())
        } else {
            Err(RejectReason::NotOperator)
        }
    }

    fn require_feature(&self, user: UserId, feature: Feature) -> Result<(), RejectReason> {
        if self.can_use_feature(user, feature) {
            Ok(())
        } else {
            Err(RejectReason::MissingFeature(feature))
        }
    }

    fn require_layer_editing(&self, user: UserId, layer: LayerId) -> Result<(), RejectReason> {
        if self.can_use_feature(user, Feature::EditLayers)
            || (self.can_use_feature(user, Feature::OwnLayers) && Self::is_own_layer(user, layer))
        {
            Ok(())
        } else {
            Err(RejectReason::MissingFeature(Feature::EditLayers))
        }
    }

    fn require_layer_access(&self, user: UserId, layer: LayerId) -> Result<(), RejectReason> {
        if self.can_edit_layer(user, layer) {
            Ok(())
        } else {
            Err(RejectReason::LayerLocked(layer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::BlendMode;

    fn dabs_on(user: UserId, layer: LayerId) -> Command {
        Command::new(
            user,
            CommandKind::DrawDabs {
                layer,
                x: 0,
                y: 0,
                color: 0xff000000,
                mode: BlendMode::Normal,
                dabs: Vec::new(),
            },
        )
    }

    fn layer_acl(user: UserId, layer: LayerId, locked: bool, tier: Tier, exclusive: Vec<UserId>) -> Command {
        Command::new(
            user,
            CommandKind::LayerAcl {
                layer,
                locked,
                tier,
                exclusive,
            },
        )
    }

    fn online_filter() -> AclFilter {
        let mut acl = AclFilter::new(2);
        acl.reset(2, false);
        acl.evaluate(&Command::new(SERVER_ID, CommandKind::SessionOwner { users: vec![1] }));
        acl.take_changes();
        acl
    }

    #[test]
    fn test_local_mode_bootstrap() {
        let mut acl = AclFilter::new(1);
        assert!(acl.is_operator(1));
        assert!(acl.evaluate(&layer_acl(1, 0x0101, true, Tier::Guest, vec![])).is_accepted());
    }

    #[test]
    fn test_online_reset_has_no_operator() {
        let mut acl = AclFilter::new(1);
        acl.reset(1, false);
        assert!(!acl.is_operator(1));
        assert_eq!(
            acl.evaluate(&Command::new(1, CommandKind::TrustedUsers { users: vec![1] })),
            Verdict::Reject(RejectReason::NotOperator)
        );
    }

    #[test]
    fn test_locked_layer_rejects_draw() {
        let mut acl = online_filter();
        assert!(acl.evaluate(&layer_acl(1, 7, true, Tier::Guest, vec![])).is_accepted());
        assert_eq!(
            acl.evaluate(&dabs_on(2, 7)),
            Verdict::Reject(RejectReason::LayerLocked(7))
        );
        // Other layers are unaffected
        assert!(acl.evaluate(&dabs_on(2, 8)).is_accepted());

        assert!(acl.evaluate(&layer_acl(1, 7, false, Tier::Guest, vec![])).is_accepted());
        assert!(acl.evaluate(&dabs_on(2, 7)).is_accepted());
    }

    #[test]
    fn test_layer_tier_and_exclusive() {
        let mut acl = online_filter();
        acl.evaluate(&layer_acl(1, 7, false, Tier::Trusted, vec![]));
        assert!(!acl.evaluate(&dabs_on(2, 7)).is_accepted());
        assert!(acl.evaluate(&dabs_on(1, 7)).is_accepted());

        acl.evaluate(&Command::new(1, CommandKind::TrustedUsers { users: vec![2] }));
        assert!(acl.evaluate(&dabs_on(2, 7)).is_accepted());

        acl.evaluate(&layer_acl(1, 7, false, Tier::Guest, vec![3]));
        assert!(!acl.evaluate(&dabs_on(2, 7)).is_accepted());
        assert!(acl.evaluate(&dabs_on(3, 7)).is_accepted());
    }

    #[test]
    fn test_default_entry_is_removed() {
        let mut acl = online_filter();
        acl.evaluate(&layer_acl(1, 7, true, Tier::Guest, vec![]));
        assert!(acl.layer_acl(7).is_restricted());
        acl.evaluate(&layer_acl(1, 7, false, Tier::Guest, vec![]));
        assert!(!acl.layer_acl(7).is_restricted());
        assert_eq!(acl.layer_acl(7), LayerAcl::default());
    }

    #[test]
    fn test_layer_delete_drops_entry() {
        let mut acl = online_filter();
        acl.evaluate(&layer_acl(1, 7, false, Tier::Trusted, vec![]));
        acl.take_changes();
        assert!(!acl.evaluate(&dabs_on(2, 7)).is_accepted());
        let delete = Command::new(
            1,
            CommandKind::LayerDelete {
                layer: 7,
                merge: false,
            },
        );
        assert!(acl.evaluate(&delete).is_accepted());
        assert_eq!(acl.layer_acl(7), LayerAcl::default());
        assert_eq!(acl.take_changes(), vec![AclChange::Layer(7)]);

        // A layer recreated with the same id starts open
        assert!(acl.evaluate(&dabs_on(2, 7)).is_accepted());
        assert!(acl.evaluate(&delete).is_accepted());
        assert!(acl.take_changes().is_empty());
    }

    #[test]
    fn test_user_lock_and_notifications() {
        let mut acl = online_filter();
        assert!(acl.evaluate(&Command::new(1, CommandKind::UserAcl { users: vec![2] })).is_accepted());
        let changes = acl.take_changes();
        assert!(changes.contains(&AclChange::Locks(vec![2])));
        assert!(changes.contains(&AclChange::LocalLock(true)));
        assert_eq!(
            acl.evaluate(&dabs_on(2, 1)),
            Verdict::Reject(RejectReason::UserLocked(2))
        );
    }

    #[test]
    fn test_session_lock_spares_operators() {
        let mut acl = online_filter();
        acl.evaluate(&layer_acl(1, 0, true, Tier::Guest, vec![]));
        assert!(acl.is_session_locked());
        assert_eq!(acl.evaluate(&dabs_on(2, 1)), Verdict::Reject(RejectReason::SessionLocked));
        assert!(acl.evaluate(&dabs_on(1, 1)).is_accepted());
    }

    #[test]
    fn test_feature_levels() {
        let mut acl = online_filter();
        let resize = Command::new(
            2,
            CommandKind::CanvasResize {
                top: 0,
                right: 10,
                bottom: 10,
                left: 0,
            },
        );
        assert_eq!(
            acl.evaluate(&resize),
            Verdict::Reject(RejectReason::MissingFeature(Feature::Resize))
        );

        let tiers = vec![Tier::Guest; Feature::ALL.len()];
        assert!(acl.evaluate(&Command::new(1, CommandKind::FeatureLevels { tiers })).is_accepted());
        assert!(acl.evaluate(&resize).is_accepted());
    }

    #[test]
    fn test_own_layers() {
        let mut acl = online_filter();
        let create = |layer| {
            Command::new(
                2,
                CommandKind::LayerCreate {
                    layer,
                    source: 0,
                    fill: 0,
                    flags: 0,
                    title: "mine".into(),
                },
            )
        };
        assert!(acl.evaluate(&create(0x0201)).is_accepted());
        assert!(!acl.evaluate(&create(0x0101)).is_accepted());
    }

    #[test]
    fn test_undo_override_requires_operator() {
        let mut acl = online_filter();
        let own = Command::new(2, CommandKind::Undo { override_user: 0, redo: false });
        let other = Command::new(2, CommandKind::Undo { override_user: 3, redo: false });
        assert!(acl.evaluate(&own).is_accepted());
        assert_eq!(acl.evaluate(&other), Verdict::Reject(RejectReason::NotOperator));
    }

    #[test]
    fn test_user_leave_clears_roles() {
        let mut acl = online_filter();
        acl.evaluate(&Command::new(1, CommandKind::TrustedUsers { users: vec![3] }));
        acl.take_changes();
        acl.evaluate(&Command::new(3, CommandKind::UserLeave));
        assert!(!acl.is_trusted(3));
        assert_eq!(acl.take_changes(), vec![AclChange::TrustedUsers(vec![])]);
    }
}
