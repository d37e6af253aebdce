//! Participants of the session.

pub mod avatar;

use crate::error::{Error, Result};
use crate::paint::Bitmap;
use crate::protocol::{UserId, join_flags};
use std::collections::BTreeMap;

/// A session participant.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Normalized avatar thumbnail.
    pub avatar: Bitmap,
    pub is_local: bool,
    pub is_operator: bool,
    pub is_trusted: bool,
    /// Server-wide moderator.
    pub is_moderator: bool,
    pub is_bot: bool,
    pub is_authenticated: bool,
    /// Locked by an operator: may not draw.
    pub is_muted: bool,
    /// Hidden by the local user.
    pub is_blocked: bool,
}

impl User {
    /// Build a user from a join message, normalizing the avatar to
    /// `avatar_size` pixels.
    pub fn from_join(
        id: UserId,
        name: &str,
        avatar_payload: &[u8],
        flags: u8,
        avatar_size: u32,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            avatar: avatar::avatar_for(name, avatar_payload, avatar_size),
            is_local: false,
            is_operator: false,
            is_trusted: false,
            is_moderator: flags & join_flags::MOD != 0,
            is_bot: flags & join_flags::BOT != 0,
            is_authenticated: flags & join_flags::AUTH != 0,
            is_muted: false,
            is_blocked: false,
        }
    }
}

/// The participants currently present, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct UserRegistry {
    users: BTreeMap<UserId, User>,
    local_id: UserId,
    /// Set once the local id has been re-pointed for a network session.
    rebound: bool,
}

impl UserRegistry {
    pub fn new(local_id: UserId) -> Self {
        Self {
            users: BTreeMap::new(),
            local_id,
            rebound: false,
        }
    }

    pub fn local_id(&self) -> UserId {
        self.local_id
    }

    /// Point the local identity at the id assigned by the server.
    ///
    /// This happens exactly once per network session.
    pub fn rebind_local(&mut self, id: UserId) -> Result<()> {
        if self.rebound {
            debug_assert!(false, "local user rebound twice in one session");
            return Err(Error::ProtocolMisuse(format!(
                "local user already bound to {} in this session",
                self.local_id
            )));
        }
        self.local_id = id;
        self.rebound = true;
        for user in self.users.values_mut() {
            user.is_local = user.id == id;
        }
        Ok(())
    }

    /// Forget the network binding after leaving a session.
    pub fn unbind_local(&mut self) {
        self.rebound = false;
    }

    /// Add a user, replacing any user with the same id.
    pub fn add_user(&mut self, mut user: User) {
        user.is_local = user.id == self.local_id;
        if let Some(old) = self.users.insert(user.id, user) {
            log::warn!("User {} ({}) replaced by a new join", old.id, old.name);
        }
    }

    /// Remove a user and return their name, or `None` if there was no such
    /// user.
    pub fn remove_user(&mut self, id: UserId) -> Option<String> {
        self.users.remove(&id).map(|u| u.name)
    }

    pub fn get_user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    /// Display name of a user, if present.
    pub fn username(&self, id: UserId) -> Option<&str> {
        self.users.get(&id).map(|u| u.name.as_str())
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear_users(&mut self) {
        self.users.clear();
    }

    pub fn update_operators(&mut self, ids: &[UserId]) {
        for user in self.users.values_mut() {
            user.is_operator = ids.contains(&user.id);
        }
    }

    pub fn update_trusted_users(&mut self, ids: &[UserId]) {
        for user in self.users.values_mut() {
            user.is_trusted = ids.contains(&user.id);
        }
    }

    pub fn update_locks(&mut self, ids: &[UserId]) {
        for user in self.users.values_mut() {
            user.is_muted = ids.contains(&user.id);
        }
    }

    /// Hide or show a user's content locally. Returns false for unknown ids.
    pub fn set_blocked(&mut self, id: UserId, blocked: bool) -> bool {
        match self.users.get_mut(&id) {
            Some(user) => {
                user.is_blocked = blocked;
                true
            }
            None => false,
        }
    }
}
