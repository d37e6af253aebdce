//! Where other participants are pointing.
//!
//! Cursor positions and laser trails are transient: they are never part of
//! the canvas history and are dropped when a user leaves.

use crate::protocol::{LayerId, UserId};
use kurbo::Point;
use std::collections::BTreeMap;

/// Last known pointer state of a user.
#[derive(Debug, Clone, PartialEq)]
pub struct UserCursor {
    pub user: UserId,
    pub position: Point,
    /// Layer of the last stroke, when the position comes from drawing.
    pub layer: Option<LayerId>,
    pub visible: bool,
}

/// A laser pointer trail in progress or finished.
#[derive(Debug, Clone, PartialEq)]
pub struct LaserTrail {
    pub user: UserId,
    pub color: u32,
    /// How long the trail lingers, in seconds.
    pub persistence: u8,
    pub points: Vec<Point>,
    pub open: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Presence {
    cursors: BTreeMap<UserId, UserCursor>,
    trails: Vec<LaserTrail>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self, user: UserId) -> Option<&UserCursor> {
        self.cursors.get(&user)
    }

    pub fn cursors(&self) -> impl Iterator<Item = &UserCursor> {
        self.cursors.values()
    }

    pub fn trails(&self) -> &[LaserTrail] {
        &self.trails
    }

    fn open_trail(&mut self, user: UserId) -> Option<&mut LaserTrail> {
        self.trails.iter_mut().rev().find(|t| t.user == user && t.open)
    }

    /// Start a laser trail. A persistence of zero ends the current one.
    ///
    /// A user keeps at most one finished trail: starting a new trail drops
    /// the older finished ones.
    pub fn start_trail(&mut self, user: UserId, color: u32, persistence: u8) {
        self.trails.retain(|t| t.user != user || t.open);
        if let Some(trail) = self.open_trail(user) {
            trail.open = false;
        }
        if persistence > 0 {
            self.trails.push(LaserTrail {
                user,
                color,
                persistence,
                points: Vec::new(),
                open: true,
            });
        }
    }

    /// Pointer movement. Extends the user's open laser trail, if any.
    pub fn move_pointer(&mut self, user: UserId, position: Point) {
        if let Some(trail) = self.open_trail(user) {
            trail.points.push(position);
        }
        let cursor = self.cursors.entry(user).or_insert(UserCursor {
            user,
            position,
            layer: None,
            visible: true,
        });
        cursor.position = position;
        cursor.visible = true;
    }

    /// Brush position from a stroke.
    pub fn marker_moved(&mut self, user: UserId, layer: LayerId, position: Point) {
        self.move_pointer(user, position);
        if let Some(cursor) = self.cursors.get_mut(&user) {
            cursor.layer = Some(layer);
        }
    }

    pub fn hide_marker(&mut self, user: UserId) {
        if let Some(cursor) = self.cursors.get_mut(&user) {
            cursor.visible = false;
        }
    }

    /// Drop everything belonging to a user who left.
    pub fn remove_user(&mut self, user: UserId) {
        self.cursors.remove(&user);
        self.trails.retain(|t| t.user != user);
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
        self.trails.clear();
    }
}
