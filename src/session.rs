//! Session-scoped state, read through one controller instead of ambient
//! storage: the API token, the viewer's role, and whether the user has
//! navigated at least once in this session.
use tracing::info;

use crate::visibility::Viewer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionController {
    token: Option<String>,
    role: Role,
    navigated_once: bool,
}

impl SessionController {
    pub fn new(token: Option<String>, role: Role) -> Self {
        Self {
            token,
            role,
            navigated_once: false,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Gate mode for a piece of content. Admins and the owning teacher
    /// bypass publish gating.
    pub fn viewer_for(&self, is_owner: bool) -> Viewer {
        match self.role {
            Role::Admin => Viewer::Privileged,
            Role::Teacher if is_owner => Viewer::Privileged,
            _ => Viewer::Regular,
        }
    }

    /// Record a navigation; returns true only the first time.
    pub fn mark_navigated(&mut self) -> bool {
        !std::mem::replace(&mut self.navigated_once, true)
    }

    pub fn has_navigated(&self) -> bool {
        self.navigated_once
    }

    /// Drop credentials (e.g. after a 401) and reset session state.
    pub fn logout(&mut self) {
        info!("session cleared");
        *self = Self::default();
    }
}
