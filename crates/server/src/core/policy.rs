//! Ownership rules for notes and accounts.

use crate::core::error::{Error, Result};
use crate::core::models::{Note, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Write,
    Delete,
}

/// Something whose access depends on who is asking
pub trait Resource {
    fn permits(&self, actor: &str, capability: Capability) -> bool;
}

impl Resource for Note {
    fn permits(&self, actor: &str, _capability: Capability) -> bool {
        self.user_id == actor
    }
}

impl Resource for User {
    fn permits(&self, actor: &str, _capability: Capability) -> bool {
        self.id == actor
    }
}

pub fn authorize(actor: &str, resource: &impl Resource, capability: Capability) -> Result<()> {
    if resource.permits(actor, capability) {
        Ok(())
    } else {
        Err(Error::Forbidden("Not authorized"))
    }
}
