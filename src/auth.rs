use crate::engine::EngineError;
use crate::model::{Id, Role};

/// An authenticated user as resolved by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Id,
    pub role: Role,
}

/// Per-request identity handed to every engine operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthContext {
    caller: Option<Caller>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self { caller: None }
    }

    pub fn user(user_id: Id, role: Role) -> Self {
        Self {
            caller: Some(Caller { user_id, role }),
        }
    }

    pub fn owner(user_id: Id) -> Self {
        Self::user(user_id, Role::Owner)
    }

    pub fn traveler(user_id: Id) -> Self {
        Self::user(user_id, Role::Traveler)
    }

    pub fn caller(&self) -> Option<&Caller> {
        self.caller.as_ref()
    }
}

pub fn require_authenticated(ctx: &AuthContext) -> Result<Caller, EngineError> {
    ctx.caller()
        .copied()
        .ok_or(EngineError::Unauthorized("authentication required"))
}

pub fn require_role(ctx: &AuthContext, role: Role) -> Result<Caller, EngineError> {
    let caller = require_authenticated(ctx)?;
    if caller.role != role {
        return Err(EngineError::Unauthorized(match role {
            Role::Owner => "owner role required",
            Role::Traveler => "traveler role required",
        }));
    }
    Ok(caller)
}
