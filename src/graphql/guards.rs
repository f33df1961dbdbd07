use async_graphql::{Context, ErrorExtensions, Guard, Result};

use crate::error::AppError;
use crate::models::user::session::SessionContext;
use crate::models::user::{Role, User};

pub struct LoggedIn;

#[async_trait::async_trait]
impl Guard for LoggedIn {
    async fn check(&self, ctx: &Context<'_>) -> Result<()> {
        if ctx.data_opt::<SessionContext>().is_some() {
            Ok(())
        } else {
            Err(AppError::Unauthorized.extend())
        }
    }
}

/// Requires a signed-in user with at least the given role.
pub struct RoleGuard {
    minimum: Role,
}

impl RoleGuard {
    const fn new(minimum: Role) -> Self {
        Self { minimum }
    }

    pub fn allows(&self, role: Role) -> bool {
        role >= self.minimum
    }

    pub const BRANCH_LEADER: Self = Self::new(Role::BranchLeader);
    pub const ADMIN: Self = Self::new(Role::Admin);
    pub const SUPER_ADMIN: Self = Self::new(Role::SuperAdmin);
}

#[async_trait::async_trait]
impl Guard for RoleGuard {
    async fn check(&self, ctx: &Context<'_>) -> Result<()> {
        match ctx.data_opt::<SessionContext>() {
            Some(session) if self.allows(session.user.role) => Ok(()),
            Some(_) => Err(AppError::forbidden(format!(
                "the {:?} role is required",
                self.minimum
            ))
            .extend()),
            None => Err(AppError::Unauthorized.extend()),
        }
    }
}

pub fn current_session<'a>(ctx: &Context<'a>) -> Result<&'a SessionContext> {
    ctx.data_opt::<SessionContext>()
        .ok_or_else(|| AppError::Unauthorized.extend())
}

pub fn current_user<'a>(ctx: &Context<'a>) -> Result<&'a User> {
    current_session(ctx).map(|session| &session.user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_roles_pass_lower_guards() {
        assert!(RoleGuard::ADMIN.allows(Role::SuperAdmin));
        assert!(RoleGuard::ADMIN.allows(Role::Admin));
        assert!(!RoleGuard::ADMIN.allows(Role::BranchLeader));
        assert!(!RoleGuard::SUPER_ADMIN.allows(Role::Admin));
        assert!(RoleGuard::BRANCH_LEADER.allows(Role::BranchLeader));
    }
}
