//! Which pages of the site a visitor may open.
//!
//! Every route is listed once in [`ROUTES`] with the zone it belongs to, and
//! [`RouteGuard::check`] is the only place that turns a zone into a decision.

use async_graphql::SimpleObject;

use crate::models::user::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Zone {
    /// Anyone may visit.
    Public,
    /// Login and sign-up; signed-in users are sent to their dashboard.
    AuthPage,
    /// Signed-in users with at least this role.
    Protected(Role),
}

pub struct RouteRule {
    pub prefix: &'static str,
    pub zone: Zone,
}

pub const ROUTES: &[RouteRule] = &[
    RouteRule { prefix: "/", zone: Zone::Public },
    RouteRule { prefix: "/about", zone: Zone::Public },
    RouteRule { prefix: "/branches", zone: Zone::Public },
    RouteRule { prefix: "/sponsors", zone: Zone::Public },
    RouteRule { prefix: "/contact", zone: Zone::Public },
    RouteRule { prefix: "/not-approved", zone: Zone::Public },
    RouteRule { prefix: "/forgot-password", zone: Zone::Public },
    RouteRule { prefix: "/reset-password", zone: Zone::Public },
    RouteRule { prefix: "/login", zone: Zone::AuthPage },
    RouteRule { prefix: "/signup", zone: Zone::AuthPage },
    RouteRule { prefix: "/dashboard", zone: Zone::Protected(Role::Member) },
    RouteRule { prefix: "/events", zone: Zone::Protected(Role::Member) },
    RouteRule { prefix: "/hours", zone: Zone::Protected(Role::Member) },
    RouteRule { prefix: "/profile", zone: Zone::Protected(Role::Member) },
    RouteRule { prefix: "/admin", zone: Zone::Protected(Role::Admin) },
    RouteRule { prefix: "/super-admin", zone: Zone::Protected(Role::SuperAdmin) },
];

pub const LOGIN_PATH: &str = "/login";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect(String),
}

/// The answer to a `routeAccess` query
#[derive(SimpleObject, Clone, Debug, PartialEq, Eq)]
pub struct RouteAccess {
    pub allowed: bool,
    /// Where to send the visitor instead, if not allowed
    pub redirect: Option<String>,
}

impl From<RouteDecision> for RouteAccess {
    fn from(decision: RouteDecision) -> Self {
        match decision {
            RouteDecision::Allow => RouteAccess {
                allowed: true,
                redirect: None,
            },
            RouteDecision::Redirect(target) => RouteAccess {
                allowed: false,
                redirect: Some(target),
            },
        }
    }
}

/// Each role's landing page.
pub fn dashboard_for(role: Role) -> &'static str {
    match role {
        Role::SuperAdmin => "/super-admin",
        Role::Admin => "/admin",
        Role::Member | Role::BranchLeader => "/dashboard",
    }
}

pub struct RouteGuard;

impl RouteGuard {
    /// The zone of the most specific rule matching the path. Unknown paths are public.
    pub fn zone(path: &str) -> Zone {
        let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();

        ROUTES
            .iter()
            .filter(|rule| matches_prefix(path, rule.prefix))
            .max_by_key(|rule| rule.prefix.len())
            .map(|rule| rule.zone)
            .unwrap_or(Zone::Public)
    }

    /// `role` is `None` for visitors who aren't signed in.
    pub fn check(path: &str, role: Option<Role>) -> RouteDecision {
        match (Self::zone(path), role) {
            (Zone::Public, _) => RouteDecision::Allow,
            (Zone::AuthPage, None) => RouteDecision::Allow,
            (Zone::AuthPage, Some(role)) => RouteDecision::Redirect(dashboard_for(role).to_owned()),
            (Zone::Protected(_), None) => RouteDecision::Redirect(format!(
                "{}?redirect={}",
                LOGIN_PATH,
                urlencoding::encode(path)
            )),
            (Zone::Protected(required), Some(role)) if role >= required => RouteDecision::Allow,
            (Zone::Protected(_), Some(role)) => {
                RouteDecision::Redirect(dashboard_for(role).to_owned())
            }
        }
    }
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path == "/" || path.is_empty();
    }

    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_specific_rule_wins() {
        assert_eq!(RouteGuard::zone("/"), Zone::Public);
        assert_eq!(RouteGuard::zone("/admin"), Zone::Protected(Role::Admin));
        assert_eq!(RouteGuard::zone("/admin/branches/3"), Zone::Protected(Role::Admin));
        assert_eq!(
            RouteGuard::zone("/super-admin"),
            Zone::Protected(Role::SuperAdmin)
        );
        assert_eq!(RouteGuard::zone("/administrator"), Zone::Public);
        assert_eq!(RouteGuard::zone("/hours?tab=pending"), Zone::Protected(Role::Member));
    }

    #[test]
    fn not_approved_page_is_never_a_target() {
        for role in [Role::Member, Role::BranchLeader, Role::Admin, Role::SuperAdmin] {
            for path in ["/admin", "/super-admin", "/login"] {
                assert_ne!(
                    RouteGuard::check(path, Some(role)),
                    RouteDecision::Redirect("/not-approved".to_owned())
                );
            }
        }
        assert_eq!(RouteGuard::check("/not-approved", None), RouteDecision::Allow);
    }
}
