use volunteer_hub::models::user::Role;
use volunteer_hub::routes::{RouteDecision, RouteGuard};

fn redirect(target: &str) -> RouteDecision {
    RouteDecision::Redirect(target.to_owned())
}

#[test]
fn visitors_are_sent_to_login_with_a_return_path() {
    assert_eq!(
        RouteGuard::check("/hours/new", None),
        redirect("/login?redirect=%2Fhours%2Fnew")
    );
    assert_eq!(
        RouteGuard::check("/super-admin", None),
        redirect("/login?redirect=%2Fsuper-admin")
    );
}

#[test]
fn public_pages_are_open_to_everyone() {
    for path in ["/", "/about", "/branches/4", "/sponsors", "/reset-password"] {
        assert_eq!(RouteGuard::check(path, None), RouteDecision::Allow);
        assert_eq!(RouteGuard::check(path, Some(Role::Member)), RouteDecision::Allow);
    }
}

#[test]
fn signed_in_users_skip_the_auth_pages() {
    assert_eq!(RouteGuard::check("/login", None), RouteDecision::Allow);
    assert_eq!(RouteGuard::check("/login", Some(Role::Member)), redirect("/dashboard"));
    assert_eq!(RouteGuard::check("/signup", Some(Role::Admin)), redirect("/admin"));
    assert_eq!(
        RouteGuard::check("/login", Some(Role::SuperAdmin)),
        redirect("/super-admin")
    );
}

#[test]
fn members_are_kept_out_of_admin_pages() {
    assert_eq!(
        RouteGuard::check("/super-admin", Some(Role::Member)),
        redirect("/dashboard")
    );
    assert_eq!(
        RouteGuard::check("/admin/events", Some(Role::BranchLeader)),
        redirect("/dashboard")
    );
    assert_eq!(
        RouteGuard::check("/super-admin/branches", Some(Role::Admin)),
        redirect("/admin")
    );
}

#[test]
fn higher_roles_open_lower_pages() {
    assert_eq!(RouteGuard::check("/admin", Some(Role::SuperAdmin)), RouteDecision::Allow);
    assert_eq!(RouteGuard::check("/dashboard", Some(Role::Admin)), RouteDecision::Allow);
    assert_eq!(RouteGuard::check("/hours", Some(Role::Member)), RouteDecision::Allow);
}
