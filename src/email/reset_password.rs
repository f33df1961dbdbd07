use askama::Template;

use crate::email::Email;
use crate::models::user::User;

#[derive(Template)]
#[template(path = "reset-password.html")]
pub struct ResetPasswordEmail<'a> {
    pub user: &'a User,
    pub link: String,
}

impl<'a> ResetPasswordEmail<'a> {
    pub fn new(user: &'a User, app_base_url: &str, token: &str) -> Self {
        Self {
            user,
            link: format!(
                "{}/reset-password?token={}",
                app_base_url,
                urlencoding::encode(token)
            ),
        }
    }
}

impl<'a> Email for ResetPasswordEmail<'a> {
    fn subject(&self) -> String {
        "Reset your Volunteer Hub password".to_owned()
    }

    fn recipient(&self) -> String {
        format!("{} <{}>", self.user.full_name_inner(), self.user.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock::mock_user;

    #[test]
    fn link_points_at_the_reset_page() {
        let user = mock_user();
        let email = ResetPasswordEmail::new(&user, "https://hub.example.org", "abc-123");

        assert_eq!(email.link, "https://hub.example.org/reset-password?token=abc-123");
        assert!(email.render().unwrap().contains(&email.link));
    }
}
