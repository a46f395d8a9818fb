use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// One shared service secret. Identity (the session user → `owner`) is
/// asserted by the upstream auth collaborator; this only gates transport.
#[derive(Debug)]
pub struct VacancyAuthSource {
    password: String,
}

impl VacancyAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for VacancyAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
