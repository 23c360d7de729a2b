use crate::Error;

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewSession {
    pub user: String,
    pub password: String,
}

impl NewSession {
    pub fn new(user: String, password: String) -> NewSession {
        NewSession { user, password }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.user)?;
        crate::validate_string(&self.password)?;
        if self.user.is_empty() {
            return Err(Error::Validation(String::from("user name must not be empty")));
        }
        Ok(())
    }
}
