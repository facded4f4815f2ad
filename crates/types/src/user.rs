use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of characters accepted for a user name.
pub const MAX_NAME_LEN: usize = 50;
/// Maximum number of characters accepted for a phone number.
pub const MAX_PHONE_LEN: usize = 20;
/// Maximum number of characters accepted for an email address.
pub const MAX_EMAIL_LEN: usize = 100;

/// Persisted user record.
///
/// `birthday` is a packed `YYYYMMDD` integer. It is stored as given; no
/// calendar validation is performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub birthday: i64,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl User {
    /// Public projection of the record. Contact details are never exposed.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            name: self.name.clone(),
            birthday: self.birthday,
        }
    }
}

/// A record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub birthday: i64,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl NewUser {
    /// Builds a record, treating empty contact strings as absent.
    pub fn new(
        name: impl Into<String>,
        birthday: i64,
        phone: Option<String>,
        email: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            birthday,
            phone: phone.filter(|value| !value.is_empty()),
            email: email.filter(|value| !value.is_empty()),
        }
    }

    /// Checks the required fields and the column length limits.
    pub fn validate(&self) -> Result<(), UserFieldError> {
        if self.name.is_empty() || self.birthday == 0 {
            return Err(UserFieldError::MissingIdentity);
        }
        if self.phone.is_none() && self.email.is_none() {
            return Err(UserFieldError::MissingContact);
        }
        if self.name.chars().count() > MAX_NAME_LEN {
            return Err(UserFieldError::NameTooLong);
        }
        if exceeds(self.phone.as_deref(), MAX_PHONE_LEN) {
            return Err(UserFieldError::PhoneTooLong);
        }
        if exceeds(self.email.as_deref(), MAX_EMAIL_LEN) {
            return Err(UserFieldError::EmailTooLong);
        }
        Ok(())
    }

    pub fn into_user(self, id: u64) -> User {
        User {
            id,
            name: self.name,
            birthday: self.birthday,
            phone: self.phone,
            email: self.email,
        }
    }
}

fn exceeds(value: Option<&str>, limit: usize) -> bool {
    value.map_or(false, |v| v.chars().count() > limit)
}

/// Name and birthday as returned by the birthday endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub birthday: i64,
}

/// Errors raised while validating a [`NewUser`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UserFieldError {
    #[error("name and birthday are required")]
    MissingIdentity,
    #[error("phone or email is required for verification")]
    MissingContact,
    #[error("name exceeds {MAX_NAME_LEN} characters")]
    NameTooLong,
    #[error("phone exceeds {MAX_PHONE_LEN} characters")]
    PhoneTooLong,
    #[error("email exceeds {MAX_EMAIL_LEN} characters")]
    EmailTooLong,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carl() -> NewUser {
        NewUser::new("Carl", 20000101, Some("111".into()), None)
    }

    #[test]
    fn valid_record_passes() {
        assert_eq!(carl().validate(), Ok(()));
    }

    #[test]
    fn empty_contact_strings_count_as_absent() {
        let user = NewUser::new("Dora", 19991231, Some(String::new()), Some(String::new()));
        assert_eq!(user.phone, None);
        assert_eq!(user.email, None);
        assert_eq!(user.validate(), Err(UserFieldError::MissingContact));
    }

    #[test]
    fn zero_birthday_is_missing() {
        let mut user = carl();
        user.birthday = 0;
        assert_eq!(user.validate(), Err(UserFieldError::MissingIdentity));
    }

    #[test]
    fn length_limits_count_characters() {
        let mut user = carl();
        user.name = "é".repeat(MAX_NAME_LEN);
        assert_eq!(user.validate(), Ok(()));
        user.name.push('x');
        assert_eq!(user.validate(), Err(UserFieldError::NameTooLong));

        let mut user = carl();
        user.phone = Some("1".repeat(MAX_PHONE_LEN + 1));
        assert_eq!(user.validate(), Err(UserFieldError::PhoneTooLong));

        let mut user = carl();
        user.email = Some(format!("{}@x.io", "a".repeat(MAX_EMAIL_LEN)));
        assert_eq!(user.validate(), Err(UserFieldError::EmailTooLong));
    }

    #[test]
    fn profile_hides_contact_details() {
        let user = carl().into_user(7);
        let json = serde_json::to_value(user.profile()).unwrap();
        assert_eq!(json, serde_json::json!({"name": "Carl", "birthday": 20000101}));
    }
}
