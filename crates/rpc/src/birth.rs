//! Birthday lookup and registration endpoints.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use birthbook_storage::{StoreError, UniqueField};
use birthbook_types::{NewUser, UserFieldError, UserProfile};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::server::{require_object, ApiError, ApiReply, SharedState};

#[derive(Debug, Deserialize)]
pub struct BirthQuery {
    #[serde(default)]
    pub name: Option<String>,
}

/// Birthday as sent by clients: a packed integer, an integral float or a
/// string of digits.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BirthdayInput {
    Number(i64),
    Float(f64),
    Text(String),
}

impl BirthdayInput {
    fn is_blank(&self) -> bool {
        match self {
            BirthdayInput::Number(value) => *value == 0,
            BirthdayInput::Float(value) => *value == 0.0,
            BirthdayInput::Text(text) => text.trim().is_empty(),
        }
    }

    fn to_packed(&self) -> Result<i64, ApiError> {
        let invalid = || ApiError::bad_request("Invalid birthday");
        match self {
            BirthdayInput::Number(value) => Ok(*value),
            BirthdayInput::Float(value)
                if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 =>
            {
                Ok(*value as i64)
            }
            BirthdayInput::Float(_) => Err(invalid()),
            BirthdayInput::Text(text) => text.trim().parse::<i64>().map_err(|_| invalid()),
        }
    }
}

/// Request to register a new user.
#[derive(Debug, Deserialize)]
pub struct RegisterBirthdayRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub birthday: Option<BirthdayInput>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl RegisterBirthdayRequest {
    fn into_new_user(self) -> Result<NewUser, ApiError> {
        let name = self.name.unwrap_or_default();
        // Presence is checked before the birthday is parsed.
        let input = match self.birthday {
            Some(input) if !name.is_empty() && !input.is_blank() => input,
            _ => return Err(UserFieldError::MissingIdentity.into()),
        };
        let birthday = input.to_packed()?;
        if birthday == 0 {
            return Err(UserFieldError::MissingIdentity.into());
        }

        let user = NewUser::new(name, birthday, self.phone, self.email);
        user.validate()?;
        Ok(user)
    }
}

impl From<UserFieldError> for ApiError {
    fn from(err: UserFieldError) -> Self {
        match err {
            UserFieldError::MissingIdentity => ApiError::bad_request("Name and birthday required"),
            UserFieldError::MissingContact => {
                ApiError::bad_request("Phone or email required for verification")
            }
            UserFieldError::NameTooLong => ApiError::bad_request("Name too long"),
            UserFieldError::PhoneTooLong => ApiError::bad_request("Phone too long"),
            UserFieldError::EmailTooLong => ApiError::bad_request("Email too long"),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(UniqueField::Phone) => ApiError::conflict("Phone already exists"),
            StoreError::Conflict(UniqueField::Email) => ApiError::conflict("Email already exists"),
            StoreError::InvalidRecord(field) => field.into(),
            other => {
                error!("user store failure: {}", other);
                ApiError::internal()
            }
        }
    }
}

pub(crate) async fn handle_get_birthday(
    State(state): State<SharedState>,
    query: Result<Query<BirthQuery>, QueryRejection>,
) -> Result<ApiReply<UserProfile>, ApiError> {
    let name = query
        .ok()
        .and_then(|Query(params)| params.name)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::bad_request("Name required"))?;

    state
        .storage
        .find_by_name(&name)?
        .map(|user| ApiReply::ok(user.profile()))
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub(crate) async fn handle_register_birthday(
    State(state): State<SharedState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<ApiReply<UserProfile>, ApiError> {
    let body = require_object(payload)?;
    let request: RegisterBirthdayRequest =
        serde_json::from_value(Value::Object(body)).map_err(|err| {
            debug!("malformed registration body: {}", err);
            ApiError::bad_request("Bad Request")
        })?;
    let user = request.into_new_user()?;

    let storage = &state.storage;
    if storage.find_by_name(&user.name)?.is_some() {
        info!("registration rejected: user {} already exists", user.name);
        return Err(ApiError::conflict("User already exists"));
    }
    if let Some(phone) = user.phone.as_deref() {
        if storage.find_by_phone(phone)?.is_some() {
            info!("registration rejected for {}: phone taken", user.name);
            return Err(ApiError::conflict("Phone already exists"));
        }
    }
    if let Some(email) = user.email.as_deref() {
        if storage.find_by_email(email)?.is_some() {
            info!("registration rejected for {}: email taken", user.name);
            return Err(ApiError::conflict("Email already exists"));
        }
    }

    // The store re-checks phone and email atomically; a lost race maps to 409.
    let created = storage.insert(user)?;
    info!(id = created.id, "registered user {}", created.name);
    Ok(ApiReply::created(created.profile()))
}
