//! Client-side form checks, run before any network call.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static EMAIL_SHAPE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\S+@\S+\.\S+").ok());

const MIN_USERNAME_CHARS: usize = 3;
const MIN_PASSWORD_CHARS: usize = 6;

/// Form field a check applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Username,
    Email,
    Password,
    ConfirmPassword,
    FolderName,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Username => "username",
            Field::Email => "email",
            Field::Password => "password",
            Field::ConfirmPassword => "confirm password",
            Field::FolderName => "folder name",
        };
        f.write_str(name)
    }
}

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: Field,
    pub message: String,
}

/// Every failed check for one form, in field order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", summary(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

fn summary(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    /// The message for `field`, if it failed.
    pub fn get(&self, field: Field) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    fn push(&mut self, field: Field, message: &str) {
        self.errors.push(FieldError {
            field,
            message: message.to_string(),
        });
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn is_email_shape(email: &str) -> bool {
    EMAIL_SHAPE
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

pub fn validate_login(username: &str, password: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors { errors: Vec::new() };
    if username.trim().is_empty() {
        errors.push(Field::Username, "Username is required");
    }
    if password.is_empty() {
        errors.push(Field::Password, "Password is required");
    }
    errors.into_result()
}

pub fn validate_signup(
    username: &str,
    email: &str,
    password: &str,
    confirm_password: &str,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors { errors: Vec::new() };

    if username.trim().is_empty() {
        errors.push(Field::Username, "Username is required");
    } else if username.chars().count() < MIN_USERNAME_CHARS {
        errors.push(Field::Username, "Username must be at least 3 characters");
    }

    if email.trim().is_empty() {
        errors.push(Field::Email, "Email is required");
    } else if !is_email_shape(email) {
        errors.push(Field::Email, "Email is invalid");
    }

    if password.is_empty() {
        errors.push(Field::Password, "Password is required");
    } else if password.chars().count() < MIN_PASSWORD_CHARS {
        errors.push(Field::Password, "Password must be at least 6 characters");
    }

    if confirm_password != password {
        errors.push(Field::ConfirmPassword, "Passwords do not match");
    }

    errors.into_result()
}

/// Returns the trimmed name to send.
pub fn validate_folder_name(name: &str) -> Result<String, ValidationErrors> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut errors = ValidationErrors { errors: Vec::new() };
        errors.push(Field::FolderName, "Folder name cannot be empty");
        return Err(errors);
    }
    Ok(trimmed.to_string())
}
