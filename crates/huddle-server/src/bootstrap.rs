//! Session bootstrap.
//!
//! Establishes who a client is and which room it is entering before the
//! WebSocket upgrade. The display name and room arrive as query
//! parameters on the upgrade request and are checked the way the chat
//! login form checks them: both required, both bounded in length.

use crate::config::BootstrapConfig;
use huddle_protocol::WireFormat;
use serde::Deserialize;
use thiserror::Error;

/// Bootstrap failures, reported to the client as HTTP 400.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BootstrapError {
    /// A required field is missing or blank.
    #[error("Missing required field: {0}")]
    Missing(&'static str),

    /// A field exceeds the configured length.
    #[error("Field {field} exceeds {max} characters")]
    TooLong {
        /// Field name.
        field: &'static str,
        /// Maximum allowed length.
        max: usize,
    },
}

/// Query parameters of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct SessionParams {
    /// Display name.
    pub name: Option<String>,
    /// Room to enter.
    pub room: Option<String>,
    /// Requested wire format.
    pub format: Option<WireFormat>,
}

/// A validated session, ready to become a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Display name.
    pub identity: String,
    /// Room name.
    pub room: String,
    /// Wire format for this connection.
    pub format: WireFormat,
}

impl SessionParams {
    /// Validate the parameters into a session.
    ///
    /// Accepted values are kept verbatim; only presence and length are
    /// checked.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` or `room` is missing, blank, or too long.
    pub fn validate(
        self,
        rules: &BootstrapConfig,
        default_format: WireFormat,
    ) -> Result<Session, BootstrapError> {
        let identity = required("name", self.name, rules.max_field_length)?;
        let room = required("room", self.room, rules.max_field_length)?;

        Ok(Session {
            identity,
            room,
            format: self.format.unwrap_or(default_format),
        })
    }
}

fn required(
    field: &'static str,
    value: Option<String>,
    max: usize,
) -> Result<String, BootstrapError> {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .ok_or(BootstrapError::Missing(field))?;

    if value.chars().count() > max {
        return Err(BootstrapError::TooLong { field, max });
    }

    Ok(value)
}
