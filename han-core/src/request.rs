//! REST-style request record used by the coordinator: `/{cmd}[/{data}]`.

/// Longest accepted method, command and data, in bytes.
pub const MAX_METHOD_LEN: usize = 7;
pub const MAX_COMMAND_LEN: usize = 15;
pub const MAX_DATA_LEN: usize = 31;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request path has no command")]
    MissingCommand,
    #[error("request path has more than two segments")]
    TooManySegments,
    #[error("{field} is longer than {max} bytes")]
    TooLong { field: &'static str, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestRequest {
    pub method: String,
    pub command: String,
    /// Empty when the path had no data segment.
    pub data: String,
}

impl RestRequest {
    /// Map a method and URI path onto a request. Query strings are ignored.
    pub fn parse(method: &str, path: &str) -> Result<Self, RequestError> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let command = segments.next().ok_or(RequestError::MissingCommand)?;
        let data = segments.next().unwrap_or_default();
        if segments.next().is_some() {
            return Err(RequestError::TooManySegments);
        }
        Ok(Self {
            method: bounded("method", method, MAX_METHOD_LEN)?,
            command: bounded("command", command, MAX_COMMAND_LEN)?,
            data: bounded("data", data, MAX_DATA_LEN)?,
        })
    }
}

fn bounded(field: &'static str, value: &str, max: usize) -> Result<String, RequestError> {
    if value.len() > max {
        return Err(RequestError::TooLong { field, max });
    }
    Ok(value.to_string())
}
