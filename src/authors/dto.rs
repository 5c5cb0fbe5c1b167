use serde::Deserialize;

/// Request body for creating an author.
#[derive(Debug, Deserialize)]
pub struct CreateAuthorRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub dob: Option<i32>,
}
