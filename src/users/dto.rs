use serde::{Deserialize, Serialize};

use crate::users::repo::User;

/// Request body for signup.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Response returned after signup: the new account is already logged in.
#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub token: String,
    pub user: User,
}
