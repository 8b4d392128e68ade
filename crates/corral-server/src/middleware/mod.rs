pub mod auth;

pub use auth::{BearerToken, rest_auth_middleware};
