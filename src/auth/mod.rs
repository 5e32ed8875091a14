//! Authentication: bearer tokens, sessions, passwords and the routes for
//! registering, logging in and logging out.

mod log_in;
mod log_out;
mod middleware;
mod password;
mod register;
mod token;

pub use log_in::{LogInRequest, LogInState, log_in_endpoint};
pub use log_out::log_out_endpoint;
pub use middleware::{AuthState, Principal, auth_guard};
pub use password::{PasswordHash, ValidatedPassword, hash_password, verify_password};
pub use register::{RegisterRequest, RegisterState, register_endpoint};
pub use token::{
    Claims, DEFAULT_TOKEN_DURATION, IssuedToken, TokenKeys, decode_token, encode_token,
};

#[cfg(test)]
pub use token::TEST_TOKEN_SECRET;
