pub mod auth;
pub mod superuser;
pub mod timing;
