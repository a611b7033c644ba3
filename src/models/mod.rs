pub mod envelope;
pub mod health;
pub mod source;
