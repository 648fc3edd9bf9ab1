pub mod attempts;
pub mod health;
pub mod proctor;
