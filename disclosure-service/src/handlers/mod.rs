pub mod admin;
pub mod agreements;
pub mod fees;
pub mod health;
pub mod projects;
