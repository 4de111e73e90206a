pub mod projects;
pub mod validate;
