pub mod activities;
pub mod prospects;
pub mod templates;
