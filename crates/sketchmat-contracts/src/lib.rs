pub mod chat;
pub mod conversation;
pub mod events;
pub mod gallery;
pub mod image_ref;
pub mod params;
