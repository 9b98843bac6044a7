mod entry;
mod store;

pub use entry::{GalleryEntry, GalleryMetadata};
pub use store::{GalleryStore, SqliteGalleryStore, StoreError};
