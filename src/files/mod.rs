//! Files stored through the framework

pub mod file;
pub mod manager;
pub mod mime;

pub use file::{FileMetadata, VStoreFile};
pub use manager::{hash_file, FileManager};
pub use mime::{
    extension_for_mime, is_mime_type_supported, mime_and_extension, mime_for_extension,
};
