mod document_key;
mod field_path;
mod resource_path;

pub use document_key::DocumentKey;
pub use field_path::FieldPath;
pub use resource_path::ResourcePath;
