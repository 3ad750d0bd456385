//! Still-image encoding shared by the broadcast server and the recorder

mod jpeg;

pub use jpeg::encode_jpeg;
