use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Invalid skeleton topology: {0}")]
    InvalidTopology(String),

    #[error("Image size mismatch: color is {color_width}x{color_height}, factor is {factor_width}x{factor_height}")]
    ImageSizeMismatch {
        color_width: u32,
        color_height: u32,
        factor_width: u32,
        factor_height: u32,
    },

    #[error("Unsupported interchange data: {0}")]
    Unsupported(String),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Options JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reports carry plain strings, so errors surfaced through them are rendered once here.
impl From<ConvertError> for String {
    fn from(error: ConvertError) -> Self {
        error.to_string()
    }
}
