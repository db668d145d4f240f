use thiserror::Error;

#[derive(Debug, Error)]
pub enum GroundingError {
    #[error("Image decode error: {0}")]
    Decode(String),

    #[error("Image too large: {0}")]
    ImageTooLarge(String),

    #[error("Image dimensions too large: {0}")]
    DimensionsTooLarge(String),

    #[error("Invalid image dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Decoded image is empty")]
    EmptyImage,

    #[error("Empty or invalid input: {0}")]
    EmptyInput(String),

    #[error("Transport encoding error: {0}")]
    Encoding(String),

    #[error("Unparsable backend response: {0}")]
    UnparsableResponse(String),

    #[error("UI hierarchy error: {0}")]
    Hierarchy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Vision backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl GroundingError {
    /// Stable machine-readable code used in the tool's JSON error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            GroundingError::Decode(_) => "invalid_image_format",
            GroundingError::ImageTooLarge(_) => "image_too_large",
            GroundingError::DimensionsTooLarge(_) => "dimensions_too_large",
            GroundingError::InvalidDimensions(_) => "invalid_dimensions",
            GroundingError::EmptyImage => "empty_decoded_image",
            GroundingError::EmptyInput(_) => "empty_or_invalid_input",
            GroundingError::Encoding(_) => "invalid_base64",
            GroundingError::UnparsableResponse(_) => "unparsable_response",
            GroundingError::Hierarchy(_) => "invalid_hierarchy",
            GroundingError::Config(_) => "configuration_error",
            GroundingError::Backend(_) | GroundingError::Http(_) => "ai_provider_error",
            GroundingError::Io(_) | GroundingError::Json(_) | GroundingError::TomlDe(_) => {
                "internal_error"
            }
        }
    }
}

impl serde::Serialize for GroundingError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type GroundingResult<T> = Result<T, GroundingError>;
