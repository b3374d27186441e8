use base64::{engine::general_purpose::STANDARD, Engine as _};

/// MIME type used when the server doesn't say otherwise.
pub const DEFAULT_IMAGE_MIME: &str = "image/png";

/// An encoded raster image of a scannable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl CodeImage {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn png(data: Vec<u8>) -> Self {
        Self::new(DEFAULT_IMAGE_MIME, data)
    }

    /// Embeddable `data:` URI, e.g. `data:image/png;base64,iVBORw0...`.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.data))
    }

    /// Parse a `data:<mime>;base64,<body>` URI back into an image.
    pub fn from_data_uri(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("data:")?;
        let (mime_type, body) = rest.split_once(";base64,")?;
        let data = STANDARD.decode(body).ok()?;
        Some(Self::new(mime_type, data))
    }
}
