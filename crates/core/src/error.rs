/// Result alias that carries the custom [`PulseVizError`] type.
pub type Result<T> = std::result::Result<T, PulseVizError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PulseVizError {
    /// The audio or drawing context is missing or unsupported. Fatal until the
    /// component is initialised again.
    #[error("initialisation failed: {0}")]
    Initialization(String),
    /// A snapshot could not be read on this tick. The scheduler skips the tick.
    #[error("feature extraction failed: {0}")]
    Extraction(String),
    /// The drawing surface rejected a render pass, even after falling back to
    /// simplified rendering.
    #[error("render failed: {0}")]
    Render(String),
    /// A configuration document could not be interpreted at all. Out-of-range
    /// values never produce this; they are clamped.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The scheduler crossed its consecutive failure threshold and stopped.
    #[error("scheduler halted after {failures} consecutive failures: {last}")]
    Halted { failures: u32, last: String },
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Image(#[from] image::ImageError),
}

impl PulseVizError {
    pub fn initialization<T: Into<String>>(msg: T) -> Self {
        Self::Initialization(msg.into())
    }

    pub fn extraction<T: Into<String>>(msg: T) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn render<T: Into<String>>(msg: T) -> Self {
        Self::Render(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    /// Returns `true` for failures the scheduler absorbs by skipping a tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Extraction(_) | Self::Render(_))
    }
}
