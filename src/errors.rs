/// Errors reported by a [`Driver`](crate::driver::Driver) implementation.
///
/// Driver errors raised while a job executes are logged on the render thread
/// and execution continues; the offending resource may be unusable.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("backend reported error code {0:#x}")]
    Backend(u32),

    #[error("out of device memory")]
    OutOfMemory,

    #[error("handle does not refer to a live resource")]
    InvalidHandle,

    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

/// Errors that can occur during [`Renderer::new`](crate::Renderer::new).
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("RendererDesc::transient_buffer_size must be non-zero.")]
    ZeroTransientBuffer,

    #[error("RendererDesc::workers must be at least 1.")]
    ZeroWorkers,
}

/// Errors that can occur while decoding a texture header in
/// [`Renderer::load_texture`](crate::Renderer::load_texture).
///
/// Header decoding happens synchronously on the calling thread; on error no
/// handle is reserved and no job is enqueued.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TextureError {
    #[error("data does not start with a recognised texture container magic")]
    UnknownMagic,

    #[error("texture data ends before the header does ({0} bytes)")]
    Truncated(usize),

    #[error("unsupported pixel format (fourcc {0:#x})")]
    UnsupportedFormat(u32),

    #[error("texture has a zero-sized dimension")]
    ZeroSized,
}
