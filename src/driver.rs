//! The opaque graphics backend consumed by the pipeline.
//!
//! [`Driver`] is the full capability set the render thread needs; every
//! method is called on that thread only. Handle *allocation* is the one
//! exception to the single-thread rule: ids are reserved through atomic
//! allocators owned by the pipeline, which never touch driver state, so any
//! producer thread can reserve a handle synchronously and reference it in
//! later jobs. FIFO job execution guarantees the creation job runs before
//! any use.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::errors::DriverError;

/// Opaque platform window handle forwarded to [`Driver::init`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowHandle(pub usize);

macro_rules! handle_type {
    ($(#[doc = $doc:literal] $name:ident,)*) => {
        $(
            #[doc = $doc]
            ///
            /// A small opaque id plus a validity sentinel. Reserved
            /// synchronously on any thread; the resource itself becomes live
            /// once its creation job has executed on the render thread.
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(u32);

            impl $name {
                pub const INVALID: Self = Self(u32::MAX);

                #[inline]
                pub fn is_valid(self) -> bool {
                    self != Self::INVALID
                }

                /// The raw id, for backends that index their own tables with it.
                #[inline]
                pub fn raw(self) -> u32 {
                    self.0
                }

                /// Wrap a raw id; backends minting their own handles (e.g.
                /// from [`Driver::create_query`]) use this.
                #[inline]
                pub fn from_raw(raw: u32) -> Self {
                    Self(raw)
                }
            }
        )*
    };
}

handle_type! {
    #[doc = "Handle of a device buffer."]
    BufferHandle,
    #[doc = "Handle of a texture."]
    TextureHandle,
    #[doc = "Handle of a shader program."]
    ProgramHandle,
    #[doc = "Handle of a framebuffer."]
    FramebufferHandle,
    #[doc = "Handle of a timestamp query."]
    QueryHandle,
}

bitflags! {
    /// Storage flags for [`Driver::create_buffer`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        const DYNAMIC_STORAGE = 1 << 0;
        const PERSISTENT = 1 << 1;
        const MAP_WRITE = 1 << 2;
        const MAP_FLUSH_EXPLICIT = 1 << 3;
    }
}

bitflags! {
    /// Flags for [`Driver::map_buffer`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const WRITE = 1 << 0;
        const PERSISTENT = 1 << 1;
        const FLUSH_EXPLICIT = 1 << 2;
    }
}

bitflags! {
    /// Creation flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TextureFlags: u32 {
        const SRGB = 1 << 0;
        const CUBE = 1 << 1;
        const NO_MIPS = 1 << 2;
        const RENDER_TARGET = 1 << 3;
        const POINT_FILTER = 1 << 4;
        const CLAMP = 1 << 5;
    }
}

/// Pixel formats the pipeline can describe to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8,
    Rgba16F,
    R8,
    Depth32,
    Bc1,
    Bc2,
    Bc3,
}

impl TextureFormat {
    /// Byte size of one full surface at the given dimensions.
    ///
    /// Block-compressed formats round dimensions up to whole 4x4 blocks.
    pub fn surface_size(self, width: u32, height: u32) -> u64 {
        let (w, h) = (u64::from(width), u64::from(height));
        match self {
            Self::Rgba8 => w * h * 4,
            Self::Rgba16F => w * h * 8,
            Self::R8 => w * h,
            Self::Depth32 => w * h * 4,
            Self::Bc1 => w.div_ceil(4) * h.div_ceil(4) * 8,
            Self::Bc2 | Self::Bc3 => w.div_ceil(4) * h.div_ceil(4) * 16,
        }
    }
}

/// Full description of a texture passed to [`Driver::create_texture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    /// Array layer count; 1 for plain 2D textures, 6 layers per face for cubemaps.
    pub depth: u32,
    pub mips: u32,
    pub format: TextureFormat,
    pub flags: TextureFlags,
}

/// Shader sources handed to [`Driver::create_program`].
///
/// `defines` holds the names resolved from the renderer's define table; the
/// job's setup phase folds them into the sources before the driver sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramDesc {
    pub vertex_src: String,
    pub fragment_src: String,
    pub defines: Vec<String>,
}

pub type DriverResult<T> = Result<T, DriverError>;

/// The capability set the render thread consumes.
///
/// All methods must be called from the render thread; the pipeline upholds
/// this by construction (only [`RenderJob::execute`](crate::RenderJob::execute)
/// ever sees the driver) and asserts it in debug builds. Implementations may
/// therefore use thread-affine API state freely.
///
/// Fallible operations return a [`DriverError`]; the pipeline logs failures
/// that surface during job execution and carries on.
pub trait Driver: Send {
    /// Initialise the API context against the platform window.
    ///
    /// Called once, on the render thread, before any other method.
    fn init(&mut self, window: WindowHandle, vsync: bool) -> DriverResult<()>;

    /// Tear down the context. No method is called after this.
    fn shutdown(&mut self);

    fn swap_buffers(&mut self);

    fn set_vsync(&mut self, on: bool);

    fn create_buffer(
        &mut self,
        handle: BufferHandle,
        flags: BufferFlags,
        size: u64,
        initial: Option<&[u8]>,
    ) -> DriverResult<()>;

    fn update_buffer(&mut self, handle: BufferHandle, offset: u64, data: &[u8])
        -> DriverResult<()>;

    fn destroy_buffer(&mut self, handle: BufferHandle);

    /// Map a buffer range, returning a host pointer valid until
    /// [`Self::unmap_buffer`]. With [`MapFlags::PERSISTENT`] the pointer
    /// stays valid while the buffer is in use by the device.
    fn map_buffer(
        &mut self,
        handle: BufferHandle,
        offset: u64,
        size: u64,
        flags: MapFlags,
    ) -> DriverResult<*mut u8>;

    /// Make host writes to an explicitly-flushed mapping visible to the device.
    fn flush_buffer(&mut self, handle: BufferHandle, offset: u64, size: u64);

    fn unmap_buffer(&mut self, handle: BufferHandle);

    fn bind_uniform_buffer(&mut self, binding: u32, buffer: BufferHandle, offset: u64, size: u64);

    fn create_texture(
        &mut self,
        handle: TextureHandle,
        desc: &TextureDesc,
        initial: Option<&[u8]>,
        name: &str,
    ) -> DriverResult<()>;

    fn destroy_texture(&mut self, handle: TextureHandle);

    fn create_program(
        &mut self,
        handle: ProgramHandle,
        desc: &ProgramDesc,
        name: &str,
    ) -> DriverResult<()>;

    fn destroy_program(&mut self, handle: ProgramHandle);

    /// An empty attachment list creates the default (backbuffer) framebuffer.
    fn create_framebuffer(
        &mut self,
        handle: FramebufferHandle,
        attachments: &[TextureHandle],
        depth: Option<TextureHandle>,
    ) -> DriverResult<()>;

    fn destroy_framebuffer(&mut self, handle: FramebufferHandle);

    fn create_query(&mut self) -> DriverResult<QueryHandle>;

    fn destroy_query(&mut self, handle: QueryHandle);

    /// Record a timestamp into the query at the device timeline's current point.
    fn query_timestamp(&mut self, handle: QueryHandle);

    /// Read a recorded timestamp back, blocking or spinning as the backend
    /// requires until the result is available.
    fn get_query_result(&mut self, handle: QueryHandle) -> u64;

    fn push_debug_group(&mut self, name: &str);

    fn pop_debug_group(&mut self);

    fn start_capture(&mut self);

    fn stop_capture(&mut self);
}

/// Thread-safe id allocator for one handle kind.
///
/// Reservation is a single atomic increment and never consults the driver,
/// so producers get their handle back synchronously.
pub(crate) struct HandleAllocator {
    next: AtomicU32,
}

impl HandleAllocator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
        }
    }

    /// Reserve the next id, or `None` once the id space is exhausted.
    ///
    /// The counter latches at the sentinel: a plain `fetch_add` would wrap
    /// past `u32::MAX` and hand out ids that are still live.
    pub(crate) fn alloc(&self) -> Option<u32> {
        // Relaxed suffices: ids only need to be unique, the creation job's
        // FIFO position provides all ordering callers can observe.
        let mut id = self.next.load(Ordering::Relaxed);
        loop {
            if id == u32::MAX {
                return None;
            }
            match self.next.compare_exchange_weak(
                id,
                id + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(id),
                Err(current) => id = current,
            }
        }
    }
}

pub(crate) struct HandleAllocators {
    pub buffers: HandleAllocator,
    pub textures: HandleAllocator,
    pub programs: HandleAllocator,
    pub framebuffers: HandleAllocator,
}

impl HandleAllocators {
    pub(crate) fn new() -> Self {
        Self {
            buffers: HandleAllocator::new(),
            textures: HandleAllocator::new(),
            programs: HandleAllocator::new(),
            framebuffers: HandleAllocator::new(),
        }
    }

    pub(crate) fn buffer(&self) -> BufferHandle {
        self.buffers
            .alloc()
            .map_or(BufferHandle::INVALID, BufferHandle::from_raw)
    }

    pub(crate) fn texture(&self) -> TextureHandle {
        self.textures
            .alloc()
            .map_or(TextureHandle::INVALID, TextureHandle::from_raw)
    }

    pub(crate) fn program(&self) -> ProgramHandle {
        self.programs
            .alloc()
            .map_or(ProgramHandle::INVALID, ProgramHandle::from_raw)
    }

    pub(crate) fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffers
            .alloc()
            .map_or(FramebufferHandle::INVALID, FramebufferHandle::from_raw)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::HandleAllocator;

    #[test]
    fn ids_are_sequential() {
        let allocator = HandleAllocator::new();
        assert_eq!(allocator.alloc(), Some(0));
        assert_eq!(allocator.alloc(), Some(1));
    }

    #[test]
    fn exhaustion_latches_instead_of_wrapping() {
        let allocator = HandleAllocator::new();
        allocator.next.store(u32::MAX - 1, Ordering::Relaxed);
        assert_eq!(allocator.alloc(), Some(u32::MAX - 1));
        assert_eq!(allocator.alloc(), None);
        // Still exhausted; the counter must not wrap to a live id.
        assert_eq!(allocator.alloc(), None);
    }
}
