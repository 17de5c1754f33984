/*!

Multi-producer render-command pipeline with a single dedicated render thread.

`render_relay` accepts render work from any number of producer threads, runs
each job's CPU-side `setup` on a worker pool, and serialises every `execute`
onto the one thread that owns the graphics API context. It guarantees that

* all graphics API calls happen on the render thread,
* each job's setup completes before its execute,
* jobs execute in the order they were submitted,
* a submitter never blocks while setup runs.

On top of the job pipeline it owns a persistently-mapped transient upload
buffer (per-frame bump allocation from any producer thread), a GPU
timer-query profiler that double-buffers results back to the producer side,
and a two-token frame-pacing handshake that caps CPU render-ahead at two
frames.

# How to use

```
use render_relay::{driver::*, GlobalState, Renderer, RendererDesc};

# struct NullDriver { upload: Vec<u8>, next_query: u32 }
# impl Driver for NullDriver {
#     fn init(&mut self, _: WindowHandle, _: bool) -> DriverResult<()> { Ok(()) }
#     fn shutdown(&mut self) {}
#     fn swap_buffers(&mut self) {}
#     fn set_vsync(&mut self, _: bool) {}
#     fn create_buffer(&mut self, _: BufferHandle, _: BufferFlags, _: u64, _: Option<&[u8]>) -> DriverResult<()> { Ok(()) }
#     fn update_buffer(&mut self, _: BufferHandle, _: u64, _: &[u8]) -> DriverResult<()> { Ok(()) }
#     fn destroy_buffer(&mut self, _: BufferHandle) {}
#     fn map_buffer(&mut self, _: BufferHandle, _: u64, _: u64, _: MapFlags) -> DriverResult<*mut u8> { Ok(self.upload.as_mut_ptr()) }
#     fn flush_buffer(&mut self, _: BufferHandle, _: u64, _: u64) {}
#     fn unmap_buffer(&mut self, _: BufferHandle) {}
#     fn bind_uniform_buffer(&mut self, _: u32, _: BufferHandle, _: u64, _: u64) {}
#     fn create_texture(&mut self, _: TextureHandle, _: &TextureDesc, _: Option<&[u8]>, _: &str) -> DriverResult<()> { Ok(()) }
#     fn destroy_texture(&mut self, _: TextureHandle) {}
#     fn create_program(&mut self, _: ProgramHandle, _: &ProgramDesc, _: &str) -> DriverResult<()> { Ok(()) }
#     fn destroy_program(&mut self, _: ProgramHandle) {}
#     fn create_framebuffer(&mut self, _: FramebufferHandle, _: &[TextureHandle], _: Option<TextureHandle>) -> DriverResult<()> { Ok(()) }
#     fn destroy_framebuffer(&mut self, _: FramebufferHandle) {}
#     fn create_query(&mut self) -> DriverResult<QueryHandle> { self.next_query += 1; Ok(QueryHandle::from_raw(self.next_query)) }
#     fn destroy_query(&mut self, _: QueryHandle) {}
#     fn query_timestamp(&mut self, _: QueryHandle) {}
#     fn get_query_result(&mut self, _: QueryHandle) -> u64 { 0 }
#     fn push_debug_group(&mut self, _: &str) {}
#     fn pop_debug_group(&mut self) {}
#     fn start_capture(&mut self) {}
#     fn stop_capture(&mut self) {}
# }
# let driver = NullDriver { upload: vec![0; 4096], next_query: 0 };
// The driver is your backend; it is only ever touched on the render thread.
let desc = RendererDesc {
    transient_buffer_size: 4096,
    ..RendererDesc::default()
};
let renderer = Renderer::new(Box::new(driver), desc).unwrap();

// Producer threads hand per-frame data to the GPU through transient slices.
let mut slice = renderer.alloc_transient(256);
if !slice.is_empty() {
    slice.bytes().fill(0x7f);
}

// Pipeline-wide uniforms are mirrored to the driver by a job.
renderer.set_global_state(GlobalState::default());

// GPU timer blocks are recorded on the render thread...
renderer.begin_profile_block("frame");
renderer.end_profile_block();

// ...and a frame ends with the swap + pacing handshake.
renderer.frame();

// Timings of a finished frame come back on the producer side once its swap
// has executed.
# let (tx, rx) = std::sync::mpsc::channel();
# renderer.run_in_render_thread(move |_ctx| drop(tx.send(())));
# rx.recv().unwrap();
let mut timings = Vec::new();
assert!(renderer.get_gpu_timings(&mut timings));
```

# Internals

Each submission schedules two tasks: `setup`, preconditioned on the previous
submission's push signal, and `push`, preconditioned on the setup. The push
task appends the job to the command queue and wakes the render thread, and
its signal becomes the precondition of the next submission. Setups therefore
run off the submitting thread but observe every earlier submission as
already queued, and queue order always equals submission order.

[`Renderer::frame`] pushes the swap job, then blocks on the frame semaphore
(two tokens, one returned per executed swap), then rewinds the transient
allocator on the producer timeline, where the rewind is ordered after every
allocation of the frame. Finish a frame's transient allocations before
calling [`Renderer::frame`], and do not hold a slice across it.

*/

pub mod chrometrace;
pub mod driver;
mod errors;
mod intern;
mod job;
mod profiler;
mod queue;
mod render_thread;
mod scheduler;
mod sync;
mod texture;
mod transient;

pub use errors::{DriverError, SettingsError, TextureError};
pub use job::{RenderContext, RenderJob};
pub use profiler::GpuTimerRecord;
pub use scheduler::{Scheduler, Signal};
pub use texture::{parse_header, TextureInfo};
pub use transient::TransientSlice;

// ---------------

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use glam::{Mat4, Vec4};
use parking_lot::Mutex;

use crate::driver::{
    BufferFlags, BufferHandle, Driver, FramebufferHandle, HandleAllocators, ProgramDesc,
    ProgramHandle, TextureDesc, TextureFlags, TextureHandle, WindowHandle,
};
use crate::intern::NameTable;
use crate::job::{
    BeginBlockJob, CaptureJob, CreateBufferJob, CreateFramebufferJob, CreateProgramJob,
    CreateTextureJob, DestroyBufferJob, DestroyFramebufferJob, DestroyProgramJob,
    DestroyTextureJob, EndBlockJob, FunctionJob, LoadTextureJob, SetVsyncJob, ShutdownJob,
    SwapJob, UpdateGlobalStateJob,
};
use crate::profiler::TimingsRing;
use crate::queue::CommandQueue;
use crate::sync::Semaphore;
use crate::transient::TransientAllocator;

/// Uniform-buffer binding slot the global state lives in.
pub const GLOBAL_STATE_BINDING: u32 = 0;

/// Maximum number of interned shader defines.
pub const MAX_SHADER_DEFINES: usize = 64;

/// Maximum number of interned render layers.
pub const MAX_LAYERS: usize = 64;

/// Bytes handed to jobs without caller lifetime concerns.
///
/// Either an owned staging allocation ([`MemRef::allocate`] /
/// [`MemRef::copy`]) or a borrow of static data. Freed by `Drop`.
#[derive(Debug)]
pub struct MemRef {
    bytes: Bytes,
}

#[derive(Debug)]
enum Bytes {
    Owned(Box<[u8]>),
    Static(&'static [u8]),
}

impl MemRef {
    /// An owned, zero-initialised staging allocation.
    pub fn allocate(size: usize) -> Self {
        Self {
            bytes: Bytes::Owned(vec![0; size].into_boxed_slice()),
        }
    }

    /// An owned copy of `data`.
    pub fn copy(data: &[u8]) -> Self {
        Self {
            bytes: Bytes::Owned(data.into()),
        }
    }

    /// Borrow static data without copying.
    pub fn from_static(data: &'static [u8]) -> Self {
        Self {
            bytes: Bytes::Static(data),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.bytes {
            Bytes::Owned(data) => data,
            Bytes::Static(data) => data,
        }
    }

    /// Mutable view of the bytes; static data is copied to an owned
    /// allocation first.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if let Bytes::Static(data) = &self.bytes {
            let owned: Box<[u8]> = (*data).into();
            self.bytes = Bytes::Owned(owned);
        }
        match &mut self.bytes {
            Bytes::Owned(data) => data,
            Bytes::Static(_) => unreachable!(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// Pipeline-global shading parameters, mirrored into the uniform buffer at
/// [`GLOBAL_STATE_BINDING`] whenever [`Renderer::set_global_state`] runs.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlobalState {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub camera_position: Vec4,
    /// Direction of the main light, w unused.
    pub light_direction: Vec4,
    /// Colour of the main light, intensity in w.
    pub light_color: Vec4,
    pub ambient_color: Vec4,
    /// Viewport size in xy, time in seconds in z, w unused.
    pub frame_params: Vec4,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            camera_position: Vec4::ZERO,
            light_direction: Vec4::new(0.0, -1.0, 0.0, 0.0),
            light_color: Vec4::ONE,
            ambient_color: Vec4::new(0.1, 0.1, 0.1, 1.0),
            frame_params: Vec4::ZERO,
        }
    }
}

/// Settings passed on initialisation of [`Renderer`].
#[derive(Debug, Clone)]
pub struct RendererDesc {
    /// Platform window handle forwarded to [`Driver::init`].
    pub window: WindowHandle,

    /// Vertical sync, on unless `-no_vsync` was given.
    pub vsync: bool,

    /// Size of the per-frame transient upload buffer.
    ///
    /// Exhausting it makes [`Renderer::alloc_transient`] return empty slices
    /// until the next swap. Must be non-zero.
    pub transient_buffer_size: u32,

    /// Worker threads running job setups. Must be at least 1.
    pub workers: usize,
}

impl Default for RendererDesc {
    fn default() -> Self {
        Self {
            window: WindowHandle::default(),
            vsync: true,
            transient_buffer_size: 64 * 1024 * 1024,
            workers: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
        }
    }
}

impl RendererDesc {
    /// Default settings with the recognised command-line flags applied.
    ///
    /// The single recognised flag is `-no_vsync`; everything else is left
    /// for the caller.
    pub fn from_args(args: impl IntoIterator<Item = String>) -> Self {
        let mut desc = Self::default();
        for arg in args {
            if arg == "-no_vsync" {
                desc.vsync = false;
            }
        }
        desc
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.transient_buffer_size == 0 {
            Err(SettingsError::ZeroTransientBuffer)
        } else if self.workers == 0 {
            Err(SettingsError::ZeroWorkers)
        } else {
            Ok(())
        }
    }
}

/// State shared between the facade, the scheduler tasks and the render thread.
pub(crate) struct RendererShared {
    pub(crate) queue: CommandQueue,
    /// Two tokens; one taken per `frame()`, one returned per executed swap.
    pub(crate) frame_sem: Semaphore,
    pub(crate) init_sem: Semaphore,
    pub(crate) finished_sem: Semaphore,
    pub(crate) transient: TransientAllocator,
    pub(crate) timings: TimingsRing,
    pub(crate) global_state: Mutex<GlobalState>,
    pub(crate) global_uniforms: BufferHandle,
    pub(crate) default_framebuffer: FramebufferHandle,
    pub(crate) window: WindowHandle,
    pub(crate) vsync: bool,
    pub(crate) frame_index: AtomicU64,
    pub(crate) render_thread_id: OnceLock<std::thread::ThreadId>,
}

/// The pipeline facade.
///
/// Safe to call from any thread. Entry points reserve handles synchronously
/// and enqueue scheduler tasks; nothing here touches driver state. Dropping
/// the renderer executes every previously submitted job, tears the render
/// thread down and joins it.
pub struct Renderer {
    shared: Arc<RendererShared>,
    scheduler: Scheduler,
    /// Push signal of the most recent submission: precondition of the next
    /// setup, wait target of `frame()` and of shutdown.
    last_push: Mutex<Signal>,
    handles: HandleAllocators,
    layers: NameTable,
    defines: NameTable,
    thread: Option<JoinHandle<()>>,
}

impl Renderer {
    /// Spawn the render thread, initialise the driver on it and wait until
    /// producers may submit work and allocate transient memory.
    pub fn new(driver: Box<dyn Driver>, desc: RendererDesc) -> Result<Self, SettingsError> {
        desc.validate()?;

        let handles = HandleAllocators::new();
        let transient_buffer = handles.buffer();
        let global_uniforms = handles.buffer();
        let default_framebuffer = handles.framebuffer();

        let shared = Arc::new(RendererShared {
            queue: CommandQueue::new(),
            frame_sem: Semaphore::new(2, 2),
            init_sem: Semaphore::new(0, 1),
            finished_sem: Semaphore::new(0, 1),
            transient: TransientAllocator::new(transient_buffer, desc.transient_buffer_size),
            timings: TimingsRing::new(),
            global_state: Mutex::new(GlobalState::default()),
            global_uniforms,
            default_framebuffer,
            window: desc.window,
            vsync: desc.vsync,
            frame_index: AtomicU64::new(0),
            render_thread_id: OnceLock::new(),
        });

        let thread = render_thread::spawn(driver, Arc::clone(&shared));
        shared.init_sem.wait();

        Ok(Self {
            shared,
            scheduler: Scheduler::new(desc.workers),
            last_push: Mutex::new(Signal::fired()),
            handles,
            layers: NameTable::new("render layers", MAX_LAYERS),
            defines: NameTable::new("shader defines", MAX_SHADER_DEFINES),
            thread: Some(thread),
        })
    }

    // ---- submission --------------------------------------------------------

    /// Submit a job: its `setup` runs on a worker once every earlier
    /// submission has been pushed, its `execute` runs on the render thread
    /// in submission order. Never blocks.
    pub fn push(&self, job: Box<dyn RenderJob>) {
        // The job travels setup task -> push task through this slot; the
        // signal chain orders the accesses, the mutex satisfies the borrow
        // rules across the two closures.
        let slot = Arc::new(Mutex::new(Some(job)));

        let mut last = self.last_push.lock();
        let setup = {
            let slot = Arc::clone(&slot);
            self.scheduler.run(Some(&*last), move || {
                if let Some(job) = slot.lock().as_mut() {
                    job.setup();
                }
            })
        };
        let shared = Arc::clone(&self.shared);
        let push = self.scheduler.run(Some(&setup), move || {
            if let Some(job) = slot.lock().take() {
                shared.queue.push(job);
            }
        });
        *last = push;
    }

    /// Run an arbitrary closure on the render thread, ordered like any other
    /// submission.
    pub fn run_in_render_thread(
        &self,
        f: impl FnOnce(&mut RenderContext<'_>) + Send + 'static,
    ) {
        self.push(Box::new(FunctionJob { f: Some(f) }));
    }

    /// End the frame: push the swap job, then block until the GPU is at most
    /// two frames behind, then drain this frame's producer-side tasks.
    ///
    /// Infallible. All transient allocations for the frame must be finished
    /// before this is called; the bump offset is rewound here, on the
    /// producer timeline, so it is provably ordered after every allocation
    /// of the frame.
    pub fn frame(&self) {
        let transient_used = self.shared.transient.used();
        self.push(Box::new(SwapJob { transient_used }));
        self.shared.frame_sem.wait();
        self.shared.transient.reset();
        let last = self.last_push.lock().clone();
        last.wait();
        self.shared.frame_index.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of completed [`Renderer::frame`] calls.
    pub fn frame_index(&self) -> u64 {
        self.shared.frame_index.load(Ordering::Relaxed)
    }

    // ---- resources ---------------------------------------------------------

    /// Create a buffer with the given contents. The handle is valid
    /// immediately; the resource exists once the creation job has executed.
    ///
    /// Returns the invalid handle (and enqueues nothing) if the id space is
    /// exhausted; callers must check validity.
    #[must_use]
    pub fn create_buffer(&self, mem: MemRef, flags: BufferFlags) -> BufferHandle {
        let handle = self.handles.buffer();
        if handle.is_valid() {
            self.push(Box::new(CreateBufferJob { handle, flags, mem }));
        }
        handle
    }

    pub fn destroy_buffer(&self, handle: BufferHandle) {
        if handle.is_valid() {
            self.push(Box::new(DestroyBufferJob(handle)));
        }
    }

    /// Create a texture from a full description and optional initial data.
    #[must_use]
    pub fn create_texture(
        &self,
        desc: TextureDesc,
        mem: Option<MemRef>,
        name: &str,
    ) -> TextureHandle {
        let handle = self.handles.texture();
        if handle.is_valid() {
            self.push(Box::new(CreateTextureJob {
                handle,
                desc,
                mem,
                name: name.to_owned(),
            }));
        }
        handle
    }

    /// Create a texture from a container file (DDS).
    ///
    /// The header is decoded synchronously so the returned [`TextureInfo`]
    /// is available immediately; the pixel payload is uploaded by the
    /// creation job. On a decode error nothing is enqueued.
    pub fn load_texture(
        &self,
        mem: MemRef,
        flags: TextureFlags,
        name: &str,
    ) -> Result<(TextureHandle, TextureInfo), TextureError> {
        let info = texture::parse_header(mem.as_slice())?;
        let handle = self.handles.texture();
        if !handle.is_valid() {
            return Ok((handle, info));
        }
        let mut flags = flags;
        if info.is_cubemap {
            flags |= TextureFlags::CUBE;
        }
        let desc = TextureDesc {
            width: info.width,
            height: info.height,
            depth: info.depth * if info.is_cubemap { 6 } else { 1 },
            mips: info.mips,
            format: info.format,
            flags,
        };
        self.push(Box::new(LoadTextureJob {
            handle,
            desc,
            info,
            mem,
            name: name.to_owned(),
            payload: 0..0,
        }));
        Ok((handle, info))
    }

    pub fn destroy_texture(&self, handle: TextureHandle) {
        if handle.is_valid() {
            self.push(Box::new(DestroyTextureJob(handle)));
        }
    }

    /// Create a shader program. The define *names* in `desc` are folded into
    /// the sources during the job's setup phase.
    #[must_use]
    pub fn create_program(&self, desc: ProgramDesc, name: &str) -> ProgramHandle {
        let handle = self.handles.program();
        if handle.is_valid() {
            self.push(Box::new(CreateProgramJob {
                handle,
                desc,
                name: name.to_owned(),
            }));
        }
        handle
    }

    pub fn destroy_program(&self, handle: ProgramHandle) {
        if handle.is_valid() {
            self.push(Box::new(DestroyProgramJob(handle)));
        }
    }

    #[must_use]
    pub fn create_framebuffer(
        &self,
        attachments: &[TextureHandle],
        depth: Option<TextureHandle>,
    ) -> FramebufferHandle {
        let handle = self.handles.framebuffer();
        if handle.is_valid() {
            self.push(Box::new(CreateFramebufferJob {
                handle,
                attachments: attachments.to_vec(),
                depth,
            }));
        }
        handle
    }

    pub fn destroy_framebuffer(&self, handle: FramebufferHandle) {
        if handle.is_valid() {
            self.push(Box::new(DestroyFramebufferJob(handle)));
        }
    }

    /// The framebuffer targeting the backbuffer, created at startup.
    pub fn default_framebuffer(&self) -> FramebufferHandle {
        self.shared.default_framebuffer
    }

    // ---- transient memory --------------------------------------------------

    /// Bump-allocate `size` bytes of per-frame upload memory on the calling
    /// thread.
    ///
    /// Returns an empty slice once the frame's budget is exhausted; callers
    /// degrade or skip. The slice is valid until the next [`Renderer::frame`]
    /// call and must not be held across it.
    pub fn alloc_transient(&self, size: u32) -> TransientSlice {
        self.shared.transient.alloc(size)
    }

    // ---- global state ------------------------------------------------------

    /// Replace the pipeline-global shading parameters and mirror them into
    /// the uniform buffer at [`GLOBAL_STATE_BINDING`].
    pub fn set_global_state(&self, state: GlobalState) {
        *self.shared.global_state.lock() = state;
        self.push(Box::new(UpdateGlobalStateJob { state }));
    }

    pub fn global_state(&self) -> GlobalState {
        *self.shared.global_state.lock()
    }

    // ---- profiling & capture -----------------------------------------------

    /// Open a GPU timer block (and driver debug group) at this point of the
    /// submission stream. Blocks may nest; close with
    /// [`Renderer::end_profile_block`] before the frame ends.
    pub fn begin_profile_block(&self, name: &'static str) {
        self.push(Box::new(BeginBlockJob(name)));
    }

    pub fn end_profile_block(&self) {
        self.push(Box::new(EndBlockJob));
    }

    /// Fetch the oldest unread frame of GPU timings into `out`.
    ///
    /// Non-blocking; returns false when no unread frame exists. Each frame
    /// is returned exactly once, oldest first.
    pub fn get_gpu_timings(&self, out: &mut Vec<GpuTimerRecord>) -> bool {
        self.shared.timings.read_into(out)
    }

    pub fn start_capture(&self) {
        self.push(Box::new(CaptureJob { start: true }));
    }

    pub fn stop_capture(&self) {
        self.push(Box::new(CaptureJob { start: false }));
    }

    /// Toggle vertical sync at runtime.
    pub fn set_vsync(&self, on: bool) {
        self.push(Box::new(SetVsyncJob { on }));
    }

    // ---- intern tables -----------------------------------------------------

    /// Byte index of a render layer, interning the name on first use.
    ///
    /// Registration of new names must happen during initialisation or under
    /// external synchronisation; see [`MAX_LAYERS`] for the cap.
    pub fn layer_index(&self, name: &str) -> u8 {
        self.layers.index_of(name)
    }

    pub fn layer_name(&self, index: u8) -> Option<String> {
        self.layers.name(index)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Byte index of a shader define, interning the name on first use.
    ///
    /// Same contract as [`Renderer::layer_index`]; the table must be frozen
    /// before parallel program creation starts. Cap: [`MAX_SHADER_DEFINES`].
    pub fn shader_define_index(&self, name: &str) -> u8 {
        self.defines.index_of(name)
    }

    pub fn shader_define(&self, index: u8) -> Option<String> {
        self.defines.name(index)
    }

    pub fn shader_define_count(&self) -> usize {
        self.defines.len()
    }
}

impl Drop for Renderer {
    /// Cooperative shutdown: a poison-pill job flips the render loop's flag;
    /// everything submitted before it still executes. We then drain the
    /// producer-side chain, wait for the render thread's teardown handshake
    /// and join it.
    fn drop(&mut self) {
        self.push(Box::new(ShutdownJob));
        let last = self.last_push.lock().clone();
        self.scheduler.wait(&last);
        self.shared.finished_sem.wait();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
