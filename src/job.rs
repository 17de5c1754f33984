//! The unit of work flowing through the pipeline.
//!
//! A [`RenderJob`] has two phases: `setup` runs on a scheduler worker, after
//! every earlier submission has been pushed; `execute` runs on the render
//! thread, in submission order, and is the only place that ever sees the
//! [`Driver`]. The render thread drops the job right after `execute`.

use std::ops::Range;

use crate::driver::{
    BufferHandle, Driver, FramebufferHandle, ProgramDesc, ProgramHandle, TextureDesc,
    TextureHandle,
};
use crate::profiler::QueryRecorder;
use crate::texture::{TextureInfo, DDS_DATA_OFFSET};
use crate::{GlobalState, MemRef, RendererShared};

/// A pipeline work item.
///
/// `setup` has a default empty body; jobs that need no producer-side phase
/// only implement `execute`.
pub trait RenderJob: Send {
    /// Producer-side preparation, run on a scheduler worker. Guaranteed to
    /// have returned before `execute` begins, and never run concurrently
    /// with the `execute` of an earlier submission.
    fn setup(&mut self) {}

    /// Render-thread phase. All driver access happens here.
    fn execute(&mut self, ctx: &mut RenderContext<'_>);
}

/// Render-thread state handed to [`RenderJob::execute`].
pub struct RenderContext<'a> {
    pub(crate) driver: &'a mut dyn Driver,
    pub(crate) queries: &'a mut QueryRecorder,
    pub(crate) shared: &'a RendererShared,
    pub(crate) stop: &'a mut bool,
}

impl RenderContext<'_> {
    /// The graphics backend. Only callable where a `RenderContext` exists,
    /// i.e. on the render thread.
    pub fn driver(&mut self) -> &mut dyn Driver {
        debug_assert_eq!(
            self.shared.render_thread_id.get(),
            Some(&std::thread::current().id()),
            "driver accessed off the render thread"
        );
        &mut *self.driver
    }

    /// Open a GPU timer block (and a driver debug group) at this point of
    /// the command stream.
    pub fn begin_profile_block(&mut self, name: &'static str) {
        self.queries.begin(&mut *self.driver, name);
        self.driver.push_debug_group(name);
    }

    /// Close the innermost GPU timer block.
    pub fn end_profile_block(&mut self) {
        self.queries.end(&mut *self.driver);
        self.driver.pop_debug_group();
    }
}

// ---- resource operations ---------------------------------------------------

pub(crate) struct CreateBufferJob {
    pub handle: BufferHandle,
    pub flags: crate::driver::BufferFlags,
    pub mem: MemRef,
}

impl RenderJob for CreateBufferJob {
    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        let size = self.mem.len() as u64;
        if let Err(err) = ctx
            .driver
            .create_buffer(self.handle, self.flags, size, Some(self.mem.as_slice()))
        {
            log::error!("buffer {:?} creation failed: {err}", self.handle);
        }
    }
}

pub(crate) struct CreateTextureJob {
    pub handle: TextureHandle,
    pub desc: TextureDesc,
    pub mem: Option<MemRef>,
    pub name: String,
}

impl RenderJob for CreateTextureJob {
    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        let initial = self.mem.as_ref().map(MemRef::as_slice);
        if let Err(err) = ctx
            .driver
            .create_texture(self.handle, &self.desc, initial, &self.name)
        {
            log::error!("texture {:?} ({}) creation failed: {err}", self.handle, self.name);
        }
    }
}

pub(crate) struct LoadTextureJob {
    pub handle: TextureHandle,
    pub desc: TextureDesc,
    pub info: TextureInfo,
    pub mem: MemRef,
    pub name: String,
    pub payload: Range<usize>,
}

impl RenderJob for LoadTextureJob {
    /// Validates the pixel payload against the surface chain the header
    /// promised; a short file uploads what is there.
    fn setup(&mut self) {
        let expected = self.info.data_size() as usize;
        let available = self.mem.len().saturating_sub(DDS_DATA_OFFSET);
        if available < expected {
            log::warn!(
                "texture {} payload is {available} bytes, header promises {expected}",
                self.name
            );
        }
        self.payload = DDS_DATA_OFFSET..DDS_DATA_OFFSET + available.min(expected);
    }

    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        let initial = &self.mem.as_slice()[self.payload.clone()];
        if let Err(err) = ctx
            .driver
            .create_texture(self.handle, &self.desc, Some(initial), &self.name)
        {
            log::error!("texture {:?} ({}) creation failed: {err}", self.handle, self.name);
        }
    }
}

pub(crate) struct CreateProgramJob {
    pub handle: ProgramHandle,
    pub desc: ProgramDesc,
    pub name: String,
}

impl RenderJob for CreateProgramJob {
    /// Folds the resolved define names into the shader sources, so the
    /// driver sees self-contained text and the define table is read only on
    /// producer-side workers before compilation starts.
    fn setup(&mut self) {
        if self.desc.defines.is_empty() {
            return;
        }
        let prelude: String = self
            .desc
            .defines
            .drain(..)
            .map(|define| format!("#define {define}\n"))
            .collect();
        self.desc.vertex_src.insert_str(0, &prelude);
        self.desc.fragment_src.insert_str(0, &prelude);
    }

    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        if let Err(err) = ctx.driver.create_program(self.handle, &self.desc, &self.name) {
            log::error!("program {:?} ({}) creation failed: {err}", self.handle, self.name);
        }
    }
}

pub(crate) struct CreateFramebufferJob {
    pub handle: FramebufferHandle,
    pub attachments: Vec<TextureHandle>,
    pub depth: Option<TextureHandle>,
}

impl RenderJob for CreateFramebufferJob {
    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        if let Err(err) =
            ctx.driver
                .create_framebuffer(self.handle, &self.attachments, self.depth)
        {
            log::error!("framebuffer {:?} creation failed: {err}", self.handle);
        }
    }
}

macro_rules! destroy_job {
    ($($job:ident($handle:ty) => $method:ident,)*) => {
        $(
            pub(crate) struct $job(pub $handle);

            impl RenderJob for $job {
                fn execute(&mut self, ctx: &mut RenderContext<'_>) {
                    ctx.driver.$method(self.0);
                }
            }
        )*
    };
}

destroy_job! {
    DestroyBufferJob(BufferHandle) => destroy_buffer,
    DestroyTextureJob(TextureHandle) => destroy_texture,
    DestroyProgramJob(ProgramHandle) => destroy_program,
    DestroyFramebufferJob(FramebufferHandle) => destroy_framebuffer,
}

// ---- pipeline-global state -------------------------------------------------

pub(crate) struct UpdateGlobalStateJob {
    pub state: GlobalState,
}

impl RenderJob for UpdateGlobalStateJob {
    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        let handle = ctx.shared.global_uniforms;
        if let Err(err) = ctx
            .driver
            .update_buffer(handle, 0, bytemuck::bytes_of(&self.state))
        {
            log::error!("global state upload failed: {err}");
        }
    }
}

// ---- profiling & capture ---------------------------------------------------

pub(crate) struct BeginBlockJob(pub &'static str);

impl RenderJob for BeginBlockJob {
    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        ctx.begin_profile_block(self.0);
    }
}

pub(crate) struct EndBlockJob;

impl RenderJob for EndBlockJob {
    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        ctx.end_profile_block();
    }
}

pub(crate) struct CaptureJob {
    pub start: bool,
}

impl RenderJob for CaptureJob {
    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        if self.start {
            ctx.driver.start_capture();
        } else {
            ctx.driver.stop_capture();
        }
    }
}

pub(crate) struct SetVsyncJob {
    pub on: bool,
}

impl RenderJob for SetVsyncJob {
    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        ctx.driver.set_vsync(self.on);
    }
}

// ---- frame boundary & control ----------------------------------------------

/// End-of-frame job: flushes the frame's transient writes, flips buffers,
/// ticks the profiler and releases one frame-pacing token.
///
/// The transient *offset* is rewound by [`Renderer::frame`](crate::Renderer::frame)
/// on the producer timeline, not here; `transient_used` captures the range
/// to flush at push time.
pub(crate) struct SwapJob {
    pub transient_used: u64,
}

impl RenderJob for SwapJob {
    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        if self.transient_used > 0 {
            ctx.driver
                .flush_buffer(ctx.shared.transient.buffer(), 0, self.transient_used);
        }
        ctx.driver.swap_buffers();
        ctx.queries.frame(&mut *ctx.driver, &ctx.shared.timings);
        ctx.shared.frame_sem.signal();
    }
}

/// Poison pill: the render loop exits after this job, having executed
/// everything queued before it.
pub(crate) struct ShutdownJob;

impl RenderJob for ShutdownJob {
    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        *ctx.stop = true;
    }
}

/// Wrapper for [`Renderer::run_in_render_thread`](crate::Renderer::run_in_render_thread).
pub(crate) struct FunctionJob<F> {
    pub f: Option<F>,
}

impl<F> RenderJob for FunctionJob<F>
where
    F: FnOnce(&mut RenderContext<'_>) + Send,
{
    fn execute(&mut self, ctx: &mut RenderContext<'_>) {
        if let Some(f) = self.f.take() {
            f(ctx);
        }
    }
}
