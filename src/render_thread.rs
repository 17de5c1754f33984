//! The one thread that owns the graphics API context.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::driver::{BufferFlags, Driver, MapFlags};
use crate::job::RenderContext;
use crate::profiler::QueryRecorder;
use crate::{GlobalState, RendererShared};

pub(crate) fn spawn(driver: Box<dyn Driver>, shared: Arc<RendererShared>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("render".to_owned())
        .spawn(move || {
            RenderThread {
                driver,
                shared,
                queries: QueryRecorder::new(),
            }
            .run();
        })
        .expect("failed to spawn the render thread")
}

struct RenderThread {
    driver: Box<dyn Driver>,
    shared: Arc<RendererShared>,
    queries: QueryRecorder,
}

impl RenderThread {
    fn run(mut self) {
        self.startup();
        self.drain();
        self.teardown();
        // Pairs with the wait in Renderer::drop.
        self.shared.finished_sem.signal();
    }

    /// Bring up the context and the pipeline-owned resources, then release
    /// `Renderer::new` (and with it the first producer) via the init
    /// handshake.
    fn startup(&mut self) {
        let shared = &self.shared;
        shared
            .render_thread_id
            .set(std::thread::current().id())
            .expect("render thread started twice");

        let driver = &mut *self.driver;
        if let Err(err) = driver.init(shared.window, shared.vsync) {
            log::error!("driver initialisation failed: {err}");
        }

        if let Err(err) = driver.create_framebuffer(shared.default_framebuffer, &[], None) {
            log::error!("default framebuffer creation failed: {err}");
        }

        let state_size = std::mem::size_of::<GlobalState>() as u64;
        let default_state = GlobalState::default();
        if let Err(err) = driver.create_buffer(
            shared.global_uniforms,
            BufferFlags::DYNAMIC_STORAGE,
            state_size,
            Some(bytemuck::bytes_of(&default_state)),
        ) {
            log::error!("global uniform buffer creation failed: {err}");
        }
        driver.bind_uniform_buffer(crate::GLOBAL_STATE_BINDING, shared.global_uniforms, 0, state_size);

        let transient = &shared.transient;
        let flags = BufferFlags::DYNAMIC_STORAGE
            | BufferFlags::PERSISTENT
            | BufferFlags::MAP_WRITE
            | BufferFlags::MAP_FLUSH_EXPLICIT;
        match driver
            .create_buffer(transient.buffer(), flags, transient.capacity(), None)
            .and_then(|()| {
                driver.map_buffer(
                    transient.buffer(),
                    0,
                    transient.capacity(),
                    MapFlags::WRITE | MapFlags::PERSISTENT | MapFlags::FLUSH_EXPLICIT,
                )
            }) {
            Ok(ptr) => transient.publish_mapping(ptr),
            // Transient allocations will return empty slices.
            Err(err) => log::error!("transient buffer setup failed: {err}"),
        }

        shared.init_sem.signal();
    }

    /// Pop one job at a time and execute it outside the queue lock, until
    /// the shutdown job flips the flag. Jobs are dropped here, on the
    /// render thread.
    fn drain(&mut self) {
        let mut stop = false;
        while !stop {
            let mut job = self.shared.queue.pop();
            let mut ctx = RenderContext {
                driver: &mut *self.driver,
                queries: &mut self.queries,
                shared: &*self.shared,
                stop: &mut stop,
            };
            job.execute(&mut ctx);
        }
    }

    fn teardown(&mut self) {
        let shared = &self.shared;
        let driver = &mut *self.driver;
        driver.unmap_buffer(shared.transient.buffer());
        driver.destroy_buffer(shared.transient.buffer());
        driver.destroy_buffer(shared.global_uniforms);
        driver.destroy_framebuffer(shared.default_framebuffer);
        self.queries.shutdown(driver);
        driver.shutdown();
    }
}
