//! Shared test harness: a mock driver that records every call and asserts
//! render-thread affinity, plus helpers to stand up a renderer around it.

#![allow(dead_code)] // each test binary uses its own subset of the harness

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use render_relay::driver::*;
use render_relay::{Renderer, RendererDesc};

/// Observable side of the mock driver, shared with the test body.
#[derive(Default)]
pub struct MockState {
    /// Thread that called `init`; every later call must come from it.
    pub render_thread: Mutex<Option<ThreadId>>,
    pub shut_down: AtomicBool,
    /// Total driver calls, for quiescence checks.
    pub calls: AtomicU64,
    pub swap_count: AtomicU32,

    pub live_buffers: Mutex<HashSet<u32>>,
    pub live_textures: Mutex<HashSet<u32>>,
    pub live_programs: Mutex<HashSet<u32>>,
    pub live_framebuffers: Mutex<HashSet<u32>>,
    pub live_queries: Mutex<HashSet<u32>>,

    /// `(buffer, offset, data)` of every `update_buffer` call.
    pub buffer_updates: Mutex<Vec<(u32, u64, Vec<u8>)>>,
    /// `(binding, buffer)` of every `bind_uniform_buffer` call.
    pub uniform_bindings: Mutex<Vec<(u32, u32)>>,
    /// `(name, width, height, mips, payload bytes)` of every texture created.
    pub created_textures: Mutex<Vec<(String, u32, u32, u32, usize)>>,
    /// Sources of every program created, defines already folded in.
    pub created_programs: Mutex<Vec<(String, String, String)>>,

    pub debug_group_depth: AtomicU32,
    pub capturing: AtomicBool,
    pub vsync: Mutex<Option<bool>>,
}

pub struct MockDriver {
    state: Arc<MockState>,
    /// Backing storage per buffer; mapping hands out pointers into it.
    buffers: HashMap<u32, Box<[u8]>>,
    query_results: HashMap<u32, u64>,
    next_query: u32,
    /// Fake monotonic GPU clock, one tick per timestamp.
    clock: u64,
}

impl MockDriver {
    pub fn new() -> (Box<dyn Driver>, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        let driver = Self {
            state: Arc::clone(&state),
            buffers: HashMap::new(),
            query_results: HashMap::new(),
            next_query: 0,
            clock: 0,
        };
        (Box::new(driver), state)
    }

    /// Every driver entry point funnels through here: must be on the render
    /// thread, must be before shutdown.
    fn check(&self) {
        assert!(
            !self.state.shut_down.load(Ordering::SeqCst),
            "driver called after shutdown"
        );
        let render_thread = self.state.render_thread.lock();
        assert_eq!(
            *render_thread,
            Some(std::thread::current().id()),
            "driver touched off the render thread"
        );
        self.state.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Driver for MockDriver {
    fn init(&mut self, _window: WindowHandle, vsync: bool) -> DriverResult<()> {
        *self.state.render_thread.lock() = Some(std::thread::current().id());
        *self.state.vsync.lock() = Some(vsync);
        self.check();
        Ok(())
    }

    fn shutdown(&mut self) {
        self.check();
        self.state.shut_down.store(true, Ordering::SeqCst);
    }

    fn swap_buffers(&mut self) {
        self.check();
        self.state.swap_count.fetch_add(1, Ordering::SeqCst);
    }

    fn set_vsync(&mut self, on: bool) {
        self.check();
        *self.state.vsync.lock() = Some(on);
    }

    fn create_buffer(
        &mut self,
        handle: BufferHandle,
        _flags: BufferFlags,
        size: u64,
        initial: Option<&[u8]>,
    ) -> DriverResult<()> {
        self.check();
        assert!(
            self.state.live_buffers.lock().insert(handle.raw()),
            "buffer {handle:?} created twice"
        );
        let mut storage = vec![0u8; size as usize].into_boxed_slice();
        if let Some(data) = initial {
            storage[..data.len()].copy_from_slice(data);
        }
        self.buffers.insert(handle.raw(), storage);
        Ok(())
    }

    fn update_buffer(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) -> DriverResult<()> {
        self.check();
        assert!(self.state.live_buffers.lock().contains(&handle.raw()));
        let storage = self.buffers.get_mut(&handle.raw()).unwrap();
        storage[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        self.state
            .buffer_updates
            .lock()
            .push((handle.raw(), offset, data.to_vec()));
        Ok(())
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        self.check();
        assert!(
            self.state.live_buffers.lock().remove(&handle.raw()),
            "buffer {handle:?} destroyed but not live"
        );
        self.buffers.remove(&handle.raw());
    }

    fn map_buffer(
        &mut self,
        handle: BufferHandle,
        offset: u64,
        size: u64,
        _flags: MapFlags,
    ) -> DriverResult<*mut u8> {
        self.check();
        let storage = self.buffers.get_mut(&handle.raw()).unwrap();
        assert!(offset + size <= storage.len() as u64);
        Ok(unsafe { storage.as_mut_ptr().add(offset as usize) })
    }

    fn flush_buffer(&mut self, handle: BufferHandle, _offset: u64, _size: u64) {
        self.check();
        assert!(self.state.live_buffers.lock().contains(&handle.raw()));
    }

    fn unmap_buffer(&mut self, handle: BufferHandle) {
        self.check();
        assert!(self.state.live_buffers.lock().contains(&handle.raw()));
    }

    fn bind_uniform_buffer(&mut self, binding: u32, buffer: BufferHandle, _offset: u64, _size: u64) {
        self.check();
        self.state
            .uniform_bindings
            .lock()
            .push((binding, buffer.raw()));
    }

    fn create_texture(
        &mut self,
        handle: TextureHandle,
        desc: &TextureDesc,
        initial: Option<&[u8]>,
        name: &str,
    ) -> DriverResult<()> {
        self.check();
        assert!(self.state.live_textures.lock().insert(handle.raw()));
        self.state.created_textures.lock().push((
            name.to_owned(),
            desc.width,
            desc.height,
            desc.mips,
            initial.map_or(0, <[u8]>::len),
        ));
        Ok(())
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        self.check();
        assert!(self.state.live_textures.lock().remove(&handle.raw()));
    }

    fn create_program(
        &mut self,
        handle: ProgramHandle,
        desc: &ProgramDesc,
        name: &str,
    ) -> DriverResult<()> {
        self.check();
        assert!(self.state.live_programs.lock().insert(handle.raw()));
        assert!(desc.defines.is_empty(), "defines must be folded in by setup");
        self.state.created_programs.lock().push((
            name.to_owned(),
            desc.vertex_src.clone(),
            desc.fragment_src.clone(),
        ));
        Ok(())
    }

    fn destroy_program(&mut self, handle: ProgramHandle) {
        self.check();
        assert!(self.state.live_programs.lock().remove(&handle.raw()));
    }

    fn create_framebuffer(
        &mut self,
        handle: FramebufferHandle,
        _attachments: &[TextureHandle],
        _depth: Option<TextureHandle>,
    ) -> DriverResult<()> {
        self.check();
        assert!(self.state.live_framebuffers.lock().insert(handle.raw()));
        Ok(())
    }

    fn destroy_framebuffer(&mut self, handle: FramebufferHandle) {
        self.check();
        assert!(self.state.live_framebuffers.lock().remove(&handle.raw()));
    }

    fn create_query(&mut self) -> DriverResult<QueryHandle> {
        self.check();
        let handle = QueryHandle::from_raw(self.next_query);
        self.next_query += 1;
        self.state.live_queries.lock().insert(handle.raw());
        Ok(handle)
    }

    fn destroy_query(&mut self, handle: QueryHandle) {
        self.check();
        assert!(self.state.live_queries.lock().remove(&handle.raw()));
    }

    fn query_timestamp(&mut self, handle: QueryHandle) {
        self.check();
        self.clock += 1;
        self.query_results.insert(handle.raw(), self.clock);
    }

    fn get_query_result(&mut self, handle: QueryHandle) -> u64 {
        self.check();
        self.query_results[&handle.raw()]
    }

    fn push_debug_group(&mut self, _name: &str) {
        self.check();
        self.state.debug_group_depth.fetch_add(1, Ordering::SeqCst);
    }

    fn pop_debug_group(&mut self) {
        self.check();
        let depth = self.state.debug_group_depth.fetch_sub(1, Ordering::SeqCst);
        assert!(depth > 0, "debug group stack underflow");
    }

    fn start_capture(&mut self) {
        self.check();
        self.state.capturing.store(true, Ordering::SeqCst);
    }

    fn stop_capture(&mut self) {
        self.check();
        self.state.capturing.store(false, Ordering::SeqCst);
    }
}

/// Block until the render thread has executed everything submitted so far.
///
/// `frame()` intentionally runs ahead of the GPU by up to two swaps; tests
/// asserting render-side effects drain first.
pub fn drain(renderer: &Renderer) {
    let (tx, rx) = std::sync::mpsc::channel();
    renderer.run_in_render_thread(move |_ctx| drop(tx.send(())));
    rx.recv().unwrap();
}

/// Renderer over a mock driver with a small transient buffer.
pub fn test_renderer() -> (Renderer, Arc<MockState>) {
    test_renderer_with(RendererDesc {
        transient_buffer_size: 1024 * 1024,
        ..RendererDesc::default()
    })
}

pub fn test_renderer_with(desc: RendererDesc) -> (Renderer, Arc<MockState>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (driver, state) = MockDriver::new();
    let renderer = Renderer::new(driver, desc).unwrap();
    (renderer, state)
}
