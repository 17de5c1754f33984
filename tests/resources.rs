//! Resource operations through the facade: handles now, driver effects later.

mod utils;

use render_relay::driver::{BufferFlags, ProgramDesc, TextureDesc, TextureFlags, TextureFormat};
use render_relay::{GlobalState, MemRef, RendererDesc, TextureError, GLOBAL_STATE_BINDING};

/// Minimal DDS: magic + 124-byte header describing an uncompressed RGBA8 image.
fn dds_rgba8(width: u32, height: u32, mips: u32, payload: usize) -> Vec<u8> {
    let mut data = vec![0u8; 128 + payload];
    data[0..4].copy_from_slice(b"DDS ");
    data[4..8].copy_from_slice(&124u32.to_le_bytes());
    data[12..16].copy_from_slice(&height.to_le_bytes());
    data[16..20].copy_from_slice(&width.to_le_bytes());
    data[28..32].copy_from_slice(&mips.to_le_bytes());
    data[76..80].copy_from_slice(&32u32.to_le_bytes());
    data[80..84].copy_from_slice(&0x40u32.to_le_bytes()); // DDPF_RGB
    data[88..92].copy_from_slice(&32u32.to_le_bytes());
    data
}

#[test]
fn load_texture_decodes_the_header_synchronously() {
    let (renderer, state) = utils::test_renderer();

    let mem = MemRef::copy(&dds_rgba8(8, 4, 1, 8 * 4 * 4));
    let (handle, info) = renderer
        .load_texture(mem, TextureFlags::SRGB, "albedo")
        .unwrap();
    assert!(handle.is_valid());
    assert_eq!(info.width, 8);
    assert_eq!(info.height, 4);
    assert_eq!(info.format, TextureFormat::Rgba8);

    utils::drain(&renderer);
    let created = state.created_textures.lock();
    assert_eq!(created.len(), 1);
    let (name, width, height, mips, payload) = &created[0];
    assert_eq!(name, "albedo");
    assert_eq!((*width, *height, *mips), (8, 4, 1));
    assert_eq!(*payload, 8 * 4 * 4);
}

#[test]
fn load_texture_rejects_garbage_without_enqueueing() {
    let (renderer, state) = utils::test_renderer();

    let err = renderer
        .load_texture(MemRef::copy(b"not a texture"), TextureFlags::empty(), "bad")
        .unwrap_err();
    assert_eq!(err, TextureError::UnknownMagic);

    utils::drain(&renderer);
    assert!(state.created_textures.lock().is_empty());
}

#[test]
fn create_texture_uploads_initial_data() {
    let (renderer, state) = utils::test_renderer();

    let desc = TextureDesc {
        width: 2,
        height: 2,
        depth: 1,
        mips: 1,
        format: TextureFormat::Rgba8,
        flags: TextureFlags::empty(),
    };
    let pixels = vec![0xFFu8; 16];
    let handle = renderer.create_texture(desc, Some(MemRef::copy(&pixels)), "white");
    assert!(handle.is_valid());

    utils::drain(&renderer);
    let created = state.created_textures.lock();
    assert_eq!(created[0].0, "white");
    assert_eq!(created[0].4, 16);
}

#[test]
fn program_defines_are_folded_in_during_setup() {
    let (renderer, state) = utils::test_renderer();

    let deferred = renderer.shader_define_index("DEFERRED");
    let skinned = renderer.shader_define_index("SKINNED");
    let desc = ProgramDesc {
        vertex_src: "void main() {}".to_owned(),
        fragment_src: "void main() {}".to_owned(),
        defines: vec![
            renderer.shader_define(deferred).unwrap(),
            renderer.shader_define(skinned).unwrap(),
        ],
    };
    let handle = renderer.create_program(desc, "gbuffer");
    assert!(handle.is_valid());

    utils::drain(&renderer);
    let programs = state.created_programs.lock();
    assert_eq!(programs.len(), 1);
    let (name, vertex, fragment) = &programs[0];
    assert_eq!(name, "gbuffer");
    for src in [vertex, fragment] {
        assert!(src.starts_with("#define DEFERRED\n#define SKINNED\n"));
        assert!(src.ends_with("void main() {}"));
    }
}

#[test]
fn global_state_is_mirrored_into_the_uniform_buffer() {
    let (renderer, state) = utils::test_renderer();

    // Startup bound the global uniform buffer at its binding slot.
    utils::drain(&renderer);
    let bindings = state.uniform_bindings.lock().clone();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].0, GLOBAL_STATE_BINDING);

    let mut new_state = GlobalState::default();
    new_state.frame_params = glam::Vec4::new(1920.0, 1080.0, 0.25, 0.0);
    renderer.set_global_state(new_state);
    assert_eq!(renderer.global_state(), new_state);

    utils::drain(&renderer);
    let updates = state.buffer_updates.lock();
    assert_eq!(updates.len(), 1);
    let (buffer, offset, data) = &updates[0];
    assert_eq!(*buffer, bindings[0].1);
    assert_eq!(*offset, 0);
    assert_eq!(data.as_slice(), bytemuck::bytes_of(&new_state));
}

#[test]
fn capture_and_vsync_jobs_reach_the_driver() {
    let (renderer, state) = utils::test_renderer();

    renderer.start_capture();
    utils::drain(&renderer);
    assert!(state.capturing.load(std::sync::atomic::Ordering::SeqCst));

    renderer.stop_capture();
    renderer.set_vsync(false);
    utils::drain(&renderer);
    assert!(!state.capturing.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(*state.vsync.lock(), Some(false));
}

#[test]
fn layer_names_intern_to_stable_bytes() {
    let (renderer, _state) = utils::test_renderer();

    let default = renderer.layer_index("default");
    let transparent = renderer.layer_index("transparent");
    assert_ne!(default, transparent);
    assert_eq!(renderer.layer_index("default"), default);
    assert_eq!(renderer.layer_name(transparent).as_deref(), Some("transparent"));
    assert_eq!(renderer.layer_count(), 2);
}

#[test]
fn no_vsync_flag_is_recognised() {
    let desc = RendererDesc::from_args(["-no_vsync".to_owned()]);
    assert!(!desc.vsync);
    let desc = RendererDesc::from_args(["-windowed".to_owned()]);
    assert!(desc.vsync);

    let (renderer, state) = utils::test_renderer_with(RendererDesc {
        vsync: false,
        transient_buffer_size: 4096,
        ..RendererDesc::default()
    });
    utils::drain(&renderer);
    assert_eq!(*state.vsync.lock(), Some(false));
}

#[test]
fn owned_memory_is_independent_of_the_source() {
    let mut source = vec![1u8, 2, 3];
    let mem = MemRef::copy(&source);
    source.clear();
    assert_eq!(mem.as_slice(), &[1, 2, 3]);
    assert_eq!(mem.len(), 3);

    let mut zeroed = MemRef::allocate(4);
    zeroed.as_mut_slice().copy_from_slice(&[9, 9, 9, 9]);
    assert_eq!(zeroed.as_slice(), &[9, 9, 9, 9]);

    let mut borrowed = MemRef::from_static(b"static");
    borrowed.as_mut_slice()[0] = b'S';
    assert_eq!(borrowed.as_slice(), b"Static");
}
