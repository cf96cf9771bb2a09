//! Integration tests for frame pacing and bindless indexing.
//!
//! These run the full record → submit → present → advance loop against the
//! simulated device timeline, holding completion back to observe exactly
//! where the scheduler blocks.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use cinder_graphics::{
    DescriptorIndexAllocator, Extent2d, FilterIndices, FilterRenderer, GraphicsError, ImageDesc,
    ImageUsage, SamplerPreset, SimGpu, TextureFormat, ViewDesc, WaitPolicy,
};

fn make_renderer(gpu: &SimGpu, width: u32, height: u32) -> (FilterIndices, FilterRenderer) {
    let source = gpu
        .create_image(
            &ImageDesc::new(
                width,
                height,
                TextureFormat::Rgba8Unorm,
                ImageUsage::SAMPLED | ImageUsage::COPY_DST,
            )
            .with_label("source"),
        )
        .unwrap();
    let result = gpu
        .create_image(
            &ImageDesc::new(
                width,
                height,
                TextureFormat::Bgra8Unorm,
                ImageUsage::STORAGE | ImageUsage::COPY_SRC,
            )
            .with_label("result"),
        )
        .unwrap();

    let mut allocator = DescriptorIndexAllocator::new(gpu);
    let tex_in = allocator.allocate_view(ViewDesc::sampled(source));
    let tex_out = allocator.allocate_view(ViewDesc::storage(result));
    let smp_linear = allocator.allocate_sampler(SamplerPreset::PointClamp);
    assert!(tex_in.is_valid() && tex_out.is_valid() && smp_linear.is_valid());

    let indices = FilterIndices {
        tex_in: tex_in.get(),
        tex_out: tex_out.get(),
        smp_linear: smp_linear.get(),
    };

    let pipeline = gpu.create_filter_pipeline().unwrap();
    let renderer = FilterRenderer::new(
        Arc::new(gpu.clone()),
        3,
        WaitPolicy::bounded(Duration::from_millis(50)),
        pipeline,
        source,
        result,
        Extent2d::new(width, height),
        indices,
    );

    (indices, renderer)
}

/// The full setup produces the canonical index assignment: {0, 1} in the
/// mixed table, {0} in the sampler table, and the record serializes to the
/// three 32-bit values 0, 1, 0 in field order.
#[test]
fn setup_produces_expected_indices_and_record() {
    let gpu = SimGpu::new(3);
    let (indices, _renderer) = make_renderer(&gpu, 64, 64);

    assert_eq!(indices.tex_in, 0);
    assert_eq!(indices.tex_out, 1);
    assert_eq!(indices.smp_linear, 0);

    let record = indices.to_record();
    assert_eq!(record.bytes(), &[0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]);
}

/// Running N ticks with an immediately-completing device never re-records a
/// slot whose marker is unreached, for any N.
#[rstest]
#[case::one_tick(1)]
#[case::one_round(3)]
#[case::two_rounds(6)]
#[case::many(32)]
fn ticks_never_outrun_completion(#[case] ticks: usize) {
    let gpu = SimGpu::new(3);
    let (_indices, mut renderer) = make_renderer(&gpu, 64, 64);

    for _ in 0..ticks {
        renderer.render_frame(&gpu).unwrap();
        let slot = renderer.scheduler().current_slot();
        assert!(renderer.scheduler().slot_marker(slot) <= renderer.scheduler().completed_value());
    }

    assert_eq!(gpu.present_count(), ticks as u64);
    renderer.wait_idle().unwrap();
}

/// With 3 slots and a device that completes nothing, the CPU runs up to
/// three submissions ahead; handing the first slot back for reuse blocks on
/// marker 1 (surfaced as a timeout under a bounded policy), and each
/// completed marker opens the backpressure window by exactly one frame.
#[test]
fn slot_reuse_blocks_on_first_marker() {
    let gpu = SimGpu::manual(3);
    let (_indices, mut renderer) = make_renderer(&gpu, 64, 64);

    // Two full ticks fit without any completion.
    renderer.render_frame(&gpu).unwrap();
    renderer.render_frame(&gpu).unwrap();

    // The third tick submits and presents marker 3, then blocks wrapping
    // back to the slot stamped with marker 1.
    let err = renderer.render_frame(&gpu).unwrap_err();
    assert!(matches!(err, GraphicsError::DeviceTimeout { value: 1, .. }));
    assert_eq!(gpu.submissions().len(), 3);
    assert_eq!(gpu.present_count(), 3);

    // No device progress: retrying blocks on the same marker.
    let err = renderer.render_frame(&gpu).unwrap_err();
    assert!(matches!(err, GraphicsError::DeviceTimeout { value: 1, .. }));
    assert_eq!(gpu.submissions().len(), 3);

    // Marker 1 completes: exactly one more frame goes through, then the
    // window is shut again, now on marker 2.
    gpu.complete_to(1);
    let err = renderer.render_frame(&gpu).unwrap_err();
    assert!(matches!(err, GraphicsError::DeviceTimeout { value: 2, .. }));
    assert_eq!(gpu.submissions().len(), 4);
    assert_eq!(gpu.present_count(), 4);

    // Catch the device all the way up: rendering is unblocked.
    gpu.complete_to(4);
    renderer.render_frame(&gpu).unwrap();
    assert_eq!(gpu.submissions().len(), 5);
}

/// A device that completes marker k only after k delay units paces the
/// steady state to one new frame per completion without ever letting a
/// marker be re-recorded early.
#[test]
fn steady_state_backpressure_window() {
    let gpu = SimGpu::manual(3);

    // Generous policy: the waits below are real blocking waits that the
    // device thread releases, not timeouts.
    let source = gpu
        .create_image(&ImageDesc::new(
            64,
            64,
            TextureFormat::Rgba8Unorm,
            ImageUsage::SAMPLED,
        ))
        .unwrap();
    let result = gpu
        .create_image(&ImageDesc::new(
            64,
            64,
            TextureFormat::Bgra8Unorm,
            ImageUsage::STORAGE,
        ))
        .unwrap();
    let pipeline = gpu.create_filter_pipeline().unwrap();
    let mut renderer = FilterRenderer::new(
        Arc::new(gpu.clone()),
        3,
        WaitPolicy::bounded(Duration::from_secs(5)),
        pipeline,
        source,
        result,
        Extent2d::new(64, 64),
        FilterIndices {
            tex_in: 0,
            tex_out: 1,
            smp_linear: 0,
        },
    );

    // Device thread: marker k completes after k delay units.
    let device = {
        let gpu = gpu.clone();
        std::thread::spawn(move || {
            for k in 1..=12u64 {
                std::thread::sleep(Duration::from_millis(2));
                gpu.complete_to(k);
            }
        })
    };

    for _ in 0..12 {
        renderer.render_frame(&gpu).unwrap();
    }
    device.join().unwrap();

    let submissions = gpu.submissions();
    assert_eq!(submissions.len(), 12);
    for (i, submission) in submissions.iter().enumerate() {
        assert_eq!(submission.signal_value, (i + 1) as u64);
    }
    assert_eq!(gpu.present_count(), 12);
}

/// Teardown drains every in-flight frame before returning.
#[test]
fn teardown_waits_for_all_slots() {
    let gpu = SimGpu::manual(3);
    let (_indices, mut renderer) = make_renderer(&gpu, 64, 64);

    renderer.render_frame(&gpu).unwrap();
    renderer.render_frame(&gpu).unwrap();
    // Third tick submits marker 3, then times out wrapping to slot 0.
    let err = renderer.render_frame(&gpu).unwrap_err();
    assert!(matches!(err, GraphicsError::DeviceTimeout { .. }));

    let completer = {
        let gpu = gpu.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            gpu.complete_to(3);
        })
    };

    renderer.wait_idle().unwrap();
    completer.join().unwrap();
    assert!(renderer.scheduler().completed_value() >= 3);
}

/// The initial upload wait retires the staging buffers: the uploaders
/// collection outlives the submission that references it, then is handed
/// back to the backend.
#[test]
fn upload_staging_outlives_initial_wait() {
    let gpu = SimGpu::new(3);
    let image = gpu
        .create_image(&ImageDesc::new(
            8,
            8,
            TextureFormat::Rgba8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        ))
        .unwrap();

    let mut uploaders = Vec::new();
    let data = vec![0xAAu8; 8 * 8 * 4];
    let signal = gpu.upload_image(image, &data, &mut uploaders).unwrap();
    assert_eq!(uploaders.len(), 1);

    use cinder_graphics::GpuQueue;
    gpu.wait_until(signal, None).unwrap();
    gpu.retire_staging(uploaders);
}
