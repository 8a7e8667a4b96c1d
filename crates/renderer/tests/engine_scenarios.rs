//! End-to-end engine scenarios on the software backend: full frames from
//! layer snapshot to output surface pixels.

use std::sync::Arc;

use anyhow::Result;

use fl_common::blend::BlendMode;
use fl_common::config::{EngineConfig, SourceTimeouts};
use fl_common::layer::{Layer, LayerMask, LayerSource};
use fl_common::sample::{CpuFrame, DecodedFrame, Sample, VideoStreamInfo};
use fl_common::types::{LayerId, Rational, Resolution, SourceId, SurfaceId, TimeCode};
use fl_common::PixelFormat;

use fl_gpu_hal::SoftwareBackend;
use fl_renderer::{Composition, MaskProvider, RenderDispatcher};
use fl_source::{RawFrameDecoder, StreamProvider, VideoSource};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn main_surface() -> SurfaceId {
    SurfaceId::new("main")
}

fn engine(width: u32, height: u32, config: EngineConfig) -> Result<RenderDispatcher> {
    init_tracing();
    let backend = Arc::new(SoftwareBackend::new());
    let mut dispatcher =
        RenderDispatcher::with_backend(backend, config, Resolution::new(width, height))?;
    dispatcher.register_surface(main_surface(), width, height)?;
    Ok(dispatcher)
}

fn solid_layer(
    dispatcher: &mut RenderDispatcher,
    id: u64,
    name: &str,
    rgba: [u8; 4],
    width: u32,
    height: u32,
) -> Layer {
    let source = SourceId::new(name);
    dispatcher.register_still(source.clone(), 1, CpuFrame::solid(width, height, rgba));
    Layer::new(
        LayerId(id),
        LayerSource::TextOrSolid {
            source_id: source,
            revision: 1,
        },
    )
}

fn video_layer(id: u64, name: &str) -> Layer {
    Layer::new(
        LayerId(id),
        LayerSource::Video {
            source_id: SourceId::new(name),
        },
    )
}

fn decoded_frame(width: u32, height: u32, data: Vec<u8>) -> DecodedFrame {
    DecodedFrame {
        pts_us: 0,
        width,
        height,
        format: PixelFormat::Rgba8,
        data,
    }
}

/// A single fully-opaque video layer with normal blend composites to
/// exactly that frame's pixels.
#[test]
fn single_opaque_video_layer_is_identity() -> Result<()> {
    let mut dispatcher = engine(2, 2, EngineConfig::default())?;
    let pattern: Vec<u8> = vec![
        255, 0, 0, 255, 0, 255, 0, 255, //
        0, 0, 255, 255, 255, 255, 0, 255,
    ];
    let source = SourceId::new("clip");
    dispatcher.ports_mut().port_mut(&source).direct_frame =
        Some(decoded_frame(2, 2, pattern.clone()));

    dispatcher.render(&[video_layer(1, "clip")], TimeCode::ZERO)?;
    assert_eq!(dispatcher.surface_pixels(&main_surface())?, pattern);
    assert!(dispatcher.has_active_video());
    Ok(())
}

/// Solid red under solid blue at half opacity lands on (128, 0, 128).
#[test]
fn red_under_half_blue_mixes_to_purple() -> Result<()> {
    let mut dispatcher = engine(2, 2, EngineConfig::default())?;
    let red = solid_layer(&mut dispatcher, 2, "red", [255, 0, 0, 255], 2, 2);
    let mut blue = solid_layer(&mut dispatcher, 1, "blue", [0, 0, 255, 255], 2, 2);
    blue.opacity = 0.5;

    // Index 0 renders on top: blue over red.
    dispatcher.render(&[blue, red], TimeCode::ZERO)?;
    let px = dispatcher.surface_pixels(&main_surface())?;
    for chunk in px.chunks_exact(4) {
        assert!((chunk[0] as i32 - 128).abs() <= 1, "{chunk:?}");
        assert_eq!(chunk[1], 0);
        assert!((chunk[2] as i32 - 128).abs() <= 1, "{chunk:?}");
        assert_eq!(chunk[3], 255);
    }
    Ok(())
}

#[test]
fn multiply_blend_darkens() -> Result<()> {
    let mut dispatcher = engine(1, 1, EngineConfig::default())?;
    let base = solid_layer(&mut dispatcher, 2, "base", [200, 100, 50, 255], 1, 1);
    let mut top = solid_layer(&mut dispatcher, 1, "top", [128, 128, 128, 255], 1, 1);
    top.blend_mode = BlendMode::Multiply;

    dispatcher.render(&[top, base], TimeCode::ZERO)?;
    let px = dispatcher.surface_pixels(&main_surface())?;
    // 200 * 128/255 = 100.4, 100 * 128/255 = 50.2, 50 * 128/255 = 25.1.
    assert!((px[0] as i32 - 100).abs() <= 1, "{px:?}");
    assert!((px[1] as i32 - 50).abs() <= 1, "{px:?}");
    assert!((px[2] as i32 - 25).abs() <= 1, "{px:?}");
    Ok(())
}

struct QuadrantMask;

impl MaskProvider for QuadrantMask {
    fn mask_bitmap(&mut self, _clip_id: &SourceId) -> Option<CpuFrame> {
        // White in the top-left texel, black elsewhere.
        Some(CpuFrame::new(
            2,
            2,
            vec![
                255, 255, 255, 255, 0, 0, 0, 255, //
                0, 0, 0, 255, 0, 0, 0, 255,
            ],
        ))
    }
}

/// An inverted mask that is white in the top-left quadrant makes that
/// quadrant transparent and leaves the rest at full layer opacity.
#[test]
fn inverted_quadrant_mask_cuts_top_left() -> Result<()> {
    let mut dispatcher = engine(2, 2, EngineConfig::default())?;
    dispatcher.set_mask_provider(Box::new(QuadrantMask));
    let mut layer = solid_layer(&mut dispatcher, 1, "green", [0, 255, 0, 255], 2, 2);
    layer.mask = Some(LayerMask {
        clip_id: SourceId::new("mask_clip"),
        invert: true,
        feather: 0.0,
    });

    dispatcher.render(&[layer], TimeCode::ZERO)?;
    let px = dispatcher.surface_pixels(&main_surface())?;
    assert_eq!(px[3], 0, "masked quadrant must be transparent");
    assert_eq!(&px[4..8], &[0, 255, 0, 255]);
    assert_eq!(&px[8..12], &[0, 255, 0, 255]);
    assert_eq!(&px[12..16], &[0, 255, 0, 255]);
    Ok(())
}

/// Composite cache bounded at 3 frames: inserting at t = 0, 1, 2, 3 leaves
/// exactly {1, 2, 3} cached.
#[test]
fn composite_cache_evicts_in_insertion_order() -> Result<()> {
    let mut config = EngineConfig::default();
    config.cache.composite_max_frames = 3;
    let mut dispatcher = engine(2, 2, config)?;
    let layer = solid_layer(&mut dispatcher, 1, "fill", [9, 9, 9, 255], 2, 2);

    for t in 0..4 {
        dispatcher.cache_frame_at_time(&[layer.clone()], TimeCode::from_secs(t as f64))?;
    }
    assert!(dispatcher.get_cached_frame(TimeCode::from_secs(0.0)).is_none());
    for t in 1..4 {
        assert!(
            dispatcher.get_cached_frame(TimeCode::from_secs(t as f64)).is_some(),
            "frame at {t}s should be cached"
        );
    }
    assert_eq!(dispatcher.cache_stats().composite.cpu_frames, 3);
    Ok(())
}

/// Two cached-frame draws of the same time with no intervening
/// invalidation produce bit-identical output.
#[test]
fn cached_frame_replay_is_idempotent() -> Result<()> {
    let mut dispatcher = engine(2, 2, EngineConfig::default())?;
    let layer = solid_layer(&mut dispatcher, 1, "fill", [77, 66, 55, 255], 2, 2);
    let t = TimeCode::from_secs(2.0);
    dispatcher.cache_frame_at_time(&[layer], t)?;

    assert!(dispatcher.render_cached_frame(t)?);
    let first = dispatcher.surface_pixels(&main_surface())?;
    assert!(dispatcher.render_cached_frame(t)?);
    let second = dispatcher.surface_pixels(&main_surface())?;
    assert_eq!(first, second);
    assert_eq!(&first[0..4], &[77, 66, 55, 255]);
    Ok(())
}

/// A nested composition renders at its own resolution and composites into
/// the parent frame like any other layer.
#[test]
fn nested_composition_renders_inline() -> Result<()> {
    let mut dispatcher = engine(2, 2, EngineConfig::default())?;
    let inner_fill = solid_layer(&mut dispatcher, 10, "inner_fill", [0, 0, 200, 255], 2, 2);
    dispatcher.register_composition(
        SourceId::new("comp"),
        Composition {
            width: 2,
            height: 2,
            layers: vec![inner_fill],
        },
    );
    let nested = Layer::new(
        LayerId(1),
        LayerSource::NestedComposition {
            comp_id: SourceId::new("comp"),
            width: 2,
            height: 2,
        },
    );

    dispatcher.render(&[nested], TimeCode::ZERO)?;
    let px = dispatcher.surface_pixels(&main_surface())?;
    for chunk in px.chunks_exact(4) {
        assert_eq!(chunk, &[0, 0, 200, 255]);
    }
    Ok(())
}

// ── full-stack decode → render ─────────────────────────────────────

struct OneShotProvider(Option<(VideoStreamInfo, Vec<Sample>)>);

impl StreamProvider for OneShotProvider {
    fn poll_stream(&mut self) -> Option<(VideoStreamInfo, Vec<Sample>)> {
        self.0.take()
    }
}

/// Uncompressed 2x2 stream: 4 frames at 1ms spacing, each filled with a
/// distinct byte so the rendered frame identifies the decoded sample.
fn test_stream() -> (VideoStreamInfo, Vec<Sample>) {
    let info = VideoStreamInfo {
        codec: "rgba".to_string(),
        resolution: Resolution::new(2, 2),
        fps: Rational::FPS_30,
        duration: TimeCode::from_secs(0.004),
        timescale: 1_000_000,
        pixel_format: PixelFormat::Rgba8,
        extra_data: Vec::new(),
    };
    let samples = (0..4)
        .map(|i| Sample {
            decode_index: i,
            pts: i as i64 * 1000,
            duration: 1000,
            is_sync: i == 0,
            data: vec![(i as u8 + 1) * 40; 2 * 2 * 4],
        })
        .collect();
    (info, samples)
}

/// Seek a real video source, feed its current frame through the player
/// port, and verify the composited output matches the decoded sample --
/// including after seeking away and back (same content both times).
#[test]
fn decoded_stream_renders_frame_accurately() -> Result<()> {
    let mut dispatcher = engine(2, 2, EngineConfig::default())?;
    let mut source = VideoSource::new(
        Box::new(RawFrameDecoder::new()),
        SourceTimeouts::default(),
    );
    source
        .open(&mut OneShotProvider(Some(test_stream())))
        .expect("test stream opens");
    let clip = SourceId::new("clip");

    let mut render_at = |dispatcher: &mut RenderDispatcher,
                         source: &mut VideoSource,
                         secs: f64|
     -> Result<Vec<u8>> {
        source.seek(TimeCode::from_secs(secs)).expect("seek");
        let frame = source.current_frame().expect("frame decoded").clone();
        let port = dispatcher.ports_mut().port_mut(&clip);
        port.player_frame = Some(frame);
        port.last_known_time = Some(TimeCode::from_secs(secs));
        dispatcher.render(&[video_layer(1, "clip")], TimeCode::from_secs(secs))?;
        Ok(dispatcher.surface_pixels(&main_surface())?)
    };

    let at_2ms = render_at(&mut dispatcher, &mut source, 0.002)?;
    assert_eq!(at_2ms[0], 120, "sample 2 fill byte");

    let at_0 = render_at(&mut dispatcher, &mut source, 0.0)?;
    assert_eq!(at_0[0], 40, "sample 0 fill byte");

    // Seeking back reproduces the earlier frame exactly.
    let again = render_at(&mut dispatcher, &mut source, 0.002)?;
    assert_eq!(again, at_2ms);
    Ok(())
}

/// While a seek is in flight the engine serves the scrub cache instead of
/// importing a stale frame, so the picture never flickers.
#[test]
fn scrub_in_progress_replays_cached_frame() -> Result<()> {
    let mut dispatcher = engine(2, 2, EngineConfig::default())?;
    let clip = SourceId::new("clip");
    {
        let port = dispatcher.ports_mut().port_mut(&clip);
        port.direct_frame = Some(decoded_frame(2, 2, vec![50; 16]));
        port.last_known_time = Some(TimeCode::ZERO);
    }
    dispatcher.render(&[video_layer(1, "clip")], TimeCode::ZERO)?;
    assert_eq!(dispatcher.surface_pixels(&main_surface())?[0], 50);

    // Seek begins: the decoder's stale frame must not reach the screen.
    {
        let port = dispatcher.ports_mut().port_mut(&clip);
        port.scrubbing = true;
        port.direct_frame = Some(decoded_frame(2, 2, vec![99; 16]));
    }
    dispatcher.render(&[video_layer(1, "clip")], TimeCode::ZERO)?;
    assert_eq!(dispatcher.surface_pixels(&main_surface())?[0], 50);
    Ok(())
}
