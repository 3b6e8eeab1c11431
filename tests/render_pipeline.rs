//! Orchestrator behaviour against a scripted engine

mod common;

use common::{FakeEngine, LoadScript};
use rfshot::{
    AspectRatio, CancelToken, CaptureMode, DialogKind, EngineEvent, Error, OutputFormat,
    RenderRequest, Renderer, ScaleSpec, Viewport,
};
use std::time::{Duration, Instant};

const PUMP: Duration = Duration::from_millis(10);

fn request() -> RenderRequest {
    RenderRequest::new("http://example.com")
}

#[test]
fn renders_example_at_requested_geometry() {
    let engine = FakeEngine::loading_after(3);
    let req = RenderRequest {
        viewport: Viewport { width: 800, height: 600 },
        timeout: Duration::from_secs(10),
        ..request()
    };

    let png = Renderer::new(&engine)
        .with_pump_interval(PUMP)
        .render_to_bytes(&req)
        .expect("render");

    assert_eq!(&png[0..8], b"\x89PNG\r\n\x1a\n");
    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (800, 600));
    assert_eq!(engine.stats.closed(), 1);
}

#[test]
fn invalid_url_never_opens_a_session() {
    let engine = FakeEngine::loading_after(1);
    let err = Renderer::new(&engine)
        .render(&RenderRequest::new("invalid"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidUrl { .. }));
    assert_eq!(engine.stats.opened(), 0);
}

#[test]
fn times_out_within_one_pump_of_deadline() {
    let engine = FakeEngine::new(LoadScript::Never);
    let timeout = Duration::from_millis(300);
    let req = RenderRequest { timeout, ..request() };

    let started = Instant::now();
    let err = Renderer::new(&engine)
        .with_pump_interval(PUMP)
        .render(&req)
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::Timeout(t) if t == timeout));
    assert!(elapsed >= timeout, "gave up early after {:?}", elapsed);
    assert!(
        elapsed < timeout + PUMP + Duration::from_millis(150),
        "overshoot too large: {:?}",
        elapsed
    );
    assert_eq!(engine.stats.closed(), 1);
    assert!(engine.stats.pumps() > 1, "the engine must be pumped while waiting");
}

#[test]
fn zero_timeout_waits_for_slow_load() {
    let engine = FakeEngine::new(LoadScript::AfterTime {
        delay: Duration::from_millis(400),
        success: true,
    });
    let started = Instant::now();
    let rendered = Renderer::new(&engine)
        .with_pump_interval(PUMP)
        .render(&request())
        .expect("no spurious timeout");
    assert!(started.elapsed() >= Duration::from_millis(400));
    assert!(rendered.load_succeeded);
}

#[test]
fn failed_load_is_soft_by_default() {
    let engine = FakeEngine::new(LoadScript::AfterPumps {
        pumps: 2,
        success: false,
    });
    let rendered = Renderer::new(&engine)
        .with_pump_interval(PUMP)
        .render(&request())
        .expect("soft failure still renders");
    assert!(!rendered.load_succeeded);
    assert_eq!(engine.stats.closed(), 1);
}

#[test]
fn failed_load_is_fatal_in_strict_mode() {
    let engine = FakeEngine::new(LoadScript::AfterPumps {
        pumps: 2,
        success: false,
    });
    let req = RenderRequest {
        fail_on_load_error: true,
        ..request()
    };
    let err = Renderer::new(&engine)
        .with_pump_interval(PUMP)
        .render(&req)
        .unwrap_err();
    assert!(matches!(err, Error::LoadFailed(_)));
    assert_eq!(engine.stats.closed(), 1);
}

#[test]
fn settle_wait_keeps_pumping() {
    let engine = FakeEngine::loading_after(1);
    let req = RenderRequest {
        wait: Duration::from_millis(200),
        ..request()
    };
    let started = Instant::now();
    Renderer::new(&engine)
        .with_pump_interval(PUMP)
        .render(&req)
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));
    // one pump for the load, the rest while settling
    assert!(engine.stats.pumps() >= 10, "only {} pumps", engine.stats.pumps());
}

#[test]
fn teardown_runs_once_per_render_on_every_path() {
    let ok = FakeEngine::loading_after(2);
    let never = FakeEngine {
        stats: ok.stats.clone(),
        ..FakeEngine::new(LoadScript::Never)
    };
    let broken_capture = FakeEngine {
        fail_capture: true,
        stats: ok.stats.clone(),
        ..FakeEngine::loading_after(1)
    };

    let timeout = RenderRequest {
        timeout: Duration::from_millis(50),
        ..request()
    };

    for _ in 0..3 {
        Renderer::new(&ok).with_pump_interval(PUMP).render(&request()).unwrap();
        assert!(Renderer::new(&never).with_pump_interval(PUMP).render(&timeout).is_err());
        assert!(matches!(
            Renderer::new(&broken_capture).render(&request()),
            Err(Error::CaptureFailed(_))
        ));
    }

    assert_eq!(ok.stats.opened(), 9);
    assert_eq!(ok.stats.closed(), 9);
    assert_eq!(ok.stats.max_alive(), 1);
}

#[test]
fn transparent_frame_keeps_alpha_and_frame_does_not() {
    let engine = FakeEngine::loading_after(1).with_content(40, 30);

    let transparent = Renderer::new(&engine)
        .render(&RenderRequest {
            capture_mode: CaptureMode::TransparentFrame,
            ..request()
        })
        .unwrap();
    assert!(engine.stats.settings().unwrap().transparent_background);
    assert_eq!(transparent.image.get_pixel(39, 29)[3], 0);
    assert_eq!(transparent.image.get_pixel(0, 0)[3], 255);

    for mode in [CaptureMode::Frame, CaptureMode::WholeWindow] {
        let opaque = Renderer::new(&engine)
            .render(&RenderRequest {
                capture_mode: mode,
                ..request()
            })
            .unwrap();
        assert!(!engine.stats.settings().unwrap().transparent_background);
        assert!(opaque.image.pixels().all(|p| p[3] == 255), "{:?} has alpha", mode);
    }
}

#[test]
fn viewport_follows_content_unless_overridden() {
    let engine = FakeEngine::loading_after(1).with_content(1024, 3000);

    let auto = Renderer::new(&engine).render(&request()).unwrap();
    assert_eq!(engine.stats.resized_to(), Some((1024, 3000)));
    assert_eq!((auto.width(), auto.height()), (1024, 3000));

    let width_only = Renderer::new(&engine)
        .render(&RenderRequest {
            viewport: Viewport { width: 640, height: 0 },
            ..request()
        })
        .unwrap();
    assert_eq!((width_only.width(), width_only.height()), (640, 3000));
}

#[test]
fn scaling_is_applied_after_capture() {
    let engine = FakeEngine::loading_after(1).with_content(1600, 1200);

    let keep = Renderer::new(&engine)
        .render(&RenderRequest {
            scale: Some(ScaleSpec {
                width: 400,
                height: 400,
                aspect_ratio: AspectRatio::Keep,
            }),
            ..request()
        })
        .unwrap();
    assert_eq!((keep.width(), keep.height()), (400, 300));

    let crop = Renderer::new(&engine)
        .render(&RenderRequest {
            scale: Some(ScaleSpec {
                width: 400,
                height: 400,
                aspect_ratio: AspectRatio::Crop,
            }),
            ..request()
        })
        .unwrap();
    assert_eq!((crop.width(), crop.height()), (400, 400));
}

#[test]
fn cancellation_stops_an_unbounded_wait() {
    let engine = FakeEngine::new(LoadScript::Never);
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });

    let err = Renderer::new(&engine)
        .with_pump_interval(PUMP)
        .render_with_cancel(&request(), &cancel)
        .unwrap_err();
    handle.join().unwrap();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(engine.stats.closed(), 1);
}

#[test]
fn session_gets_request_settings_and_scripts_are_interrupted() {
    let engine = FakeEngine::loading_after(1);

    Renderer::new(&engine).render(&request()).unwrap();
    let settings = engine.stats.settings().unwrap();
    assert!(!settings.enable_javascript);
    assert!(settings.dialog_policy.suppress_alerts);
    assert_eq!(engine.stats.interrupts(), 0);

    Renderer::new(&engine)
        .render(&RenderRequest {
            enable_javascript: true,
            ..request()
        })
        .unwrap();
    assert!(engine.stats.settings().unwrap().enable_javascript);
    assert_eq!(engine.stats.interrupts(), 1);
}

#[test]
fn dialogs_during_load_do_not_disturb_the_render() {
    let mut engine = FakeEngine::loading_after(2);
    engine.extra_events = vec![EngineEvent::DialogHandled {
        kind: DialogKind::Confirm,
        message: "Leave?".into(),
        accepted: false,
    }];
    let rendered = Renderer::new(&engine).render(&request()).unwrap();
    assert!(rendered.load_succeeded);
}

#[test]
fn jpeg_output_round_trips_through_decoder() {
    let engine = FakeEngine::loading_after(1).with_content(64, 48);
    let bytes = Renderer::new(&engine)
        .render_to_bytes(&RenderRequest {
            output_format: OutputFormat::Jpeg,
            ..request()
        })
        .unwrap();
    let decoded = image::load_from_memory_with_format(&bytes, image::ImageFormat::Jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 48));
}

#[test]
fn render_error_wins_over_close_error() {
    let engine = FakeEngine {
        fail_capture: true,
        fail_close: true,
        ..FakeEngine::loading_after(1)
    };
    let err = Renderer::new(&engine).render(&request()).unwrap_err();
    assert!(matches!(err, Error::CaptureFailed(_)), "got {:?}", err);
    assert_eq!(engine.stats.closed(), 1);

    let clean_render = FakeEngine {
        fail_close: true,
        ..FakeEngine::loading_after(1)
    };
    assert!(matches!(
        Renderer::new(&clean_render).render(&request()),
        Err(Error::Other(_))
    ));
}

#[test]
fn writer_receives_encoded_image_only_on_success() {
    let engine = FakeEngine::loading_after(1).with_content(32, 16);
    let mut out = Vec::new();
    Renderer::new(&engine)
        .render_to_writer(&request(), &mut out)
        .unwrap();
    let decoded = image::load_from_memory(&out).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (32, 16));

    let never = FakeEngine::new(LoadScript::Never);
    let mut untouched = Vec::new();
    let timeout = RenderRequest {
        timeout: Duration::from_millis(30),
        ..request()
    };
    assert!(Renderer::new(&never)
        .with_pump_interval(PUMP)
        .render_to_writer(&timeout, &mut untouched)
        .is_err());
    assert!(untouched.is_empty());
}

#[test]
fn scripts_are_interrupted_before_layout_is_measured() {
    let engine = FakeEngine::loading_after(1);
    Renderer::new(&engine)
        .render(&RenderRequest {
            enable_javascript: true,
            ..request()
        })
        .unwrap();
    assert_eq!(engine.stats.interrupts_before_measure(), 1);
}
