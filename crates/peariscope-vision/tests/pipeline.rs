use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use nalgebra::{Point2, Rotation3, Vector3};
use peariscope_core::{
    AcquisitionError, CalibrationProfile, ColorImage, FrameSink, NullSink, RigidTransform,
    ScriptedSource,
};
use peariscope_vision::{
    keys, ActuatorError, Illuminator, IterationOutcome, LedColor, MemoryStore, ParameterStore,
    TargetGeometry, VisionConfig,
};

const WIDTH: usize = 640;
const HEIGHT: usize = 480;

fn camera() -> CalibrationProfile {
    CalibrationProfile::from_intrinsics(600.0, 600.0, 320.0, 240.0, vec![0.0; 5]).expect("camera")
}

fn truth() -> RigidTransform {
    let flip = Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI);
    RigidTransform::new(flip, Vector3::new(0.2, -0.1, 6.0))
}

fn stroke(img: &mut ColorImage, a: Point2<f64>, b: Point2<f64>, half_width: f64) {
    let ab = b - a;
    let len2 = ab.norm_squared();
    let (x0, x1) = (a.x.min(b.x) - 3.0, a.x.max(b.x) + 3.0);
    let (y0, y1) = (a.y.min(b.y) - 3.0, a.y.max(b.y) + 3.0);
    for y in y0.floor() as i64..=y1.ceil() as i64 {
        for x in x0.floor() as i64..=x1.ceil() as i64 {
            let p = Point2::new(x as f64, y as f64);
            let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
            if (p - (a + ab * t)).norm() <= half_width {
                img.put_pixel(x, y, [0, 255, 0]);
            }
        }
    }
}

/// The power-port outline as a green U (open at the top) on black.
fn render_target() -> ColorImage {
    let corners = camera()
        .project_points(&TargetGeometry::power_port().corners, &truth())
        .expect("visible");
    let [tl, tr, bl, br] = [corners[0], corners[1], corners[2], corners[3]];
    let mut img = ColorImage::new(WIDTH, HEIGHT);
    stroke(&mut img, tl, bl, 1.0);
    stroke(&mut img, bl, br, 1.0);
    stroke(&mut img, br, tr, 1.0);
    img
}

fn config_with_profile(dir: &tempfile::TempDir) -> VisionConfig {
    let path = dir.path().join("camera0.json");
    camera().save(&path).expect("save profile");
    VisionConfig {
        calibration_path: Some(path),
        ..VisionConfig::default()
    }
}

#[derive(Clone, Default)]
struct RecordingLight(Arc<Mutex<Vec<LedColor>>>);

impl Illuminator for RecordingLight {
    fn set_color(&mut self, color: LedColor) -> Result<(), ActuatorError> {
        self.0.lock().expect("lock").push(color);
        Ok(())
    }
}

#[derive(Default)]
struct Counting {
    frames: usize,
    errors: Vec<AcquisitionError>,
}

impl FrameSink for Counting {
    fn put_frame(&mut self, _frame: &ColorImage) {
        self.frames += 1;
    }

    fn notify_error(&mut self, error: &AcquisitionError) {
        self.errors.push(error.clone());
    }
}

#[test]
fn rendered_target_yields_one_detection_with_pose() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config_with_profile(&dir);
    let pipeline = cfg.build_pipeline().expect("pipeline");

    let report = pipeline.process(&render_target(), &cfg.detection);
    assert_eq!(report.detections.len(), 1, "rejected {}", report.rejected);

    let det = &report.detections[0];
    assert_eq!(det.corners.len(), 4);
    assert!(det.fill_ratio < cfg.detection.max_fill);
    let pose = det.pose.expect("pose");
    let t = truth().translation;
    let expected = (t.x * t.x + t.z * t.z).sqrt();
    assert_relative_eq!(pose.distance, expected, max_relative = 0.05);
    assert!(pose.bearing > 0.0);
}

#[test]
fn loop_publishes_aligned_lists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MemoryStore::new();
    let mut vl = config_with_profile(&dir)
        .build_loop(
            store.clone(),
            ScriptedSource::from_frames([render_target()]),
            NullSink,
        )
        .expect("loop");

    assert!(matches!(
        vl.iterate(),
        IterationOutcome::Processed { detections: 1, .. }
    ));
    let list = |key| {
        store
            .get(key)
            .and_then(|v| v.as_number_array().map(|a| a.to_vec()))
            .expect(key)
    };
    let xs = list(keys::X_LIST);
    assert_eq!(xs.len(), 1);
    assert_eq!(list(keys::Y_LIST).len(), 1);
    assert_eq!(list(keys::X_LIST_PCT).len(), 1);
    assert!(list(keys::DISTANCE_LIST)[0].is_finite());
    // Target sits right of center.
    assert!(list(keys::X_LIST_PCT)[0] > 0.0);
    assert_eq!(store.get_number(keys::IMAGE_WIDTH, 0.0), WIDTH as f64);
    assert!(store.get_number(keys::ELAPSED_TIME, -1.0) >= 0.0);

    assert_eq!(vl.iterate(), IterationOutcome::EndOfStream);
}

#[test]
fn acquisition_errors_do_not_stop_the_loop() {
    let store = MemoryStore::new();
    let source = ScriptedSource::new([
        Err(AcquisitionError::Read("usb reset".into())),
        Ok(ColorImage::new(WIDTH, HEIGHT)),
    ]);
    let cfg = VisionConfig {
        draw_overlay: true,
        ..VisionConfig::default()
    };
    let mut vl = cfg
        .build_loop(store.clone(), source, Counting::default())
        .expect("loop");
    let summary = vl.run(Some(10));
    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.failures, 1);
    assert_eq!(vl.sink.errors.len(), 1);
    assert_eq!(vl.sink.frames, 1);
    assert_eq!(
        store
            .get(keys::X_LIST)
            .and_then(|v| v.as_number_array().map(|a| a.len())),
        Some(0)
    );
}

#[test]
fn light_follows_store_changes() {
    let store = MemoryStore::new();
    let light = RecordingLight::default();
    let calls = light.0.clone();
    let mut vl = peariscope_vision::VisionLoop::new(
        VisionConfig::default().build_pipeline().expect("pipeline"),
        store.clone(),
        ScriptedSource::from_frames((0..4).map(|_| ColorImage::new(32, 24))),
        NullSink,
        light,
    );

    vl.iterate();
    vl.iterate();
    assert_eq!(*calls.lock().expect("lock"), vec![LedColor::default()]);

    store.put_number(keys::LED_RED, 254.6);
    store.put_number(keys::LED_BLUE, 300.0);
    vl.iterate();
    vl.iterate();
    assert_eq!(
        *calls.lock().expect("lock"),
        vec![LedColor::default(), LedColor::new(255, 255, 255)]
    );
}
