use super::requests::{self, BiometricRequest};
use super::*;
use crate::test_helpers::{RecordingDelay, serial};
use alloc::collections::VecDeque;
use alloc::vec;
use futures::executor::block_on;

#[derive(Default)]
struct ScriptedSensor {
    captures: VecDeque<Result<Capture, SensorError>>,
    search: Option<Match>,
    template_result: Option<SensorError>,
    store_result: Option<SensorError>,
    templates: u16,
    extracted: Vec<u8>,
    stored: Vec<u16>,
    cleared: bool,
}

impl ScriptedSensor {
    fn with_captures(captures: Vec<Result<Capture, SensorError>>) -> Self {
        Self {
            captures: captures.into(),
            ..Self::default()
        }
    }
}

impl FingerprintSensor for ScriptedSensor {
    async fn capture(&mut self) -> Result<Capture, SensorError> {
        self.captures.pop_front().unwrap_or(Ok(Capture::NoFinger))
    }

    async fn extract(&mut self, buffer: u8) -> Result<(), SensorError> {
        self.extracted.push(buffer);
        Ok(())
    }

    async fn generate_template(&mut self) -> Result<(), SensorError> {
        self.template_result.map_or(Ok(()), Err)
    }

    async fn store(&mut self, slot: u16) -> Result<(), SensorError> {
        if let Some(err) = self.store_result {
            return Err(err);
        }
        self.stored.push(slot);
        self.templates += 1;
        Ok(())
    }

    async fn search(&mut self, _timeout_ms: u32) -> Result<Option<Match>, SensorError> {
        Ok(self.search)
    }

    async fn clear(&mut self) -> Result<(), SensorError> {
        self.cleared = true;
        self.templates = 0;
        Ok(())
    }

    async fn template_count(&mut self) -> Result<u16, SensorError> {
        Ok(self.templates)
    }
}

fn controller(sensor: ScriptedSensor) -> BiometricController<ScriptedSensor, RecordingDelay> {
    BiometricController::new(
        sensor,
        RecordingDelay::default(),
        BiometricTimings::from(&DeviceConfig::default()),
    )
}

/// Finger down then up for each of `count` captures.
fn touches(count: usize) -> Vec<Result<Capture, SensorError>> {
    (0..count)
        .flat_map(|_| [Ok(Capture::Image), Ok(Capture::NoFinger)])
        .collect()
}

#[test]
fn identify_without_finger_is_idle() {
    let mut controller = controller(ScriptedSensor::default());
    assert_eq!(block_on(controller.identify()), Ok(None));
}

#[test]
fn identify_reports_match_or_no_match() {
    let mut sensor = ScriptedSensor::with_captures(vec![Ok(Capture::Image), Ok(Capture::Image)]);
    sensor.search = Some(Match { slot: 3, score: 120 });
    let mut controller = controller(sensor);
    assert_eq!(
        block_on(controller.identify()),
        Ok(Some(Match { slot: 3, score: 120 }))
    );

    controller.sensor().search = None;
    assert_eq!(block_on(controller.identify()), Err(SensorError::NoMatch));
}

#[test]
fn enroll_takes_five_captures_and_stores_next_slot() {
    let mut sensor = ScriptedSensor::with_captures(touches(5));
    sensor.templates = 2;
    let mut controller = controller(sensor);

    let mut steps = Vec::new();
    let slot = block_on(controller.enroll(|step, total| steps.push((step, total)))).unwrap();

    assert_eq!(slot, 2);
    assert_eq!(steps, [(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
    let (sensor, _) = controller.into_parts();
    assert_eq!(sensor.extracted, [1, 2, 3, 4, 5]);
    assert_eq!(sensor.stored, [2]);
}

#[test]
fn enroll_times_out_without_finger() {
    let mut controller = controller(ScriptedSensor::with_captures(touches(2)));
    assert_eq!(
        block_on(controller.enroll(|_, _| {})),
        Err(SensorError::Timeout)
    );
    let waited = controller.delay().total_ms;
    assert!(waited >= DeviceConfig::default().capture_timeout_ms as u64);
    assert!(controller.sensor().stored.is_empty());
}

#[test]
fn held_finger_makes_lift_wait_time_out() {
    let held = (0..300).map(|_| Ok(Capture::Image)).collect();
    let mut controller = controller(ScriptedSensor::with_captures(held));

    assert_eq!(block_on(controller.wait_for_lift()), Err(SensorError::Timeout));
    assert_eq!(block_on(controller.wait_for_lift()), Ok(()));
}

#[test]
fn transient_capture_errors_are_retried() {
    let mut captures = vec![Err(SensorError::Hardware(0x01)), Ok(Capture::Image)];
    captures.extend(touches(5).into_iter().skip(1));
    let mut controller = controller(ScriptedSensor::with_captures(captures));
    assert_eq!(block_on(controller.enroll(|_, _| {})), Ok(0));
}

#[test]
fn template_mismatch_and_bad_slot_fail_enrollment() {
    let mut sensor = ScriptedSensor::with_captures(touches(5));
    sensor.template_result = Some(SensorError::EnrollMismatch);
    assert_eq!(
        block_on(controller(sensor).enroll(|_, _| {})),
        Err(SensorError::EnrollMismatch)
    );

    let mut sensor = ScriptedSensor::with_captures(touches(5));
    sensor.store_result = Some(SensorError::BadLocation);
    assert_eq!(
        block_on(controller(sensor).enroll(|_, _| {})),
        Err(SensorError::BadLocation)
    );
}

#[test]
fn clear_requires_confirming_match() {
    let mut sensor = ScriptedSensor::with_captures(vec![Ok(Capture::NoFinger), Ok(Capture::Image)]);
    sensor.search = Some(Match { slot: 0, score: 90 });
    let mut controller = controller(sensor);
    assert_eq!(block_on(controller.clear_library()), Ok(()));
    assert!(controller.sensor().cleared);
}

#[test]
fn clear_without_confirmation_keeps_library() {
    let mut controller = controller(ScriptedSensor::default());
    assert_eq!(
        block_on(controller.clear_library()),
        Err(SensorError::NotConfirmed)
    );
    assert!(controller.delay().total_ms >= 8_000);
    assert!(!controller.sensor().cleared);

    let mut unknown = ScriptedSensor::with_captures(vec![Ok(Capture::Image)]);
    unknown.search = None;
    let mut controller = self::controller(unknown);
    assert_eq!(
        block_on(controller.clear_library()),
        Err(SensorError::NotConfirmed)
    );
    assert!(!controller.sensor().cleared);
}

#[test]
fn request_queue_rejects_when_busy() {
    let _guard = serial();
    requests::clear();
    assert_eq!(requests::publish(BiometricRequest::Enroll), Ok(()));
    assert_eq!(requests::publish(BiometricRequest::ClearLibrary), Ok(()));
    assert_eq!(
        requests::publish(BiometricRequest::Enroll),
        Err(BiometricRequest::Enroll)
    );
    assert_eq!(
        requests::drain(),
        [BiometricRequest::Enroll, BiometricRequest::ClearLibrary]
    );
}
