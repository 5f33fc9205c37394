//! Fingerprint sensor orchestration: identify, enroll and confirm-then-clear.
//!
//! The sensor's UART packet layer lives behind [`FingerprintSensor`]. Timeouts are measured in
//! poll intervals so the controller behaves the same under a mocked delay.

#[cfg(test)]
use alloc::vec::Vec;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embedded_hal_async::delay::DelayNs;

use crate::config::DeviceConfig;

/// Character buffer used for single-capture identification.
const IDENTIFY_BUFFER: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    Timeout,
    NoMatch,
    EnrollMismatch,
    BadLocation,
    NotConfirmed,
    Hardware(u8),
}

impl core::fmt::Display for SensorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SensorError::Timeout => write!(f, "no finger detected in time"),
            SensorError::NoMatch => write!(f, "fingerprint not recognized"),
            SensorError::EnrollMismatch => write!(f, "captures do not match"),
            SensorError::BadLocation => write!(f, "template slot unavailable"),
            SensorError::NotConfirmed => write!(f, "not confirmed by a known finger"),
            SensorError::Hardware(code) => write!(f, "sensor error 0x{code:02X}"),
        }
    }
}

impl core::error::Error for SensorError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    Image,
    NoFinger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub slot: u16,
    pub score: u16,
}

/// Driver contract for the optical sensor.
#[allow(async_fn_in_trait)]
pub trait FingerprintSensor {
    async fn capture(&mut self) -> Result<Capture, SensorError>;
    async fn extract(&mut self, buffer: u8) -> Result<(), SensorError>;
    /// `Err(EnrollMismatch)` when the buffered captures disagree.
    async fn generate_template(&mut self) -> Result<(), SensorError>;
    async fn store(&mut self, slot: u16) -> Result<(), SensorError>;
    /// `Ok(None)` when no stored template matches.
    async fn search(&mut self, timeout_ms: u32) -> Result<Option<Match>, SensorError>;
    async fn clear(&mut self) -> Result<(), SensorError>;
    async fn template_count(&mut self) -> Result<u16, SensorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiometricTimings {
    pub capture_timeout_ms: u32,
    pub search_timeout_ms: u32,
    pub clear_confirm_timeout_ms: u32,
    pub poll_interval_ms: u32,
    pub enroll_captures: u8,
}

impl From<&DeviceConfig> for BiometricTimings {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            capture_timeout_ms: config.capture_timeout_ms,
            search_timeout_ms: config.search_timeout_ms,
            clear_confirm_timeout_ms: config.clear_confirm_timeout_ms,
            poll_interval_ms: config.poll_interval_ms.max(1),
            enroll_captures: config.enroll_captures,
        }
    }
}

pub struct BiometricController<S, D> {
    sensor: S,
    delay: D,
    timings: BiometricTimings,
}

impl<S, D> BiometricController<S, D>
where
    S: FingerprintSensor,
    D: DelayNs,
{
    pub fn new(sensor: S, delay: D, timings: BiometricTimings) -> Self {
        Self {
            sensor,
            delay,
            timings,
        }
    }

    pub fn sensor(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub fn delay(&mut self) -> &mut D {
        &mut self.delay
    }

    pub fn into_parts(self) -> (S, D) {
        (self.sensor, self.delay)
    }

    /// One capture attempt. `Ok(None)` when no finger is on the sensor.
    pub async fn identify(&mut self) -> Result<Option<Match>, SensorError> {
        match self.sensor.capture().await? {
            Capture::NoFinger => Ok(None),
            Capture::Image => {
                self.sensor.extract(IDENTIFY_BUFFER).await?;
                self.sensor
                    .search(self.timings.search_timeout_ms)
                    .await?
                    .map(Some)
                    .ok_or(SensorError::NoMatch)
            }
        }
    }

    /// Enroll a new finger, reporting each accepted capture. Returns the stored slot.
    pub async fn enroll(&mut self, mut on_capture: impl FnMut(u8, u8)) -> Result<u16, SensorError> {
        let total = self.timings.enroll_captures;
        for step in 1..=total {
            self.wait_for_finger().await?;
            self.sensor.extract(step).await?;
            on_capture(step, total);
            if step < total {
                self.wait_for_lift().await?;
            }
        }

        self.sensor.generate_template().await?;
        let slot = self.sensor.template_count().await?;
        self.sensor.store(slot).await?;
        log::info!("fingerprint enrolled in slot {slot}");
        Ok(slot)
    }

    /// Wipe the sensor library once a known finger confirms the request.
    pub async fn clear_library(&mut self) -> Result<(), SensorError> {
        let mut elapsed = 0u32;
        loop {
            match self.identify().await {
                Ok(Some(found)) => {
                    log::info!("library clear confirmed by slot {}", found.slot);
                    break;
                }
                Ok(None) | Err(SensorError::Hardware(_)) => {}
                Err(_) => return Err(SensorError::NotConfirmed),
            }
            if elapsed >= self.timings.clear_confirm_timeout_ms {
                return Err(SensorError::NotConfirmed);
            }
            elapsed = self.pause(elapsed).await;
        }
        self.sensor.clear().await
    }

    async fn wait_for_finger(&mut self) -> Result<(), SensorError> {
        let mut elapsed = 0u32;
        loop {
            match self.sensor.capture().await {
                Ok(Capture::Image) => return Ok(()),
                Ok(Capture::NoFinger) | Err(SensorError::Hardware(_)) => {}
                Err(err) => return Err(err),
            }
            if elapsed >= self.timings.capture_timeout_ms {
                return Err(SensorError::Timeout);
            }
            elapsed = self.pause(elapsed).await;
        }
    }

    /// Wait until the finger leaves the sensor.
    pub async fn wait_for_lift(&mut self) -> Result<(), SensorError> {
        let mut elapsed = 0u32;
        loop {
            if let Ok(Capture::NoFinger) = self.sensor.capture().await {
                return Ok(());
            }
            if elapsed >= self.timings.capture_timeout_ms {
                return Err(SensorError::Timeout);
            }
            elapsed = self.pause(elapsed).await;
        }
    }

    async fn pause(&mut self, elapsed: u32) -> u32 {
        self.delay.delay_ms(self.timings.poll_interval_ms).await;
        elapsed.saturating_add(self.timings.poll_interval_ms)
    }
}

pub mod requests {
    use super::*;

    const REQUEST_QUEUE_DEPTH: usize = 2;

    static REQUEST_CHANNEL: Channel<CriticalSectionRawMutex, BiometricRequest, REQUEST_QUEUE_DEPTH> =
        Channel::new();

    /// Sensor jobs queued by the command protocol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum BiometricRequest {
        Enroll,
        ClearLibrary,
    }

    pub type RequestSender =
        Sender<'static, CriticalSectionRawMutex, BiometricRequest, REQUEST_QUEUE_DEPTH>;
    pub type RequestReceiver =
        Receiver<'static, CriticalSectionRawMutex, BiometricRequest, REQUEST_QUEUE_DEPTH>;

    pub fn request_sender() -> RequestSender {
        REQUEST_CHANNEL.sender()
    }

    pub fn request_receiver() -> RequestReceiver {
        REQUEST_CHANNEL.receiver()
    }

    /// Queue a request without waiting. Fails when the sensor task is already busy.
    pub fn publish(request: BiometricRequest) -> Result<(), BiometricRequest> {
        request_sender().try_send(request).map_err(|err| match err {
            embassy_sync::channel::TrySendError::Full(request) => request,
        })
    }

    #[cfg(test)]
    pub fn clear() {
        REQUEST_CHANNEL.clear();
    }

    #[cfg(test)]
    pub fn drain() -> Vec<BiometricRequest> {
        let receiver = request_receiver();
        let mut collected = Vec::new();
        while let Ok(request) = receiver.try_receive() {
            collected.push(request);
        }
        collected
    }
}

#[cfg(test)]
#[path = "biometric_tests.rs"]
mod biometric_tests;
