//! Device implementations
//!
//! [`HardwareRegistry`] owns the physical capture resources for one manager:
//! the Kinect session and the Pi camera (plus the arbiter that keeps camera
//! instances mutually exclusive). It is created once and passed explicitly,
//! so independent registries can coexist in tests.

pub mod kinect;
pub mod picam;

use crate::config::{AppConfig, KinectBackend};
use crate::core::source::VideoSource;
use crate::core::types::SourceKind;
use kinect::synthetic::SyntheticKinect;
use kinect::{KinectDevice, KinectSource, NoDevice};
use picam::process::{CommandLauncher, ProcessLauncher};
use picam::{PiCameraSource, PicamArbiter};
use std::sync::Arc;

/// Capture resources shared by every stream
pub struct HardwareRegistry {
    kinect: Arc<KinectSource>,
    picam: Arc<PiCameraSource>,
    arbiter: Arc<PicamArbiter>,
}

impl HardwareRegistry {
    /// Assemble from explicit collaborators and probe the Kinect once
    pub fn new(
        kinect_device: Box<dyn KinectDevice>,
        launcher: Arc<dyn ProcessLauncher>,
        config: &AppConfig,
    ) -> Self {
        let kinect = Arc::new(KinectSource::new(kinect_device, &config.kinect));
        kinect.probe();

        let arbiter = Arc::new(PicamArbiter::new());
        let picam = Arc::new(PiCameraSource::new(
            Arc::clone(&arbiter),
            launcher,
            config.picam.clone(),
        ));

        Self {
            kinect,
            picam,
            arbiter,
        }
    }

    pub fn kinect(&self) -> &Arc<KinectSource> {
        &self.kinect
    }

    pub fn picam(&self) -> &Arc<PiCameraSource> {
        &self.picam
    }

    /// Arbiter for creating further, mutually exclusive camera instances
    pub fn picam_arbiter(&self) -> &Arc<PicamArbiter> {
        &self.arbiter
    }

    pub fn kinect_available(&self) -> bool {
        self.kinect.is_available()
    }

    /// Re-run Kinect detection (restores availability after failures)
    pub fn reprobe_kinect(&self) -> bool {
        self.kinect.probe()
    }

    /// Sources a stream may select right now
    pub fn available_sources(&self) -> Vec<SourceKind> {
        if self.kinect_available() {
            SourceKind::ALL.to_vec()
        } else {
            vec![SourceKind::Picam]
        }
    }

    /// Source object backing a logical source
    pub fn source_for(&self, kind: SourceKind) -> Arc<dyn VideoSource> {
        if kind.is_kinect() {
            Arc::clone(&self.kinect) as Arc<dyn VideoSource>
        } else {
            Arc::clone(&self.picam) as Arc<dyn VideoSource>
        }
    }

    /// Release hardware
    pub fn shutdown(&self) {
        self.picam.stop();
        self.kinect.stop();
    }
}

/// Create the hardware registry described by configuration
pub fn create_hardware(config: &AppConfig) -> HardwareRegistry {
    let device: Box<dyn KinectDevice> = match config.kinect.backend {
        KinectBackend::None => Box::new(NoDevice),
        KinectBackend::Synthetic => {
            log::info!("Using synthetic Kinect backend");
            Box::new(SyntheticKinect::new(config.kinect.width, config.kinect.height))
        }
    };
    HardwareRegistry::new(device, Arc::new(CommandLauncher), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Working 2x2 device counting releases
    struct Counting(Arc<AtomicUsize>);

    impl KinectDevice for Counting {
        fn get_rgb(&mut self) -> Option<Vec<u8>> {
            Some(vec![0; 2 * 2 * 3])
        }

        fn get_ir(&mut self) -> Option<Vec<u8>> {
            Some(vec![0; 2 * 2])
        }

        fn get_depth(&mut self) -> Option<Vec<u16>> {
            Some(vec![0; 2 * 2])
        }

        fn stop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_shutdown_releases_kinect() {
        let mut config = AppConfig::default();
        config.kinect.width = 2;
        config.kinect.height = 2;
        config.picam.commands = vec![];
        let stops = Arc::new(AtomicUsize::new(0));
        let hw = HardwareRegistry::new(
            Box::new(Counting(Arc::clone(&stops))),
            Arc::new(CommandLauncher),
            &config,
        );
        assert!(hw.kinect_available());
        assert_eq!(hw.kinect().dimensions(), (2, 2));
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        hw.shutdown();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_synthetic_backend_is_available() {
        let mut config = AppConfig::default();
        config.kinect.backend = KinectBackend::Synthetic;
        config.picam.commands = vec!["drishti-no-such-camera-binary".into()];
        let hw = create_hardware(&config);
        assert!(hw.kinect_available());
        assert_eq!(hw.available_sources().len(), 4);
        assert_eq!(hw.source_for(SourceKind::KinectDepth).name(), "kinect");
        assert_eq!(hw.source_for(SourceKind::Picam).name(), "picam");
    }

    #[test]
    fn test_no_backend_only_offers_picam() {
        let mut config = AppConfig::default();
        config.picam.commands = vec![];
        let hw = create_hardware(&config);
        assert!(!hw.kinect_available());
        assert_eq!(hw.available_sources(), vec![SourceKind::Picam]);
        assert!(!hw.reprobe_kinect());
    }
}
