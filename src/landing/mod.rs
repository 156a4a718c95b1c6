//! # Precision Landing Controller
//!
//! Closed-loop, vision-guided descent onto a detected landing target.
//!
//! The control loop switches the vehicle into guided mode, then repeatedly
//! polls the video source, runs target detection and converts the lateral
//! offset into velocity corrections through one PID controller per axis.
//! Once the target is centered within the configured threshold and its
//! apparent size says the vehicle is close enough, a single land command is
//! issued and the loop exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::commands::{CommandInterface, FlightMode};
use crate::config::LandingConfig;

pub mod pid;
pub mod vision;

pub use pid::Pid;
pub use vision::{Frame, TargetDetector, TargetFix, VideoSource};

/// Vision-guided landing worker
///
/// `start` is idempotent; `stop` requests a cooperative exit and joins the
/// worker. The video source is released when the loop exits, not when the
/// stop flag is raised.
pub struct PrecisionLanding {
    commands: Arc<CommandInterface>,
    config: LandingConfig,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PrecisionLanding {
    pub fn new(commands: Arc<CommandInterface>, config: LandingConfig) -> Self {
        Self {
            commands,
            config,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Spawn the control loop over the given camera and detector
    ///
    /// A no-op if the controller is already running.
    pub fn start(
        &mut self,
        video: Box<dyn VideoSource>,
        detector: Box<dyn TargetDetector>,
    ) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("precision landing already running");
            return;
        }

        info!("precision landing started");
        self.worker = Some(tokio::spawn(control_loop(
            Arc::clone(&self.commands),
            self.config.clone(),
            Arc::clone(&self.running),
            video,
            detector,
        )));
    }

    /// Whether the control loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Raise the stop flag and wait for the worker to finish
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        info!("precision landing stopped");
    }

    /// Wait for the loop to finish on its own (after a land command)
    pub async fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

async fn control_loop(
    commands: Arc<CommandInterface>,
    config: LandingConfig,
    running: Arc<AtomicBool>,
    mut video: Box<dyn VideoSource>,
    mut detector: Box<dyn TargetDetector>,
) {
    let Some(mode) = FlightMode::from_name(&config.mode) else {
        // Config validation rejects unknown modes; this guards direct library use.
        error!("unknown landing mode {:?}; aborting", config.mode);
        running.store(false, Ordering::SeqCst);
        return;
    };

    info!("switching to {mode} for vision-guided descent");
    if let Err(e) = commands.set_mode(mode) {
        error!("failed to switch mode: {e}");
    }
    tokio::time::sleep(Duration::from_millis(config.mode_settle_ms)).await;

    let mut pid_x = Pid::from_config(&config.pid);
    let mut pid_y = Pid::from_config(&config.pid);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut last_iteration = Instant::now();

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        let dt = now.duration_since(last_iteration).as_secs_f32();
        last_iteration = now;

        if let Some(frame) = video.try_frame() {
            if let Some(fix) = detector.detect(&frame) {
                debug!(
                    "target at offset ({:.2}, {:.2}), radius {:.0}",
                    fix.offset_x, fix.offset_y, fix.radius
                );

                if fix.offset_x.abs() < config.center_threshold
                    && fix.offset_y.abs() < config.center_threshold
                    && fix.radius >= config.min_radius
                {
                    info!("landing target centered; issuing land command");
                    if let Err(e) = commands.land() {
                        error!("failed to send land command: {e}");
                    }
                    break;
                }

                // Image +y is forward-negative in the body frame, image +x
                // is right; both axes invert going from offset to velocity.
                let vx = pid_x.update(-fix.offset_y, dt);
                let vy = pid_y.update(-fix.offset_x, dt);
                if let Err(e) = commands.send_velocity(vx, vy, 0.0) {
                    warn!("failed to send velocity correction: {e}");
                }
            }
            // No fix: no correction this cycle; the target may reappear.
        }

        tokio::time::sleep(poll_interval).await;
    }

    video.release();
    running.store(false, Ordering::SeqCst);
    info!("precision landing loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PidConfig;
    use crate::link::mocks::MockLink;
    use crate::link::Link;
    use mavlink::common::{MavCmd, MavMessage};

    struct ScriptedVideo {
        released: Arc<AtomicBool>,
    }

    impl VideoSource for ScriptedVideo {
        fn try_frame(&mut self) -> Option<Frame> {
            Some(Frame {
                width: 640,
                height: 480,
                pixels: Vec::new(),
            })
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedDetector {
        fix: Option<TargetFix>,
    }

    impl TargetDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> Option<TargetFix> {
            self.fix
        }
    }

    fn landing_config() -> LandingConfig {
        LandingConfig {
            mode: "GUIDED".to_string(),
            mode_settle_ms: 1,
            center_threshold: 0.05,
            min_radius: 50.0,
            poll_interval_ms: 5,
            pid: PidConfig {
                kp: 1.0,
                ki: 0.0,
                kd: 0.0,
                max_output: 1.0,
            },
        }
    }

    fn fixture(
        fix: Option<TargetFix>,
    ) -> (
        PrecisionLanding,
        Arc<MockLink>,
        Arc<AtomicBool>,
        Box<dyn VideoSource>,
        Box<dyn TargetDetector>,
    ) {
        let (link, tx) = MockLink::new();
        drop(tx);
        let commands = Arc::new(CommandInterface::new(
            Arc::clone(&link) as Arc<dyn Link>,
            1,
            1,
        ));
        let landing = PrecisionLanding::new(commands, landing_config());
        let released = Arc::new(AtomicBool::new(false));
        let video = Box::new(ScriptedVideo {
            released: Arc::clone(&released),
        });
        let detector = Box::new(ScriptedDetector { fix });
        (landing, link, released, video, detector)
    }

    fn land_count(link: &MockLink) -> usize {
        link.sent_messages()
            .iter()
            .filter(|msg| {
                matches!(
                    msg,
                    MavMessage::COMMAND_LONG(data)
                        if data.command == MavCmd::MAV_CMD_NAV_LAND
                )
            })
            .count()
    }

    fn velocity_commands(link: &MockLink) -> Vec<(f32, f32, f32)> {
        link.sent_messages()
            .iter()
            .filter_map(|msg| match msg {
                MavMessage::SET_POSITION_TARGET_LOCAL_NED(data) => {
                    Some((data.vx, data.vy, data.vz))
                }
                _ => None,
            })
            .collect()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_lands_once_when_centered_and_close() {
        let centered = TargetFix {
            offset_x: 0.02,
            offset_y: 0.02,
            radius: 60.0,
        };
        let (mut landing, link, released, video, detector) =
            fixture(Some(centered));

        landing.start(video, detector);
        wait_until(|| !landing.is_running()).await;
        landing.join().await;

        assert_eq!(land_count(&link), 1);
        assert!(released.load(Ordering::SeqCst));

        // Mode switch precedes everything else
        match &link.sent_messages()[0] {
            MavMessage::COMMAND_LONG(data) => {
                assert_eq!(data.command, MavCmd::MAV_CMD_DO_SET_MODE);
                assert_eq!(data.param2, 4.0);
            }
            other => panic!("expected COMMAND_LONG, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_off_center_target_never_triggers_landing() {
        // One axis is centered, the other is far off; radius is irrelevant
        let off_center = TargetFix {
            offset_x: 0.3,
            offset_y: 0.01,
            radius: 500.0,
        };
        let (mut landing, link, released, video, detector) =
            fixture(Some(off_center));

        landing.start(video, detector);
        wait_until(|| !velocity_commands(&link).is_empty()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(land_count(&link), 0);
        assert!(landing.is_running());

        landing.stop().await;
        assert_eq!(land_count(&link), 0);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_small_target_does_not_land_until_close() {
        // Centered but still high up: radius below the minimum
        let centered_far = TargetFix {
            offset_x: 0.01,
            offset_y: 0.01,
            radius: 20.0,
        };
        let (mut landing, link, _released, video, detector) =
            fixture(Some(centered_far));

        landing.start(video, detector);
        wait_until(|| !velocity_commands(&link).is_empty()).await;

        assert_eq!(land_count(&link), 0);
        landing.stop().await;
    }

    #[tokio::test]
    async fn test_corrections_invert_offsets_into_velocities() {
        let fix = TargetFix {
            offset_x: 0.5,
            offset_y: -0.25,
            radius: 60.0,
        };
        let (mut landing, link, _released, video, detector) =
            fixture(Some(fix));

        landing.start(video, detector);
        wait_until(|| !velocity_commands(&link).is_empty()).await;
        landing.stop().await;

        // kp = 1, ki = kd = 0: vx = -offset_y, vy = -offset_x, vz held at 0
        let (vx, vy, vz) = velocity_commands(&link)[0];
        assert!((vx - 0.25).abs() < 1e-6);
        assert!((vy + 0.5).abs() < 1e-6);
        assert_eq!(vz, 0.0);
    }

    #[tokio::test]
    async fn test_detection_miss_issues_no_correction() {
        let (mut landing, link, _released, video, detector) = fixture(None);

        landing.start(video, detector);
        tokio::time::sleep(Duration::from_millis(60)).await;
        landing.stop().await;

        assert!(velocity_commands(&link).is_empty());
        assert_eq!(land_count(&link), 0);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let centered = TargetFix {
            offset_x: 0.0,
            offset_y: 0.0,
            radius: 60.0,
        };
        let (mut landing, link, _released, video, detector) =
            fixture(Some(centered));
        let (_, _, _, video2, detector2) = fixture(Some(centered));

        landing.start(video, detector);
        landing.start(video2, detector2); // ignored

        wait_until(|| !landing.is_running()).await;
        landing.join().await;
        assert_eq!(land_count(&link), 1);
    }
}
