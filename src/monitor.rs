//! Per-frame pipeline: pose estimation → window → model input → classification.
//!
//! Results are published as [`MonitorEvent`]s on an mpsc channel. The monitor
//! only holds the sending half; whoever owns the receiver decides how long it
//! lives, and a dropped receiver is not an error.

use anyhow::{Context, Result};
use std::sync::mpsc::{self, Sender, SyncSender, TrySendError};
use std::thread;

use crate::action::{
    classify, ActionClassifier, ClassificationResult, ModelInputAssembler, PoseWindow, WINDOW_CAPACITY,
};
use crate::config::{AlertConfig, Config};
use crate::pose::{KeypointIndex, PoseEstimator};

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// Keypoints recognized in this frame, for overlay drawing.
    Points {
        frame: u64,
        points: Vec<(KeypointIndex, [f32; 2])>,
    },
    /// At most one per frame, only when classification succeeded.
    Classification {
        frame: u64,
        result: ClassificationResult,
    },
    /// The fall label crossed the alert threshold.
    FallAlert { frame: u64, confidence: f32 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStats {
    pub frames: u64,
    pub no_pose: u64,
    pub estimation_errors: u64,
    /// Observations dropped or zero-filled while building a model input.
    pub conversion_failures: u64,
    pub assembly_errors: u64,
    pub classified: u64,
    /// Frames buffered while no classifier model is loaded.
    pub no_classifier: u64,
    /// Classifier rejected the input or failed to run.
    pub classifier_failures: u64,
    pub alerts: u64,
}

pub struct FallMonitor<E, C> {
    estimator: E,
    classifier: Option<C>,
    window: PoseWindow,
    assembler: ModelInputAssembler,
    alert: AlertConfig,
    point_confidence: f32,
    events: Sender<MonitorEvent>,
    frame_index: u64,
    last_alert: Option<u64>,
    stats: MonitorStats,
}

impl<E: PoseEstimator, C: ActionClassifier> FallMonitor<E, C> {
    /// `classifier` is `None` when the model could not be loaded; frames are
    /// still estimated and buffered but never classified.
    pub fn new(estimator: E, classifier: Option<C>, config: &Config, events: Sender<MonitorEvent>) -> Self {
        let frames = classifier
            .as_ref()
            .map(|c| c.input_shape()[0])
            .unwrap_or(WINDOW_CAPACITY);

        Self {
            estimator,
            classifier,
            window: PoseWindow::new(config.window.capacity),
            assembler: ModelInputAssembler::new(frames, config.window.fill_policy),
            alert: config.alert.clone(),
            point_confidence: config.pose.point_confidence,
            events,
            frame_index: 0,
            last_alert: None,
            stats: MonitorStats::default(),
        }
    }

    pub fn window(&self) -> &PoseWindow {
        &self.window
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    /// Forget buffered poses, e.g. when the input stream restarts.
    pub fn reset(&mut self) {
        self.window.clear();
        self.last_alert = None;
    }

    /// Run one frame through the pipeline. Every failure is absorbed and
    /// yields `None`; the next frame proceeds normally.
    pub fn process_frame(&mut self, frame: &E::Frame) -> Option<ClassificationResult> {
        let index = self.frame_index;
        self.frame_index += 1;
        self.stats.frames += 1;

        let observation = match self.estimator.estimate(frame) {
            Ok(Some(observation)) => observation,
            Ok(None) => {
                self.stats.no_pose += 1;
                return None;
            }
            Err(e) => {
                self.stats.estimation_errors += 1;
                log::debug!("frame {}: pose estimation failed: {:#}", index, e);
                return None;
            }
        };

        self.publish(MonitorEvent::Points {
            frame: index,
            points: observation.recognized_points(self.point_confidence),
        });
        self.window.push(observation);

        let Some(classifier) = self.classifier.as_mut() else {
            self.stats.no_classifier += 1;
            return None;
        };

        let input = match self.assembler.build_with_failures(&self.window) {
            Ok((input, failed)) => {
                self.stats.conversion_failures += failed as u64;
                input
            }
            Err(e) => {
                self.stats.assembly_errors += 1;
                log::warn!("frame {}: {}", index, e);
                return None;
            }
        };

        let Some(result) = classify(classifier, &input) else {
            self.stats.classifier_failures += 1;
            return None;
        };
        self.stats.classified += 1;

        self.publish(MonitorEvent::Classification {
            frame: index,
            result: result.clone(),
        });
        self.check_alert(index, &result);

        Some(result)
    }

    fn check_alert(&mut self, index: u64, result: &ClassificationResult) {
        if result.label != self.alert.fall_label || result.confidence < self.alert.threshold {
            return;
        }
        if let Some(last) = self.last_alert {
            if index - last < self.alert.cooldown_frames {
                return;
            }
        }

        self.last_alert = Some(index);
        self.stats.alerts += 1;
        log::info!("frame {}: fall detected ({:.1}%)", index, result.confidence * 100.0);
        self.publish(MonitorEvent::FallAlert {
            frame: index,
            confidence: result.confidence,
        });
    }

    fn publish(&self, event: MonitorEvent) {
        // 受信側が閉じていても処理は続ける
        let _ = self.events.send(event);
    }
}

impl<E, C> FallMonitor<E, C>
where
    E: PoseEstimator + Send + 'static,
    E::Frame: Send + 'static,
    C: ActionClassifier + Send + 'static,
{
    /// Move the monitor onto its own worker thread fed by a bounded frame queue.
    ///
    /// The window lives on the worker only, so frames are processed strictly
    /// one after another.
    pub fn spawn(self, queue_depth: usize) -> Result<MonitorHandle<E::Frame>> {
        let (frame_tx, frame_rx) = mpsc::sync_channel::<E::Frame>(queue_depth);

        let worker = thread::Builder::new()
            .name("fall-monitor".to_string())
            .spawn(move || {
                let mut monitor = self;
                log::debug!("monitor thread started");
                while let Ok(frame) = frame_rx.recv() {
                    monitor.process_frame(&frame);
                }
                let stats = monitor.stats();
                log::debug!("monitor thread finished: {:?}", stats);
                stats
            })
            .context("Failed to spawn monitor thread")?;

        Ok(MonitorHandle {
            frames: Some(frame_tx),
            worker: Some(worker),
            dropped: 0,
        })
    }
}

/// Producer side of a monitor running on a worker thread.
pub struct MonitorHandle<F> {
    frames: Option<SyncSender<F>>,
    worker: Option<thread::JoinHandle<MonitorStats>>,
    dropped: u64,
}

impl<F> MonitorHandle<F> {
    /// Queue a frame without blocking. Returns `false` if the frame was
    /// dropped because the worker is behind or gone.
    pub fn submit(&mut self, frame: F) -> bool {
        let Some(tx) = self.frames.as_ref() else {
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Queue a frame, waiting for room. For replaying recorded input where
    /// every frame matters.
    pub fn send(&self, frame: F) -> Result<()> {
        let tx = self.frames.as_ref().context("monitor already shut down")?;
        tx.send(frame).map_err(|_| anyhow::anyhow!("monitor thread stopped"))
    }

    /// Frames rejected by [`submit`](Self::submit) because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Close the queue, let the worker drain it and return its counters.
    pub fn shutdown(mut self) -> Result<MonitorStats> {
        self.frames.take();
        let worker = self.worker.take().context("monitor already shut down")?;
        worker
            .join()
            .map_err(|_| anyhow::anyhow!("monitor thread panicked"))
    }
}

impl<F> Drop for MonitorHandle<F> {
    fn drop(&mut self) {
        self.frames.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ModelInput, Prediction};
    use crate::pose::synthetic::{lying_pose, standing_pose};
    use crate::pose::{Keypoint, PoseObservation, PrecomputedPoses};
    use std::collections::HashMap;
    use std::sync::mpsc::Receiver;

    enum TestFrame {
        Pose(PoseObservation),
        Nobody,
        Broken,
    }

    struct ScriptedEstimator;

    impl PoseEstimator for ScriptedEstimator {
        type Frame = TestFrame;

        fn estimate(&mut self, frame: &TestFrame) -> anyhow::Result<Option<PoseObservation>> {
            match frame {
                TestFrame::Pose(p) => Ok(Some(p.clone())),
                TestFrame::Nobody => Ok(None),
                TestFrame::Broken => anyhow::bail!("decoder error"),
            }
        }
    }

    /// Labels "falling" when the newest real frame is wider than it is tall.
    struct PostureClassifier;

    impl ActionClassifier for PostureClassifier {
        fn predict(&mut self, input: &ModelInput) -> anyhow::Result<Prediction> {
            let frames = input.shape()[0];
            let last = (0..frames)
                .rev()
                .find(|&f| input.index_axis(ndarray::Axis(0), f).iter().any(|&v| v != 0.0))
                .context("no real frames")?;

            let xs = input.slice(ndarray::s![last, 0, ..]);
            let ys = input.slice(ndarray::s![last, 1, ..]);
            let spread = |v: ndarray::ArrayView1<f32>| {
                v.fold(f32::MIN, |a, &b| a.max(b)) - v.fold(f32::MAX, |a, &b| a.min(b))
            };
            let (label, other) = if spread(xs) > spread(ys) {
                ("falling", "standing")
            } else {
                ("standing", "falling")
            };

            let mut probabilities = HashMap::new();
            probabilities.insert(label.to_string(), 0.9);
            probabilities.insert(other.to_string(), 0.1);
            Ok(Prediction {
                label: label.to_string(),
                probabilities,
            })
        }
    }

    fn monitor_with<E: PoseEstimator>(
        estimator: E,
        classifier: Option<PostureClassifier>,
        config: &Config,
    ) -> (FallMonitor<E, PostureClassifier>, Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel();
        (FallMonitor::new(estimator, classifier, config, tx), rx)
    }

    fn classifier() -> Option<PostureClassifier> {
        Some(PostureClassifier)
    }

    fn nan_pose() -> PoseObservation {
        PoseObservation::new([Keypoint::new(f32::NAN, 0.5, 0.9); KeypointIndex::COUNT])
    }

    #[test]
    fn test_standing_frame_emits_points_then_classification() {
        let (mut monitor, rx) = monitor_with(ScriptedEstimator, classifier(), &Config::default());

        let result = monitor.process_frame(&TestFrame::Pose(standing_pose(0.0))).unwrap();
        assert_eq!(result.label, "standing");

        let events: Vec<MonitorEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        match &events[0] {
            MonitorEvent::Points { frame, points } => {
                assert_eq!(*frame, 0);
                assert_eq!(points.len(), KeypointIndex::COUNT);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            events[1],
            MonitorEvent::Classification {
                frame: 0,
                result: ClassificationResult {
                    label: "standing".to_string(),
                    confidence: 0.9
                }
            }
        );
    }

    #[test]
    fn test_no_pose_skips_frame() {
        let (mut monitor, rx) = monitor_with(ScriptedEstimator, classifier(), &Config::default());

        assert!(monitor.process_frame(&TestFrame::Nobody).is_none());
        assert!(monitor.process_frame(&TestFrame::Broken).is_none());

        assert!(rx.try_recv().is_err());
        assert!(monitor.window().is_empty());
        let stats = monitor.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.no_pose, 1);
        assert_eq!(stats.estimation_errors, 1);
    }

    #[test]
    fn test_failures_do_not_stop_later_frames() {
        let (mut monitor, _rx) = monitor_with(ScriptedEstimator, classifier(), &Config::default());

        monitor.process_frame(&TestFrame::Broken);
        let result = monitor.process_frame(&TestFrame::Pose(standing_pose(0.0)));
        assert!(result.is_some());
        assert_eq!(monitor.window().len(), 1);
    }

    #[test]
    fn test_missing_classifier_still_buffers() {
        let (mut monitor, rx) = monitor_with(ScriptedEstimator, None, &Config::default());

        assert!(monitor.process_frame(&TestFrame::Pose(standing_pose(0.0))).is_none());
        assert_eq!(monitor.window().len(), 1);
        assert_eq!(monitor.stats().no_classifier, 1);
        assert_eq!(monitor.stats().classifier_failures, 0);

        let events: Vec<MonitorEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MonitorEvent::Points { .. }));
    }

    #[test]
    fn test_unconvertible_only_frame_yields_no_result() {
        // a lone NaN pose is dropped from the input, leaving an all-zero tensor
        let (mut monitor, _rx) = monitor_with(ScriptedEstimator, classifier(), &Config::default());

        assert!(monitor.process_frame(&TestFrame::Pose(nan_pose())).is_none());
        assert_eq!(monitor.window().len(), 1);
        let stats = monitor.stats();
        assert_eq!(stats.conversion_failures, 1);
        assert_eq!(stats.classifier_failures, 1);
        assert_eq!(stats.no_classifier, 0);
    }

    #[test]
    fn test_conversion_failures_counted_while_in_window() {
        let (mut monitor, _rx) = monitor_with(ScriptedEstimator, classifier(), &Config::default());

        monitor.process_frame(&TestFrame::Pose(standing_pose(0.0)));
        monitor.process_frame(&TestFrame::Pose(nan_pose()));
        assert!(monitor.process_frame(&TestFrame::Pose(standing_pose(0.0))).is_some());

        let stats = monitor.stats();
        // the NaN pose is in the window for two assemblies
        assert_eq!(stats.conversion_failures, 2);
        assert_eq!(stats.classified, 3);
        assert_eq!(stats.classifier_failures, 0);
    }

    #[test]
    fn test_oversized_window_still_sees_newest_pose() {
        // bypasses validate() on purpose
        let mut config = Config::default();
        config.window.capacity = 120;
        let (mut monitor, rx) = monitor_with(PrecomputedPoses, classifier(), &config);

        for i in 0..119 {
            monitor.process_frame(&Some(standing_pose(i as f32 * 0.001)));
        }
        let result = monitor.process_frame(&Some(lying_pose())).unwrap();

        assert_eq!(monitor.window().len(), 120);
        assert_eq!(result.label, "falling");
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, MonitorEvent::FallAlert { frame: 119, .. })));
    }

    #[test]
    fn test_fall_alert_with_cooldown() {
        let mut config = Config::default();
        config.alert.cooldown_frames = 3;
        let (mut monitor, rx) = monitor_with(PrecomputedPoses, classifier(), &config);

        for _ in 0..5 {
            monitor.process_frame(&Some(lying_pose()));
        }

        let alerts: Vec<u64> = rx
            .try_iter()
            .filter_map(|e| match e {
                MonitorEvent::FallAlert { frame, .. } => Some(frame),
                _ => None,
            })
            .collect();
        assert_eq!(alerts, vec![0, 3]);
        assert_eq!(monitor.stats().alerts, 2);
    }

    #[test]
    fn test_alert_respects_threshold() {
        let mut config = Config::default();
        config.alert.threshold = 0.95;
        let (mut monitor, rx) = monitor_with(PrecomputedPoses, classifier(), &config);

        let result = monitor.process_frame(&Some(lying_pose())).unwrap();
        assert_eq!(result.label, "falling");
        assert!(!rx.try_iter().any(|e| matches!(e, MonitorEvent::FallAlert { .. })));
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (mut monitor, rx) = monitor_with(PrecomputedPoses, classifier(), &Config::default());
        drop(rx);
        assert!(monitor.process_frame(&Some(standing_pose(0.0))).is_some());
    }

    #[test]
    fn test_reset_clears_window() {
        let (mut monitor, _rx) = monitor_with(PrecomputedPoses, classifier(), &Config::default());
        monitor.process_frame(&Some(standing_pose(0.0)));
        monitor.reset();
        assert!(monitor.window().is_empty());
    }

    #[test]
    fn test_worker_processes_frames_in_order() {
        let (monitor, rx) = monitor_with(PrecomputedPoses, classifier(), &Config::default());
        let handle = monitor.spawn(4).unwrap();

        for i in 0..10 {
            handle.send(Some(standing_pose(i as f32 * 0.001))).unwrap();
        }
        handle.send(Some(lying_pose())).unwrap();
        let stats = handle.shutdown().unwrap();

        assert_eq!(stats.frames, 11);
        assert_eq!(stats.classified, 11);

        let classified: Vec<(u64, String)> = rx
            .try_iter()
            .filter_map(|e| match e {
                MonitorEvent::Classification { frame, result } => Some((frame, result.label)),
                _ => None,
            })
            .collect();
        assert_eq!(classified.len(), 11);
        assert!(classified.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(classified.last().map(|c| c.1.as_str()), Some("falling"));
    }

    #[test]
    fn test_submit_then_shutdown() {
        let (monitor, _rx) = monitor_with(PrecomputedPoses, classifier(), &Config::default());
        let mut handle = monitor.spawn(1).unwrap();
        assert!(handle.submit(None) || handle.dropped() == 1);
        let stats = handle.shutdown().unwrap();
        assert!(stats.frames <= 1);
    }
}
