// Temporal coherence for splat sorting
// A new sort is only requested when the object-space camera pose changed.
// A static camera keeps the last uploaded order and costs nothing.

use glam::Vec3;
use tracing::info;

/// Camera position and forward direction in the splat mesh's local space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub direction: Vec3,
}

impl CameraPose {
    pub fn new(position: Vec3, direction: Vec3) -> Self {
        Self {
            position,
            direction,
        }
    }

    /// Sum of absolute component differences of position and direction
    pub fn distance_l1(&self, other: &CameraPose) -> f32 {
        let dp = (self.position - other.position).abs();
        let dd = (self.direction - other.direction).abs();
        dp.element_sum() + dd.element_sum()
    }

    pub fn approx_eq(&self, other: &CameraPose, epsilon: f32) -> bool {
        self.distance_l1(other) <= epsilon
    }

    /// Camera-relative depth of `point` along the view direction
    #[inline]
    pub fn depth(&self, point: Vec3) -> f32 {
        (point - self.position).dot(self.direction)
    }
}

/// Configuration for camera change detection
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TemporalCoherenceConfig {
    /// Maximum summed component difference still treated as "no movement"
    /// Default: 1e-6
    pub epsilon: f32,
}

impl Default for TemporalCoherenceConfig {
    fn default() -> Self {
        Self { epsilon: 1e-6 }
    }
}

impl TemporalCoherenceConfig {
    /// Re-sort on any bit-level change of the pose
    pub fn strict() -> Self {
        Self { epsilon: 0.0 }
    }

    /// Ignore sub-millimetre jitter (tracked/VR cameras)
    pub fn relaxed() -> Self {
        Self { epsilon: 1e-3 }
    }
}

/// Remembers the last pose a sort was requested for
#[derive(Debug, Default, Clone)]
pub struct PoseTracker {
    last: Option<CameraPose>,
}

impl PoseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and records `pose` when it differs from the last seen one
    pub fn observe(&mut self, pose: CameraPose, config: &TemporalCoherenceConfig) -> bool {
        match self.last {
            Some(last) if last.approx_eq(&pose, config.epsilon) => false,
            _ => {
                self.last = Some(pose);
                true
            }
        }
    }

    pub fn last(&self) -> Option<CameraPose> {
        self.last
    }

    /// Forget the last pose so the next observation always triggers a sort
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Statistics for temporal coherence
#[derive(Default, Debug, Clone, PartialEq)]
pub struct TemporalCoherenceStats {
    /// Total frames observed
    pub total_frames: u64,
    /// Frames where sorting was skipped
    pub skipped_frames: u64,
    /// Current skip streak
    pub current_skip_streak: u32,
    /// Longest skip streak
    pub max_skip_streak: u32,
    /// Skip ratio (0.0 - 1.0)
    pub skip_ratio: f32,
}

impl TemporalCoherenceStats {
    pub fn update(&mut self, sorting_skipped: bool) {
        self.total_frames += 1;
        if sorting_skipped {
            self.skipped_frames += 1;
            self.current_skip_streak += 1;
            self.max_skip_streak = self.max_skip_streak.max(self.current_skip_streak);
        } else {
            self.current_skip_streak = 0;
        }
        self.skip_ratio = self.skipped_frames as f32 / self.total_frames as f32;
    }

    pub fn log_summary(&self) {
        info!(
            skip_ratio = %format!("{:.1}%", self.skip_ratio * 100.0),
            skipped = self.skipped_frames,
            total = self.total_frames,
            current_streak = self.current_skip_streak,
            max_streak = self.max_skip_streak,
            "Splat sort temporal coherence"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_always_triggers() {
        let mut tracker = PoseTracker::new();
        let pose = CameraPose::new(Vec3::ZERO, Vec3::NEG_Z);
        assert!(tracker.observe(pose, &TemporalCoherenceConfig::default()));
        assert!(!tracker.observe(pose, &TemporalCoherenceConfig::default()));
    }

    #[test]
    fn jitter_below_epsilon_is_ignored() {
        let config = TemporalCoherenceConfig::relaxed();
        let mut tracker = PoseTracker::new();
        let pose = CameraPose::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Z);
        tracker.observe(pose, &config);

        let jitter = CameraPose::new(pose.position + Vec3::splat(1e-4), Vec3::Z);
        assert!(!tracker.observe(jitter, &config));
        // the stored pose is still the original one
        assert_eq!(tracker.last(), Some(pose));

        let moved = CameraPose::new(pose.position + Vec3::X * 0.01, Vec3::Z);
        assert!(tracker.observe(moved, &config));
    }

    #[test]
    fn rotation_alone_triggers() {
        let config = TemporalCoherenceConfig::default();
        let mut tracker = PoseTracker::new();
        tracker.observe(CameraPose::new(Vec3::ZERO, Vec3::Z), &config);
        assert!(tracker.observe(CameraPose::new(Vec3::ZERO, Vec3::X), &config));
    }

    #[test]
    fn reset_forces_next_trigger() {
        let config = TemporalCoherenceConfig::default();
        let mut tracker = PoseTracker::new();
        let pose = CameraPose::new(Vec3::ONE, Vec3::Y);
        tracker.observe(pose, &config);
        tracker.reset();
        assert!(tracker.observe(pose, &config));
    }

    #[test]
    fn depth_along_direction() {
        let pose = CameraPose::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
        assert_eq!(pose.depth(Vec3::ZERO), 10.0);
        assert_eq!(pose.depth(Vec3::new(5.0, 5.0, 3.0)), 7.0);
    }

    #[test]
    fn stats_track_streaks() {
        let mut stats = TemporalCoherenceStats::default();
        for skipped in [false, true, true, true, false, true] {
            stats.update(skipped);
        }
        assert_eq!(stats.total_frames, 6);
        assert_eq!(stats.skipped_frames, 4);
        assert_eq!(stats.max_skip_streak, 3);
        assert_eq!(stats.current_skip_streak, 1);
        assert!((stats.skip_ratio - 4.0 / 6.0).abs() < 1e-6);
    }
}
