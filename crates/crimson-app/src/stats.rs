//! Frame timing statistics reported at shutdown.

use tracing::info;

/// Min/max/average FPS over the lifetime of the application.
#[derive(Debug, Clone, Copy)]
pub struct FrameStats {
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    frames: u64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            frames: 0,
        }
    }
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one frame that took `dt` seconds. Zero-length frames are skipped.
    pub fn record(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let fps = 1.0 / f64::from(dt);
        self.min_fps = self.min_fps.min(fps);
        self.max_fps = self.max_fps.max(fps);
        self.fps_sum += fps;
        self.frames += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn min(&self) -> Option<f64> {
        (self.frames > 0).then_some(self.min_fps)
    }

    pub fn max(&self) -> Option<f64> {
        (self.frames > 0).then_some(self.max_fps)
    }

    pub fn average(&self) -> Option<f64> {
        (self.frames > 0).then(|| self.fps_sum / self.frames as f64)
    }

    pub fn log(&self) {
        let (Some(min), Some(max), Some(avg)) = (self.min(), self.max(), self.average()) else {
            return;
        };
        info!("FPS Statistics:");
        info!("  Min: {min:.1}");
        info!("  Max: {max:.1}");
        info!("  Avg: {avg:.1}");
        info!("  Total frames: {}", self.frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_stats_report_nothing() {
        let stats = FrameStats::new();
        assert_eq!(stats.frames(), 0);
        assert!(stats.min().is_none());
        assert!(stats.average().is_none());
    }

    #[test]
    fn tracks_min_max_and_average() {
        let mut stats = FrameStats::new();
        stats.record(0.5);
        stats.record(0.25);
        stats.record(0.0);

        assert_eq!(stats.frames(), 2);
        assert_relative_eq!(stats.min().unwrap(), 2.0);
        assert_relative_eq!(stats.max().unwrap(), 4.0);
        assert_relative_eq!(stats.average().unwrap(), 3.0);
    }
}
