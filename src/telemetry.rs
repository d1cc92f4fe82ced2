/// Telemetry events sent from dataset workers to the dispatcher for progress tracking
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// Worker started processing a dataset
    DatasetStarted,
    /// One chunk was appended to the destination table
    ChunkLoaded { rows: u64, duration_ms: u64 },
    /// Worker finished a dataset, whatever the outcome
    DatasetFinished,
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub datasets_started: usize,
    pub datasets_finished: usize,
    pub chunks_loaded: usize,
    pub rows_loaded: u64,
    pub chunk_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::DatasetStarted => {
                self.datasets_started += 1;
            }
            TelemetryEvent::ChunkLoaded { rows, duration_ms } => {
                self.chunks_loaded += 1;
                self.rows_loaded += rows;
                self.chunk_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::DatasetFinished => {
                self.datasets_finished += 1;
            }
        }
    }

    /// Datasets started but not yet finished
    pub fn datasets_running(&self) -> usize {
        self.datasets_started.saturating_sub(self.datasets_finished)
    }

    /// Shown next to the dataset progress bar
    pub fn activity_message(&self) -> String {
        format!(
            "{} running, {} chunks loaded",
            self.datasets_running(),
            self.chunks_loaded
        )
    }

    /// Calculate percentile from chunk durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.chunk_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.chunk_durations_ms.clone();
        sorted.sort_unstable();

        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = rank.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_counts_events() {
        let mut stats = ProgressStats::new();
        stats.update(&TelemetryEvent::DatasetStarted);
        stats.update(&TelemetryEvent::ChunkLoaded {
            rows: 10_000,
            duration_ms: 40,
        });
        stats.update(&TelemetryEvent::ChunkLoaded {
            rows: 5_000,
            duration_ms: 20,
        });
        stats.update(&TelemetryEvent::DatasetFinished);

        assert_eq!(stats.datasets_started, 1);
        assert_eq!(stats.datasets_finished, 1);
        assert_eq!(stats.chunks_loaded, 2);
        assert_eq!(stats.rows_loaded, 15_000);
    }

    #[test]
    fn test_activity_message_tracks_running_datasets() {
        let mut stats = ProgressStats::new();
        assert_eq!(stats.activity_message(), "0 running, 0 chunks loaded");

        stats.update(&TelemetryEvent::DatasetStarted);
        stats.update(&TelemetryEvent::DatasetStarted);
        stats.update(&TelemetryEvent::ChunkLoaded {
            rows: 10,
            duration_ms: 5,
        });
        assert_eq!(stats.datasets_running(), 2);
        assert_eq!(stats.activity_message(), "2 running, 1 chunks loaded");

        stats.update(&TelemetryEvent::DatasetFinished);
        stats.update(&TelemetryEvent::DatasetFinished);
        assert_eq!(stats.activity_message(), "0 running, 1 chunks loaded");
    }

    #[test]
    fn test_percentiles() {
        let mut stats = ProgressStats::new();
        assert_eq!(stats.get_percentiles(), (None, None, None));

        for ms in 1..=100 {
            stats.update(&TelemetryEvent::ChunkLoaded {
                rows: 1,
                duration_ms: ms,
            });
        }
        assert_eq!(stats.get_percentiles(), (Some(50), Some(90), Some(99)));
        assert_eq!(stats.percentile(0.0), Some(1));
        assert_eq!(stats.percentile(100.0), Some(100));
    }
}
