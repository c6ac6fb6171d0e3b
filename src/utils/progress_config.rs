// src/utils/progress_config.rs

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::env;

/// Configuration for progress bars over cluster merges
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Whether to show progress bars at all
    pub enabled: bool,
    /// Whether to show the per-cluster bar during apply runs
    pub detailed: bool,
    /// Redraws per second
    pub refresh_rate_hz: u8,
    /// Whether to show memory usage in progress messages
    pub show_memory: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detailed: true,
            refresh_rate_hz: 10,
            show_memory: false,
        }
    }
}

impl ProgressConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env::var("PROGRESS_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            detailed: env::var("PROGRESS_DETAILED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            refresh_rate_hz: env::var("PROGRESS_REFRESH_RATE_HZ")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            show_memory: env::var("PROGRESS_SHOW_MEMORY")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
        }
    }

    /// Disabled configuration for tests and JSON output, where bars would corrupt stdout.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            detailed: false,
            ..Self::default()
        }
    }

    pub fn create_multi_progress(&self) -> Option<MultiProgress> {
        if self.enabled {
            Some(MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(
                self.refresh_rate_hz,
            )))
        } else {
            None
        }
    }

    pub fn should_show_detailed(&self) -> bool {
        self.enabled && self.detailed
    }

    pub fn should_show_memory(&self) -> bool {
        self.enabled && self.show_memory
    }

    /// Bar over the clusters of one pass, or `None` when detailed progress is off.
    pub fn cluster_bar(&self, multi: Option<&MultiProgress>, len: u64, label: &str) -> Option<ProgressBar> {
        if !self.should_show_detailed() {
            return None;
        }
        let pb = match multi {
            Some(mp) => mp.add(ProgressBar::new(len)),
            None => ProgressBar::new(len),
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  🧹 [{elapsed_precise}] {bar:30.green/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        pb.set_message(format!("Merging {} clusters...", label));
        Some(pb)
    }
}
