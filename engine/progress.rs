use crate::batch::SliceKey;
use indicatif::{ProgressBar, ProgressStyle};

/// Observer for reporting incremental progress while a batch runs.
///
/// Callbacks arrive from worker threads in completion order.
pub trait BatchProgressObserver: Sync {
    fn on_start(&self, total_slices: usize) {
        let _ = total_slices;
    }
    fn on_slice_done(&self, key: &SliceKey, succeeded: bool) {
        let _ = (key, succeeded);
    }
    fn on_finish(&self) {}
}

#[derive(Default)]
pub struct NoopBatchProgress;

impl BatchProgressObserver for NoopBatchProgress {}

/// Terminal progress bar over slices.
pub struct ConsoleBatchProgress {
    bar: ProgressBar,
}

impl ConsoleBatchProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        if let Ok(style) =
            ProgressStyle::with_template(">  Slices [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
        }
        Self { bar }
    }
}

impl Default for ConsoleBatchProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchProgressObserver for ConsoleBatchProgress {
    fn on_start(&self, total_slices: usize) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(total_slices as u64);
        self.bar.set_position(0);
    }

    fn on_slice_done(&self, key: &SliceKey, succeeded: bool) {
        if !succeeded {
            self.bar.set_message(format!("failed: {key}"));
        }
        self.bar.inc(1);
    }

    fn on_finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl BatchProgressObserver for Recording {
        fn on_start(&self, total_slices: usize) {
            self.events.lock().unwrap().push(format!("start {total_slices}"));
        }
        fn on_slice_done(&self, key: &SliceKey, succeeded: bool) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{} {succeeded}", key.type_label));
        }
    }

    #[test]
    fn default_callbacks_are_optional() {
        let observer = Recording::default();
        let key = SliceKey::new(0, "a");
        observer.on_start(1);
        observer.on_slice_done(&key, true);
        observer.on_finish();
        NoopBatchProgress.on_slice_done(&key, false);
        assert_eq!(
            *observer.events.lock().unwrap(),
            vec!["start 1".to_string(), "a true".to_string()]
        );
    }
}
