use indicatif::{ProgressBar, ProgressStyle};
use ragbench_core::report::{ProgressEvent, ProgressSink};
use std::sync::Arc;

/// Progress bar fed by the library's per-cohort events. Hidden when stderr is
/// not a terminal.
pub fn bar(label: &'static str) -> (ProgressBar, ProgressSink) {
    let bar = ProgressBar::no_length();
    if let Ok(style) = ProgressStyle::with_template(
        "{prefix} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} cohorts: {msg}",
    ) {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar.set_prefix(label);

    let handle = bar.clone();
    let sink: ProgressSink = Arc::new(move |e: ProgressEvent| {
        handle.set_length(e.total as u64);
        handle.set_position(e.done as u64);
        handle.set_message(e.cohorts.to_string());
    });
    (bar, sink)
}
