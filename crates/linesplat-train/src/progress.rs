use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{spinner:.green} [{elapsed}] [{bar:30}] {pos}/{len} loss={msg}";

/// Progress bar shared by both fitters
pub(crate) fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar().template(TEMPLATE) {
        pb.set_style(style);
    }
    pb
}
