//! Progress indicators for long-running batch commands

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over a known number of rows
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{msg:>24} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Spinner for steps of unknown length
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_progress_bar() {
        let pb = create_progress_bar(250, "Parts");
        assert_eq!(pb.length(), Some(250));
        assert_eq!(pb.message(), "Parts");
    }

    #[test]
    fn test_create_spinner() {
        let pb = create_spinner("Connecting...");
        assert!(!pb.is_finished());
        pb.finish();
        assert!(pb.is_finished());
    }
}
