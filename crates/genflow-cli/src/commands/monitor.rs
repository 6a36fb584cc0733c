//! `genflow monitor`: follow a job's progress stream.

use futures_util::StreamExt;
use genflow_core::{CancellationToken, HttpClient, JobProgress};
use indicatif::{ProgressBar, ProgressStyle};

/// Percent bar used by `monitor` and `submit --wait`.
pub fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar
}

pub fn update_bar(bar: &ProgressBar, progress: &JobProgress) {
    bar.set_position((progress.progress * 100.0).round() as u64);
    let message = match &progress.message {
        Some(msg) if !msg.is_empty() => format!("{}: {}", progress.status, msg),
        _ => progress.status.clone(),
    };
    bar.set_message(message);
}

/// Stream progress for `job_id` until a terminal frame or close.
pub async fn run(client: &HttpClient, job_id: &str, cancel: &CancellationToken) -> Result<(), String> {
    let mut stream = client
        .monitor_job(job_id, cancel)
        .await
        .map_err(|e| e.to_string())?;

    let bar = progress_bar();
    let mut last: Option<JobProgress> = None;
    while let Some(frame) = stream.next().await {
        update_bar(&bar, &frame);
        last = Some(frame);
    }
    bar.finish_and_clear();

    match last {
        Some(JobProgress { err: Some(err), .. }) => Err(err.to_string()),
        Some(frame) => {
            println!(
                "📡 Job {}: {} ({:.0}%)",
                frame.job_id,
                frame.status,
                frame.progress * 100.0
            );
            if frame.status == "completed" || !frame.is_terminal() {
                Ok(())
            } else {
                Err(format!("Job {} finished with status {}", frame.job_id, frame.status))
            }
        }
        None => {
            println!("📡 Stream for job {} closed without updates", job_id);
            Ok(())
        }
    }
}
