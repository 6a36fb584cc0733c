//! `genflow result`: fetch a finished job and save its artifacts.

use genflow_core::{save_artifacts, CancellationToken, HttpClient};
use serde_json::json;

use super::print_json;

/// Fetch `job_id`; with `out_dir` save the artifacts, otherwise print a summary.
pub async fn fetch(
    client: &HttpClient,
    job_id: &str,
    out_dir: Option<&str>,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let result = client
        .get_result(job_id, cancel)
        .await
        .map_err(|e| e.to_string())?;

    match out_dir {
        Some(dir) => {
            let saved = save_artifacts(&result, dir).map_err(|e| e.to_string())?;
            println!("💾 Saved {} artifact(s) for job {}", saved.len(), result.job_id);
            for path in saved {
                println!("   {}", path.display());
            }
        }
        None => {
            let artifacts: Vec<_> = result
                .artifacts
                .iter()
                .map(|a| json!({"filename": a.filename, "mime": a.mime, "bytes": a.data.len()}))
                .collect();
            print_json(&json!({
                "job_id": result.job_id,
                "status": result.status,
                "artifacts": artifacts,
            }));
        }
    }
    Ok(())
}
