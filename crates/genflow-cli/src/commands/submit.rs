//! `genflow submit` / `genflow batch`: send workflows to the server.

use std::path::Path;
use std::sync::Arc;

use genflow_core::{CancellationToken, HttpClient, JobRunner, QueueManager, TemplateStore, Workflow};

use super::{monitor, parse_string_params};

/// Options for a single submission.
pub struct SubmitOptions<'a> {
    pub workflow_file: &'a str,
    pub sets: &'a [String],
    pub wait: bool,
    pub out_dir: Option<&'a str>,
    pub concurrency: usize,
}

/// Instantiate a workflow file with `--set` values and submit it.
pub async fn run(client: HttpClient, opts: SubmitOptions<'_>, cancel: &CancellationToken) -> Result<(), String> {
    let params = parse_string_params(opts.sets)?;
    let store = TemplateStore::new();
    let workflow = store
        .instantiate(opts.workflow_file, &params, cancel)
        .await
        .map_err(|e| e.to_string())?;
    println!(
        "📄 Loaded workflow: {} ({} node(s)) from {}",
        workflow.id,
        workflow.nodes.len(),
        opts.workflow_file
    );

    let queue = QueueManager::new(Arc::new(client), opts.concurrency);
    if !opts.wait {
        let job = queue.submit(&workflow, cancel).await.map_err(|e| e.to_string())?;
        println!("✅ Submitted job {} (status: {})", job.id, job.status);
        return Ok(());
    }

    let runner = JobRunner::new(queue);
    let bar = monitor::progress_bar();
    let outcome = runner
        .run(&workflow, opts.out_dir.map(Path::new), cancel, |p| {
            monitor::update_bar(&bar, p)
        })
        .await;
    bar.finish_and_clear();
    let outcome = outcome.map_err(|e| e.to_string())?;

    println!(
        "🎉 Job {} {} with {} artifact(s)",
        outcome.job.id,
        outcome.status,
        outcome.result.artifacts.len()
    );
    for path in &outcome.saved {
        println!("   {}", path.display());
    }
    Ok(())
}

/// Submit several workflow files concurrently; jobs print in input order.
pub async fn batch(
    client: HttpClient,
    files: &[String],
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<(), String> {
    if files.is_empty() {
        return Err("No workflow files given".to_string());
    }
    let store = TemplateStore::new();
    let mut workflows: Vec<Workflow> = Vec::with_capacity(files.len());
    for file in files {
        let workflow = store
            .instantiate(file, &Default::default(), cancel)
            .await
            .map_err(|e| e.to_string())?;
        workflows.push(workflow);
    }

    let queue = QueueManager::new(Arc::new(client), concurrency);
    let jobs = queue
        .submit_batch(&workflows, cancel)
        .await
        .map_err(|e| e.to_string())?;

    for (file, job) in files.iter().zip(&jobs) {
        println!("✅ {} → job {} ({})", file, job.id, job.status);
    }
    let metrics = queue.metrics();
    println!(
        "   {} submitted, {} failed, average latency {:?}",
        metrics.successes,
        metrics.failures,
        metrics.average_latency()
    );
    Ok(())
}
