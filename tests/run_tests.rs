
use std::path::PathBuf;
use std::time::Duration;

use pbs_herd::config::{ParallelConfig, RunConfig};
use pbs_herd::error::HerdError;
use pbs_herd::run::{run, RunMode};
use tempfile::TempDir;
use test_harness::{ledger_lines, write_job, ScriptedScheduler, TEMPLATE_JOB};
use tokio::time::Instant;

/// Config rooted at `jobs`, writing ledger and scripts into `work`.
fn test_config(jobs: &TempDir, work: &TempDir) -> RunConfig {
    RunConfig {
        ledger_path: work.path().join("success_submitted_list.txt"),
        ..RunConfig::new(vec![jobs.path().to_path_buf()])
    }
}

fn parallel(work: &TempDir) -> ParallelConfig {
    ParallelConfig {
        output_dir: work.path().to_path_buf(),
        ..ParallelConfig::default()
    }
}

fn display(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_single_mode_submits_every_file_in_order() {
    let jobs = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let a = write_job(jobs.path(), "a.pbs", TEMPLATE_JOB);
    let b = write_job(jobs.path(), "b.pbs", TEMPLATE_JOB);
    let c = write_job(jobs.path(), "sub/c.pbs", TEMPLATE_JOB);
    write_job(jobs.path(), "notes.txt", "");

    let config = test_config(&jobs, &work);
    let scheduler = ScriptedScheduler::accepting();
    let summary = run(&config, scheduler.clone()).await.unwrap();

    let expected = vec![a, b, c];
    assert_eq!(summary.mode, RunMode::Single);
    assert_eq!(summary.discovered, expected);
    assert_eq!(summary.submitted, expected);
    assert_eq!(summary.attempts, 3);
    assert!(summary.aggregate_script.is_none());
    assert_eq!(scheduler.calls(), expected);
    assert_eq!(ledger_lines(&config.ledger_path), display(&expected));
}

#[tokio::test(start_paused = true)]
async fn test_single_mode_retry_records_file_once() {
    let jobs = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let a = write_job(jobs.path(), "a.pbs", TEMPLATE_JOB);

    let config = test_config(&jobs, &work);
    let scheduler = ScriptedScheduler::with_outcomes(&[false, true]);

    let start = Instant::now();
    let summary = run(&config, scheduler.clone()).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(summary.attempts, 2);
    assert_eq!(scheduler.calls(), vec![a.clone(), a.clone()]);
    assert!(elapsed >= Duration::from_secs(300));
    assert!(elapsed < Duration::from_secs(600));
    assert_eq!(ledger_lines(&config.ledger_path), display(&[a]));
}

#[tokio::test(start_paused = true)]
async fn test_previous_ledger_is_discarded() {
    let jobs = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let a = write_job(jobs.path(), "a.pbs", TEMPLATE_JOB);

    let config = test_config(&jobs, &work);
    std::fs::write(&config.ledger_path, "stale/one.pbs\nstale/two.pbs\n").unwrap();

    run(&config, ScriptedScheduler::accepting()).await.unwrap();

    assert_eq!(ledger_lines(&config.ledger_path), display(&[a]));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_roots_submit_each_file_once() {
    let jobs = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let a = write_job(jobs.path(), "a.pbs", TEMPLATE_JOB);
    let b = write_job(jobs.path(), "b.pbs", TEMPLATE_JOB);

    let config = RunConfig {
        roots: vec![jobs.path().to_path_buf(), jobs.path().to_path_buf()],
        ..test_config(&jobs, &work)
    };
    let scheduler = ScriptedScheduler::accepting();
    let summary = run(&config, scheduler.clone()).await.unwrap();

    assert_eq!(summary.discovered, vec![a.clone(), b.clone()]);
    assert_eq!(scheduler.calls(), vec![a, b]);
}

#[tokio::test(start_paused = true)]
async fn test_no_job_files_is_fatal_and_ledger_is_reset() {
    let jobs = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    write_job(jobs.path(), "readme.md", "");

    let config = test_config(&jobs, &work);
    std::fs::write(&config.ledger_path, "stale.pbs\n").unwrap();

    let scheduler = ScriptedScheduler::accepting();
    let err = run(&config, scheduler.clone()).await.unwrap_err();

    assert!(matches!(err, HerdError::NoJobFiles(_)));
    assert!(err.to_string().contains(&jobs.path().display().to_string()));
    assert!(scheduler.calls().is_empty());
    assert!(!config.ledger_path.exists());
}

#[tokio::test(start_paused = true)]
async fn test_no_job_files_names_every_root() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    let config = RunConfig {
        roots: vec![first.path().to_path_buf(), second.path().to_path_buf()],
        ..test_config(&first, &work)
    };

    let err = run(&config, ScriptedScheduler::accepting())
        .await
        .unwrap_err();

    let expected = format!("{} {}", first.path().display(), second.path().display());
    match err {
        HerdError::NoJobFiles(roots) => assert_eq!(roots, expected),
        other => panic!("expected no job files error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_traversal_error_is_fatal() {
    let jobs = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    write_job(jobs.path(), "a.pbs", TEMPLATE_JOB);

    let config = RunConfig {
        roots: vec![jobs.path().to_path_buf(), jobs.path().join("missing")],
        ..test_config(&jobs, &work)
    };
    let scheduler = ScriptedScheduler::accepting();
    let err = run(&config, scheduler.clone()).await.unwrap_err();

    assert!(matches!(err, HerdError::Walk { .. }));
    assert!(scheduler.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_parallel_mode_submits_only_the_aggregate() {
    let jobs = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let a = write_job(jobs.path(), "a.pbs", TEMPLATE_JOB);
    let b = write_job(jobs.path(), "b.pbs", TEMPLATE_JOB);

    let config = test_config(&jobs, &work).with_parallel(ParallelConfig {
        nodes: 2,
        ppn: 4,
        ..parallel(&work)
    });
    let scheduler = ScriptedScheduler::accepting();
    let summary = run(&config, scheduler.clone()).await.unwrap();

    let script = work.path().join("pwork1.pbs");
    assert_eq!(summary.mode, RunMode::Parallel);
    assert_eq!(summary.aggregate_script.as_ref(), Some(&script));
    assert!(!summary.held);
    assert_eq!(scheduler.calls(), vec![script.clone()]);
    assert_eq!(ledger_lines(&config.ledger_path), display(&[script.clone()]));

    let contents = std::fs::read_to_string(&script).unwrap();
    assert!(!contents.contains("mem="));
    assert!(contents.ends_with(&format!(
        "echo {} {} | rush -D ' ' 'bash {{}}' -j 8\n",
        a.display(),
        b.display()
    )));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_mode_hold_leaves_script_unsubmitted() {
    let jobs = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    write_job(jobs.path(), "a.pbs", TEMPLATE_JOB);
    std::fs::write(work.path().join("pwork1.pbs"), "earlier run").unwrap();

    let config = test_config(&jobs, &work).with_parallel(ParallelConfig {
        hold: true,
        ..parallel(&work)
    });
    let scheduler = ScriptedScheduler::accepting();
    let summary = run(&config, scheduler.clone()).await.unwrap();

    let script = work.path().join("pwork2.pbs");
    assert!(summary.held);
    assert_eq!(summary.aggregate_script, Some(script.clone()));
    assert!(summary.submitted.is_empty());
    assert!(scheduler.calls().is_empty());
    assert!(ledger_lines(&config.ledger_path).is_empty());
    assert!(std::fs::read_to_string(&script)
        .unwrap()
        .starts_with("#PBS -N gosub_parallel_work\n"));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_mode_retries_aggregate() {
    let jobs = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    write_job(jobs.path(), "a.pbs", TEMPLATE_JOB);

    let config = test_config(&jobs, &work).with_parallel(parallel(&work));
    let scheduler = ScriptedScheduler::with_outcomes(&[false, false, true]);
    let summary = run(&config, scheduler.clone()).await.unwrap();

    let script = work.path().join("pwork1.pbs");
    assert_eq!(summary.attempts, 3);
    assert_eq!(scheduler.calls(), vec![script.clone(); 3]);
    assert_eq!(ledger_lines(&config.ledger_path), display(&[script]));
}

#[tokio::test(start_paused = true)]
async fn test_absolute_mode_submits_absolute_paths() {
    let jobs = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    write_job(jobs.path(), "a.pbs", TEMPLATE_JOB);

    let config = RunConfig {
        absolute: true,
        ..test_config(&jobs, &work)
    };
    let scheduler = ScriptedScheduler::accepting();
    run(&config, scheduler.clone()).await.unwrap();

    let calls = scheduler.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].is_absolute());
}
