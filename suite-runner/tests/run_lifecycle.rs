//! End-to-end orchestration tests over a throwaway project tree.
//!
//! Blocking runs use a spying executor so nothing is spawned; the streaming tests
//! at the bottom launch a real `/bin/sh` in place of the test runner.

use std::fs;

use suite_runner::core::request::RunRequest;
use suite_runner::core::types::RunMode;
use suite_runner::error::RunError;
use suite_runner::io::config::RunnerConfig;
use suite_runner::io::registry::{RESULT_FILE, STDERR_FILE, STDOUT_FILE};
use suite_runner::test_support::{
    MISSING_SUITE, SpyExecutor, TAGGED_SUITE, TestProject, UNLISTED_SUITE, UNTAGGED_SUITE,
};

#[test]
fn allow_listed_suite_with_declared_tag_runs_and_persists() {
    let project = TestProject::new();
    let orchestrator = project.orchestrator(SpyExecutor::exiting(0, "2 tests, 2 passed\n", ""));

    let outcome = orchestrator
        .run(&RunRequest::new(TAGGED_SUITE, "apimagazord"))
        .expect("run");

    assert_eq!(outcome.returncode, 0);
    assert!(outcome.run_id.ends_with("_parte1__tests__a_robot"));
    assert_eq!(outcome.stdout_tail, "2 tests, 2 passed\n");
    assert_eq!(orchestrator.executor().calls(), 1);

    let cmd = &orchestrator.executor().commands()[0];
    assert_eq!(cmd[..3], ["robot", "-i", "apimagazord"]);
    assert!(cmd.last().expect("suite").ends_with("a.robot"));

    let dir = project.runs_dir().join(&outcome.run_id);
    assert_eq!(
        fs::read_to_string(dir.join(STDOUT_FILE)).expect("stdout"),
        "2 tests, 2 passed\n"
    );
    assert!(dir.join(STDERR_FILE).is_file());
    assert!(dir.join(RESULT_FILE).is_file());

    let runs = orchestrator.list_runs().expect("list");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].returncode, Some(0));
    assert_eq!(runs[0].tag.as_deref(), Some("apimagazord"));
    assert_eq!(runs[0].target.as_deref(), Some(TAGGED_SUITE));
}

#[test]
fn undeclared_tag_is_rejected_with_available_tags() {
    let project = TestProject::new();
    let orchestrator = project.orchestrator(SpyExecutor::succeeding());

    // Part of the vocabulary but not declared by the suite.
    let err = orchestrator
        .run(&RunRequest::new(TAGGED_SUITE, "mobilemagazord"))
        .expect_err("rejected");
    match err {
        RunError::TagNotPermitted { available, .. } => {
            assert_eq!(available, vec!["apimagazord", "smoke"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Unknown to the vocabulary.
    let err = orchestrator
        .run(&RunRequest::new(TAGGED_SUITE, "smoke2"))
        .expect_err("rejected");
    assert_eq!(err.kind(), "tag_not_found_in_suite");

    assert_eq!(orchestrator.executor().calls(), 0);
    assert_eq!(fs::read_dir(project.runs_dir()).expect("runs").count(), 0);
}

#[test]
fn rejections_map_to_their_kinds() {
    let project = TestProject::new();
    let orchestrator = project.orchestrator(SpyExecutor::succeeding());

    let cases = [
        (UNLISTED_SUITE, "apimagazord", "not_allowed"),
        ("../project/parte1/tests/a.robot", "apimagazord", "not_allowed"),
        ("", "apimagazord", "invalid_path"),
        (MISSING_SUITE, "apimagazord", "target_not_found"),
        (UNTAGGED_SUITE, "apimagazord", "tag_not_found_in_suite"),
    ];
    for (path, tag, kind) in cases {
        let err = orchestrator
            .run(&RunRequest::new(path, tag))
            .expect_err(path);
        assert_eq!(err.kind(), kind, "{path}");
        assert!(err.is_rejection());
    }
    assert_eq!(orchestrator.executor().calls(), 0);
}

#[test]
fn allow_listed_directory_without_suites_is_not_runnable() {
    let project = TestProject::new();
    fs::create_dir_all(project.root().join("parte2/vazio")).expect("mkdir");
    let config = RunnerConfig {
        allowed_suites: vec!["parte2/vazio".to_string()],
        ..project.config()
    };
    let orchestrator = project.orchestrator_with(config, SpyExecutor::succeeding());

    let err = orchestrator
        .run(&RunRequest::new("parte2/vazio", "apimagazord"))
        .expect_err("no suites");
    assert_eq!(err.kind(), "no_runnable_suite");
}

#[test]
fn nonzero_exit_is_an_outcome_not_an_error() {
    let project = TestProject::new();
    let orchestrator = project.orchestrator(SpyExecutor::exiting(1, "1 failed\n", "boom\n"));

    let outcome = orchestrator
        .run(&RunRequest::new(TAGGED_SUITE, "apimagazord"))
        .expect("run");
    assert_eq!(outcome.returncode, 1);
    assert!(!outcome.succeeded());
    assert_eq!(outcome.stderr_tail, "boom\n");
}

#[test]
fn long_output_is_tailed() {
    let project = TestProject::new();
    let config = RunnerConfig {
        tail_chars: 5,
        ..project.config()
    };
    let orchestrator =
        project.orchestrator_with(config, SpyExecutor::exiting(0, "0123456789", ""));

    let outcome = orchestrator
        .run(&RunRequest::new(TAGGED_SUITE, "apimagazord"))
        .expect("run");
    assert_eq!(outcome.stdout_tail, "...\n56789");

    let dir = project.runs_dir().join(&outcome.run_id);
    assert_eq!(
        fs::read_to_string(dir.join(STDOUT_FILE)).expect("stdout"),
        "0123456789"
    );
}

#[test]
fn timed_out_run_is_persisted_without_returncode() {
    let project = TestProject::new();
    let config = RunnerConfig {
        run_timeout_secs: Some(5),
        ..project.config()
    };
    let orchestrator =
        project.orchestrator_with(config, SpyExecutor::timing_out("partial output\n"));

    let err = orchestrator
        .run(&RunRequest::new(TAGGED_SUITE, "apimagazord"))
        .expect_err("timeout");
    match err {
        RunError::Timeout { timeout, stdout, .. } => {
            assert_eq!(timeout.as_secs(), 5);
            assert_eq!(stdout, "partial output\n");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let runs = orchestrator.list_runs().expect("list");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].returncode, None);
    let record = orchestrator
        .registry()
        .read_record(&runs[0].run_id)
        .expect("read")
        .expect("record");
    assert!(record.timed_out);
    assert_eq!(record.mode, RunMode::Suite);
}

#[test]
fn runs_started_in_the_same_second_get_distinct_ids() {
    let project = TestProject::new();
    let orchestrator = project.orchestrator(SpyExecutor::succeeding());
    let request = RunRequest::new(TAGGED_SUITE, "apimagazord");

    let ids: Vec<String> = (0..3)
        .map(|_| orchestrator.run(&request).expect("run").run_id)
        .collect();
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 3);
    assert_eq!(orchestrator.list_runs().expect("list").len(), 3);
}

#[test]
fn corrupt_metadata_only_affects_its_own_run() {
    let project = TestProject::new();
    let orchestrator = project.orchestrator(SpyExecutor::succeeding());
    let request = RunRequest::new(TAGGED_SUITE, "apimagazord");
    let first = orchestrator.run(&request).expect("first");
    let second = orchestrator.run(&request).expect("second");

    fs::write(
        project.runs_dir().join(&first.run_id).join(RESULT_FILE),
        "{\"run_id\": ",
    )
    .expect("truncate");

    let runs = orchestrator.list_runs().expect("list");
    assert_eq!(runs.len(), 2);
    let broken = runs
        .iter()
        .find(|r| r.run_id == first.run_id)
        .expect("first listed");
    let intact = runs
        .iter()
        .find(|r| r.run_id == second.run_id)
        .expect("second listed");
    assert!(broken.metadata_error.is_some());
    assert_eq!(intact.returncode, Some(0));
    assert!(intact.metadata_error.is_none());
}

#[test]
fn clear_runs_removes_history() {
    let project = TestProject::new();
    let orchestrator = project.orchestrator(SpyExecutor::succeeding());
    orchestrator
        .run(&RunRequest::new(TAGGED_SUITE, "apimagazord"))
        .expect("run");
    orchestrator.run_regression().expect("regression");

    assert_eq!(orchestrator.clear_runs().expect("clear"), 2);
    assert!(orchestrator.list_runs().expect("list").is_empty());
}

#[test]
fn regression_count_covers_tests_directories() {
    let project = TestProject::new();
    fs::create_dir_all(project.root().join("parte5/q5/testes")).expect("mkdir");
    fs::write(project.root().join("parte5/q5/testes/m.robot"), "").expect("write");
    fs::create_dir_all(project.root().join("parte5/q5/__pycache__/tests")).expect("mkdir");
    fs::write(project.root().join("parte5/q5/__pycache__/tests/x.robot"), "").expect("write");

    let orchestrator = project.orchestrator(SpyExecutor::succeeding());
    assert_eq!(orchestrator.regression_suite_count(), 4);
}

#[test]
fn canned_stream_persists_merged_console() {
    let project = TestProject::new();
    let lines = vec!["Suite A".to_string(), "| PASS |".to_string()];
    let orchestrator = project.orchestrator(SpyExecutor::streaming(lines.clone(), 0));

    let mut run = orchestrator
        .start_stream(&RunRequest::new(TAGGED_SUITE, "apimagazord"))
        .expect("start");
    let run_id = run.run_id().to_string();
    let seen: Vec<String> = run.by_ref().collect();
    assert_eq!(seen, lines);

    let outcome = run.finish().expect("finish");
    assert_eq!(outcome.run_id, run_id);
    assert_eq!(outcome.returncode, 0);

    let dir = project.runs_dir().join(&run_id);
    assert_eq!(
        fs::read_to_string(dir.join(STDOUT_FILE)).expect("stdout"),
        "Suite A\n| PASS |\n"
    );
    assert_eq!(fs::read_to_string(dir.join(STDERR_FILE)).expect("stderr"), "");
}

#[test]
fn rejected_stream_spawns_nothing() {
    let project = TestProject::new();
    let orchestrator = project.orchestrator(SpyExecutor::streaming(Vec::new(), 0));
    assert!(
        orchestrator
            .start_stream(&RunRequest::new(UNLISTED_SUITE, "apimagazord"))
            .is_err()
    );
    assert_eq!(orchestrator.executor().calls(), 0);
}

#[cfg(unix)]
mod real_process {
    use super::*;
    use suite_runner::io::executor::ProcessExecutor;

    /// Config whose launcher is a shell script; the runner arguments land in `$@`.
    fn shell_config(project: &TestProject, script: &str) -> RunnerConfig {
        RunnerConfig {
            launcher: vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "runner".to_string(),
            ],
            ..project.config()
        }
    }

    #[test]
    fn streamed_run_reports_lines_and_exit_code() {
        let project = TestProject::new();
        let config = shell_config(
            &project,
            "for i in 1 2 3; do echo \"line $i\"; done; echo warn 1>&2; exit 2",
        );
        let orchestrator = project.orchestrator_with(config, ProcessExecutor);

        let mut run = orchestrator
            .start_stream(&RunRequest::new(TAGGED_SUITE, "apimagazord"))
            .expect("start");
        let mut lines: Vec<String> = run.by_ref().collect();
        let outcome = run.finish().expect("finish");

        assert_eq!(outcome.returncode, 2);
        lines.sort();
        assert_eq!(lines, vec!["line 1", "line 2", "line 3", "warn"]);
        let console = fs::read_to_string(
            project.runs_dir().join(&outcome.run_id).join(STDOUT_FILE),
        )
        .expect("console");
        assert_eq!(console.lines().count(), 4);
    }

    #[test]
    fn abandoned_stream_still_persists() {
        let project = TestProject::new();
        let config = shell_config(&project, "echo first; exec sleep 30");
        let orchestrator = project.orchestrator_with(config, ProcessExecutor);

        let mut run = orchestrator
            .start_stream(&RunRequest::new(TAGGED_SUITE, "apimagazord"))
            .expect("start");
        assert_eq!(run.next().as_deref(), Some("first"));
        let outcome = run.finish().expect("finish");
        assert_ne!(outcome.returncode, 0);
        assert_eq!(
            orchestrator.list_runs().expect("list")[0].returncode,
            Some(outcome.returncode)
        );
    }

    #[test]
    fn blocking_run_writes_runner_artifacts() {
        let project = TestProject::new();
        // `-d <dir>` is the fourth runner argument.
        let config = shell_config(&project, "echo '<html/>' > \"$4/log.html\"; echo done");
        let orchestrator = project.orchestrator_with(config, ProcessExecutor);

        let outcome = orchestrator
            .run(&RunRequest::new(TAGGED_SUITE, "apimagazord"))
            .expect("run");
        assert_eq!(outcome.returncode, 0);
        assert_eq!(outcome.stdout_tail, "done\n");
        assert_eq!(
            outcome.artifacts.log_url,
            Some(format!("/static/runs/{}/log.html", outcome.run_id))
        );
        assert_eq!(outcome.artifacts.report_url, None);
    }

    #[test]
    fn missing_launcher_is_a_spawn_failure() {
        let project = TestProject::new();
        let config = RunnerConfig {
            launcher: vec!["/definitely/not/python".to_string()],
            ..project.config()
        };
        let orchestrator = project.orchestrator_with(config, ProcessExecutor);

        let err = orchestrator
            .run(&RunRequest::new(TAGGED_SUITE, "apimagazord"))
            .expect_err("spawn");
        assert_eq!(err.kind(), "spawn_failure");

        let mut run = orchestrator
            .start_stream(&RunRequest::new(TAGGED_SUITE, "apimagazord"))
            .expect("start");
        let lines: Vec<String> = run.by_ref().collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(run.finish().expect("finish").returncode, 1);
    }
}
