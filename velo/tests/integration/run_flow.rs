use std::collections::BTreeMap;

use velo::engine::executor::TaskError;
use velo_common::ProjectConfig;

use crate::common::{run_task, task, TestWorkspace};

/// Single package `a` whose build appends to `build.log` and produces
/// `dist/f`.
fn single_package_config(ws: &TestWorkspace) -> ProjectConfig {
    ws.manifest("packages/a", "a", &[]);
    ws.write_file("packages/a/src/main.c", "int main() { return 0; }\n");

    let mut pipeline = BTreeMap::new();
    pipeline.insert(
        "build".to_string(),
        task(
            "echo ran >> build.log && mkdir -p dist && echo X > dist/f",
            &["src/**"],
            &["dist"],
            &[],
        ),
    );
    ProjectConfig {
        version: 1,
        packages: vec!["packages/*".to_string()],
        pipeline,
        ..ProjectConfig::default()
    }
}

#[tokio::test]
async fn test_miss_then_hit_without_reexecution() {
    let ws = TestWorkspace::new();
    let config = single_package_config(&ws);

    // First run after clean: executes and stores an archive.
    let first_key = run_task(&ws, &config, "build", None).await.unwrap();
    assert_eq!(ws.read_file("packages/a/dist/f"), "X\n");
    assert_eq!(ws.log_lines("packages/a/build.log"), 1);
    assert_eq!(ws.stored_archives().len(), 1);

    // Remove the outputs so only a restore can bring them back.
    std::fs::remove_dir_all(ws.path("packages/a/dist")).unwrap();

    // Second run with no changes: no process launched, outputs restored.
    let second_key = run_task(&ws, &config, "build", None).await.unwrap();
    assert_eq!(first_key, second_key);
    assert_eq!(ws.read_file("packages/a/dist/f"), "X\n");
    assert_eq!(ws.log_lines("packages/a/build.log"), 1);
}

#[tokio::test]
async fn test_input_change_busts_the_cache() {
    let ws = TestWorkspace::new();
    let config = single_package_config(&ws);

    let first_key = run_task(&ws, &config, "build", None).await.unwrap();

    ws.write_file("packages/a/src/main.c", "int main() { return 1; }\n");
    let second_key = run_task(&ws, &config, "build", None).await.unwrap();

    assert_ne!(first_key, second_key);
    assert_eq!(ws.log_lines("packages/a/build.log"), 2);
    assert_eq!(ws.stored_archives().len(), 2);
}

#[tokio::test]
async fn test_gitignored_files_do_not_bust_the_cache() {
    let ws = TestWorkspace::new();
    ws.manifest("packages/a", "a", &[]);
    ws.write_file("packages/a/.gitignore", "scratch.txt\n");
    ws.write_file("packages/a/src/main.c", "int main() {}\n");

    let mut pipeline = BTreeMap::new();
    pipeline.insert(
        "build".to_string(),
        task(
            "echo ran >> build.log && mkdir -p dist && echo X > dist/f",
            // `**` would sweep in everything; the gitignore must filter it.
            &["src/**", "*.txt"],
            &["dist"],
            &[],
        ),
    );
    let config = ProjectConfig {
        packages: vec!["packages/*".to_string()],
        pipeline,
        ..ProjectConfig::default()
    };

    let first_key = run_task(&ws, &config, "build", None).await.unwrap();

    ws.write_file("packages/a/scratch.txt", "local scratch data");
    let second_key = run_task(&ws, &config, "build", None).await.unwrap();

    assert_eq!(first_key, second_key);
    assert_eq!(ws.log_lines("packages/a/build.log"), 1);
}

/// `lib` and `app`, where `app` depends on `lib` and `build` declares a
/// topological dependency.
fn two_package_config(ws: &TestWorkspace) -> ProjectConfig {
    ws.manifest("packages/lib", "lib", &[]);
    ws.manifest("packages/app", "app", &["lib"]);
    ws.write_file("packages/lib/src/lib.c", "int lib() { return 0; }\n");
    ws.write_file("packages/app/src/app.c", "int main() { return 0; }\n");

    let mut pipeline = BTreeMap::new();
    pipeline.insert(
        "build".to_string(),
        task(
            "echo ran >> build.log && mkdir -p dist && echo out > dist/out",
            &["src/**"],
            &["dist"],
            &["^build"],
        ),
    );
    ProjectConfig {
        packages: vec!["packages/*".to_string()],
        pipeline,
        ..ProjectConfig::default()
    }
}

#[tokio::test]
async fn test_upstream_change_propagates_downstream() {
    let ws = TestWorkspace::new();
    let config = two_package_config(&ws);

    let first_key = run_task(&ws, &config, "build", None).await.unwrap();
    assert_eq!(ws.log_lines("packages/lib/build.log"), 1);
    assert_eq!(ws.log_lines("packages/app/build.log"), 1);

    // Unchanged: both hit.
    run_task(&ws, &config, "build", None).await.unwrap();
    assert_eq!(ws.log_lines("packages/lib/build.log"), 1);
    assert_eq!(ws.log_lines("packages/app/build.log"), 1);

    // Changing lib busts lib's key, which busts app's key through the
    // dependency summary.
    ws.write_file("packages/lib/src/lib.c", "int lib() { return 1; }\n");
    let second_key = run_task(&ws, &config, "build", None).await.unwrap();
    assert_ne!(first_key, second_key);
    assert_eq!(ws.log_lines("packages/lib/build.log"), 2);
    assert_eq!(ws.log_lines("packages/app/build.log"), 2);
}

#[tokio::test]
async fn test_shared_dependency_executes_at_most_once() {
    let ws = TestWorkspace::new();
    ws.manifest("packages/base", "base", &[]);
    ws.manifest("packages/left", "left", &["base"]);
    ws.manifest("packages/right", "right", &["base"]);
    ws.manifest("packages/top", "top", &["left", "right"]);
    for pkg in ["base", "left", "right", "top"] {
        ws.write_file(&format!("packages/{pkg}/src/x.c"), "x\n");
    }

    let mut pipeline = BTreeMap::new();
    pipeline.insert(
        "build".to_string(),
        task(
            // Every execution appends one line to the shared log at the
            // workspace root.
            "echo $PWD >> ../../executions.log && mkdir -p dist && echo out > dist/out",
            &["src/**"],
            &["dist"],
            &["^build"],
        ),
    );
    let config = ProjectConfig {
        packages: vec!["packages/*".to_string()],
        pipeline,
        ..ProjectConfig::default()
    };

    run_task(&ws, &config, "build", Some("top")).await.unwrap();

    // Four nodes, four executions: base ran once despite being reachable
    // through both left and right.
    assert_eq!(ws.log_lines("executions.log"), 4);
    let log = ws.read_file("executions.log");
    let base_runs = log.lines().filter(|l| l.ends_with("packages/base")).count();
    assert_eq!(base_runs, 1);
}

#[tokio::test]
async fn test_dependency_failure_propagates_with_exit_code() {
    let ws = TestWorkspace::new();
    let config = {
        ws.manifest("packages/lib", "lib", &[]);
        ws.manifest("packages/app", "app", &["lib"]);
        ws.write_file("packages/lib/src/lib.c", "x\n");
        ws.write_file("packages/app/src/app.c", "x\n");

        let mut pipeline = BTreeMap::new();
        pipeline.insert(
            "build".to_string(),
            task(
                "if [ \"${PWD##*/}\" = lib ]; then exit 7; fi; echo ran >> build.log && mkdir -p dist",
                &["src/**"],
                &["dist"],
                &["^build"],
            ),
        );
        ProjectConfig {
            packages: vec!["packages/*".to_string()],
            pipeline,
            ..ProjectConfig::default()
        }
    };

    let err = run_task(&ws, &config, "build", None).await.unwrap_err();
    match &err {
        TaskError::CommandFailed { code, .. } => assert_eq!(*code, 7),
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    assert_eq!(err.exit_code(), Some(7));

    // The dependent never launched its command.
    assert_eq!(ws.log_lines("packages/app/build.log"), 0);
    // Nothing was archived for the failed node.
    assert_eq!(ws.stored_archives().len(), 0);
}

#[tokio::test]
async fn test_failed_sibling_does_not_cancel_inflight_branch() {
    let ws = TestWorkspace::new();
    ws.manifest("packages/fast-fail", "fast-fail", &[]);
    ws.manifest("packages/slow-ok", "slow-ok", &[]);
    ws.manifest("packages/top", "top", &["fast-fail", "slow-ok"]);
    for pkg in ["fast-fail", "slow-ok", "top"] {
        ws.write_file(&format!("packages/{pkg}/src/x.c"), "x\n");
    }

    let mut pipeline = BTreeMap::new();
    pipeline.insert(
        "build".to_string(),
        task(
            "case \"${PWD##*/}\" in \
             fast-fail) exit 3 ;; \
             slow-ok) sleep 0.3 && echo done >> ../../slow.log && mkdir -p dist ;; \
             *) mkdir -p dist ;; esac",
            &["src/**"],
            &["dist"],
            &["^build"],
        ),
    );
    let config = ProjectConfig {
        packages: vec!["packages/*".to_string()],
        pipeline,
        ..ProjectConfig::default()
    };

    let err = run_task(&ws, &config, "build", Some("top")).await.unwrap_err();
    assert_eq!(err.exit_code(), Some(3));

    // The sibling already in flight ran to completion.
    assert_eq!(ws.log_lines("slow.log"), 1);
    // The parent itself never ran.
    assert!(!ws.path("packages/top/dist").exists());
}

#[tokio::test]
async fn test_extraction_replaces_stale_output_files() {
    let ws = TestWorkspace::new();
    let config = single_package_config(&ws);

    run_task(&ws, &config, "build", None).await.unwrap();

    // Pollute the output directory, then force a restore.
    ws.write_file("packages/a/dist/stale.txt", "stale");
    run_task(&ws, &config, "build", None).await.unwrap();

    assert_eq!(ws.read_file("packages/a/dist/f"), "X\n");
    assert!(!ws.path("packages/a/dist/stale.txt").exists());
}

#[tokio::test]
async fn test_clean_store_turns_hits_back_into_misses() {
    let ws = TestWorkspace::new();
    let config = single_package_config(&ws);

    run_task(&ws, &config, "build", None).await.unwrap();
    assert_eq!(ws.log_lines("packages/a/build.log"), 1);

    std::fs::remove_dir_all(ws.path(".velocity")).unwrap();

    run_task(&ws, &config, "build", None).await.unwrap();
    assert_eq!(ws.log_lines("packages/a/build.log"), 2);
}
