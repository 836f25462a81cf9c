//! Runtime configuration layering: defaults, file, environment, builder.

use effectus::runtime::env_config::{
    ENV_POLL_BUDGET, ENV_THREAD_NAME_PREFIX, ENV_VIRTUAL_TIME, ENV_WORKER_THREADS,
};
use effectus::test_utils::init_test_logging;
use effectus::{
    Effect, Error, RuntimeBuilder, RuntimeFlavor, Time, assert_exit_success, test_phase,
};
use std::collections::HashMap;
use std::time::Duration;

fn env(pairs: &[(&'static str, &str)]) -> impl Fn(&str) -> Option<String> + Send + Sync + 'static {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn environment_switches_on_virtual_time() {
    init_test_logging();
    test_phase!("environment_switches_on_virtual_time");

    let rt = RuntimeBuilder::current_thread()
        .from_env_with(env(&[(ENV_VIRTUAL_TIME, "yes"), (ENV_POLL_BUDGET, " 16 ")]))
        .build()
        .expect("runtime builds");
    assert!(rt.config().virtual_time);
    assert_eq!(rt.config().poll_budget, 16);

    let nap = Effect::<(), ()>::sleep(Duration::from_secs(3600)).zip_right(Effect::now());
    let started = std::time::Instant::now();
    let Some(woke) = rt.run(nap).value().copied() else {
        panic!("sleep failed");
    };
    assert_eq!(woke, Time::from_secs(3600));
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[test]
fn malformed_variables_name_the_variable() {
    let err = RuntimeBuilder::multi_thread()
        .from_env_with(env(&[(ENV_WORKER_THREADS, "many")]))
        .resolve()
        .expect_err("not a number");
    match err {
        Error::InvalidEnv { var, value, .. } => {
            assert_eq!(var, ENV_WORKER_THREADS);
            assert_eq!(value, "many");
        }
        other => panic!("unexpected {other}"),
    }
}

#[test]
fn virtual_time_is_rejected_on_worker_threads() {
    let err = RuntimeBuilder::multi_thread()
        .virtual_time(true)
        .build()
        .expect_err("unsupported combination");
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[test]
fn zero_values_are_normalized() {
    let config = RuntimeBuilder::multi_thread()
        .worker_threads(0)
        .poll_budget(0)
        .from_env_with(env(&[(ENV_THREAD_NAME_PREFIX, "")]))
        .resolve()
        .expect("valid config");
    assert_eq!(config.worker_threads, 1);
    assert_eq!(config.poll_budget, 1);
    assert_eq!(config.thread_name_prefix, "effectus-worker");
    assert_eq!(config.flavor, RuntimeFlavor::MultiThread);
}

#[cfg(feature = "config-file")]
mod file {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(body.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn layers_apply_in_order() {
        init_test_logging();
        test_phase!("layers_apply_in_order");

        let file = write_config(
            "[scheduler]\nworker_threads = 3\npoll_budget = 64\nthread_name_prefix = \"from-file\"\n",
        );
        let config = RuntimeBuilder::multi_thread()
            .config_file(file.path())
            .from_env_with(env(&[(ENV_POLL_BUDGET, "32")]))
            .thread_name_prefix("from-builder")
            .resolve()
            .expect("valid config");

        assert_eq!(config.worker_threads, 3, "file beats defaults");
        assert_eq!(config.poll_budget, 32, "environment beats file");
        assert_eq!(config.thread_name_prefix, "from-builder", "builder beats all");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("[scheduler]\nworkers = 3\n");
        let err = RuntimeBuilder::current_thread()
            .config_file(file.path())
            .resolve()
            .expect_err("unknown key");
        assert!(matches!(err, Error::ConfigParse(_)), "{err}");
    }

    #[test]
    fn missing_file_reports_its_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("absent.toml");
        let err = RuntimeBuilder::current_thread()
            .config_file(&path)
            .build()
            .expect_err("file is missing");
        match err {
            Error::ConfigFile { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn file_configured_runtime_runs_effects() {
        let file = write_config("[scheduler]\nvirtual_time = true\n");
        let rt = RuntimeBuilder::current_thread()
            .config_file(file.path())
            .build()
            .expect("runtime builds");
        let delayed = Effect::<u8, ()>::succeed(9).delay(Duration::from_secs(90));
        assert_exit_success!(rt.run(delayed), 9);
        assert_eq!(rt.now(), Time::from_secs(90));
    }
}
