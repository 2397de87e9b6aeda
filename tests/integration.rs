use std::{env, fs, path::PathBuf, process::Command};

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_path = test_dir.join("config.toml");
    let config_contents = String::new()
        + "[simulation]\n"
        + "population_size = 200\n"
        + "grid_size = 50.0\n"
        + "initial_infected = 4\n"
        + "beta = 1.5\n"
        + "vaccination_rate = 0.01\n"
        + "time_step = 0.5\n"
        + "\n"
        + "[location]\n"
        + "id = \"test\"\n"
        + "name = \"Test Town\"\n"
        + "latitude = 14.6\n"
        + "longitude = 121.0\n"
        + "scale = 0.001\n"
        + "\n"
        + "[run]\n"
        + "seed = 42\n";

    fs::write(&config_path, config_contents).expect("failed to write config file");

    fn run_bin(args: &[&str]) -> bool {
        let bin = PathBuf::from(env!("CARGO_BIN_EXE_outbreak"));

        let output = Command::new(bin)
            .args(args)
            .output()
            .expect("failed to execute command");

        let stdout_str =
            std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
        let stderr_str =
            std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

        if !output.status.success() {
            eprintln!("binary failed with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n");
        }
        output.status.success()
    }

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(run_bin(&["--sim-dir", test_dir_str, "run", "--days", "20"]));

    let metrics: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(test_dir.join("metrics.json")).expect("failed to read metrics"),
    )
    .expect("failed to parse metrics");
    assert_eq!(metrics["seed"], 42);
    assert_eq!(metrics["snapshot"]["steps"], 40);
    assert_eq!(metrics["danger_zone"]["properties"]["location_id"], "test");

    let csv = fs::read_to_string(test_dir.join("seird.csv")).expect("failed to read history");
    assert_eq!(csv.lines().count(), 42);
    assert!(csv.starts_with("day,susceptible,exposed,infected,recovered,deceased,rt"));

    let agents: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(test_dir.join("agents.geojson")).expect("failed to read agents"),
    )
    .expect("failed to parse agents");
    assert_eq!(agents["type"], "FeatureCollection");
    assert_eq!(agents["features"].as_array().map(Vec::len), Some(200));

    assert!(run_bin(&[
        "--sim-dir",
        test_dir_str,
        "run",
        "--steps",
        "10",
        "--seed",
        "7",
        "--stop-when-no-infected",
    ]));

    assert!(run_bin(&[
        "--sim-dir",
        test_dir_str,
        "ensemble",
        "--runs",
        "3",
        "--steps",
        "20",
    ]));
    let ensemble: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(test_dir.join("ensemble.json")).expect("failed to read ensemble"),
    )
    .expect("failed to parse ensemble");
    assert_eq!(ensemble["n_runs"], 3);
    assert_eq!(ensemble["seeds"], serde_json::json!([42, 43, 44]));

    assert!(!run_bin(&[
        "--sim-dir",
        test_dir_str,
        "run",
        "--steps",
        "20000",
    ]));

    assert!(!run_bin(&[
        "--sim-dir",
        test_dir_str,
        "ensemble",
        "--runs",
        "0",
    ]));

    assert!(run_bin(&["--sim-dir", test_dir_str, "clean"]));
    for name in ["metrics.json", "seird.csv", "agents.geojson", "ensemble.json"] {
        assert!(!test_dir.join(name).exists());
    }

    fs::remove_dir_all(&test_dir).ok();
}
