use super::*;
use std::io::Write;

fn parse(args: &[&str]) -> Cli {
    match Cli::from_args(&["noderoute"], args) {
        Ok(cli) => cli,
        Err(e) => panic!("failed to parse {:?}: {}", args, e.output),
    }
}

#[test]
fn test_cli_parse_validate() {
    match parse(&["validate", "-c", "cluster.toml"]).command {
        Commands::Validate(ValidateArgs { config }) => assert_eq!(config, "cluster.toml"),
        _ => panic!("Expected Validate command"),
    }
}

#[test]
fn test_cli_parse_simulate_defaults() {
    match parse(&["simulate", "-c", "cluster.toml"]).command {
        Commands::Simulate(args) => {
            assert_eq!(args.config, "cluster.toml");
            assert_eq!(args.requests, 100);
            assert_eq!(args.operation, "default");
            assert_eq!(args.failure_rate, 0.0);
            assert_eq!(args.concurrency, 8);
            assert!(args.session.is_none());
            assert!(args.seed.is_none());
            assert!(args.down.is_empty());
            assert!(args.timeout_ms.is_none());
            assert_eq!(args.health_rounds, 0);
        }
        _ => panic!("Expected Simulate command"),
    }
}

#[test]
fn test_cli_parse_simulate_full() {
    let cli = parse(&[
        "simulate",
        "-c",
        "cluster.toml",
        "-r",
        "500",
        "-o",
        "admin.reset",
        "--failure-rate",
        "0.25",
        "--session",
        "user-1",
        "--concurrency",
        "2",
        "--seed",
        "9",
        "--down",
        "node-1",
        "--down",
        "node-2",
        "--timeout-ms",
        "150",
        "--health-rounds",
        "3",
    ]);
    match cli.command {
        Commands::Simulate(args) => {
            assert_eq!(args.requests, 500);
            assert_eq!(args.operation, "admin.reset");
            assert_eq!(args.failure_rate, 0.25);
            assert_eq!(args.session.as_deref(), Some("user-1"));
            assert_eq!(args.concurrency, 2);
            assert_eq!(args.seed, Some(9));
            assert_eq!(args.down, vec!["node-1".to_string(), "node-2".to_string()]);
            assert_eq!(args.timeout_ms, Some(150));
            assert_eq!(args.health_rounds, 3);
        }
        _ => panic!("Expected Simulate command"),
    }
}

#[test]
fn test_cli_requires_config() {
    assert!(Cli::from_args(&["noderoute"], &["validate"]).is_err());
    assert!(Cli::from_args(&["noderoute"], &["simulate"]).is_err());
}

#[test]
fn test_summarize_and_load() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
name = "payments"
load_balancing = "least-connections"

[discovery]
method = "static"
nodes = [
    {{ id = "node-1", url = "http://10.0.0.1:9000" }},
    {{ id = "node-2", url = "http://10.0.0.2:9000", weight = 2 }},
]

[[routing_rules]]
pattern = "^admin\\."
targets = ["node-1"]
"#
    )
    .unwrap();

    let config = load_config(file.path().to_str().unwrap()).unwrap();
    let summary = summarize(&config);
    assert!(summary.contains("cluster:  payments"));
    assert!(summary.contains("strategy: least-connections"));
    assert!(summary.contains("node-2 http://10.0.0.2:9000 (weight 2)"));
    assert!(summary.contains("/^admin\\./ -> node-1"));
}

#[test]
fn test_load_invalid_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "name = \"\"\n[discovery]\nmethod = \"static\"\nnodes = []\n").unwrap();
    let err = load_config(file.path().to_str().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("cluster name must not be empty"));
}
