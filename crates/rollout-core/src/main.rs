use anyhow::Context;
use clap::{value_parser, Arg, ArgMatches, Command};
use rollout_core::{init_tracing, HarnessConfig, LogFormat, UpgradeOrchestrator};
use rollout_node::{CliSubmitter, ProcessLauncher};
use std::path::PathBuf;

fn cli() -> Command {
    let path_arg = |name: &'static str, help: &'static str| {
        Arg::new(name)
            .long(name)
            .value_name("PATH")
            .value_parser(value_parser!(PathBuf))
            .help(help)
    };

    Command::new("rollout-harness")
        .version(rollout_core::VERSION)
        .about("Rolling upgrade test for a validator network: new executable, new runtime, same state")
        .arg(path_arg("config", "TOML configuration file"))
        .arg(path_arg("workdir", "Directory for chain spec, databases, logs and exports [env: WORKDIR]"))
        .arg(path_arg("old-binary", "Pre-upgrade node executable [env: OLD_BINARY]"))
        .arg(path_arg("new-binary", "Post-upgrade node executable [env: NEW_BINARY]"))
        .arg(path_arg("new-runtime", "Post-upgrade compiled runtime [env: NEW_RUNTIME]"))
        .arg(path_arg("signer-tool", "Tool submitting the runtime upgrade [env: SIGNER_TOOL]"))
        .arg(
            Arg::new("nodes")
                .long("nodes")
                .value_parser(value_parser!(usize))
                .help("Number of validators (at least 4)"),
        )
        .arg(
            Arg::new("poll-interval")
                .long("poll-interval")
                .value_name("SECS")
                .value_parser(value_parser!(u64))
                .help("Poll checkpoints every SECS instead of sleeping the full settle window (capped at each window's length)"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .default_value("text")
                .value_parser(value_parser!(LogFormat))
                .help("Progress log format: text or json"),
        )
}

/// Defaults, then the config file, then environment, then flags
fn load_config(
    args: &ArgMatches,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<HarnessConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HarnessConfig::new(),
    };
    config.apply_env(env);

    if let Some(workdir) = args.get_one::<PathBuf>("workdir") {
        config.paths.workdir.clone_from(workdir);
    }
    let overrides = [
        ("old-binary", &mut config.paths.old_binary),
        ("new-binary", &mut config.paths.new_binary),
        ("new-runtime", &mut config.paths.new_runtime),
        ("signer-tool", &mut config.paths.signer_tool),
    ];
    for (flag, slot) in overrides {
        if let Some(path) = args.get_one::<PathBuf>(flag) {
            *slot = Some(path.clone());
        }
    }
    if let Some(&nodes) = args.get_one::<usize>("nodes") {
        config.scenario.resize(nodes);
    }
    if let Some(&interval) = args.get_one::<u64>("poll-interval") {
        config.timing = config.timing.with_polling(interval);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli().get_matches();
    let format = args
        .get_one::<LogFormat>("log-format")
        .copied()
        .unwrap_or_default();
    init_tracing(format).map_err(|e| anyhow::anyhow!(e))?;

    let config = load_config(&args, |key| std::env::var(key).ok())?;
    config.validate().context("invalid configuration")?;
    config.check_artifacts().context("missing artifacts")?;
    std::fs::create_dir_all(&config.paths.workdir)
        .with_context(|| format!("creating {}", config.paths.workdir.display()))?;

    println!("Rolling upgrade harness {}", rollout_core::VERSION);
    println!("Workdir: {}", config.paths.workdir.display());
    println!("Nodes: {}", config.scenario.node_count);
    println!();

    let launcher = ProcessLauncher::new(&config.paths.workdir, config.timing.rpc_timeout());
    let submitter = CliSubmitter::new(config.paths.signer_tool());
    let report = UpgradeOrchestrator::new(config, launcher, submitter).run().await;

    println!("{}", report.generate_text());

    std::process::exit(report.verdict().exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_core::SettlePolicy;

    fn parse(args: &[&str]) -> ArgMatches {
        cli()
            .try_get_matches_from(std::iter::once("rollout-harness").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn node_flag_overrides_only_node_count() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("harness.toml");
        std::fs::write(
            &file,
            r#"
            [scenario]
            seeds = ["//A", "//B", "//C", "//D"]
            canary_index = 2
            chain_type = "dev"
            "#,
        )
        .unwrap();
        let file = file.to_str().unwrap();

        let config = load_config(&parse(&["--config", file, "--nodes", "4"]), |_| None).unwrap();
        assert_eq!(config.scenario.node_count, 4);
        assert_eq!(config.scenario.seeds, vec!["//A", "//B", "//C", "//D"]);
        assert_eq!(config.scenario.canary_index, 2);
        assert_eq!(config.scenario.chain_type, "dev");

        let config = load_config(&parse(&["--config", file, "--nodes", "5"]), |_| None).unwrap();
        assert_eq!(config.scenario.seeds.len(), 5);
        assert_eq!(config.scenario.canary_index, 2);
        assert_eq!(config.scenario.chain_type, "dev");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn flags_override_environment() {
        let env = |key: &str| match key {
            "WORKDIR" => Some("/env/work".to_string()),
            "NEW_BINARY" => Some("/env/node-new".to_string()),
            _ => None,
        };
        let config = load_config(
            &parse(&["--new-binary", "/flag/node-new", "--poll-interval", "15"]),
            env,
        )
        .unwrap();

        assert_eq!(config.paths.workdir, PathBuf::from("/env/work"));
        assert_eq!(config.paths.new_binary(), PathBuf::from("/flag/node-new"));
        assert_eq!(config.timing.propagation, SettlePolicy::poll(10, 10));
        assert!(config.validate().is_ok());
    }
}
