// RouteGuard command-line front end

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use routeguard::{
    endpoint::SystemLookup,
    error::RouteGuardError,
    executor::SystemExecutor,
    firewall::FirewallController,
    policy::{build_policy_from_wg, PolicyOverrides},
    runner::{watch_signals, LifecycleRunner, LogFacade, RunnerOptions},
    settings::{load_settings_or_default, Settings},
    state_file::StateStore,
    status::{
        ensure_root, process_alive, require_dependencies, signal_recorded_instance,
        status_summary,
    },
    types::{Mode, PolicyModel},
};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Exit code when interrupted before the runner took over
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "routeguard")]
#[command(about = "WireGuard kill switch and VPN route-leak monitor", long_about = None)]
struct Args {
    /// Path to settings file (default: /etc/routeguard/config.toml if present)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Inputs for building the policy
#[derive(clap::Args)]
struct PolicyArgs {
    /// Path to WireGuard .conf
    #[arg(long)]
    wg_config: PathBuf,

    /// Override VPN interface name (default: infer from file name)
    #[arg(long)]
    iface: Option<String>,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Seconds between route checks
    #[arg(long)]
    interval: Option<u64>,

    #[arg(long)]
    no_allow_lan: bool,

    #[arg(long)]
    no_allow_dhcp: bool,
}

/// Options of the `run` command
#[derive(clap::Args)]
struct RunArgs {
    #[command(flatten)]
    policy: PolicyArgs,

    /// Run wg-quick up <iface> before starting
    #[arg(long)]
    up_vpn: bool,

    #[arg(long)]
    down_vpn_on_exit: bool,

    /// Do not remove nft rules on exit
    #[arg(long)]
    no_cleanup: bool,

    /// Save generated JSON config to file
    #[arg(long)]
    save_generated_config: Option<PathBuf>,

    #[arg(long)]
    print_generated: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run RouteGuard in foreground using generated config
    Run(RunArgs),
    /// Print generated RouteGuard config and exit
    PrintConfig {
        #[command(flatten)]
        policy: PolicyArgs,

        /// Save generated config to file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Show status
    Status,
    /// Remove nft rules only
    Cleanup,
    /// Signal running instance (if known) and remove nft rules
    Stop,
}

fn overrides(args: &PolicyArgs, settings: &Settings) -> PolicyOverrides {
    PolicyOverrides {
        vpn_iface: args.iface.clone(),
        mode: args.mode.unwrap_or(settings.general.mode),
        poll_interval_sec: args.interval.unwrap_or(settings.general.poll_interval),
        allow_lan: settings.general.allow_lan && !args.no_allow_lan,
        allow_dhcp: settings.general.allow_dhcp && !args.no_allow_dhcp,
    }
}

fn save_policy(policy: &PolicyModel, path: &PathBuf) -> Result<()> {
    fs::write(path, policy.to_json_pretty() + "\n")
        .with_context(|| format!("Failed to save generated config to {:?}", path))?;
    log::info!("Saved generated config to {}", path.display());
    Ok(())
}

async fn cmd_run(settings: &Settings, args: RunArgs) -> Result<ExitCode> {
    let exec = Arc::new(SystemExecutor);
    ensure_root()?;
    require_dependencies(exec.as_ref())?;

    let overrides = overrides(&args.policy, settings);
    let policy = tokio::select! {
        policy = build_policy_from_wg(&args.policy.wg_config, &overrides, &SystemLookup) => policy?,
        _ = tokio::signal::ctrl_c() => return Ok(ExitCode::from(EXIT_INTERRUPTED)),
    };

    if args.print_generated {
        println!("{}", policy.to_json_pretty());
    }
    if let Some(path) = &args.save_generated_config {
        save_policy(&policy, path)?;
    }

    let cleanup = settings.general.cleanup_on_exit && !args.no_cleanup;
    let mut state_extra = serde_json::Map::new();
    state_extra.insert("auto_up_vpn".to_string(), args.up_vpn.into());
    state_extra.insert(
        "auto_down_vpn_on_exit".to_string(),
        args.down_vpn_on_exit.into(),
    );
    state_extra.insert("cleanup_nft_on_exit".to_string(), cleanup.into());

    let options = RunnerOptions {
        auto_up_vpn: args.up_vpn,
        auto_down_vpn_on_exit: args.down_vpn_on_exit,
        cleanup_nft_on_exit: cleanup,
        interface_timeout: Duration::from_secs(settings.general.interface_timeout),
        state_extra,
        ..RunnerOptions::default()
    };

    let store = StateStore::new(settings.state.paths.clone());
    let mut runner = LifecycleRunner::new(policy, options, exec, store, LogFacade);
    let _signals = watch_signals(runner.stop_handle()).context("Failed to set up signal handlers")?;

    runner.run().await?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_print(settings: &Settings, policy_args: PolicyArgs, save: Option<PathBuf>) -> Result<ExitCode> {
    let overrides = overrides(&policy_args, settings);
    let policy = build_policy_from_wg(&policy_args.wg_config, &overrides, &SystemLookup).await?;

    println!("{}", policy.to_json_pretty());
    if let Some(path) = &save {
        save_policy(&policy, path)?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_status(settings: &Settings) -> Result<ExitCode> {
    let firewall = FirewallController::new(Arc::new(SystemExecutor));
    let store = StateStore::new(settings.state.paths.clone());

    let summary = status_summary(&firewall, &store).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to encode status")?
    );
    if let Some(state) = &summary.state {
        println!("Process PID {} alive: {}", state.pid, process_alive(state.pid));
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_cleanup() -> Result<ExitCode> {
    ensure_root()?;
    FirewallController::new(Arc::new(SystemExecutor)).remove().await;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_stop(settings: &Settings) -> Result<ExitCode> {
    ensure_root()?;
    let store = StateStore::new(settings.state.paths.clone());

    signal_recorded_instance(&store);
    FirewallController::new(Arc::new(SystemExecutor)).remove().await;
    Ok(ExitCode::SUCCESS)
}

async fn async_main(args: Args, settings: Settings) -> Result<ExitCode> {
    match args.command {
        Command::Run(run) => cmd_run(&settings, run).await,
        Command::PrintConfig { policy, save } => cmd_print(&settings, policy, save).await,
        Command::Status => cmd_status(&settings).await,
        Command::Cleanup => cmd_cleanup().await,
        Command::Stop => cmd_stop(&settings).await,
    }
}

/// Map an error to the reported message and exit code 1
fn report(e: &anyhow::Error) -> ExitCode {
    if let Some(err) = e.downcast_ref::<RouteGuardError>() {
        eprintln!("ERROR: {}", err);
    } else {
        eprintln!("UNEXPECTED ERROR: {:#}", e);
    }
    ExitCode::from(1)
}

fn main() -> ExitCode {
    // Parse command line arguments
    let args = Args::parse();

    // Load settings
    let settings = match load_settings_or_default(args.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            return ExitCode::from(1);
        }
    };

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&settings.general.log_level),
    )
    .init();

    // Build custom Tokio runtime with a small thread pool
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("routeguard")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return report(&e.into()),
    };

    match runtime.block_on(async_main(args, settings)) {
        Ok(code) => code,
        Err(e) => report(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_run_flags_reach_run_args() {
        let args = Args::try_parse_from([
            "routeguard",
            "run",
            "--wg-config",
            "/etc/wireguard/wg0.conf",
            "--mode",
            "protect",
            "--up-vpn",
            "--no-cleanup",
            "--no-allow-lan",
        ])
        .unwrap();

        let Command::Run(run) = args.command else {
            panic!("expected run command");
        };
        assert_eq!(run.policy.wg_config, PathBuf::from("/etc/wireguard/wg0.conf"));
        assert_eq!(run.policy.mode, Some(Mode::Protect));
        assert!(run.up_vpn);
        assert!(!run.down_vpn_on_exit);
        assert!(run.no_cleanup);

        let o = overrides(&run.policy, &Settings::default());
        assert!(!o.allow_lan);
        assert!(o.allow_dhcp);
        assert_eq!(o.mode, Mode::Protect);
    }
}
