// ShrewGuard - 控制台入口

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use shrewguard::models::AppSettings;
use shrewguard::services::storage::SettingsStore;
use shrewguard::services::{daemon, profiles};
use shrewguard::tunnel::{StateObserver, TunnelManager, TunnelState};

/// 命令行参数，覆盖配置文件中的值
#[derive(Parser, Debug)]
#[command(name = "shrewguard")]
#[command(about = "Keeps a ShrewSoft VPN tunnel up and reconnects it when it drops")]
#[command(version)]
struct Cli {
    /// Site profile name (must exist under ~/.ike/sites/<NAME>)
    #[arg(short = 'r', long)]
    profile: Option<String>,

    /// Path to the ikec binary
    #[arg(long)]
    ikec: Option<PathBuf>,

    /// Path to the iked binary
    #[arg(long)]
    iked: Option<PathBuf>,

    /// Ping this host periodically while the tunnel is up
    #[arg(short = 'p', long)]
    pinghost: Option<String>,

    /// Verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Print available site profiles and exit
    #[arg(long)]
    list_profiles: bool,

    /// Do not check or start the iked daemon
    #[arg(long)]
    skip_daemon: bool,

    /// Settings file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,
}

/// 控制台观察者：把状态变化写进日志
///
/// 致命错误已由会话以 error 级别记录，这里不再重复输出。
struct ConsoleObserver;

impl StateObserver for ConsoleObserver {
    fn on_state_changed(&self, state: TunnelState) {
        info!("Tunnel state: {}", state);
    }
}

fn apply_overrides(settings: &mut AppSettings, cli: &Cli) {
    if let Some(profile) = &cli.profile {
        settings.ui.profile = Some(profile.clone());
    }
    if let Some(ikec) = &cli.ikec {
        settings.ike.ikec_path = ikec.display().to_string();
    }
    if let Some(iked) = &cli.iked {
        settings.ike.iked_path = iked.display().to_string();
    }
    if let Some(host) = &cli.pinghost {
        settings.connection.ping_host = Some(host.clone());
        settings.connection.ping_enabled = true;
    }
    if cli.verbose {
        settings.ui.verbose_logging = true;
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let store = match &cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::default_location()?,
    };
    let mut settings = store.load()?;
    apply_overrides(&mut settings, &cli);

    let log_file = store.log_file().ok();
    let log = shrewguard::logging::init(settings.ui.verbose_logging, log_file.as_deref())?;

    if cli.list_profiles {
        match settings.ike.sites() {
            Some(dir) => {
                for profile in profiles::list_profiles(&dir) {
                    println!("{}", profile);
                }
            }
            None => warn!("Cannot determine the home directory"),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let ikec = settings.ike.ikec();
    if !ikec.exists() {
        error!(
            "Cannot find ikec binary on path {}. Install ShrewSoft VPN or set the correct ikec path",
            ikec.display()
        );
        return Ok(ExitCode::from(2));
    }
    let iked = settings.ike.iked();
    if !iked.exists() {
        error!(
            "Cannot find iked binary on path {}. Install ShrewSoft VPN or set the correct iked path",
            iked.display()
        );
        return Ok(ExitCode::from(2));
    }

    if !cli.skip_daemon {
        if let Err(e) = daemon::ensure_running(&iked).await {
            error!("{:#}", e);
            return Ok(ExitCode::from(3));
        }
    }

    let manager = TunnelManager::from_settings(settings)
        .with_store(store)
        .with_log_handle(log);
    manager.register_observer(Arc::new(ConsoleObserver));

    if let Err(e) = manager.connect().await {
        error!("{} (use --profile or --list-profiles)", e);
        return Ok(ExitCode::from(22));
    }

    tokio::select! {
        _ = manager.wait_finished() => {
            info!("Session ended");
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Interrupted, disconnecting");
            manager.disconnect().await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tunnel-worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("shrewguard: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
