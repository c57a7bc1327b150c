use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tryit_util::{data_dir, HostProfile, Settings, StdConsole, APP_NAME};
use tryit_workflow::{Pipeline, SdkToolkit, WorkflowError};

#[derive(Parser)]
#[command(name = "tryit", version, about = "Provision an Android emulator with the device agent")]
struct Cli {
    /// Directory holding resources/ and the sdkLocation record (default: current dir)
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,
    /// Name of the virtual device to create
    #[arg(long, global = true)]
    device_name: Option<String>,
    /// Give up on boot after this many seconds; 0 waits forever
    #[arg(long, global = true)]
    boot_timeout_secs: Option<u64>,
    /// Stop the emulator when the device shell exits
    #[arg(long, global = true)]
    stop_emulator: bool,
    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand, Clone, Copy)]
enum Cmd {
    /// Full run: SDK, device, boot, agent, shell (default)
    Run,
    /// Resolve the SDK and print its root
    Toolchain,
    /// List the virtual devices the emulator knows
    Avds,
    /// Print the bundled agent's package and launchable activity
    AgentInfo,
}

impl Cmd {
    fn name(self) -> &'static str {
        match self {
            Cmd::Run => "run",
            Cmd::Toolchain => "toolchain",
            Cmd::Avds => "avds",
            Cmd::AgentInfo => "agent-info",
        }
    }
}

fn log_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

async fn dispatch(cmd: Cmd, pipeline: &Pipeline<'_>) -> Result<(), WorkflowError> {
    match cmd {
        Cmd::Run => {
            let outcome = pipeline.run().await?;
            info!(
                "session on {} with {} ended",
                outcome.device,
                outcome.agent.component()
            );
            if outcome.emulator_running {
                info!("emulator {} left running", outcome.device);
            }
        }
        Cmd::Toolchain => {
            let layout = pipeline.resolve_toolchain().await?;
            println!("{}", layout.root().display());
        }
        Cmd::Avds => {
            for (index, device) in pipeline.list_devices().await?.iter().enumerate() {
                println!("{}) {device}", index + 1);
            }
        }
        Cmd::AgentInfo => {
            let identity = pipeline.agent_identity().await?;
            println!("package={}", identity.package);
            println!("activity={}", identity.activity);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = tryit_util::init_tracing(log_directive(cli.verbose)) {
        eprintln!("failed to initialise logging: {err}");
    }
    tryit_telemetry::init_with_env(APP_NAME, env!("CARGO_PKG_VERSION"), data_dir());

    let host = match HostProfile::detect(cli.workdir.as_deref()) {
        Ok(host) => host,
        Err(err) => {
            eprintln!("Unable to determine the host environment: {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut settings = Settings::load(host.working_dir());
    if let Some(name) = cli.device_name {
        settings.device_name = name;
    }
    if let Some(secs) = cli.boot_timeout_secs {
        settings.boot_timeout_secs = secs;
    }
    if cli.stop_emulator {
        settings.keep_emulator = false;
    }

    let cmd = cli.cmd.unwrap_or(Cmd::Run);
    tryit_telemetry::event("app.start", &[("command", cmd.name()), ("os", host.os_suffix())]);
    info!("working directory {}", host.working_dir().display());

    let toolkit = match SdkToolkit::new() {
        Ok(toolkit) => toolkit,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let console = StdConsole::new();
    let pipeline = Pipeline::new(&host, &settings, &console, &toolkit);

    match dispatch(cmd, &pipeline).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_reboot_required() => {
            info!("stopping for reboot");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{} failed: {err}", cmd.name());
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
