use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deploy_runner::client::{self, DEFAULT_FTP_PORT, DEFAULT_HTTP_PORT};
use deploy_runner::{Agent, AgentClient, AgentConfig, HostEndpoint, HostMonitor};

/// deployrunner - push builds to remote hosts and run them there
#[derive(Parser)]
#[command(name = "deployrunner", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent (HTTP command server + FTP upload endpoint)
    Serve {
        /// Path to the TOML config file
        #[arg(long, env = "DEPLOYRUNNER_CONFIG")]
        config: Option<PathBuf>,

        /// Override the configured data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Override the configured HTTP port
        #[arg(long)]
        http_port: Option<u16>,

        /// Override the configured FTP port
        #[arg(long)]
        ftp_port: Option<u16>,
    },
    /// Reserve a slot, upload a build directory, optionally run it
    Deploy {
        #[command(flatten)]
        host: HostArgs,

        /// Local build directory to upload
        dir: PathBuf,

        /// Executable file name the agent should launch (.run marker)
        #[arg(short, long)]
        executable: String,

        /// Requested slot name; defaults to the directory name
        #[arg(short, long)]
        name: Option<String>,

        /// Free-text build description (.desc marker)
        #[arg(short, long)]
        description: Option<String>,

        /// Run the build right after the upload
        #[arg(long)]
        run: bool,
    },
    /// List the slots present on a host
    List {
        #[command(flatten)]
        host: HostArgs,
    },
    /// Show a slot's description
    Describe {
        #[command(flatten)]
        host: HostArgs,

        /// Slot id
        slot: String,
    },
    /// Run an already-uploaded slot
    Run {
        #[command(flatten)]
        host: HostArgs,

        /// Slot id
        slot: String,

        /// Extra command-line arguments for the executable
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Kill the process currently running on a host
    Kill {
        #[command(flatten)]
        host: HostArgs,
    },
    /// Delete a slot from a host
    Delete {
        #[command(flatten)]
        host: HostArgs,

        /// Slot id
        slot: String,
    },
    /// Poll host liveness and running state
    Status {
        /// Agent addresses to poll
        #[arg(required = true)]
        addresses: Vec<String>,

        /// HTTP command port for all polled hosts
        #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
        http_port: u16,

        /// Keep polling instead of exiting after one sweep
        #[arg(short, long)]
        watch: bool,

        /// Seconds between sweeps with --watch
        #[arg(long, default_value = "12")]
        interval: u64,
    },
}

/// One remote agent, as command-line arguments.
#[derive(Args)]
struct HostArgs {
    /// Agent address (IP or hostname)
    address: String,

    /// HTTP command port
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    http_port: u16,

    /// FTP transfer port
    #[arg(long, default_value_t = DEFAULT_FTP_PORT)]
    ftp_port: u16,

    /// FTP secret for the deployrunner user (anonymous when omitted)
    #[arg(long, env = "DEPLOYRUNNER_SECRET")]
    secret: Option<String>,
}

impl HostArgs {
    fn endpoint(self) -> HostEndpoint {
        HostEndpoint {
            address: self.address,
            http_port: self.http_port,
            ftp_port: self.ftp_port,
            secret: self.secret,
        }
    }

    fn client(self) -> anyhow::Result<AgentClient> {
        Ok(AgentClient::new(self.endpoint())?)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,deploy_runner=info",
        1 => "info,deploy_runner=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve {
            config,
            data_dir,
            http_port,
            ftp_port,
        } => cmd_serve(config, data_dir, http_port, ftp_port).await,
        Command::Deploy {
            host,
            dir,
            executable,
            name,
            description,
            run,
        } => cmd_deploy(host, dir, &executable, name, description.as_deref(), run).await,
        Command::List { host } => cmd_list(host).await,
        Command::Describe { host, slot } => cmd_describe(host, &slot).await,
        Command::Run { host, slot, args } => cmd_run(host, &slot, args).await,
        Command::Kill { host } => cmd_kill(host).await,
        Command::Delete { host, slot } => cmd_delete(host, &slot).await,
        Command::Status {
            addresses,
            http_port,
            watch,
            interval,
        } => cmd_status(addresses, http_port, watch, interval).await,
    }
}

async fn cmd_serve(
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    http_port: Option<u16>,
    ftp_port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = AgentConfig::load_or_default(config.as_deref())?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    if let Some(port) = http_port {
        config.http_port = port;
    }
    if let Some(port) = ftp_port {
        config.ftp_port = port;
    }

    tracing::debug!(?config, "loaded configuration");
    Agent::new(config)?.run().await?;
    Ok(())
}

async fn cmd_deploy(
    host: HostArgs,
    dir: PathBuf,
    executable: &str,
    name: Option<String>,
    description: Option<&str>,
    run: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(dir.is_dir(), "not a directory: {}", dir.display());
    if !dir.join(executable).is_file() {
        tracing::warn!(executable, "executable not found in the build directory");
    }

    let name = match name {
        Some(name) => name,
        None => dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("cannot derive a name from {}", dir.display()))?,
    };

    let mut client = host.client()?;
    let slot = client.request_slot(&name).await?;
    println!("Reserved slot {slot}");

    client::create_run_file(&dir, executable)?;
    if let Some(description) = description {
        client::create_desc_file(&dir, description)?;
    }

    // The FTP upload is synchronous and unbounded; keep it off the runtime.
    let upload_slot = slot.clone();
    let (client, uploaded) = tokio::task::spawn_blocking(move || {
        let mut last_percent = -1_i32;
        let mut report = |fraction: f32| {
            #[allow(clippy::cast_possible_truncation)]
            let percent = (fraction * 100.0) as i32;
            if percent != last_percent {
                print!("\rUploading... {percent:3}%");
                let _ = std::io::stdout().flush();
                last_percent = percent;
            }
        };
        let result = client.upload_tree(&upload_slot, &dir, Some(&mut report));
        (client, result)
    })
    .await?;
    println!();

    if let Err(e) = uploaded {
        // No rollback on the wire; compensate by dropping the partial slot.
        eprintln!("Upload failed; deleting partial slot {slot}");
        if let Err(delete_error) = client.delete_slot(&slot).await {
            tracing::warn!(%slot, error = %delete_error, "cleanup delete failed");
        }
        return Err(e.into());
    }
    println!("Uploaded {slot}");

    if run {
        client.run_slot(Some(&slot)).await?;
        println!("Running {executable}");
    }
    Ok(())
}

async fn cmd_list(host: HostArgs) -> anyhow::Result<()> {
    let client = host.client()?;
    let slots = client.list_slots().await?;
    if slots.is_empty() {
        println!("No builds");
        return Ok(());
    }
    for slot in slots {
        match client.slot_description(&slot).await {
            Ok(description) if !description.is_empty() => println!("{slot}  {description}"),
            _ => println!("{slot}"),
        }
    }
    Ok(())
}

async fn cmd_describe(host: HostArgs, slot: &str) -> anyhow::Result<()> {
    let description = host.client()?.slot_description(slot).await?;
    if description.is_empty() {
        println!("(no description)");
    } else {
        println!("{description}");
    }
    Ok(())
}

async fn cmd_run(host: HostArgs, slot: &str, args: Vec<String>) -> anyhow::Result<()> {
    let client = host.client()?;
    client.run_slot_with_args(Some(slot), &args).await?;
    println!("Running {slot}");
    Ok(())
}

async fn cmd_kill(host: HostArgs) -> anyhow::Result<()> {
    let mut client = host.client()?;

    let before = client.refresh_running_state().await?;
    if !before.running {
        println!("No running process");
        return Ok(());
    }

    client.kill_running_process().await?;
    let after = client.refresh_running_state().await?;
    if after.running {
        anyhow::bail!("{} (pid {}) survived the kill", after.executable, after.pid);
    }
    println!("Killed {} (pid {})", before.executable, before.pid);
    Ok(())
}

async fn cmd_delete(host: HostArgs, slot: &str) -> anyhow::Result<()> {
    host.client()?.delete_slot(slot).await?;
    println!("Deleted {slot}");
    Ok(())
}

async fn cmd_status(
    addresses: Vec<String>,
    http_port: u16,
    watch: bool,
    interval: u64,
) -> anyhow::Result<()> {
    let mut monitor = HostMonitor::new();
    for address in addresses {
        let mut endpoint = HostEndpoint::new(address);
        endpoint.http_port = http_port;
        monitor.insert(endpoint)?;
    }

    loop {
        monitor.sweep().await;
        print_status(&monitor);

        if !watch {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

fn print_status(monitor: &HostMonitor) {
    for client in monitor.clients() {
        let address = &client.endpoint().address;
        let status = client.host_status();
        if !status.reachable {
            println!("{address}: unreachable");
            continue;
        }

        let running = client.running_info();
        if running.running {
            println!(
                "{address}: {} ({}) - running {} (pid {})",
                status.host_name, status.os, running.executable, running.pid
            );
        } else {
            println!("{address}: {} ({}) - idle", status.host_name, status.os);
        }
    }
}
