mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_MANIFEST_ERROR, EXIT_STORE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;
use vmlab_core::install_signal_handler;
use vmlab_store::DEFAULT_CLONE_DIR;

#[derive(Debug, Parser)]
#[command(
    name = "vmlab",
    version,
    about = "Declarative virtual machine and virtual network labs on libvirt"
)]
struct Cli {
    /// Hypervisor endpoint URI (overrides the manifest setting).
    #[arg(long, env = "VMLAB_URI", global = true)]
    uri: Option<String>,

    /// Control-plane backend: "virsh", or "mock" for dry runs.
    #[arg(long, default_value = "virsh", global = true)]
    backend: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Bring a lab up, report it, and tear it down on Ctrl-C.
    Up {
        /// Path to lab manifest TOML file.
        #[arg(default_value = "vmlab.toml")]
        manifest: PathBuf,
        /// Tear down after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Validate a lab manifest without contacting the hypervisor.
    Check {
        /// Path to lab manifest TOML file.
        #[arg(default_value = "vmlab.toml")]
        manifest: PathBuf,
    },
    /// Show DHCP leases on a live lab network.
    Leases {
        /// Network (bridge) name, e.g. lln_1a2b...
        network: String,
    },
    /// Type text into a live machine's console as synthetic keystrokes.
    Type {
        /// Domain name, e.g. llm_1a2b...
        domain: String,
        /// Text to type.
        text: String,
        /// Press Enter after the text.
        #[arg(long, default_value_t = false)]
        enter: bool,
        /// Delay between keystrokes in milliseconds.
        #[arg(long, default_value_t = 50)]
        delay_ms: u64,
    },
    /// Remove disk clones left behind by machines that are no longer running.
    Gc {
        /// Clone directory to collect.
        #[arg(long, default_value = DEFAULT_CLONE_DIR)]
        clone_dir: PathBuf,
        /// Only report what would be removed.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Run diagnostic checks on the host and clone directory.
    Doctor {
        /// Clone directory to inspect.
        #[arg(long, default_value = DEFAULT_CLONE_DIR)]
        clone_dir: PathBuf,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("VMLAB_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let json_output = cli.json;
    let backend = cli.backend.as_str();
    let uri = cli.uri.as_deref();

    let needs_hypervisor = matches!(
        cli.command,
        Commands::Up { .. } | Commands::Leases { .. } | Commands::Type { .. } | Commands::Gc { .. }
    );
    if needs_hypervisor
        && backend != "mock"
        && std::env::var("VMLAB_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let missing = vmlab_runtime::check_core_prereqs();
        if !missing.is_empty() {
            eprintln!("error: {}", vmlab_runtime::format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let result = match cli.command {
        Commands::Up { manifest, timeout } => {
            commands::up::run(&manifest, backend, uri, timeout, json_output)
        }
        Commands::Check { manifest } => commands::check::run(&manifest, json_output),
        Commands::Leases { network } => {
            commands::leases::run(backend, uri, &network, json_output)
        }
        Commands::Type {
            domain,
            text,
            enter,
            delay_ms,
        } => commands::type_text::run(backend, uri, &domain, &text, enter, delay_ms),
        Commands::Gc { clone_dir, dry_run } => {
            commands::gc::run(backend, uri, &clone_dir, dry_run, json_output)
        }
        Commands::Doctor { clone_dir } => {
            commands::doctor::run(backend, uri, &clone_dir, json_output)
        }
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest error:")
                || msg.starts_with("failed to parse manifest")
                || msg.starts_with("failed to read manifest")
            {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("store lock:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
