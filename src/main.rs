// SPDX-License-Identifier: MIT

//! sandbox-broker command line.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, fmt};

use sandbox_broker::args::{self, ArgumentBuilder};
use sandbox_broker::{BrokerConfig, BrokerError, Identity, IpcChannel};

/// Launch the game client in a sandbox and broker its access to the host.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (JSON).  Missing means defaults.
    #[arg(short, long, default_value = "sandbox-broker.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the argument envelope for the given arguments.
    Encode {
        /// Launch key; decimal or 0x-prefixed hex.  Defaults to one derived from the tick count.
        #[arg(short, long, value_parser = parse_key)]
        key: Option<u32>,

        /// Argument as KEY=VALUE; repeatable, order is kept.
        #[arg(short = 'a', long = "arg", value_parser = parse_pair)]
        args: Vec<(String, String)>,
    },

    /// Print the arguments inside an envelope.
    Decode {
        #[arg(short, long, value_parser = parse_key)]
        key: u32,

        envelope: String,
    },

    /// Serve the control channel until standard input closes.
    Serve {
        /// Overrides the configured endpoint.
        #[arg(long)]
        endpoint: Option<String>,

        /// Identity allowed to connect: a SID string on Windows, a uid elsewhere.
        #[arg(long = "allow")]
        allow: Vec<String>,

        /// Also allow the sandbox container.
        #[cfg(target_os = "windows")]
        #[arg(long, default_value = "false")]
        allow_container: bool,
    },

    /// Start the game inside the sandbox.
    #[cfg(target_os = "windows")]
    Launch {
        /// Overrides the configured executable.
        #[arg(long)]
        exe: Option<PathBuf>,

        /// Overrides the configured working directory.
        #[arg(long)]
        cwd: Option<PathBuf>,

        #[arg(short, long, value_parser = parse_key)]
        key: Option<u32>,

        /// Extra argument as KEY=VALUE, after the configured ones.
        #[arg(short = 'a', long = "arg", value_parser = parse_pair)]
        args: Vec<(String, String)>,

        /// Leave the main thread suspended and print the pid.
        #[arg(long, default_value = "false")]
        suspended: bool,

        /// Wait for the game to exit and return its exit code.
        #[arg(long, default_value = "false")]
        wait: bool,
    },

    /// Prepare directory permissions for the sandbox.  Best run elevated.
    #[cfg(target_os = "windows")]
    Setup {
        #[arg(long)]
        game: PathBuf,

        /// Defaults to "Documents\My Games\FINAL FANTASY XIV - A Realm Reborn".
        #[arg(long)]
        game_config: Option<PathBuf>,

        /// Defaults to "%APPDATA%\XIVLauncher".
        #[arg(long)]
        launcher_data: Option<PathBuf>,

        /// Defaults to the directory holding this program.
        #[arg(long)]
        framework: Option<PathBuf>,
    },

    /// Show the sandbox container's identity.
    #[cfg(target_os = "windows")]
    Info,
}

fn parse_key(s: &str) -> Result<u32, String> {
    let r = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    r.map_err(|e| format!("invalid launch key '{s}': {e}"))
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, BrokerError> {
    let config = BrokerConfig::load(&cli.config)?;
    match cli.command {
        Command::Encode { key, args: pairs } => {
            let key = key.unwrap_or_else(args::current_launch_key);
            info!(key = %format!("{key:#010x}"), "encoding arguments");
            let builder: ArgumentBuilder = pairs.into_iter().collect();
            println!("{}", builder.build_encrypted(key)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Decode { key, envelope } => {
            let builder = ArgumentBuilder::decode(&envelope, key)?;
            for (k, v) in builder.arguments() {
                println!("{k}={v}");
            }
            Ok(ExitCode::SUCCESS)
        }
        #[cfg(target_os = "windows")]
        Command::Serve { endpoint, allow, allow_container } => {
            let mut allowed = parse_identities(&allow)?;
            if allow_container {
                let c = &config.container;
                let profile = sandbox_broker::SandboxProfile::get_or_create(&c.name, &c.display_name, &c.description)?;
                let sid = profile.sid().to_string_sid().map_err(BrokerError::SandboxCreation)?;
                allowed.push(Identity::Sid(sid));
            }
            serve(&config, endpoint, &allowed)
        }
        #[cfg(not(target_os = "windows"))]
        Command::Serve { endpoint, allow } => {
            let allowed = parse_identities(&allow)?;
            serve(&config, endpoint, &allowed)
        }
        #[cfg(target_os = "windows")]
        Command::Launch { exe, cwd, key, args, suspended, wait } => {
            windows_cli::launch(&config, exe, cwd, key, args, suspended, wait)
        }
        #[cfg(target_os = "windows")]
        Command::Setup { game, game_config, launcher_data, framework } => {
            windows_cli::setup(&config, game, game_config, launcher_data, framework)
        }
        #[cfg(target_os = "windows")]
        Command::Info => windows_cli::info(&config),
    }
}

#[cfg(target_os = "windows")]
fn parse_identities(allow: &[String]) -> Result<Vec<Identity>, BrokerError> {
    Ok(allow.iter().map(|s| Identity::Sid(s.clone())).collect())
}

#[cfg(not(target_os = "windows"))]
fn parse_identities(allow: &[String]) -> Result<Vec<Identity>, BrokerError> {
    allow
        .iter()
        .map(|s| {
            s.parse::<u32>()
                .map(Identity::Uid)
                .map_err(|e| BrokerError::Config(format!("invalid uid '{s}': {e}")))
        })
        .collect()
}

fn serve(config: &BrokerConfig, endpoint: Option<String>, allowed: &[Identity]) -> Result<ExitCode, BrokerError> {
    let endpoint = endpoint.unwrap_or_else(|| config.ipc.endpoint.clone());
    let mut channel = IpcChannel::open(&endpoint, allowed)?.with_max_payload_size(config.ipc.max_payload_size);
    channel.start()?;
    info!(%endpoint, "serving; close standard input to stop");
    let mut sink = Vec::new();
    let _ = std::io::stdin().read_to_end(&mut sink);
    channel.stop()?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(target_os = "windows")]
mod windows_cli {
    use std::path::{Path, PathBuf};
    use std::process::ExitCode;

    use tracing::{info, warn};

    use sandbox_broker::args::{self, ArgumentBuilder};
    use sandbox_broker::sandbox::setup::{self, SetupPaths};
    use sandbox_broker::{BrokerConfig, BrokerError, LaunchOptions, ProcessLauncher, SandboxProfile};

    pub fn launch(
        config: &BrokerConfig,
        exe: Option<PathBuf>,
        cwd: Option<PathBuf>,
        key: Option<u32>,
        extra: Vec<(String, String)>,
        suspended: bool,
        wait: bool,
    ) -> Result<ExitCode, BrokerError> {
        let exe = exe
            .or_else(|| config.game.executable.clone())
            .ok_or_else(|| BrokerError::Config("no game executable configured; pass --exe".to_string()))?;
        let mut arguments: ArgumentBuilder = config.game.argument_builder();
        for (k, v) in extra {
            arguments.push(k, v);
        }
        let key = key.unwrap_or_else(args::current_launch_key);
        let options = LaunchOptions {
            working_dir: cwd.or_else(|| config.game.working_dir.clone()),
            suspended,
            extra_args: Vec::new(),
        };

        let process = ProcessLauncher::new(config.container.clone()).launch_with(&exe, &arguments, key, &options)?;
        println!("{}", process.pid());
        if !wait {
            return Ok(ExitCode::SUCCESS);
        }
        if suspended {
            warn!("waiting on a suspended process; it must be resumed elsewhere");
        }
        let code = process.wait(None)?.unwrap_or(0);
        info!(pid = process.pid(), code, "game exited");
        Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
    }

    pub fn setup(
        config: &BrokerConfig,
        game: PathBuf,
        game_config: Option<PathBuf>,
        launcher_data: Option<PathBuf>,
        framework: Option<PathBuf>,
    ) -> Result<ExitCode, BrokerError> {
        let paths = SetupPaths {
            game,
            game_config: match game_config {
                Some(p) => p,
                None => default_game_config()?,
            },
            launcher_data: match launcher_data {
                Some(p) => p,
                None => env_dir("APPDATA")?.join("XIVLauncher"),
            },
            framework: match framework {
                Some(p) => p,
                None => own_directory()?,
            },
        };
        let c = &config.container;
        let profile = SandboxProfile::get_or_create(&c.name, &c.display_name, &c.description)?;
        let report = setup::apply(&profile, &setup::policy(&paths))?;
        info!(applied = report.applied.len(), skipped = report.skipped.len(), "setup complete");
        Ok(ExitCode::SUCCESS)
    }

    pub fn info(config: &BrokerConfig) -> Result<ExitCode, BrokerError> {
        let c = &config.container;
        let profile = SandboxProfile::get_or_create(&c.name, &c.display_name, &c.description)?;
        let sid = profile.sid().to_string_sid().map_err(BrokerError::SandboxCreation)?;
        println!("name:   {}", profile.name());
        println!("sid:    {sid}");
        println!("folder: {}", profile.folder_path()?.display());
        Ok(ExitCode::SUCCESS)
    }

    fn env_dir(name: &str) -> Result<PathBuf, BrokerError> {
        std::env::var_os(name)
            .map(PathBuf::from)
            .ok_or_else(|| BrokerError::Config(format!("environment variable {name} is not set")))
    }

    fn default_game_config() -> Result<PathBuf, BrokerError> {
        Ok(env_dir("USERPROFILE")?
            .join("Documents")
            .join("My Games")
            .join("FINAL FANTASY XIV - A Realm Reborn"))
    }

    fn own_directory() -> Result<PathBuf, BrokerError> {
        let exe = std::env::current_exe()?;
        exe.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| BrokerError::Config("cannot locate the program directory".to_string()))
    }
}
