//! Pickett - make for the container world.
//!
//! ## Usage
//!
//! ```sh
//! pickett build [tags...]
//! pickett run <topology.service> [--rootname R] [--runvol SRC:DST]
//! pickett status [targets...]
//! pickett stop [topology.service...]
//! pickett drop <topology.service> [--rootname R]
//! pickett wipe [tags...]
//! pickett ps [topology.service...]
//! pickett inject <topology.service> <cmd...>
//! pickett etcdget <key>
//! pickett etcdset <key> <value>
//! pickett destroy
//! ```
//!
//! Global flags: `--debug/-d` for verbose logging, `--configFile/-f`
//! to use something other than `Pickett.json`.

use pickett::pathmap::{needs_translation, PathTranslator};
use pickett::signals::ShutdownStack;
use pickett::{
    commands, ContainerEngine, CoordStore, DockerEngine, EtcdStore, Orchestrator,
    OrchestratorOptions, RunVolume, Workspace, DEFAULT_CONFIG_FILE, ENGINE_HOST_ENV,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug, Default)]
struct Globals {
    debug: bool,
    config_file: String,
}

#[derive(Debug)]
enum Command {
    Build {
        tags: Vec<String>,
    },
    Run {
        target: String,
        root_name: Option<String>,
        run_vol: Option<String>,
    },
    Status {
        targets: Vec<String>,
    },
    Stop {
        targets: Vec<String>,
    },
    Drop {
        target: String,
        root_name: Option<String>,
    },
    Wipe {
        tags: Vec<String>,
    },
    Ps {
        targets: Vec<String>,
    },
    Inject {
        target: String,
        cmd: Vec<String>,
    },
    EtcdGet {
        key: String,
    },
    EtcdSet {
        key: String,
        value: String,
    },
    Destroy,
    Help,
}

fn parse_args() -> Result<(Globals, Command), String> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let mut globals = Globals {
        config_file: DEFAULT_CONFIG_FILE.to_string(),
        ..Default::default()
    };

    // Strip global flags wherever they appear; everything else stays in
    // positional order.
    let mut args = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--debug" | "-d" => {
                globals.debug = true;
                i += 1;
            }
            "--configFile" | "-f" => {
                if i + 1 < raw.len() {
                    globals.config_file = raw[i + 1].clone();
                    i += 2;
                } else {
                    return Err("--configFile requires a path".to_string());
                }
            }
            _ => {
                args.push(raw[i].clone());
                i += 1;
            }
        }
    }

    if args.is_empty() {
        return Ok((globals, Command::Help));
    }

    let rest = |from: usize| args[from..].to_vec();
    let command = match args[0].as_str() {
        "build" => Command::Build { tags: rest(1) },
        "run" => {
            let mut target = None;
            let mut root_name = None;
            let mut run_vol = None;
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "--rootname" => {
                        root_name = Some(take_value(&args, &mut i, "--rootname")?);
                    }
                    "--runvol" | "-r" => {
                        run_vol = Some(take_value(&args, &mut i, "--runvol")?);
                    }
                    other => {
                        if target.is_some() {
                            return Err(format!("run accepts one target, got '{other}' too"));
                        }
                        target = Some(other.to_string());
                        i += 1;
                    }
                }
            }
            Command::Run {
                target: target.ok_or("run requires <topology.service>")?,
                root_name,
                run_vol,
            }
        }
        "status" => Command::Status { targets: rest(1) },
        "stop" => Command::Stop { targets: rest(1) },
        "drop" => {
            let mut target = None;
            let mut root_name = None;
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "--rootname" => {
                        root_name = Some(take_value(&args, &mut i, "--rootname")?);
                    }
                    other => {
                        target = Some(other.to_string());
                        i += 1;
                    }
                }
            }
            Command::Drop {
                target: target.ok_or("drop requires <topology.service>")?,
                root_name,
            }
        }
        "wipe" => Command::Wipe { tags: rest(1) },
        "ps" => Command::Ps { targets: rest(1) },
        "inject" => {
            if args.len() < 3 {
                return Err("inject requires <topology.service> <cmd...>".to_string());
            }
            Command::Inject {
                target: args[1].clone(),
                cmd: rest(2),
            }
        }
        "etcdget" => Command::EtcdGet {
            key: args.get(1).cloned().ok_or("etcdget requires <key>")?,
        },
        "etcdset" => {
            if args.len() < 3 {
                return Err("etcdset requires <key> <value>".to_string());
            }
            Command::EtcdSet {
                key: args[1].clone(),
                value: args[2].clone(),
            }
        }
        "destroy" => Command::Destroy,
        "help" | "--help" | "-h" => Command::Help,
        unknown => return Err(format!("unknown command: {unknown}")),
    };
    Ok((globals, command))
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
    if *i + 1 < args.len() {
        let value = args[*i + 1].clone();
        *i += 2;
        Ok(value)
    } else {
        Err(format!("{flag} requires a value"))
    }
}

fn print_help() {
    println!(
        r#"pickett - make for the container world

USAGE:
    pickett [flags] <command> [args]

COMMANDS:
    build [tags...]                      Build all tags or the given tags
    run <topology.service>               Run a service and its dependencies
        [--rootname R] [--runvol S:D]
    status [targets...]                  Freshness of tags and instances
    stop [topology.service...]           Stop running instances
    drop <topology.service> [--rootname R]
                                         Stop and remove instance containers
    wipe [tags...]                       Remove built images (forces rebuild)
    ps [topology.service...]             docker-ps-like instance listing
    inject <topology.service> <cmd...>   Run a command in instance 0
    etcdget <key>                        Read a raw store key
    etcdset <key> <value>                Write a raw store key
    destroy                              Remove everything, wipe the store

FLAGS:
    --debug, -d            Verbose logging
    --configFile, -f PATH  Configuration file (default: Pickett.json)
"#
    );
}

// =============================================================================
// Main
// =============================================================================

fn default_root_name() -> String {
    std::env::var("USER").unwrap_or_else(|_| "pickett".to_string())
}

async fn dispatch(globals: &Globals, command: Command) -> pickett::Result<i64> {
    let store = Arc::new(EtcdStore::from_env()?);

    // The raw store commands don't need a configuration at all.
    match &command {
        Command::EtcdGet { key } => {
            if let Some(value) = store.get(key).await? {
                println!("{value}");
            }
            return Ok(0);
        }
        Command::EtcdSet { key, value } => {
            store.put(key, value).await?;
            return Ok(0);
        }
        _ => {}
    }

    let config_path = std::path::absolute(&globals.config_file)?;
    let workspace = Workspace::new(&config_path).map_err(|_| {
        let cwd = std::env::current_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        pickett::Error::Config(format!("{} not found (cwd: {})", globals.config_file, cwd))
    })?;

    let engine = Arc::new(DockerEngine::from_env()?);
    engine.ping().await?;
    store.ping().await?;

    let engine_host = std::env::var(ENGINE_HOST_ENV).unwrap_or_default();
    let translator = if needs_translation(&engine_host) {
        Some(PathTranslator::discover().await)
    } else {
        None
    };

    let (root_name, run_volume) = match &command {
        Command::Run {
            root_name, run_vol, ..
        } => (
            root_name.clone().unwrap_or_else(default_root_name),
            run_vol
                .as_deref()
                .map(str::parse::<RunVolume>)
                .transpose()?,
        ),
        Command::Drop { root_name, .. } => (
            root_name.clone().unwrap_or_else(default_root_name),
            None,
        ),
        _ => (default_root_name(), None),
    };

    let text = workspace.config_text()?;
    let mut core = Orchestrator::from_config_text(
        &text,
        workspace,
        engine.clone(),
        store,
        OrchestratorOptions {
            root_name,
            translator,
            run_volume,
        },
    )
    .await?;

    // An interrupt mid-run stops whatever containers this invocation
    // started before the process exits.
    let shutdown = ShutdownStack::new();
    let orphans = core.orphans();
    let cleanup_engine = engine.clone();
    shutdown.push("stop orphan containers", move || async move {
        let names: Vec<String> = orphans.lock().unwrap().drain(..).collect();
        for name in names {
            if let Err(e) = cleanup_engine.stop(&name).await {
                error!("couldn't stop {}: {}", name, e);
            }
        }
    });
    shutdown.install();

    match command {
        Command::Build { tags } => {
            commands::build(&mut core, &tags).await?;
            Ok(0)
        }
        Command::Run { target, .. } => commands::run(&mut core, &target).await,
        Command::Status { targets } => {
            commands::status(&mut core, &targets).await?;
            Ok(0)
        }
        Command::Stop { targets } => {
            commands::stop(&mut core, &targets).await?;
            Ok(0)
        }
        Command::Drop { target, .. } => {
            commands::drop_target(&mut core, &target).await?;
            Ok(0)
        }
        Command::Wipe { tags } => {
            commands::wipe(&mut core, &tags).await?;
            Ok(0)
        }
        Command::Ps { targets } => {
            commands::ps(&mut core, &targets).await?;
            Ok(0)
        }
        Command::Inject { target, cmd } => commands::inject(&mut core, &target, &cmd).await,
        Command::Destroy => {
            commands::destroy(&mut core).await?;
            Ok(0)
        }
        Command::EtcdGet { .. } | Command::EtcdSet { .. } | Command::Help => Ok(0),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let (globals, command) = match parse_args() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("error: {e}");
            print_help();
            return ExitCode::FAILURE;
        }
    };

    if matches!(command, Command::Help) {
        print_help();
        return ExitCode::SUCCESS;
    }

    let filter = if globals.debug { "pickett=debug" } else { "pickett=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match dispatch(&globals, command).await {
        Ok(code) => ExitCode::from((code.clamp(0, 255)) as u8),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
