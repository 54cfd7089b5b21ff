use std::collections::BTreeMap;
use std::process;

use clap::{Parser, Subcommand};
use simple_defaults::{DefaultsBuilder, DefaultsConfig, DefaultsStore, Scope, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sdefaults")]
#[command(version)]
#[command(about = "Inspect and edit persisted device and user defaults", long_about = None)]
struct Args {
    /// Path to config file
    #[arg(
        short = 'c',
        long = "config",
        default_value = "defaults.toml",
        env = "SIMPLE_DEFAULTS_CONFIG"
    )]
    config: String,

    /// Storage directory, overrides storage.data_dir from the config
    #[arg(short = 'd', long = "data-dir")]
    data_dir: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init, // writes a sample defaults.toml
    /// Print the value stored under a key
    Get {
        /// device or user
        scope: Scope,
        key: String,
    },
    /// Store a value; parsed as JSON, or kept as a plain string if it isn't
    Set {
        /// device or user
        scope: Scope,
        key: String,
        value: String,
    },
    /// Remove a key
    Unset {
        /// device or user
        scope: Scope,
        key: String,
    },
    /// Remove every key in a namespace
    Reset {
        /// device or user
        scope: Scope,
    },
    /// Print a namespace (or both) as JSON
    Dump {
        /// device or user; both when omitted
        scope: Option<Scope>,
    },
    /// Force a durable sync of both namespaces
    Sync,
}

const INIT_CONFIG: &str = r#"# Key prefix: values are stored under "<root_key>.Device" and "<root_key>.User"
root_key = "SimpleDefaults"

# Seconds between background saves of changed namespaces
synchronize_interval_secs = 5.0

# Save and sync both namespaces when the store shuts down
final_flush_on_shutdown = true

# Log every get/set/reset at debug level
debug = false

[storage]
backend = "sled"
data_dir = "./defaults-data"

[sync]
# always | never | below_version
policy = "always"
"#;

/// Parse a command-line value: JSON if it parses, otherwise a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Str(raw.to_string()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config_path: &str, data_dir: Option<String>) -> DefaultsStore {
    let mut config = DefaultsConfig::load(config_path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", config_path, e);
        process::exit(1);
    });
    config.apply_env_overrides();
    if let Some(dir) = data_dir {
        config.storage.data_dir = dir;
    }

    DefaultsBuilder::from_config(&config)
        .and_then(DefaultsBuilder::build)
        .unwrap_or_else(|e| {
            eprintln!("Failed to open defaults store: {}", e);
            process::exit(1);
        })
}

fn synchronize_or_exit(store: &DefaultsStore, scope: Scope) {
    if let Err(e) = store.synchronize(scope) {
        eprintln!("Failed to synchronize {} defaults: {}", scope, e);
        process::exit(1);
    }
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to render JSON: {}", e);
            process::exit(1);
        }
    }
}

fn run_init(config_path: &str) {
    if std::path::Path::new(config_path).exists() {
        eprintln!("{} already exists", config_path);
        process::exit(1);
    }

    std::fs::write(config_path, INIT_CONFIG).unwrap_or_else(|e| {
        eprintln!("Failed to create {}: {}", config_path, e);
        process::exit(1);
    });

    println!("Created {}", config_path);
}

fn run_get(store: &DefaultsStore, scope: Scope, key: &str) {
    match store.namespace(scope).value(key) {
        Some(value) => println!("{}", value),
        None => {
            eprintln!("{} default {:?} is not set", scope, key);
            process::exit(1);
        }
    }
}

fn run_dump(store: &DefaultsStore, scope: Option<Scope>) {
    match scope {
        Some(scope) => print_json(&store.namespace(scope).entries()),
        None => {
            let all: BTreeMap<&str, BTreeMap<String, Value>> = Scope::ALL
                .iter()
                .map(|s| (s.as_str(), store.namespace(*s).entries()))
                .collect();
            print_json(&all);
        }
    }
}

fn run_command(store: &DefaultsStore, cmd: Command) {
    match cmd {
        // Needs no store; handled in main.
        Command::Init => {}
        Command::Get { scope, key } => run_get(store, scope, &key),
        Command::Set { scope, key, value } => {
            store.namespace(scope).set(&key, Some(parse_value(&value)));
            synchronize_or_exit(store, scope);
        }
        Command::Unset { scope, key } => {
            store.namespace(scope).set(&key, None);
            synchronize_or_exit(store, scope);
        }
        Command::Reset { scope } => {
            store.namespace(scope).reset();
            synchronize_or_exit(store, scope);
        }
        Command::Dump { scope } => run_dump(store, scope),
        Command::Sync => {
            for scope in Scope::ALL {
                synchronize_or_exit(store, scope);
            }
        }
    }
}

fn main() {
    init_tracing();
    let args = Args::parse();

    match args.cmd {
        Command::Init => run_init(&args.config),
        cmd => {
            let store = open_store(&args.config, args.data_dir);
            run_command(&store, cmd);
            store.shutdown();
        }
    }
}
