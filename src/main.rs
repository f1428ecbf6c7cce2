//! Cheatbase - Command Line Interface
//!
//! This binary browses a remote cheat-code database without downloading it.
//! Every command opens a lazy session against the configured database and
//! fetches only the SQLite pages the statement actually touches.
//!
//! # Commands
//!
//! - **`systems`** - Lists all system groups with their game counts
//! - **`games <system_id>`** - Lists the games available under a system group
//! - **`codes <game_uid>`** - Prints the cheat codes for one game
//!
//! # Database Selection
//!
//! The database location is resolved in order:
//! 1. The `--db=<location>` flag
//! 2. The `CHEATBASE_DB` environment variable
//! 3. The origin policy: local origins use `data/bsfree.db`, anything else
//!    the published remote copy
//!
//! # Usage Examples
//!
//! ```bash
//! # List all systems
//! cheatbase systems
//!
//! # List games for system group 3
//! cheatbase games 3
//!
//! # Print the codes for game 1234, against a local database copy
//! cheatbase --db=data/bsfree.db codes 1234
//! ```
//!
//! # Exit Codes
//!
//! - `0` - Success
//! - `1` - General error (invalid arguments, transport failure, SQL failure)

use std::env;
use std::process;

use cheatbase::catalog;
use cheatbase::{QueryClient, RemoteSource};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = env::args().collect();

    // Handle --help flag
    if args.len() == 2 && (args[1] == "--help" || args[1] == "-h") {
        print_help();
        return;
    }

    // Peel off the --db flag wherever it appears
    let mut source = None;
    args.retain(|arg| match arg.strip_prefix("--db=") {
        Some(location) => {
            source = Some(RemoteSource::new(location));
            false
        }
        None => true,
    });
    let source = source.unwrap_or_else(RemoteSource::from_environment);

    if args.len() < 2 {
        eprintln!("Error: Not enough arguments\n");
        print_help();
        process::exit(1);
    }

    let command = &args[1];
    let client = QueryClient::new(source);

    match command.as_str() {
        "systems" => {
            if args.len() != 2 {
                eprintln!("Error: 'systems' command takes no arguments\n");
                print_help();
                process::exit(1);
            }
            handle_systems(&client).await;
        }
        "games" => {
            if args.len() != 3 {
                eprintln!("Error: 'games' command requires exactly one system id\n");
                print_help();
                process::exit(1);
            }
            let system_id = parse_id(&args[2], "system id");
            handle_games(&client, system_id).await;
        }
        "codes" => {
            if args.len() != 3 {
                eprintln!("Error: 'codes' command requires exactly one game uid\n");
                print_help();
                process::exit(1);
            }
            let game_uid = parse_id(&args[2], "game uid");
            handle_codes(&client, game_uid).await;
        }
        _ => {
            eprintln!("Error: Unknown command '{}'\n", command);
            print_help();
            process::exit(1);
        }
    }

    tracing::debug!(
        bytes_read = client.total_bytes_read(),
        "session finished"
    );
}

fn parse_id(raw: &str, what: &str) -> i64 {
    match raw.parse() {
        Ok(id) => id,
        Err(_) => {
            eprintln!("Error: '{}' is not a valid {}\n", raw, what);
            print_help();
            process::exit(1);
        }
    }
}

/// Handles the `systems` command.
///
/// Prints one line per system group: id, name, and the number of games
/// rolled up over the group's member systems.
async fn handle_systems(client: &QueryClient) {
    match catalog::get_systems(client).await {
        Ok(systems) => {
            for system in &systems {
                println!("{:>6}  {} ({} games)", system.id, system.name, system.qty);
            }
            println!("\n{} systems", systems.len());
        }
        Err(e) => {
            eprintln!("✗ Error listing systems: {}", e);
            process::exit(1);
        }
    }
}

/// Handles the `games <system_id>` command.
///
/// Prints every game release under the system group, one line per database
/// row, formatted as `uid  name [version] (device, codes)`.
async fn handle_games(client: &QueryClient, system_id: i64) {
    let heading = match catalog::get_system_name(client, system_id).await {
        Ok(Some(name)) => name,
        Ok(None) => {
            eprintln!("✗ No system with id {}", system_id);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("✗ Error resolving system {}: {}", system_id, e);
            process::exit(1);
        }
    };

    match catalog::get_games(client, system_id).await {
        Ok(games) => {
            println!("Games for {}\n", heading);
            for game in &games {
                let version = match &game.version {
                    Some(version) => format!(" [{}]", version),
                    None => String::new(),
                };
                println!(
                    "{:>6}  {}{} ({}, {} codes)",
                    game.uid, game.name, version, game.device.name, game.qty
                );
            }
            println!("\n{} games", games.len());
        }
        Err(e) => {
            eprintln!("✗ Error listing games: {}", e);
            process::exit(1);
        }
    }
}

/// Handles the `codes <game_uid>` command.
///
/// Prints the sectionless codes first, then each section with its codes.
/// Notes and author credits are printed indented under their code.
async fn handle_codes(client: &QueryClient, game_uid: i64) {
    let heading = match catalog::get_game_name(client, game_uid).await {
        Ok(Some(name)) => name,
        Ok(None) => {
            eprintln!("✗ No game with uid {}", game_uid);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("✗ Error resolving game {}: {}", game_uid, e);
            process::exit(1);
        }
    };

    match catalog::get_codes_list(client, game_uid).await {
        Ok(list) => {
            println!("Codes for {}", heading);
            print_codes(&list.codes);
            for section in &list.sections {
                println!("\n## {}", section.name);
                print_codes(&section.codes);
            }
        }
        Err(e) => {
            eprintln!("✗ Error listing codes: {}", e);
            process::exit(1);
        }
    }
}

fn print_codes(codes: &[catalog::Code]) {
    for code in codes {
        println!("\n{}", code.name);
        for line in code.code.lines() {
            println!("  {}", line);
        }
        if let Some(note) = &code.note {
            for line in note.lines() {
                println!("  note: {}", line);
            }
        }
        if let Some(author) = &code.author {
            println!("  by {}", author.name);
        }
    }
}

/// Prints usage information for the CLI.
fn print_help() {
    let program = env::args()
        .next()
        .unwrap_or_else(|| "cheatbase".to_string());
    println!("Cheatbase Remote Database Browser");
    println!();
    println!("USAGE:");
    println!("  {} [--db=<location>] systems", program);
    println!("  {} [--db=<location>] games <system_id>", program);
    println!("  {} [--db=<location>] codes <game_uid>", program);
    println!("  {} --help", program);
    println!();
    println!("COMMANDS:");
    println!("  systems            List all system groups with game counts");
    println!("  games              List games available under a system group");
    println!("  codes              Print the cheat codes for one game");
    println!();
    println!("OPTIONS:");
    println!("  --db=<location>    Database location: http(s) URL or local path");
    println!("  --help, -h         Show this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("  CHEATBASE_DB       Database location, used when --db is absent");
    println!("  CHEATBASE_ORIGIN   Origin for local-vs-remote default selection");
    println!();
    println!("EXAMPLES:");
    println!("  # List all systems from the published database");
    println!("  {} systems", program);
    println!();
    println!("  # List games for system group 3 from a local copy");
    println!("  {} --db=data/bsfree.db games 3", program);
    println!();
    println!("NOTE:");
    println!("  - The database is never downloaded in full; only the pages a");
    println!("    statement touches are fetched with HTTP range requests");
    println!("  - Set RUST_LOG=cheatbase=info to see per-statement transfer stats");
}
