mod cli;
mod db;
mod error;
mod fmt;
mod importer;
mod mapping;
mod models;
mod normalizer;
mod session;
mod settings;
mod submit;
mod tokenizer;
mod validator;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, GroupsCommands, MembersCommands};

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PENNYWISE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Groups { command } => match command {
            GroupsCommands::Add { name } => cli::groups::add(&name),
            GroupsCommands::List => cli::groups::list(),
        },
        Commands::Members { command } => match command {
            MembersCommands::Add {
                group,
                full_name,
                email,
            } => cli::members::add(&group, &full_name, email.as_deref()),
            MembersCommands::List { group } => cli::members::list(&group),
            MembersCommands::Import { group, file } => cli::members::import(&group, &file),
        },
        Commands::Validate { files, format } => cli::validate::run(&files, format.as_deref()),
        Commands::Identities {
            files,
            group,
            format,
        } => cli::identities::run(&files, group.as_deref(), format.as_deref()),
        Commands::Import {
            files,
            group,
            format,
            map,
            ignore,
            allow_ignored,
            json,
        } => cli::import::run(
            &files,
            group.as_deref(),
            format.as_deref(),
            &map,
            &ignore,
            allow_ignored,
            json,
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
