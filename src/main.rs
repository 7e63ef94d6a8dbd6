//! Gatekeeper CLI - validation orchestration and workflow state machine

use clap::Parser;
use gatekeeper::cli::commands;
use gatekeeper::cli::{Cli, Commands};
use gatekeeper::errors::to_exit_code;
use gatekeeper::workflow::ValidateOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over the verbosity flags
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let json = cli.json;
    let result = run(cli).await;

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            if json {
                let body = serde_json::json!({ "code": e.code(), "message": e.to_string() });
                eprintln!("{}", body);
            } else {
                eprintln!("Error: {}", e);
            }
            std::process::exit(to_exit_code(&e));
        }
    }
}

async fn run(cli: Cli) -> gatekeeper::Result<()> {
    let cwd = cli.cwd.as_deref();
    let json = cli.json;
    match cli.command {
        Some(Commands::Status) => commands::status::run(cwd, json).await,
        Some(Commands::Show { entity_type, id }) => {
            commands::show::run(cwd, entity_type, &id, json).await
        }
        Some(Commands::Transition {
            entity_type,
            id,
            state,
            session,
        }) => {
            commands::transition::run(cwd, entity_type, &id, &state, session.as_deref(), json)
                .await
        }
        Some(Commands::Claim { task, session }) => {
            commands::claim::run(cwd, &task, &session, json).await
        }
        Some(Commands::Report {
            task,
            file,
            session,
        }) => {
            commands::report::run(cwd, &task, file.as_deref(), session.as_deref(), json).await
        }
        Some(Commands::Validate {
            task,
            session,
            wave,
            check_only,
            sequential,
            preset,
            changed,
        }) => {
            let options = ValidateOptions {
                wave,
                check_only,
                sequential,
                preset,
                changed_files: if changed.is_empty() { None } else { Some(changed) },
                ..Default::default()
            };
            commands::validate::run(cwd, &task, session.as_deref(), options, json).await
        }
        Some(Commands::Evidence {
            task,
            round,
            preflight,
        }) => commands::evidence::run(cwd, &task, round, preflight, json).await,
        Some(Commands::Unlock { task, force }) => {
            commands::unlock::run(cwd, &task, force, json).await
        }
        None => {
            // Default to showing help - clap handles this
            println!("Use --help for usage information");
            Ok(())
        }
    }
}
