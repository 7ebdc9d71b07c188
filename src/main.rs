mod cli;
mod commands;
mod ui;

use anyhow::Result;
use clap::Parser;
use smartdo::logging::{self, LogTarget};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let command = args.command.unwrap_or(cli::Command::Tui);
    let target = match command {
        cli::Command::Tui => LogTarget::File(commands::log_path()?),
        _ => LogTarget::Stderr,
    };
    logging::init(target, args.verbose)?;

    match command {
        cli::Command::Init { samples } => commands::init(samples),
        cli::Command::List { filter, group } => commands::list(filter, group),
        cli::Command::Add {
            text,
            due,
            no_due,
            ai,
        } => commands::add(text, due, no_due, ai).await,
        cli::Command::Done { id } => commands::done(id),
        cli::Command::Edit(edit) => commands::edit(edit),
        cli::Command::Rm { id } => commands::remove(id),
        cli::Command::Move {
            id,
            before,
            to_bucket,
            group,
            filter,
        } => commands::move_task(id, before, to_bucket, group, filter),
        cli::Command::Show { id } => commands::show(id),
        cli::Command::Attach { id, file, alt } => commands::attach(id, file, alt),
        cli::Command::Summarize {
            bucket,
            group,
            filter,
        } => commands::summarize(bucket, group, filter).await,
        cli::Command::Config { action } => match action {
            cli::ConfigCommand::Show => commands::config_show(),
            cli::ConfigCommand::Set(set) => commands::config_set(set),
            cli::ConfigCommand::Test => commands::config_test().await,
        },
        cli::Command::Login { name } => commands::login(name),
        cli::Command::Logout => commands::logout(),
        cli::Command::Tui => commands::tui(),
    }
}
