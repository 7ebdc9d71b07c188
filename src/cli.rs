use clap::{Args, Parser, Subcommand};
use smartdo::config::Provider;
use smartdo::filter::Filter;
use smartdo::grouping::Granularity;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "smartdo",
    version,
    about = "Task list with manual ordering, date buckets and AI planning"
)]
pub struct Cli {
    /// Log at debug level
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a project task list in the current directory
    Init {
        /// Add a few demo tasks
        #[arg(long)]
        samples: bool,
    },
    /// List tasks grouped by due date
    List {
        #[arg(long, value_enum, default_value_t = Filter::All)]
        filter: Filter,
        /// Bucket size
        #[arg(long, value_enum, default_value_t = Granularity::Day)]
        group: Granularity,
    },
    /// Add a task (due today unless told otherwise)
    Add {
        /// Task text, or the goal to break down with --ai
        text: String,
        /// Due date in YYYY-MM-DD format
        #[arg(long, conflicts_with = "no_due")]
        due: Option<String>,
        /// Add without a due date
        #[arg(long)]
        no_due: bool,
        /// Break the text down into subtasks with the AI assistant
        #[arg(long)]
        ai: bool,
    },
    /// Toggle a task between active and completed
    Done {
        /// Task id or unique prefix
        id: String,
    },
    /// Edit an existing task
    Edit(EditArgs),
    /// Delete a task
    Rm {
        id: String,
    },
    /// Reorder a task or move it to another bucket
    Move {
        id: String,
        /// Place the task where this task currently is
        #[arg(long, conflicts_with = "to_bucket", required_unless_present = "to_bucket")]
        before: Option<String>,
        /// Move to the top of a bucket (e.g. 2024-05-01, 2024-05, 2024, no-date)
        #[arg(long)]
        to_bucket: Option<String>,
        #[arg(long, value_enum, default_value_t = Granularity::Day)]
        group: Granularity,
        #[arg(long, value_enum, default_value_t = Filter::All)]
        filter: Filter,
    },
    /// Show every field of a task
    Show {
        id: String,
    },
    /// Attach an image file to a task's notes
    Attach {
        id: String,
        file: PathBuf,
        /// Alt text (defaults to the file name)
        #[arg(long)]
        alt: Option<String>,
    },
    /// Summarize one bucket with the AI assistant
    Summarize {
        /// Bucket key as printed by `list`
        bucket: String,
        #[arg(long, value_enum, default_value_t = Granularity::Day)]
        group: Granularity,
        #[arg(long, value_enum, default_value_t = Filter::All)]
        filter: Filter,
    },
    /// Show or change AI settings
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Store a local profile
    Login {
        #[arg(long)]
        name: Option<String>,
    },
    /// Forget the local profile
    Logout,
    /// Launch the interactive TUI
    Tui,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    pub id: String,
    /// New text
    #[arg(long)]
    pub text: Option<String>,
    /// Set due date (YYYY-MM-DD)
    #[arg(long, conflicts_with = "clear_due")]
    pub due: Option<String>,
    #[arg(long)]
    pub clear_due: bool,
    /// Set start date (YYYY-MM-DD)
    #[arg(long, conflicts_with = "clear_start")]
    pub start: Option<String>,
    #[arg(long)]
    pub clear_start: bool,
    #[arg(long, conflicts_with = "not_important")]
    pub important: bool,
    #[arg(long)]
    pub not_important: bool,
    /// Replace the notes
    #[arg(long, conflicts_with = "clear_note")]
    pub note: Option<String>,
    #[arg(long)]
    pub clear_note: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the current settings
    Show,
    /// Change one or more settings
    Set(ConfigSetArgs),
    /// Send a test prompt with the current settings
    Test,
}

#[derive(Args, Debug)]
pub struct ConfigSetArgs {
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,
    /// Empty string removes the stored key
    #[arg(long)]
    pub api_key: Option<String>,
    #[arg(long)]
    pub base_url: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    /// Decomposition template; `{{goal}}` is replaced
    #[arg(long)]
    pub task_prompt: Option<String>,
    /// Summary template; `{{groupName}}`, `{{taskList}}`, `{{detailLevel}}` are replaced
    #[arg(long)]
    pub summary_prompt: Option<String>,
    /// Restore the default prompt templates
    #[arg(long)]
    pub reset_prompts: bool,
}
