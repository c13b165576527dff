//! `autoloop` command-line entry point.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use autoloop::io::init::ProjectPaths;
use autoloop::{cli, exit_codes, logging};

#[derive(Parser)]
#[command(
    name = "autoloop",
    version,
    about = "Run an autonomous coding agent on a fixed cadence"
)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `autoloop.toml`, `PROMPT.md` and the project directories.
    Init {
        /// Overwrite existing config and prompt.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the cycle loop until stopped.
    Run {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Print the state snapshot and control status as JSON.
    Status,
    /// List retained cycle logs, newest first, or tail the operator log.
    Logs {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        /// Print one log by name.
        #[arg(long)]
        show: Option<String>,
        /// Tail the operator log (`logs/auto-company.log`) instead.
        #[arg(long, conflicts_with = "show")]
        main: bool,
    },
    /// Ask a running loop to exit after the current cycle.
    Stop,
    /// Suspend new cycles.
    Pause,
    /// Resume after a pause.
    Resume,
    /// Run a cycle at the next tick, even while paused.
    Start,
    /// Manage the idea approval queue.
    Idea {
        #[command(subcommand)]
        command: IdeaCommand,
    },
}

#[derive(Subcommand)]
enum IdeaCommand {
    /// Queue a new idea and print its id.
    Submit {
        text: String,
        /// 1 (lowest) to 10 (highest); out-of-range values are clamped.
        #[arg(short, long, default_value_t = 5, allow_negative_numbers = true)]
        priority: i64,
        /// Also trigger a cycle for this idea right away.
        #[arg(long)]
        now: bool,
    },
    Approve {
        id: String,
    },
    Reject {
        id: String,
    },
    /// Change an idea's priority.
    Priority {
        id: String,
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    /// List the active queue in priority order.
    List {
        /// Rebuild the index from the idea records first.
        #[arg(long)]
        repair: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = execute(cli) {
        eprintln!("{err:#}");
        std::process::exit(exit_codes::for_error(&err));
    }
}

fn execute(cli: Cli) -> Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    match cli.command {
        Command::Run { .. } => {
            let operator_log = ProjectPaths::new(&root).operator_log_path;
            logging::init(logging::LOOP_FILTER, Some(&operator_log));
        }
        _ => logging::init(logging::COMMAND_FILTER, None),
    }
    dispatch(cli.command, &root)
}

fn dispatch(command: Command, root: &Path) -> Result<()> {
    match command {
        Command::Init { force } => cli::init(root, force),
        Command::Run { once } => cli::run(root, once),
        Command::Status => cli::status(root),
        Command::Logs { limit, show, main } => cli::logs(root, limit, show.as_deref(), main),
        Command::Stop => cli::stop(root),
        Command::Pause => cli::pause(root),
        Command::Resume => cli::resume(root),
        Command::Start => cli::start(root),
        Command::Idea { command } => match command {
            IdeaCommand::Submit {
                text,
                priority,
                now,
            } => cli::idea_submit(root, &text, priority, now),
            IdeaCommand::Approve { id } => cli::idea_approve(root, &id),
            IdeaCommand::Reject { id } => cli::idea_reject(root, &id),
            IdeaCommand::Priority { id, value } => cli::idea_priority(root, &id, value),
            IdeaCommand::List { repair } => cli::idea_list(root, repair),
        },
    }
}
