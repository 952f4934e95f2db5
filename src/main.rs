use clap::{Parser, Subcommand};
use focusone_core::{run, PlanMode, RunnerCommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "focusone", version, about = "Resolve the active FocusOne plan window")]
struct Args {
    /// Workspace holding config/, state/ and logs/.
    #[arg(long, env = "FOCUSONE_WORKSPACE", default_value = ".focusone")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the current and next plan (default).
    Resolve {
        /// Refresh recurring plans from the backend first.
        #[arg(long)]
        sync: bool,
    },
    /// Print the stored plan lists and resolution state.
    State,
    /// List recurring plans relevant to a period (all, today, week, month).
    List {
        #[arg(long)]
        period: Option<String>,
    },
    /// Start a one-time plan now, lasting the given number of minutes.
    Once {
        minutes: u16,
        /// Allow-list mode instead of blocking.
        #[arg(long)]
        focus: bool,
    },
    /// Create a recurring plan on the backend.
    Create {
        start: String,
        end: String,
        /// Weekdays as a comma separated list, 0 = Sunday.
        #[arg(long, default_value = "1,2,3,4,5")]
        days: String,
        #[arg(long)]
        focus: bool,
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a recurring plan on the backend.
    Delete { plan_id: String },
    /// Skip a plan for the rest of today.
    Exit { plan_id: String },
    Pause,
    Resume,
    /// Finish the current plan early.
    Complete,
    /// Remove every plan and publish an empty schedule.
    Clear,
    /// Store the plan API access token in the OS keyring.
    Login { token: String },
}

impl From<Command> for RunnerCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::Resolve { sync } => Self::Resolve { sync },
            Command::State => Self::State,
            Command::List { period } => Self::List { period },
            Command::Once { minutes, focus } => Self::Once {
                minutes,
                mode: mode(focus),
            },
            Command::Create {
                start,
                end,
                days,
                focus,
                name,
            } => Self::Create {
                start,
                end,
                days,
                mode: mode(focus),
                name,
            },
            Command::Delete { plan_id } => Self::Delete { plan_id },
            Command::Exit { plan_id } => Self::Exit { plan_id },
            Command::Pause => Self::Pause,
            Command::Resume => Self::Resume,
            Command::Complete => Self::Complete,
            Command::Clear => Self::Clear,
            Command::Login { token } => Self::Login { token },
        }
    }
}

fn mode(focus: bool) -> PlanMode {
    if focus { PlanMode::Focus } else { PlanMode::Shield }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    let command = args
        .command
        .map(RunnerCommand::from)
        .unwrap_or(RunnerCommand::Resolve { sync: false });

    match run(args.workspace, command).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("focusone: {error}");
            ExitCode::FAILURE
        }
    }
}
