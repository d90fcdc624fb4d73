use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use vcsbot::App;
use vcsbot::PlatformConfig;
use vcsbot::new_platform;
use vcsbot::platform::RepositoryListOpts;
use vcsbot::task::ScriptTask;

#[derive(Parser)]
#[command(name = "vcsbot")]
#[command(about = "Run repository automation tasks against GitHub or GitLab", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run shell lines in every repository and open a merge request with the result
    Run {
        /// Task name used in logs
        #[arg(long, default_value = "script")]
        name: String,
        /// Branch to commit to (force-updated)
        #[arg(short, long)]
        branch: String,
        /// Commit message, also the merge request title unless --title is set
        #[arg(short, long)]
        message: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// Merge request idempotency key (defaults to the branch)
        #[arg(long)]
        key: Option<String>,
        /// Shell lines, each run with `bash -c`
        #[arg(required = true, last = true)]
        script: Vec<String>,
    },
    /// List repositories
    Repos {
        /// Include branch names
        #[arg(long)]
        branches: bool,
        /// Include the default branch head commit
        #[arg(long)]
        commit_hash: bool,
        /// Include the owner's plan
        #[arg(long)]
        plan: bool,
        #[arg(long)]
        json: bool,
    },
    /// List open merge requests across all repositories
    MergeRequests {
        #[arg(long)]
        json: bool,
    },
}

fn setup_logging() -> Result<()> {
    let timer = tracing_subscriber::fmt::time::ChronoLocal::new("%H:%M:%S%.3f".into());
    let format = tracing_subscriber::fmt::format().with_timer(timer);
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;
    let subscriber = tracing_subscriber::fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr)
        .with_filter(filter);
    tracing_subscriber::registry().with(subscriber).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging()?;

    let config = PlatformConfig::from_env()?;
    let app = App::new(new_platform(&config)?);

    match cli.command {
        Commands::Run {
            name,
            branch,
            message,
            title,
            description,
            key,
            script,
        } => {
            let mut task = ScriptTask::new(&name, &branch, &message, script);
            task.title = title.unwrap_or(message);
            task.description = description;
            if let Some(key) = key {
                task.key = key;
            }
            app.cmd_run(task, &mut std::io::stdout()).await?
        }
        Commands::Repos {
            branches,
            commit_hash,
            plan,
            json,
        } => {
            let opts = RepositoryListOpts {
                include_branches: branches,
                include_commit_hash: commit_hash,
                include_plan: plan,
            };
            app.cmd_repos(opts, json, &mut std::io::stdout()).await?
        }
        Commands::MergeRequests { json } => {
            app.cmd_merge_requests(json, &mut std::io::stdout()).await?
        }
    }

    Ok(())
}
