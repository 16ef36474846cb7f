use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::Path;
use storyboard::{App, BranchStatus, Config, Database, Templates};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "storyboard")]
#[command(author, version, about = "Story tracker: bugs, feature requests and the tasks that deliver them")]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create .storyboard/ with a database, config and the default milestone
    Init,

    /// Start the web interface
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage branches
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Manage milestones
    Milestone {
        #[command(subcommand)]
        action: MilestoneAction,
    },

    /// Print a shell completion script
    Completion {
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum UserAction {
    /// Register a user
    Add { username: String },
}

#[derive(Subcommand, Debug)]
enum ProjectAction {
    /// Register a project; the name is what story forms refer to
    Add {
        name: String,

        /// Human-readable title
        #[arg(long, default_value = "")]
        title: String,
    },
    /// List projects
    List,
}

#[derive(Subcommand, Debug)]
enum BranchAction {
    /// Register a branch
    Add {
        name: String,

        /// Name shown in task names, e.g. "havana"
        #[arg(long)]
        short_name: String,

        /// M (master), F (frozen) or R (released)
        #[arg(long, default_value = "M")]
        status: BranchStatus,

        /// YYYY-MM-DD
        #[arg(long)]
        release_date: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum MilestoneAction {
    /// Register a milestone on a branch
    Add {
        name: String,

        /// Branch name
        #[arg(long)]
        branch: String,

        /// Catch-all milestone for tasks without a target
        #[arg(long)]
        undefined: bool,

        #[arg(long)]
        released: bool,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("\x1b[31mError:\x1b[0m {}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> CliResult {
    match command {
        Command::Init => cmd_init(),
        Command::Serve { host, port } => cmd_serve(host, port),
        Command::User { action } => cmd_user(action),
        Command::Project { action } => cmd_project(action),
        Command::Branch { action } => cmd_branch(action),
        Command::Milestone { action } => cmd_milestone(action),
        Command::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "storyboard", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn cmd_init() -> CliResult {
    let dir = Path::new(".storyboard");
    std::fs::create_dir_all(dir)?;

    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        std::fs::write(&config_path, Config::default_toml())?;
        println!("Wrote {}", config_path.display());
    }

    let db = Database::open()?;
    println!("Database: {} (schema {})", Database::db_path().display(), storyboard::CURRENT_SCHEMA);
    if db.seed_defaults()? {
        println!("Created master branch with its undefined milestone");
    }
    Ok(())
}

fn cmd_serve(host: Option<String>, port: Option<u16>) -> CliResult {
    let mut config = Config::load();
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let db = Database::open()?;
    let templates = Templates::new()?;
    storyboard::serve::start(App::new(db, templates, config))?;
    Ok(())
}

fn cmd_user(action: UserAction) -> CliResult {
    let db = Database::open()?;
    match action {
        UserAction::Add { username } => {
            let user = db.create_user(&username)?;
            println!("Created user {} (id {})", user.username, user.id);
        }
    }
    Ok(())
}

fn cmd_project(action: ProjectAction) -> CliResult {
    let db = Database::open()?;
    match action {
        ProjectAction::Add { name, title } => {
            let project = db.create_project(&name, &title)?;
            println!("Created project {} (id {})", project.name, project.id);
        }
        ProjectAction::List => {
            let projects = db.list_projects()?;
            if projects.is_empty() {
                println!("No projects yet. Add one with 'storyboard project add <name>'.");
            }
            for project in projects {
                println!("{:<5} {:<20} {}", project.id, project.name, project.title);
            }
        }
    }
    Ok(())
}

fn cmd_branch(action: BranchAction) -> CliResult {
    let db = Database::open()?;
    match action {
        BranchAction::Add {
            name,
            short_name,
            status,
            release_date,
        } => {
            if let Some(date) = release_date.as_deref() {
                chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map_err(|e| format!("Invalid release date '{}': {}", date, e))?;
            }
            let branch = db.create_branch(&name, &short_name, status, release_date.as_deref())?;
            println!("Created branch {} (id {}, status {})", branch.name, branch.id, branch.status);
        }
    }
    Ok(())
}

fn cmd_milestone(action: MilestoneAction) -> CliResult {
    let db = Database::open()?;
    match action {
        MilestoneAction::Add {
            name,
            branch,
            undefined,
            released,
        } => {
            let branch = db
                .find_branch(&branch)?
                .ok_or_else(|| format!("Branch '{}' does not exist", branch))?;
            let milestone = db.create_milestone(&name, branch.id, released, undefined)?;
            println!("Created milestone {} on {} (id {})", milestone.name, branch.name, milestone.id);
        }
    }
    Ok(())
}
