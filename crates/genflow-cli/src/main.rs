//! genflow CLI: submit workflows to a generation server, follow their
//! progress and collect the artifacts.

use clap::{Parser, Subcommand};
use genflow_cli::commands;
use genflow_core::config::{ENV_API_KEY, ENV_SERVER_URL};

#[derive(Parser)]
#[command(name = "genflow", version, about = "Client for remote generative workflow servers")]
pub struct Cli {
    /// Path to a YAML config file (defaults to <config dir>/genflow/config.yaml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Workflow server base URL
    #[arg(long, global = true, env = ENV_SERVER_URL)]
    server_url: Option<String>,

    /// Bearer token for the server
    #[arg(long, global = true, env = ENV_API_KEY, hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Instantiate a workflow file and submit it
    Submit {
        /// Workflow JSON/YAML file with optional {{KEY}} placeholders
        workflow_file: String,
        /// Placeholder value, repeatable (KEY=VALUE)
        #[arg(long = "set")]
        sets: Vec<String>,
        /// Follow progress until the job finishes and fetch its result
        #[arg(long)]
        wait: bool,
        /// Directory for downloaded artifacts (with --wait)
        #[arg(long)]
        out: Option<String>,
        /// Maximum concurrent submissions
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },

    /// Submit several workflow files concurrently
    Batch {
        #[arg(required = true)]
        workflow_files: Vec<String>,
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },

    /// Show the server queue status
    Queue,

    /// Follow a job's progress stream
    Monitor { job_id: String },

    /// Fetch a job's result and save its artifacts
    Result {
        job_id: String,
        /// Output directory; prints a summary when omitted
        #[arg(long)]
        out: Option<String>,
    },

    /// Work with parameterized workflow templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Validate a template file
    Validate { file: String },
    /// List templates in a directory
    List {
        #[arg(default_value = ".")]
        dir: String,
    },
    /// Render a template into a workflow
    Render {
        file: String,
        /// Parameter value, repeatable (KEY=JSON; bare words are strings)
        #[arg(long = "param")]
        params: Vec<String>,
        /// Write the workflow here instead of stdout
        #[arg(long)]
        out: Option<String>,
    },
    /// Create a character-generation template
    Init {
        file: String,
        #[arg(long, default_value = "character")]
        id: String,
        #[arg(long, default_value = "anime")]
        style: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genflow_core=warn,genflow_cli=info".into()),
        )
        .init();

    let result = match cli.command {
        Commands::Template { action } => match action {
            TemplateAction::Validate { file } => commands::template::validate(&file),
            TemplateAction::List { dir } => commands::template::list(&dir),
            TemplateAction::Render { file, params, out } => {
                commands::template::render(&file, &params, out.as_deref())
            }
            TemplateAction::Init { file, id, style } => commands::template::init(&file, &id, &style),
        },
        command => {
            let cancel = commands::cancel_on_ctrl_c();
            match commands::load_config(cli.config.as_deref(), cli.server_url, cli.api_key)
                .and_then(commands::build_client)
            {
                Err(e) => Err(e),
                Ok(client) => match command {
                    Commands::Submit {
                        workflow_file,
                        sets,
                        wait,
                        out,
                        concurrency,
                    } => {
                        let opts = commands::submit::SubmitOptions {
                            workflow_file: &workflow_file,
                            sets: &sets,
                            wait,
                            out_dir: out.as_deref(),
                            concurrency,
                        };
                        commands::submit::run(client, opts, &cancel).await
                    }
                    Commands::Batch {
                        workflow_files,
                        concurrency,
                    } => commands::submit::batch(client, &workflow_files, concurrency, &cancel).await,
                    Commands::Queue => commands::queue::status(&client, &cancel).await,
                    Commands::Monitor { job_id } => commands::monitor::run(&client, &job_id, &cancel).await,
                    Commands::Result { job_id, out } => {
                        commands::result::fetch(&client, &job_id, out.as_deref(), &cancel).await
                    }
                    Commands::Template { .. } => Ok(()),
                },
            }
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
