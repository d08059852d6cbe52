use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use gemini_integration::GeminiClient;
use session_core::{DirectorySaver, SessionController};
use shared::protocol::RequestKind;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod render;

use commands::{parse_command, ReplCommand, HELP};
use config::load_settings;
use render::{describe_view, render_events};

#[derive(Parser, Debug)]
#[command(about = "Generate an image from a prompt, then keep editing it")]
struct Args {
    #[arg(long, default_value = "imagine.toml")]
    config: PathBuf,
    /// Directory that `save` writes into; overrides the config file.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long, default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_filter).context("invalid --log-filter")?)
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings(&args.config);
    if settings.api_key.is_none() {
        warn!("no Gemini API key configured; set GEMINI_API_KEY or api_key in the config file");
    }
    let output_dir = args.output_dir.unwrap_or_else(|| settings.output_dir.clone());
    let client = GeminiClient::new(settings.gemini_config()?)?;
    let saver = DirectorySaver::new(output_dir);
    info!(
        generate_model = %client.config().generate_model,
        edit_model = %client.config().edit_model,
        output_dir = %saver.dir().display(),
        "imagine: ready"
    );

    let controller = SessionController::new(Arc::new(client));
    let renderer = tokio::spawn(render_events(controller.subscribe()));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            ReplCommand::Generate { prompt } => {
                spawn_request(&controller, RequestKind::Generate, prompt);
            }
            ReplCommand::Edit { prompt } => {
                spawn_request(&controller, RequestKind::Edit, prompt);
            }
            ReplCommand::Previous => {
                controller.navigate_previous();
            }
            ReplCommand::Next => {
                controller.navigate_next();
            }
            ReplCommand::NewImage => {
                if let Err(rejection) = controller.new_image() {
                    println!("ignored: {rejection}");
                }
            }
            ReplCommand::DismissError => {
                controller.dismiss_error();
            }
            ReplCommand::Save => match controller.download(&saver).await {
                Ok(Some(path)) => println!("saved {}", path.display()),
                Ok(None) => println!("nothing to save yet"),
                Err(err) => println!("could not save the image: {err:#}"),
            },
            ReplCommand::Status => println!("{}", describe_view(&controller.view())),
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => break,
            ReplCommand::Empty => {}
            ReplCommand::Unknown(verb) => println!("unknown command `{verb}`; type `help`"),
        }
    }

    if controller.is_busy() {
        warn!("exiting with a request still in flight; its result is discarded");
    }
    renderer.abort();
    Ok(())
}

fn spawn_request(controller: &Arc<SessionController>, kind: RequestKind, prompt: String) {
    let controller = controller.clone();
    tokio::spawn(async move {
        let outcome = match kind {
            RequestKind::Generate => controller.generate(&prompt).await,
            RequestKind::Edit => controller.edit(&prompt).await,
        };
        if let Err(rejection) = outcome {
            println!("ignored: {rejection}");
        }
    });
}
