//! prayer-writer: generate, read aloud, edit and export Korean worship prayers.

mod config;
mod export;
mod generator;
mod notifier;
mod prayer;
mod recorder;
mod service;
mod speech;
mod storage;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::prayer::{Audience, PrayerRequest, ServiceType, Style};
use crate::service::{GenerateOptions, PrayerService, SpeakSource};

#[derive(Parser, Debug)]
#[command(name = "prayer-writer", about = "Korean worship prayer writer")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a prayer with the configured model
    Generate {
        #[arg(short = 't', long, value_enum, default_value_t)]
        service_type: ServiceType,

        #[arg(short, long, value_enum, default_value_t)]
        style: Style,

        #[arg(short, long, value_enum, default_value_t)]
        audience: Audience,

        /// Length in minutes (1-7)
        #[arg(short, long, default_value_t = 4)]
        length: u8,

        /// Do not ask for the adoration/confession/thanksgiving/petition structure
        #[arg(long)]
        no_structure: bool,

        /// Special notes to include in the prayer
        #[arg(short, long, default_value = "")]
        notes: String,

        /// Model override for this request
        #[arg(short, long)]
        model: Option<String>,

        /// Save the result
        #[arg(long)]
        save: bool,

        /// Read the result aloud
        #[arg(long)]
        speak: bool,

        /// Open a print page for the result
        #[arg(long)]
        print: bool,

        /// Export the result as a Word document (optional path)
        #[arg(long, num_args = 0..=1)]
        word: Option<Option<PathBuf>>,

        /// Overwrite a matching saved prayer without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Show or change the API key and model
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// List saved prayers, newest first
    List,
    /// Print a saved prayer
    Show { id: String },
    /// Edit a saved prayer in $EDITOR
    Edit { id: String },
    /// Delete a saved prayer
    Delete {
        id: String,
        #[arg(short, long)]
        yes: bool,
    },
    /// Read a saved prayer (or a text file) aloud; p/r/s/h/v + Enter control playback
    Speak {
        #[arg(required_unless_present = "file")]
        id: Option<String>,
        #[arg(short, long, conflicts_with = "id")]
        file: Option<PathBuf>,
    },
    /// List Korean voices; --test speaks a greeting
    Voices {
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        test: Option<String>,
    },
    /// Open a print page for a saved prayer
    Print { id: String },
    /// Export a saved prayer as a Word document
    Export {
        id: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Record yourself reading a saved prayer
    Record {
        id: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    Set {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Keep HTTP and audio internals quiet unless asked
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info,rodio=info,cpal=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn,rodio=warn,cpal=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = config::Config::load(args.config.as_deref());
    debug!("Config loaded: {config:?}");
    let service = PrayerService::new(config);

    match args.command {
        Command::Generate {
            service_type,
            style,
            audience,
            length,
            no_structure,
            notes,
            model,
            save,
            speak,
            print,
            word,
            yes,
        } => {
            let model = model.unwrap_or_else(|| service.settings().model);
            let request = PrayerRequest::new(service_type, style, audience, length, model)?
                .with_structure(!no_structure)
                .with_notes(notes);
            let options = GenerateOptions {
                save,
                speak,
                print,
                word,
                assume_yes: yes,
            };
            service.generate(request, options).await?;
        }
        Command::Settings { action } => match action {
            SettingsAction::Show => service.show_settings(),
            SettingsAction::Set { api_key, model } => service.set_settings(api_key, model),
        },
        Command::List => service.list(),
        Command::Show { id } => service.show(&id),
        Command::Edit { id } => service.edit(&id).await?,
        Command::Delete { id, yes } => service.delete(&id, yes),
        Command::Speak { id, file } => {
            let source = match (id, file) {
                (_, Some(path)) => SpeakSource::File(path),
                (Some(id), None) => SpeakSource::Saved(id),
                (None, None) => return Err("either an id or --file is required".into()),
            };
            service.speak(source).await?;
        }
        Command::Voices { test } => service.voices(test).await,
        Command::Print { id } => service.print(&id),
        Command::Export { id, output } => service.export(&id, output),
        Command::Record { id, output } => service.record(&id, output).await,
    }

    Ok(())
}
