//! Folio CLI - Command-line interface for manuscript-to-EPUB conversion

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "folio")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Library directory (index, rule templates and archives)
    #[arg(short, long, global = true, default_value = "./folio-library")]
    library: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a plain-text manuscript to an EPUB
    Convert {
        /// Input manuscript path
        input: String,

        /// Rule template id
        #[arg(short, long, default_value = "default")]
        template: String,

        /// Book title (overrides the derived title)
        #[arg(long)]
        title: Option<String>,

        /// Author name
        #[arg(long)]
        author: Option<String>,

        /// Series name
        #[arg(long)]
        series: Option<String>,

        /// Description text
        #[arg(long)]
        description: Option<String>,

        /// Cover image path
        #[arg(long)]
        cover: Option<String>,

        /// Re-process an existing book in place
        #[arg(long)]
        book_id: Option<Uuid>,
    },

    /// Preview how a manuscript would be segmented, without converting
    Preview {
        /// Input manuscript path
        input: String,

        /// Rule template id
        #[arg(short, long, default_value = "default")]
        template: String,

        /// Also list every skipped line
        #[arg(long)]
        skipped: bool,
    },

    /// Patch metadata of a library book's EPUB
    Patch {
        /// Book id
        book_id: Uuid,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New author
        #[arg(long)]
        author: Option<String>,

        /// New series
        #[arg(long)]
        series: Option<String>,

        /// New description
        #[arg(long)]
        description: Option<String>,

        /// New cover image path
        #[arg(long)]
        cover: Option<String>,
    },

    /// Import an existing EPUB into the library
    Import {
        /// Input EPUB path
        input: String,

        /// Title override
        #[arg(long)]
        title: Option<String>,

        /// Author override
        #[arg(long)]
        author: Option<String>,
    },

    /// Display metadata of an EPUB file
    Info {
        /// Input EPUB path
        input: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List library books
    List {
        /// Filter by status (pending, synced, error)
        #[arg(long)]
        status: Option<String>,

        /// Sort order (title, updated)
        #[arg(long, default_value = "title")]
        sort: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "folio_cli=debug,folio_core=debug"
    } else {
        "folio_cli=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let library = cli.library;
    match cli.command {
        Commands::Convert {
            input,
            template,
            title,
            author,
            series,
            description,
            cover,
            book_id,
        } => {
            commands::convert(
                &library,
                &input,
                &template,
                commands::ConvertOpts {
                    title,
                    author,
                    series,
                    description,
                    cover,
                    book_id,
                },
            )
            .await
        }

        Commands::Preview {
            input,
            template,
            skipped,
        } => commands::preview(&library, &input, &template, skipped),

        Commands::Patch {
            book_id,
            title,
            author,
            series,
            description,
            cover,
        } => {
            commands::patch(
                &library,
                book_id,
                commands::PatchOpts {
                    title,
                    author,
                    series,
                    description,
                    cover,
                },
            )
            .await
        }

        Commands::Import {
            input,
            title,
            author,
        } => commands::import(&library, &input, title, author).await,

        Commands::Info { input, json } => commands::info(&input, json),

        Commands::List { status, sort, json } => {
            commands::list(&library, status.as_deref(), &sort, json).await
        }
    }
}
