use clap::{Parser, Subcommand};
use collagist::config::{self, CollageConfig};
use collagist::export::{self, CommandShare, DirectorySink, ExportSettings, NoShare};
use collagist::gallery::{GalleryClient, ListQuery};
use collagist::imaging::RustBackend;
use collagist::layout::Template;
use collagist::loader::{HttpFetcher, LoadPolicy};
use collagist::output;
use collagist::session::{CollageError, CollageSession};
use collagist::types::{AccessMode, ImageRef, RequestContext};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "collagist")]
#[command(about = "Compose gallery photos into downloadable and shareable collages")]
#[command(long_about = "\
Compose gallery photos into downloadable and shareable collages

Images are given as URLs or local paths, in collage order. Each template
places them on a canvas:

  grid2x2   2 x 2 on a square canvas (4 images)
  grid3x3   3 x 3 on a square canvas (9 images)
  stripH    1 x 4 on a square canvas (4 images)
  stripV    4 x 1 on a square canvas (4 images)
  classic   2-column tile sheet, grows with the selection (JPEG)
  polaroid  3-column tile sheet, grows with the selection (JPEG)

Square collages are letterboxed into their cells and watermarked; extra
images beyond a template's capacity are ignored.

Examples:
  collagist compose --template grid3x3 photos/*.jpg
  collagist compose --share --policy tolerant https://cdn.example.com/a.jpg ...
  collagist compose --links --id 65f0c1 --id 65f0c2 --id 65f0c3 --id 65f0c4
  collagist archive https://cdn.example.com/a.jpg https://cdn.example.com/b.jpg
  collagist list --search dusk --year 2021

Run 'collagist gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Directory containing config.toml
    #[arg(long, default_value = ".", global = true)]
    config: PathBuf,

    /// Output directory (overrides [export] output_dir)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Bearer token for the gallery API and credentialed image requests
    #[arg(long, global = true)]
    token: Option<String>,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

/// Shared flags for commands that fetch a selection of images.
#[derive(clap::Args, Clone)]
struct SelectionArgs {
    /// Image URLs or local paths, in collage order
    #[arg(required_unless_present = "ids")]
    sources: Vec<String>,

    /// Gallery photo id to add after the sources (repeatable)
    #[arg(long = "id", value_name = "ID")]
    ids: Vec<String>,

    /// Send the token with image requests
    #[arg(long)]
    credentialed: bool,

    /// What to do when some images fail: fail-fast or tolerant
    #[arg(long)]
    policy: Option<LoadPolicy>,
}

impl SelectionArgs {
    fn access(&self) -> AccessMode {
        if self.credentialed {
            AccessMode::Credentialed
        } else {
            AccessMode::Anonymous
        }
    }

    fn image_refs(&self) -> Vec<ImageRef> {
        let access = self.access();
        self.sources
            .iter()
            .enumerate()
            .map(|(i, source)| ImageRef::from_source(i, source).with_access(access))
            .collect()
    }

    /// Sources in order, then each `--id` looked up in the gallery.
    async fn resolve(
        &self,
        config: &CollageConfig,
        ctx: &RequestContext,
    ) -> Result<Vec<ImageRef>, Box<dyn std::error::Error>> {
        let mut images = self.image_refs();
        if self.ids.is_empty() {
            return Ok(images);
        }
        let client = GalleryClient::new(config.loading.timeout())?;
        for id in &self.ids {
            let item = client.get(ctx, id).await?;
            tracing::debug!(id = %id, image = %item.image, "resolved gallery photo");
            images.push(item.to_image_ref(&config.gallery.asset_base_url, self.access()));
        }
        Ok(images)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Compose a collage and save it to the output directory
    Compose {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Layout template (defaults to [canvas] template)
        #[arg(long)]
        template: Option<Template>,

        /// Canvas edge in pixels for square templates
        #[arg(long)]
        size: Option<u32>,

        /// Hand the collage to [export] share_command instead of only saving it
        #[arg(long)]
        share: bool,

        /// Also print the collage as a data: URL
        #[arg(long)]
        data_url: bool,

        /// Also print WhatsApp, Facebook and Twitter share links for the web images
        #[arg(long)]
        links: bool,
    },
    /// Bundle the original images into a ZIP
    Archive {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// List photos from the gallery API
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Items per page (defaults to [gallery] page_size)
        #[arg(long)]
        limit: Option<u32>,

        /// Filter by photo name
        #[arg(long)]
        search: Option<String>,

        #[arg(long)]
        year: Option<i32>,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let mut config = config::load_config(&cli.config)?;
    if let Some(output) = &cli.output {
        config.export.output_dir = output.display().to_string();
    }
    let mut ctx = RequestContext::new(config.gallery.api_url.clone());
    if let Some(token) = cli.token {
        ctx = ctx.with_token(token);
    }

    // Single-threaded: fetches are multiplexed on one task.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, config, ctx))
}

async fn run(
    command: Command,
    mut config: CollageConfig,
    ctx: RequestContext,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Compose {
            selection,
            template,
            size,
            share,
            data_url,
            links,
        } => {
            if let Some(policy) = selection.policy {
                config.loading.policy = policy;
            }
            let template = template.unwrap_or(config.canvas.template);
            let size = size.unwrap_or(config.canvas.size);
            let images = selection.resolve(&config, &ctx).await?;
            let sink = DirectorySink::new(&config.export.output_dir);
            let settings = ExportSettings::from_config(&config.export);
            let share_command = config.export.share_command.clone();

            let (session, printer) = start_session(config, ctx)?;
            let result: Result<_, CollageError> = async {
                let artifact = session.compose(&images, template, size).await?;
                if share {
                    let staging = std::env::temp_dir().join("collagist");
                    match share_command.and_then(|argv| CommandShare::from_argv(&argv, staging)) {
                        Some(target) => session.export_share(&target, &sink).await?,
                        None => session.export_share(&NoShare, &sink).await?,
                    };
                } else {
                    session.export_download(&sink)?;
                }
                if let Some(stats) = session.cache_stats() {
                    tracing::debug!(%stats, held = session.cached_images(), "decode cache");
                }
                Ok(artifact)
            }
            .await;
            finish_session(session, printer)?;
            let artifact = result?;

            if data_url {
                let encoded = export::encode_artifact(&RustBackend::new(), &artifact, &settings)?;
                println!("{}", encoded.to_data_url());
            }
            if links {
                let web_urls: Vec<String> = images
                    .iter()
                    .map(|image| image.url.clone())
                    .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
                    .collect();
                if web_urls.is_empty() {
                    output::print_share_links(&[]);
                } else {
                    output::print_share_links(&export::share_links(&web_urls)?);
                }
            }
        }
        Command::Archive { selection } => {
            if let Some(policy) = selection.policy {
                config.loading.policy = policy;
            }
            let images = selection.resolve(&config, &ctx).await?;
            let sink = DirectorySink::new(&config.export.output_dir);

            let (session, printer) = start_session(config, ctx)?;
            let result = session.export_archive(&images, &sink).await;
            finish_session(session, printer)?;
            result?;
        }
        Command::List {
            page,
            limit,
            search,
            year,
        } => {
            let client = GalleryClient::new(config.loading.timeout())?;
            let query = ListQuery {
                page,
                limit: limit.unwrap_or(config.gallery.page_size),
                search: search.unwrap_or_default(),
                year,
            };
            let listing = client.list(&ctx, &query).await?;
            output::print_list_page(&listing, &config.gallery.asset_base_url);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

type Session = CollageSession<HttpFetcher, RustBackend>;

/// Build a session whose events are printed on a separate thread.
fn start_session(
    config: CollageConfig,
    ctx: RequestContext,
) -> Result<(Session, std::thread::JoinHandle<()>), Box<dyn std::error::Error>> {
    let fetcher = HttpFetcher::new(ctx, config.loading.app_origin.clone(), config.loading.timeout())?;
    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            output::print_event(&event);
        }
    });
    let session = CollageSession::new(fetcher, RustBackend::new(), config).with_events(tx);
    Ok((session, printer))
}

/// Drop the session (closing its event channel) and wait for the printer.
fn finish_session(
    session: Session,
    printer: std::thread::JoinHandle<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    drop(session);
    printer.join().map_err(|_| "output thread panicked")?;
    Ok(())
}

/// Log to stderr so stdout stays clean for listings and data URLs.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "collagist=debug",
        _ => "collagist=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
