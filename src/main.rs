use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gotonav::algorithms::classifier::{SoftmaxModel, PREVIOUS_PAGE_KEY};
use gotonav::algorithms::{
    ClassifierAlgorithm, DesignFlowAlgorithm, FrequencyAlgorithm, MarkovChainAlgorithm, PredictionAlgorithm,
};
use gotonav::config::{load_config, AppConfig, ConfigProvider, DEFAULT_CONFIG};
use gotonav::integration::{NavigationActionHandler, NavigationCatalog, TracingNotifier};
use gotonav::storage::{HistoryStore, SqliteStore};
use gotonav::{
    ContextData, EngineBuilder, EngineEvent, MenuBuilder, NavigationEvent, PredictionEngine, SuggestedItem,
    TrainingOutcome, TrainingStrategy,
};

const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "gotonav.sqlite";

/// GoToNav - navigation suggestions from user history
#[derive(Parser)]
#[command(name = "gotonav")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Suggests where a user will navigate next", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, database and default configuration
    Init,

    /// Record one navigation event
    Record {
        #[arg(long)]
        user: String,
        /// Page or feature the user is now on
        #[arg(long)]
        page: String,
        #[arg(long)]
        previous: Option<String>,
        #[arg(long)]
        session: Option<String>,
        /// Extra context as key=value, repeatable
        #[arg(long = "context", value_parser = parse_key_value)]
        context: Vec<(String, String)>,
    },

    /// Run one training cycle and print its progress
    Train,

    /// Print ranked suggestions for a user
    Suggest {
        #[arg(long)]
        user: String,
        /// Page the user is currently on
        #[arg(long)]
        context: Option<String>,
        /// Page the user came from
        #[arg(long)]
        previous: Option<String>,
        /// Number of suggestions (defaults to the configured count)
        #[arg(long)]
        count: Option<usize>,
    },

    /// Manage a user's custom shortcuts
    Menu {
        #[command(subcommand)]
        action: MenuAction,
    },

    /// Interactive session: read page names from stdin, one per line
    Session {
        #[arg(long)]
        user: String,
    },

    /// Show current status and statistics
    Status,
}

#[derive(Subcommand)]
enum MenuAction {
    /// Add a shortcut or change its order
    Add {
        #[arg(long)]
        user: String,
        #[arg(long)]
        item: String,
        /// Smaller order ranks first
        #[arg(long, default_value = "0")]
        order: i32,
    },
    Remove {
        #[arg(long)]
        user: String,
        #[arg(long)]
        item: String,
    },
    List {
        #[arg(long)]
        user: String,
    },
    /// Remove every shortcut for a user
    Clear {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // stdout carries command output only
        .init();

    match cli.command {
        Commands::Init => init()?,
        Commands::Record {
            user,
            page,
            previous,
            session,
            context,
        } => {
            let app = App::open()?;
            let mut event = NavigationEvent::new(user, page);
            event.previous_page = previous;
            event.session_id = session;
            for (key, value) in context {
                event = event.with_context(key, value);
            }
            let summary = format!("{} -> {}", event.user_id, event.current_page);
            app.store.add_event(event).await?;
            println!("Recorded {}", summary);
        }
        Commands::Train => train().await?,
        Commands::Suggest {
            user,
            context,
            previous,
            count,
        } => {
            let app = App::open()?;
            let engine = app.engine(TrainingStrategy::manual()).await;
            if let TrainingOutcome::Failed(e) = engine.train_algorithms().await {
                anyhow::bail!("Training failed: {}", e);
            }

            let count = count.unwrap_or(app.config.engine.suggestion_count);
            let data = previous_page_data(previous.as_deref());
            let suggestions = engine
                .get_suggestions(&user, context.as_deref(), count, data.as_ref())
                .await?;
            print_suggestions(&user, &suggestions);
        }
        Commands::Menu { action } => menu(action).await?,
        Commands::Session { user } => session(&user).await?,
        Commands::Status => show_status().await?,
    }

    Ok(())
}

/// Resolve the data directory: $GOTONAV_HOME, then ./.gotonav, then ~/.gotonav
fn get_data_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("GOTONAV_HOME") {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }

    let cwd = std::env::current_dir()?;
    let project_dir = cwd.join(".gotonav");
    if project_dir.exists() {
        return Ok(project_dir);
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(".gotonav"))
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

fn previous_page_data(previous: Option<&str>) -> Option<ContextData> {
    previous.filter(|p| !p.is_empty()).map(|p| {
        let mut data = ContextData::new();
        data.insert(PREVIOUS_PAGE_KEY.to_string(), p.to_string());
        data
    })
}

/// Data directory, configuration and database for one command
struct App {
    data_dir: PathBuf,
    config: AppConfig,
    store: Arc<SqliteStore>,
}

impl App {
    fn open() -> Result<Self> {
        let data_dir = get_data_dir()?;
        std::fs::create_dir_all(&data_dir)?;

        let config = load_config(&data_dir.join(CONFIG_FILE))?;
        let store = Arc::new(SqliteStore::open(&data_dir.join(DATABASE_FILE))?);
        Ok(Self {
            data_dir,
            config,
            store,
        })
    }

    async fn engine(&self, strategy: TrainingStrategy) -> PredictionEngine {
        let provider = Arc::new(ConfigProvider::new(&self.config));
        let weights = &self.config.weights;

        let mut builder = EngineBuilder::new()
            .store(Arc::clone(&self.store))
            .catalog(provider.clone())
            .notifier(Arc::new(TracingNotifier))
            .action_handler(Arc::new(PrintNavigation))
            .algorithm(Arc::new(FrequencyAlgorithm::with_weight(weights.frequency)))
            .algorithm(Arc::new(MarkovChainAlgorithm::with_weight(weights.markov)))
            .algorithm(Arc::new(DesignFlowAlgorithm::with_weight(provider, weights.design_flow)));

        if self.config.classifier.enabled {
            let classifier = ClassifierAlgorithm::with_model_path(self.config.model_path(&self.data_dir))
                .with_options(self.config.classifier_options());
            classifier.set_weight(weights.classifier);
            builder = builder.algorithm(Arc::new(classifier));
        }

        builder.training_strategy(strategy).build().await
    }
}

/// Terminal "navigation": print the destination
struct PrintNavigation;

impl NavigationActionHandler for PrintNavigation {
    fn perform_navigation(&self, user_id: &str, item_name: &str) -> bool {
        println!("{} navigates to {}", user_id, item_name);
        true
    }
}

fn init() -> Result<()> {
    info!("Initializing GoToNav");
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)?;

    SqliteStore::open(&data_dir.join(DATABASE_FILE))?;

    let config_path = data_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        std::fs::write(&config_path, DEFAULT_CONFIG)?;
        info!("Created default configuration at {:?}", config_path);
    }

    println!("GoToNav initialized at {}", data_dir.display());
    Ok(())
}

async fn train() -> Result<()> {
    let app = App::open()?;
    let engine = app.engine(TrainingStrategy::manual()).await;
    let mut events = engine.subscribe();

    let outcome = engine.train_algorithms().await;

    loop {
        match events.try_recv() {
            Ok(EngineEvent::Progress(progress)) => {
                let message = progress.message.map(|m| format!(" - {}", m)).unwrap_or_default();
                println!(
                    "[{:>3}%] {}: {}{}",
                    progress.percentage, progress.algorithm_name, progress.current_step, message
                );
            }
            Ok(EngineEvent::TrainingCompleted) => println!("Training complete"),
            Err(TryRecvError::Lagged(skipped)) => warn!("{} progress events dropped", skipped),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    match outcome {
        TrainingOutcome::Failed(e) => anyhow::bail!("Training failed: {}", e),
        TrainingOutcome::Completed | TrainingOutcome::Skipped => Ok(()),
    }
}

async fn menu(action: MenuAction) -> Result<()> {
    let app = App::open()?;
    let menu = MenuBuilder::new(app.store.clone());

    match action {
        MenuAction::Add { user, item, order } => {
            menu.add_item(&user, &item, order).await?;
            println!("Saved '{}' for {} (order {})", item, user, order);
        }
        MenuAction::Remove { user, item } => {
            menu.remove_item(&user, &item).await?;
            println!("Removed '{}' for {}", item, user);
        }
        MenuAction::List { user } => {
            let items = menu.items(&user).await?;
            if items.is_empty() {
                println!("No custom items for {}", user);
            }
            for item in items {
                println!("{:>4}  {}", item.order, item.item_name);
            }
        }
        MenuAction::Clear { user } => {
            let removed = menu.clear(&user).await?;
            println!("Removed {} custom items for {}", removed, user);
        }
    }
    Ok(())
}

/// Host loop under the configured training mode. Each line is a page the
/// user moved to; `go <item>` asks the action handler to navigate first.
async fn session(user: &str) -> Result<()> {
    let app = App::open()?;
    let engine = app.engine(app.config.training_strategy()).await;
    let provider = ConfigProvider::new(&app.config);
    let count = app.config.engine.suggestion_count;
    let session_id = format!("{}-{}", user, Utc::now().timestamp());

    println!("Session {} ({} mode)", session_id, engine.training_mode());
    if !provider.main_navigation_items().is_empty() {
        println!("Main menu: {}", provider.main_navigation_items().join(", "));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut previous: Option<String> = None;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        let page = match input.strip_prefix("go ") {
            Some(item) => {
                let item = item.trim();
                if !engine.perform_suggested_navigation(user, item) {
                    continue;
                }
                item
            }
            None => input,
        };

        let mut event = NavigationEvent::new(user, page).with_session(session_id.as_str());
        if let Some(prev) = &previous {
            event = event.with_previous(prev.as_str());
        }
        engine.record_navigation(event).await?;

        let data = previous_page_data(previous.as_deref());
        let suggestions = engine.get_suggestions(user, Some(page), count, data.as_ref()).await?;
        print_suggestions(user, &suggestions);

        previous = Some(page.to_string());
    }

    // Let a background cycle finish so the model file is not left stale
    while engine.is_training_in_progress() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    println!(
        "Session ended after {} training cycles",
        engine.completed_training_cycles()
    );
    Ok(())
}

fn print_suggestions(user: &str, suggestions: &[SuggestedItem]) {
    if suggestions.is_empty() {
        println!("No suggestions for {}", user);
        return;
    }
    for (rank, item) in suggestions.iter().enumerate() {
        println!("{}. {} ({:.3}, {})", rank + 1, item.name, item.score, item.reason);
    }
}

async fn show_status() -> Result<()> {
    let data_dir = get_data_dir()?;

    println!("GoToNav Status");
    println!("==============");
    println!();

    if !data_dir.exists() {
        println!("Status: NOT INITIALIZED");
        println!("Run 'gotonav init' to initialize GoToNav");
        return Ok(());
    }

    println!("Status: INITIALIZED");
    println!("Data directory: {}", data_dir.display());

    let db_path = data_dir.join(DATABASE_FILE);
    if db_path.exists() {
        let stats = SqliteStore::open(&db_path)?.stats().await?;
        println!("Navigation events: {}", stats.event_count);
        println!("Users: {}", stats.user_count);
        println!("Custom menu items: {}", stats.custom_item_count);
    } else {
        println!("Database: NOT FOUND");
    }

    let config = load_config(&data_dir.join(CONFIG_FILE))?;
    println!("Training mode: {}", config.engine.training_mode);
    println!("App pages: {}", ConfigProvider::new(&config).available_navigation_items().len());

    if !config.classifier.enabled {
        println!("Classifier: DISABLED");
        return Ok(());
    }
    let model_path = config.model_path(&data_dir);
    match SoftmaxModel::load(&model_path) {
        Ok(Some(model)) => println!(
            "Classifier: trained {} on {} samples, {} destinations",
            model.trained_at().format("%Y-%m-%d %H:%M:%S UTC"),
            model.sample_count(),
            model.labels().len()
        ),
        Ok(None) => println!("Classifier: NOT TRAINED"),
        Err(e) => println!("Classifier: UNREADABLE ({})", e),
    }

    Ok(())
}
