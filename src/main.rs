//! mailsort - command-line front end for rules, categories and senders.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use mailsort::config::Settings;
use mailsort::domain::{Email, RuleDraft, RuleId};
use mailsort::providers::ai::{AiClassifier, LlmClassifier, OpenAiCompatibleProvider};
use mailsort::services::{
    CategoryService, EvaluationContext, FastCategorizer, RuleEngine, RuleService, SenderPager,
};
use mailsort::storage::{KeychainAccess, SqliteStore};

/// Rule-driven email triage.
#[derive(Parser)]
#[command(name = "mailsort", about = "Rule-driven email triage", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to the per-user config directory).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file (defaults to `mailsort.db` next to the settings).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage rules.
    Rules {
        #[command(subcommand)]
        action: RulesCmd,
    },

    /// Manage sender categories.
    Categories {
        #[command(subcommand)]
        action: CategoriesCmd,
    },

    /// Inspect and categorize senders.
    Senders {
        #[command(subcommand)]
        action: SendersCmd,
    },

    /// Run the rules against a message stored as JSON, without acting.
    Evaluate {
        /// Path to the message JSON.
        email: PathBuf,
    },

    /// Write the default settings file if none exists.
    Init,
}

#[derive(Subcommand)]
enum RulesCmd {
    /// List rules in evaluation order.
    List,

    /// Validate and add rules from a JSON array of rule definitions.
    Import { file: PathBuf },

    /// Delete a rule.
    Delete { id: String },

    /// Set the evaluation order. Every rule id must be listed once.
    Reorder { ids: Vec<String> },
}

#[derive(Subcommand)]
enum CategoriesCmd {
    List,

    /// Add the built-in categories that are missing.
    Seed,

    Add {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },

    Delete { name: String },
}

#[derive(Subcommand)]
enum SendersCmd {
    /// List senders that have no category.
    Uncategorized,

    /// Assign a category by name, or clear it when none is given.
    Assign {
        address: String,
        category: Option<String>,
    },

    /// Categorize senders with a single AI request.
    Categorize {
        addresses: Vec<String>,

        /// Persist the results instead of only printing them.
        #[arg(long)]
        apply: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let settings_path = match cli.config {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let db_path = cli.db;

    match cli.command {
        Commands::Init => init(&settings_path)?,
        Commands::Rules { action } => {
            let (_, store) = open(&settings_path, db_path).await?;
            rules(action, store).await?
        }
        Commands::Categories { action } => {
            let (_, store) = open(&settings_path, db_path).await?;
            categories(action, store).await?
        }
        Commands::Senders { action } => {
            let (settings, store) = open(&settings_path, db_path).await?;
            senders(action, store, &settings).await?
        }
        Commands::Evaluate { email } => {
            let (settings, store) = open(&settings_path, db_path).await?;
            evaluate(&email, store, &settings).await?
        }
    }
    Ok(())
}

async fn open(
    settings_path: &Path,
    db_path: Option<PathBuf>,
) -> anyhow::Result<(Settings, SqliteStore)> {
    let settings = Settings::load(settings_path)
        .with_context(|| format!("loading {}", settings_path.display()))?;
    let db_path = db_path.unwrap_or_else(|| settings_path.with_file_name("mailsort.db"));
    let store = SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("opening {}", db_path.display()))?;
    tracing::debug!(db = %db_path.display(), "storage ready");
    Ok((settings, store))
}

fn init(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        println!("{} already exists", path.display());
        return Ok(());
    }
    Settings::default().save(path)?;
    println!("wrote {}", path.display());
    Ok(())
}

async fn rules(action: RulesCmd, store: SqliteStore) -> anyhow::Result<()> {
    let service = RuleService::new(store);
    match action {
        RulesCmd::List => {
            for (position, rule) in service.list().await?.iter().enumerate() {
                let mode = if rule.automate { "auto" } else { "manual" };
                println!("{:>3}  {}  {}  [{}]", position, rule.id, rule.name, mode);
            }
        }
        RulesCmd::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let drafts: Vec<RuleDraft> = serde_json::from_str(&raw)?;
            for draft in drafts {
                let name = draft.name.clone();
                let rule = service
                    .create(draft)
                    .await
                    .with_context(|| format!("rule {:?}", name))?;
                println!("created {}  {}", rule.id, rule.name);
            }
        }
        RulesCmd::Delete { id } => service.delete(&RuleId::from(id)).await?,
        RulesCmd::Reorder { ids } => {
            let ids: Vec<RuleId> = ids.into_iter().map(RuleId::from).collect();
            for rule in service.reorder(&ids).await? {
                println!("{}  {}", rule.id, rule.name);
            }
        }
    }
    Ok(())
}

async fn categories(action: CategoriesCmd, store: SqliteStore) -> anyhow::Result<()> {
    let service = CategoryService::new(store);
    match action {
        CategoriesCmd::List => {
            for category in service.list().await? {
                match category.description {
                    Some(description) => println!("{}  {}", category.name, description),
                    None => println!("{}", category.name),
                }
            }
        }
        CategoriesCmd::Seed => {
            let added = service.seed_defaults().await?;
            println!("added {} categories", added.len());
        }
        CategoriesCmd::Add { name, description } => {
            let category = service.create(&name, description.as_deref()).await?;
            println!("created {}", category.name);
        }
        CategoriesCmd::Delete { name } => {
            let categories = service.list().await?;
            let category = mailsort::domain::resolve_category(&categories, &name)
                .with_context(|| format!("no category named {:?}", name))?;
            service.delete(&category.id).await?;
        }
    }
    Ok(())
}

async fn senders(
    action: SendersCmd,
    store: SqliteStore,
    settings: &Settings,
) -> anyhow::Result<()> {
    match action {
        SendersCmd::Uncategorized => {
            let pager = SenderPager::new(Arc::new(store), settings.categorization.page_size);
            for address in pager.collect_all().await? {
                println!("{}", address);
            }
        }
        SendersCmd::Assign { address, category } => {
            let service = CategoryService::new(store);
            match service.set_sender_category(&address, category.as_deref()).await? {
                Some(category) => println!("{} -> {}", address, category.name),
                None => println!("{} cleared", address),
            }
        }
        SendersCmd::Categorize { addresses, apply } => {
            let classifier = build_classifier(settings).await?;
            let categorizer = FastCategorizer::new(classifier, Arc::new(store));
            let results = categorizer.classify(&addresses).await?;
            for (address, category) in &results {
                println!("{}  {}", address, category.as_deref().unwrap_or("-"));
            }
            if apply {
                let stored = categorizer.apply(&results).await?;
                println!("stored {} assignments", stored);
            }
        }
    }
    Ok(())
}

async fn evaluate(path: &Path, store: SqliteStore, settings: &Settings) -> anyhow::Result<()> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let email: Email = serde_json::from_str(&raw)?;

    let rules = RuleService::new(store.clone()).list().await?;
    let context = match CategoryService::new(store).sender_category(&email.sender()).await? {
        Some(category) => EvaluationContext::with_category(category.name),
        None => EvaluationContext::default(),
    };

    let engine = RuleEngine::new(build_classifier(settings).await?)
        .with_failure_policy(settings.rules.ai_failure_policy);
    match engine.evaluate(&email, &rules, &context).await.matched() {
        Some(rule) => println!("matched {}  {}", rule.id, rule.name),
        None => println!("no rule matched"),
    }
    Ok(())
}

async fn build_classifier(settings: &Settings) -> anyhow::Result<Arc<dyn AiClassifier>> {
    let provider_settings = &settings.ai.provider;
    let api_key = KeychainAccess::new()
        .api_key(&provider_settings.api_key_keychain_id)
        .await
        .context("no API key configured")?;

    let provider = match &provider_settings.base_url {
        Some(base_url) => {
            OpenAiCompatibleProvider::custom(base_url, Some(api_key), &provider_settings.model)
        }
        None => OpenAiCompatibleProvider::openai(api_key, &provider_settings.model),
    }
    .with_timeout(settings.ai.request_timeout())?;

    let classifier = LlmClassifier::new(provider)
        .with_temperature(provider_settings.temperature)
        .with_max_tokens(provider_settings.max_tokens);
    Ok(Arc::new(classifier))
}
