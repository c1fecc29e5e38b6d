//! echolog CLI — operator interface to the journal engine.

use chrono::{NaiveDate, Utc, Weekday};
use clap::{Parser, Subcommand};
use echolog::adapters::{Notifier, TracingNotifier};
use echolog::aggregate::AggregationEngine;
use echolog::config::Config;
use echolog::db::Db;
use echolog::db::entries::{EntryFilter, Page};
use echolog::ingest::IngestionPipeline;
use echolog::llm::transcribe::HttpTranscriber;
use echolog::llm::{RigClassifier, RigEmbedder, RigNarrator, anthropic_client, openai_client};
use echolog::memory::MemoryCoordinator;
use echolog::memory::repair::RepairSweeper;
use echolog::model::artifact::{ArtifactKind, PeriodKey};
use echolog::model::job::JobState;
use echolog::model::user::UserProfile;
use echolog::model::EntryId;
use echolog::scheduler::Scheduler;
use echolog::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "echolog", about = "Voice-note journal engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler daemon
    Serve,
    /// Ingest one voice note
    Ingest {
        /// User ID
        user: i64,
        /// Audio reference (fetchable URL or storage handle)
        audio_ref: String,
        /// User-local date (YYYY-MM-DD); defaults to today in the
        /// user's timezone
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Generate (or fetch) an aggregation artifact
    Generate {
        /// User ID
        user: i64,
        /// Period key: YYYY-MM-DD for daily, YYYY-Www for weekly
        period: String,
        /// Regenerate even if the artifact exists (keeps its identity)
        #[arg(long)]
        force: bool,
    },
    /// Entry operations
    Entries {
        #[command(subcommand)]
        action: EntriesAction,
    },
    /// Show a user's streak
    Streak {
        user: i64,
    },
    /// Job operations
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },
    /// Create or update a user profile
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
}

#[derive(Subcommand)]
enum EntriesAction {
    /// List entries
    List {
        user: i64,
        /// Filter by category
        #[arg(long)]
        category: Option<String>,
        /// Earliest date (inclusive)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Latest date (inclusive)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Substring match over summaries and raw text
        #[arg(long)]
        text: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show one entry with its facts
    Show {
        user: i64,
        /// Entry ID (full UUID or prefix)
        id: String,
    },
    /// Delete an entry from every store
    Delete {
        user: i64,
        /// Entry ID (full UUID)
        id: String,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// List jobs
    List {
        /// Filter by state
        #[arg(long)]
        state: Option<String>,
        /// Filter by user
        #[arg(long)]
        user: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// Create or update a profile
    Upsert {
        user: i64,
        #[arg(long, default_value = "")]
        name: String,
        /// IANA timezone, e.g. Europe/Berlin
        #[arg(long, default_value = "UTC")]
        timezone: String,
        /// Week start day (mon..sun)
        #[arg(long, default_value = "mon")]
        week_start: String,
        #[arg(long, default_value_t = 21)]
        reflection_hour: u32,
        /// Weekly report day (mon..sun)
        #[arg(long, default_value = "sun")]
        report_day: String,
        #[arg(long, default_value_t = 20)]
        report_hour: u32,
        #[arg(long, default_value_t = 9)]
        morning_hour: u32,
        #[arg(long, default_value_t = 21)]
        evening_hour: u32,
        #[arg(long, default_value_t = true)]
        nudges: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cmd_serve().await,
        command => {
            let config = Config::from_env()?;
            let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
            db.migrate().await?;

            match command {
                Command::Serve => unreachable!(),
                Command::Ingest {
                    user,
                    audio_ref,
                    date,
                } => cmd_ingest(&config, db, user, audio_ref, date).await,
                Command::Generate {
                    user,
                    period,
                    force,
                } => cmd_generate(&config, db, user, period, force).await,
                Command::Entries { action } => cmd_entries(db, action).await,
                Command::Streak { user } => cmd_streak(db, user).await,
                Command::Jobs { action } => cmd_jobs(db, action).await,
                Command::Users { action } => cmd_users(db, action).await,
            }
        }
    }
}

fn build_engine(
    config: &Config,
    db: Arc<Db>,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<(Arc<IngestionPipeline>, Arc<AggregationEngine>, Arc<RepairSweeper>)> {
    let anthropic = anthropic_client(&config.anthropic_api_key)?;
    let openai = openai_client(&config.openai_api_key)?;

    let transcriber = Arc::new(HttpTranscriber::new(
        &config.transcription_url,
        config.transcription_api_key.clone(),
    ));
    let classifier = Arc::new(RigClassifier::new(&anthropic, &config.completion_model));
    let narrator = Arc::new(RigNarrator::new(&anthropic, &config.completion_model));
    let embedder = Arc::new(RigEmbedder::new(
        &openai,
        &config.embedding_model,
        config.embedding_dimension,
    ));

    let coordinator = Arc::new(MemoryCoordinator::new(Arc::clone(&db), config.retry));
    let pipeline = Arc::new(IngestionPipeline::new(
        coordinator,
        transcriber,
        classifier.clone(),
        embedder.clone(),
        notifier,
        config.retry,
    ));
    let aggregator = Arc::new(AggregationEngine::new(
        Arc::clone(&db),
        narrator,
        embedder.clone(),
        config.score,
        config.retry,
    ));
    let sweeper = Arc::new(RepairSweeper::new(db, classifier, embedder, config.retry));

    Ok((pipeline, aggregator, sweeper))
}

async fn cmd_serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "echolog".to_string(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;

    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let (_pipeline, aggregator, sweeper) = build_engine(&config, Arc::clone(&db), Arc::clone(&notifier))?;

    let scheduler = Scheduler::new(db, aggregator, sweeper, notifier, config.scheduler);

    let ctrl = scheduler.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    scheduler.run().await?;
    Ok(())
}

async fn cmd_ingest(
    config: &Config,
    db: Arc<Db>,
    user: i64,
    audio_ref: String,
    date: Option<NaiveDate>,
) -> anyhow::Result<()> {
    let profile = db.get_user(user).await?;
    let occurred_on =
        date.unwrap_or_else(|| Utc::now().with_timezone(&profile.timezone).date_naive());

    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let (pipeline, _aggregator, _sweeper) = build_engine(config, db, notifier)?;

    let receipt = pipeline.ingest(user, &audio_ref, occurred_on).await?;

    println!(
        "{}: {} (status: {})",
        if receipt.duplicate { "Duplicate" } else { "Ingested" },
        receipt.entry_id,
        receipt.ingest_status
    );
    if let Some(category) = &receipt.category {
        println!("Category:   {category}");
    }
    if let Some(summary) = &receipt.summary {
        println!("Summary:    {summary}");
    }
    println!("Streak:     {}", receipt.streak.current_streak);
    Ok(())
}

async fn cmd_generate(
    config: &Config,
    db: Arc<Db>,
    user: i64,
    period: String,
    force: bool,
) -> anyhow::Result<()> {
    let key: PeriodKey = period.parse()?;
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let (_pipeline, aggregator, _sweeper) = build_engine(config, db, notifier)?;

    let artifact = aggregator.generate(user, key, force).await?;

    let kind = match artifact.kind {
        ArtifactKind::Daily => "Daily reflection",
        ArtifactKind::Weekly => "Weekly report",
    };
    println!("{kind} {} ({})", artifact.period_key, artifact.id);
    println!(
        "Entries: {}  Score: {:.1}/10{}",
        artifact.entry_count,
        artifact.productivity_score,
        if artifact.degraded { "  [fallback]" } else { "" }
    );
    if !artifact.category_histogram.is_empty() {
        let categories: Vec<String> = artifact
            .category_histogram
            .iter()
            .map(|(c, n)| format!("{c}:{n}"))
            .collect();
        println!("Categories: {}", categories.join(", "));
    }
    println!("---\n{}", artifact.content);
    Ok(())
}

async fn cmd_entries(db: Arc<Db>, action: EntriesAction) -> anyhow::Result<()> {
    match action {
        EntriesAction::List {
            user,
            category,
            from,
            to,
            text,
            limit,
        } => {
            let filter = EntryFilter {
                category: category.as_deref().map(str::parse).transpose()?,
                from,
                to,
                text,
            };
            let items = db
                .list_entries(user, &filter, Page { limit, offset: 0 })
                .await?;

            if items.is_empty() {
                println!("No entries found.");
                return Ok(());
            }

            println!(
                "{:<8}  {:<10}  {:<12}  {:<6}  SUMMARY",
                "ID", "DATE", "CATEGORY", "REPAIR"
            );
            println!("{}", "-".repeat(90));
            for item in &items {
                let category = item
                    .category
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let summary = item.summary.as_deref().unwrap_or("-");
                let summary = if summary.len() > 48 {
                    &summary[..48]
                } else {
                    summary
                };
                println!(
                    "{:<8}  {:<10}  {:<12}  {:<6}  {}",
                    item.entry_id.to_string(),
                    item.occurred_on,
                    category,
                    if item.needs_repair { "yes" } else { "-" },
                    summary
                );
            }
            println!("\n{} entr(y/ies)", items.len());
        }
        EntriesAction::Show { user, id } => {
            let entry_id = resolve_entry_id(&db, user, &id).await?;
            let entry = db.get_entry(entry_id).await?;
            anyhow::ensure!(entry.user_id == user, "entry belongs to another user");

            println!("ID:         {}", entry.id.0);
            println!("Date:       {}", entry.occurred_on);
            println!("Status:     {}", entry.ingest_status);
            println!("Audio:      {}", entry.audio_ref);
            println!("Received:   {}", entry.received_at);
            println!("Text:       {}", entry.raw_text);
            if let Some(fact) = db.get_fact(entry.id).await? {
                println!("---");
                println!("Category:   {}", fact.category);
                println!("Sentiment:  {}", fact.sentiment);
                println!("Summary:    {}", fact.summary);
                println!("Keywords:   {}", fact.keywords.join(", "));
                if !fact.accomplishments.is_empty() {
                    println!("Done:       {}", fact.accomplishments.join("; "));
                }
                if !fact.blockers.is_empty() {
                    println!("Blockers:   {}", fact.blockers.join("; "));
                }
            }
        }
        EntriesAction::Delete { user, id } => {
            let entry_id = EntryId(uuid::Uuid::parse_str(&id)?);
            // Deletion cascades; route through the coordinator so the
            // streak is re-derived under the user lock.
            let coordinator = MemoryCoordinator::new(db, echolog::config::RetryConfig::default());
            if coordinator.delete_entry(user, entry_id).await? {
                println!("Deleted {entry_id} from all stores.");
            } else {
                println!("No such entry for user {user}.");
            }
        }
    }
    Ok(())
}

async fn resolve_entry_id(db: &Db, user: i64, raw: &str) -> anyhow::Result<EntryId> {
    if raw.len() == 36 {
        return Ok(EntryId(uuid::Uuid::parse_str(raw)?));
    }
    // Prefix search over the user's recent entries
    let items = db
        .list_entries(user, &EntryFilter::default(), Page { limit: 100, offset: 0 })
        .await?;
    let matches: Vec<_> = items
        .iter()
        .filter(|item| item.entry_id.0.to_string().starts_with(raw))
        .collect();
    match matches.len() {
        0 => anyhow::bail!("no entry matching prefix '{raw}'"),
        1 => Ok(matches[0].entry_id),
        n => anyhow::bail!("{n} entries match prefix '{raw}' — be more specific"),
    }
}

async fn cmd_streak(db: Arc<Db>, user: i64) -> anyhow::Result<()> {
    let streak = db.get_streak(user).await?;
    println!("Current:    {}", streak.current_streak);
    println!("Longest:    {}", streak.longest_streak);
    match streak.last_entry_date {
        Some(date) => println!("Last entry: {date}"),
        None => println!("Last entry: never"),
    }
    Ok(())
}

async fn cmd_jobs(db: Arc<Db>, action: JobsAction) -> anyhow::Result<()> {
    match action {
        JobsAction::List { state, user, limit } => {
            let state_filter: Option<JobState> = state.as_deref().map(str::parse).transpose()?;
            let jobs = db.list_jobs(state_filter, user, limit).await?;

            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }

            println!(
                "{:<8}  {:<8}  {:<17}  {:<10}  {:<10}  {:<4}  ERROR",
                "ID", "USER", "KIND", "PERIOD", "STATE", "TRY"
            );
            println!("{}", "-".repeat(100));
            for job in &jobs {
                println!(
                    "{:<8}  {:<8}  {:<17}  {:<10}  {:<10}  {:<4}  {}",
                    job.id.to_string(),
                    job.user_id,
                    job.kind.to_string(),
                    job.period_key,
                    job.state.to_string(),
                    format!("{}/{}", job.attempts, job.max_attempts),
                    job.last_error.as_deref().unwrap_or("-")
                );
            }
            println!("\n{} job(s)", jobs.len());
        }
    }
    Ok(())
}

async fn cmd_users(db: Arc<Db>, action: UsersAction) -> anyhow::Result<()> {
    match action {
        UsersAction::Upsert {
            user,
            name,
            timezone,
            week_start,
            reflection_hour,
            report_day,
            report_hour,
            morning_hour,
            evening_hour,
            nudges,
        } => {
            let now = Utc::now();
            let profile = UserProfile {
                user_id: user,
                display_name: name,
                timezone: timezone
                    .parse()
                    .map_err(|_| anyhow::anyhow!("unknown timezone: {timezone}"))?,
                week_start: parse_weekday(&week_start)?,
                reflection_hour,
                report_day: parse_weekday(&report_day)?,
                report_hour,
                morning_hour,
                evening_hour,
                nudges_enabled: nudges,
                created_at: now,
                last_seen_at: now,
            };
            db.upsert_user(&profile).await?;
            println!("User {user} saved ({}).", profile.timezone);
        }
    }
    Ok(())
}

fn parse_weekday(s: &str) -> anyhow::Result<Weekday> {
    match s.to_lowercase().as_str() {
        "mon" => Ok(Weekday::Mon),
        "tue" => Ok(Weekday::Tue),
        "wed" => Ok(Weekday::Wed),
        "thu" => Ok(Weekday::Thu),
        "fri" => Ok(Weekday::Fri),
        "sat" => Ok(Weekday::Sat),
        "sun" => Ok(Weekday::Sun),
        other => anyhow::bail!("bad weekday: {other} (use mon..sun)"),
    }
}
