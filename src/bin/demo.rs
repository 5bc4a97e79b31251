// src/bin/demo.rs
// CLI smoke harness for memoria-core, in the teacher's mira_test.rs clap
// idiom (Parser/Subcommand, FmtSubscriber, --verbose controlling level).
// Exercises the real components against a live Qdrant and LLM/embedding
// endpoints rather than a scenario-file runner, since this crate has no
// testing::harness of its own.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use memoria_core::chat::ChatService;
use memoria_core::chat_store::ChatMetadataStore;
use memoria_core::cooldown::CooldownRegistry;
use memoria_core::embedding::{EmbeddingService, HttpEmbeddingBackend};
use memoria_core::llm::dispatch::{Dispatcher, HttpChatProvider};
use memoria_core::model::{Collection, Role};
use memoria_core::orchestrator::dice;
use memoria_core::orchestrator::Orchestrator;
use memoria_core::retrieval::RetrievalPipeline;
use memoria_core::store::VectorStore;
use memoria_core::supervisor::Supervisor;
use memoria_core::CONFIG;

#[derive(Parser)]
#[command(name = "memoria-demo")]
#[command(about = "memoria-core smoke harness")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check Qdrant connectivity
    HealthCheck,

    /// Create a chat (metadata sidecar + empty collections)
    CreateChat {
        chat_id: String,
        user_id: String,
        #[arg(long, default_value = "")]
        title: String,
    },

    /// Roll dice locally, no model round-trip
    RollDice {
        #[arg(long, default_value_t = 1)]
        count: u32,
        #[arg(long, default_value = "20")]
        die: String,
        #[arg(long, default_value_t = 0)]
        modifier: i32,
    },

    /// Run one generation turn through the orchestrator against a live chat
    Generate {
        chat_id: String,
        user_id: String,
        message: String,
        #[arg(long, env = "EMBED_API_KEY")]
        embed_key: String,
        #[arg(long, env = "GEN_API_KEY")]
        gen_key: String,
        #[arg(long, env = "EMBED_BASE_URL", default_value = "https://api.openai.com")]
        embed_base_url: String,
        #[arg(long, env = "GEN_BASE_URL")]
        gen_base_url: String,
    },

    /// Spawn (or reuse) a per-user proxy process and print its handle
    EnsureProxy { user_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    CONFIG.validate()?;

    match cli.command {
        Commands::HealthCheck => health_check().await,
        Commands::CreateChat { chat_id, user_id, title } => create_chat(chat_id, user_id, title).await,
        Commands::RollDice { count, die, modifier } => {
            roll_dice(count, die, modifier);
            Ok(())
        }
        Commands::Generate { chat_id, user_id, message, embed_key, gen_key, embed_base_url, gen_base_url } => {
            generate(chat_id, user_id, message, embed_key, gen_key, embed_base_url, gen_base_url).await
        }
        Commands::EnsureProxy { user_id } => ensure_proxy(user_id).await,
    }
}

async fn health_check() -> anyhow::Result<()> {
    let store = VectorStore::connect(&CONFIG.store.qdrant_url, CONFIG.embedding.dimensions as u64).await?;
    let healthy = store.health_check().await;
    println!("qdrant: {}", if healthy { "OK" } else { "UNREACHABLE" });
    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

async fn create_chat(chat_id: String, user_id: String, title: String) -> anyhow::Result<()> {
    let store = Arc::new(VectorStore::connect(&CONFIG.store.qdrant_url, CONFIG.embedding.dimensions as u64).await?);
    let chats = Arc::new(ChatMetadataStore::new(chats_root()));
    let embeddings = Arc::new(EmbeddingService::new(
        Arc::new(HttpEmbeddingBackend::new("https://api.openai.com", &CONFIG.embedding.model, Duration::from_secs(CONFIG.embedding.timeout_secs))),
        Arc::new(CooldownRegistry::new()),
        CONFIG.embedding.daily_cooldown_secs,
        CONFIG.embedding.temporary_cooldown_secs,
        CONFIG.embedding.max_attempts,
    ));
    let chat_service = ChatService::new(store, embeddings, chats, CONFIG.embedding.dimensions);

    let metadata = chat_service.create_chat(&chat_id, &user_id, &title).await?;
    info!("created chat {} for user {}", metadata.chat_id, metadata.user_id);
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

fn roll_dice(count: u32, die: String, modifier: i32) {
    let outcome = dice::roll(count, &die, modifier, &mut rand::thread_rng());
    println!("{}", outcome.display);
}

async fn generate(
    chat_id: String,
    user_id: String,
    message: String,
    embed_key: String,
    gen_key: String,
    embed_base_url: String,
    gen_base_url: String,
) -> anyhow::Result<()> {
    let embedding_keys = vec![embed_key];
    let gen_keys = vec![gen_key];

    let store = Arc::new(VectorStore::connect(&CONFIG.store.qdrant_url, CONFIG.embedding.dimensions as u64).await?);
    store.initialize_collections(&chat_id).await.ok();

    let chats = Arc::new(ChatMetadataStore::new(chats_root()));
    if chats.get(&chat_id).await.is_err() {
        chats.save(&memoria_core::model::ChatMetadata::new(&chat_id, &user_id, "")).await?;
    }

    let embeddings = Arc::new(EmbeddingService::new(
        Arc::new(HttpEmbeddingBackend::new(embed_base_url, &CONFIG.embedding.model, Duration::from_secs(CONFIG.embedding.timeout_secs))),
        Arc::new(CooldownRegistry::new()),
        CONFIG.embedding.daily_cooldown_secs,
        CONFIG.embedding.temporary_cooldown_secs,
        CONFIG.embedding.max_attempts,
    ));

    let provider = Arc::new(HttpChatProvider::new(
        gen_base_url,
        memoria_core::config::generation::ProviderKind::OpenAiCompatible,
        Duration::from_secs(CONFIG.generation.chat_timeout_secs),
    ));
    let dispatcher = Arc::new(Dispatcher::new(provider, Arc::new(CooldownRegistry::new()), CONFIG.generation.clone()));

    let retrieval = Arc::new(RetrievalPipeline::new(store.clone(), embeddings.clone(), CONFIG.retrieval.clone()));

    let chat_service = ChatService::new(store.clone(), embeddings.clone(), chats.clone(), CONFIG.embedding.dimensions);
    chat_service
        .add_message(&chat_id, Collection::Historico, Role::User, &message, Vec::new(), &embedding_keys)
        .await?;

    let recent_historico = store.get_all_records(&chat_id, Collection::Historico).await.unwrap_or_default();
    let query_gen_options = memoria_core::llm::GenerationOptions {
        model_name: "gpt-4o-mini".to_string(),
        temperature: 0.3,
        tools: Vec::new(),
        api_keys: gen_keys.clone(),
    };
    let retrieved = retrieval
        .retrieve(&chat_id, &recent_historico, &message, &dispatcher, query_gen_options, &embedding_keys)
        .await
        .map(|output| output.context_text)
        .unwrap_or_default();

    let orchestrator = Orchestrator::new(
        dispatcher,
        store,
        embeddings,
        chats,
        CONFIG.store.zero_vector_epsilon,
        Duration::from_millis(CONFIG.store.repair_throttle_ms),
        CONFIG.store.auto_repair_cooldown_secs,
    );

    let history = vec![memoria_core::llm::Message::user_text(format!("{}\n\n{}", retrieved, message))];
    let options = memoria_core::llm::GenerationOptions {
        model_name: "gpt-4o-mini".to_string(),
        temperature: 0.7,
        tools: Vec::new(),
        api_keys: gen_keys,
    };

    let outcome = orchestrator.generate(&chat_id, history, String::new(), options, &embedding_keys, &message).await?;
    println!("{}", outcome.model_response);
    for inserted in outcome.new_vector_memory {
        info!("inserted {:?} memory {}", inserted.collection, inserted.message_id);
    }
    Ok(())
}

async fn ensure_proxy(user_id: String) -> anyhow::Result<()> {
    let supervisor = Arc::new(Supervisor::new(CONFIG.supervisor.clone()));
    let handle = supervisor.ensure_process(&user_id).await?;
    println!("{}", serde_json::to_string_pretty(&handle)?);
    Ok(())
}

fn chats_root() -> String {
    memoria_core::config::helpers::env_or("CHAT_METADATA_ROOT", "data/chats")
}
