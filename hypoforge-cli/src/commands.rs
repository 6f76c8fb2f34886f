//! CLI subcommand handlers.

use crate::render;
use crate::{Commands, ConfigAction};
use dialoguer::Input;
use futures::StreamExt;
use hypoforge_core::agent::{AgentDefinition, GenerationContext};
use hypoforge_core::config::HypoforgeConfig;
use hypoforge_core::gateway::{AppState, run_gateway};
use hypoforge_core::orchestrator::{ExtractionTracker, with_extraction};
use hypoforge_core::prompts::{HYPOTHESIS_GENERATOR_INSTRUCTIONS, research_prompt};
use hypoforge_core::providers::create_provider;
use hypoforge_core::session::{SessionMeta, SessionRecorder, SessionStore};
use hypoforge_tools::registry::ToolRegistry;
use hypoforge_tools::{into_registered_tools, register_research_tools};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    config: HypoforgeConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Serve { host, port } => handle_serve(config, workspace, host, port).await,
        Commands::Generate {
            domain,
            count,
            idea,
            no_save,
        } => handle_generate(config, workspace, domain, count, idea, no_save).await,
        Commands::Sessions { limit } => handle_sessions(&config, workspace, limit),
        Commands::Config { action } => handle_config(action, &config, workspace),
    }
}

/// Build the hypothesis generator with its literature tool.
fn build_agent(config: &HypoforgeConfig) -> anyhow::Result<Arc<AgentDefinition>> {
    let provider = create_provider(&config.llm)?;

    let mut registry = ToolRegistry::new();
    register_research_tools(&mut registry, &config.literature, Some(Arc::clone(&provider)));
    let tools = into_registered_tools(Arc::new(registry));

    let agent = AgentDefinition::new(
        "Hypothesis Generator",
        HYPOTHESIS_GENERATOR_INSTRUCTIONS,
        provider,
    )
    .with_tools(tools)
    .with_max_turns(config.generation.max_turns)
    .with_temperature(config.llm.temperature);
    Ok(Arc::new(agent))
}

fn session_store(config: &HypoforgeConfig, workspace: &Path) -> Option<SessionStore> {
    if !config.sessions.enabled {
        return None;
    }
    Some(SessionStore::new(workspace.join(&config.sessions.dir)))
}

async fn handle_serve(
    mut config: HypoforgeConfig,
    workspace: &Path,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let agent = build_agent(&config)?;
    let mut state = AppState::new(agent, config.gateway.clone(), config.generation.clone());
    if let Some(store) = session_store(&config, workspace) {
        state = state.with_sessions(store);
    }

    println!(
        "Hypoforge listening on http://{}  (POST /v1/chat/completions)",
        config.gateway.bind_addr()
    );
    run_gateway(Arc::new(state)).await?;
    Ok(())
}

async fn handle_generate(
    config: HypoforgeConfig,
    workspace: &Path,
    domain: Option<String>,
    count: Option<usize>,
    idea: Option<String>,
    no_save: bool,
) -> anyhow::Result<()> {
    let domain = match domain {
        Some(domain) => domain,
        None => Input::new()
            .with_prompt("Research domain")
            .default(config.generation.default_domain.clone())
            .interact_text()?,
    };
    let count = match count {
        Some(count) => count,
        None => Input::new()
            .with_prompt("Number of hypotheses")
            .default(config.generation.default_hypothesis_count)
            .interact_text()?,
    };
    let idea: String = match idea {
        Some(idea) => idea,
        None => Input::new()
            .with_prompt("Research idea")
            .validate_with(|input: &String| {
                if input.trim().is_empty() {
                    Err("The research idea cannot be empty")
                } else {
                    Ok(())
                }
            })
            .interact_text()?,
    };

    let agent = build_agent(&config)?;
    let ctx = GenerationContext::new(domain.clone(), Some(count));
    let upstream = agent.run_streamed(research_prompt(&idea), &ctx);
    let tracker = ExtractionTracker::new(Some(count))
        .with_summary_chars(config.generation.summary_chars);
    let mut events = with_extraction(upstream, tracker);

    println!("\nGenerating {count} hypotheses for {domain}...\n");
    let mut recorder = SessionRecorder::new();
    let mut stdout = std::io::stdout();
    loop {
        let item = tokio::select! {
            item = events.next() => item,
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nInterrupted; session not saved.");
                return Ok(());
            }
        };
        let Some(item) = item else {
            break;
        };
        let event = item?;
        recorder.observe(&event);
        if let Some(text) = render::render_event(&event) {
            print!("{text}");
            stdout.flush()?;
        }
    }

    if !recorder.hypotheses().is_empty() {
        println!("\nExtracted hypotheses:\n{}", render::hypothesis_list(recorder.hypotheses()));
    }

    let store = session_store(&config, workspace).filter(|_| !no_save);
    let Some(store) = store else {
        return Ok(());
    };
    let mut record = recorder.into_record(SessionMeta {
        domain,
        num_hypotheses: Some(count),
        research_idea: idea,
        provider: agent.provider().provider_name().to_string(),
        model_name: agent.provider().model_name().to_string(),
    });
    match store.save(&mut record) {
        Ok(path) => println!("\nSession saved to {}", path.display()),
        Err(e) => eprintln!("\nFailed to save session: {}", e),
    }
    Ok(())
}

fn handle_sessions(config: &HypoforgeConfig, workspace: &Path, limit: usize) -> anyhow::Result<()> {
    let store = SessionStore::new(workspace.join(&config.sessions.dir));
    let sessions = store.list();
    if sessions.is_empty() {
        println!("No saved sessions in {}", store.dir().display());
        return Ok(());
    }
    for summary in sessions.iter().take(limit) {
        println!("{}", render::session_line(summary));
    }
    if sessions.len() > limit {
        println!("... and {} more", sessions.len() - limit);
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    config: &HypoforgeConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".hypoforge");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&HypoforgeConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            println!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
    }
}
