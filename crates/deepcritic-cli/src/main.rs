use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use deepcritic_agents::{
    CriticAgent, OpenAiChatModel, PlannerAgent, ResearcherAgent, SearchDefaults, SearchTool,
    TavilySearch,
};
use deepcritic_core::{
    ArtifactStore, Config, ConfigLoader, DeepCriticError, LoopSettings, ResearchOutcome,
    RevisionController, SessionLogInput, SessionLogger, TelemetryOptions, init_metrics_from_env,
    init_telemetry, persist_trace,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};

const PROMPT: &str = "Your Question >>> ";

#[derive(Parser, Debug)]
#[command(
    name = "deepcritic",
    version,
    about = "Web research agent with a bounded critique/revision loop"
)]
struct Cli {
    /// Path to a TOML config file (defaults to `deepcritic.toml` when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the answer, notes and logs (overrides `artifacts.dir`).
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Answer a single question and exit instead of prompting.
    #[arg(long)]
    question: Option<String>,

    /// Print the revision trace after each answer.
    #[arg(long, value_enum)]
    explain: Option<ExplainFormat>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ExplainFormat {
    Markdown,
    Mermaid,
}

/// What the user typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Exit,
    Empty,
    Question(String),
}

fn classify(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Input::Empty
    } else if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
        Input::Exit
    } else {
        Input::Question(trimmed.to_string())
    }
}

struct App {
    controller: RevisionController,
    session_logger: SessionLogger,
    trace_dir: Option<PathBuf>,
    explain: Option<ExplainFormat>,
}

impl App {
    fn build(config: &Config, explain: Option<ExplainFormat>) -> Result<Self> {
        if !config.llm.provider.eq_ignore_ascii_case("openai") {
            bail!(
                "unsupported llm.provider `{}`; only OpenAI-compatible endpoints are available",
                config.llm.provider
            );
        }
        let llm_key = config.llm_api_key()?;
        let search_key = config.search_api_key()?;

        let artifacts = ArtifactStore::open(&config.artifacts)?;
        let model = Arc::new(OpenAiChatModel::new(&config.llm, llm_key));
        let search = Arc::new(SearchTool::new(
            Arc::new(TavilySearch::new(&config.search, search_key)),
            artifacts.clone(),
            SearchDefaults::from(&config.search),
        ));

        let mut controller = RevisionController::new(
            Arc::new(ResearcherAgent::new(model.clone(), search)),
            Arc::new(CriticAgent::new(model.clone())),
            artifacts,
            LoopSettings::from(&config.revision).with_planner_config(&config.planner),
        );
        if config.planner.enabled {
            controller = controller.with_planner(Arc::new(PlannerAgent::new(model)));
        }

        Ok(Self {
            controller,
            session_logger: SessionLogger::from_config(&config.logging),
            trace_dir: config.logging.trace_dir.clone(),
            explain,
        })
    }

    /// Answers one question. `Ok(false)` means the question failed but the
    /// session can continue.
    fn answer(&self, rt: &Runtime, question: &str) -> Result<bool> {
        match rt.block_on(self.controller.run(question)) {
            Ok(outcome) => {
                self.report(&outcome);
                Ok(true)
            }
            Err(err @ (DeepCriticError::CriticResponse(_) | DeepCriticError::MalformedAnswer(_))) => {
                warn!(error = %err, "question abandoned");
                eprintln!("Could not complete this question: {err}");
                Ok(false)
            }
            Err(DeepCriticError::EmptyQuestion) => {
                println!("Please enter a question.");
                Ok(false)
            }
            Err(err) => Err(err).context("research failed"),
        }
    }

    fn report(&self, outcome: &ResearchOutcome) {
        println!("\n{}\n", outcome.answer.trim_end());
        if !outcome.format_ok {
            println!("(warning: the answer does not follow the required section format)");
        }
        println!(
            "Critique rounds: {}, Revision rounds: {}",
            outcome.critique_rounds, outcome.revision_rounds
        );
        println!(
            "Artifacts: {}",
            self.controller.artifacts().dir().display()
        );

        match self.explain {
            Some(ExplainFormat::Markdown) => println!("\n{}", outcome.trace.render_markdown()),
            Some(ExplainFormat::Mermaid) => println!("\n{}", outcome.trace.render_mermaid()),
            None => {}
        }

        let trace_path = self.trace_dir.as_ref().and_then(|dir| {
            persist_trace(dir, &outcome.session_id, outcome.trace.events())
                .map_err(|err| warn!(error = %err, "failed to persist trace"))
                .ok()
        });

        let report = outcome.report();
        let input = SessionLogInput {
            session_id: outcome.session_id.clone(),
            question: outcome.question.clone(),
            title: report.as_ref().map(|report| report.title.clone()),
            critique_rounds: outcome.critique_rounds,
            revision_rounds: outcome.revision_rounds,
            stop_reason: outcome.stop_reason.as_str().to_string(),
            format_ok: outcome.format_ok,
            unresolved: outcome.unresolved.clone(),
            sources: report.map(|report| report.source_urls()).unwrap_or_default(),
            trace_path: trace_path.map(|path| path.display().to_string()),
        };
        if let Err(err) = self.session_logger.log_session_completion(input) {
            warn!(error = %err, "failed to write session log");
        }
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = ConfigLoader::load(cli.config.clone())?;
    if let Some(dir) = cli.workspace.clone() {
        config.artifacts.dir = dir;
    }

    init_telemetry(TelemetryOptions {
        default_filter: Some(config.logging.level.clone()),
        ..TelemetryOptions::default()
    })?;
    init_metrics_from_env("deepcritic");

    let app = App::build(&config, cli.explain)?;
    let rt = Runtime::new()?;

    if let Some(question) = cli.question {
        return match classify(&question) {
            Input::Question(question) => {
                if app.answer(&rt, &question)? {
                    Ok(())
                } else {
                    bail!("question could not be answered")
                }
            }
            _ => bail!("--question must be a non-empty question"),
        };
    }

    info!(
        max_revisions = config.revision.max_revisions,
        planner = config.planner.enabled,
        workspace = %config.artifacts.dir.display(),
        "interactive session started"
    );

    let stdin = io::stdin();
    let mut lines = stdin.lock();
    loop {
        print!("{PROMPT}");
        io::stdout().flush()?;

        let mut line = String::new();
        if lines.read_line(&mut line)? == 0 {
            println!();
            break;
        }

        match classify(&line) {
            Input::Exit => break,
            Input::Empty => println!("Please enter a question."),
            Input::Question(question) => {
                app.answer(&rt, &question)?;
            }
        }
    }

    info!("session ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_words_end_the_session() {
        assert_eq!(classify("exit\n"), Input::Exit);
        assert_eq!(classify("  QUIT "), Input::Exit);
        assert_eq!(classify("Exit"), Input::Exit);
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(classify(""), Input::Empty);
        assert_eq!(classify("   \t\n"), Input::Empty);
    }

    #[test]
    fn questions_are_trimmed() {
        assert_eq!(
            classify("  What limits sodium-ion adoption?\n"),
            Input::Question("What limits sodium-ion adoption?".into())
        );
        assert_eq!(
            classify("exit strategies for startups"),
            Input::Question("exit strategies for startups".into())
        );
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from([
            "deepcritic",
            "--workspace",
            "out",
            "--question",
            "What is X?",
            "--explain",
            "mermaid",
        ]);
        assert_eq!(cli.workspace, Some(PathBuf::from("out")));
        assert_eq!(cli.question.as_deref(), Some("What is X?"));
        assert_eq!(cli.explain, Some(ExplainFormat::Mermaid));
        assert!(cli.config.is_none());
    }
}
