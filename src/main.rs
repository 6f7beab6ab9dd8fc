#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # tutor
//!
//! Grades an essay against the exam rubric for its subject, prints the report
//! and a score table, and then answers follow-up questions about the report.
//!
//! ## Configuration
//!
//! Put `OPENAI_ENDPOINT`, `OPENAI_API_KEY` and `OPENAI_MODEL` in the
//! environment or a `.env` file. `TUTOR_*` variables tune the rest.
//!
//! ## Usage
//!
//! - `tutor grade essay.txt --subject english --task part-b --level 5*`
//! - `tutor grade notes.txt --attach page1.jpg --subject chinese`
//! - `tutor serve --bind 0.0.0.0:8080`

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use bpaf::*;
use colored::Colorize;
use dotenvy::dotenv;
use tabled::{
    Table,
    settings::{Alignment, Modify, Panel, Style, object::Rows},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};
use tutor::{
    config,
    constants::MAX_AXIS_SCORE,
    error::SessionError,
    gateway::{CompletionGateway, OpenAiGateway, RetryPolicy, RetryingGateway},
    prompt::PromptBuilder,
    registry::SessionRegistry,
    server::{self, AppState},
    session::GradingSession,
    submission::{Attachment, Subject, Submission, TargetLevel, TaskType},
};

/// Arguments of the `grade` command.
#[derive(Debug, Clone)]
struct GradeArgs {
    /// Text file holding the essay.
    file:    PathBuf,
    /// Image or PDF sent alongside the text.
    attach:  Option<PathBuf>,
    /// Subject rubric to apply.
    subject: Subject,
    /// Task type.
    task:    TaskType,
    /// Target level.
    level:   TargetLevel,
}

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Grade a file, then chat about the report
    Grade(GradeArgs),
    /// Run the HTTP server
    Serve(Option<SocketAddr>),
}

/// Parse the command line arguments and return a `Cmd` enum
fn options() -> Cmd {
    let file = positional::<PathBuf>("FILE").help("Text file containing the essay");
    let attach = long("attach")
        .help("Image or PDF of the essay to send alongside the text")
        .argument::<PathBuf>("PATH")
        .optional();
    let subject = long("subject")
        .help("english, chinese or general")
        .argument::<Subject>("SUBJECT")
        .fallback(Subject::default());
    let task = long("task")
        .help("part-a, part-b, argumentative or letter-to-editor")
        .argument::<TaskType>("TASK")
        .fallback(TaskType::default());
    let level = long("level")
        .help("Target level: 3, 4, 5, 5* or 5**")
        .argument::<TargetLevel>("LEVEL")
        .fallback(TargetLevel::default());

    let grade = construct!(GradeArgs {
        attach,
        subject,
        task,
        level,
        file,
    })
    .to_options()
    .command("grade")
    .help("Grade an essay, then ask follow-up questions about the report")
    .map(Cmd::Grade);

    let bind = long("bind")
        .help("Address to listen on (overrides TUTOR_BIND)")
        .argument::<SocketAddr>("ADDR")
        .optional();
    let serve = construct!(Cmd::Serve(bind))
        .to_options()
        .command("serve")
        .help("Serve the grading API over HTTP");

    let cmd = construct!([grade, serve]);

    cmd.to_options()
        .descr("Exam essay grader and writing tutor")
        .run()
}

/// Guesses a MIME type from a file extension.
fn mime_for(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Reads the files named on the command line into a submission.
async fn load_submission(args: &GradeArgs) -> Result<Submission> {
    let text = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Could not read {}", args.file.display()))?;

    let attachment = match &args.attach {
        Some(path) => {
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("Could not read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Some(
                Attachment::builder()
                    .file_name(file_name)
                    .mime_type(mime_for(path))
                    .data(data)
                    .build(),
            )
        }
        None => None,
    };

    Ok(Submission::builder()
        .text(text)
        .maybe_attachment(attachment)
        .subject(args.subject)
        .task_type(args.task)
        .target_level(args.level)
        .build())
}

/// Prints the active report and, for rubric subjects, the score table.
fn print_report<G: CompletionGateway>(session: &GradingSession<G>) {
    let snapshot = session.snapshot();
    let Some(report) = snapshot.report else {
        return;
    };

    println!("\n{}\n\n{report}\n", "Report".bold().underline());

    if snapshot.scores.is_empty() {
        return;
    }
    if !snapshot.scored {
        eprintln!(
            "{}",
            "The model did not return a score line; scores are shown as zero.".yellow()
        );
    }
    let out_of = snapshot.scores.as_slice().len() * usize::from(MAX_AXIS_SCORE);
    println!(
        "{}",
        Table::new(snapshot.scores.as_slice())
            .with(Panel::header("Scores"))
            .with(Panel::footer(format!(
                "Total: {}/{out_of}",
                snapshot.scores.total()
            )))
            .with(
                Modify::new(Rows::first())
                    .with(Alignment::center())
                    .with(Alignment::center_vertical()),
            )
            .with(
                Modify::new(Rows::last())
                    .with(Alignment::center())
                    .with(Alignment::center_vertical()),
            )
            .with(Style::modern())
    );
}

/// Grades `submission` and reports a failure without giving up the session.
async fn grade_once<G: CompletionGateway>(
    session: &GradingSession<G>,
    submission: Submission,
) -> bool {
    eprintln!("{}", "Grading, this can take a minute...".dimmed());
    match session.submit(submission).await {
        Ok(_) => {
            print_report(session);
            true
        }
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            false
        }
    }
}

/// Grades the file, then reads follow-up questions from stdin.
///
/// `/grade` re-grades the same files, `/reset` clears the session, `/quit`
/// (or end of input) exits.
async fn run_grade(args: GradeArgs) -> Result<()> {
    let submission = load_submission(&args).await?;
    let settings = config::settings()?;
    let gateway = RetryingGateway::new(
        OpenAiGateway::from_config()?,
        RetryPolicy::with_retries(settings.max_retries()),
    );
    let session = GradingSession::new(gateway, PromptBuilder::from_settings(&settings));

    grade_once(&session, submission.clone()).await;
    if let Some(greeting) = session.snapshot().transcript.first() {
        println!("{} {}", "tutor>".green().bold(), greeting.text);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("{} ", "you>".cyan().bold());
        let Some(line) = lines.next_line().await.context("Could not read stdin")? else {
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/reset" => {
                session.reset();
                println!("Session cleared. Use /grade to grade the file again.");
            }
            "/grade" => {
                grade_once(&session, submission.clone()).await;
            }
            question => match session.ask(question).await {
                Ok(answer) => println!("{} {answer}", "tutor>".green().bold()),
                Err(SessionError::NoActiveReport) => {
                    eprintln!("Nothing is graded yet. Use /grade first.");
                }
                Err(err) => eprintln!("{} {err}", "error:".red().bold()),
            },
        }
    }

    Ok(())
}

/// Runs the HTTP API until interrupted.
async fn run_serve(bind: Option<SocketAddr>) -> Result<()> {
    let settings = config::settings()?;
    let gateway = RetryingGateway::new(
        OpenAiGateway::from_config()?,
        RetryPolicy::with_retries(settings.max_retries()),
    );
    let registry = SessionRegistry::new(gateway, PromptBuilder::from_settings(&settings));
    let state = AppState::new(registry, settings.access_code().map(str::to_owned));
    state.spawn_sweeper(settings.session_idle());

    server::serve(
        server::build_router(state),
        bind.unwrap_or(settings.bind_addr()),
    )
    .await
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);
    let filter_layer = LevelFilter::from_level(Level::INFO);
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    config::ensure_initialized().context("Could not load configuration")?;

    match options() {
        Cmd::Grade(args) => run_grade(args).await?,
        Cmd::Serve(bind) => run_serve(bind).await?,
    };

    Ok(())
}
