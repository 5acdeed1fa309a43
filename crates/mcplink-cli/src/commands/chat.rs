//! Single queries and the interactive chat loop.

use std::path::PathBuf;

use mcplink_agent::Agent;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::output;

const PROMPT: &str = "Query: ";

/// What to do with one line read from the terminal.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Skip,
    Quit,
    Query(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        Input::Skip
    } else if line.eq_ignore_ascii_case("quit") {
        Input::Quit
    } else {
        Input::Query(line)
    }
}

/// Answer one query and print the result.
pub async fn answer(agent: &Agent, query: &str, json: bool) -> anyhow::Result<()> {
    let response = agent.run(query).await?;
    output::print_response(&response, json)
}

/// Run the interactive REPL until `quit` or end of input.
pub async fn run(agent: &Agent, json: bool) -> anyhow::Result<()> {
    output::print_status(json, "\nMCP Client Started!");
    output::print_status(json, "Type your queries or 'quit' to exit.");

    let mut editor = DefaultEditor::new()?;

    let history_path = get_history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
    }

    loop {
        match editor.readline(&format!("\n{}", PROMPT)) {
            Ok(line) => {
                let query = match classify(&line) {
                    Input::Skip => continue,
                    Input::Quit => break,
                    Input::Query(query) => query,
                };

                let _ = editor.add_history_entry(query);

                tokio::select! {
                    result = answer(agent, query, json) => {
                        if let Err(e) = result {
                            eprintln!("\nError: {}", output::describe_error(&e));
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n[Query cancelled]");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(parent) = history_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = editor.save_history(&history_path);

    Ok(())
}

fn get_history_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mcplink")
        .join("history.txt")
}
