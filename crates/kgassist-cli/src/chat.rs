//! Line-oriented chat surface.

use anyhow::Result;
use colored::Colorize;
use kgassist_agent::{Agent, AgentResponse};
use kgassist_graph::QueryExecutor;
use std::fmt::Write as _;
use std::io::Write as _;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Quit,
    NewConversation,
    Message(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "/quit" | "/exit" => Input::Quit,
        "/new" => Input::NewConversation,
        text => Input::Message(text),
    }
}

/// Run the chat loop until `/quit` or end of input.
pub async fn run(agent: &Agent, graph: &dyn QueryExecutor) -> Result<()> {
    println!(
        "{} ask about departments, processes, steps, roles and systems. {} starts over, {} exits.",
        "KG Assist".green().bold(),
        "/new".bold(),
        "/quit".bold()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut conversation: Option<String> = None;
    loop {
        print!("{} ", "you>".cyan().bold());
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        let text = match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::NewConversation => {
                conversation = None;
                println!("{}", "started a new conversation".dimmed());
                continue;
            }
            Input::Message(text) => text,
        };

        let response = agent
            .respond_serialized(text, graph, conversation.as_deref())
            .await;
        print!("{}", render_response(&response));
        if response.conversation_id.is_some() {
            conversation = response.conversation_id;
        }
    }
    Ok(())
}

/// Assistant message, then every executed query with its rows, then any
/// error detail.
pub fn render_response(response: &AgentResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", "assistant>".green().bold(), response.message);

    for (i, executed) in response.executed_queries.iter().enumerate() {
        let _ = writeln!(out, "  {}", format!("Query {}:", i + 1).yellow().bold());
        for line in executed.query.lines() {
            let _ = writeln!(out, "    {line}");
        }
        match &executed.error {
            Some(err) => {
                let _ = writeln!(out, "  {} {err}", "failed:".red());
            }
            None => {
                let rows = serde_json::to_string_pretty(&executed.results)
                    .unwrap_or_else(|_| "[]".to_string());
                let _ = writeln!(out, "  {} ({} rows)", "Results".dimmed(), executed.results.len());
                for line in rows.lines() {
                    let _ = writeln!(out, "    {line}");
                }
            }
        }
    }

    for err in &response.tool_errors {
        let _ = writeln!(out, "  {} {err}", "tool error:".red());
    }
    if let Some(detail) = &response.error {
        let _ = writeln!(out, "{} {detail}", "Error details:".red().bold());
    }
    out
}
