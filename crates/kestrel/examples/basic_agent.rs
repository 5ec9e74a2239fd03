//! Minimal agent: one tool, one question, one answer.
//!
//! Registers a directory listing tool, asks the model about the current
//! directory, and prints the reply along with token usage.
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... cargo run --example basic_agent
//! ```

use kestrel::prelude::*;

fn list_dir_tool() -> FnTool {
    let description = ToolDescription::new("list_dir", "List the entries of a directory")
        .param(ToolParameter::optional("path", ParamType::String, "Directory to list").with_default(".".into()));

    FnTool::new(description, |args| async move {
        let path = args.opt_str("path")?.unwrap_or(".").to_string();
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::failed(format!("{path}: {e}")))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ToolError::failed(e.to_string()))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names.join("\n"))
    })
}

#[tokio::main]
async fn main() -> Result<(), String> {
    // 1. Create the provider.
    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "Set OPENROUTER_KEY env var to your OpenRouter API key")?;
    let provider = OpenRouterProvider::new(api_key, "anthropic/claude-sonnet-4")
        .map_err(|e| e.to_string())?
        .with_max_tokens(4096);

    // 2. Register tools the model can call.
    let tools = ToolRegistry::new().with(list_dir_tool());

    // 3. Configure the agent.
    let config = AgentConfig::new()
        .with_system_prompt("You are a helpful coding assistant. Be concise.")
        .with_max_iterations(10);

    // 4. Run the loop.
    let mut agent = Agent::new(&provider, &tools, config).with_event_handler(&LoggingHandler);
    let response = agent
        .process("List the files in the current directory and summarize what this project does.")
        .await;

    // 5. Print results.
    println!("\n{}", response.content);
    println!(
        "\n--- {} | {} iterations | {} tokens ---",
        response.status,
        response.iterations,
        response.total_tokens()
    );

    match response.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
