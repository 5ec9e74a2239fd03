//! Custom tools example: typed arguments, conditional registration, and an
//! approval gate.
//!
//! Demonstrates:
//! - Typed argument structs with `Deserialize` + `JsonSchema`
//! - Tool descriptions derived from a schema via `ToolDescription::from_schema`
//! - Conditional tool registration with `with_if`
//! - Event handling with `CompositeEventHandler`, including denying a call
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... cargo run --example custom_tools
//! ```

use kestrel::prelude::*;
use kestrel::schemars;
use schemars::JsonSchema;
use serde::Deserialize;

// ── Typed argument structs ──────────────────────────────────────────

/// Arguments for the `lookup_word` tool.
#[derive(Deserialize, JsonSchema)]
struct LookupWordArgs {
    /// The word to look up.
    word: String,
}

/// Arguments for the `save_note` tool.
#[derive(Deserialize, JsonSchema)]
struct SaveNoteArgs {
    /// Title for the note.
    title: String,
    /// Note content (markdown).
    content: String,
}

// ── Tool constructors ───────────────────────────────────────────────

/// A read-only tool that "looks up" a word (stub implementation).
fn lookup_word_tool() -> FnTool {
    let description = ToolDescription::from_schema::<LookupWordArgs>(
        "lookup_word",
        "Look up the definition of a word",
    );
    FnTool::typed(description, |args: LookupWordArgs| async move {
        Ok(format!(
            "{}: [stub] this is where the definition would go.",
            args.word
        ))
    })
}

/// A mutation tool that "saves" a note (stub implementation).
fn save_note_tool() -> FnTool {
    let description = ToolDescription::from_schema::<SaveNoteArgs>(
        "save_note",
        "Save a markdown note to the user's notebook",
    );
    FnTool::typed(description, |args: SaveNoteArgs| async move {
        if args.title.trim().is_empty() {
            return Err(ToolError::failed("note title must not be empty"));
        }
        Ok(format!("Saved note '{}' ({} bytes)", args.title, args.content.len()))
    })
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), String> {
    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "Set OPENROUTER_KEY env var to your OpenRouter API key")?;
    let provider = OpenRouterProvider::new(api_key, "anthropic/claude-sonnet-4")
        .map_err(|e| e.to_string())?;

    // Simulate a feature flag.
    let notes_enabled = true;

    let tools = ToolRegistry::new()
        .with(lookup_word_tool())
        .with_if(notes_enabled, save_note_tool());

    // Logging, a callback that reports result sizes, and a gate that
    // refuses notes titled "secret".
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(FnEventHandler::new(|event| {
            if let AgentEvent::ToolResult { name, result, .. } = event {
                eprintln!("[callback] {name} -> {} bytes", result.len());
            }
            None
        }))
        .with(FnEventHandler::new(|event| match event {
            AgentEvent::ToolExecuting {
                name: "save_note",
                arguments,
                ..
            } if arguments["title"] == "secret" => {
                Some(EventResponse::Deny("notes titled 'secret' are not allowed".into()))
            }
            _ => None,
        }));

    let config = AgentConfig::new()
        .with_system_prompt(
            "You are a helpful assistant with access to a word lookup tool and a notebook.",
        )
        .with_tool_guide(true)
        .with_parallel_tools(true);

    let mut agent = Agent::new(&provider, &tools, config).with_event_handler(&handler);
    let response = agent
        .process("Look up the word 'ephemeral' and save a note about it.")
        .await;

    println!("\n{}", response.content);
    println!(
        "\n--- {} | {} iterations | {} tokens ---",
        response.status,
        response.iterations,
        response.total_tokens()
    );

    Ok(())
}
