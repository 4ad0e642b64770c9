//! Interactive `setup` mode: line-oriented prompts writing the store.

use std::io::{BufRead, Write};

use crate::config::Config;

/// Runs the setup dialogue on stdin/stdout and writes the store.
pub fn run() -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut config = Config::load().unwrap_or_default();
    prompt_all(&mut config, &mut stdin.lock(), &mut stdout.lock())?;
    let path = config.save()?;
    println!("Configuration written to {}", path.display());
    Ok(())
}

/// Prompts for every configurable field, keeping the current value on an
/// empty answer.
fn prompt_all<R: BufRead, W: Write>(
    config: &mut Config,
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<()> {
    prompt(output, input, "Relay URL", &mut config.relay_url)?;
    prompt(output, input, "GitHub access token", &mut config.github_token)?;
    prompt(
        output,
        input,
        "Auth mode (subscription/api-key)",
        &mut config.auth_mode,
    )?;
    if config.auth_mode == "api-key" {
        prompt(output, input, "Provider API key", &mut config.api_key)?;
    }
    prompt(output, input, "Workspace root", &mut config.workspace_root)?;
    prompt(output, input, "Code tool binary", &mut config.tool_binary)?;
    Ok(())
}

fn prompt<R: BufRead, W: Write>(
    output: &mut W,
    input: &mut R,
    label: &str,
    field: &mut String,
) -> anyhow::Result<()> {
    if field.is_empty() {
        write!(output, "{label}: ")?;
    } else {
        write!(output, "{label} [{field}]: ")?;
    }
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim();
    if !answer.is_empty() {
        *field = answer.to_string();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_answers_keep_current_values() {
        let mut config = Config {
            relay_url: "wss://keep.example/ws".into(),
            github_token: "keep-token".into(),
            ..Config::default()
        };
        let mut input = std::io::Cursor::new("\n\n\n\n\n");
        let mut output = Vec::new();

        prompt_all(&mut config, &mut input, &mut output).unwrap();

        assert_eq!(config.relay_url, "wss://keep.example/ws");
        assert_eq!(config.github_token, "keep-token");
    }

    #[test]
    fn answers_replace_values() {
        let mut config = Config::default();
        let mut input =
            std::io::Cursor::new("wss://new.example/ws\nghp_new\nsubscription\n/work\nclaude\n");
        let mut output = Vec::new();

        prompt_all(&mut config, &mut input, &mut output).unwrap();

        assert_eq!(config.relay_url, "wss://new.example/ws");
        assert_eq!(config.github_token, "ghp_new");
        assert_eq!(config.workspace_root, "/work");
        assert!(config.is_complete());
    }

    #[test]
    fn api_key_prompt_only_in_api_key_mode() {
        let mut config = Config::default();
        let mut input =
            std::io::Cursor::new("wss://x/ws\ntok\napi-key\nsk-123\n/work\nclaude\n");
        let mut output = Vec::new();

        prompt_all(&mut config, &mut input, &mut output).unwrap();

        assert_eq!(config.auth_mode, "api-key");
        assert_eq!(config.api_key, "sk-123");
    }
}
