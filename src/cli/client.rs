use anyhow::{Context, Result, bail};
use console::style;
use serde_json::{Map, Value};

use crate::core::terminal::{GuideSection, print_error, print_success};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const KEY_ENV: &str = "ALCHEMY_API_KEY";

/// Connection flags shared by the client subcommands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClientArgs {
    pub api_url: String,
    pub key: Option<String>,
    /// First bare word after the subcommand (topic or agent name).
    pub target: Option<String>,
    /// `--data` / `--params` JSON body.
    pub body: Option<String>,
}

pub(crate) fn parse_client_args(args: &[String], start: usize) -> ClientArgs {
    let mut parsed = ClientArgs {
        api_url: DEFAULT_API_URL.to_string(),
        key: None,
        target: None,
        body: None,
    };
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-url" => {
                if i + 1 < args.len() {
                    parsed.api_url = args[i + 1].trim_end_matches('/').to_string();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--key" | "-k" => {
                if i + 1 < args.len() {
                    parsed.key = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--data" | "--params" | "-d" => {
                if i + 1 < args.len() {
                    parsed.body = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            other => {
                if parsed.target.is_none() && !other.starts_with('-') {
                    parsed.target = Some(other.to_string());
                }
                i += 1;
            }
        }
    }
    if parsed.key.is_none() {
        parsed.key = std::env::var(KEY_ENV).ok().filter(|k| !k.trim().is_empty());
    }
    parsed
}

/// Parses a `--data` / `--params` argument; absent means `{}`.
pub(crate) fn parse_json_object(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("body is not valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("body must be a JSON object"),
    }
}

fn require_key(args: &ClientArgs) -> Result<&str> {
    args.key
        .as_deref()
        .with_context(|| format!("no API key given; pass --key or set ${}", KEY_ENV))
}

async fn get_json(args: &ClientArgs, path: &str) -> Result<(reqwest::StatusCode, Value)> {
    let key = require_key(args)?;
    let resp = reqwest::Client::new()
        .get(format!("{}{}", args.api_url, path))
        .bearer_auth(key)
        .send()
        .await
        .with_context(|| format!("gateway at {} is unreachable", args.api_url))?;
    let status = resp.status();
    Ok((status, resp.json().await.unwrap_or(Value::Null)))
}

async fn post_json(
    args: &ClientArgs,
    path: &str,
    body: &Map<String, Value>,
) -> Result<(reqwest::StatusCode, Value)> {
    let key = require_key(args)?;
    let resp = reqwest::Client::new()
        .post(format!("{}{}", args.api_url, path))
        .bearer_auth(key)
        .json(body)
        .send()
        .await
        .with_context(|| format!("gateway at {} is unreachable", args.api_url))?;
    let status = resp.status();
    Ok((status, resp.json().await.unwrap_or(Value::Null)))
}

fn error_text(body: &Value) -> &str {
    body.get("error")
        .and_then(Value::as_str)
        .unwrap_or("unexpected response")
}

pub async fn run_status(args: &ClientArgs) -> Result<()> {
    let (status, body) = get_json(args, "/api/agents/summary").await?;
    if !status.is_success() {
        print_error(&format!("Gateway answered {}: {}", status, error_text(&body)));
        return Ok(());
    }
    let (_, stats) = get_json(args, "/api/webhooks/stats").await?;
    let stats = &stats["statistics"];

    let mut section = GuideSection::new("Gateway Status")
        .status("API Endpoint", &args.api_url)
        .status(
            "Webhooks",
            &format!(
                "{} received, {} processed, {} failed, {} pending",
                stats["total"], stats["processed"], stats["failed"], stats["pending"]
            ),
        )
        .blank();

    if let Some(agents) = body.get("agents").and_then(Value::as_object) {
        for (name, row) in agents {
            let state = row.get("status").and_then(Value::as_str).unwrap_or("?");
            let styled = match state {
                "failed" => style(state.to_uppercase()).red().bold(),
                "disabled" => style(state.to_uppercase()).dim(),
                "running" => style(state.to_uppercase()).yellow().bold(),
                _ => style(state.to_uppercase()).green().bold(),
            };
            section = section.bullet(&format!(
                "{} [{}] {} completed, {} failed",
                style(name).white().bold(),
                styled,
                row["tasks_completed"],
                row["tasks_failed"]
            ));
        }
    }
    section.print();
    println!();
    Ok(())
}

pub async fn run_send(args: &ClientArgs) -> Result<()> {
    let Some(topic) = args.target.as_deref() else {
        print_error("Usage: alchemy-gateway send <topic> [--data JSON]");
        return Ok(());
    };
    let payload = parse_json_object(args.body.as_deref())?;
    let (status, body) = post_json(args, &format!("/webhook/{}", topic), &payload).await?;
    if status.is_success() {
        print_success(&format!(
            "Webhook accepted: {}",
            body.get("webhook_id").and_then(Value::as_str).unwrap_or("?")
        ));
    } else {
        print_error(&format!("Gateway answered {}: {}", status, error_text(&body)));
    }
    Ok(())
}

pub async fn run_trigger(args: &ClientArgs) -> Result<()> {
    let Some(agent) = args.target.as_deref() else {
        print_error("Usage: alchemy-gateway trigger <agent> [--params JSON]");
        return Ok(());
    };
    let params = parse_json_object(args.body.as_deref())?;
    let (status, body) =
        post_json(args, &format!("/api/agents/{}/trigger", agent), &params).await?;
    if !status.is_success() {
        print_error(&format!("Gateway answered {}: {}", status, error_text(&body)));
        return Ok(());
    }

    let succeeded = body.get("success").and_then(Value::as_bool) == Some(true);
    let mut section = GuideSection::new(&format!("Agent Run · {}", agent))
        .status(
            "Result",
            &if succeeded {
                style("SUCCESS").green().bold().to_string()
            } else {
                style("FAILED").red().bold().to_string()
            },
        )
        .status(
            "Execution Time",
            &format!(
                "{:.3}s",
                body.get("execution_time").and_then(Value::as_f64).unwrap_or(0.0)
            ),
        );
    if !succeeded {
        section = section.warn(error_text(&body));
    }
    section.print();
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_client_args_reads_target_and_flags() {
        let args = argv(&[
            "alchemy-gateway",
            "send",
            "system-alert",
            "--data",
            r#"{"severity":"warning"}"#,
            "--key",
            "ak_1",
            "--api-url",
            "http://10.0.0.5:8000/",
        ]);
        let parsed = parse_client_args(&args, 2);
        assert_eq!(parsed.target.as_deref(), Some("system-alert"));
        assert_eq!(parsed.body.as_deref(), Some(r#"{"severity":"warning"}"#));
        assert_eq!(parsed.key.as_deref(), Some("ak_1"));
        assert_eq!(parsed.api_url, "http://10.0.0.5:8000");
    }

    #[test]
    fn parse_client_args_defaults_api_url() {
        let parsed = parse_client_args(&argv(&["alchemy-gateway", "status", "--key", "k"]), 2);
        assert_eq!(parsed.api_url, DEFAULT_API_URL);
        assert_eq!(parsed.target, None);
    }

    #[test]
    fn json_body_must_be_an_object() {
        assert!(parse_json_object(None).unwrap().is_empty());
        let map = parse_json_object(Some(r#"{"operation":"add_test_files"}"#)).unwrap();
        assert_eq!(map["operation"], "add_test_files");
        assert!(parse_json_object(Some("[1,2]")).is_err());
        assert!(parse_json_object(Some("{nope")).is_err());
    }
}
