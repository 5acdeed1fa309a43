//! Turning the command line into running MCP servers.

use std::time::Duration;

use anyhow::{bail, Context};
use mcplink_core::Config;
use mcplink_mcp::{McpServerConfig, McpServerManager, ServersFile};
use tracing::info;

use crate::Commands;

/// Server configurations for the selected mode, with the configured request
/// timeout applied.
pub fn server_configs(command: &Commands, config: &Config) -> anyhow::Result<Vec<McpServerConfig>> {
    let configs = match command {
        Commands::Stdio { server, args } => vec![McpServerConfig::for_script(server, args.clone())?],
        Commands::Sse { url } => vec![McpServerConfig::for_url(url)?],
        Commands::Multi { config: path } => {
            let path = ServersFile::resolve_path(path.as_deref());
            info!(path = %path.display(), "Loading server file");
            ServersFile::load(&path)
                .with_context(|| format!("Failed to load server file {}", path.display()))?
                .into_configs()
        }
    };

    let timeout = Duration::from_secs(config.limits.request_timeout_secs);
    Ok(configs.into_iter().map(|c| c.with_timeout(timeout)).collect())
}

/// Connect every server. Servers that fail are skipped; it is an error only
/// when none comes up.
pub async fn start(configs: Vec<McpServerConfig>) -> anyhow::Result<McpServerManager> {
    let manager = McpServerManager::with_configs(configs);
    let report = manager.start_all().await;

    if report.all_failed() {
        manager.stop_all().await;
        if report.failed.is_empty() {
            bail!("No enabled MCP servers to connect to");
        }
        let reasons: Vec<String> = report
            .failed
            .iter()
            .map(|(name, e)| format!("{}: {}", name, e))
            .collect();
        bail!("Failed to connect to MCP server ({})", reasons.join("; "));
    }

    for (name, e) in &report.failed {
        eprintln!("[Skipping server '{}': {}]", name, e);
    }

    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcplink_mcp::TransportConfig;
    use std::io::Write;

    fn config_with_timeout(secs: u64) -> Config {
        let mut config = Config::default();
        config.limits.request_timeout_secs = secs;
        config
    }

    #[test]
    fn test_stdio_executable_is_launched_directly() {
        let command = Commands::Stdio {
            server: "my-server".to_string(),
            args: vec!["--verbose".to_string()],
        };

        let configs = server_configs(&command, &config_with_timeout(5)).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "my-server");
        assert_eq!(configs[0].request_timeout, Duration::from_secs(5));
        match &configs[0].transport {
            TransportConfig::Stdio { command, args, .. } => {
                assert_eq!(command, "my-server");
                assert_eq!(args, &vec!["--verbose".to_string()]);
            }
            other => panic!("unexpected transport: {:?}", other),
        }
    }

    #[test]
    fn test_missing_script_is_rejected() {
        let command = Commands::Stdio {
            server: "/nonexistent/weather.py".to_string(),
            args: vec![],
        };
        assert!(server_configs(&command, &Config::default()).is_err());
    }

    #[test]
    fn test_sse_url_must_parse() {
        let command = Commands::Sse {
            url: "not a url".to_string(),
        };
        assert!(server_configs(&command, &Config::default()).is_err());

        let command = Commands::Sse {
            url: "http://localhost:8080/sse".to_string(),
        };
        let configs = server_configs(&command, &Config::default()).unwrap();
        assert_eq!(configs[0].name, "localhost");
    }

    #[test]
    fn test_multi_loads_server_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mcpServers": {{
                "weather": {{"command": "weather-server", "args": ["--units", "metric"]}},
                "search": {{"url": "http://localhost:9000/sse"}}
            }}}}"#
        )
        .unwrap();

        let command = Commands::Multi {
            config: Some(file.path().to_string_lossy().into_owned()),
        };
        let configs = server_configs(&command, &config_with_timeout(7)).unwrap();

        let names: Vec<&str> = configs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["search", "weather"]);
        assert!(configs.iter().all(|c| c.request_timeout == Duration::from_secs(7)));
    }

    #[test]
    fn test_multi_missing_file_is_an_error() {
        let command = Commands::Multi {
            config: Some("/nonexistent/mcp_servers.json".to_string()),
        };
        let err = server_configs(&command, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("Failed to load server file"));
    }

    #[tokio::test]
    async fn test_start_fails_when_no_server_connects() {
        let configs = vec![McpServerConfig::stdio("ghost", "/nonexistent/mcp-server-binary")];
        let err = start(configs).await.err().unwrap();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_start_with_only_disabled_servers() {
        let configs = vec![McpServerConfig::stdio("off", "true").with_enabled(false)];
        let err = start(configs).await.err().unwrap();
        assert!(err.to_string().contains("No enabled MCP servers"));
    }
}
