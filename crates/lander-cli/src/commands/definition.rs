//! Definition commands

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use lander_rl::{Engine, MdpDocument};

use super::build_engine;
use crate::config::Config;

#[derive(Subcommand)]
pub enum DefinitionCommands {
    /// Validate a definitions file and describe the resulting tables
    Check {
        /// Definitions file (JSON or TOML); falls back to storage.definitions
        path: Option<PathBuf>,
    },
    /// Print the stock lander definition as JSON
    Default,
}

pub async fn run(cmd: DefinitionCommands, config: &Config) -> Result<()> {
    match cmd {
        DefinitionCommands::Check { path } => check(config, path),
        DefinitionCommands::Default => {
            println!("{}", serde_json::to_string_pretty(&vec![MdpDocument::default_lander()])?);
            Ok(())
        }
    }
}

fn check(config: &Config, path: Option<PathBuf>) -> Result<()> {
    let engine = build_engine(config, path.as_deref())?;
    print!("{}", describe(&engine));
    Ok(())
}

fn describe(engine: &Engine) -> String {
    let mut out = String::new();
    out.push_str(&format!("Root: {}  Dimension: {}\n\n", engine.root().name(), engine.dimension()));
    out.push_str(&format!(
        "{:<20} {:>8} {:>12} {:<8} {:<10} {}\n",
        "NAME", "PRIORITY", "ENTRIES", "BACKING", "METHODS", "CHILDREN"
    ));
    out.push_str(&format!("{}\n", "-".repeat(80)));

    for definition in engine.definitions() {
        let methods: Vec<&str> = definition.methods().iter().map(|m| m.as_str()).collect();
        let children: Vec<String> = definition
            .child_names()
            .iter()
            .map(|name| {
                if engine.is_active(name) {
                    name.clone()
                } else {
                    format!("{name} (not loaded)")
                }
            })
            .collect();
        out.push_str(&format!(
            "{:<20} {:>8} {:>12} {:<8} {:<10} {}\n",
            definition.name(),
            definition.priority(),
            definition.table_size(),
            definition.backing().to_string(),
            methods.join(","),
            children.join(", ")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lander_rl::EngineConfig;

    #[test]
    fn test_describe_stock_lander() {
        let engine = Engine::new(&[MdpDocument::default_lander()], EngineConfig::default()).unwrap();
        let text = describe(&engine);
        assert!(text.starts_with("Root: defaultLander  Dimension: 3D"));
        assert!(text.contains("stabilizer (not loaded)"));
        assert!(text.contains("MC"));
    }

    #[test]
    fn test_check_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hover.toml");
        std::fs::write(
            &path,
            r#"
[[definitions]]
name = "hover"

[[definitions.state]]
name = "altitude"
min = 0.0
max = 10.0
precision = 1.0

[[definitions.action]]
name = "thrust"
min = 0.0
max = 1.0
precision = 0.5
"#,
        )
        .unwrap();

        let engine = build_engine(&Config::default(), Some(&path)).unwrap();
        assert_eq!(engine.root().table_size(), 33);
        assert!(check(&Config::default(), Some(dir.path().join("missing.json"))).is_err());
    }
}
