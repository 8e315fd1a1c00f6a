//! Utility functions for lander
//!
//! Environment file loading shared by the CLI and any embedding host.

use std::path::PathBuf;

use tracing::debug;

/// Candidate locations of `lander.env`, most specific last.
fn env_file_candidates() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/usr/local/etc/lander/lander.env")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("lander/lander.env"));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/lander/lander.env"));
    }
    paths
}

/// Load variables from the first `lander.env` found. Variables already set win.
///
/// Returns the path that was loaded, if any.
pub fn load_env_file() -> Option<PathBuf> {
    let path = env_file_candidates().into_iter().find(|p| p.exists())?;
    let contents = std::fs::read_to_string(&path).ok()?;
    let applied = apply_env_pairs(parse_env_file(&contents));
    debug!(path = %path.display(), applied, "Loaded env file");
    Some(path)
}

/// Parse `KEY=value` lines. Accepts an `export ` prefix, quoted values and `#` comments.
pub fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = value.trim().trim_matches('"').trim_matches('\'');
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Set each pair that is not already present in the environment.
fn apply_env_pairs(pairs: Vec<(String, String)>) -> usize {
    let mut applied = 0;
    for (key, value) in pairs {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
            applied += 1;
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_file_formats() {
        let pairs = parse_env_file(
            "# comment\n\
             LANDER__ENGINE__DIMENSION=2\n\
             export LANDER_CONFIG=\"/tmp/lander.toml\"\n\
             \n\
             LANDER__LOGGING__LEVEL='debug'\n\
             =orphan\n\
             not a pair\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("LANDER__ENGINE__DIMENSION".to_string(), "2".to_string()),
                ("LANDER_CONFIG".to_string(), "/tmp/lander.toml".to_string()),
                ("LANDER__LOGGING__LEVEL".to_string(), "debug".to_string()),
            ]
        );
    }

    #[test]
    fn test_existing_variables_are_not_overwritten() {
        std::env::set_var("LANDER_UTIL_TEST_EXISTING", "kept");
        let applied = apply_env_pairs(vec![
            ("LANDER_UTIL_TEST_EXISTING".to_string(), "replaced".to_string()),
            ("LANDER_UTIL_TEST_FRESH".to_string(), "set".to_string()),
        ]);
        assert_eq!(applied, 1);
        assert_eq!(std::env::var("LANDER_UTIL_TEST_EXISTING").unwrap(), "kept");
        assert_eq!(std::env::var("LANDER_UTIL_TEST_FRESH").unwrap(), "set");
    }
}
