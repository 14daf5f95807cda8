use std::collections::{BTreeMap, BTreeSet};

use eyre::{Result, WrapErr};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::{config::TagRule, error::CampaignError};

/// Tag selecting every host
pub const WILDCARD_TAG: &str = "*";

/// Name of the current machine
pub fn current_hostname() -> Result<String> {
    nix::unistd::gethostname()
        .wrap_err("Get hostname")?
        .into_string()
        .map_err(|name| eyre::eyre!("Hostname is not valid UTF-8: {name:?}"))
}

/// Computes the tags applicable to `hostname`.
///
/// The host is known under its own name and `localhost`. Rules of a tag
/// are evaluated in declaration order and the first matching one selects
/// the tag.
pub fn select_tags(
    hostname: &str,
    tags: &BTreeMap<String, Vec<TagRule>>,
) -> Result<BTreeSet<String>> {
    let aliases: BTreeSet<&str> = [hostname, "localhost"].into_iter().collect();
    let mut selected = BTreeSet::from([WILDCARD_TAG.to_owned()]);

    for (tag, rules) in tags {
        'rules: for rule in rules {
            for (mode, value) in rule {
                let matched = match mode.as_str() {
                    "match" => matches_pattern(tag, value, &aliases)?,
                    "nodes" => matches_nodes(tag, value, &aliases)?,
                    _ => {
                        return Err(CampaignError::UnknownAssociationMode {
                            tag: tag.clone(),
                            mode: mode.clone(),
                        }
                        .into());
                    }
                };
                if matched {
                    debug!("Host {hostname} selects tag {tag} by {mode}");
                    selected.insert(tag.clone());
                    break 'rules;
                }
            }
        }
    }
    Ok(selected)
}

fn matches_pattern(tag: &str, value: &Value, aliases: &BTreeSet<&str>) -> Result<bool> {
    let pattern = value.as_str().ok_or_else(|| {
        CampaignError::Configuration(format!("tag '{tag}': match expects a pattern string"))
    })?;
    // patterns match at the start of the alias
    let regex = Regex::new(&format!("^(?:{pattern})"))
        .wrap_err_with(|| format!("Compile match pattern of tag {tag}"))?;
    Ok(aliases.iter().any(|alias| regex.is_match(alias)))
}

fn matches_nodes(tag: &str, value: &Value, aliases: &BTreeSet<&str>) -> Result<bool> {
    let nodes = match value {
        Value::String(node) => vec![node.as_str()],
        Value::Array(nodes) => nodes
            .iter()
            .map(|node| {
                node.as_str().ok_or_else(|| {
                    CampaignError::Configuration(format!(
                        "tag '{tag}': nodes expects hostnames, got {node}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(CampaignError::Configuration(format!(
                "tag '{tag}': nodes expects a list of hostnames, got {other}"
            ))
            .into());
        }
    };
    Ok(nodes.iter().any(|node| aliases.contains(node)))
}
