use regex::Regex;
use serde_yaml::Value;
use std::sync::OnceLock;
use tracing::debug;

pub const SWM_PROPERTIES_MARKER: &str = "-- swm properties --";
pub const MASTER_BUG_KEY: &str = "kernel-stable-master-bug";
pub const VARIANT_KEY: &str = "variant";
pub const CYCLE_TAG_PREFIX: &str = "kernel-sru-cycle-";
const CYCLE_TAG_DEVEL_PREFIX: &str = "kernel-sru-cycle-devel-";
const PROBLEM_TYPE_MARKER: &str = "ProblemType:";
const UNKNOWN_PROBLEM_TYPE: &str = "unknown";

/// Known series codenames, newest first.
pub const SERIES_ORDER: [&str; 21] = [
    "plucky", "oracular", "noble", "mantic", "lunar", "kinetic", "jammy", "impish", "hirsute",
    "groovy", "focal", "eoan", "disco", "cosmic", "bionic", "artful", "zesty", "yakkety",
    "xenial", "trusty", "precise",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleParts {
    pub series: Option<String>,
    pub package: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwmProperties {
    pub master_bug_id: Option<String>,
    pub variant: Option<String>,
}

fn title_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(\S+)/)?(\S+): (?:(\d+\.\d+\.\S+)|<version to be filled>)")
            .expect("valid regex")
    })
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+\.\d+\.\d+)[-.](\d+)\.(\d+)([~a-z\d.]*)").expect("valid regex")
    })
}

// A `<version to be filled>` placeholder gives a `None` version.
pub fn decode_title(title: &str) -> Option<TitleParts> {
    let captures = title_pattern().captures(title)?;
    let field = |index: usize| captures.get(index).map(|m| m.as_str().to_string());

    Some(TitleParts {
        series: field(1),
        package: field(2),
        version: captures
            .get(3)
            .map(|version| canonical_version(version.as_str())),
    })
}

/// `5.15.0.105.102` and `5.15.0-105.102` both become `5.15.0-105.102`.
/// Tokens that are not kernel versions are kept, minus a trailing colon.
pub fn canonical_version(raw: &str) -> String {
    match version_pattern().captures(raw) {
        Some(parts) => format!(
            "{}-{}.{}{}",
            &parts[1],
            &parts[2],
            &parts[3],
            parts.get(4).map_or("", |extra| extra.as_str())
        ),
        None => raw.trim_end_matches(':').to_string(),
    }
}

/// `kernel-sru-cycle-2024.03.25-2` -> (`2024.03.25`, `2`). A tag without a
/// single spin separator keeps the whole remainder as the cycle, spin `0`.
pub fn decode_cycle_tag(tag: &str) -> Option<(String, String)> {
    let rest = tag
        .strip_prefix(CYCLE_TAG_DEVEL_PREFIX)
        .or_else(|| tag.strip_prefix(CYCLE_TAG_PREFIX))?;

    match rest.split('-').collect::<Vec<_>>().as_slice() {
        [cycle, spin] => Some((cycle.to_string(), spin.to_string())),
        _ => Some((rest.to_string(), "0".to_string())),
    }
}

pub fn find_cycle<'a, I>(tags: I) -> Option<(String, String)>
where
    I: IntoIterator<Item = &'a String>,
{
    tags.into_iter().find_map(|tag| decode_cycle_tag(tag))
}

pub fn series_from_tags<'a, I>(tags: I, codenames: &[String]) -> Option<String>
where
    I: IntoIterator<Item = &'a String>,
{
    tags.into_iter()
        .find(|tag| codenames.iter().any(|codename| codename == *tag))
        .cloned()
}

pub fn swm_properties(description: &str) -> Option<SwmProperties> {
    let block = properties_block(description)?;
    // Manual edits on the tracker turn leading spaces into U+00A0.
    let block = block.replace('\u{a0}', " ");

    let value: Value = match serde_yaml::from_str(&block) {
        Ok(value) => value,
        Err(err) => {
            debug!(event = "swm_properties_invalid", error = %err);
            return None;
        }
    };

    Some(SwmProperties {
        master_bug_id: value.get(MASTER_BUG_KEY).and_then(scalar_string),
        variant: value.get(VARIANT_KEY).and_then(scalar_string),
    })
}

fn properties_block(description: &str) -> Option<&str> {
    let mut offset = 0;
    for line in description.split_inclusive('\n') {
        offset += line.len();
        if line.trim() == SWM_PROPERTIES_MARKER {
            return Some(&description[offset..]);
        }
    }
    None
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

pub fn problem_type(description: &str) -> String {
    description
        .lines()
        .filter_map(|line| {
            line.find(PROBLEM_TYPE_MARKER)
                .map(|index| line[index + PROBLEM_TYPE_MARKER.len()..].trim().to_string())
        })
        .last()
        .unwrap_or_else(|| UNKNOWN_PROBLEM_TYPE.to_string())
}
