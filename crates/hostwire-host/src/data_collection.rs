//! Detection of data collectors in run settings.

const COLLECTOR_TAGS: [&str; 2] = ["<DataCollector", "<InProcDataCollector"];

/// Whether `run_settings` configures at least one data collector that is
/// not explicitly disabled.
///
/// Only element names and the `enabled` attribute are inspected; malformed
/// settings count as having no collectors.
pub fn is_data_collection_enabled(run_settings: Option<&str>) -> bool {
    let Some(settings) = run_settings else {
        return false;
    };
    COLLECTOR_TAGS
        .iter()
        .any(|tag| collector_elements(settings, tag).any(|attrs| !is_disabled(attrs)))
}

/// Attribute text of every `<tag ...>` element, excluding longer element
/// names that merely start with `tag` (such as `<DataCollectors>`).
fn collector_elements<'a>(settings: &'a str, tag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    settings.match_indices(tag).filter_map(move |(start, _)| {
        let rest = &settings[start + tag.len()..];
        let next = rest.chars().next()?;
        if !(next.is_whitespace() || next == '>' || next == '/') {
            return None;
        }
        let end = rest.find('>')?;
        Some(&rest[..end])
    })
}

fn is_disabled(attributes: &str) -> bool {
    let lower = attributes.to_ascii_lowercase();
    let Some(pos) = lower.find("enabled") else {
        return false;
    };
    let value = lower[pos + "enabled".len()..]
        .trim_start()
        .strip_prefix('=')
        .map(|v| v.trim_start().trim_start_matches(['"', '\'']));
    value.is_some_and(|v| v.starts_with("false"))
}
