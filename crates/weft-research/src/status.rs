use crate::topics::Topic;

/// User-facing status line for a completed node.
///
/// `label` is the topic key reported with the event; `{topic}` is replaced by
/// its display name, or by nothing when the label is absent or unknown.
/// Nodes without a template report their own name. Returns `None` for nodes
/// that have no status line.
pub fn status_text(node: &str, label: Option<&str>) -> Option<String> {
    let template = match node {
        "router" => "Initializing search...",
        "research" => "Drafting the {topic} section...",
        "generate" => "Finished drafting the {topic} section...",
        "critique" => "Revising the {topic} section...",
        "refine" => "Redrafting {topic} section...",
        "topic_agent" | "to_parent" => "Finished the {topic} section...",
        "aggregate" => "Final touches...",
        "polish" => return None,
        other => return Some(other.to_string()),
    };
    let topic = label
        .and_then(Topic::from_key)
        .map(|t| t.display_name())
        .unwrap_or_default();
    Some(template.replace("{topic}", topic))
}
