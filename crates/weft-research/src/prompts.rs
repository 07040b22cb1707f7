//! System prompts for the research workflow.

use crate::topics::Topic;

/// Asks for up to three search queries covering one section.
pub fn research_prompt(topic: Topic) -> String {
    format!(
        "You research the {name} section of a company analysis for the company named by the user.\n\
         The section covers {subtopics}.\n\
         Return at most 3 web search queries that would find the most relevant facts about the company's {name}.",
        name = topic.display_name(),
        subtopics = topic.subtopics(),
    )
}

/// Asks for a section draft grounded in the gathered documents.
pub fn writer_prompt(topic: Topic, documents: &str) -> String {
    format!(
        "You write the {name} section of a company analysis for the company named by the user.\n\
         Cover topics such as {subtopics}.\n\
         Use the material below where it helps.\n\
         ------\n\
         {documents}",
        name = topic.display_name(),
        subtopics = topic.subtopics(),
    )
}

/// Asks for reviewer notes on a draft.
pub fn critique_prompt(topic: Topic) -> String {
    format!(
        "You review the {name} section of a company analysis.\n\
         Give concrete recommendations for the draft the user sends. \
         Point out anything that strays from {name} or needs more supporting information.",
        name = topic.display_name(),
    )
}

/// Asks for search queries that address reviewer notes.
pub const REFINE_PROMPT: &str = "You find sources that address a reviewer's notes on a draft.\n\
Return at most 2 web search queries that would gather what the notes ask for.";

/// Turns the aggregated sections into publishable HTML.
pub const POLISH_PROMPT: &str = "You are the final editor of a company analysis.\n\
Remove any reviewer notes so only the analysis remains, then format it as HTML fragments: \
<h2> for sections, <h3> for subsections and <p> for text. \
Do not wrap the output in <html> and do not add a <title>. \
Return only the formatted analysis.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_name_the_section() {
        let prompt = research_prompt(Topic::MarketPosition);
        assert!(prompt.contains("Market Position"));
        assert!(prompt.contains("market share"));
        assert!(critique_prompt(Topic::RecentNews).contains("Recent News"));
    }

    #[test]
    fn writer_prompt_embeds_documents() {
        let prompt = writer_prompt(Topic::Background, "doc one\n\ndoc two");
        assert!(prompt.starts_with("You write the Background Information section"));
        assert!(prompt.ends_with("doc one\n\ndoc two"));
    }
}
