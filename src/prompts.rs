//! Prompt templates and context formatting.
//!
//! All three prompts can be overridden from the `[prompts]` section of
//! the config file; empty overrides fall back to the built-ins.

use crate::config::PromptsConfig;
use crate::models::RetrievedDocument;

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an intelligent assistant helping users find information from enterprise documents.

Your role is to:
1. Provide accurate, concise answers based ONLY on the provided context
2. Cite sources by mentioning the document name and page number
3. If the answer is not in the context, clearly state \"I don't have enough information to answer that question\"
4. Be professional and helpful
5. Format answers clearly with proper structure

Remember: Only use information from the provided context. Do not make up information.";

const DEFAULT_RAG_TEMPLATE: &str = "\
Context from enterprise documents:
{context}

Question: {question}

Instructions:
- Answer the question using ONLY the information from the context above
- Include citations (document name and page number) for each piece of information
- If the context doesn't contain the answer, say so clearly
- Be concise but comprehensive
- Format your answer in a clear, structured way

Answer:";

const DEFAULT_NO_CONTEXT_PROMPT: &str = "\
I apologize, but I couldn't find relevant information in the available documents to answer your question.

You might want to:
- Rephrase your question to be more specific
- Check if the relevant documents have been uploaded to the system
- Contact the document administrator for additional resources

Please try asking your question in a different way, or let me know if you'd like help with something else.";

pub fn system_prompt(config: &PromptsConfig) -> String {
    override_or(&config.system_prompt, DEFAULT_SYSTEM_PROMPT)
}

/// The fixed answer returned when no sufficiently relevant document is
/// found.
pub fn no_context_answer(config: &PromptsConfig) -> String {
    override_or(&config.no_context_prompt, DEFAULT_NO_CONTEXT_PROMPT)
}

/// Fill the RAG template with the assembled context and the question.
pub fn rag_prompt(config: &PromptsConfig, context: &str, question: &str) -> String {
    override_or(&config.rag_prompt, DEFAULT_RAG_TEMPLATE)
        .replace("{context}", context)
        .replace("{question}", question)
}

fn override_or(value: &Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.clone(),
        _ => default.to_string(),
    }
}

/// Format retrieved documents into one context block. Every document gets
/// an entry, tagged with its source file and page number.
pub fn format_context(documents: &[RetrievedDocument]) -> String {
    if documents.is_empty() {
        return "No relevant documents found.".to_string();
    }

    let parts: Vec<String> = documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "[Document {}]\nSource: {} (Page {})\nContent: {}\n",
                i + 1,
                doc.source_file,
                doc.page_number,
                doc.content
            )
        })
        .collect();

    parts.join("\n---\n")
}

/// Format source citations for display, deduplicated by
/// `(source_file, page_number)`.
pub fn format_sources(documents: &[RetrievedDocument]) -> String {
    if documents.is_empty() {
        return "No sources available.".to_string();
    }

    let mut seen = std::collections::HashSet::new();
    let mut lines = Vec::new();

    for doc in documents {
        let key = (doc.source_file.clone(), doc.page_number);
        if seen.insert(key) {
            lines.push(format!("- {} (Page {})", doc.source_file, doc.page_number));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source: &str, page: i32, content: &str) -> RetrievedDocument {
        RetrievedDocument {
            content: content.to_string(),
            source_file: source.to_string(),
            page_number: page,
            chunk_id: 0,
            score: 1.0,
            reranker_score: None,
        }
    }

    #[test]
    fn context_numbers_every_document() {
        let docs = vec![doc("a.pdf", 1, "alpha"), doc("a.pdf", 1, "beta")];
        let context = format_context(&docs);
        assert!(context.contains("[Document 1]"));
        assert!(context.contains("[Document 2]"));
        assert!(context.contains("alpha"));
        assert!(context.contains("beta"));
    }

    #[test]
    fn sources_deduplicate_by_file_and_page() {
        let docs = vec![
            doc("a.pdf", 1, "alpha"),
            doc("a.pdf", 1, "beta"),
            doc("a.pdf", 2, "gamma"),
            doc("b.txt", 0, "delta"),
        ];
        let sources = format_sources(&docs);
        let lines: Vec<&str> = sources.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "- a.pdf (Page 1)");
        assert_eq!(lines[1], "- a.pdf (Page 2)");
        assert_eq!(lines[2], "- b.txt (Page 0)");
    }

    #[test]
    fn rag_prompt_substitutes_placeholders() {
        let prompt = rag_prompt(&PromptsConfig::default(), "CTX", "Q?");
        assert!(prompt.contains("CTX"));
        assert!(prompt.contains("Question: Q?"));
        assert!(!prompt.contains("{context}"));
        assert!(!prompt.contains("{question}"));
    }

    #[test]
    fn config_overrides_win_when_non_empty() {
        let config = PromptsConfig {
            system_prompt: Some("custom system".to_string()),
            rag_prompt: None,
            no_context_prompt: Some("   ".to_string()),
        };
        assert_eq!(system_prompt(&config), "custom system");
        // Whitespace-only override falls back to the default.
        assert!(no_context_answer(&config).starts_with("I apologize"));
    }
}
