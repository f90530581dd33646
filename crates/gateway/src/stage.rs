//! Stage Classifier — two pure functions mapping a line of
//! subprocess output, or a structured log entry, onto a `Stage`. The rule
//! table is authoritative: each rule is an (ordered) stage paired with
//! a set of case-insensitive keywords, checked highest-stage first so a
//! late-phase signal always wins over an earlier one even if both appear
//! in the same line. `QUEUED` and `COMPLETED` are never inferred here —
//! the job supervisor sets those directly.

use pageindex_domain::job::Stage;

/// Top-to-bottom is highest-stage-first, so a late-phase signal always
/// wins over an earlier one.
const RULES: &[(Stage, &[&str])] = &[
    (
        Stage::Finalizing,
        &["parsing done, saving to file", "tree structure saved to"],
    ),
    (
        Stage::Summarization,
        &[
            "generating summaries",
            "if_add_node_summary",
            "doc_description",
            "generate_doc_description",
            "generate_node_summary",
        ],
    ),
    (
        Stage::Refinement,
        &[
            "fix_incorrect_toc",
            "large node",
            "fixing ",
            "incorrect_results",
            "maximum fix attempts",
        ],
    ),
    (
        Stage::IndexBuild,
        &[
            "meta_processor",
            "generate_toc",
            "verify_toc",
            "check all items",
            "accuracy:",
            "process_no_toc",
            "process_toc_",
        ],
    ),
    (
        Stage::TocAnalysis,
        &[
            "find_toc_pages",
            "toc found",
            "toc_content",
            "detect_page_index",
            "toc_transformer",
            "check_toc",
        ],
    ),
    (
        Stage::ParsingInput,
        &[
            "parsing pdf",
            "processing markdown file",
            "extracting nodes from markdown",
            "extracting text content from nodes",
            "building tree from nodes",
        ],
    ),
];

fn match_keywords(haystack: &str) -> Option<Stage> {
    let haystack = haystack.to_lowercase();
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| haystack.contains(kw)))
        .map(|(stage, _)| *stage)
}

/// Classify a raw line of stdout/stderr text.
pub fn stage_from_text(line: &str) -> Option<Stage> {
    match_keywords(line)
}

/// Classify a structured JSON log entry by flattening it to the union of
/// its serialised form, its values, and its keys before matching — so a
/// stage keyword appearing as either a key or a value is picked up.
pub fn stage_from_log_entry(entry: &serde_json::Value) -> Option<Stage> {
    let mut flattened = entry.to_string();
    flatten_into(entry, &mut flattened);
    match_keywords(&flattened)
}

fn flatten_into(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                out.push(' ');
                out.push_str(k);
                flatten_into(v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        serde_json::Value::String(s) => {
            out.push(' ');
            out.push_str(s);
        }
        serde_json::Value::Number(n) => {
            out.push(' ');
            out.push_str(&n.to_string());
        }
        serde_json::Value::Bool(b) => {
            out.push(' ');
            out.push_str(if *b { "true" } else { "false" });
        }
        serde_json::Value::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_each_stage_from_text() {
        assert_eq!(stage_from_text("Parsing PDF now..."), Some(Stage::ParsingInput));
        assert_eq!(stage_from_text("running find_toc_pages"), Some(Stage::TocAnalysis));
        assert_eq!(stage_from_text("meta_processor starting"), Some(Stage::IndexBuild));
        assert_eq!(stage_from_text("fix_incorrect_toc attempt 1"), Some(Stage::Refinement));
        assert_eq!(stage_from_text("generating summaries for node 3"), Some(Stage::Summarization));
        assert_eq!(
            stage_from_text("tree structure saved to: results/doc_structure.json"),
            Some(Stage::Finalizing)
        );
        assert_eq!(stage_from_text("nothing relevant here"), None);
    }

    #[test]
    fn late_phase_signal_wins_within_one_line() {
        // Both a TOC_ANALYSIS and a FINALIZING keyword appear; the later
        // stage must win regardless of order in the line.
        let line = "toc found earlier; tree structure saved to: out.json";
        assert_eq!(stage_from_text(line), Some(Stage::Finalizing));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(stage_from_text("PARSING PDF"), Some(Stage::ParsingInput));
    }

    #[test]
    fn log_entry_matches_on_keys_and_values() {
        let entry = serde_json::json!({"toc_content": "...", "page_index_given_in_toc": "yes"});
        assert_eq!(stage_from_log_entry(&entry), Some(Stage::TocAnalysis));

        let entry2 = serde_json::json!({"accuracy": "0.9"});
        // "accuracy:" keyword requires the literal colon; flattened form
        // inserts a space between key and value, so match on the key
        // alone needs the colon present in the key text itself.
        assert_eq!(stage_from_log_entry(&entry2), None);

        let entry3 = serde_json::json!({"msg": "accuracy: 0.9"});
        assert_eq!(stage_from_log_entry(&entry3), Some(Stage::IndexBuild));
    }

    #[test]
    fn stage_rank_is_monotonic_by_declaration_order() {
        assert!(Stage::ParsingInput.rank() < Stage::TocAnalysis.rank());
        assert!(Stage::TocAnalysis.rank() < Stage::IndexBuild.rank());
        assert!(Stage::IndexBuild.rank() < Stage::Refinement.rank());
        assert!(Stage::Refinement.rank() < Stage::Summarization.rank());
        assert!(Stage::Summarization.rank() < Stage::Finalizing.rank());
        assert!(Stage::Finalizing.rank() < Stage::Completed.rank());
    }
}
