use crate::db::models::Folder;

/// Character budget used when settings do not override it.
pub const DEFAULT_CONTEXT_BUDGET: usize = 8000;

/// Width of the blank-line separator placed between collected pieces.
const SEPARATOR_LEN: usize = 2;

/// Assemble grounding context from `folders`, in folder order then document
/// order, until `max_chars` is used up.
///
/// Each usable document contributes `【folder / document】\n` followed by as
/// much of its content as still fits. Collection stops at the first document
/// whose header leaves no room; later documents are never pulled forward,
/// even if they would have fit. Lengths are counted in characters.
pub fn collect_context(folders: &[Folder], max_chars: usize) -> String {
    let mut pieces: Vec<String> = Vec::new();
    let mut used = 0usize;

    'folders: for folder in folders {
        for doc in folder.documents.iter().filter(|d| d.is_usable()) {
            let header = format!("【{} / {}】\n", folder.name, doc.file_name);
            let header_len = header.chars().count();
            let remaining = max_chars
                .checked_sub(used)
                .and_then(|left| left.checked_sub(header_len))
                .unwrap_or(0);
            if remaining == 0 {
                break 'folders;
            }

            let (snippet, snippet_len) = truncate_chars(&doc.content, remaining);
            let mut piece = header;
            piece.push_str(snippet);
            pieces.push(piece);
            used += header_len + snippet_len + SEPARATOR_LEN;
        }
    }

    pieces.join("\n\n")
}

/// The first `max` characters of `text`, and how many characters that is.
fn truncate_chars(text: &str, max: usize) -> (&str, usize) {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => (&text[..byte_idx], max),
        None => (text, text.chars().count()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Document, ParseStatus};

    fn doc(name: &str, content: &str, status: ParseStatus) -> Document {
        Document {
            id: name.to_string(),
            folder_id: String::new(),
            file_name: name.to_string(),
            file_type: "txt".into(),
            file_size: None,
            storage_path: None,
            content: content.to_string(),
            parse_status: status,
            parse_error: None,
            embedding: None,
            created_at: String::new(),
        }
    }

    fn folder(name: &str, documents: Vec<Document>) -> Folder {
        Folder {
            id: name.to_string(),
            name: name.to_string(),
            created_at: String::new(),
            documents,
        }
    }

    fn header(folder: &str, doc: &str) -> String {
        format!("【{} / {}】\n", folder, doc)
    }

    #[test]
    fn test_empty_input_yields_empty_context() {
        assert_eq!(collect_context(&[], DEFAULT_CONTEXT_BUDGET), "");
        let folders = vec![folder("Econ", vec![])];
        assert_eq!(collect_context(&folders, DEFAULT_CONTEXT_BUDGET), "");
    }

    #[test]
    fn test_long_document_is_cut_to_budget() {
        let folders = vec![folder(
            "Econ",
            vec![doc("notes.txt", &"a".repeat(10_000), ParseStatus::Success)],
        )];
        let context = collect_context(&folders, 8000);
        let h = header("Econ", "notes.txt");
        let header_len = h.chars().count();

        assert!(context.starts_with(&h));
        assert_eq!(context.chars().count(), 8000);
        assert_eq!(&context[h.len()..], "a".repeat(8000 - header_len));
    }

    #[test]
    fn test_pieces_are_joined_with_blank_line() {
        let folders = vec![
            folder("Econ", vec![doc("a.txt", "alpha", ParseStatus::Success)]),
            folder("Law", vec![doc("b.md", "beta", ParseStatus::Success)]),
        ];
        assert_eq!(
            collect_context(&folders, DEFAULT_CONTEXT_BUDGET),
            "【Econ / a.txt】\nalpha\n\n【Law / b.md】\nbeta"
        );
    }

    #[test]
    fn test_failed_and_empty_documents_are_skipped() {
        let folders = vec![folder(
            "Econ",
            vec![
                doc("broken.pptx", "[unparsed]", ParseStatus::Failed),
                doc("pending.pdf", "later", ParseStatus::Pending),
                doc("empty.txt", "", ParseStatus::Success),
                doc("good.txt", "kept", ParseStatus::Success),
            ],
        )];
        assert_eq!(
            collect_context(&folders, DEFAULT_CONTEXT_BUDGET),
            "【Econ / good.txt】\nkept"
        );
    }

    #[test]
    fn test_first_fit_omits_later_small_document() {
        let folders = vec![
            folder("A", vec![doc("big.txt", &"x".repeat(7000), ParseStatus::Success)]),
            folder("B", vec![doc("small.txt", &"y".repeat(10), ParseStatus::Success)]),
        ];
        let context = collect_context(&folders, 7000);
        assert!(context.starts_with(&header("A", "big.txt")));
        assert!(!context.contains("small.txt"));
        assert!(!context.contains('y'));

        // The same documents in the other order both fit.
        let reversed: Vec<Folder> = folders.into_iter().rev().collect();
        let context = collect_context(&reversed, 7000);
        assert!(context.contains(&"y".repeat(10)));
        assert!(context.contains("big.txt"));
    }

    #[test]
    fn test_document_exactly_filling_budget_is_whole() {
        let h = header("Econ", "fit.txt");
        let budget = h.chars().count() + 50;
        let content = "z".repeat(50);
        let folders = vec![folder(
            "Econ",
            vec![
                doc("fit.txt", &content, ParseStatus::Success),
                doc("next.txt", "more", ParseStatus::Success),
            ],
        )];
        assert_eq!(collect_context(&folders, budget), format!("{}{}", h, content));
    }

    #[test]
    fn test_budget_smaller_than_header_yields_nothing() {
        let folders = vec![folder("Econ", vec![doc("a.txt", "alpha", ParseStatus::Success)])];
        assert_eq!(collect_context(&folders, 5), "");
    }

    #[test]
    fn test_multibyte_content_is_cut_on_char_boundary() {
        let folders = vec![folder("笔记", vec![doc("章节.txt", &"政策".repeat(100), ParseStatus::Success)])];
        let h = header("笔记", "章节.txt");
        let budget = h.chars().count() + 3;
        assert_eq!(collect_context(&folders, budget), format!("{}政策政", h));
    }

    #[test]
    fn test_bounded_and_deterministic() {
        let folders = vec![
            folder(
                "Econ",
                vec![
                    doc("a.txt", &"a".repeat(3000), ParseStatus::Success),
                    doc("b.txt", &"b".repeat(3000), ParseStatus::Success),
                ],
            ),
            folder("Law", vec![doc("c.txt", &"c".repeat(3000), ParseStatus::Success)]),
        ];
        for budget in [0, 1, 20, 100, 2999, 3020, 6050, 8000, 20_000] {
            let first = collect_context(&folders, budget);
            let second = collect_context(&folders, budget);
            assert_eq!(first, second);
            let longest_header = header("Econ", "a.txt").chars().count();
            assert!(first.chars().count() <= budget + longest_header);
        }
    }
}
