//! Pull the generated HTML document out of an assistant reply

/// Extract the HTML document from LLM output
///
/// Precedence:
/// 1. First fenced block tagged `html` (case-insensitive)
/// 2. First fenced block whose body contains `<html` or `<!doctype`
/// 3. Raw `<!DOCTYPE html>` … `</html>` span
pub fn extract_code(text: &str) -> Option<String> {
    let blocks = fenced_blocks(text);

    if let Some(block) = blocks
        .iter()
        .find(|b| b.tag.eq_ignore_ascii_case("html"))
    {
        return non_empty(block.body);
    }

    if let Some(block) = blocks.iter().find(|b| looks_like_document(b.body)) {
        return non_empty(block.body);
    }

    raw_document_span(text)
}

struct FencedBlock<'a> {
    tag: &'a str,
    body: &'a str,
}

/// Split out ```-fenced blocks; an unterminated final fence runs to the end
fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        let (info_line, body_start) = match after_fence.find('\n') {
            Some(nl) => (&after_fence[..nl], nl + 1),
            None => break,
        };
        let tag = info_line.split_whitespace().next().unwrap_or("");
        let body_region = &after_fence[body_start..];

        match body_region.find("```") {
            Some(close) => {
                blocks.push(FencedBlock {
                    tag,
                    body: &body_region[..close],
                });
                rest = &body_region[close + 3..];
            }
            None => {
                blocks.push(FencedBlock {
                    tag,
                    body: body_region,
                });
                break;
            }
        }
    }

    blocks
}

fn looks_like_document(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("<html") || lower.contains("<!doctype")
}

fn raw_document_span(text: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `text`
    let lower = text.to_ascii_lowercase();
    let start = lower.find("<!doctype html")?;
    let end = lower[start..].rfind("</html>")? + start + "</html>".len();
    non_empty(&text[start..end])
}

fn non_empty(code: &str) -> Option<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
