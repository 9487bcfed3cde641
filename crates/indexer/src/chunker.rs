use anyhow::{Result, anyhow};
use common::{Chunk, FileKind};

pub const CODE_WINDOW_LINES: usize = 50;
pub const CODE_OVERLAP_LINES: usize = 10;
pub const DOC_WINDOW_TOKENS: usize = 256;
pub const DOC_OVERLAP_TOKENS: usize = 32;

/// Splits a file into content-bearing windows. Pure: no I/O beyond the
/// input bytes. Code files get line windows, doc files get token windows;
/// ordinals are contiguous from zero over the emitted chunks. Fails only
/// on invalid UTF-8, in which case the caller skips the whole file.
pub fn chunk_file(
    project_id: &str,
    rel_path: &str,
    bytes: &[u8],
    kind: FileKind,
) -> Result<Vec<Chunk>> {
    let text = std::str::from_utf8(bytes).map_err(|err| anyhow!("not valid utf-8: {err}"))?;
    let windows = match kind {
        FileKind::Code => code_windows(text),
        FileKind::Doc => doc_windows(text),
    };

    Ok(windows
        .into_iter()
        .enumerate()
        .map(|(ordinal, window)| Chunk {
            id: Chunk::make_id(project_id, rel_path, ordinal),
            path: rel_path.to_string(),
            ordinal,
            start_line: window.start_line,
            end_line: window.end_line,
            kind,
            text: window.text,
        })
        .collect())
}

struct Window {
    start_line: usize,
    end_line: usize,
    text: String,
}

fn code_windows(text: &str) -> Vec<Window> {
    let lines = text.lines().collect::<Vec<_>>();
    let stride = CODE_WINDOW_LINES - CODE_OVERLAP_LINES;
    let mut out = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let end = (start + CODE_WINDOW_LINES).min(lines.len());
        let body = lines[start..end].join("\n");
        if !body.trim().is_empty() {
            out.push(Window {
                start_line: start + 1,
                end_line: end,
                text: body,
            });
        }
        if end == lines.len() {
            break;
        }
        start += stride;
    }
    out
}

/// Whitespace-separated tokens, with each CJK character its own token.
fn doc_windows(text: &str) -> Vec<Window> {
    let tokens = doc_tokens(text);
    if tokens.is_empty() {
        return Vec::new();
    }
    let stride = DOC_WINDOW_TOKENS - DOC_OVERLAP_TOKENS;
    let mut out = Vec::new();
    let mut start = 0;
    while start < tokens.len() {
        let end = (start + DOC_WINDOW_TOKENS).min(tokens.len());
        let first = &tokens[start];
        let last = &tokens[end - 1];
        let body = text[first.start_byte..last.end_byte].to_string();
        if !body.trim().is_empty() {
            out.push(Window {
                start_line: first.line,
                end_line: last.line,
                text: body,
            });
        }
        if end == tokens.len() {
            break;
        }
        start += stride;
    }
    out
}

struct DocToken {
    start_byte: usize,
    end_byte: usize,
    line: usize,
}

fn doc_tokens(text: &str) -> Vec<DocToken> {
    let mut tokens = Vec::new();
    let mut line = 1usize;
    let mut run_start: Option<usize> = None;

    let mut flush = |tokens: &mut Vec<DocToken>, run_start: &mut Option<usize>, end: usize, line: usize| {
        if let Some(start) = run_start.take() {
            tokens.push(DocToken {
                start_byte: start,
                end_byte: end,
                line,
            });
        }
    };

    for (offset, c) in text.char_indices() {
        if c == '\n' {
            flush(&mut tokens, &mut run_start, offset, line);
            line += 1;
            continue;
        }
        if c.is_whitespace() {
            flush(&mut tokens, &mut run_start, offset, line);
            continue;
        }
        if is_cjk(c) {
            flush(&mut tokens, &mut run_start, offset, line);
            tokens.push(DocToken {
                start_byte: offset,
                end_byte: offset + c.len_utf8(),
                line,
            });
            continue;
        }
        if run_start.is_none() {
            run_start = Some(offset);
        }
    }
    flush(&mut tokens, &mut run_start, text.len(), line);
    tokens
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}'
    )
}
