//! Shell-style `{a,b}` alternation for content patterns.

/// Expand every `{x,y,...}` group in `pattern`, left to right.
///
/// Groups may nest. A brace pair without a top-level comma, or an
/// unbalanced brace, is kept literally.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let mut search = 0;
    while let Some(rel) = pattern[search..].find('{') {
        let open = search + rel;
        if let Some((close, parts)) = split_group(pattern, open) {
            let prefix = &pattern[..open];
            let suffix = &pattern[close + 1..];
            return parts
                .iter()
                .flat_map(|part| expand_braces(&format!("{prefix}{part}{suffix}")))
                .collect();
        }
        search = open + 1;
    }
    vec![pattern.to_string()]
}

/// Find the brace closing the group opened at `open` and split its body on
/// top-level commas.
fn split_group(pattern: &str, open: usize) -> Option<(usize, Vec<&str>)> {
    let mut depth = 0usize;
    let mut start = open + 1;
    let mut parts = Vec::new();

    for (i, c) in pattern.char_indices().skip_while(|&(i, _)| i < open) {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    if parts.is_empty() {
                        return None;
                    }
                    parts.push(&pattern[start..i]);
                    return Some((i, parts));
                }
            }
            ',' if depth == 1 => {
                parts.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    None
}
