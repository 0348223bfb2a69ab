fn trim_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &line[..end]
}

fn lines(content: &[u8]) -> impl Iterator<Item = &[u8]> {
    let empty = content.is_empty();
    // the newline ending the last line does not start another one
    let content = content.strip_suffix(b"\n").unwrap_or(content);
    content
        .split(|&b| b == b'\n')
        .map(trim_end)
        .filter(move |_| !empty)
}

/// Compares two outputs line by line, ignoring whitespace at the end of each
/// line and a missing final newline. Blank lines count.
pub fn same_output(output: &[u8], expected: &[u8]) -> bool {
    lines(output).eq(lines(expected))
}
