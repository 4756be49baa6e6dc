/// Split one CSV line into trimmed fields.
///
/// A comma inside double quotes does not end the field, and `""` inside
/// quotes is a literal `"`. An unterminated quote is accepted: the
/// accumulated text is flushed as the last field, so exports with a stray
/// quote still load instead of failing the whole file.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}
