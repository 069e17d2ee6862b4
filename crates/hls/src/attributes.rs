use std::collections::HashMap;

/// Attributes of a tag `m3u8-rs` does not model, such as `EXT-X-PART`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    values: HashMap<String, String>,
}

impl AttributeList {
    /// Looks up an attribute by name, ignoring ASCII case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parses the attribute list that follows a tag's colon, e.g.
/// `DURATION=1.0,URI="part0.m4s"`.
///
/// Splits on commas outside double quotes, strips surrounding quotes and
/// turns a literal `\n` into a newline. Entries without `=` are ignored.
pub fn parse_attributes(list: &str) -> AttributeList {
    // Split on commas, but keep quoted values intact.
    let mut parts: Vec<&str> = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;
    for (idx, ch) in list.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(list[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < list.len() {
        parts.push(list[start..].trim());
    }

    let mut values = HashMap::new();
    for part in parts.into_iter().filter(|p| !p.is_empty()) {
        let Some((k, v)) = part.split_once('=') else {
            continue;
        };
        let mut val = v.trim();
        if let Some(stripped) = val.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            val = stripped;
        }
        values.insert(k.trim().to_string(), val.replace("\\n", "\n"));
    }

    AttributeList { values }
}
