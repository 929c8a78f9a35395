//! Minimal XML property list writer and reader
//!
//! Covers the subset used by `Info.plist` and launchd registrations:
//! dictionaries, arrays, strings, booleans and integers.

use std::collections::BTreeMap;

const HEADER: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
    "<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" ",
    "\"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n",
    "<plist version=\"1.0\">\n",
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlistValue {
    String(String),
    Bool(bool),
    Integer(i64),
    Array(Vec<PlistValue>),
    Dict(BTreeMap<String, PlistValue>),
}

impl PlistValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlistValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PlistValue]> {
        match self {
            PlistValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, PlistValue>> {
        match self {
            PlistValue::Dict(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for PlistValue {
    fn from(s: &str) -> Self {
        PlistValue::String(s.to_string())
    }
}

impl From<String> for PlistValue {
    fn from(s: String) -> Self {
        PlistValue::String(s)
    }
}

impl From<bool> for PlistValue {
    fn from(b: bool) -> Self {
        PlistValue::Bool(b)
    }
}

/// Render a document. Dictionary keys are emitted sorted so that equal
/// inputs always produce identical bytes.
pub fn to_xml(root: &PlistValue) -> String {
    let mut out = String::from(HEADER);
    write_value(&mut out, root, 0);
    out.push_str("</plist>\n");
    out
}

fn write_value(out: &mut String, value: &PlistValue, depth: usize) {
    let indent = "\t".repeat(depth);
    match value {
        PlistValue::String(s) => {
            out.push_str(&format!("{}<string>{}</string>\n", indent, escape(s)));
        }
        PlistValue::Bool(true) => out.push_str(&format!("{}<true/>\n", indent)),
        PlistValue::Bool(false) => out.push_str(&format!("{}<false/>\n", indent)),
        PlistValue::Integer(n) => {
            out.push_str(&format!("{}<integer>{}</integer>\n", indent, n));
        }
        PlistValue::Array(items) => {
            out.push_str(&format!("{}<array>\n", indent));
            for item in items {
                write_value(out, item, depth + 1);
            }
            out.push_str(&format!("{}</array>\n", indent));
        }
        PlistValue::Dict(map) => {
            out.push_str(&format!("{}<dict>\n", indent));
            for (key, item) in map {
                out.push_str(&format!("{}\t<key>{}</key>\n", indent, escape(key)));
                write_value(out, item, depth + 1);
            }
            out.push_str(&format!("{}</dict>\n", indent));
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parse the root value of an XML property list.
pub fn from_xml(text: &str) -> Option<PlistValue> {
    let body_start = text.find("<plist")?;
    let after_open = body_start + text[body_start..].find('>')? + 1;
    let mut parser = Parser {
        rest: &text[after_open..],
    };
    parser.value()
}

struct Parser<'a> {
    rest: &'a str,
}

impl<'a> Parser<'a> {
    fn next_tag(&mut self) -> Option<&'a str> {
        let start = self.rest.find('<')?;
        let end = start + self.rest[start..].find('>')?;
        let tag = &self.rest[start + 1..end];
        self.rest = &self.rest[end + 1..];
        Some(tag.trim())
    }

    fn text_until(&mut self, closing: &str) -> Option<&'a str> {
        let end = self.rest.find(closing)?;
        let text = &self.rest[..end];
        self.rest = &self.rest[end + closing.len()..];
        Some(text)
    }

    fn value(&mut self) -> Option<PlistValue> {
        let tag = self.next_tag()?;
        self.value_for(tag)
    }

    fn value_for(&mut self, tag: &str) -> Option<PlistValue> {
        match tag {
            "string" => Some(PlistValue::String(unescape(self.text_until("</string>")?))),
            "string/" => Some(PlistValue::String(String::new())),
            "true/" => Some(PlistValue::Bool(true)),
            "false/" => Some(PlistValue::Bool(false)),
            "integer" => self
                .text_until("</integer>")?
                .trim()
                .parse()
                .ok()
                .map(PlistValue::Integer),
            "array/" => Some(PlistValue::Array(Vec::new())),
            "array" => {
                let mut items = Vec::new();
                loop {
                    let tag = self.next_tag()?;
                    if tag == "/array" {
                        return Some(PlistValue::Array(items));
                    }
                    items.push(self.value_for(tag)?);
                }
            }
            "dict/" => Some(PlistValue::Dict(BTreeMap::new())),
            "dict" => {
                let mut map = BTreeMap::new();
                loop {
                    let tag = self.next_tag()?;
                    if tag == "/dict" {
                        return Some(PlistValue::Dict(map));
                    }
                    if tag != "key" {
                        return None;
                    }
                    let key = unescape(self.text_until("</key>")?);
                    let value = self.value()?;
                    map.insert(key, value);
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PlistValue {
        let mut map = BTreeMap::new();
        map.insert("Label".to_string(), PlistValue::from("com.example.agent"));
        map.insert(
            "ProgramArguments".to_string(),
            PlistValue::Array(vec![
                PlistValue::from("/Users/a b/Applications/X & Y.app/Contents/MacOS/X"),
                PlistValue::from("run"),
            ]),
        );
        map.insert("RunAtLoad".to_string(), PlistValue::from(true));
        map.insert("KeepAlive".to_string(), PlistValue::from(false));
        map.insert("Nice".to_string(), PlistValue::Integer(-5));
        PlistValue::Dict(map)
    }

    #[test]
    fn rendering_is_deterministic() {
        assert_eq!(to_xml(&sample()), to_xml(&sample()));
    }

    #[test]
    fn escapes_special_characters() {
        let xml = to_xml(&sample());
        assert!(xml.contains("X &amp; Y.app"));
        assert!(xml.starts_with("<?xml"));
        assert!(xml.ends_with("</plist>\n"));
    }

    #[test]
    fn reads_back_rendered_document() {
        let parsed = from_xml(&to_xml(&sample())).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn rejects_non_plist_text() {
        assert!(from_xml("not a plist").is_none());
        assert!(from_xml("<plist version=\"1.0\"><dict><string>x</string></dict></plist>").is_none());
    }
}
