//! Layout-aware parsing via Docling.
//!
//! Docling's markdown export escapes `&`, `<`, `>` and quotes as HTML
//! entities. Those are decoded back to characters before the text leaves the
//! adapter, so the artifact is clean Markdown rather than `AT&amp;T`. The
//! decoder follows Python's `html.unescape`, legacy references included.

use crate::backend::{BackendAdapter, BackendKind, ScriptCommand};
use crate::error::Pdf2MdError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const SCRIPT: &str = r#"import sys
from docling.document_converter import DocumentConverter
sys.stdout.reconfigure(encoding="utf-8")
result = DocumentConverter().convert(sys.argv[1])
sys.stdout.write(result.document.export_to_markdown())
"#;

#[derive(Debug, Clone)]
pub struct StructureAwareBackend {
    command: ScriptCommand,
}

impl StructureAwareBackend {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self::with_command(ScriptCommand::new(python, SCRIPT).with_timeout(timeout))
    }

    pub fn with_command(command: ScriptCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl BackendAdapter for StructureAwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::StructureAware
    }

    async fn convert(&self, input: &Path) -> Result<String, Pdf2MdError> {
        let exported = self.command.run(self.kind(), input).await?;
        Ok(decode_entities(&exported))
    }
}

/// Decode HTML character references the way Python's `html.unescape` does.
///
/// Besides `&name;` and `&#N;` this covers the legacy forms browsers still
/// accept: semicolonless names such as `&amp` or `&copy`, bare numeric
/// references, and the Windows-1252 remapping of `&#128;`..`&#159;`.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let decoded = RE_CHARREF.replace_all(text, |caps: &Captures<'_>| decode_reference(&caps[1]));
    if decoded.len() != text.len() {
        debug!(
            "decoded HTML entities: {} → {} bytes",
            text.len(),
            decoded.len()
        );
    }
    decoded.into_owned()
}

static RE_CHARREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]+;?|#[xX][0-9a-fA-F]+;?|[^\t\n\f <&#;]{1,32};?)")
        .expect("valid character reference regex")
});

fn decode_reference(body: &str) -> String {
    if let Some(number) = body.strip_prefix('#') {
        return decode_numeric(number);
    }

    if body.ends_with(';') {
        let reference = format!("&{body}");
        let decoded = html_escape::decode_html_entities(&reference);
        if decoded != reference.as_str() {
            return decoded.into_owned();
        }
    } else if let Some(c) = legacy_entity(body) {
        return c.to_string();
    }

    // Longest legacy name that prefixes the reference, e.g. `&notit;` → `¬it;`.
    for end in (2..body.len()).rev() {
        if let Some(c) = body.get(..end).and_then(legacy_entity) {
            return format!("{c}{}", &body[end..]);
        }
    }
    format!("&{body}")
}

fn decode_numeric(number: &str) -> String {
    let digits = number.trim_end_matches(';');
    let parsed = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => digits.parse::<u32>(),
    };
    // Only overflow can fail here; such values are past the Unicode range anyway.
    let code = parsed.unwrap_or(u32::MAX);

    if let Some(c) = windows_1252(code) {
        return c.to_string();
    }
    if (0xD800..=0xDFFF).contains(&code) || code > 0x10FFFF {
        return '\u{FFFD}'.to_string();
    }
    if is_disallowed_code_point(code) {
        return String::new();
    }
    char::from_u32(code).map(String::from).unwrap_or_else(|| '\u{FFFD}'.to_string())
}

/// Replacements for references that name a NUL, a bare CR or a C1 control.
fn windows_1252(code: u32) -> Option<char> {
    let c = match code {
        0x00 => '\u{FFFD}',
        0x0D => '\r',
        0x80 => '\u{20AC}',
        0x82 => '\u{201A}',
        0x83 => '\u{192}',
        0x84 => '\u{201E}',
        0x85 => '\u{2026}',
        0x86 => '\u{2020}',
        0x87 => '\u{2021}',
        0x88 => '\u{2C6}',
        0x89 => '\u{2030}',
        0x8A => '\u{160}',
        0x8B => '\u{2039}',
        0x8C => '\u{152}',
        0x8E => '\u{17D}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}',
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x98 => '\u{2DC}',
        0x99 => '\u{2122}',
        0x9A => '\u{161}',
        0x9B => '\u{203A}',
        0x9C => '\u{153}',
        0x9E => '\u{17E}',
        0x9F => '\u{178}',
        0x81 | 0x8D | 0x8F | 0x90 | 0x9D => char::from_u32(code)?,
        _ => return None,
    };
    Some(c)
}

/// Controls and noncharacters, which decode to nothing.
fn is_disallowed_code_point(code: u32) -> bool {
    matches!(code, 0x01..=0x08 | 0x0B | 0x0E..=0x1F | 0x7F..=0x9F | 0xFDD0..=0xFDEF)
        || code & 0xFFFE == 0xFFFE
}

fn legacy_entity(name: &str) -> Option<char> {
    LEGACY_ENTITIES
        .binary_search_by(|(n, _)| n.cmp(&name))
        .ok()
        .map(|i| LEGACY_ENTITIES[i].1)
}

/// Named references that are recognised without a trailing `;`, sorted by name.
static LEGACY_ENTITIES: [(&str, char); 106] = [
    ("AElig", '\u{C6}'),
    ("AMP", '&'),
    ("Aacute", '\u{C1}'),
    ("Acirc", '\u{C2}'),
    ("Agrave", '\u{C0}'),
    ("Aring", '\u{C5}'),
    ("Atilde", '\u{C3}'),
    ("Auml", '\u{C4}'),
    ("COPY", '\u{A9}'),
    ("Ccedil", '\u{C7}'),
    ("ETH", '\u{D0}'),
    ("Eacute", '\u{C9}'),
    ("Ecirc", '\u{CA}'),
    ("Egrave", '\u{C8}'),
    ("Euml", '\u{CB}'),
    ("GT", '>'),
    ("Iacute", '\u{CD}'),
    ("Icirc", '\u{CE}'),
    ("Igrave", '\u{CC}'),
    ("Iuml", '\u{CF}'),
    ("LT", '<'),
    ("Ntilde", '\u{D1}'),
    ("Oacute", '\u{D3}'),
    ("Ocirc", '\u{D4}'),
    ("Ograve", '\u{D2}'),
    ("Oslash", '\u{D8}'),
    ("Otilde", '\u{D5}'),
    ("Ouml", '\u{D6}'),
    ("QUOT", '"'),
    ("REG", '\u{AE}'),
    ("THORN", '\u{DE}'),
    ("Uacute", '\u{DA}'),
    ("Ucirc", '\u{DB}'),
    ("Ugrave", '\u{D9}'),
    ("Uuml", '\u{DC}'),
    ("Yacute", '\u{DD}'),
    ("aacute", '\u{E1}'),
    ("acirc", '\u{E2}'),
    ("acute", '\u{B4}'),
    ("aelig", '\u{E6}'),
    ("agrave", '\u{E0}'),
    ("amp", '&'),
    ("aring", '\u{E5}'),
    ("atilde", '\u{E3}'),
    ("auml", '\u{E4}'),
    ("brvbar", '\u{A6}'),
    ("ccedil", '\u{E7}'),
    ("cedil", '\u{B8}'),
    ("cent", '\u{A2}'),
    ("copy", '\u{A9}'),
    ("curren", '\u{A4}'),
    ("deg", '\u{B0}'),
    ("divide", '\u{F7}'),
    ("eacute", '\u{E9}'),
    ("ecirc", '\u{EA}'),
    ("egrave", '\u{E8}'),
    ("eth", '\u{F0}'),
    ("euml", '\u{EB}'),
    ("frac12", '\u{BD}'),
    ("frac14", '\u{BC}'),
    ("frac34", '\u{BE}'),
    ("gt", '>'),
    ("iacute", '\u{ED}'),
    ("icirc", '\u{EE}'),
    ("iexcl", '\u{A1}'),
    ("igrave", '\u{EC}'),
    ("iquest", '\u{BF}'),
    ("iuml", '\u{EF}'),
    ("laquo", '\u{AB}'),
    ("lt", '<'),
    ("macr", '\u{AF}'),
    ("micro", '\u{B5}'),
    ("middot", '\u{B7}'),
    ("nbsp", '\u{A0}'),
    ("not", '\u{AC}'),
    ("ntilde", '\u{F1}'),
    ("oacute", '\u{F3}'),
    ("ocirc", '\u{F4}'),
    ("ograve", '\u{F2}'),
    ("ordf", '\u{AA}'),
    ("ordm", '\u{BA}'),
    ("oslash", '\u{F8}'),
    ("otilde", '\u{F5}'),
    ("ouml", '\u{F6}'),
    ("para", '\u{B6}'),
    ("plusmn", '\u{B1}'),
    ("pound", '\u{A3}'),
    ("quot", '"'),
    ("raquo", '\u{BB}'),
    ("reg", '\u{AE}'),
    ("sect", '\u{A7}'),
    ("shy", '\u{AD}'),
    ("sup1", '\u{B9}'),
    ("sup2", '\u{B2}'),
    ("sup3", '\u{B3}'),
    ("szlig", '\u{DF}'),
    ("thorn", '\u{FE}'),
    ("times", '\u{D7}'),
    ("uacute", '\u{FA}'),
    ("ucirc", '\u{FB}'),
    ("ugrave", '\u{F9}'),
    ("uml", '\u{A8}'),
    ("uuml", '\u{FC}'),
    ("yacute", '\u{FD}'),
    ("yen", '\u{A5}'),
    ("yuml", '\u{FF}'),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_common_entities() {
        assert_eq!(decode_entities("AT&amp;T &lt;b&gt;"), "AT&T <b>");
        assert_eq!(decode_entities("&quot;x&quot; &#39;y&#x27;"), "\"x\" 'y'");
    }

    #[test]
    fn decodes_legacy_references_without_semicolon() {
        assert_eq!(decode_entities("AT&amp T &lt;b&gt"), "AT& T <b>");
        assert_eq!(
            decode_entities("&copy 2024 &ampfoo; &notit; &notin;"),
            "\u{A9} 2024 &foo; \u{AC}it; \u{2209}"
        );
        assert_eq!(decode_entities("a &LTb &nbsp;&nbspx"), "a <b \u{A0}\u{A0}x");
    }

    #[test]
    fn numeric_references_follow_html5_rules() {
        assert_eq!(
            decode_entities("&#39 &#x27 &#128; &#0; &#xD800; &#1114112; &#1; &#65"),
            "' ' \u{20AC} \u{FFFD} \u{FFFD} \u{FFFD}  A"
        );
        assert_eq!(decode_entities("&#99999999999999999999;"), "\u{FFFD}");
    }

    #[test]
    fn unknown_or_incomplete_references_stay() {
        let text = "&unknown; & x &# &#x; R&D";
        assert_eq!(decode_entities(text), text);
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn legacy_table_is_sorted() {
        assert!(LEGACY_ENTITIES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn plain_text_untouched() {
        let md = "# Title\n\n| a | b |\n| --- | --- |\n";
        assert_eq!(decode_entities(md), md);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn convert_decodes_exported_text() {
        let backend = StructureAwareBackend::with_command(ScriptCommand::new(
            "sh",
            "printf '## R&amp;D\\n\\n1 &lt; 2\\n'",
        ));
        let text = backend.convert(Path::new("paper.pdf")).await.unwrap();
        assert_eq!(text, "## R&D\n\n1 < 2\n");
        assert!(!text.contains("&amp;"));
    }
}
