use super::error::PdfResult;
use super::primitives::{Dict, PdfObject, to_pdf_string};
use super::xref::XRef;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    /// Whitelisted JavaScript link patterns: `app.launchURL('...')` and
    /// `window.open('...')`, with an optional boolean second argument.
    static ref JS_URL_RE: Regex = Regex::new(
        r#"(?i)^\s*(app\.launchURL|window\.open)\((?:'|")([^'"]*)(?:'|")(?:,\s*(\w+)\))?"#
    )
    .unwrap();
    static ref SCHEME_RE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:").unwrap();
}

const ALLOWED_SCHEMES: [&str; 5] = ["http", "https", "ftp", "mailto", "tel"];

/// A navigation target: an explicit destination array or a name to resolve
/// through the destinations map.
#[derive(Debug, Clone, PartialEq)]
pub enum Dest {
    Array(Vec<PdfObject>),
    Named(String),
}

/// Normalized form of a destination or action dictionary.
#[derive(Debug, Clone, Default)]
pub struct ParsedDestination {
    /// Validated absolute URL
    pub url: Option<String>,
    /// The URL as written in the document, before validation
    pub unsafe_url: Option<String>,
    pub dest: Option<Dest>,
    pub new_window: Option<bool>,
    /// Canonical named action (`Print`, `NextPage`, ...)
    pub action: Option<String>,
}

/// Interprets a dictionary that encodes an action (`/A`) or a destination
/// (`/Dest`), normalizing GoTo, GoToR, Launch, URI, Named and whitelisted
/// JavaScript actions.
pub fn parse_dest_dictionary(
    xref: &mut XRef,
    dest_dict: &Dict,
    base_url: Option<&str>,
) -> PdfResult<ParsedDestination> {
    let mut result = ParsedDestination::default();
    let mut url_bytes: Option<Vec<u8>> = None;
    let mut dest_obj: Option<PdfObject> = None;

    if let Some(action) = dest_dict.get_dict(xref, "A")? {
        let action_type = action.get_name(xref, "S")?.unwrap_or_default();
        match action_type.as_str() {
            "URI" => match action.get(xref, "URI")? {
                Some(PdfObject::String(bytes)) => {
                    // Scheme-less `www.` links get an http prefix.
                    if bytes.starts_with(b"www.") {
                        let mut prefixed = b"http://".to_vec();
                        prefixed.extend_from_slice(&bytes);
                        url_bytes = Some(prefixed);
                    } else {
                        url_bytes = Some(bytes);
                    }
                }
                // Non-compliant files store the URI as a name.
                Some(PdfObject::Name(name)) => {
                    url_bytes = Some(format!("/{}", name).into_bytes());
                }
                _ => {}
            },

            "GoTo" => {
                dest_obj = action.get(xref, "D")?;
            }

            "Launch" | "GoToR" => {
                match action.get(xref, "F")? {
                    // A FileSpec-like dictionary: take its /F entry.
                    Some(PdfObject::Dictionary(file_spec)) => {
                        if let Some(bytes) = file_spec.get_string(xref, "F")? {
                            url_bytes = Some(bytes);
                        }
                    }
                    Some(PdfObject::String(bytes)) => url_bytes = Some(bytes),
                    _ => {}
                }

                // A remote destination becomes a URL fragment; explicit
                // arrays are JSON-stringified.
                if let Some(remote) = action.get(xref, "D")? {
                    let fragment = match remote {
                        PdfObject::Name(name) => Some(name),
                        PdfObject::String(bytes) => Some(to_pdf_string(&bytes)),
                        PdfObject::Array(items) => Some(json_stringify(&items)),
                        _ => None,
                    };
                    if let (Some(bytes), Some(fragment)) = (url_bytes.as_mut(), fragment) {
                        bytes.push(b'#');
                        bytes.extend_from_slice(fragment.as_bytes());
                    }
                }

                if let Some(new_window) = action.get_bool(xref, "NewWindow")? {
                    result.new_window = Some(new_window);
                }
            }

            "Named" => {
                if let Some(name) = action.get_name(xref, "N")? {
                    result.action = Some(name);
                }
            }

            "JavaScript" => {
                let js_text = match action.get(xref, "JS")? {
                    Some(PdfObject::String(bytes)) => Some(to_pdf_string(&bytes)),
                    Some(PdfObject::Stream(stream)) => {
                        Some(String::from_utf8_lossy(&stream.decoded_bytes()?).into_owned())
                    }
                    _ => None,
                };
                if let Some(text) = js_text {
                    if let Some(caps) = JS_URL_RE.captures(&text) {
                        url_bytes = Some(caps[2].as_bytes().to_vec());
                        let is_launch_url = caps[1].eq_ignore_ascii_case("app.launchURL");
                        let second_arg_true = caps
                            .get(3)
                            .is_some_and(|m| m.as_str().eq_ignore_ascii_case("true"));
                        if is_launch_url && second_arg_true {
                            result.new_window = Some(true);
                        }
                    }
                }
            }

            other => {
                warn!("parse_dest_dictionary: unsupported action type {:?}", other);
            }
        }
    } else if dest_dict.has("Dest") {
        dest_obj = dest_dict.get(xref, "Dest")?;
    }

    if let Some(dest) = dest_obj {
        match dest {
            PdfObject::Name(name) => result.dest = Some(Dest::Named(name)),
            PdfObject::String(bytes) => result.dest = Some(Dest::Named(to_pdf_string(&bytes))),
            PdfObject::Array(items) => result.dest = Some(Dest::Array(items)),
            _ => {}
        }
    }

    if let Some(bytes) = url_bytes {
        let url = recover_utf8(&bytes);
        if let Some(absolute) = create_valid_absolute_url(&url, base_url) {
            result.url = Some(absolute);
        }
        result.unsafe_url = Some(url);
    }

    Ok(result)
}

/// URI strings are raw bytes; prefer a UTF-8 reading, fall back to Latin-1.
fn recover_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn json_stringify(items: &[PdfObject]) -> String {
    let value = Value::Array(items.iter().map(to_json).collect());
    value.to_string()
}

fn to_json(obj: &PdfObject) -> Value {
    match obj {
        PdfObject::Null | PdfObject::Reference(_) | PdfObject::Command(_) | PdfObject::Stream(_) => {
            Value::Null
        }
        PdfObject::Boolean(b) => Value::Bool(*b),
        PdfObject::Integer(i) => Value::from(*i),
        PdfObject::Real(r) => serde_json::Number::from_f64(*r)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        PdfObject::String(bytes) => Value::String(to_pdf_string(bytes)),
        PdfObject::Name(name) => Value::String(name.clone()),
        PdfObject::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        PdfObject::Dictionary(dict) => Value::Object(
            dict.iter()
                .map(|(k, v)| (k.to_string(), to_json(v)))
                .collect(),
        ),
    }
}

/// Validates a URL, resolving it against `base_url` when relative. Only a
/// small scheme whitelist survives.
fn create_valid_absolute_url(url: &str, base_url: Option<&str>) -> Option<String> {
    if url.is_empty() {
        return None;
    }

    if SCHEME_RE.is_match(url) {
        let scheme = url.split(':').next().unwrap_or("").to_ascii_lowercase();
        return ALLOWED_SCHEMES.contains(&scheme.as_str()).then(|| url.to_string());
    }

    let base = base_url?;
    if !SCHEME_RE.is_match(base) {
        return None;
    }
    let scheme = base.split(':').next().unwrap_or("").to_ascii_lowercase();
    if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
        return None;
    }

    let joined = if let Some(path) = url.strip_prefix('/') {
        format!("{}/{}", base_authority(base), path)
    } else if base.ends_with('/') {
        format!("{}{}", base, url)
    } else {
        match base.rfind('/') {
            Some(slash) if slash > base.find("://").map_or(0, |p| p + 2) => {
                format!("{}/{}", &base[..slash], url)
            }
            _ => format!("{}/{}", base, url),
        }
    };
    Some(joined)
}

/// `scheme://authority` prefix of an absolute URL.
fn base_authority(base: &str) -> &str {
    let after_scheme = match base.find("://") {
        Some(pos) => pos + 3,
        None => return base,
    };
    match base[after_scheme..].find('/') {
        Some(slash) => &base[..after_scheme + slash],
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::MemoryStream;

    fn empty_xref() -> XRef {
        XRef::new(Box::new(MemoryStream::new(Vec::new())))
    }

    fn action_dict(entries: Vec<(&str, PdfObject)>) -> Dict {
        let mut action = Dict::new();
        for (key, value) in entries {
            action.insert(key, value);
        }
        let mut wrapper = Dict::new();
        wrapper.insert("A", PdfObject::Dictionary(action));
        wrapper
    }

    #[test]
    fn test_uri_action() {
        let dict = action_dict(vec![
            ("S", PdfObject::Name("URI".into())),
            ("URI", PdfObject::String(b"https://example.com/x".to_vec())),
        ]);
        let result = parse_dest_dictionary(&mut empty_xref(), &dict, None).unwrap();
        assert_eq!(result.url.as_deref(), Some("https://example.com/x"));
        assert_eq!(result.unsafe_url.as_deref(), Some("https://example.com/x"));
    }

    #[test]
    fn test_uri_www_gets_http_prefix() {
        let dict = action_dict(vec![
            ("S", PdfObject::Name("URI".into())),
            ("URI", PdfObject::String(b"www.example.com".to_vec())),
        ]);
        let result = parse_dest_dictionary(&mut empty_xref(), &dict, None).unwrap();
        assert_eq!(result.url.as_deref(), Some("http://www.example.com"));
    }

    #[test]
    fn test_goto_action() {
        let dict = action_dict(vec![
            ("S", PdfObject::Name("GoTo".into())),
            (
                "D",
                PdfObject::Array(vec![
                    PdfObject::Integer(0),
                    PdfObject::Name("Fit".into()),
                ]),
            ),
        ]);
        let result = parse_dest_dictionary(&mut empty_xref(), &dict, None).unwrap();
        assert!(matches!(result.dest, Some(Dest::Array(items)) if items.len() == 2));
    }

    #[test]
    fn test_gotor_remote_destination_fragment() {
        let mut file_spec = Dict::new();
        file_spec.insert("F", PdfObject::String(b"manual.pdf".to_vec()));
        let dict = action_dict(vec![
            ("S", PdfObject::Name("GoToR".into())),
            ("F", PdfObject::Dictionary(file_spec)),
            (
                "D",
                PdfObject::Array(vec![
                    PdfObject::Integer(2),
                    PdfObject::Name("Fit".into()),
                ]),
            ),
            ("NewWindow", PdfObject::Boolean(true)),
        ]);
        let result =
            parse_dest_dictionary(&mut empty_xref(), &dict, Some("http://host/")).unwrap();
        assert_eq!(
            result.url.as_deref(),
            Some("http://host/manual.pdf#[2,\"Fit\"]")
        );
        assert_eq!(result.unsafe_url.as_deref(), Some("manual.pdf#[2,\"Fit\"]"));
        assert_eq!(result.new_window, Some(true));
    }

    #[test]
    fn test_named_action() {
        let dict = action_dict(vec![
            ("S", PdfObject::Name("Named".into())),
            ("N", PdfObject::Name("NextPage".into())),
        ]);
        let result = parse_dest_dictionary(&mut empty_xref(), &dict, None).unwrap();
        assert_eq!(result.action.as_deref(), Some("NextPage"));
    }

    #[test]
    fn test_javascript_launch_url() {
        let dict = action_dict(vec![
            ("S", PdfObject::Name("JavaScript".into())),
            (
                "JS",
                PdfObject::String(b"app.launchURL('https://example.com/doc', true)".to_vec()),
            ),
        ]);
        let result = parse_dest_dictionary(&mut empty_xref(), &dict, None).unwrap();
        assert_eq!(result.url.as_deref(), Some("https://example.com/doc"));
        assert_eq!(result.new_window, Some(true));
    }

    #[test]
    fn test_javascript_window_open_no_new_window() {
        let dict = action_dict(vec![
            ("S", PdfObject::Name("JavaScript".into())),
            (
                "JS",
                PdfObject::String(b"window.open(\"https://example.com\")".to_vec()),
            ),
        ]);
        let result = parse_dest_dictionary(&mut empty_xref(), &dict, None).unwrap();
        assert_eq!(result.url.as_deref(), Some("https://example.com"));
        assert_eq!(result.new_window, None);
    }

    #[test]
    fn test_top_level_dest() {
        let mut dict = Dict::new();
        dict.insert("Dest", PdfObject::Name("chapter1".into()));
        let result = parse_dest_dictionary(&mut empty_xref(), &dict, None).unwrap();
        assert_eq!(result.dest, Some(Dest::Named("chapter1".into())));
    }

    #[test]
    fn test_disallowed_scheme_dropped() {
        let dict = action_dict(vec![
            ("S", PdfObject::Name("URI".into())),
            ("URI", PdfObject::String(b"file:///etc/passwd".to_vec())),
        ]);
        let result = parse_dest_dictionary(&mut empty_xref(), &dict, None).unwrap();
        assert_eq!(result.url, None);
        assert_eq!(result.unsafe_url.as_deref(), Some("file:///etc/passwd"));
    }

    #[test]
    fn test_relative_url_against_base() {
        assert_eq!(
            create_valid_absolute_url("doc.pdf", Some("http://host/dir/index.html")),
            Some("http://host/dir/doc.pdf".to_string())
        );
        assert_eq!(
            create_valid_absolute_url("/doc.pdf", Some("http://host/dir/")),
            Some("http://host/doc.pdf".to_string())
        );
        assert_eq!(create_valid_absolute_url("doc.pdf", None), None);
    }
}
