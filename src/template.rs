//! Filename templates.
//!
//! A template such as `{{.Timestamp}}-{{.Provider}}-{{.Subject}}` is expanded
//! against a [`FilenameContext`] into a file name that is safe on every
//! platform, then resolved against an output directory without overwriting
//! existing files.
//!
//! Placeholders: `Timestamp` (`%m%d%y.%H%M%S`), `Date` (`%m%d%y`), `Time`
//! (`%H%M%S`), `Provider`, `Model`, `Subject`, `Hash`, and `Counter` (only when
//! the context carries one). Unknown placeholders expand to nothing.

use chrono::{DateTime, Local};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Longest subject returned by [`extract_subject`].
pub const MAX_SUBJECT_CHARS: usize = 50;

const SUBJECT_WORDS: usize = 4;

const FALLBACK_SUBJECT: &str = "image";

/// Lead-ins removed from the front of a prompt, longest first.
const PREFIXES: &[&str] = &[
    "digital painting of ",
    "highly detailed ",
    "award-winning ",
    "masterpiece ",
    "picture of ",
    "professional ",
    "artwork of ",
    "generate ",
    "realistic ",
    "beautiful ",
    "image of ",
    "detailed ",
    "stunning ",
    "create ",
    "paint ",
    "make ",
    "draw ",
    "the ",
    "an ",
    "a ",
];

/// Style suffixes removed from the end of a prompt, longest first.
const SUFFIXES: &[&str] = &[
    " highly detailed",
    " illustration",
    " professional",
    " digital art",
    " concept art",
    " masterpiece",
    " painting",
    " artwork",
    " picture",
    " render",
    " image",
    " style",
    " art",
    " 4k",
    " 8k",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "with", "and", "or", "but", "in", "on", "at", "to", "for", "of", "from",
    "up", "about", "into", "through", "during", "before", "after", "above", "below", "between",
    "among", "very", "really", "quite", "rather", "too",
];

fn word_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\b[a-zA-Z]+\b").expect("word regex is valid"))
}

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{\{([^}]*)\}\}").expect("placeholder regex is valid"))
}

fn unsafe_chars_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("unsafe chars regex is valid"))
}

fn underscores_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"_+").expect("underscore regex is valid"))
}

/// Values a template is expanded against.
#[derive(Debug, Clone)]
pub struct FilenameContext {
    /// Prompt as the caller wrote it.
    pub prompt: String,
    /// Provider identifier.
    pub provider: String,
    /// Resolved model.
    pub model: String,
    /// Generation time.
    pub timestamp: DateTime<Local>,
    /// Value of `{{.Counter}}`, if any.
    pub counter: Option<u32>,
}

impl FilenameContext {
    /// Creates a context stamped with the current local time.
    pub fn new(
        prompt: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            provider: provider.into(),
            model: model.into(),
            timestamp: Local::now(),
            counter: None,
        }
    }

    /// Sets the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the counter.
    pub fn with_counter(mut self, counter: u32) -> Self {
        self.counter = Some(counter);
        self
    }

    fn value(&self, name: &str) -> Option<String> {
        let value = match name {
            "Timestamp" => self.timestamp.format("%m%d%y.%H%M%S").to_string(),
            "Date" => self.timestamp.format("%m%d%y").to_string(),
            "Time" => self.timestamp.format("%H%M%S").to_string(),
            "Provider" => self.provider.to_lowercase(),
            "Model" => self.model.replace(['.', '-'], ""),
            "Subject" => extract_subject(&self.prompt),
            "Hash" => prompt_hash(&self.prompt),
            "Counter" => format!("{:03}", self.counter?),
            _ => return None,
        };
        Some(value)
    }
}

/// Derives a short `[a-z_]` subject from a prompt.
///
/// Never empty and at most [`MAX_SUBJECT_CHARS`] long.
pub fn extract_subject(prompt: &str) -> String {
    let mut text = prompt.trim().to_lowercase();

    if let Some(prefix) = PREFIXES.iter().find(|p| text.starts_with(*p)) {
        text.replace_range(..prefix.len(), "");
    }
    if let Some(suffix) = SUFFIXES.iter().find(|s| text.ends_with(*s)) {
        text.truncate(text.len() - suffix.len());
    }

    let words: Vec<&str> = word_regex().find_iter(&text).map(|m| m.as_str()).collect();
    let meaningful: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| !STOP_WORDS.contains(w))
        .collect();
    let chosen = if meaningful.is_empty() { &words } else { &meaningful };

    let mut subject = chosen
        .iter()
        .take(SUBJECT_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join("_");
    // ASCII only, so byte truncation is safe.
    subject.truncate(MAX_SUBJECT_CHARS);
    let subject = subject.trim_matches('_');

    if subject.is_empty() {
        FALLBACK_SUBJECT.to_string()
    } else {
        subject.to_string()
    }
}

/// First 8 hex characters of the MD5 digest of `prompt`.
pub fn prompt_hash(prompt: &str) -> String {
    let digest = format!("{:x}", md5::compute(prompt.as_bytes()));
    digest[..8].to_string()
}

/// Expands `template` into a sanitized file name without extension.
pub fn apply_template(template: &str, ctx: &FilenameContext) -> String {
    let expanded = placeholder_regex().replace_all(template, |caps: &regex::Captures<'_>| {
        caps[1]
            .trim()
            .strip_prefix('.')
            .and_then(|name| ctx.value(name))
            .unwrap_or_default()
    });

    let safe = unsafe_chars_regex().replace_all(&expanded, "_");
    let collapsed = underscores_regex().replace_all(&safe, "_");
    let name = collapsed.trim_matches('_');

    if name.is_empty() {
        extract_subject(&ctx.prompt)
    } else {
        name.to_string()
    }
}

/// Resolves the destination path for a new image.
///
/// Appends `.{extension}` when missing. An existing file is never reused:
/// `_001`, `_002`, ... are inserted before the extension until the name is free.
pub fn render(
    template: &str,
    ctx: &FilenameContext,
    output_dir: &Path,
    extension: &str,
) -> PathBuf {
    let mut name = apply_template(template, ctx);
    let dotted = format!(".{}", extension);
    if !name.ends_with(&dotted) {
        name.push_str(&dotted);
    }

    let candidate = output_dir.join(&name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = &name[..name.len() - dotted.len()];
    let mut counter = 1u32;
    loop {
        let candidate = output_dir.join(format!("{}_{:03}{}", stem, counter, dotted));
        if !candidate.exists() {
            tracing::debug!(path = %candidate.display(), "filename taken, using suffixed name");
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap()
    }

    fn ctx(prompt: &str) -> FilenameContext {
        FilenameContext::new(prompt, "Stability", "sd3.5-large").with_timestamp(fixed_time())
    }

    #[test]
    fn test_extract_subject() {
        assert_eq!(
            extract_subject("A serene mountain landscape at sunset"),
            "serene_mountain_landscape_sunset"
        );
        assert_eq!(
            extract_subject("Digital painting of a futuristic city"),
            "futuristic_city"
        );
        assert_eq!(
            extract_subject("Highly detailed artwork of a dragon"),
            "artwork_dragon"
        );
        assert_eq!(
            extract_subject("Beautiful anime girl with blue hair"),
            "anime_girl_blue_hair"
        );
        assert_eq!(extract_subject("a cat, watercolor style"), "cat_watercolor");
    }

    #[test]
    fn test_extract_subject_fallbacks() {
        assert_eq!(extract_subject(""), "image");
        assert_eq!(extract_subject("1234 !!!"), "image");
        // Only stop words left: raw tokens are used instead.
        assert_eq!(extract_subject("with and or"), "with_and_or");
    }

    #[test]
    fn test_extract_subject_shape() {
        let prompts = [
            "Supercalifragilisticexpialidocious antidisestablishmentarianism floccinaucinihilipilification",
            "Ünïcödé prompt with émojis 🎨 and ÀCCENTS",
            "___",
            "The THE the",
        ];
        for prompt in prompts {
            let subject = extract_subject(prompt);
            assert!(!subject.is_empty(), "{prompt}");
            assert!(subject.len() <= MAX_SUBJECT_CHARS, "{prompt}");
            assert!(
                subject
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
                "{prompt} -> {subject}"
            );
        }
    }

    #[test]
    fn test_prompt_hash() {
        // md5("hello") = 5d41402abc4b2a76b9719d911017c592
        assert_eq!(prompt_hash("hello"), "5d41402a");
        assert_eq!(prompt_hash("hello").len(), 8);
    }

    #[test]
    fn test_apply_template_placeholders() {
        let c = ctx("A red fox").with_counter(7);
        assert_eq!(
            apply_template("{{.Timestamp}}-{{.Provider}}-{{.Subject}}", &c),
            "030724.140509-stability-red_fox"
        );
        assert_eq!(apply_template("{{.Date}}_{{.Time}}", &c), "030724_140509");
        assert_eq!(apply_template("{{.Model}}-{{.Counter}}", &c), "sd35large-007");
        assert_eq!(apply_template("{{.Hash}}", &c), prompt_hash("A red fox"));
    }

    #[test]
    fn test_apply_template_strips_unknown_and_sanitizes() {
        let c = ctx("A red fox");
        assert_eq!(apply_template("{{.Nope}}{{.Subject}}{{Counter}}", &c), "red_fox");
        // Counter without a value expands to nothing.
        assert_eq!(apply_template("{{.Subject}}_{{.Counter}}", &c), "red_fox");
        assert_eq!(apply_template("a<b>c:d|e?f*g\"h", &c), "a_b_c_d_e_f_g_h");
        assert_eq!(apply_template("../../etc/passwd", &c), ".._.._etc_passwd");
        assert_eq!(apply_template("__x___y__", &c), "x_y");
        assert_eq!(apply_template("{{.Missing}}", &c), "red_fox");
    }

    #[test]
    fn test_recognized_placeholders_leave_no_residue() {
        let c = ctx("A red fox").with_counter(1);
        let template = "{{.Timestamp}}{{.Date}}{{.Time}}{{.Provider}}{{.Model}}{{.Subject}}{{.Hash}}{{.Counter}}";
        let name = apply_template(template, &c);
        assert!(!name.contains("{{"));
        assert!(!name.contains("}}"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx("A red fox");
        let first = render("{{.Timestamp}}-{{.Subject}}", &c, dir.path(), "png");
        let second = render("{{.Timestamp}}-{{.Subject}}", &c, dir.path(), "png");
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("030724.140509-red_fox.png"));
    }

    #[test]
    fn test_render_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx("A red fox");

        let first = render("{{.Subject}}", &c, dir.path(), "png");
        std::fs::write(&first, b"x").unwrap();

        let second = render("{{.Subject}}", &c, dir.path(), "png");
        assert_eq!(second, dir.path().join("red_fox_001.png"));
        std::fs::write(&second, b"x").unwrap();

        let third = render("{{.Subject}}", &c, dir.path(), "png");
        assert_eq!(third, dir.path().join("red_fox_002.png"));
    }

    #[test]
    fn test_render_keeps_existing_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = render("{{.Subject}}.png", &ctx("A red fox"), dir.path(), "png");
        assert_eq!(path, dir.path().join("red_fox.png"));
    }
}
