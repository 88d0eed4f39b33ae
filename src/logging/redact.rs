//! Secret masking for log output.
//!
//! Scrubs bearer credentials, `token=` query values and hook-token-shaped
//! strings from every line before it reaches stdout or a log file.

use regex::Regex;
use std::io::{self, Write};
use std::sync::LazyLock;
use tracing_subscriber::fmt::MakeWriter;

const REDACTED: &str = "[REDACTED]";

static RE_BEARER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bearer [a-zA-Z0-9._~+/=\-]+").expect("failed to compile regex: bearer")
});

static RE_QUERY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:admin_)?token=)[^&\s\x22]+").expect("failed to compile regex: query_token")
});

// <hex nanos>-<32 hex chars>, as produced by hooks::token
static RE_HOOK_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-f]{8,}-[0-9a-f]{32}\b").expect("failed to compile regex: hook_token")
});

/// Line-buffering writer that redacts each complete line
pub struct RedactingWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
}

const MAX_BUFFER_BYTES: usize = 8192;

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&self.buffer);
        let redacted = redact_string(&text);
        self.inner.write_all(redacted.as_bytes())?;
        self.buffer.fill(0);
        self.buffer.clear();
        Ok(())
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.buffer.extend_from_slice(buf);
        if self.buffer.len() > MAX_BUFFER_BYTES {
            self.flush_buffer()?;
        }
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line = self.buffer.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            let text = String::from_utf8_lossy(&line);
            let mut redacted = redact_string(&text);
            redacted.push('\n');
            // One write per line so a rotating sink never splits a record
            self.inner.write_all(redacted.as_bytes())?;
            line.fill(0);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()?;
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush_buffer();
        let _ = self.inner.flush();
    }
}

/// Wraps another `MakeWriter` so every writer it hands out redacts
pub struct RedactingMakeWriter<M> {
    inner: M,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
    M::Writer: Write,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new(self.inner.make_writer())
    }
}

pub fn redact_string(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let mut result = RE_BEARER.replace_all(input, REDACTED).into_owned();
    result = RE_QUERY_TOKEN
        .replace_all(&result, format!("${{1}}{}", REDACTED))
        .into_owned();
    result = RE_HOOK_TOKEN.replace_all(&result, REDACTED).into_owned();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bearer_token_is_redacted() {
        let result = redact_string("Authorization: Bearer abc.def-ghi");
        assert_eq!(result, "Authorization: [REDACTED]");
    }

    #[test]
    fn test_lowercase_bearer_is_redacted() {
        let result = redact_string("authorization: bearer s3cret");
        assert!(!result.contains("s3cret"));
    }

    #[test]
    fn test_query_token_is_redacted() {
        let result = redact_string("POST /webhook/ci?token=abc123&x=1");
        assert_eq!(result, "POST /webhook/ci?token=[REDACTED]&x=1");
    }

    #[test]
    fn test_admin_token_assignment_is_redacted() {
        let result = redact_string("admin_token=topsecret done");
        assert_eq!(result, "admin_token=[REDACTED] done");
    }

    #[test]
    fn test_generated_token_shape_is_redacted() {
        let token = crate::hooks::generate_token();
        let result = redact_string(&format!("new token {} issued", token));
        assert!(!result.contains(&token));
        assert_eq!(result, "new token [REDACTED] issued");
    }

    #[test]
    fn test_normal_string_unchanged() {
        let input = "hook triggered id=ci flag_file=proj/flag.txt";
        assert_eq!(redact_string(input), input);
    }

    #[test]
    fn test_empty_string_returns_empty() {
        assert_eq!(redact_string(""), "");
    }

    #[test]
    fn test_unicode_preserved() {
        let input = "hook «déploiement» token=abc";
        assert_eq!(redact_string(input), "hook «déploiement» token=[REDACTED]");
    }

    #[test]
    fn test_redacting_writer_redacts_lines() {
        let mut inner: Vec<u8> = Vec::new();
        {
            let mut writer = RedactingWriter::new(&mut inner);
            write!(writer, "Authorization: Bearer abc.def.ghi\nok").unwrap();
            writer.flush().unwrap();
        }
        let output = String::from_utf8(inner).unwrap();
        assert_eq!(output, "Authorization: [REDACTED]\nok");
    }

    #[test]
    fn test_redacting_writer_joins_split_writes() {
        let mut inner: Vec<u8> = Vec::new();
        {
            let mut writer = RedactingWriter::new(&mut inner);
            writer.write_all(b"path=/webhook/ci?tok").unwrap();
            writer.write_all(b"en=abc123\n").unwrap();
        }
        let output = String::from_utf8(inner).unwrap();
        assert_eq!(output, "path=/webhook/ci?token=[REDACTED]\n");
    }

    #[test]
    fn test_redacting_writer_flushes_on_max_buffer() {
        let mut inner: Vec<u8> = Vec::new();
        let chunk = "Bearer abc.def.ghi ";
        let repeat = (MAX_BUFFER_BYTES / chunk.len()) + 2;
        let payload = chunk.repeat(repeat);
        {
            let mut writer = RedactingWriter::new(&mut inner);
            write!(writer, "{}", payload).unwrap();
            writer.flush().unwrap();
        }
        let output = String::from_utf8(inner).unwrap();
        assert!(!output.contains("abc.def.ghi"));
        assert!(output.contains(REDACTED));
    }
}
