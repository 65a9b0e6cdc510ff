use fixloop_llm::TaskKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    pub start_sep: String,
    pub end_sep: String,
    pub skip_first_line: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            start_sep: "```".to_string(),
            end_sep: "```".to_string(),
            skip_first_line: true,
        }
    }
}

/// Code isolated from one model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub raw_text: String,
    pub code: String,
    pub language: String,
    pub start_delim: String,
    pub end_delim: String,
    pub skip_first_line: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Extractor {
    pub options: ExtractOptions,
}

impl Extractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    /// Returns the delimited payload, or `text` unchanged when no complete block is present.
    pub fn extract(&self, text: &str, kind: TaskKind) -> String {
        let payload = self.payload(text);
        match kind {
            TaskKind::Code => payload.to_string(),
            TaskKind::Script | TaskKind::Command => strip_shell_tag(payload).to_string(),
        }
    }

    pub fn block(&self, text: &str, language: &str, kind: TaskKind) -> CodeBlock {
        CodeBlock {
            raw_text: text.to_string(),
            code: self.extract(text, kind),
            language: language.to_string(),
            start_delim: self.options.start_sep.clone(),
            end_delim: self.options.end_sep.clone(),
            skip_first_line: self.options.skip_first_line,
        }
    }

    fn payload<'a>(&self, text: &'a str) -> &'a str {
        let start_sep = self.options.start_sep.as_str();
        let end_sep = self.options.end_sep.as_str();
        if start_sep.is_empty() || end_sep.is_empty() {
            return text;
        }

        let Some(start) = text.find(start_sep) else {
            return text;
        };
        let mut pos = start + start_sep.len();

        let opened_with_newline = if text[pos..].starts_with("\r\n") {
            pos += 2;
            true
        } else if text[pos..].starts_with('\n') {
            pos += 1;
            true
        } else {
            false
        };

        let Some(len) = text[pos..].find(end_sep) else {
            return text;
        };
        let mut payload = &text[pos..pos + len];

        // A block opened on the same line as the fence carries a language tag.
        if self.options.skip_first_line && !opened_with_newline {
            if let Some(nl) = payload.find('\n') {
                payload = &payload[nl + 1..];
            }
        }

        if let Some(rest) = payload.strip_suffix('\n') {
            payload = rest.strip_suffix('\r').unwrap_or(rest);
        }
        payload
    }
}

fn strip_shell_tag(payload: &str) -> &str {
    let trimmed = payload.trim_start();
    match trimmed.strip_prefix("bash") {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim_start(),
        _ => payload,
    }
}

#[cfg(test)]
mod tests {
    use super::{ExtractOptions, Extractor};
    use fixloop_llm::TaskKind;

    fn extractor() -> Extractor {
        Extractor::default()
    }

    #[test]
    fn tagged_block_drops_language_line() {
        let text = "Here you go:\n```python\nprint('hi')\n```\nEnjoy.";
        assert_eq!(extractor().extract(text, TaskKind::Code), "print('hi')");
    }

    #[test]
    fn untagged_block_keeps_first_line() {
        let text = "```\nimport os\nprint(os.getcwd())\n```";
        assert_eq!(
            extractor().extract(text, TaskKind::Code),
            "import os\nprint(os.getcwd())"
        );
    }

    #[test]
    fn plain_text_is_returned_unchanged() {
        let text = "print('no fences')";
        let once = extractor().extract(text, TaskKind::Code);
        assert_eq!(once, text);
        assert_eq!(extractor().extract(&once, TaskKind::Code), once);
    }

    #[test]
    fn unterminated_block_falls_back_to_text() {
        let text = "```python\nprint(1)\n";
        assert_eq!(extractor().extract(text, TaskKind::Code), text);
    }

    #[test]
    fn wrapping_then_extracting_restores_code() {
        for code in ["", "x = 1", "a\nb\n", "def f():\n    return 2\n\nprint(f())"] {
            let wrapped = format!("```python\n{code}\n```");
            assert_eq!(extractor().extract(&wrapped, TaskKind::Code), code);
        }
    }

    #[test]
    fn skip_first_line_can_be_disabled() {
        let ex = Extractor::new(ExtractOptions {
            skip_first_line: false,
            ..ExtractOptions::default()
        });
        assert_eq!(ex.extract("```python\nprint(1)\n```", TaskKind::Code), "python\nprint(1)");
    }

    #[test]
    fn single_line_block_is_kept_whole() {
        assert_eq!(extractor().extract("```ls -la```", TaskKind::Command), "ls -la");
    }

    #[test]
    fn command_mode_strips_echoed_shell_name() {
        assert_eq!(
            extractor().extract("Run:\n```\nbash ls -la /tmp\n```", TaskKind::Command),
            "ls -la /tmp"
        );
        assert_eq!(
            extractor().extract("```bash\necho hi\n```", TaskKind::Script),
            "echo hi"
        );
        assert_eq!(extractor().extract("bashful --help", TaskKind::Command), "bashful --help");
    }

    #[test]
    fn code_mode_keeps_bash_prefix() {
        assert_eq!(extractor().extract("bash = 1", TaskKind::Code), "bash = 1");
    }

    #[test]
    fn custom_separators() {
        let ex = Extractor::new(ExtractOptions {
            start_sep: "<code>".to_string(),
            end_sep: "</code>".to_string(),
            skip_first_line: false,
        });
        assert_eq!(ex.extract("see <code>\nputs 1\n</code>", TaskKind::Code), "puts 1");
    }

    #[test]
    fn crlf_fences() {
        assert_eq!(
            extractor().extract("```\r\nprint(1)\r\n```", TaskKind::Code),
            "print(1)"
        );
    }

    #[test]
    fn block_records_delimiters() {
        let block = extractor().block("```ruby\nputs 1\n```", "ruby", TaskKind::Code);
        assert_eq!(block.code, "puts 1");
        assert_eq!(block.start_delim, "```");
        assert!(block.skip_first_line);
        assert_eq!(block.raw_text, "```ruby\nputs 1\n```");
    }
}
