//! Snippet tab-stop parsing.
//!
//! Supports `$n`, `${n}` and `${n:placeholder}` (placeholders may nest) plus `\` escapes
//! of `$`, `}` and `\`. Anything that does not form a numeric tab stop, such as a `$`
//! without digits, a variable name or an unterminated `${`, is kept as literal text.

/// One tab stop, with byte offsets into [`Snippet::text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabStop {
    pub start: usize,
    pub end: usize,
    pub number: u32,
    pub placeholder: String,
}

/// A parsed snippet: the text to insert plus its tab stops, in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snippet {
    pub text: String,
    pub tab_stops: Vec<TabStop>,
}

impl Snippet {
    pub fn parse(input: &str) -> Self {
        let mut parser = Parser {
            src: input,
            pos: 0,
            text: String::new(),
            stops: Vec::new(),
        };
        parser.parse_until(false);
        Snippet {
            text: parser.text,
            tab_stops: parser.stops,
        }
    }

    /// Whether the snippet has any tab stop.
    pub fn has_tab_stops(&self) -> bool {
        !self.tab_stops.is_empty()
    }
}

/// Text shown for a bare `$n` tab stop.
const DEFAULT_PLACEHOLDER: &str = "...";

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    text: String,
    stops: Vec<TabStop>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    /// Consume a run of digits as a tab-stop number.
    fn number(&mut self) -> Option<u32> {
        let src = self.src;
        let rest = &src[self.pos..];
        let len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let number = rest[..len].parse().ok()?;
        self.pos += len;
        Some(number)
    }

    /// Returns whether a closing `}` ended the run (only looked for when `nested`).
    fn parse_until(&mut self, nested: bool) -> bool {
        while let Some(ch) = self.peek() {
            match ch {
                '\\' => {
                    self.bump();
                    match self.peek() {
                        Some(c @ ('$' | '}' | '\\')) => {
                            self.bump();
                            self.text.push(c);
                        }
                        _ => self.text.push('\\'),
                    }
                }
                '}' if nested => {
                    self.bump();
                    return true;
                }
                '$' => self.parse_dollar(),
                _ => {
                    self.bump();
                    self.text.push(ch);
                }
            }
        }
        false
    }

    fn parse_dollar(&mut self) {
        let dollar = self.pos;
        let text_len = self.text.len();
        let stops_len = self.stops.len();
        self.bump();

        if self.peek() != Some('{') {
            let Some(number) = self.number() else {
                self.text.push('$');
                return;
            };
            let placeholder = if number == 0 { "" } else { DEFAULT_PLACEHOLDER };
            self.text.push_str(placeholder);
            self.stops.push(TabStop {
                start: text_len,
                end: self.text.len(),
                number,
                placeholder: placeholder.to_string(),
            });
            return;
        }

        self.bump();
        let Some(number) = self.number() else {
            self.pos = dollar + 1;
            self.text.push('$');
            return;
        };

        match self.peek() {
            Some('}') => {
                self.bump();
                self.stops.push(TabStop {
                    start: text_len,
                    end: text_len,
                    number,
                    placeholder: String::new(),
                });
            }
            Some(':') => {
                self.bump();
                if !self.parse_until(true) {
                    // Unterminated: the whole rest is literal.
                    self.text.truncate(text_len);
                    self.stops.truncate(stops_len);
                    self.text.push_str(&self.src[dollar..]);
                    self.pos = self.src.len();
                    return;
                }
                let placeholder = self.text[text_len..].to_string();
                self.stops.insert(
                    stops_len,
                    TabStop {
                        start: text_len,
                        end: self.text.len(),
                        number,
                        placeholder,
                    },
                );
            }
            _ => {
                self.pos = dollar + 1;
                self.text.push('$');
            }
        }
    }
}
