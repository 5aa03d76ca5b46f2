//! The `Analyzer` interface consumed by the field-indexing pipeline. Text
//! analysis itself (tokenisers, stemmers, stop-word filters) is out of
//! scope for this workspace; the two analyzers here exist only so the
//! segment writer is exercisable end to end in tests without an external
//! analysis crate.

/// A single token produced by a [`TokenStream`].
pub trait Token {
    /// The raw term bytes. Not necessarily UTF-8.
    fn term_bytes(&self) -> &[u8];
    /// Gap, in positions, between this token and the previous one. `1` for
    /// consecutive tokens; larger values open a gap (e.g. across a
    /// stop-word that was filtered out) so phrase queries don't falsely
    /// match across it.
    fn position_increment(&self) -> u32;
    /// Byte offsets `[start, end)` of this token in the original field
    /// value.
    fn offset(&self) -> (u32, u32);
    /// Optional arbitrary payload attached to this occurrence.
    fn payload(&self) -> Option<&[u8]>;
}

#[derive(Clone, Debug, Default)]
pub struct SimpleToken {
    pub term: Vec<u8>,
    pub position_increment: u32,
    pub offset: (u32, u32),
    pub payload: Option<Vec<u8>>,
}

impl Token for SimpleToken {
    fn term_bytes(&self) -> &[u8] {
        &self.term
    }

    fn position_increment(&self) -> u32 {
        self.position_increment
    }

    fn offset(&self) -> (u32, u32) {
        self.offset
    }

    fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

/// A lazy sequence of tokens produced from one field value. `advance`
/// returns `false` once exhausted; the current token is available through
/// `current` until the next call to `advance`.
pub trait TokenStream {
    fn advance(&mut self) -> bool;
    fn current(&self) -> &dyn Token;
}

/// `(type_name, options_json) -> Analyzer`. Analyzers are stateless across
/// documents after `reset`.
pub trait Analyzer: Send + Sync {
    fn reset<'a>(&'a self, bytes: &'a [u8]) -> Box<dyn TokenStream + 'a>;
}

/// Splits on ASCII whitespace, preserving byte offsets. No case-folding, no
/// stemming.
#[derive(Default)]
pub struct WhitespaceAnalyzer;

struct WhitespaceTokenStream<'a> {
    bytes: &'a [u8],
    pos: usize,
    current: Option<SimpleToken>,
}

impl<'a> TokenStream for WhitespaceTokenStream<'a> {
    fn advance(&mut self) -> bool {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.pos >= self.bytes.len() {
            self.current = None;
            return false;
        }
        let start = self.pos;
        while self.pos < self.bytes.len() && !self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        self.current = Some(SimpleToken {
            term: self.bytes[start..self.pos].to_vec(),
            position_increment: 1,
            offset: (start as u32, self.pos as u32),
            payload: None,
        });
        true
    }

    fn current(&self) -> &dyn Token {
        self.current.as_ref().expect("advance() not called or exhausted")
    }
}

impl Analyzer for WhitespaceAnalyzer {
    fn reset<'a>(&'a self, bytes: &'a [u8]) -> Box<dyn TokenStream + 'a> {
        Box::new(WhitespaceTokenStream {
            bytes,
            pos: 0,
            current: None,
        })
    }
}

/// Splits on non-alphanumeric boundaries and lower-cases ASCII letters.
/// Non-UTF-8 input yields no tokens rather than failing, since analyzer
/// errors are meant to be rare and field-local.
#[derive(Default)]
pub struct Utf8WordAnalyzer;

struct Utf8WordTokenStream<'a> {
    text: &'a str,
    pos: usize,
    current: Option<SimpleToken>,
}

impl<'a> TokenStream for Utf8WordTokenStream<'a> {
    fn advance(&mut self) -> bool {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() && !bytes[self.pos].is_ascii_alphanumeric() {
            self.pos += 1;
        }
        if self.pos >= bytes.len() {
            self.current = None;
            return false;
        }
        let start = self.pos;
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_alphanumeric() {
            self.pos += 1;
        }
        let word = self.text[start..self.pos].to_ascii_lowercase();
        self.current = Some(SimpleToken {
            term: word.into_bytes(),
            position_increment: 1,
            offset: (start as u32, self.pos as u32),
            payload: None,
        });
        true
    }

    fn current(&self) -> &dyn Token {
        self.current.as_ref().expect("advance() not called or exhausted")
    }
}

struct EmptyTokenStream;

impl TokenStream for EmptyTokenStream {
    fn advance(&mut self) -> bool {
        false
    }

    fn current(&self) -> &dyn Token {
        panic!("current() called on an exhausted token stream")
    }
}

impl Analyzer for Utf8WordAnalyzer {
    fn reset<'a>(&'a self, bytes: &'a [u8]) -> Box<dyn TokenStream + 'a> {
        match std::str::from_utf8(bytes) {
            Ok(text) => Box::new(Utf8WordTokenStream {
                text,
                pos: 0,
                current: None,
            }),
            Err(_) => Box::new(EmptyTokenStream),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(tokens: &mut dyn TokenStream) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while tokens.advance() {
            out.push(tokens.current().term_bytes().to_vec());
        }
        out
    }

    #[test]
    fn whitespace_splits_on_spaces() {
        let analyzer = WhitespaceAnalyzer;
        let mut stream = analyzer.reset(b"the quick  brown fox");
        assert_eq!(
            collect(&mut *stream),
            vec![
                b"the".to_vec(),
                b"quick".to_vec(),
                b"brown".to_vec(),
                b"fox".to_vec(),
            ]
        );
    }

    #[test]
    fn utf8_word_lowercases_and_splits_on_punctuation() {
        let analyzer = Utf8WordAnalyzer;
        let mut stream = analyzer.reset(b"Hello, World! Rust-lang");
        assert_eq!(
            collect(&mut *stream),
            vec![
                b"hello".to_vec(),
                b"world".to_vec(),
                b"rust".to_vec(),
                b"lang".to_vec(),
            ]
        );
    }
}
