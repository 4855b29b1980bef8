//! Shader script parsing.
//!
//! Shader files are plain text containing a sequence of top-level
//! `name { ... }` blocks. The parser tracks brace depth and must not be
//! fooled by nested braces, `//` and `/* */` comments, or string literals
//! containing braces. Each discovered block becomes a byte range pointing
//! back into the source file; the index never stores shader bodies.

use thiserror::Error;

/// Longest accepted shader name, matching the engine's token limit.
pub const MAX_SHADER_NAME: usize = 1024;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShaderParseError {
    #[error("shader block for {name:?} is not terminated")]
    UnterminatedBlock { name: String },
    #[error("unterminated block comment at offset {offset}")]
    UnterminatedComment { offset: usize },
    #[error("expected '{{' after shader name {name:?} at offset {offset}")]
    MissingOpenBrace { name: String, offset: usize },
    #[error("stray '}}' at offset {offset}")]
    StrayCloseBrace { offset: usize },
    #[error("shader name at offset {offset} exceeds {MAX_SHADER_NAME} bytes")]
    NameTooLong { offset: usize },
}

/// One top-level shader block: the name and the byte range covering the
/// name through the closing brace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBlock {
    pub name: String,
    pub start: u32,
    pub end: u32,
}

struct Scanner<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    /// Skip whitespace and comments. Errors on an unterminated `/*`.
    fn skip_filler(&mut self) -> Result<(), ShaderParseError> {
        loop {
            while self.pos < self.data.len() && self.data[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.data[self.pos..].starts_with(b"//") {
                while self.pos < self.data.len() && self.data[self.pos] != b'\n' {
                    self.pos += 1;
                }
            } else if self.data[self.pos..].starts_with(b"/*") {
                let start = self.pos;
                self.pos += 2;
                match self.data[self.pos..].windows(2).position(|w| w == b"*/") {
                    Some(close) => self.pos += close + 2,
                    None => return Err(ShaderParseError::UnterminatedComment { offset: start }),
                }
            } else {
                return Ok(());
            }
        }
    }

    /// Read one token: a quoted string, a lone brace, or a bare word.
    /// Returns (start offset, token bytes).
    fn next_token(&mut self) -> Result<Option<(usize, &'a [u8])>, ShaderParseError> {
        self.skip_filler()?;
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let start = self.pos;
        match self.data[self.pos] {
            b'"' => {
                self.pos += 1;
                let content_start = self.pos;
                while self.pos < self.data.len() && self.data[self.pos] != b'"' {
                    self.pos += 1;
                }
                let content_end = self.pos;
                if self.pos < self.data.len() {
                    self.pos += 1; // closing quote
                }
                Ok(Some((start, &self.data[content_start..content_end])))
            }
            b'{' | b'}' => {
                self.pos += 1;
                Ok(Some((start, &self.data[start..self.pos])))
            }
            _ => {
                while self.pos < self.data.len()
                    && !self.data[self.pos].is_ascii_whitespace()
                    && !matches!(self.data[self.pos], b'{' | b'}' | b'"')
                {
                    self.pos += 1;
                }
                Ok(Some((start, &self.data[start..self.pos])))
            }
        }
    }

    /// Consume a braced section whose opening brace was already read.
    /// Returns the offset just past the matching close brace.
    fn skip_braced_section(&mut self, name: &str) -> Result<usize, ShaderParseError> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_token()? {
                Some((_, b"{")) => depth += 1,
                Some((_, b"}")) => depth -= 1,
                Some(_) => {}
                None => {
                    return Err(ShaderParseError::UnterminatedBlock {
                        name: name.to_owned(),
                    })
                }
            }
        }
        Ok(self.pos)
    }
}

/// Extract every top-level shader block from a script.
///
/// Parsing stops at the first malformed construct, but the complete blocks
/// read before that point are still returned so one bad trailing entry does
/// not discard a whole script's worth of valid shaders.
///
/// Non-UTF-8 bytes inside block bodies are tolerated (bodies are skipped as
/// raw bytes); shader names themselves must be valid UTF-8 or the name is
/// recovered lossily.
pub fn parse_shader_blocks(data: &[u8]) -> (Vec<ShaderBlock>, Option<ShaderParseError>) {
    let mut blocks = Vec::new();
    let error = parse_blocks_into(data, &mut blocks).err();
    (blocks, error)
}

fn parse_blocks_into(
    data: &[u8],
    blocks: &mut Vec<ShaderBlock>,
) -> Result<(), ShaderParseError> {
    let mut scanner = Scanner { data, pos: 0 };

    loop {
        let (name_start, name_bytes) = match scanner.next_token()? {
            Some(token) => token,
            None => break,
        };
        match name_bytes {
            b"{" => {
                return Err(ShaderParseError::MissingOpenBrace {
                    name: String::new(),
                    offset: name_start,
                })
            }
            b"}" => return Err(ShaderParseError::StrayCloseBrace { offset: name_start }),
            _ => {}
        }
        if name_bytes.len() > MAX_SHADER_NAME {
            return Err(ShaderParseError::NameTooLong { offset: name_start });
        }
        let name = String::from_utf8_lossy(name_bytes).into_owned();

        match scanner.next_token()? {
            Some((_, b"{")) => {}
            other => {
                let offset = other.map(|(offset, _)| offset).unwrap_or(data.len());
                return Err(ShaderParseError::MissingOpenBrace { name, offset });
            }
        }

        let end = scanner.skip_braced_section(&name)?;
        blocks.push(ShaderBlock {
            name,
            start: name_start as u32,
            end: end as u32,
        });
    }

    Ok(())
}
