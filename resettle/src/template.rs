use crate::service::{PARENT_SEP, TAG_CLOSE, TAG_OPEN};
use crate::variables::{VarError, Variables};
use std::io::{self, Read, Write};

/// Size of the scan buffer used by the streaming renderer. A tag never
/// straddles two emitted chunks as long as it fits in the buffer.
const SCAN_CAPACITY: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Var(#[from] VarError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Substitutes `{{name}}` and `{{parent.name}}` tags against a variable
/// store, on behalf of one service.
#[derive(Debug, Clone, Copy)]
pub struct Template<'a> {
    service: &'a str,
    vars: &'a Variables,
}

impl<'a> Template<'a> {
    pub fn new(service: &'a str, vars: &'a Variables) -> Template<'a> {
        Template { service, vars }
    }

    /// Expands every tag in `text`. A trailing tag that is never closed is
    /// passed through verbatim.
    pub fn render_string(&self, text: &str) -> Result<String, VarError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(TAG_OPEN) {
            let after = &rest[start + TAG_OPEN.len()..];
            match after.find(TAG_CLOSE) {
                Some(end) => {
                    out.push_str(&rest[..start]);
                    out.push_str(self.lookup(&after[..end])?);
                    rest = &after[end + TAG_CLOSE.len()..];
                }
                None => break,
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Streaming form of [`render_string`](Self::render_string): scans the
    /// reader in buffered chunks, holding back data whenever an unclosed tag
    /// could straddle the chunk boundary.
    pub fn render<R: Read, W: Write>(&self, mut src: R, mut dst: W) -> Result<(), RenderError> {
        let mut buf: Vec<u8> = Vec::with_capacity(SCAN_CAPACITY);
        let mut eof = false;
        loop {
            if !eof && buf.len() < SCAN_CAPACITY {
                let start = buf.len();
                buf.resize(SCAN_CAPACITY, 0);
                let count = src.read(&mut buf[start..])?;
                buf.truncate(start + count);
                eof = count == 0;
            }
            let point = match split_point(&buf, eof) {
                Some(point) => point,
                None => continue,
            };
            if point == 0 {
                if eof {
                    break;
                }
                continue;
            }
            let consumed = match std::str::from_utf8(&buf[..point]) {
                Ok(token) => {
                    self.render_to(token, &mut dst)?;
                    point
                }
                // A multi-byte character may sit across the chunk boundary;
                // emit the valid prefix and wait for the rest.
                Err(err) if !eof && err.error_len().is_none() && err.valid_up_to() > 0 => {
                    let valid = err.valid_up_to();
                    if let Ok(token) = std::str::from_utf8(&buf[..valid]) {
                        self.render_to(token, &mut dst)?;
                    }
                    valid
                }
                Err(err) if !eof && err.error_len().is_none() => continue,
                Err(_) => {
                    return Err(RenderError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "template content is not valid UTF-8",
                    )))
                }
            };
            buf.drain(..consumed);
            if eof && buf.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn render_to<W: Write>(&self, text: &str, dst: &mut W) -> Result<(), RenderError> {
        let mut rest = text;
        while let Some(start) = rest.find(TAG_OPEN) {
            let after = &rest[start + TAG_OPEN.len()..];
            match after.find(TAG_CLOSE) {
                Some(end) => {
                    dst.write_all(rest[..start].as_bytes())?;
                    dst.write_all(self.lookup(&after[..end])?.as_bytes())?;
                    rest = &after[end + TAG_CLOSE.len()..];
                }
                None => break,
            }
        }
        dst.write_all(rest.as_bytes())?;
        Ok(())
    }

    /// Tag lookup order: the service's own variables, the common fallback,
    /// then a `parent.name` split against the service's parent list.
    fn lookup(&self, tag: &str) -> Result<&'a str, VarError> {
        match self.vars.get(self.service, tag) {
            Ok(value) => return Ok(value),
            Err(VarError::NoService) | Err(VarError::NoVariable) => {}
            Err(err) => return Err(err),
        }
        if let Some((parent, var)) = tag.split_once(PARENT_SEP) {
            let parents = self.vars.parents(self.service).unwrap_or(&[]);
            if parents.iter().any(|p| p == parent) {
                if let Ok(value) = self.vars.get(parent, var) {
                    return Ok(value);
                }
            }
        }
        Err(VarError::NoVariable)
    }
}

/// Greedy tag splitter for the streaming renderer.
///
/// Returns how much of `data` is safe to render now: everything when at EOF
/// or when every tag is closed; up to the last unclosed `{{` when the buffer
/// is full; `None` to request more data otherwise.
fn split_point(data: &[u8], at_eof: bool) -> Option<usize> {
    if at_eof {
        return Some(data.len());
    }
    match last_unclosed_tag(data) {
        None => Some(data.len()),
        Some(pos) => {
            if data.len() < SCAN_CAPACITY {
                None
            } else if pos == 0 {
                // The tag is larger than the whole buffer; it can only pass
                // through as a literal.
                Some(data.len())
            } else {
                Some(pos)
            }
        }
    }
}

fn last_unclosed_tag(data: &[u8]) -> Option<usize> {
    if let Some(open) = rfind(data, TAG_OPEN.as_bytes()) {
        if find(&data[open..], TAG_CLOSE.as_bytes()).is_none() {
            return Some(open);
        }
    }
    // A lone '{' at the edge may be the first half of an open tag.
    if data.last() == Some(&b'{') {
        return Some(data.len() - 1);
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
