//! Event payload decoding.
//!
//! The bar delivers events as an "env blob": alternating NUL-terminated
//! key and value strings, terminated by an empty key
//! (`k0\0v0\0k1\0v1\0…\0`).

use std::fmt;

/// Borrowed view over one event payload.
///
/// The underlying bytes live in kernel-supplied out-of-line memory and
/// only stay valid for the duration of the event callback; handlers copy
/// out anything they keep.
#[derive(Clone, Copy)]
pub struct Env<'a> {
    data: &'a [u8],
}

impl<'a> Env<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Looks up `key`, returning its exact value, or `""` when the key is
    /// absent. Never reads past the empty-key terminator.
    pub fn get(&self, key: &str) -> &'a str {
        self.pairs()
            .find(|&(k, _)| k == key)
            .map_or("", |(_, value)| value)
    }

    /// Iterates `(key, value)` pairs in blob order.
    pub fn pairs(&self) -> Pairs<'a> {
        Pairs { rest: self.data }
    }

    /// The raw blob, terminator included.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

impl fmt::Debug for Env<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.pairs()).finish()
    }
}

/// Iterator over the key/value pairs of an [`Env`].
pub struct Pairs<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Pairs<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, rest) = take_cstr(self.rest)?;
        if key.is_empty() {
            // Empty key terminates the blob.
            self.rest = &[];
            return None;
        }
        let (value, rest) = take_cstr(rest).unwrap_or(("", &[]));
        self.rest = rest;
        Some((key, value))
    }
}

/// Splits one NUL-terminated string off the front of `data`. A missing
/// terminator truncates at the end of the buffer instead of reading past
/// it.
fn take_cstr(data: &[u8]) -> Option<(&str, &[u8])> {
    if data.is_empty() {
        return None;
    }
    match data.iter().position(|&b| b == 0) {
        Some(nul) => Some((str_or_empty(&data[..nul]), &data[nul + 1..])),
        None => Some((str_or_empty(data), &[])),
    }
}

fn str_or_empty(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes).unwrap_or("")
}
